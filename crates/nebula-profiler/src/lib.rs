pub mod call_site;
pub mod error;
pub mod profiler;
pub mod type_info;

// Re-export commonly used types
pub use call_site::{CallOutcome, CallSiteTypeInfo};
pub use error::ProfileError;
pub use profiler::{FunctionTypeSummary, ProfileSnapshot, TypeProfiler};
pub use type_info::{TypeCategory, TypeInfo, TypeRecord};
