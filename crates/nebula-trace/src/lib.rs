pub mod config;
pub mod guard;
pub mod recorder;
pub mod snapshot;
pub mod trace;

// Re-export commonly used types
pub use config::RecorderConfig;
pub use guard::{evaluate_guard, ExitReason, GuardCondition, OptimizationHint, SideExitKind};
pub use recorder::{RecordingState, TraceRecorder};
pub use snapshot::{ContextSnapshot, ExecutionContext, StackSnapshot};
pub use trace::{SideExitRecord, Trace, TraceInstruction, TraceOpcode};
