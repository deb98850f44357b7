pub mod config;
pub mod emitter;
pub mod error;
pub mod frontend;
pub mod orchestrator;
pub mod passes;
pub mod pipeline;

// Re-export commonly used types
pub use config::JitConfig;
pub use emitter::{CodeEmitter, NativeCode, NullCodeEmitter};
pub use error::CompileError;
pub use frontend::{build_trace_ir, TraceIr};
pub use orchestrator::{
    CompileReason, FunctionSource, FunctionState, OptimizedFunction, Orchestrator,
};
pub use pipeline::{CompileOutcome, OptLevel, Phase, Pipeline, PipelineOptions, Progress};
