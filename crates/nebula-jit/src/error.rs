//! Compilation error types.
//!
//! Compilation failures never cross the interpreter boundary as guest
//! exceptions; the orchestrator turns them into a `Failed` record and the
//! function keeps running in the interpreter.

use thiserror::Error;

use nebula_ir::GraphError;

/// Errors produced by the optimization pipeline and orchestrator.
#[derive(Debug, Error)]
pub enum CompileError {
    /// Graph verification failed between pipeline stages.
    #[error("graph verification failed after {stage}: {reason}")]
    VerifyFailed { stage: String, reason: String },

    /// A graph mutation inside a pass failed.
    #[error("graph operation failed: {0}")]
    Graph(#[from] GraphError),

    /// The trace could not be lowered to IR.
    #[error("trace frontend error: {0}")]
    Frontend(String),

    /// The compile job observed its cancellation flag.
    #[error("compilation cancelled")]
    Cancelled,

    /// The code emitter rejected the graph.
    #[error("code emission failed: {0}")]
    EmitFailed(String),

    /// No IR source is available for the requested function.
    #[error("no bytecode source for function {0}")]
    NoSource(u32),
}
