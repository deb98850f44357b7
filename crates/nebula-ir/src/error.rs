//! IR graph error types.

use thiserror::Error;

use crate::id::{BlockId, NodeId};

/// Errors produced by graph mutations and analyses.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    /// A node id did not resolve to a live node.
    #[error("node not found: {id}")]
    NodeNotFound { id: NodeId },

    /// A block id did not resolve to a live block.
    #[error("block not found: {id}")]
    BlockNotFound { id: BlockId },

    /// The graph has no entry block but the operation requires one.
    #[error("graph has no entry block")]
    NoEntryBlock,

    /// A structural precondition did not hold.
    #[error("invalid graph structure: {reason}")]
    InvalidStructure { reason: String },
}
