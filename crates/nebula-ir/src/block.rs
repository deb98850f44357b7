//! Basic blocks.
//!
//! A block owns an ordered instruction sequence and its CFG neighborhood.
//! Predecessor and successor lists are maintained bidirectionally by the
//! graph's edge methods; dominator and loop fields are populated by the
//! analyses in [`crate::analysis`].

use serde::{Deserialize, Serialize};

use crate::id::{BlockId, NodeId};

/// One basic block in the CFG.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BasicBlock {
    pub id: BlockId,
    /// Human-readable label for dumps and tests.
    pub label: String,
    /// Instruction nodes in execution order. The last one, if control
    /// flow, is the terminator.
    pub(crate) instructions: Vec<NodeId>,
    pub(crate) predecessors: Vec<BlockId>,
    pub(crate) successors: Vec<BlockId>,
    /// Immediate dominator (`None` for the entry block and for blocks not
    /// yet analyzed).
    pub dominator: Option<BlockId>,
    /// Blocks this block immediately dominates (dominator-tree children).
    pub dominated: Vec<BlockId>,
    /// Nesting depth of the innermost containing loop (0 outside loops).
    pub loop_depth: u32,
    /// Set for natural-loop headers.
    pub loop_header: bool,
    /// Scratch flag for traversal algorithms.
    pub visited: bool,
    /// Set for blocks the last dominator analysis could not reach.
    pub unreachable: bool,
}

impl BasicBlock {
    pub(crate) fn new(id: BlockId, label: String) -> Self {
        BasicBlock {
            id,
            label,
            instructions: Vec::new(),
            predecessors: Vec::new(),
            successors: Vec::new(),
            dominator: None,
            dominated: Vec::new(),
            loop_depth: 0,
            loop_header: false,
            visited: false,
            unreachable: false,
        }
    }

    /// Instructions in execution order.
    pub fn instructions(&self) -> &[NodeId] {
        &self.instructions
    }

    pub fn predecessors(&self) -> &[BlockId] {
        &self.predecessors
    }

    pub fn successors(&self) -> &[BlockId] {
        &self.successors
    }

    /// The last instruction, which is the terminator only if it is control
    /// flow (the graph exposes [`terminator`](crate::graph::Graph::terminator)
    /// to check that).
    pub fn last_instruction(&self) -> Option<NodeId> {
        self.instructions.last().copied()
    }

    pub(crate) fn clear_analysis(&mut self) {
        self.dominator = None;
        self.dominated.clear();
        self.loop_depth = 0;
        self.loop_header = false;
        self.visited = false;
        self.unreachable = false;
    }
}
