//! Conservative escape check.
//!
//! A graph "has escaping values" if any node can publish a value beyond
//! the fragment: calls, stores to globals, returns, and throws. The
//! emission boundary consults this when laying out code: a fragment with
//! no escaping values can be emitted as a leaf, skipping frame setup.

use crate::graph::Graph;
use crate::opcode::{MemoryOp, Opcode};

impl Graph {
    /// `true` if any node lets a value escape the function.
    pub fn has_escaping_values(&self) -> bool {
        self.nodes().any(|node| {
            matches!(
                node.opcode,
                Opcode::Call { .. }
                    | Opcode::New { .. }
                    | Opcode::CallMethod
                    | Opcode::Memory(MemoryOp::StoreGlobal)
                    | Opcode::Return
                    | Opcode::Throw
            )
        })
    }
}
