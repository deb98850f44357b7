//! Stable ID newtypes for graph entities.
//!
//! Nodes and blocks are arena slots addressed by index handles, never by
//! pointer. [`NodeId`] is 64-bit and monotonically assigned by the owning
//! graph; ids of removed nodes are never reused. [`BlockId`] indexes the
//! block arena the same way.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable node identifier: an index into the graph's node arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u64);

/// Stable basic-block identifier: an index into the graph's block arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockId(pub u32);

impl NodeId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl BlockId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "b{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_formats() {
        assert_eq!(format!("{}", NodeId(12)), "n12");
        assert_eq!(format!("{}", BlockId(3)), "b3");
    }

    #[test]
    fn ordering_follows_assignment_order() {
        assert!(NodeId(1) < NodeId(2));
        assert!(BlockId(0) < BlockId(1));
    }
}
