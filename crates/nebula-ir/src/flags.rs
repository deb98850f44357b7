//! Applied-optimization flag set.
//!
//! Each graph (and each published optimized-function record) carries the
//! set of optimizations that ran on it, accumulated pass by pass.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A set of optimization flags packed into one word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OptFlag(pub u32);

impl OptFlag {
    pub const NONE: OptFlag = OptFlag(0);
    pub const CONSTANT_FOLDING: OptFlag = OptFlag(1 << 0);
    pub const DEAD_CODE_ELIMINATION: OptFlag = OptFlag(1 << 1);
    pub const COMMON_SUBEXPRESSION: OptFlag = OptFlag(1 << 2);
    pub const LOOP_INVARIANT_MOTION: OptFlag = OptFlag(1 << 3);
    pub const LOOP_UNROLLING: OptFlag = OptFlag(1 << 4);
    pub const INLINING: OptFlag = OptFlag(1 << 5);
    pub const TAIL_CALL: OptFlag = OptFlag(1 << 6);
    pub const TYPE_SPECIALIZATION: OptFlag = OptFlag(1 << 7);
    pub const BOUNDS_CHECK_ELIMINATION: OptFlag = OptFlag(1 << 8);
    pub const VALUE_NUMBERING: OptFlag = OptFlag(1 << 9);
    pub const VECTORIZATION: OptFlag = OptFlag(1 << 10);
    pub const MEMORY_OPT: OptFlag = OptFlag(1 << 11);
    pub const TYPE_GUARD_ELIMINATION: OptFlag = OptFlag(1 << 12);

    pub fn contains(self, flag: OptFlag) -> bool {
        self.0 & flag.0 == flag.0
    }

    pub fn with(self, flag: OptFlag) -> OptFlag {
        OptFlag(self.0 | flag.0)
    }

    pub fn insert(&mut self, flag: OptFlag) {
        self.0 |= flag.0;
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for OptFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "opt_flags({:#06x})", self.0)
    }
}
