//! Stable ID newtypes shared across the engine core.
//!
//! All IDs are distinct newtype wrappers over `u32`, providing type safety
//! so that a `FunctionId` cannot be accidentally used where a `ShapeId` is
//! expected. [`BytecodeAddress`] pairs a function with an instruction offset
//! and is the unit of location the trace recorder and deoptimization
//! machinery speak in.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Function identity, minted by the interpreter and opaque to the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FunctionId(pub u32);

/// Object-shape identity, minted by [`ShapeRegistry`](crate::ShapeRegistry).
///
/// Two objects share a shape id iff they expose the same ordered property
/// list with identical per-property (name, type, is-constant) triples and
/// identical flags. Ids are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShapeId(pub u32);

/// A position in a function's bytecode stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BytecodeAddress {
    /// Which function the bytecode belongs to.
    pub function: FunctionId,
    /// Instruction offset within the function.
    pub offset: u32,
}

impl BytecodeAddress {
    /// Creates an address from a function and offset.
    pub fn new(function: FunctionId, offset: u32) -> Self {
        BytecodeAddress { function, offset }
    }

    /// Returns `true` if `target` jumps backward from `self` within the
    /// same function. Cross-function transfers are never backward jumps.
    pub fn is_backward_jump_to(&self, target: BytecodeAddress) -> bool {
        self.function == target.function && target.offset < self.offset
    }
}

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fn#{}", self.0)
    }
}

impl fmt::Display for ShapeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "shape#{}", self.0)
    }
}

impl fmt::Display for BytecodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}+{}", self.function, self.offset)
    }
}
