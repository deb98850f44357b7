//! Stack and context snapshots, and the interpreter boundary.
//!
//! [`ExecutionContext`] is the trace recorder's window into the
//! interpreter: current position, stack contents, and call depth.
//! Snapshots copy everything out of the trait immediately; the recorder
//! never retains the reference. A [`ContextSnapshot`] attached to a side
//! exit is the exact state interpretation resumes from after a
//! deoptimization.

use serde::{Deserialize, Serialize};

use nebula_value::{BytecodeAddress, Value};

/// What the recorder can see of the interpreter.
pub trait ExecutionContext {
    /// The address of the instruction being executed.
    fn current_address(&self) -> BytecodeAddress;
    /// The operand stack, bottom to top.
    fn stack_values(&self) -> Vec<Value>;
    fn stack_pointer(&self) -> usize;
    fn frame_pointer(&self) -> usize;
    /// Current call nesting depth.
    fn call_depth(&self) -> usize;
}

/// A copy of the interpreter stack at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackSnapshot {
    pub values: Vec<Value>,
    pub stack_pointer: usize,
    pub frame_pointer: usize,
}

impl StackSnapshot {
    pub fn capture(ctx: &dyn ExecutionContext) -> Self {
        StackSnapshot {
            values: ctx.stack_values(),
            stack_pointer: ctx.stack_pointer(),
            frame_pointer: ctx.frame_pointer(),
        }
    }
}

/// A full resume point: instruction address plus stack state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextSnapshot {
    /// The bytecode address interpretation resumes from.
    pub instruction: BytecodeAddress,
    pub stack_values: Vec<Value>,
    pub stack_pointer: usize,
    pub frame_pointer: usize,
}

impl ContextSnapshot {
    pub fn capture(ctx: &dyn ExecutionContext, instruction: BytecodeAddress) -> Self {
        ContextSnapshot {
            instruction,
            stack_values: ctx.stack_values(),
            stack_pointer: ctx.stack_pointer(),
            frame_pointer: ctx.frame_pointer(),
        }
    }
}
