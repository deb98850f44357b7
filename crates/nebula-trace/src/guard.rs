//! Guard conditions and their evaluation, side-exit kinds, exit reasons,
//! and optimization hints.
//!
//! A [`GuardCondition`] is a sum type: each kind carries its own typed
//! payload (range bounds, lengths, shape id) instead of packing them into
//! an overloaded "expected type" slot. [`evaluate_guard`] is a pure
//! function of the condition and the observed value.

use serde::{Deserialize, Serialize};

use nebula_value::{ShapeId, Value, ValueTag};

/// A speculative runtime check recorded into a trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GuardCondition {
    /// The value's type tag equals `expected`.
    TypeCheck { expected: ValueTag },
    /// The value is neither null nor undefined.
    NonNull,
    /// The value is an `Int32` within `[min, max]`.
    IntegerInRange { min: i32, max: i32 },
    /// The value is a string of exactly `length` characters.
    StringLength { length: u32 },
    /// The value is an array of exactly `length` elements.
    ArrayLength { length: u32 },
    /// The value is object-like with exactly this shape.
    ObjectShape { shape: ShapeId },
    /// A condition minted by a layer this recorder does not understand.
    /// Always fails, so speculation stays safe.
    Opaque { code: u16 },
}

/// Evaluates a guard against the observed value. Pure; unknown conditions
/// fail safe.
pub fn evaluate_guard(condition: GuardCondition, actual: &Value) -> bool {
    match condition {
        GuardCondition::TypeCheck { expected } => actual.tag() == expected,
        GuardCondition::NonNull => !actual.is_nullish(),
        GuardCondition::IntegerInRange { min, max } => actual
            .as_int32()
            .is_some_and(|v| v >= min && v <= max),
        GuardCondition::StringLength { length } => {
            actual.string_length().is_some_and(|len| len == length)
        }
        GuardCondition::ArrayLength { length } => {
            actual.array_length().is_some_and(|len| len == length)
        }
        GuardCondition::ObjectShape { shape } => {
            actual.shape().is_some_and(|s| s == shape)
        }
        GuardCondition::Opaque { .. } => false,
    }
}

/// Why compiled code (or the recorder) left the fast path at a point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SideExitKind {
    GuardFailure,
    LoopIterationLimit,
    CallStackLimitReached,
    Deoptimization,
}

/// Why a recording ended or was abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    None,
    TraceTooLong,
    TraceTooComplex,
    UnrecordableOp,
    Blacklisted,
    Nested,
    Divergent,
    OutOfMemory,
    Timeout,
    SpeculationFailure,
    TooManyGuardFailures,
    TooManySideExits,
    LoopIterationLimit,
    CallStackLimitReached,
}

/// Advisory hints the interpreter can attach to trace positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptimizationHint {
    /// The value at this site has had a stable type.
    TypeStable,
    /// The value at this site is effectively constant.
    LikelyConstant,
    /// The call at this site has a single observed target.
    MonomorphicCall,
    /// The object at this site has kept one shape.
    ShapeStable,
    /// The expression at this site does not vary across loop iterations.
    LoopInvariant,
}
