//! The boundary value representation.
//!
//! [`Value`] is the shape of runtime values as seen from this side of the
//! interpreter boundary: enough payload for profiling and guard evaluation
//! (tag, int32 payload, string length, array length, object shape), nothing
//! more. The interpreter's real value representation is out of scope; it
//! converts into `Value` at every profile/trace hook.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::id::ShapeId;
use crate::tag::ValueTag;

/// A runtime value as observed by the profiler and the trace recorder.
///
/// Strings are shared `Arc<str>` so that copying values into stack
/// snapshots stays cheap. Object-like variants carry only their shape id
/// (and, for arrays, the element count) -- the heap object itself never
/// crosses the boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Undefined,
    Null,
    Boolean(bool),
    Int32(i32),
    Float64(f64),
    String(Arc<str>),
    Symbol(u32),
    BigInt(i64),
    Object { shape: ShapeId },
    Array { shape: ShapeId, length: u32 },
    Function { shape: ShapeId },
}

impl Value {
    /// Returns the type tag of this value.
    pub fn tag(&self) -> ValueTag {
        match self {
            Value::Undefined => ValueTag::Undefined,
            Value::Null => ValueTag::Null,
            Value::Boolean(_) => ValueTag::Boolean,
            Value::Int32(_) => ValueTag::Int32,
            Value::Float64(_) => ValueTag::Float64,
            Value::String(_) => ValueTag::String,
            Value::Symbol(_) => ValueTag::Symbol,
            Value::BigInt(_) => ValueTag::BigInt,
            Value::Object { .. } => ValueTag::Object,
            Value::Array { .. } => ValueTag::Array,
            Value::Function { .. } => ValueTag::Function,
        }
    }

    /// Returns `true` for `Null` and `Undefined`.
    pub fn is_nullish(&self) -> bool {
        self.tag().is_nullish()
    }

    /// Returns the `i32` payload for `Int32` values.
    pub fn as_int32(&self) -> Option<i32> {
        match self {
            Value::Int32(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the string length for `String` values.
    pub fn string_length(&self) -> Option<u32> {
        match self {
            Value::String(s) => Some(s.chars().count() as u32),
            _ => None,
        }
    }

    /// Returns the element count for `Array` values.
    pub fn array_length(&self) -> Option<u32> {
        match self {
            Value::Array { length, .. } => Some(*length),
            _ => None,
        }
    }

    /// Returns the shape id for object-like values
    /// (`Object`, `Array`, `Function`).
    pub fn shape(&self) -> Option<ShapeId> {
        match self {
            Value::Object { shape }
            | Value::Array { shape, .. }
            | Value::Function { shape } => Some(*shape),
            _ => None,
        }
    }

    /// Convenience constructor for string values.
    pub fn string(s: &str) -> Self {
        Value::String(Arc::from(s))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => f.write_str("undefined"),
            Value::Null => f.write_str("null"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Int32(v) => write!(f, "{v}"),
            Value::Float64(v) => write!(f, "{v}"),
            Value::String(s) => write!(f, "{s:?}"),
            Value::Symbol(id) => write!(f, "symbol({id})"),
            Value::BigInt(v) => write!(f, "{v}n"),
            Value::Object { shape } => write!(f, "object[{shape}]"),
            Value::Array { shape, length } => write!(f, "array[{shape}; {length}]"),
            Value::Function { shape } => write!(f, "function[{shape}]"),
        }
    }
}
