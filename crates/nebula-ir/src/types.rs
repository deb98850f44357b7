//! Value-type annotations on IR nodes.
//!
//! [`IrType`] is the lattice the optimizer narrows within: `Any` at the
//! top, a concrete [`ValueTag`], or an object with a known shape at the
//! bottom. `Void` annotates nodes that produce no value.

use std::fmt;

use serde::{Deserialize, Serialize};

use nebula_value::{ShapeId, ValueTag};

/// Static type annotation of a node's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IrType {
    /// Unknown: any runtime value.
    Any,
    /// Produces no value (stores, jumps, returns).
    Void,
    /// A value with a known tag.
    Tagged(ValueTag),
    /// An object with a known tag-level type `Object` and a known shape.
    Shaped(ShapeId),
}

impl IrType {
    pub fn is_any(self) -> bool {
        matches!(self, IrType::Any)
    }

    pub fn is_void(self) -> bool {
        matches!(self, IrType::Void)
    }

    /// The tag, when one is known (`Shaped` implies `Object`).
    pub fn tag(self) -> Option<ValueTag> {
        match self {
            IrType::Tagged(tag) => Some(tag),
            IrType::Shaped(_) => Some(ValueTag::Object),
            IrType::Any | IrType::Void => None,
        }
    }

    pub fn is_number(self) -> bool {
        self.tag().is_some_and(ValueTag::is_number)
    }

    /// `true` when `self` is at least as precise as `other`: equal, or a
    /// narrowing of it. Every type refines `Any`; `Shaped` refines
    /// `Tagged(Object)`.
    pub fn refines(self, other: IrType) -> bool {
        match (self, other) {
            (a, b) if a == b => true,
            (_, IrType::Any) => self != IrType::Void,
            (IrType::Shaped(_), IrType::Tagged(ValueTag::Object)) => true,
            _ => false,
        }
    }
}

impl Default for IrType {
    fn default() -> Self {
        IrType::Any
    }
}

impl fmt::Display for IrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IrType::Any => f.write_str("any"),
            IrType::Void => f.write_str("void"),
            IrType::Tagged(tag) => write!(f, "{tag}"),
            IrType::Shaped(shape) => write!(f, "object[{shape}]"),
        }
    }
}
