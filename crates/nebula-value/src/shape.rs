//! Object shapes: the structural fingerprint of an object.
//!
//! A shape is the ordered list of own properties (name, type, constness)
//! plus a flag word, optionally linked to the shape it transitioned from
//! (`parent`) and the shape of its prototype. Shapes are compared by id;
//! [`ShapeRegistry`](crate::registry::ShapeRegistry) guarantees that
//! structural equality implies id equality.

use std::fmt;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::id::ShapeId;
use crate::tag::ValueTag;

/// One own property of a shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShapeProperty {
    /// Property name.
    pub name: String,
    /// The observed type of the property's value.
    pub tag: ValueTag,
    /// Whether the property has only ever held one value.
    pub is_constant: bool,
}

impl ShapeProperty {
    pub fn new(name: impl Into<String>, tag: ValueTag) -> Self {
        ShapeProperty {
            name: name.into(),
            tag,
            is_constant: false,
        }
    }

    pub fn constant(name: impl Into<String>, tag: ValueTag) -> Self {
        ShapeProperty {
            name: name.into(),
            tag,
            is_constant: true,
        }
    }
}

/// Shape flag word. Bits are accumulated with [`ShapeFlags::with`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ShapeFlags(pub u32);

impl ShapeFlags {
    pub const IS_ARRAY: ShapeFlags = ShapeFlags(1 << 0);
    pub const IS_FUNCTION: ShapeFlags = ShapeFlags(1 << 1);
    pub const IS_FROZEN: ShapeFlags = ShapeFlags(1 << 2);
    pub const IS_SEALED: ShapeFlags = ShapeFlags(1 << 3);
    pub const EXTENSIBLE: ShapeFlags = ShapeFlags(1 << 4);
    pub const HAS_INDEXED: ShapeFlags = ShapeFlags(1 << 5);
    pub const HAS_NAMED: ShapeFlags = ShapeFlags(1 << 6);

    /// Returns `true` if every bit of `flag` is set in `self`.
    pub fn contains(self, flag: ShapeFlags) -> bool {
        self.0 & flag.0 == flag.0
    }

    /// Returns `self` with the bits of `flag` added.
    pub fn with(self, flag: ShapeFlags) -> ShapeFlags {
        ShapeFlags(self.0 | flag.0)
    }

    /// Returns `self` with the bits of `flag` removed.
    pub fn without(self, flag: ShapeFlags) -> ShapeFlags {
        ShapeFlags(self.0 & !flag.0)
    }
}

/// The structural description of an object shape.
///
/// The property list is ordered: shapes differing only in property order
/// are distinct shapes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectShape {
    /// This shape's id (assigned by the registry).
    pub id: ShapeId,
    /// The shape before the last property addition, if any.
    pub parent: Option<ShapeId>,
    /// The shape of the prototype object, if any.
    pub prototype: Option<ShapeId>,
    /// Ordered own properties.
    pub properties: SmallVec<[ShapeProperty; 4]>,
    /// Flag word.
    pub flags: ShapeFlags,
}

impl ObjectShape {
    /// Looks up a property by name.
    pub fn property(&self, name: &str) -> Option<&ShapeProperty> {
        self.properties.iter().find(|p| p.name == name)
    }

    /// Returns `true` if the shape has a property with the given name.
    pub fn has_property(&self, name: &str) -> bool {
        self.property(name).is_some()
    }

    /// One-way structural compatibility.
    ///
    /// `self` is compatible with `other` iff every property of `self`
    /// appears in `other` with an identical type. Reflexive and transitive,
    /// not symmetric: a shape is compatible with any extension of itself.
    pub fn is_compatible_with(&self, other: &ObjectShape) -> bool {
        self.properties.iter().all(|prop| {
            other
                .property(&prop.name)
                .is_some_and(|theirs| theirs.tag == prop.tag)
        })
    }

    /// Structural similarity in [0, 1]: the share of properties (matched by
    /// name and type) common to both shapes, relative to the larger shape.
    /// Two empty shapes are fully similar.
    pub fn similarity(&self, other: &ObjectShape) -> f32 {
        let larger = self.properties.len().max(other.properties.len());
        if larger == 0 {
            return 1.0;
        }
        let matching = self
            .properties
            .iter()
            .filter(|prop| {
                other
                    .property(&prop.name)
                    .is_some_and(|theirs| theirs.tag == prop.tag)
            })
            .count();
        matching as f32 / larger as f32
    }
}

impl fmt::Display for ObjectShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{{", self.id)?;
        for (i, prop) in self.properties.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}: {}", prop.name, prop.tag)?;
        }
        f.write_str("}")
    }
}
