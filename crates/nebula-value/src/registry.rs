//! Canonicalizing shape registry.
//!
//! The registry is the only minter of [`ShapeId`]s. Interning hashes the
//! structural key (ordered property triples, flag word, prototype id), so
//! two structurally identical shapes always receive the same id and the
//! profiler can compare shapes by id alone. Ids are never reused.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::id::ShapeId;
use crate::shape::{ObjectShape, ShapeFlags, ShapeProperty};

/// The structural identity a shape is interned under. The parent link is
/// deliberately excluded: two transition paths reaching the same structure
/// yield the same shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
struct ShapeKey {
    properties: Vec<ShapeProperty>,
    flags: ShapeFlags,
    prototype: Option<ShapeId>,
}

/// Owns every [`ObjectShape`] and guarantees canonical ids.
///
/// Serializes as the bare shape list; the interning index is rebuilt on
/// deserialization so a round trip preserves canonicalization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "ShapeRegistrySerde", into = "ShapeRegistrySerde")]
pub struct ShapeRegistry {
    /// Shapes indexed by `ShapeId.0`.
    shapes: Vec<ObjectShape>,
    /// Structural key -> id, in first-interned order.
    interned: IndexMap<ShapeKey, ShapeId>,
}

/// Serialized form of [`ShapeRegistry`]: the shape list alone.
#[derive(Serialize, Deserialize)]
struct ShapeRegistrySerde {
    shapes: Vec<ObjectShape>,
}

impl From<ShapeRegistry> for ShapeRegistrySerde {
    fn from(registry: ShapeRegistry) -> Self {
        ShapeRegistrySerde {
            shapes: registry.shapes,
        }
    }
}

impl From<ShapeRegistrySerde> for ShapeRegistry {
    fn from(data: ShapeRegistrySerde) -> Self {
        let interned = data
            .shapes
            .iter()
            .map(|shape| {
                (
                    ShapeKey {
                        properties: shape.properties.to_vec(),
                        flags: shape.flags,
                        prototype: shape.prototype,
                    },
                    shape.id,
                )
            })
            .collect();
        ShapeRegistry {
            shapes: data.shapes,
            interned,
        }
    }
}

impl ShapeRegistry {
    pub fn new() -> Self {
        ShapeRegistry::default()
    }

    /// Interns a shape, returning the canonical id for its structure.
    ///
    /// If an identical structure was interned before, its existing id is
    /// returned and `parent` is ignored (the first transition path wins).
    pub fn intern(
        &mut self,
        properties: Vec<ShapeProperty>,
        flags: ShapeFlags,
        prototype: Option<ShapeId>,
    ) -> ShapeId {
        self.intern_with_parent(properties, flags, prototype, None)
    }

    /// Interns a shape recording the shape it transitioned from.
    pub fn intern_with_parent(
        &mut self,
        properties: Vec<ShapeProperty>,
        flags: ShapeFlags,
        prototype: Option<ShapeId>,
        parent: Option<ShapeId>,
    ) -> ShapeId {
        let key = ShapeKey {
            properties,
            flags,
            prototype,
        };
        if let Some(&id) = self.interned.get(&key) {
            return id;
        }

        let id = ShapeId(self.shapes.len() as u32);
        self.shapes.push(ObjectShape {
            id,
            parent,
            prototype,
            properties: SmallVec::from_vec(key.properties.clone()),
            flags,
        });
        self.interned.insert(key, id);
        id
    }

    /// Interns the shape produced by adding one property to an existing
    /// shape. The existing shape becomes the parent.
    ///
    /// Returns `None` if `base` is unknown.
    pub fn transition(&mut self, base: ShapeId, property: ShapeProperty) -> Option<ShapeId> {
        let base_shape = self.get(base)?;
        let mut properties: Vec<ShapeProperty> = base_shape.properties.to_vec();
        let flags = base_shape.flags;
        let prototype = base_shape.prototype;
        properties.push(property);
        Some(self.intern_with_parent(properties, flags, prototype, Some(base)))
    }

    /// Looks up a shape by id.
    pub fn get(&self, id: ShapeId) -> Option<&ObjectShape> {
        self.shapes.get(id.0 as usize)
    }

    /// Number of distinct shapes interned.
    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }

    /// Iterates shapes in id order.
    pub fn iter(&self) -> impl Iterator<Item = &ObjectShape> {
        self.shapes.iter()
    }
}
