//! Per-site type observation records.
//!
//! A [`TypeInfo`] aggregates everything observed at one site (a variable
//! slot, parameter, property, array element, or call argument/return): an
//! ordered list of `(tag, count, shape)` records plus total-observation and
//! type-transition counters. While a site is still specializable, records
//! are split by object shape so shape speculation can ask "always the same
//! shape?"; once the site has seen five distinct tags it is megamorphic,
//! shape splitting is consolidated away, and the category never reverts
//! without an explicit [`reset`](TypeInfo::reset).

use std::fmt;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use nebula_value::{ShapeId, Value, ValueTag};

/// Number of observations at which confidence saturates at 1.0.
const CONFIDENCE_SATURATION: u32 = 100;

/// Share of observations a tag needs for the "mostly" predicates.
const MOSTLY_THRESHOLD: f32 = 0.95;

/// Share of observations a shape needs for `is_mostly_same_shape`.
const MOSTLY_SHAPE_THRESHOLD: f32 = 0.90;

/// Distinct tags at which a site becomes megamorphic.
const MEGAMORPHIC_TAGS: usize = 5;

/// Specialization category of an observation site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypeCategory {
    /// No observations yet.
    Uninitialized,
    /// Exactly one record: the ideal specialization target.
    Monomorphic,
    /// Two to four records: inline-cache territory.
    Polymorphic,
    /// Five or more distinct tags: specialization is off the table.
    Megamorphic,
}

/// One `(tag, count, shape)` observation record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeRecord {
    /// The observed type tag.
    pub tag: ValueTag,
    /// How many observations matched this record. Strictly positive.
    pub count: u32,
    /// The object shape, for object-like tags while the site is still
    /// shape-discriminating. `None` for primitives and after consolidation.
    pub shape: Option<ShapeId>,
}

/// Aggregated type observations for one site.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TypeInfo {
    /// Records in first-seen order.
    records: SmallVec<[TypeRecord; 4]>,
    /// Total observations, equal to the sum of record counts.
    total_observations: u32,
    /// How often the observed tag differed from the previous one.
    transitions: u32,
    /// The tag of the most recent observation.
    last_tag: Option<ValueTag>,
    /// Set when the site first reaches five distinct tags. Never cleared
    /// except by `reset`.
    megamorphic: bool,
}

impl TypeInfo {
    pub fn new() -> Self {
        TypeInfo::default()
    }

    /// Records an observation of `value`.
    pub fn record_value(&mut self, value: &Value) {
        self.record(value.tag(), value.shape());
    }

    /// Records an observation of a tag with an optional object shape.
    pub fn record(&mut self, tag: ValueTag, shape: Option<ShapeId>) {
        self.total_observations += 1;
        if let Some(last) = self.last_tag {
            if last != tag {
                self.transitions += 1;
            }
        }
        self.last_tag = Some(tag);

        // A megamorphic site no longer discriminates shapes.
        let shape = if self.megamorphic { None } else { shape };

        if let Some(record) = self
            .records
            .iter_mut()
            .find(|r| r.tag == tag && r.shape == shape)
        {
            record.count += 1;
            return;
        }

        self.records.push(TypeRecord {
            tag,
            count: 1,
            shape,
        });
        if self.records.len() > 4 {
            self.consolidate();
        }
    }

    /// Merges same-tag records (dropping shape splits) once the record list
    /// outgrows the polymorphic range. If four records still remain after
    /// merging, the site has five distinct tags and freezes as megamorphic.
    fn consolidate(&mut self) {
        let mut merged: SmallVec<[TypeRecord; 4]> = SmallVec::new();
        for record in self.records.drain(..) {
            match merged.iter_mut().find(|m| m.tag == record.tag) {
                Some(m) => {
                    m.count += record.count;
                    if m.shape != record.shape {
                        m.shape = None;
                    }
                }
                None => merged.push(TypeRecord {
                    shape: record.shape,
                    ..record
                }),
            }
        }
        if merged.len() >= MEGAMORPHIC_TAGS {
            self.megamorphic = true;
            for record in &mut merged {
                record.shape = None;
            }
        }
        self.records = merged;
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// The site's specialization category.
    pub fn category(&self) -> TypeCategory {
        if self.megamorphic {
            return TypeCategory::Megamorphic;
        }
        match self.records.len() {
            0 => TypeCategory::Uninitialized,
            1 => TypeCategory::Monomorphic,
            2..=4 => TypeCategory::Polymorphic,
            _ => TypeCategory::Megamorphic,
        }
    }

    pub fn is_monomorphic(&self) -> bool {
        self.category() == TypeCategory::Monomorphic
    }

    pub fn is_polymorphic(&self) -> bool {
        self.category() == TypeCategory::Polymorphic
    }

    pub fn is_megamorphic(&self) -> bool {
        self.category() == TypeCategory::Megamorphic
    }

    /// Observation records in first-seen order.
    pub fn records(&self) -> &[TypeRecord] {
        &self.records
    }

    /// Total number of observations.
    pub fn total_observations(&self) -> u32 {
        self.total_observations
    }

    /// Number of tag transitions between consecutive observations.
    pub fn transitions(&self) -> u32 {
        self.transitions
    }

    /// The record with the highest count. Ties break toward the record seen
    /// first.
    pub fn most_common_record(&self) -> Option<&TypeRecord> {
        let mut best: Option<&TypeRecord> = None;
        for record in &self.records {
            match best {
                Some(b) if record.count <= b.count => {}
                _ => best = Some(record),
            }
        }
        best
    }

    /// The most frequently observed tag, first-seen wins on ties.
    pub fn most_common_tag(&self) -> Option<ValueTag> {
        self.most_common_record().map(|r| r.tag)
    }

    /// The most frequently observed object shape, if any record still
    /// carries one.
    pub fn most_common_shape(&self) -> Option<ShapeId> {
        let mut best: Option<(&TypeRecord, ShapeId)> = None;
        for record in &self.records {
            let Some(shape) = record.shape else { continue };
            match best {
                Some((b, _)) if record.count <= b.count => {}
                _ => best = Some((record, shape)),
            }
        }
        best.map(|(_, shape)| shape)
    }

    /// Share of observations with the given tag, in [0, 1].
    pub fn tag_ratio(&self, tag: ValueTag) -> f32 {
        if self.total_observations == 0 {
            return 0.0;
        }
        let count: u32 = self
            .records
            .iter()
            .filter(|r| r.tag == tag)
            .map(|r| r.count)
            .sum();
        count as f32 / self.total_observations as f32
    }

    /// Share of observations with a numeric tag (`Int32` or `Float64`).
    pub fn number_ratio(&self) -> f32 {
        self.tag_ratio(ValueTag::Int32) + self.tag_ratio(ValueTag::Float64)
    }

    /// Type stability in [0, 1]: `1 - transitions / observations`.
    pub fn stability(&self) -> f32 {
        if self.total_observations == 0 {
            return 1.0;
        }
        (1.0 - self.transitions as f32 / self.total_observations as f32).clamp(0.0, 1.0)
    }

    /// Confidence in [0, 1], saturating at 100 observations.
    pub fn confidence(&self) -> f32 {
        (self.total_observations as f32 / CONFIDENCE_SATURATION as f32).min(1.0)
    }

    // -----------------------------------------------------------------------
    // Specialization predicates
    // -----------------------------------------------------------------------

    /// Every observation was `Int32`.
    pub fn is_always_int32(&self) -> bool {
        self.total_observations > 0 && self.records.iter().all(|r| r.tag == ValueTag::Int32)
    }

    /// Every observation was numeric.
    pub fn is_always_number(&self) -> bool {
        self.total_observations > 0 && self.records.iter().all(|r| r.tag.is_number())
    }

    /// At least 95% of observations were `Int32`.
    pub fn is_mostly_int32(&self) -> bool {
        self.total_observations > 0 && self.tag_ratio(ValueTag::Int32) >= MOSTLY_THRESHOLD
    }

    /// At least 95% of observations were numeric.
    pub fn is_mostly_number(&self) -> bool {
        self.total_observations > 0 && self.number_ratio() >= MOSTLY_THRESHOLD
    }

    /// Every observation was an object with one and the same shape.
    pub fn is_always_same_shape(&self) -> bool {
        if self.total_observations == 0 {
            return false;
        }
        let mut shapes = self.records.iter().map(|r| r.shape);
        match shapes.next() {
            Some(Some(first)) => shapes.all(|s| s == Some(first)),
            _ => false,
        }
    }

    /// At least 90% of observations carried the most common shape.
    pub fn is_mostly_same_shape(&self) -> bool {
        if self.total_observations == 0 {
            return false;
        }
        let Some(shape) = self.most_common_shape() else {
            return false;
        };
        let count: u32 = self
            .records
            .iter()
            .filter(|r| r.shape == Some(shape))
            .map(|r| r.count)
            .sum();
        count as f32 / self.total_observations as f32 >= MOSTLY_SHAPE_THRESHOLD
    }

    // -----------------------------------------------------------------------
    // Maintenance
    // -----------------------------------------------------------------------

    /// Discards all observations, returning the site to `Uninitialized`.
    pub fn reset(&mut self) {
        *self = TypeInfo::default();
    }

    /// Blends `other` into `self` with weight `alpha` in [0, 1]: counts
    /// become `(1 - alpha) * self + alpha * other`, rounded, merged by
    /// `(tag, shape)`. Used to decay a stale profile toward fresh
    /// observations after invalidation.
    pub fn blend(&mut self, other: &TypeInfo, alpha: f32) {
        let alpha = alpha.clamp(0.0, 1.0);
        let keep = 1.0 - alpha;

        let mut blended: SmallVec<[TypeRecord; 4]> = SmallVec::new();
        let scaled = |count: u32, weight: f32| (count as f32 * weight).round() as u32;

        for record in &self.records {
            let count = scaled(record.count, keep);
            if count > 0 {
                blended.push(TypeRecord { count, ..record.clone() });
            }
        }
        for record in &other.records {
            let count = scaled(record.count, alpha);
            if count == 0 {
                continue;
            }
            match blended
                .iter_mut()
                .find(|b| b.tag == record.tag && b.shape == record.shape)
            {
                Some(b) => b.count += count,
                None => blended.push(TypeRecord { count, ..record.clone() }),
            }
        }

        self.total_observations = blended.iter().map(|r| r.count).sum();
        self.transitions = scaled(self.transitions, keep) + scaled(other.transitions, alpha);
        self.transitions = self
            .transitions
            .min(self.total_observations.saturating_sub(1));
        self.records = blended;
        self.megamorphic = self.megamorphic || other.megamorphic;
        if self.last_tag.is_none() {
            self.last_tag = other.last_tag;
        }
    }

    /// Keeps only records matching the predicate, deducting the removed
    /// counts from the total so the sum invariant holds.
    pub fn retain_records(&mut self, mut predicate: impl FnMut(&TypeRecord) -> bool) {
        let mut removed = 0u32;
        self.records.retain(|record| {
            let keep = predicate(record);
            if !keep {
                removed += record.count;
            }
            keep
        });
        self.total_observations -= removed;
        self.transitions = self
            .transitions
            .min(self.total_observations.saturating_sub(1));
    }
}

impl fmt::Display for TypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} ({} obs, {} transitions)",
            self.category(),
            self.total_observations,
            self.transitions
        )?;
        for record in &self.records {
            write!(f, " {}x{}", record.tag, record.count)?;
            if let Some(shape) = record.shape {
                write!(f, "[{shape}]")?;
            }
        }
        Ok(())
    }
}
