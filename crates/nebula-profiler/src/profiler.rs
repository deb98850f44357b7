//! The online type profiler.
//!
//! [`TypeProfiler`] owns every observation site the interpreter reports
//! into: variable slots, parameters, properties keyed by shape, array
//! element slots, and call sites. It is touched only by the interpreter
//! thread; compile jobs snapshot what they need at job creation.
//!
//! Failure semantics: recording and querying never fail. While disabled,
//! record hooks are no-ops and queries yield neutral answers
//! (`None` / `Uninitialized` / the default size prediction). The only
//! fallible operation is [`import_type_profile`](TypeProfiler::import_type_profile),
//! which validates an externally supplied string and reports success as a
//! `bool` rather than an error crossing the boundary.

use std::collections::VecDeque;
use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use nebula_value::{BytecodeAddress, FunctionId, ObjectShape, ShapeId, ShapeRegistry, Value};

use crate::call_site::{CallOutcome, CallSiteTypeInfo, DEFAULT_HOT_CALL_THRESHOLD};
use crate::error::ProfileError;
use crate::type_info::TypeInfo;

/// Snapshot format version for export/import.
const SNAPSHOT_VERSION: u32 = 1;

/// How many recent collection sizes are kept per site.
const SIZE_HISTORY_LIMIT: usize = 16;

/// Size prediction when a site has no history: optimistic but not wildly so.
const DEFAULT_SIZE_PREDICTION: u32 = 8;

/// Aggregate type verdict for a whole function, derived from its parameter
/// sites. The orchestrator's tiering decision reads this.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FunctionTypeSummary {
    /// Minimum confidence across observed parameter sites (0 when none).
    pub confidence: f32,
    /// Every observed parameter site is monomorphic.
    pub monomorphic: bool,
    /// Every observed parameter site is mostly Int32.
    pub mostly_int32: bool,
    /// Every observed parameter site is mostly numeric.
    pub mostly_number: bool,
}

impl FunctionTypeSummary {
    fn neutral() -> Self {
        FunctionTypeSummary {
            confidence: 0.0,
            monomorphic: false,
            mostly_int32: false,
            mostly_number: false,
        }
    }
}

/// The engine-wide type profile store.
#[derive(Debug, Default)]
pub struct TypeProfiler {
    enabled: bool,
    total_observations: u64,
    shapes: ShapeRegistry,
    var_types: IndexMap<(FunctionId, u32), TypeInfo>,
    param_types: IndexMap<(FunctionId, u32), TypeInfo>,
    property_types: IndexMap<(ShapeId, String), TypeInfo>,
    element_types: IndexMap<ShapeId, TypeInfo>,
    call_sites: IndexMap<(FunctionId, u32), CallSiteTypeInfo>,
    size_history: IndexMap<(FunctionId, u32), VecDeque<u32>>,
    execution_counts: IndexMap<FunctionId, u64>,
    hot_call_threshold: u32,
}

impl TypeProfiler {
    /// Creates an enabled profiler with default thresholds.
    pub fn new() -> Self {
        TypeProfiler {
            enabled: true,
            hot_call_threshold: DEFAULT_HOT_CALL_THRESHOLD,
            ..TypeProfiler::default()
        }
    }

    // -----------------------------------------------------------------------
    // Enable / disable
    // -----------------------------------------------------------------------

    pub fn enable(&mut self) {
        self.enabled = true;
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Overrides the call-count threshold for hot call sites.
    pub fn set_hot_call_threshold(&mut self, threshold: u32) {
        self.hot_call_threshold = threshold;
    }

    // -----------------------------------------------------------------------
    // Shapes
    // -----------------------------------------------------------------------

    /// The canonicalizing shape registry (sole minter of shape ids).
    pub fn shapes(&self) -> &ShapeRegistry {
        &self.shapes
    }

    pub fn shapes_mut(&mut self) -> &mut ShapeRegistry {
        &mut self.shapes
    }

    pub fn object_shape(&self, id: ShapeId) -> Option<&ObjectShape> {
        self.shapes.get(id)
    }

    pub fn shape_count(&self) -> usize {
        self.shapes.len()
    }

    // -----------------------------------------------------------------------
    // Record hooks (interpreter thread only)
    // -----------------------------------------------------------------------

    /// Per-bytecode execution hook: counts executed instructions per
    /// function. The opcode and operands stay opaque at this boundary;
    /// only the volume feeds hotness accounting.
    pub fn record_execution(&mut self, site: BytecodeAddress, _opcode: u16, _operands: &[Value]) {
        if !self.enabled {
            return;
        }
        *self.execution_counts.entry(site.function).or_default() += 1;
    }

    /// Executed-bytecode count recorded for a function.
    pub fn execution_count(&self, function: FunctionId) -> u64 {
        self.execution_counts
            .get(&function)
            .copied()
            .unwrap_or_default()
    }

    /// Records the type of a variable slot.
    pub fn record_var_type(&mut self, function: FunctionId, var_index: u32, value: &Value) {
        if !self.enabled {
            return;
        }
        self.total_observations += 1;
        self.var_types
            .entry((function, var_index))
            .or_default()
            .record_value(value);
    }

    /// Records the type of a parameter.
    pub fn record_param_type(&mut self, function: FunctionId, param_index: u32, value: &Value) {
        if !self.enabled {
            return;
        }
        self.total_observations += 1;
        self.param_types
            .entry((function, param_index))
            .or_default()
            .record_value(value);
    }

    /// Records the type of a property read or written on a shape.
    pub fn record_property_type(&mut self, shape: ShapeId, name: &str, value: &Value) {
        if !self.enabled {
            return;
        }
        self.total_observations += 1;
        match self.property_types.get_mut(&(shape, name.to_string())) {
            Some(info) => info.record_value(value),
            None => {
                let mut info = TypeInfo::new();
                info.record_value(value);
                self.property_types.insert((shape, name.to_string()), info);
            }
        }
    }

    /// Records the type of an element loaded from or stored to an array
    /// with the given shape.
    pub fn record_element_type(&mut self, array_shape: ShapeId, value: &Value) {
        if !self.enabled {
            return;
        }
        self.total_observations += 1;
        self.element_types
            .entry(array_shape)
            .or_default()
            .record_value(value);
    }

    /// Records one call at a call site (keyed by calling function and
    /// bytecode offset of the site).
    pub fn record_call(
        &mut self,
        caller: FunctionId,
        site_offset: u32,
        target: FunctionId,
        args: &[Value],
        return_value: Option<&Value>,
        outcome: CallOutcome,
    ) {
        if !self.enabled {
            return;
        }
        self.total_observations += 1;
        self.call_sites
            .entry((caller, site_offset))
            .or_default()
            .record_call(target, args, return_value, outcome);
    }

    /// Records the final size of a collection allocated at a site.
    pub fn record_collection_size(&mut self, function: FunctionId, site_offset: u32, size: u32) {
        if !self.enabled {
            return;
        }
        let history = self.size_history.entry((function, site_offset)).or_default();
        if history.len() == SIZE_HISTORY_LIMIT {
            history.pop_front();
        }
        history.push_back(size);
    }

    // -----------------------------------------------------------------------
    // Mutable site access (creating on first touch)
    // -----------------------------------------------------------------------

    /// Returns the variable site's record, creating it on first touch.
    pub fn get_or_create_var_type_info(
        &mut self,
        function: FunctionId,
        var_index: u32,
    ) -> &mut TypeInfo {
        self.var_types.entry((function, var_index)).or_default()
    }

    /// Returns the parameter site's record, creating it on first touch.
    pub fn get_or_create_param_type_info(
        &mut self,
        function: FunctionId,
        param_index: u32,
    ) -> &mut TypeInfo {
        self.param_types.entry((function, param_index)).or_default()
    }

    /// Returns the property site's record, creating it on first touch.
    pub fn get_or_create_property_type_info(
        &mut self,
        shape: ShapeId,
        name: &str,
    ) -> &mut TypeInfo {
        self.property_types
            .entry((shape, name.to_string()))
            .or_default()
    }

    /// Returns the array-element site's record, creating it on first touch.
    pub fn get_or_create_element_type_info(&mut self, array_shape: ShapeId) -> &mut TypeInfo {
        self.element_types.entry(array_shape).or_default()
    }

    /// Returns the call site's record, creating it on first touch.
    pub fn get_or_create_call_site_info(
        &mut self,
        caller: FunctionId,
        site_offset: u32,
    ) -> &mut CallSiteTypeInfo {
        self.call_sites.entry((caller, site_offset)).or_default()
    }

    // -----------------------------------------------------------------------
    // Queries (neutral answers while disabled)
    // -----------------------------------------------------------------------

    pub fn var_type_info(&self, function: FunctionId, var_index: u32) -> Option<&TypeInfo> {
        if !self.enabled {
            return None;
        }
        self.var_types.get(&(function, var_index))
    }

    pub fn param_type_info(&self, function: FunctionId, param_index: u32) -> Option<&TypeInfo> {
        if !self.enabled {
            return None;
        }
        self.param_types.get(&(function, param_index))
    }

    pub fn property_type_info(&self, shape: ShapeId, name: &str) -> Option<&TypeInfo> {
        if !self.enabled {
            return None;
        }
        self.property_types.get(&(shape, name.to_string()))
    }

    pub fn element_type_info(&self, array_shape: ShapeId) -> Option<&TypeInfo> {
        if !self.enabled {
            return None;
        }
        self.element_types.get(&array_shape)
    }

    pub fn call_site_info(&self, caller: FunctionId, site_offset: u32) -> Option<&CallSiteTypeInfo> {
        if !self.enabled {
            return None;
        }
        self.call_sites.get(&(caller, site_offset))
    }

    /// Predicts the size a collection allocated at this site will reach:
    /// the trimmed mean (min and max dropped once four samples exist) of
    /// the recent history, or the optimistic default with no data.
    pub fn predict_collection_size(&self, function: FunctionId, site_offset: u32) -> u32 {
        if !self.enabled {
            return DEFAULT_SIZE_PREDICTION;
        }
        let Some(history) = self.size_history.get(&(function, site_offset)) else {
            return DEFAULT_SIZE_PREDICTION;
        };
        if history.is_empty() {
            return DEFAULT_SIZE_PREDICTION;
        }

        let mut sizes: Vec<u64> = history.iter().map(|&s| u64::from(s)).collect();
        if sizes.len() >= 4 {
            sizes.sort_unstable();
            sizes.pop();
            sizes.remove(0);
        }
        let sum: u64 = sizes.iter().sum();
        (sum / sizes.len() as u64) as u32
    }

    /// Total observations recorded across all sites.
    pub fn total_observations(&self) -> u64 {
        self.total_observations
    }

    // -----------------------------------------------------------------------
    // Function-level queries
    // -----------------------------------------------------------------------

    /// Total recorded calls into `function` across all call sites with that
    /// stable target.
    pub fn calls_into(&self, function: FunctionId) -> u32 {
        self.call_sites
            .values()
            .filter(|site| site.target() == Some(function))
            .map(|site| site.call_count())
            .sum()
    }

    /// A function is hot once enough calls into it were observed.
    pub fn is_hot_function(&self, function: FunctionId) -> bool {
        self.enabled && self.calls_into(function) >= self.hot_call_threshold
    }

    /// Number of functions currently considered hot.
    pub fn hot_function_count(&self) -> usize {
        if !self.enabled {
            return 0;
        }
        let mut targets: Vec<FunctionId> = self
            .call_sites
            .values()
            .filter_map(|site| site.target())
            .collect();
        targets.sort_unstable_by_key(|f| f.0);
        targets.dedup();
        targets
            .into_iter()
            .filter(|&f| self.is_hot_function(f))
            .count()
    }

    /// A function is monomorphic when at least one call site targets it and
    /// every such site has a monomorphic signature.
    pub fn is_monomorphic_function(&self, function: FunctionId) -> bool {
        if !self.enabled {
            return false;
        }
        let mut any = false;
        for site in self.call_sites.values() {
            if site.target() == Some(function) {
                if !site.is_monomorphic() {
                    return false;
                }
                any = true;
            }
        }
        any
    }

    /// Aggregates the function's parameter sites into one tiering verdict.
    /// Neutral (confidence 0) while disabled or with no observed parameters.
    pub fn function_type_summary(&self, function: FunctionId) -> FunctionTypeSummary {
        if !self.enabled {
            return FunctionTypeSummary::neutral();
        }
        let params: Vec<&TypeInfo> = self
            .param_types
            .iter()
            .filter(|((f, _), info)| *f == function && info.total_observations() > 0)
            .map(|(_, info)| info)
            .collect();
        if params.is_empty() {
            return FunctionTypeSummary::neutral();
        }

        FunctionTypeSummary {
            confidence: params
                .iter()
                .map(|info| info.confidence())
                .fold(1.0_f32, f32::min),
            monomorphic: params.iter().all(|info| info.is_monomorphic()),
            mostly_int32: params.iter().all(|info| info.is_mostly_int32()),
            mostly_number: params.iter().all(|info| info.is_mostly_number()),
        }
    }

    // -----------------------------------------------------------------------
    // Clearing
    // -----------------------------------------------------------------------

    /// Drops every recorded observation and all shapes.
    pub fn clear_all(&mut self) {
        debug!("clearing all type profile data");
        let enabled = self.enabled;
        let threshold = self.hot_call_threshold;
        *self = TypeProfiler {
            enabled,
            hot_call_threshold: threshold,
            ..TypeProfiler::default()
        };
    }

    /// Drops the observations keyed under one function (its variables,
    /// parameters, call sites, and collection-size history).
    pub fn clear_function(&mut self, function: FunctionId) {
        debug!(function = function.0, "clearing function profile data");
        self.var_types.retain(|(f, _), _| *f != function);
        self.param_types.retain(|(f, _), _| *f != function);
        self.call_sites.retain(|(f, _), _| *f != function);
        self.size_history.retain(|(f, _), _| *f != function);
        self.execution_counts.shift_remove(&function);
    }

    // -----------------------------------------------------------------------
    // Export / import
    // -----------------------------------------------------------------------

    /// Serializes the profile to an opaque string. The only contract is
    /// that a fresh profiler importing it answers queries identically.
    pub fn export_type_profile(&self) -> String {
        let snapshot = ProfileSnapshot {
            version: SNAPSHOT_VERSION,
            total_observations: self.total_observations,
            shapes: self.shapes.clone(),
            vars: to_entries(&self.var_types),
            params: to_entries(&self.param_types),
            properties: self
                .property_types
                .iter()
                .map(|((shape, name), info)| (*shape, name.clone(), info.clone()))
                .collect(),
            elements: self
                .element_types
                .iter()
                .map(|(shape, info)| (*shape, info.clone()))
                .collect(),
            call_sites: self
                .call_sites
                .iter()
                .map(|((f, off), site)| (*f, *off, site.clone()))
                .collect(),
            size_history: self
                .size_history
                .iter()
                .map(|((f, off), sizes)| (*f, *off, sizes.iter().copied().collect()))
                .collect(),
            executions: self
                .execution_counts
                .iter()
                .map(|(f, count)| (*f, *count))
                .collect(),
        };
        // Serialization of an in-memory snapshot cannot fail.
        serde_json::to_string(&snapshot).unwrap_or_default()
    }

    /// Replaces this profiler's data with an exported profile. Returns
    /// `false` (leaving the current data untouched) when the string is not
    /// a valid profile.
    pub fn import_type_profile(&mut self, data: &str) -> bool {
        match Self::parse_snapshot(data) {
            Ok(snapshot) => {
                self.apply_snapshot(snapshot);
                true
            }
            Err(error) => {
                warn!(%error, "rejecting type profile import");
                false
            }
        }
    }

    fn parse_snapshot(data: &str) -> Result<ProfileSnapshot, ProfileError> {
        let snapshot: ProfileSnapshot = serde_json::from_str(data)?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(ProfileError::UnsupportedVersion {
                found: snapshot.version,
                expected: SNAPSHOT_VERSION,
            });
        }
        Ok(snapshot)
    }

    fn apply_snapshot(&mut self, snapshot: ProfileSnapshot) {
        self.total_observations = snapshot.total_observations;
        self.shapes = snapshot.shapes;
        self.var_types = from_entries(snapshot.vars);
        self.param_types = from_entries(snapshot.params);
        self.property_types = snapshot
            .properties
            .into_iter()
            .map(|(shape, name, info)| ((shape, name), info))
            .collect();
        self.element_types = snapshot.elements.into_iter().collect();
        self.call_sites = snapshot
            .call_sites
            .into_iter()
            .map(|(f, off, site)| ((f, off), site))
            .collect();
        self.size_history = snapshot
            .size_history
            .into_iter()
            .map(|(f, off, sizes)| ((f, off), sizes.into_iter().collect()))
            .collect();
        self.execution_counts = snapshot.executions.into_iter().collect();
    }
}

impl fmt::Display for TypeProfiler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "type profile: {} observations, {} shapes, {} hot functions",
            self.total_observations,
            self.shapes.len(),
            self.hot_function_count()
        )?;
        for ((function, index), info) in &self.param_types {
            writeln!(f, "  param {function}[{index}]: {info}")?;
        }
        for ((function, index), info) in &self.var_types {
            writeln!(f, "  var {function}[{index}]: {info}")?;
        }
        for ((function, offset), site) in &self.call_sites {
            writeln!(
                f,
                "  call {function}+{offset}: {} calls, {:.2} success",
                site.call_count(),
                site.success_ratio()
            )?;
        }
        Ok(())
    }
}

/// The serialized profile. Maps become entry lists so the format stays
/// JSON-representable; the string stays opaque to callers.
#[derive(Debug, Serialize, Deserialize)]
pub struct ProfileSnapshot {
    version: u32,
    total_observations: u64,
    shapes: ShapeRegistry,
    vars: Vec<(FunctionId, u32, TypeInfo)>,
    params: Vec<(FunctionId, u32, TypeInfo)>,
    properties: Vec<(ShapeId, String, TypeInfo)>,
    elements: Vec<(ShapeId, TypeInfo)>,
    call_sites: Vec<(FunctionId, u32, CallSiteTypeInfo)>,
    size_history: Vec<(FunctionId, u32, Vec<u32>)>,
    executions: Vec<(FunctionId, u64)>,
}

fn to_entries(map: &IndexMap<(FunctionId, u32), TypeInfo>) -> Vec<(FunctionId, u32, TypeInfo)> {
    map.iter()
        .map(|((f, idx), info)| (*f, *idx, info.clone()))
        .collect()
}

fn from_entries(entries: Vec<(FunctionId, u32, TypeInfo)>) -> IndexMap<(FunctionId, u32), TypeInfo> {
    entries
        .into_iter()
        .map(|(f, idx, info)| ((f, idx), info))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::type_info::TypeCategory;
    use nebula_value::ValueTag;

    #[test]
    fn disabled_profiler_is_inert() {
        let mut profiler = TypeProfiler::new();
        profiler.disable();

        profiler.record_var_type(FunctionId(0), 0, &Value::Int32(1));
        profiler.record_param_type(FunctionId(0), 0, &Value::Int32(1));
        assert_eq!(profiler.total_observations(), 0);
        assert!(profiler.var_type_info(FunctionId(0), 0).is_none());
        assert_eq!(
            profiler.predict_collection_size(FunctionId(0), 0),
            DEFAULT_SIZE_PREDICTION
        );
        assert!(!profiler.is_hot_function(FunctionId(0)));
        assert_eq!(
            profiler.function_type_summary(FunctionId(0)).confidence,
            0.0
        );

        // Re-enabling resumes recording.
        profiler.enable();
        profiler.record_var_type(FunctionId(0), 0, &Value::Int32(1));
        assert_eq!(profiler.total_observations(), 1);
    }

    #[test]
    fn var_and_param_sites_are_distinct() {
        let mut profiler = TypeProfiler::new();
        profiler.record_var_type(FunctionId(1), 0, &Value::Int32(1));
        profiler.record_param_type(FunctionId(1), 0, &Value::string("s"));

        assert_eq!(
            profiler
                .var_type_info(FunctionId(1), 0)
                .unwrap()
                .most_common_tag(),
            Some(ValueTag::Int32)
        );
        assert_eq!(
            profiler
                .param_type_info(FunctionId(1), 0)
                .unwrap()
                .most_common_tag(),
            Some(ValueTag::String)
        );
    }

    #[test]
    fn collection_size_prediction_uses_trimmed_mean() {
        let mut profiler = TypeProfiler::new();
        let f = FunctionId(2);

        // No data: optimistic default.
        assert_eq!(profiler.predict_collection_size(f, 0), 8);

        // Outliers at both ends are trimmed.
        for size in [10, 12, 11, 1000, 0, 11] {
            profiler.record_collection_size(f, 0, size);
        }
        // Remaining after dropping 0 and 1000: 10, 11, 11, 12 -> 11.
        assert_eq!(profiler.predict_collection_size(f, 0), 11);
    }

    #[test]
    fn collection_size_history_is_bounded() {
        let mut profiler = TypeProfiler::new();
        let f = FunctionId(3);
        for _ in 0..100 {
            profiler.record_collection_size(f, 4, 1_000);
        }
        for _ in 0..SIZE_HISTORY_LIMIT {
            profiler.record_collection_size(f, 4, 4);
        }
        // Old sizes have been pushed out entirely.
        assert_eq!(profiler.predict_collection_size(f, 4), 4);
    }

    #[test]
    fn hot_and_monomorphic_function_detection() {
        let mut profiler = TypeProfiler::new();
        let callee = FunctionId(7);

        for i in 0..10 {
            profiler.record_call(
                FunctionId(0),
                16,
                callee,
                &[Value::Int32(i)],
                Some(&Value::Int32(i)),
                CallOutcome::Success,
            );
        }
        assert!(profiler.is_hot_function(callee));
        assert!(profiler.is_monomorphic_function(callee));
        assert_eq!(profiler.hot_function_count(), 1);

        // A second site with mixed argument types breaks monomorphism.
        profiler.record_call(
            FunctionId(1),
            4,
            callee,
            &[Value::string("x")],
            None,
            CallOutcome::Success,
        );
        profiler.record_call(
            FunctionId(1),
            4,
            callee,
            &[Value::Int32(0)],
            None,
            CallOutcome::Success,
        );
        assert!(!profiler.is_monomorphic_function(callee));
    }

    #[test]
    fn function_type_summary_aggregates_params() {
        let mut profiler = TypeProfiler::new();
        let f = FunctionId(5);
        for i in 0..100 {
            profiler.record_param_type(f, 0, &Value::Int32(i));
            profiler.record_param_type(f, 1, &Value::Int32(i * 2));
        }

        let summary = profiler.function_type_summary(f);
        assert!(summary.confidence >= 0.9);
        assert!(summary.monomorphic);
        assert!(summary.mostly_int32);
        assert!(summary.mostly_number);

        // Pollute one parameter: the aggregate verdict degrades.
        for _ in 0..30 {
            profiler.record_param_type(f, 1, &Value::string("s"));
        }
        let summary = profiler.function_type_summary(f);
        assert!(!summary.monomorphic);
        assert!(!summary.mostly_int32);
    }

    #[test]
    fn clear_function_is_scoped() {
        let mut profiler = TypeProfiler::new();
        profiler.record_var_type(FunctionId(1), 0, &Value::Int32(1));
        profiler.record_var_type(FunctionId(2), 0, &Value::Int32(1));
        profiler.record_collection_size(FunctionId(1), 0, 5);

        profiler.clear_function(FunctionId(1));
        assert!(profiler.var_type_info(FunctionId(1), 0).is_none());
        assert!(profiler.var_type_info(FunctionId(2), 0).is_some());
    }

    #[test]
    fn clear_all_preserves_enabled_state() {
        let mut profiler = TypeProfiler::new();
        profiler.record_var_type(FunctionId(1), 0, &Value::Int32(1));
        profiler.clear_all();
        assert!(profiler.is_enabled());
        assert_eq!(profiler.total_observations(), 0);
        assert!(profiler.var_type_info(FunctionId(1), 0).is_none());
    }

    #[test]
    fn export_import_round_trip() {
        let mut profiler = TypeProfiler::new();
        let f = FunctionId(9);
        for i in 0..25 {
            profiler.record_param_type(f, 0, &Value::Int32(i));
        }
        profiler.record_param_type(f, 0, &Value::Float64(0.5));
        profiler.record_property_type(ShapeId(0), "x", &Value::Int32(3));
        profiler.record_collection_size(f, 8, 32);
        for i in 0..12 {
            profiler.record_call(
                f,
                20,
                FunctionId(10),
                &[Value::Int32(i)],
                Some(&Value::Boolean(true)),
                CallOutcome::Success,
            );
        }

        let exported = profiler.export_type_profile();
        let mut fresh = TypeProfiler::new();
        assert!(fresh.import_type_profile(&exported));

        // Predictions match the original profiler's.
        let original = profiler.param_type_info(f, 0).unwrap();
        let imported = fresh.param_type_info(f, 0).unwrap();
        assert_eq!(original.category(), imported.category());
        assert_eq!(original.most_common_tag(), imported.most_common_tag());
        assert_eq!(original.total_observations(), imported.total_observations());
        assert_eq!(original.stability(), imported.stability());

        assert_eq!(
            fresh.predict_collection_size(f, 8),
            profiler.predict_collection_size(f, 8)
        );
        assert_eq!(fresh.is_hot_function(FunctionId(10)), true);
        assert_eq!(fresh.total_observations(), profiler.total_observations());
    }

    #[test]
    fn import_rejects_garbage_and_keeps_data() {
        let mut profiler = TypeProfiler::new();
        profiler.record_var_type(FunctionId(1), 0, &Value::Int32(1));

        assert!(!profiler.import_type_profile("not json at all"));
        assert!(!profiler.import_type_profile("{\"version\": 99}"));
        // Existing data survived the failed imports.
        assert!(profiler.var_type_info(FunctionId(1), 0).is_some());
    }

    #[test]
    fn execution_counts_accumulate_per_function() {
        let mut profiler = TypeProfiler::new();
        let f = FunctionId(6);
        for offset in 0..40 {
            profiler.record_execution(
                BytecodeAddress::new(f, offset),
                0,
                &[Value::Int32(1)],
            );
        }
        profiler.record_execution(BytecodeAddress::new(FunctionId(7), 0), 0, &[]);

        assert_eq!(profiler.execution_count(f), 40);
        assert_eq!(profiler.execution_count(FunctionId(7)), 1);
        assert_eq!(profiler.execution_count(FunctionId(8)), 0);

        profiler.clear_function(f);
        assert_eq!(profiler.execution_count(f), 0);
    }

    #[test]
    fn property_sites_keyed_by_shape_and_name() {
        let mut profiler = TypeProfiler::new();
        profiler.record_property_type(ShapeId(1), "x", &Value::Int32(1));
        profiler.record_property_type(ShapeId(1), "y", &Value::Float64(1.0));
        profiler.record_property_type(ShapeId(2), "x", &Value::string("s"));

        assert_eq!(
            profiler
                .property_type_info(ShapeId(1), "x")
                .unwrap()
                .most_common_tag(),
            Some(ValueTag::Int32)
        );
        assert_eq!(
            profiler
                .property_type_info(ShapeId(2), "x")
                .unwrap()
                .most_common_tag(),
            Some(ValueTag::String)
        );
        assert!(profiler.property_type_info(ShapeId(3), "x").is_none());
    }

    #[test]
    fn element_sites_keyed_by_array_shape() {
        let mut profiler = TypeProfiler::new();
        for i in 0..5 {
            profiler.record_element_type(ShapeId(4), &Value::Int32(i));
        }
        let info = profiler.element_type_info(ShapeId(4)).unwrap();
        assert_eq!(info.category(), TypeCategory::Monomorphic);
        assert!(info.is_always_int32());
    }
}
