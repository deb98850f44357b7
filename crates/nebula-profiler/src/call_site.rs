//! Call-site type signatures.
//!
//! A [`CallSiteTypeInfo`] bundles one [`TypeInfo`] per argument position,
//! one for the return value, and the call/success/exception counters. The
//! orchestrator reads these to decide whether a call target is a safe
//! inlining or specialization candidate.

use serde::{Deserialize, Serialize};

use nebula_value::{FunctionId, Value};

use crate::type_info::TypeInfo;

/// Default call count at which a call site counts as hot.
pub const DEFAULT_HOT_CALL_THRESHOLD: u32 = 10;

/// How a recorded call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallOutcome {
    /// The call returned normally.
    Success,
    /// The call unwound with an exception.
    Exception,
}

/// Aggregated type profile of one call site.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallSiteTypeInfo {
    /// The called function, when the site has a stable direct target.
    target: Option<FunctionId>,
    /// Per-argument-position observations. Grows to the widest arity seen.
    arg_type_infos: Vec<TypeInfo>,
    /// Return value observations.
    return_type_info: TypeInfo,
    call_count: u32,
    success_count: u32,
    exception_count: u32,
}

impl CallSiteTypeInfo {
    pub fn new() -> Self {
        CallSiteTypeInfo::default()
    }

    /// Records one call: target, argument values, optional return value,
    /// and outcome.
    pub fn record_call(
        &mut self,
        target: FunctionId,
        args: &[Value],
        return_value: Option<&Value>,
        outcome: CallOutcome,
    ) {
        self.call_count += 1;
        match outcome {
            CallOutcome::Success => self.success_count += 1,
            CallOutcome::Exception => self.exception_count += 1,
        }

        // A site that dispatches to several targets loses its direct target.
        match self.target {
            None if self.call_count == 1 => self.target = Some(target),
            Some(existing) if existing != target => self.target = None,
            _ => {}
        }

        if self.arg_type_infos.len() < args.len() {
            self.arg_type_infos.resize_with(args.len(), TypeInfo::new);
        }
        for (info, value) in self.arg_type_infos.iter_mut().zip(args) {
            info.record_value(value);
        }
        if let Some(value) = return_value {
            self.return_type_info.record_value(value);
        }
    }

    /// The stable direct target, if the site has only ever called one
    /// function.
    pub fn target(&self) -> Option<FunctionId> {
        self.target
    }

    pub fn arg_type_infos(&self) -> &[TypeInfo] {
        &self.arg_type_infos
    }

    pub fn return_type_info(&self) -> &TypeInfo {
        &self.return_type_info
    }

    pub fn call_count(&self) -> u32 {
        self.call_count
    }

    pub fn success_count(&self) -> u32 {
        self.success_count
    }

    pub fn exception_count(&self) -> u32 {
        self.exception_count
    }

    /// Hot at `threshold` calls or more.
    pub fn is_hot(&self, threshold: u32) -> bool {
        self.call_count >= threshold
    }

    /// Fraction of calls that returned normally.
    pub fn success_ratio(&self) -> f32 {
        if self.call_count == 0 {
            return 0.0;
        }
        self.success_count as f32 / self.call_count as f32
    }

    /// Fraction of calls that unwound with an exception.
    pub fn exception_ratio(&self) -> f32 {
        if self.call_count == 0 {
            return 0.0;
        }
        self.exception_count as f32 / self.call_count as f32
    }

    /// A site is monomorphic when it has a stable target and every argument
    /// and the return value are each monomorphic or unobserved.
    pub fn is_monomorphic(&self) -> bool {
        self.target.is_some()
            && self
                .arg_type_infos
                .iter()
                .all(|info| info.total_observations() == 0 || info.is_monomorphic())
            && (self.return_type_info.total_observations() == 0
                || self.return_type_info.is_monomorphic())
    }

    /// Discards all observations.
    pub fn reset(&mut self) {
        *self = CallSiteTypeInfo::default();
    }
}
