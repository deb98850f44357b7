//! JIT configuration: tiering, speculation, and worker settings.

use serde::{Deserialize, Serialize};

/// Switches and thresholds for the compile orchestrator and the
/// speculation-driven passes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JitConfig {
    /// Master switch; when off, compile requests are ignored.
    pub enable_jit: bool,
    /// Serve compile jobs on a background worker instead of inline.
    pub enable_background_compilation: bool,
    /// Calls into a function before it is considered hot.
    pub hot_function_threshold: u32,

    pub use_type_speculation: bool,
    pub use_shape_speculation: bool,
    pub use_constant_speculation: bool,
    pub use_inlining: bool,

    /// Callee node-count ceiling for inlining.
    pub max_inline_size: usize,
    /// Transitive inlining rounds per compilation.
    pub max_inline_depth: u32,

    /// Profiler confidence required to tier straight to `O2`.
    pub tier_up_confidence: f32,
    /// Deoptimization events inside the sliding window that trigger
    /// invalidation.
    pub deopt_storm_threshold: usize,
    /// Width of the deoptimization sliding window, in milliseconds.
    pub deopt_window_ms: u64,
    /// Bound on queued background compile jobs.
    pub job_queue_capacity: usize,
}

impl Default for JitConfig {
    fn default() -> Self {
        JitConfig {
            enable_jit: true,
            enable_background_compilation: false,
            hot_function_threshold: 20,
            use_type_speculation: true,
            use_shape_speculation: true,
            use_constant_speculation: true,
            use_inlining: true,
            max_inline_size: 50,
            max_inline_depth: 3,
            tier_up_confidence: 0.9,
            deopt_storm_threshold: 50,
            deopt_window_ms: 10_000,
            job_queue_capacity: 64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shipping_defaults() {
        let config = JitConfig::default();
        assert!(config.enable_jit);
        assert!(!config.enable_background_compilation);
        assert_eq!(config.hot_function_threshold, 20);
        assert_eq!(config.max_inline_depth, 3);
        assert!((config.tier_up_confidence - 0.9).abs() < f32::EPSILON);
        assert_eq!(config.deopt_storm_threshold, 50);
    }

    #[test]
    fn serde_roundtrip() {
        let config = JitConfig {
            enable_background_compilation: true,
            ..JitConfig::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: JitConfig = serde_json::from_str(&json).unwrap();
        assert!(back.enable_background_compilation);
        assert_eq!(back.job_queue_capacity, config.job_queue_capacity);
    }
}
