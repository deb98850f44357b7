//! Trace recorder configuration.

use serde::{Deserialize, Serialize};

/// Bounds and switches for the trace recorder. The defaults are the
/// engine's shipping values; embedders deserialize overrides from their
/// configuration layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecorderConfig {
    /// Hard cap on trace instructions; exceeding aborts `TraceTooLong`.
    pub max_trace_length: usize,
    /// Cap on guards plus side exits; exceeding aborts `TraceTooComplex`.
    pub max_trace_complexity: usize,
    /// Nested `start_recording` depth; exceeding aborts `Nested`.
    pub max_nested_trace_depth: u32,
    /// Guard failures tolerated before `TooManyGuardFailures`.
    pub max_guard_failures: u32,
    /// Side exits tolerated before `TooManySideExits`.
    pub max_side_exits: usize,
    /// Backward jumps tolerated before a `LoopIterationLimit` side exit.
    pub max_loop_iterations: u32,
    /// Call depth beyond which a `CallStackLimitReached` side exit fires.
    pub max_inline_call_depth: usize,
    /// Wall-clock ceiling for one recording, in milliseconds.
    pub max_recording_time_ms: u64,
    /// A stack snapshot is attached every Nth bytecode record.
    pub stack_snapshot_interval: usize,
    /// Backward-jump count that marks a loop hot.
    pub hot_loop_threshold: u32,
    /// Side-exit execution count after which a side trace is warranted.
    pub side_exit_hot_threshold: u32,

    pub record_loops: bool,
    pub record_method_calls: bool,
    pub record_recursion: bool,
    pub record_side_exits: bool,

    /// Function names excluded from tracing.
    pub blacklisted_functions: Vec<String>,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        RecorderConfig {
            max_trace_length: 10_000,
            max_trace_complexity: 200,
            max_nested_trace_depth: 5,
            max_guard_failures: 10,
            max_side_exits: 20,
            max_loop_iterations: 100,
            max_inline_call_depth: 3,
            max_recording_time_ms: 1_000,
            stack_snapshot_interval: 10,
            hot_loop_threshold: 10,
            side_exit_hot_threshold: 10,
            record_loops: true,
            record_method_calls: true,
            record_recursion: true,
            record_side_exits: true,
            blacklisted_functions: Vec::new(),
        }
    }
}

impl RecorderConfig {
    pub fn is_blacklisted(&self, function_name: &str) -> bool {
        self.blacklisted_functions
            .iter()
            .any(|name| name == function_name)
    }
}
