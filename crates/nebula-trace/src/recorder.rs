//! The meta-tracing recorder.
//!
//! A state machine (`Idle -> Recording -> Completed | Aborted`) that
//! linearizes one execution path into a guarded trace. Nested recording
//! starts bump a depth counter instead of opening a second trace; every
//! configured bound maps to a distinct abort reason. The recorder is
//! driven synchronously by the interpreter thread and holds no reference
//! to interpreter state between calls.

use std::time::Instant;

use tracing::{debug, trace as trace_event};

use nebula_value::{BytecodeAddress, Value};

use crate::config::RecorderConfig;
use crate::guard::{evaluate_guard, ExitReason, GuardCondition, OptimizationHint, SideExitKind};
use crate::snapshot::{ContextSnapshot, ExecutionContext, StackSnapshot};
use crate::trace::{SideExitRecord, Trace, TraceInstruction, TraceOpcode};

/// Recorder lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingState {
    Idle,
    Recording,
    Completed,
    Aborted,
}

/// Records bytecode execution into linear traces.
#[derive(Debug)]
pub struct TraceRecorder {
    config: RecorderConfig,
    state: RecordingState,
    current: Option<Trace>,
    /// Reason of the most recent abort (`None` otherwise).
    exit_reason: ExitReason,
    guard_failures: u32,
    loop_iterations: u32,
    /// Nested `start_recording` depth; 1 while a root recording runs.
    depth: u32,
    /// Guards plus side exits recorded so far (complexity measure).
    complexity: usize,
    last_location: Option<BytecodeAddress>,
    last_entry_point: Option<BytecodeAddress>,
    last_call_depth: usize,
    /// Wall-clock origin for all timestamps.
    epoch: Instant,
    recording_started_ns: u64,
}

impl TraceRecorder {
    pub fn new(config: RecorderConfig) -> Self {
        TraceRecorder {
            config,
            state: RecordingState::Idle,
            current: None,
            exit_reason: ExitReason::None,
            guard_failures: 0,
            loop_iterations: 0,
            depth: 0,
            complexity: 0,
            last_location: None,
            last_entry_point: None,
            last_call_depth: 0,
            epoch: Instant::now(),
            recording_started_ns: 0,
        }
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: RecorderConfig) {
        self.config = config;
    }

    // -----------------------------------------------------------------------
    // State queries
    // -----------------------------------------------------------------------

    pub fn state(&self) -> RecordingState {
        self.state
    }

    pub fn is_recording(&self) -> bool {
        self.state == RecordingState::Recording
    }

    pub fn has_aborted(&self) -> bool {
        self.state == RecordingState::Aborted
    }

    pub fn has_completed(&self) -> bool {
        self.state == RecordingState::Completed
    }

    /// The most recent abort reason, `ExitReason::None` otherwise.
    pub fn exit_reason(&self) -> ExitReason {
        self.exit_reason
    }

    pub fn recording_depth(&self) -> u32 {
        self.depth
    }

    pub fn last_entry_point(&self) -> Option<BytecodeAddress> {
        self.last_entry_point
    }

    /// The trace being recorded, for inspection.
    pub fn current_trace(&self) -> Option<&Trace> {
        self.current.as_ref()
    }

    fn timestamp_ns(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Begins recording at `entry`. While already recording, bumps the
    /// nesting depth instead; past the nesting bound the recording aborts
    /// with `Nested`. Returns whether recording is active afterwards.
    pub fn start_recording(
        &mut self,
        ctx: &dyn ExecutionContext,
        entry: BytecodeAddress,
        function_name: Option<&str>,
    ) -> bool {
        if self.is_recording() {
            if self.depth >= self.config.max_nested_trace_depth {
                self.abort_recording(ExitReason::Nested);
                return false;
            }
            self.depth += 1;
            return true;
        }

        if let Some(name) = function_name {
            if self.config.is_blacklisted(name) {
                debug!(function = name, "refusing to trace blacklisted function");
                self.exit_reason = ExitReason::Blacklisted;
                return false;
            }
        }

        let now = self.timestamp_ns();
        let mut start = TraceInstruction::new(TraceOpcode::TraceStart, entry, now);
        start.stack_snapshot = Some(StackSnapshot::capture(ctx));

        self.current = Some(Trace {
            entry_point: entry,
            exit_point: None,
            start_timestamp_ns: now,
            execution_time_ns: 0,
            instructions: vec![start],
            side_exits: Vec::new(),
            initial_context: ContextSnapshot::capture(ctx, entry),
            exit_reason: ExitReason::None,
            executed_bytecodes: 0,
        });
        self.state = RecordingState::Recording;
        self.exit_reason = ExitReason::None;
        self.guard_failures = 0;
        self.loop_iterations = 0;
        self.complexity = 0;
        self.depth = 1;
        self.last_location = Some(entry);
        self.last_entry_point = Some(entry);
        self.last_call_depth = ctx.call_depth();
        self.recording_started_ns = now;
        trace_event!(entry = %entry, "trace recording started");
        true
    }

    /// Abandons the current recording. A nested recording only unwinds one
    /// level; the root recording is discarded with `reason`.
    pub fn abort_recording(&mut self, reason: ExitReason) {
        if !self.is_recording() {
            return;
        }
        if self.depth > 1 {
            self.depth -= 1;
            return;
        }
        debug!(?reason, "trace recording aborted");
        self.exit_reason = reason;
        self.state = RecordingState::Aborted;
        self.depth = 0;
        self.current = None;
    }

    /// Completes the recording and returns the owned trace. Nested
    /// recordings unwind one level and return `None`.
    pub fn finish_recording(&mut self) -> Option<Trace> {
        if !self.is_recording() {
            return None;
        }
        if self.depth > 1 {
            self.depth -= 1;
            return None;
        }

        let now = self.timestamp_ns();
        let mut trace = self.current.take()?;
        let end_location = self.last_location.unwrap_or(trace.entry_point);
        trace
            .instructions
            .push(TraceInstruction::new(TraceOpcode::TraceEnd, end_location, now));
        trace.execution_time_ns = now - trace.start_timestamp_ns;
        trace.exit_point = self.last_location;
        trace.exit_reason = ExitReason::None;

        self.state = RecordingState::Completed;
        self.depth = 0;
        debug!(
            instructions = trace.instructions.len(),
            bytecodes = trace.executed_bytecodes,
            "trace recording finished"
        );
        Some(trace)
    }

    /// Returns the recorder to `Idle`, discarding any partial state.
    pub fn reset(&mut self) {
        self.state = RecordingState::Idle;
        self.current = None;
        self.exit_reason = ExitReason::None;
        self.guard_failures = 0;
        self.loop_iterations = 0;
        self.depth = 0;
        self.complexity = 0;
        self.last_location = None;
        self.last_entry_point = None;
        self.last_call_depth = 0;
    }

    // -----------------------------------------------------------------------
    // Recording hooks
    // -----------------------------------------------------------------------

    /// Records one executed bytecode. Every Nth record carries a stack
    /// snapshot; backward jumps count loop iterations; deep calls and
    /// excessive loops register side exits.
    pub fn record_bytecode_execution(
        &mut self,
        ctx: &dyn ExecutionContext,
        location: BytecodeAddress,
        opcode: u16,
        operands: &[Value],
    ) {
        if !self.is_recording() {
            return;
        }

        let elapsed_ms = (self.timestamp_ns() - self.recording_started_ns) / 1_000_000;
        if elapsed_ms > self.config.max_recording_time_ms {
            self.abort_recording(ExitReason::Timeout);
            return;
        }
        if self
            .current
            .as_ref()
            .is_some_and(|t| t.executed_bytecodes >= self.config.max_trace_length)
        {
            self.abort_recording(ExitReason::TraceTooLong);
            return;
        }

        let mut instr = TraceInstruction::new(TraceOpcode::ExecuteBytecode, location, self.timestamp_ns());
        instr.bytecode_op = Some(opcode);
        instr.operands = operands.to_vec();

        let interval = self.config.stack_snapshot_interval.max(1);
        if let Some(trace) = self.current.as_mut() {
            trace.executed_bytecodes += 1;
            if trace.executed_bytecodes % interval == 0 {
                instr.stack_snapshot = Some(StackSnapshot::capture(ctx));
            }
            trace.instructions.push(instr);
        }

        // Backward control transfer within one function means a loop
        // iteration completed.
        if self.config.record_loops {
            if let Some(last) = self.last_location {
                if last.is_backward_jump_to(location) {
                    self.loop_iterations += 1;
                    if self.loop_iterations > self.config.max_loop_iterations {
                        self.record_side_exit(ctx, location, SideExitKind::LoopIterationLimit);
                    }
                }
            }
        }
        self.last_location = Some(location);

        // Calls that drive nesting past the inline budget leave the trace.
        let call_depth = ctx.call_depth();
        if call_depth > self.last_call_depth && call_depth > self.config.max_inline_call_depth {
            self.record_side_exit(ctx, location, SideExitKind::CallStackLimitReached);
        }
        self.last_call_depth = call_depth;
    }

    /// Records and evaluates a guard. On failure a `GuardFailure` entry and
    /// a side-exit record are appended and the failure counter advances.
    /// Returns whether the guard held (vacuously `true` when idle).
    pub fn record_guard_condition(
        &mut self,
        ctx: &dyn ExecutionContext,
        location: BytecodeAddress,
        condition: GuardCondition,
        actual: &Value,
    ) -> bool {
        if !self.is_recording() {
            return true;
        }

        let mut instr = TraceInstruction::new(TraceOpcode::Guard, location, self.timestamp_ns());
        instr.guard = Some(condition);
        instr.operands = vec![actual.clone()];
        if let Some(trace) = self.current.as_mut() {
            trace.instructions.push(instr);
        }
        self.bump_complexity();

        let held = evaluate_guard(condition, actual);
        if !held && self.is_recording() {
            self.record_guard_failure(ctx, location, condition, actual);
            self.guard_failures += 1;
            if self.guard_failures > self.config.max_guard_failures {
                self.abort_recording(ExitReason::TooManyGuardFailures);
            }
        }
        held
    }

    fn record_guard_failure(
        &mut self,
        ctx: &dyn ExecutionContext,
        location: BytecodeAddress,
        condition: GuardCondition,
        actual: &Value,
    ) {
        let mut instr = TraceInstruction::new(TraceOpcode::GuardFailure, location, self.timestamp_ns());
        instr.guard = Some(condition);
        instr.operands = vec![actual.clone()];
        instr.stack_snapshot = Some(StackSnapshot::capture(ctx));

        let context = ContextSnapshot::capture(ctx, location);
        if let Some(trace) = self.current.as_mut() {
            trace.instructions.push(instr);
            let index = trace.instructions.len() - 1;
            trace.side_exits.push(SideExitRecord {
                location,
                kind: SideExitKind::GuardFailure,
                instruction_index: index,
                context,
                failed_guard: Some(condition),
                actual_value: Some(actual.clone()),
                executions: 0,
                side_trace: None,
            });
        }
        self.bump_complexity();
    }

    /// Registers an explicit side exit with a full resume snapshot.
    pub fn record_side_exit(
        &mut self,
        ctx: &dyn ExecutionContext,
        location: BytecodeAddress,
        kind: SideExitKind,
    ) {
        if !self.is_recording() || !self.config.record_side_exits {
            return;
        }

        let mut instr = TraceInstruction::new(TraceOpcode::SideExit, location, self.timestamp_ns());
        instr.side_exit = Some(kind);
        instr.stack_snapshot = Some(StackSnapshot::capture(ctx));
        let context = ContextSnapshot::capture(ctx, location);

        let overflow = {
            let Some(trace) = self.current.as_mut() else {
                return;
            };
            trace.instructions.push(instr);
            let index = trace.instructions.len() - 1;
            trace.side_exits.push(SideExitRecord {
                location,
                kind,
                instruction_index: index,
                context,
                failed_guard: None,
                actual_value: None,
                executions: 0,
                side_trace: None,
            });
            trace.side_exits.len() > self.config.max_side_exits
        };
        self.bump_complexity();
        if overflow {
            self.abort_recording(ExitReason::TooManySideExits);
        }
    }

    /// Attaches an advisory optimization hint. Metadata only.
    pub fn record_optimization_hint(
        &mut self,
        location: BytecodeAddress,
        hint: OptimizationHint,
        data: Value,
    ) {
        if !self.is_recording() {
            return;
        }
        let mut instr =
            TraceInstruction::new(TraceOpcode::OptimizationHint, location, self.timestamp_ns());
        instr.hint = Some(hint);
        instr.operands = vec![data];
        if let Some(trace) = self.current.as_mut() {
            trace.instructions.push(instr);
        }
    }

    fn bump_complexity(&mut self) {
        self.complexity += 1;
        if self.complexity > self.config.max_trace_complexity {
            self.abort_recording(ExitReason::TraceTooComplex);
        }
    }
}
