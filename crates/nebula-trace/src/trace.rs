//! Trace data structures: instructions, side-exit records, and the trace
//! itself.

use std::fmt;

use serde::{Deserialize, Serialize};

use nebula_value::{BytecodeAddress, Value};

use crate::guard::{ExitReason, GuardCondition, OptimizationHint, SideExitKind};
use crate::snapshot::{ContextSnapshot, StackSnapshot};

/// The kind of one trace entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TraceOpcode {
    TraceStart,
    ExecuteBytecode,
    Guard,
    GuardFailure,
    SideExit,
    OptimizationHint,
    TraceEnd,
}

/// One linear entry of a recorded trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceInstruction {
    pub opcode: TraceOpcode,
    pub location: BytecodeAddress,
    /// The interpreter's bytecode opcode, opaque to this layer.
    pub bytecode_op: Option<u16>,
    /// Operand values observed at execution time.
    pub operands: Vec<Value>,
    /// Nanoseconds since the recorder started.
    pub timestamp_ns: u64,
    /// Present on `Guard` and `GuardFailure` entries.
    pub guard: Option<GuardCondition>,
    /// Present on `SideExit` entries.
    pub side_exit: Option<SideExitKind>,
    /// Present on `OptimizationHint` entries.
    pub hint: Option<OptimizationHint>,
    /// Attached at trace start, on failures/exits, and every Nth record.
    pub stack_snapshot: Option<StackSnapshot>,
}

impl TraceInstruction {
    pub(crate) fn new(
        opcode: TraceOpcode,
        location: BytecodeAddress,
        timestamp_ns: u64,
    ) -> Self {
        TraceInstruction {
            opcode,
            location,
            bytecode_op: None,
            operands: Vec::new(),
            timestamp_ns,
            guard: None,
            side_exit: None,
            hint: None,
            stack_snapshot: None,
        }
    }
}

/// The deoptimization contract for one exit point: where compiled code
/// bails and the exact state the interpreter resumes from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SideExitRecord {
    pub location: BytecodeAddress,
    pub kind: SideExitKind,
    /// Index into the trace's instruction array.
    pub instruction_index: usize,
    /// The state interpretation resumes from.
    pub context: ContextSnapshot,
    /// For guard failures: the condition that failed.
    pub failed_guard: Option<GuardCondition>,
    /// For guard failures: the value actually observed.
    pub actual_value: Option<Value>,
    /// How often compiled code has taken this exit.
    pub executions: u32,
    /// Id of an attached side trace, once one is recorded.
    pub side_trace: Option<u32>,
}

impl SideExitRecord {
    /// A hot exit with no side trace yet warrants recording one.
    pub fn needs_side_trace(&self, hot_threshold: u32) -> bool {
        self.side_trace.is_none() && self.executions > hot_threshold
    }
}

/// A completed linear recording of one execution path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trace {
    pub entry_point: BytecodeAddress,
    pub exit_point: Option<BytecodeAddress>,
    /// Nanoseconds since recorder start when recording began.
    pub start_timestamp_ns: u64,
    /// Wall-clock nanoseconds the recording spanned.
    pub execution_time_ns: u64,
    pub instructions: Vec<TraceInstruction>,
    pub side_exits: Vec<SideExitRecord>,
    /// The interpreter state at trace entry.
    pub initial_context: ContextSnapshot,
    pub exit_reason: ExitReason,
    /// Count of `ExecuteBytecode` entries.
    pub executed_bytecodes: usize,
}

impl Trace {
    /// Number of guard entries in the trace.
    pub fn guard_count(&self) -> usize {
        self.instructions
            .iter()
            .filter(|i| i.opcode == TraceOpcode::Guard)
            .count()
    }

    pub fn side_exit_count(&self) -> usize {
        self.side_exits.len()
    }

    pub fn side_exit(&self, exit_id: u32) -> Option<&SideExitRecord> {
        self.side_exits.get(exit_id as usize)
    }
}

impl fmt::Display for Trace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "trace @{}: {} instructions, {} bytecodes, {} side exits, reason {:?}",
            self.entry_point,
            self.instructions.len(),
            self.executed_bytecodes,
            self.side_exits.len(),
            self.exit_reason
        )?;
        for (index, instr) in self.instructions.iter().enumerate() {
            write!(f, "  [{index}] {:?} @{}", instr.opcode, instr.location)?;
            if let Some(guard) = &instr.guard {
                write!(f, " {guard:?}")?;
            }
            if let Some(exit) = &instr.side_exit {
                write!(f, " {exit:?}")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
