//! Frontend: lowering a recorded trace to guarded straight-line IR.
//!
//! The trace carries the interpreter's execution path, not its semantics:
//! bytecode opcodes stay opaque at this boundary. The frontend therefore
//! lowers structure. The linear body becomes a chain of blocks; every
//! guard ends its block with a `Guard` terminator whose failure edge leads
//! to a deoptimization block; operand values become shared constants;
//! snapshot points become checkpoints. The resulting graph is what the
//! middle end specializes and the emitter consumes, with one deopt block
//! per exit point wired to the trace's side-exit records.

use std::collections::HashMap;

use nebula_ir::{
    BlockId, ConstValue, Graph, IrType, MetaOp, NodeId, Opcode, TypeOp,
};
use nebula_trace::{GuardCondition, Trace, TraceOpcode};
use nebula_value::{Value, ValueTag};

use crate::error::CompileError;

/// A lowered trace: the graph plus the deoptimization block for each exit
/// point, in creation order (guards first come first).
#[derive(Debug)]
pub struct TraceIr {
    pub graph: Graph,
    /// Blocks ending in `Deoptimize`, one per guard or explicit side exit.
    pub exit_blocks: Vec<BlockId>,
}

/// Lowers a completed trace into guarded straight-line IR.
pub fn build_trace_ir(trace: &Trace) -> Result<TraceIr, CompileError> {
    if trace.instructions.is_empty() {
        return Err(CompileError::Frontend("trace has no instructions".into()));
    }
    if trace.instructions[0].opcode != TraceOpcode::TraceStart {
        return Err(CompileError::Frontend(
            "trace does not begin with TraceStart".into(),
        ));
    }

    let mut graph = Graph::new();
    let entry = graph.create_basic_block("trace_entry");
    graph.set_entry_block(entry);

    let mut builder = TraceBuilder {
        graph,
        current: entry,
        segment: 0,
        exit_blocks: Vec::new(),
        constants: HashMap::new(),
        ended: false,
    };

    for instr in &trace.instructions {
        match instr.opcode {
            TraceOpcode::TraceStart => {
                let checkpoint = builder.graph.create_node(Opcode::Checkpoint, IrType::Void);
                builder.graph.append_instruction(builder.current, checkpoint)?;
            }
            TraceOpcode::ExecuteBytecode => {
                if instr.stack_snapshot.is_some() {
                    let frame = builder
                        .graph
                        .create_node(Opcode::Meta(MetaOp::FrameState), IrType::Void);
                    builder.graph.append_instruction(builder.current, frame)?;
                }
                let op = builder
                    .graph
                    .create_node(Opcode::Meta(MetaOp::Metadata), IrType::Any);
                let operands: Vec<NodeId> = instr
                    .operands
                    .iter()
                    .map(|value| builder.constant_for(value))
                    .collect();
                for operand in operands {
                    builder.graph.add_input(op, operand)?;
                }
                builder.graph.append_instruction(builder.current, op)?;
            }
            TraceOpcode::Guard => {
                let condition = instr.guard.ok_or_else(|| {
                    CompileError::Frontend("guard entry without condition".into())
                })?;
                let value = match instr.operands.first() {
                    Some(observed) => builder.constant_for(observed),
                    None => builder.graph.create_constant(ConstValue::Undefined),
                };
                builder.emit_guard(condition, value)?;
            }
            // Failure entries are recording bookkeeping; the guard entry
            // itself already produced the exit edge.
            TraceOpcode::GuardFailure => {}
            TraceOpcode::SideExit => {
                // The exit condition is runtime state the recording cannot
                // see; compiled code re-checks it, so the lowering keeps
                // the exit edge with an always-pass placeholder check.
                let value = builder.constant_for(&Value::Boolean(true));
                builder.emit_guard(GuardCondition::NonNull, value)?;
            }
            TraceOpcode::OptimizationHint => {}
            TraceOpcode::TraceEnd => {
                let ret = builder.graph.create_return(None)?;
                builder.graph.terminate(builder.current, ret)?;
                builder.ended = true;
            }
        }
    }

    if !builder.ended {
        let ret = builder.graph.create_return(None)?;
        builder.graph.terminate(builder.current, ret)?;
    }

    let ir = TraceIr {
        graph: builder.graph,
        exit_blocks: builder.exit_blocks,
    };
    if !ir.graph.verify() {
        return Err(CompileError::VerifyFailed {
            stage: "frontend".into(),
            reason: "lowered trace failed verification".into(),
        });
    }
    Ok(ir)
}

struct TraceBuilder {
    graph: Graph,
    current: BlockId,
    segment: u32,
    exit_blocks: Vec<BlockId>,
    constants: HashMap<ConstKey, NodeId>,
    ended: bool,
}

impl TraceBuilder {
    /// Ends the current block with a guard: failure leads to a fresh
    /// deoptimization block, success falls through to the next segment.
    fn emit_guard(
        &mut self,
        condition: GuardCondition,
        value: NodeId,
    ) -> Result<(), CompileError> {
        let check_ty = guard_result_type(condition);
        let check = self.graph.create_node(Opcode::Type(TypeOp::TypeGuard), check_ty);
        self.graph.add_input(check, value)?;
        self.graph.append_instruction(self.current, check)?;

        let exit = self
            .graph
            .create_basic_block(&format!("deopt_{}", self.exit_blocks.len()));
        let deopt = self.graph.create_node(Opcode::Deoptimize, IrType::Void);
        self.graph.add_input(deopt, check)?;
        self.graph.terminate(exit, deopt)?;
        self.exit_blocks.push(exit);

        let guard = self
            .graph
            .create_node(Opcode::Guard { exit_block: exit }, IrType::Void);
        self.graph.add_input(guard, check)?;
        self.graph.terminate(self.current, guard)?;

        self.segment += 1;
        let next = self
            .graph
            .create_basic_block(&format!("trace_{}", self.segment));
        self.graph.add_successor(self.current, next)?;
        self.current = next;
        Ok(())
    }

    /// Interns one constant node per distinct operand value.
    fn constant_for(&mut self, value: &Value) -> NodeId {
        let key = ConstKey::from(value);
        if let Some(&id) = self.constants.get(&key) {
            return id;
        }
        let id = self.graph.create_constant(const_value(value));
        self.constants.insert(key, id);
        id
    }
}

/// The type a guard proves about its value.
fn guard_result_type(condition: GuardCondition) -> IrType {
    match condition {
        GuardCondition::TypeCheck { expected } => IrType::Tagged(expected),
        GuardCondition::IntegerInRange { .. } => IrType::Tagged(ValueTag::Int32),
        GuardCondition::StringLength { .. } => IrType::Tagged(ValueTag::String),
        GuardCondition::ArrayLength { .. } => IrType::Tagged(ValueTag::Array),
        GuardCondition::ObjectShape { shape } => IrType::Shaped(shape),
        GuardCondition::NonNull | GuardCondition::Opaque { .. } => IrType::Any,
    }
}

fn const_value(value: &Value) -> ConstValue {
    match value {
        Value::Undefined => ConstValue::Undefined,
        Value::Null => ConstValue::Null,
        Value::Boolean(b) => ConstValue::Boolean(*b),
        Value::Int32(v) => ConstValue::Int32(*v),
        Value::Float64(v) => ConstValue::Float64(*v),
        Value::String(s) => ConstValue::String(s.clone()),
        // Heap references cannot be embedded; compiled code reloads them.
        Value::Symbol(_)
        | Value::BigInt(_)
        | Value::Object { .. }
        | Value::Array { .. }
        | Value::Function { .. } => ConstValue::Undefined,
    }
}

/// Hashable identity for operand constants (floats by bit pattern).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ConstKey {
    Undefined,
    Null,
    Boolean(bool),
    Int32(i32),
    Float64(u64),
    String(String),
    Opaque,
}

impl From<&Value> for ConstKey {
    fn from(value: &Value) -> Self {
        match value {
            Value::Undefined => ConstKey::Undefined,
            Value::Null => ConstKey::Null,
            Value::Boolean(b) => ConstKey::Boolean(*b),
            Value::Int32(v) => ConstKey::Int32(*v),
            Value::Float64(v) => ConstKey::Float64(v.to_bits()),
            Value::String(s) => ConstKey::String(s.to_string()),
            Value::Symbol(_)
            | Value::BigInt(_)
            | Value::Object { .. }
            | Value::Array { .. }
            | Value::Function { .. } => ConstKey::Opaque,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nebula_trace::{
        ExecutionContext, RecorderConfig, TraceRecorder,
    };
    use nebula_value::{BytecodeAddress, FunctionId};

    struct MockContext;

    impl ExecutionContext for MockContext {
        fn current_address(&self) -> BytecodeAddress {
            BytecodeAddress::new(FunctionId(0), 0)
        }
        fn stack_values(&self) -> Vec<Value> {
            vec![Value::Int32(1)]
        }
        fn stack_pointer(&self) -> usize {
            1
        }
        fn frame_pointer(&self) -> usize {
            0
        }
        fn call_depth(&self) -> usize {
            1
        }
    }

    fn addr(offset: u32) -> BytecodeAddress {
        BytecodeAddress::new(FunctionId(0), offset)
    }

    fn record_simple_trace() -> Trace {
        let ctx = MockContext;
        let mut rec = TraceRecorder::new(RecorderConfig::default());
        rec.start_recording(&ctx, addr(0), None);
        rec.record_bytecode_execution(&ctx, addr(1), 3, &[Value::Int32(7)]);
        rec.record_guard_condition(
            &ctx,
            addr(2),
            GuardCondition::TypeCheck {
                expected: ValueTag::Int32,
            },
            &Value::Int32(7),
        );
        rec.record_bytecode_execution(&ctx, addr(3), 4, &[Value::Int32(7)]);
        rec.finish_recording().unwrap()
    }

    #[test]
    fn lowers_linear_trace_to_verified_graph() {
        let trace = record_simple_trace();
        let ir = build_trace_ir(&trace).unwrap();

        assert!(ir.graph.verify());
        assert!(ir.graph.entry_block().is_some());
        // One guard in the trace: one deopt block.
        assert_eq!(ir.exit_blocks.len(), 1);

        // The deopt block ends in Deoptimize.
        let exit = ir.exit_blocks[0];
        let terminator = ir.graph.terminator(exit).unwrap();
        assert!(matches!(
            ir.graph.node(terminator).unwrap().opcode,
            Opcode::Deoptimize
        ));
    }

    #[test]
    fn guard_splits_blocks_and_narrows_type() {
        let trace = record_simple_trace();
        let ir = build_trace_ir(&trace).unwrap();

        // entry + continuation + deopt block.
        assert_eq!(ir.graph.block_count(), 3);

        let entry = ir.graph.entry_block().unwrap();
        let guard = ir.graph.terminator(entry).unwrap();
        let guard_node = ir.graph.node(guard).unwrap();
        assert!(matches!(guard_node.opcode, Opcode::Guard { .. }));

        // The guard consumes the type check, annotated with the proven tag.
        let check = guard_node.inputs()[0];
        assert_eq!(
            ir.graph.node(check).unwrap().ty,
            IrType::Tagged(ValueTag::Int32)
        );
    }

    #[test]
    fn operand_constants_are_shared() {
        let trace = record_simple_trace();
        let ir = build_trace_ir(&trace).unwrap();

        // Int32(7) appears three times in the trace but once in the graph.
        let sevens = ir
            .graph
            .nodes()
            .filter(|n| {
                matches!(
                    n.opcode.constant_value(),
                    Some(ConstValue::Int32(7))
                )
            })
            .count();
        assert_eq!(sevens, 1);
    }

    #[test]
    fn trace_end_becomes_return() {
        let trace = record_simple_trace();
        let ir = build_trace_ir(&trace).unwrap();

        let returns = ir
            .graph
            .nodes()
            .filter(|n| matches!(n.opcode, Opcode::Return))
            .count();
        assert_eq!(returns, 1);
    }

    #[test]
    fn empty_trace_is_rejected() {
        let ctx = MockContext;
        let mut rec = TraceRecorder::new(RecorderConfig::default());
        rec.start_recording(&ctx, addr(0), None);
        let trace = rec.finish_recording().unwrap();

        // Start and end only: still lowers (no error)...
        assert!(build_trace_ir(&trace).is_ok());

        // ...but a synthetic instruction-free trace is rejected.
        let empty = Trace {
            instructions: Vec::new(),
            ..trace
        };
        assert!(matches!(
            build_trace_ir(&empty),
            Err(CompileError::Frontend(_))
        ));
    }

    #[test]
    fn side_exit_entries_produce_exit_blocks() {
        let ctx = MockContext;
        let mut rec = TraceRecorder::new(RecorderConfig::default());
        rec.start_recording(&ctx, addr(0), None);
        rec.record_bytecode_execution(&ctx, addr(1), 0, &[]);
        rec.record_side_exit(
            &ctx,
            addr(2),
            nebula_trace::SideExitKind::Deoptimization,
        );
        let trace = rec.finish_recording().unwrap();

        let ir = build_trace_ir(&trace).unwrap();
        assert_eq!(ir.exit_blocks.len(), 1);
        assert!(ir.graph.verify());
    }
}
