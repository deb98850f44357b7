//! Call-site inlining.
//!
//! The orchestrator snapshots candidate callee graphs at job creation
//! (the pipeline never reaches back into shared state) and hands them to
//! this pass. A direct call inlines when its callee is available, small
//! enough, and straight-line: a single block ending in `Return`. The
//! callee body is spliced in front of the call, parameters map to the
//! call's arguments, and the return value replaces the call node.
//! Transitive inlining repeats up to the configured depth.

use std::collections::HashMap;

use nebula_ir::{ConstValue, Graph, NodeId, Opcode, OptFlag};
use nebula_value::FunctionId;

use crate::error::CompileError;
use crate::passes::Pass;

#[derive(Debug, Default)]
pub struct InliningPass {
    /// Callee graphs snapshotted for this compile job.
    callees: HashMap<FunctionId, Graph>,
    max_inline_size: usize,
    max_inline_depth: u32,
}

impl InliningPass {
    pub fn new(
        callees: HashMap<FunctionId, Graph>,
        max_inline_size: usize,
        max_inline_depth: u32,
    ) -> Self {
        InliningPass {
            callees,
            max_inline_size,
            max_inline_depth,
        }
    }

    /// A callee inlines only when it is one straight-line block returning
    /// at the end.
    fn inlinable(&self, callee: &Graph) -> bool {
        if callee.node_count() > self.max_inline_size {
            return false;
        }
        let Some(entry) = callee.entry_block() else {
            return false;
        };
        if callee.block_count() != 1 {
            return false;
        }
        let Some(terminator) = callee.terminator(entry) else {
            return false;
        };
        matches!(
            callee.node(terminator).map(|n| &n.opcode),
            Some(Opcode::Return)
        )
    }

    /// Splices `callee` in place of `call` inside `graph`.
    fn inline_call(
        &self,
        graph: &mut Graph,
        call: NodeId,
        callee: &Graph,
    ) -> Result<(), CompileError> {
        let call_block = graph
            .node(call)
            .and_then(|n| n.block)
            .expect("inlinable call is scheduled in a block");
        let args: Vec<NodeId> = graph.node(call).map(|n| n.inputs().to_vec()).unwrap_or_default();

        let callee_entry = callee.entry_block().expect("checked by inlinable");
        let terminator = callee.terminator(callee_entry).expect("checked by inlinable");

        // Map callee parameters to the caller's argument values; missing
        // arguments read as undefined.
        let mut mapping: HashMap<NodeId, NodeId> = HashMap::new();
        for &param in callee.parameters() {
            let Some(node) = callee.node(param) else { continue };
            let Opcode::Parameter { index, .. } = node.opcode else {
                continue;
            };
            let value = match args.get(index as usize) {
                Some(&arg) => arg,
                None => graph.create_constant(ConstValue::Undefined),
            };
            mapping.insert(param, value);
        }

        // Copy free-floating leaf values (constants) first.
        for node in callee.nodes() {
            if node.block.is_none() && !mapping.contains_key(&node.id) {
                let copy = graph.create_node(node.opcode.clone(), node.ty);
                mapping.insert(node.id, copy);
                for &input in node.inputs() {
                    let mapped = mapping
                        .get(&input)
                        .copied()
                        .ok_or_else(|| CompileError::Frontend(
                            "callee leaf depends on scheduled node".into(),
                        ))?;
                    graph.add_input(copy, mapped)?;
                }
            }
        }

        // Splice the callee body before the call, skipping the return.
        let body: Vec<NodeId> = callee
            .block(callee_entry)
            .map(|b| b.instructions().to_vec())
            .unwrap_or_default();
        for id in body {
            if id == terminator {
                continue;
            }
            let Some(node) = callee.node(id) else { continue };
            let copy = graph.create_node(node.opcode.clone(), node.ty);
            for &input in node.inputs() {
                let mapped = mapping.get(&input).copied().ok_or_else(|| {
                    CompileError::Frontend("callee instruction depends on unmapped node".into())
                })?;
                graph.add_input(copy, mapped)?;
            }
            graph.insert_before(call_block, copy, call)?;
            mapping.insert(id, copy);
        }

        // The callee's return value replaces the call everywhere.
        let result = match callee.node(terminator).and_then(|n| n.inputs().first().copied()) {
            Some(value) => mapping
                .get(&value)
                .copied()
                .unwrap_or_else(|| graph.create_constant(ConstValue::Undefined)),
            None => graph.create_constant(ConstValue::Undefined),
        };
        graph.replace_all_uses_with(call, result)?;
        graph.remove_node(call)?;
        Ok(())
    }
}

impl Pass for InliningPass {
    fn name(&self) -> &'static str {
        "inlining"
    }

    fn flag(&self) -> OptFlag {
        OptFlag::INLINING
    }

    fn run(&self, graph: &mut Graph) -> Result<bool, CompileError> {
        if self.callees.is_empty() {
            return Ok(false);
        }
        let mut changed = false;

        for _round in 0..self.max_inline_depth.max(1) {
            let sites: Vec<(NodeId, FunctionId)> = graph
                .nodes()
                .filter(|node| node.block.is_some())
                .filter_map(|node| match node.opcode {
                    Opcode::Call {
                        target: Some(target),
                    } => Some((node.id, target)),
                    _ => None,
                })
                .collect();

            let mut inlined_this_round = false;
            for (call, target) in sites {
                let Some(callee) = self.callees.get(&target) else {
                    continue;
                };
                if !self.inlinable(callee) {
                    continue;
                }
                if graph.node(call).is_none() {
                    continue;
                }
                self.inline_call(graph, call, callee)?;
                inlined_this_round = true;
                changed = true;
            }
            if !inlined_this_round {
                break;
            }
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::passes::run_pass;
    use nebula_ir::{ArithOp, IrType};
    use nebula_value::ValueTag;

    /// fn double(x) { return x + x; }
    fn double_graph() -> Graph {
        let mut graph = Graph::new();
        let entry = graph.create_basic_block("entry");
        graph.set_entry_block(entry);
        let p = graph.create_parameter(0, "x", IrType::Tagged(ValueTag::Int32));
        let add = graph
            .create_binary_op(
                Opcode::Arith(ArithOp::Add),
                p,
                p,
                IrType::Tagged(ValueTag::Int32),
            )
            .unwrap();
        graph.append_instruction(entry, add).unwrap();
        let ret = graph.create_return(Some(add)).unwrap();
        graph.terminate(entry, ret).unwrap();
        graph
    }

    /// Caller with one scheduled `call double(arg)` feeding a return.
    fn caller_graph(target: FunctionId) -> (Graph, NodeId, NodeId) {
        let mut graph = Graph::new();
        let entry = graph.create_basic_block("entry");
        graph.set_entry_block(entry);
        let arg = graph.create_constant(ConstValue::Int32(21));
        let call = graph.create_node(
            Opcode::Call {
                target: Some(target),
            },
            IrType::Any,
        );
        graph.add_input(call, arg).unwrap();
        graph.append_instruction(entry, call).unwrap();
        let ret = graph.create_return(Some(call)).unwrap();
        graph.terminate(entry, ret).unwrap();
        (graph, call, ret)
    }

    fn pass_for(target: FunctionId, callee: Graph) -> InliningPass {
        let mut callees = HashMap::new();
        callees.insert(target, callee);
        InliningPass::new(callees, 50, 3)
    }

    #[test]
    fn inlines_monomorphic_small_callee() {
        let target = FunctionId(7);
        let (mut graph, call, ret) = caller_graph(target);
        let pass = pass_for(target, double_graph());

        assert!(run_pass(&pass, &mut graph).unwrap());
        assert!(graph.has_applied_optimization(OptFlag::INLINING));

        // The call is gone; the return consumes the spliced add.
        assert!(graph.node(call).is_none());
        let result = graph.node(ret).unwrap().inputs()[0];
        let result_node = graph.node(result).unwrap();
        assert!(matches!(result_node.opcode, Opcode::Arith(ArithOp::Add)));
        // The add consumes the caller's argument twice.
        assert_eq!(result_node.inputs().len(), 2);
        for &input in result_node.inputs() {
            assert_eq!(
                graph.node(input).unwrap().opcode.constant_value(),
                Some(&ConstValue::Int32(21))
            );
        }
        assert!(graph.verify());
    }

    #[test]
    fn oversized_callee_is_skipped() {
        let target = FunctionId(7);
        let (mut graph, call, _ret) = caller_graph(target);
        let mut callees = HashMap::new();
        callees.insert(target, double_graph());
        // Budget of one node: nothing fits.
        let pass = InliningPass::new(callees, 1, 3);

        assert!(!run_pass(&pass, &mut graph).unwrap());
        assert!(graph.node(call).is_some());
    }

    #[test]
    fn multi_block_callee_is_skipped() {
        let target = FunctionId(7);
        let (mut graph, call, _ret) = caller_graph(target);

        let mut callee = Graph::new();
        let a = callee.create_basic_block("a");
        let b = callee.create_basic_block("b");
        callee.set_entry_block(a);
        let jump = callee.create_jump(b);
        callee.terminate(a, jump).unwrap();
        let ret = callee.create_return(None).unwrap();
        callee.terminate(b, ret).unwrap();

        let pass = pass_for(target, callee);
        assert!(!run_pass(&pass, &mut graph).unwrap());
        assert!(graph.node(call).is_some());
    }

    #[test]
    fn unknown_target_is_skipped() {
        let (mut graph, call, _ret) = caller_graph(FunctionId(99));
        let pass = pass_for(FunctionId(7), double_graph());

        assert!(!run_pass(&pass, &mut graph).unwrap());
        assert!(graph.node(call).is_some());
    }

    #[test]
    fn transitive_inlining_respects_depth() {
        // outer() calls middle(), middle() calls double().
        let double_id = FunctionId(1);
        let middle_id = FunctionId(2);

        let mut middle = Graph::new();
        let entry = middle.create_basic_block("entry");
        middle.set_entry_block(entry);
        let p = middle.create_parameter(0, "x", IrType::Any);
        let call = middle.create_node(
            Opcode::Call {
                target: Some(double_id),
            },
            IrType::Any,
        );
        middle.add_input(call, p).unwrap();
        middle.append_instruction(entry, call).unwrap();
        let ret = middle.create_return(Some(call)).unwrap();
        middle.terminate(entry, ret).unwrap();

        let (mut graph, outer_call, outer_ret) = caller_graph(middle_id);
        let mut callees = HashMap::new();
        callees.insert(double_id, double_graph());
        callees.insert(middle_id, middle);
        let pass = InliningPass::new(callees, 50, 3);

        assert!(run_pass(&pass, &mut graph).unwrap());
        assert!(graph.node(outer_call).is_none());

        // Both levels inlined: no calls remain.
        let calls = graph
            .nodes()
            .filter(|n| matches!(n.opcode, Opcode::Call { .. }))
            .count();
        assert_eq!(calls, 0);
        let result = graph.node(outer_ret).unwrap().inputs()[0];
        assert!(matches!(
            graph.node(result).unwrap().opcode,
            Opcode::Arith(ArithOp::Add)
        ));
        assert!(graph.verify());
    }

    #[test]
    fn missing_argument_reads_undefined() {
        let target = FunctionId(3);
        // Caller passes no arguments to double(x).
        let mut graph = Graph::new();
        let entry = graph.create_basic_block("entry");
        graph.set_entry_block(entry);
        let call = graph.create_node(
            Opcode::Call {
                target: Some(target),
            },
            IrType::Any,
        );
        graph.append_instruction(entry, call).unwrap();
        let ret = graph.create_return(Some(call)).unwrap();
        graph.terminate(entry, ret).unwrap();

        let pass = pass_for(target, double_graph());
        assert!(run_pass(&pass, &mut graph).unwrap());

        let result = graph.node(ret).unwrap().inputs()[0];
        let add = graph.node(result).unwrap();
        for &input in add.inputs() {
            assert_eq!(
                graph.node(input).unwrap().opcode.constant_value(),
                Some(&ConstValue::Undefined)
            );
        }
    }
}
