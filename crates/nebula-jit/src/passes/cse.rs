//! Common-subexpression elimination.
//!
//! Pure nodes are hashed by opcode (payload included, so two `Const 5`
//! nodes collide) plus input ids. A later node structurally equal to an
//! earlier one is replaced through `replace_all_uses_with` -- but only
//! when the earlier node's position dominates the later one's, so the
//! merged value is available on every path that used it.

use std::collections::HashMap;

use nebula_ir::{Graph, NodeId, Opcode, OptFlag};

use crate::error::CompileError;
use crate::passes::Pass;

#[derive(Debug, Default)]
pub struct CsePass;

impl Pass for CsePass {
    fn name(&self) -> &'static str {
        "common-subexpression-elimination"
    }

    fn flag(&self) -> OptFlag {
        OptFlag::COMMON_SUBEXPRESSION
    }

    fn run(&self, graph: &mut Graph) -> Result<bool, CompileError> {
        eliminate(graph, false)
    }
}

/// Shared engine for CSE and value numbering. With `normalize`, operand
/// order of commutative operations is canonicalized before hashing.
pub(crate) fn eliminate(graph: &mut Graph, normalize: bool) -> Result<bool, CompileError> {
    if graph.entry_block().is_some() {
        graph.compute_dominators()?;
    }

    let mut seen: HashMap<(Opcode, Vec<NodeId>), NodeId> = HashMap::new();
    let mut changed = false;

    let ids: Vec<NodeId> = graph.nodes().map(|n| n.id).collect();
    for id in ids {
        let Some(node) = graph.node(id) else { continue };
        if !node.is_pure() || node.is_phi() {
            continue;
        }
        // Named slots are identities, not expressions.
        if matches!(
            node.opcode,
            Opcode::Parameter { .. } | Opcode::Variable { .. }
        ) {
            continue;
        }

        let mut inputs: Vec<NodeId> = node.inputs().to_vec();
        if normalize && is_commutative(&node.opcode) && inputs.len() == 2 {
            inputs.sort();
        }
        let key = (node.opcode.clone(), inputs);

        match seen.get(&key) {
            Some(&existing) if available(graph, existing, id) => {
                graph.replace_all_uses_with(id, existing)?;
                graph.remove_node(id)?;
                changed = true;
            }
            Some(_) => {}
            None => {
                seen.insert(key, id);
            }
        }
    }
    Ok(changed)
}

pub(crate) fn is_commutative(opcode: &Opcode) -> bool {
    match opcode {
        Opcode::Arith(op) => op.is_commutative(),
        Opcode::Bitwise(op) => op.is_commutative(),
        Opcode::Logic(op) => matches!(
            op,
            nebula_ir::LogicOp::And | nebula_ir::LogicOp::Or
        ),
        Opcode::Compare(op) => matches!(
            op,
            nebula_ir::CmpOp::Equal
                | nebula_ir::CmpOp::NotEqual
                | nebula_ir::CmpOp::StrictEqual
                | nebula_ir::CmpOp::StrictNotEqual
        ),
        _ => false,
    }
}

/// The replacement is sound when `existing`'s definition point reaches
/// every use of `later`: as a free-floating leaf, in the same block ahead
/// of it, or in a dominating block.
fn available(graph: &Graph, existing: NodeId, later: NodeId) -> bool {
    let Some(existing_node) = graph.node(existing) else {
        return false;
    };
    let Some(later_node) = graph.node(later) else {
        return false;
    };
    match (existing_node.block, later_node.block) {
        (None, _) => true,
        (Some(a), Some(b)) if a == b => {
            let block = graph.block(a).expect("node block is live");
            let pos = |id: NodeId| block.instructions().iter().position(|&i| i == id);
            match (pos(existing), pos(later)) {
                (Some(e), Some(l)) => e < l,
                _ => false,
            }
        }
        (Some(a), Some(b)) => graph.dominates(a, b),
        (Some(_), None) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::passes::run_pass;
    use nebula_ir::{ArithOp, ConstValue, IrType};

    #[test]
    fn merges_duplicate_constants() {
        let mut graph = Graph::new();
        let a = graph.create_constant(ConstValue::Int32(5));
        let b = graph.create_constant(ConstValue::Int32(5));
        let neg1 = graph.create_node(Opcode::Arith(ArithOp::Neg), IrType::Any);
        graph.add_input(neg1, a).unwrap();
        let neg2 = graph.create_node(Opcode::Arith(ArithOp::Neg), IrType::Any);
        graph.add_input(neg2, b).unwrap();

        assert!(run_pass(&CsePass, &mut graph).unwrap());

        // One constant and one negate remain.
        let constants = graph.nodes().filter(|n| n.is_constant()).count();
        assert_eq!(constants, 1);
        let negates = graph
            .nodes()
            .filter(|n| matches!(n.opcode, Opcode::Arith(ArithOp::Neg)))
            .count();
        assert_eq!(negates, 1);
    }

    #[test]
    fn distinct_payloads_stay_distinct() {
        let mut graph = Graph::new();
        graph.create_constant(ConstValue::Int32(5));
        graph.create_constant(ConstValue::Int32(6));

        assert!(!run_pass(&CsePass, &mut graph).unwrap());
        assert_eq!(graph.node_count(), 2);
    }

    #[test]
    fn merges_structurally_equal_expressions() {
        let mut graph = Graph::new();
        let x = graph.create_parameter(0, "x", IrType::Any);
        let y = graph.create_parameter(1, "y", IrType::Any);
        let add1 = graph
            .create_binary_op(Opcode::Arith(ArithOp::Add), x, y, IrType::Any)
            .unwrap();
        let add2 = graph
            .create_binary_op(Opcode::Arith(ArithOp::Add), x, y, IrType::Any)
            .unwrap();
        let ret = graph.create_return(Some(add2)).unwrap();

        assert!(run_pass(&CsePass, &mut graph).unwrap());
        assert!(graph.node(add2).is_none());
        assert_eq!(graph.node(ret).unwrap().inputs()[0], add1);
    }

    #[test]
    fn does_not_merge_reversed_non_commutative_inputs() {
        let mut graph = Graph::new();
        let x = graph.create_parameter(0, "x", IrType::Any);
        let y = graph.create_parameter(1, "y", IrType::Any);
        graph
            .create_binary_op(Opcode::Arith(ArithOp::Sub), x, y, IrType::Any)
            .unwrap();
        graph
            .create_binary_op(Opcode::Arith(ArithOp::Sub), y, x, IrType::Any)
            .unwrap();

        assert!(!run_pass(&CsePass, &mut graph).unwrap());
    }

    #[test]
    fn sibling_blocks_do_not_merge() {
        // entry branches to two siblings; identical adds in each must stay.
        let mut graph = Graph::new();
        let entry = graph.create_basic_block("entry");
        let left = graph.create_basic_block("left");
        let right = graph.create_basic_block("right");
        graph.set_entry_block(entry);

        let cond = graph.create_constant(ConstValue::Boolean(true));
        let branch = graph.create_branch(cond, left, right).unwrap();
        graph.terminate(entry, branch).unwrap();

        let x = graph.create_parameter(0, "x", IrType::Any);
        let add1 = graph
            .create_binary_op(Opcode::Arith(ArithOp::Add), x, x, IrType::Any)
            .unwrap();
        graph.append_instruction(left, add1).unwrap();
        let r1 = graph.create_return(Some(add1)).unwrap();
        graph.terminate(left, r1).unwrap();

        let add2 = graph
            .create_binary_op(Opcode::Arith(ArithOp::Add), x, x, IrType::Any)
            .unwrap();
        graph.append_instruction(right, add2).unwrap();
        let r2 = graph.create_return(Some(add2)).unwrap();
        graph.terminate(right, r2).unwrap();

        assert!(!run_pass(&CsePass, &mut graph).unwrap());
        assert!(graph.node(add1).is_some());
        assert!(graph.node(add2).is_some());
    }

    #[test]
    fn dominating_block_merges_into_dominated() {
        let mut graph = Graph::new();
        let entry = graph.create_basic_block("entry");
        let next = graph.create_basic_block("next");
        graph.set_entry_block(entry);

        let x = graph.create_parameter(0, "x", IrType::Any);
        let add1 = graph
            .create_binary_op(Opcode::Arith(ArithOp::Add), x, x, IrType::Any)
            .unwrap();
        graph.append_instruction(entry, add1).unwrap();
        let jump = graph.create_jump(next);
        graph.terminate(entry, jump).unwrap();

        let add2 = graph
            .create_binary_op(Opcode::Arith(ArithOp::Add), x, x, IrType::Any)
            .unwrap();
        graph.append_instruction(next, add2).unwrap();
        let ret = graph.create_return(Some(add2)).unwrap();
        graph.terminate(next, ret).unwrap();

        assert!(run_pass(&CsePass, &mut graph).unwrap());
        assert!(graph.node(add2).is_none());
        assert_eq!(graph.node(ret).unwrap().inputs()[0], add1);
        assert!(graph.verify());
    }
}
