//! Bounds-check and redundant-guard elimination.
//!
//! Range information flows from dominating checks: once a value has
//! passed a guard, an identical check downstream can never fail. Two
//! rules apply, both driven by the dominator tree:
//!
//! 1. A pure `TypeGuard` whose input and proven type match an earlier
//!    guard that dominates it collapses into the earlier guard.
//! 2. A `Guard` terminator whose checked input already passed an
//!    identical dominating guard degenerates into a jump to its
//!    fall-through successor; the deopt edge is dropped.
//!
//! Checks over induction variables are deliberately left in place: their
//! value changes per iteration, so a dominating instance of the same
//! check proves nothing about later iterations.

use std::collections::HashSet;

use nebula_ir::{all_induction_variables, BlockId, Graph, NodeId, Opcode, OptFlag, TypeOp};

use crate::error::CompileError;
use crate::passes::Pass;

#[derive(Debug, Default)]
pub struct BoundsCheckEliminationPass;

impl Pass for BoundsCheckEliminationPass {
    fn name(&self) -> &'static str {
        "bounds-check-elimination"
    }

    fn flag(&self) -> OptFlag {
        OptFlag::BOUNDS_CHECK_ELIMINATION
    }

    fn run(&self, graph: &mut Graph) -> Result<bool, CompileError> {
        if graph.entry_block().is_none() {
            return Ok(false);
        }
        let forest = graph.detect_natural_loops()?;
        let iv_nodes: HashSet<NodeId> = all_induction_variables(graph, &forest)
            .into_iter()
            .map(|iv| iv.node)
            .collect();

        let mut changed = false;
        changed |= merge_redundant_type_guards(graph, &iv_nodes)?;
        changed |= drop_redundant_guard_exits(graph, &iv_nodes)?;
        Ok(changed)
    }
}

/// Rule 1: collapse dominated duplicate `TypeGuard`s.
fn merge_redundant_type_guards(
    graph: &mut Graph,
    iv_nodes: &HashSet<NodeId>,
) -> Result<bool, CompileError> {
    let mut changed = false;
    let guards: Vec<NodeId> = graph
        .nodes()
        .filter(|n| matches!(n.opcode, Opcode::Type(TypeOp::TypeGuard)))
        .map(|n| n.id)
        .collect();

    for (i, &later) in guards.iter().enumerate() {
        let Some(later_node) = graph.node(later) else { continue };
        let (later_input, later_ty, later_block) = (
            later_node.inputs().first().copied(),
            later_node.ty,
            later_node.block,
        );
        let Some(input) = later_input else { continue };
        if iv_nodes.contains(&input) {
            continue;
        }

        for &earlier in &guards[..i] {
            let Some(earlier_node) = graph.node(earlier) else { continue };
            if earlier_node.inputs().first().copied() != Some(input)
                || earlier_node.ty != later_ty
            {
                continue;
            }
            if !position_dominates(graph, earlier, earlier_node.block, later, later_block) {
                continue;
            }
            graph.replace_all_uses_with(later, earlier)?;
            graph.remove_node(later)?;
            changed = true;
            break;
        }
    }
    Ok(changed)
}

/// Rule 2: turn dominated duplicate `Guard` terminators into jumps.
fn drop_redundant_guard_exits(
    graph: &mut Graph,
    iv_nodes: &HashSet<NodeId>,
) -> Result<bool, CompileError> {
    let mut changed = false;
    let guards: Vec<(NodeId, BlockId, BlockId, NodeId)> = graph
        .nodes()
        .filter_map(|n| match n.opcode {
            Opcode::Guard { exit_block } => {
                let block = n.block?;
                let input = n.inputs().first().copied()?;
                Some((n.id, block, exit_block, input))
            }
            _ => None,
        })
        .collect();

    for (i, &(later, later_block, exit_block, input)) in guards.iter().enumerate() {
        if iv_nodes.contains(&input) {
            continue;
        }
        let dominated = guards[..i].iter().any(|&(_, earlier_block, _, earlier_input)| {
            earlier_input == input
                && earlier_block != later_block
                && graph.dominates(earlier_block, later_block)
        });
        if !dominated {
            continue;
        }

        // The guard's fall-through successor is the one that is not the
        // deopt target.
        let fallthrough = graph
            .block(later_block)
            .and_then(|b| b.successors().iter().find(|&&s| s != exit_block).copied());
        let Some(fallthrough) = fallthrough else { continue };

        graph.remove_node(later)?;
        graph.remove_successor(later_block, exit_block)?;
        let jump = graph.create_jump(fallthrough);
        graph.terminate(later_block, jump)?;
        changed = true;
    }
    Ok(changed)
}

/// `earlier` reaches `later` on every path: free-floating, earlier in the
/// same block, or in a strictly dominating block.
fn position_dominates(
    graph: &Graph,
    earlier: NodeId,
    earlier_block: Option<BlockId>,
    later: NodeId,
    later_block: Option<BlockId>,
) -> bool {
    match (earlier_block, later_block) {
        (None, _) => true,
        (Some(a), Some(b)) if a == b => {
            let Some(block) = graph.block(a) else { return false };
            let pos = |id: NodeId| block.instructions().iter().position(|&i| i == id);
            matches!((pos(earlier), pos(later)), (Some(e), Some(l)) if e < l)
        }
        (Some(a), Some(b)) => graph.dominates(a, b),
        (Some(_), None) => false,
    }
}
