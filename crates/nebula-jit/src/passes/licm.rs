//! Loop-invariant code motion.
//!
//! Invariants discovered by loop analysis hoist into the block that
//! enters the loop: the header's unique out-of-loop predecessor. A header
//! with several outside predecessors keeps its invariants in place (a
//! synthetic pre-header would have to re-key the header's phis, which is
//! not worth it for the rare shape). Outer loops are processed first so
//! an invariant can migrate out of several levels in one run.

use nebula_ir::{BlockId, Graph, OptFlag};

use crate::error::CompileError;
use crate::passes::Pass;

#[derive(Debug, Default)]
pub struct LicmPass;

impl Pass for LicmPass {
    fn name(&self) -> &'static str {
        "loop-invariant-code-motion"
    }

    fn flag(&self) -> OptFlag {
        OptFlag::LOOP_INVARIANT_MOTION
    }

    fn run(&self, graph: &mut Graph) -> Result<bool, CompileError> {
        if graph.entry_block().is_none() {
            return Ok(false);
        }
        let mut changed = false;

        // Re-detect after each level so inner-loop invariants can keep
        // moving outward through already-hoisted code.
        loop {
            let forest = graph.detect_natural_loops()?;
            if forest.is_empty() {
                break;
            }

            let mut order: Vec<usize> = (0..forest.loops.len()).collect();
            order.sort_by_key(|&i| forest.loops[i].depth);

            let mut hoisted_this_round = false;
            for index in order {
                let l = &forest.loops[index];
                let Some(preheader) = unique_outside_predecessor(graph, l.header, &l.body)
                else {
                    continue;
                };
                for &node in &l.invariants {
                    if graph.node(node).is_none() {
                        continue;
                    }
                    graph.detach_from_block(node)?;
                    graph.insert_before_terminator(preheader, node)?;
                    hoisted_this_round = true;
                    changed = true;
                }
            }
            if !hoisted_this_round {
                break;
            }
        }
        Ok(changed)
    }
}

/// The single predecessor of `header` outside the loop body, if exactly
/// one exists.
fn unique_outside_predecessor(
    graph: &Graph,
    header: BlockId,
    body: &[BlockId],
) -> Option<BlockId> {
    let preds = graph.block(header)?.predecessors();
    let mut outside = preds.iter().filter(|p| !body.contains(p));
    let first = outside.next()?;
    if outside.next().is_some() {
        return None;
    }
    Some(*first)
}
