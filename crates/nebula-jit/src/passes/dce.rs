//! Dead-code elimination.
//!
//! A node is dead when nothing uses it, it has no side effects, and it is
//! not control flow. Removal iterates so chains of dead producers unravel
//! completely. Parameters survive: they are the function's ABI surface
//! even when unused.

use nebula_ir::{Graph, NodeId, Opcode, OptFlag};

use crate::error::CompileError;
use crate::passes::Pass;

#[derive(Debug, Default)]
pub struct DcePass;

impl Pass for DcePass {
    fn name(&self) -> &'static str {
        "dead-code-elimination"
    }

    fn flag(&self) -> OptFlag {
        OptFlag::DEAD_CODE_ELIMINATION
    }

    fn run(&self, graph: &mut Graph) -> Result<bool, CompileError> {
        let mut changed = false;
        loop {
            let dead: Vec<NodeId> = graph
                .nodes()
                .filter(|node| {
                    node.users().is_empty()
                        && !node.has_side_effects()
                        && !node.is_control_flow()
                        && !matches!(node.opcode, Opcode::Parameter { .. })
                })
                .map(|node| node.id)
                .collect();
            if dead.is_empty() {
                break;
            }
            for id in dead {
                graph.remove_node(id)?;
                changed = true;
            }
        }
        Ok(changed)
    }
}
