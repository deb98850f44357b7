//! Profile-driven type specialization.
//!
//! Reads the type-profile slice attached to the graph. A parameter whose
//! site is confidently monomorphic (or mostly-Int32 / mostly-number) gets
//! its annotation narrowed, and every use is re-routed through a
//! `TypeGuard` placed at the head of the entry block: the guard is the
//! specialization boundary where compiled code re-validates the
//! speculation and deoptimizes on mismatch.

use nebula_ir::{Graph, IrType, NodeId, Opcode, OptFlag, TypeOp};
use nebula_profiler::TypeInfo;
use nebula_value::ValueTag;

use crate::error::CompileError;
use crate::passes::Pass;

/// Minimum profiler confidence before a site is worth speculating on.
const SPECULATION_CONFIDENCE: f32 = 0.9;

#[derive(Debug, Default)]
pub struct TypeSpecializationPass;

impl Pass for TypeSpecializationPass {
    fn name(&self) -> &'static str {
        "type-specialization"
    }

    fn flag(&self) -> OptFlag {
        OptFlag::TYPE_SPECIALIZATION
    }

    fn run(&self, graph: &mut Graph) -> Result<bool, CompileError> {
        let Some(profile) = graph.type_profile() else {
            return Ok(false);
        };
        let Some(entry) = graph.entry_block() else {
            return Ok(false);
        };

        // Collect speculation targets first; mutation follows.
        let mut speculations: Vec<(NodeId, ValueTag)> = Vec::new();
        for &param in graph.parameters() {
            let Some(node) = graph.node(param) else { continue };
            let Opcode::Parameter { index, .. } = node.opcode else {
                continue;
            };
            if !node.ty.is_any() {
                continue; // already narrowed
            }
            let Some(info) = profile.params.get(index as usize) else {
                continue;
            };
            let Some(tag) = speculated_tag(info) else {
                continue;
            };
            if node.users().is_empty() {
                continue;
            }
            speculations.push((param, tag));
        }

        let mut changed = false;
        for (param, tag) in speculations {
            let users: Vec<NodeId> = graph
                .node(param)
                .map(|n| n.users().to_vec())
                .unwrap_or_default();

            let guard = graph.create_node(Opcode::Type(TypeOp::TypeGuard), IrType::Tagged(tag));
            graph.add_input(guard, param)?;
            graph.prepend_instruction(entry, guard)?;
            for user in users {
                graph.replace_input(user, param, guard)?;
            }
            if let Some(node) = graph.node_mut(param) {
                node.ty = IrType::Tagged(tag);
            }
            changed = true;
        }
        Ok(changed)
    }
}

/// The tag worth speculating on, if the site's profile supports one.
fn speculated_tag(info: &TypeInfo) -> Option<ValueTag> {
    if info.confidence() < SPECULATION_CONFIDENCE {
        return None;
    }
    if info.is_monomorphic() {
        return info.most_common_tag();
    }
    if info.is_mostly_int32() {
        return Some(ValueTag::Int32);
    }
    if info.is_mostly_number() {
        return Some(ValueTag::Float64);
    }
    None
}
