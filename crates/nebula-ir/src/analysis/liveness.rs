//! Liveness analysis: backward data-flow over the CFG.
//!
//! Produces per-block live-in/live-out sets of value nodes. A value is
//! live into a block if some instruction in the block (or downstream of
//! it) consumes it before any local redefinition. Leaf values without a
//! block (constants, parameters) flow all the way up to their first use.

use std::collections::{HashMap, HashSet};

use crate::graph::Graph;
use crate::id::{BlockId, NodeId};

/// Per-block live-in/live-out sets.
#[derive(Debug, Clone, Default)]
pub struct Liveness {
    live_in: HashMap<BlockId, HashSet<NodeId>>,
    live_out: HashMap<BlockId, HashSet<NodeId>>,
}

impl Liveness {
    pub fn live_in(&self, block: BlockId) -> &HashSet<NodeId> {
        static EMPTY: std::sync::OnceLock<HashSet<NodeId>> = std::sync::OnceLock::new();
        self.live_in
            .get(&block)
            .unwrap_or_else(|| EMPTY.get_or_init(HashSet::new))
    }

    pub fn live_out(&self, block: BlockId) -> &HashSet<NodeId> {
        static EMPTY: std::sync::OnceLock<HashSet<NodeId>> = std::sync::OnceLock::new();
        self.live_out
            .get(&block)
            .unwrap_or_else(|| EMPTY.get_or_init(HashSet::new))
    }

    pub fn is_live_into(&self, block: BlockId, node: NodeId) -> bool {
        self.live_in(block).contains(&node)
    }

    pub fn is_live_out_of(&self, block: BlockId, node: NodeId) -> bool {
        self.live_out(block).contains(&node)
    }
}

impl Graph {
    /// Runs backward liveness over the reachable blocks to a fixed point.
    pub fn perform_liveness_analysis(&self) -> Liveness {
        let order = self.reachable_blocks();

        // Per-block upward-exposed uses and definitions.
        let mut uses: HashMap<BlockId, HashSet<NodeId>> = HashMap::new();
        let mut defs: HashMap<BlockId, HashSet<NodeId>> = HashMap::new();
        for &block in &order {
            let Some(b) = self.block(block) else { continue };
            let mut defined: HashSet<NodeId> = HashSet::new();
            let mut used: HashSet<NodeId> = HashSet::new();
            for &instr in b.instructions() {
                let Some(node) = self.node(instr) else { continue };
                for &input in node.inputs() {
                    if !defined.contains(&input) {
                        used.insert(input);
                    }
                }
                defined.insert(instr);
            }
            uses.insert(block, used);
            defs.insert(block, defined);
        }

        let mut live_in: HashMap<BlockId, HashSet<NodeId>> = HashMap::new();
        let mut live_out: HashMap<BlockId, HashSet<NodeId>> = HashMap::new();
        for &block in &order {
            live_in.insert(block, HashSet::new());
            live_out.insert(block, HashSet::new());
        }

        // Iterate in reverse DFS order until stable.
        let mut changed = true;
        while changed {
            changed = false;
            for &block in order.iter().rev() {
                let Some(b) = self.block(block) else { continue };

                let mut out: HashSet<NodeId> = HashSet::new();
                for &succ in b.successors() {
                    if let Some(succ_in) = live_in.get(&succ) {
                        out.extend(succ_in.iter().copied());
                    }
                }

                let mut inn: HashSet<NodeId> = uses.get(&block).cloned().unwrap_or_default();
                let empty = HashSet::new();
                let block_defs = defs.get(&block).unwrap_or(&empty);
                for &value in &out {
                    if !block_defs.contains(&value) {
                        inn.insert(value);
                    }
                }

                if live_out.get(&block) != Some(&out) {
                    live_out.insert(block, out);
                    changed = true;
                }
                if live_in.get(&block) != Some(&inn) {
                    live_in.insert(block, inn);
                    changed = true;
                }
            }
        }

        Liveness { live_in, live_out }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcode::{ArithOp, ConstValue, Opcode};
    use crate::types::IrType;
    use nebula_value::ValueTag;

    #[test]
    fn value_live_across_blocks() {
        let mut graph = Graph::new();
        let entry = graph.create_basic_block("entry");
        let exit = graph.create_basic_block("exit");
        graph.set_entry_block(entry);
        graph.add_successor(entry, exit).unwrap();

        let c = graph.create_constant(ConstValue::Int32(1));
        let add = graph
            .create_binary_op(
                Opcode::Arith(ArithOp::Add),
                c,
                c,
                IrType::Tagged(ValueTag::Int32),
            )
            .unwrap();
        graph.append_instruction(entry, add).unwrap();
        let jump = graph.create_jump(exit);
        graph.terminate(entry, jump).unwrap();

        let ret = graph.create_return(Some(add)).unwrap();
        graph.terminate(exit, ret).unwrap();

        let liveness = graph.perform_liveness_analysis();
        // `add` is defined in entry and consumed in exit.
        assert!(liveness.is_live_out_of(entry, add));
        assert!(liveness.is_live_into(exit, add));
        // The constant is consumed inside entry only.
        assert!(!liveness.is_live_out_of(entry, c));
        assert!(liveness.is_live_into(entry, c));
    }

    #[test]
    fn locally_consumed_value_is_not_live_out() {
        let mut graph = Graph::new();
        let entry = graph.create_basic_block("entry");
        graph.set_entry_block(entry);

        let c = graph.create_constant(ConstValue::Int32(2));
        let neg = graph.create_node(Opcode::Arith(ArithOp::Neg), IrType::Any);
        graph.add_input(neg, c).unwrap();
        graph.append_instruction(entry, neg).unwrap();
        let ret = graph.create_return(Some(neg)).unwrap();
        graph.terminate(entry, ret).unwrap();

        let liveness = graph.perform_liveness_analysis();
        assert!(liveness.live_out(entry).is_empty());
        // `neg` is defined before its use in the same block.
        assert!(!liveness.is_live_into(entry, neg));
    }

    #[test]
    fn loop_keeps_phi_inputs_live() {
        // entry -> header -> body -> header; header -> exit
        let mut graph = Graph::new();
        let entry = graph.create_basic_block("entry");
        let header = graph.create_basic_block("header");
        let body = graph.create_basic_block("body");
        let exit = graph.create_basic_block("exit");
        graph.set_entry_block(entry);
        graph.add_successor(entry, header).unwrap();
        graph.add_successor(header, body).unwrap();
        graph.add_successor(body, header).unwrap();
        graph.add_successor(header, exit).unwrap();

        let init = graph.create_constant(ConstValue::Int32(0));
        let one = graph.create_constant(ConstValue::Int32(1));
        let phi = graph.create_phi(IrType::Tagged(ValueTag::Int32));
        graph.append_instruction(header, phi).unwrap();
        let next = graph
            .create_binary_op(
                Opcode::Arith(ArithOp::Add),
                phi,
                one,
                IrType::Tagged(ValueTag::Int32),
            )
            .unwrap();
        graph.append_instruction(body, next).unwrap();
        graph.add_input(phi, init).unwrap();
        graph.add_input(phi, next).unwrap();

        let liveness = graph.perform_liveness_analysis();
        // The updated value flows around the back edge into the header.
        assert!(liveness.is_live_into(header, next) || liveness.is_live_out_of(body, next));
        // The phi is consumed in the body.
        assert!(liveness.is_live_into(body, phi));
    }
}
