//! Back-edge detection, natural-loop discovery, loop invariants, and
//! induction variables.
//!
//! A back edge is a CFG edge `u -> v` where `v` dominates `u`. Each group
//! of back edges sharing a header is folded into one natural loop before
//! nesting is computed, so two back edges to the same header never produce
//! sibling loops with identical bodies. Irreducible control flow (a "loop"
//! entered other than through its header) produces no back edge under the
//! dominator criterion and is conservatively left unmarked.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::GraphError;
use crate::graph::Graph;
use crate::id::{BlockId, NodeId};
use crate::opcode::{ArithOp, ConstValue, Opcode};

/// Direction of a basic induction variable's per-iteration update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IvDirection {
    Increasing,
    Decreasing,
    Unknown,
}

/// One induction variable: a header phi updated by an affine step (basic),
/// or an arithmetic combination of a basic IV and invariants (derived).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InductionVariable {
    /// The IV node: a phi for basic IVs, an arithmetic node for derived.
    pub node: NodeId,
    pub is_basic: bool,
    /// The basic IV a derived IV builds on.
    pub base: Option<NodeId>,
    /// The loop-entry value of a basic IV.
    pub initial_value: Option<NodeId>,
    /// The step operand of the update (basic) or the invariant operand
    /// (derived).
    pub step: Option<NodeId>,
    /// Known only for basic IVs with a constant step.
    pub direction: IvDirection,
}

/// One natural loop.
#[derive(Debug, Clone)]
pub struct NaturalLoop {
    pub header: BlockId,
    /// Body blocks including the header, in discovery order.
    pub body: Vec<BlockId>,
    /// All `(tail, header)` back edges folded into this loop.
    pub back_edges: Vec<(BlockId, BlockId)>,
    /// Blocks outside the body reachable from inside it.
    pub exits: Vec<BlockId>,
    /// Index of the innermost enclosing loop in the forest.
    pub parent: Option<usize>,
    /// Indices of directly nested loops.
    pub children: Vec<usize>,
    /// 1 for outermost loops, +1 per nesting level.
    pub depth: u32,
    /// Loop-invariant nodes, hoistable to a pre-header.
    pub invariants: Vec<NodeId>,
    pub induction_variables: Vec<InductionVariable>,
}

impl NaturalLoop {
    pub fn contains(&self, block: BlockId) -> bool {
        self.body.contains(&block)
    }
}

/// All natural loops of a graph with their nesting links.
#[derive(Debug, Clone, Default)]
pub struct LoopForest {
    pub loops: Vec<NaturalLoop>,
}

impl LoopForest {
    pub fn is_empty(&self) -> bool {
        self.loops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.loops.len()
    }

    /// The innermost loop containing `block`, if any.
    pub fn innermost_containing(&self, block: BlockId) -> Option<&NaturalLoop> {
        self.loops
            .iter()
            .filter(|l| l.contains(block))
            .max_by_key(|l| l.depth)
    }
}

impl Graph {
    /// Finds every back edge `u -> v` (where `v` dominates `u`) among the
    /// reachable blocks. Call [`compute_dominators`](Graph::compute_dominators)
    /// first.
    pub fn detect_back_edges(&self) -> Vec<(BlockId, BlockId)> {
        let mut edges = Vec::new();
        for u in self.reachable_blocks() {
            let Some(block) = self.block(u) else { continue };
            for &v in block.successors() {
                if self.dominates(v, u) {
                    edges.push((u, v));
                }
            }
        }
        edges
    }

    /// Discovers natural loops: computes dominators, folds back edges by
    /// header, floods loop bodies backward, computes exits, nesting, depth,
    /// invariants, and induction variables, and annotates blocks with
    /// `loop_header` / `loop_depth`.
    pub fn detect_natural_loops(&mut self) -> Result<LoopForest, GraphError> {
        self.compute_dominators()?;

        for id in self.block_ids() {
            if let Some(block) = self.block_mut(id) {
                block.loop_header = false;
                block.loop_depth = 0;
            }
        }

        // Fold back edges by header.
        let mut headers: Vec<BlockId> = Vec::new();
        let mut grouped: Vec<Vec<BlockId>> = Vec::new();
        for (tail, header) in self.detect_back_edges() {
            match headers.iter().position(|&h| h == header) {
                Some(pos) => grouped[pos].push(tail),
                None => {
                    headers.push(header);
                    grouped.push(vec![tail]);
                }
            }
        }

        let mut loops = Vec::with_capacity(headers.len());
        for (header, tails) in headers.into_iter().zip(grouped) {
            let mut body = vec![header];
            let mut in_body: HashSet<BlockId> = HashSet::from([header]);
            let mut stack: Vec<BlockId> = Vec::new();
            for &tail in &tails {
                if in_body.insert(tail) {
                    body.push(tail);
                    stack.push(tail);
                }
            }
            // Flood backward through predecessors; the header bounds the
            // walk, keeping the body inside its dominator subtree.
            // Predecessors the dominator analysis could not reach stay out.
            while let Some(block) = stack.pop() {
                let preds: Vec<BlockId> = self
                    .block(block)
                    .map(|b| b.predecessors().to_vec())
                    .unwrap_or_default();
                for pred in preds {
                    let reachable = self.block(pred).is_some_and(|b| !b.unreachable);
                    if reachable && in_body.insert(pred) {
                        body.push(pred);
                        stack.push(pred);
                    }
                }
            }

            let mut exits = Vec::new();
            for &block in &body {
                let Some(b) = self.block(block) else { continue };
                for &succ in b.successors() {
                    if !in_body.contains(&succ) && !exits.contains(&succ) {
                        exits.push(succ);
                    }
                }
            }

            loops.push(NaturalLoop {
                header,
                body,
                back_edges: tails.into_iter().map(|t| (t, header)).collect(),
                exits,
                parent: None,
                children: Vec::new(),
                depth: 1,
                invariants: Vec::new(),
                induction_variables: Vec::new(),
            });
        }

        // Nesting: the smaller body set is inner. For each loop the parent
        // is the smallest proper superset.
        for i in 0..loops.len() {
            let mut parent: Option<usize> = None;
            for j in 0..loops.len() {
                if i == j || loops[j].body.len() <= loops[i].body.len() {
                    continue;
                }
                let contains_all = loops[i]
                    .body
                    .iter()
                    .all(|block| loops[j].body.contains(block));
                if contains_all {
                    parent = match parent {
                        Some(p) if loops[p].body.len() <= loops[j].body.len() => Some(p),
                        _ => Some(j),
                    };
                }
            }
            loops[i].parent = parent;
        }
        for i in 0..loops.len() {
            if let Some(p) = loops[i].parent {
                loops[p].children.push(i);
            }
        }
        // Depths: walk parent chains (forest is acyclic).
        for i in 0..loops.len() {
            let mut depth = 1;
            let mut cursor = loops[i].parent;
            while let Some(p) = cursor {
                depth += 1;
                cursor = loops[p].parent;
            }
            loops[i].depth = depth;
        }

        // Block annotations: header flag and innermost depth.
        for l in &loops {
            if let Some(block) = self.block_mut(l.header) {
                block.loop_header = true;
            }
            for &member in &l.body {
                if let Some(block) = self.block_mut(member) {
                    block.loop_depth = block.loop_depth.max(l.depth);
                }
            }
        }

        // Invariants and induction variables per loop.
        for l in &mut loops {
            l.invariants = self.find_loop_invariants_in(&l.body);
            l.induction_variables = self.find_ivs(l.header, &l.body, &l.invariants);
        }

        Ok(LoopForest { loops })
    }

    /// Loop-invariant nodes of a loop: pure computations whose inputs are
    /// all defined outside the body or themselves invariant (fixed point).
    pub fn find_loop_invariants(&self, l: &NaturalLoop) -> Vec<NodeId> {
        self.find_loop_invariants_in(&l.body)
    }

    fn find_loop_invariants_in(&self, body: &[BlockId]) -> Vec<NodeId> {
        let body_set: HashSet<BlockId> = body.iter().copied().collect();
        let in_loop = |node: NodeId| -> bool {
            self.node(node)
                .and_then(|n| n.block)
                .is_some_and(|b| body_set.contains(&b))
        };

        let mut invariant: HashSet<NodeId> = HashSet::new();
        let mut changed = true;
        while changed {
            changed = false;
            for &block in body {
                let Some(b) = self.block(block) else { continue };
                for &id in b.instructions() {
                    if invariant.contains(&id) {
                        continue;
                    }
                    let Some(node) = self.node(id) else { continue };
                    if !Self::is_hoistable(&node.opcode) {
                        continue;
                    }
                    let all_stable = node
                        .inputs()
                        .iter()
                        .all(|&input| !in_loop(input) || invariant.contains(&input));
                    if all_stable {
                        invariant.insert(id);
                        changed = true;
                    }
                }
            }
        }

        // Deterministic order: body blocks, instruction order.
        let mut result = Vec::with_capacity(invariant.len());
        for &block in body {
            let Some(b) = self.block(block) else { continue };
            for &id in b.instructions() {
                if invariant.contains(&id) {
                    result.push(id);
                }
            }
        }
        result
    }

    /// Computations eligible for invariant hoisting: pure, and not tied to
    /// a control-flow position (phis, loop markers, checkpoints, metadata).
    fn is_hoistable(opcode: &Opcode) -> bool {
        opcode.is_pure()
            && !matches!(
                opcode,
                Opcode::Phi
                    | Opcode::Loop(_)
                    | Opcode::Meta(_)
                    | Opcode::Checkpoint
                    | Opcode::OsrEntry
                    | Opcode::OsrExit
            )
    }

    /// Induction variables of a loop: basic IVs from header phis, derived
    /// IVs from arithmetic over them.
    pub fn find_induction_variables(&self, l: &NaturalLoop) -> Vec<InductionVariable> {
        self.find_ivs(l.header, &l.body, &l.invariants)
    }

    fn find_ivs(
        &self,
        header: BlockId,
        body: &[BlockId],
        invariants: &[NodeId],
    ) -> Vec<InductionVariable> {
        let body_set: HashSet<BlockId> = body.iter().copied().collect();
        let in_loop = |node: NodeId| -> bool {
            self.node(node)
                .and_then(|n| n.block)
                .is_some_and(|b| body_set.contains(&b))
        };

        let mut ivs: Vec<InductionVariable> = Vec::new();

        // Basic IVs: header phis with one incoming from outside the loop
        // and one from inside.
        for phi in self.phis_in(header) {
            let Some(node) = self.node(phi) else { continue };
            if node.inputs().len() != 2 {
                continue;
            }
            let (a, b) = (node.inputs()[0], node.inputs()[1]);
            let (initial, update) = match (in_loop(a), in_loop(b)) {
                (false, true) => (a, b),
                (true, false) => (b, a),
                _ => continue,
            };

            let mut step = None;
            let mut direction = IvDirection::Unknown;
            if let Some(update_node) = self.node(update) {
                if let Opcode::Arith(op @ (ArithOp::Add | ArithOp::Sub)) = update_node.opcode {
                    if update_node.inputs().len() == 2 {
                        let (x, y) = (update_node.inputs()[0], update_node.inputs()[1]);
                        let other = if x == phi {
                            Some(y)
                        } else if y == phi {
                            Some(x)
                        } else {
                            None
                        };
                        if let Some(other) = other {
                            step = Some(other);
                            direction = self.step_direction(op, other);
                        }
                    }
                }
            }

            ivs.push(InductionVariable {
                node: phi,
                is_basic: true,
                base: None,
                initial_value: Some(initial),
                step,
                direction,
            });
        }

        // Derived IVs: body arithmetic combining one basic IV with a value
        // that is invariant or defined outside the loop.
        let basic: HashSet<NodeId> = ivs.iter().map(|iv| iv.node).collect();
        let invariant_set: HashSet<NodeId> = invariants.iter().copied().collect();
        for &block in body {
            let Some(b) = self.block(block) else { continue };
            for &id in b.instructions() {
                let Some(node) = self.node(id) else { continue };
                let Opcode::Arith(ArithOp::Add | ArithOp::Sub | ArithOp::Mul) = node.opcode
                else {
                    continue;
                };
                if node.inputs().len() != 2 {
                    continue;
                }
                let (x, y) = (node.inputs()[0], node.inputs()[1]);
                let stable =
                    |n: NodeId| !in_loop(n) || invariant_set.contains(&n);
                let base = match (basic.contains(&x), basic.contains(&y)) {
                    (true, false) if stable(y) => Some((x, y)),
                    (false, true) if stable(x) => Some((y, x)),
                    _ => None,
                };
                if let Some((base, other)) = base {
                    ivs.push(InductionVariable {
                        node: id,
                        is_basic: false,
                        base: Some(base),
                        initial_value: None,
                        step: Some(other),
                        direction: IvDirection::Unknown,
                    });
                }
            }
        }

        ivs
    }

    fn step_direction(&self, op: ArithOp, step: NodeId) -> IvDirection {
        let Some(node) = self.node(step) else {
            return IvDirection::Unknown;
        };
        let sign = match node.opcode.constant_value() {
            Some(ConstValue::Int32(v)) => (*v).signum() as i64,
            Some(ConstValue::Float64(v)) => {
                if *v > 0.0 {
                    1
                } else if *v < 0.0 {
                    -1
                } else {
                    0
                }
            }
            _ => return IvDirection::Unknown,
        };
        match (op, sign) {
            (ArithOp::Add, 1) | (ArithOp::Sub, -1) => IvDirection::Increasing,
            (ArithOp::Add, -1) | (ArithOp::Sub, 1) => IvDirection::Decreasing,
            _ => IvDirection::Unknown,
        }
    }
}

/// Enumerates all induction variables of the graph across a loop forest.
pub fn all_induction_variables(graph: &Graph, forest: &LoopForest) -> Vec<InductionVariable> {
    forest
        .loops
        .iter()
        .flat_map(|l| graph.find_induction_variables(l))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::IrType;
    use nebula_value::ValueTag;

    fn build_cfg(edges: &[(usize, usize)], blocks: usize) -> (Graph, Vec<BlockId>) {
        let mut graph = Graph::new();
        let ids: Vec<BlockId> = (0..blocks)
            .map(|i| graph.create_basic_block(&format!("b{i}")))
            .collect();
        graph.set_entry_block(ids[0]);
        for &(from, to) in edges {
            graph.add_successor(ids[from], ids[to]).unwrap();
        }
        (graph, ids)
    }

    #[test]
    fn back_edge_detection() {
        // A->B, B->C, C->B, B->D
        let (mut graph, ids) = build_cfg(&[(0, 1), (1, 2), (2, 1), (1, 3)], 4);
        graph.compute_dominators().unwrap();

        assert_eq!(graph.detect_back_edges(), vec![(ids[2], ids[1])]);
    }

    #[test]
    fn forward_edges_are_not_back_edges() {
        let (mut graph, _) = build_cfg(&[(0, 1), (0, 2), (1, 3), (2, 3)], 4);
        graph.compute_dominators().unwrap();
        assert!(graph.detect_back_edges().is_empty());
    }

    #[test]
    fn single_loop_discovery() {
        // A->B, B->C (true), B->D (false), C->B
        let (mut graph, ids) = build_cfg(&[(0, 1), (1, 2), (1, 3), (2, 1)], 4);
        let forest = graph.detect_natural_loops().unwrap();

        assert_eq!(forest.len(), 1);
        let l = &forest.loops[0];
        assert_eq!(l.header, ids[1]);
        let mut body = l.body.clone();
        body.sort_by_key(|b| b.0);
        assert_eq!(body, vec![ids[1], ids[2]]);
        assert_eq!(l.back_edges, vec![(ids[2], ids[1])]);
        assert_eq!(l.exits, vec![ids[3]]);
        assert_eq!(l.depth, 1);
        assert!(l.parent.is_none());

        assert!(graph.block(ids[1]).unwrap().loop_header);
        assert_eq!(graph.block(ids[2]).unwrap().loop_depth, 1);
        assert_eq!(graph.block(ids[3]).unwrap().loop_depth, 0);
    }

    #[test]
    fn nested_loops() {
        // outer: B..E with back edge E->B; inner: C..D with back edge D->C
        // A->B, B->C, C->D, D->C, D->E, E->B, B->F
        let (mut graph, ids) =
            build_cfg(&[(0, 1), (1, 2), (2, 3), (3, 2), (3, 4), (4, 1), (1, 5)], 6);
        let forest = graph.detect_natural_loops().unwrap();

        assert_eq!(forest.len(), 2);
        let outer = forest
            .loops
            .iter()
            .position(|l| l.header == ids[1])
            .unwrap();
        let inner = forest
            .loops
            .iter()
            .position(|l| l.header == ids[2])
            .unwrap();

        assert_eq!(forest.loops[inner].parent, Some(outer));
        assert_eq!(forest.loops[outer].children, vec![inner]);
        assert_eq!(forest.loops[outer].depth, 1);
        assert_eq!(forest.loops[inner].depth, 2);

        // Inner blocks carry the innermost depth.
        assert_eq!(graph.block(ids[3]).unwrap().loop_depth, 2);
        assert_eq!(graph.block(ids[4]).unwrap().loop_depth, 1);

        assert_eq!(
            forest.innermost_containing(ids[3]).unwrap().header,
            ids[2]
        );
    }

    #[test]
    fn two_back_edges_one_header_fold_into_one_loop() {
        // A->B, B->C, C->B, B->D, D->B, B->E
        let (mut graph, ids) =
            build_cfg(&[(0, 1), (1, 2), (2, 1), (1, 3), (3, 1), (1, 4)], 5);
        let forest = graph.detect_natural_loops().unwrap();

        assert_eq!(forest.len(), 1);
        let l = &forest.loops[0];
        assert_eq!(l.header, ids[1]);
        assert_eq!(l.back_edges.len(), 2);
        let mut body = l.body.clone();
        body.sort_by_key(|b| b.0);
        assert_eq!(body, vec![ids[1], ids[2], ids[3]]);
    }

    #[test]
    fn loop_invariant_discovery() {
        // A -> header -> body -> header; body -> exit.
        let (mut graph, ids) = build_cfg(&[(0, 1), (1, 2), (2, 1), (1, 3)], 4);

        // In the body: an invariant add of two constants, and a store that
        // must not be hoisted.
        let c1 = graph.create_constant(ConstValue::Int32(4));
        let c2 = graph.create_constant(ConstValue::Int32(5));
        let add = graph
            .create_binary_op(
                Opcode::Arith(ArithOp::Add),
                c1,
                c2,
                IrType::Tagged(ValueTag::Int32),
            )
            .unwrap();
        graph.append_instruction(ids[2], add).unwrap();
        let store = graph.create_node(Opcode::Memory(crate::opcode::MemoryOp::StoreLocal), IrType::Void);
        graph.add_input(store, add).unwrap();
        graph.append_instruction(ids[2], store).unwrap();

        let forest = graph.detect_natural_loops().unwrap();
        assert_eq!(forest.loops[0].invariants, vec![add]);
    }

    #[test]
    fn dependent_invariants_reach_fixed_point() {
        let (mut graph, ids) = build_cfg(&[(0, 1), (1, 2), (2, 1), (1, 3)], 4);

        let c = graph.create_constant(ConstValue::Int32(3));
        // b depends on a; both invariant. Listed in reverse order in the
        // block so a single pass would miss `b`.
        let a = graph.create_node(Opcode::Arith(ArithOp::Neg), IrType::Any);
        graph.add_input(a, c).unwrap();
        let b = graph.create_node(Opcode::Arith(ArithOp::Neg), IrType::Any);
        graph.add_input(b, a).unwrap();
        graph.append_instruction(ids[2], b).unwrap();
        graph.append_instruction(ids[2], a).unwrap();

        let forest = graph.detect_natural_loops().unwrap();
        let invariants = &forest.loops[0].invariants;
        assert!(invariants.contains(&a));
        assert!(invariants.contains(&b));
    }

    /// Builds the canonical counting loop:
    /// entry: i0 = 0; header: i = phi(i0, next); body: next = i + 1.
    fn counting_loop() -> (Graph, Vec<BlockId>, NodeId, NodeId, NodeId) {
        let (mut graph, ids) = build_cfg(&[(0, 1), (1, 2), (2, 1), (1, 3)], 4);
        let init = graph.create_constant(ConstValue::Int32(0));
        let one = graph.create_constant(ConstValue::Int32(1));

        let phi = graph.create_phi(IrType::Tagged(ValueTag::Int32));
        graph.append_instruction(ids[1], phi).unwrap();

        let next = graph
            .create_binary_op(
                Opcode::Arith(ArithOp::Add),
                phi,
                one,
                IrType::Tagged(ValueTag::Int32),
            )
            .unwrap();
        graph.append_instruction(ids[2], next).unwrap();

        graph.add_input(phi, init).unwrap();
        graph.add_input(phi, next).unwrap();
        (graph, ids, phi, next, init)
    }

    #[test]
    fn basic_induction_variable() {
        let (mut graph, _ids, phi, next, init) = counting_loop();
        let forest = graph.detect_natural_loops().unwrap();

        let ivs = &forest.loops[0].induction_variables;
        let basic = ivs.iter().find(|iv| iv.is_basic).unwrap();
        assert_eq!(basic.node, phi);
        assert_eq!(basic.initial_value, Some(init));
        assert!(basic.step.is_some());
        assert_eq!(basic.direction, IvDirection::Increasing);

        // The update node itself is a derived IV (phi + invariant one).
        let derived = ivs.iter().find(|iv| !iv.is_basic).unwrap();
        assert_eq!(derived.node, next);
        assert_eq!(derived.base, Some(phi));
    }

    #[test]
    fn decreasing_induction_variable() {
        let (mut graph, ids) = build_cfg(&[(0, 1), (1, 2), (2, 1), (1, 3)], 4);
        let init = graph.create_constant(ConstValue::Int32(100));
        let step = graph.create_constant(ConstValue::Int32(-2));

        let phi = graph.create_phi(IrType::Tagged(ValueTag::Int32));
        graph.append_instruction(ids[1], phi).unwrap();
        let next = graph
            .create_binary_op(
                Opcode::Arith(ArithOp::Add),
                phi,
                step,
                IrType::Tagged(ValueTag::Int32),
            )
            .unwrap();
        graph.append_instruction(ids[2], next).unwrap();
        graph.add_input(phi, init).unwrap();
        graph.add_input(phi, next).unwrap();

        let forest = graph.detect_natural_loops().unwrap();
        let basic = forest.loops[0]
            .induction_variables
            .iter()
            .find(|iv| iv.is_basic)
            .unwrap();
        assert_eq!(basic.direction, IvDirection::Decreasing);
    }

    #[test]
    fn all_induction_variables_spans_loops() {
        let (mut graph, _, _, _, _) = counting_loop();
        let forest = graph.detect_natural_loops().unwrap();
        let all = all_induction_variables(&graph, &forest);
        assert_eq!(all.len(), forest.loops[0].induction_variables.len());
    }

    #[test]
    fn acyclic_graph_has_no_loops() {
        let (mut graph, _) = build_cfg(&[(0, 1), (0, 2), (1, 3), (2, 3)], 4);
        let forest = graph.detect_natural_loops().unwrap();
        assert!(forest.is_empty());
    }
}
