//! The IR graph: arena-owned nodes and basic blocks.
//!
//! The graph is the sole owner of every node and block. Entities are
//! addressed by index handles ([`NodeId`], [`BlockId`]); removal leaves a
//! vacant slot so ids are never reused. Use-def edges are bidirectional
//! and both directions are maintained at every mutation site: appending an
//! input also records the user edge, removing a node detaches every edge
//! first.
//!
//! One compile job owns one graph from construction to emission; there is
//! no sharing between graphs (single-writer discipline).

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use nebula_profiler::{FunctionTypeSummary, TypeInfo};
use nebula_value::ValueTag;

use crate::block::BasicBlock;
use crate::error::GraphError;
use crate::flags::OptFlag;
use crate::id::{BlockId, NodeId};
use crate::node::Node;
use crate::opcode::{ConstValue, Opcode};
use crate::types::IrType;

/// The profile slice a compile job snapshots for the function it is
/// compiling, attached to the graph for the optimizer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphTypeProfile {
    /// Per-parameter observations, indexed by parameter position.
    pub params: Vec<TypeInfo>,
    /// The aggregate tiering verdict at snapshot time.
    pub summary: Option<FunctionTypeSummary>,
}

/// A function's IR: nodes, blocks, and analysis state.
#[derive(Debug, Serialize, Deserialize)]
pub struct Graph {
    /// Node arena; vacated slots stay `None` so ids are never reused.
    nodes: Vec<Option<Node>>,
    /// Block arena.
    blocks: Vec<Option<BasicBlock>>,
    entry: Option<BlockId>,
    parameters: Vec<NodeId>,
    variables: Vec<NodeId>,
    applied: OptFlag,
    type_profile: Option<GraphTypeProfile>,
}

impl Graph {
    pub fn new() -> Self {
        Graph {
            nodes: Vec::new(),
            blocks: Vec::new(),
            entry: None,
            parameters: Vec::new(),
            variables: Vec::new(),
            applied: OptFlag::NONE,
            type_profile: None,
        }
    }

    // -----------------------------------------------------------------------
    // Node factories
    // -----------------------------------------------------------------------

    /// Allocates and registers a node; the id is monotonic.
    pub fn create_node(&mut self, opcode: Opcode, ty: IrType) -> NodeId {
        let id = NodeId(self.nodes.len() as u64);
        self.nodes.push(Some(Node::new(id, opcode, ty)));
        id
    }

    /// Creates a constant node. The annotation is derived from the payload.
    pub fn create_constant(&mut self, value: ConstValue) -> NodeId {
        let ty = match &value {
            ConstValue::Undefined => IrType::Tagged(ValueTag::Undefined),
            ConstValue::Null => IrType::Tagged(ValueTag::Null),
            ConstValue::Boolean(_) => IrType::Tagged(ValueTag::Boolean),
            ConstValue::Int32(_) => IrType::Tagged(ValueTag::Int32),
            ConstValue::Float64(_) => IrType::Tagged(ValueTag::Float64),
            ConstValue::String(_) => IrType::Tagged(ValueTag::String),
        };
        self.create_node(Opcode::Constant(value), ty)
    }

    /// Creates a variable node and records it in the variable list.
    pub fn create_variable(&mut self, index: u32, name: &str, ty: IrType) -> NodeId {
        let id = self.create_node(
            Opcode::Variable {
                index,
                name: name.to_string(),
            },
            ty,
        );
        self.variables.push(id);
        id
    }

    /// Creates a parameter node and records it in the parameter list.
    pub fn create_parameter(&mut self, index: u32, name: &str, ty: IrType) -> NodeId {
        let id = self.create_node(
            Opcode::Parameter {
                index,
                name: name.to_string(),
            },
            ty,
        );
        self.parameters.push(id);
        id
    }

    /// Creates a phi node (inputs added per predecessor later).
    pub fn create_phi(&mut self, ty: IrType) -> NodeId {
        self.create_node(Opcode::Phi, ty)
    }

    /// Creates a two-target branch on `condition`.
    pub fn create_branch(
        &mut self,
        condition: NodeId,
        true_block: BlockId,
        false_block: BlockId,
    ) -> Result<NodeId, GraphError> {
        let id = self.create_node(
            Opcode::Branch {
                true_block,
                false_block,
            },
            IrType::Void,
        );
        self.add_input(id, condition)?;
        Ok(id)
    }

    /// Creates an unconditional jump.
    pub fn create_jump(&mut self, target: BlockId) -> NodeId {
        self.create_node(Opcode::Jump { target }, IrType::Void)
    }

    /// Creates a return, with or without a value.
    pub fn create_return(&mut self, value: Option<NodeId>) -> Result<NodeId, GraphError> {
        let id = self.create_node(Opcode::Return, IrType::Void);
        if let Some(value) = value {
            self.add_input(id, value)?;
        }
        Ok(id)
    }

    /// Creates a two-input computation node.
    pub fn create_binary_op(
        &mut self,
        opcode: Opcode,
        left: NodeId,
        right: NodeId,
        ty: IrType,
    ) -> Result<NodeId, GraphError> {
        let id = self.create_node(opcode, ty);
        self.add_input(id, left)?;
        self.add_input(id, right)?;
        Ok(id)
    }

    /// Creates a basic block.
    pub fn create_basic_block(&mut self, label: &str) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(Some(BasicBlock::new(id, label.to_string())));
        id
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index()).and_then(|slot| slot.as_ref())
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.index()).and_then(|slot| slot.as_mut())
    }

    pub(crate) fn try_node(&self, id: NodeId) -> Result<&Node, GraphError> {
        self.node(id).ok_or(GraphError::NodeNotFound { id })
    }

    pub fn block(&self, id: BlockId) -> Option<&BasicBlock> {
        self.blocks.get(id.index()).and_then(|slot| slot.as_ref())
    }

    pub fn block_mut(&mut self, id: BlockId) -> Option<&mut BasicBlock> {
        self.blocks.get_mut(id.index()).and_then(|slot| slot.as_mut())
    }

    pub(crate) fn try_block(&self, id: BlockId) -> Result<&BasicBlock, GraphError> {
        self.block(id).ok_or(GraphError::BlockNotFound { id })
    }

    /// Live nodes, in id order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter_map(|slot| slot.as_ref())
    }

    /// Live blocks, in id order.
    pub fn blocks(&self) -> impl Iterator<Item = &BasicBlock> {
        self.blocks.iter().filter_map(|slot| slot.as_ref())
    }

    pub fn block_ids(&self) -> Vec<BlockId> {
        self.blocks().map(|b| b.id).collect()
    }

    pub fn node_count(&self) -> usize {
        self.nodes().count()
    }

    pub fn block_count(&self) -> usize {
        self.blocks().count()
    }

    pub fn entry_block(&self) -> Option<BlockId> {
        self.entry
    }

    pub fn set_entry_block(&mut self, block: BlockId) {
        self.entry = Some(block);
    }

    pub fn parameters(&self) -> &[NodeId] {
        &self.parameters
    }

    pub fn variables(&self) -> &[NodeId] {
        &self.variables
    }

    // -----------------------------------------------------------------------
    // Applied optimizations & profile attachment
    // -----------------------------------------------------------------------

    pub fn applied_optimizations(&self) -> OptFlag {
        self.applied
    }

    pub fn add_applied_optimization(&mut self, flag: OptFlag) {
        self.applied.insert(flag);
    }

    pub fn has_applied_optimization(&self, flag: OptFlag) -> bool {
        self.applied.contains(flag)
    }

    pub fn set_type_profile(&mut self, profile: GraphTypeProfile) {
        self.type_profile = Some(profile);
    }

    pub fn type_profile(&self) -> Option<&GraphTypeProfile> {
        self.type_profile.as_ref()
    }

    // -----------------------------------------------------------------------
    // Use-def edge mutations
    // -----------------------------------------------------------------------

    /// Appends `input` to `node`'s input list and records the dual user
    /// edge (user lists stay duplicate-free).
    pub fn add_input(&mut self, node: NodeId, input: NodeId) -> Result<(), GraphError> {
        self.try_node(node)?;
        self.try_node(input)?;

        if let Some(n) = self.node_mut(node) {
            n.inputs.push(input);
        }
        if let Some(def) = self.node_mut(input) {
            if !def.users.contains(&node) {
                def.users.push(node);
            }
        }
        Ok(())
    }

    /// Removes one occurrence of `input` from `node`'s inputs. A no-op if
    /// not present; the user edge is dropped only when no occurrence
    /// remains.
    pub fn remove_input(&mut self, node: NodeId, input: NodeId) -> Result<(), GraphError> {
        self.try_node(node)?;

        let remaining = {
            let Some(n) = self.node_mut(node) else {
                return Ok(());
            };
            match n.inputs.iter().position(|&i| i == input) {
                Some(pos) => {
                    n.inputs.remove(pos);
                    n.inputs.iter().any(|&i| i == input)
                }
                None => return Ok(()),
            }
        };
        if !remaining {
            if let Some(def) = self.node_mut(input) {
                def.users.retain(|&u| u != node);
            }
        }
        Ok(())
    }

    /// Substitutes every occurrence of `old` in `node`'s inputs with `new`,
    /// fixing both user lists.
    pub fn replace_input(
        &mut self,
        node: NodeId,
        old: NodeId,
        new: NodeId,
    ) -> Result<(), GraphError> {
        self.try_node(node)?;
        self.try_node(new)?;
        if old == new {
            return Ok(());
        }

        let mut replaced = false;
        if let Some(n) = self.node_mut(node) {
            for slot in n.inputs.iter_mut() {
                if *slot == old {
                    *slot = new;
                    replaced = true;
                }
            }
        }
        if !replaced {
            return Ok(());
        }
        if let Some(def) = self.node_mut(old) {
            def.users.retain(|&u| u != node);
        }
        if let Some(def) = self.node_mut(new) {
            if !def.users.contains(&node) {
                def.users.push(node);
            }
        }
        Ok(())
    }

    /// Re-points every user of `old` to `new`. `old` keeps its own inputs
    /// and can be removed afterwards.
    pub fn replace_all_uses_with(&mut self, old: NodeId, new: NodeId) -> Result<(), GraphError> {
        self.try_node(old)?;
        self.try_node(new)?;
        if old == new {
            return Ok(());
        }

        let users: Vec<NodeId> = self.try_node(old)?.users.to_vec();
        for user in users {
            self.replace_input(user, old, new)?;
        }
        Ok(())
    }

    /// Detaches a node from every input, user, and its block, then vacates
    /// its slot. Safe when its neighbors are being removed in the same
    /// sweep: missing slots are skipped.
    pub fn remove_node(&mut self, id: NodeId) -> Result<(), GraphError> {
        let Some(slot) = self.nodes.get_mut(id.index()) else {
            return Err(GraphError::NodeNotFound { id });
        };
        let Some(node) = slot.take() else {
            return Err(GraphError::NodeNotFound { id });
        };

        let mut seen_inputs: SmallVec<[NodeId; 2]> = SmallVec::new();
        for input in node.inputs {
            if seen_inputs.contains(&input) {
                continue;
            }
            seen_inputs.push(input);
            if let Some(def) = self.node_mut(input) {
                def.users.retain(|&u| u != id);
            }
        }
        for user in node.users {
            if let Some(u) = self.node_mut(user) {
                u.inputs.retain(|i| *i != id);
            }
        }
        if let Some(block) = node.block {
            if let Some(b) = self.block_mut(block) {
                b.instructions.retain(|&i| i != id);
            }
        }
        self.parameters.retain(|&p| p != id);
        self.variables.retain(|&v| v != id);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Block mutations
    // -----------------------------------------------------------------------

    /// Appends an instruction node to a block, setting its back-pointer.
    pub fn append_instruction(&mut self, block: BlockId, node: NodeId) -> Result<(), GraphError> {
        self.try_block(block)?;
        let n = self.node_mut(node).ok_or(GraphError::NodeNotFound { id: node })?;
        if let Some(existing) = n.block {
            return Err(GraphError::InvalidStructure {
                reason: format!("node {node} already belongs to block {existing}"),
            });
        }
        n.block = Some(block);
        if let Some(b) = self.block_mut(block) {
            b.instructions.push(node);
        }
        Ok(())
    }

    /// Inserts an instruction at the head of a block, ahead of existing
    /// instructions. Used when a speculation guard must precede every use.
    pub fn prepend_instruction(&mut self, block: BlockId, node: NodeId) -> Result<(), GraphError> {
        self.try_block(block)?;
        let n = self.node_mut(node).ok_or(GraphError::NodeNotFound { id: node })?;
        if let Some(existing) = n.block {
            return Err(GraphError::InvalidStructure {
                reason: format!("node {node} already belongs to block {existing}"),
            });
        }
        n.block = Some(block);
        if let Some(b) = self.block_mut(block) {
            b.instructions.insert(0, node);
        }
        Ok(())
    }

    /// Inserts an instruction directly before another instruction of the
    /// same block. Used by inlining to splice callee bodies at call sites.
    pub fn insert_before(
        &mut self,
        block: BlockId,
        node: NodeId,
        before: NodeId,
    ) -> Result<(), GraphError> {
        let position = self
            .try_block(block)?
            .instructions
            .iter()
            .position(|&i| i == before)
            .ok_or(GraphError::NodeNotFound { id: before })?;
        let n = self.node_mut(node).ok_or(GraphError::NodeNotFound { id: node })?;
        if let Some(existing) = n.block {
            return Err(GraphError::InvalidStructure {
                reason: format!("node {node} already belongs to block {existing}"),
            });
        }
        n.block = Some(block);
        if let Some(b) = self.block_mut(block) {
            b.instructions.insert(position, node);
        }
        Ok(())
    }

    /// Inserts an instruction just before the block's terminator, or at the
    /// end when the block has none. Used by code motion.
    pub fn insert_before_terminator(
        &mut self,
        block: BlockId,
        node: NodeId,
    ) -> Result<(), GraphError> {
        self.try_block(block)?;
        let n = self.node_mut(node).ok_or(GraphError::NodeNotFound { id: node })?;
        if let Some(existing) = n.block {
            return Err(GraphError::InvalidStructure {
                reason: format!("node {node} already belongs to block {existing}"),
            });
        }
        n.block = Some(block);
        let terminator = self.terminator(block);
        if let Some(b) = self.block_mut(block) {
            match terminator {
                Some(term) => {
                    let pos = b.instructions.iter().position(|&i| i == term).unwrap_or(0);
                    b.instructions.insert(pos, node);
                }
                None => b.instructions.push(node),
            }
        }
        Ok(())
    }

    /// Detaches an instruction from its block without removing the node.
    pub fn detach_from_block(&mut self, node: NodeId) -> Result<(), GraphError> {
        let n = self.node_mut(node).ok_or(GraphError::NodeNotFound { id: node })?;
        let Some(block) = n.block.take() else {
            return Ok(());
        };
        if let Some(b) = self.block_mut(block) {
            b.instructions.retain(|&i| i != node);
        }
        Ok(())
    }

    /// Adds a CFG edge `from -> to`, recording the dual predecessor edge.
    /// Adding an existing edge is a no-op.
    pub fn add_successor(&mut self, from: BlockId, to: BlockId) -> Result<(), GraphError> {
        self.try_block(from)?;
        self.try_block(to)?;
        {
            let b = self.block_mut(from).expect("checked above");
            if b.successors.contains(&to) {
                return Ok(());
            }
            b.successors.push(to);
        }
        let b = self.block_mut(to).expect("checked above");
        b.predecessors.push(from);
        Ok(())
    }

    /// Removes the CFG edge `from -> to` in both directions.
    pub fn remove_successor(&mut self, from: BlockId, to: BlockId) -> Result<(), GraphError> {
        self.try_block(from)?;
        self.try_block(to)?;
        if let Some(b) = self.block_mut(from) {
            b.successors.retain(|&s| s != to);
        }
        if let Some(b) = self.block_mut(to) {
            b.predecessors.retain(|&p| p != from);
        }
        Ok(())
    }

    /// Appends a terminator and wires the successor edges its opcode
    /// implies (branch targets, jump target, guard exit).
    pub fn terminate(&mut self, block: BlockId, node: NodeId) -> Result<(), GraphError> {
        let opcode = self.try_node(node)?.opcode.clone();
        if !opcode.is_control_flow() {
            return Err(GraphError::InvalidStructure {
                reason: format!("node {node} ({opcode}) is not a terminator"),
            });
        }
        self.append_instruction(block, node)?;
        match opcode {
            Opcode::Branch {
                true_block,
                false_block,
            } => {
                self.add_successor(block, true_block)?;
                self.add_successor(block, false_block)?;
            }
            Opcode::Jump { target } => self.add_successor(block, target)?,
            Opcode::Guard { exit_block } => self.add_successor(block, exit_block)?,
            _ => {}
        }
        Ok(())
    }

    /// The block's terminator: its last instruction, if control flow.
    pub fn terminator(&self, block: BlockId) -> Option<NodeId> {
        let last = self.block(block)?.last_instruction()?;
        if self.node(last)?.is_control_flow() {
            Some(last)
        } else {
            None
        }
    }

    /// Phi nodes at the head of a block.
    pub fn phis_in(&self, block: BlockId) -> Vec<NodeId> {
        match self.block(block) {
            Some(b) => b
                .instructions
                .iter()
                .copied()
                .filter(|&id| self.node(id).is_some_and(Node::is_phi))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Removes a block: its instructions are removed as nodes and its CFG
    /// edges detached. Phis in successor blocks may be left with fewer
    /// incomings; zero-incoming phis become removable dead nodes.
    pub fn remove_block(&mut self, id: BlockId) -> Result<(), GraphError> {
        let Some(slot) = self.blocks.get_mut(id.index()) else {
            return Err(GraphError::BlockNotFound { id });
        };
        let Some(block) = slot.take() else {
            return Err(GraphError::BlockNotFound { id });
        };

        for node in block.instructions {
            // The slot was vacated, so clear the back-pointer first.
            if let Some(n) = self.node_mut(node) {
                n.block = None;
            }
            let _ = self.remove_node(node);
        }
        for pred in block.predecessors {
            if let Some(p) = self.block_mut(pred) {
                p.successors.retain(|&s| s != id);
            }
        }
        for succ in block.successors {
            if let Some(s) = self.block_mut(succ) {
                s.predecessors.retain(|&p| p != id);
            }
        }
        if self.entry == Some(id) {
            self.entry = None;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Reachability
    // -----------------------------------------------------------------------

    /// Blocks reachable from the entry over successor edges, in DFS
    /// pre-order. Empty when no entry is set.
    pub fn reachable_blocks(&self) -> Vec<BlockId> {
        let Some(entry) = self.entry else {
            return Vec::new();
        };
        let mut order = Vec::new();
        let mut seen = HashSet::new();
        let mut stack = vec![entry];
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            order.push(id);
            if let Some(block) = self.block(id) {
                // Reverse keeps left-to-right successor order in the DFS.
                for &succ in block.successors.iter().rev() {
                    if !seen.contains(&succ) {
                        stack.push(succ);
                    }
                }
            }
        }
        order
    }

    // -----------------------------------------------------------------------
    // Verification
    // -----------------------------------------------------------------------

    /// Checks the structural invariants. Returns `false` on the first
    /// violation; never mutates.
    pub fn verify(&self) -> bool {
        match self.verify_detailed() {
            Ok(()) => true,
            Err(error) => {
                tracing::debug!(%error, "graph verification failed");
                false
            }
        }
    }

    /// Invariant check with a reason on failure, for diagnostics.
    pub fn verify_detailed(&self) -> Result<(), GraphError> {
        let fail = |reason: String| Err(GraphError::InvalidStructure { reason });

        // (1) Use-def duality.
        for node in self.nodes() {
            for &input in node.inputs() {
                let Some(def) = self.node(input) else {
                    return fail(format!("{} has dangling input {input}", node.id));
                };
                if !def.users.contains(&node.id) {
                    return fail(format!("{} missing user edge from {input}", node.id));
                }
            }
            for &user in node.users() {
                let Some(u) = self.node(user) else {
                    return fail(format!("{} has dangling user {user}", node.id));
                };
                if !u.inputs.contains(&node.id) {
                    return fail(format!("{user} does not use {}", node.id));
                }
            }
        }

        // (2) Block back-pointers match membership; (3) single terminator.
        for block in self.blocks() {
            for (pos, &id) in block.instructions().iter().enumerate() {
                let Some(node) = self.node(id) else {
                    return fail(format!("{} lists dead node {id}", block.id));
                };
                if node.block != Some(block.id) {
                    return fail(format!("{id} block pointer disagrees with {}", block.id));
                }
                let last = pos + 1 == block.instructions().len();
                if node.is_control_flow() && !last {
                    return fail(format!("{id} is control flow mid-block in {}", block.id));
                }
            }
            // Successor/predecessor duality.
            for &succ in block.successors() {
                let Some(s) = self.block(succ) else {
                    return fail(format!("{} has dangling successor {succ}", block.id));
                };
                if !s.predecessors().contains(&block.id) {
                    return fail(format!("{succ} missing predecessor {}", block.id));
                }
            }
            for &pred in block.predecessors() {
                let Some(p) = self.block(pred) else {
                    return fail(format!("{} has dangling predecessor {pred}", block.id));
                };
                if !p.successors().contains(&block.id) {
                    return fail(format!("{pred} missing successor {}", block.id));
                }
            }
        }
        for node in self.nodes() {
            if let Some(block) = node.block {
                let Some(b) = self.block(block) else {
                    return fail(format!("{} points at dead block {block}", node.id));
                };
                if !b.instructions().contains(&node.id) {
                    return fail(format!("{} not listed in its block {block}", node.id));
                }
            }
        }

        // (4) Entry has no predecessors; other reachable blocks have some.
        if let Some(entry) = self.entry {
            let Some(entry_block) = self.block(entry) else {
                return fail(format!("entry block {entry} is dead"));
            };
            if !entry_block.predecessors().is_empty() {
                return fail(format!("entry {entry} has predecessors"));
            }
            for id in self.reachable_blocks() {
                if id != entry && self.block(id).is_some_and(|b| b.predecessors().is_empty()) {
                    return fail(format!("reachable block {id} has no predecessors"));
                }
            }

            // (5) Dominator tree shape, when computed.
            let analyzed = self
                .reachable_blocks()
                .iter()
                .any(|&id| self.block(id).is_some_and(|b| b.dominator.is_some()));
            if analyzed {
                if entry_block.dominator.is_some() {
                    return fail("entry block has a dominator".to_string());
                }
                for id in self.reachable_blocks() {
                    if id == entry {
                        continue;
                    }
                    let mut cursor = id;
                    let mut steps = 0usize;
                    loop {
                        let Some(block) = self.block(cursor) else {
                            return fail(format!("dominator chain of {id} leaves the graph"));
                        };
                        match block.dominator {
                            Some(idom) => cursor = idom,
                            None if cursor == entry => break,
                            None => {
                                return fail(format!("dominator chain of {id} ends off-entry"));
                            }
                        }
                        steps += 1;
                        if steps > self.block_count() {
                            return fail(format!("dominator chain of {id} cycles"));
                        }
                    }
                }
            }
        }

        Ok(())
    }

    // -----------------------------------------------------------------------
    // Clone
    // -----------------------------------------------------------------------

    /// Produces a structurally isomorphic graph with fresh, compacted ids.
    pub fn clone_graph(&self) -> Graph {
        let mut node_map: Vec<Option<NodeId>> = vec![None; self.nodes.len()];
        let mut block_map: Vec<Option<BlockId>> = vec![None; self.blocks.len()];

        let mut out = Graph::new();
        for block in self.blocks() {
            let new_id = out.create_basic_block(&block.label);
            block_map[block.id.index()] = Some(new_id);
        }
        let map_block = |map: &Vec<Option<BlockId>>, id: BlockId| -> BlockId {
            map[id.index()].expect("cloned block target must be live")
        };

        for node in self.nodes() {
            // Remap block ids embedded in opcode payloads.
            let opcode = match &node.opcode {
                Opcode::Branch {
                    true_block,
                    false_block,
                } => Opcode::Branch {
                    true_block: map_block(&block_map, *true_block),
                    false_block: map_block(&block_map, *false_block),
                },
                Opcode::Jump { target } => Opcode::Jump {
                    target: map_block(&block_map, *target),
                },
                Opcode::Guard { exit_block } => Opcode::Guard {
                    exit_block: map_block(&block_map, *exit_block),
                },
                other => other.clone(),
            };
            let new_id = out.create_node(opcode, node.ty);
            node_map[node.id.index()] = Some(new_id);
            if matches!(node.opcode, Opcode::Parameter { .. }) {
                out.parameters.push(new_id);
            }
            if matches!(node.opcode, Opcode::Variable { .. }) {
                out.variables.push(new_id);
            }
        }

        // Second pass: edges and block membership.
        for node in self.nodes() {
            let new_id = node_map[node.id.index()].expect("mapped above");
            for &input in node.inputs() {
                let mapped = node_map[input.index()].expect("inputs reference live nodes");
                out.add_input(new_id, mapped).expect("both nodes exist");
            }
        }
        for block in self.blocks() {
            let new_block = map_block(&block_map, block.id);
            for &instr in block.instructions() {
                let mapped = node_map[instr.index()].expect("instructions are live nodes");
                out.append_instruction(new_block, mapped)
                    .expect("fresh node is unattached");
            }
            for &succ in block.successors() {
                out.add_successor(new_block, map_block(&block_map, succ))
                    .expect("both blocks exist");
            }
            let out_block = out.block_mut(new_block).expect("created above");
            out_block.dominator = block.dominator.map(|d| map_block(&block_map, d));
            out_block.dominated = block
                .dominated
                .iter()
                .map(|&d| map_block(&block_map, d))
                .collect();
            out_block.loop_depth = block.loop_depth;
            out_block.loop_header = block.loop_header;
            out_block.unreachable = block.unreachable;
        }

        out.entry = self.entry.map(|e| map_block(&block_map, e));
        out.applied = self.applied;
        out.type_profile = self.type_profile.clone();
        out
    }
}

impl Default for Graph {
    fn default() -> Self {
        Graph::new()
    }
}

impl fmt::Display for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "graph: {} nodes, {} blocks",
            self.node_count(),
            self.block_count()
        )?;
        for block in self.blocks() {
            let marker = if self.entry == Some(block.id) { "*" } else { "" };
            write!(f, "{}{} ({}):", marker, block.id, block.label)?;
            if !block.successors().is_empty() {
                write!(f, " ->")?;
                for succ in block.successors() {
                    write!(f, " {succ}")?;
                }
            }
            writeln!(f)?;
            for &instr in block.instructions() {
                if let Some(node) = self.node(instr) {
                    writeln!(f, "  {node}")?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcode::ArithOp;

    #[test]
    fn node_ids_are_monotonic() {
        let mut graph = Graph::new();
        let a = graph.create_constant(ConstValue::Int32(1));
        let b = graph.create_constant(ConstValue::Int32(2));
        assert!(a < b);

        graph.remove_node(a).unwrap();
        let c = graph.create_constant(ConstValue::Int32(3));
        // Removed ids are never reused.
        assert!(c > b);
        assert!(graph.node(a).is_none());
    }

    #[test]
    fn add_input_maintains_user_edge() {
        let mut graph = Graph::new();
        let x = graph.create_constant(ConstValue::Int32(2));
        let y = graph.create_constant(ConstValue::Int32(3));
        let add = graph
            .create_binary_op(
                Opcode::Arith(ArithOp::Add),
                x,
                y,
                IrType::Tagged(ValueTag::Int32),
            )
            .unwrap();

        assert_eq!(graph.node(add).unwrap().inputs(), &[x, y]);
        assert_eq!(graph.node(x).unwrap().users(), &[add]);
        assert_eq!(graph.node(y).unwrap().users(), &[add]);
    }

    #[test]
    fn duplicate_inputs_single_user_edge() {
        let mut graph = Graph::new();
        let x = graph.create_constant(ConstValue::Int32(2));
        let add = graph
            .create_binary_op(
                Opcode::Arith(ArithOp::Add),
                x,
                x,
                IrType::Tagged(ValueTag::Int32),
            )
            .unwrap();

        assert_eq!(graph.node(add).unwrap().inputs(), &[x, x]);
        // The user list holds one edge regardless of occurrence count.
        assert_eq!(graph.node(x).unwrap().users(), &[add]);
        assert!(graph.verify());
    }

    #[test]
    fn remove_one_of_duplicate_inputs_keeps_user_edge() {
        let mut graph = Graph::new();
        let x = graph.create_constant(ConstValue::Int32(2));
        let add = graph
            .create_binary_op(
                Opcode::Arith(ArithOp::Add),
                x,
                x,
                IrType::Tagged(ValueTag::Int32),
            )
            .unwrap();

        graph.remove_input(add, x).unwrap();
        assert_eq!(graph.node(add).unwrap().inputs(), &[x]);
        assert_eq!(graph.node(x).unwrap().users(), &[add]);

        graph.remove_input(add, x).unwrap();
        assert!(graph.node(add).unwrap().inputs().is_empty());
        assert!(graph.node(x).unwrap().users().is_empty());
    }

    #[test]
    fn remove_missing_input_is_noop() {
        let mut graph = Graph::new();
        let x = graph.create_constant(ConstValue::Int32(2));
        let y = graph.create_constant(ConstValue::Int32(3));
        let neg = graph.create_node(Opcode::Arith(ArithOp::Neg), IrType::Any);
        graph.add_input(neg, x).unwrap();

        graph.remove_input(neg, y).unwrap();
        assert_eq!(graph.node(neg).unwrap().inputs(), &[x]);
    }

    #[test]
    fn replace_input_fixes_both_user_lists() {
        let mut graph = Graph::new();
        let x = graph.create_constant(ConstValue::Int32(2));
        let y = graph.create_constant(ConstValue::Int32(3));
        let add = graph
            .create_binary_op(
                Opcode::Arith(ArithOp::Add),
                x,
                x,
                IrType::Tagged(ValueTag::Int32),
            )
            .unwrap();

        graph.replace_input(add, x, y).unwrap();
        assert_eq!(graph.node(add).unwrap().inputs(), &[y, y]);
        assert!(graph.node(x).unwrap().users().is_empty());
        assert_eq!(graph.node(y).unwrap().users(), &[add]);
        assert!(graph.verify());
    }

    #[test]
    fn replace_all_uses_with_repoints_users() {
        let mut graph = Graph::new();
        let old = graph.create_constant(ConstValue::Int32(5));
        let new = graph.create_constant(ConstValue::Int32(7));
        let a = graph.create_node(Opcode::Arith(ArithOp::Neg), IrType::Any);
        let b = graph.create_node(Opcode::Arith(ArithOp::Neg), IrType::Any);
        graph.add_input(a, old).unwrap();
        graph.add_input(b, old).unwrap();

        graph.replace_all_uses_with(old, new).unwrap();
        assert_eq!(graph.node(a).unwrap().inputs(), &[new]);
        assert_eq!(graph.node(b).unwrap().inputs(), &[new]);
        assert!(graph.node(old).unwrap().users().is_empty());
        assert_eq!(graph.node(new).unwrap().users().len(), 2);
        assert!(graph.verify());
    }

    #[test]
    fn remove_node_detaches_everything() {
        let mut graph = Graph::new();
        let block = graph.create_basic_block("body");
        let x = graph.create_constant(ConstValue::Int32(2));
        let neg = graph.create_node(Opcode::Arith(ArithOp::Neg), IrType::Any);
        graph.add_input(neg, x).unwrap();
        let user = graph.create_node(Opcode::Arith(ArithOp::Neg), IrType::Any);
        graph.add_input(user, neg).unwrap();
        graph.append_instruction(block, neg).unwrap();

        graph.remove_node(neg).unwrap();
        assert!(graph.node(neg).is_none());
        assert!(graph.node(x).unwrap().users().is_empty());
        assert!(graph.node(user).unwrap().inputs().is_empty());
        assert!(graph.block(block).unwrap().instructions().is_empty());
        assert!(graph.verify());
    }

    #[test]
    fn add_successor_is_bidirectional_and_dedup() {
        let mut graph = Graph::new();
        let a = graph.create_basic_block("a");
        let b = graph.create_basic_block("b");

        graph.add_successor(a, b).unwrap();
        graph.add_successor(a, b).unwrap(); // duplicate: no-op

        assert_eq!(graph.block(a).unwrap().successors(), &[b]);
        assert_eq!(graph.block(b).unwrap().predecessors(), &[a]);
    }

    #[test]
    fn terminator_requires_control_flow_last() {
        let mut graph = Graph::new();
        let block = graph.create_basic_block("entry");
        graph.set_entry_block(block);
        let x = graph.create_constant(ConstValue::Int32(1));
        let ret = graph.create_return(Some(x)).unwrap();
        graph.terminate(block, ret).unwrap();

        assert_eq!(graph.terminator(block), Some(ret));
        assert!(graph.verify());
    }

    #[test]
    fn terminate_wires_branch_successors() {
        let mut graph = Graph::new();
        let entry = graph.create_basic_block("entry");
        let then_b = graph.create_basic_block("then");
        let else_b = graph.create_basic_block("else");
        graph.set_entry_block(entry);

        let cond = graph.create_constant(ConstValue::Boolean(true));
        let branch = graph.create_branch(cond, then_b, else_b).unwrap();
        graph.terminate(entry, branch).unwrap();

        assert_eq!(graph.block(entry).unwrap().successors(), &[then_b, else_b]);
        assert_eq!(graph.block(then_b).unwrap().predecessors(), &[entry]);
        assert_eq!(graph.block(else_b).unwrap().predecessors(), &[entry]);
    }

    #[test]
    fn verify_rejects_control_flow_mid_block() {
        let mut graph = Graph::new();
        let block = graph.create_basic_block("entry");
        graph.set_entry_block(block);
        let ret = graph.create_return(None).unwrap();
        graph.append_instruction(block, ret).unwrap();
        let x = graph.create_constant(ConstValue::Int32(1));
        let neg = graph.create_node(Opcode::Arith(ArithOp::Neg), IrType::Any);
        graph.add_input(neg, x).unwrap();
        graph.append_instruction(block, neg).unwrap();

        assert!(!graph.verify());
    }

    #[test]
    fn verify_rejects_entry_with_predecessors() {
        let mut graph = Graph::new();
        let entry = graph.create_basic_block("entry");
        let other = graph.create_basic_block("other");
        graph.set_entry_block(entry);
        graph.add_successor(other, entry).unwrap();

        assert!(!graph.verify());
    }

    #[test]
    fn remove_block_removes_instructions_and_edges() {
        let mut graph = Graph::new();
        let a = graph.create_basic_block("a");
        let b = graph.create_basic_block("b");
        let c = graph.create_basic_block("c");
        graph.add_successor(a, b).unwrap();
        graph.add_successor(b, c).unwrap();

        let jump = graph.create_jump(c);
        graph.append_instruction(b, jump).unwrap();

        graph.remove_block(b).unwrap();
        assert!(graph.block(b).is_none());
        assert!(graph.node(jump).is_none());
        assert!(graph.block(a).unwrap().successors().is_empty());
        assert!(graph.block(c).unwrap().predecessors().is_empty());
    }

    #[test]
    fn phi_with_zero_incomings_is_removable() {
        let mut graph = Graph::new();
        let phi = graph.create_phi(IrType::Any);
        let x = graph.create_constant(ConstValue::Int32(1));
        graph.add_input(phi, x).unwrap();
        graph.remove_input(phi, x).unwrap();

        assert!(graph.node(phi).unwrap().inputs().is_empty());
        graph.remove_node(phi).unwrap();
        assert!(graph.node(phi).is_none());
        assert!(graph.verify());
    }

    #[test]
    fn clone_is_isomorphic_with_fresh_ids() {
        let mut graph = Graph::new();
        let entry = graph.create_basic_block("entry");
        let exit = graph.create_basic_block("exit");
        graph.set_entry_block(entry);

        let p = graph.create_parameter(0, "a", IrType::Tagged(ValueTag::Int32));
        let c = graph.create_constant(ConstValue::Int32(10));
        let add = graph
            .create_binary_op(Opcode::Arith(ArithOp::Add), p, c, IrType::Tagged(ValueTag::Int32))
            .unwrap();
        graph.append_instruction(entry, add).unwrap();
        let jump = graph.create_jump(exit);
        graph.terminate(entry, jump).unwrap();
        let ret = graph.create_return(Some(add)).unwrap();
        graph.terminate(exit, ret).unwrap();
        graph.add_applied_optimization(OptFlag::CONSTANT_FOLDING);

        let cloned = graph.clone_graph();
        assert_eq!(cloned.node_count(), graph.node_count());
        assert_eq!(cloned.block_count(), graph.block_count());
        assert_eq!(cloned.parameters().len(), 1);
        assert!(cloned.verify());
        assert!(cloned.has_applied_optimization(OptFlag::CONSTANT_FOLDING));

        let entry_clone = cloned.entry_block().unwrap();
        assert_eq!(cloned.block(entry_clone).unwrap().successors().len(), 1);

        // Mutating the clone leaves the original untouched.
        let mut cloned = cloned;
        let extra = cloned.create_constant(ConstValue::Int32(99));
        assert!(cloned.node(extra).is_some());
        assert_eq!(graph.node_count() + 1, cloned.node_count());
    }

    #[test]
    fn display_renders_blocks_and_instructions() {
        let mut graph = Graph::new();
        let entry = graph.create_basic_block("entry");
        graph.set_entry_block(entry);
        let ret = graph.create_return(None).unwrap();
        graph.terminate(entry, ret).unwrap();

        let dump = graph.to_string();
        assert!(dump.contains("entry"));
        assert!(dump.contains("return"));
    }
}
