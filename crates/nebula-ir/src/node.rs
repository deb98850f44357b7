//! IR nodes.
//!
//! A [`Node`] is one slot in the graph's arena: an opcode, a value-type
//! annotation, the ordered input list, and the reverse user list maintained
//! as the dual of inputs. Instruction nodes additionally carry a
//! back-pointer to their owning basic block; leaf values (constants,
//! variables, parameters) and floating phis have `block == None` until
//! appended.

use std::fmt;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::id::{BlockId, NodeId};
use crate::opcode::Opcode;
use crate::types::IrType;

/// One node in the IR graph. Edges are index handles; both edge directions
/// are maintained explicitly at every mutation site.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Monotonically assigned id, unique for the lifetime of the graph.
    pub id: NodeId,
    /// The operation, including inherent payload.
    pub opcode: Opcode,
    /// Value-type annotation, narrowed by type specialization.
    pub ty: IrType,
    /// Ordered inputs. May contain duplicates (`add x, x`).
    pub(crate) inputs: SmallVec<[NodeId; 2]>,
    /// Nodes that use this node as an input. No duplicates.
    pub(crate) users: Vec<NodeId>,
    /// The owning basic block, for instruction nodes that were appended.
    pub block: Option<BlockId>,
}

impl Node {
    pub(crate) fn new(id: NodeId, opcode: Opcode, ty: IrType) -> Self {
        Node {
            id,
            opcode,
            ty,
            inputs: SmallVec::new(),
            users: Vec::new(),
            block: None,
        }
    }

    /// Ordered input list.
    pub fn inputs(&self) -> &[NodeId] {
        &self.inputs
    }

    /// Users of this node, in first-use order.
    pub fn users(&self) -> &[NodeId] {
        &self.users
    }

    /// A node is pure iff its opcode has no side effect and is not control
    /// flow.
    pub fn is_pure(&self) -> bool {
        self.opcode.is_pure()
    }

    pub fn is_control_flow(&self) -> bool {
        self.opcode.is_control_flow()
    }

    pub fn has_side_effects(&self) -> bool {
        self.opcode.has_side_effects()
    }

    pub fn is_phi(&self) -> bool {
        matches!(self.opcode, Opcode::Phi)
    }

    pub fn is_constant(&self) -> bool {
        matches!(self.opcode, Opcode::Constant(_))
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {}", self.id, self.opcode)?;
        if let Opcode::Constant(value) = &self.opcode {
            write!(f, " {value}")?;
        }
        if !self.inputs.is_empty() {
            f.write_str(" ")?;
            for (i, input) in self.inputs.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{input}")?;
            }
        }
        write!(f, " : {}", self.ty)
    }
}
