//! Value numbering.
//!
//! Hash-based numbering over the same engine as CSE, with one addition:
//! commutative operations canonicalize their operand order first, so
//! `a + b` and `b + a` receive the same number and merge.

use nebula_ir::{Graph, OptFlag};

use crate::error::CompileError;
use crate::passes::cse::eliminate;
use crate::passes::Pass;

#[derive(Debug, Default)]
pub struct ValueNumberingPass;

impl Pass for ValueNumberingPass {
    fn name(&self) -> &'static str {
        "value-numbering"
    }

    fn flag(&self) -> OptFlag {
        OptFlag::VALUE_NUMBERING
    }

    fn run(&self, graph: &mut Graph) -> Result<bool, CompileError> {
        eliminate(graph, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::passes::run_pass;
    use nebula_ir::{ArithOp, IrType, Opcode};

    #[test]
    fn commutative_operands_merge() {
        let mut graph = Graph::new();
        let x = graph.create_parameter(0, "x", IrType::Any);
        let y = graph.create_parameter(1, "y", IrType::Any);
        let ab = graph
            .create_binary_op(Opcode::Arith(ArithOp::Add), x, y, IrType::Any)
            .unwrap();
        let ba = graph
            .create_binary_op(Opcode::Arith(ArithOp::Add), y, x, IrType::Any)
            .unwrap();
        let ret = graph.create_return(Some(ba)).unwrap();

        assert!(run_pass(&ValueNumberingPass, &mut graph).unwrap());
        assert!(graph.has_applied_optimization(OptFlag::VALUE_NUMBERING));
        assert!(graph.node(ba).is_none());
        assert_eq!(graph.node(ret).unwrap().inputs()[0], ab);
    }

    #[test]
    fn non_commutative_operands_stay_separate() {
        let mut graph = Graph::new();
        let x = graph.create_parameter(0, "x", IrType::Any);
        let y = graph.create_parameter(1, "y", IrType::Any);
        let xy = graph
            .create_binary_op(Opcode::Arith(ArithOp::Sub), x, y, IrType::Any)
            .unwrap();
        let yx = graph
            .create_binary_op(Opcode::Arith(ArithOp::Sub), y, x, IrType::Any)
            .unwrap();

        assert!(!run_pass(&ValueNumberingPass, &mut graph).unwrap());
        assert!(graph.node(xy).is_some());
        assert!(graph.node(yx).is_some());
    }
}
