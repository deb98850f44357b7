//! Constant folding.
//!
//! Pure arithmetic, bitwise, logic, and comparison nodes whose inputs are
//! all constants evaluate at compile time. Folding iterates to a fixed
//! point, so whole constant subtrees collapse bottom-up. Arithmetic
//! follows the observable numeric semantics: Int32 operations that
//! overflow (or divide inexactly) widen to Float64 rather than wrap.

use nebula_ir::{ArithOp, BitwiseOp, CmpOp, ConstValue, Graph, LogicOp, NodeId, Opcode, OptFlag};

use crate::error::CompileError;
use crate::passes::Pass;

#[derive(Debug, Default)]
pub struct ConstantFoldingPass;

impl Pass for ConstantFoldingPass {
    fn name(&self) -> &'static str {
        "constant-folding"
    }

    fn flag(&self) -> OptFlag {
        OptFlag::CONSTANT_FOLDING
    }

    fn run(&self, graph: &mut Graph) -> Result<bool, CompileError> {
        let mut changed_any = false;
        loop {
            let mut folded_this_round = false;
            let candidates: Vec<NodeId> = graph
                .nodes()
                .filter(|node| node.is_pure() && !node.is_constant())
                .filter(|node| {
                    !node.inputs().is_empty()
                        && node.inputs().iter().all(|&input| {
                            graph.node(input).is_some_and(|n| n.is_constant())
                        })
                })
                .map(|node| node.id)
                .collect();

            for id in candidates {
                let Some(node) = graph.node(id) else { continue };
                let inputs: Vec<ConstValue> = node
                    .inputs()
                    .iter()
                    .filter_map(|&input| {
                        graph.node(input).and_then(|n| n.opcode.constant_value().cloned())
                    })
                    .collect();
                if inputs.len() != node.inputs().len() {
                    continue;
                }
                let Some(value) = evaluate(&node.opcode, &inputs) else {
                    continue;
                };

                let folded = graph.create_constant(value);
                graph.replace_all_uses_with(id, folded)?;
                graph.remove_node(id)?;
                folded_this_round = true;
                changed_any = true;
            }

            if !folded_this_round {
                break;
            }
        }
        Ok(changed_any)
    }
}

/// Evaluates one operation over constant inputs; `None` leaves the node
/// alone.
fn evaluate(opcode: &Opcode, inputs: &[ConstValue]) -> Option<ConstValue> {
    match (opcode, inputs) {
        (Opcode::Arith(ArithOp::Neg), [a]) => match a {
            ConstValue::Int32(v) => Some(
                v.checked_neg()
                    .map(ConstValue::Int32)
                    .unwrap_or(ConstValue::Float64(-(*v as f64))),
            ),
            ConstValue::Float64(v) => Some(ConstValue::Float64(-v)),
            _ => None,
        },
        (Opcode::Arith(op), [a, b]) => arith(*op, a, b),
        (Opcode::Bitwise(BitwiseOp::Not), [ConstValue::Int32(v)]) => {
            Some(ConstValue::Int32(!v))
        }
        (Opcode::Bitwise(op), [ConstValue::Int32(a), ConstValue::Int32(b)]) => {
            bitwise(*op, *a, *b)
        }
        (Opcode::Logic(LogicOp::Not), [ConstValue::Boolean(v)]) => {
            Some(ConstValue::Boolean(!v))
        }
        (Opcode::Logic(op), [ConstValue::Boolean(a), ConstValue::Boolean(b)]) => {
            Some(ConstValue::Boolean(match op {
                LogicOp::And => *a && *b,
                LogicOp::Or => *a || *b,
                LogicOp::Not => return None,
            }))
        }
        (Opcode::Compare(op), [a, b]) => compare(*op, a, b),
        _ => None,
    }
}

fn as_number(value: &ConstValue) -> Option<f64> {
    match value {
        ConstValue::Int32(v) => Some(*v as f64),
        ConstValue::Float64(v) => Some(*v),
        _ => None,
    }
}

fn arith(op: ArithOp, a: &ConstValue, b: &ConstValue) -> Option<ConstValue> {
    if let (ConstValue::Int32(x), ConstValue::Int32(y)) = (a, b) {
        let exact = match op {
            ArithOp::Add => x.checked_add(*y),
            ArithOp::Sub => x.checked_sub(*y),
            ArithOp::Mul => x.checked_mul(*y),
            ArithOp::Div => {
                if *y != 0 && x % y == 0 {
                    x.checked_div(*y)
                } else {
                    None
                }
            }
            ArithOp::Mod => {
                if *y != 0 {
                    x.checked_rem(*y)
                } else {
                    None
                }
            }
            ArithOp::Neg => None,
        };
        if let Some(v) = exact {
            return Some(ConstValue::Int32(v));
        }
    }

    let x = as_number(a)?;
    let y = as_number(b)?;
    let result = match op {
        ArithOp::Add => x + y,
        ArithOp::Sub => x - y,
        ArithOp::Mul => x * y,
        ArithOp::Div => x / y,
        ArithOp::Mod => x % y,
        ArithOp::Neg => return None,
    };
    Some(ConstValue::Float64(result))
}

fn bitwise(op: BitwiseOp, a: i32, b: i32) -> Option<ConstValue> {
    let shift = (b as u32) & 31;
    Some(match op {
        BitwiseOp::And => ConstValue::Int32(a & b),
        BitwiseOp::Or => ConstValue::Int32(a | b),
        BitwiseOp::Xor => ConstValue::Int32(a ^ b),
        BitwiseOp::ShiftLeft => ConstValue::Int32(a.wrapping_shl(shift)),
        BitwiseOp::ShiftRight => ConstValue::Int32(a.wrapping_shr(shift)),
        BitwiseOp::ShiftRightUnsigned => {
            let value = (a as u32).wrapping_shr(shift);
            if value <= i32::MAX as u32 {
                ConstValue::Int32(value as i32)
            } else {
                ConstValue::Float64(value as f64)
            }
        }
        BitwiseOp::Not => return None,
    })
}

fn compare(op: CmpOp, a: &ConstValue, b: &ConstValue) -> Option<ConstValue> {
    // Numeric comparison covers Int32/Float64 mixes.
    if let (Some(x), Some(y)) = (as_number(a), as_number(b)) {
        let result = match op {
            CmpOp::Equal | CmpOp::StrictEqual => x == y,
            CmpOp::NotEqual | CmpOp::StrictNotEqual => x != y,
            CmpOp::LessThan => x < y,
            CmpOp::LessEqual => x <= y,
            CmpOp::GreaterThan => x > y,
            CmpOp::GreaterEqual => x >= y,
        };
        return Some(ConstValue::Boolean(result));
    }

    // Same-variant non-numeric equality; coercing comparisons stay
    // unfolded.
    let same_type_eq = match (a, b) {
        (ConstValue::Boolean(x), ConstValue::Boolean(y)) => Some(x == y),
        (ConstValue::String(x), ConstValue::String(y)) => Some(x == y),
        (ConstValue::Null, ConstValue::Null) => Some(true),
        (ConstValue::Undefined, ConstValue::Undefined) => Some(true),
        _ => None,
    };
    match (op, same_type_eq) {
        (CmpOp::Equal | CmpOp::StrictEqual, Some(eq)) => Some(ConstValue::Boolean(eq)),
        (CmpOp::NotEqual | CmpOp::StrictNotEqual, Some(eq)) => Some(ConstValue::Boolean(!eq)),
        (CmpOp::StrictEqual, None) => Some(ConstValue::Boolean(false)),
        (CmpOp::StrictNotEqual, None) => Some(ConstValue::Boolean(true)),
        _ => None,
    }
}
