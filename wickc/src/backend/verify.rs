//! Operand-stack verification of a finished instruction stream.
//!
//! Simulates stack depth across every control-flow edge: fall-through,
//! jumps, switch tables, and the foreach step. The walk rejects
//! underflow, depth disagreement at join points, out-of-range jump
//! targets, and return depths that disagree with the method's declared
//! return width, and reports the maximum depth reached so the encoder
//! can size the call frame.

use std::fmt;

use wick_shared::opcode::Opcode;

use crate::ir::{Arg, IrOp};
use crate::symbols::SymbolTable;
use crate::trees::StaticType;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyError {
    Underflow { at: usize },
    DepthMismatch { at: usize, first: u16, second: u16 },
    BadTarget { at: usize, target: usize },
    UnresolvedJump { at: usize },
    BadReturnDepth { at: usize, depth: u16, expected: u16 },
}

impl fmt::Display for VerifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerifyError::Underflow { at } => write!(f, "stack underflow at op {}", at),
            VerifyError::DepthMismatch { at, first, second } => write!(
                f,
                "stack depth mismatch at op {}: {} vs {}",
                at, first, second
            ),
            VerifyError::BadTarget { at, target } => {
                write!(f, "op {} jumps to invalid offset {}", at, target)
            }
            VerifyError::UnresolvedJump { at } => write!(f, "unresolved jump at op {}", at),
            VerifyError::BadReturnDepth {
                at,
                depth,
                expected,
            } => write!(
                f,
                "return at op {} with stack depth {}, expected {}",
                at, depth, expected
            ),
        }
    }
}

impl std::error::Error for VerifyError {}

/// Simulates `code` and returns the maximum operand-stack depth reached.
pub fn verify(
    code: &[IrOp],
    syms: &SymbolTable,
    ret: &StaticType,
) -> Result<u16, VerifyError> {
    if code.is_empty() {
        return Ok(0);
    }

    let mut depth_at: Vec<Option<u16>> = vec![None; code.len()];
    let mut work: Vec<(usize, u16)> = vec![(0, 0)];
    let mut max = 0u16;

    while let Some((at, depth)) = work.pop() {
        match depth_at[at] {
            Some(first) if first == depth => continue,
            Some(first) => {
                return Err(VerifyError::DepthMismatch {
                    at,
                    first,
                    second: depth,
                });
            }
            None => depth_at[at] = Some(depth),
        }

        let op = &code[at];
        let target = |op: &IrOp| -> Result<usize, VerifyError> {
            match &op.arg {
                Some(Arg::Jump(Some(t))) => {
                    let t = *t as usize;
                    if t >= code.len() {
                        Err(VerifyError::BadTarget { at, target: t })
                    } else {
                        Ok(t)
                    }
                }
                Some(Arg::Jump(None)) => Err(VerifyError::UnresolvedJump { at }),
                _ => panic!("jump op without a jump argument at {}", at),
            }
        };
        let next = |at: usize| -> Result<usize, VerifyError> {
            let n = at + 1;
            if n >= code.len() {
                Err(VerifyError::BadTarget { at, target: n })
            } else {
                Ok(n)
            }
        };

        match op.opcode {
            Opcode::Jump => {
                work.push((target(op)?, depth));
            }
            Opcode::JumpZero | Opcode::JumpNonZero => {
                if depth < 1 {
                    return Err(VerifyError::Underflow { at });
                }
                work.push((target(op)?, depth - 1));
                work.push((next(at)?, depth - 1));
            }
            Opcode::Foreach => {
                // the [array, length, counter] triple must be in place;
                // the exhausted path keeps it, the next-element path
                // pushes copies of the array and the counter
                if depth < 3 {
                    return Err(VerifyError::Underflow { at });
                }
                work.push((target(op)?, depth));
                work.push((next(at)?, depth + 2));
                max = max.max(depth + 2);
            }
            Opcode::Switch => {
                if depth < 1 {
                    return Err(VerifyError::Underflow { at });
                }
                let table = match &op.arg {
                    Some(Arg::Table(table)) => table,
                    _ => panic!("switch op without a jump table at {}", at),
                };
                for &t in table {
                    let t = t as usize;
                    if t >= code.len() {
                        return Err(VerifyError::BadTarget { at, target: t });
                    }
                    work.push((t, depth - 1));
                }
                // an out-of-range value falls through to the default block
                work.push((next(at)?, depth - 1));
            }
            Opcode::ReturnVoid | Opcode::ReturnPop | Opcode::ReturnPopWide => {
                let pops = match op.opcode {
                    Opcode::ReturnVoid => 0,
                    Opcode::ReturnPop => 1,
                    _ => 2,
                };
                if depth != pops {
                    return Err(VerifyError::BadReturnDepth {
                        at,
                        depth,
                        expected: pops,
                    });
                }
                // a valued return must match the declared return width
                if pops != 0 && pops != ret.slot_width() {
                    return Err(VerifyError::BadReturnDepth {
                        at,
                        depth: pops,
                        expected: ret.slot_width(),
                    });
                }
            }
            Opcode::Call
            | Opcode::CallVirtual
            | Opcode::CallNative
            | Opcode::CallNativeWide
            | Opcode::CallNativeVoid => {
                let method = match &op.arg {
                    Some(Arg::Method(id)) => syms.method(*id),
                    _ => panic!("call op without a method argument at {}", at),
                };
                let pops = method.param_slots();
                let pushes = method.ret.slot_width();
                if depth < pops {
                    return Err(VerifyError::Underflow { at });
                }
                let after = depth - pops + pushes;
                max = max.max(after);
                work.push((next(at)?, after));
            }
            Opcode::LoadDefine => {
                let field = match &op.arg {
                    Some(Arg::Field(id)) => syms.field(*id),
                    _ => panic!("define load without a field argument at {}", at),
                };
                let after = depth + field.ty.slot_width();
                max = max.max(after);
                work.push((next(at)?, after));
            }
            opcode => {
                let (pops, pushes) = opcode
                    .stack_effect()
                    .unwrap_or_else(|| panic!("no static stack effect for {}", opcode));
                let (pops, pushes) = (pops as u16, pushes as u16);
                if depth < pops {
                    return Err(VerifyError::Underflow { at });
                }
                let after = depth - pops + pushes;
                max = max.max(after);
                work.push((next(at)?, after));
            }
        }
    }

    Ok(max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Arg;
    use crate::trees::Location;
    use std::sync::Arc;

    fn op(opcode: Opcode, arg: Option<Arg>, index: usize) -> IrOp {
        IrOp {
            opcode,
            arg,
            ty: None,
            loc: Location {
                file: Arc::from("test.wk"),
                line: 1,
            },
            index,
        }
    }

    fn stream(ops: Vec<(Opcode, Option<Arg>)>) -> Vec<IrOp> {
        ops.into_iter()
            .enumerate()
            .map(|(i, (opcode, arg))| op(opcode, arg, i))
            .collect()
    }

    #[test]
    fn test_simple_add_max_depth() {
        let syms = SymbolTable::new();
        let code = stream(vec![
            (Opcode::LoadI1, None),
            (Opcode::LoadI2, None),
            (Opcode::IntAdd, None),
            (Opcode::ReturnPop, None),
        ]);
        assert_eq!(verify(&code, &syms, &StaticType::Int), Ok(2));
    }

    #[test]
    fn test_wide_values_take_two_slots() {
        let syms = SymbolTable::new();
        let code = stream(vec![
            (Opcode::LoadL1, None),
            (Opcode::LoadL0, None),
            (Opcode::LongAdd, None),
            (Opcode::ReturnPopWide, None),
        ]);
        assert_eq!(verify(&code, &syms, &StaticType::Long), Ok(4));
    }

    #[test]
    fn test_underflow_detected() {
        let syms = SymbolTable::new();
        let code = stream(vec![(Opcode::IntAdd, None), (Opcode::ReturnVoid, None)]);
        assert_eq!(
            verify(&code, &syms, &StaticType::Void),
            Err(VerifyError::Underflow { at: 0 })
        );
    }

    #[test]
    fn test_return_depth_must_match_declared_width() {
        let syms = SymbolTable::new();
        let code = stream(vec![(Opcode::LoadI1, None), (Opcode::ReturnVoid, None)]);
        assert_eq!(
            verify(&code, &syms, &StaticType::Void),
            Err(VerifyError::BadReturnDepth {
                at: 1,
                depth: 1,
                expected: 0
            })
        );
    }

    #[test]
    fn test_join_point_depth_mismatch() {
        let syms = SymbolTable::new();
        // one path pushes before the join, the other doesn't
        let code = stream(vec![
            (Opcode::LoadI1, None),
            (Opcode::JumpZero, Some(Arg::Jump(Some(3)))),
            (Opcode::LoadI1, None),
            (Opcode::Pop, None),
            (Opcode::ReturnVoid, None),
        ]);
        assert!(matches!(
            verify(&code, &syms, &StaticType::Void),
            Err(VerifyError::DepthMismatch { at: 3, .. })
        ));
    }

    #[test]
    fn test_out_of_range_target_rejected() {
        let syms = SymbolTable::new();
        let code = stream(vec![
            (Opcode::Jump, Some(Arg::Jump(Some(9)))),
            (Opcode::ReturnVoid, None),
        ]);
        assert_eq!(
            verify(&code, &syms, &StaticType::Void),
            Err(VerifyError::BadTarget { at: 0, target: 9 })
        );
    }

    #[test]
    fn test_unresolved_jump_rejected() {
        let syms = SymbolTable::new();
        let code = stream(vec![
            (Opcode::Jump, Some(Arg::Jump(None))),
            (Opcode::ReturnVoid, None),
        ]);
        assert_eq!(
            verify(&code, &syms, &StaticType::Void),
            Err(VerifyError::UnresolvedJump { at: 0 })
        );
    }
}
