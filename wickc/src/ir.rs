//! The instruction records produced by code generation.
//!
//! A method body assembles into an ordered stream of `IrOp`s. Jump
//! arguments are stream-relative instruction offsets; mapping them to
//! final byte addresses is the binary encoder's job.

use std::fmt;

use wick_shared::opcode::Opcode;

use crate::symbols::{FieldId, MethodId, TypeId};
use crate::trees::{Location, StaticType};

/// Argument payload of an instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Str(String),
    Type(TypeId),
    Field(FieldId),
    Method(MethodId),
    /// Stream-relative jump target; `None` until backpatched.
    Jump(Option<u32>),
    /// Switch jump table, one entry per label in the normalized range.
    Table(Vec<u32>),
}

impl fmt::Display for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::Int(v) => write!(f, "{}", v),
            Arg::Long(v) => write!(f, "{}L", v),
            Arg::Float(v) => write!(f, "{}F", v),
            Arg::Double(v) => write!(f, "{}D", v),
            Arg::Str(s) => write!(f, "{:?}", s),
            Arg::Type(id) => write!(f, "type#{}", id.0),
            Arg::Field(id) => write!(f, "field#{}", id.0),
            Arg::Method(id) => write!(f, "method#{}", id.0),
            Arg::Jump(Some(target)) => write!(f, "{}", target),
            Arg::Jump(None) => write!(f, "?"),
            Arg::Table(targets) => {
                for (i, t) in targets.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", t)?;
                }
                Ok(())
            }
        }
    }
}

/// One instruction in the stream.
///
/// `index` is the position at emission time and never changes after the
/// record is appended; only `arg` may be mutated later (backpatch).
#[derive(Debug, Clone, PartialEq)]
pub struct IrOp {
    pub opcode: Opcode,
    pub arg: Option<Arg>,
    /// The value type produced or consumed, when the encoder needs the
    /// width.
    pub ty: Option<StaticType>,
    pub loc: Location,
    pub index: usize,
}

impl fmt::Display for IrOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:4}: {}", self.index, self.opcode)?;
        if let Some(arg) = &self.arg {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// A finished per-method stream.
#[derive(Debug, Clone, PartialEq)]
pub struct IrMethod {
    pub method: MethodId,
    pub code: Vec<IrOp>,
    pub max_locals: u16,
    /// Maximum operand-stack depth reached, for frame sizing.
    pub max_stack: u16,
}

impl fmt::Display for IrMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for op in &self.code {
            writeln!(f, "{}", op)?;
        }
        Ok(())
    }
}
