pub mod typed;

use std::fmt;
use std::sync::Arc;

use either::Either;

use crate::symbols::{FieldId, TypeId};

/// Byte span within a source file, plus the 1-based line it starts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub line: u32,
}

impl Span {
    pub fn new(start: usize, end: usize, line: u32) -> Span {
        Span { start, end, line }
    }
}

/// File/line pair attached to every emitted instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub file: Arc<str>,
    pub line: u32,
}

/// The resolved static type of an expression.
///
/// The set is fixed: the primitive value types, references, and arrays.
/// `Long` and `Double` are wide (two operand-stack slots).
#[derive(Debug, Clone, PartialEq)]
pub enum StaticType {
    Void,
    Bool,
    Byte,
    Short,
    Int,
    Long,
    Float,
    Double,
    Ref(TypeId),
    Array(Box<ArrayType>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArrayType {
    pub of: StaticType,
    /// Literal element count or the define field naming it; `None` for
    /// unsized arrays.
    pub len: Option<Either<i32, FieldId>>,
    pub is_const: bool,
}

impl StaticType {
    pub fn array(of: StaticType, len: Option<Either<i32, FieldId>>, is_const: bool) -> StaticType {
        StaticType::Array(Box::new(ArrayType { of, len, is_const }))
    }

    pub fn is_void(&self) -> bool {
        matches!(self, StaticType::Void)
    }

    pub fn is_bool(&self) -> bool {
        matches!(self, StaticType::Bool)
    }

    /// The integer family operated on by the int opcodes. `bool` is not in
    /// the family but is accepted by the same opcodes; callers test it
    /// separately.
    pub fn is_integer(&self) -> bool {
        matches!(self, StaticType::Byte | StaticType::Short | StaticType::Int)
    }

    pub fn is_long(&self) -> bool {
        matches!(self, StaticType::Long)
    }

    pub fn is_float(&self) -> bool {
        matches!(self, StaticType::Float)
    }

    pub fn is_double(&self) -> bool {
        matches!(self, StaticType::Double)
    }

    /// Wide values occupy two operand-stack slots.
    pub fn is_wide(&self) -> bool {
        matches!(self, StaticType::Long | StaticType::Double)
    }

    /// References and arrays are both reference-shaped (nullable).
    pub fn is_ref(&self) -> bool {
        matches!(self, StaticType::Ref(_) | StaticType::Array(_))
    }

    pub fn is_array(&self) -> bool {
        matches!(self, StaticType::Array(_))
    }

    pub fn is_primitive(&self) -> bool {
        !self.is_ref() && !self.is_void()
    }

    pub fn array_of(&self) -> Option<&ArrayType> {
        match self {
            StaticType::Array(arr) => Some(arr),
            _ => None,
        }
    }

    /// Byte size of a primitive value, `None` for void/ref/array.
    pub fn prim_size(&self) -> Option<u8> {
        match self {
            StaticType::Bool | StaticType::Byte => Some(1),
            StaticType::Short => Some(2),
            StaticType::Int | StaticType::Float => Some(4),
            StaticType::Long | StaticType::Double => Some(8),
            _ => None,
        }
    }

    /// Operand-stack slots a value of this type occupies (0 for void).
    pub fn slot_width(&self) -> u16 {
        match self {
            StaticType::Void => 0,
            StaticType::Long | StaticType::Double => 2,
            _ => 1,
        }
    }

    pub fn tag(&self) -> wick_shared::TypeTag {
        use wick_shared::TypeTag;
        match self {
            StaticType::Void => TypeTag::Void,
            StaticType::Bool => TypeTag::Bool,
            StaticType::Byte => TypeTag::Byte,
            StaticType::Short => TypeTag::Short,
            StaticType::Int => TypeTag::Int,
            StaticType::Long => TypeTag::Long,
            StaticType::Float => TypeTag::Float,
            StaticType::Double => TypeTag::Double,
            StaticType::Ref(_) | StaticType::Array(_) => TypeTag::Ref,
        }
    }
}

impl fmt::Display for StaticType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StaticType::Void => write!(f, "void"),
            StaticType::Bool => write!(f, "bool"),
            StaticType::Byte => write!(f, "byte"),
            StaticType::Short => write!(f, "short"),
            StaticType::Int => write!(f, "int"),
            StaticType::Long => write!(f, "long"),
            StaticType::Float => write!(f, "float"),
            StaticType::Double => write!(f, "double"),
            StaticType::Ref(id) => write!(f, "ref#{}", id.0),
            StaticType::Array(arr) => write!(f, "{}[]", arr.of),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Negate,
    BitNot,
    CondNot,
    PreIncr,
    PreDecr,
    PostIncr,
    PostDecr,
}

/// Short-circuit boolean operators; n-ary in the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CondOp {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    BitAnd,
    BitOr,
    BitXor,
    ShiftL,
    ShiftR,
    Eq,
    NotEq,
    Gt,
    GtEq,
    Lt,
    LtEq,
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::ShiftL => "<<",
            BinaryOp::ShiftR => ">>",
            BinaryOp::Eq => "==",
            BinaryOp::NotEq => "!=",
            BinaryOp::Gt => ">",
            BinaryOp::GtEq => ">=",
            BinaryOp::Lt => "<",
            BinaryOp::LtEq => "<=",
        };
        write!(f, "{}", s)
    }
}
