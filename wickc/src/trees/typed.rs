//! The typed statement and expression trees handed to the back end.
//!
//! This is the input contract: every expression node carries its resolved
//! static type, and every name reference is already bound to a concrete
//! slot (parameter index, local index, field id, or method id). The back
//! end never consults source text or performs name resolution.

use crate::symbols::{FieldId, MethodId, TypeId};
use crate::trees::{BinaryOp, CondOp, Span, StaticType, UnaryOp};

/// One type's worth of method bodies, ready for assembly.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeAst {
    pub id: TypeId,
    pub file: String,
    pub methods: Vec<MethodAst>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MethodAst {
    pub method: MethodId,
    pub num_locals: u16,
    pub body: Block,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub stmts: Vec<Stmt>,
    pub span: Span,
}

impl Block {
    pub fn new(stmts: Vec<Stmt>, span: Span) -> Block {
        Block { stmts, span }
    }

    /// A block exits when its last statement does.
    pub fn is_exit(&self) -> bool {
        self.stmts.last().map_or(false, Stmt::is_exit)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    /// Goto destination label, when the statement is labeled.
    pub label: Option<String>,
    pub span: Span,
}

impl Stmt {
    pub fn new(kind: StmtKind, span: Span) -> Stmt {
        Stmt {
            kind,
            label: None,
            span,
        }
    }

    /// Whether control cannot flow past this statement.
    pub fn is_exit(&self) -> bool {
        match &self.kind {
            StmtKind::Return { .. } | StmtKind::Goto { .. } => true,
            StmtKind::If {
                true_block,
                false_block: Some(false_block),
                ..
            } => true_block.is_exit() && false_block.is_exit(),
            StmtKind::Switch {
                cases,
                default_block,
                ..
            } => {
                cases
                    .iter()
                    .all(|c| c.block.as_ref().map_or(true, Block::is_exit))
                    && default_block.as_ref().map_or(false, Block::is_exit)
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    Expr(Expr),
    LocalDef(LocalDef),
    If {
        cond: Expr,
        true_block: Block,
        false_block: Option<Block>,
    },
    Return {
        expr: Option<Expr>,
    },
    While {
        cond: Expr,
        block: Block,
    },
    DoWhile {
        block: Block,
        cond: Expr,
    },
    For {
        init: Option<Box<Stmt>>,
        cond: Option<Expr>,
        update: Option<Expr>,
        block: Block,
    },
    Foreach {
        local: LocalDef,
        array: Expr,
        /// Explicit iteration count; when absent the array's own length
        /// (literal or define) is used.
        length: Option<Expr>,
        block: Block,
    },
    Break,
    Continue,
    Assert {
        cond: Expr,
    },
    Goto {
        target: String,
    },
    Switch {
        cond: Expr,
        cases: Vec<Case>,
        default_block: Option<Block>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct LocalDef {
    pub name: String,
    pub index: u16,
    pub ty: StaticType,
    pub init: Option<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Case {
    /// Resolved integer case label.
    pub label: i32,
    /// A case with no block falls into the next case's code.
    pub block: Option<Block>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub ty: StaticType,
    pub span: Span,
    /// Leave semantics: whether the computed value must remain on the
    /// stack for an enclosing expression.
    pub leave: bool,
}

impl Expr {
    /// A statement-position expression; its value is discarded.
    pub fn new(kind: ExprKind, ty: StaticType, span: Span) -> Expr {
        Expr {
            kind,
            ty,
            span,
            leave: false,
        }
    }

    /// A nested expression whose value feeds the enclosing one.
    pub fn leave(kind: ExprKind, ty: StaticType, span: Span) -> Expr {
        Expr {
            kind,
            ty,
            span,
            leave: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    True,
    False,
    Null,
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Str(String),
    SizeOf(TypeId),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    /// Short-circuit `&&`/`||` over two or more operands.
    Cond {
        op: CondOp,
        operands: Vec<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// Simple assignment when `op` is `None`, compound otherwise.
    Assign {
        op: Option<BinaryOp>,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Ternary {
        cond: Box<Expr>,
        if_true: Box<Expr>,
        if_false: Box<Expr>,
    },
    /// Null-coalesce: the lhs unless it is null, else the rhs.
    Elvis {
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Param {
        index: u16,
    },
    Local {
        index: u16,
    },
    This,
    Super,
    Field(FieldExpr),
    Index {
        target: Box<Expr>,
        index: Box<Expr>,
    },
    Call(CallExpr),
    /// The target type is the expression's own `ty`.
    Cast {
        target: Box<Expr>,
    },
    New {
        of: StaticType,
        array_len: Option<Box<Expr>>,
    },
    Delete {
        target: Box<Expr>,
    },
    /// Only valid as the single argument of a call.
    Interpolation(Interpolation),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldExpr {
    pub field: FieldId,
    /// Absent for static/define fields.
    pub target: Option<Box<Expr>>,
    pub safe_nav: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallExpr {
    pub method: MethodId,
    pub target: Option<Box<Expr>>,
    pub args: Vec<Expr>,
    pub safe_nav: bool,
    /// Assignment-style call to a setter; with leave semantics the value
    /// argument is duplicated under the call arguments.
    pub prop_set: bool,
}

/// String interpolation: the first part is the outer call's argument, each
/// remaining part is printed through its own print method on the stream
/// the call leaves behind.
#[derive(Debug, Clone, PartialEq)]
pub struct Interpolation {
    pub first: Box<Expr>,
    pub rest: Vec<(Expr, MethodId)>,
}
