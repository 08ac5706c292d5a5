//! Per-method code assembly.
//!
//! `CodeAsm` walks one typed method body and appends to a single
//! instruction stream, resolving all control-flow targets as it goes:
//! forward jumps are emitted as placeholders and backpatched once their
//! destination offset is known, `break`/`continue` register against the
//! innermost enclosing loop or switch context, and gotos are resolved in a
//! final pass over the whole method once every labeled statement's mark is
//! known. All of this state is private to one invocation and discarded
//! with it, so methods can be assembled in parallel against a shared
//! read-only symbol table.

use std::collections::HashMap;
use std::sync::Arc;

use either::Either;
use itertools::{Itertools, MinMaxResult};
use log::{debug, trace};
use wick_shared::opcode::Opcode;

use crate::errors::CompileError;
use crate::ir::{Arg, IrOp};
use crate::symbols::{DispatchKind, FieldId, FieldKind, SymbolTable};
use crate::symbols::TypeId;
use crate::trees::typed::{
    Block, Case, CallExpr, Expr, ExprKind, FieldExpr, Interpolation, LocalDef, Stmt, StmtKind,
};
use crate::trees::{BinaryOp, CondOp, Location, Span, StaticType, UnaryOp};

/// Handle on an instruction whose jump argument is still a placeholder.
/// Not copyable: each pending jump is resolved exactly once.
#[derive(Debug)]
struct Patch(usize);

/// Transient true/false jump lists for short-circuit conditions.
#[derive(Debug, Default)]
struct Cond {
    true_jumps: Vec<Patch>,
    false_jumps: Vec<Patch>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopKind {
    Loop,
    Foreach,
    Switch,
}

/// Context for the innermost enclosing loop/switch construct.
#[derive(Debug)]
struct Loop {
    kind: LoopKind,
    breaks: Vec<Patch>,
    continues: Vec<Patch>,
}

impl Loop {
    fn new(kind: LoopKind) -> Loop {
        Loop {
            kind,
            breaks: Vec::new(),
            continues: Vec::new(),
        }
    }
}

#[derive(Debug)]
struct DeferredGoto {
    patch: Patch,
    label: String,
    span: Span,
}

/// Opcode choices for one binary operator, by operand type.
struct BinOps {
    int: Opcode,
    long: Option<Opcode>,
    float: Option<Opcode>,
    double: Option<Opcode>,
    obj: Option<Opcode>,
}

fn binary_opcodes(op: BinaryOp) -> BinOps {
    use Opcode::*;
    let (int, long, float, double, obj) = match op {
        BinaryOp::Add => (IntAdd, Some(LongAdd), Some(FloatAdd), Some(DoubleAdd), None),
        BinaryOp::Sub => (IntSub, Some(LongSub), Some(FloatSub), Some(DoubleSub), None),
        BinaryOp::Mul => (IntMul, Some(LongMul), Some(FloatMul), Some(DoubleMul), None),
        BinaryOp::Div => (IntDiv, Some(LongDiv), Some(FloatDiv), Some(DoubleDiv), None),
        BinaryOp::Mod => (IntMod, Some(LongMod), None, None, None),
        BinaryOp::BitAnd => (IntAnd, Some(LongAnd), None, None, None),
        BinaryOp::BitOr => (IntOr, Some(LongOr), None, None, None),
        BinaryOp::BitXor => (IntXor, Some(LongXor), None, None, None),
        BinaryOp::ShiftL => (IntShiftL, Some(LongShiftL), None, None, None),
        BinaryOp::ShiftR => (IntShiftR, Some(LongShiftR), None, None, None),
        BinaryOp::Eq => (IntEq, Some(LongEq), Some(FloatEq), Some(DoubleEq), Some(ObjEq)),
        BinaryOp::NotEq => (
            IntNotEq,
            Some(LongNotEq),
            Some(FloatNotEq),
            Some(DoubleNotEq),
            Some(ObjNotEq),
        ),
        BinaryOp::Gt => (IntGt, Some(LongGt), Some(FloatGt), Some(DoubleGt), None),
        BinaryOp::GtEq => (IntGtEq, Some(LongGtEq), Some(FloatGtEq), Some(DoubleGtEq), None),
        BinaryOp::Lt => (IntLt, Some(LongLt), Some(FloatLt), Some(DoubleLt), None),
        BinaryOp::LtEq => (IntLtEq, Some(LongLtEq), Some(FloatLtEq), Some(DoubleLtEq), None),
    };
    BinOps {
        int,
        long,
        float,
        double,
        obj,
    }
}

pub struct CodeAsm<'a> {
    syms: &'a SymbolTable,
    self_type: TypeId,
    file: Arc<str>,
    loc: Location,
    code: Vec<IrOp>,
    loop_stack: Vec<Loop>,
    gotos: Vec<DeferredGoto>,
    /// Marks of labeled statements, for goto resolution.
    marks: HashMap<String, u32>,
}

impl<'a> CodeAsm<'a> {
    pub fn new(syms: &'a SymbolTable, self_type: TypeId, file: &str) -> CodeAsm<'a> {
        let file: Arc<str> = Arc::from(file);
        let loc = Location {
            file: file.clone(),
            line: 0,
        };
        CodeAsm {
            syms,
            self_type,
            file,
            loc,
            code: Vec::new(),
            loop_stack: Vec::new(),
            gotos: Vec::new(),
            marks: HashMap::new(),
        }
    }

    /// Assembles one method body into a finished instruction stream.
    pub fn assemble(mut self, body: &Block) -> Result<Vec<IrOp>, CompileError> {
        self.block(body)?;
        if !body.is_exit() {
            self.op(Opcode::ReturnVoid);
        }
        self.finish()?;
        debug!("assembled {} ops", self.code.len());
        Ok(self.code)
    }

    // =================================================================
    // Statements
    // =================================================================

    fn block(&mut self, block: &Block) -> Result<(), CompileError> {
        for stmt in &block.stmts {
            self.stmt(stmt)?;
        }
        Ok(())
    }

    fn stmt(&mut self, stmt: &Stmt) -> Result<(), CompileError> {
        self.loc = Location {
            file: self.file.clone(),
            line: stmt.span.line,
        };
        if let Some(label) = &stmt.label {
            let mark = self.mark();
            self.marks.insert(label.clone(), mark);
        }
        match &stmt.kind {
            StmtKind::Expr(expr) => self.expr_stmt(expr),
            StmtKind::LocalDef(def) => self.local_def_stmt(def),
            StmtKind::If {
                cond,
                true_block,
                false_block,
            } => self.if_stmt(cond, true_block, false_block.as_ref()),
            StmtKind::Return { expr } => self.return_stmt(expr.as_ref()),
            StmtKind::While { cond, block } => self.while_stmt(cond, block),
            StmtKind::DoWhile { block, cond } => self.do_while_stmt(block, cond),
            StmtKind::For {
                init,
                cond,
                update,
                block,
            } => self.for_stmt(init.as_deref(), cond.as_ref(), update.as_ref(), block),
            StmtKind::Foreach {
                local,
                array,
                length,
                block,
            } => self.foreach_stmt(local, array, length.as_ref(), block),
            StmtKind::Break => self.break_stmt(stmt.span),
            StmtKind::Continue => self.continue_stmt(stmt.span),
            StmtKind::Assert { cond } => self.assert_stmt(cond, stmt.span),
            StmtKind::Goto { target } => self.goto_stmt(target, stmt.span),
            StmtKind::Switch {
                cond,
                cases,
                default_block,
            } => self.switch_stmt(cond, cases, default_block.as_ref(), stmt.span),
        }
    }

    fn expr_stmt(&mut self, expr: &Expr) -> Result<(), CompileError> {
        // calls on a log-category define compile to gated log statements
        if let ExprKind::Call(call) = &expr.kind {
            if self.syms.method(call.method).log_gate.is_some() {
                return self.log_stmt(call, &expr.ty, expr.span);
            }
        }
        self.expr(expr)
    }

    fn local_def_stmt(&mut self, def: &LocalDef) -> Result<(), CompileError> {
        if let Some(init) = &def.init {
            self.expr(init)?;
            self.store_local(def.index, &def.ty);
        }
        Ok(())
    }

    fn return_stmt(&mut self, expr: Option<&Expr>) -> Result<(), CompileError> {
        // jumping out of a foreach leaves its three working values on the
        // stack; pop them to keep the stack balanced
        let foreach_depth = self
            .loop_stack
            .iter()
            .filter(|l| l.kind == LoopKind::Foreach)
            .count();
        for _ in 0..foreach_depth {
            self.op(Opcode::Pop3);
        }

        match expr {
            None => {
                self.op(Opcode::ReturnVoid);
            }
            Some(expr) => {
                self.expr(expr)?;
                if expr.ty.is_wide() {
                    self.op(Opcode::ReturnPopWide);
                } else {
                    self.op(Opcode::ReturnPop);
                }
            }
        }
        Ok(())
    }

    fn if_stmt(
        &mut self,
        cond_expr: &Expr,
        true_block: &Block,
        false_block: Option<&Block>,
    ) -> Result<(), CompileError> {
        let mut c = Cond::default();

        // NOTE: we cannot fold `if (true)` / `if (false)` away because
        // there may be goto labels inside the seemingly dead block

        // if the condition is itself a short-circuit expression, branch
        // straight to the true/false blocks instead of materializing a
        // truth value on the stack
        if let ExprKind::Cond { op, operands } = &cond_expr.kind {
            self.cond(*op, operands, &mut c)?;
        } else {
            self.expr(cond_expr)?;
            let jump = self.jump(Opcode::JumpZero);
            c.false_jumps.push(jump);
        }

        // true block
        for patch in c.true_jumps.drain(..) {
            self.backpatch(patch);
        }
        self.block(true_block)?;
        let end_jump = if false_block.is_some() && !true_block.is_exit() {
            Some(self.jump(Opcode::Jump))
        } else {
            None
        };

        // false block
        for patch in c.false_jumps.drain(..) {
            self.backpatch(patch);
        }
        if let Some(false_block) = false_block {
            self.block(false_block)?;
        }

        if let Some(end_jump) = end_jump {
            self.backpatch(end_jump);
        }
        Ok(())
    }

    fn while_stmt(&mut self, cond: &Expr, block: &Block) -> Result<(), CompileError> {
        self.loop_stack.push(Loop::new(LoopKind::Loop));

        let continue_mark = self.mark();
        self.expr(cond)?;
        let false_jump = self.jump(Opcode::JumpZero);
        self.block(block)?;
        self.jump_to(Opcode::Jump, continue_mark);
        let break_mark = self.mark();
        self.backpatch_to(false_jump, break_mark);

        let ctx = self.loop_stack.pop().unwrap();
        for patch in ctx.continues {
            self.backpatch_to(patch, continue_mark);
        }
        for patch in ctx.breaks {
            self.backpatch_to(patch, break_mark);
        }
        Ok(())
    }

    fn do_while_stmt(&mut self, block: &Block, cond: &Expr) -> Result<(), CompileError> {
        self.loop_stack.push(Loop::new(LoopKind::Loop));

        let start = self.mark();
        self.block(block)?;
        let continue_mark = self.mark();
        self.expr(cond)?;
        self.jump_to(Opcode::JumpNonZero, start);
        let break_mark = self.mark();

        let ctx = self.loop_stack.pop().unwrap();
        for patch in ctx.continues {
            self.backpatch_to(patch, continue_mark);
        }
        for patch in ctx.breaks {
            self.backpatch_to(patch, break_mark);
        }
        Ok(())
    }

    fn for_stmt(
        &mut self,
        init: Option<&Stmt>,
        cond: Option<&Expr>,
        update: Option<&Expr>,
        block: &Block,
    ) -> Result<(), CompileError> {
        self.loop_stack.push(Loop::new(LoopKind::Loop));

        if let Some(init) = init {
            self.stmt(init)?;
        }

        let cond_mark = self.mark();
        let mut false_cond = None;
        if let Some(cond) = cond {
            self.expr(cond)?;
            false_cond = Some(self.jump(Opcode::JumpZero));
        }
        self.block(block)?;
        let update_mark = self.mark();
        if let Some(update) = update {
            self.expr(update)?;
        }
        self.jump_to(Opcode::Jump, cond_mark);
        let end_mark = self.mark();
        if let Some(patch) = false_cond {
            self.backpatch_to(patch, end_mark);
        }

        let ctx = self.loop_stack.pop().unwrap();
        for patch in ctx.continues {
            self.backpatch_to(patch, update_mark);
        }
        for patch in ctx.breaks {
            self.backpatch_to(patch, end_mark);
        }
        Ok(())
    }

    fn foreach_stmt(
        &mut self,
        local: &LocalDef,
        array: &Expr,
        length: Option<&Expr>,
        block: &Block,
    ) -> Result<(), CompileError> {
        self.loop_stack.push(Loop::new(LoopKind::Foreach));

        // push the array to iterate, the length, and a counter of -1
        self.expr(array)?;
        let arr_ty = match &array.ty {
            StaticType::Array(arr) => arr,
            _ => panic!("foreach over non-array type: {}", array.ty),
        };
        match length {
            Some(length) => self.expr(length)?,
            None => match &arr_ty.len {
                Some(Either::Left(len)) => self.load_int(*len),
                Some(Either::Right(define)) => {
                    self.op_arg(Opcode::LoadDefine, Arg::Field(*define));
                }
                None => {
                    return Err(CompileError::InvalidOperation {
                        message: "foreach over unsized array requires a length".to_string(),
                        span: array.span,
                    });
                }
            },
        }
        self.load_int(-1);

        let loop_mark = self.mark();
        let to_end = self.jump(Opcode::Foreach);
        self.load_array(arr_ty);
        self.store_local(local.index, &local.ty);
        self.block(block)?;
        self.jump_to(Opcode::Jump, loop_mark);
        self.backpatch(to_end);
        let end_mark = self.mark();
        self.op(Opcode::Pop3);

        let ctx = self.loop_stack.pop().unwrap();
        for patch in ctx.continues {
            self.backpatch_to(patch, loop_mark);
        }
        for patch in ctx.breaks {
            self.backpatch_to(patch, end_mark);
        }
        Ok(())
    }

    fn break_stmt(&mut self, span: Span) -> Result<(), CompileError> {
        if self.loop_stack.is_empty() {
            return Err(CompileError::InvalidTransfer {
                message: "break outside of loop".to_string(),
                span,
            });
        }
        // register with the innermost construct for backpatch
        let patch = self.jump(Opcode::Jump);
        self.loop_stack.last_mut().unwrap().breaks.push(patch);
        Ok(())
    }

    fn continue_stmt(&mut self, span: Span) -> Result<(), CompileError> {
        // a switch has no continue point; bind to the nearest enclosing loop
        let patch = self.jump(Opcode::Jump);
        match self
            .loop_stack
            .iter_mut()
            .rev()
            .find(|l| l.kind != LoopKind::Switch)
        {
            Some(ctx) => {
                ctx.continues.push(patch);
                Ok(())
            }
            None => Err(CompileError::InvalidTransfer {
                message: "continue outside of loop".to_string(),
                span,
            }),
        }
    }

    fn assert_stmt(&mut self, cond: &Expr, span: Span) -> Result<(), CompileError> {
        self.expr(cond)?;
        self.op_arg(Opcode::Assert, Arg::Int(span.line as i32));
        Ok(())
    }

    fn goto_stmt(&mut self, target: &str, span: Span) -> Result<(), CompileError> {
        // emit a placeholder now; the label's mark may not exist yet, so
        // resolution is deferred to finish()
        let patch = self.jump(Opcode::Jump);
        self.gotos.push(DeferredGoto {
            patch,
            label: target.to_string(),
            span,
        });
        Ok(())
    }

    fn switch_stmt(
        &mut self,
        cond: &Expr,
        cases: &[Case],
        default_block: Option<&Block>,
        span: Span,
    ) -> Result<(), CompileError> {
        self.loop_stack.push(Loop::new(LoopKind::Switch));

        let (min, max) = match cases.iter().map(|c| c.label).minmax() {
            MinMaxResult::NoElements => (0, 0),
            MinMaxResult::OneElement(v) => (v, v),
            MinMaxResult::MinMax(lo, hi) => (lo, hi),
        };
        let num = cases.len();
        let delta = (max as i64 - min as i64 + 1) as usize;

        // a jump table only pays off when the label range is dense enough
        if delta > 30 && num * 3 < delta {
            return Err(CompileError::SparseSwitch {
                cases: num,
                min,
                max,
                span,
            });
        }

        // push the condition, normalized to zero-based
        self.expr(cond)?;
        if min != 0 {
            self.load_int(min);
            self.op(Opcode::IntSub);
        }

        let switch_index = self.op_arg(Opcode::Switch, Arg::Table(Vec::new()));
        let mut table: Vec<Option<u32>> = vec![None; delta];

        // the default block goes first: it is the switch fall-through
        let def_start = self.mark();
        let mut def_end = None;
        match default_block {
            Some(block) => {
                self.block(block)?;
                if !block.is_exit() {
                    def_end = Some(self.jump(Opcode::Jump));
                }
            }
            None => {
                def_end = Some(self.jump(Opcode::Jump));
            }
        }

        // now each case block; a case with no block falls into the next one
        for (i, case) in cases.iter().enumerate() {
            table[(case.label as i64 - min as i64) as usize] = Some(self.mark());
            if let Some(block) = &case.block {
                self.block(block)?;
            }
            if i == cases.len() - 1 {
                // The last case falls through to the default block unless
                // its final statement is a break. The check is shallow: a
                // nested branch whose arms all exit still gets the jump,
                // costing at most one unreachable op.
                let ends_in_break = case
                    .block
                    .as_ref()
                    .and_then(|b| b.stmts.last())
                    .map_or(false, |s| matches!(s.kind, StmtKind::Break));
                if !ends_in_break {
                    self.jump_to(Opcode::Jump, def_start);
                }
            }
        }

        let end = self.mark();
        if let Some(patch) = def_end {
            self.backpatch_to(patch, end);
        }
        let ctx = self.loop_stack.pop().unwrap();
        for patch in ctx.breaks {
            self.backpatch_to(patch, end);
        }
        debug_assert!(ctx.continues.is_empty());

        // uncased labels route to the default block
        let jumps = table
            .into_iter()
            .map(|mark| mark.unwrap_or(def_start))
            .collect();
        self.code[switch_index].arg = Some(Arg::Table(jumps));
        Ok(())
    }

    // =================================================================
    // Expressions
    // =================================================================

    fn expr(&mut self, expr: &Expr) -> Result<(), CompileError> {
        self.loc = Location {
            file: self.file.clone(),
            line: expr.span.line,
        };
        match &expr.kind {
            ExprKind::True => self.load_int(1),
            ExprKind::False => self.load_int(0),
            ExprKind::Null => self.load_null(&expr.ty),
            ExprKind::Int(v) => self.load_int(*v),
            ExprKind::Long(v) => self.load_long(*v),
            ExprKind::Float(v) => self.load_float(*v),
            ExprKind::Double(v) => self.load_double(*v),
            ExprKind::Str(s) => {
                self.op_arg(Opcode::LoadStr, Arg::Str(s.clone()));
            }
            ExprKind::SizeOf(ty) => {
                self.op_arg(Opcode::SizeOf, Arg::Type(*ty));
            }
            ExprKind::Unary { op, operand } => match op {
                UnaryOp::Negate => self.unary(
                    operand,
                    expr.span,
                    Opcode::IntNeg,
                    Some(Opcode::LongNeg),
                    Some(Opcode::FloatNeg),
                    Some(Opcode::DoubleNeg),
                )?,
                UnaryOp::BitNot => self.unary(
                    operand,
                    expr.span,
                    Opcode::IntNot,
                    Some(Opcode::LongNot),
                    None,
                    None,
                )?,
                UnaryOp::CondNot => {
                    self.unary(operand, expr.span, Opcode::EqZero, None, None, None)?
                }
                UnaryOp::PreIncr | UnaryOp::PreDecr | UnaryOp::PostIncr | UnaryOp::PostDecr => {
                    self.increment(expr, *op, operand)?
                }
            },
            ExprKind::Cond { op, operands } => {
                // a bare short-circuit expression materializes 1/0
                let mut c = Cond::default();
                self.cond(*op, operands, &mut c)?;
                self.cond_end(c);
            }
            ExprKind::Binary { op, lhs, rhs } => self.binary(expr, *op, lhs, rhs)?,
            ExprKind::Assign { op: None, lhs, rhs } => self.assign(expr, lhs, rhs)?,
            ExprKind::Assign {
                op: Some(op),
                lhs,
                rhs,
            } => self.assign_compound(expr, *op, lhs, rhs)?,
            ExprKind::Ternary {
                cond,
                if_true,
                if_false,
            } => {
                self.expr(cond)?;
                let false_jump = self.jump(Opcode::JumpZero);
                self.expr(if_true)?;
                let end_jump = self.jump(Opcode::Jump);
                self.backpatch(false_jump);
                self.expr(if_false)?;
                self.backpatch(end_jump);
            }
            ExprKind::Elvis { lhs, rhs } => {
                self.expr(lhs)?;
                self.op(Opcode::Dup);
                self.op(Opcode::LoadNull);
                self.op(Opcode::ObjEq);
                let is_null = self.jump(Opcode::JumpNonZero);
                let end_jump = self.jump(Opcode::Jump);
                self.backpatch(is_null);
                self.op(Opcode::Pop);
                self.expr(rhs)?;
                self.backpatch(end_jump);
            }
            ExprKind::Param { index } => self.load_param(*index, &expr.ty),
            ExprKind::Local { index } => self.load_local(*index, &expr.ty),
            ExprKind::This => {
                let i = self.op(Opcode::LoadParam0);
                self.code[i].ty = Some(StaticType::Ref(self.self_type));
            }
            ExprKind::Super => {
                let base = self
                    .syms
                    .type_def(self.self_type)
                    .base
                    .unwrap_or_else(|| panic!("super in a type with no base"));
                let i = self.op(Opcode::LoadParam0);
                self.code[i].ty = Some(StaticType::Ref(base));
            }
            ExprKind::Field(field) => self.load_field(field, false, expr.span)?,
            ExprKind::Index { target, index } => self.load_index(target, index, false)?,
            ExprKind::Call(call) => self.call(call, &expr.ty, expr.leave)?,
            ExprKind::Cast { target } => self.cast(target, &expr.ty, expr.span)?,
            ExprKind::New { of, array_len } => self.new_expr(of, array_len.as_deref(), &expr.ty)?,
            ExprKind::Delete { target } => {
                self.expr(target)?;
                self.op_arg(
                    Opcode::CallNativeVoid,
                    Arg::Method(self.syms.well_known.dealloc),
                );
            }
            ExprKind::Interpolation(_) => {
                panic!("interpolation outside of a call argument")
            }
        }
        Ok(())
    }

    // =================================================================
    // Literals
    // =================================================================

    fn load_int(&mut self, val: i32) {
        match val {
            -1 => {
                self.op(Opcode::LoadIM1);
            }
            0 => {
                self.op(Opcode::LoadI0);
            }
            1 => {
                self.op(Opcode::LoadI1);
            }
            2 => {
                self.op(Opcode::LoadI2);
            }
            3 => {
                self.op(Opcode::LoadI3);
            }
            4 => {
                self.op(Opcode::LoadI4);
            }
            5 => {
                self.op(Opcode::LoadI5);
            }
            _ => {
                if (0..=0xff).contains(&val) {
                    self.op_arg(Opcode::LoadIntU1, Arg::Int(val));
                } else if (0..=0xffff).contains(&val) {
                    self.op_arg(Opcode::LoadIntU2, Arg::Int(val));
                } else {
                    self.op_arg(Opcode::LoadInt, Arg::Int(val));
                }
            }
        }
    }

    fn load_long(&mut self, val: i64) {
        if val == 0 {
            self.op(Opcode::LoadL0);
            return;
        }
        if val == 1 {
            self.op(Opcode::LoadL1);
            return;
        }
        // small longs are cheaper as an int immediate plus a widening
        if (-1..=0xffff).contains(&val) {
            self.load_int(val as i32);
            self.op(Opcode::IntToLong);
        } else {
            self.op_arg(Opcode::LoadLong, Arg::Long(val));
        }
    }

    fn load_float(&mut self, val: f32) {
        if val == 0.0 {
            self.op(Opcode::LoadF0);
            return;
        }
        if val == 1.0 {
            self.op(Opcode::LoadF1);
            return;
        }
        let ival = val.round() as i64;
        if ival as f32 == val && (-1..=0xffff).contains(&ival) {
            self.load_int(ival as i32);
            self.op(Opcode::IntToFloat);
        } else {
            self.op_arg(Opcode::LoadFloat, Arg::Float(val));
        }
    }

    fn load_double(&mut self, val: f64) {
        if val == 0.0 {
            self.op(Opcode::LoadD0);
            return;
        }
        if val == 1.0 {
            self.op(Opcode::LoadD1);
            return;
        }
        let ival = val.round() as i64;
        if ival as f64 == val && (-1..=0xffff).contains(&ival) {
            self.load_int(ival as i32);
            self.op(Opcode::IntToDouble);
        } else {
            self.op_arg(Opcode::LoadDouble, Arg::Double(val));
        }
    }

    fn load_null(&mut self, ty: &StaticType) {
        if ty.is_ref() {
            self.op(Opcode::LoadNull);
        } else if ty.is_bool() {
            self.op(Opcode::LoadNullBool);
        } else if ty.is_float() {
            self.op(Opcode::LoadNullFloat);
        } else if ty.is_double() {
            self.op(Opcode::LoadNullDouble);
        } else {
            panic!("invalid type for null literal: {}", ty);
        }
    }

    // =================================================================
    // Unary and binary operators
    // =================================================================

    fn unary(
        &mut self,
        operand: &Expr,
        span: Span,
        int_op: Opcode,
        long_op: Option<Opcode>,
        float_op: Option<Opcode>,
        double_op: Option<Opcode>,
    ) -> Result<(), CompileError> {
        let ty = &operand.ty;
        let is_int = ty.is_integer() || ty.is_bool();
        let picked = if is_int {
            Some(int_op)
        } else if ty.is_long() {
            long_op
        } else if ty.is_float() {
            float_op
        } else if ty.is_double() {
            double_op
        } else {
            None
        };
        match picked {
            Some(opcode) => {
                self.expr(operand)?;
                self.op(opcode);
                Ok(())
            }
            None => Err(CompileError::InvalidOperation {
                message: format!("invalid unary type: {}", ty),
                span,
            }),
        }
    }

    fn binary(
        &mut self,
        expr: &Expr,
        op: BinaryOp,
        lhs: &Expr,
        rhs: &Expr,
    ) -> Result<(), CompileError> {
        let ty = &lhs.ty;

        self.expr(lhs)?;
        self.expr(rhs)?;

        // add/sub on array operands is pointer arithmetic
        if ty.is_array() && self.pointer_arithmetic(op, &expr.ty, expr.span)? {
            return Ok(());
        }

        let ops = binary_opcodes(op);
        self.emit_binary_op(&ops, ty, expr.span)
    }

    fn emit_binary_op(
        &mut self,
        ops: &BinOps,
        ty: &StaticType,
        span: Span,
    ) -> Result<(), CompileError> {
        if ty.is_integer() || ty.is_bool() {
            self.op(ops.int);
            return Ok(());
        }
        let picked = if ty.is_long() {
            ops.long
        } else if ty.is_float() {
            ops.float
        } else if ty.is_double() {
            ops.double
        } else if ty.is_ref() {
            ops.obj
        } else {
            None
        };
        match picked {
            Some(opcode) => {
                self.op(opcode);
                Ok(())
            }
            None => Err(CompileError::InvalidOperation {
                message: format!("invalid operation for type: {}", ty),
                span,
            }),
        }
    }

    /// Returns true when the operator was lowered as pointer arithmetic.
    fn pointer_arithmetic(
        &mut self,
        op: BinaryOp,
        result_ty: &StaticType,
        span: Span,
    ) -> Result<bool, CompileError> {
        // only add and subtract; subtract negates the offset first
        match op {
            BinaryOp::Add => {}
            BinaryOp::Sub => {
                self.op(Opcode::IntNeg);
            }
            _ => return Ok(false),
        }

        let arr = result_ty
            .array_of()
            .unwrap_or_else(|| panic!("pointer arithmetic on non-array: {}", result_ty));
        if arr.of.is_ref() {
            if arr.is_const {
                return Err(CompileError::InvalidOperation {
                    message: "pointer arithmetic on const reference array".to_string(),
                    span,
                });
            }
            self.op(Opcode::AddRefArray);
        } else {
            match arr.of.prim_size() {
                Some(1) => self.op(Opcode::Add8BitArray),
                Some(2) => self.op(Opcode::Add16BitArray),
                Some(4) => self.op(Opcode::Add32BitArray),
                Some(8) => self.op(Opcode::Add64BitArray),
                _ => panic!("unsized array element: {}", arr.of),
            };
        }
        Ok(true)
    }

    // =================================================================
    // Short-circuit conditions
    // =================================================================

    fn cond(&mut self, op: CondOp, operands: &[Expr], c: &mut Cond) -> Result<(), CompileError> {
        match op {
            CondOp::Or => self.or(operands, c),
            CondOp::And => self.and(operands, c),
        }
    }

    // NOTE: this could be further optimized because it doesn't optimize
    // "a && b || c && d"
    fn or(&mut self, operands: &[Expr], c: &mut Cond) -> Result<(), CompileError> {
        for (i, operand) in operands.iter().enumerate() {
            self.expr(operand)?;
            if i < operands.len() - 1 {
                let jump = self.jump(Opcode::JumpNonZero);
                c.true_jumps.push(jump);
            } else {
                let jump = self.jump(Opcode::JumpZero);
                c.false_jumps.push(jump);
            }
        }
        Ok(())
    }

    fn and(&mut self, operands: &[Expr], c: &mut Cond) -> Result<(), CompileError> {
        for operand in operands {
            self.expr(operand)?;
            let jump = self.jump(Opcode::JumpZero);
            c.false_jumps.push(jump);
        }
        Ok(())
    }

    /// Converges the jump lists into a 1/0 value on the stack.
    fn cond_end(&mut self, c: Cond) {
        // true is always the fall-through
        for patch in c.true_jumps {
            self.backpatch(patch);
        }
        self.op(Opcode::LoadI1);
        let end = self.jump(Opcode::Jump);

        for patch in c.false_jumps {
            self.backpatch(patch);
        }
        self.op(Opcode::LoadI0);

        self.backpatch(end);
    }

    // =================================================================
    // Assignment
    // =================================================================

    fn assign(&mut self, expr: &Expr, lhs: &Expr, rhs: &Expr) -> Result<(), CompileError> {
        let wide = expr.ty.is_wide();
        match &lhs.kind {
            ExprKind::Param { index } => {
                self.expr(rhs)?;
                if expr.leave {
                    self.op(if wide { Opcode::Dup2 } else { Opcode::Dup });
                }
                self.store_param(*index, &lhs.ty);
            }
            ExprKind::Local { index } => {
                self.expr(rhs)?;
                if expr.leave {
                    self.op(if wide { Opcode::Dup2 } else { Opcode::Dup });
                }
                self.store_local(*index, &lhs.ty);
            }
            ExprKind::Field(field) => {
                match self.syms.field(field.field).kind {
                    FieldKind::Define => {
                        return Err(CompileError::NotAssignable {
                            message: "cannot store to a define field".to_string(),
                            span: lhs.span,
                        });
                    }
                    FieldKind::Static => {
                        self.op(Opcode::LoadDataAddr);
                    }
                    FieldKind::Instance => {
                        let target =
                            field.target.as_deref().expect("instance field without target");
                        self.expr(target)?;
                    }
                }
                self.expr(rhs)?;
                if expr.leave {
                    self.op(if wide {
                        Opcode::Dup2Down2
                    } else {
                        Opcode::DupDown2
                    });
                }
                self.store_field(field.field, lhs.span)?;
            }
            ExprKind::Index { target, index } => {
                self.expr(target)?;
                self.expr(index)?;
                self.expr(rhs)?;
                if expr.leave {
                    self.op(if wide {
                        Opcode::Dup2Down3
                    } else {
                        Opcode::DupDown3
                    });
                }
                let arr = match &target.ty {
                    StaticType::Array(arr) => arr,
                    _ => panic!("indexed store into non-array: {}", target.ty),
                };
                self.store_index(arr);
            }
            _ => panic!("invalid assignment target"),
        }
        Ok(())
    }

    fn assign_compound(
        &mut self,
        expr: &Expr,
        op: BinaryOp,
        lhs: &Expr,
        rhs: &Expr,
    ) -> Result<(), CompileError> {
        let ty = &lhs.ty;
        let wide = ty.is_wide();

        // load the current value; fields and indexed elements duplicate
        // their addressing operands for the store back
        match &lhs.kind {
            ExprKind::Param { index } => self.load_param(*index, ty),
            ExprKind::Local { index } => self.load_local(*index, ty),
            ExprKind::Field(field) => self.load_field(field, true, lhs.span)?,
            ExprKind::Index { target, index } => self.load_index(target, index, true)?,
            _ => panic!("invalid assignment target"),
        }

        self.expr(rhs)?;

        if ty.is_array() {
            return Err(CompileError::InvalidOperation {
                message: "pointer arithmetic assignment not supported".to_string(),
                span: expr.span,
            });
        }

        // the compound operators have no reference form
        let ops = binary_opcodes(op);
        let ops = BinOps { obj: None, ..ops };
        self.emit_binary_op(&ops, ty, expr.span)?;

        if expr.leave {
            self.dup_for_target(&lhs.kind, wide);
        }

        self.store_back(lhs)?;
        Ok(())
    }

    fn increment(
        &mut self,
        expr: &Expr,
        op: UnaryOp,
        operand: &Expr,
    ) -> Result<(), CompileError> {
        let wide = expr.ty.is_wide();
        let leave = expr.leave;

        // a postfix whose result is unused is rewritten to the cheaper prefix
        let op = if !leave {
            match op {
                UnaryOp::PostIncr => UnaryOp::PreIncr,
                UnaryOp::PostDecr => UnaryOp::PreDecr,
                other => other,
            }
        } else {
            op
        };
        let post = matches!(op, UnaryOp::PostIncr | UnaryOp::PostDecr);
        let incr = matches!(op, UnaryOp::PreIncr | UnaryOp::PostIncr);

        // load the current value; fields and indexed elements duplicate
        // their addressing operands for the store back
        match &operand.kind {
            ExprKind::Param { index } => self.load_param(*index, &operand.ty),
            ExprKind::Local { index } => self.load_local(*index, &operand.ty),
            ExprKind::Field(field) => self.load_field(field, true, operand.span)?,
            ExprKind::Index { target, index } => self.load_index(target, index, true)?,
            _ => panic!("invalid assignment target"),
        }

        // postfix keeps a copy of the old value
        if post {
            self.dup_for_target(&operand.kind, wide);
        }

        let ty = &expr.ty;
        if incr {
            if ty.is_integer() {
                self.op(Opcode::IntInc);
            } else if ty.is_long() {
                self.op(Opcode::LoadL1);
                self.op(Opcode::LongAdd);
            } else if ty.is_float() {
                self.op(Opcode::LoadF1);
                self.op(Opcode::FloatAdd);
            } else if ty.is_double() {
                self.op(Opcode::LoadD1);
                self.op(Opcode::DoubleAdd);
            } else {
                return Err(CompileError::InvalidOperation {
                    message: format!("invalid increment type: {}", ty),
                    span: expr.span,
                });
            }
        } else if ty.is_integer() {
            self.op(Opcode::IntDec);
        } else if ty.is_long() {
            self.op(Opcode::LoadL1);
            self.op(Opcode::LongSub);
        } else if ty.is_float() {
            self.op(Opcode::LoadF1);
            self.op(Opcode::FloatSub);
        } else if ty.is_double() {
            self.op(Opcode::LoadD1);
            self.op(Opcode::DoubleSub);
        } else {
            return Err(CompileError::InvalidOperation {
                message: format!("invalid decrement type: {}", ty),
                span: expr.span,
            });
        }

        // prefix keeps a copy of the new value
        if leave && !post {
            self.dup_for_target(&operand.kind, wide);
        }

        self.store_back(operand)?;
        Ok(())
    }

    /// Duplicate opcode for a value about to be stored into the target:
    /// params/locals have nothing under the value, fields bury it under
    /// the base address, indexed elements under the array/index pair.
    fn dup_for_target(&mut self, target: &ExprKind, wide: bool) {
        let opcode = match target {
            ExprKind::Param { .. } | ExprKind::Local { .. } => {
                if wide {
                    Opcode::Dup2
                } else {
                    Opcode::Dup
                }
            }
            ExprKind::Field(_) => {
                if wide {
                    Opcode::Dup2Down2
                } else {
                    Opcode::DupDown2
                }
            }
            ExprKind::Index { .. } => {
                if wide {
                    Opcode::Dup2Down3
                } else {
                    Opcode::DupDown3
                }
            }
            _ => panic!("invalid assignment target"),
        };
        self.op(opcode);
    }

    fn store_back(&mut self, target: &Expr) -> Result<(), CompileError> {
        match &target.kind {
            ExprKind::Param { index } => self.store_param(*index, &target.ty),
            ExprKind::Local { index } => self.store_local(*index, &target.ty),
            ExprKind::Field(field) => self.store_field(field.field, target.span)?,
            ExprKind::Index { target: array, .. } => {
                let arr = match &array.ty {
                    StaticType::Array(arr) => arr,
                    _ => panic!("indexed store into non-array: {}", array.ty),
                };
                self.store_index(arr);
            }
            _ => panic!("invalid assignment target"),
        }
        Ok(())
    }

    // =================================================================
    // Params and locals
    // =================================================================

    fn load_param(&mut self, index: u16, ty: &StaticType) {
        let i = if ty.is_wide() {
            self.op_arg(Opcode::LoadParamWide, Arg::Int(index as i32))
        } else {
            match index {
                0 => self.op(Opcode::LoadParam0),
                1 => self.op(Opcode::LoadParam1),
                2 => self.op(Opcode::LoadParam2),
                3 => self.op(Opcode::LoadParam3),
                _ => self.op_arg(Opcode::LoadParam, Arg::Int(index as i32)),
            }
        };
        self.code[i].ty = Some(ty.clone());
    }

    fn store_param(&mut self, index: u16, ty: &StaticType) {
        let i = if ty.is_wide() {
            self.op_arg(Opcode::StoreParamWide, Arg::Int(index as i32))
        } else {
            self.op_arg(Opcode::StoreParam, Arg::Int(index as i32))
        };
        self.code[i].ty = Some(ty.clone());
    }

    fn load_local(&mut self, index: u16, ty: &StaticType) {
        let i = if ty.is_wide() {
            self.op_arg(Opcode::LoadLocalWide, Arg::Int(index as i32))
        } else {
            match index {
                0 => self.op(Opcode::LoadLocal0),
                1 => self.op(Opcode::LoadLocal1),
                2 => self.op(Opcode::LoadLocal2),
                3 => self.op(Opcode::LoadLocal3),
                4 => self.op(Opcode::LoadLocal4),
                5 => self.op(Opcode::LoadLocal5),
                6 => self.op(Opcode::LoadLocal6),
                7 => self.op(Opcode::LoadLocal7),
                _ => self.op_arg(Opcode::LoadLocal, Arg::Int(index as i32)),
            }
        };
        self.code[i].ty = Some(ty.clone());
    }

    fn store_local(&mut self, index: u16, ty: &StaticType) {
        let i = if ty.is_wide() {
            self.op_arg(Opcode::StoreLocalWide, Arg::Int(index as i32))
        } else {
            match index {
                0 => self.op(Opcode::StoreLocal0),
                1 => self.op(Opcode::StoreLocal1),
                2 => self.op(Opcode::StoreLocal2),
                3 => self.op(Opcode::StoreLocal3),
                4 => self.op(Opcode::StoreLocal4),
                5 => self.op(Opcode::StoreLocal5),
                6 => self.op(Opcode::StoreLocal6),
                7 => self.op(Opcode::StoreLocal7),
                _ => self.op_arg(Opcode::StoreLocal, Arg::Int(index as i32)),
            }
        };
        self.code[i].ty = Some(ty.clone());
    }

    // =================================================================
    // Fields
    // =================================================================

    fn load_field(
        &mut self,
        expr: &FieldExpr,
        ready_store_back: bool,
        span: Span,
    ) -> Result<(), CompileError> {
        let field = self.syms.field(expr.field);
        let ty = &field.ty;

        if field.kind == FieldKind::Define {
            self.op_arg(Opcode::LoadDefine, Arg::Field(expr.field));
            return Ok(());
        }

        if field.is_const && field.kind == FieldKind::Static {
            if !ty.is_ref() {
                return Err(CompileError::InvalidOperation {
                    message: "static const can only be used with ref fields".to_string(),
                    span,
                });
            }
            self.op_arg(Opcode::LoadConstStatic, Arg::Field(expr.field));
            return Ok(());
        }

        if field.kind == FieldKind::Static {
            self.op(Opcode::LoadDataAddr);
        } else {
            let target = expr.target.as_deref().expect("instance field without target");
            self.expr(target)?;
        }
        if ready_store_back {
            self.op(Opcode::Dup);
        }

        let is_null = self.pre_safe_nav(expr.safe_nav);

        if ty.is_ref() {
            if field.is_inline {
                self.op_arg(Opcode::LoadInlineField, Arg::Field(expr.field));
            } else if field.is_const {
                self.op_arg(Opcode::LoadConstField, Arg::Field(expr.field));
            } else {
                self.op_arg(Opcode::LoadRefField, Arg::Field(expr.field));
            }
        } else {
            let opcode = match ty.prim_size() {
                Some(1) => Opcode::Load8BitField,
                Some(2) => Opcode::Load16BitField,
                Some(4) => Opcode::Load32BitField,
                Some(8) => Opcode::Load64BitField,
                _ => panic!("field of unsized type: {}", ty),
            };
            self.op_arg(opcode, Arg::Field(expr.field));
        }

        let result_ty = field.ty.clone();
        self.post_safe_nav(&result_ty, is_null);
        Ok(())
    }

    fn store_field(&mut self, field_id: FieldId, span: Span) -> Result<(), CompileError> {
        let field = self.syms.field(field_id);
        let ty = &field.ty;

        if field.kind == FieldKind::Define {
            return Err(CompileError::NotAssignable {
                message: "cannot store to a define field".to_string(),
                span,
            });
        }

        if ty.is_ref() {
            if field.is_inline || field.is_const {
                panic!("store to inline/const reference field");
            }
            self.op_arg(Opcode::StoreRefField, Arg::Field(field_id));
        } else {
            let opcode = match ty.prim_size() {
                Some(1) => Opcode::Store8BitField,
                Some(2) => Opcode::Store16BitField,
                Some(4) => Opcode::Store32BitField,
                Some(8) => Opcode::Store64BitField,
                _ => panic!("field of unsized type: {}", ty),
            };
            self.op_arg(opcode, Arg::Field(field_id));
        }
        Ok(())
    }

    // =================================================================
    // Indexed access
    // =================================================================

    fn load_index(
        &mut self,
        target: &Expr,
        index: &Expr,
        ready_store_back: bool,
    ) -> Result<(), CompileError> {
        self.expr(target)?;
        self.expr(index)?;

        if ready_store_back {
            self.op(Opcode::Dup2);
        }

        let arr = match &target.ty {
            StaticType::Array(arr) => arr,
            _ => panic!("index into non-array: {}", target.ty),
        };
        self.load_array(arr);
        Ok(())
    }

    fn load_array(&mut self, arr: &crate::trees::ArrayType) {
        let of = &arr.of;
        let i = if of.is_ref() {
            if arr.is_const {
                self.op(Opcode::LoadConstArray)
            } else {
                self.op(Opcode::LoadRefArray)
            }
        } else {
            match of.prim_size() {
                Some(1) => self.op(Opcode::Load8BitArray),
                Some(2) => self.op(Opcode::Load16BitArray),
                Some(4) => self.op(Opcode::Load32BitArray),
                Some(8) => self.op(Opcode::Load64BitArray),
                _ => panic!("unsized array element: {}", of),
            }
        };
        self.code[i].ty = Some(of.clone());
    }

    fn store_index(&mut self, arr: &crate::trees::ArrayType) {
        let of = &arr.of;
        let i = if of.is_ref() {
            if arr.is_const {
                panic!("store into const reference array");
            }
            self.op(Opcode::StoreRefArray)
        } else {
            match of.prim_size() {
                Some(1) => self.op(Opcode::Store8BitArray),
                Some(2) => self.op(Opcode::Store16BitArray),
                Some(4) => self.op(Opcode::Store32BitArray),
                Some(8) => self.op(Opcode::Store64BitArray),
                _ => panic!("unsized array element: {}", of),
            }
        };
        self.code[i].ty = Some(of.clone());
    }

    // =================================================================
    // Calls
    // =================================================================

    fn call(&mut self, call: &CallExpr, ty: &StaticType, leave: bool) -> Result<(), CompileError> {
        let method = self.syms.method(call.method);
        let ret = &method.ret;
        let is_void = ret.is_void();

        if let Some(target) = &call.target {
            self.expr(target)?;
        }

        let is_null = if call.safe_nav {
            if call.target.is_none() {
                panic!("safe navigation without a receiver");
            }
            self.pre_safe_nav(true)
        } else {
            None
        };

        // an interpolation argument prints its first part through the
        // call itself and the rest through the stream it leaves behind
        let mut interpolation: Option<&Interpolation> = None;
        if let [arg] = call.args.as_slice() {
            if let ExprKind::Interpolation(parts) = &arg.kind {
                interpolation = Some(parts);
            }
        }
        match interpolation {
            Some(parts) => self.expr(&parts.first)?,
            None => {
                for arg in &call.args {
                    self.expr(arg)?;
                }
            }
        }

        // a property set is a normal call to a setter; with leave
        // semantics the value argument is kept by duplicating it under
        // the call's arguments
        let mut leave = leave;
        if call.prop_set && leave {
            leave = false;
            self.op(if ty.is_wide() {
                Opcode::Dup2Down3
            } else {
                Opcode::DupDown3
            });
        }

        match method.dispatch {
            DispatchKind::Virtual | DispatchKind::Override => {
                let super_call = matches!(
                    call.target.as_deref(),
                    Some(Expr {
                        kind: ExprKind::Super,
                        ..
                    })
                );
                if super_call {
                    // statically bound to the base implementation
                    self.op_arg(Opcode::Call, Arg::Method(call.method));
                } else {
                    self.op_arg(Opcode::CallVirtual, Arg::Method(call.method));
                }
            }
            DispatchKind::Native => {
                if is_void {
                    self.op_arg(Opcode::CallNativeVoid, Arg::Method(call.method));
                } else if ret.is_wide() {
                    self.op_arg(Opcode::CallNativeWide, Arg::Method(call.method));
                } else {
                    self.op_arg(Opcode::CallNative, Arg::Method(call.method));
                }
            }
            DispatchKind::Static => {
                self.op_arg(Opcode::Call, Arg::Method(call.method));
            }
        }

        if let Some(parts) = interpolation {
            for (part, print) in &parts.rest {
                self.expr(part)?;
                self.op_arg(Opcode::Call, Arg::Method(*print));
            }
        }

        self.post_safe_nav(ty, is_null);

        // pop an unused result
        if !leave && !is_void {
            self.op(if ret.is_wide() {
                Opcode::Pop2
            } else {
                Opcode::Pop
            });
        }
        Ok(())
    }

    // =================================================================
    // Safe navigation
    // =================================================================

    fn pre_safe_nav(&mut self, safe_nav: bool) -> Option<Patch> {
        if !safe_nav {
            return None;
        }
        self.op(Opcode::Dup);
        self.op(Opcode::LoadNull);
        self.op(Opcode::ObjEq);
        Some(self.jump(Opcode::JumpNonZero))
    }

    fn post_safe_nav(&mut self, ty: &StaticType, is_null: Option<Patch>) {
        let Some(is_null) = is_null else {
            return;
        };

        if ty.is_void() {
            // a skipped void call just drops the receiver
            let end = self.jump(Opcode::Jump);
            self.backpatch(is_null);
            self.op(Opcode::Pop);
            self.backpatch(end);
        } else if ty.is_primitive() {
            // substitute a type-appropriate zero for the skipped result
            let end = self.jump(Opcode::Jump);
            self.backpatch(is_null);
            self.op(Opcode::Pop);
            let zero = if ty.is_float() {
                Opcode::LoadF0
            } else if ty.is_long() {
                Opcode::LoadL0
            } else if ty.is_double() {
                Opcode::LoadD0
            } else {
                Opcode::LoadI0
            };
            self.op(zero);
            self.backpatch(end);
        } else {
            // reference results keep the null that is already there
            self.backpatch(is_null);
        }
    }

    // =================================================================
    // Casts
    // =================================================================

    fn cast(&mut self, target: &Expr, to: &StaticType, span: Span) -> Result<(), CompileError> {
        self.expr(target)?;
        match self.cast_opcode(&target.ty, to, span)? {
            Some(Opcode::Cast) => {
                let id = match to {
                    StaticType::Ref(id) => *id,
                    _ => panic!("reference cast to non-reference: {}", to),
                };
                self.op_arg(Opcode::Cast, Arg::Type(id));
            }
            Some(opcode) => {
                let i = self.op(opcode);
                self.code[i].ty = Some(to.clone());
            }
            None => {}
        }
        Ok(())
    }

    fn cast_opcode(
        &self,
        from: &StaticType,
        to: &StaticType,
        span: Span,
    ) -> Result<Option<Opcode>, CompileError> {
        if from.is_integer() || from.is_bool() {
            if to.is_integer() || to.is_bool() {
                return Ok(None);
            }
            if to.is_long() {
                return Ok(Some(Opcode::IntToLong));
            }
            if to.is_float() {
                return Ok(Some(Opcode::IntToFloat));
            }
            if to.is_double() {
                return Ok(Some(Opcode::IntToDouble));
            }
            if to.is_ref() {
                return Ok(None);
            }
        }

        if from.is_long() {
            if to.is_integer() {
                return Ok(Some(Opcode::LongToInt));
            }
            if to.is_long() {
                return Ok(None);
            }
            if to.is_float() {
                return Ok(Some(Opcode::LongToFloat));
            }
            if to.is_double() {
                return Ok(Some(Opcode::LongToDouble));
            }
        }

        if from.is_float() {
            if to.is_integer() {
                return Ok(Some(Opcode::FloatToInt));
            }
            if to.is_long() {
                return Ok(Some(Opcode::FloatToLong));
            }
            if to.is_float() {
                return Ok(None);
            }
            if to.is_double() {
                return Ok(Some(Opcode::FloatToDouble));
            }
        }

        if from.is_double() {
            if to.is_integer() {
                return Ok(Some(Opcode::DoubleToInt));
            }
            if to.is_long() {
                return Ok(Some(Opcode::DoubleToLong));
            }
            if to.is_float() {
                return Ok(Some(Opcode::DoubleToFloat));
            }
            if to.is_double() {
                return Ok(None);
            }
        }

        if from.is_ref() && to.is_ref() {
            return Ok(Some(Opcode::Cast));
        }

        Err(CompileError::InvalidCast {
            from: from.to_string(),
            to: to.to_string(),
            span,
        })
    }

    // =================================================================
    // Heap management
    // =================================================================

    fn new_expr(
        &mut self,
        of: &StaticType,
        array_len: Option<&Expr>,
        result_ty: &StaticType,
    ) -> Result<(), CompileError> {
        let alloc = self.syms.well_known.alloc;
        match array_len {
            None => {
                let id = match of {
                    StaticType::Ref(id) => *id,
                    _ => panic!("new of non-reference type: {}", of),
                };
                self.op_arg(Opcode::SizeOf, Arg::Type(id));
                let i = self.op_arg(Opcode::CallNative, Arg::Method(alloc));
                self.code[i].ty = Some(result_ty.clone());

                // run the instance initializer on the fresh object
                let init = self
                    .syms
                    .type_def(id)
                    .instance_init
                    .unwrap_or_else(|| panic!("type has no instance initializer"));
                self.op(Opcode::Dup);
                self.op_arg(Opcode::Call, Arg::Method(init));
            }
            Some(length) => {
                if of.is_ref() {
                    self.op_arg(Opcode::LoadDefine, Arg::Field(self.syms.well_known.ref_size));
                } else {
                    let size = of
                        .prim_size()
                        .unwrap_or_else(|| panic!("new array of unsized type: {}", of));
                    self.load_int(size as i32);
                }
                self.expr(length)?;
                self.op(Opcode::IntMul);
                let i = self.op_arg(Opcode::CallNative, Arg::Method(alloc));
                self.code[i].ty = Some(result_ty.clone());
            }
        }
        Ok(())
    }

    // =================================================================
    // Logging
    // =================================================================

    /// Assembles a logging statement such as `log.error("...")`: the call
    /// is wrapped in a jump that skips it entirely when the level is
    /// disabled, and the stream it returns gets a trailing newline.
    fn log_stmt(&mut self, call: &CallExpr, ty: &StaticType, span: Span) -> Result<(), CompileError> {
        // only calls on the define field itself can be gated; anything
        // else gives us nothing to test against
        let define = match call.target.as_deref() {
            Some(Expr {
                kind: ExprKind::Field(field),
                ..
            }) => {
                let def = self.syms.field(field.field);
                if def.kind == FieldKind::Define && def.is_log {
                    Some(field.field)
                } else {
                    None
                }
            }
            _ => None,
        };
        let Some(define) = define else {
            return Err(CompileError::InvalidOperation {
                message: "logging must be called on a log define field".to_string(),
                span,
            });
        };

        let gate = self
            .syms
            .method(call.method)
            .log_gate
            .expect("log method without a gate");
        let newline = self.syms.well_known.newline;

        self.op_arg(Opcode::LoadDefine, Arg::Field(define)); // load define
        self.op_arg(Opcode::Call, Arg::Method(gate)); // is level enabled?
        let skip = self.jump(Opcode::JumpZero); // jump over if disabled
        self.call(call, ty, true)?; // stream left on the stack
        self.op_arg(Opcode::Call, Arg::Method(newline)); // force newline
        self.op(Opcode::Pop); // drop the stream
        self.backpatch(skip);
        Ok(())
    }

    // =================================================================
    // Code buffer
    // =================================================================

    fn push_op(&mut self, opcode: Opcode, arg: Option<Arg>) -> usize {
        let index = self.code.len();
        self.code.push(IrOp {
            opcode,
            arg,
            ty: None,
            loc: self.loc.clone(),
            index,
        });
        index
    }

    fn op(&mut self, opcode: Opcode) -> usize {
        self.push_op(opcode, None)
    }

    fn op_arg(&mut self, opcode: Opcode, arg: Arg) -> usize {
        self.push_op(opcode, Some(arg))
    }

    /// Index of the next instruction.
    fn mark(&self) -> u32 {
        self.code.len() as u32
    }

    /// Appends a jump with a placeholder target to backpatch later.
    fn jump(&mut self, opcode: Opcode) -> Patch {
        let index = self.push_op(opcode, Some(Arg::Jump(None)));
        Patch(index)
    }

    /// Appends a jump to an already-known mark.
    fn jump_to(&mut self, opcode: Opcode, mark: u32) {
        self.push_op(opcode, Some(Arg::Jump(Some(mark))));
    }

    /// Resolves a pending jump to the next instruction.
    fn backpatch(&mut self, patch: Patch) {
        let mark = self.mark();
        self.backpatch_to(patch, mark);
    }

    fn backpatch_to(&mut self, patch: Patch, mark: u32) {
        trace!("backpatch op {} -> {}", patch.0, mark);
        self.code[patch.0].arg = Some(Arg::Jump(Some(mark)));
    }

    /// Resolves deferred gotos and checks that no placeholder survived.
    fn finish(&mut self) -> Result<(), CompileError> {
        for goto in std::mem::take(&mut self.gotos) {
            match self.marks.get(&goto.label).copied() {
                Some(mark) => self.backpatch_to(goto.patch, mark),
                None => {
                    return Err(CompileError::UnresolvedLabel {
                        label: goto.label,
                        span: goto.span,
                    });
                }
            }
        }

        for op in &self.code {
            if let Some(Arg::Jump(None)) = op.arg {
                panic!("unresolved jump at op {}", op.index);
            }
        }
        Ok(())
    }
}
