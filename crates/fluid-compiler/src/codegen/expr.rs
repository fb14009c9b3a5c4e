/// Expression walker: turns AST expressions into descriptors.
use super::expdesc::{ExpDesc, ExpKind};
use super::func_state::FuncState;
use super::operator::{Prepared, TernaryPlan};
use super::Compiler;
use crate::ast::{BinaryOp, Expr, ExprKind, Literal, TableExpr, TableField};
use crate::error::{ErrorCode, ParseError};
use crate::opcode::{Instruction, OpCode, FIELDS_PER_FLUSH, MAX_B, MAX_C};
use crate::proto::Constant;
use crate::token::Span;
use smol_str::SmolStr;

/// Key of a member or index access.
pub(super) enum Key<'a> {
    Name(&'a SmolStr),
    Expr(&'a Expr),
}

fn literal(lit: &Literal) -> ExpDesc {
    ExpDesc::new(match lit {
        Literal::Nil => ExpKind::Nil,
        Literal::True => ExpKind::True,
        Literal::False => ExpKind::False,
        Literal::Integer(i) => ExpKind::Int(*i),
        Literal::Float(f) => ExpKind::Float(*f),
        Literal::String(s) => ExpKind::Str(s.clone()),
    })
}

fn ceil_log2(x: u32) -> u8 {
    (32 - (x - 1).leading_zeros()) as u8
}

impl FuncState {
    /// Turn the table descriptor `t` into an access keyed by `k`.
    pub fn indexed(&mut self, t: &mut ExpDesc, mut k: ExpDesc) -> Result<(), ParseError> {
        if let ExpKind::Str(s) = &k.kind {
            let idx = self.string_constant(s);
            k.kind = ExpKind::K(idx);
        }
        let str_key = match k.kind {
            ExpKind::K(idx)
                if !k.has_jumps()
                    && idx <= MAX_B
                    && matches!(
                        self.proto.constants.get(idx as usize),
                        Some(Constant::String(_))
                    ) =>
            {
                Some(idx)
            }
            _ => None,
        };
        if matches!(t.kind, ExpKind::Upval(_)) && str_key.is_none() {
            self.exp_to_any_reg(t)?;
        }
        t.kind = match (&t.kind, str_key) {
            (ExpKind::Upval(up), Some(key)) => ExpKind::IndexUp { table: *up, key },
            (ExpKind::Local(table) | ExpKind::NonReloc(table), Some(key)) => {
                ExpKind::IndexStr { table: *table, key }
            }
            (ExpKind::Local(table) | ExpKind::NonReloc(table), None) => {
                let table = *table;
                match k.int_value() {
                    Some(i) if (0..=MAX_C as i64).contains(&i) => ExpKind::IndexInt {
                        table,
                        index: i as u8,
                    },
                    _ => {
                        let key = self.exp_to_any_reg(&mut k)?;
                        ExpKind::Indexed { table, key }
                    }
                }
            }
            _ => {
                return Err(self.error(
                    ErrorCode::InvalidSyntax,
                    "attempt to index a value without a register",
                ))
            }
        };
        Ok(())
    }

    /// Jump taken when the value in `reg` is nil.
    pub fn jump_if_nil(&mut self, reg: u8) -> Result<usize, ParseError> {
        let nil = self.add_constant(Constant::Nil);
        if nil <= MAX_B {
            return Ok(self.cond_jump(OpCode::EqK, reg, nil as u8, 0, true));
        }
        let tmp = self.free_reg;
        self.reserve_regs(1)?;
        self.load_nil(tmp, 1);
        let pc = self.cond_jump(OpCode::Eq, reg, tmp, 0, true);
        self.free_register(tmp);
        Ok(pc)
    }
}

impl Compiler<'_> {
    pub(super) fn expr(&mut self, e: &Expr) -> Result<ExpDesc, ParseError> {
        self.fs.set_span(e.span);
        match &e.kind {
            ExprKind::Literal(lit) => Ok(literal(lit)),
            ExprKind::Identifier(name) => self.single_var(name),
            ExprKind::Vararg => {
                if !self.fs.proto.is_vararg {
                    return Err(self.fs.error(
                        ErrorCode::UnexpectedToken,
                        "cannot use '...' outside a vararg function",
                    ));
                }
                let pc = self.fs.emit_abc(OpCode::VarArg, 0, 0, 1);
                Ok(ExpDesc::new(ExpKind::Vararg(pc)))
            }
            ExprKind::Function(func) => self.function_body(func, e.span),
            ExprKind::Table(table) => self.table(table, e.span),
            ExprKind::Paren(inner) => {
                let mut d = self.expr(inner)?;
                self.fs.discharge_vars(&mut d);
                Ok(d)
            }
            ExprKind::Deferred(inner) => self.deferred(inner, e.span),
            ExprKind::Member { table, name, safe } => self.index(table, Key::Name(name), *safe),
            ExprKind::Index { table, key, safe } => self.index(table, Key::Expr(key), *safe),
            ExprKind::Call(call) => self.call(call, None),
            ExprKind::Unary { op, operand } => {
                let d = self.expr(operand)?;
                self.fs.set_span(e.span);
                self.fs.prefix(*op, d)
            }
            ExprKind::Binary { op, lhs, rhs } => self.binary(*op, lhs, rhs, e.span),
            ExprKind::Ternary {
                cond,
                if_true,
                if_false,
            } => self.ternary(cond, if_true, if_false),
            ExprKind::Pipe { lhs, call, limit } => self.pipe(lhs, call, *limit),
            ExprKind::Presence(inner) => {
                let d = self.expr(inner)?;
                self.fs.set_span(e.span);
                self.fs.presence(d)
            }
            ExprKind::Update {
                target, postfix, ..
            } => self.update_expr(target, *postfix),
            ExprKind::ResultFilter(filter) => self.result_filter(filter),
        }
    }

    /// Compile a list of expressions: all but the last land in consecutive
    /// registers. Returns the last descriptor (void for an empty list) and
    /// the count.
    pub(super) fn expr_list(&mut self, exprs: &[Expr]) -> Result<(ExpDesc, usize), ParseError> {
        let Some((last, init)) = exprs.split_last() else {
            return Ok((ExpDesc::void(), 0));
        };
        for e in init {
            let mut d = self.expr(e)?;
            self.fs.exp_to_next_reg(&mut d)?;
        }
        Ok((self.expr(last)?, exprs.len()))
    }

    fn binary(&mut self, op: BinaryOp, lhs: &Expr, rhs: &Expr, span: Span) -> Result<ExpDesc, ParseError> {
        let left = self.expr(lhs)?;
        self.fs.set_span(span);
        match self.fs.prepare_binary(op, left)? {
            Prepared::Done(e) => Ok(e),
            Prepared::Pending(pending) => {
                let right = self.expr(rhs)?;
                self.fs.set_span(span);
                self.fs.complete_binary(pending, right)
            }
        }
    }

    fn ternary(&mut self, cond: &Expr, if_true: &Expr, if_false: &Expr) -> Result<ExpDesc, ParseError> {
        let c = self.expr(cond)?;
        match self.fs.prepare_ternary(c)? {
            TernaryPlan::Constant(true) => self.expr(if_true),
            TernaryPlan::Constant(false) => self.expr(if_false),
            TernaryPlan::Runtime(pending) => {
                let a = self.expr(if_true)?;
                let pending = self.fs.ternary_else(pending, a)?;
                let b = self.expr(if_false)?;
                self.fs.complete_ternary(pending, b)
            }
        }
    }

    fn key(&mut self, key: Key<'_>) -> Result<ExpDesc, ParseError> {
        match key {
            Key::Name(name) => Ok(ExpDesc::new(ExpKind::Str(name.as_bytes().to_vec()))),
            Key::Expr(e) => {
                let mut k = self.expr(e)?;
                self.fs.exp_to_val(&mut k)?;
                Ok(k)
            }
        }
    }

    /// `t.name`, `t[k]` and their nil-safe forms.
    pub(super) fn index(&mut self, table: &Expr, key: Key<'_>, safe: bool) -> Result<ExpDesc, ParseError> {
        let mut t = self.expr(table)?;
        if !safe {
            self.fs.exp_to_any_reg_up(&mut t)?;
            let k = self.key(key)?;
            self.fs.indexed(&mut t, k)?;
            return Ok(t);
        }
        let reg = self.fs.exp_to_next_reg(&mut t)?;
        let if_nil = self.fs.jump_if_nil(reg)?;
        let k = self.key(key)?;
        let mut access = ExpDesc::new(ExpKind::NonReloc(reg));
        self.fs.indexed(&mut access, k)?;
        self.fs.discharge_vars(&mut access);
        self.fs.reserve_regs(1)?;
        self.fs.exp_to_reg(&mut access, reg)?;
        self.fs.patch_to_here(Some(if_nil))?;
        Ok(ExpDesc::new(ExpKind::NonReloc(reg)))
    }

    fn table(&mut self, table: &TableExpr, span: Span) -> Result<ExpDesc, ParseError> {
        let pc = self.fs.emit_abc(OpCode::NewTable, 0, 0, 0);
        self.fs.emit(Instruction::ax(OpCode::ExtraArg, 0));
        let t = self.fs.free_reg;
        self.fs.reserve_regs(1)?;
        let mut pending = ExpDesc::void();
        let mut to_store = 0u32;
        let mut array_size = 0u32;
        let mut hash_size = 0u32;
        for field in &table.fields {
            if !pending.is_void() {
                self.fs.exp_to_next_reg(&mut pending)?;
                pending = ExpDesc::void();
                if to_store == FIELDS_PER_FLUSH {
                    self.set_list(t, array_size, to_store)?;
                    array_size += to_store;
                    to_store = 0;
                }
            }
            match field {
                TableField::Array(value) => {
                    pending = self.expr(value)?;
                    to_store += 1;
                }
                TableField::Record { name, value } => {
                    self.record_field(t, Key::Name(name), value)?;
                    hash_size += 1;
                }
                TableField::Computed { key, value } => {
                    self.record_field(t, Key::Expr(key), value)?;
                    hash_size += 1;
                }
            }
        }
        if to_store > 0 {
            if pending.is_multi() {
                self.fs.set_multret(&mut pending)?;
                self.set_list(t, array_size, 0)?;
                array_size += to_store - 1;
            } else {
                if !pending.is_void() {
                    self.fs.exp_to_next_reg(&mut pending)?;
                }
                self.set_list(t, array_size, to_store)?;
                array_size += to_store;
            }
        }
        self.fs.set_span(span);
        self.set_table_size(pc, t, array_size, hash_size);
        Ok(ExpDesc::new(ExpKind::NonReloc(t)))
    }

    fn record_field(&mut self, t: u8, key: Key<'_>, value: &Expr) -> Result<(), ParseError> {
        let mark = self.fs.free_reg;
        let k = self.key(key)?;
        let mut target = ExpDesc::new(ExpKind::NonReloc(t));
        self.fs.indexed(&mut target, k)?;
        let v = self.expr(value)?;
        self.fs.store_var(&target, v)?;
        self.fs.free_reg = mark;
        Ok(())
    }

    /// Flush list items into the table at `base`; a count of 0 stores up to
    /// the top of the stack.
    fn set_list(&mut self, base: u8, nelems: u32, to_store: u32) -> Result<(), ParseError> {
        let b = to_store as u8;
        if nelems <= MAX_C {
            self.fs.emit_abc(OpCode::SetList, base, b, nelems as u8);
        } else {
            let extra = nelems / (MAX_C + 1);
            let c = (nelems % (MAX_C + 1)) as u8;
            self.fs.emit_abck(OpCode::SetList, base, b, c, true);
            self.fs.emit(Instruction::ax(OpCode::ExtraArg, extra));
        }
        self.fs.free_reg = base + 1;
        Ok(())
    }

    fn set_table_size(&mut self, pc: usize, t: u8, array_size: u32, hash_size: u32) {
        let rb = if hash_size == 0 {
            0
        } else {
            ceil_log2(hash_size) + 1
        };
        let extra = array_size / (MAX_C + 1);
        let rc = (array_size % (MAX_C + 1)) as u8;
        self.fs.proto.code[pc] = Instruction::abc(OpCode::NewTable, t, rb, rc, extra > 0);
        self.fs.proto.code[pc + 1] = Instruction::ax(OpCode::ExtraArg, extra);
    }

    /// `<{ e }>`: a parameterless closure returning `e`.
    fn deferred(&mut self, inner: &Expr, span: Span) -> Result<ExpDesc, ParseError> {
        self.open_function(span);
        self.return_values(std::slice::from_ref(inner))?;
        self.close_function(inner.span, span)
    }
}
