/// Statement walker: control flow, declarations and returns.
use super::expdesc::{ExpDesc, ExpKind};
use super::func_state::{FuncState, HiddenVar, VarKind, VarName};
use super::call::{CHECK_FN, RAISE_FN};
use super::regalloc::{RegisterScope, MULTRET};
use super::Compiler;
use crate::ast::{
    BinaryOp, Block, Expr, ExprKind, FunctionBody, FunctionPath, IfClause, LocalName, Stmt,
    StmtKind,
};
use crate::error::{ErrorCode, ParseError};
use crate::opcode::{OpCode, MAX_BX};
use crate::token::Span;
use smol_str::SmolStr;
use std::iter;

fn hidden(var: HiddenVar, n: usize) -> impl Iterator<Item = (VarName, VarKind)> {
    iter::repeat((VarName::Hidden(var), VarKind::Regular)).take(n)
}

impl FuncState {
    /// Emit the return of `nret` values starting at `first` (MULTRET for
    /// everything up to the top).
    pub fn ret(&mut self, first: u8, nret: i32) {
        let op = match nret {
            0 => OpCode::Return0,
            1 => OpCode::Return1,
            _ => OpCode::Return,
        };
        self.emit_abc(op, first, (nret + 1) as u8, 0);
    }

    /// Point the Bx of a for-loop instruction at `dest`, forward or back.
    fn fix_for_jump(&mut self, pc: usize, dest: usize, back: bool) -> Result<(), ParseError> {
        let offset = if back {
            (pc + 1) as i64 - dest as i64
        } else {
            dest as i64 - (pc + 1) as i64
        };
        if !(0..=MAX_BX as i64).contains(&offset) {
            return Err(self.error(ErrorCode::LimitExceeded, "control structure too long"));
        }
        self.proto.code[pc].set_bx(offset as u32);
        Ok(())
    }
}

impl Compiler<'_> {
    /// Compile a statement list; every statement's temporaries are released
    /// when it completes.
    pub(super) fn block_statements(&mut self, block: &Block) -> Result<(), ParseError> {
        for stmt in &block.stmts {
            self.scoped_statement(stmt)?;
        }
        Ok(())
    }

    fn scoped_statement(&mut self, stmt: &Stmt) -> Result<(), ParseError> {
        let mut scope = RegisterScope::new(self);
        scope.statement(stmt)
    }

    /// `do ... end` style block with its own scope.
    fn block(&mut self, block: &Block) -> Result<(), ParseError> {
        self.fs.enter_block(false);
        self.block_statements(block)?;
        self.fs.leave_block()?;
        Ok(())
    }

    /// Loop body: `continue` lands after the last statement, before the
    /// body's locals are closed.
    fn loop_body(&mut self, block: &Block) -> Result<(), ParseError> {
        self.fs.enter_block(false);
        self.block_statements(block)?;
        self.fs.patch_continues()?;
        self.fs.leave_block()?;
        Ok(())
    }

    fn statement(&mut self, stmt: &Stmt) -> Result<(), ParseError> {
        self.fs.set_span(stmt.span);
        match &stmt.kind {
            StmtKind::Local { names, values } => self.local(names, values),
            StmtKind::LocalFunction { name, func } => self.local_function(name, func, stmt.span),
            StmtKind::Function { path, func } => self.function_stmt(path, func, stmt.span),
            StmtKind::If {
                clauses,
                else_block,
            } => self.if_stmt(clauses, else_block.as_ref()),
            StmtKind::While { cond, body } => self.while_stmt(cond, body),
            StmtKind::Repeat { body, cond } => self.repeat_stmt(body, cond),
            StmtKind::NumericFor {
                var,
                start,
                limit,
                step,
                body,
            } => self.numeric_for(var, [start, limit], step.as_ref(), body, stmt.span),
            StmtKind::GenericFor { names, exprs, body } => {
                self.generic_for(names, exprs, body, stmt.span)
            }
            StmtKind::Do(block) => self.block(block),
            StmtKind::Defer { func, args } => self.defer(func, args, stmt.span),
            StmtKind::Return(ret) => self.return_values(&ret.values),
            StmtKind::Break => {
                if self.fs.add_break() {
                    Ok(())
                } else {
                    Err(self.fs.error(ErrorCode::UnexpectedToken, "break outside a loop"))
                }
            }
            StmtKind::Continue => {
                if self.fs.add_continue() {
                    Ok(())
                } else {
                    Err(self
                        .fs
                        .error(ErrorCode::UnexpectedToken, "continue outside a loop"))
                }
            }
            StmtKind::Assignment {
                op,
                targets,
                values,
            } => self.assignment(*op, targets, values),
            StmtKind::Expression(e) => self.expression_stmt(e),
            StmtKind::ConditionalShorthand { condition, body } => self.shorthand(condition, body),
            StmtKind::Global { op, names, values } => self.global_decl(*op, names, values),
            StmtKind::Raise { code, message } => {
                let args: Vec<&Expr> = iter::once(code).chain(message).collect();
                self.runtime_call(RAISE_FN, &args)
            }
            StmtKind::Check(code) => self.runtime_call(CHECK_FN, &[code]),
        }
    }

    fn expression_stmt(&mut self, e: &Expr) -> Result<(), ParseError> {
        if let ExprKind::Update { target, .. } = &e.kind {
            return self.compound_assignment(BinaryOp::Add, target, None);
        }
        let d = self.expr(e)?;
        if let ExpKind::Call(pc) = d.kind {
            self.fs.proto.code[pc].set_c(1);
        }
        Ok(())
    }

    fn local(&mut self, names: &[LocalName], values: &[Expr]) -> Result<(), ParseError> {
        let mut to_close = None;
        for (i, name) in names.iter().enumerate() {
            if name.has_close {
                if to_close.is_some() {
                    return Err(self.fs.error(
                        ErrorCode::UnexpectedToken,
                        "multiple to-be-closed variables in local list",
                    ));
                }
                to_close = Some(i);
            }
        }
        let (mut last, nexps) = self.expr_list(values)?;
        self.fs.adjust_assign(names.len(), nexps, &mut last)?;
        let base = self.fs.nvarstack();
        let vars = names.iter().enumerate().map(|(i, n)| {
            let kind = if to_close == Some(i) {
                VarKind::ToBeClosed
            } else if n.is_const {
                VarKind::Const
            } else {
                VarKind::Regular
            };
            (VarName::Named(n.name.clone()), kind)
        });
        self.fs.activate_locals(vars)?;
        if let Some(i) = to_close {
            self.fs.mark_to_be_closed();
            self.fs.emit_abc(OpCode::Tbc, base + i as u8, 0, 0);
        }
        Ok(())
    }

    fn local_function(&mut self, name: &SmolStr, func: &FunctionBody, span: Span) -> Result<(), ParseError> {
        // In scope inside its own body, so it can recurse.
        self.fs
            .activate_locals([(VarName::Named(name.clone()), VarKind::Regular)])?;
        self.function_body(func, span)?;
        self.fs.restart_last_local();
        Ok(())
    }

    fn function_stmt(&mut self, path: &FunctionPath, func: &FunctionBody, span: Span) -> Result<(), ParseError> {
        let Some((first, rest)) = path.segments.split_first() else {
            return Err(self
                .fs
                .error(ErrorCode::ExpectedIdentifier, "function name expected"));
        };
        let mut var = self.single_var(first)?;
        if rest.is_empty() && path.method.is_none() {
            self.check_writable(&var, first)?;
        }
        for field in rest.iter().chain(path.method.iter()) {
            self.fs.exp_to_any_reg_up(&mut var)?;
            let key = ExpDesc::new(ExpKind::Str(field.as_bytes().to_vec()));
            self.fs.indexed(&mut var, key)?;
        }
        let closure = self.function_body(func, span)?;
        self.fs.set_span(span);
        self.fs.store_var(&var, closure)
    }

    fn if_stmt(&mut self, clauses: &[IfClause], else_block: Option<&Block>) -> Result<(), ParseError> {
        let mut escape = None;
        for (i, clause) in clauses.iter().enumerate() {
            let mut cond = self.expr(&clause.cond)?;
            self.fs.go_if_true(&mut cond)?;
            self.block(&clause.body)?;
            if i + 1 < clauses.len() || else_block.is_some() {
                let j = self.fs.jump();
                self.fs.concat(&mut escape, Some(j))?;
            }
            self.fs.patch_to_here(cond.f)?;
        }
        if let Some(block) = else_block {
            self.block(block)?;
        }
        self.fs.patch_to_here(escape)
    }

    /// Loop condition: falls through when true; returns the exit jumps.
    fn loop_condition(&mut self, cond: &Expr) -> Result<Option<usize>, ParseError> {
        let mut c = self.expr(cond)?;
        if c.kind == ExpKind::Nil && !c.has_jumps() {
            c.kind = ExpKind::False;
        }
        self.fs.go_if_true(&mut c)?;
        Ok(c.f)
    }

    fn while_stmt(&mut self, cond: &Expr, body: &Block) -> Result<(), ParseError> {
        let init = self.fs.get_label();
        let exit = self.loop_condition(cond)?;
        self.fs.enter_block(true);
        self.loop_body(body)?;
        let back = self.fs.jump();
        self.fs.patch_list(Some(back), init)?;
        self.fs.leave_block()?;
        self.fs.patch_to_here(exit)
    }

    fn repeat_stmt(&mut self, body: &Block, cond: &Expr) -> Result<(), ParseError> {
        let init = self.fs.get_label();
        self.fs.enter_block(true);
        self.fs.enter_block(false);
        self.block_statements(body)?;
        self.fs.patch_continues()?;
        let mut again = self.loop_condition(cond)?;
        if self.fs.leave_block()? {
            // Repeating must close the body's captured locals first.
            let exit = self.fs.jump();
            self.fs.patch_to_here(again)?;
            let level = self.fs.nvarstack();
            self.fs.emit_abc(OpCode::Close, level, 0, 0);
            again = Some(self.fs.jump());
            self.fs.patch_to_here(Some(exit))?;
        }
        self.fs.patch_list(again, init)?;
        self.fs.leave_block()?;
        Ok(())
    }

    fn numeric_for(
        &mut self,
        var: &SmolStr,
        bounds: [&Expr; 2],
        step: Option<&Expr>,
        body: &Block,
        span: Span,
    ) -> Result<(), ParseError> {
        self.fs.enter_block(true);
        let base = self.fs.free_reg;
        for e in bounds {
            let mut d = self.expr(e)?;
            self.fs.exp_to_next_reg(&mut d)?;
        }
        let mut step = match step {
            Some(e) => self.expr(e)?,
            None => ExpDesc::new(ExpKind::Int(1)),
        };
        self.fs.exp_to_next_reg(&mut step)?;
        self.fs.activate_locals(hidden(HiddenVar::ForState, 3))?;
        let vars = vec![(VarName::Named(var.clone()), VarKind::Regular)];
        self.for_body(base, vars, body, false, span)?;
        self.fs.leave_block()?;
        Ok(())
    }

    fn generic_for(&mut self, names: &[SmolStr], exprs: &[Expr], body: &Block, span: Span) -> Result<(), ParseError> {
        self.fs.enter_block(true);
        let base = self.fs.free_reg;
        let (mut last, nexps) = self.expr_list(exprs)?;
        self.fs.adjust_assign(4, nexps, &mut last)?;
        self.fs.activate_locals(hidden(HiddenVar::ForState, 4))?;
        // The fourth control value is closed when the loop exits.
        self.fs.mark_to_be_closed();
        self.fs.check_stack(3)?;
        let vars = names
            .iter()
            .map(|n| (VarName::Named(n.clone()), VarKind::Regular))
            .collect();
        self.for_body(base, vars, body, true, span)?;
        self.fs.leave_block()?;
        Ok(())
    }

    fn for_body(
        &mut self,
        base: u8,
        vars: Vec<(VarName, VarKind)>,
        body: &Block,
        generic: bool,
        span: Span,
    ) -> Result<(), ParseError> {
        let (prep_op, loop_op) = if generic {
            (OpCode::TForPrep, OpCode::TForLoop)
        } else {
            (OpCode::ForPrep, OpCode::ForLoop)
        };
        let prep = self.fs.emit_abx(prep_op, base, 0);
        self.fs.enter_block(false);
        let nvars = vars.len() as u8;
        self.fs.activate_locals(vars)?;
        self.fs.reserve_regs(nvars)?;
        self.loop_body(body)?;
        self.fs.leave_block()?;
        let label = self.fs.get_label();
        self.fs.fix_for_jump(prep, label, false)?;
        self.fs.set_span(span);
        if generic {
            self.fs.emit_abc(OpCode::TForCall, base, 0, nvars);
        }
        let end = self.fs.emit_abx(loop_op, base, 0);
        self.fs.fix_for_jump(end, prep + 1, true)
    }

    /// `defer (params) body end (args)`: the closure and its evaluated
    /// arguments become hidden locals closed with the enclosing scope.
    fn defer(&mut self, func: &FunctionBody, args: &[Expr], span: Span) -> Result<(), ParseError> {
        let base = self.fs.nvarstack();
        self.function_body(func, span)?;
        let (mut last, nargs) = self.expr_list(args)?;
        self.fs.adjust_assign(nargs, nargs, &mut last)?;
        let vars = iter::once((VarName::Hidden(HiddenVar::DeferHandler), VarKind::Deferred))
            .chain(hidden(HiddenVar::DeferArg, nargs));
        self.fs.activate_locals(vars)?;
        self.fs.mark_to_be_closed();
        self.fs.set_span(span);
        self.fs.emit_abc(OpCode::Defer, base, nargs as u8, 0);
        Ok(())
    }

    pub(super) fn return_values(&mut self, values: &[Expr]) -> Result<(), ParseError> {
        let mut first = self.fs.nvarstack();
        let (mut e, nexps) = self.expr_list(values)?;
        let nret = if nexps == 0 {
            0
        } else if e.is_multi() {
            self.fs.set_multret(&mut e)?;
            if let ExpKind::Call(pc) = e.kind {
                if nexps == 1 && !self.fs.inside_tbc() {
                    self.fs.proto.code[pc].set_opcode(OpCode::TailCall);
                }
            }
            MULTRET
        } else if nexps == 1 {
            first = self.fs.exp_to_any_reg(&mut e)?;
            1
        } else {
            self.fs.exp_to_next_reg(&mut e)?;
            nexps as i32
        };
        self.fs.ret(first, nret);
        Ok(())
    }

    /// `value?? return|break|continue`: the action runs when the value is
    /// empty.
    fn shorthand(&mut self, condition: &Expr, body: &Stmt) -> Result<(), ParseError> {
        let c = self.expr(condition)?;
        let (on_empty, known) = self.fs.test_empty(c)?;
        match known {
            Some(true) => return self.guarded(body),
            Some(false) => return Ok(()),
            None => {}
        }
        let present = self.fs.jump();
        self.fs.patch_to_here(on_empty)?;
        self.guarded(body)?;
        self.fs.patch_to_here(Some(present))
    }

    fn guarded(&mut self, body: &Stmt) -> Result<(), ParseError> {
        self.fs.enter_block(false);
        self.scoped_statement(body)?;
        self.fs.leave_block()?;
        Ok(())
    }
}
