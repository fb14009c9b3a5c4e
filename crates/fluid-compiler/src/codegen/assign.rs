/// Stores: plain and multiple assignment, compound assignment and `++`.
use super::expdesc::{ExpDesc, ExpKind};
use super::func_state::{FuncState, VarKind};
use super::operator::Prepared;
use super::Compiler;
use crate::ast::{AssignOp, BinaryOp, Expr, ExprKind};
use crate::error::{ErrorCode, ParseError};
use crate::opcode::{int_to_sc, OpCode, TagMethod};
use crate::proto::UpvalKind;
use smol_str::SmolStr;

impl FuncState {
    /// Store `value` into the variable `var` and release its registers.
    pub fn store_var(&mut self, var: &ExpDesc, mut value: ExpDesc) -> Result<(), ParseError> {
        let (op, a, b) = match var.kind {
            ExpKind::Local(reg) => {
                self.free_exp(&value);
                return self.exp_to_reg(&mut value, reg);
            }
            ExpKind::Upval(idx) => {
                let reg = self.exp_to_any_reg(&mut value)?;
                self.emit_abc(OpCode::SetUpval, reg, idx, 0);
                self.free_exp(&value);
                return Ok(());
            }
            ExpKind::IndexUp { table, key } => (OpCode::SetTabUp, table, key as u8),
            ExpKind::IndexInt { table, index } => (OpCode::SetI, table, index),
            ExpKind::IndexStr { table, key } => (OpCode::SetField, table, key as u8),
            ExpKind::Indexed { table, key } => (OpCode::SetTable, table, key),
            _ => {
                return Err(self.error(
                    ErrorCode::UnexpectedToken,
                    "cannot assign to this expression",
                ))
            }
        };
        let (c, is_k) = self.exp_to_rk(&mut value)?;
        self.emit_abck(op, a, b, c, is_k);
        self.free_exp(&value);
        Ok(())
    }

    /// Adjust `nexps` values (the last one is `e`) to exactly `nvars`
    /// consecutive registers.
    pub fn adjust_assign(&mut self, nvars: usize, nexps: usize, e: &mut ExpDesc) -> Result<(), ParseError> {
        let needed = nvars as i64 - nexps as i64;
        if e.is_multi() {
            let extra = (needed + 1).max(0);
            self.set_returns(e, extra as i32)?;
        } else {
            if !e.is_void() {
                self.exp_to_next_reg(e)?;
            }
            if needed > 0 {
                let from = self.free_reg;
                let n = self.register_count(needed)?;
                self.load_nil(from, n);
            }
        }
        if needed > 0 {
            let n = self.register_count(needed)?;
            self.reserve_regs(n)?;
        } else {
            self.free_reg = (self.free_reg as i64 + needed).max(0) as u8;
        }
        Ok(())
    }

    fn register_count(&self, n: i64) -> Result<u8, ParseError> {
        u8::try_from(n).map_err(|_| {
            self.error(
                ErrorCode::LimitExceeded,
                "function or expression needs too many registers",
            )
        })
    }

    /// A target assigned earlier in the list reads the local or upvalue `v`
    /// that is about to be assigned: redirect it to a copy.
    fn check_conflict(&mut self, earlier: &mut [ExpDesc], v: &ExpDesc) -> Result<(), ParseError> {
        let extra = self.free_reg;
        let mut conflict = false;
        for target in earlier.iter_mut() {
            let redirected = match (target.kind.clone(), &v.kind) {
                (ExpKind::IndexUp { table, key }, ExpKind::Upval(up)) if table == *up => {
                    Some(ExpKind::IndexStr { table: extra, key })
                }
                (ExpKind::IndexStr { table, key }, ExpKind::Local(reg)) if table == *reg => {
                    Some(ExpKind::IndexStr { table: extra, key })
                }
                (ExpKind::IndexInt { table, index }, ExpKind::Local(reg)) if table == *reg => {
                    Some(ExpKind::IndexInt {
                        table: extra,
                        index,
                    })
                }
                (ExpKind::Indexed { table, key }, ExpKind::Local(reg))
                    if table == *reg || key == *reg =>
                {
                    let swap = |r: u8| if r == *reg { extra } else { r };
                    Some(ExpKind::Indexed {
                        table: swap(table),
                        key: swap(key),
                    })
                }
                _ => None,
            };
            if let Some(kind) = redirected {
                conflict = true;
                target.kind = kind;
            }
        }
        if conflict {
            match v.kind {
                ExpKind::Local(reg) => {
                    self.emit_abc(OpCode::Move, extra, reg, 0);
                }
                ExpKind::Upval(idx) => {
                    self.emit_abc(OpCode::GetUpval, extra, idx, 0);
                }
                _ => {}
            }
            self.reserve_regs(1)?;
        }
        Ok(())
    }

    /// Load the current value of `var` into a register without releasing
    /// the table and key registers it refers to. Locals stay locals.
    fn load_lvalue(&mut self, var: &ExpDesc) -> Result<ExpDesc, ParseError> {
        let kind = match var.kind {
            ExpKind::Local(reg) => return Ok(ExpDesc::new(ExpKind::Local(reg))),
            ExpKind::Upval(idx) => self.emit_abc(OpCode::GetUpval, 0, idx, 0),
            ExpKind::IndexUp { table, key } => self.emit_abc(OpCode::GetTabUp, 0, table, key as u8),
            ExpKind::IndexInt { table, index } => self.emit_abc(OpCode::GetI, 0, table, index),
            ExpKind::IndexStr { table, key } => self.emit_abc(OpCode::GetField, 0, table, key as u8),
            ExpKind::Indexed { table, key } => self.emit_abc(OpCode::GetTable, 0, table, key),
            _ => {
                return Err(self.error(
                    ErrorCode::UnexpectedToken,
                    "cannot assign to this expression",
                ))
            }
        };
        let mut e = ExpDesc::new(ExpKind::Reloc(kind));
        self.exp_to_next_reg(&mut e)?;
        Ok(e)
    }
}

impl Compiler<'_> {
    /// Compile an assignment target without reading it.
    fn target(&mut self, target: &Expr) -> Result<ExpDesc, ParseError> {
        let var = self.expr(target)?;
        if !var.is_variable() {
            return Err(self.fs.error(
                ErrorCode::UnexpectedToken,
                "cannot assign to this expression",
            ));
        }
        if let ExprKind::Identifier(name) = &target.kind {
            self.check_writable(&var, name)?;
        }
        Ok(var)
    }

    /// Reject stores to `<const>` and `<close>` locals, directly or as upvalues.
    pub(super) fn check_writable(&self, var: &ExpDesc, name: &str) -> Result<(), ParseError> {
        let read_only = match var.kind {
            ExpKind::Local(reg) => self.fs.var_kind(reg).is_some_and(VarKind::is_read_only),
            ExpKind::Upval(idx) => self
                .fs
                .upvalues
                .get(idx as usize)
                .is_some_and(|u| u.kind != UpvalKind::Regular),
            _ => false,
        };
        if read_only {
            return Err(self.fs.error(
                ErrorCode::InvalidSyntax,
                format!("attempt to assign to const variable '{name}'"),
            ));
        }
        Ok(())
    }

    pub(super) fn assignment(
        &mut self,
        op: AssignOp,
        targets: &[Expr],
        values: &[Expr],
    ) -> Result<(), ParseError> {
        let Some(bin) = op.binary_op() else {
            return self.multiple_assignment(targets, values);
        };
        match (targets, values) {
            ([target], [value]) => self.compound_assignment(bin, target, Some(value)),
            _ => Err(self.fs.error(
                ErrorCode::UnexpectedToken,
                format!("'{}' takes a single target and a single value", op.as_str()),
            )),
        }
    }

    /// `a, b.c, d[e] = values`: targets are evaluated left to right, then
    /// the values, then the stores run right to left.
    fn multiple_assignment(&mut self, targets: &[Expr], values: &[Expr]) -> Result<(), ParseError> {
        let mut vars: Vec<ExpDesc> = Vec::with_capacity(targets.len());
        for target in targets {
            let var = self.target(target)?;
            if !vars.is_empty() && matches!(var.kind, ExpKind::Local(_) | ExpKind::Upval(_)) {
                self.fs.check_conflict(&mut vars, &var)?;
            }
            vars.push(var);
        }
        self.store_values(&vars, values)
    }

    /// Evaluate `values`, adjust them to `vars.len()` and store right to left.
    fn store_values(&mut self, vars: &[ExpDesc], values: &[Expr]) -> Result<(), ParseError> {
        let (mut last, nexps) = self.expr_list(values)?;
        let mut pending = vars.iter().rev();
        if nexps == vars.len() {
            self.fs.set_one_ret(&mut last);
            if let Some(var) = pending.next() {
                self.fs.store_var(var, last)?;
            }
        } else {
            self.fs.adjust_assign(vars.len(), nexps, &mut last)?;
        }
        for var in pending {
            let top = ExpDesc::new(ExpKind::NonReloc(self.fs.free_reg - 1));
            self.fs.store_var(var, top)?;
        }
        Ok(())
    }

    /// `target op= value` (or `target += 1` when `value` is None), reading
    /// the target's table and key once.
    pub(super) fn compound_assignment(
        &mut self,
        op: BinaryOp,
        target: &Expr,
        value: Option<&Expr>,
    ) -> Result<(), ParseError> {
        let var = self.target(target)?;
        self.compound_store(op, var, value)
    }

    fn compound_store(&mut self, op: BinaryOp, var: ExpDesc, value: Option<&Expr>) -> Result<(), ParseError> {
        let current = self.fs.load_lvalue(&var)?;
        if op == BinaryOp::IfEmpty {
            let (on_empty, known) = self.fs.test_empty(current)?;
            match known {
                Some(false) => return Ok(()),
                Some(true) => {
                    let v = self.operand(value)?;
                    return self.fs.store_var(&var, v);
                }
                None => {}
            }
            let skip = self.fs.jump();
            self.fs.patch_to_here(on_empty)?;
            let v = self.operand(value)?;
            self.fs.store_var(&var, v)?;
            return self.fs.patch_to_here(Some(skip));
        }
        let result = match self.fs.prepare_binary(op, current)? {
            Prepared::Done(e) => e,
            Prepared::Pending(pending) => {
                let right = self.operand(value)?;
                self.fs.complete_binary(pending, right)?
            }
        };
        self.fs.store_var(&var, result)
    }

    /// `global names op values`: stores go to `_ENV` whatever is in scope.
    pub(super) fn global_decl(&mut self, op: AssignOp, names: &[SmolStr], values: &[Expr]) -> Result<(), ParseError> {
        if values.is_empty() {
            return Ok(());
        }
        let mut vars = Vec::with_capacity(names.len());
        for name in names {
            vars.push(self.global_var(name)?);
        }
        match (op, &vars[..], values) {
            (AssignOp::Plain, _, _) => self.store_values(&vars, values),
            (AssignOp::IfEmpty, [var], [value]) => {
                self.compound_store(BinaryOp::IfEmpty, var.clone(), Some(value))
            }
            _ => Err(self.fs.error(
                ErrorCode::UnexpectedToken,
                format!("global '{}' takes a single name and a single value", op.as_str()),
            )),
        }
    }

    fn operand(&mut self, value: Option<&Expr>) -> Result<ExpDesc, ParseError> {
        match value {
            Some(e) => self.expr(e),
            None => Ok(ExpDesc::new(ExpKind::Int(1))),
        }
    }

    /// `x++` / `++x` used as a value: the old value for postfix, the new
    /// one for prefix.
    pub(super) fn update_expr(&mut self, target: &Expr, postfix: bool) -> Result<ExpDesc, ParseError> {
        let mark = self.fs.free_reg;
        let var = self.target(target)?;
        let mut current = self.fs.load_lvalue(&var)?;
        let old = self.fs.exp_to_next_reg(&mut current)?;
        let new = self.fs.free_reg;
        self.fs.reserve_regs(1)?;
        let one = int_to_sc(1).unwrap_or_default();
        self.fs.emit_abc(OpCode::AddI, new, old, one);
        self.fs
            .emit_abc(OpCode::MmBinI, old, one, TagMethod::Add as u8);
        self.fs
            .store_var(&var, ExpDesc::new(ExpKind::NonReloc(new)))?;
        let result = if postfix { old } else { new };
        self.fs.free_reg = mark.max(self.fs.nvarstack());
        let dest = self.fs.free_reg;
        self.fs.reserve_regs(1)?;
        if result != dest {
            self.fs.emit_abc(OpCode::Move, dest, result, 0);
        }
        Ok(ExpDesc::new(ExpKind::NonReloc(dest)))
    }
}

#[cfg(test)]
mod tests {
    use crate::codegen::compile_chunk;
    use crate::config::CompileOptions;
    use crate::opcode::{Instruction, OpCode};
    use crate::parser::tests::parse;
    use crate::proto::Proto;

    fn compile(src: &str) -> Proto {
        compile_chunk(&parse(src), &CompileOptions::default()).unwrap()
    }

    fn ops(p: &Proto) -> Vec<OpCode> {
        p.code.iter().map(|i| i.opcode()).collect()
    }

    fn find(p: &Proto, op: OpCode) -> Vec<Instruction> {
        p.code.iter().copied().filter(|i| i.opcode() == op).collect()
    }

    #[test]
    fn test_local_assignment_in_place() {
        let p = compile("local a\na = 5");
        assert_eq!(ops(&p)[1..3], [OpCode::LoadNil, OpCode::LoadI]);
        assert_eq!(p.code[2].a(), 0);
    }

    #[test]
    fn test_swap_uses_temporaries() {
        let p = compile("local a, b = 1, 2\na, b = b, a");
        let moves = find(&p, OpCode::Move);
        assert_eq!(moves.len(), 3);
        assert_eq!((moves[0].a(), moves[0].b()), (2, 1));
        assert_eq!((moves[1].a(), moves[1].b()), (1, 0));
        assert_eq!((moves[2].a(), moves[2].b()), (0, 2));
    }

    #[test]
    fn test_conflicting_table_target_is_copied() {
        let p = compile("local t, i = {}, 1\nt[i], t = 1, 2");
        let moves = find(&p, OpCode::Move);
        assert_eq!((moves[0].a(), moves[0].b()), (2, 0));
        let set = find(&p, OpCode::SetTable)[0];
        assert_eq!(set.a(), 2);
    }

    #[test]
    fn test_missing_values_become_nil() {
        let p = compile("local a, b\na, b = 1");
        let nils = find(&p, OpCode::LoadNil);
        assert_eq!(nils.len(), 2);
    }

    #[test]
    fn test_compound_on_local() {
        let p = compile("local x = 1\nx += 2");
        let add = find(&p, OpCode::AddI)[0];
        assert_eq!(add.a(), 0);
        assert_eq!(add.b(), 0);
        assert!(ops(&p).contains(&OpCode::MmBinI));
    }

    #[test]
    fn test_compound_on_field_reads_table_once() {
        let p = compile("t.x ..= 'a'");
        assert_eq!(find(&p, OpCode::GetTabUp).len(), 1);
        assert_eq!(find(&p, OpCode::GetField).len(), 1);
        assert_eq!(find(&p, OpCode::SetField).len(), 1);
        assert_eq!(find(&p, OpCode::Concat).len(), 1);
    }

    #[test]
    fn test_if_empty_assignment_skips_store() {
        let p = compile("local x\nx ??= 3");
        let o = ops(&p);
        assert!(o.contains(&OpCode::EqI));
        assert_eq!(find(&p, OpCode::LoadI).len(), 1);
        assert_eq!(find(&p, OpCode::LoadI)[0].a(), 0);
    }

    #[test]
    fn test_increment_statement() {
        let p = compile("local i = 0\ni++");
        let add = find(&p, OpCode::AddI)[0];
        assert_eq!((add.a(), add.b()), (0, 0));
    }

    #[test]
    fn test_postfix_increment_yields_old_value() {
        let p = compile("local i = 0\nlocal j = i++");
        let add = find(&p, OpCode::AddI)[0];
        assert_eq!((add.a(), add.b()), (2, 1));
        let moves = find(&p, OpCode::Move);
        // Copy of i, store back into i.
        assert_eq!((moves[0].a(), moves[0].b()), (1, 0));
        assert_eq!((moves[1].a(), moves[1].b()), (0, 2));
        assert_eq!(moves.len(), 2);
    }

    #[test]
    fn test_prefix_increment_yields_new_value() {
        let p = compile("local i = 0\nlocal j = ++i");
        let moves = find(&p, OpCode::Move);
        assert_eq!((moves.last().unwrap().a(), moves.last().unwrap().b()), (1, 2));
    }
}
