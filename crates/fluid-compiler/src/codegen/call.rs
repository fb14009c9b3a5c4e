/// Calls: argument lists, method calls, pipes and result filters.
use super::expdesc::{ExpDesc, ExpKind};
use super::func_state::{FuncState, MAX_REGS};
use super::Compiler;
use crate::ast::{CallExpr, CallTarget, Expr, ExprKind, ResultFilter};
use crate::error::{ErrorCode, ParseError};
use crate::opcode::OpCode;
use smol_str::SmolStr;

/// Global receiving filtered call results.
const FILTER_FN: &str = "__filter";
/// Globals behind `raise` and `check`.
pub(super) const RAISE_FN: &str = "__raise";
pub(super) const CHECK_FN: &str = "__check";

/// Left-hand side of a pipe and its result limit (0 means unlimited).
type Piped<'a> = (&'a Expr, u32);

impl FuncState {
    /// `e:key`: put the receiver's method in a fresh register and the
    /// receiver right after it. Returns the register of the method.
    pub fn self_call(&mut self, e: &mut ExpDesc, key: &[u8]) -> Result<u8, ParseError> {
        let receiver = self.exp_to_any_reg(e)?;
        self.free_exp(e);
        let base = self.free_reg;
        self.reserve_regs(2)?;
        let mut k = ExpDesc::new(ExpKind::Str(key.to_vec()));
        let (c, is_k) = self.exp_to_rk(&mut k)?;
        self.emit_abck(OpCode::Self_, base, receiver, c, is_k);
        self.free_exp(&k);
        Ok(base)
    }

    /// Emit `CALL base` with every register above it as arguments, or with
    /// an open argument list. The call yields one value until adjusted.
    fn emit_call(&mut self, base: u8, open_args: bool) -> ExpDesc {
        let b = if open_args {
            0
        } else {
            self.free_reg - base
        };
        let pc = self.emit_abc(OpCode::Call, base, b, 2);
        self.free_reg = base + 1;
        ExpDesc::new(ExpKind::Call(pc))
    }
}

impl Compiler<'_> {
    pub(super) fn call(&mut self, call: &CallExpr, piped: Option<Piped<'_>>) -> Result<ExpDesc, ParseError> {
        let span = self.fs.span;
        match &call.target {
            CallTarget::Direct(callee) => {
                let mut func = self.expr(callee)?;
                let base = self.fs.exp_to_next_reg(&mut func)?;
                let open = self.call_args(&call.args, piped)?;
                self.fs.set_span(span);
                Ok(self.fs.emit_call(base, open))
            }
            CallTarget::Method {
                receiver,
                name,
                safe: false,
            } => {
                let mut recv = self.expr(receiver)?;
                let base = self.fs.self_call(&mut recv, name.as_bytes())?;
                let open = self.call_args(&call.args, piped)?;
                self.fs.set_span(span);
                Ok(self.fs.emit_call(base, open))
            }
            CallTarget::Method {
                receiver,
                name,
                safe: true,
            } => {
                let mut recv = self.expr(receiver)?;
                let reg = self.fs.exp_to_next_reg(&mut recv)?;
                let if_nil = self.fs.jump_if_nil(reg)?;
                let mut recv = ExpDesc::new(ExpKind::NonReloc(reg));
                let base = self.fs.self_call(&mut recv, name.as_bytes())?;
                let open = self.call_args(&call.args, piped)?;
                self.fs.set_span(span);
                let mut result = self.fs.emit_call(base, open);
                self.fs.set_one_ret(&mut result);
                self.fs.patch_to_here(Some(if_nil))?;
                Ok(result)
            }
        }
    }

    /// Push the piped value(s) and the arguments above the callee.
    /// Returns whether the argument list is open-ended.
    fn call_args(&mut self, args: &[Expr], piped: Option<Piped<'_>>) -> Result<bool, ParseError> {
        let mut open = false;
        if let Some((lhs, limit)) = piped {
            let mut value = self.expr(lhs)?;
            if value.is_multi() && limit > 0 {
                if limit as usize >= MAX_REGS {
                    return Err(self.fs.error(
                        ErrorCode::LimitExceeded,
                        "function or expression needs too many registers",
                    ));
                }
                // The first value already has its register.
                self.fs.set_returns(&mut value, limit as i32)?;
                self.fs.reserve_regs(limit as u8 - 1)?;
            } else if value.is_multi() && args.is_empty() {
                self.fs.set_multret(&mut value)?;
                open = true;
            } else {
                self.fs.exp_to_next_reg(&mut value)?;
            }
        }
        let (mut last, n) = self.expr_list(args)?;
        if n > 0 {
            open = last.is_multi();
            if open {
                self.fs.set_multret(&mut last)?;
            } else {
                self.fs.exp_to_next_reg(&mut last)?;
            }
        }
        Ok(open)
    }

    /// `lhs |N> f(args)`.
    pub(super) fn pipe(&mut self, lhs: &Expr, call: &Expr, limit: u32) -> Result<ExpDesc, ParseError> {
        self.fs.set_span(call.span);
        match &call.kind {
            ExprKind::Call(c) => self.call(c, Some((lhs, limit))),
            _ => Err(self.fs.error(
                ErrorCode::UnexpectedToken,
                "pipe operator requires function call on right-hand side",
            )),
        }
    }

    /// `_ENV[name](args)` as a statement: one value per argument, no results.
    pub(super) fn runtime_call(&mut self, name: &str, args: &[&Expr]) -> Result<(), ParseError> {
        let span = self.fs.span;
        let mut func = self.global_var(name)?;
        let base = self.fs.exp_to_next_reg(&mut func)?;
        for arg in args {
            let mut e = self.expr(arg)?;
            self.fs.exp_to_next_reg(&mut e)?;
        }
        self.fs.set_span(span);
        let call = self.fs.emit_call(base, false);
        if let ExpKind::Call(pc) = call.kind {
            self.fs.proto.code[pc].set_c(1);
        }
        Ok(())
    }

    /// `[mask]f(...)` as `__filter(mask, count, trailing_keep, f(...))`.
    pub(super) fn result_filter(&mut self, filter: &ResultFilter) -> Result<ExpDesc, ParseError> {
        let span = self.fs.span;
        let mut func = self.single_var(&SmolStr::new_inline(FILTER_FN))?;
        let base = self.fs.exp_to_next_reg(&mut func)?;
        let header = [
            ExpKind::Int(filter.keep_mask as i64),
            ExpKind::Int(i64::from(filter.count)),
            if filter.trailing_keep {
                ExpKind::True
            } else {
                ExpKind::False
            },
        ];
        for kind in header {
            self.fs.exp_to_next_reg(&mut ExpDesc::new(kind))?;
        }
        let mut inner = self.expr(&filter.call)?;
        let open = inner.is_multi();
        if open {
            self.fs.set_multret(&mut inner)?;
        } else {
            self.fs.exp_to_next_reg(&mut inner)?;
        }
        self.fs.set_span(span);
        Ok(self.fs.emit_call(base, open))
    }
}
