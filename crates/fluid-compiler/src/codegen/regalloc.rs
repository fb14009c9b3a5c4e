/// Register allocation: discharging descriptors into registers and the
/// stack-discipline rules for temporaries.
use super::expdesc::{ExpDesc, ExpKind};
use super::func_state::{FuncState, MAX_REGS};
use super::Compiler;
use crate::error::{ErrorCode, ParseError};
use crate::opcode::{OpCode, MAX_B, MAX_SBX, MIN_SBX};
use crate::proto::Constant;
use std::ops::{Deref, DerefMut};

/// Result count meaning "all values".
pub const MULTRET: i32 = -1;

impl FuncState {
    /// Make sure `n` more registers fit in the frame.
    pub fn check_stack(&mut self, n: u8) -> Result<(), ParseError> {
        let needed = self.free_reg as usize + n as usize;
        if needed > self.proto.max_stack_size as usize {
            if needed >= MAX_REGS {
                return Err(self.error(
                    ErrorCode::LimitExceeded,
                    "function or expression needs too many registers",
                ));
            }
            self.proto.max_stack_size = needed as u8;
        }
        Ok(())
    }

    pub fn reserve_regs(&mut self, n: u8) -> Result<(), ParseError> {
        self.check_stack(n)?;
        self.free_reg += n;
        Ok(())
    }

    /// Release a temporary. Locals are never released here.
    pub fn free_register(&mut self, reg: u8) {
        if reg >= self.nvarstack() {
            self.free_reg = self.free_reg.saturating_sub(1);
            debug_assert_eq!(reg, self.free_reg, "temporaries freed out of order");
        }
    }

    /// Release two temporaries, higher register first.
    fn free_regs(&mut self, r1: Option<u8>, r2: Option<u8>) {
        let (hi, lo) = if r1 > r2 { (r1, r2) } else { (r2, r1) };
        for reg in [hi, lo].into_iter().flatten() {
            self.free_register(reg);
        }
    }

    pub fn free_exp(&mut self, e: &ExpDesc) {
        if let ExpKind::NonReloc(reg) = e.kind {
            self.free_register(reg);
        }
    }

    pub fn free_exps(&mut self, e1: &ExpDesc, e2: &ExpDesc) {
        let reg = |e: &ExpDesc| match e.kind {
            ExpKind::NonReloc(r) => Some(r),
            _ => None,
        };
        self.free_regs(reg(e1), reg(e2));
    }

    /// Fix the number of results of an open call or vararg.
    pub fn set_returns(&mut self, e: &mut ExpDesc, nresults: i32) -> Result<(), ParseError> {
        let c = (nresults + 1) as u8;
        match e.kind {
            ExpKind::Call(pc) => {
                self.proto.code[pc].set_c(c);
            }
            ExpKind::Vararg(pc) => {
                let base = self.free_reg;
                let inst = &mut self.proto.code[pc];
                inst.set_c(c);
                inst.set_a(base);
                self.reserve_regs(1)?;
            }
            _ => {}
        }
        Ok(())
    }

    pub fn set_multret(&mut self, e: &mut ExpDesc) -> Result<(), ParseError> {
        self.set_returns(e, MULTRET)
    }

    /// Truncate an open call or vararg to exactly one value.
    pub fn set_one_ret(&mut self, e: &mut ExpDesc) {
        match e.kind {
            ExpKind::Call(pc) => e.kind = ExpKind::NonReloc(self.proto.code[pc].a()),
            ExpKind::Vararg(pc) => {
                self.proto.code[pc].set_c(2);
                e.kind = ExpKind::Reloc(pc);
            }
            _ => {}
        }
    }

    /// Discharge-to-value: turn variable accessors into load instructions.
    pub fn discharge_vars(&mut self, e: &mut ExpDesc) {
        e.kind = match e.kind {
            ExpKind::Local(reg) => ExpKind::NonReloc(reg),
            ExpKind::Upval(idx) => ExpKind::Reloc(self.emit_abc(OpCode::GetUpval, 0, idx, 0)),
            ExpKind::IndexUp { table, key } => {
                ExpKind::Reloc(self.emit_abc(OpCode::GetTabUp, 0, table, key as u8))
            }
            ExpKind::IndexInt { table, index } => {
                self.free_register(table);
                ExpKind::Reloc(self.emit_abc(OpCode::GetI, 0, table, index))
            }
            ExpKind::IndexStr { table, key } => {
                self.free_register(table);
                ExpKind::Reloc(self.emit_abc(OpCode::GetField, 0, table, key as u8))
            }
            ExpKind::Indexed { table, key } => {
                self.free_regs(Some(table), Some(key));
                ExpKind::Reloc(self.emit_abc(OpCode::GetTable, 0, table, key))
            }
            ExpKind::Call(_) | ExpKind::Vararg(_) => {
                self.set_one_ret(e);
                return;
            }
            _ => return,
        };
    }

    /// Set `n` registers from `from` to nil, merging with a preceding `LOADNIL`.
    pub fn load_nil(&mut self, from: u8, n: u8) {
        let mut from = from;
        let mut last = from + n - 1;
        if let Some(prev) = self.previous_instruction() {
            if prev.opcode() == OpCode::LoadNil {
                let pfrom = prev.a();
                let plast = pfrom + prev.b();
                if (pfrom <= from && from <= plast + 1) || (from <= pfrom && pfrom <= last + 1) {
                    from = from.min(pfrom);
                    last = last.max(plast);
                    let pc = self.pc() - 1;
                    let inst = &mut self.proto.code[pc];
                    inst.set_a(from);
                    inst.set_b(last - from);
                    return;
                }
            }
        }
        self.emit_abc(OpCode::LoadNil, from, n - 1, 0);
    }

    fn load_int(&mut self, reg: u8, i: i64) {
        if (MIN_SBX as i64..=MAX_SBX as i64).contains(&i) {
            self.emit_asbx(OpCode::LoadI, reg, i as i32);
        } else {
            let k = self.add_constant(Constant::Integer(i));
            self.emit_loadk(reg, k);
        }
    }

    fn load_float(&mut self, reg: u8, f: f64) {
        let fi = f as i32;
        if (fi as f64).to_bits() == f.to_bits() && (MIN_SBX..=MAX_SBX).contains(&fi) {
            self.emit_asbx(OpCode::LoadF, reg, fi);
        } else {
            let k = self.add_constant(Constant::Float(f));
            self.emit_loadk(reg, k);
        }
    }

    /// Discharge-to-specific-register.
    pub fn discharge_to_reg(&mut self, e: &mut ExpDesc, reg: u8) {
        self.discharge_vars(e);
        match std::mem::replace(&mut e.kind, ExpKind::Void) {
            ExpKind::Nil => self.load_nil(reg, 1),
            ExpKind::False => {
                self.emit_abc(OpCode::LoadFalse, reg, 0, 0);
            }
            ExpKind::True => {
                self.emit_abc(OpCode::LoadTrue, reg, 0, 0);
            }
            ExpKind::Str(s) => {
                let k = self.string_constant(&s);
                self.emit_loadk(reg, k);
            }
            ExpKind::K(k) => self.emit_loadk(reg, k),
            ExpKind::Float(f) => self.load_float(reg, f),
            ExpKind::Int(i) => self.load_int(reg, i),
            ExpKind::Reloc(pc) => self.proto.code[pc].set_a(reg),
            ExpKind::NonReloc(src) => {
                if src != reg {
                    self.emit_abc(OpCode::Move, reg, src, 0);
                }
            }
            other => {
                // Tests and void stay as they are.
                e.kind = other;
                return;
            }
        }
        e.kind = ExpKind::NonReloc(reg);
    }

    fn discharge_to_any_reg(&mut self, e: &mut ExpDesc) -> Result<(), ParseError> {
        if !matches!(e.kind, ExpKind::NonReloc(_)) {
            self.reserve_regs(1)?;
            let reg = self.free_reg - 1;
            self.discharge_to_reg(e, reg);
        }
        Ok(())
    }

    fn code_loadbool(&mut self, reg: u8, op: OpCode) -> usize {
        self.get_label();
        self.emit_abc(op, reg, 0, 0)
    }

    /// Put the final value of `e`, pending jumps included, into `reg`.
    pub fn exp_to_reg(&mut self, e: &mut ExpDesc, reg: u8) -> Result<(), ParseError> {
        self.discharge_to_reg(e, reg);
        if let ExpKind::Jmp(pc) = e.kind {
            self.concat(&mut e.t, Some(pc))?;
        }
        if e.has_jumps() {
            let mut p_f = None;
            let mut p_t = None;
            if self.need_value(e.t) || self.need_value(e.f) {
                let fj = match e.kind {
                    ExpKind::Jmp(_) => None,
                    _ => Some(self.jump()),
                };
                p_f = Some(self.code_loadbool(reg, OpCode::LFalseSkip));
                p_t = Some(self.code_loadbool(reg, OpCode::LoadTrue));
                self.patch_to_here(fj)?;
            }
            let end = self.get_label();
            self.patch_list_aux(e.f, end, Some(reg), p_f.unwrap_or(end))?;
            self.patch_list_aux(e.t, end, Some(reg), p_t.unwrap_or(end))?;
        }
        e.t = None;
        e.f = None;
        e.kind = ExpKind::NonReloc(reg);
        Ok(())
    }

    /// Discharge-to-next-free-register.
    pub fn exp_to_next_reg(&mut self, e: &mut ExpDesc) -> Result<u8, ParseError> {
        self.discharge_vars(e);
        self.free_exp(e);
        self.reserve_regs(1)?;
        let reg = self.free_reg - 1;
        self.exp_to_reg(e, reg)?;
        Ok(reg)
    }

    /// Discharge-to-any-register: reuse the register already holding the
    /// value when possible.
    pub fn exp_to_any_reg(&mut self, e: &mut ExpDesc) -> Result<u8, ParseError> {
        self.discharge_vars(e);
        if let ExpKind::NonReloc(reg) = e.kind {
            if !e.has_jumps() {
                return Ok(reg);
            }
            if reg >= self.nvarstack() {
                self.exp_to_reg(e, reg)?;
                return Ok(reg);
            }
        }
        self.exp_to_next_reg(e)
    }

    /// Like `exp_to_any_reg`, but an upvalue may stay an upvalue.
    pub fn exp_to_any_reg_up(&mut self, e: &mut ExpDesc) -> Result<(), ParseError> {
        if !matches!(e.kind, ExpKind::Upval(_)) || e.has_jumps() {
            self.exp_to_any_reg(e)?;
        }
        Ok(())
    }

    /// Discharge-in-place: a constant or a register, whichever is cheapest.
    pub fn exp_to_val(&mut self, e: &mut ExpDesc) -> Result<(), ParseError> {
        if e.has_jumps() {
            self.exp_to_any_reg(e)?;
        } else {
            self.discharge_vars(e);
        }
        Ok(())
    }

    /// Move a constant expression into the pool if its index fits an operand.
    pub fn exp_to_k(&mut self, e: &mut ExpDesc) -> bool {
        if e.has_jumps() {
            return false;
        }
        let k = match &e.kind {
            ExpKind::K(k) => *k,
            _ => match e.literal() {
                Some(constant) => self.add_constant(constant),
                None => return false,
            },
        };
        if k <= MAX_B {
            e.kind = ExpKind::K(k);
            true
        } else {
            false
        }
    }

    /// Register or constant operand. Returns the operand and whether it is a constant.
    pub fn exp_to_rk(&mut self, e: &mut ExpDesc) -> Result<(u8, bool), ParseError> {
        if self.exp_to_k(e) {
            if let ExpKind::K(k) = e.kind {
                return Ok((k as u8, true));
            }
        }
        Ok((self.exp_to_any_reg(e)?, false))
    }

    /// Put `e` in some register for a test, without caring which.
    pub(super) fn discharge_for_test(&mut self, e: &mut ExpDesc) -> Result<u8, ParseError> {
        self.discharge_to_any_reg(e)?;
        self.free_exp(e);
        match e.kind {
            ExpKind::NonReloc(reg) => Ok(reg),
            _ => Err(self.error(ErrorCode::InvalidSyntax, "value has no register")),
        }
    }
}

/// Restores the register high-water mark when dropped. Statements run inside
/// one so every temporary they allocate is released on exit.
pub struct RegisterScope<'c, 'o> {
    compiler: &'c mut Compiler<'o>,
    mark: u8,
}

impl<'c, 'o> RegisterScope<'c, 'o> {
    pub fn new(compiler: &'c mut Compiler<'o>) -> Self {
        let mark = compiler.fs.free_reg;
        RegisterScope { compiler, mark }
    }
}

impl<'o> Deref for RegisterScope<'_, 'o> {
    type Target = Compiler<'o>;

    fn deref(&self) -> &Self::Target {
        self.compiler
    }
}

impl DerefMut for RegisterScope<'_, '_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.compiler
    }
}

impl Drop for RegisterScope<'_, '_> {
    fn drop(&mut self) {
        let fs = &mut self.compiler.fs;
        // New locals may have claimed registers above the mark.
        fs.free_reg = self.mark.max(fs.nvarstack());
    }
}
