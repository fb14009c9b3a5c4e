/// Jump lists: chains of pending `JMP`s threaded through their own sJ
/// fields and patched once the target is known.
use super::expdesc::{ExpDesc, ExpKind, JumpList};
use super::func_state::FuncState;
use crate::error::{ErrorCode, ParseError};
use crate::opcode::{Instruction, OpCode, MAX_A, MAX_SJ, MIN_SJ, OFFSET_SC};
use crate::proto::Constant;

/// sJ value marking the end of a jump list.
const NO_JUMP: i32 = -1;

impl FuncState {
    /// Emit an unpatched `JMP`.
    pub fn jump(&mut self) -> usize {
        self.emit(Instruction::sj(OpCode::Jmp, NO_JUMP))
    }

    /// Mark the current pc as a jump target and return it.
    pub fn get_label(&mut self) -> usize {
        self.last_target = self.pc();
        self.last_target
    }

    /// The last instruction, when it is not a jump target.
    pub fn previous_instruction(&self) -> Option<Instruction> {
        if self.pc() > self.last_target {
            self.proto.code.last().copied()
        } else {
            None
        }
    }

    fn get_jump(&self, pc: usize) -> JumpList {
        match self.proto.code[pc].get_sj() {
            NO_JUMP => None,
            offset => Some((pc as i64 + 1 + offset as i64) as usize),
        }
    }

    pub fn fix_jump(&mut self, pc: usize, dest: usize) -> Result<(), ParseError> {
        let offset = dest as i64 - (pc as i64 + 1);
        if !(MIN_SJ as i64..=MAX_SJ as i64).contains(&offset) {
            return Err(self.error(ErrorCode::LimitExceeded, "control structure too long"));
        }
        self.proto.code[pc].set_sj(offset as i32);
        Ok(())
    }

    /// Append list `l2` to list `l1`.
    pub fn concat(&mut self, l1: &mut JumpList, l2: JumpList) -> Result<(), ParseError> {
        let Some(l2) = l2 else {
            return Ok(());
        };
        match *l1 {
            None => *l1 = Some(l2),
            Some(mut list) => {
                while let Some(next) = self.get_jump(list) {
                    list = next;
                }
                self.fix_jump(list, l2)?;
            }
        }
        Ok(())
    }

    /// The test controlling the jump at `pc`, or the jump itself when it is
    /// unconditional.
    fn jump_control(&self, pc: usize) -> usize {
        if pc >= 1 && self.proto.code[pc - 1].opcode().is_test() {
            pc - 1
        } else {
            pc
        }
    }

    /// Point a `TESTSET` guarding the jump at `node` at `reg`, or degrade it
    /// to a `TEST` when no value is needed. False when there is no `TESTSET`.
    fn patch_test_reg(&mut self, node: usize, reg: Option<u8>) -> bool {
        let ctl = self.jump_control(node);
        let inst = &mut self.proto.code[ctl];
        if inst.opcode() != OpCode::TestSet {
            return false;
        }
        match reg {
            Some(reg) if reg != inst.b() => inst.set_a(reg),
            _ => *inst = Instruction::abc(OpCode::Test, inst.b(), 0, 0, inst.k()),
        }
        true
    }

    /// Drop the value-producing half of every test in `list`.
    pub fn remove_values(&mut self, mut list: JumpList) {
        while let Some(pc) = list {
            self.patch_test_reg(pc, None);
            list = self.get_jump(pc);
        }
    }

    /// Patch `list`: jumps whose test produces a value go to `vtarget` with
    /// the value in `reg`, the others go to `dtarget`.
    pub fn patch_list_aux(
        &mut self,
        mut list: JumpList,
        vtarget: usize,
        reg: Option<u8>,
        dtarget: usize,
    ) -> Result<(), ParseError> {
        while let Some(pc) = list {
            let next = self.get_jump(pc);
            if self.patch_test_reg(pc, reg) {
                self.fix_jump(pc, vtarget)?;
            } else {
                self.fix_jump(pc, dtarget)?;
            }
            list = next;
        }
        Ok(())
    }

    pub fn patch_list(&mut self, list: JumpList, target: usize) -> Result<(), ParseError> {
        self.patch_list_aux(list, target, None, target)
    }

    pub fn patch_to_here(&mut self, list: JumpList) -> Result<(), ParseError> {
        let here = self.get_label();
        self.patch_list(list, here)
    }

    /// Some jump in `list` needs an explicit boolean (its test is not a `TESTSET`).
    pub fn need_value(&self, mut list: JumpList) -> bool {
        while let Some(pc) = list {
            if self.proto.code[self.jump_control(pc)].opcode() != OpCode::TestSet {
                return true;
            }
            list = self.get_jump(pc);
        }
        false
    }

    /// Emit a test followed by its jump; returns the jump.
    pub fn cond_jump(&mut self, op: OpCode, a: u8, b: u8, c: u8, k: bool) -> usize {
        self.emit_abck(op, a, b, c, k);
        self.jump()
    }

    pub fn negate_condition(&mut self, pc: usize) {
        let ctl = self.jump_control(pc);
        let inst = &mut self.proto.code[ctl];
        inst.set_k(!inst.k());
    }

    /// Jump when `e` is `cond`, consuming a trailing `NOT`.
    fn jump_on_cond(&mut self, e: &mut ExpDesc, cond: bool) -> Result<usize, ParseError> {
        if let ExpKind::Reloc(pc) = e.kind {
            let inst = self.proto.code[pc];
            if inst.opcode() == OpCode::Not {
                self.proto.pop_instruction();
                return Ok(self.cond_jump(OpCode::Test, inst.b(), 0, 0, !cond));
            }
        }
        let reg = self.discharge_for_test(e)?;
        Ok(self.cond_jump(OpCode::TestSet, MAX_A as u8, reg, 0, cond))
    }

    fn constant_is_truthy(&self, k: u32) -> bool {
        !matches!(
            self.proto.constants.get(k as usize),
            Some(Constant::Nil | Constant::Boolean(false))
        )
    }

    /// Fall through when `e` is true; otherwise jump via its false list.
    pub fn go_if_true(&mut self, e: &mut ExpDesc) -> Result<(), ParseError> {
        self.discharge_vars(e);
        let pc = match e.kind {
            ExpKind::Jmp(pc) => {
                self.negate_condition(pc);
                Some(pc)
            }
            ExpKind::Str(_) | ExpKind::Int(_) | ExpKind::Float(_) | ExpKind::True => None,
            ExpKind::K(k) if self.constant_is_truthy(k) => None,
            _ => Some(self.jump_on_cond(e, false)?),
        };
        self.concat(&mut e.f, pc)?;
        self.patch_to_here(e.t)?;
        e.t = None;
        Ok(())
    }

    /// Fall through when `e` is false; otherwise jump via its true list.
    pub fn go_if_false(&mut self, e: &mut ExpDesc) -> Result<(), ParseError> {
        self.discharge_vars(e);
        let pc = match e.kind {
            ExpKind::Jmp(pc) => Some(pc),
            ExpKind::Nil | ExpKind::False => None,
            ExpKind::K(k) if !self.constant_is_truthy(k) => None,
            _ => Some(self.jump_on_cond(e, true)?),
        };
        self.concat(&mut e.t, pc)?;
        self.patch_to_here(e.f)?;
        e.f = None;
        Ok(())
    }

    /// Emit the extended-falsey tests on `reg`: the returned list jumps when
    /// the value is nil, false, numeric zero or the empty string.
    pub fn jump_if_empty(&mut self, reg: u8) -> Result<JumpList, ParseError> {
        let mut list = None;
        let falsey = self.cond_jump(OpCode::Test, reg, 0, 0, false);
        self.concat(&mut list, Some(falsey))?;
        let is_zero = self.cond_jump(OpCode::EqI, reg, OFFSET_SC as u8, 0, true);
        self.concat(&mut list, Some(is_zero))?;
        let empty = self.string_constant(b"");
        let is_empty_str = if empty <= u8::MAX as u32 {
            self.cond_jump(OpCode::EqK, reg, empty as u8, 0, true)
        } else {
            debug_assert!(self.free_reg > reg, "tested register must stay allocated");
            let tmp = self.free_reg;
            self.reserve_regs(1)?;
            self.emit_loadk(tmp, empty);
            let pc = self.cond_jump(OpCode::Eq, reg, tmp, 0, true);
            self.free_register(tmp);
            pc
        };
        self.concat(&mut list, Some(is_empty_str))?;
        Ok(list)
    }
}
