/// Per-function emission state: bytecode buffer, active locals, block scopes
/// and upvalues.
use crate::config::CompileOptions;
use crate::error::{ErrorCode, ParseError};
use crate::opcode::{Instruction, OpCode, MAX_BX};
use crate::proto::{Constant, LocalVar, Proto, UpvalDesc, UpvalKind};
use crate::token::Span;
use smol_str::SmolStr;

/// Active locals per function.
pub const MAX_VARS: usize = 200;
/// Registers per frame.
pub const MAX_REGS: usize = 255;
pub const MAX_UPVALUES: usize = 255;

/// Compiler-introduced locals. They occupy registers but can never be named.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HiddenVar {
    ForState,
    DeferHandler,
    DeferArg,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VarName {
    Named(SmolStr),
    Hidden(HiddenVar),
}

impl VarName {
    pub fn is(&self, name: &str) -> bool {
        matches!(self, VarName::Named(n) if n == name)
    }

    /// Name recorded in debug info.
    pub fn debug_name(&self) -> SmolStr {
        match self {
            VarName::Named(n) => n.clone(),
            VarName::Hidden(HiddenVar::ForState) => SmolStr::new_inline("(for state)"),
            VarName::Hidden(HiddenVar::DeferHandler) => SmolStr::new_inline("(defer)"),
            VarName::Hidden(HiddenVar::DeferArg) => SmolStr::new_inline("(defer arg)"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VarKind {
    Regular,
    /// `<const>`: read-only after declaration.
    Const,
    ToBeClosed,
    Deferred,
}

impl VarKind {
    /// Locals that cannot appear as assignment targets.
    pub fn is_read_only(self) -> bool {
        matches!(self, VarKind::Const | VarKind::ToBeClosed)
    }
}

#[derive(Clone, Debug)]
pub struct VarDesc {
    pub name: VarName,
    pub kind: VarKind,
    pub reg: u8,
    /// Index of this variable's entry in `proto.local_vars`.
    debug_index: usize,
}

/// A `break` or `continue` jump waiting for its target.
#[derive(Clone, Debug)]
pub struct PendingExit {
    pub pc: usize,
    /// Active locals when the jump was emitted.
    pub nactvar: usize,
    /// Leaving some block on the way out needs a `CLOSE`.
    pub close: bool,
}

#[derive(Clone, Debug)]
pub struct BlockScope {
    /// Active locals on entry.
    pub nactvar: usize,
    pub is_loop: bool,
    /// Some local of this block is captured, to-be-closed or deferred.
    pub upval: bool,
    /// This block or an enclosing one holds a to-be-closed or deferred local.
    pub inside_tbc: bool,
    pub breaks: Vec<PendingExit>,
    pub continues: Vec<PendingExit>,
    /// Lengths of the enclosing loop's break and continue lists on entry;
    /// exits past these were emitted inside this block.
    first_exit: (usize, usize),
}

#[derive(Clone, Debug)]
pub struct UpvalInfo {
    pub name: SmolStr,
    pub in_stack: bool,
    pub index: u8,
    pub kind: UpvalKind,
}

pub struct FuncState {
    pub proto: Proto,
    pub actvar: Vec<VarDesc>,
    pub blocks: Vec<BlockScope>,
    pub upvalues: Vec<UpvalInfo>,
    /// First free register.
    pub free_reg: u8,
    /// Returns must close upvalues or to-be-closed locals.
    pub needclose: bool,
    /// Last pc that is a jump target; instructions before it cannot be merged.
    pub(super) last_target: usize,
    /// Span stamped on emitted instructions and emission errors.
    pub span: Span,
    pub(super) fold_constants: bool,
    trace: bool,
}

impl FuncState {
    pub fn new(options: &CompileOptions, line_defined: u32) -> Self {
        let mut proto = Proto::new(options.chunk_name.clone());
        proto.line_defined = line_defined;
        FuncState {
            proto,
            actvar: Vec::new(),
            blocks: Vec::new(),
            upvalues: Vec::new(),
            free_reg: 0,
            needclose: false,
            last_target: 0,
            span: Span::new(line_defined.max(1), 0, 0),
            fold_constants: options.fold_constants,
            trace: options.trace_emission,
        }
    }

    // ---- Emission ----

    pub fn emit(&mut self, inst: Instruction) -> usize {
        let pc = self.proto.emit(inst, self.span.line);
        if self.trace {
            log::trace!("{:>4} [{}] {:?}", pc + 1, self.span.line, inst);
        }
        pc
    }

    pub fn emit_abc(&mut self, op: OpCode, a: u8, b: u8, c: u8) -> usize {
        self.emit(Instruction::abc(op, a, b, c, false))
    }

    pub fn emit_abck(&mut self, op: OpCode, a: u8, b: u8, c: u8, k: bool) -> usize {
        self.emit(Instruction::abc(op, a, b, c, k))
    }

    pub fn emit_abx(&mut self, op: OpCode, a: u8, bx: u32) -> usize {
        self.emit(Instruction::abx(op, a, bx))
    }

    pub fn emit_asbx(&mut self, op: OpCode, a: u8, sbx: i32) -> usize {
        self.emit(Instruction::asbx(op, a, sbx))
    }

    pub fn pc(&self) -> usize {
        self.proto.code_len()
    }

    /// Load constant `k` into `reg`, spilling to `LOADKX` for large pools.
    pub fn emit_loadk(&mut self, reg: u8, k: u32) {
        if k <= MAX_BX {
            self.emit_abx(OpCode::LoadK, reg, k);
        } else {
            self.emit_abx(OpCode::LoadKX, reg, 0);
            self.emit(Instruction::ax(OpCode::ExtraArg, k));
        }
    }

    pub fn add_constant(&mut self, k: Constant) -> u32 {
        self.proto.add_constant(k) as u32
    }

    pub fn string_constant(&mut self, s: &[u8]) -> u32 {
        self.add_constant(Constant::String(s.to_vec()))
    }

    pub fn set_span(&mut self, span: Span) {
        self.span = span;
    }

    // ---- Errors ----

    pub fn error(&self, code: ErrorCode, message: impl Into<String>) -> ParseError {
        ParseError::at(code, self.span, message)
    }

    pub fn limit_error(&self, what: &str, limit: usize) -> ParseError {
        let place = match self.proto.line_defined {
            0 => "main function".to_string(),
            line => format!("function at line {line}"),
        };
        self.error(
            ErrorCode::LimitExceeded,
            format!("too many {what} (limit is {limit}) in {place}"),
        )
    }

    // ---- Locals ----

    /// Number of active locals, which is also the first register past them.
    pub fn nactvar(&self) -> usize {
        self.actvar.len()
    }

    pub fn nvarstack(&self) -> u8 {
        self.actvar.len() as u8
    }

    /// Innermost active local with this name.
    pub fn search_var(&self, name: &str) -> Option<u8> {
        self.actvar
            .iter()
            .rev()
            .find(|v| v.name.is(name))
            .map(|v| v.reg)
    }

    pub fn var_kind(&self, reg: u8) -> Option<VarKind> {
        self.actvar.get(reg as usize).map(|v| v.kind)
    }

    /// Bring new locals into scope in consecutive registers starting at
    /// `nvarstack()`. Their values must already be in those registers.
    pub fn activate_locals(
        &mut self,
        vars: impl IntoIterator<Item = (VarName, VarKind)>,
    ) -> Result<(), ParseError> {
        let start_pc = self.pc() as u32;
        for (name, kind) in vars {
            if self.actvar.len() >= MAX_VARS {
                return Err(self.limit_error("local variables", MAX_VARS));
            }
            let debug_index = self.proto.local_vars.len();
            self.proto.local_vars.push(LocalVar {
                name: name.debug_name(),
                start_pc,
                end_pc: start_pc,
            });
            let reg = self.actvar.len() as u8;
            self.actvar.push(VarDesc {
                name,
                kind,
                reg,
                debug_index,
            });
        }
        Ok(())
    }

    /// Drop locals down to `level`, closing their debug ranges.
    pub fn remove_vars(&mut self, level: usize) {
        let end_pc = self.pc() as u32;
        while self.actvar.len() > level {
            if let Some(var) = self.actvar.pop() {
                if let Some(debug) = self.proto.local_vars.get_mut(var.debug_index) {
                    debug.end_pc = end_pc;
                }
            }
        }
    }

    /// The innermost local becomes visible to debug info from the current pc.
    pub fn restart_last_local(&mut self) {
        let pc = self.pc() as u32;
        if let Some(var) = self.actvar.last() {
            if let Some(debug) = self.proto.local_vars.get_mut(var.debug_index) {
                debug.start_pc = pc;
            }
        }
    }

    // ---- Upvalues ----

    pub fn search_upvalue(&self, name: &str) -> Option<u8> {
        self.upvalues
            .iter()
            .position(|u| u.name == name)
            .map(|i| i as u8)
    }

    pub fn new_upvalue(
        &mut self,
        name: SmolStr,
        in_stack: bool,
        index: u8,
        kind: UpvalKind,
    ) -> Result<u8, ParseError> {
        if self.upvalues.len() >= MAX_UPVALUES {
            return Err(self.limit_error("upvalues", MAX_UPVALUES));
        }
        self.upvalues.push(UpvalInfo {
            name,
            in_stack,
            index,
            kind,
        });
        Ok((self.upvalues.len() - 1) as u8)
    }

    /// A nested function captured the local in `reg`.
    pub fn mark_upval(&mut self, reg: u8) {
        if let Some(block) = self
            .blocks
            .iter_mut()
            .rev()
            .find(|b| b.nactvar <= reg as usize)
        {
            block.upval = true;
        }
        self.needclose = true;
    }

    /// The current block now holds a to-be-closed or deferred local.
    pub fn mark_to_be_closed(&mut self) {
        if let Some(block) = self.blocks.last_mut() {
            block.upval = true;
            block.inside_tbc = true;
        }
        self.needclose = true;
    }

    pub fn inside_tbc(&self) -> bool {
        self.blocks.last().map_or(false, |b| b.inside_tbc)
    }

    // ---- Blocks ----

    pub fn enter_block(&mut self, is_loop: bool) {
        let inside_tbc = self.inside_tbc();
        let first_exit = self
            .blocks
            .iter()
            .rev()
            .find(|b| b.is_loop)
            .map_or((0, 0), |lp| (lp.breaks.len(), lp.continues.len()));
        self.blocks.push(BlockScope {
            nactvar: self.nactvar(),
            is_loop,
            upval: false,
            inside_tbc,
            breaks: Vec::new(),
            continues: Vec::new(),
            first_exit,
        });
        debug_assert_eq!(self.free_reg, self.nvarstack());
    }

    /// Close the innermost block: drop its locals, resolve pending breaks
    /// when it is a loop, and emit `CLOSE` for captured or to-be-closed locals.
    /// Returns whether the block held such locals.
    pub fn leave_block(&mut self) -> Result<bool, ParseError> {
        let Some(block) = self.blocks.pop() else {
            return Ok(false);
        };
        let level = block.nactvar as u8;
        self.remove_vars(block.nactvar);
        let mut has_close = false;
        if block.is_loop {
            debug_assert!(block.continues.is_empty());
            let target = self.get_label();
            for exit in &block.breaks {
                self.fix_jump(exit.pc, target)?;
            }
            if block.breaks.iter().any(|e| e.close) {
                self.emit_abc(OpCode::Close, level, 0, 0);
                has_close = true;
            }
        }
        if !has_close && !self.blocks.is_empty() && block.upval {
            self.emit_abc(OpCode::Close, level, 0, 0);
        }
        self.free_reg = level;
        if !block.is_loop {
            self.move_exits_out(&block);
        }
        Ok(block.upval)
    }

    /// Exits emitted inside `block` now leave from its entry level; the
    /// ones that skip a captured local of the block must close it.
    fn move_exits_out(&mut self, block: &BlockScope) {
        let (first_break, first_continue) = block.first_exit;
        if let Some(lp) = self.innermost_loop() {
            let breaks = lp.breaks.iter_mut().skip(first_break);
            let continues = lp.continues.iter_mut().skip(first_continue);
            for exit in breaks.chain(continues) {
                if block.upval && exit.nactvar > block.nactvar {
                    exit.close = true;
                }
                exit.nactvar = exit.nactvar.min(block.nactvar);
            }
        }
    }

    fn innermost_loop(&mut self) -> Option<&mut BlockScope> {
        self.blocks.iter_mut().rev().find(|b| b.is_loop)
    }

    pub fn in_loop(&self) -> bool {
        self.blocks.iter().any(|b| b.is_loop)
    }

    /// Emit a `break` jump. Returns false outside of any loop.
    pub fn add_break(&mut self) -> bool {
        let nactvar = self.nactvar();
        if !self.in_loop() {
            return false;
        }
        let pc = self.jump();
        if let Some(lp) = self.innermost_loop() {
            lp.breaks.push(PendingExit {
                pc,
                nactvar,
                close: false,
            });
        }
        true
    }

    /// Emit a `continue` jump. Returns false outside of any loop.
    pub fn add_continue(&mut self) -> bool {
        let nactvar = self.nactvar();
        if !self.in_loop() {
            return false;
        }
        let pc = self.jump();
        if let Some(lp) = self.innermost_loop() {
            lp.continues.push(PendingExit {
                pc,
                nactvar,
                close: false,
            });
        }
        true
    }

    /// Resolve the innermost loop's `continue` jumps to the current pc.
    pub fn patch_continues(&mut self) -> Result<(), ParseError> {
        let pending = match self.innermost_loop() {
            Some(lp) => std::mem::take(&mut lp.continues),
            None => return Ok(()),
        };
        if pending.is_empty() {
            return Ok(());
        }
        let target = self.get_label();
        for exit in &pending {
            self.fix_jump(exit.pc, target)?;
        }
        if let Some(level) = pending.iter().filter(|e| e.close).map(|e| e.nactvar).min() {
            self.emit_abc(OpCode::Close, level as u8, 0, 0);
        }
        Ok(())
    }

    // ---- Finalization ----

    /// Final pass over the code: return opcodes learn whether they close
    /// upvalues and whether the frame is vararg, and jump chains collapse.
    pub fn finish(&mut self) -> Result<(), ParseError> {
        let needclose = self.needclose;
        let is_vararg = self.proto.is_vararg;
        let num_params = self.proto.num_params;
        for pc in 0..self.proto.code.len() {
            let mut inst = self.proto.code[pc];
            match inst.opcode() {
                OpCode::Return0 | OpCode::Return1 | OpCode::Return | OpCode::TailCall => {
                    if matches!(inst.opcode(), OpCode::Return0 | OpCode::Return1) {
                        if !(needclose || is_vararg) {
                            continue;
                        }
                        inst.set_opcode(OpCode::Return);
                    }
                    if needclose {
                        inst.set_k(true);
                    }
                    if is_vararg {
                        inst.set_c(num_params + 1);
                    }
                    self.proto.code[pc] = inst;
                }
                OpCode::Jmp => {
                    let target = self.final_target(pc);
                    self.fix_jump(pc, target)?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Follow a chain of unconditional jumps.
    fn final_target(&self, mut pc: usize) -> usize {
        for _ in 0..100 {
            let inst = self.proto.code[pc];
            if inst.opcode() != OpCode::Jmp {
                break;
            }
            let dest = pc as i64 + 1 + inst.get_sj() as i64;
            if dest < 0 || dest as usize >= self.proto.code.len() || dest as usize == pc {
                break;
            }
            pc = dest as usize;
        }
        pc
    }

    /// Hand over the finished prototype with its upvalue descriptors.
    pub fn into_proto(mut self) -> Proto {
        self.proto.upvalues = self
            .upvalues
            .into_iter()
            .map(|u| UpvalDesc {
                name: Some(u.name),
                in_stack: u.in_stack,
                index: u.index,
                kind: u.kind,
            })
            .collect();
        self.proto
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fs() -> FuncState {
        FuncState::new(&CompileOptions::default(), 0)
    }

    #[test]
    fn test_locals_and_shadowing() {
        let mut fs = fs();
        fs.enter_block(false);
        fs.activate_locals([
            (VarName::Named("a".into()), VarKind::Regular),
            (VarName::Hidden(HiddenVar::ForState), VarKind::Regular),
            (VarName::Named("a".into()), VarKind::Regular),
        ])
        .unwrap();
        assert_eq!(fs.search_var("a"), Some(2));
        assert_eq!(fs.search_var("(for state)"), None);
        assert_eq!(fs.nvarstack(), 3);
        fs.remove_vars(1);
        assert_eq!(fs.search_var("a"), Some(0));
        assert_eq!(fs.proto.local_vars.len(), 3);
        assert_eq!(fs.proto.local_vars[1].name, "(for state)");
    }

    #[test]
    fn test_local_limit() {
        let mut fs = fs();
        let vars = (0..=MAX_VARS).map(|i| (VarName::Named(format!("v{i}").into()), VarKind::Regular));
        let err = fs.activate_locals(vars).unwrap_err();
        assert_eq!(err.code, ErrorCode::LimitExceeded);
        assert!(err.message.contains("limit is 200"), "{}", err.message);
        assert!(err.message.contains("main function"));
    }

    #[test]
    fn test_upvalue_limit() {
        let mut fs = fs();
        for i in 0..MAX_UPVALUES {
            fs.new_upvalue(format!("u{i}").into(), true, 0, UpvalKind::Regular)
                .unwrap();
        }
        let err = fs
            .new_upvalue("x".into(), true, 0, UpvalKind::Regular)
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::LimitExceeded);
        assert_eq!(fs.search_upvalue("u7"), Some(7));
    }

    #[test]
    fn test_break_outside_loop() {
        let mut fs = fs();
        fs.enter_block(false);
        assert!(!fs.add_break());
        assert!(!fs.add_continue());
        assert_eq!(fs.pc(), 0);
    }

    #[test]
    fn test_break_patched_at_loop_exit() {
        let mut fs = fs();
        fs.enter_block(false);
        fs.enter_block(true);
        assert!(fs.add_break());
        fs.emit_abc(OpCode::Move, 0, 0, 0);
        fs.leave_block().unwrap();
        assert_eq!(fs.proto.code[0].get_sj(), 1);
    }

    #[test]
    fn test_captured_local_closes_block() {
        let mut fs = fs();
        fs.enter_block(false);
        fs.enter_block(false);
        fs.activate_locals([(VarName::Named("x".into()), VarKind::Regular)])
            .unwrap();
        fs.free_reg = 1;
        fs.mark_upval(0);
        fs.leave_block().unwrap();
        assert_eq!(fs.proto.code.last().map(|i| i.opcode()), Some(OpCode::Close));
        assert!(fs.needclose);
        assert_eq!(fs.free_reg, 0);
    }

    #[test]
    fn test_finish_converts_returns() {
        let mut fs = fs();
        fs.proto.is_vararg = true;
        fs.emit_abc(OpCode::Return0, 0, 1, 0);
        fs.finish().unwrap();
        let ret = fs.proto.code[0];
        assert_eq!(ret.opcode(), OpCode::Return);
        assert_eq!(ret.c(), 1);
        assert!(!ret.k());
    }
}
