/// Unary and binary operator emission, presence checks, and the two-phase
/// protocols for short-circuit, concatenation and if-empty operators.
use super::expdesc::{ExpDesc, ExpKind, JumpList};
use super::func_state::FuncState;
use crate::ast::{BinaryOp, UnaryOp};
use crate::error::ParseError;
use crate::opcode::{int_to_sc, OpCode, TagMethod};
use crate::proto::Constant;

/// Numeric operand of a foldable operation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    fn from_exp(e: &ExpDesc) -> Option<Number> {
        if e.has_jumps() {
            return None;
        }
        match e.kind {
            ExpKind::Int(i) => Some(Number::Int(i)),
            ExpKind::Float(f) => Some(Number::Float(f)),
            _ => None,
        }
    }

    fn as_float(self) -> f64 {
        match self {
            Number::Int(i) => i as f64,
            Number::Float(f) => f,
        }
    }

    /// Exact integer value; floats must have no fractional part.
    fn to_integer(self) -> Option<i64> {
        match self {
            Number::Int(i) => Some(i),
            Number::Float(f) => {
                if f.fract() == 0.0 && f >= -(2f64.powi(63)) && f < 2f64.powi(63) {
                    Some(f as i64)
                } else {
                    None
                }
            }
        }
    }

    fn into_exp(self) -> ExpDesc {
        match self {
            Number::Int(i) => ExpDesc::new(ExpKind::Int(i)),
            Number::Float(f) => ExpDesc::new(ExpKind::Float(f)),
        }
    }
}

fn int_mod(a: i64, b: i64) -> i64 {
    if b == -1 {
        return 0;
    }
    let r = a % b;
    if r != 0 && (r ^ b) < 0 {
        r + b
    } else {
        r
    }
}

fn int_floor_div(a: i64, b: i64) -> i64 {
    if b == -1 {
        return a.wrapping_neg();
    }
    let q = a / b;
    if (a ^ b) < 0 && a % b != 0 {
        q - 1
    } else {
        q
    }
}

fn float_mod(a: f64, b: f64) -> f64 {
    let m = a % b;
    if m != 0.0 && (m < 0.0) != (b < 0.0) {
        m + b
    } else {
        m
    }
}

fn shift_left(x: i64, y: i64) -> i64 {
    if y <= -64 || y >= 64 {
        0
    } else if y < 0 {
        ((x as u64) >> (-y) as u32) as i64
    } else {
        ((x as u64) << y as u32) as i64
    }
}

/// Fold `a op b`, or None when the operation is not safe to do at compile
/// time (division by zero, non-integral bitwise operands, NaN or zero float
/// results).
pub fn fold_binary(op: BinaryOp, a: Number, b: Number) -> Option<Number> {
    use Number::{Float, Int};
    let result = match op {
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Mod | BinaryOp::IDiv => {
            if matches!(op, BinaryOp::Mod | BinaryOp::IDiv) && b.as_float() == 0.0 {
                return None;
            }
            match (a, b) {
                (Int(x), Int(y)) => Int(match op {
                    BinaryOp::Add => x.wrapping_add(y),
                    BinaryOp::Sub => x.wrapping_sub(y),
                    BinaryOp::Mul => x.wrapping_mul(y),
                    BinaryOp::Mod => int_mod(x, y),
                    _ => int_floor_div(x, y),
                }),
                _ => {
                    let (x, y) = (a.as_float(), b.as_float());
                    Float(match op {
                        BinaryOp::Add => x + y,
                        BinaryOp::Sub => x - y,
                        BinaryOp::Mul => x * y,
                        BinaryOp::Mod => float_mod(x, y),
                        _ => (x / y).floor(),
                    })
                }
            }
        }
        BinaryOp::Div => {
            if b.as_float() == 0.0 {
                return None;
            }
            Float(a.as_float() / b.as_float())
        }
        BinaryOp::Pow => Float(a.as_float().powf(b.as_float())),
        BinaryOp::BAnd | BinaryOp::BOr | BinaryOp::BXor | BinaryOp::Shl | BinaryOp::Shr => {
            let (x, y) = (a.to_integer()?, b.to_integer()?);
            Int(match op {
                BinaryOp::BAnd => x & y,
                BinaryOp::BOr => x | y,
                BinaryOp::BXor => x ^ y,
                BinaryOp::Shl => shift_left(x, y),
                _ => shift_left(x, y.wrapping_neg()),
            })
        }
        _ => return None,
    };
    match result {
        Float(n) if n.is_nan() || n == 0.0 => None,
        r => Some(r),
    }
}

/// Fold a unary minus or bitwise not.
pub fn fold_unary(op: UnaryOp, a: Number) -> Option<Number> {
    let result = match (op, a) {
        (UnaryOp::Neg, Number::Int(i)) => Number::Int(i.wrapping_neg()),
        (UnaryOp::Neg, Number::Float(f)) => Number::Float(-f),
        (UnaryOp::BNot, n) => Number::Int(!n.to_integer()?),
        _ => return None,
    };
    match result {
        Number::Float(n) if n.is_nan() || n == 0.0 => None,
        r => Some(r),
    }
}

fn arith_opcodes(op: BinaryOp) -> Option<(OpCode, OpCode, TagMethod)> {
    Some(match op {
        BinaryOp::Add => (OpCode::Add, OpCode::AddK, TagMethod::Add),
        BinaryOp::Sub => (OpCode::Sub, OpCode::SubK, TagMethod::Sub),
        BinaryOp::Mul => (OpCode::Mul, OpCode::MulK, TagMethod::Mul),
        BinaryOp::Mod => (OpCode::Mod, OpCode::ModK, TagMethod::Mod),
        BinaryOp::Pow => (OpCode::Pow, OpCode::PowK, TagMethod::Pow),
        BinaryOp::Div => (OpCode::Div, OpCode::DivK, TagMethod::Div),
        BinaryOp::IDiv => (OpCode::IDiv, OpCode::IDivK, TagMethod::IDiv),
        BinaryOp::BAnd => (OpCode::BAnd, OpCode::BAndK, TagMethod::BAnd),
        BinaryOp::BOr => (OpCode::BOr, OpCode::BOrK, TagMethod::BOr),
        BinaryOp::BXor => (OpCode::BXor, OpCode::BXorK, TagMethod::BXor),
        BinaryOp::Shl => (OpCode::Shl, OpCode::Shl, TagMethod::Shl),
        BinaryOp::Shr => (OpCode::Shr, OpCode::Shr, TagMethod::Shr),
        _ => return None,
    })
}

/// Small integer (or integral float) fitting a signed C operand. Returns the
/// encoded operand and whether the source value was a float.
fn sc_number(e: &ExpDesc) -> Option<(u8, bool)> {
    if e.has_jumps() {
        return None;
    }
    let (i, is_float) = match e.kind {
        ExpKind::Int(i) => (i, false),
        ExpKind::Float(f) => (Number::Float(f).to_integer()?, true),
        _ => return None,
    };
    Some((int_to_sc(i)?, is_float))
}

fn sc_int(e: &ExpDesc) -> Option<u8> {
    match e.kind {
        ExpKind::Int(i) if !e.has_jumps() => int_to_sc(i),
        _ => None,
    }
}

/// Outcome of the first phase of a binary operator.
pub enum Prepared {
    /// The result is already known; the right operand must not be emitted.
    Done(ExpDesc),
    Pending(PendingBinary),
}

/// A binary operator whose left operand is committed. Consumed by
/// `FuncState::complete_binary` once the right operand is available.
#[must_use]
pub struct PendingBinary {
    op: BinaryOp,
    left: ExpDesc,
    plan: Plan,
}

enum Plan {
    Standard,
    /// Constant-empty left operand: the right operand is the result.
    TakeRight,
    /// Left value sits in `reg`; `skip` jumps past the right operand.
    IfEmpty { reg: u8, skip: usize },
}

/// First phase of a ternary.
pub enum TernaryPlan {
    /// Constant condition: only the chosen branch is emitted.
    Constant(bool),
    Runtime(PendingTernary),
}

#[must_use]
pub struct PendingTernary {
    reg: u8,
    on_empty: JumpList,
}

/// A ternary whose true branch is emitted.
#[must_use]
pub struct TernaryElse {
    reg: u8,
    to_end: usize,
}

impl FuncState {
    /// Compile-time value of a constant descriptor.
    pub fn constant_value(&self, e: &ExpDesc) -> Option<Constant> {
        match e.kind {
            ExpKind::K(k) if !e.has_jumps() => self.proto.constants.get(k as usize).cloned(),
            _ => e.literal(),
        }
    }

    /// Known emptiness of a constant operand, when folding is enabled.
    fn constant_emptiness(&self, e: &ExpDesc) -> Option<bool> {
        if !self.fold_constants {
            return None;
        }
        self.constant_value(e).map(|k| k.is_empty_value())
    }

    pub fn prefix(&mut self, op: UnaryOp, mut e: ExpDesc) -> Result<ExpDesc, ParseError> {
        self.discharge_vars(&mut e);
        match op {
            UnaryOp::Neg | UnaryOp::BNot => {
                if self.fold_constants {
                    if let Some(n) = Number::from_exp(&e).and_then(|n| fold_unary(op, n)) {
                        return Ok(n.into_exp());
                    }
                }
                let opcode = if op == UnaryOp::Neg {
                    OpCode::Unm
                } else {
                    OpCode::BNot
                };
                self.code_unary(opcode, e)
            }
            UnaryOp::Len => self.code_unary(OpCode::Len, e),
            UnaryOp::Not => self.code_not(e),
        }
    }

    fn code_unary(&mut self, op: OpCode, mut e: ExpDesc) -> Result<ExpDesc, ParseError> {
        let reg = self.exp_to_any_reg(&mut e)?;
        self.free_exp(&e);
        let pc = self.emit_abc(op, 0, reg, 0);
        Ok(ExpDesc::new(ExpKind::Reloc(pc)))
    }

    fn code_not(&mut self, mut e: ExpDesc) -> Result<ExpDesc, ParseError> {
        match e.kind {
            ExpKind::Nil | ExpKind::False => e.kind = ExpKind::True,
            ExpKind::True | ExpKind::Str(_) | ExpKind::Int(_) | ExpKind::Float(_) => {
                e.kind = ExpKind::False
            }
            ExpKind::K(k) => {
                let falsey = matches!(
                    self.proto.constants.get(k as usize),
                    Some(Constant::Nil | Constant::Boolean(false))
                );
                e.kind = if falsey { ExpKind::True } else { ExpKind::False };
            }
            ExpKind::Jmp(pc) => self.negate_condition(pc),
            _ => {
                let reg = self.discharge_for_test(&mut e)?;
                let pc = self.emit_abc(OpCode::Not, 0, reg, 0);
                e.kind = ExpKind::Reloc(pc);
            }
        }
        std::mem::swap(&mut e.t, &mut e.f);
        self.remove_values(e.f);
        self.remove_values(e.t);
        Ok(e)
    }

    /// Presence check under the extended falsey rule. The result is a
    /// boolean descriptor whose false list holds the jumps taken when the
    /// operand is empty.
    pub fn presence(&mut self, mut e: ExpDesc) -> Result<ExpDesc, ParseError> {
        self.discharge_vars(&mut e);
        if let Some(empty) = self.constant_emptiness(&e) {
            let kind = if empty { ExpKind::False } else { ExpKind::True };
            return Ok(ExpDesc::new(kind));
        }
        if let ExpKind::Jmp(_) = e.kind {
            // A comparison is a plain boolean: only false is empty.
            self.go_if_true(&mut e)?;
            return Ok(ExpDesc {
                kind: ExpKind::True,
                t: None,
                f: e.f,
            });
        }
        let reg = self.exp_to_any_reg(&mut e)?;
        let on_empty = self.jump_if_empty(reg)?;
        self.free_exp(&e);
        Ok(ExpDesc {
            kind: ExpKind::True,
            t: None,
            f: on_empty,
        })
    }

    /// Jumps taken when `e` is empty; falls through when it has a value.
    /// None means the outcome is known at compile time: Some(true) when
    /// the value is always empty.
    pub fn test_empty(&mut self, e: ExpDesc) -> Result<(JumpList, Option<bool>), ParseError> {
        let p = self.presence(e)?;
        match p.kind {
            ExpKind::True if !p.has_jumps() => Ok((None, Some(false))),
            ExpKind::False if !p.has_jumps() => Ok((None, Some(true))),
            _ => Ok((p.f, None)),
        }
    }

    /// First phase of a binary operator, run before the right operand is
    /// emitted.
    pub fn prepare_binary(&mut self, op: BinaryOp, mut left: ExpDesc) -> Result<Prepared, ParseError> {
        self.discharge_vars(&mut left);
        let plan = match op {
            BinaryOp::And => {
                self.go_if_true(&mut left)?;
                Plan::Standard
            }
            BinaryOp::Or => {
                self.go_if_false(&mut left)?;
                Plan::Standard
            }
            BinaryOp::IfEmpty => match self.constant_emptiness(&left) {
                Some(true) => Plan::TakeRight,
                Some(false) => return Ok(Prepared::Done(left)),
                None => {
                    let reg = self.exp_to_next_reg(&mut left)?;
                    let on_empty = self.jump_if_empty(reg)?;
                    let skip = self.jump();
                    self.patch_to_here(on_empty)?;
                    self.free_register(reg);
                    Plan::IfEmpty { reg, skip }
                }
            },
            BinaryOp::Concat => {
                self.exp_to_next_reg(&mut left)?;
                Plan::Standard
            }
            BinaryOp::Eq | BinaryOp::Ne => {
                if Number::from_exp(&left).is_none() {
                    self.exp_to_rk(&mut left)?;
                }
                Plan::Standard
            }
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
                if sc_number(&left).is_none() {
                    self.exp_to_any_reg(&mut left)?;
                }
                Plan::Standard
            }
            _ => {
                if Number::from_exp(&left).is_none() {
                    self.exp_to_any_reg(&mut left)?;
                }
                Plan::Standard
            }
        };
        Ok(Prepared::Pending(PendingBinary { op, left, plan }))
    }

    /// Second phase: combine the committed left operand with `right`.
    pub fn complete_binary(
        &mut self,
        pending: PendingBinary,
        mut right: ExpDesc,
    ) -> Result<ExpDesc, ParseError> {
        let PendingBinary { op, mut left, plan } = pending;
        match plan {
            Plan::TakeRight => return Ok(right),
            Plan::IfEmpty { reg, skip } => {
                self.discharge_vars(&mut right);
                self.free_exp(&right);
                self.reserve_regs(1)?;
                self.exp_to_reg(&mut right, reg)?;
                self.patch_to_here(Some(skip))?;
                return Ok(ExpDesc::new(ExpKind::NonReloc(reg)));
            }
            Plan::Standard => {}
        }
        self.discharge_vars(&mut right);
        if self.fold_constants {
            if let (Some(a), Some(b)) = (Number::from_exp(&left), Number::from_exp(&right)) {
                if let Some(n) = fold_binary(op, a, b) {
                    return Ok(n.into_exp());
                }
            }
        }
        match op {
            BinaryOp::And => {
                debug_assert!(left.t.is_none());
                self.concat(&mut right.f, left.f)?;
                Ok(right)
            }
            BinaryOp::Or => {
                debug_assert!(left.f.is_none());
                self.concat(&mut right.t, left.t)?;
                Ok(right)
            }
            BinaryOp::IfEmpty => Ok(right),
            BinaryOp::Concat => {
                self.exp_to_next_reg(&mut right)?;
                self.code_concat(left, right)
            }
            BinaryOp::Add | BinaryOp::Mul => self.code_commutative(op, left, right),
            BinaryOp::Sub => {
                if let Some(e) = self.finish_bin_exp_neg(&mut left, &right, OpCode::AddI, TagMethod::Sub)? {
                    return Ok(e);
                }
                self.code_arith(op, left, right, false)
            }
            BinaryOp::Div | BinaryOp::IDiv | BinaryOp::Mod | BinaryOp::Pow => {
                self.code_arith(op, left, right, false)
            }
            BinaryOp::BAnd | BinaryOp::BOr | BinaryOp::BXor => self.code_bitwise(op, left, right),
            BinaryOp::Shl => {
                if let Some(imm) = sc_int(&left) {
                    // I << r  is coded with the operands swapped.
                    return self.finish_bin_exp_val(
                        &mut right,
                        &left,
                        OpCode::ShlI,
                        imm,
                        true,
                        OpCode::MmBinI,
                        TagMethod::Shl,
                    );
                }
                if let Some(e) = self.finish_bin_exp_neg(&mut left, &right, OpCode::ShrI, TagMethod::Shl)? {
                    return Ok(e);
                }
                self.code_bin_exp_val(op, left, right)
            }
            BinaryOp::Shr => match sc_int(&right) {
                Some(imm) => self.finish_bin_exp_val(
                    &mut left,
                    &right,
                    OpCode::ShrI,
                    imm,
                    false,
                    OpCode::MmBinI,
                    TagMethod::Shr,
                ),
                None => self.code_bin_exp_val(op, left, right),
            },
            BinaryOp::Eq | BinaryOp::Ne => self.code_eq(op == BinaryOp::Eq, left, right),
            BinaryOp::Lt => self.code_order(OpCode::Lt, left, right),
            BinaryOp::Le => self.code_order(OpCode::Le, left, right),
            // a > b is b < a
            BinaryOp::Gt => self.code_order(OpCode::Lt, right, left),
            BinaryOp::Ge => self.code_order(OpCode::Le, right, left),
        }
    }

    fn code_concat(&mut self, left: ExpDesc, right: ExpDesc) -> Result<ExpDesc, ParseError> {
        let ExpKind::NonReloc(first) = left.kind else {
            return Ok(left);
        };
        match self.previous_instruction() {
            Some(prev) if prev.opcode() == OpCode::Concat => {
                debug_assert_eq!(first + 1, prev.a());
                self.free_exp(&right);
                let pc = self.pc() - 1;
                let inst = &mut self.proto.code[pc];
                let n = inst.b();
                inst.set_a(first);
                inst.set_b(n + 1);
            }
            _ => {
                self.emit_abc(OpCode::Concat, first, 2, 0);
                self.free_exp(&right);
            }
        }
        Ok(left)
    }

    fn code_commutative(
        &mut self,
        op: BinaryOp,
        mut left: ExpDesc,
        mut right: ExpDesc,
    ) -> Result<ExpDesc, ParseError> {
        let mut flip = false;
        if Number::from_exp(&left).is_some() {
            std::mem::swap(&mut left, &mut right);
            flip = true;
        }
        if op == BinaryOp::Add {
            if let Some(imm) = sc_int(&right) {
                return self.finish_bin_exp_val(
                    &mut left,
                    &right,
                    OpCode::AddI,
                    imm,
                    flip,
                    OpCode::MmBinI,
                    TagMethod::Add,
                );
            }
        }
        self.code_arith(op, left, right, flip)
    }

    fn code_arith(
        &mut self,
        op: BinaryOp,
        mut left: ExpDesc,
        mut right: ExpDesc,
        flip: bool,
    ) -> Result<ExpDesc, ParseError> {
        if Number::from_exp(&right).is_some() && self.exp_to_k(&mut right) {
            return self.code_bin_k(op, left, right, flip);
        }
        if flip {
            std::mem::swap(&mut left, &mut right);
        }
        self.code_bin_exp_val(op, left, right)
    }

    fn code_bitwise(
        &mut self,
        op: BinaryOp,
        mut left: ExpDesc,
        mut right: ExpDesc,
    ) -> Result<ExpDesc, ParseError> {
        let mut flip = false;
        if matches!(left.kind, ExpKind::Int(_)) {
            std::mem::swap(&mut left, &mut right);
            flip = true;
        }
        if matches!(right.kind, ExpKind::Int(_)) && self.exp_to_k(&mut right) {
            return self.code_bin_k(op, left, right, flip);
        }
        if flip {
            std::mem::swap(&mut left, &mut right);
        }
        self.code_bin_exp_val(op, left, right)
    }

    fn code_bin_k(
        &mut self,
        op: BinaryOp,
        mut left: ExpDesc,
        right: ExpDesc,
        flip: bool,
    ) -> Result<ExpDesc, ParseError> {
        let (Some((_, opk, event)), ExpKind::K(k)) = (arith_opcodes(op), &right.kind) else {
            return self.code_bin_exp_val(op, left, right);
        };
        let k = *k as u8;
        self.finish_bin_exp_val(&mut left, &right, opk, k, flip, OpCode::MmBinK, event)
    }

    fn code_bin_exp_val(
        &mut self,
        op: BinaryOp,
        mut left: ExpDesc,
        mut right: ExpDesc,
    ) -> Result<ExpDesc, ParseError> {
        let Some((opcode, _, event)) = arith_opcodes(op) else {
            return Ok(left);
        };
        let v2 = self.exp_to_any_reg(&mut right)?;
        self.finish_bin_exp_val(&mut left, &right, opcode, v2, false, OpCode::MmBin, event)
    }

    /// Emit `op R v1 v2` followed by its metamethod fallback.
    #[allow(clippy::too_many_arguments)]
    fn finish_bin_exp_val(
        &mut self,
        left: &mut ExpDesc,
        right: &ExpDesc,
        op: OpCode,
        v2: u8,
        flip: bool,
        mm: OpCode,
        event: TagMethod,
    ) -> Result<ExpDesc, ParseError> {
        let v1 = self.exp_to_any_reg(left)?;
        let pc = self.emit_abc(op, 0, v1, v2);
        self.free_exps(left, right);
        self.emit_abck(mm, v1, v2, event as u8, flip);
        Ok(ExpDesc::new(ExpKind::Reloc(pc)))
    }

    /// `r - I` coded as `r + -I` (or `r << I` as `r >> -I`) when both the
    /// constant and its negation fit an immediate operand.
    fn finish_bin_exp_neg(
        &mut self,
        left: &mut ExpDesc,
        right: &ExpDesc,
        op: OpCode,
        event: TagMethod,
    ) -> Result<Option<ExpDesc>, ParseError> {
        let Some(i) = right.int_value() else {
            return Ok(None);
        };
        let (Some(neg), Some(pos)) = (i.checked_neg().and_then(int_to_sc), int_to_sc(i)) else {
            return Ok(None);
        };
        let e = self.finish_bin_exp_val(left, right, op, neg, false, OpCode::MmBinI, event)?;
        // The metamethod sees the original operand.
        let pc = self.pc() - 1;
        self.proto.code[pc].set_b(pos);
        Ok(Some(e))
    }

    fn code_eq(&mut self, is_eq: bool, mut left: ExpDesc, mut right: ExpDesc) -> Result<ExpDesc, ParseError> {
        if !matches!(left.kind, ExpKind::NonReloc(_)) {
            std::mem::swap(&mut left, &mut right);
        }
        let r1 = self.exp_to_any_reg(&mut left)?;
        let (op, r2, is_float) = if let Some((imm, is_float)) = sc_number(&right) {
            (OpCode::EqI, imm, is_float)
        } else {
            match self.exp_to_rk(&mut right)? {
                (k, true) => (OpCode::EqK, k, false),
                (reg, false) => (OpCode::Eq, reg, false),
            }
        };
        self.free_exps(&left, &right);
        let pc = self.cond_jump(op, r1, r2, u8::from(is_float), is_eq);
        Ok(ExpDesc::new(ExpKind::Jmp(pc)))
    }

    /// `op` is `Lt` or `Le`; immediate forms pick the matching `*I` opcode.
    fn code_order(&mut self, op: OpCode, mut left: ExpDesc, mut right: ExpDesc) -> Result<ExpDesc, ParseError> {
        let is_lt = op == OpCode::Lt;
        let (opcode, r1, r2, is_float) = if let Some((imm, is_float)) = sc_number(&right) {
            let r1 = self.exp_to_any_reg(&mut left)?;
            (if is_lt { OpCode::LtI } else { OpCode::LeI }, r1, imm, is_float)
        } else if let Some((imm, is_float)) = sc_number(&left) {
            // A < B becomes B > A
            let r1 = self.exp_to_any_reg(&mut right)?;
            (if is_lt { OpCode::GtI } else { OpCode::GeI }, r1, imm, is_float)
        } else {
            let r1 = self.exp_to_any_reg(&mut left)?;
            let r2 = self.exp_to_any_reg(&mut right)?;
            (op, r1, r2, false)
        };
        self.free_exps(&left, &right);
        let pc = self.cond_jump(opcode, r1, r2, u8::from(is_float), true);
        Ok(ExpDesc::new(ExpKind::Jmp(pc)))
    }

    /// First phase of `cond ? a : b`.
    pub fn prepare_ternary(&mut self, cond: ExpDesc) -> Result<TernaryPlan, ParseError> {
        let (on_empty, known) = self.test_empty(cond)?;
        if let Some(empty) = known {
            return Ok(TernaryPlan::Constant(!empty));
        }
        Ok(TernaryPlan::Runtime(PendingTernary {
            reg: self.free_reg,
            on_empty,
        }))
    }

    /// Store the true branch and open the false one.
    pub fn ternary_else(
        &mut self,
        pending: PendingTernary,
        mut if_true: ExpDesc,
    ) -> Result<TernaryElse, ParseError> {
        let reg = pending.reg;
        self.discharge_vars(&mut if_true);
        self.free_exp(&if_true);
        self.reserve_regs(1)?;
        self.exp_to_reg(&mut if_true, reg)?;
        let to_end = self.jump();
        self.patch_to_here(pending.on_empty)?;
        self.free_register(reg);
        Ok(TernaryElse { reg, to_end })
    }

    pub fn complete_ternary(
        &mut self,
        pending: TernaryElse,
        mut if_false: ExpDesc,
    ) -> Result<ExpDesc, ParseError> {
        let reg = pending.reg;
        self.discharge_vars(&mut if_false);
        self.free_exp(&if_false);
        self.reserve_regs(1)?;
        self.exp_to_reg(&mut if_false, reg)?;
        self.patch_to_here(Some(pending.to_end))?;
        Ok(ExpDesc::new(ExpKind::NonReloc(reg)))
    }
}
