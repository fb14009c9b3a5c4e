/// Fluid bytecode: the Lua 5.4 instruction set plus `DEFER`.
///
/// Instruction format (32 bits):
/// - Bits 0-6: OpCode (7 bits)
/// - Bit 7: k flag (1 bit)
/// - Bits 8-15: A (8 bits)
/// - iABC: B = bits 16-23, C = bits 24-31
/// - iABx / iAsBx: Bx = bits 16-31 (sBx is Bx minus an offset)
/// - iAx / isJ: bits 8-31 (sJ is excess-encoded)
use std::fmt;

const SIZE_OP: u32 = 7;
const SIZE_K: u32 = 1;
const SIZE_A: u32 = 8;
const SIZE_B: u32 = 8;
const SIZE_C: u32 = 8;
const SIZE_BX: u32 = SIZE_B + SIZE_C;
const SIZE_AX: u32 = SIZE_A + SIZE_B + SIZE_C;
const SIZE_SJ: u32 = SIZE_A + SIZE_B + SIZE_C;

const POS_OP: u32 = 0;
const POS_K: u32 = POS_OP + SIZE_OP;
const POS_A: u32 = POS_K + SIZE_K;
const POS_B: u32 = POS_A + SIZE_A;
const POS_C: u32 = POS_B + SIZE_B;

const fn mask(n: u32) -> u32 {
    (1 << n) - 1
}

pub const MAX_A: u32 = mask(SIZE_A);
pub const MAX_B: u32 = mask(SIZE_B);
pub const MAX_C: u32 = mask(SIZE_C);
pub const MAX_BX: u32 = mask(SIZE_BX);
pub const MAX_SBX: i32 = (MAX_BX >> 1) as i32;
pub const MIN_SBX: i32 = -MAX_SBX;
pub const MAX_AX: u32 = mask(SIZE_AX);
pub const MAX_SJ: i32 = (mask(SIZE_SJ) >> 1) as i32;
pub const MIN_SJ: i32 = -MAX_SJ;

const OFFSET_SBX: i32 = MAX_SBX;
const OFFSET_SJ: i32 = MAX_SJ;
/// Excess for signed 8-bit operands (`sB`, `sC`).
pub const OFFSET_SC: i32 = (MAX_C >> 1) as i32;

/// Fields per page of `SETLIST` before an `EXTRAARG` is needed.
pub const FIELDS_PER_FLUSH: u32 = 50;

/// Instruction format types.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InstructionFormat {
    IABC,
    IABx,
    IAsBx,
    IAx,
    IsJ,
}

macro_rules! opcodes {
    ($($op:ident => $name:literal, $fmt:ident;)*) => {
        /// Every opcode the emitter produces, in encoding order.
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum OpCode {
            $($op,)*
        }

        impl OpCode {
            /// Opcodes indexed by their encoding.
            pub const ALL: &'static [OpCode] = &[$(OpCode::$op,)*];

            pub fn name(&self) -> &'static str {
                match self {
                    $(OpCode::$op => $name,)*
                }
            }

            pub fn format(&self) -> InstructionFormat {
                match self {
                    $(OpCode::$op => InstructionFormat::$fmt,)*
                }
            }
        }
    };
}

opcodes! {
    Move => "MOVE", IABC;
    LoadI => "LOADI", IAsBx;
    LoadF => "LOADF", IAsBx;
    LoadK => "LOADK", IABx;
    LoadKX => "LOADKX", IABx;
    LoadFalse => "LOADFALSE", IABC;
    LFalseSkip => "LFALSESKIP", IABC;
    LoadTrue => "LOADTRUE", IABC;
    LoadNil => "LOADNIL", IABC;
    GetUpval => "GETUPVAL", IABC;
    SetUpval => "SETUPVAL", IABC;
    GetTabUp => "GETTABUP", IABC;
    GetTable => "GETTABLE", IABC;
    GetI => "GETI", IABC;
    GetField => "GETFIELD", IABC;
    SetTabUp => "SETTABUP", IABC;
    SetTable => "SETTABLE", IABC;
    SetI => "SETI", IABC;
    SetField => "SETFIELD", IABC;
    NewTable => "NEWTABLE", IABC;
    Self_ => "SELF", IABC;
    AddI => "ADDI", IABC;
    AddK => "ADDK", IABC;
    SubK => "SUBK", IABC;
    MulK => "MULK", IABC;
    ModK => "MODK", IABC;
    PowK => "POWK", IABC;
    DivK => "DIVK", IABC;
    IDivK => "IDIVK", IABC;
    BAndK => "BANDK", IABC;
    BOrK => "BORK", IABC;
    BXorK => "BXORK", IABC;
    ShrI => "SHRI", IABC;
    ShlI => "SHLI", IABC;
    Add => "ADD", IABC;
    Sub => "SUB", IABC;
    Mul => "MUL", IABC;
    Mod => "MOD", IABC;
    Pow => "POW", IABC;
    Div => "DIV", IABC;
    IDiv => "IDIV", IABC;
    BAnd => "BAND", IABC;
    BOr => "BOR", IABC;
    BXor => "BXOR", IABC;
    Shl => "SHL", IABC;
    Shr => "SHR", IABC;
    MmBin => "MMBIN", IABC;
    MmBinI => "MMBINI", IABC;
    MmBinK => "MMBINK", IABC;
    Unm => "UNM", IABC;
    BNot => "BNOT", IABC;
    Not => "NOT", IABC;
    Len => "LEN", IABC;
    Concat => "CONCAT", IABC;
    Close => "CLOSE", IABC;
    Tbc => "TBC", IABC;
    Jmp => "JMP", IsJ;
    Eq => "EQ", IABC;
    Lt => "LT", IABC;
    Le => "LE", IABC;
    EqK => "EQK", IABC;
    EqI => "EQI", IABC;
    LtI => "LTI", IABC;
    LeI => "LEI", IABC;
    GtI => "GTI", IABC;
    GeI => "GEI", IABC;
    Test => "TEST", IABC;
    TestSet => "TESTSET", IABC;
    Call => "CALL", IABC;
    TailCall => "TAILCALL", IABC;
    Return => "RETURN", IABC;
    Return0 => "RETURN0", IABC;
    Return1 => "RETURN1", IABC;
    ForLoop => "FORLOOP", IABx;
    ForPrep => "FORPREP", IABx;
    TForPrep => "TFORPREP", IABx;
    TForCall => "TFORCALL", IABC;
    TForLoop => "TFORLOOP", IABx;
    SetList => "SETLIST", IABC;
    Closure => "CLOSURE", IABx;
    VarArg => "VARARG", IABC;
    VarArgPrep => "VARARGPREP", IABC;
    ExtraArg => "EXTRAARG", IAx;
    Defer => "DEFER", IABC;
}

impl OpCode {
    pub const COUNT: usize = Self::ALL.len();

    /// Decode an opcode from its 7-bit encoding.
    pub fn from_u8(val: u8) -> Option<OpCode> {
        Self::ALL.get(val as usize).copied()
    }

    /// Returns true if this opcode is a test (conditional skip of the next `JMP`).
    pub fn is_test(&self) -> bool {
        use OpCode::*;
        matches!(
            self,
            Eq | Lt | Le | EqK | EqI | LtI | LeI | GtI | GeI | Test | TestSet
        )
    }

    /// Arithmetic or bitwise opcode whose fast path is followed by a metamethod fallback.
    pub fn has_metamethod_fallback(&self) -> bool {
        use OpCode::*;
        matches!(
            self,
            AddI | AddK
                | SubK
                | MulK
                | ModK
                | PowK
                | DivK
                | IDivK
                | BAndK
                | BOrK
                | BXorK
                | ShrI
                | ShlI
                | Add
                | Sub
                | Mul
                | Mod
                | Pow
                | Div
                | IDiv
                | BAnd
                | BOr
                | BXor
                | Shl
                | Shr
        )
    }
}

/// Metamethod event numbers carried in the C field of `MMBIN*`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum TagMethod {
    Add = 6,
    Sub = 7,
    Mul = 8,
    Mod = 9,
    Pow = 10,
    Div = 11,
    IDiv = 12,
    BAnd = 13,
    BOr = 14,
    BXor = 15,
    Shl = 16,
    Shr = 17,
    Unm = 18,
    BNot = 19,
    Concat = 22,
    Close = 24,
}

/// Encode a small signed integer into an `sB`/`sC` operand.
pub fn int_to_sc(value: i64) -> Option<u8> {
    let biased = value.checked_add(OFFSET_SC as i64)?;
    u8::try_from(biased).ok()
}

/// Decode an `sB`/`sC` operand.
pub fn sc_to_int(field: u8) -> i32 {
    field as i32 - OFFSET_SC
}

/// A 32-bit bytecode instruction.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Instruction(pub u32);

impl Instruction {
    // ---- Constructors ----

    /// Create an iABC instruction.
    pub fn abc(op: OpCode, a: u8, b: u8, c: u8, k: bool) -> Self {
        let mut i = (op as u32) << POS_OP;
        i |= (k as u32) << POS_K;
        i |= (a as u32) << POS_A;
        i |= (b as u32) << POS_B;
        i |= (c as u32) << POS_C;
        Instruction(i)
    }

    /// Create an iABx instruction.
    pub fn abx(op: OpCode, a: u8, bx: u32) -> Self {
        debug_assert!(bx <= MAX_BX, "Bx out of range: {bx}");
        let mut i = (op as u32) << POS_OP;
        i |= (a as u32) << POS_A;
        i |= (bx & MAX_BX) << POS_B;
        Instruction(i)
    }

    /// Create an iAsBx instruction (signed Bx).
    pub fn asbx(op: OpCode, a: u8, sbx: i32) -> Self {
        debug_assert!((MIN_SBX..=MAX_SBX).contains(&sbx), "sBx out of range: {sbx}");
        Self::abx(op, a, (sbx + OFFSET_SBX) as u32)
    }

    /// Create an iAx instruction.
    pub fn ax(op: OpCode, ax: u32) -> Self {
        debug_assert!(ax <= MAX_AX, "Ax out of range: {ax}");
        let mut i = (op as u32) << POS_OP;
        i |= (ax & MAX_AX) << POS_A;
        Instruction(i)
    }

    /// Create an isJ instruction (signed jump).
    pub fn sj(op: OpCode, sj: i32) -> Self {
        debug_assert!((MIN_SJ..=MAX_SJ).contains(&sj), "sJ out of range: {sj}");
        let val = (sj + OFFSET_SJ) as u32;
        let mut i = (op as u32) << POS_OP;
        i |= val << POS_A;
        Instruction(i)
    }

    // ---- Decoders ----

    /// Get the opcode. Unknown encodings never come out of the emitter; they
    /// decode as `MOVE`.
    pub fn opcode(&self) -> OpCode {
        let val = (self.0 >> POS_OP) & mask(SIZE_OP);
        OpCode::from_u8(val as u8).unwrap_or(OpCode::Move)
    }

    pub fn k(&self) -> bool {
        ((self.0 >> POS_K) & 1) != 0
    }

    pub fn a(&self) -> u8 {
        ((self.0 >> POS_A) & mask(SIZE_A)) as u8
    }

    pub fn b(&self) -> u8 {
        ((self.0 >> POS_B) & mask(SIZE_B)) as u8
    }

    pub fn c(&self) -> u8 {
        ((self.0 >> POS_C) & mask(SIZE_C)) as u8
    }

    pub fn bx(&self) -> u32 {
        (self.0 >> POS_B) & mask(SIZE_BX)
    }

    pub fn sbx(&self) -> i32 {
        self.bx() as i32 - OFFSET_SBX
    }

    pub fn ax_field(&self) -> u32 {
        (self.0 >> POS_A) & mask(SIZE_AX)
    }

    pub fn get_sj(&self) -> i32 {
        let val = (self.0 >> POS_A) & mask(SIZE_SJ);
        val as i32 - OFFSET_SJ
    }

    // ---- Mutators (for backpatching) ----

    pub fn set_opcode(&mut self, op: OpCode) {
        self.0 = (self.0 & !(mask(SIZE_OP) << POS_OP)) | ((op as u32) << POS_OP);
    }

    pub fn set_a(&mut self, a: u8) {
        self.0 = (self.0 & !(mask(SIZE_A) << POS_A)) | ((a as u32) << POS_A);
    }

    pub fn set_b(&mut self, b: u8) {
        self.0 = (self.0 & !(mask(SIZE_B) << POS_B)) | ((b as u32) << POS_B);
    }

    pub fn set_c(&mut self, c: u8) {
        self.0 = (self.0 & !(mask(SIZE_C) << POS_C)) | ((c as u32) << POS_C);
    }

    pub fn set_bx(&mut self, bx: u32) {
        debug_assert!(bx <= MAX_BX);
        self.0 = (self.0 & !(mask(SIZE_BX) << POS_B)) | ((bx & MAX_BX) << POS_B);
    }

    pub fn set_sbx(&mut self, sbx: i32) {
        debug_assert!((MIN_SBX..=MAX_SBX).contains(&sbx));
        self.set_bx((sbx + OFFSET_SBX) as u32);
    }

    pub fn set_sj(&mut self, sj: i32) {
        debug_assert!((MIN_SJ..=MAX_SJ).contains(&sj));
        let val = (sj + OFFSET_SJ) as u32;
        self.0 = (self.0 & !(mask(SIZE_SJ) << POS_A)) | (val << POS_A);
    }

    pub fn set_k(&mut self, k: bool) {
        self.0 = (self.0 & !(1 << POS_K)) | ((k as u32) << POS_K);
    }
}

impl fmt::Debug for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = self.opcode();
        write!(f, "{}", op.name())?;
        match op.format() {
            InstructionFormat::IABC => {
                write!(f, " A={} B={} C={}", self.a(), self.b(), self.c())?;
                if self.k() {
                    write!(f, " k")?;
                }
            }
            InstructionFormat::IABx => write!(f, " A={} Bx={}", self.a(), self.bx())?,
            InstructionFormat::IAsBx => write!(f, " A={} sBx={}", self.a(), self.sbx())?,
            InstructionFormat::IAx => write!(f, " Ax={}", self.ax_field())?,
            InstructionFormat::IsJ => write!(f, " sJ={}", self.get_sj())?,
        }
        Ok(())
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
