/// Expression descriptors: where a partially emitted value currently lives.
use crate::proto::Constant;

/// Head of a chain of pending `JMP`s, threaded through their sJ fields.
/// `None` means no pending jumps.
pub type JumpList = Option<usize>;

/// Descriptor kinds. Compile-time constants are declared before all
/// variable kinds, and variables before emitted results.
#[derive(Clone, Debug, PartialEq)]
pub enum ExpKind {
    /// No value (empty expression list).
    Void,
    Nil,
    True,
    False,
    /// String literal not yet placed in the constant pool.
    Str(Vec<u8>),
    Int(i64),
    Float(f64),
    /// Constant already in the pool.
    K(u32),
    /// Active local in its register.
    Local(u8),
    Upval(u8),
    /// Upvalue table indexed by a string constant (`_ENV.name`).
    IndexUp { table: u8, key: u32 },
    /// Register table indexed by a string constant.
    IndexStr { table: u8, key: u32 },
    /// Register table indexed by a small non-negative integer.
    IndexInt { table: u8, index: u8 },
    /// Register table indexed by a register.
    Indexed { table: u8, key: u8 },
    /// Value fixed in a register.
    NonReloc(u8),
    /// Instruction at this pc whose destination register is still open.
    Reloc(usize),
    /// Comparison whose outcome is the `JMP` at this pc.
    Jmp(usize),
    /// Open call instruction at this pc.
    Call(usize),
    /// Open `VARARG` instruction at this pc.
    Vararg(usize),
}

#[derive(Clone, Debug, PartialEq)]
pub struct ExpDesc {
    pub kind: ExpKind,
    /// Jumps taken when the expression is true.
    pub t: JumpList,
    /// Jumps taken when the expression is false.
    pub f: JumpList,
}

impl ExpDesc {
    pub fn new(kind: ExpKind) -> Self {
        ExpDesc {
            kind,
            t: None,
            f: None,
        }
    }

    pub fn void() -> Self {
        Self::new(ExpKind::Void)
    }

    pub fn has_jumps(&self) -> bool {
        self.t.is_some() || self.f.is_some()
    }

    pub fn is_void(&self) -> bool {
        self.kind == ExpKind::Void
    }

    pub fn is_variable(&self) -> bool {
        matches!(
            self.kind,
            ExpKind::Local(_)
                | ExpKind::Upval(_)
                | ExpKind::IndexUp { .. }
                | ExpKind::IndexStr { .. }
                | ExpKind::IndexInt { .. }
                | ExpKind::Indexed { .. }
        )
    }

    /// An open call or vararg that can deliver any number of values.
    pub fn is_multi(&self) -> bool {
        matches!(self.kind, ExpKind::Call(_) | ExpKind::Vararg(_))
    }

    pub fn int_value(&self) -> Option<i64> {
        match self.kind {
            ExpKind::Int(i) if !self.has_jumps() => Some(i),
            _ => None,
        }
    }

    /// The literal value, for constant kinds not yet in the pool.
    pub fn literal(&self) -> Option<Constant> {
        if self.has_jumps() {
            return None;
        }
        Some(match &self.kind {
            ExpKind::Nil => Constant::Nil,
            ExpKind::True => Constant::Boolean(true),
            ExpKind::False => Constant::Boolean(false),
            ExpKind::Str(s) => Constant::String(s.clone()),
            ExpKind::Int(i) => Constant::Integer(*i),
            ExpKind::Float(f) => Constant::Float(*f),
            _ => return None,
        })
    }
}
