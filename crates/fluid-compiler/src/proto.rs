/// Function prototype: compiled bytecode, constants, and debug info.
use crate::opcode::Instruction;
use indexmap::IndexMap;
use smol_str::SmolStr;

/// A constant value in the constant pool.
#[derive(Clone, Debug, PartialEq)]
pub enum Constant {
    Nil,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(Vec<u8>),
}

impl Constant {
    /// Extended falsey rule: nil, false, numeric zero and the empty string.
    pub fn is_empty_value(&self) -> bool {
        match self {
            Constant::Nil | Constant::Boolean(false) => true,
            Constant::Integer(i) => *i == 0,
            Constant::Float(f) => *f == 0.0,
            Constant::String(s) => s.is_empty(),
            Constant::Boolean(true) => false,
        }
    }
}

/// Hashable identity of a constant. Floats compare by bit pattern, so
/// `1` and `1.0` stay distinct and NaN deduplicates with itself.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum ConstantKey {
    Nil,
    Boolean(bool),
    Integer(i64),
    Float(u64),
    String(Vec<u8>),
}

impl From<&Constant> for ConstantKey {
    fn from(k: &Constant) -> Self {
        match k {
            Constant::Nil => ConstantKey::Nil,
            Constant::Boolean(b) => ConstantKey::Boolean(*b),
            Constant::Integer(i) => ConstantKey::Integer(*i),
            Constant::Float(f) => ConstantKey::Float(f.to_bits()),
            Constant::String(s) => ConstantKey::String(s.clone()),
        }
    }
}

/// Upvalue kind carried in debug info.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpvalKind {
    Regular,
    Const,
    ToBeClosed,
}

/// Description of an upvalue.
#[derive(Clone, Debug, PartialEq)]
pub struct UpvalDesc {
    /// Name of the upvalue (for debug info).
    pub name: Option<SmolStr>,
    /// True if this upvalue lives in the enclosing function's registers.
    pub in_stack: bool,
    /// Register index if `in_stack`, otherwise upvalue index in the parent.
    pub index: u8,
    pub kind: UpvalKind,
}

/// A local variable debug entry.
#[derive(Clone, Debug, PartialEq)]
pub struct LocalVar {
    pub name: SmolStr,
    /// First PC where the variable is active.
    pub start_pc: u32,
    /// First PC where the variable is dead.
    pub end_pc: u32,
}

/// A compiled function prototype.
#[derive(Clone, Debug, Default)]
pub struct Proto {
    pub code: Vec<Instruction>,
    pub constants: Vec<Constant>,
    pub protos: Vec<Proto>,
    pub upvalues: Vec<UpvalDesc>,
    pub num_params: u8,
    pub is_vararg: bool,
    pub max_stack_size: u8,
    /// Chunk name this prototype was compiled from.
    pub source: SmolStr,
    /// Line of the `function` keyword; 0 for the main chunk.
    pub line_defined: u32,
    /// Line of the closing `end`; 0 for the main chunk.
    pub last_line_defined: u32,

    // --- Debug info ---
    /// Source line of each instruction.
    pub line_info: Vec<u32>,
    pub local_vars: Vec<LocalVar>,

    constant_lookup: IndexMap<ConstantKey, usize>,
}

impl Proto {
    pub fn new(source: SmolStr) -> Self {
        Proto {
            max_stack_size: 2,
            source,
            ..Proto::default()
        }
    }

    /// Append an instruction at the given source line.
    pub fn emit(&mut self, inst: Instruction, line: u32) -> usize {
        let pc = self.code.len();
        self.code.push(inst);
        self.line_info.push(line);
        pc
    }

    /// Add a constant to the pool, returning its index. Deduplicates.
    pub fn add_constant(&mut self, k: Constant) -> usize {
        let key = ConstantKey::from(&k);
        if let Some(&idx) = self.constant_lookup.get(&key) {
            return idx;
        }
        let idx = self.constants.len();
        self.constants.push(k);
        self.constant_lookup.insert(key, idx);
        idx
    }

    /// Source line of the instruction at `pc`, or 0 when out of range.
    pub fn get_line(&self, pc: usize) -> u32 {
        self.line_info.get(pc).copied().unwrap_or(0)
    }

    pub fn code_len(&self) -> usize {
        self.code.len()
    }

    pub fn num_upvalues(&self) -> usize {
        self.upvalues.len()
    }

    /// Mutable access to an emitted instruction (for backpatching).
    pub fn get_mut(&mut self, pc: usize) -> Option<&mut Instruction> {
        self.code.get_mut(pc)
    }

    /// Remove the last instruction, keeping line info aligned.
    pub fn pop_instruction(&mut self) -> Option<Instruction> {
        self.line_info.pop();
        self.code.pop()
    }
}
