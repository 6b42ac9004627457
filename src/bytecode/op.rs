//! Opcode table and the big-endian instruction codec.
//!
//! Every instruction is one opcode byte followed by fixed-width operands. The
//! width signature is a property of the opcode, so the encoder and decoder
//! always read it from the same [`Definition`].

// =============================================================================
// OPCODE - Bytecode instructions
// =============================================================================

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    // literals
    Constant,
    Null,
    True,
    False,

    // aggregates
    Array,
    Hash,
    Index,

    // calls
    Call,
    ReturnValue,
    Return,

    // bindings
    GetLocal,
    SetLocal,
    GetGlobal,
    SetGlobal,
    GetBuiltin,
    GetFree,

    // closures
    Closure,
    CurrentClosure,

    // arithmetic
    Add,
    Sub,
    Mul,
    Div,

    // prefix
    Minus,
    Bang,

    // comparison
    Equal,
    NotEqual,
    GreaterThan,
    LessThan,

    // control flow
    JumpNotTruthy,
    Jump,

    Pop,
}

/// Name and operand widths (in bytes) of an opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Definition {
    pub name: &'static str,
    pub operand_widths: &'static [usize],
}

impl Definition {
    /// Total encoded size of one instruction, opcode byte included.
    pub fn instruction_len(&self) -> usize {
        1 + self.operand_widths.iter().sum::<usize>()
    }
}

const fn def(name: &'static str, operand_widths: &'static [usize]) -> Definition {
    Definition {
        name,
        operand_widths,
    }
}

impl Opcode {
    pub const ALL: [Opcode; 31] = [
        Opcode::Constant,
        Opcode::Null,
        Opcode::True,
        Opcode::False,
        Opcode::Array,
        Opcode::Hash,
        Opcode::Index,
        Opcode::Call,
        Opcode::ReturnValue,
        Opcode::Return,
        Opcode::GetLocal,
        Opcode::SetLocal,
        Opcode::GetGlobal,
        Opcode::SetGlobal,
        Opcode::GetBuiltin,
        Opcode::GetFree,
        Opcode::Closure,
        Opcode::CurrentClosure,
        Opcode::Add,
        Opcode::Sub,
        Opcode::Mul,
        Opcode::Div,
        Opcode::Minus,
        Opcode::Bang,
        Opcode::Equal,
        Opcode::NotEqual,
        Opcode::GreaterThan,
        Opcode::LessThan,
        Opcode::JumpNotTruthy,
        Opcode::Jump,
        Opcode::Pop,
    ];

    pub fn definition(self) -> Definition {
        match self {
            Opcode::Constant => def("OpConstant", &[2]),
            Opcode::Null => def("OpNull", &[]),
            Opcode::True => def("OpTrue", &[]),
            Opcode::False => def("OpFalse", &[]),
            Opcode::Array => def("OpArray", &[2]),
            Opcode::Hash => def("OpHash", &[2]),
            Opcode::Index => def("OpIndex", &[]),
            Opcode::Call => def("OpCall", &[1]),
            Opcode::ReturnValue => def("OpReturnValue", &[]),
            Opcode::Return => def("OpReturn", &[]),
            Opcode::GetLocal => def("OpGetLocal", &[1]),
            Opcode::SetLocal => def("OpSetLocal", &[1]),
            Opcode::GetGlobal => def("OpGetGlobal", &[2]),
            Opcode::SetGlobal => def("OpSetGlobal", &[2]),
            Opcode::GetBuiltin => def("OpGetBuiltin", &[1]),
            Opcode::GetFree => def("OpGetFree", &[1]),
            Opcode::Closure => def("OpClosure", &[2, 1]),
            Opcode::CurrentClosure => def("OpCurrentClosure", &[]),
            Opcode::Add => def("OpAdd", &[]),
            Opcode::Sub => def("OpSub", &[]),
            Opcode::Mul => def("OpMul", &[]),
            Opcode::Div => def("OpDiv", &[]),
            Opcode::Minus => def("OpMinus", &[]),
            Opcode::Bang => def("OpBang", &[]),
            Opcode::Equal => def("OpEqual", &[]),
            Opcode::NotEqual => def("OpNotEqual", &[]),
            Opcode::GreaterThan => def("OpGreaterThan", &[]),
            Opcode::LessThan => def("OpLessThan", &[]),
            Opcode::JumpNotTruthy => def("OpJumpNotTruthy", &[2]),
            Opcode::Jump => def("OpJump", &[2]),
            Opcode::Pop => def("OpPop", &[]),
        }
    }

    pub fn name(self) -> &'static str {
        self.definition().name
    }
}

impl From<Opcode> for u8 {
    fn from(op: Opcode) -> u8 {
        op as u8
    }
}

/// Raised when a byte does not name any opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("opcode {0} undefined")]
pub struct UnknownOpcode(pub u8);

impl TryFrom<u8> for Opcode {
    type Error = UnknownOpcode;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        Opcode::ALL
            .get(byte as usize)
            .copied()
            .ok_or(UnknownOpcode(byte))
    }
}

/// Looks up the definition for a raw opcode byte.
pub fn lookup(byte: u8) -> Result<Definition, UnknownOpcode> {
    Opcode::try_from(byte).map(Opcode::definition)
}

/// Encodes one instruction.
///
/// Operands are written big-endian using the opcode's declared widths;
/// missing operands encode as zero and extra operands are ignored.
pub fn make(op: Opcode, operands: &[usize]) -> Vec<u8> {
    let definition = op.definition();
    let mut instruction = Vec::with_capacity(definition.instruction_len());
    instruction.push(op as u8);

    for (i, width) in definition.operand_widths.iter().enumerate() {
        let operand = operands.get(i).copied().unwrap_or(0);
        match width {
            2 => instruction.extend_from_slice(&(operand as u16).to_be_bytes()),
            1 => instruction.push(operand as u8),
            _ => {}
        }
    }

    instruction
}

/// Encodes an instruction from a raw opcode byte; an unknown byte yields an
/// empty sequence.
pub fn make_raw(byte: u8, operands: &[usize]) -> Vec<u8> {
    match Opcode::try_from(byte) {
        Ok(op) => make(op, operands),
        Err(_) => Vec::new(),
    }
}

/// Decodes the operands that follow an opcode byte.
///
/// Returns the operand values and the number of bytes consumed. Decoding stops
/// early if `ins` is shorter than the definition requires, so a truncated
/// instruction shows up as fewer operands than widths.
pub fn read_operands(definition: &Definition, ins: &[u8]) -> (Vec<usize>, usize) {
    let mut operands = Vec::with_capacity(definition.operand_widths.len());
    let mut offset = 0;

    for &width in definition.operand_widths {
        let rest = ins.get(offset..).unwrap_or_default();
        let value = match width {
            2 => rest.first_chunk::<2>().map(|bytes| read_u16(bytes) as usize),
            1 => rest.first_chunk::<1>().map(|bytes| read_u8(bytes) as usize),
            _ => None,
        };
        let Some(value) = value else {
            break;
        };
        operands.push(value);
        offset += width;
    }

    (operands, offset)
}

pub fn read_u16(bytes: &[u8; 2]) -> u16 {
    u16::from_be_bytes(*bytes)
}

pub fn read_u8(bytes: &[u8; 1]) -> u8 {
    bytes[0]
}
