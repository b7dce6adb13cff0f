use std::fmt;

use crate::disassembler::{Opcode, TypeCode};

/// Literal payload of a `CONST` instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstValue {
    /// 32-bit signed integer
    Int(i32),
    /// 32-bit float
    Float(f32),
    /// Length-prefixed byte string
    String(String),
    /// Object identifier (`0` is the caller, `1` the invalid object)
    Object(u32),
}

/// Opcode-specific operands of an [`Instruction`].
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// No operand beyond the type byte
    None,
    /// Stack copy (`CPDOWNSP`, `CPTOPSP`, `CPDOWNBP`, `CPTOPBP`)
    Stack {
        /// Negative byte offset from the stack or base pointer
        offset: i32,
        /// Number of bytes copied
        size: u16,
    },
    /// `CONST` literal
    Const(ConstValue),
    /// Engine call
    Action {
        /// Index into the action table
        index: u16,
        /// Number of arguments pushed by the caller
        argc: u8,
    },
    /// Byte size of the compared structures (`EQUAL`/`NEQUAL` with a `TT` type byte)
    StructSize(u16),
    /// Signed relative operand of `MOVSP`, jumps and increments
    Offset(i32),
    /// `DESTRUCT` operands
    Destruct {
        /// Total bytes removed from the top of the stack
        remove: u16,
        /// Offset, relative to the removed region, of the bytes that survive
        offset: u16,
        /// Number of surviving bytes
        save: u16,
    },
    /// `STORE_STATE` operands
    StoreState {
        /// Bytes of the global frame to save
        bp: i32,
        /// Bytes of the local frame to save
        sp: i32,
    },
    /// Program size carried by the `T` header instruction
    ProgramSize(i32),
}

/// A single decoded NCS instruction.
///
/// Instructions are immutable once decoded. The byte `offset` is the instruction's identity
/// throughout the analysis passes and in every diagnostic.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    /// Byte offset of the opcode within the file
    pub offset: usize,
    /// Encoded size in bytes
    pub size: usize,
    /// The opcode
    pub opcode: Opcode,
    /// Raw type byte (`0` for `T`, which has none)
    pub type_byte: u8,
    /// Decoded operands
    pub operand: Operand,
}

impl Instruction {
    /// Decoded meaning of the type byte, if it has one.
    #[must_use]
    pub fn type_code(&self) -> Option<TypeCode> {
        TypeCode::from_byte(self.type_byte)
    }

    /// Absolute target offset of a jump or call.
    #[must_use]
    pub fn jump_target(&self) -> Option<usize> {
        match (&self.operand, self.opcode.is_jump()) {
            (Operand::Offset(rel), true) => self.offset.checked_add_signed(*rel as isize),
            _ => None,
        }
    }

    /// The relative operand of `MOVSP`, jumps and increments.
    #[must_use]
    pub fn rel_offset(&self) -> Option<i32> {
        match self.operand {
            Operand::Offset(rel) => Some(rel),
            _ => None,
        }
    }

    /// `(offset, size)` of a stack copy instruction.
    #[must_use]
    pub fn stack_operand(&self) -> Option<(i32, u16)> {
        match self.operand {
            Operand::Stack { offset, size } => Some((offset, size)),
            _ => None,
        }
    }

    /// Offset of the next instruction in the stream.
    #[must_use]
    pub fn next_offset(&self) -> usize {
        self.offset + self.size
    }
}

impl fmt::Display for ConstValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstValue::Int(v) => write!(f, "{v}"),
            ConstValue::Float(v) => write!(f, "{v:?}"),
            ConstValue::String(s) => write!(f, "{s:?}"),
            ConstValue::Object(v) => write!(f, "obj({v})"),
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08X}  {:<14}", self.offset, self.opcode.to_string())?;
        if self.opcode != Opcode::T {
            write!(f, " {:02X}", self.type_byte)?;
        }
        match &self.operand {
            Operand::None => Ok(()),
            Operand::Stack { offset, size } => write!(f, " {offset}, {size}"),
            Operand::Const(value) => write!(f, " {value}"),
            Operand::Action { index, argc } => write!(f, " {index}({argc})"),
            Operand::StructSize(size) => write!(f, " {size}"),
            Operand::Offset(rel) => match self.jump_target() {
                Some(target) => write!(f, " {rel:+} -> {target:08X}"),
                None => write!(f, " {rel}"),
            },
            Operand::Destruct {
                remove,
                offset,
                save,
            } => write!(f, " {remove}, {offset}, {save}"),
            Operand::StoreState { bp, sp } => write!(f, " {bp}, {sp}"),
            Operand::ProgramSize(size) => write!(f, " {size}"),
        }
    }
}
