//! NCS instruction encoding with label resolution.
//!
//! [`NcsAssembler`] is the reverse counterpart of the decoder: a fluent builder that emits
//! instructions in the operand layout the decoder reads, resolves jump labels once every
//! label is known and prefixes the program with the magic and the `T` size record.
//!
//! # Examples
//!
//! ```rust
//! use ncscope::{assembly::NcsAssembler, disassembler::{decode_stream, Opcode, TypeCode}};
//!
//! let mut asm = NcsAssembler::new();
//! asm.const_int(1)?.jz("skip")?;
//! asm.nop()?;
//! asm.label("skip")?.retn()?;
//!
//! let bytes = asm.finish()?;
//! let instructions = decode_stream(&bytes)?;
//! assert_eq!(instructions[0].opcode, Opcode::T);
//! assert_eq!(instructions[2].jump_target(), Some(instructions[4].offset));
//! # Ok::<(), ncscope::Error>(())
//! ```

use std::collections::HashMap;

use crate::{
    disassembler::{Opcode, TypeCode, NCS_MAGIC},
    file::io::{push_be, write_be_at},
    Error, Result,
};

/// Size of the `T` record that follows the magic.
const PROGRAM_SIZE_RECORD: usize = 5;

/// Type byte of instructions that carry no type.
const UNTYPED: u8 = 0x00;

/// Type byte of the stack copy and `DESTRUCT` instructions.
const STACK_TYPE: u8 = 0x01;

/// Type byte of `STORE_STATE`.
const STORE_STATE_TYPE: u8 = 0x10;

/// Label fixup information for jump resolution.
#[derive(Debug, Clone)]
pub struct LabelFixup {
    /// The target label name to resolve
    pub label: String,
    /// Position in the code where the 4-byte offset is written
    pub fixup_position: usize,
    /// Position of the jump instruction, jump offsets are relative to it
    pub instruction_position: usize,
}

/// Builder for compiled scripts.
///
/// Positions are byte offsets into the code that follows the header; [`NcsAssembler::finish`]
/// shifts them by the header size. Jump offsets are relative to the jump instruction itself
/// and therefore do not change.
#[derive(Debug, Default)]
pub struct NcsAssembler {
    /// Generated code, without header
    code: Vec<u8>,
    /// Defined label positions (label name -> code position)
    labels: HashMap<String, usize>,
    /// Pending jump fixups awaiting label resolution
    fixups: Vec<LabelFixup>,
}

impl NcsAssembler {
    /// Creates an empty assembler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current code position, the offset the next instruction will have after the header.
    #[must_use]
    pub fn position(&self) -> usize {
        NCS_MAGIC.len() + PROGRAM_SIZE_RECORD + self.code.len()
    }

    fn emit(&mut self, opcode: Opcode, type_byte: u8) -> &mut Self {
        self.code.push(opcode.byte());
        self.code.push(type_byte);
        self
    }

    fn i32(&mut self, value: i32) -> &mut Self {
        push_be(&mut self.code, value);
        self
    }

    fn u16(&mut self, value: u16) -> &mut Self {
        push_be(&mut self.code, value);
        self
    }

    /// Defines `name` at the current position.
    ///
    /// # Errors
    ///
    /// Returns an error if the label is already defined.
    pub fn label(&mut self, name: &str) -> Result<&mut Self> {
        if self.labels.contains_key(name) {
            return Err(Error::Error(format!("label '{name}' is defined twice")));
        }
        self.labels.insert(name.to_string(), self.code.len());
        Ok(self)
    }

    /// `RSADD`, reserves one variable of a scalar type.
    ///
    /// # Errors
    ///
    /// Returns an error for operand pair type codes.
    pub fn rsadd(&mut self, ty: TypeCode) -> Result<&mut Self> {
        if ty.byte() >= TypeCode::IntInt.byte() {
            return Err(Error::Error(format!("RSADD cannot reserve {ty}")));
        }
        Ok(self.emit(Opcode::RsAdd, ty.byte()))
    }

    /// `CONST` of an integer.
    ///
    /// # Errors
    ///
    /// Never fails; the `Result` keeps the builder chain uniform.
    pub fn const_int(&mut self, value: i32) -> Result<&mut Self> {
        Ok(self.emit(Opcode::Const, TypeCode::Int.byte()).i32(value))
    }

    /// `CONST` of a float.
    ///
    /// # Errors
    ///
    /// Never fails; the `Result` keeps the builder chain uniform.
    pub fn const_float(&mut self, value: f32) -> Result<&mut Self> {
        self.emit(Opcode::Const, TypeCode::Float.byte());
        push_be(&mut self.code, value);
        Ok(self)
    }

    /// `CONST` of a string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is longer than 65535 bytes.
    pub fn const_string(&mut self, value: &str) -> Result<&mut Self> {
        let length = u16::try_from(value.len())
            .map_err(|_| Error::Error(format!("string constant of {} bytes", value.len())))?;
        self.emit(Opcode::Const, TypeCode::String.byte()).u16(length);
        self.code.extend_from_slice(value.as_bytes());
        Ok(self)
    }

    /// `CONST` of an object identifier.
    ///
    /// # Errors
    ///
    /// Never fails; the `Result` keeps the builder chain uniform.
    pub fn const_object(&mut self, value: u32) -> Result<&mut Self> {
        self.emit(Opcode::Const, TypeCode::Object.byte());
        push_be(&mut self.code, value);
        Ok(self)
    }

    fn stack_copy(&mut self, opcode: Opcode, offset: i32, size: u16) -> Result<&mut Self> {
        if size == 0 || size % 4 != 0 || offset % 4 != 0 {
            return Err(Error::Error(format!(
                "{opcode} offset {offset} and size {size} must be multiples of 4"
            )));
        }
        Ok(self.emit(opcode, STACK_TYPE).i32(offset).u16(size))
    }

    /// `CPDOWNSP`, copies the top `size` bytes down to `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if offset or size are not slot aligned.
    pub fn cpdownsp(&mut self, offset: i32, size: u16) -> Result<&mut Self> {
        self.stack_copy(Opcode::CpDownSp, offset, size)
    }

    /// `CPTOPSP`, pushes a copy of `size` bytes at `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if offset or size are not slot aligned.
    pub fn cptopsp(&mut self, offset: i32, size: u16) -> Result<&mut Self> {
        self.stack_copy(Opcode::CpTopSp, offset, size)
    }

    /// `CPDOWNBP`, copies the top `size` bytes into a global.
    ///
    /// # Errors
    ///
    /// Returns an error if offset or size are not slot aligned.
    pub fn cpdownbp(&mut self, offset: i32, size: u16) -> Result<&mut Self> {
        self.stack_copy(Opcode::CpDownBp, offset, size)
    }

    /// `CPTOPBP`, pushes a copy of a global.
    ///
    /// # Errors
    ///
    /// Returns an error if offset or size are not slot aligned.
    pub fn cptopbp(&mut self, offset: i32, size: u16) -> Result<&mut Self> {
        self.stack_copy(Opcode::CpTopBp, offset, size)
    }

    /// `ACTION`, calls engine action `index` with `argc` arguments.
    ///
    /// # Errors
    ///
    /// Never fails; the `Result` keeps the builder chain uniform.
    pub fn action(&mut self, index: u16, argc: u8) -> Result<&mut Self> {
        self.emit(Opcode::Action, UNTYPED).u16(index);
        self.code.push(argc);
        Ok(self)
    }

    /// A binary operator with its operand type pair.
    ///
    /// # Errors
    ///
    /// Returns an error if `opcode` is not a binary operator or `types` is the structure
    /// pair, see [`NcsAssembler::equal_structs`].
    pub fn op(&mut self, opcode: Opcode, types: TypeCode) -> Result<&mut Self> {
        if !opcode.is_binary() {
            return Err(Error::Error(format!("{opcode} is not a binary operator")));
        }
        if types == TypeCode::StructStruct {
            return Err(Error::Error("structure comparisons carry a size".to_string()));
        }
        Ok(self.emit(opcode, types.byte()))
    }

    /// `EQUAL`/`NEQUAL` over two structures of `size` bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if `opcode` is not `EQUAL` or `NEQUAL`.
    pub fn equal_structs(&mut self, opcode: Opcode, size: u16) -> Result<&mut Self> {
        if !matches!(opcode, Opcode::Equal | Opcode::NEqual) {
            return Err(Error::Error(format!("{opcode} cannot compare structures")));
        }
        Ok(self.emit(opcode, TypeCode::StructStruct.byte()).u16(size))
    }

    /// `NOT` of an integer.
    ///
    /// # Errors
    ///
    /// Never fails; the `Result` keeps the builder chain uniform.
    pub fn not(&mut self) -> Result<&mut Self> {
        Ok(self.emit(Opcode::Not, TypeCode::Int.byte()))
    }

    /// `NEG` of an integer or float.
    ///
    /// # Errors
    ///
    /// Returns an error for any other type.
    pub fn neg(&mut self, ty: TypeCode) -> Result<&mut Self> {
        if !matches!(ty, TypeCode::Int | TypeCode::Float) {
            return Err(Error::Error(format!("NEG cannot negate {ty}")));
        }
        Ok(self.emit(Opcode::Neg, ty.byte()))
    }

    /// `COMP`, bitwise complement of an integer.
    ///
    /// # Errors
    ///
    /// Never fails; the `Result` keeps the builder chain uniform.
    pub fn comp(&mut self) -> Result<&mut Self> {
        Ok(self.emit(Opcode::Comp, TypeCode::Int.byte()))
    }

    /// `MOVSP`, moves the stack pointer by `offset` bytes (negative pops).
    ///
    /// # Errors
    ///
    /// Returns an error if the offset is not a non-positive multiple of 4.
    pub fn movsp(&mut self, offset: i32) -> Result<&mut Self> {
        if offset > 0 || offset % 4 != 0 {
            return Err(Error::Error(format!("MOVSP offset {offset} is not a pop")));
        }
        Ok(self.emit(Opcode::MovSp, UNTYPED).i32(offset))
    }

    fn step(&mut self, opcode: Opcode, offset: i32) -> Result<&mut Self> {
        if offset % 4 != 0 {
            return Err(Error::Error(format!("{opcode} offset {offset} is not slot aligned")));
        }
        Ok(self.emit(opcode, TypeCode::Int.byte()).i32(offset))
    }

    /// `INCISP`, increments the integer at a stack offset.
    ///
    /// # Errors
    ///
    /// Returns an error if the offset is not slot aligned.
    pub fn incisp(&mut self, offset: i32) -> Result<&mut Self> {
        self.step(Opcode::IncISp, offset)
    }

    /// `DECISP`, decrements the integer at a stack offset.
    ///
    /// # Errors
    ///
    /// Returns an error if the offset is not slot aligned.
    pub fn decisp(&mut self, offset: i32) -> Result<&mut Self> {
        self.step(Opcode::DecISp, offset)
    }

    /// `INCIBP`, increments a global integer.
    ///
    /// # Errors
    ///
    /// Returns an error if the offset is not slot aligned.
    pub fn incibp(&mut self, offset: i32) -> Result<&mut Self> {
        self.step(Opcode::IncIBp, offset)
    }

    /// `DECIBP`, decrements a global integer.
    ///
    /// # Errors
    ///
    /// Returns an error if the offset is not slot aligned.
    pub fn decibp(&mut self, offset: i32) -> Result<&mut Self> {
        self.step(Opcode::DecIBp, offset)
    }

    fn jump(&mut self, opcode: Opcode, label: &str) -> Result<&mut Self> {
        let instruction_position = self.code.len();
        self.emit(opcode, UNTYPED);
        self.fixups.push(LabelFixup {
            label: label.to_string(),
            fixup_position: self.code.len(),
            instruction_position,
        });
        Ok(self.i32(0))
    }

    /// `JMP` to a label.
    ///
    /// # Errors
    ///
    /// Never fails here; unknown labels are reported by [`NcsAssembler::finish`].
    pub fn jmp(&mut self, label: &str) -> Result<&mut Self> {
        self.jump(Opcode::Jmp, label)
    }

    /// `JZ` to a label, pops the condition.
    ///
    /// # Errors
    ///
    /// Never fails here; unknown labels are reported by [`NcsAssembler::finish`].
    pub fn jz(&mut self, label: &str) -> Result<&mut Self> {
        self.jump(Opcode::Jz, label)
    }

    /// `JNZ` to a label, pops the condition.
    ///
    /// # Errors
    ///
    /// Never fails here; unknown labels are reported by [`NcsAssembler::finish`].
    pub fn jnz(&mut self, label: &str) -> Result<&mut Self> {
        self.jump(Opcode::Jnz, label)
    }

    /// `JSR` to the subroutine at a label.
    ///
    /// # Errors
    ///
    /// Never fails here; unknown labels are reported by [`NcsAssembler::finish`].
    pub fn jsr(&mut self, label: &str) -> Result<&mut Self> {
        self.jump(Opcode::Jsr, label)
    }

    /// A jump with a raw relative offset, for malformed test input.
    ///
    /// # Errors
    ///
    /// Returns an error if `opcode` is not a jump.
    pub fn raw_jump(&mut self, opcode: Opcode, offset: i32) -> Result<&mut Self> {
        if !opcode.is_jump() {
            return Err(Error::Error(format!("{opcode} is not a jump")));
        }
        Ok(self.emit(opcode, UNTYPED).i32(offset))
    }

    /// `RETN`.
    ///
    /// # Errors
    ///
    /// Never fails; the `Result` keeps the builder chain uniform.
    pub fn retn(&mut self) -> Result<&mut Self> {
        Ok(self.emit(Opcode::Retn, UNTYPED))
    }

    /// `SAVEBP`.
    ///
    /// # Errors
    ///
    /// Never fails; the `Result` keeps the builder chain uniform.
    pub fn savebp(&mut self) -> Result<&mut Self> {
        Ok(self.emit(Opcode::SaveBp, UNTYPED))
    }

    /// `RESTOREBP`.
    ///
    /// # Errors
    ///
    /// Never fails; the `Result` keeps the builder chain uniform.
    pub fn restorebp(&mut self) -> Result<&mut Self> {
        Ok(self.emit(Opcode::RestoreBp, UNTYPED))
    }

    /// `NOP`.
    ///
    /// # Errors
    ///
    /// Never fails; the `Result` keeps the builder chain uniform.
    pub fn nop(&mut self) -> Result<&mut Self> {
        Ok(self.emit(Opcode::Nop, UNTYPED))
    }

    /// `DESTRUCT`, removes `remove` bytes keeping `save` bytes at `offset` within them.
    ///
    /// # Errors
    ///
    /// Returns an error if the kept range does not lie within the removed one.
    pub fn destruct(&mut self, remove: u16, offset: u16, save: u16) -> Result<&mut Self> {
        if u32::from(offset) + u32::from(save) > u32::from(remove) {
            return Err(Error::Error(format!(
                "DESTRUCT keeps {save} bytes at {offset} of {remove}"
            )));
        }
        Ok(self.emit(Opcode::Destruct, STACK_TYPE).u16(remove).u16(offset).u16(save))
    }

    /// `STORE_STATE` with the sizes of the saved base-pointer and stack frames.
    ///
    /// # Errors
    ///
    /// Never fails; the `Result` keeps the builder chain uniform.
    pub fn store_state(&mut self, bp: i32, sp: i32) -> Result<&mut Self> {
        Ok(self.emit(Opcode::StoreState, STORE_STATE_TYPE).i32(bp).i32(sp))
    }

    /// `STORE_STATEALL`.
    ///
    /// # Errors
    ///
    /// Never fails; the `Result` keeps the builder chain uniform.
    pub fn store_stateall(&mut self) -> Result<&mut Self> {
        Ok(self.emit(Opcode::StoreStateAll, UNTYPED))
    }

    /// Resolves every label and returns the complete script.
    ///
    /// # Errors
    ///
    /// Returns an error if a jump references an undefined label or the program exceeds
    /// the addressable size.
    pub fn finish(&mut self) -> Result<Vec<u8>> {
        for fixup in &self.fixups {
            let target = *self
                .labels
                .get(&fixup.label)
                .ok_or_else(|| Error::Error(format!("label '{}' is not defined", fixup.label)))?;
            let relative = i32::try_from(target as i64 - fixup.instruction_position as i64)
                .map_err(|_| Error::Error(format!("jump to '{}' out of range", fixup.label)))?;
            let mut position = fixup.fixup_position;
            write_be_at(&mut self.code, &mut position, relative)?;
        }

        let total = NCS_MAGIC.len() + PROGRAM_SIZE_RECORD + self.code.len();
        let size = i32::try_from(total)
            .map_err(|_| Error::Error(format!("program of {total} bytes is too large")))?;

        let mut out = Vec::with_capacity(total);
        out.extend_from_slice(NCS_MAGIC);
        out.push(Opcode::T.byte());
        push_be(&mut out, size);
        out.extend_from_slice(&self.code);
        Ok(out)
    }
}
