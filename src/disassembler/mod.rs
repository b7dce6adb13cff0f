//! NCS bytecode disassembler.
//!
//! This module turns the raw bytes of a compiled script into a flat sequence of
//! [`Instruction`] values tagged with their byte offsets. No semantic interpretation happens
//! here; the analysis passes work on the decoded stream.
//!
//! # Key Types
//! - [`Instruction`] - A decoded instruction
//! - [`Opcode`] - The instruction set
//! - [`TypeCode`] - Meaning of the type byte following most opcodes
//! - [`Operand`] / [`ConstValue`] - Opcode-specific operands
//!
//! # Main Functions
//! - [`decode_stream`] - Validate the header and decode the whole file
//! - [`decode_instruction`] - Decode a single instruction
//! - [`listing`] - Plain-text disassembly
//!
//! # Example
//! ```rust
//! use ncscope::{disassembler::decode_instruction, Parser};
//!
//! let bytecode = [0x2D, 0x00, 0x20, 0x00]; // NOP, RETN
//! let mut parser = Parser::new(&bytecode);
//! let instruction = decode_instruction(&mut parser)?;
//! assert_eq!(instruction.opcode.to_string(), "NOP");
//! # Ok::<(), ncscope::Error>(())
//! ```

mod decoder;
mod instruction;
mod opcodes;

pub use decoder::{decode_instruction, decode_stream, listing, NCS_MAGIC};
pub use instruction::{ConstValue, Instruction, Operand};
pub use opcodes::{Opcode, TypeCode};
