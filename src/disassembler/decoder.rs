//! NCS instruction decoding.
//!
//! Decoding is a single deterministic pass: validate the 8-byte magic, then read one opcode
//! byte and its fixed operand layout at a time until the end of the stream.
//!
//! # Example: Decoding a Stream of Instructions
//!
//! ```rust
//! use ncscope::disassembler::{decode_stream, Opcode};
//!
//! let mut script = b"NCS V1.0".to_vec();
//! script.extend_from_slice(&[0x42, 0x00, 0x00, 0x00, 0x0F]); // T 15
//! script.extend_from_slice(&[0x20, 0x00]); // RETN
//!
//! let instructions = decode_stream(&script)?;
//! assert_eq!(instructions.len(), 2);
//! assert_eq!(instructions[1].opcode, Opcode::Retn);
//! assert_eq!(instructions[1].offset, 13);
//! # Ok::<(), ncscope::Error>(())
//! ```

use tracing::trace;

use crate::{
    disassembler::{ConstValue, Instruction, Opcode, Operand, TypeCode},
    file::parser::Parser,
    Error, Result,
};

/// The magic every compiled script starts with.
pub const NCS_MAGIC: &[u8; 8] = b"NCS V1.0";

/// Decodes a complete compiled script, header included.
///
/// A buffer holding only the header decodes to an empty instruction list.
///
/// # Errors
///
/// - [`Error::Truncated`] if the buffer is shorter than the magic
/// - [`Error::InvalidHeader`] if the magic does not match
/// - [`Error::UnknownOpcode`] / [`Error::Malformed`] for undecodable instructions
pub fn decode_stream(data: &[u8]) -> Result<Vec<Instruction>> {
    if data.len() < NCS_MAGIC.len() {
        return Err(Error::Truncated(data.len()));
    }
    if &data[..NCS_MAGIC.len()] != NCS_MAGIC {
        return Err(Error::InvalidHeader(data[..NCS_MAGIC.len()].to_vec()));
    }

    let mut parser = Parser::new(data);
    parser.seek(NCS_MAGIC.len())?;

    let mut instructions = Vec::new();
    while parser.has_more_data() {
        instructions.push(decode_instruction(&mut parser)?);
    }

    trace!(count = instructions.len(), bytes = data.len(), "decoded instruction stream");
    Ok(instructions)
}

/// Decodes the instruction at the parser's current position.
///
/// # Errors
///
/// Returns [`Error::UnknownOpcode`] for bytes outside the instruction set and
/// [`Error::Malformed`] when an operand is truncated or holds an impossible value.
pub fn decode_instruction(parser: &mut Parser) -> Result<Instruction> {
    let offset = parser.pos();
    let byte = parser.read_be::<u8>()?;
    let Some(opcode) = Opcode::from_byte(byte) else {
        return Err(Error::UnknownOpcode {
            opcode: byte,
            offset,
        });
    };

    decode_operands(parser, opcode, offset).map_err(|error| match error {
        Error::OutOfBounds { .. } => malformed_error!(
            "{} at 0x{:X} is truncated ({} bytes left)",
            opcode,
            offset,
            parser.remaining()
        ),
        other => other,
    })
}

fn decode_operands(parser: &mut Parser, opcode: Opcode, offset: usize) -> Result<Instruction> {
    if opcode == Opcode::T {
        let size = parser.read_be::<i32>()?;
        return Ok(Instruction {
            offset,
            size: parser.pos() - offset,
            opcode,
            type_byte: 0,
            operand: Operand::ProgramSize(size),
        });
    }

    let type_byte = parser.read_be::<u8>()?;
    let operand = match opcode {
        Opcode::CpDownSp | Opcode::CpTopSp | Opcode::CpDownBp | Opcode::CpTopBp => {
            Operand::Stack {
                offset: parser.read_be::<i32>()?,
                size: parser.read_be::<u16>()?,
            }
        }
        Opcode::Const => Operand::Const(match TypeCode::from_byte(type_byte) {
            Some(TypeCode::Int) => ConstValue::Int(parser.read_be::<i32>()?),
            Some(TypeCode::Float) => ConstValue::Float(parser.read_be::<f32>()?),
            Some(TypeCode::String) => ConstValue::String(parser.read_prefixed_string()?),
            Some(TypeCode::Object) => ConstValue::Object(parser.read_be::<u32>()?),
            _ => {
                return Err(malformed_error!(
                    "CONST at 0x{:X} has invalid type byte 0x{:02X}",
                    offset,
                    type_byte
                ))
            }
        }),
        Opcode::Action => Operand::Action {
            index: parser.read_be::<u16>()?,
            argc: parser.read_be::<u8>()?,
        },
        Opcode::Equal | Opcode::NEqual if type_byte == TypeCode::StructStruct.byte() => {
            Operand::StructSize(parser.read_be::<u16>()?)
        }
        Opcode::MovSp
        | Opcode::Jmp
        | Opcode::Jsr
        | Opcode::Jz
        | Opcode::Jnz
        | Opcode::DecISp
        | Opcode::IncISp
        | Opcode::DecIBp
        | Opcode::IncIBp => Operand::Offset(parser.read_be::<i32>()?),
        Opcode::Destruct => Operand::Destruct {
            remove: parser.read_be::<u16>()?,
            offset: parser.read_be::<u16>()?,
            save: parser.read_be::<u16>()?,
        },
        Opcode::StoreState => Operand::StoreState {
            bp: parser.read_be::<i32>()?,
            sp: parser.read_be::<i32>()?,
        },
        _ => Operand::None,
    };

    Ok(Instruction {
        offset,
        size: parser.pos() - offset,
        opcode,
        type_byte,
        operand,
    })
}

/// Renders a plain-text disassembly listing, one instruction per line.
///
/// ```rust
/// use ncscope::disassembler::{decode_stream, listing};
///
/// let script = b"NCS V1.0\x42\x00\x00\x00\x0F\x20\x00";
/// let text = listing(&decode_stream(script)?);
/// assert!(text.lines().nth(1).unwrap().starts_with("0000000D  RETN"));
/// # Ok::<(), ncscope::Error>(())
/// ```
#[must_use]
pub fn listing(instructions: &[Instruction]) -> String {
    let mut out = String::new();
    for instruction in instructions {
        out.push_str(instruction.to_string().trim_end());
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DiagnosticKind;

    fn script(body: &[u8]) -> Vec<u8> {
        let mut data = NCS_MAGIC.to_vec();
        data.extend_from_slice(body);
        data
    }

    #[test]
    fn test_decode_header_only() {
        let instructions = decode_stream(NCS_MAGIC).unwrap();
        assert!(instructions.is_empty());
    }

    #[test]
    fn test_decode_short_header() {
        let error = decode_stream(b"NCS ").unwrap_err();
        assert!(matches!(error, Error::Truncated(4)));
        assert_eq!(error.kind(), DiagnosticKind::Format);

        let error = decode_stream(b"NCS V2.0\x20\x00").unwrap_err();
        assert!(matches!(error, Error::InvalidHeader(_)));
        assert_eq!(error.kind(), DiagnosticKind::Format);
    }

    #[test]
    fn test_decode_operand_layouts() {
        let data = script(&[
            0x01, 0x01, 0xFF, 0xFF, 0xFF, 0xF8, 0x00, 0x04, // CPDOWNSP -8, 4
            0x04, 0x05, 0x00, 0x02, b'h', b'i', // CONST "hi"
            0x05, 0x00, 0x00, 0x2A, 0x02, // ACTION 42(2)
            0x0B, 0x24, 0x00, 0x0C, // EQUAL TT 12
            0x0B, 0x20, // EQUAL II
            0x21, 0x01, 0x00, 0x0C, 0x00, 0x04, 0x00, 0x04, // DESTRUCT 12, 4, 4
            0x2C, 0x10, 0x00, 0x00, 0x00, 0x08, 0x00, 0x00, 0x00, 0x00, // STORE_STATE 8, 0
            0x1D, 0x00, 0xFF, 0xFF, 0xFF, 0xFA, // JMP -6
        ]);

        let instructions = decode_stream(&data).unwrap();
        let sizes: Vec<usize> = instructions.iter().map(|i| i.size).collect();
        assert_eq!(sizes, vec![8, 6, 5, 4, 2, 8, 10, 6]);

        assert_eq!(
            instructions[0].operand,
            Operand::Stack {
                offset: -8,
                size: 4
            }
        );
        assert_eq!(
            instructions[1].operand,
            Operand::Const(ConstValue::String("hi".into()))
        );
        assert_eq!(
            instructions[2].operand,
            Operand::Action {
                index: 42,
                argc: 2
            }
        );
        assert_eq!(instructions[3].operand, Operand::StructSize(12));
        assert_eq!(instructions[4].operand, Operand::None);

        let jmp = &instructions[7];
        assert_eq!(jmp.offset, 8 + 43);
        assert_eq!(jmp.jump_target(), Some(8 + 37));
    }

    #[test]
    fn test_decode_unknown_opcode() {
        let error = decode_stream(&script(&[0x2D, 0x00, 0x7E, 0x00])).unwrap_err();
        assert!(matches!(
            error,
            Error::UnknownOpcode {
                opcode: 0x7E,
                offset: 10
            }
        ));
        assert_eq!(error.kind(), DiagnosticKind::Decode);
    }

    #[test]
    fn test_decode_truncated_operand() {
        let error = decode_stream(&script(&[0x04, 0x03, 0x00, 0x00])).unwrap_err();
        assert!(matches!(error, Error::Malformed { .. }));
        assert_eq!(error.kind(), DiagnosticKind::Decode);

        let error = decode_stream(&script(&[0x04, 0x09, 0x00, 0x00, 0x00, 0x00])).unwrap_err();
        assert!(matches!(error, Error::Malformed { .. }));
    }
}
