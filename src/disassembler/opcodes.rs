//! Opcode and type-byte tables of the NCS instruction set.

use strum::{Display, EnumCount, EnumIter};

/// Every opcode of the NCS virtual machine.
///
/// The discriminant is the encoded opcode byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, EnumCount)]
#[strum(serialize_all = "UPPERCASE")]
#[repr(u8)]
#[allow(missing_docs)]
pub enum Opcode {
    CpDownSp = 0x01,
    RsAdd = 0x02,
    CpTopSp = 0x03,
    Const = 0x04,
    Action = 0x05,
    LogAndII = 0x06,
    LogOrII = 0x07,
    IncOrII = 0x08,
    ExcOrII = 0x09,
    BoolAndII = 0x0A,
    Equal = 0x0B,
    NEqual = 0x0C,
    Geq = 0x0D,
    Gt = 0x0E,
    Lt = 0x0F,
    Leq = 0x10,
    ShLeft = 0x11,
    ShRight = 0x12,
    UShRight = 0x13,
    Add = 0x14,
    Sub = 0x15,
    Mul = 0x16,
    Div = 0x17,
    Mod = 0x18,
    Neg = 0x19,
    Comp = 0x1A,
    MovSp = 0x1B,
    #[strum(serialize = "STORE_STATEALL")]
    StoreStateAll = 0x1C,
    Jmp = 0x1D,
    Jsr = 0x1E,
    Jz = 0x1F,
    Retn = 0x20,
    Destruct = 0x21,
    Not = 0x22,
    DecISp = 0x23,
    IncISp = 0x24,
    Jnz = 0x25,
    CpDownBp = 0x26,
    CpTopBp = 0x27,
    DecIBp = 0x28,
    IncIBp = 0x29,
    SaveBp = 0x2A,
    RestoreBp = 0x2B,
    #[strum(serialize = "STORE_STATE")]
    StoreState = 0x2C,
    Nop = 0x2D,
    T = 0x42,
}

impl Opcode {
    /// Maps an encoded byte to its opcode.
    #[must_use]
    pub fn from_byte(byte: u8) -> Option<Opcode> {
        use Opcode::*;
        Some(match byte {
            0x01 => CpDownSp,
            0x02 => RsAdd,
            0x03 => CpTopSp,
            0x04 => Const,
            0x05 => Action,
            0x06 => LogAndII,
            0x07 => LogOrII,
            0x08 => IncOrII,
            0x09 => ExcOrII,
            0x0A => BoolAndII,
            0x0B => Equal,
            0x0C => NEqual,
            0x0D => Geq,
            0x0E => Gt,
            0x0F => Lt,
            0x10 => Leq,
            0x11 => ShLeft,
            0x12 => ShRight,
            0x13 => UShRight,
            0x14 => Add,
            0x15 => Sub,
            0x16 => Mul,
            0x17 => Div,
            0x18 => Mod,
            0x19 => Neg,
            0x1A => Comp,
            0x1B => MovSp,
            0x1C => StoreStateAll,
            0x1D => Jmp,
            0x1E => Jsr,
            0x1F => Jz,
            0x20 => Retn,
            0x21 => Destruct,
            0x22 => Not,
            0x23 => DecISp,
            0x24 => IncISp,
            0x25 => Jnz,
            0x26 => CpDownBp,
            0x27 => CpTopBp,
            0x28 => DecIBp,
            0x29 => IncIBp,
            0x2A => SaveBp,
            0x2B => RestoreBp,
            0x2C => StoreState,
            0x2D => Nop,
            0x42 => T,
            _ => return None,
        })
    }

    /// The encoded opcode byte.
    #[must_use]
    pub fn byte(self) -> u8 {
        self as u8
    }

    /// Returns `true` for jumps whose operand is a code offset (`JMP`, `JSR`, `JZ`, `JNZ`).
    #[must_use]
    pub fn is_jump(self) -> bool {
        matches!(self, Opcode::Jmp | Opcode::Jsr | Opcode::Jz | Opcode::Jnz)
    }

    /// Returns `true` for two-way branches.
    #[must_use]
    pub fn is_conditional(self) -> bool {
        matches!(self, Opcode::Jz | Opcode::Jnz)
    }

    /// Returns `true` if execution can continue with the following instruction.
    #[must_use]
    pub fn falls_through(self) -> bool {
        !matches!(self, Opcode::Jmp | Opcode::Retn)
    }

    /// Binary operators popping two operands and pushing a result.
    #[must_use]
    pub fn is_binary(self) -> bool {
        use Opcode::*;
        matches!(
            self,
            LogAndII
                | LogOrII
                | IncOrII
                | ExcOrII
                | BoolAndII
                | Equal
                | NEqual
                | Geq
                | Gt
                | Lt
                | Leq
                | ShLeft
                | ShRight
                | UShRight
                | Add
                | Sub
                | Mul
                | Div
                | Mod
        )
    }

    /// Operators whose result is always an `int` truth value.
    #[must_use]
    pub fn is_comparison(self) -> bool {
        use Opcode::*;
        matches!(
            self,
            LogAndII | LogOrII | Equal | NEqual | Geq | Gt | Lt | Leq | Not
        )
    }
}

/// The type byte that follows most opcodes.
///
/// For arithmetic and comparison opcodes the byte names the operand pair; for `CONST`,
/// `RSADD` and `ACTION` it names a single type. Opcodes without a typed meaning encode `0x00`
/// or `0x01`, which have no variant here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum TypeCode {
    Int = 0x03,
    Float = 0x04,
    String = 0x05,
    Object = 0x06,
    Effect = 0x10,
    Event = 0x11,
    Location = 0x12,
    Talent = 0x13,
    #[strum(serialize = "II")]
    IntInt = 0x20,
    #[strum(serialize = "FF")]
    FloatFloat = 0x21,
    #[strum(serialize = "OO")]
    ObjectObject = 0x22,
    #[strum(serialize = "SS")]
    StringString = 0x23,
    #[strum(serialize = "TT")]
    StructStruct = 0x24,
    #[strum(serialize = "IF")]
    IntFloat = 0x25,
    #[strum(serialize = "FI")]
    FloatInt = 0x26,
    #[strum(serialize = "EFFEFF")]
    EffectEffect = 0x30,
    #[strum(serialize = "EVTEVT")]
    EventEvent = 0x31,
    #[strum(serialize = "LOCLOC")]
    LocationLocation = 0x32,
    #[strum(serialize = "TALTAL")]
    TalentTalent = 0x33,
    #[strum(serialize = "VV")]
    VectorVector = 0x3A,
    #[strum(serialize = "VF")]
    VectorFloat = 0x3B,
    #[strum(serialize = "FV")]
    FloatVector = 0x3C,
}

impl TypeCode {
    /// Maps an encoded type byte to its meaning.
    #[must_use]
    pub fn from_byte(byte: u8) -> Option<TypeCode> {
        use TypeCode::*;
        Some(match byte {
            0x03 => Int,
            0x04 => Float,
            0x05 => String,
            0x06 => Object,
            0x10 => Effect,
            0x11 => Event,
            0x12 => Location,
            0x13 => Talent,
            0x20 => IntInt,
            0x21 => FloatFloat,
            0x22 => ObjectObject,
            0x23 => StringString,
            0x24 => StructStruct,
            0x25 => IntFloat,
            0x26 => FloatInt,
            0x30 => EffectEffect,
            0x31 => EventEvent,
            0x32 => LocationLocation,
            0x33 => TalentTalent,
            0x3A => VectorVector,
            0x3B => VectorFloat,
            0x3C => FloatVector,
            _ => return None,
        })
    }

    /// The encoded type byte.
    #[must_use]
    pub fn byte(self) -> u8 {
        self as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_opcode_byte_roundtrip() {
        for opcode in Opcode::iter() {
            assert_eq!(Opcode::from_byte(opcode.byte()), Some(opcode));
        }
        assert_eq!(Opcode::COUNT, 46);
        assert_eq!(Opcode::from_byte(0x00), None);
        assert_eq!(Opcode::from_byte(0x2E), None);
    }

    #[test]
    fn test_opcode_mnemonics() {
        assert_eq!(Opcode::CpDownSp.to_string(), "CPDOWNSP");
        assert_eq!(Opcode::StoreStateAll.to_string(), "STORE_STATEALL");
        assert_eq!(Opcode::StoreState.to_string(), "STORE_STATE");
        assert_eq!(Opcode::LogAndII.to_string(), "LOGANDII");
        assert_eq!(Opcode::T.to_string(), "T");
    }

    #[test]
    fn test_type_codes() {
        for code in TypeCode::iter() {
            assert_eq!(TypeCode::from_byte(code.byte()), Some(code));
        }
        assert_eq!(TypeCode::StructStruct.to_string(), "TT");
        assert_eq!(TypeCode::from_byte(0x01), None);
    }
}
