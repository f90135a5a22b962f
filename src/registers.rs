use util::{EnumFromStr, ParseEnumError};
use util_derive::EnumFromStr;

/// The seven plain 8-bit registers. `(HL)` is deliberately not a variant
/// here: it is encoded as [`crate::Operand::IndirectHl`] since its bit
/// pattern (6) slots into the same position in every table that accepts a
/// plain register, but it is not itself a register operand in every
/// dialect (e.g. it cannot appear as the destination of `BIT`).
#[derive(Clone, Copy, PartialEq, Eq, Debug, EnumFromStr)]
pub enum Reg8 {
    B,
    C,
    D,
    E,
    H,
    L,
    A,
}

impl Reg8 {
    /// 3-bit encoding used throughout the Z80/8080 opcode tables.
    pub fn code(self) -> u8 {
        match self {
            Reg8::B => 0,
            Reg8::C => 1,
            Reg8::D => 2,
            Reg8::E => 3,
            Reg8::H => 4,
            Reg8::L => 5,
            Reg8::A => 7,
        }
    }
}

/// General-purpose 16-bit register pairs, as used by `ADD HL,rr`, `INC rr`,
/// `LD rr,nn`, and similar "generic pair" instruction forms.
#[derive(Clone, Copy, PartialEq, Eq, Debug, EnumFromStr)]
pub enum Reg16 {
    BC,
    DE,
    HL,
    SP,
}

impl Reg16 {
    pub fn code(self) -> u8 {
        match self {
            Reg16::BC => 0x00,
            Reg16::DE => 0x10,
            Reg16::HL => 0x20,
            Reg16::SP => 0x30,
        }
    }
}

/// The register-pair set used by `PUSH`/`POP`: same as [`Reg16`] but with
/// `AF` replacing `SP`.
#[derive(Clone, Copy, PartialEq, Eq, Debug, EnumFromStr)]
pub enum Reg16Stack {
    BC,
    DE,
    HL,
    AF,
}

impl Reg16Stack {
    pub fn code(self) -> u8 {
        match self {
            Reg16Stack::BC => 0x00,
            Reg16Stack::DE => 0x10,
            Reg16Stack::HL => 0x20,
            Reg16Stack::AF => 0x30,
        }
    }
}

/// `(BC)` / `(DE)` indirect addressing, valid only for `LD A,(rr)` / `LD (rr),A`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Reg16Indirect {
    BC,
    DE,
}

/// `IX` or `IY`, used bare (`ADD IX,bc`, `LD SP,IX`) or indexed (`(IX+d)`).
#[derive(Clone, Copy, PartialEq, Eq, Debug, EnumFromStr)]
pub enum IndexReg {
    IX,
    IY,
}

impl IndexReg {
    pub fn prefix(self) -> u8 {
        match self {
            IndexReg::IX => 0xDD,
            IndexReg::IY => 0xFD,
        }
    }
}

/// Condition codes for `JP`/`JR`/`CALL`/`RET`. `HS`/`LO`/`MI` are MA-dialect
/// aliases carried over from the historical assembler's `cond` table: `HS`
/// ("higher or same") is the unsigned reading of `NC`, `LO` ("lower") is the
/// unsigned reading of `C`, and `MI` ("minus") is `M`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Condition {
    NZ,
    Z,
    NC,
    C,
    PO,
    PE,
    P,
    M,
}

impl Condition {
    pub fn code(self) -> u8 {
        match self {
            Condition::NZ => 0x00,
            Condition::Z => 0x08,
            Condition::NC => 0x10,
            Condition::C => 0x18,
            Condition::PO => 0x20,
            Condition::PE => 0x28,
            Condition::P => 0x30,
            Condition::M => 0x38,
        }
    }

    /// `JR`/`DJNZ` only support `NZ`, `Z`, `NC`, `C`.
    pub fn relative_code(self) -> Option<u8> {
        match self {
            Condition::NZ => Some(0x00),
            Condition::Z => Some(0x08),
            Condition::NC => Some(0x10),
            Condition::C => Some(0x18),
            _ => None,
        }
    }
}

impl EnumFromStr for Condition {
    fn from_str(s: &str) -> Result<Self, ParseEnumError> {
        match s {
            "NZ" => Ok(Condition::NZ),
            "Z" => Ok(Condition::Z),
            "NC" => Ok(Condition::NC),
            "C" => Ok(Condition::C),
            "PO" => Ok(Condition::PO),
            "PE" => Ok(Condition::PE),
            "P" => Ok(Condition::P),
            "M" => Ok(Condition::M),
            "HS" => Ok(Condition::NC),
            "LO" => Ok(Condition::C),
            "MI" => Ok(Condition::M),
            _ => Err(ParseEnumError {
                value: s.to_string(),
                enum_name: "Condition",
            }),
        }
    }
}

impl std::str::FromStr for Condition {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, ParseEnumError> {
        EnumFromStr::from_str(s)
    }
}

/// The 8080 mnemonics name register pairs with a single letter (`LXI H,nn`,
/// `DAD B`) rather than the Z80 pair name; this is the 8080 spelling of
/// [`Reg16`] (`B`→`BC`, `D`→`DE`, `H`→`HL`, `SP`→`SP`).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Reg16I8080 {
    B,
    D,
    H,
    Sp,
}

impl Reg16I8080 {
    pub fn to_reg16(self) -> Reg16 {
        match self {
            Reg16I8080::B => Reg16::BC,
            Reg16I8080::D => Reg16::DE,
            Reg16I8080::H => Reg16::HL,
            Reg16I8080::Sp => Reg16::SP,
        }
    }
}

impl EnumFromStr for Reg16I8080 {
    fn from_str(s: &str) -> Result<Self, ParseEnumError> {
        match s {
            "B" => Ok(Reg16I8080::B),
            "D" => Ok(Reg16I8080::D),
            "H" => Ok(Reg16I8080::H),
            "SP" => Ok(Reg16I8080::Sp),
            _ => Err(ParseEnumError {
                value: s.to_string(),
                enum_name: "Reg16I8080",
            }),
        }
    }
}

/// The 8080 dialect's `PUSH`/`POP` register set: `B`,`D`,`H`,`PSW`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Reg16Psw {
    B,
    D,
    H,
    Psw,
}

impl Reg16Psw {
    pub fn code(self) -> u8 {
        match self {
            Reg16Psw::B => 0x00,
            Reg16Psw::D => 0x10,
            Reg16Psw::H => 0x20,
            Reg16Psw::Psw => 0x30,
        }
    }
}

impl EnumFromStr for Reg16Psw {
    fn from_str(s: &str) -> Result<Self, ParseEnumError> {
        match s {
            "B" => Ok(Reg16Psw::B),
            "D" => Ok(Reg16Psw::D),
            "H" => Ok(Reg16Psw::H),
            "PSW" => Ok(Reg16Psw::Psw),
            _ => Err(ParseEnumError {
                value: s.to_string(),
                enum_name: "Reg16Psw",
            }),
        }
    }
}
