use util::{EnumFromStr, ParseEnumError};

/// Which of the four source dialects governs label syntax, literal
/// prefixes, origin directives, and opcode aliases for this assembly job.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Dialect {
    MA,
    M80,
    PASMO,
    ZASM,
}

/// Expression evaluator precedence table. MA's historical assembler binds
/// nearly flat (left to right); the rest use ordinary arithmetic precedence.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Precedence {
    Full,
    Simple,
}

impl Dialect {
    pub fn precedence(self) -> Precedence {
        match self {
            Dialect::MA => Precedence::Simple,
            Dialect::M80 | Dialect::PASMO | Dialect::ZASM => Precedence::Full,
        }
    }

    /// Symbol lookup is case-insensitive by default for M80 only; the rest
    /// are case-sensitive.
    pub fn case_sensitive(self) -> bool {
        !matches!(self, Dialect::M80)
    }

    /// `&HH` hex literals.
    pub fn allows_ampersand_hex(self) -> bool {
        matches!(self, Dialect::MA | Dialect::PASMO)
    }

    /// `%bbbbbbbb` binary literals.
    pub fn allows_percent_binary(self) -> bool {
        matches!(self, Dialect::MA | Dialect::PASMO)
    }

    /// `$HH` hex literal vs. bare `$` meaning "current PC" (PASMO only
    /// overloads `$` as a hex prefix; all dialects support bare `$` as PC).
    pub fn allows_dollar_hex(self) -> bool {
        matches!(self, Dialect::PASMO)
    }

    /// MA remaps the comparison operators `<`/`>` onto `SHL`/`SHR`.
    pub fn remaps_angle_brackets_to_shift(self) -> bool {
        matches!(self, Dialect::MA)
    }

    /// MA uses a bare `.name` on its own line for a label; the others use
    /// `name:`/`name::`.
    pub fn dot_prefixed_labels(self) -> bool {
        matches!(self, Dialect::MA)
    }
}

impl EnumFromStr for Dialect {
    fn from_str(s: &str) -> Result<Self, ParseEnumError> {
        match s.to_ascii_uppercase().as_str() {
            "MA" => Ok(Dialect::MA),
            "M80" => Ok(Dialect::M80),
            "PASMO" => Ok(Dialect::PASMO),
            "ZASM" => Ok(Dialect::ZASM),
            _ => Err(ParseEnumError {
                value: s.to_string(),
                enum_name: "Dialect",
            }),
        }
    }
}

impl std::str::FromStr for Dialect {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, ParseEnumError> {
        EnumFromStr::from_str(s)
    }
}
