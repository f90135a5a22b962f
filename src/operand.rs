use crate::encoder::EncodeError;
use crate::registers::{Condition, IndexReg, Reg16, Reg16Indirect, Reg16Stack, Reg8};
use util::EnumFromStr;

/// A single classified operand. Numeric payloads (`Indexed` displacements,
/// `IndirectImm` addresses, `Imm` values) have already been evaluated by the
/// caller's expression evaluator; this crate never parses arithmetic syntax.
#[derive(Clone, Copy, PartialEq, Debug)]
pub enum Operand {
    Reg8(Reg8),
    IndirectHl,
    Reg16(Reg16),
    Reg16Stack(Reg16Stack),
    IndexReg(IndexReg),
    /// `(IX+d)` / `(IY+d)`; bare `(IX)`/`(IY)` is `d == 0`.
    Indexed(IndexReg, i32),
    /// `(BC)` / `(DE)`.
    IndirectPair(Reg16Indirect),
    /// `(nnnn)`.
    IndirectImm(i32),
    IReg,
    RReg,
    Sp,
    Cond(Condition),
    /// Anything that isn't one of the above: evaluated as a plain expression.
    Imm(i32),
}

fn strip_parens(s: &str) -> Option<&str> {
    let s = s.trim();
    if s.starts_with('(') && s.ends_with(')') && s.len() >= 2 {
        Some(&s[1..s.len() - 1])
    } else {
        None
    }
}

/// Splits `IX+5` / `IY-1` / `IX` into the index register and the raw
/// displacement expression text (empty for a bare index register).
fn split_indexed(inner: &str) -> Option<(IndexReg, &str)> {
    let upper = inner.trim().to_ascii_uppercase();
    let reg = if upper.starts_with("IX") {
        IndexReg::IX
    } else if upper.starts_with("IY") {
        IndexReg::IY
    } else {
        return None;
    };
    let rest = inner.trim()[2..].trim();
    Some((reg, rest))
}

/// Parses one operand string into its classified [`Operand`], evaluating any
/// numeric sub-expression found inside it via `eval`.
pub fn parse_operand(
    raw: &str,
    eval: &mut dyn FnMut(&str) -> Result<i32, EncodeError>,
) -> Result<Operand, EncodeError> {
    let trimmed = raw.trim();
    let upper = trimmed.to_ascii_uppercase();

    if upper == "(HL)" {
        return Ok(Operand::IndirectHl);
    }
    if upper == "(BC)" {
        return Ok(Operand::IndirectPair(Reg16Indirect::BC));
    }
    if upper == "(DE)" {
        return Ok(Operand::IndirectPair(Reg16Indirect::DE));
    }
    if let Some(inner) = strip_parens(trimmed) {
        if let Some((reg, disp)) = split_indexed(inner) {
            let value = if disp.is_empty() {
                0
            } else {
                eval(disp)?
            };
            return Ok(Operand::Indexed(reg, value));
        }
        return Ok(Operand::IndirectImm(eval(inner)?));
    }
    if let Ok(reg) = <Reg8 as EnumFromStr>::from_str(&upper) {
        return Ok(Operand::Reg8(reg));
    }
    if upper == "SP" {
        return Ok(Operand::Sp);
    }
    if upper == "I" {
        return Ok(Operand::IReg);
    }
    if upper == "R" {
        return Ok(Operand::RReg);
    }
    if let Ok(reg) = <IndexReg as EnumFromStr>::from_str(&upper) {
        return Ok(Operand::IndexReg(reg));
    }
    if let Ok(reg) = <Reg16 as EnumFromStr>::from_str(&upper) {
        return Ok(Operand::Reg16(reg));
    }
    if let Ok(reg) = <Reg16Stack as EnumFromStr>::from_str(&upper) {
        return Ok(Operand::Reg16Stack(reg));
    }
    if let Ok(cond) = <Condition as EnumFromStr>::from_str(&upper) {
        return Ok(Operand::Cond(cond));
    }
    Ok(Operand::Imm(eval(trimmed)?))
}

#[cfg(test)]
mod test {
    use super::*;

    fn eval_noop(_s: &str) -> Result<i32, EncodeError> {
        Ok(0x1234)
    }

    #[test]
    fn recognizes_indirect_hl() {
        let mut eval = eval_noop;
        assert_eq!(
            parse_operand("(HL)", &mut eval).unwrap(),
            Operand::IndirectHl
        );
    }

    #[test]
    fn recognizes_indexed_with_displacement() {
        let mut eval = |s: &str| -> Result<i32, EncodeError> {
            assert_eq!(s, "+5");
            Ok(5)
        };
        assert_eq!(
            parse_operand("(IX+5)", &mut eval).unwrap(),
            Operand::Indexed(IndexReg::IX, 5)
        );
    }

    #[test]
    fn bare_index_register_has_zero_displacement() {
        let mut eval = eval_noop;
        assert_eq!(
            parse_operand("(IY)", &mut eval).unwrap(),
            Operand::Indexed(IndexReg::IY, 0)
        );
    }

    #[test]
    fn falls_back_to_immediate() {
        let mut eval = eval_noop;
        assert_eq!(
            parse_operand("LABEL+1", &mut eval).unwrap(),
            Operand::Imm(0x1234)
        );
    }
}
