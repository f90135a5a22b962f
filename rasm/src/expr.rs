//! Expression Parser and Expression Evaluator. The parser is a
//! character-driven state machine; the evaluator is a shunting-yard fold
//! over the resulting term list.

use crate::dialect::{Dialect, Precedence};
use std::fmt;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Op {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Shl,
    Shr,
    Eq,
    Ne,
    Lt,
    Le,
    Ge,
    Gt,
    BitAnd,
    BitOr,
    BitXor,
    Not,
    Low,
    High,
    Log2,
    UPlus,
    UMinus,
    UNot,
}

/// One lexed element of an expression: a literal, a label reference, an
/// operator, or punctuation. Mirrors the historical term tags `{B,D,H,Q}`,
/// `{""}`, `{L}`, and the operator set, but numeric radix collapses to a
/// plain value once lexed since nothing downstream needs it back.
#[derive(Clone, PartialEq, Debug)]
pub enum Term {
    Num(i32),
    Str(String),
    Label(String),
    Op(Op),
    LParen,
    RParen,
    Comma,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ParseError {
    pub message: String,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ParseError {}

fn err(message: impl Into<String>) -> ParseError {
    ParseError {
        message: message.into(),
    }
}

fn is_label_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == '.' || c == '?' || c == '@'
}

fn is_label_cont(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$' || c == '.' || c == '?' || c == '@'
}

fn word_operator(word: &str) -> Option<Op> {
    match word.to_ascii_uppercase().as_str() {
        "NOT" => Some(Op::Not),
        "LOG2" => Some(Op::Log2),
        "LOW" => Some(Op::Low),
        "HIGH" => Some(Op::High),
        "MOD" => Some(Op::Mod),
        "SHL" => Some(Op::Shl),
        "SHR" => Some(Op::Shr),
        "EQ" => Some(Op::Eq),
        "NE" => Some(Op::Ne),
        "LT" => Some(Op::Lt),
        "LE" => Some(Op::Le),
        "GE" => Some(Op::Ge),
        "GT" => Some(Op::Gt),
        "AND" => Some(Op::BitAnd),
        "OR" => Some(Op::BitOr),
        "XOR" => Some(Op::BitXor),
        _ => None,
    }
}

/// Parses one expression starting at `input`'s first character, stopping at
/// a top-level comma or end-of-line. Returns the term list and the
/// unconsumed remainder (so chained comma-separated arguments can be peeled
/// off one at a time).
///
/// On a syntactic failure the FIRST error is recorded and a best-effort term
/// list is returned instead of aborting, so later stages keep moving.
pub fn parse_expr<'a>(input: &'a str, dialect: Dialect) -> (Vec<Term>, &'a str, Option<ParseError>) {
    let mut terms = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0usize;
    let mut first_error = None;
    let mut expect_value = true; // true when a unary +/- would bind, not a binary operator
    let mut depth = 0i32;

    macro_rules! record_err {
        ($e:expr) => {
            if first_error.is_none() {
                first_error = Some($e);
            }
        };
    }

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if c == ',' && depth == 0 {
            break;
        }
        if c == '(' {
            terms.push(Term::LParen);
            depth += 1;
            expect_value = true;
            i += 1;
            continue;
        }
        if c == ')' {
            if depth == 0 {
                break;
            }
            terms.push(Term::RParen);
            depth -= 1;
            expect_value = false;
            i += 1;
            continue;
        }
        if c == '\'' || c == '"' {
            let quote = c;
            i += 1;
            let mut s = String::new();
            loop {
                if i >= chars.len() {
                    record_err!(err("unterminated string"));
                    break;
                }
                if chars[i] == quote {
                    if i + 1 < chars.len() && chars[i + 1] == quote {
                        s.push(quote);
                        i += 2;
                        continue;
                    }
                    i += 1;
                    break;
                }
                s.push(chars[i]);
                i += 1;
            }
            terms.push(Term::Str(s));
            expect_value = false;
            continue;
        }
        if c == '$' && !(dialect.allows_dollar_hex() && i + 1 < chars.len() && chars[i + 1].is_ascii_hexdigit()) {
            terms.push(Term::Label("$".to_string()));
            expect_value = false;
            i += 1;
            continue;
        }
        if c.is_ascii_digit()
            || (c == '$' && dialect.allows_dollar_hex())
            || (c == '&' && dialect.allows_ampersand_hex())
            || (c == '%' && dialect.allows_percent_binary())
            || c == '#'
        {
            let (value, consumed) = match lex_number(&chars[i..], dialect) {
                Ok(r) => r,
                Err(e) => {
                    record_err!(e);
                    (0, 1)
                }
            };
            terms.push(Term::Num(value));
            expect_value = false;
            i += consumed;
            continue;
        }
        if c == 'X' && chars.get(i + 1) == Some(&'\'') {
            match lex_x_quote_hex(&chars[i..]) {
                Ok((value, consumed)) => {
                    terms.push(Term::Num(value));
                    i += consumed;
                }
                Err(e) => {
                    record_err!(e);
                    i += 1;
                }
            }
            expect_value = false;
            continue;
        }
        if is_label_start(c) {
            let start = i;
            while i < chars.len() && is_label_cont(chars[i]) {
                i += 1;
            }
            let word: String = chars[start..i].iter().collect();
            if let Some(op) = word_operator(&word) {
                terms.push(Term::Op(op));
                expect_value = true;
            } else {
                terms.push(Term::Label(word));
                expect_value = false;
            }
            continue;
        }
        // Symbolic operators.
        let two: String = chars[i..(i + 2).min(chars.len())].iter().collect();
        let (op, width) = match two.as_str() {
            "==" => (Some(Op::Eq), 2),
            "!=" => (Some(Op::Ne), 2),
            "<=" => (Some(Op::Le), 2),
            ">=" => (Some(Op::Ge), 2),
            "<>" => (Some(Op::Ne), 2),
            _ => match c {
                '+' => (Some(if expect_value { Op::UPlus } else { Op::Add }), 1),
                '-' => (Some(if expect_value { Op::UMinus } else { Op::Sub }), 1),
                '*' => (Some(Op::Mul), 1),
                '/' => (Some(Op::Div), 1),
                '=' => (Some(Op::Eq), 1),
                '~' => (Some(Op::UNot), 1),
                '!' => (Some(Op::BitOr), 1),
                '^' => (Some(Op::BitXor), 1),
                '&' => (Some(Op::BitAnd), 1),
                '<' => (
                    Some(if dialect.remaps_angle_brackets_to_shift() {
                        Op::Shl
                    } else {
                        Op::Lt
                    }),
                    1,
                ),
                '>' => (
                    Some(if dialect.remaps_angle_brackets_to_shift() {
                        Op::Shr
                    } else {
                        Op::Gt
                    }),
                    1,
                ),
                _ => (None, 1),
            },
        };
        match op {
            Some(op) => {
                terms.push(Term::Op(op));
                expect_value = true;
                i += width;
            }
            None => {
                record_err!(err(format!("unexpected character '{}'", c)));
                i += 1;
            }
        }
    }

    terms.push(Term::Comma);
    let remainder_start: usize = input
        .char_indices()
        .nth(i)
        .map(|(b, _)| b)
        .unwrap_or_else(|| input.len());
    let remainder = &input[remainder_start..];
    let remainder = remainder.strip_prefix(',').unwrap_or(remainder);

    if first_error.is_some() && terms.len() == 1 {
        // Best-effort fallback list so downstream evaluation doesn't panic.
        return (vec![Term::Num(0), Term::Comma], remainder, first_error);
    }
    (terms, remainder, first_error)
}

fn lex_number(chars: &[char], dialect: Dialect) -> Result<(i32, usize), ParseError> {
    let mut i = 0usize;
    let radix;
    if chars[0] == '#' {
        i = 1;
        radix = 16;
    } else if chars[0] == '&' && dialect.allows_ampersand_hex() {
        i = 1;
        radix = 16;
    } else if chars[0] == '%' && dialect.allows_percent_binary() {
        i = 1;
        radix = 2;
    } else if chars[0] == '$' && dialect.allows_dollar_hex() {
        i = 1;
        radix = 16;
    } else if chars.len() > 1 && chars[0] == '0' && (chars[1] == 'x' || chars[1] == 'X') {
        i = 2;
        radix = 16;
    } else {
        radix = 0; // determined by trailing suffix, default decimal
    }

    let digit_start = i;
    while i < chars.len() && (chars[i].is_ascii_alphanumeric()) {
        i += 1;
    }
    let mut text: String = chars[digit_start..i].iter().collect();

    let mut effective_radix = radix;
    if radix == 0 {
        let last = text.chars().last();
        match last {
            Some('B') | Some('b') if text[..text.len() - 1].chars().all(|c| c == '0' || c == '1') => {
                effective_radix = 2;
                text.pop();
            }
            Some('H') | Some('h') => {
                effective_radix = 16;
                text.pop();
            }
            Some('O') | Some('o') | Some('Q') | Some('q') => {
                effective_radix = 8;
                text.pop();
            }
            Some('D') | Some('d') => {
                effective_radix = 10;
                text.pop();
            }
            _ => effective_radix = 10,
        }
    }

    if text.is_empty() {
        return Err(err("empty numeric literal"));
    }
    i32::from_str_radix(&text, effective_radix)
        .map(|v| (v, i))
        .map_err(|_| err(format!("invalid numeric literal: {}", text)))
}

fn lex_x_quote_hex(chars: &[char]) -> Result<(i32, usize), ParseError> {
    // X'hh'
    let mut i = 2;
    let start = i;
    while i < chars.len() && chars[i] != '\'' {
        i += 1;
    }
    if i >= chars.len() {
        return Err(err("unterminated X'..' literal"));
    }
    let text: String = chars[start..i].iter().collect();
    i += 1;
    i32::from_str_radix(&text, 16)
        .map(|v| (v, i))
        .map_err(|_| err(format!("invalid X'..' literal: {}", text)))
}

fn precedence(op: Op, mode: Precedence) -> u8 {
    match mode {
        Precedence::Simple => match op {
            Op::UPlus | Op::UMinus | Op::UNot | Op::Log2 => 3,
            _ => 2,
        },
        Precedence::Full => match op {
            Op::UPlus | Op::UMinus | Op::UNot | Op::Log2 => 9,
            Op::Low | Op::High => 8,
            Op::Mul | Op::Div | Op::Mod | Op::Shl | Op::Shr => 7,
            Op::Add | Op::Sub => 6,
            Op::Eq | Op::Ne | Op::Lt | Op::Le | Op::Ge | Op::Gt => 5,
            // Word-operator `NOT` binds far looser than the symbolic unary
            // operators: it sits between comparisons and `AND`, not up with
            // `U~`/`LOW`/`HIGH`.
            Op::Not => 4,
            Op::BitAnd => 3,
            Op::BitOr | Op::BitXor => 2,
        },
    }
}

fn is_unary(op: Op) -> bool {
    matches!(
        op,
        Op::UPlus | Op::UMinus | Op::UNot | Op::Not | Op::Low | Op::High | Op::Log2
    )
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum EvalError {
    UndefinedLabel(String),
    DivisionByZero,
    NegativeShift,
    UnbalancedParens,
    EmptyExpression,
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            EvalError::UndefinedLabel(name) => write!(f, "undefined label: {}", name),
            EvalError::DivisionByZero => write!(f, "division by zero"),
            EvalError::NegativeShift => write!(f, "negative shift count"),
            EvalError::UnbalancedParens => write!(f, "mismatched brackets"),
            EvalError::EmptyExpression => write!(f, "empty expression"),
        }
    }
}

impl std::error::Error for EvalError {}

/// Resolves a label to its current value. Returns `Ok(None)` for "silently
/// zero" resolution (pass 1, or an undefined label outside an enabled
/// conditional in pass 2 when lenient); `Err` signals a hard "undefined
/// label" failure.
pub trait LabelResolver {
    fn resolve(&mut self, name: &str) -> Result<Option<i32>, EvalError>;
    /// Must raise `UndefinedLabel` rather than silently resolving to zero.
    fn strict(&self) -> bool;
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum StackOp {
    Op(Op),
    LParen,
}

/// Shunting-yard fold of a term list to a signed 17-bit-range integer.
pub fn eval_terms(terms: &[Term], mode: Precedence, labels: &mut dyn LabelResolver) -> Result<i32, EvalError> {
    let mut values: Vec<i32> = Vec::new();
    let mut ops: Vec<StackOp> = Vec::new();

    fn apply(op: Op, values: &mut Vec<i32>) -> Result<(), EvalError> {
        if is_unary(op) {
            let v = values.pop().ok_or(EvalError::EmptyExpression)?;
            let r = match op {
                Op::UPlus => v,
                Op::UMinus => -v,
                Op::UNot | Op::Not => v ^ 0xFFFF,
                Op::Low => v & 0xFF,
                Op::High => (v >> 8) & 0xFF,
                Op::Log2 => {
                    let mut n = v.max(1);
                    let mut bits = 0;
                    while n > 1 {
                        n >>= 1;
                        bits += 1;
                    }
                    bits
                }
                _ => unreachable!(),
            };
            values.push(r);
            return Ok(());
        }
        let b = values.pop().ok_or(EvalError::EmptyExpression)?;
        let a = values.pop().ok_or(EvalError::EmptyExpression)?;
        let r = match op {
            Op::Add => a.wrapping_add(b),
            Op::Sub => a.wrapping_sub(b),
            Op::Mul => a.wrapping_mul(b),
            Op::Div => {
                if b == 0 {
                    return Err(EvalError::DivisionByZero);
                }
                a.wrapping_div(b)
            }
            Op::Mod => {
                if b == 0 {
                    return Err(EvalError::DivisionByZero);
                }
                a.wrapping_rem(b)
            }
            Op::Shl => {
                if b < 0 {
                    return Err(EvalError::NegativeShift);
                }
                a.wrapping_shl(b as u32)
            }
            Op::Shr => {
                if b < 0 {
                    return Err(EvalError::NegativeShift);
                }
                ((a as u32) >> (b as u32).min(31)) as i32
            }
            Op::Eq => tri(a == b),
            Op::Ne => tri(a != b),
            Op::Lt => tri(a < b),
            Op::Le => tri(a <= b),
            Op::Ge => tri(a >= b),
            Op::Gt => tri(a > b),
            Op::BitAnd => a & b,
            Op::BitOr => a | b,
            Op::BitXor => a ^ b,
            _ => unreachable!(),
        };
        values.push(fold17(r));
        Ok(())
    }

    fn fold17(v: i32) -> i32 {
        let m = 1i64 << 17;
        let mut v = v as i64 % m;
        if v < -(m / 2) {
            v += m;
        }
        v as i32
    }

    fn tri(b: bool) -> i32 {
        if b {
            0xFFFF
        } else {
            0
        }
    }

    for term in terms {
        match term {
            Term::Num(v) => values.push(*v),
            Term::Str(s) => {
                // A string literal folds to the value of its first byte,
                // matching the historical assembler's ASCII-constant rule.
                values.push(s.bytes().next().unwrap_or(0) as i32);
            }
            Term::Label(name) => {
                if name == "$" {
                    values.push(labels.resolve("$")?.unwrap_or(0));
                    continue;
                }
                match labels.resolve(name)? {
                    Some(v) => values.push(v),
                    None => {
                        if labels.strict() {
                            return Err(EvalError::UndefinedLabel(name.clone()));
                        }
                        values.push(0);
                    }
                }
            }
            Term::LParen => ops.push(StackOp::LParen),
            Term::RParen => loop {
                match ops.pop() {
                    Some(StackOp::LParen) => break,
                    Some(StackOp::Op(op)) => apply(op, &mut values)?,
                    None => return Err(EvalError::UnbalancedParens),
                }
            },
            Term::Op(op) => {
                // Unary (prefix) operators are right-associative: only
                // yield to an already-stacked operator of STRICTLY higher
                // precedence, never pop one waiting on its own operand.
                let p = precedence(*op, mode);
                while let Some(StackOp::Op(top)) = ops.last() {
                    let top_p = precedence(*top, mode);
                    let should_pop = if is_unary(*op) { top_p > p } else { top_p >= p };
                    if should_pop {
                        let top = *top;
                        apply(top, &mut values)?;
                        ops.pop();
                    } else {
                        break;
                    }
                }
                ops.push(StackOp::Op(*op));
            }
            Term::Comma => break,
        }
    }
    while let Some(item) = ops.pop() {
        match item {
            StackOp::LParen => return Err(EvalError::UnbalancedParens),
            StackOp::Op(op) => apply(op, &mut values)?,
        }
    }
    values.pop().ok_or(EvalError::EmptyExpression)
}

#[cfg(test)]
mod test {
    use super::*;

    struct NoLabels;
    impl LabelResolver for NoLabels {
        fn resolve(&mut self, _name: &str) -> Result<Option<i32>, EvalError> {
            Ok(Some(0))
        }
        fn strict(&self) -> bool {
            false
        }
    }

    fn eval(input: &str, dialect: Dialect) -> i32 {
        let (terms, _, e) = parse_expr(input, dialect);
        assert!(e.is_none(), "parse error: {:?}", e);
        eval_terms(&terms, dialect.precedence(), &mut NoLabels).unwrap()
    }

    #[test]
    fn decimal_add() {
        assert_eq!(eval("1+2", Dialect::ZASM), 3);
    }

    #[test]
    fn hex_literal_suffix() {
        assert_eq!(eval("0FFh", Dialect::ZASM), 0xFF);
    }

    #[test]
    fn full_precedence_mul_before_add() {
        assert_eq!(eval("2+3*4", Dialect::ZASM), 14);
    }

    #[test]
    fn simple_precedence_is_left_to_right() {
        assert_eq!(eval("2+3*4", Dialect::MA), 20);
    }

    #[test]
    fn parens_override_precedence() {
        assert_eq!(eval("(2+3)*4", Dialect::ZASM), 20);
    }

    #[test]
    fn comparison_yields_tristate() {
        assert_eq!(eval("3=3", Dialect::ZASM), 0xFFFF);
        assert_eq!(eval("3=4", Dialect::ZASM), 0);
    }

    #[test]
    fn bitwise_not_is_xor_ffff() {
        assert_eq!(eval("NOT 0", Dialect::ZASM), 0xFFFF);
    }

    #[test]
    fn word_not_binds_looser_than_comparison() {
        // `NOT` sits below `EQ`/`NE`/etc in the Full table, so `5=6` is
        // evaluated first and only then inverted: NOT(5=6) = NOT(0) = 0xFFFF.
        assert_eq!(eval("NOT 5=6", Dialect::ZASM), 0xFFFF);
    }

    #[test]
    fn word_not_binds_tighter_than_and() {
        // NOT at 4, AND at 3: `NOT 0 AND 0` == `(NOT 0) AND 0` == 0.
        assert_eq!(eval("NOT 0 AND 0", Dialect::ZASM), 0);
    }
}
