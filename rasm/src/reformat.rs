//! Source Reformatter: a parallel sink fed the same `Label`/`OpCode`/`AddArg`/
//! `Comment` calls the Parser makes while walking a flattened source, buffering
//! one line at a time and flushing it in a chosen target dialect's syntax.
//!
//! Not required for assembly — `pipeline::Assembler` never touches this
//! module. It exists purely to translate a source file's label/origin/literal
//! conventions from one dialect to another.

use std::collections::HashSet;

use crate::dialect::Dialect;
use crate::expr::{parse_expr, Op, Term};
use crate::parser::{self, split_args};
use crate::pipeline::SourceLine;

#[derive(Default)]
struct Pending {
    label: Option<(String, bool)>,
    mnemonic: Option<String>,
    args: Vec<String>,
    comment: Option<String>,
}

pub struct Reformatter {
    target: Dialect,
    source_dialect: Dialect,
    multi_inc: bool,
    included: HashSet<String>,
    lines: Vec<String>,
    pending: Pending,
}

impl Reformatter {
    pub fn new(source_dialect: Dialect, target: Dialect, multi_inc: bool) -> Self {
        Reformatter {
            target,
            source_dialect,
            multi_inc,
            included: HashSet::new(),
            lines: Vec::new(),
            pending: Pending::default(),
        }
    }

    pub fn label(&mut self, name: &str, public: bool) {
        self.pending.label = Some((name.to_string(), public));
    }

    pub fn opcode(&mut self, mnemonic: &str) {
        self.pending.mnemonic = Some(mnemonic.to_string());
    }

    pub fn add_arg(&mut self, expr: &str) {
        let rendered = self.render_expr(expr);
        self.pending.args.push(rendered);
    }

    pub fn comment(&mut self, text: &str) {
        self.pending.comment = Some(text.to_string());
    }

    /// True the first time `path` is seen; tracks `INCLUDE` de-duplication
    /// independently of the assembler's own (unless `--multi-inc`, which
    /// disables de-duplication entirely and always returns true).
    pub fn should_emit_include(&mut self, path: &str) -> bool {
        self.multi_inc || self.included.insert(path.to_string())
    }

    /// Flushes the buffered label/opcode/args/comment as one or more
    /// canonical output lines, then clears the buffer for the next source
    /// line.
    pub fn commit(&mut self) {
        let pending = std::mem::take(&mut self.pending);
        self.lines.extend(self.render_lines(&pending));
    }

    pub fn finish(self) -> Vec<String> {
        self.lines
    }

    fn render_lines(&self, pending: &Pending) -> Vec<String> {
        let label_str = pending
            .label
            .as_ref()
            .map(|(name, public)| self.render_label(name, *public));

        // MA's `BORG a` sets the load counter without touching the phase;
        // ZASM spells the same operation as two directives.
        if let Some(mnemonic) = pending.mnemonic.as_deref() {
            let upper = mnemonic.to_ascii_uppercase();
            if (upper == "BORG" || upper == "ORG") && self.target == Dialect::ZASM && upper == "BORG" {
                let mut out = Vec::new();
                if let Some(l) = &label_str {
                    out.push(l.clone());
                }
                if let Some(addr) = pending.args.first() {
                    out.push(format!("\tLOAD\t{}", addr));
                    out.push(self.trailer(&format!("\tORG\t{}", addr), pending));
                }
                return out;
            }
        }

        let mut line = String::new();
        if let Some(l) = &label_str {
            line.push_str(l);
        }
        if let Some(m) = &pending.mnemonic {
            line.push('\t');
            line.push_str(&alias_opcode(m, self.target));
            if !pending.args.is_empty() {
                line.push('\t');
                line.push_str(&pending.args.join(","));
            }
        }
        let line = self.trailer(&line, pending);
        if line.is_empty() {
            Vec::new()
        } else {
            vec![line]
        }
    }

    fn trailer(&self, line: &str, pending: &Pending) -> String {
        match &pending.comment {
            Some(c) if !line.is_empty() => format!("{}  ; {}", line, c),
            Some(c) => format!("; {}", c),
            None => line.to_string(),
        }
    }

    fn render_label(&self, name: &str, public: bool) -> String {
        if self.target.dot_prefixed_labels() {
            format!(".{}", name)
        } else if public {
            format!("{}::", name)
        } else {
            format!("{}:", name)
        }
    }

    /// Re-lexes `expr` in the source dialect and re-renders numeric literals
    /// in the target dialect's radix notation, leaving labels and operators
    /// untouched. Falls back to the original text on a parse error.
    fn render_expr(&self, expr: &str) -> String {
        let (terms, _, err) = parse_expr(expr, self.source_dialect);
        if err.is_some() {
            return expr.to_string();
        }
        let mut out = String::new();
        for term in &terms {
            match term {
                Term::Num(v) => out.push_str(&render_literal(*v, self.target)),
                Term::Str(s) => {
                    out.push('\'');
                    out.push_str(s);
                    out.push('\'');
                }
                Term::Label(name) => out.push_str(name),
                Term::Op(op) => out.push_str(render_op(*op)),
                Term::LParen => out.push('('),
                Term::RParen => out.push(')'),
                Term::Comma => break,
            }
        }
        out
    }
}

fn render_literal(v: i32, dialect: Dialect) -> String {
    let u = (v as i64 & 0xFFFF) as u16;
    if u < 10 {
        return format!("{}", u);
    }
    match dialect {
        Dialect::MA => format!("&{:X}", u),
        Dialect::ZASM => format!("#{:X}", u),
        Dialect::M80 | Dialect::PASMO => {
            let hex = format!("{:X}", u);
            if hex.starts_with(|c: char| c.is_ascii_digit()) {
                format!("{}H", hex)
            } else {
                format!("0{}H", hex)
            }
        }
    }
}

fn render_op(op: Op) -> &'static str {
    match op {
        Op::Add | Op::UPlus => "+",
        Op::Sub | Op::UMinus => "-",
        Op::Mul => "*",
        Op::Div => "/",
        Op::Mod => " MOD ",
        Op::Shl => " SHL ",
        Op::Shr => " SHR ",
        Op::Eq => "=",
        Op::Ne => "<>",
        Op::Lt => "<",
        Op::Le => "<=",
        Op::Ge => ">=",
        Op::Gt => ">",
        Op::BitAnd => " AND ",
        Op::BitOr => " OR ",
        Op::BitXor => " XOR ",
        Op::Not | Op::UNot => "NOT ",
        Op::Low => "LOW ",
        Op::High => "HIGH ",
        Op::Log2 => "LOG2 ",
    }
}

/// `DB`/`DW`/`DS` (Intel-style) and `DEFB`/`DEFW`/`DEFS` (Zilog-style) are
/// the same directives under different names; MA/M80/PASMO spell the Intel
/// form, ZASM spells the Zilog form.
const FAMILIES: &[[&str; 2]] = &[["DB", "DEFB"], ["DW", "DEFW"], ["DS", "DEFS"]];

fn alias_opcode(mnemonic: &str, target: Dialect) -> String {
    let upper = mnemonic.to_ascii_uppercase();
    for family in FAMILIES {
        if family.contains(&upper.as_str()) {
            return match target {
                Dialect::ZASM => family[1].to_string(),
                _ => family[0].to_string(),
            };
        }
    }
    upper
}

/// Walks an already-flattened source and returns the output lines in
/// `target`'s dialect. `source_dialect` governs how the input lines are
/// tokenized and how their literals are parsed.
pub fn reformat(lines: &[SourceLine], source_dialect: Dialect, target: Dialect, multi_inc: bool) -> Vec<String> {
    let mut r = Reformatter::new(source_dialect, target, multi_inc);
    for line in lines {
        let tok = parser::tokenize(&line.text, source_dialect);
        if tok.label.is_none() && tok.mnemonic.is_none() && tok.comment.is_none() {
            continue;
        }
        if let Some(label) = &tok.label {
            r.label(&label.name, label.public);
        }
        if let Some(mnemonic) = &tok.mnemonic {
            r.opcode(mnemonic);
            for arg in split_args(&tok.args) {
                if !arg.is_empty() {
                    r.add_arg(&arg);
                }
            }
        }
        if let Some(comment) = &tok.comment {
            r.comment(comment);
        }
        r.commit();
    }
    r.finish()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn borg_expands_to_load_and_org_for_zasm_target() {
        let lines = vec![SourceLine {
            file: "a.asm".to_string(),
            line_no: 1,
            text: "BORG 100h".to_string(),
        }];
        let out = reformat(&lines, Dialect::M80, Dialect::ZASM, false);
        assert_eq!(out, vec!["\tLOAD\t#100".to_string(), "\tORG\t#100".to_string()]);
    }

    #[test]
    fn db_becomes_defb_for_zasm_target() {
        let lines = vec![SourceLine {
            file: "a.asm".to_string(),
            line_no: 1,
            text: "L1: DB 1,2,3".to_string(),
        }];
        let out = reformat(&lines, Dialect::M80, Dialect::ZASM, false);
        assert_eq!(out, vec!["L1:\tDEFB\t1,2,3".to_string()]);
    }

    #[test]
    fn literal_radix_is_translated_between_dialects() {
        let lines = vec![SourceLine {
            file: "a.asm".to_string(),
            line_no: 1,
            text: "DB 0FFh".to_string(),
        }];
        let out = reformat(&lines, Dialect::M80, Dialect::MA, false);
        assert_eq!(out, vec!["\tDB\t&FF".to_string()]);
    }

    #[test]
    fn dot_prefixed_label_for_ma_target() {
        let lines = vec![SourceLine {
            file: "a.asm".to_string(),
            line_no: 1,
            text: "loop:: NOP".to_string(),
        }];
        let out = reformat(&lines, Dialect::M80, Dialect::MA, false);
        assert_eq!(out, vec![".loop\tNOP".to_string()]);
    }
}
