//! Per-line tokenization: label extraction, comment stripping, and
//! mnemonic/argument splitting. Dialect-aware but otherwise stateless —
//! directive dispatch and PC/LC bookkeeping live in `pipeline`.

use crate::dialect::Dialect;

#[derive(Clone, Debug)]
pub struct LabelDecl {
    pub name: String,
    pub public: bool,
}

#[derive(Clone, Debug, Default)]
pub struct TokenizedLine {
    pub label: Option<LabelDecl>,
    pub mnemonic: Option<String>,
    pub args: String,
    pub comment: Option<String>,
}

/// Strips a trailing comment: the first `;` that isn't inside a quoted
/// string.
fn strip_comment(line: &str) -> (&str, Option<&str>) {
    let mut in_str: Option<char> = None;
    for (i, c) in line.char_indices() {
        match in_str {
            Some(q) => {
                if c == q {
                    in_str = None;
                }
            }
            None => {
                if c == '\'' || c == '"' {
                    in_str = Some(c);
                } else if c == ';' {
                    return (&line[..i], Some(&line[i + 1..]));
                }
            }
        }
    }
    (line, None)
}

fn is_label_lead(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == '.' || c == '?' || c == '@'
}

fn is_label_cont(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$' || c == '.' || c == '?' || c == '@'
}

/// Tokenizes one already-comment-stripped, non-empty source line.
pub fn tokenize(raw_line: &str, dialect: Dialect) -> TokenizedLine {
    let (body, comment) = strip_comment(raw_line);
    let body = body.trim_end();

    let mut rest = body;
    let mut label = None;

    if dialect.dot_prefixed_labels() {
        let trimmed = body.trim_start();
        if let Some(stripped) = trimmed.strip_prefix('.') {
            let end = stripped
                .find(|c: char| !is_label_cont(c))
                .unwrap_or(stripped.len());
            if end > 0 {
                label = Some(LabelDecl {
                    name: stripped[..end].to_string(),
                    public: false,
                });
                rest = stripped[end..].trim_start();
            }
        }
    } else if body.starts_with(|c: char| is_label_lead(c)) {
        let end = body
            .find(|c: char| !is_label_cont(c))
            .unwrap_or(body.len());
        let after = &body[end..];
        if let Some(stripped) = after.strip_prefix("::") {
            label = Some(LabelDecl {
                name: body[..end].to_string(),
                public: true,
            });
            rest = stripped.trim_start();
        } else if let Some(stripped) = after.strip_prefix(':') {
            label = Some(LabelDecl {
                name: body[..end].to_string(),
                public: false,
            });
            rest = stripped.trim_start();
        }
    }

    rest = rest.trim_start();
    let (mnemonic, args) = if rest.is_empty() {
        (None, String::new())
    } else {
        let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        let mnemonic = rest[..end].to_string();
        let args = rest[end..].trim_start().to_string();
        (Some(mnemonic), args)
    };

    TokenizedLine {
        label,
        mnemonic,
        args,
        comment: comment.map(|s| s.trim().to_string()),
    }
}

/// Splits a comma-separated argument list at top-level commas (commas
/// inside parens or quotes don't count).
pub fn split_args(args: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut in_str: Option<char> = None;
    let mut cur = String::new();
    for c in args.chars() {
        match in_str {
            Some(q) => {
                cur.push(c);
                if c == q {
                    in_str = None;
                }
            }
            None => match c {
                '\'' | '"' => {
                    in_str = Some(c);
                    cur.push(c);
                }
                '(' => {
                    depth += 1;
                    cur.push(c);
                }
                ')' => {
                    depth -= 1;
                    cur.push(c);
                }
                ',' if depth == 0 => {
                    parts.push(cur.trim().to_string());
                    cur = String::new();
                }
                _ => cur.push(c),
            },
        }
    }
    if !cur.trim().is_empty() || !parts.is_empty() {
        parts.push(cur.trim().to_string());
    }
    parts
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn colon_label_and_mnemonic() {
        let t = tokenize("L1: ADD A,B ; comment", Dialect::ZASM);
        assert_eq!(t.label.unwrap().name, "L1");
        assert_eq!(t.mnemonic.unwrap(), "ADD");
        assert_eq!(t.args, "A,B");
        assert_eq!(t.comment.unwrap(), "comment");
    }

    #[test]
    fn double_colon_is_public() {
        let t = tokenize("L1:: DB 1", Dialect::ZASM);
        assert!(t.label.unwrap().public);
    }

    #[test]
    fn dotted_ma_label() {
        let t = tokenize(".loop", Dialect::MA);
        assert_eq!(t.label.unwrap().name, "loop");
        assert!(t.mnemonic.is_none());
    }

    #[test]
    fn split_args_respects_parens() {
        let parts = split_args("(IX+1),A");
        assert_eq!(parts, vec!["(IX+1)".to_string(), "A".to_string()]);
    }

    #[test]
    fn semicolon_inside_string_is_not_a_comment() {
        let t = tokenize("DB \"a;b\" ; real comment", Dialect::ZASM);
        assert_eq!(t.args, "\"a;b\"");
        assert_eq!(t.comment.unwrap(), "real comment");
    }
}
