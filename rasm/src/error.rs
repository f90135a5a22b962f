//! Crate-level error type plus the line-scoped `Diagnostic` used by the
//! "at most one error per source line" policy.

use std::fmt;
use z80core::EncodeError;

use crate::expr::{EvalError, ParseError};
use crate::symtab::SymbolError;

#[derive(Clone, Debug)]
pub enum Error {
    Io(String),
    Expr(ParseError),
    Eval(EvalError),
    Encode(EncodeError),
    Symbol(SymbolError),
    Directive(String),
    IncludeNotFound(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Io(msg) => write!(f, "I/O error: {}", msg),
            Error::Expr(e) => write!(f, "{}", e),
            Error::Eval(e) => write!(f, "{}", e),
            Error::Encode(e) => write!(f, "{}", e),
            Error::Symbol(e) => write!(f, "{}", e),
            Error::Directive(msg) => write!(f, "{}", msg),
            Error::IncludeNotFound(path) => write!(f, "include file not found: {}", path),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

impl From<ParseError> for Error {
    fn from(e: ParseError) -> Self {
        Error::Expr(e)
    }
}

impl From<EvalError> for Error {
    fn from(e: EvalError) -> Self {
        Error::Eval(e)
    }
}

impl From<EncodeError> for Error {
    fn from(e: EncodeError) -> Self {
        Error::Encode(e)
    }
}

impl From<SymbolError> for Error {
    fn from(e: SymbolError) -> Self {
        Error::Symbol(e)
    }
}

/// The first error recorded on one source line. Assembly of that line stops
/// there, but the pass continues to the next line so the user sees many
/// errors at once instead of aborting at the first.
#[derive(Clone, Debug)]
pub struct Diagnostic {
    pub file: String,
    pub line: u32,
    pub error: Error,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}: *** ERROR: {}", self.file, self.line, self.error)
    }
}
