//! Parser/Driver, Expression Parser/Evaluator, Symbol Table, Assembly
//! Pipeline, and Reformatter for Z80/Z180/8080 source. The `rasm` binary is a
//! thin `clap` CLI shell over this library; everything that decides how
//! source text becomes bytes lives here.

pub mod config;
pub mod dialect;
pub mod error;
pub mod expr;
pub mod parser;
pub mod pipeline;
pub mod reformat;
pub mod symtab;

pub use config::{Options, UpdateMode};
pub use dialect::{Dialect, Precedence};
pub use error::{Diagnostic, Error};
pub use pipeline::{AssemblyResult, Assembler};

use std::path::Path;

/// Assembles `entry` per `options` and returns the resulting artifacts, or
/// the full list of per-line diagnostics collected across both passes.
pub fn assemble(entry: &Path, options: Options) -> Result<AssemblyResult, Vec<Diagnostic>> {
    Assembler::new(options).assemble(entry)
}
