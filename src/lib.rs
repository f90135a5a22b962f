//! CPU-variant instruction data and the Z80/Z180/8080 instruction encoder.
//!
//! This crate knows nothing about assembly source text. It is handed a
//! mnemonic, a list of already-parsed [`Operand`]s (numeric operands are
//! already evaluated to their final `i32` value by the caller), and a
//! [`CpuType`], and it either produces the opcode bytes or an [`EncodeError`].
//!
//! Parsing a raw operand string (`"(IX+5)"`, `"HL"`, an arbitrary expression)
//! into an [`Operand`] is also provided here via [`operand::parse_operand`],
//! since recognizing register names is CPU-table knowledge; evaluating the
//! numeric sub-expressions inside an operand is supplied by the caller as a
//! callback so that this crate stays free of expression-syntax knowledge.

pub mod encoder;
pub mod operand;
pub mod range;
pub mod registers;
pub mod segment;

pub use encoder::{encode, EncodeError};
pub use operand::{parse_operand, Operand};
pub use range::{const8, signed8, word16};
pub use registers::{Condition, IndexReg, Reg16, Reg16Stack, Reg8};
pub use segment::Segment;

/// Which of the three supported instruction sets is active. Selected by
/// `.8080`/`.Z80`/`.Z180` or `--cpu-type`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CpuType {
    I8080,
    Z80,
    Z180,
}

impl Default for CpuType {
    fn default() -> Self {
        CpuType::Z80
    }
}
