/// One of the three output segments. Each has an independent load counter
/// (LC) and program counter (PC); segment base addresses are configurable.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub enum Segment {
    /// Absolute: no relocation, LC and base are the same thing.
    Absolute,
    /// Code segment.
    Code,
    /// Data segment.
    Data,
}

impl Segment {
    pub fn letter(self) -> char {
        match self {
            Segment::Absolute => 'A',
            Segment::Code => 'C',
            Segment::Data => 'D',
        }
    }
}

impl Default for Segment {
    fn default() -> Self {
        Segment::Absolute
    }
}
