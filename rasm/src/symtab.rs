//! Two-scope symbol table: process-wide `publics` and per-source-file
//! `locals`, with case-insensitive lookup as an optional runtime mode.

use std::collections::HashMap;
use z80core::Segment;

#[derive(Clone, Debug)]
pub struct Label {
    pub name: String,
    pub segment: Segment,
    pub value: Option<i32>,
    pub file: String,
    pub line: u32,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Phase {
    One,
    Two,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum SymbolError {
    DuplicateDefinition(String),
    PhaseError(String),
}

impl std::fmt::Display for SymbolError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            SymbolError::DuplicateDefinition(n) => write!(f, "duplicate definition: {}", n),
            SymbolError::PhaseError(n) => write!(f, "phase error: {}", n),
        }
    }
}

impl std::error::Error for SymbolError {}

/// Normalizes a name for table lookup; the original spelling is kept on the
/// stored `Label` for display.
fn key(name: &str, case_sensitive: bool) -> String {
    if case_sensitive {
        name.to_string()
    } else {
        name.to_ascii_lowercase()
    }
}

pub struct SymbolTable {
    case_sensitive: bool,
    publics: HashMap<String, Label>,
    locals: HashMap<String, Label>,
    phase: Phase,
}

impl SymbolTable {
    pub fn new(case_sensitive: bool) -> Self {
        SymbolTable {
            case_sensitive,
            publics: HashMap::new(),
            locals: HashMap::new(),
            phase: Phase::One,
        }
    }

    pub fn set_phase(&mut self, phase: Phase) {
        self.phase = phase;
    }

    /// `LABCASE` flips this mid-source; existing keys were hashed under the
    /// prior mode and are left as-is; only lookups/definitions made after the
    /// switch observe the new case sensitivity.
    pub fn set_case_sensitive(&mut self, case_sensitive: bool) {
        self.case_sensitive = case_sensitive;
    }

    /// Drops per-file local labels; called between source files.
    pub fn reset_locals(&mut self) {
        self.locals.clear();
    }

    pub fn declare_public(&mut self, name: &str) {
        let k = key(name, self.case_sensitive);
        self.publics.entry(k).or_insert_with(|| Label {
            name: name.to_string(),
            segment: Segment::default(),
            value: None,
            file: String::new(),
            line: 0,
        });
    }

    /// Defines (or redefines) a label. `value` of `None` means "use the
    /// current PC" — callers that track PC should resolve it themselves and
    /// always pass `Some`; this table has no notion of PC.
    pub fn define_label(
        &mut self,
        name: &str,
        is_public: bool,
        segment: Segment,
        value: i32,
        file: &str,
        line: u32,
        strict: bool,
    ) -> Result<(), SymbolError> {
        let k = key(name, self.case_sensitive);
        let table = if is_public {
            &mut self.publics
        } else {
            &mut self.locals
        };

        match table.get_mut(&k) {
            Some(existing) if existing.value.is_some() => match self.phase {
                Phase::One => {
                    if strict || existing.value != Some(value) {
                        return Err(SymbolError::DuplicateDefinition(name.to_string()));
                    }
                    Ok(())
                }
                Phase::Two => {
                    if existing.value != Some(value) {
                        return Err(SymbolError::PhaseError(name.to_string()));
                    }
                    Ok(())
                }
            },
            _ => {
                table.insert(
                    k,
                    Label {
                        name: name.to_string(),
                        segment,
                        value: Some(value),
                        file: file.to_string(),
                        line,
                    },
                );
                Ok(())
            }
        }
    }

    /// Locals of the current file first, then publics.
    pub fn resolve(&self, name: &str) -> Option<i32> {
        let k = key(name, self.case_sensitive);
        self.locals
            .get(&k)
            .or_else(|| self.publics.get(&k))
            .and_then(|label| label.value)
    }

    pub fn all_labels(&self) -> impl Iterator<Item = &Label> {
        self.publics.values().chain(self.locals.values())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn redefinition_with_same_value_is_not_an_error_in_pass_one() {
        let mut t = SymbolTable::new(true);
        t.define_label("L1", false, Segment::Code, 5, "a.asm", 1, false).unwrap();
        t.define_label("L1", false, Segment::Code, 5, "a.asm", 2, false).unwrap();
    }

    #[test]
    fn redefinition_with_different_value_is_duplicate_in_pass_one() {
        let mut t = SymbolTable::new(true);
        t.define_label("L1", false, Segment::Code, 5, "a.asm", 1, false).unwrap();
        let err = t.define_label("L1", false, Segment::Code, 6, "a.asm", 2, false).unwrap_err();
        assert_eq!(err, SymbolError::DuplicateDefinition("L1".to_string()));
    }

    #[test]
    fn mismatched_value_in_pass_two_is_a_phase_error() {
        let mut t = SymbolTable::new(true);
        t.define_label("L1", false, Segment::Code, 5, "a.asm", 1, false).unwrap();
        t.set_phase(Phase::Two);
        let err = t.define_label("L1", false, Segment::Code, 10, "a.asm", 1, false).unwrap_err();
        assert_eq!(err, SymbolError::PhaseError("L1".to_string()));
    }

    #[test]
    fn case_insensitive_lookup_preserves_display_name() {
        let mut t = SymbolTable::new(false);
        t.define_label("Loop", false, Segment::Code, 0x10, "a.asm", 1, false).unwrap();
        assert_eq!(t.resolve("LOOP"), Some(0x10));
        assert_eq!(t.resolve("loop"), Some(0x10));
    }

    #[test]
    fn set_case_sensitive_affects_later_lookups() {
        let mut t = SymbolTable::new(false);
        t.define_label("Loop", false, Segment::Code, 0x10, "a.asm", 1, false).unwrap();
        assert_eq!(t.resolve("loop"), Some(0x10));
        t.set_case_sensitive(true);
        t.define_label("Flag", false, Segment::Code, 0x20, "a.asm", 2, false).unwrap();
        assert_eq!(t.resolve("flag"), None);
        assert_eq!(t.resolve("Flag"), Some(0x20));
    }

    #[test]
    fn locals_shadow_publics() {
        let mut t = SymbolTable::new(true);
        t.define_label("X", true, Segment::Code, 1, "a.asm", 1, false).unwrap();
        t.define_label("X", false, Segment::Code, 2, "a.asm", 1, false).unwrap();
        assert_eq!(t.resolve("X"), Some(2));
        t.reset_locals();
        assert_eq!(t.resolve("X"), Some(1));
    }
}
