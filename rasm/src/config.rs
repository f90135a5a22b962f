//! Assembly job configuration. The CLI binary builds this from `clap`
//! matches; tests build it directly, bypassing argument parsing entirely
//! (argument parsing itself stays out of this crate's concern).

use crate::dialect::Dialect;
use z80core::CpuType;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum UpdateMode {
    All,
    Org,
    Borg,
    Offset,
    Phase,
    Dephase,
    Load,
}

#[derive(Clone, Debug)]
pub struct Options {
    pub dialect: Dialect,
    pub cpu: CpuType,
    pub emit_binary: bool,
    pub emit_hex: bool,
    pub emit_symbols: bool,
    pub emit_listing: bool,
    pub output_path: Option<String>,
    pub fill_byte: u8,
    pub include_dirs: Vec<String>,
    pub defines: Vec<(String, Option<String>)>,
    pub update: Vec<UpdateMode>,
    pub permissive: bool,
    pub number_build: bool,
    pub list_force: bool,
    pub list_cond: bool,
    pub address: bool,
    pub reformat: Option<Dialect>,
    pub modeline: bool,
    pub multi_inc: bool,
    pub keep: bool,
    pub cseg_base: i32,
    pub dseg_base: i32,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            dialect: Dialect::M80,
            cpu: CpuType::Z80,
            emit_binary: true,
            emit_hex: false,
            emit_symbols: false,
            emit_listing: false,
            output_path: None,
            fill_byte: 0xFF,
            include_dirs: Vec::new(),
            defines: Vec::new(),
            update: Vec::new(),
            permissive: false,
            number_build: false,
            list_force: false,
            list_cond: false,
            address: false,
            reformat: None,
            modeline: false,
            multi_inc: false,
            keep: false,
            cseg_base: 0,
            dseg_base: 0,
        }
    }
}

impl Options {
    pub fn is_defined(&self, name: &str) -> bool {
        self.defines.iter().any(|(n, _)| n.eq_ignore_ascii_case(name))
    }

    pub fn define_value(&self, name: &str) -> Option<&str> {
        self.defines
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .and_then(|(_, v)| v.as_deref())
    }
}
