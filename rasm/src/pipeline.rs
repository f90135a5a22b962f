//! Assembly Pipeline: source flattening (`INCLUDE`/`REPT` expansion),
//! two-pass orchestration, directive dispatch, and final artifact assembly.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use outsink::{BinarySink, HexSink};
use z80core::{CpuType, Segment};

use crate::config::Options;
use crate::dialect::Dialect;
use crate::error::{Diagnostic, Error};
use crate::expr::{eval_terms, parse_expr, EvalError, LabelResolver};
use crate::parser::{self, split_args};
use crate::symtab::{Phase, SymbolTable};

#[derive(Clone, Debug)]
pub struct SourceLine {
    pub file: String,
    pub line_no: u32,
    pub text: String,
}

/// Reads `path` and expands `INCLUDE` and `REPT`/`ENDM` into one flat line
/// list. Kept as an explicit preprocessing pass (rather than seeking within
/// open file handles mid-assembly) so both passes walk the identical,
/// already-resolved line sequence.
pub fn flatten(
    path: &Path,
    dialect: Dialect,
    include_dirs: &[String],
    multi_inc: bool,
    already_included: &mut HashSet<PathBuf>,
) -> Result<Vec<SourceLine>, Error> {
    let canon = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    if !multi_inc && already_included.contains(&canon) {
        return Ok(Vec::new());
    }
    already_included.insert(canon);

    let text = fs::read_to_string(path).map_err(|_| Error::IncludeNotFound(path.display().to_string()))?;
    let file_name = path.display().to_string();
    let raw_lines: Vec<&str> = text.lines().collect();
    expand(&raw_lines, &file_name, dialect, include_dirs, multi_inc, already_included, path.parent())
}

fn expand(
    lines: &[&str],
    file_name: &str,
    dialect: Dialect,
    include_dirs: &[String],
    multi_inc: bool,
    already_included: &mut HashSet<PathBuf>,
    base_dir: Option<&Path>,
) -> Result<Vec<SourceLine>, Error> {
    let mut out = Vec::new();
    let mut i = 0usize;
    while i < lines.len() {
        let line_no = (i + 1) as u32;
        let tok = parser::tokenize(lines[i], dialect);
        let mnemonic_upper = tok.mnemonic.as_deref().unwrap_or("").to_ascii_uppercase();

        if mnemonic_upper == "INCLUDE" {
            let name = tok.args.trim().trim_matches(|c| c == '\'' || c == '"');
            let resolved = resolve_include(name, include_dirs, base_dir)?;
            let nested = flatten(&resolved, dialect, include_dirs, multi_inc, already_included)?;
            out.extend(nested);
            i += 1;
            continue;
        }

        if mnemonic_upper == "REPT" {
            let (body, after) = collect_rept_body(lines, i + 1)?;
            let count = eval_rept_count(&tok.args, dialect);
            for _ in 0..count {
                let nested = expand(&body, file_name, dialect, include_dirs, multi_inc, already_included, base_dir)?;
                out.extend(nested);
            }
            i = after;
            continue;
        }

        out.push(SourceLine {
            file: file_name.to_string(),
            line_no,
            text: lines[i].to_string(),
        });
        i += 1;
    }
    Ok(out)
}

fn resolve_include(name: &str, include_dirs: &[String], base_dir: Option<&Path>) -> Result<PathBuf, Error> {
    let mut candidates = Vec::new();
    if let Some(dir) = base_dir {
        candidates.push(dir.join(name));
    }
    for dir in include_dirs {
        candidates.push(Path::new(dir).join(name));
    }
    candidates.push(PathBuf::from(name));
    candidates
        .into_iter()
        .find(|p| p.is_file())
        .ok_or_else(|| Error::IncludeNotFound(name.to_string()))
}

/// Finds the `ENDM` matching the `REPT` whose body starts at `start`,
/// respecting nested `REPT`/`ENDM` pairs. Returns the body lines and the
/// index just past `ENDM`.
fn collect_rept_body(lines: &[&str], start: usize) -> Result<(Vec<&str>, usize), Error> {
    let mut depth = 0i32;
    let mut i = start;
    while i < lines.len() {
        let upper = lines[i].trim().to_ascii_uppercase();
        let first_word = upper.split_whitespace().next().unwrap_or("");
        if first_word == "REPT" {
            depth += 1;
        } else if first_word == "ENDM" {
            if depth == 0 {
                return Ok((lines[start..i].to_vec(), i + 1));
            }
            depth -= 1;
        }
        i += 1;
    }
    Err(Error::Directive("REPT without matching ENDM".to_string()))
}

struct NoLabels;
impl LabelResolver for NoLabels {
    fn resolve(&mut self, _name: &str) -> Result<Option<i32>, EvalError> {
        Ok(Some(0))
    }
    fn strict(&self) -> bool {
        false
    }
}

fn eval_rept_count(args: &str, dialect: Dialect) -> u32 {
    let (terms, _, _) = parse_expr(args, dialect);
    eval_terms(&terms, dialect.precedence(), &mut NoLabels)
        .unwrap_or(0)
        .max(0) as u32
}

#[derive(Clone, Copy, Default)]
struct SegState {
    lc: i32,
    phase: i32,
}

impl SegState {
    fn pc(&self) -> i32 {
        self.lc + self.phase
    }
}

struct Segments {
    absolute: SegState,
    code: SegState,
    data: SegState,
    current: Segment,
}

impl Segments {
    fn new(cseg_base: i32, dseg_base: i32) -> Self {
        Segments {
            absolute: SegState::default(),
            code: SegState { lc: cseg_base, phase: 0 },
            data: SegState { lc: dseg_base, phase: 0 },
            current: Segment::Absolute,
        }
    }

    fn state(&mut self, seg: Segment) -> &mut SegState {
        match seg {
            Segment::Absolute => &mut self.absolute,
            Segment::Code => &mut self.code,
            Segment::Data => &mut self.data,
        }
    }

    fn cur(&mut self) -> &mut SegState {
        self.state(self.current)
    }
}

struct EvalCtx<'a> {
    symtab: &'a SymbolTable,
    pc: i32,
    strict: bool,
}

impl<'a> LabelResolver for EvalCtx<'a> {
    fn resolve(&mut self, name: &str) -> Result<Option<i32>, EvalError> {
        if name == "$" {
            return Ok(Some(self.pc));
        }
        match self.symtab.resolve(name) {
            Some(v) => Ok(Some(v)),
            None => {
                if self.strict {
                    Err(EvalError::UndefinedLabel(name.to_string()))
                } else {
                    Ok(None)
                }
            }
        }
    }
    fn strict(&self) -> bool {
        self.strict
    }
}

pub struct AssemblyResult {
    pub binary: BinarySink,
    pub hex_records: Vec<String>,
    pub symbols: Vec<String>,
    pub listing: Vec<String>,
}

pub struct Assembler {
    options: Options,
    symtab: SymbolTable,
    diagnostics: Vec<Diagnostic>,
    /// Set while inside a `.COMMENT`/`.PRINTX`/`.PRINTF` block; holds the
    /// delimiter character that closes it. Subsequent lines are swallowed
    /// verbatim (not tokenized) until one of them contains this character.
    comment_delim: Option<char>,
    /// The entry file passed to [`Assembler::assemble`]; used to locate the
    /// `<basename>-build` counter file for the `BUILD` pseudo-op.
    entry_path: Option<PathBuf>,
}

impl Assembler {
    pub fn new(options: Options) -> Self {
        let case_sensitive = options.dialect.case_sensitive();
        Assembler {
            symtab: SymbolTable::new(case_sensitive),
            options,
            diagnostics: Vec::new(),
            comment_delim: None,
            entry_path: None,
        }
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn assemble(&mut self, entry: &Path) -> Result<AssemblyResult, Vec<Diagnostic>> {
        self.entry_path = Some(entry.to_path_buf());
        let mut seen = HashSet::new();
        let lines = match flatten(
            entry,
            self.options.dialect,
            &self.options.include_dirs,
            self.options.multi_inc,
            &mut seen,
        ) {
            Ok(l) => l,
            Err(e) => {
                return Err(vec![Diagnostic {
                    file: entry.display().to_string(),
                    line: 0,
                    error: e,
                }])
            }
        };

        self.run_pass(&lines, Phase::One, false);
        let mut listing = Vec::new();
        let mut binary = BinarySink::new(self.options.fill_byte);
        let mut hex = HexSink::new();
        let mut end_addr = 0i32;
        self.run_pass_emit(&lines, &mut listing, &mut binary, &mut hex, &mut end_addr);

        if !self.diagnostics.is_empty() {
            return Err(self.diagnostics.clone());
        }

        let hex_records = hex.finish(end_addr as u32);
        let symbols = self.render_symbols();
        Ok(AssemblyResult {
            binary,
            hex_records,
            symbols,
            listing,
        })
    }

    /// Pass 1: resolve label values; no bytes emitted, no output sinks open.
    fn run_pass(&mut self, lines: &[SourceLine], phase: Phase, _emit: bool) {
        self.symtab.set_phase(phase);
        let mut segs = Segments::new(self.options.cseg_base, self.options.dseg_base);
        let mut cpu = self.options.cpu;
        let mut enable = vec![true];
        let mut current_file = String::new();

        for line in lines {
            if line.file != current_file {
                current_file = line.file.clone();
                self.symtab.reset_locals();
            }
            self.process_line(line, &mut segs, &mut cpu, &mut enable, None, None, None);
        }
    }

    /// Pass 2: same walk, this time emitting bytes to the sinks and listing.
    fn run_pass_emit(
        &mut self,
        lines: &[SourceLine],
        listing: &mut Vec<String>,
        binary: &mut BinarySink,
        hex: &mut HexSink,
        end_addr: &mut i32,
    ) {
        self.symtab.set_phase(Phase::Two);
        let mut segs = Segments::new(self.options.cseg_base, self.options.dseg_base);
        let mut cpu = self.options.cpu;
        let mut enable = vec![true];
        let mut current_file = String::new();

        for line in lines {
            if line.file != current_file {
                current_file = line.file.clone();
                self.symtab.reset_locals();
            }
            let before = segs.cur().pc();
            let diag_count_before = self.diagnostics.len();
            self.process_line(
                line,
                &mut segs,
                &mut cpu,
                &mut enable,
                Some(binary),
                Some(hex),
                Some(end_addr),
            );
            let after = segs.cur().pc();
            if self.options.emit_listing {
                let mut entry = format!("{:04X}  {}", before, line.text);
                if after != before {
                    entry = format!("{:04X}  ({} bytes)  {}", before, after - before, line.text);
                }
                if self.diagnostics.len() > diag_count_before {
                    let d = &self.diagnostics[self.diagnostics.len() - 1];
                    entry.push('\n');
                    entry.push_str(&format!("*** ERROR: {}", d.error));
                }
                listing.push(entry);
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn process_line(
        &mut self,
        line: &SourceLine,
        segs: &mut Segments,
        cpu: &mut CpuType,
        enable: &mut Vec<bool>,
        mut binary: Option<&mut BinarySink>,
        mut hex: Option<&mut HexSink>,
        mut end_addr: Option<&mut i32>,
    ) {
        if let Some(delim) = self.comment_delim {
            if line.text.contains(delim) {
                self.comment_delim = None;
            }
            return;
        }

        let tok = parser::tokenize(&line.text, self.options.dialect);
        let active = *enable.last().unwrap_or(&true);

        // Conditional-assembly directives are dispatched before the active
        // check: they must run even inside a disabled block, since that is
        // how nested disables/re-enables are tracked.
        let mnemonic_upper = tok.mnemonic.as_deref().unwrap_or("").to_ascii_uppercase();
        match mnemonic_upper.as_str() {
            "IF" | "IFDEF" | "IFNOT" => {
                let cond = self.eval_condition(&mnemonic_upper, &tok.args, segs, active);
                enable.push(active && cond);
                return;
            }
            "ELSE" => {
                if enable.len() > 1 {
                    let parent = enable[enable.len() - 2];
                    let top = enable.last_mut().unwrap();
                    *top = parent && !*top;
                } else {
                    self.report(line, Error::Directive("ELSE without IF".to_string()));
                }
                return;
            }
            "ENDIF" => {
                if enable.len() > 1 {
                    enable.pop();
                } else {
                    self.report(line, Error::Directive("ENDIF without IF".to_string()));
                }
                return;
            }
            _ => {}
        }

        if !active {
            return;
        }

        if let Some(label) = &tok.label {
            self.define_label_here(label.name.clone(), label.public, line, segs);
        }

        let mnemonic = match &tok.mnemonic {
            Some(m) => m,
            None => return,
        };
        let upper = mnemonic.to_ascii_uppercase();

        // MA-style bare equate: `LABEL EQU value` with no colon/dot label.
        if tok.label.is_none() {
            let args_first = tok.args.split_whitespace().next().unwrap_or("");
            if args_first.eq_ignore_ascii_case("EQU") && !is_known_mnemonic(&upper, *cpu) {
                let value_expr = tok.args.trim_start()[args_first.len()..].trim();
                self.define_equ(mnemonic, false, value_expr, line, segs, false);
                return;
            }
        }

        match upper.as_str() {
            "END" => {}
            "LIST" | "NOLIST" | "NAME" | "TITLE" | ".LFCOND" | ".SFCOND" | ".TFCOND" | "ERROR" => {}
            "INSERT" | "INCBIN" => match self.read_insert_file(&tok.args, line) {
                Ok(bytes) => self.emit_bytes(&bytes, segs, &mut binary, &mut hex, &mut end_addr),
                Err(e) => self.report(line, e),
            },
            ".COMMENT" | ".PRINTX" | ".PRINTF" => {
                let arg = tok.args.trim();
                if let Some(delim) = arg.chars().next() {
                    let rest = &arg[delim.len_utf8()..];
                    if !rest.contains(delim) {
                        self.comment_delim = Some(delim);
                    }
                }
            }
            "EXT" | "EXTRN" | "ENTRY" | "PUBLIC" => {
                for name in split_args(&tok.args) {
                    if !name.is_empty() {
                        self.symtab.declare_public(&name);
                    }
                }
            }
            "LABCASE" => {
                let arg = tok.args.trim();
                let case_sensitive = if arg.eq_ignore_ascii_case("YES") {
                    true
                } else if arg.eq_ignore_ascii_case("NO") {
                    false
                } else {
                    self.eval_arg(arg, segs, line).unwrap_or(0) != 0
                };
                self.symtab.set_case_sensitive(case_sensitive);
            }
            "EQU" => {
                // Handled via the dialect's label-on-own-line form; a bare
                // `EQU` with no preceding label is a directive error.
                self.report(line, Error::Directive("EQU without a label".to_string()));
            }
            "EQUD" => {
                if let Some(label) = &tok.label {
                    self.define_equ(&label.name, label.public, &tok.args, line, segs, true);
                } else {
                    self.report(line, Error::Directive("EQUD without a label".to_string()));
                }
            }
            ".8080" => *cpu = CpuType::I8080,
            ".Z80" => *cpu = CpuType::Z80,
            ".Z180" => *cpu = CpuType::Z180,
            "ASEG" => segs.current = Segment::Absolute,
            "CSEG" => segs.current = Segment::Code,
            "DSEG" => segs.current = Segment::Data,
            "ORG" => {
                if let Some(addr) = self.eval_arg(&tok.args, segs, line) {
                    let st = segs.cur();
                    st.lc = addr;
                }
            }
            "BORG" => {
                if let Some(addr) = self.eval_arg(&tok.args, segs, line) {
                    segs.cur().lc = addr;
                }
            }
            "LOAD" => {
                if let Some(addr) = self.eval_arg(&tok.args, segs, line) {
                    segs.cur().lc = addr - segs.cur().phase;
                }
            }
            "OFFSET" | ".PHASE" => {
                if tok.args.trim().is_empty() {
                    segs.cur().phase = 0;
                } else if let Some(addr) = self.eval_arg(&tok.args, segs, line) {
                    let lc = segs.cur().lc;
                    segs.cur().phase = addr - lc;
                }
            }
            ".DEPHASE" => segs.cur().phase = 0,
            "DATE" => self.emit_bytes(&ascii_date(), segs, &mut binary, &mut hex, &mut end_addr),
            "TIME" => self.emit_bytes(&ascii_time(), segs, &mut binary, &mut hex, &mut end_addr),
            "BUILD" => {
                let n = self.read_build_counter();
                self.emit_bytes(&n.to_le_bytes(), segs, &mut binary, &mut hex, &mut end_addr);
            }
            "FILL" => {
                let parts = split_args(&tok.args);
                if parts.len() == 2 {
                    let n = self.eval_arg(&parts[0], segs, line).unwrap_or(0).max(0) as usize;
                    let b = self.eval_arg(&parts[1], segs, line).unwrap_or(0) as u8;
                    let bytes = vec![b; n];
                    self.emit_bytes(&bytes, segs, &mut binary, &mut hex, &mut end_addr);
                } else {
                    self.report(line, Error::Directive("FILL expects n, b".to_string()));
                }
            }
            "DB" | "BYTE" | "DEFB" => {
                let bytes = self.encode_data_bytes(&tok.args, segs, line);
                self.emit_bytes(&bytes, segs, &mut binary, &mut hex, &mut end_addr);
            }
            "DW" | "WORD" | "DEFW" => {
                let mut bytes = Vec::new();
                for part in split_args(&tok.args) {
                    if let Some(v) = self.eval_arg(&part, segs, line) {
                        bytes.push((v & 0xFF) as u8);
                        bytes.push(((v >> 8) & 0xFF) as u8);
                    }
                }
                self.emit_bytes(&bytes, segs, &mut binary, &mut hex, &mut end_addr);
            }
            "DD" => {
                let mut bytes = Vec::new();
                for part in split_args(&tok.args) {
                    if let Some(v) = self.eval_arg(&part, segs, line) {
                        bytes.extend_from_slice(&(v as u32).to_le_bytes());
                    }
                }
                self.emit_bytes(&bytes, segs, &mut binary, &mut hex, &mut end_addr);
            }
            "DC" => {
                // Like DB, but a trailing string has its last byte's high
                // bit set (historical "terminated string" convenience).
                let mut bytes = self.encode_data_bytes(&tok.args, segs, line);
                if let Some(last) = bytes.last_mut() {
                    *last |= 0x80;
                }
                self.emit_bytes(&bytes, segs, &mut binary, &mut hex, &mut end_addr);
            }
            "DZ" => {
                let mut bytes = self.encode_data_bytes(&tok.args, segs, line);
                bytes.push(0);
                self.emit_bytes(&bytes, segs, &mut binary, &mut hex, &mut end_addr);
            }
            "DS" | "ZERO" => {
                if let Some(n) = self.eval_arg(&tok.args, segs, line) {
                    segs.cur().lc += n.max(0);
                }
            }
            "ALIGN" => {
                if let Some(n) = self.eval_arg(&tok.args, segs, line) {
                    let n = n.max(1);
                    let lc = segs.cur().lc;
                    let rem = lc.rem_euclid(n);
                    if rem != 0 {
                        segs.cur().lc += n - rem;
                    }
                }
            }
            "EVAL" => {
                let _ = self.eval_arg(&tok.args, segs, line);
            }
            _ => {
                let start_pc = segs.cur().pc();
                let args = split_args(&tok.args);
                let arg_refs: Vec<&str> = args.iter().map(|s| s.as_str()).collect();
                let strict = self.symtab_strict();
                let dialect = self.options.dialect;
                let symtab = &self.symtab;
                let mut eval = |s: &str| -> Result<i32, z80core::EncodeError> {
                    let (terms, _, perr) = parse_expr(s, dialect);
                    if let Some(e) = perr {
                        return Err(z80core::EncodeError::Invalid {
                            instruction: "expression",
                            detail: e.to_string(),
                        });
                    }
                    let mut ctx = EvalCtx {
                        symtab,
                        pc: start_pc,
                        strict,
                    };
                    eval_terms(&terms, dialect.precedence(), &mut ctx).map_err(|e| z80core::EncodeError::Invalid {
                        instruction: "expression",
                        detail: e.to_string(),
                    })
                };
                let encoded = z80core::encode(&upper, &arg_refs, *cpu, start_pc, &mut eval);
                match encoded {
                    Ok(bytes) => self.emit_bytes(&bytes, segs, &mut binary, &mut hex, &mut end_addr),
                    Err(e) => self.report(line, Error::Encode(e)),
                }
            }
        }
    }

    fn symtab_strict(&self) -> bool {
        // Strict (hard "undefined label") only matters in pass 2 with
        // `--permissive` off; pass 1 always resolves silently to zero. The
        // symbol table's own `Phase` tracks which pass is active.
        !self.options.permissive
    }

    fn eval_condition(&mut self, kind: &str, args: &str, segs: &mut Segments, active: bool) -> bool {
        if !active {
            return false;
        }
        let name = args.trim();
        match kind {
            "IFDEF" => self.options.is_defined(name) || self.symtab.resolve(name).is_some(),
            "IFNOT" => !(self.options.is_defined(name) || self.symtab.resolve(name).is_some()),
            _ => {
                // IF: treat as a boolean expression (nonzero == true).
                let pc = segs.cur().pc();
                let (terms, _, _) = parse_expr(args, self.options.dialect);
                let mut ctx = EvalCtx {
                    symtab: &self.symtab,
                    pc,
                    strict: false,
                };
                eval_terms(&terms, self.options.dialect.precedence(), &mut ctx).unwrap_or(0) != 0
            }
        }
    }

    fn eval_arg(&mut self, expr: &str, segs: &mut Segments, line: &SourceLine) -> Option<i32> {
        let pc = segs.cur().pc();
        let strict = self.symtab_strict();
        let symtab = &self.symtab;
        let (terms, _, perr) = parse_expr(expr, self.options.dialect);
        if let Some(e) = perr {
            self.diagnostics.push(Diagnostic {
                file: line.file.clone(),
                line: line.line_no,
                error: Error::Expr(e),
            });
            return None;
        }
        let mut ctx = EvalCtx { symtab, pc, strict };
        match eval_terms(&terms, self.options.dialect.precedence(), &mut ctx) {
            Ok(v) => Some(v),
            Err(e) => {
                self.diagnostics.push(Diagnostic {
                    file: line.file.clone(),
                    line: line.line_no,
                    error: Error::Eval(e),
                });
                None
            }
        }
    }

    /// Reads the `<basename>-build` counter file the `--number-build` CLI
    /// flag writes (see `main.rs::bump_build_counter`), truncated to 16 bits
    /// for the `BUILD` pseudo-op. Zero if the entry path is unknown or the
    /// counter file doesn't exist yet.
    fn read_build_counter(&self) -> u16 {
        let entry = match &self.entry_path {
            Some(p) => p,
            None => return 0,
        };
        let counter_path = entry.with_file_name(format!(
            "{}-build",
            entry.file_stem().and_then(|s| s.to_str()).unwrap_or("a")
        ));
        use byteorder::ByteOrder;
        fs::read(&counter_path)
            .ok()
            .filter(|b| b.len() >= 4)
            .map(|b| util::Endian::read_u32(&b) as u16)
            .unwrap_or(0)
    }

    /// Reads the whole file named by `INSERT`/`INCBIN`'s argument, resolved
    /// the same way `INCLUDE` resolves its target (relative to the
    /// referencing file first, then `--include` dirs, then as given).
    fn read_insert_file(&self, args: &str, line: &SourceLine) -> Result<Vec<u8>, Error> {
        let name = args.trim().trim_matches(|c| c == '\'' || c == '"');
        let base_dir = Path::new(&line.file).parent();
        let path = resolve_include(name, &self.options.include_dirs, base_dir)?;
        fs::read(&path).map_err(|e| Error::Io(e.to_string()))
    }

    fn encode_data_bytes(&mut self, args: &str, segs: &mut Segments, line: &SourceLine) -> Vec<u8> {
        let mut bytes = Vec::new();
        for part in split_args(args) {
            let trimmed = part.trim();
            if (trimmed.starts_with('"') && trimmed.ends_with('"') && trimmed.len() >= 2)
                || (trimmed.starts_with('\'') && trimmed.ends_with('\'') && trimmed.len() >= 2)
            {
                bytes.extend_from_slice(trimmed[1..trimmed.len() - 1].as_bytes());
            } else if let Some(v) = self.eval_arg(&part, segs, line) {
                bytes.push((v & 0xFF) as u8);
            }
        }
        bytes
    }

    fn define_label_here(&mut self, name: String, public: bool, line: &SourceLine, segs: &mut Segments) {
        let seg = segs.current;
        let value = segs.cur().pc();
        let strict = self.options.dialect == Dialect::MA; // MA's historical assembler is strict about redefinition
        if let Err(e) = self
            .symtab
            .define_label(&name, public, seg, value, &line.file, line.line_no, strict)
        {
            self.diagnostics.push(Diagnostic {
                file: line.file.clone(),
                line: line.line_no,
                error: Error::Symbol(e),
            });
        }
    }

    fn define_equ(
        &mut self,
        name: &str,
        public: bool,
        value_expr: &str,
        line: &SourceLine,
        segs: &mut Segments,
        force_absolute: bool,
    ) {
        let value = match self.eval_arg(value_expr, segs, line) {
            Some(v) => v,
            None => return,
        };
        let seg = if force_absolute { Segment::Absolute } else { segs.current };
        let strict = self.options.dialect == Dialect::MA;
        if let Err(e) = self
            .symtab
            .define_label(name, public, seg, value, &line.file, line.line_no, strict)
        {
            self.diagnostics.push(Diagnostic {
                file: line.file.clone(),
                line: line.line_no,
                error: Error::Symbol(e),
            });
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn emit_bytes(
        &mut self,
        bytes: &[u8],
        segs: &mut Segments,
        binary: &mut Option<&mut BinarySink>,
        hex: &mut Option<&mut HexSink>,
        end_addr: &mut Option<&mut i32>,
    ) {
        let lc = segs.cur().lc;
        if let Some(sink) = binary.as_deref_mut() {
            sink.set_addr(lc as u32);
            sink.write(bytes);
        }
        if let Some(sink) = hex.as_deref_mut() {
            sink.write(lc as u32, bytes);
        }
        if let Some(end) = end_addr.as_deref_mut() {
            *end = lc + bytes.len() as i32;
        }
        segs.cur().lc += bytes.len() as i32;
    }

    fn report(&mut self, line: &SourceLine, error: Error) {
        self.diagnostics.push(Diagnostic {
            file: line.file.clone(),
            line: line.line_no,
            error,
        });
    }

    /// `name:   EQU   literal   ; segment file:line`, globals first then
    /// per-file locals, literal formatted per §6 (dialect-specific radix
    /// prefix).
    fn render_symbols(&self) -> Vec<String> {
        self.symtab
            .all_labels()
            .filter_map(|l| {
                l.value.map(|v| {
                    format!(
                        "{:<16}EQU   {}   ; {} {}:{}",
                        l.name,
                        format_literal(v, self.options.dialect),
                        l.segment.letter(),
                        l.file,
                        l.line
                    )
                })
            })
            .collect()
    }
}

fn format_literal(value: i32, dialect: Dialect) -> String {
    let v = (value as i64 & 0xFFFF) as u16;
    match dialect {
        Dialect::MA => format!("&{:04X}", v),
        Dialect::ZASM => format!("#{:04X}", v),
        _ => format!("0{:04X}h", v),
    }
}

fn is_known_mnemonic(upper: &str, _cpu: CpuType) -> bool {
    const DIRECTIVES: &[&str] = &[
        "END", "LIST", "NOLIST", "NAME", "TITLE", "INCLUDE", "INSERT", "INCBIN", "IF", "IFDEF", "IFNOT", "ELSE",
        "ENDIF", "REPT", "ENDM", "ERROR", "DATE", "TIME", "BUILD", "FILL", "EQUD", "EQU", ".8080", ".Z80", ".Z180",
        "ASEG", "CSEG", "DSEG", "EXT", "EXTRN", "ENTRY", "PUBLIC", "EVAL", "LABCASE", "ORG", "BORG", "OFFSET",
        ".PHASE", ".DEPHASE", "LOAD", "DB", "DW", "DD", "DC", "DZ", "DS", "BYTE", "WORD", "ALIGN", "ZERO", "DEFB",
        "DEFW",
    ];
    DIRECTIVES.contains(&upper)
}

/// A minimal, chrono-free civil date computed from the wall clock, used by
/// the `DATE`/`TIME` pseudo-ops.
fn ascii_date() -> [u8; 6] {
    let secs = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let days = (secs / 86400) as i64;
    let (y, m, d) = civil_from_days(days);
    let digit = |n: u32, i: u32| -> u8 { b'0' + ((n / 10u32.pow(i)) % 10) as u8 };
    let yy = (y % 100) as u32;
    [
        digit(m as u32, 1),
        digit(m as u32, 0),
        digit(d as u32, 1),
        digit(d as u32, 0),
        digit(yy, 1),
        digit(yy, 0),
    ]
}

fn ascii_time() -> [u8; 6] {
    let secs = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let sod = secs % 86400;
    let (h, m, s) = ((sod / 3600) as u32, ((sod / 60) % 60) as u32, (sod % 60) as u32);
    let digit = |n: u32, i: u32| -> u8 { b'0' + ((n / 10u32.pow(i)) % 10) as u8 };
    [
        digit(h, 1),
        digit(h, 0),
        digit(m, 1),
        digit(m, 0),
        digit(s, 1),
        digit(s, 0),
    ]
}

/// Howard Hinnant's days-from-civil algorithm, inverted.
fn civil_from_days(z: i64) -> (i64, u32, u32) {
    let z = z + 719468;
    let era = if z >= 0 { z } else { z - 146096 } / 146097;
    let doe = (z - era * 146097) as u64;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    (if m <= 2 { y + 1 } else { y }, m, d)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::Options;

    fn run(source: &str, options: Options) -> AssemblyResult {
        let dir = std::env::temp_dir().join(format!("rasm-test-{:p}", source));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("a.asm");
        std::fs::write(&path, source).unwrap();
        let mut asm = Assembler::new(options);
        let result = asm.assemble(&path).unwrap_or_else(|d| panic!("assembly failed: {:?}", d));
        std::fs::remove_file(&path).ok();
        result
    }

    #[test]
    fn add_instruction_at_org() {
        let mut opts = Options::default();
        opts.dialect = Dialect::M80;
        let result = run("ORG 0x100\nADD A,B\nEND\n", opts);
        assert_eq!(result.binary.bytes(), &[0x80]);
        assert_eq!(result.binary.base(), 0x100);
    }

    #[test]
    fn relative_jump_to_self() {
        let mut opts = Options::default();
        opts.dialect = Dialect::M80;
        let result = run("ORG 0x100\nL1: JR L1\nEND\n", opts);
        assert_eq!(result.binary.bytes(), &[0x18, 0xFE]);
    }

    #[test]
    fn rept_repeats_body() {
        let mut opts = Options::default();
        opts.dialect = Dialect::M80;
        let result = run("ORG 0\nREPT 3\nDB 0xAA\nENDM\nEND\n", opts);
        assert_eq!(result.binary.bytes(), &[0xAA, 0xAA, 0xAA]);
    }

    #[test]
    fn conditional_assembly_with_define() {
        let mut opts = Options::default();
        opts.dialect = Dialect::M80;
        opts.defines.push(("FOO".to_string(), None));
        let result = run("ORG 0\nIFDEF FOO\nDB 1\nELSE\nDB 2\nENDIF\nEND\n", opts);
        assert_eq!(result.binary.bytes(), &[0x01]);
    }

    #[test]
    fn conditional_assembly_without_define() {
        let opts = Options {
            dialect: Dialect::M80,
            ..Options::default()
        };
        let result = run("ORG 0\nIFDEF FOO\nDB 1\nELSE\nDB 2\nENDIF\nEND\n", opts);
        assert_eq!(result.binary.bytes(), &[0x02]);
    }

    #[test]
    fn i8080_equivalence() {
        let opts = Options {
            dialect: Dialect::M80,
            cpu: CpuType::I8080,
            ..Options::default()
        };
        let result = run("ORG 0\nMOV A,B\nMVI C,0x42\nLXI H,0x1234\nEND\n", opts);
        assert_eq!(result.binary.bytes(), &[0x78, 0x0E, 0x42, 0x21, 0x34, 0x12]);
    }
}
