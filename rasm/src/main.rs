#[macro_use]
extern crate clap;

use byteorder::ByteOrder;
use clap::Arg;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process;

use rasm::dialect::Dialect;
use rasm::{Diagnostic, Options, UpdateMode};
use util::Endian;
use z80core::CpuType;

#[derive(Debug)]
enum Error {
    UnknownDialect(String),
    UnknownCpu(String),
    UnknownUpdateMode(String),
    Io(std::io::Error, PathBuf),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::UnknownDialect(s) => write!(f, "unknown dialect: {}", s),
            Error::UnknownCpu(s) => write!(f, "unknown CPU type: {}", s),
            Error::UnknownUpdateMode(s) => write!(f, "unknown --update mode: {}", s),
            Error::Io(err, path) => write!(f, "\"{}\": {}", path.display(), err),
        }
    }
}

fn main() {
    let matches = app_from_crate!()
        .arg(
            Arg::with_name("INPUT")
                .help("Source file to assemble")
                .required(true)
                .index(1),
        )
        .arg(
            Arg::with_name("dialect")
                .long("dialect")
                .takes_value(true)
                .value_name("MA|M80|PASMO|ZASM")
                .default_value("M80"),
        )
        .arg(
            Arg::with_name("cpu")
                .long("cpu-type")
                .takes_value(true)
                .value_name("8080|Z80|Z180")
                .default_value("Z80"),
        )
        .arg(Arg::with_name("binary").long("binary").help("Emit a raw binary image"))
        .arg(Arg::with_name("hex").long("hex").help("Emit Intel-HEX records"))
        .arg(Arg::with_name("symbol").long("symbol").help("Emit the symbol table"))
        .arg(Arg::with_name("list").long("list").help("Emit a source listing"))
        .arg(
            Arg::with_name("output")
                .short("o")
                .long("output")
                .takes_value(true)
                .value_name("PATH"),
        )
        .arg(
            Arg::with_name("fill")
                .long("fill")
                .takes_value(true)
                .value_name("BYTE")
                .default_value("0xFF"),
        )
        .arg(
            Arg::with_name("include")
                .short("I")
                .long("include")
                .takes_value(true)
                .multiple(true)
                .number_of_values(1),
        )
        .arg(
            Arg::with_name("define")
                .short("D")
                .long("define")
                .takes_value(true)
                .multiple(true)
                .number_of_values(1)
                .value_name("NAME[=VALUE]"),
        )
        .arg(
            Arg::with_name("update")
                .long("update")
                .takes_value(true)
                .multiple(true)
                .number_of_values(1)
                .value_name("ALL|ORG|BORG|OFFSET|PHASE|DEPHASE|LOAD"),
        )
        .arg(Arg::with_name("permissive").long("permissive"))
        .arg(Arg::with_name("number-build").long("number-build"))
        .arg(Arg::with_name("list-force").long("list-force"))
        .arg(Arg::with_name("list-cond").long("list-cond"))
        .arg(Arg::with_name("address").long("address"))
        .arg(
            Arg::with_name("reformat")
                .long("reformat")
                .takes_value(true)
                .value_name("MA|M80|PASMO|ZASM"),
        )
        .arg(Arg::with_name("modeline").long("modeline"))
        .arg(Arg::with_name("multi-inc").long("multi-inc"))
        .arg(Arg::with_name("keep").long("keep"))
        .arg(
            Arg::with_name("cseg")
                .long("cseg")
                .takes_value(true)
                .default_value("0"),
        )
        .arg(
            Arg::with_name("dseg")
                .long("dseg")
                .takes_value(true)
                .default_value("0"),
        )
        .get_matches();

    if let Err(err) = run(&matches) {
        eprintln!("{}", err);
        process::exit(1);
    }
}

fn run(matches: &clap::ArgMatches) -> Result<(), Error> {
    let options = build_options(matches)?;
    let input_path = Path::new(matches.value_of("INPUT").unwrap());

    if let Some(target) = &options.reformat {
        return run_reformat(input_path, &options, *target);
    }

    match rasm::assemble(input_path, options.clone()) {
        Ok(result) => {
            write_artifacts(input_path, &options, &result)?;
            if options.number_build {
                bump_build_counter(input_path)?;
            }
            Ok(())
        }
        Err(diagnostics) => {
            print_diagnostics(&diagnostics);
            process::exit(1);
        }
    }
}

fn run_reformat(input_path: &Path, options: &Options, target: Dialect) -> Result<(), Error> {
    let mut seen = std::collections::HashSet::new();
    let lines = rasm::pipeline::flatten(input_path, options.dialect, &options.include_dirs, options.multi_inc, &mut seen)
        .map_err(|e| Error::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()), input_path.to_owned()))?;
    let out = rasm::reformat::reformat(&lines, options.dialect, target, options.multi_inc);
    let output_path = options
        .output_path
        .clone()
        .map(PathBuf::from)
        .unwrap_or_else(|| input_path.with_extension("out.asm"));
    let mut text = out.join("\n");
    text.push('\n');
    fs::write(&output_path, text).map_err(|e| Error::Io(e, output_path))
}

fn print_diagnostics(diagnostics: &[Diagnostic]) {
    for d in diagnostics {
        println!("{}:{}: {}", d.file, d.line, d.error);
    }
    match diagnostics.len() {
        1 => println!("1 error"),
        n => println!("{} errors", n),
    }
}

fn write_artifacts(input_path: &Path, options: &Options, result: &rasm::AssemblyResult) -> Result<(), Error> {
    let stem = |ext: &str| -> PathBuf {
        options
            .output_path
            .clone()
            .map(PathBuf::from)
            .unwrap_or_else(|| input_path.with_extension(ext))
    };

    if options.emit_binary {
        let path = stem("bin");
        result.binary.write_to_file(&path).map_err(|e| Error::Io(e, path))?;
    }
    if options.emit_hex {
        let path = stem("hex");
        let mut f = fs::File::create(&path).map_err(|e| Error::Io(e, path.clone()))?;
        for record in &result.hex_records {
            writeln!(f, "{}", record).map_err(|e| Error::Io(e, path.clone()))?;
        }
    }
    if options.emit_symbols {
        let path = stem("sym");
        fs::write(&path, result.symbols.join("\n")).map_err(|e| Error::Io(e, path))?;
    }
    if options.emit_listing {
        let path = stem("lst");
        fs::write(&path, result.listing.join("\n")).map_err(|e| Error::Io(e, path))?;
    }
    Ok(())
}

/// Reads, increments, and rewrites the 4-byte little-endian build counter at
/// `<basename>-build`. Starts at zero if the file doesn't exist yet.
fn bump_build_counter(input_path: &Path) -> Result<(), Error> {
    let counter_path = input_path.with_file_name(format!(
        "{}-build",
        input_path.file_stem().and_then(|s| s.to_str()).unwrap_or("a")
    ));
    let current = fs::read(&counter_path).ok().filter(|b| b.len() >= 4).map(|b| Endian::read_u32(&b)).unwrap_or(0);
    let mut buf = [0u8; 4];
    Endian::write_u32(&mut buf, current.wrapping_add(1));
    fs::write(&counter_path, buf).map_err(|e| Error::Io(e, counter_path))
}

fn build_options(matches: &clap::ArgMatches) -> Result<Options, Error> {
    let dialect: Dialect = matches
        .value_of("dialect")
        .unwrap()
        .parse()
        .map_err(|_| Error::UnknownDialect(matches.value_of("dialect").unwrap().to_string()))?;
    let cpu = parse_cpu(matches.value_of("cpu").unwrap())?;

    let mut update = Vec::new();
    if let Some(values) = matches.values_of("update") {
        for v in values {
            update.push(parse_update_mode(v)?);
        }
    }

    let mut defines = Vec::new();
    if let Some(values) = matches.values_of("define") {
        for v in values {
            match v.split_once('=') {
                Some((name, value)) => defines.push((name.to_string(), Some(value.to_string()))),
                None => defines.push((v.to_string(), None)),
            }
        }
    }

    let include_dirs = matches
        .values_of("include")
        .map(|v| v.map(str::to_string).collect())
        .unwrap_or_default();

    let fill_byte = parse_u8_literal(matches.value_of("fill").unwrap()).unwrap_or(0xFF);
    let cseg_base = parse_i32_literal(matches.value_of("cseg").unwrap()).unwrap_or(0);
    let dseg_base = parse_i32_literal(matches.value_of("dseg").unwrap()).unwrap_or(0);

    let reformat = match matches.value_of("reformat") {
        Some(s) => Some(s.parse::<Dialect>().map_err(|_| Error::UnknownDialect(s.to_string()))?),
        None => None,
    };

    Ok(Options {
        dialect,
        cpu,
        emit_binary: matches.is_present("binary") || !matches.is_present("hex"),
        emit_hex: matches.is_present("hex"),
        emit_symbols: matches.is_present("symbol"),
        emit_listing: matches.is_present("list"),
        output_path: matches.value_of("output").map(str::to_string),
        fill_byte,
        include_dirs,
        defines,
        update,
        permissive: matches.is_present("permissive"),
        number_build: matches.is_present("number-build"),
        list_force: matches.is_present("list-force"),
        list_cond: matches.is_present("list-cond"),
        address: matches.is_present("address"),
        reformat,
        modeline: matches.is_present("modeline"),
        multi_inc: matches.is_present("multi-inc"),
        keep: matches.is_present("keep"),
        cseg_base,
        dseg_base,
    })
}

fn parse_cpu(s: &str) -> Result<CpuType, Error> {
    match s.to_ascii_uppercase().as_str() {
        "8080" => Ok(CpuType::I8080),
        "Z80" => Ok(CpuType::Z80),
        "Z180" => Ok(CpuType::Z180),
        _ => Err(Error::UnknownCpu(s.to_string())),
    }
}

fn parse_update_mode(s: &str) -> Result<UpdateMode, Error> {
    match s.to_ascii_uppercase().as_str() {
        "ALL" => Ok(UpdateMode::All),
        "ORG" => Ok(UpdateMode::Org),
        "BORG" => Ok(UpdateMode::Borg),
        "OFFSET" => Ok(UpdateMode::Offset),
        "PHASE" => Ok(UpdateMode::Phase),
        "DEPHASE" => Ok(UpdateMode::Dephase),
        "LOAD" => Ok(UpdateMode::Load),
        _ => Err(Error::UnknownUpdateMode(s.to_string())),
    }
}

fn parse_u8_literal(s: &str) -> Option<u8> {
    parse_i32_literal(s).map(|v| (v & 0xFF) as u8)
}

fn parse_i32_literal(s: &str) -> Option<i32> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        i32::from_str_radix(hex, 16).ok()
    } else {
        s.parse().ok()
    }
}
