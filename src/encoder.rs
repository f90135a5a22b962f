//! The instruction encoder: `(mnemonic, operands)` -> machine code bytes,
//! for the Z80 (plus Z180 extensions) and 8080 mnemonic sets.

use crate::operand::{parse_operand, Operand};
use crate::range::{const8, signed8, word16, RangeError};
use crate::registers::{
    Condition, IndexReg, Reg16, Reg16Indirect, Reg16Psw, Reg16Stack, Reg8,
};
use crate::CpuType;
use util::EnumFromStr;

pub type Eval<'a> = dyn FnMut(&str) -> Result<i32, EncodeError> + 'a;

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum EncodeError {
    UnknownMnemonic(String),
    Invalid { instruction: &'static str, detail: String },
    Range(RangeError),
    WrongArgCount { instruction: &'static str, expected: &'static str },
}

impl std::fmt::Display for EncodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            EncodeError::UnknownMnemonic(m) => write!(f, "Unknown mnemonic: {}", m),
            EncodeError::Invalid { instruction, detail } => {
                write!(f, "Invalid {} instruction: {}", instruction, detail)
            }
            EncodeError::Range(r) => write!(
                f,
                "Value {} out of range for {}",
                r.value, r.context
            ),
            EncodeError::WrongArgCount { instruction, expected } => {
                write!(f, "{} expects {}", instruction, expected)
            }
        }
    }
}

impl std::error::Error for EncodeError {}

impl From<RangeError> for EncodeError {
    fn from(e: RangeError) -> Self {
        EncodeError::Range(e)
    }
}

fn invalid(instruction: &'static str, detail: impl Into<String>) -> EncodeError {
    EncodeError::Invalid {
        instruction,
        detail: detail.into(),
    }
}

fn one<'a>(args: &'a [&str], instr: &'static str) -> Result<&'a str, EncodeError> {
    match args {
        [a] => Ok(*a),
        _ => Err(EncodeError::WrongArgCount {
            instruction: instr,
            expected: "one operand",
        }),
    }
}

fn two<'a>(args: &'a [&str], instr: &'static str) -> Result<(&'a str, &'a str), EncodeError> {
    match args {
        [a, b] => Ok((*a, *b)),
        _ => Err(EncodeError::WrongArgCount {
            instruction: instr,
            expected: "two operands",
        }),
    }
}

fn none(args: &[&str], instr: &'static str) -> Result<(), EncodeError> {
    if args.is_empty() {
        Ok(())
    } else {
        Err(EncodeError::WrongArgCount {
            instruction: instr,
            expected: "no operands",
        })
    }
}

/// Encodes one instruction. `pc` is the value of the program counter at the
/// START of this instruction, used to compute `JR`/`DJNZ` relative
/// displacements. `eval` evaluates an arbitrary expression substring found
/// inside an operand to its final `i32` value.
pub fn encode(
    mnemonic: &str,
    args: &[&str],
    cpu: CpuType,
    pc: i32,
    eval: &mut Eval,
) -> Result<Vec<u8>, EncodeError> {
    let mnemonic = mnemonic.to_ascii_uppercase();

    if cpu == CpuType::I8080 {
        return encode_8080(&mnemonic, args, eval);
    }

    if let Some(bytes) = encode_zero_operand(&mnemonic, args)? {
        return Ok(bytes);
    }
    if let Some(bytes) = encode_8bit_arith(&mnemonic, args, eval)? {
        return Ok(bytes);
    }
    if let Some(bytes) = encode_arith_a_or_hl(&mnemonic, args, eval)? {
        return Ok(bytes);
    }
    if let Some(bytes) = encode_bit_ops(&mnemonic, args, eval)? {
        return Ok(bytes);
    }
    if let Some(bytes) = encode_control_flow(&mnemonic, args, pc, eval)? {
        return Ok(bytes);
    }
    if let Some(bytes) = encode_inc_dec(&mnemonic, args, eval)? {
        return Ok(bytes);
    }
    if let Some(bytes) = encode_rotate(&mnemonic, args, eval)? {
        return Ok(bytes);
    }
    if mnemonic == "LD" {
        return encode_ld(args, eval);
    }
    if let Some(bytes) = encode_misc(&mnemonic, args, pc, eval)? {
        return Ok(bytes);
    }
    if cpu == CpuType::Z180 {
        if let Some(bytes) = encode_z180(&mnemonic, args, eval)? {
            return Ok(bytes);
        }
    }
    Err(EncodeError::UnknownMnemonic(mnemonic))
}

// ---------------------------------------------------------------------
// Zero-operand instructions
// ---------------------------------------------------------------------

fn encode_zero_operand(mnemonic: &str, args: &[&str]) -> Result<Option<Vec<u8>>, EncodeError> {
    let bytes: &[u8] = match mnemonic {
        "NOP" => &[0x00],
        "CCF" => &[0x3F],
        "CPD" => &[0xED, 0xA9],
        "CPDR" => &[0xED, 0xB9],
        "CPI" => &[0xED, 0xA1],
        "CPIR" => &[0xED, 0xB1],
        "CPL" => &[0x2F],
        "DAA" => &[0x27],
        "DI" => &[0xF3],
        "EI" => &[0xFB],
        "EXX" => &[0xD9],
        "HALT" => &[0x76],
        "IND" => &[0xED, 0xAA],
        "INDR" => &[0xED, 0xBA],
        "INI" => &[0xED, 0xA2],
        "INIR" => &[0xED, 0xB2],
        "LDD" => &[0xED, 0xA8],
        "LDDR" => &[0xED, 0xB8],
        "LDI" => &[0xED, 0xA0],
        "LDIR" => &[0xED, 0xB0],
        "NEG" => &[0xED, 0x44],
        "OUTD" => &[0xED, 0xAB],
        "OTDR" => &[0xED, 0xBB],
        "OUTI" => &[0xED, 0xA3],
        "OTIR" => &[0xED, 0xB3],
        "RETI" => &[0xED, 0x4D],
        "RETN" => &[0xED, 0x45],
        "RLA" => &[0x17],
        "RLCA" => &[0x07],
        "RLD" => &[0xED, 0x6F],
        "RRA" => &[0x1F],
        "RRCA" => &[0x0F],
        "RRD" => &[0xED, 0x67],
        "SCF" => &[0x37],
        _ => return Ok(None),
    };
    none(args, "zero-operand opcode")?;
    Ok(Some(bytes.to_vec()))
}

// ---------------------------------------------------------------------
// 8-bit arithmetic: AND OR XOR SUB CP (operand is the single source)
// ---------------------------------------------------------------------

fn arith1_base(mnemonic: &str) -> Option<u8> {
    match mnemonic {
        "AND" => Some(0xA0),
        "OR" => Some(0xB0),
        "SUB" => Some(0x90),
        "XOR" => Some(0xA8),
        "CP" | "CMP" => Some(0xB8), // CMP: historical MA-dialect typo for CP
        _ => None,
    }
}

/// Shared by the `opA1` family (`AND`/`OR`/.../`CP`) and by `LD A,<src>` and
/// the bit-shift/rotate family: given the byte obtained for a plain
/// register, produce the full encoding for whichever operand form was
/// actually given (register, `(HL)`, `(IX+d)`/`(IY+d)`, or 8-bit immediate).
fn reg8_opcode(
    operand: Operand,
    base: u8,
    prefix: Option<u8>,
    imm_base: Option<u8>,
) -> Result<Vec<u8>, EncodeError> {
    let mut out = Vec::new();
    match operand {
        Operand::Reg8(r) => {
            if let Some(p) = prefix {
                out.push(p);
            }
            out.push(base + r.code());
        }
        Operand::IndirectHl => {
            if let Some(p) = prefix {
                out.push(p);
            }
            out.push(base + 6);
        }
        Operand::Indexed(reg, disp) => {
            let d = signed8(disp, "index offset")?;
            out.push(reg.prefix());
            if let Some(p) = prefix {
                out.push(p);
                out.push(d as u8);
                out.push(base + 6);
            } else {
                out.push(base + 6);
                out.push(d as u8);
            }
        }
        Operand::Imm(v) => match imm_base {
            Some(ib) => {
                if let Some(p) = prefix {
                    out.push(p);
                }
                out.push(ib);
                out.push(const8(v, "8-bit constant")?);
            }
            None => return Err(invalid("8-bit register", "expected a register or (HL)")),
        },
        _ => return Err(invalid("8-bit operand", "not a valid register, (HL), or constant")),
    }
    Ok(out)
}

fn encode_8bit_arith(
    mnemonic: &str,
    args: &[&str],
    eval: &mut Eval,
) -> Result<Option<Vec<u8>>, EncodeError> {
    let base = match arith1_base(mnemonic) {
        Some(b) => b,
        None => return Ok(None),
    };
    let raw = one(args, "8-bit arithmetic")?;
    let operand = parse_operand(raw, eval)?;
    Ok(Some(reg8_opcode(operand, base, None, Some(base + 0x46))?))
}

// ---------------------------------------------------------------------
// ADC/ADD/SBC with an explicit A/HL/IX/IY destination
// ---------------------------------------------------------------------

fn arith2_base(mnemonic: &str) -> Option<u8> {
    match mnemonic {
        "ADC" => Some(0x88),
        "ADD" => Some(0x80),
        "SBC" => Some(0x98),
        _ => None,
    }
}

fn encode_arith_a_or_hl(
    mnemonic: &str,
    args: &[&str],
    eval: &mut Eval,
) -> Result<Option<Vec<u8>>, EncodeError> {
    let base = match arith2_base(mnemonic) {
        Some(b) => b,
        None => return Ok(None),
    };
    let (dest, src) = two(args, "ADC/ADD/SBC")?;
    let dest_upper = dest.trim().to_ascii_uppercase();

    if dest_upper == "A" {
        let operand = parse_operand(src, eval)?;
        return Ok(Some(reg8_opcode(operand, base, None, Some(base + 0x46))?));
    }
    if dest_upper == "HL" {
        let src_reg = <Reg16 as EnumFromStr>::from_str(&src.trim().to_ascii_uppercase())
            .map_err(|_| invalid("16-bit arithmetic", format!("invalid source register: {}", src)))?;
        let mut out = Vec::new();
        let mut code = src_reg.code();
        match mnemonic {
            "ADC" => {
                out.push(0xED);
                code += 0x4A;
            }
            "ADD" => {
                code += 0x09;
            }
            _ => {
                out.push(0xED);
                code += 0x42;
            }
        }
        out.push(code);
        return Ok(Some(out));
    }
    if let Ok(idx) = <IndexReg as EnumFromStr>::from_str(&dest_upper) {
        if mnemonic != "ADD" {
            return Err(invalid("16-bit arithmetic", "only ADD supports IX/IY destinations"));
        }
        let src_upper = src.trim().to_ascii_uppercase();
        let code = if src_upper == dest_upper {
            0x20
        } else {
            match <Reg16 as EnumFromStr>::from_str(&src_upper) {
                Ok(Reg16::HL) | Err(_) => {
                    return Err(invalid(
                        "16-bit arithmetic",
                        format!("invalid source register: {}", src),
                    ))
                }
                Ok(r) => r.code(),
            }
        };
        return Ok(Some(vec![idx.prefix(), code + 0x09]));
    }
    Err(invalid(
        "16-bit arithmetic",
        format!("invalid destination register: {}", dest),
    ))
}

// ---------------------------------------------------------------------
// Bit operations: BIT/RES/SET b, r
// ---------------------------------------------------------------------

fn bit_base(mnemonic: &str) -> Option<u8> {
    match mnemonic {
        "BIT" => Some(0x40),
        "RES" => Some(0x80),
        "SET" => Some(0xC0),
        _ => None,
    }
}

fn encode_bit_ops(
    mnemonic: &str,
    args: &[&str],
    eval: &mut Eval,
) -> Result<Option<Vec<u8>>, EncodeError> {
    let base = match bit_base(mnemonic) {
        Some(b) => b,
        None => return Ok(None),
    };
    let (bit_expr, reg_expr) = two(args, "BIT/RES/SET")?;
    let bit = eval(bit_expr)?;
    if !(0..=7).contains(&bit) {
        return Err(invalid("BIT/RES/SET", format!("bit number out of range: {}", bit)));
    }
    let code = base + 8 * (bit as u8);
    let operand = parse_operand(reg_expr, eval)?;
    Ok(Some(reg8_opcode(operand, code, Some(0xCB), None)?))
}

// ---------------------------------------------------------------------
// Control flow: CALL / JP / JR / DJNZ / RET / RST
// ---------------------------------------------------------------------

fn encode_control_flow(
    mnemonic: &str,
    args: &[&str],
    pc: i32,
    eval: &mut Eval,
) -> Result<Option<Vec<u8>>, EncodeError> {
    let mnemonic = if mnemonic == "JMP" { "JP" } else { mnemonic };

    match mnemonic {
        "CALL" | "JP" | "JR" => {
            let (cond, target) = match args {
                [target] => (None, *target),
                [cond, target] => {
                    let c = <Condition as EnumFromStr>::from_str(&cond.trim().to_ascii_uppercase())
                        .map_err(|_| invalid(mnemonic, format!("invalid condition code: {}", cond)))?;
                    (Some(c), *target)
                }
                _ => {
                    return Err(EncodeError::WrongArgCount {
                        instruction: "CALL/JP/JR",
                        expected: "one or two operands",
                    })
                }
            };

            if mnemonic == "JP" && cond.is_none() {
                let upper = target.trim().to_ascii_uppercase();
                match upper.as_str() {
                    "(HL)" => return Ok(Some(vec![0xE9])),
                    "(IX)" => return Ok(Some(vec![0xDD, 0xE9])),
                    "(IY)" => return Ok(Some(vec![0xFD, 0xE9])),
                    _ => {}
                }
            }

            let addr = eval(target)?;
            if mnemonic == "JR" {
                let code = match cond {
                    None => 0x18,
                    Some(c) => {
                        0x20 + c
                            .relative_code()
                            .ok_or_else(|| invalid("JR", format!("condition code not supported by JR: {:?}", c)))?
                    }
                };
                let disp = addr - (pc + 2);
                let d = signed8(disp, "relative jump")?;
                return Ok(Some(vec![code, d as u8]));
            }

            let base = if mnemonic == "CALL" { 0xCD } else { 0xC3 };
            let code = match cond {
                None => base,
                Some(c) => (if mnemonic == "CALL" { 0xC4 } else { 0xC2 }) + c.code(),
            };
            let a = word16(addr, "absolute address")?;
            Ok(Some(vec![code, (a & 0xFF) as u8, (a >> 8) as u8]))
        }
        "DJNZ" => {
            let target = one(args, "DJNZ")?;
            let addr = eval(target)?;
            let disp = addr - (pc + 2);
            let d = signed8(disp, "relative jump")?;
            Ok(Some(vec![0x10, d as u8]))
        }
        "RET" => {
            if args.is_empty() {
                return Ok(Some(vec![0xC9]));
            }
            let cond = one(args, "RET")?;
            let c = <Condition as EnumFromStr>::from_str(&cond.trim().to_ascii_uppercase())
                .map_err(|_| invalid("RET", format!("invalid return condition: {}", cond)))?;
            Ok(Some(vec![0xC0 + c.code()]))
        }
        "RST" => {
            let expr = one(args, "RST")?;
            let addr = eval(expr)?;
            match addr {
                0x00 | 0x08 | 0x10 | 0x18 | 0x20 | 0x28 | 0x30 | 0x38 => {
                    Ok(Some(vec![0xC7 + addr as u8]))
                }
                _ => Err(invalid("RST", format!("invalid restart address: {:#x}", addr))),
            }
        }
        _ => Ok(None),
    }
}

// ---------------------------------------------------------------------
// INC / DEC
// ---------------------------------------------------------------------

fn encode_inc_dec(
    mnemonic: &str,
    args: &[&str],
    eval: &mut Eval,
) -> Result<Option<Vec<u8>>, EncodeError> {
    let (reg8_base, reg16_base) = match mnemonic {
        "INC" => (0x04u8, 0x03u8),
        "DEC" => (0x05u8, 0x0Bu8),
        _ => return Ok(None),
    };
    let raw = one(args, "INC/DEC")?;
    let upper = raw.trim().to_ascii_uppercase();
    if let Ok(r) = <Reg16 as EnumFromStr>::from_str(&upper) {
        return Ok(Some(vec![reg16_base + r.code()]));
    }
    if let Ok(idx) = <IndexReg as EnumFromStr>::from_str(&upper) {
        return Ok(Some(vec![idx.prefix(), reg16_base + 0x20]));
    }
    // Unlike `reg8_opcode`'s opcode family, the varying register here sits in
    // bits 3-5, not bits 0-2 — so it is `reg8_base` that stays fixed and the
    // register's code that gets shifted, not the other way around.
    let operand = parse_operand(raw, eval)?;
    match operand {
        Operand::Reg8(r) => Ok(Some(vec![reg8_base + 8 * r.code()])),
        Operand::IndirectHl => Ok(Some(vec![reg8_base + 8 * 6])),
        Operand::Indexed(reg, disp) => {
            let d = signed8(disp, "index offset")?;
            Ok(Some(vec![reg.prefix(), reg8_base + 8 * 6, d as u8]))
        }
        _ => Err(invalid("INC/DEC", "not a valid register, (HL), or index")),
    }
}

// ---------------------------------------------------------------------
// Rotates / shifts: RLC RRC RL RR SLA SRA SRL
// ---------------------------------------------------------------------

fn rotate_base(mnemonic: &str) -> Option<u8> {
    match mnemonic {
        "RLC" => Some(0x00),
        "RRC" => Some(0x08),
        "RL" => Some(0x10),
        "RR" => Some(0x18),
        "SLA" => Some(0x20),
        "SRA" => Some(0x28),
        "SRL" => Some(0x38),
        _ => None,
    }
}

fn encode_rotate(
    mnemonic: &str,
    args: &[&str],
    eval: &mut Eval,
) -> Result<Option<Vec<u8>>, EncodeError> {
    let base = match rotate_base(mnemonic) {
        Some(b) => b,
        None => return Ok(None),
    };
    let raw = one(args, "rotate/shift")?;
    let operand = parse_operand(raw, eval)?;
    Ok(Some(reg8_opcode(operand, base, Some(0xCB), None)?))
}

// ---------------------------------------------------------------------
// LD — the full operand matrix
// ---------------------------------------------------------------------

fn encode_ld(args: &[&str], eval: &mut Eval) -> Result<Vec<u8>, EncodeError> {
    let (dest, src) = two(args, "LD")?;
    let dest_operand = parse_operand(dest, eval)?;
    let src_operand = parse_operand(src, eval)?;

    match (dest_operand, src_operand) {
        // LD A, <anything 8-bit-source-shaped, plus (BC)/(DE)/I/R>
        (Operand::Reg8(Reg8::A), Operand::IndirectPair(Reg16Indirect::BC)) => Ok(vec![0x0A]),
        (Operand::Reg8(Reg8::A), Operand::IndirectPair(Reg16Indirect::DE)) => Ok(vec![0x1A]),
        (Operand::Reg8(Reg8::A), Operand::IReg) => Ok(vec![0xED, 0x57]),
        (Operand::Reg8(Reg8::A), Operand::RReg) => Ok(vec![0xED, 0x5F]),
        (Operand::Reg8(Reg8::A), Operand::IndirectImm(addr)) => {
            let a = word16(addr, "LD A,(nn) address")?;
            Ok(vec![0x3A, (a & 0xFF) as u8, (a >> 8) as u8])
        }
        (Operand::Reg8(Reg8::A), src) => reg8_opcode(src, 0x78, None, Some(0x3E)),

        // LD (HL), <reg8 | imm8>
        (Operand::IndirectHl, Operand::Reg8(r)) => Ok(vec![0x70 + r.code()]),
        (Operand::IndirectHl, Operand::Imm(v)) => Ok(vec![0x36, const8(v, "8-bit constant")?]),

        // LD (IX+d)/(IY+d), <reg8 | imm8>
        (Operand::Indexed(reg, disp), Operand::Reg8(r)) => {
            let d = signed8(disp, "index offset")?;
            Ok(vec![reg.prefix(), 0x70 + r.code(), d as u8])
        }
        (Operand::Indexed(reg, disp), Operand::Imm(v)) => {
            let d = signed8(disp, "index offset")?;
            Ok(vec![reg.prefix(), 0x36, d as u8, const8(v, "8-bit constant")?])
        }

        // LD r, <reg8 (incl (HL), (IX+d)/(IY+d)) | imm8>
        (Operand::Reg8(r), src) => reg8_opcode(src, 0x40 + 8 * r.code(), None, Some(0x06 + 8 * r.code())),

        // LD (BC)/(DE), A and LD (nn), A
        (Operand::IndirectPair(Reg16Indirect::BC), Operand::Reg8(Reg8::A)) => Ok(vec![0x02]),
        (Operand::IndirectPair(Reg16Indirect::DE), Operand::Reg8(Reg8::A)) => Ok(vec![0x12]),
        (Operand::IndirectImm(addr), Operand::Reg8(Reg8::A)) => {
            let a = word16(addr, "LD (nn),A address")?;
            Ok(vec![0x32, (a & 0xFF) as u8, (a >> 8) as u8])
        }
        (Operand::IReg, Operand::Reg8(Reg8::A)) => Ok(vec![0xED, 0x47]),
        (Operand::RReg, Operand::Reg8(Reg8::A)) => Ok(vec![0xED, 0x4F]),

        // LD SP, HL/IX/IY
        (Operand::Sp, Operand::Reg16(Reg16::HL)) => Ok(vec![0xF9]),
        (Operand::Sp, Operand::IndexReg(reg)) => Ok(vec![reg.prefix(), 0xF9]),

        // LD IX/IY, nn | (nn)
        (Operand::IndexReg(reg), Operand::IndirectImm(addr)) => {
            let a = word16(addr, "LD IX/IY,(nn) address")?;
            Ok(vec![reg.prefix(), 0x2A, (a & 0xFF) as u8, (a >> 8) as u8])
        }
        (Operand::IndexReg(reg), Operand::Imm(v)) => {
            let a = word16(v, "LD IX/IY,nn immediate")?;
            Ok(vec![reg.prefix(), 0x21, (a & 0xFF) as u8, (a >> 8) as u8])
        }

        // LD rr, nn | (nn)
        (Operand::Reg16(r), Operand::IndirectImm(addr)) => {
            let a = word16(addr, "LD rr,(nn) address")?;
            Ok(vec![0xED, 0x4B + r.code(), (a & 0xFF) as u8, (a >> 8) as u8])
        }
        (Operand::Reg16(r), Operand::Imm(v)) => {
            let a = word16(v, "LD rr,nn immediate")?;
            Ok(vec![0x01 + r.code(), (a & 0xFF) as u8, (a >> 8) as u8])
        }

        // LD (nn), IX/IY
        (Operand::IndirectImm(addr), Operand::IndexReg(reg)) => {
            let a = word16(addr, "LD (nn),IX/IY address")?;
            Ok(vec![reg.prefix(), 0x22, (a & 0xFF) as u8, (a >> 8) as u8])
        }
        // LD (nn), rr
        (Operand::IndirectImm(addr), Operand::Reg16(r)) => {
            let a = word16(addr, "LD (nn),rr address")?;
            Ok(vec![0xED, 0x43 + r.code(), (a & 0xFF) as u8, (a >> 8) as u8])
        }

        _ => Err(invalid("LD", "no matching operand form")),
    }
}

// ---------------------------------------------------------------------
// Everything else: EX, IM, IN, OUT, PUSH, POP
// ---------------------------------------------------------------------

fn encode_misc(
    mnemonic: &str,
    args: &[&str],
    _pc: i32,
    eval: &mut Eval,
) -> Result<Option<Vec<u8>>, EncodeError> {
    match mnemonic {
        "PUSH" | "POP" => {
            let base = if mnemonic == "PUSH" { 0xC5 } else { 0xC1 };
            let raw = one(args, mnemonic)?;
            let upper = raw.trim().to_ascii_uppercase();
            if let Ok(idx) = <IndexReg as EnumFromStr>::from_str(&upper) {
                return Ok(Some(vec![idx.prefix(), base + 0x20]));
            }
            let r = <Reg16Stack as EnumFromStr>::from_str(&upper)
                .map_err(|_| invalid(mnemonic, format!("invalid register: {}", raw)))?;
            Ok(Some(vec![base + r.code()]))
        }
        "RET" | "RST" | "CALL" | "JP" | "JR" | "DJNZ" => Ok(None), // handled elsewhere
        "EX" => {
            let (a, b) = two(args, "EX")?;
            let au = a.trim().to_ascii_uppercase();
            let bu = b.trim().to_ascii_uppercase();
            if au == "(SP)" {
                if let Ok(idx) = <IndexReg as EnumFromStr>::from_str(&bu) {
                    return Ok(Some(vec![idx.prefix(), 0xE3]));
                }
                if bu == "HL" {
                    return Ok(Some(vec![0xE3]));
                }
            }
            if au == "DE" && bu == "HL" {
                return Ok(Some(vec![0xEB]));
            }
            if au == "AF" && bu.starts_with("AF'") {
                return Ok(Some(vec![0x08]));
            }
            Err(invalid("EX", "invalid registers for exchange"))
        }
        "IM" => {
            let raw = one(args, "IM")?;
            let mode = eval(raw)?;
            match mode {
                0 => Ok(Some(vec![0xED, 0x46])),
                1 => Ok(Some(vec![0xED, 0x56])),
                2 => Ok(Some(vec![0xED, 0x5E])),
                _ => Err(invalid("IM", format!("invalid interrupt mode: {}", mode))),
            }
        }
        "IN" => {
            let (dest, src) = two(args, "IN")?;
            let dest_upper = dest.trim().to_ascii_uppercase();
            let src_upper = src.trim().to_ascii_uppercase();
            if src_upper == "(C)" {
                if let Ok(r) = <Reg8 as EnumFromStr>::from_str(&dest_upper) {
                    return Ok(Some(vec![0xED, 0x40 + 8 * r.code()]));
                }
            }
            if dest_upper == "A" {
                let port = eval(src)?;
                return Ok(Some(vec![0xDB, const8(port, "port address")?]));
            }
            Err(invalid("IN", "invalid input instruction"))
        }
        "OUT" => {
            let (dest, src) = two(args, "OUT")?;
            let dest_upper = dest.trim().to_ascii_uppercase();
            let src_upper = src.trim().to_ascii_uppercase();
            if dest_upper == "(C)" {
                if let Ok(r) = <Reg8 as EnumFromStr>::from_str(&src_upper) {
                    return Ok(Some(vec![0xED, 0x41 + 8 * r.code()]));
                }
            }
            if src_upper == "A" {
                let port = eval(dest)?;
                return Ok(Some(vec![0xD3, const8(port, "port address")?]));
            }
            Err(invalid("OUT", "invalid output instruction"))
        }
        _ => Ok(None),
    }
}

// ---------------------------------------------------------------------
// Z180 extensions
// ---------------------------------------------------------------------

fn encode_z180(
    mnemonic: &str,
    args: &[&str],
    eval: &mut Eval,
) -> Result<Option<Vec<u8>>, EncodeError> {
    match mnemonic {
        "SLP" => {
            none(args, "SLP")?;
            Ok(Some(vec![0xED, 0x76]))
        }
        "OTIM" => {
            none(args, "OTIM")?;
            Ok(Some(vec![0xED, 0x83]))
        }
        "OTIMR" => {
            none(args, "OTIMR")?;
            Ok(Some(vec![0xED, 0x93]))
        }
        "OTDM" => {
            none(args, "OTDM")?;
            Ok(Some(vec![0xED, 0x8B]))
        }
        "OTDMR" => {
            none(args, "OTDMR")?;
            Ok(Some(vec![0xED, 0x9B]))
        }
        "MLT" | "MULT" => {
            let raw = one(args, "MLT")?;
            let r = <Reg16 as EnumFromStr>::from_str(&raw.trim().to_ascii_uppercase())
                .map_err(|_| invalid("MLT", format!("invalid register: {}", raw)))?;
            Ok(Some(vec![0xED, r.code() + 0x4C]))
        }
        "IN0" => {
            let (reg, port) = two(args, "IN0")?;
            let r = z180_reg8f(reg)?;
            let inner = strip_parens_or_err(port, "IN0")?;
            let p = eval(inner)?;
            Ok(Some(vec![0xED, 8 * r, const8(p, "port address")?]))
        }
        "OUT0" => {
            let (port, reg) = two(args, "OUT0")?;
            let r = z180_reg8f(reg)?;
            let inner = strip_parens_or_err(port, "OUT0")?;
            let p = eval(inner)?;
            Ok(Some(vec![0xED, 8 * r + 1, const8(p, "port address")?]))
        }
        "TST" | "TSTIO" => {
            if mnemonic == "TSTIO" {
                let raw = one(args, "TSTIO")?;
                let v = eval(raw)?;
                return Ok(Some(vec![0xED, 0x74, const8(v, "8-bit immediate")?]));
            }
            match args {
                [only] => {
                    // `TST n` implies an A destination; an operand that
                    // isn't a register is an 8-bit immediate against A.
                    let operand = parse_operand(only, eval)?;
                    match operand {
                        Operand::Reg8(r) => Ok(Some(vec![0xED, 8 * r.code() + 0x04])),
                        Operand::IndirectHl => Ok(Some(vec![0xED, 8 * 6 + 0x04])),
                        Operand::Imm(v) => {
                            Ok(Some(vec![0xED, 0x64, const8(v, "8-bit immediate")?]))
                        }
                        _ => Err(invalid("TST", "invalid operand")),
                    }
                }
                [dest, src] => {
                    let dest_upper = dest.trim().to_ascii_uppercase();
                    if dest_upper != "A" && dest_upper != "(C)" {
                        return Err(invalid("TST", "destination must be A or (C)"));
                    }
                    if dest_upper == "(C)" {
                        // Per the historical `TSTIO`-path bug, `TST (C),n`
                        // accepts only an 8-bit immediate, never a register.
                        let v = eval(src)?;
                        return Ok(Some(vec![0xED, 0x74, const8(v, "8-bit immediate")?]));
                    }
                    let operand = parse_operand(src, eval)?;
                    match operand {
                        Operand::Reg8(r) => Ok(Some(vec![0xED, 8 * r.code() + 0x04])),
                        Operand::IndirectHl => Ok(Some(vec![0xED, 8 * 6 + 0x04])),
                        Operand::Imm(v) => {
                            Ok(Some(vec![0xED, 0x64, const8(v, "8-bit immediate")?]))
                        }
                        _ => Err(invalid("TST", "invalid operand")),
                    }
                }
                _ => Err(EncodeError::WrongArgCount {
                    instruction: "TST",
                    expected: "one or two operands",
                }),
            }
        }
        _ => Ok(None),
    }
}

/// `reg8F` in the historical table included `F`, which has no meaningful
/// decode for `IN0`/`OUT0`; this implementation rejects it.
fn z180_reg8f(raw: &str) -> Result<u8, EncodeError> {
    let upper = raw.trim().to_ascii_uppercase();
    if upper == "F" {
        return Err(invalid("IN0/OUT0", "F is not a valid register for this instruction"));
    }
    <Reg8 as EnumFromStr>::from_str(&upper)
        .map(|r| r.code())
        .map_err(|_| invalid("IN0/OUT0", format!("invalid register: {}", raw)))
}

fn strip_parens_or_err<'a>(raw: &'a str, instr: &'static str) -> Result<&'a str, EncodeError> {
    let t = raw.trim();
    if t.starts_with('(') && t.ends_with(')') && t.len() >= 2 {
        Ok(&t[1..t.len() - 1])
    } else {
        Err(invalid(instr, "missing brackets around port address"))
    }
}

// ---------------------------------------------------------------------
// 8080 mnemonic set
// ---------------------------------------------------------------------

fn reg8m_code(raw: &str) -> Option<u8> {
    let upper = raw.trim().to_ascii_uppercase();
    if upper == "M" {
        return Some(6);
    }
    <Reg8 as EnumFromStr>::from_str(&upper).ok().map(|r| r.code())
}

fn reg16o_code(raw: &str) -> Option<u8> {
    use crate::registers::Reg16I8080;
    <Reg16I8080 as EnumFromStr>::from_str(&raw.trim().to_ascii_uppercase())
        .ok()
        .map(|r| r.to_reg16().code())
}

fn encode_8080(mnemonic: &str, args: &[&str], eval: &mut Eval) -> Result<Vec<u8>, EncodeError> {
    match mnemonic {
        "MOV" => {
            let (dest, src) = two(args, "MOV")?;
            let d = reg8m_code(dest).ok_or_else(|| invalid("MOV", "invalid registers for MOV"))?;
            let s = reg8m_code(src).ok_or_else(|| invalid("MOV", "invalid registers for MOV"))?;
            let code = 0x40 + 8 * d + s;
            if code == 0x76 {
                return Err(invalid("MOV", "MOV M,M is not a valid instruction (that is HALT)"));
            }
            Ok(vec![code])
        }
        "MVI" => {
            let (dest, src) = two(args, "MVI")?;
            let d = reg8m_code(dest).ok_or_else(|| invalid("MVI", "invalid register for MVI"))?;
            let v = eval(src)?;
            Ok(vec![8 * d + 0x06, const8(v, "8-bit constant")?])
        }
        "LDA" => {
            let addr = eval(one(args, "LDA")?)?;
            let a = word16(addr, "LDA address")?;
            Ok(vec![0x3A, (a & 0xFF) as u8, (a >> 8) as u8])
        }
        "STA" => {
            let addr = eval(one(args, "STA")?)?;
            let a = word16(addr, "STA address")?;
            Ok(vec![0x32, (a & 0xFF) as u8, (a >> 8) as u8])
        }
        "SHLD" => {
            let addr = eval(one(args, "SHLD")?)?;
            let a = word16(addr, "SHLD address")?;
            Ok(vec![0x22, (a & 0xFF) as u8, (a >> 8) as u8])
        }
        "LHLD" => {
            let addr = eval(one(args, "LHLD")?)?;
            let a = word16(addr, "LHLD address")?;
            Ok(vec![0x2A, (a & 0xFF) as u8, (a >> 8) as u8])
        }
        "LDAX" => {
            let raw = one(args, "LDAX")?;
            let base = reg16x_code(raw).ok_or_else(|| invalid("LDAX", "invalid register for LDAX"))?;
            Ok(vec![base + 0x0A])
        }
        "STAX" => {
            let raw = one(args, "STAX")?;
            let base = reg16x_code(raw).ok_or_else(|| invalid("STAX", "invalid register for STAX"))?;
            Ok(vec![base + 0x02])
        }
        "LXI" => {
            let (dest, src) = two(args, "LXI")?;
            let base = reg16o_code(dest).ok_or_else(|| invalid("LXI", "invalid register for LXI"))?;
            let v = eval(src)?;
            let a = word16(v, "LXI immediate")?;
            Ok(vec![base + 0x01, (a & 0xFF) as u8, (a >> 8) as u8])
        }
        "PUSH" | "POP" => {
            let raw = one(args, mnemonic)?;
            let base = if mnemonic == "PUSH" { 0xC5 } else { 0xC1 };
            let r = <Reg16Psw as EnumFromStr>::from_str(&raw.trim().to_ascii_uppercase())
                .map_err(|_| invalid(mnemonic, format!("invalid register for {}", mnemonic)))?;
            Ok(vec![base + r.code()])
        }
        "RST" => {
            let v = eval(one(args, "RST")?)?;
            if (0..=7).contains(&v) {
                Ok(vec![8 * v as u8 + 0xC7])
            } else {
                Err(invalid("RST", "invalid restart"))
            }
        }
        _ => {
            if let Some(code) = op8080_zero(mnemonic) {
                none(args, "8080 opcode")?;
                return Ok(vec![code]);
            }
            if let Some(base) = op8080_a(mnemonic) {
                let raw = one(args, mnemonic)?;
                let r = reg8m_code(raw).ok_or_else(|| invalid(mnemonic, "invalid register"))?;
                return Ok(vec![base + r]);
            }
            if let Some(base) = op8080_i(mnemonic) {
                let raw = one(args, mnemonic)?;
                let r = reg8m_code(raw).ok_or_else(|| invalid(mnemonic, "invalid register"))?;
                return Ok(vec![base + 8 * r]);
            }
            if let Some(base) = op8080_x(mnemonic) {
                let raw = one(args, mnemonic)?;
                let v = eval(raw)?;
                return Ok(vec![base, const8(v, "8-bit constant")?]);
            }
            if let Some(base) = op8080_d(mnemonic) {
                let raw = one(args, mnemonic)?;
                let r = reg16o_code(raw).ok_or_else(|| invalid(mnemonic, "invalid register"))?;
                return Ok(vec![base + r]);
            }
            if let Some(base) = op8080_c(mnemonic) {
                let raw = one(args, mnemonic)?;
                let v = eval(raw)?;
                let a = word16(v, "address")?;
                return Ok(vec![base, (a & 0xFF) as u8, (a >> 8) as u8]);
            }
            Err(EncodeError::UnknownMnemonic(mnemonic.to_string()))
        }
    }
}

fn reg16x_code(raw: &str) -> Option<u8> {
    match raw.trim().to_ascii_uppercase().as_str() {
        "B" => Some(0x00),
        "D" => Some(0x10),
        _ => None,
    }
}

fn op8080_zero(m: &str) -> Option<u8> {
    Some(match m {
        "XTHL" => 0xE3,
        "SPHL" => 0xF9,
        "PCHL" => 0xE9,
        "XCHG" => 0xEB,
        "CMC" => 0x3F,
        "STC" => 0x37,
        "CMA" => 0x2F,
        "DAA" => 0x27,
        "HLT" => 0x76,
        "NOP" => 0x00,
        "DI" => 0xF3,
        "EI" => 0xFB,
        "RET" => 0xC9,
        "RNZ" => 0xC0,
        "RZ" => 0xC8,
        "RNC" => 0xD0,
        "RC" => 0xD8,
        "RPO" => 0xE0,
        "RPE" => 0xE8,
        "RP" => 0xF0,
        "RM" => 0xF8,
        "RAL" => 0x17,
        "RAR" => 0x1F,
        "RLC" => 0x07,
        "RRC" => 0x0F,
        _ => return None,
    })
}

fn op8080_a(m: &str) -> Option<u8> {
    Some(match m {
        "ADD" => 0x80,
        "ADC" => 0x88,
        "SUB" => 0x90,
        "SBB" => 0x98,
        "ANA" => 0xA0,
        "XRA" => 0xA8,
        "ORA" => 0xB0,
        "CMP" => 0xB8,
        _ => return None,
    })
}

fn op8080_i(m: &str) -> Option<u8> {
    Some(match m {
        "INR" => 0x04,
        "DCR" => 0x05,
        _ => return None,
    })
}

fn op8080_x(m: &str) -> Option<u8> {
    Some(match m {
        "ADI" => 0xC6,
        "ACI" => 0xCE,
        "SUI" => 0xD6,
        "SBI" => 0xDE,
        "ANI" => 0xE6,
        "XRI" => 0xEE,
        "ORI" => 0xF6,
        "CPI" => 0xFE,
        "IN" => 0xDB,
        "OUT" => 0xD3,
        _ => return None,
    })
}

fn op8080_d(m: &str) -> Option<u8> {
    Some(match m {
        "DAD" => 0x09,
        "INX" => 0x03,
        "DCX" => 0x0B,
        _ => return None,
    })
}

fn op8080_c(m: &str) -> Option<u8> {
    Some(match m {
        "CALL" => 0xCD,
        "CNZ" => 0xC4,
        "CZ" => 0xCC,
        "CNC" => 0xD4,
        "CC" => 0xDC,
        "CPO" => 0xE4,
        "CPE" => 0xEC,
        "CP" => 0xF4,
        "CM" => 0xFC,
        "JMP" => 0xC3,
        "JNZ" => 0xC2,
        "JZ" => 0xCA,
        "JNC" => 0xD2,
        "JC" => 0xDA,
        "JPO" => 0xE2,
        "JPE" => 0xEA,
        "JP" => 0xF2,
        "JM" => 0xFA,
        _ => return None,
    })
}

#[cfg(test)]
mod test {
    use super::*;

    fn eval_err(_: &str) -> Result<i32, EncodeError> {
        Err(invalid("test", "unexpected evaluation"))
    }

    fn encode_z80(mnemonic: &str, args: &[&str]) -> Vec<u8> {
        encode(mnemonic, args, CpuType::Z80, 0x100, &mut |s| {
            s.trim().parse::<i32>().map_err(|_| invalid("test", "bad literal"))
        })
        .unwrap()
    }

    #[test]
    fn add_a_b() {
        assert_eq!(encode_z80("ADD", &["A", "B"]), vec![0x80]);
    }

    #[test]
    fn indexed_load() {
        assert_eq!(encode_z80("LD", &["A", "(IX+5)"]), vec![0xDD, 0x7E, 0x05]);
        assert_eq!(encode_z80("LD", &["(IY-1)", "H"]), vec![0xFD, 0x74, 0xFF]);
    }

    #[test]
    fn relative_jump_to_self() {
        let mut eval = |_: &str| Ok(0x100);
        let bytes = encode("JR", &["L1"], CpuType::Z80, 0x100, &mut eval).unwrap();
        assert_eq!(bytes, vec![0x18, 0xFE]);
    }

    #[test]
    fn conditional_jp() {
        assert_eq!(encode_z80("JP", &["Z", "0x1234"]), vec![0xCA, 0x34, 0x12]);
    }

    #[test]
    fn retn_is_two_bytes() {
        assert_eq!(encode_z80("RETN", &[]), vec![0xED, 0x45]);
    }

    #[test]
    fn in0_rejects_f_register() {
        let mut eval = |_: &str| Ok(0x10);
        let err = encode("IN0", &["F", "(10)"], CpuType::Z180, 0, &mut eval).unwrap_err();
        assert!(matches!(err, EncodeError::Invalid { .. }));
    }

    #[test]
    fn tst_io_accepts_only_immediate() {
        let mut eval = |_: &str| Ok(5);
        let bytes = encode("TSTIO", &["5"], CpuType::Z180, 0, &mut eval).unwrap();
        assert_eq!(bytes, vec![0xED, 0x74, 0x05]);
    }

    #[test]
    fn i8080_mov_and_mvi_and_lxi() {
        let mut eval = eval_err;
        assert_eq!(
            encode("MOV", &["A", "B"], CpuType::I8080, 0, &mut eval).unwrap(),
            vec![0x78]
        );
        let mut eval_imm = |s: &str| s.trim().parse::<i32>().map_err(|_| invalid("t", "x"));
        assert_eq!(
            encode("MVI", &["C", "0x42"], CpuType::I8080, 0, &mut |_| Ok(0x42)).unwrap(),
            vec![0x0E, 0x42]
        );
        assert_eq!(
            encode("LXI", &["H", "0x1234"], CpuType::I8080, 0, &mut |_| Ok(0x1234)).unwrap(),
            vec![0x21, 0x34, 0x12]
        );
        let _ = eval_imm("0");
    }

    #[test]
    fn bit_ops_encode_with_cb_prefix() {
        let mut eval = |s: &str| s.trim().parse::<i32>().map_err(|_| invalid("t", "x"));
        assert_eq!(
            encode("BIT", &["3", "B"], CpuType::Z80, 0, &mut eval).unwrap(),
            vec![0xCB, 0x58]
        );
    }

    #[test]
    fn inc_dec_register_form_shifts_into_bits_3_5() {
        assert_eq!(encode_z80("INC", &["B"]), vec![0x04]);
        assert_eq!(encode_z80("INC", &["A"]), vec![0x3C]);
        assert_eq!(encode_z80("DEC", &["A"]), vec![0x3D]);
        assert_eq!(encode_z80("INC", &["(HL)"]), vec![0x34]);
        assert_eq!(encode_z80("DEC", &["(IX+2)"]), vec![0xDD, 0x35, 0x02]);
    }
}
