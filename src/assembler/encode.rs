//! x86-64 instruction encoder: REX/ModR/M/SIB/displacement (spec.md §4.8)
//!
//! Operates on one already-tokenized instruction (`mnemonic`, operand
//! strings) at a time and has no notion of sections or labels; the
//! caller (`mod.rs`) resolves symbolic operands into a `Fixup` before
//! handing a zero-filled placeholder displacement to `encode`.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegSize {
    R8,
    R16,
    R32,
    R64,
}

impl RegSize {
    fn bytes(self) -> u8 {
        match self {
            RegSize::R8 => 1,
            RegSize::R16 => 2,
            RegSize::R32 => 4,
            RegSize::R64 => 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reg {
    pub num: u8,
    pub size: RegSize,
}

impl Reg {
    fn is_extended(self) -> bool {
        self.num >= 8
    }

    fn low3(self) -> u8 {
        self.num & 0x7
    }
}

const REG64: [&str; 16] = [
    "rax", "rcx", "rdx", "rbx", "rsp", "rbp", "rsi", "rdi", "r8", "r9", "r10", "r11", "r12", "r13", "r14", "r15",
];
const REG32: [&str; 16] = [
    "eax", "ecx", "edx", "ebx", "esp", "ebp", "esi", "edi", "r8d", "r9d", "r10d", "r11d", "r12d", "r13d", "r14d", "r15d",
];
const REG16: [&str; 16] = [
    "ax", "cx", "dx", "bx", "sp", "bp", "si", "di", "r8w", "r9w", "r10w", "r11w", "r12w", "r13w", "r14w", "r15w",
];
const REG8: [&str; 16] = [
    "al", "cl", "dl", "bl", "spl", "bpl", "sil", "dil", "r8b", "r9b", "r10b", "r11b", "r12b", "r13b", "r14b", "r15b",
];

pub fn parse_reg(token: &str) -> Option<Reg> {
    let name = token.strip_prefix('%')?;
    if let Some(num) = REG64.iter().position(|r| *r == name) {
        return Some(Reg { num: num as u8, size: RegSize::R64 });
    }
    if let Some(num) = REG32.iter().position(|r| *r == name) {
        return Some(Reg { num: num as u8, size: RegSize::R32 });
    }
    if let Some(num) = REG16.iter().position(|r| *r == name) {
        return Some(Reg { num: num as u8, size: RegSize::R16 });
    }
    if let Some(num) = REG8.iter().position(|r| *r == name) {
        return Some(Reg { num: num as u8, size: RegSize::R8 });
    }
    None
}

#[derive(Debug, Clone)]
pub struct MemOperand {
    /// `None` with `rip_label` set means RIP-relative; `None` with no
    /// label means an absolute disp32 (not produced by our codegen but
    /// accepted for completeness).
    pub base: Option<Reg>,
    pub disp: i32,
    pub rip_label: Option<String>,
}

#[derive(Debug, Clone)]
pub enum Operand {
    Reg(Reg),
    Imm(i64),
    Mem(MemOperand),
    /// Bare symbol, used by `call`/`jmp` targets and as the `lea` source.
    Symbol(String),
}

/// Parses one AT&T operand token: `%reg`, `$imm`, `disp(%base)`,
/// `label(%rip)`, or a bare symbol name for branch/call targets.
pub fn parse_operand(token: &str) -> Operand {
    let token = token.trim();
    if let Some(reg) = parse_reg(token) {
        return Operand::Reg(reg);
    }
    if let Some(rest) = token.strip_prefix('$') {
        let value = parse_immediate(rest);
        return Operand::Imm(value);
    }
    if let Some(open) = token.find('(') {
        let disp_str = &token[..open];
        let inner = token[open + 1..].trim_end_matches(')').trim();
        let base = parse_reg(inner);
        if inner == "%rip" {
            return Operand::Mem(MemOperand {
                base: None,
                disp: 0,
                rip_label: Some(disp_str.to_string()),
            });
        }
        let disp = if disp_str.is_empty() { 0 } else { parse_immediate(disp_str) as i32 };
        return Operand::Mem(MemOperand { base, disp, rip_label: None });
    }
    Operand::Symbol(token.to_string())
}

fn parse_immediate(s: &str) -> i64 {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("-0x")) {
        let v = i64::from_str_radix(hex, 16).unwrap_or(0);
        if s.starts_with('-') {
            -v
        } else {
            v
        }
    } else {
        s.parse::<i64>().unwrap_or(0)
    }
}

/// Pending patch for a symbolic operand the encoder could not resolve
/// to a literal displacement at encode time.
#[derive(Debug, Clone)]
pub struct Fixup {
    /// Byte offset within `bytes` where the patch field starts.
    pub at: usize,
    pub symbol: String,
    pub size: u8,
    pub pc_relative: bool,
    pub addend: i64,
}

#[derive(Debug, Clone, Default)]
pub struct Encoded {
    pub bytes: Vec<u8>,
    pub fixup: Option<Fixup>,
}

fn rex(w: bool, r: bool, x: bool, b: bool) -> Option<u8> {
    if !(w || r || x || b) {
        return None;
    }
    Some(0x40 | ((w as u8) << 3) | ((r as u8) << 2) | ((x as u8) << 1) | (b as u8))
}

/// Emits REX (when needed), ModR/M, SIB and displacement for `reg op mem`
/// or `reg op reg`, with `reg_field` as the ModR/M.reg value and
/// `force_rex` covering 8-bit-register cases that need a REX prefix even
/// without W/R/X/B (`spl`/`bpl`/`sil`/`dil`).
fn encode_modrm(reg_field: u8, rm: &Operand, rex_w: bool, force_rex: bool) -> (Vec<u8>, Option<Fixup>) {
    let mut out = Vec::new();
    match rm {
        Operand::Reg(r) => {
            let rex_byte = rex(rex_w, reg_field >= 8, false, r.is_extended());
            if rex_byte.is_some() || force_rex {
                out.push(rex_byte.unwrap_or(0x40));
            }
            out.push(0xC0 | ((reg_field & 7) << 3) | r.low3());
            (out, None)
        }
        Operand::Mem(m) => {
            let rex_byte = rex(rex_w, reg_field >= 8, false, m.base.map(|b| b.is_extended()).unwrap_or(false));
            if let Some(label) = &m.rip_label {
                if let Some(r) = rex_byte {
                    out.push(r);
                }
                out.push(((reg_field & 7) << 3) | 0b101);
                let fixup_at = out.len();
                out.extend_from_slice(&0i32.to_le_bytes());
                return (
                    out,
                    Some(Fixup {
                        at: fixup_at,
                        symbol: label.clone(),
                        size: 4,
                        pc_relative: true,
                        addend: 0,
                    }),
                );
            }
            let base = m.base.expect("absolute-disp32 addressing not produced by this compiler");
            if let Some(r) = rex_byte {
                out.push(r);
            }
            let needs_sib = base.low3() == 0b100; // rsp/r12 always SIB
            let force_disp8 = base.low3() == 0b101; // rbp/r13: mod=00 would mean RIP/no-base, so disp8 minimum
            let (modb, use_disp32) = if m.disp == 0 && !force_disp8 {
                (0b00, false)
            } else if i8::try_from(m.disp).is_ok() {
                (0b01, false)
            } else {
                (0b10, true)
            };
            if needs_sib {
                out.push((modb << 6) | ((reg_field & 7) << 3) | 0b100);
                out.push((0b00 << 6) | (0b100 << 3) | base.low3()); // scale=1, index=none, base
            } else {
                out.push((modb << 6) | ((reg_field & 7) << 3) | base.low3());
            }
            if modb == 0b01 {
                out.push(m.disp as i8 as u8);
            } else if modb == 0b10 || use_disp32 {
                out.extend_from_slice(&m.disp.to_le_bytes());
            }
            (out, None)
        }
        Operand::Imm(_) | Operand::Symbol(_) => panic!("immediate/symbol cannot be an r/m operand"),
    }
}

fn push_imm(out: &mut Vec<u8>, value: i64, size: u8) {
    match size {
        1 => out.push(value as i8 as u8),
        4 => out.extend_from_slice(&(value as i32).to_le_bytes()),
        8 => out.extend_from_slice(&value.to_le_bytes()),
        _ => unreachable!(),
    }
}

fn fits_i8(v: i64) -> bool {
    i8::try_from(v).is_ok()
}

/// Two-operand arithmetic family sharing the `/r` and `/imm` opcode
/// layout (ADD=0, OR=1, AND=4, SUB=5, XOR=6 as the ModR/M.reg extension
/// for the immediate forms; `/r` forms use a distinct base opcode byte).
fn arith_opcodes(mnemonic: &str) -> Option<(u8, u8, u8)> {
    // (opcode for r/m,r store form "op r/m, r" i.e. AT&T "op src,dst" reg=src,
    //  opcode for r,r/m load form,
    //  /digit extension used by the $imm,r/m forms)
    match mnemonic {
        "add" => Some((0x01, 0x03, 0)),
        "or" => Some((0x09, 0x0B, 1)),
        "and" => Some((0x21, 0x23, 4)),
        "sub" => Some((0x29, 0x2B, 5)),
        "xor" => Some((0x31, 0x33, 6)),
        "cmp" => Some((0x39, 0x3B, 7)),
        _ => None,
    }
}

fn setcc_opcode(mnemonic: &str) -> Option<u8> {
    match mnemonic {
        "sete" => Some(0x94),
        "setne" => Some(0x95),
        "setl" => Some(0x9C),
        "setle" => Some(0x9E),
        "setg" => Some(0x9F),
        "setge" => Some(0x9D),
        "setb" => Some(0x92),
        "setbe" => Some(0x96),
        "seta" => Some(0x97),
        "setae" => Some(0x93),
        _ => None,
    }
}

fn jcc_opcode(mnemonic: &str) -> Option<u8> {
    match mnemonic {
        "je" => Some(0x84),
        "jne" => Some(0x85),
        "jl" => Some(0x8C),
        "jle" => Some(0x8E),
        "jg" => Some(0x8F),
        "jge" => Some(0x8D),
        "jb" => Some(0x82),
        "jbe" => Some(0x86),
        "ja" => Some(0x87),
        "jae" => Some(0x83),
        _ => None,
    }
}

/// Encodes one instruction. `operands` are already parsed; symbolic
/// operands (`Operand::Symbol`, or a `Mem` with `rip_label`) produce a
/// `Fixup` the caller resolves against the label table or leaves as an
/// unresolved relocation for the ELF builder.
pub fn encode_instr(mnemonic: &str, operands: &[Operand]) -> Result<Encoded, String> {
    match mnemonic {
        "mov" => encode_mov(operands),
        "movabs" => encode_movabs(operands),
        "movzx" => encode_movx(operands, 0xB6),
        "movsx" => encode_movx(operands, 0xBE),
        "lea" => encode_lea(operands),
        "push" => encode_push_pop(operands, true),
        "pop" => encode_push_pop(operands, false),
        "add" | "or" | "and" | "sub" | "xor" | "cmp" => encode_arith(mnemonic, operands),
        "imul" => encode_imul(operands),
        "idiv" | "div" | "neg" | "not" | "inc" | "dec" => encode_unary_group3(mnemonic, operands),
        "shl" | "shr" | "sar" => encode_shift(mnemonic, operands),
        "test" => encode_test(operands),
        m if setcc_opcode(m).is_some() => encode_setcc(m, operands),
        "movzx_al" => unreachable!(),
        "jmp" => encode_jmp(operands),
        m if jcc_opcode(m).is_some() => encode_jcc(m, operands),
        "call" => encode_call(operands),
        "ret" => Ok(Encoded { bytes: vec![0xC3], fixup: None }),
        "syscall" => Ok(Encoded { bytes: vec![0x0F, 0x05], fixup: None }),
        "nop" => Ok(Encoded { bytes: vec![0x90], fixup: None }),
        "cqo" => Ok(Encoded { bytes: vec![0x48, 0x99], fixup: None }),
        "cdq" => Ok(Encoded { bytes: vec![0x99], fixup: None }),
        "rdtsc" => Ok(Encoded { bytes: vec![0x0F, 0x31], fixup: None }),
        other => Err(format!("unknown mnemonic `{other}`")),
    }
}

fn encode_mov(operands: &[Operand]) -> Result<Encoded, String> {
    match operands {
        [Operand::Imm(v), Operand::Reg(dst)] => {
            if dst.size == RegSize::R64 && !fits_range_i32(*v) {
                return encode_movabs(operands);
            }
            if dst.size == RegSize::R8 {
                let force_rex = is_rex_only_byte_reg(*dst);
                let rex_byte = rex(false, false, false, dst.is_extended());
                let mut bytes = Vec::new();
                if let Some(r) = rex_byte {
                    bytes.push(r);
                } else if force_rex {
                    bytes.push(0x40);
                }
                bytes.push(0xB0 | dst.low3());
                bytes.push(*v as i8 as u8);
                return Ok(Encoded { bytes, fixup: None });
            }
            let rex_w = dst.size == RegSize::R64;
            let rex_byte = rex(rex_w, false, false, dst.is_extended());
            let mut bytes = Vec::new();
            if let Some(r) = rex_byte {
                bytes.push(r);
            }
            bytes.push(0xC7);
            bytes.push(0xC0 | dst.low3());
            let imm_size = if dst.size == RegSize::R16 { 2 } else { 4 };
            push_imm(&mut bytes, *v, imm_size);
            Ok(Encoded { bytes, fixup: None })
        }
        [Operand::Reg(src), Operand::Reg(dst)] => {
            // MOV r/m, r: dst is the r/m side, src is the reg field.
            // Byte-register forms use opcode 0x88, wider forms 0x89.
            let is8 = src.size == RegSize::R8 || dst.size == RegSize::R8;
            let opcode = if is8 { 0x88 } else { 0x89 };
            let rex_w = dst.size == RegSize::R64;
            let force_rex = is8 && (is_rex_only_byte_reg(*src) || is_rex_only_byte_reg(*dst));
            let (modrm, fixup) = encode_modrm(src.num, &Operand::Reg(*dst), rex_w, force_rex);
            let (bytes, fixup) = with_opcode(opcode, modrm, fixup);
            Ok(Encoded { bytes, fixup })
        }
        [src @ Operand::Mem(_), Operand::Reg(dst)] => {
            let opcode = if dst.size == RegSize::R8 { 0x8A } else { 0x8B };
            let rex_w = dst.size == RegSize::R64;
            let force_rex = dst.size == RegSize::R8 && is_rex_only_byte_reg(*dst);
            let (modrm, fixup) = encode_modrm(dst.num, src, rex_w, force_rex);
            let (bytes, fixup) = with_opcode(opcode, modrm, fixup);
            Ok(Encoded { bytes, fixup })
        }
        [Operand::Reg(src), dst @ Operand::Mem(_)] => {
            let opcode = if src.size == RegSize::R8 { 0x88 } else { 0x89 };
            let rex_w = src.size == RegSize::R64;
            let force_rex = src.size == RegSize::R8 && is_rex_only_byte_reg(*src);
            let (modrm, fixup) = encode_modrm(src.num, dst, rex_w, force_rex);
            let (bytes, fixup) = with_opcode(opcode, modrm, fixup);
            Ok(Encoded { bytes, fixup })
        }
        [Operand::Imm(v), dst @ Operand::Mem(_)] => {
            let (modrm, fixup) = encode_modrm(0, dst, true, false);
            let (mut bytes, fixup) = with_opcode(0xC7, modrm, fixup);
            push_imm(&mut bytes, *v, 4);
            Ok(Encoded { bytes, fixup })
        }
        _ => Err("mov: unsupported operand combination".to_string()),
    }
}

/// `spl`/`bpl`/`sil`/`dil` (register numbers 4-7 at `RegSize::R8`) need a
/// REX prefix to disambiguate from the legacy `ah`/`ch`/`dh`/`bh` high-byte
/// encodings, even when no other REX bit is otherwise required.
fn is_rex_only_byte_reg(r: Reg) -> bool {
    r.size == RegSize::R8 && (4..=7).contains(&r.num)
}

/// Inserts a single-byte opcode after `modrm`'s REX prefix (if any),
/// since `encode_modrm` returns `[REX?, ModR/M, SIB?, disp?]` and the
/// opcode always sits between the REX prefix and the ModR/M byte; shifts
/// any fixup offset to account for the inserted byte.
fn with_opcode(opcode: u8, modrm: Vec<u8>, fixup: Option<Fixup>) -> (Vec<u8>, Option<Fixup>) {
    let has_rex = modrm.first().map(|b| b & 0xF0 == 0x40).unwrap_or(false);
    let split = if has_rex { 1 } else { 0 };
    let mut out = modrm[..split].to_vec();
    out.push(opcode);
    out.extend(&modrm[split..]);
    let fixup = fixup.map(|f| Fixup { at: f.at + 1, ..f });
    (out, fixup)
}

/// Same as `with_opcode` but for two-byte opcodes (`0F xx`), used by
/// `movzx`/`movsx`/`imul`/`setcc`/`jcc`.
fn with_opcode2(op1: u8, op2: u8, modrm: Vec<u8>, fixup: Option<Fixup>) -> (Vec<u8>, Option<Fixup>) {
    let has_rex = modrm.first().map(|b| b & 0xF0 == 0x40).unwrap_or(false);
    let split = if has_rex { 1 } else { 0 };
    let mut out = modrm[..split].to_vec();
    out.push(op1);
    out.push(op2);
    out.extend(&modrm[split..]);
    let fixup = fixup.map(|f| Fixup { at: f.at + 2, ..f });
    (out, fixup)
}

fn fits_range_i32(v: i64) -> bool {
    v >= i32::MIN as i64 && v <= i32::MAX as i64
}

fn encode_movabs(operands: &[Operand]) -> Result<Encoded, String> {
    match operands {
        [Operand::Imm(v), Operand::Reg(dst)] => {
            let rex_byte = rex(true, false, false, dst.is_extended()).unwrap();
            let mut bytes = vec![rex_byte, 0xB8 | dst.low3()];
            bytes.extend_from_slice(&v.to_le_bytes());
            Ok(Encoded { bytes, fixup: None })
        }
        _ => Err("movabs requires an immediate source and register destination".to_string()),
    }
}

fn encode_movx(operands: &[Operand], opcode2: u8) -> Result<Encoded, String> {
    match operands {
        [src, Operand::Reg(dst)] => {
            let rex_w = dst.size == RegSize::R64;
            let (modrm, fixup) = encode_modrm(dst.num, src, rex_w, false);
            let (bytes, fixup) = with_opcode2(0x0F, opcode2, modrm, fixup);
            Ok(Encoded { bytes, fixup })
        }
        _ => Err("movzx/movsx require reg/mem source and register destination".to_string()),
    }
}

fn encode_lea(operands: &[Operand]) -> Result<Encoded, String> {
    match operands {
        [src @ Operand::Mem(_), Operand::Reg(dst)] => {
            let (modrm, fixup) = encode_modrm(dst.num, src, dst.size == RegSize::R64, false);
            let (bytes, fixup) = with_opcode(0x8D, modrm, fixup);
            Ok(Encoded { bytes, fixup })
        }
        _ => Err("lea requires a memory source and register destination".to_string()),
    }
}

fn encode_push_pop(operands: &[Operand], is_push: bool) -> Result<Encoded, String> {
    match operands {
        [Operand::Reg(r)] => {
            let mut bytes = Vec::new();
            if r.is_extended() {
                bytes.push(rex(false, false, false, true).unwrap());
            }
            let base = if is_push { 0x50 } else { 0x58 };
            bytes.push(base | r.low3());
            Ok(Encoded { bytes, fixup: None })
        }
        _ => Err("push/pop require a single register operand".to_string()),
    }
}

fn encode_arith(mnemonic: &str, operands: &[Operand]) -> Result<Encoded, String> {
    let (store_op, load_op, imm_ext) = arith_opcodes(mnemonic).unwrap();
    match operands {
        [Operand::Reg(src), Operand::Reg(dst)] => {
            let rex_w = dst.size == RegSize::R64;
            let (modrm, fixup) = encode_modrm(src.num, &Operand::Reg(*dst), rex_w, false);
            let (bytes, fixup) = with_opcode(store_op, modrm, fixup);
            Ok(Encoded { bytes, fixup })
        }
        [src @ Operand::Mem(_), Operand::Reg(dst)] => {
            let rex_w = dst.size == RegSize::R64;
            let (modrm, fixup) = encode_modrm(dst.num, src, rex_w, false);
            let (bytes, fixup) = with_opcode(load_op, modrm, fixup);
            Ok(Encoded { bytes, fixup })
        }
        [Operand::Imm(v), Operand::Reg(dst)] => {
            let rex_w = dst.size == RegSize::R64;
            let opcode = if fits_i8(*v) { 0x83 } else { 0x81 };
            let (modrm, fixup) = encode_modrm(imm_ext, &Operand::Reg(*dst), rex_w, false);
            let (mut bytes, fixup) = with_opcode(opcode, modrm, fixup);
            push_imm(&mut bytes, *v, if fits_i8(*v) { 1 } else { 4 });
            Ok(Encoded { bytes, fixup })
        }
        _ => Err(format!("{mnemonic}: unsupported operand combination")),
    }
}

fn encode_imul(operands: &[Operand]) -> Result<Encoded, String> {
    // Two-operand IMUL r64, r/m64 (0F AF /r): Intel reg=dst, rm=src;
    // matches AT&T `imul src, dst` directly.
    match operands {
        [src, Operand::Reg(dst)] => {
            let rex_w = dst.size == RegSize::R64;
            let (modrm, fixup) = encode_modrm(dst.num, src, rex_w, false);
            let (bytes, fixup) = with_opcode2(0x0F, 0xAF, modrm, fixup);
            Ok(Encoded { bytes, fixup })
        }
        _ => Err("imul: unsupported operand combination".to_string()),
    }
}

/// Opcode-group-3/5 single-operand ops sharing the `/digit` ModR/M
/// extension scheme: `not`=2, `neg`=3 (0xF7), `inc`=0, `dec`=1 (0xFF),
/// `idiv`=7, `div`=6 (0xF7).
fn encode_unary_group3(mnemonic: &str, operands: &[Operand]) -> Result<Encoded, String> {
    match operands {
        [Operand::Reg(r)] => {
            let rex_w = r.size == RegSize::R64;
            let (opcode, digit) = match mnemonic {
                "not" => (0xF7, 2),
                "neg" => (0xF7, 3),
                "div" => (0xF7, 6),
                "idiv" => (0xF7, 7),
                "inc" => (0xFF, 0),
                "dec" => (0xFF, 1),
                _ => unreachable!(),
            };
            let (modrm, fixup) = encode_modrm(digit, &Operand::Reg(*r), rex_w, false);
            let (bytes, fixup) = with_opcode(opcode, modrm, fixup);
            Ok(Encoded { bytes, fixup })
        }
        _ => Err(format!("{mnemonic}: requires a single register operand")),
    }
}

fn encode_shift(mnemonic: &str, operands: &[Operand]) -> Result<Encoded, String> {
    let digit = match mnemonic {
        "shl" => 4,
        "shr" => 5,
        "sar" => 7,
        _ => unreachable!(),
    };
    match operands {
        [Operand::Imm(v), Operand::Reg(r)] => {
            let rex_w = r.size == RegSize::R64;
            let (modrm, fixup) = encode_modrm(digit, &Operand::Reg(*r), rex_w, false);
            let (mut bytes, fixup) = with_opcode(0xC1, modrm, fixup);
            bytes.push(*v as u8);
            Ok(Encoded { bytes, fixup })
        }
        _ => Err(format!("{mnemonic}: requires an immediate shift count and register")),
    }
}

fn encode_test(operands: &[Operand]) -> Result<Encoded, String> {
    match operands {
        [Operand::Reg(a), Operand::Reg(b)] => {
            let rex_w = b.size == RegSize::R64;
            let (modrm, fixup) = encode_modrm(a.num, &Operand::Reg(*b), rex_w, false);
            let (bytes, fixup) = with_opcode(0x85, modrm, fixup);
            Ok(Encoded { bytes, fixup })
        }
        _ => Err("test: unsupported operand combination".to_string()),
    }
}

fn encode_setcc(mnemonic: &str, operands: &[Operand]) -> Result<Encoded, String> {
    let opcode = setcc_opcode(mnemonic).unwrap();
    match operands {
        [Operand::Reg(r)] => {
            let force_rex = is_rex_only_byte_reg(*r);
            let (modrm, fixup) = encode_modrm(0, &Operand::Reg(*r), false, force_rex);
            let (bytes, fixup) = with_opcode2(0x0F, opcode, modrm, fixup);
            Ok(Encoded { bytes, fixup })
        }
        _ => Err(format!("{mnemonic}: requires a single 8-bit register operand")),
    }
}

fn encode_jmp(operands: &[Operand]) -> Result<Encoded, String> {
    match operands {
        [Operand::Symbol(label)] => {
            let mut bytes = vec![0xE9];
            let at = bytes.len();
            bytes.extend_from_slice(&0i32.to_le_bytes());
            Ok(Encoded {
                bytes,
                fixup: Some(Fixup { at, symbol: label.clone(), size: 4, pc_relative: true, addend: 0 }),
            })
        }
        [Operand::Reg(r)] => {
            let mut bytes = Vec::new();
            if r.is_extended() {
                bytes.push(rex(false, false, false, true).unwrap());
            }
            bytes.push(0xFF);
            bytes.push(0xE0 | r.low3());
            Ok(Encoded { bytes, fixup: None })
        }
        _ => Err("jmp: unsupported operand".to_string()),
    }
}

fn encode_jcc(mnemonic: &str, operands: &[Operand]) -> Result<Encoded, String> {
    // Always the 32-bit-displacement `0F 8x` form (spec.md §4.8), never
    // the 1-byte-disp short form, so the assembler never needs a
    // range-check fixed-point pass.
    let opcode = jcc_opcode(mnemonic).unwrap();
    match operands {
        [Operand::Symbol(label)] => {
            let mut bytes = vec![0x0F, opcode];
            let at = bytes.len();
            bytes.extend_from_slice(&0i32.to_le_bytes());
            Ok(Encoded {
                bytes,
                fixup: Some(Fixup { at, symbol: label.clone(), size: 4, pc_relative: true, addend: 0 }),
            })
        }
        _ => Err(format!("{mnemonic}: requires a label operand")),
    }
}

fn encode_call(operands: &[Operand]) -> Result<Encoded, String> {
    match operands {
        [Operand::Symbol(label)] => {
            let mut bytes = vec![0xE8];
            let at = bytes.len();
            bytes.extend_from_slice(&0i32.to_le_bytes());
            Ok(Encoded {
                bytes,
                fixup: Some(Fixup { at, symbol: label.clone(), size: 4, pc_relative: true, addend: 0 }),
            })
        }
        _ => Err("call: requires a single symbol operand".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ret_has_no_operands_and_no_fixup() {
        let encoded = encode_instr("ret", &[]).unwrap();
        assert_eq!(encoded.bytes, vec![0xC3]);
        assert!(encoded.fixup.is_none());
    }

    #[test]
    fn mov_imm_to_extended_register_sets_rex_b() {
        let r15 = Reg { num: 15, size: RegSize::R64 };
        let encoded = encode_instr("mov", &[Operand::Imm(5), Operand::Reg(r15)]).unwrap();
        assert_eq!(encoded.bytes[0] & 0x41, 0x41); // REX.W and REX.B both set
    }

    #[test]
    fn call_produces_pc_relative_fixup() {
        let encoded = encode_instr("call", &[Operand::Symbol("runtime_alloc".to_string())]).unwrap();
        let fixup = encoded.fixup.unwrap();
        assert!(fixup.pc_relative);
        assert_eq!(fixup.symbol, "runtime_alloc");
        assert_eq!(encoded.bytes.len(), 5);
    }

    #[test]
    fn rip_relative_lea_produces_fixup_at_modrm_rm_101() {
        let rax = Reg { num: 0, size: RegSize::R64 };
        let mem = Operand::Mem(MemOperand { base: None, disp: 0, rip_label: Some("str_0".to_string()) });
        let encoded = encode_instr("lea", &[mem, Operand::Reg(rax)]).unwrap();
        assert!(encoded.fixup.is_some());
    }

    #[test]
    fn parse_operand_reads_state_offset_memory_form() {
        match parse_operand("8(%r12)") {
            Operand::Mem(m) => {
                assert_eq!(m.disp, 8);
                assert_eq!(m.base.unwrap().num, 12);
            }
            other => panic!("expected Mem, got {other:?}"),
        }
    }
}
