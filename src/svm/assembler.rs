//! Binary encoding of SVM programs.
//!
//! Little-endian layout:
//!
//! ```text
//! Header:   magic "SVMC", version:u16, entryFn:u32, fnCount:u32, stringCount:u32
//! Strings:  per string: len:u32, utf8 bytes
//! Functions: per function: stackSize:u16, envSize:u16, arity:u16, instrCount:u32,
//!            instructions (opcode:u8, operands per opcode)
//! ```
//!
//! In-memory branch operands are instruction-relative; in the binary they
//! are byte-relative from the start of the next instruction. Decoding
//! rejects anything it cannot round-trip: bad magic, unknown versions or
//! opcodes, truncated input, branches that do not land on an instruction
//! boundary, and trailing bytes.

use std::collections::HashMap;
use std::fmt;

use super::opcode::{EnvAddress, SvmInstr};
use super::program::{SvmFunction, SvmProgram};

pub const MAGIC: [u8; 4] = *b"SVMC";
pub const VERSION: u16 = 1;

// Opcode bytes, in declaration order of `SvmInstr`.
const OP_NOP: u8 = 0x00;
const OP_LGCI: u8 = 0x01;
const OP_LGCF64: u8 = 0x02;
const OP_LGCS: u8 = 0x03;
const OP_LGCB0: u8 = 0x04;
const OP_LGCB1: u8 = 0x05;
const OP_LGCU: u8 = 0x06;
const OP_LGCN: u8 = 0x07;
const OP_ADDG: u8 = 0x08;
const OP_SUBG: u8 = 0x09;
const OP_MULG: u8 = 0x0a;
const OP_DIVG: u8 = 0x0b;
const OP_MODG: u8 = 0x0c;
const OP_NEGG: u8 = 0x0d;
const OP_NOTG: u8 = 0x0e;
const OP_ADDN: u8 = 0x0f;
const OP_SUBN: u8 = 0x10;
const OP_MULN: u8 = 0x11;
const OP_DIVN: u8 = 0x12;
const OP_MODN: u8 = 0x13;
const OP_NEGN: u8 = 0x14;
const OP_ADDS: u8 = 0x15;
const OP_EQG: u8 = 0x16;
const OP_NEQG: u8 = 0x17;
const OP_LTG: u8 = 0x18;
const OP_GTG: u8 = 0x19;
const OP_LEG: u8 = 0x1a;
const OP_GEG: u8 = 0x1b;
const OP_NEWC: u8 = 0x1c;
const OP_NEWP: u8 = 0x1d;
const OP_NEWA: u8 = 0x1e;
const OP_LDAG: u8 = 0x1f;
const OP_STAG: u8 = 0x20;
const OP_DUPG: u8 = 0x21;
const OP_POPG: u8 = 0x22;
const OP_LDL: u8 = 0x23;
const OP_STL: u8 = 0x24;
const OP_LDP: u8 = 0x25;
const OP_STP: u8 = 0x26;
const OP_BR: u8 = 0x27;
const OP_BRT: u8 = 0x28;
const OP_BRF: u8 = 0x29;
const OP_JMP: u8 = 0x2a;
const OP_CALL: u8 = 0x2b;
const OP_CALLT: u8 = 0x2c;
const OP_CALLP: u8 = 0x2d;
const OP_RETG: u8 = 0x2e;
const OP_RETN: u8 = 0x2f;
const OP_RETB: u8 = 0x30;
const OP_RETU: u8 = 0x31;
const OP_NEWENV: u8 = 0x32;
const OP_POPENV: u8 = 0x33;
const OP_DONE: u8 = 0x34;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    /// A branch points outside its function's code.
    BranchOutOfBounds { function: usize, at: usize },
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncodeError::BranchOutOfBounds { function, at } => {
                write!(f, "branch at fn {} instruction {} points outside the function", function, at)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    BadMagic,
    UnsupportedVersion(u16),
    UnexpectedEof,
    UnknownOpcode(u8),
    InvalidString,
    /// A byte-relative branch does not land on an instruction boundary.
    BranchTarget { function: usize, at: usize },
    TrailingBytes,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::BadMagic => write!(f, "not an SVM binary (bad magic)"),
            DecodeError::UnsupportedVersion(v) => write!(f, "unsupported format version {}", v),
            DecodeError::UnexpectedEof => write!(f, "unexpected end of input"),
            DecodeError::UnknownOpcode(op) => write!(f, "unknown opcode 0x{:02x}", op),
            DecodeError::InvalidString => write!(f, "string table entry is not valid UTF-8"),
            DecodeError::BranchTarget { function, at } => {
                write!(f, "branch at fn {} instruction {} lands between instructions", function, at)
            }
            DecodeError::TrailingBytes => write!(f, "trailing bytes after the function table"),
        }
    }
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

pub fn encode(program: &SvmProgram) -> Result<Vec<u8>, EncodeError> {
    let mut out = Vec::new();
    out.extend_from_slice(&MAGIC);
    out.extend_from_slice(&VERSION.to_le_bytes());
    out.extend_from_slice(&program.entry.to_le_bytes());
    out.extend_from_slice(&(program.functions.len() as u32).to_le_bytes());
    out.extend_from_slice(&(program.strings.len() as u32).to_le_bytes());

    for string in &program.strings {
        out.extend_from_slice(&(string.len() as u32).to_le_bytes());
        out.extend_from_slice(string.as_bytes());
    }

    for (fn_idx, func) in program.functions.iter().enumerate() {
        out.extend_from_slice(&func.stack_size.to_le_bytes());
        out.extend_from_slice(&func.env_size.to_le_bytes());
        out.extend_from_slice(&func.arity.to_le_bytes());
        out.extend_from_slice(&(func.code.len() as u32).to_le_bytes());

        // Byte offset of every instruction (plus the end), for branch
        // conversion.
        let mut byte_pos = Vec::with_capacity(func.code.len() + 1);
        let mut pos = 0usize;
        for instr in &func.code {
            byte_pos.push(pos);
            pos += instr.byte_len();
        }
        byte_pos.push(pos);

        for (i, instr) in func.code.iter().enumerate() {
            let encoded = if let Some(offset) = instr.branch_offset() {
                let target = i as i64 + 1 + offset as i64;
                if target < 0 || target > func.code.len() as i64 {
                    return Err(EncodeError::BranchOutOfBounds { function: fn_idx, at: i });
                }
                let byte_offset =
                    byte_pos[target as usize] as i64 - byte_pos[i + 1] as i64;
                instr.with_branch_offset(byte_offset as i32)
            } else {
                *instr
            };
            write_instr(&mut out, &encoded);
        }
    }
    Ok(out)
}

fn write_instr(out: &mut Vec<u8>, instr: &SvmInstr) {
    use SvmInstr::*;
    match instr {
        Nop => out.push(OP_NOP),
        Lgci(n) => {
            out.push(OP_LGCI);
            out.extend_from_slice(&n.to_le_bytes());
        }
        Lgcf64(n) => {
            out.push(OP_LGCF64);
            out.extend_from_slice(&n.to_le_bytes());
        }
        Lgcs(i) => {
            out.push(OP_LGCS);
            out.extend_from_slice(&i.to_le_bytes());
        }
        Lgcb0 => out.push(OP_LGCB0),
        Lgcb1 => out.push(OP_LGCB1),
        Lgcu => out.push(OP_LGCU),
        Lgcn => out.push(OP_LGCN),
        Addg => out.push(OP_ADDG),
        Subg => out.push(OP_SUBG),
        Mulg => out.push(OP_MULG),
        Divg => out.push(OP_DIVG),
        Modg => out.push(OP_MODG),
        Negg => out.push(OP_NEGG),
        Notg => out.push(OP_NOTG),
        Addn => out.push(OP_ADDN),
        Subn => out.push(OP_SUBN),
        Muln => out.push(OP_MULN),
        Divn => out.push(OP_DIVN),
        Modn => out.push(OP_MODN),
        Negn => out.push(OP_NEGN),
        Adds => out.push(OP_ADDS),
        Eqg => out.push(OP_EQG),
        Neqg => out.push(OP_NEQG),
        Ltg => out.push(OP_LTG),
        Gtg => out.push(OP_GTG),
        Leg => out.push(OP_LEG),
        Geg => out.push(OP_GEG),
        Newc(i) => {
            out.push(OP_NEWC);
            out.extend_from_slice(&i.to_le_bytes());
        }
        Newp => out.push(OP_NEWP),
        Newa => out.push(OP_NEWA),
        Ldag => out.push(OP_LDAG),
        Stag => out.push(OP_STAG),
        Dupg => out.push(OP_DUPG),
        Popg => out.push(OP_POPG),
        Ldl(i) => {
            out.push(OP_LDL);
            out.push(*i);
        }
        Stl(i) => {
            out.push(OP_STL);
            out.push(*i);
        }
        Ldp(a) => {
            out.push(OP_LDP);
            out.push(a.depth);
            out.push(a.index);
        }
        Stp(a) => {
            out.push(OP_STP);
            out.push(a.depth);
            out.push(a.index);
        }
        Br(o) => {
            out.push(OP_BR);
            out.extend_from_slice(&o.to_le_bytes());
        }
        Brt(o) => {
            out.push(OP_BRT);
            out.extend_from_slice(&o.to_le_bytes());
        }
        Brf(o) => {
            out.push(OP_BRF);
            out.extend_from_slice(&o.to_le_bytes());
        }
        Jmp(o) => {
            out.push(OP_JMP);
            out.extend_from_slice(&o.to_le_bytes());
        }
        Call(n) => {
            out.push(OP_CALL);
            out.push(*n);
        }
        Callt(n) => {
            out.push(OP_CALLT);
            out.push(*n);
        }
        Callp { prim, argc } => {
            out.push(OP_CALLP);
            out.push(*prim);
            out.push(*argc);
        }
        Retg => out.push(OP_RETG),
        Retn => out.push(OP_RETN),
        Retb => out.push(OP_RETB),
        Retu => out.push(OP_RETU),
        Newenv(n) => {
            out.push(OP_NEWENV);
            out.push(*n);
        }
        Popenv => out.push(OP_POPENV),
        Done => out.push(OP_DONE),
    }
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Reader { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        let end = self.pos.checked_add(n).ok_or(DecodeError::UnexpectedEof)?;
        if end > self.bytes.len() {
            return Err(DecodeError::UnexpectedEof);
        }
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, DecodeError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, DecodeError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn i32(&mut self) -> Result<i32, DecodeError> {
        let b = self.take(4)?;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn f64(&mut self) -> Result<f64, DecodeError> {
        let b = self.take(8)?;
        Ok(f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
    }

    fn is_done(&self) -> bool {
        self.pos == self.bytes.len()
    }
}

pub fn decode(bytes: &[u8]) -> Result<SvmProgram, DecodeError> {
    let mut r = Reader::new(bytes);

    if r.take(4)? != MAGIC {
        return Err(DecodeError::BadMagic);
    }
    let version = r.u16()?;
    if version != VERSION {
        return Err(DecodeError::UnsupportedVersion(version));
    }
    let entry = r.u32()?;
    let fn_count = r.u32()? as usize;
    let string_count = r.u32()? as usize;

    let mut strings = Vec::with_capacity(string_count.min(1024));
    for _ in 0..string_count {
        let len = r.u32()? as usize;
        let raw = r.take(len)?;
        let s = std::str::from_utf8(raw).map_err(|_| DecodeError::InvalidString)?;
        strings.push(s.to_string());
    }

    let mut functions = Vec::with_capacity(fn_count.min(1024));
    for fn_idx in 0..fn_count {
        let stack_size = r.u16()?;
        let env_size = r.u16()?;
        let arity = r.u16()?;
        let instr_count = r.u32()? as usize;

        let mut code = Vec::with_capacity(instr_count.min(4096));
        let mut byte_pos = Vec::with_capacity(instr_count + 1);
        let mut boundary: HashMap<usize, usize> = HashMap::new();
        let mut pos = 0usize;
        for i in 0..instr_count {
            byte_pos.push(pos);
            boundary.insert(pos, i);
            let instr = read_instr(&mut r)?;
            pos += instr.byte_len();
            code.push(instr);
        }
        byte_pos.push(pos);
        boundary.insert(pos, instr_count);

        // Second pass: byte-relative branch offsets back to
        // instruction-relative.
        for i in 0..code.len() {
            if let Some(byte_offset) = code[i].branch_offset() {
                let target_byte = byte_pos[i + 1] as i64 + byte_offset as i64;
                if target_byte < 0 {
                    return Err(DecodeError::BranchTarget { function: fn_idx, at: i });
                }
                let target = boundary
                    .get(&(target_byte as usize))
                    .copied()
                    .ok_or(DecodeError::BranchTarget { function: fn_idx, at: i })?;
                let rel = target as i64 - (i as i64 + 1);
                code[i] = code[i].with_branch_offset(rel as i32);
            }
        }

        functions.push(SvmFunction { stack_size, env_size, arity, code });
    }

    if !r.is_done() {
        return Err(DecodeError::TrailingBytes);
    }
    Ok(SvmProgram { entry, functions, strings })
}

fn read_instr(r: &mut Reader) -> Result<SvmInstr, DecodeError> {
    use SvmInstr::*;
    let op = r.u8()?;
    Ok(match op {
        OP_NOP => Nop,
        OP_LGCI => Lgci(r.i32()?),
        OP_LGCF64 => Lgcf64(r.f64()?),
        OP_LGCS => Lgcs(r.u32()?),
        OP_LGCB0 => Lgcb0,
        OP_LGCB1 => Lgcb1,
        OP_LGCU => Lgcu,
        OP_LGCN => Lgcn,
        OP_ADDG => Addg,
        OP_SUBG => Subg,
        OP_MULG => Mulg,
        OP_DIVG => Divg,
        OP_MODG => Modg,
        OP_NEGG => Negg,
        OP_NOTG => Notg,
        OP_ADDN => Addn,
        OP_SUBN => Subn,
        OP_MULN => Muln,
        OP_DIVN => Divn,
        OP_MODN => Modn,
        OP_NEGN => Negn,
        OP_ADDS => Adds,
        OP_EQG => Eqg,
        OP_NEQG => Neqg,
        OP_LTG => Ltg,
        OP_GTG => Gtg,
        OP_LEG => Leg,
        OP_GEG => Geg,
        OP_NEWC => Newc(r.u32()?),
        OP_NEWP => Newp,
        OP_NEWA => Newa,
        OP_LDAG => Ldag,
        OP_STAG => Stag,
        OP_DUPG => Dupg,
        OP_POPG => Popg,
        OP_LDL => Ldl(r.u8()?),
        OP_STL => Stl(r.u8()?),
        OP_LDP => Ldp(EnvAddress { depth: r.u8()?, index: r.u8()? }),
        OP_STP => Stp(EnvAddress { depth: r.u8()?, index: r.u8()? }),
        OP_BR => Br(r.i32()?),
        OP_BRT => Brt(r.i32()?),
        OP_BRF => Brf(r.i32()?),
        OP_JMP => Jmp(r.i32()?),
        OP_CALL => Call(r.u8()?),
        OP_CALLT => Callt(r.u8()?),
        OP_CALLP => Callp { prim: r.u8()?, argc: r.u8()? },
        OP_RETG => Retg,
        OP_RETN => Retn,
        OP_RETB => Retb,
        OP_RETU => Retu,
        OP_NEWENV => Newenv(r.u8()?),
        OP_POPENV => Popenv,
        OP_DONE => Done,
        other => return Err(DecodeError::UnknownOpcode(other)),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
