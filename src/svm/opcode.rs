//! The SVM instruction set.
//!
//! A compact stack-machine vocabulary: `…G` opcodes are generic and check
//! operand types at runtime, `…N`/`…S` variants are the number/string
//! specialisations the optimiser substitutes when operand types are known.
//! Branch operands are instruction-relative (from the start of the next
//! instruction) in memory; the assembler converts them to byte-relative
//! offsets in the binary encoding.

use std::fmt;

/// Lexical address of an environment slot: `depth` frames up the chain,
/// slot `index` within that frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvAddress {
    pub depth: u8,
    pub index: u8,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SvmInstr {
    Nop,

    // -- Constants --
    /// Push an integer-valued number.
    Lgci(i32),
    /// Push a number.
    Lgcf64(f64),
    /// Push a string from the string pool.
    Lgcs(u32),
    /// Push `false`.
    Lgcb0,
    /// Push `true`.
    Lgcb1,
    /// Push `undefined`.
    Lgcu,
    /// Push `null`.
    Lgcn,

    // -- Arithmetic / logic --
    Addg,
    Subg,
    Mulg,
    Divg,
    Modg,
    Negg,
    Notg,
    /// Number-typed variants.
    Addn,
    Subn,
    Muln,
    Divn,
    Modn,
    Negn,
    /// String concatenation.
    Adds,

    // -- Comparison --
    Eqg,
    Neqg,
    Ltg,
    Gtg,
    Leg,
    Geg,

    // -- Memory --
    /// Create a closure over the current environment chain.
    Newc(u32),
    /// Pop tail and head, push a fresh pair.
    Newp,
    /// Push a fresh empty array.
    Newa,
    /// Pop index and array, push the element (`undefined` past the end).
    Ldag,
    /// Pop value, index and array; store into the array.
    Stag,
    /// Duplicate the top of the operand stack.
    Dupg,
    /// Discard the top of the operand stack.
    Popg,
    /// Load a slot of the current frame.
    Ldl(u8),
    /// Store the popped value into a slot of the current frame.
    Stl(u8),
    /// Load through the environment chain.
    Ldp(EnvAddress),
    /// Store through the environment chain.
    Stp(EnvAddress),

    // -- Control --
    /// Unconditional branch (forward control flow).
    Br(i32),
    /// Branch when the popped boolean is true.
    Brt(i32),
    /// Branch when the popped boolean is false.
    Brf(i32),
    /// Unconditional branch (loop back-edges).
    Jmp(i32),
    /// Call the closure beneath the arguments.
    Call(u8),
    /// Tail call: replace the current frame.
    Callt(u8),
    /// Call a primitive by id.
    Callp { prim: u8, argc: u8 },
    /// Return the popped value.
    Retg,
    /// Return the popped value, which must be a number.
    Retn,
    /// Return the popped value, which must be a boolean.
    Retb,
    /// Return `undefined`.
    Retu,

    // -- Environment --
    /// Push a fresh frame of the given size onto the environment chain.
    Newenv(u8),
    /// Pop the innermost frame.
    Popenv,

    // -- Terminator --
    /// End of the entry function; the stack top is the program result.
    Done,
}

impl SvmInstr {
    /// Encoded size in bytes: one opcode byte plus the operands.
    pub fn byte_len(&self) -> usize {
        1 + match self {
            SvmInstr::Lgci(_) | SvmInstr::Lgcs(_) | SvmInstr::Newc(_) => 4,
            SvmInstr::Lgcf64(_) => 8,
            SvmInstr::Ldl(_) | SvmInstr::Stl(_) => 1,
            SvmInstr::Ldp(_) | SvmInstr::Stp(_) => 2,
            SvmInstr::Br(_) | SvmInstr::Brt(_) | SvmInstr::Brf(_) | SvmInstr::Jmp(_) => 4,
            SvmInstr::Call(_) | SvmInstr::Callt(_) => 1,
            SvmInstr::Callp { .. } => 2,
            SvmInstr::Newenv(_) => 1,
            _ => 0,
        }
    }

    /// True for the four branch shapes whose operand is an offset.
    pub fn is_branch(&self) -> bool {
        matches!(
            self,
            SvmInstr::Br(_) | SvmInstr::Brt(_) | SvmInstr::Brf(_) | SvmInstr::Jmp(_)
        )
    }

    pub fn branch_offset(&self) -> Option<i32> {
        match self {
            SvmInstr::Br(o) | SvmInstr::Brt(o) | SvmInstr::Brf(o) | SvmInstr::Jmp(o) => Some(*o),
            _ => None,
        }
    }

    pub fn with_branch_offset(&self, offset: i32) -> SvmInstr {
        match self {
            SvmInstr::Br(_) => SvmInstr::Br(offset),
            SvmInstr::Brt(_) => SvmInstr::Brt(offset),
            SvmInstr::Brf(_) => SvmInstr::Brf(offset),
            SvmInstr::Jmp(_) => SvmInstr::Jmp(offset),
            other => *other,
        }
    }
}

impl fmt::Display for SvmInstr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SvmInstr::Nop => write!(f, "NOP"),
            SvmInstr::Lgci(n) => write!(f, "LGCI {}", n),
            SvmInstr::Lgcf64(n) => write!(f, "LGCF64 {}", n),
            SvmInstr::Lgcs(i) => write!(f, "LGCS {}", i),
            SvmInstr::Lgcb0 => write!(f, "LGCB0"),
            SvmInstr::Lgcb1 => write!(f, "LGCB1"),
            SvmInstr::Lgcu => write!(f, "LGCU"),
            SvmInstr::Lgcn => write!(f, "LGCN"),
            SvmInstr::Addg => write!(f, "ADDG"),
            SvmInstr::Subg => write!(f, "SUBG"),
            SvmInstr::Mulg => write!(f, "MULG"),
            SvmInstr::Divg => write!(f, "DIVG"),
            SvmInstr::Modg => write!(f, "MODG"),
            SvmInstr::Negg => write!(f, "NEGG"),
            SvmInstr::Notg => write!(f, "NOTG"),
            SvmInstr::Addn => write!(f, "ADDN"),
            SvmInstr::Subn => write!(f, "SUBN"),
            SvmInstr::Muln => write!(f, "MULN"),
            SvmInstr::Divn => write!(f, "DIVN"),
            SvmInstr::Modn => write!(f, "MODN"),
            SvmInstr::Negn => write!(f, "NEGN"),
            SvmInstr::Adds => write!(f, "ADDS"),
            SvmInstr::Eqg => write!(f, "EQG"),
            SvmInstr::Neqg => write!(f, "NEQG"),
            SvmInstr::Ltg => write!(f, "LTG"),
            SvmInstr::Gtg => write!(f, "GTG"),
            SvmInstr::Leg => write!(f, "LEG"),
            SvmInstr::Geg => write!(f, "GEG"),
            SvmInstr::Newc(i) => write!(f, "NEWC {}", i),
            SvmInstr::Newp => write!(f, "NEWP"),
            SvmInstr::Newa => write!(f, "NEWA"),
            SvmInstr::Ldag => write!(f, "LDAG"),
            SvmInstr::Stag => write!(f, "STAG"),
            SvmInstr::Dupg => write!(f, "DUPG"),
            SvmInstr::Popg => write!(f, "POPG"),
            SvmInstr::Ldl(i) => write!(f, "LDL {}", i),
            SvmInstr::Stl(i) => write!(f, "STL {}", i),
            SvmInstr::Ldp(a) => write!(f, "LDP {} {}", a.depth, a.index),
            SvmInstr::Stp(a) => write!(f, "STP {} {}", a.depth, a.index),
            SvmInstr::Br(o) => write!(f, "BR {}", o),
            SvmInstr::Brt(o) => write!(f, "BRT {}", o),
            SvmInstr::Brf(o) => write!(f, "BRF {}", o),
            SvmInstr::Jmp(o) => write!(f, "JMP {}", o),
            SvmInstr::Call(n) => write!(f, "CALL {}", n),
            SvmInstr::Callt(n) => write!(f, "CALLT {}", n),
            SvmInstr::Callp { prim, argc } => write!(f, "CALLP {} {}", prim, argc),
            SvmInstr::Retg => write!(f, "RETG"),
            SvmInstr::Retn => write!(f, "RETN"),
            SvmInstr::Retb => write!(f, "RETB"),
            SvmInstr::Retu => write!(f, "RETU"),
            SvmInstr::Newenv(n) => write!(f, "NEWENV {}", n),
            SvmInstr::Popenv => write!(f, "POPENV"),
            SvmInstr::Done => write!(f, "DONE"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_lengths_cover_operands() {
        assert_eq!(SvmInstr::Nop.byte_len(), 1);
        assert_eq!(SvmInstr::Lgci(5).byte_len(), 5);
        assert_eq!(SvmInstr::Lgcf64(1.5).byte_len(), 9);
        assert_eq!(SvmInstr::Ldp(EnvAddress { depth: 1, index: 2 }).byte_len(), 3);
        assert_eq!(SvmInstr::Callp { prim: 0, argc: 2 }.byte_len(), 3);
    }

    #[test]
    fn branch_offset_rewrites_preserve_shape() {
        let brf = SvmInstr::Brf(0);
        assert!(brf.is_branch());
        assert_eq!(brf.with_branch_offset(7), SvmInstr::Brf(7));
        assert_eq!(SvmInstr::Jmp(-3).branch_offset(), Some(-3));
        assert!(!SvmInstr::Retg.is_branch());
    }
}
