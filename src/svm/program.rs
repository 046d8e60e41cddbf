//! Compiled SVM programs.

use std::fmt;

use super::opcode::SvmInstr;

/// One compiled function: fixed frame geometry plus its instruction stream.
#[derive(Debug, Clone, PartialEq)]
pub struct SvmFunction {
    /// Maximum operand stack depth, computed by the compiler.
    pub stack_size: u16,
    /// Slots in the function's own environment frame (parameters followed
    /// by hoisted declarations).
    pub env_size: u16,
    pub arity: u16,
    pub code: Vec<SvmInstr>,
}

/// A compiled program: the function table, the entry index and the
/// deduplicated string pool referenced by `LGCS`.
#[derive(Debug, Clone, PartialEq)]
pub struct SvmProgram {
    pub entry: u32,
    pub functions: Vec<SvmFunction>,
    pub strings: Vec<String>,
}

impl fmt::Display for SvmProgram {
    /// Disassembly: one instruction per line, entry function marked.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, string) in self.strings.iter().enumerate() {
            writeln!(f, "string {}: {:?}", idx, string)?;
        }
        for (idx, func) in self.functions.iter().enumerate() {
            let marker = if idx as u32 == self.entry { " (entry)" } else { "" };
            writeln!(
                f,
                "fn {}{}: arity={} env={} stack={}",
                idx, marker, func.arity, func.env_size, func.stack_size
            )?;
            for (pc, instr) in func.code.iter().enumerate() {
                writeln!(f, "  {:4}  {}", pc, instr)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disassembly_marks_entry_and_lists_code() {
        let program = SvmProgram {
            entry: 0,
            functions: vec![SvmFunction {
                stack_size: 2,
                env_size: 0,
                arity: 0,
                code: vec![SvmInstr::Lgci(1), SvmInstr::Lgci(2), SvmInstr::Addg, SvmInstr::Done],
            }],
            strings: vec!["hi".to_string()],
        };
        let text = program.to_string();
        assert!(text.contains("fn 0 (entry)"));
        assert!(text.contains("LGCI 1"));
        assert!(text.contains("DONE"));
        assert!(text.contains("string 0: \"hi\""));
    }
}
