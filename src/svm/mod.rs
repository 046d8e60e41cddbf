//! The Source Virtual Machine: a stack-bytecode target for the same AST
//! and value model the CSE machine evaluates.

pub mod assembler;
pub mod compiler;
pub mod machine;
pub mod opcode;
pub mod program;

pub use assembler::{decode, encode, DecodeError, EncodeError};
pub use compiler::{compile, CompileError, CompileErrorKind};
pub use machine::{run, SvmError, SvmMachine};
pub use opcode::{EnvAddress, SvmInstr};
pub use program::{SvmFunction, SvmProgram};
