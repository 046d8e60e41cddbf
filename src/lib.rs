//! Core of the Source teaching-language toolchain.
//!
//! Source is a graded family of JavaScript subsets. This crate implements
//! the runtime heart of the system: the CSE (Control-Stash-Environment)
//! machine that evaluates already-parsed, already-validated programs step
//! by step, the lexically scoped environment model behind it, and the SVM
//! stack-machine compiler and assembler that target the same AST and value
//! model.
//!
//! Parsing, level validation, typechecking and import preprocessing are
//! upstream collaborators: programs arrive here as [`ast::Program`] trees.
//!
//! ```
//! use slc::ast::{build, BinaryOp};
//! use slc::session::{Level, Session};
//!
//! let program = build::program(vec![build::expr_stmt(build::binary(
//!     BinaryOp::Add,
//!     build::number(1.0),
//!     build::number(2.0),
//! ))]);
//! let mut session = Session::with_defaults(Level::One);
//! match slc::run_program(&mut session, &program) {
//!     slc::session::EvalResult::Finished { value } => assert_eq!(value.to_string(), "3"),
//!     other => panic!("unexpected result: {:?}", other),
//! }
//! ```

pub mod ast;
pub mod builtins;
pub mod cse;
pub mod environment;
pub mod error;
pub mod session;
pub mod svm;
pub mod value;

pub use error::{Diagnostic, ErrorFormatter, SourceError};
pub use session::{EvalOptions, EvalResult, InterruptHandle, Level, Session, Variant};
pub use value::Value;

use session::ExecutionMethod;

/// Evaluate a program in a session.
///
/// All execution methods currently select the CSE machine; `native` and
/// `auto` are accepted so existing frontend option payloads keep working.
pub fn run_program(session: &mut Session, program: &ast::Program) -> EvalResult {
    let program = session.apply_transformers(program);
    match session.options.execution_method {
        ExecutionMethod::Auto | ExecutionMethod::Native | ExecutionMethod::CseMachine => {
            cse::machine::evaluate(session, &program)
        }
    }
}

/// Continue a suspended evaluation from exactly the control, stash and
/// environment it stopped at.
pub fn resume(session: &mut Session) -> EvalResult {
    cse::machine::resume(session)
}

/// Compile a program for the SVM, using the session's builtin registry for
/// primitive resolution.
pub fn compile_program(
    session: &Session,
    program: &ast::Program,
) -> Result<svm::SvmProgram, svm::CompileError> {
    svm::compile(program, session.builtins())
}
