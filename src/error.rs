//! Error taxonomy for the Source toolchain.
//!
//! Every error carries a kind, a severity, a source location, a short
//! `explain` and a longer `elaborate`. The evaluator only raises `Runtime`
//! errors; `Syntax` comes from the upstream validator, `Type` from the
//! optional typechecker, and `Import` from the preprocessor. Their types
//! live here so a session can aggregate all of them in one log.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ast::{RcStr, SourceLoc};
use crate::value::{OperandSide, OperandTypeError};

// ---------------------------------------------------------------------------
// Severity and kinds
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    Import,
    Syntax,
    Type,
    Runtime,
}

// ---------------------------------------------------------------------------
// Runtime errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeErrorKind {
    UndefinedVariable {
        name: RcStr,
    },
    /// Read or write of a name inside its temporal dead zone.
    UnassignedVariable {
        name: RcStr,
    },
    ConstAssignment {
        name: RcStr,
    },
    CallingNonFunction {
        callee: String,
    },
    ArityMismatch {
        name: Option<RcStr>,
        expected: usize,
        got: usize,
    },
    OperandType {
        op: &'static str,
        side: OperandSide,
        expected: &'static str,
        got: &'static str,
    },
    /// Condition of a branch or loop was not a boolean.
    ConditionType {
        got: &'static str,
    },
    DivisionByZero,
    InvalidArrayIndex {
        index: String,
    },
    ArrayExpected {
        got: &'static str,
    },
    StackOverflow,
    Timeout {
        after_ms: u128,
    },
    Interrupted,
    PotentialInfiniteLoop,
    /// A host builtin reported failure; wraps the host's message.
    BuiltinFailure {
        name: RcStr,
        message: String,
    },
    /// Evaluator invariant broken: always a bug in the machine, never in
    /// the evaluated program.
    Internal {
        message: &'static str,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeError {
    pub kind: RuntimeErrorKind,
    pub loc: SourceLoc,
}

impl RuntimeError {
    pub fn new(kind: RuntimeErrorKind, loc: SourceLoc) -> Self {
        RuntimeError { kind, loc }
    }

    pub fn from_operand_type(err: OperandTypeError, loc: SourceLoc) -> Self {
        RuntimeError::new(
            RuntimeErrorKind::OperandType {
                op: err.op,
                side: err.side,
                expected: err.expected,
                got: err.got,
            },
            loc,
        )
    }

    pub fn explain(&self) -> String {
        use RuntimeErrorKind::*;
        match &self.kind {
            UndefinedVariable { name } => format!("Name {} not declared.", name),
            UnassignedVariable { name } => {
                format!("Name {} declared later in current scope but not yet assigned", name)
            }
            ConstAssignment { name } => format!("Cannot assign new value to constant {}.", name),
            CallingNonFunction { callee } => format!("Calling non-function value {}.", callee),
            ArityMismatch { name, expected, got } => {
                let what = match name {
                    Some(n) => format!("Function {}", n),
                    None => "Function".to_string(),
                };
                let plural = if *expected == 1 { "argument" } else { "arguments" };
                format!("{} expected {} {}, but got {}.", what, expected, plural, got)
            }
            OperandType { op, side, expected, got } => {
                let side = match side {
                    OperandSide::Left => " on left hand side of operation",
                    OperandSide::Right => " on right hand side of operation",
                    OperandSide::Only => "",
                };
                format!("Expected {}{} {}, got {}.", expected, side, op, got)
            }
            ConditionType { got } => {
                format!("Expected boolean as condition, got {}.", got)
            }
            DivisionByZero => "Division by zero.".to_string(),
            InvalidArrayIndex { index } => {
                format!("Expected array index as prop, got {}.", index)
            }
            ArrayExpected { got } => format!("Expected array, got {}.", got),
            StackOverflow => "Maximum call stack size exceeded.".to_string(),
            Timeout { after_ms } => {
                format!("Potential infinite loop detected: execution exceeded {} ms.", after_ms)
            }
            Interrupted => "Execution aborted by user.".to_string(),
            PotentialInfiniteLoop => {
                "Potential infinite loop detected: step limit exceeded.".to_string()
            }
            BuiltinFailure { name, message } => format!("Error in {}: {}", name, message),
            Internal { message } => format!("Internal evaluator error: {}", message),
        }
    }

    pub fn elaborate(&self) -> String {
        use RuntimeErrorKind::*;
        match &self.kind {
            UndefinedVariable { name } => format!(
                "Before you can read the value of {}, you need to declare it as a \
                 variable or a constant. You can do this using the let or const keywords.",
                name
            ),
            UnassignedVariable { name } => format!(
                "The declaration of {} appears later in the current scope. Move the \
                 use below the declaration, or move the declaration up.",
                name
            ),
            ConstAssignment { name } => format!(
                "As {} was declared as a constant, its value cannot be changed. You \
                 will have to declare a new variable.",
                name
            ),
            CallingNonFunction { .. } => {
                "Because the value is not a function, you cannot use the call syntax on it."
                    .to_string()
            }
            ArityMismatch { .. } => {
                "Try calling the function again, but with the correct number of arguments."
                    .to_string()
            }
            OperandType { .. } | ConditionType { .. } => {
                "The operation cannot be applied to a value of this type. Check the \
                 types of the operands."
                    .to_string()
            }
            DivisionByZero => "Dividing by zero has no defined result here.".to_string(),
            InvalidArrayIndex { .. } => {
                "Array indices must be non-negative integers below 2^32.".to_string()
            }
            ArrayExpected { .. } => {
                "Only arrays support indexed access and assignment.".to_string()
            }
            StackOverflow => {
                "The evaluation nests too deeply. If the program recurses, check that \
                 the recursion terminates, or rewrite it so the recursive call is the \
                 last operation of the function."
                    .to_string()
            }
            Timeout { .. } | PotentialInfiniteLoop => {
                "The program did not finish within its budget. If you are certain it \
                 terminates, run it again with a larger budget."
                    .to_string()
            }
            Interrupted => "The session was interrupted from outside.".to_string(),
            BuiltinFailure { .. } => {
                "The error was raised by a builtin function. Check its arguments.".to_string()
            }
            Internal { .. } => {
                "This is a defect in the evaluator itself, not in the evaluated program."
                    .to_string()
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Collaborator errors (validator, typechecker, preprocessor)
// ---------------------------------------------------------------------------

/// Unsupported construct for the current language level; produced by the
/// validator before the core runs.
#[derive(Debug, Clone, PartialEq)]
pub struct SyntaxError {
    pub construct: String,
    pub level: u8,
    pub loc: SourceLoc,
}

impl SyntaxError {
    pub fn explain(&self) -> String {
        format!("{} is not allowed at language level {}.", self.construct, self.level)
    }
}

/// Error from the optional typechecker; never raised by the CSE evaluator.
#[derive(Debug, Clone, PartialEq)]
pub struct TypecheckError {
    pub message: String,
    pub loc: SourceLoc,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ImportErrorKind {
    InvalidFilePath { path: String },
    CyclicImport { chain: Vec<String> },
    UndefinedImport { symbol: String, module: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImportError {
    pub kind: ImportErrorKind,
    pub loc: SourceLoc,
}

impl ImportError {
    pub fn explain(&self) -> String {
        match &self.kind {
            ImportErrorKind::InvalidFilePath { path } => {
                format!("Invalid file path: {}.", path)
            }
            ImportErrorKind::CyclicImport { chain } => {
                format!("Circular import detected: {}.", chain.join(" -> "))
            }
            ImportErrorKind::UndefinedImport { symbol, module } => {
                format!("Module {} does not export {}.", module, symbol)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Unified error
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum SourceError {
    Runtime(RuntimeError),
    Syntax(SyntaxError),
    Type(TypecheckError),
    Import(ImportError),
}

impl SourceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SourceError::Runtime(_) => ErrorKind::Runtime,
            SourceError::Syntax(_) => ErrorKind::Syntax,
            SourceError::Type(_) => ErrorKind::Type,
            SourceError::Import(_) => ErrorKind::Import,
        }
    }

    pub fn severity(&self) -> Severity {
        Severity::Error
    }

    pub fn loc(&self) -> &SourceLoc {
        match self {
            SourceError::Runtime(e) => &e.loc,
            SourceError::Syntax(e) => &e.loc,
            SourceError::Type(e) => &e.loc,
            SourceError::Import(e) => &e.loc,
        }
    }

    pub fn explain(&self) -> String {
        match self {
            SourceError::Runtime(e) => e.explain(),
            SourceError::Syntax(e) => e.explain(),
            SourceError::Type(e) => e.message.clone(),
            SourceError::Import(e) => e.explain(),
        }
    }

    pub fn elaborate(&self) -> String {
        match self {
            SourceError::Runtime(e) => e.elaborate(),
            SourceError::Syntax(e) => e.explain(),
            SourceError::Type(e) => e.message.clone(),
            SourceError::Import(e) => e.explain(),
        }
    }
}

impl From<RuntimeError> for SourceError {
    fn from(e: RuntimeError) -> Self {
        SourceError::Runtime(e)
    }
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", ErrorFormatter::terse().format(self))
    }
}

// ---------------------------------------------------------------------------
// Formatting
// ---------------------------------------------------------------------------

/// Renders errors as `[file] Line L, Column C: explain`. The verbose flag is
/// per-formatter state, never process-global.
#[derive(Debug, Clone, Copy)]
pub struct ErrorFormatter {
    pub verbose: bool,
}

impl ErrorFormatter {
    pub fn terse() -> Self {
        ErrorFormatter { verbose: false }
    }

    pub fn verbose() -> Self {
        ErrorFormatter { verbose: true }
    }

    pub fn format(&self, error: &SourceError) -> String {
        let loc = error.loc();
        let mut out = String::new();
        if let Some(source) = &loc.source {
            out.push('[');
            out.push_str(source);
            out.push_str("] ");
        }
        out.push_str(&format!(
            "Line {}, Column {}: {}",
            loc.start.line,
            loc.start.column,
            error.explain()
        ));
        if self.verbose {
            out.push('\n');
            out.push_str(&error.elaborate());
        }
        out
    }

    pub fn format_all(&self, errors: &[SourceError]) -> String {
        errors.iter().map(|e| self.format(e)).collect::<Vec<_>>().join("\n")
    }
}

// ---------------------------------------------------------------------------
// Diagnostics (serialisable projection)
// ---------------------------------------------------------------------------

/// Location of a diagnostic, flattened for serialisation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticLocation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    pub line: i32,
    pub column: i32,
}

/// A single diagnostic message in the JSON shape consumed by frontends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostic {
    pub kind: ErrorKind,
    pub severity: Severity,
    pub location: DiagnosticLocation,
    pub message: String,
    pub elaboration: String,
}

impl Diagnostic {
    pub fn from_error(error: &SourceError) -> Self {
        let loc = error.loc();
        Diagnostic {
            kind: error.kind(),
            severity: error.severity(),
            location: DiagnosticLocation {
                file: loc.source.as_ref().map(|s| s.to_string()),
                line: loc.start.line,
                column: loc.start.column,
            },
            message: error.explain(),
            elaboration: error.elaborate(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::SourceLoc;

    fn const_error() -> SourceError {
        SourceError::Runtime(RuntimeError::new(
            RuntimeErrorKind::ConstAssignment { name: "x".into() },
            SourceLoc::line(1, 15),
        ))
    }

    #[test]
    fn terse_format_has_location_and_message() {
        let out = ErrorFormatter::terse().format(&const_error());
        assert_eq!(out, "Line 1, Column 15: Cannot assign new value to constant x.");
    }

    #[test]
    fn verbose_format_appends_elaboration() {
        let out = ErrorFormatter::verbose().format(&const_error());
        assert!(out.starts_with("Line 1, Column 15:"));
        assert!(out.contains("declared as a constant"));
    }

    #[test]
    fn file_name_prefixes_output() {
        let mut err = const_error();
        if let SourceError::Runtime(e) = &mut err {
            e.loc.source = Some("prog.js".into());
        }
        let out = ErrorFormatter::terse().format(&err);
        assert!(out.starts_with("[prog.js] Line 1, Column 15:"));
    }

    #[test]
    fn unknown_location_formats_minus_one() {
        let err = SourceError::Runtime(RuntimeError::new(
            RuntimeErrorKind::StackOverflow,
            SourceLoc::unknown(),
        ));
        let out = ErrorFormatter::terse().format(&err);
        assert!(out.starts_with("Line -1, Column -1:"));
    }

    #[test]
    fn diagnostic_serialises_to_json() {
        let diag = Diagnostic::from_error(&const_error());
        let json = serde_json::to_value(&diag).expect("serialise");
        assert_eq!(json["kind"], "runtime");
        assert_eq!(json["severity"], "error");
        assert_eq!(json["location"]["line"], 1);
    }

    #[test]
    fn operand_error_mentions_side() {
        let err = SourceError::Runtime(RuntimeError::new(
            RuntimeErrorKind::OperandType {
                op: "+",
                side: crate::value::OperandSide::Right,
                expected: "number",
                got: "string",
            },
            SourceLoc::unknown(),
        ));
        assert_eq!(
            err.explain(),
            "Expected number on right hand side of operation +, got string."
        );
    }
}
