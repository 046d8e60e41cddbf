//! Runtime values shared by the CSE machine and the SVM.
//!
//! Pairs and arrays are reference cells: copies share the same storage and
//! equality is identity, which is what lets Source programs build shared and
//! cyclic structure with `set_head`/`set_tail` and array assignment.

use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;

use crate::ast::{FnBody, RcStr, SourceLoc};
use crate::environment::EnvRef;

// ---------------------------------------------------------------------------
// Value
// ---------------------------------------------------------------------------

pub type PairRef = Rc<RefCell<(Value, Value)>>;
pub type ArrayRef = Rc<RefCell<Vec<Value>>>;

/// A function value bundling code with its captured environment.
pub struct Closure {
    pub params: Vec<RcStr>,
    pub body: FnBody,
    pub env: EnvRef,
    /// Filled in when the closure is bound by a declaration, for display and
    /// arity error messages.
    pub name: RefCell<Option<RcStr>>,
    pub loc: SourceLoc,
}

#[derive(Clone)]
pub enum Value {
    Undefined,
    Null,
    Bool(bool),
    /// IEEE-754 double with JavaScript semantics (`1/0` is `Infinity`).
    Number(f64),
    String(RcStr),
    Pair(PairRef),
    Array(ArrayRef),
    Closure(Rc<Closure>),
    /// A builtin installed by the host. `id` indexes the session's builtin
    /// registry and doubles as the SVM primitive id.
    Builtin {
        name: RcStr,
        arity: Option<u8>,
        id: u16,
    },
    /// Opaque handle owned by the host or by the SVM (compiled closures).
    HostOpaque {
        id: u32,
    },
}

impl Value {
    pub fn number(n: f64) -> Value {
        Value::Number(n)
    }

    pub fn string(s: &str) -> Value {
        Value::String(s.into())
    }

    pub fn pair(head: Value, tail: Value) -> Value {
        Value::Pair(Rc::new(RefCell::new((head, tail))))
    }

    pub fn array(elements: Vec<Value>) -> Value {
        Value::Array(Rc::new(RefCell::new(elements)))
    }

    /// Runtime type name used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Pair(_) => "pair",
            Value::Array(_) => "array",
            Value::Closure(_) | Value::Builtin { .. } => "function",
            Value::HostOpaque { .. } => "object",
        }
    }

    pub fn is_function(&self) -> bool {
        matches!(self, Value::Closure(_) | Value::Builtin { .. })
    }
}

// ---------------------------------------------------------------------------
// Strict equality
// ---------------------------------------------------------------------------

/// JavaScript `===` restricted to the Source value set: numbers compare by
/// value (`NaN !== NaN`), strings by content, reference types by identity.
pub fn identical(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Undefined, Value::Undefined) => true,
        (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Number(x), Value::Number(y)) => x == y,
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Pair(x), Value::Pair(y)) => Rc::ptr_eq(x, y),
        (Value::Array(x), Value::Array(y)) => Rc::ptr_eq(x, y),
        (Value::Closure(x), Value::Closure(y)) => Rc::ptr_eq(x, y),
        (Value::Builtin { id: x, .. }, Value::Builtin { id: y, .. }) => x == y,
        (Value::HostOpaque { id: x }, Value::HostOpaque { id: y }) => x == y,
        _ => false,
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        identical(self, other)
    }
}

// ---------------------------------------------------------------------------
// Operator semantics
// ---------------------------------------------------------------------------

/// Which operand of a binary operator had the wrong type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandSide {
    Left,
    Right,
    Only,
}

/// Type error raised by an operator application. The machines attach the
/// source location and wrap this into the runtime error taxonomy.
#[derive(Debug, Clone, PartialEq)]
pub struct OperandTypeError {
    pub op: &'static str,
    pub side: OperandSide,
    pub expected: &'static str,
    pub got: &'static str,
}

fn op_error(
    op: &'static str,
    side: OperandSide,
    expected: &'static str,
    got: &Value,
) -> OperandTypeError {
    OperandTypeError { op, side, expected, got: got.type_name() }
}

/// Apply a binary operator with Source semantics: `+` is overloaded on
/// numbers and strings, arithmetic is numeric, comparisons work on numbers
/// and strings, equality is `===`.
pub fn apply_binary(
    op: crate::ast::BinaryOp,
    left: &Value,
    right: &Value,
) -> Result<Value, OperandTypeError> {
    use crate::ast::BinaryOp as B;
    let sym = op.symbol();
    match op {
        B::Add => match (left, right) {
            (Value::Number(x), Value::Number(y)) => Ok(Value::Number(x + y)),
            (Value::String(x), Value::String(y)) => {
                let mut s = String::with_capacity(x.len() + y.len());
                s.push_str(x);
                s.push_str(y);
                Ok(Value::String(s.into()))
            }
            (Value::Number(_), _) => Err(op_error(sym, OperandSide::Right, "number", right)),
            (Value::String(_), _) => Err(op_error(sym, OperandSide::Right, "string", right)),
            _ => Err(op_error(sym, OperandSide::Left, "string or number", left)),
        },
        B::Sub | B::Mul | B::Div | B::Mod => match (left, right) {
            (Value::Number(x), Value::Number(y)) => Ok(Value::Number(match op {
                B::Sub => x - y,
                B::Mul => x * y,
                B::Div => x / y,
                B::Mod => x % y,
                _ => unreachable!(),
            })),
            (Value::Number(_), _) => Err(op_error(sym, OperandSide::Right, "number", right)),
            _ => Err(op_error(sym, OperandSide::Left, "number", left)),
        },
        B::Eq => Ok(Value::Bool(identical(left, right))),
        B::NotEq => Ok(Value::Bool(!identical(left, right))),
        B::Lt | B::Gt | B::LtEq | B::GtEq => match (left, right) {
            (Value::Number(x), Value::Number(y)) => Ok(Value::Bool(compare(op, x, y))),
            (Value::String(x), Value::String(y)) => Ok(Value::Bool(compare(op, x, y))),
            (Value::Number(_), _) => Err(op_error(sym, OperandSide::Right, "number", right)),
            (Value::String(_), _) => Err(op_error(sym, OperandSide::Right, "string", right)),
            _ => Err(op_error(sym, OperandSide::Left, "string or number", left)),
        },
    }
}

fn compare<T: PartialOrd>(op: crate::ast::BinaryOp, x: T, y: T) -> bool {
    use crate::ast::BinaryOp as B;
    match op {
        B::Lt => x < y,
        B::Gt => x > y,
        B::LtEq => x <= y,
        B::GtEq => x >= y,
        _ => unreachable!(),
    }
}

/// Apply a unary operator. `-` requires a number, `!` a boolean: Source has
/// no truthiness coercion.
pub fn apply_unary(op: crate::ast::UnaryOp, operand: &Value) -> Result<Value, OperandTypeError> {
    use crate::ast::UnaryOp as U;
    match (op, operand) {
        (U::Neg, Value::Number(x)) => Ok(Value::Number(-x)),
        (U::Neg, _) => Err(op_error("-", OperandSide::Only, "number", operand)),
        (U::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
        (U::Not, _) => Err(op_error("!", OperandSide::Only, "boolean", operand)),
    }
}

// ---------------------------------------------------------------------------
// Display
// ---------------------------------------------------------------------------

/// Format a number the way JavaScript does: integral values print without a
/// fraction, non-finite values print as `Infinity` / `NaN`.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity".to_string() } else { "-Infinity".to_string() }
    } else if n == n.trunc() && n.abs() < 1e21 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

/// Render a value for `display` and error messages. Strings are quoted
/// inside structures and at top level; cycle detection is by identity, so
/// self-referential pairs and arrays terminate with `...<circular>`.
pub fn stringify(value: &Value) -> String {
    let mut out = String::new();
    let mut on_path = HashSet::new();
    write_value(&mut out, value, &mut on_path);
    out
}

fn ref_key(value: &Value) -> Option<usize> {
    match value {
        Value::Pair(p) => Some(Rc::as_ptr(p) as usize),
        Value::Array(a) => Some(Rc::as_ptr(a) as *const u8 as usize),
        _ => None,
    }
}

fn write_value(out: &mut String, value: &Value, on_path: &mut HashSet<usize>) {
    if let Some(key) = ref_key(value) {
        if !on_path.insert(key) {
            out.push_str("...<circular>");
            return;
        }
        match value {
            Value::Pair(p) => {
                let cell = p.borrow();
                out.push('[');
                write_value(out, &cell.0, on_path);
                out.push_str(", ");
                write_value(out, &cell.1, on_path);
                out.push(']');
            }
            Value::Array(a) => {
                out.push('[');
                for (i, elem) in a.borrow().iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    write_value(out, elem, on_path);
                }
                out.push(']');
            }
            _ => unreachable!(),
        }
        on_path.remove(&key);
        return;
    }
    match value {
        Value::Undefined => out.push_str("undefined"),
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&format_number(*n)),
        Value::String(s) => {
            out.push('"');
            out.push_str(s);
            out.push('"');
        }
        Value::Closure(c) => match &*c.name.borrow() {
            Some(name) => {
                out.push_str("<function ");
                out.push_str(name);
                out.push('>');
            }
            None => out.push_str("<function>"),
        },
        Value::Builtin { name, .. } => {
            out.push_str("<builtin ");
            out.push_str(name);
            out.push('>');
        }
        Value::HostOpaque { id } => {
            out.push_str(&format!("<object {}>", id));
        }
        Value::Pair(_) | Value::Array(_) => unreachable!(),
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", stringify(self))
    }
}

// Debug goes through the cycle-safe renderer: deriving it would recurse
// forever on self-referential pairs and on closure/environment loops.
impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", stringify(self))
    }
}

impl fmt::Debug for Closure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.name.borrow();
        write!(
            f,
            "Closure({}/{})",
            name.as_deref().unwrap_or("<anonymous>"),
            self.params.len()
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
