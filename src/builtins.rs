//! Builtin functions and the host interface.
//!
//! The evaluator performs no I/O of its own: every observable side effect
//! goes through [`HostHooks`], which the embedder supplies when creating a
//! session. Builtins are registered in a [`BuiltinRegistry`] and installed
//! into the global environment as `const` bindings; the registry index of a
//! builtin is also its SVM primitive id.

use std::collections::HashMap;

use crate::ast::{DeclKind, RcStr, SourceLoc};
use crate::environment::{define, EnvRef};
use crate::error::{RuntimeError, RuntimeErrorKind};
use crate::value::{identical, stringify, Value};

// ---------------------------------------------------------------------------
// Host hooks
// ---------------------------------------------------------------------------

/// Side-effect surface provided by the host (browser frontend, test harness,
/// CLI wrapper). These are the only channels the evaluator writes to.
pub trait HostHooks {
    fn raw_display(&mut self, text: &str);
    fn prompt(&mut self, message: &str) -> Option<String>;
    fn alert(&mut self, message: &str);
    fn visualise_list(&mut self, value: &Value);
}

/// Host that writes displays to stdout and declines prompts.
#[derive(Debug, Default)]
pub struct StdoutHost;

impl HostHooks for StdoutHost {
    fn raw_display(&mut self, text: &str) {
        println!("{}", text);
    }

    fn prompt(&mut self, _message: &str) -> Option<String> {
        None
    }

    fn alert(&mut self, message: &str) {
        println!("{}", message);
    }

    fn visualise_list(&mut self, _value: &Value) {}
}

/// Host that records everything, for tests and embedders that capture
/// output instead of printing it.
#[derive(Debug, Default)]
pub struct RecordingHost {
    pub displayed: Vec<String>,
    pub alerts: Vec<String>,
    /// Responses handed out to successive `prompt` calls.
    pub prompt_responses: Vec<Option<String>>,
}

impl HostHooks for RecordingHost {
    fn raw_display(&mut self, text: &str) {
        self.displayed.push(text.to_string());
    }

    fn prompt(&mut self, _message: &str) -> Option<String> {
        if self.prompt_responses.is_empty() {
            None
        } else {
            self.prompt_responses.remove(0)
        }
    }

    fn alert(&mut self, message: &str) {
        self.alerts.push(message.to_string());
    }

    fn visualise_list(&mut self, _value: &Value) {}
}

// Shared handle: lets an embedder keep a reference to the recorder after
// handing the session its hooks.
impl HostHooks for std::rc::Rc<std::cell::RefCell<RecordingHost>> {
    fn raw_display(&mut self, text: &str) {
        self.borrow_mut().raw_display(text);
    }

    fn prompt(&mut self, message: &str) -> Option<String> {
        self.borrow_mut().prompt(message)
    }

    fn alert(&mut self, message: &str) {
        self.borrow_mut().alert(message);
    }

    fn visualise_list(&mut self, value: &Value) {
        self.borrow_mut().visualise_list(value);
    }
}

// ---------------------------------------------------------------------------
// Invocation context
// ---------------------------------------------------------------------------

/// What a builtin sees when invoked: the host hooks, the call site, and the
/// frame that owns allocations made during the call (absent when running
/// compiled code, which does not attribute allocations).
pub struct HostContext<'a> {
    pub hooks: &'a mut dyn HostHooks,
    pub loc: SourceLoc,
    pub frame: Option<&'a EnvRef>,
}

impl<'a> HostContext<'a> {
    pub fn alloc_pair(&mut self, head: Value, tail: Value) -> Value {
        let value = Value::pair(head, tail);
        if let Some(env) = self.frame {
            env.borrow_mut().record_allocation(&value);
        }
        value
    }

    pub fn alloc_array(&mut self, elements: Vec<Value>) -> Value {
        let value = Value::array(elements);
        if let Some(env) = self.frame {
            env.borrow_mut().record_allocation(&value);
        }
        value
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Failure reported by a builtin; wrapped into the runtime error taxonomy
/// with the call-site location.
#[derive(Debug, Clone)]
pub struct BuiltinError(pub String);

pub type BuiltinImpl = fn(&mut HostContext, &[Value]) -> Result<Value, BuiltinError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinKind {
    Pure,
    SideEffectful,
}

/// Builtins the CSE machine lowers to a dedicated instruction instead of a
/// host call, so allocation shows up as its own evaluation step. The SVM
/// compiler maps the same entries to dedicated opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoweredOp {
    PairCons,
}

pub struct Builtin {
    pub name: RcStr,
    /// Expected argument count (None = variadic, checked by the impl).
    pub arity: Option<u8>,
    pub kind: BuiltinKind,
    pub lowered: Option<LoweredOp>,
    pub func: BuiltinImpl,
}

/// Registry of builtins callable from both machines. Index order is the
/// primitive id space, fixed for the session's lifetime once installed.
pub struct BuiltinRegistry {
    entries: Vec<Builtin>,
    name_index: HashMap<RcStr, u16>,
}

impl Default for BuiltinRegistry {
    fn default() -> Self {
        Self::core()
    }
}

impl BuiltinRegistry {
    pub fn new() -> Self {
        BuiltinRegistry { entries: Vec::new(), name_index: HashMap::new() }
    }

    /// The core list and display machinery the language ships at level 2+.
    pub fn core() -> Self {
        let mut r = Self::new();
        r.register_lowered("pair", Some(2), BuiltinKind::Pure, LoweredOp::PairCons, bi_pair);
        r.register("head", Some(1), BuiltinKind::Pure, bi_head);
        r.register("tail", Some(1), BuiltinKind::Pure, bi_tail);
        r.register("set_head", Some(2), BuiltinKind::SideEffectful, bi_set_head);
        r.register("set_tail", Some(2), BuiltinKind::SideEffectful, bi_set_tail);
        r.register("is_null", Some(1), BuiltinKind::Pure, bi_is_null);
        r.register("is_pair", Some(1), BuiltinKind::Pure, bi_is_pair);
        r.register("list", None, BuiltinKind::Pure, bi_list);
        r.register("length", Some(1), BuiltinKind::Pure, bi_length);
        r.register("display", None, BuiltinKind::SideEffectful, bi_display);
        r.register("error", None, BuiltinKind::SideEffectful, bi_error);
        r.register("stringify", Some(1), BuiltinKind::Pure, bi_stringify);
        r.register("math_floor", Some(1), BuiltinKind::Pure, bi_math_floor);
        r.register("prompt", Some(1), BuiltinKind::SideEffectful, bi_prompt);
        r.register("alert", Some(1), BuiltinKind::SideEffectful, bi_alert);
        r.register("draw_data", None, BuiltinKind::SideEffectful, bi_draw_data);
        r
    }

    pub fn register(
        &mut self,
        name: &str,
        arity: Option<u8>,
        kind: BuiltinKind,
        func: BuiltinImpl,
    ) -> u16 {
        self.push(Builtin { name: name.into(), arity, kind, lowered: None, func })
    }

    pub fn register_lowered(
        &mut self,
        name: &str,
        arity: Option<u8>,
        kind: BuiltinKind,
        lowered: LoweredOp,
        func: BuiltinImpl,
    ) -> u16 {
        self.push(Builtin { name: name.into(), arity, kind, lowered: Some(lowered), func })
    }

    fn push(&mut self, builtin: Builtin) -> u16 {
        let id = self.entries.len() as u16;
        self.name_index.insert(builtin.name.clone(), id);
        self.entries.push(builtin);
        id
    }

    pub fn lookup(&self, name: &str) -> Option<u16> {
        self.name_index.get(name).copied()
    }

    pub fn get(&self, id: u16) -> Option<&Builtin> {
        self.entries.get(id as usize)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Install every builtin into `env` as a declared `const` binding.
    pub fn install_globals(&self, env: &EnvRef) {
        for (id, builtin) in self.entries.iter().enumerate() {
            define(
                env,
                builtin.name.clone(),
                DeclKind::Const,
                Value::Builtin {
                    name: builtin.name.clone(),
                    arity: builtin.arity,
                    id: id as u16,
                },
            );
        }
    }

    /// Invoke a builtin, checking its declared arity and wrapping host
    /// failures with the call-site location.
    pub fn invoke(
        &self,
        id: u16,
        ctx: &mut HostContext,
        args: &[Value],
    ) -> Result<Value, RuntimeError> {
        let builtin = self.get(id).ok_or_else(|| {
            RuntimeError::new(
                RuntimeErrorKind::Internal { message: "unknown builtin id" },
                ctx.loc.clone(),
            )
        })?;
        if let Some(arity) = builtin.arity {
            if args.len() != arity as usize {
                return Err(RuntimeError::new(
                    RuntimeErrorKind::ArityMismatch {
                        name: Some(builtin.name.clone()),
                        expected: arity as usize,
                        got: args.len(),
                    },
                    ctx.loc.clone(),
                ));
            }
        }
        (builtin.func)(ctx, args).map_err(|BuiltinError(message)| {
            RuntimeError::new(
                RuntimeErrorKind::BuiltinFailure { name: builtin.name.clone(), message },
                ctx.loc.clone(),
            )
        })
    }
}

// ---------------------------------------------------------------------------
// Core builtin implementations
// ---------------------------------------------------------------------------

fn expect_pair(name: &str, v: &Value) -> Result<crate::value::PairRef, BuiltinError> {
    match v {
        Value::Pair(p) => Ok(p.clone()),
        other => Err(BuiltinError(format!("{} expects a pair, got {}", name, other.type_name()))),
    }
}

fn bi_pair(ctx: &mut HostContext, args: &[Value]) -> Result<Value, BuiltinError> {
    Ok(ctx.alloc_pair(args[0].clone(), args[1].clone()))
}

fn bi_head(_ctx: &mut HostContext, args: &[Value]) -> Result<Value, BuiltinError> {
    Ok(expect_pair("head", &args[0])?.borrow().0.clone())
}

fn bi_tail(_ctx: &mut HostContext, args: &[Value]) -> Result<Value, BuiltinError> {
    Ok(expect_pair("tail", &args[0])?.borrow().1.clone())
}

fn bi_set_head(_ctx: &mut HostContext, args: &[Value]) -> Result<Value, BuiltinError> {
    expect_pair("set_head", &args[0])?.borrow_mut().0 = args[1].clone();
    Ok(Value::Undefined)
}

fn bi_set_tail(_ctx: &mut HostContext, args: &[Value]) -> Result<Value, BuiltinError> {
    expect_pair("set_tail", &args[0])?.borrow_mut().1 = args[1].clone();
    Ok(Value::Undefined)
}

fn bi_is_null(_ctx: &mut HostContext, args: &[Value]) -> Result<Value, BuiltinError> {
    Ok(Value::Bool(identical(&args[0], &Value::Null)))
}

fn bi_is_pair(_ctx: &mut HostContext, args: &[Value]) -> Result<Value, BuiltinError> {
    Ok(Value::Bool(matches!(args[0], Value::Pair(_))))
}

fn bi_list(ctx: &mut HostContext, args: &[Value]) -> Result<Value, BuiltinError> {
    let mut list = Value::Null;
    for arg in args.iter().rev() {
        list = ctx.alloc_pair(arg.clone(), list);
    }
    Ok(list)
}

fn bi_length(_ctx: &mut HostContext, args: &[Value]) -> Result<Value, BuiltinError> {
    let mut len = 0.0;
    let mut current = args[0].clone();
    loop {
        match current {
            Value::Null => return Ok(Value::Number(len)),
            Value::Pair(p) => {
                len += 1.0;
                let next = p.borrow().1.clone();
                current = next;
            }
            other => {
                return Err(BuiltinError(format!(
                    "length expects a list, got {}",
                    other.type_name()
                )))
            }
        }
    }
}

/// `display(value)` or `display(value, prepend)`; returns the value.
fn bi_display(ctx: &mut HostContext, args: &[Value]) -> Result<Value, BuiltinError> {
    match args {
        [value] => {
            let text = stringify(value);
            ctx.hooks.raw_display(&text);
            Ok(value.clone())
        }
        [value, Value::String(prepend)] => {
            let text = format!("{} {}", prepend, stringify(value));
            ctx.hooks.raw_display(&text);
            Ok(value.clone())
        }
        [_, other] => Err(BuiltinError(format!(
            "display expects a string as second argument, got {}",
            other.type_name()
        ))),
        _ => Err(BuiltinError(format!("display expects 1 or 2 arguments, got {}", args.len()))),
    }
}

fn bi_error(_ctx: &mut HostContext, args: &[Value]) -> Result<Value, BuiltinError> {
    let message = args.iter().map(stringify).collect::<Vec<_>>().join(" ");
    Err(BuiltinError(message))
}

fn bi_stringify(_ctx: &mut HostContext, args: &[Value]) -> Result<Value, BuiltinError> {
    Ok(Value::String(stringify(&args[0]).into()))
}

fn bi_math_floor(_ctx: &mut HostContext, args: &[Value]) -> Result<Value, BuiltinError> {
    match &args[0] {
        Value::Number(n) => Ok(Value::Number(n.floor())),
        other => {
            Err(BuiltinError(format!("math_floor expects a number, got {}", other.type_name())))
        }
    }
}

fn bi_prompt(ctx: &mut HostContext, args: &[Value]) -> Result<Value, BuiltinError> {
    let message = match &args[0] {
        Value::String(s) => s.to_string(),
        other => stringify(other),
    };
    match ctx.hooks.prompt(&message) {
        Some(reply) => Ok(Value::String(reply.into())),
        None => Ok(Value::Null),
    }
}

fn bi_alert(ctx: &mut HostContext, args: &[Value]) -> Result<Value, BuiltinError> {
    let message = match &args[0] {
        Value::String(s) => s.to_string(),
        other => stringify(other),
    };
    ctx.hooks.alert(&message);
    Ok(Value::Undefined)
}

/// Forward list structures to the host visualiser; returns the first
/// argument so calls compose.
fn bi_draw_data(ctx: &mut HostContext, args: &[Value]) -> Result<Value, BuiltinError> {
    if args.is_empty() {
        return Err(BuiltinError("draw_data expects at least 1 argument".to_string()));
    }
    for arg in args {
        ctx.hooks.visualise_list(arg);
    }
    Ok(args[0].clone())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
