//! Lexically scoped environment frames.
//!
//! Environments form a tree rooted at the global frame: every frame holds a
//! strong link to its parent, bindings in declaration order, and a heap of
//! the values allocated while the frame was current (ownership attribution
//! for the environment visualiser; it does not control lifetime).

use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::ast::{DeclKind, RcStr, SourceLoc};
use crate::value::Value;

pub type EnvRef = Rc<RefCell<Environment>>;

// ---------------------------------------------------------------------------
// Bindings
// ---------------------------------------------------------------------------

/// One slot in a frame. A binding exists from the moment its scope is
/// entered (hoisting) but is unreadable until the declaration statement has
/// run. That is the temporal dead zone, tracked by `declared`.
#[derive(Debug, Clone)]
pub struct Binding {
    pub kind: DeclKind,
    pub declared: bool,
    pub value: Value,
}

/// Why a lookup or assignment failed; the machine attaches the location and
/// converts this into the runtime error taxonomy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindingError {
    /// No frame in the chain declares the name.
    Undefined,
    /// The binding exists but its declaration has not run yet.
    Unassigned,
    /// Assignment to a `const` binding.
    ConstAssignment,
}

// ---------------------------------------------------------------------------
// Environment
// ---------------------------------------------------------------------------

pub struct Environment {
    pub id: u32,
    pub name: RcStr,
    pub parent: Option<EnvRef>,
    pub bindings: IndexMap<RcStr, Binding>,
    /// Values (pairs, arrays, closures) allocated while this frame was the
    /// current environment.
    pub heap: Vec<Value>,
    /// Call site of the application that created this frame, if any.
    pub call_site: Option<SourceLoc>,
}

// Summarised by hand: a derived impl would walk the heap, and heap values
// can reference this very frame through captured environments.
impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("parent", &self.parent.as_ref().map(|p| p.borrow().id))
            .field("bindings", &self.bindings.keys().collect::<Vec<_>>())
            .field("heap_len", &self.heap.len())
            .finish()
    }
}

impl Environment {
    /// Create a frame. Ids are handed out by the session so frames are
    /// totally ordered by creation.
    pub fn new(id: u32, name: RcStr, parent: Option<EnvRef>) -> EnvRef {
        Rc::new(RefCell::new(Environment {
            id,
            name,
            parent,
            bindings: IndexMap::new(),
            heap: Vec::new(),
            call_site: None,
        }))
    }

    pub fn with_call_site(
        id: u32,
        name: RcStr,
        parent: Option<EnvRef>,
        call_site: SourceLoc,
    ) -> EnvRef {
        let env = Environment::new(id, name, parent);
        env.borrow_mut().call_site = Some(call_site);
        env
    }

    /// Record an allocation in this frame's heap.
    pub fn record_allocation(&mut self, value: &Value) {
        self.heap.push(value.clone());
    }
}

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

/// Mark `name` as existing-but-undeclared in `env` (hoisting).
pub fn declare(env: &EnvRef, name: RcStr, kind: DeclKind) {
    env.borrow_mut().bindings.insert(
        name,
        Binding { kind, declared: false, value: Value::Undefined },
    );
}

/// Transition a hoisted binding to declared, giving it its initial value.
/// Inserts the binding if the name was never hoisted (parameters take this
/// path: they are born declared).
pub fn define(env: &EnvRef, name: RcStr, kind: DeclKind, value: Value) {
    env.borrow_mut().bindings.insert(name, Binding { kind, declared: true, value });
}

/// Read a name, walking the parent chain from `env` to the root.
pub fn lookup(env: &EnvRef, name: &str) -> Result<Value, BindingError> {
    let mut current = env.clone();
    loop {
        let next = {
            let frame = current.borrow();
            if let Some(binding) = frame.bindings.get(name) {
                if !binding.declared {
                    return Err(BindingError::Unassigned);
                }
                return Ok(binding.value.clone());
            }
            frame.parent.clone()
        };
        match next {
            Some(parent) => current = parent,
            None => return Err(BindingError::Undefined),
        }
    }
}

/// Assign to the nearest binding of `name`. Fails on `const` bindings and on
/// bindings whose declaration has not run yet.
pub fn assign(env: &EnvRef, name: &str, value: Value) -> Result<(), BindingError> {
    let mut current = env.clone();
    loop {
        let next = {
            let mut frame = current.borrow_mut();
            if let Some(binding) = frame.bindings.get_mut(name) {
                if !binding.declared {
                    return Err(BindingError::Unassigned);
                }
                if binding.kind == DeclKind::Const {
                    return Err(BindingError::ConstAssignment);
                }
                binding.value = value;
                return Ok(());
            }
            frame.parent.clone()
        };
        match next {
            Some(parent) => current = parent,
            None => return Err(BindingError::Undefined),
        }
    }
}

/// Length of the parent chain from `env` to the root. The chain is a tree
/// by construction; this is used by tests and debug assertions to confirm
/// it stays finite.
pub fn chain_depth(env: &EnvRef) -> usize {
    let mut depth = 0;
    let mut current = env.clone();
    loop {
        let next = current.borrow().parent.clone();
        match next {
            Some(parent) => {
                depth += 1;
                current = parent;
            }
            None => return depth,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
