//! The control stack and the stash.
//!
//! Both are strict LIFO stacks. The control holds the future of the
//! computation: AST nodes still to be evaluated, interleaved with
//! instructions; the stash holds operand values for pending instructions.

use std::rc::Rc;

use crate::ast::{Expr, SourceLoc, Stmt};
use crate::environment::EnvRef;
use crate::value::Value;

use super::instruction::{Instr, NodeRef};

// ---------------------------------------------------------------------------
// Control
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum ControlItem {
    Expr(Rc<Expr>),
    Stmt(Rc<Stmt>),
    Instr(Instr),
}

impl ControlItem {
    /// Best-known source location, for error attribution and interrupts.
    pub fn loc(&self) -> SourceLoc {
        match self {
            ControlItem::Expr(e) => e.loc().clone(),
            ControlItem::Stmt(s) => s.loc().clone(),
            ControlItem::Instr(i) => i.loc().cloned().unwrap_or_default(),
        }
    }
}

impl From<NodeRef> for ControlItem {
    fn from(node: NodeRef) -> Self {
        match node {
            NodeRef::Expr(e) => ControlItem::Expr(e),
            NodeRef::Stmt(s) => ControlItem::Stmt(s),
        }
    }
}

#[derive(Debug, Default)]
pub struct Control {
    items: Vec<ControlItem>,
}

impl Control {
    pub fn new() -> Self {
        Control { items: Vec::with_capacity(64) }
    }

    pub fn push(&mut self, item: ControlItem) {
        self.items.push(item);
    }

    pub fn push_expr(&mut self, expr: Rc<Expr>) {
        self.items.push(ControlItem::Expr(expr));
    }

    pub fn push_stmt(&mut self, stmt: Rc<Stmt>) {
        self.items.push(ControlItem::Stmt(stmt));
    }

    pub fn push_instr(&mut self, instr: Instr) {
        self.items.push(ControlItem::Instr(instr));
    }

    pub fn pop(&mut self) -> Option<ControlItem> {
        self.items.pop()
    }

    pub fn peek(&self) -> Option<&ControlItem> {
        self.items.last()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Drain into a snapshot vector, bottom first (for `Restore`).
    pub fn into_items(self) -> Vec<ControlItem> {
        self.items
    }

    /// Splice a snapshot back, preserving its internal order.
    pub fn extend(&mut self, items: Vec<ControlItem>) {
        self.items.extend(items);
    }

    /// True when the next item to pop is a return marker, the signal that
    /// a pending call is in tail position.
    pub fn next_is_return_marker(&self) -> bool {
        matches!(
            self.peek(),
            Some(ControlItem::Instr(Instr::ReturnMarker { .. }))
                | Some(ControlItem::Instr(Instr::Return))
        )
    }
}

// ---------------------------------------------------------------------------
// Stash
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct Stash {
    values: Vec<Value>,
}

impl Stash {
    pub fn new() -> Self {
        Stash { values: Vec::with_capacity(16) }
    }

    pub fn push(&mut self, value: Value) {
        self.values.push(value);
    }

    pub fn pop(&mut self) -> Option<Value> {
        self.values.pop()
    }

    pub fn peek(&self) -> Option<&Value> {
        self.values.last()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    pub fn extend(&mut self, values: Vec<Value>) {
        self.values.extend(values);
    }
}

// ---------------------------------------------------------------------------
// Suspended machine state
// ---------------------------------------------------------------------------

/// The live `(control, stash, environment)` triple of an evaluation. Held
/// by the session between a suspension and the matching resume.
#[derive(Debug)]
pub struct MachineState {
    pub control: Control,
    pub stash: Stash,
    pub env: EnvRef,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::build;
    use crate::environment::Environment;

    #[test]
    fn control_is_lifo() {
        let mut control = Control::new();
        control.push_expr(build::number(1.0));
        control.push_expr(build::number(2.0));
        match control.pop() {
            Some(ControlItem::Expr(e)) => assert_eq!(&*e, &*build::number(2.0)),
            other => panic!("unexpected item: {:?}", other),
        }
        assert_eq!(control.len(), 1);
    }

    #[test]
    fn tail_position_detected_through_markers() {
        let env = Environment::new(0, "global".into(), None);
        let mut control = Control::new();
        assert!(!control.next_is_return_marker());
        control.push_instr(Instr::ReturnMarker { env });
        assert!(control.next_is_return_marker());
        control.pop();
        control.push_instr(Instr::Return);
        assert!(control.next_is_return_marker());
    }

    #[test]
    fn snapshot_round_trips() {
        let mut control = Control::new();
        control.push_expr(build::number(1.0));
        control.push_instr(Instr::Pop);
        let items = control.into_items();
        let mut restored = Control::new();
        restored.extend(items);
        assert!(matches!(restored.pop(), Some(ControlItem::Instr(Instr::Pop))));
        assert!(matches!(restored.pop(), Some(ControlItem::Expr(_))));
    }

    #[test]
    fn stash_pops_in_reverse_order() {
        let mut stash = Stash::new();
        stash.push(Value::Number(1.0));
        stash.push(Value::Number(2.0));
        assert_eq!(stash.pop(), Some(Value::Number(2.0)));
        assert_eq!(stash.pop(), Some(Value::Number(1.0)));
        assert_eq!(stash.pop(), None);
    }
}
