//! Instruction tags consumed by the CSE machine.
//!
//! The control stack mixes AST nodes awaiting evaluation with these
//! instructions; an instruction encodes work that must happen after its
//! operand subexpressions have left their values on the stash. Each tag has
//! a fixed stash arity; the machine never pops more than
//! [`Instr::stash_arity`] values when executing it.

use std::rc::Rc;

use crate::ast::{BinaryOp, DeclKind, Expr, RcStr, SourceLoc, Stmt, UnaryOp};
use crate::environment::EnvRef;
use crate::value::Value;

use super::control::ControlItem;

/// Either kind of AST node, for instructions that re-enter evaluation.
#[derive(Debug, Clone)]
pub enum NodeRef {
    Expr(Rc<Expr>),
    Stmt(Rc<Stmt>),
}

#[derive(Debug, Clone)]
pub enum Instr {
    /// Apply a binary operator to the top two stash values.
    BinaryOp { op: BinaryOp, loc: SourceLoc },
    /// Apply a unary operator to the top stash value.
    UnaryOp { op: UnaryOp, loc: SourceLoc },
    /// Consume the test value and continue with one of two branches.
    /// A missing alternate leaves `undefined` as the branch value.
    Branch {
        consequent: NodeRef,
        alternate: Option<NodeRef>,
        loc: SourceLoc,
    },
    /// Discard the top of the stash.
    Pop,
    /// Call protocol: consume `arity` arguments and the callee beneath them.
    ApplyN { arity: usize, loc: SourceLoc },
    /// Restores the caller's environment when a function returns. Also the
    /// target of `Return` unwinding and the signal for tail positions.
    ReturnMarker { env: EnvRef },
    /// Unwind the control to the nearest `ReturnMarker`, executing
    /// environment bookkeeping on the way; the stash top is the return
    /// value.
    Return,
    /// Assign the stash top to a name; leaves the value on the stash.
    AssignTo { name: RcStr, loc: SourceLoc },
    /// Move a hoisted binding out of its dead zone, giving it the stash
    /// top as value; leaves `undefined` as the statement value.
    Define { name: RcStr, kind: DeclKind, loc: SourceLoc },
    /// Collect `count` stash values into a fresh array.
    ArrayLit { count: usize, loc: SourceLoc },
    /// Allocate a pair from the top two stash values.
    PairCons { loc: SourceLoc },
    /// Read `array[index]` from the top two stash values.
    ArrayAccess { loc: SourceLoc },
    /// Write `array[index] = value` from the top three stash values;
    /// leaves the assigned value.
    ArrayAssign { loc: SourceLoc },
    /// Loop head for `while`: consumes the test value and re-queues the
    /// body and itself while the test holds.
    WhileTest {
        test: Rc<Expr>,
        body: Rc<Stmt>,
        loc: SourceLoc,
    },
    /// Loop head for `for`: like `WhileTest` with an update expression run
    /// after each iteration.
    ForTest {
        test: Rc<Expr>,
        update: Option<Rc<Expr>>,
        body: Rc<Stmt>,
        loc: SourceLoc,
    },
    /// Make `env` the current environment (block entry, one step for the
    /// visualiser).
    EnvEnter { env: EnvRef },
    /// Restore `env` as the current environment (block exit).
    EnvLeave { env: EnvRef },
    /// Splice a saved control/stash snapshot back into the machine; how a
    /// suspended evaluation is resumed.
    Restore {
        control: Vec<ControlItem>,
        stash: Vec<Value>,
    },
}

impl Instr {
    /// Number of values this instruction consumes from the stash.
    pub fn stash_arity(&self) -> usize {
        match self {
            Instr::BinaryOp { .. } => 2,
            Instr::UnaryOp { .. } => 1,
            Instr::Branch { .. } => 1,
            Instr::Pop => 1,
            Instr::ApplyN { arity, .. } => arity + 1,
            Instr::ReturnMarker { .. } => 0,
            Instr::Return => 0,
            Instr::AssignTo { .. } => 1,
            Instr::Define { .. } => 1,
            Instr::ArrayLit { count, .. } => *count,
            Instr::PairCons { .. } => 2,
            Instr::ArrayAccess { .. } => 2,
            Instr::ArrayAssign { .. } => 3,
            Instr::WhileTest { .. } => 1,
            Instr::ForTest { .. } => 1,
            Instr::EnvEnter { .. } => 0,
            Instr::EnvLeave { .. } => 0,
            Instr::Restore { .. } => 0,
        }
    }

    /// Source location of the instruction, when it carries one.
    pub fn loc(&self) -> Option<&SourceLoc> {
        match self {
            Instr::BinaryOp { loc, .. }
            | Instr::UnaryOp { loc, .. }
            | Instr::Branch { loc, .. }
            | Instr::ApplyN { loc, .. }
            | Instr::AssignTo { loc, .. }
            | Instr::Define { loc, .. }
            | Instr::ArrayLit { loc, .. }
            | Instr::PairCons { loc }
            | Instr::ArrayAccess { loc }
            | Instr::ArrayAssign { loc }
            | Instr::WhileTest { loc, .. }
            | Instr::ForTest { loc, .. } => Some(loc),
            _ => None,
        }
    }
}
