//! The CSE machine: an explicit-control evaluator.
//!
//! Evaluation never recurses through the host call stack. The control stack
//! holds the entire future of the computation, which is what makes
//! suspension, resumption, breakpoints, interrupts and bounded tail calls
//! possible: all of them act between two control pops.

use std::rc::Rc;
use std::time::{Duration, Instant};

use crate::ast::{
    declared_names, DeclKind, Expr, FnBody, ForInit, Lit, LogicalOp, Program, RcStr, SourceLoc,
    Stmt,
};
use crate::builtins::{BuiltinRegistry, HostContext, LoweredOp};
use crate::environment::{
    assign, declare, define, BindingError, EnvRef, Environment,
};
use crate::error::{RuntimeError, RuntimeErrorKind};
use crate::session::{EvalResult, Session, SessionStatus};
use crate::value::{apply_binary, apply_unary, stringify, Closure, Value};

use super::control::{Control, ControlItem, MachineState, Stash};
use super::instruction::{Instr, NodeRef};

/// Control depth guard; beyond this the program is reported as a stack
/// overflow rather than aborting the process.
const CONTROL_DEPTH_LIMIT: usize = 65_536;

/// Wall-clock budget is checked once per this many steps. Power of two.
const TIME_CHECK_INTERVAL: u64 = 1_024;

/// One-shot growth factor applied when the embedder asked for a second
/// chance instead of a timeout.
const TIMEOUT_EXTENSION_FACTOR: u32 = 10;

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Evaluate a program in the session, from the beginning.
pub(crate) fn evaluate(session: &mut Session, program: &Program) -> EvalResult {
    session.machine = None;
    session.status = SessionStatus::Running;
    let program_env = Environment::new(
        session.fresh_env_id(),
        "program".into(),
        Some(session.global_env.clone()),
    );
    for (name, kind) in declared_names(&program.body) {
        declare(&program_env, name, kind);
    }
    let mut machine = Machine::new(session, program_env);
    machine.push_stmt_seq(&program.body);
    machine.run()
}

/// Continue a suspended evaluation from exactly where it stopped.
pub(crate) fn resume(session: &mut Session) -> EvalResult {
    match session.machine.take() {
        Some(state) => {
            session.status = SessionStatus::Running;
            let mut machine = Machine::new(session, state.env);
            machine.control.push_instr(Instr::Restore {
                control: state.control.into_items(),
                stash: state.stash.into_values(),
            });
            machine.run()
        }
        None => {
            if session.status != SessionStatus::Errored {
                session.errors.push(
                    RuntimeError::new(
                        RuntimeErrorKind::Internal { message: "no suspended evaluation to resume" },
                        SourceLoc::unknown(),
                    )
                    .into(),
                );
                session.status = SessionStatus::Errored;
            }
            EvalResult::Error { errors: session.errors.clone() }
        }
    }
}

// ---------------------------------------------------------------------------
// Machine
// ---------------------------------------------------------------------------

struct Machine<'a> {
    session: &'a mut Session,
    control: Control,
    stash: Stash,
    env: EnvRef,
    registry: Rc<BuiltinRegistry>,
    /// Synthetic `return;` appended to block-bodied functions so falling
    /// off the end yields `undefined`.
    implicit_return: Rc<Stmt>,
    lit_true: Rc<Expr>,
    lit_false: Rc<Expr>,
}

impl<'a> Machine<'a> {
    fn new(session: &'a mut Session, env: EnvRef) -> Self {
        let registry = session.builtins.clone();
        Machine {
            session,
            control: Control::new(),
            stash: Stash::new(),
            env,
            registry,
            implicit_return: Rc::new(Stmt::Return {
                argument: None,
                loc: SourceLoc::unknown(),
            }),
            lit_true: Rc::new(Expr::Literal { value: Lit::Bool(true), loc: SourceLoc::unknown() }),
            lit_false: Rc::new(Expr::Literal {
                value: Lit::Bool(false),
                loc: SourceLoc::unknown(),
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Step loop
    // -----------------------------------------------------------------------

    fn run(mut self) -> EvalResult {
        let started = Instant::now();
        let mut budget = Duration::from_millis(self.session.options.original_max_exec_time);
        let mut budget_extended = false;
        let mut steps_this_run: u64 = 0;

        loop {
            if self.session.take_interrupt() {
                let loc = self.current_loc();
                return self.fail(RuntimeError::new(RuntimeErrorKind::Interrupted, loc));
            }

            if (steps_this_run & (TIME_CHECK_INTERVAL - 1)) == 0 && started.elapsed() > budget {
                if self.session.options.should_increase_evaluation_timeout && !budget_extended {
                    budget_extended = true;
                    budget *= TIMEOUT_EXTENSION_FACTOR;
                } else {
                    let loc = self.current_loc();
                    return self.fail(RuntimeError::new(
                        RuntimeErrorKind::Timeout { after_ms: budget.as_millis() },
                        loc,
                    ));
                }
            }

            if self.control.is_empty() {
                let value = self.stash.pop().unwrap_or(Value::Undefined);
                self.session.status = SessionStatus::Finished;
                self.session.machine = None;
                return EvalResult::Finished { value };
            }

            // Suspension points, in priority order: explicit breakpoints,
            // the per-run step budget, the stepper's total-step target.
            let step_index = self.session.steps;
            if self.session.breakpoints.contains(&step_index)
                && self.session.last_break_at != Some(step_index)
            {
                self.session.last_break_at = Some(step_index);
                return self.suspend();
            }
            let limit = self.session.options.step_limit;
            if limit > 0 && steps_this_run >= limit {
                if self.session.options.throw_infinite_loops {
                    let loc = self.current_loc();
                    return self
                        .fail(RuntimeError::new(RuntimeErrorKind::PotentialInfiniteLoop, loc));
                }
                return self.suspend();
            }
            let env_steps = self.session.options.env_steps;
            if env_steps >= 0 && self.session.steps >= env_steps as u64 {
                return self.suspend();
            }

            let item = match self.control.pop() {
                Some(item) => item,
                None => continue,
            };
            self.session.steps += 1;
            steps_this_run += 1;

            if let Err(err) = self.dispatch(item) {
                return self.fail(err);
            }

            if self.control.len() > CONTROL_DEPTH_LIMIT {
                let loc = self.current_loc();
                return self.fail(RuntimeError::new(RuntimeErrorKind::StackOverflow, loc));
            }
            if self.control.len() > self.session.max_control_depth {
                self.session.max_control_depth = self.control.len();
            }
        }
    }

    fn suspend(self) -> EvalResult {
        self.session.status = SessionStatus::Suspended;
        self.session.machine = Some(MachineState {
            control: self.control,
            stash: self.stash,
            env: self.env,
        });
        EvalResult::Suspended
    }

    /// Abort the evaluation: unwind control and stash to empty, log the
    /// error, leave the session inspectable but unresumable.
    fn fail(mut self, error: RuntimeError) -> EvalResult {
        self.control.clear();
        self.stash.clear();
        self.session.errors.push(error.into());
        self.session.status = SessionStatus::Errored;
        self.session.machine = None;
        EvalResult::Error { errors: self.session.errors.clone() }
    }

    fn current_loc(&self) -> SourceLoc {
        self.control.peek().map(|item| item.loc()).unwrap_or_default()
    }

    // -----------------------------------------------------------------------
    // Dispatch
    // -----------------------------------------------------------------------

    fn dispatch(&mut self, item: ControlItem) -> Result<(), RuntimeError> {
        match item {
            ControlItem::Expr(expr) => self.dispatch_expr(expr),
            ControlItem::Stmt(stmt) => self.dispatch_stmt(stmt),
            ControlItem::Instr(instr) => self.dispatch_instr(instr),
        }
    }

    fn dispatch_expr(&mut self, expr: Rc<Expr>) -> Result<(), RuntimeError> {
        match &*expr {
            Expr::Literal { value, .. } => {
                self.stash.push(lit_value(value));
            }
            Expr::Identifier { name, loc } => {
                let value = crate::environment::lookup(&self.env, name)
                    .map_err(|e| binding_error(e, name, loc))?;
                self.stash.push(value);
            }
            Expr::Binary { op, left, right, loc } => {
                self.control.push_instr(Instr::BinaryOp { op: *op, loc: loc.clone() });
                self.control.push_expr(right.clone());
                self.control.push_expr(left.clone());
            }
            // Short-circuit: `a && b` is `a ? b : false`, `a || b` is
            // `a ? true : b`.
            Expr::Logical { op, left, right, loc } => {
                let (consequent, alternate) = match op {
                    LogicalOp::And => (right.clone(), self.lit_false.clone()),
                    LogicalOp::Or => (self.lit_true.clone(), right.clone()),
                };
                self.control.push_instr(Instr::Branch {
                    consequent: NodeRef::Expr(consequent),
                    alternate: Some(NodeRef::Expr(alternate)),
                    loc: loc.clone(),
                });
                self.control.push_expr(left.clone());
            }
            Expr::Unary { op, argument, loc } => {
                self.control.push_instr(Instr::UnaryOp { op: *op, loc: loc.clone() });
                self.control.push_expr(argument.clone());
            }
            Expr::Conditional { test, consequent, alternate, loc } => {
                self.control.push_instr(Instr::Branch {
                    consequent: NodeRef::Expr(consequent.clone()),
                    alternate: Some(NodeRef::Expr(alternate.clone())),
                    loc: loc.clone(),
                });
                self.control.push_expr(test.clone());
            }
            Expr::Call { callee, arguments, loc } => {
                self.control
                    .push_instr(Instr::ApplyN { arity: arguments.len(), loc: loc.clone() });
                for arg in arguments.iter().rev() {
                    self.control.push_expr(arg.clone());
                }
                self.control.push_expr(callee.clone());
            }
            Expr::Function { params, body, name, loc } => {
                let closure = self.make_closure(params, body.clone(), name.clone(), loc);
                self.stash.push(closure);
            }
            Expr::Assignment { name, value, loc } => {
                self.control.push_instr(Instr::AssignTo { name: name.clone(), loc: loc.clone() });
                self.control.push_expr(value.clone());
            }
            Expr::ArrayAssignment { array, index, value, loc } => {
                self.control.push_instr(Instr::ArrayAssign { loc: loc.clone() });
                self.control.push_expr(value.clone());
                self.control.push_expr(index.clone());
                self.control.push_expr(array.clone());
            }
            Expr::ArrayLiteral { elements, loc } => {
                self.control
                    .push_instr(Instr::ArrayLit { count: elements.len(), loc: loc.clone() });
                for element in elements.iter().rev() {
                    self.control.push_expr(element.clone());
                }
            }
            Expr::Member { array, index, loc } => {
                self.control.push_instr(Instr::ArrayAccess { loc: loc.clone() });
                self.control.push_expr(index.clone());
                self.control.push_expr(array.clone());
            }
        }
        Ok(())
    }

    fn dispatch_stmt(&mut self, stmt: Rc<Stmt>) -> Result<(), RuntimeError> {
        match &*stmt {
            Stmt::Expression { expression, .. } => {
                self.control.push_expr(expression.clone());
            }
            Stmt::Declaration { kind, name, init, loc } => {
                self.control.push_instr(Instr::Define {
                    name: name.clone(),
                    kind: *kind,
                    loc: loc.clone(),
                });
                self.control.push_expr(init.clone());
            }
            Stmt::FunctionDeclaration { name, params, body, loc } => {
                let closure = self.make_closure(
                    params,
                    FnBody::Block(body.clone()),
                    Some(name.clone()),
                    loc,
                );
                self.stash.push(closure);
                self.control.push_instr(Instr::Define {
                    name: name.clone(),
                    kind: DeclKind::Const,
                    loc: loc.clone(),
                });
            }
            Stmt::Block { body, .. } => {
                self.push_block(body);
            }
            Stmt::Return { argument, .. } => match argument {
                Some(expr) => {
                    self.control.push_instr(Instr::Return);
                    self.control.push_expr(expr.clone());
                }
                None => {
                    self.stash.push(Value::Undefined);
                    self.control.push_instr(Instr::Return);
                }
            },
            Stmt::If { test, consequent, alternate, loc } => {
                self.control.push_instr(Instr::Branch {
                    consequent: NodeRef::Stmt(consequent.clone()),
                    alternate: alternate.clone().map(NodeRef::Stmt),
                    loc: loc.clone(),
                });
                self.control.push_expr(test.clone());
            }
            Stmt::While { test, body, loc } => {
                self.control.push_instr(Instr::WhileTest {
                    test: test.clone(),
                    body: body.clone(),
                    loc: loc.clone(),
                });
                self.control.push_expr(test.clone());
            }
            Stmt::For { init, test, update, body, loc } => {
                let test_expr = test.clone().unwrap_or_else(|| self.lit_true.clone());
                let head = Instr::ForTest {
                    test: test_expr.clone(),
                    update: update.clone(),
                    body: body.clone(),
                    loc: loc.clone(),
                };
                match init {
                    Some(ForInit::Declaration { kind, name, init }) => {
                        // The loop variable lives in its own frame for the
                        // whole loop.
                        let saved = self.env.clone();
                        let loop_env = Environment::new(
                            self.session.fresh_env_id(),
                            "for loop".into(),
                            Some(saved.clone()),
                        );
                        declare(&loop_env, name.clone(), *kind);
                        self.control.push_instr(Instr::EnvLeave { env: saved });
                        self.control.push_instr(head);
                        self.control.push_expr(test_expr);
                        self.control.push_instr(Instr::Pop);
                        self.control.push_instr(Instr::Define {
                            name: name.clone(),
                            kind: *kind,
                            loc: loc.clone(),
                        });
                        self.control.push_expr(init.clone());
                        self.control.push_instr(Instr::EnvEnter { env: loop_env });
                    }
                    Some(ForInit::Expression(init)) => {
                        self.control.push_instr(head);
                        self.control.push_expr(test_expr);
                        self.control.push_instr(Instr::Pop);
                        self.control.push_expr(init.clone());
                    }
                    None => {
                        self.control.push_instr(head);
                        self.control.push_expr(test_expr);
                    }
                }
            }
            Stmt::Sequence { body, .. } => {
                self.push_stmt_seq(body);
            }
        }
        Ok(())
    }

    fn dispatch_instr(&mut self, instr: Instr) -> Result<(), RuntimeError> {
        match instr {
            Instr::BinaryOp { op, loc } => {
                let (right, left) = self.pop2(&loc)?;
                let result = apply_binary(op, &left, &right)
                    .map_err(|e| RuntimeError::from_operand_type(e, loc))?;
                self.stash.push(result);
            }
            Instr::UnaryOp { op, loc } => {
                let operand = self.pop1(&loc)?;
                let result = apply_unary(op, &operand)
                    .map_err(|e| RuntimeError::from_operand_type(e, loc))?;
                self.stash.push(result);
            }
            Instr::Branch { consequent, alternate, loc } => {
                match self.pop1(&loc)? {
                    Value::Bool(true) => self.control.push(consequent.into()),
                    Value::Bool(false) => match alternate {
                        Some(alt) => self.control.push(alt.into()),
                        None => self.stash.push(Value::Undefined),
                    },
                    other => {
                        return Err(RuntimeError::new(
                            RuntimeErrorKind::ConditionType { got: other.type_name() },
                            loc,
                        ))
                    }
                }
            }
            Instr::Pop => {
                self.pop1(&SourceLoc::unknown())?;
            }
            Instr::ApplyN { arity, loc } => {
                self.apply(arity, loc)?;
            }
            Instr::ReturnMarker { env } => {
                self.env = env;
            }
            Instr::Return => {
                self.unwind_to_marker()?;
            }
            Instr::AssignTo { name, loc } => {
                let value = self.pop1(&loc)?;
                assign(&self.env, &name, value.clone())
                    .map_err(|e| binding_error(e, &name, &loc))?;
                self.session.record_changepoint();
                self.stash.push(value);
            }
            Instr::Define { name, kind, loc } => {
                let value = self.pop1(&loc)?;
                if let Value::Closure(closure) = &value {
                    let mut slot = closure.name.borrow_mut();
                    if slot.is_none() {
                        *slot = Some(name.clone());
                    }
                }
                define(&self.env, name, kind, value);
                self.session.record_changepoint();
                self.stash.push(Value::Undefined);
            }
            Instr::ArrayLit { count, loc } => {
                let mut elements = Vec::with_capacity(count);
                for _ in 0..count {
                    elements.push(self.pop1(&loc)?);
                }
                elements.reverse();
                let array = Value::array(elements);
                self.env.borrow_mut().record_allocation(&array);
                self.stash.push(array);
            }
            Instr::PairCons { loc } => {
                let (tail, head) = self.pop2(&loc)?;
                let pair = Value::pair(head, tail);
                self.env.borrow_mut().record_allocation(&pair);
                self.stash.push(pair);
            }
            Instr::ArrayAccess { loc } => {
                let (index, array) = self.pop2(&loc)?;
                let idx = expect_index(&index, &loc)?;
                match array {
                    Value::Array(cells) => {
                        let element = cells.borrow().get(idx).cloned().unwrap_or(Value::Undefined);
                        self.stash.push(element);
                    }
                    other => {
                        return Err(RuntimeError::new(
                            RuntimeErrorKind::ArrayExpected { got: other.type_name() },
                            loc,
                        ))
                    }
                }
            }
            Instr::ArrayAssign { loc } => {
                let value = self.pop1(&loc)?;
                let index = self.pop1(&loc)?;
                let array = self.pop1(&loc)?;
                let idx = expect_index(&index, &loc)?;
                match array {
                    Value::Array(cells) => {
                        let mut cells = cells.borrow_mut();
                        if idx >= cells.len() {
                            cells.resize(idx + 1, Value::Undefined);
                        }
                        cells[idx] = value.clone();
                    }
                    other => {
                        return Err(RuntimeError::new(
                            RuntimeErrorKind::ArrayExpected { got: other.type_name() },
                            loc,
                        ))
                    }
                }
                self.stash.push(value);
            }
            // The loop's own statement value is pushed when the test turns
            // false; body values are popped each iteration. Pushing it only
            // at exit keeps the stash clean across a `return` from inside
            // the body.
            Instr::WhileTest { test, body, loc } => match self.pop1(&loc)? {
                Value::Bool(true) => {
                    self.control.push_instr(Instr::WhileTest {
                        test: test.clone(),
                        body: body.clone(),
                        loc,
                    });
                    self.control.push_expr(test);
                    self.control.push_instr(Instr::Pop);
                    self.control.push_stmt(body);
                }
                Value::Bool(false) => self.stash.push(Value::Undefined),
                other => {
                    return Err(RuntimeError::new(
                        RuntimeErrorKind::ConditionType { got: other.type_name() },
                        loc,
                    ))
                }
            },
            Instr::ForTest { test, update, body, loc } => match self.pop1(&loc)? {
                Value::Bool(true) => {
                    self.control.push_instr(Instr::ForTest {
                        test: test.clone(),
                        update: update.clone(),
                        body: body.clone(),
                        loc,
                    });
                    self.control.push_expr(test);
                    if let Some(update) = update {
                        self.control.push_instr(Instr::Pop);
                        self.control.push_expr(update);
                    }
                    self.control.push_instr(Instr::Pop);
                    self.control.push_stmt(body);
                }
                Value::Bool(false) => self.stash.push(Value::Undefined),
                other => {
                    return Err(RuntimeError::new(
                        RuntimeErrorKind::ConditionType { got: other.type_name() },
                        loc,
                    ))
                }
            },
            Instr::EnvEnter { env } => {
                self.env = env;
                self.session.record_changepoint();
            }
            Instr::EnvLeave { env } => {
                self.env = env;
            }
            Instr::Restore { control, stash } => {
                self.control.extend(control);
                self.stash.extend(stash);
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Call protocol
    // -----------------------------------------------------------------------

    fn apply(&mut self, arity: usize, loc: SourceLoc) -> Result<(), RuntimeError> {
        let mut args = Vec::with_capacity(arity);
        for _ in 0..arity {
            args.push(self.pop1(&loc)?);
        }
        args.reverse();
        let callee = self.pop1(&loc)?;
        match callee {
            Value::Closure(closure) => self.apply_closure(closure, args, loc),
            Value::Builtin { id, .. } => self.apply_builtin(id, args, loc),
            other => Err(RuntimeError::new(
                RuntimeErrorKind::CallingNonFunction { callee: stringify(&other) },
                loc,
            )),
        }
    }

    fn apply_closure(
        &mut self,
        closure: Rc<Closure>,
        args: Vec<Value>,
        loc: SourceLoc,
    ) -> Result<(), RuntimeError> {
        if closure.params.len() != args.len() {
            return Err(RuntimeError::new(
                RuntimeErrorKind::ArityMismatch {
                    name: closure.name.borrow().clone(),
                    expected: closure.params.len(),
                    got: args.len(),
                },
                loc,
            ));
        }

        // Tail position: the next pending work is the caller's return. Reuse
        // the existing marker instead of pushing a new one, and discard the
        // superseded frame's epilogue down to it; this is what bounds
        // control growth for tail-recursive programs.
        if self.control.next_is_return_marker() {
            self.drain_to_marker();
        } else {
            self.control.push_instr(Instr::ReturnMarker { env: self.env.clone() });
        }

        let frame_name =
            closure.name.borrow().clone().unwrap_or_else(|| RcStr::from("lambda"));
        let frame = Environment::with_call_site(
            self.session.fresh_env_id(),
            frame_name,
            Some(closure.env.clone()),
            loc,
        );
        for (param, arg) in closure.params.iter().zip(args) {
            define(&frame, param.clone(), DeclKind::Let, arg);
        }

        match &closure.body {
            FnBody::Expr(expr) => {
                self.env = frame;
                self.control.push_expr(expr.clone());
            }
            FnBody::Block(stmts) => {
                for (name, kind) in declared_names(stmts) {
                    declare(&frame, name, kind);
                }
                self.env = frame;
                self.push_fn_body(stmts);
            }
        }
        self.session.record_changepoint();
        Ok(())
    }

    fn apply_builtin(
        &mut self,
        id: u16,
        args: Vec<Value>,
        loc: SourceLoc,
    ) -> Result<(), RuntimeError> {
        let registry = self.registry.clone();
        let builtin = registry.get(id).ok_or_else(|| {
            RuntimeError::new(
                RuntimeErrorKind::Internal { message: "unknown builtin id" },
                loc.clone(),
            )
        })?;

        // Allocating builtins are lowered back onto the control so the
        // allocation is a step of its own.
        if builtin.lowered == Some(LoweredOp::PairCons) {
            if args.len() != 2 {
                return Err(RuntimeError::new(
                    RuntimeErrorKind::ArityMismatch {
                        name: Some(builtin.name.clone()),
                        expected: 2,
                        got: args.len(),
                    },
                    loc,
                ));
            }
            let mut args = args.into_iter();
            if let (Some(head), Some(tail)) = (args.next(), args.next()) {
                self.stash.push(head);
                self.stash.push(tail);
            }
            self.control.push_instr(Instr::PairCons { loc });
            return Ok(());
        }

        let mut ctx = HostContext {
            hooks: &mut *self.session.host,
            loc: loc.clone(),
            frame: Some(&self.env),
        };
        let result = registry.invoke(id, &mut ctx, &args)?;
        self.stash.push(result);
        Ok(())
    }

    /// Discard the superseded frame's remaining work (pending `Return`,
    /// statement `Pop`s, the synthetic trailing return) up to, but not
    /// including, its return marker. Used when a tail call reuses the
    /// marker: without this sweep every tail call would leave its
    /// predecessor's epilogue on the control for good. Environment
    /// bookkeeping is executed exactly as in [`Self::unwind_to_marker`].
    fn drain_to_marker(&mut self) {
        loop {
            match self.control.peek() {
                None | Some(ControlItem::Instr(Instr::ReturnMarker { .. })) => return,
                _ => {}
            }
            if let Some(ControlItem::Instr(Instr::EnvLeave { env })) = self.control.pop() {
                self.env = env;
            }
        }
    }

    /// Unwind to the nearest return marker, restoring environments recorded
    /// by intervening block exits so frame accounting stays balanced.
    fn unwind_to_marker(&mut self) -> Result<(), RuntimeError> {
        while let Some(item) = self.control.pop() {
            match item {
                ControlItem::Instr(Instr::EnvLeave { env }) => {
                    self.env = env;
                }
                ControlItem::Instr(Instr::ReturnMarker { env }) => {
                    self.env = env;
                    return Ok(());
                }
                _ => {}
            }
        }
        Err(RuntimeError::new(
            RuntimeErrorKind::Internal { message: "return outside of a function" },
            SourceLoc::unknown(),
        ))
    }

    // -----------------------------------------------------------------------
    // Pushing helpers
    // -----------------------------------------------------------------------

    /// Queue a statement list: statements in order, a `Pop` after every
    /// non-final one, the final statement's value left as the sequence
    /// value. An empty list contributes `undefined`.
    fn push_stmt_seq(&mut self, body: &[Rc<Stmt>]) {
        if body.is_empty() {
            self.stash.push(Value::Undefined);
            return;
        }
        for (i, stmt) in body.iter().enumerate().rev() {
            self.control.push_stmt(stmt.clone());
            if i > 0 {
                self.control.push_instr(Instr::Pop);
            }
        }
    }

    /// Queue a function body: every statement's value is popped and a
    /// synthetic `return;` terminates the body, so a function that never
    /// returns explicitly yields `undefined`.
    fn push_fn_body(&mut self, body: &[Rc<Stmt>]) {
        self.control.push_stmt(self.implicit_return.clone());
        if body.is_empty() {
            return;
        }
        self.control.push_instr(Instr::Pop);
        for (i, stmt) in body.iter().enumerate().rev() {
            self.control.push_stmt(stmt.clone());
            if i > 0 {
                self.control.push_instr(Instr::Pop);
            }
        }
    }

    /// Queue a block: fresh frame with its declarations hoisted, balanced
    /// enter/leave instructions around the statement sequence.
    fn push_block(&mut self, body: &[Rc<Stmt>]) {
        if body.is_empty() {
            self.stash.push(Value::Undefined);
            return;
        }
        let saved = self.env.clone();
        let block_env = Environment::new(
            self.session.fresh_env_id(),
            "block".into(),
            Some(saved.clone()),
        );
        for (name, kind) in declared_names(body) {
            declare(&block_env, name, kind);
        }
        self.control.push_instr(Instr::EnvLeave { env: saved });
        self.push_stmt_seq(body);
        self.control.push_instr(Instr::EnvEnter { env: block_env });
    }

    fn make_closure(
        &mut self,
        params: &[RcStr],
        body: FnBody,
        name: Option<RcStr>,
        loc: &SourceLoc,
    ) -> Value {
        let closure = Value::Closure(Rc::new(Closure {
            params: params.to_vec(),
            body,
            env: self.env.clone(),
            name: std::cell::RefCell::new(name),
            loc: loc.clone(),
        }));
        self.env.borrow_mut().record_allocation(&closure);
        closure
    }

    // -----------------------------------------------------------------------
    // Stash helpers
    // -----------------------------------------------------------------------

    fn pop1(&mut self, loc: &SourceLoc) -> Result<Value, RuntimeError> {
        self.stash.pop().ok_or_else(|| {
            RuntimeError::new(
                RuntimeErrorKind::Internal { message: "stash underflow" },
                loc.clone(),
            )
        })
    }

    /// Pops `(top, below)`.
    fn pop2(&mut self, loc: &SourceLoc) -> Result<(Value, Value), RuntimeError> {
        let top = self.pop1(loc)?;
        let below = self.pop1(loc)?;
        Ok((top, below))
    }
}

// ---------------------------------------------------------------------------
// Free helpers
// ---------------------------------------------------------------------------

fn lit_value(lit: &Lit) -> Value {
    match lit {
        Lit::Number(n) => Value::Number(*n),
        Lit::String(s) => Value::String(s.clone()),
        Lit::Bool(b) => Value::Bool(*b),
        Lit::Null => Value::Null,
        Lit::Undefined => Value::Undefined,
    }
}

fn binding_error(err: BindingError, name: &RcStr, loc: &SourceLoc) -> RuntimeError {
    let kind = match err {
        BindingError::Undefined => RuntimeErrorKind::UndefinedVariable { name: name.clone() },
        BindingError::Unassigned => RuntimeErrorKind::UnassignedVariable { name: name.clone() },
        BindingError::ConstAssignment => RuntimeErrorKind::ConstAssignment { name: name.clone() },
    };
    RuntimeError::new(kind, loc.clone())
}

fn expect_index(index: &Value, loc: &SourceLoc) -> Result<usize, RuntimeError> {
    match index {
        Value::Number(n)
            if *n >= 0.0 && n.fract() == 0.0 && *n < u32::MAX as f64 =>
        {
            Ok(*n as usize)
        }
        other => Err(RuntimeError::new(
            RuntimeErrorKind::InvalidArrayIndex { index: stringify(other) },
            loc.clone(),
        )),
    }
}
