//! AST → SVM program translation.
//!
//! Two collaborating passes per scope: on entry the scope pass collects the
//! names declared there (hoisting, mirroring the evaluator) and assigns each
//! a fixed `(depth, index)` lexical address; the emit pass then walks the
//! same statements generating code. Expressions leave exactly one value on
//! the operand stack; statements leave it unchanged. The compiler tracks
//! simulated stack depth so every function's `stack_size` is exact.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::ast::{
    declared_names, BinaryOp, DeclKind, Expr, FnBody, ForInit, Lit, LogicalOp, Program, RcStr,
    SourceLoc, Stmt, UnaryOp,
};
use crate::builtins::{BuiltinRegistry, LoweredOp};

use super::opcode::{EnvAddress, SvmInstr};
use super::program::{SvmFunction, SvmProgram};

// ---------------------------------------------------------------------------
// Compile errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum CompileErrorKind {
    UndefinedVariable { name: RcStr },
    /// Assignment to a `const` binding; lexical addresses are resolved at
    /// compile time, so this is caught here rather than at runtime.
    ConstAssignment { name: RcStr },
    /// A primitive called with the wrong number of arguments; caught here
    /// because primitive arities are fixed at compile time.
    PrimitiveArity { name: RcStr, expected: usize, got: usize },
    /// An environment outgrew the 8-bit address space.
    FrameTooLarge { size: usize },
    /// Scope nesting outgrew the 8-bit depth operand.
    NestingTooDeep,
    PrimitiveIdOutOfRange { name: RcStr },
    /// Constructs the stack machine has no value-position lowering for.
    UnsupportedExpression { what: &'static str },
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompileError {
    pub kind: CompileErrorKind,
    pub loc: SourceLoc,
}

impl CompileError {
    fn new(kind: CompileErrorKind, loc: &SourceLoc) -> Self {
        CompileError { kind, loc: loc.clone() }
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match &self.kind {
            CompileErrorKind::UndefinedVariable { name } => {
                format!("Name {} not declared.", name)
            }
            CompileErrorKind::ConstAssignment { name } => {
                format!("Cannot assign new value to constant {}.", name)
            }
            CompileErrorKind::PrimitiveArity { name, expected, got } => {
                format!("{} expects {} arguments, got {}.", name, expected, got)
            }
            CompileErrorKind::FrameTooLarge { size } => {
                format!("Too many declarations in one scope: {} (limit 255).", size)
            }
            CompileErrorKind::NestingTooDeep => "Scopes nest deeper than 255 frames.".to_string(),
            CompileErrorKind::PrimitiveIdOutOfRange { name } => {
                format!("Primitive {} has an id beyond the CALLP operand range.", name)
            }
            CompileErrorKind::UnsupportedExpression { what } => {
                format!("{} cannot be compiled in value position.", what)
            }
        };
        write!(f, "[{}:{}] {}", self.loc.start.line, self.loc.start.column, message)
    }
}

// ---------------------------------------------------------------------------
// Compilation contexts
// ---------------------------------------------------------------------------

struct Scope {
    names: Vec<(RcStr, DeclKind)>,
}

/// Per-function state: code, simulated stack depth and the scope chain of
/// the function's own frames.
struct FnCtx {
    code: Vec<SvmInstr>,
    scopes: Vec<Scope>,
    arity: u16,
    cur_stack: i32,
    max_stack: i32,
}

impl FnCtx {
    fn new(arity: u16, scope0: Vec<(RcStr, DeclKind)>) -> Self {
        FnCtx {
            code: Vec::new(),
            scopes: vec![Scope { names: scope0 }],
            arity,
            cur_stack: 0,
            max_stack: 0,
        }
    }
}

pub struct Compiler<'a> {
    registry: &'a BuiltinRegistry,
    functions: Vec<SvmFunction>,
    strings: Vec<String>,
    string_index: HashMap<String, u32>,
    /// Stack of functions being compiled; the innermost is active. Nested
    /// functions are compiled at their occurrence so the compile-time scope
    /// stack mirrors the runtime environment chain.
    fns: Vec<FnCtx>,
}

/// Compile a whole program. The entry function is index 0.
pub fn compile(program: &Program, registry: &BuiltinRegistry) -> Result<SvmProgram, CompileError> {
    Compiler::new(registry).compile_program(program)
}

impl<'a> Compiler<'a> {
    pub fn new(registry: &'a BuiltinRegistry) -> Self {
        Compiler {
            registry,
            functions: Vec::new(),
            strings: Vec::new(),
            string_index: HashMap::new(),
            fns: Vec::new(),
        }
    }

    fn compile_program(mut self, program: &Program) -> Result<SvmProgram, CompileError> {
        let scope0 = declared_names(&program.body);
        check_frame(scope0.len(), &SourceLoc::unknown())?;

        self.functions.push(placeholder());
        self.fns.push(FnCtx::new(0, scope0));

        match program.body.split_last() {
            None => self.emit(SvmInstr::Lgcu),
            Some((last, init)) => {
                for stmt in init {
                    self.compile_stmt(stmt)?;
                }
                // The program's value is its final expression statement;
                // any other final form yields undefined.
                match &**last {
                    Stmt::Expression { expression, .. } => self.compile_expr(expression)?,
                    other => {
                        self.compile_stmt_inner(other)?;
                        self.emit(SvmInstr::Lgcu);
                    }
                }
            }
        }
        self.emit(SvmInstr::Done);

        let ctx = self.fns.pop().expect("entry context pushed above");
        self.functions[0] = finish(ctx);
        Ok(SvmProgram { entry: 0, functions: self.functions, strings: self.strings })
    }

    // -----------------------------------------------------------------------
    // Statements
    // -----------------------------------------------------------------------

    fn compile_stmt(&mut self, stmt: &Rc<Stmt>) -> Result<(), CompileError> {
        self.compile_stmt_inner(stmt)
    }

    fn compile_stmt_inner(&mut self, stmt: &Stmt) -> Result<(), CompileError> {
        match stmt {
            Stmt::Expression { expression, .. } => match &**expression {
                // Assignments in statement position store directly, without
                // the value-preserving DUPG of the expression form.
                Expr::Assignment { name, value, loc } => {
                    self.compile_expr(value)?;
                    let addr = self.resolve_assign(name, loc)?;
                    self.emit_store(addr);
                    Ok(())
                }
                Expr::ArrayAssignment { array, index, value, .. } => {
                    self.compile_expr(array)?;
                    self.compile_expr(index)?;
                    self.compile_expr(value)?;
                    self.emit(SvmInstr::Stag);
                    Ok(())
                }
                _ => {
                    self.compile_expr(expression)?;
                    self.emit(SvmInstr::Popg);
                    Ok(())
                }
            },
            Stmt::Declaration { name, init, loc, .. } => {
                self.compile_expr(init)?;
                let addr = self.resolve_variable(name, loc)?;
                self.emit_store(addr);
                Ok(())
            }
            Stmt::FunctionDeclaration { name, params, body, loc } => {
                let fn_index =
                    self.compile_function(params, &FnBody::Block(body.clone()), loc)?;
                self.emit(SvmInstr::Newc(fn_index));
                let addr = self.resolve_variable(name, loc)?;
                self.emit_store(addr);
                Ok(())
            }
            Stmt::Block { body, loc } => {
                let names = declared_names(body);
                check_frame(names.len(), loc)?;
                self.emit(SvmInstr::Newenv(names.len() as u8));
                self.current().scopes.push(Scope { names });
                for stmt in body {
                    self.compile_stmt(stmt)?;
                }
                self.current().scopes.pop();
                self.emit(SvmInstr::Popenv);
                Ok(())
            }
            Stmt::Return { argument, .. } => match argument {
                None => {
                    self.emit(SvmInstr::Retu);
                    Ok(())
                }
                Some(expr) => self.compile_tail_expr(expr),
            },
            Stmt::If { test, consequent, alternate, .. } => {
                self.compile_expr(test)?;
                let to_alt = self.emit_branch(SvmInstr::Brf(0));
                self.compile_stmt(consequent)?;
                match alternate {
                    Some(alternate) => {
                        let to_end = self.emit_branch(SvmInstr::Br(0));
                        self.patch_to_here(to_alt);
                        self.compile_stmt(alternate)?;
                        self.patch_to_here(to_end);
                    }
                    None => self.patch_to_here(to_alt),
                }
                Ok(())
            }
            Stmt::While { test, body, .. } => {
                let loop_top = self.here();
                self.compile_expr(test)?;
                let exit = self.emit_branch(SvmInstr::Brf(0));
                self.compile_stmt(body)?;
                self.emit_jump_back(loop_top);
                self.patch_to_here(exit);
                Ok(())
            }
            Stmt::For { init, test, update, body, loc } => {
                let mut loop_scope = false;
                match init {
                    Some(ForInit::Declaration { kind, name, init }) => {
                        loop_scope = true;
                        self.emit(SvmInstr::Newenv(1));
                        self.current()
                            .scopes
                            .push(Scope { names: vec![(name.clone(), *kind)] });
                        self.compile_expr(init)?;
                        let addr = self.resolve_variable(name, loc)?;
                        self.emit_store(addr);
                    }
                    Some(ForInit::Expression(init)) => {
                        self.compile_expr(init)?;
                        self.emit(SvmInstr::Popg);
                    }
                    None => {}
                }
                let loop_top = self.here();
                match test {
                    Some(test) => self.compile_expr(test)?,
                    None => self.emit(SvmInstr::Lgcb1),
                }
                let exit = self.emit_branch(SvmInstr::Brf(0));
                self.compile_stmt(body)?;
                if let Some(update) = update {
                    self.compile_expr(update)?;
                    self.emit(SvmInstr::Popg);
                }
                self.emit_jump_back(loop_top);
                self.patch_to_here(exit);
                if loop_scope {
                    self.current().scopes.pop();
                    self.emit(SvmInstr::Popenv);
                }
                Ok(())
            }
            Stmt::Sequence { body, .. } => {
                for stmt in body {
                    self.compile_stmt(stmt)?;
                }
                Ok(())
            }
        }
    }

    // -----------------------------------------------------------------------
    // Expressions
    // -----------------------------------------------------------------------

    fn compile_expr(&mut self, expr: &Expr) -> Result<(), CompileError> {
        match expr {
            Expr::Literal { value, .. } => {
                self.emit_literal(value);
                Ok(())
            }
            Expr::Identifier { name, loc } => {
                let addr = self.resolve_variable(name, loc)?;
                self.emit_load(addr);
                Ok(())
            }
            Expr::Binary { op, left, right, .. } => {
                self.compile_expr(left)?;
                self.compile_expr(right)?;
                self.emit(binary_instr(*op));
                Ok(())
            }
            Expr::Logical { op, left, right, .. } => {
                self.compile_expr(left)?;
                match op {
                    LogicalOp::And => {
                        let to_false = self.emit_branch(SvmInstr::Brf(0));
                        self.compile_expr(right)?;
                        let to_end = self.emit_branch(SvmInstr::Br(0));
                        self.pop_sim(1);
                        self.patch_to_here(to_false);
                        self.emit(SvmInstr::Lgcb0);
                        self.patch_to_here(to_end);
                    }
                    LogicalOp::Or => {
                        let to_true = self.emit_branch(SvmInstr::Brt(0));
                        self.compile_expr(right)?;
                        let to_end = self.emit_branch(SvmInstr::Br(0));
                        self.pop_sim(1);
                        self.patch_to_here(to_true);
                        self.emit(SvmInstr::Lgcb1);
                        self.patch_to_here(to_end);
                    }
                }
                Ok(())
            }
            Expr::Unary { op, argument, .. } => {
                self.compile_expr(argument)?;
                self.emit(match op {
                    UnaryOp::Neg => SvmInstr::Negg,
                    UnaryOp::Not => SvmInstr::Notg,
                });
                Ok(())
            }
            Expr::Conditional { test, consequent, alternate, .. } => {
                self.compile_expr(test)?;
                let to_alt = self.emit_branch(SvmInstr::Brf(0));
                self.compile_expr(consequent)?;
                let to_end = self.emit_branch(SvmInstr::Br(0));
                self.pop_sim(1);
                self.patch_to_here(to_alt);
                self.compile_expr(alternate)?;
                self.patch_to_here(to_end);
                Ok(())
            }
            Expr::Call { callee, arguments, loc } => {
                self.compile_call(callee, arguments, false, loc)?;
                Ok(())
            }
            Expr::Function { params, body, loc, .. } => {
                let fn_index = self.compile_function(params, body, loc)?;
                self.emit(SvmInstr::Newc(fn_index));
                Ok(())
            }
            Expr::Assignment { name, value, loc } => {
                self.compile_expr(value)?;
                self.emit(SvmInstr::Dupg);
                let addr = self.resolve_assign(name, loc)?;
                self.emit_store(addr);
                Ok(())
            }
            Expr::ArrayAssignment { loc, .. } => Err(CompileError::new(
                CompileErrorKind::UnsupportedExpression { what: "array assignment" },
                loc,
            )),
            Expr::ArrayLiteral { elements, .. } => {
                self.emit(SvmInstr::Newa);
                for (i, element) in elements.iter().enumerate() {
                    self.emit(SvmInstr::Dupg);
                    self.emit(SvmInstr::Lgci(i as i32));
                    self.compile_expr(element)?;
                    self.emit(SvmInstr::Stag);
                }
                Ok(())
            }
            Expr::Member { array, index, .. } => {
                self.compile_expr(array)?;
                self.compile_expr(index)?;
                self.emit(SvmInstr::Ldag);
                Ok(())
            }
        }
    }

    /// Compile an expression in tail position. Always terminates the
    /// function: direct calls become `CALLT`, conditionals propagate into
    /// both arms, everything else is followed by `RETG`.
    fn compile_tail_expr(&mut self, expr: &Expr) -> Result<(), CompileError> {
        match expr {
            Expr::Call { callee, arguments, loc } => {
                let tailed = self.compile_call(callee, arguments, true, loc)?;
                if !tailed {
                    self.emit(SvmInstr::Retg);
                }
                Ok(())
            }
            Expr::Conditional { test, consequent, alternate, .. } => {
                self.compile_expr(test)?;
                let to_alt = self.emit_branch(SvmInstr::Brf(0));
                let depth = self.current().cur_stack;
                self.compile_tail_expr(consequent)?;
                self.current().cur_stack = depth;
                self.patch_to_here(to_alt);
                self.compile_tail_expr(alternate)
            }
            _ => {
                self.compile_expr(expr)?;
                self.emit(SvmInstr::Retg);
                Ok(())
            }
        }
    }

    /// Compile a call. Returns true when a `CALLT` was emitted (the frame
    /// is gone and no return instruction must follow). Primitive calls are
    /// dispatched with `CALLP` and never tail-call into the host.
    fn compile_call(
        &mut self,
        callee: &Rc<Expr>,
        arguments: &[Rc<Expr>],
        tail: bool,
        loc: &SourceLoc,
    ) -> Result<bool, CompileError> {
        if let Expr::Identifier { name, .. } = &**callee {
            if self.resolve(name).is_none() {
                if let Some(prim) = self.registry.lookup(name) {
                    return self.compile_primitive_call(name, prim, arguments, loc);
                }
                return Err(CompileError::new(
                    CompileErrorKind::UndefinedVariable { name: name.clone() },
                    loc,
                ));
            }
        }
        self.compile_expr(callee)?;
        for argument in arguments {
            self.compile_expr(argument)?;
        }
        if tail {
            self.emit(SvmInstr::Callt(arguments.len() as u8));
            Ok(true)
        } else {
            self.emit(SvmInstr::Call(arguments.len() as u8));
            Ok(false)
        }
    }

    fn compile_primitive_call(
        &mut self,
        name: &RcStr,
        prim: u16,
        arguments: &[Rc<Expr>],
        loc: &SourceLoc,
    ) -> Result<bool, CompileError> {
        let builtin = self.registry.get(prim).ok_or_else(|| {
            CompileError::new(CompileErrorKind::UndefinedVariable { name: name.clone() }, loc)
        })?;
        if let Some(arity) = builtin.arity {
            if arguments.len() != arity as usize {
                return Err(CompileError::new(
                    CompileErrorKind::PrimitiveArity {
                        name: name.clone(),
                        expected: arity as usize,
                        got: arguments.len(),
                    },
                    loc,
                ));
            }
        }
        for argument in arguments {
            self.compile_expr(argument)?;
        }
        if builtin.lowered == Some(LoweredOp::PairCons) {
            self.emit(SvmInstr::Newp);
            return Ok(false);
        }
        if prim > u8::MAX as u16 {
            return Err(CompileError::new(
                CompileErrorKind::PrimitiveIdOutOfRange { name: name.clone() },
                loc,
            ));
        }
        self.emit(SvmInstr::Callp { prim: prim as u8, argc: arguments.len() as u8 });
        Ok(false)
    }

    // -----------------------------------------------------------------------
    // Functions
    // -----------------------------------------------------------------------

    fn compile_function(
        &mut self,
        params: &[RcStr],
        body: &FnBody,
        loc: &SourceLoc,
    ) -> Result<u32, CompileError> {
        let fn_index = self.functions.len() as u32;
        self.functions.push(placeholder());

        let mut scope0: Vec<(RcStr, DeclKind)> =
            params.iter().map(|p| (p.clone(), DeclKind::Let)).collect();
        if let FnBody::Block(stmts) = body {
            scope0.extend(declared_names(stmts));
        }
        check_frame(scope0.len(), loc)?;

        self.fns.push(FnCtx::new(params.len() as u16, scope0));
        match body {
            FnBody::Expr(expr) => self.compile_tail_expr(expr)?,
            FnBody::Block(stmts) => {
                for stmt in stmts {
                    self.compile_stmt(stmt)?;
                }
                self.emit(SvmInstr::Retu);
            }
        }
        let ctx = self.fns.pop().expect("function context pushed above");
        self.functions[fn_index as usize] = finish(ctx);
        Ok(fn_index)
    }

    // -----------------------------------------------------------------------
    // Name resolution
    // -----------------------------------------------------------------------

    /// Walk scopes innermost-out, across enclosing functions, counting
    /// frames. The depth is exactly the number of `NEWENV`/call frames
    /// between the use site and the declaring frame at runtime.
    fn resolve(&self, name: &str) -> Option<(usize, usize, DeclKind)> {
        let mut depth: usize = 0;
        for ctx in self.fns.iter().rev() {
            for scope in ctx.scopes.iter().rev() {
                if let Some(index) = scope.names.iter().rposition(|(n, _)| &**n == name) {
                    return Some((depth, index, scope.names[index].1));
                }
                depth += 1;
            }
        }
        None
    }

    fn resolve_variable(&self, name: &RcStr, loc: &SourceLoc) -> Result<EnvAddress, CompileError> {
        match self.resolve(name) {
            Some((depth, index, _)) => {
                if depth > u8::MAX as usize {
                    Err(CompileError::new(CompileErrorKind::NestingTooDeep, loc))
                } else {
                    Ok(EnvAddress { depth: depth as u8, index: index as u8 })
                }
            }
            None => Err(CompileError::new(
                CompileErrorKind::UndefinedVariable { name: name.clone() },
                loc,
            )),
        }
    }

    /// Like [`Self::resolve_variable`] but for assignment targets, which
    /// must not be `const`.
    fn resolve_assign(&self, name: &RcStr, loc: &SourceLoc) -> Result<EnvAddress, CompileError> {
        if let Some((_, _, DeclKind::Const)) = self.resolve(name) {
            return Err(CompileError::new(
                CompileErrorKind::ConstAssignment { name: name.clone() },
                loc,
            ));
        }
        self.resolve_variable(name, loc)
    }

    // -----------------------------------------------------------------------
    // Emission helpers
    // -----------------------------------------------------------------------

    fn current(&mut self) -> &mut FnCtx {
        // A function context is pushed before any emission can happen.
        self.fns.last_mut().expect("compiler has an active function")
    }

    fn here(&mut self) -> usize {
        self.current().code.len()
    }

    fn emit(&mut self, instr: SvmInstr) {
        let effect = stack_effect(&instr);
        let ctx = self.current();
        ctx.code.push(instr);
        ctx.cur_stack += effect;
        if ctx.cur_stack > ctx.max_stack {
            ctx.max_stack = ctx.cur_stack;
        }
    }

    /// Emit a branch with a placeholder offset, returning its index for
    /// later patching.
    fn emit_branch(&mut self, instr: SvmInstr) -> usize {
        let at = self.here();
        self.emit(instr);
        at
    }

    fn patch_to_here(&mut self, at: usize) {
        let target = self.here();
        let ctx = self.current();
        let offset = (target as i32) - (at as i32) - 1;
        ctx.code[at] = ctx.code[at].with_branch_offset(offset);
    }

    fn emit_jump_back(&mut self, target: usize) {
        let pos = self.here();
        let offset = (target as i32) - (pos as i32) - 1;
        self.emit(SvmInstr::Jmp(offset));
    }

    /// Rewind the simulated stack depth across mutually exclusive branch
    /// arms.
    fn pop_sim(&mut self, n: i32) {
        self.current().cur_stack -= n;
    }

    fn emit_load(&mut self, addr: EnvAddress) {
        if addr.depth == 0 {
            self.emit(SvmInstr::Ldl(addr.index));
        } else {
            self.emit(SvmInstr::Ldp(addr));
        }
    }

    fn emit_store(&mut self, addr: EnvAddress) {
        if addr.depth == 0 {
            self.emit(SvmInstr::Stl(addr.index));
        } else {
            self.emit(SvmInstr::Stp(addr));
        }
    }

    fn emit_literal(&mut self, lit: &Lit) {
        match lit {
            Lit::Number(n) => {
                if n.fract() == 0.0 && *n >= i32::MIN as f64 && *n <= i32::MAX as f64 {
                    self.emit(SvmInstr::Lgci(*n as i32));
                } else {
                    self.emit(SvmInstr::Lgcf64(*n));
                }
            }
            Lit::String(s) => {
                let index = self.intern(s);
                self.emit(SvmInstr::Lgcs(index));
            }
            Lit::Bool(true) => self.emit(SvmInstr::Lgcb1),
            Lit::Bool(false) => self.emit(SvmInstr::Lgcb0),
            Lit::Null => self.emit(SvmInstr::Lgcn),
            Lit::Undefined => self.emit(SvmInstr::Lgcu),
        }
    }

    /// Deduplicating string-pool insertion.
    fn intern(&mut self, s: &str) -> u32 {
        if let Some(&index) = self.string_index.get(s) {
            return index;
        }
        let index = self.strings.len() as u32;
        self.strings.push(s.to_string());
        self.string_index.insert(s.to_string(), index);
        index
    }
}

// ---------------------------------------------------------------------------
// Free helpers
// ---------------------------------------------------------------------------

fn placeholder() -> SvmFunction {
    SvmFunction { stack_size: 0, env_size: 0, arity: 0, code: Vec::new() }
}

fn finish(ctx: FnCtx) -> SvmFunction {
    let env_size = ctx.scopes.first().map(|s| s.names.len()).unwrap_or(0);
    SvmFunction {
        stack_size: ctx.max_stack.max(0) as u16,
        env_size: env_size as u16,
        arity: ctx.arity,
        code: ctx.code,
    }
}

fn check_frame(size: usize, loc: &SourceLoc) -> Result<(), CompileError> {
    if size > u8::MAX as usize {
        Err(CompileError::new(CompileErrorKind::FrameTooLarge { size }, loc))
    } else {
        Ok(())
    }
}

fn binary_instr(op: BinaryOp) -> SvmInstr {
    match op {
        BinaryOp::Add => SvmInstr::Addg,
        BinaryOp::Sub => SvmInstr::Subg,
        BinaryOp::Mul => SvmInstr::Mulg,
        BinaryOp::Div => SvmInstr::Divg,
        BinaryOp::Mod => SvmInstr::Modg,
        BinaryOp::Eq => SvmInstr::Eqg,
        BinaryOp::NotEq => SvmInstr::Neqg,
        BinaryOp::Lt => SvmInstr::Ltg,
        BinaryOp::Gt => SvmInstr::Gtg,
        BinaryOp::LtEq => SvmInstr::Leg,
        BinaryOp::GtEq => SvmInstr::Geg,
    }
}

/// Net operand-stack effect of one instruction.
fn stack_effect(instr: &SvmInstr) -> i32 {
    use SvmInstr::*;
    match instr {
        Lgci(_) | Lgcf64(_) | Lgcs(_) | Lgcb0 | Lgcb1 | Lgcu | Lgcn => 1,
        Addg | Subg | Mulg | Divg | Modg | Addn | Subn | Muln | Divn | Modn | Adds => -1,
        Negg | Negn | Notg => 0,
        Eqg | Neqg | Ltg | Gtg | Leg | Geg => -1,
        Newc(_) | Newa | Dupg => 1,
        Newp | Ldag => -1,
        Stag => -3,
        Popg => -1,
        Ldl(_) | Ldp(_) => 1,
        Stl(_) | Stp(_) => -1,
        Br(_) | Jmp(_) | Nop => 0,
        Brt(_) | Brf(_) => -1,
        Call(n) => -(*n as i32),
        Callt(n) => -(*n as i32) - 1,
        Callp { argc, .. } => 1 - (*argc as i32),
        Retg | Retn | Retb => -1,
        Retu => 0,
        Newenv(_) | Popenv | Done => 0,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::build;

    fn compile_src(body: Vec<Rc<Stmt>>) -> SvmProgram {
        let registry = BuiltinRegistry::core();
        compile(&build::program(body), &registry).expect("compiles")
    }

    #[test]
    fn arithmetic_expression_compiles_flat() {
        // 1 + 2 * 3;
        let program = compile_src(vec![build::expr_stmt(build::binary(
            BinaryOp::Add,
            build::number(1.0),
            build::binary(BinaryOp::Mul, build::number(2.0), build::number(3.0)),
        ))]);
        let entry = &program.functions[0];
        assert_eq!(
            entry.code,
            vec![
                SvmInstr::Lgci(1),
                SvmInstr::Lgci(2),
                SvmInstr::Lgci(3),
                SvmInstr::Mulg,
                SvmInstr::Addg,
                SvmInstr::Done,
            ]
        );
        assert_eq!(entry.stack_size, 3);
    }

    #[test]
    fn string_literals_are_deduplicated() {
        let program = compile_src(vec![
            build::expr_stmt(build::string("dup")),
            build::expr_stmt(build::string("dup")),
        ]);
        assert_eq!(program.strings, vec!["dup".to_string()]);
    }

    #[test]
    fn undefined_variable_is_a_compile_error() {
        let registry = BuiltinRegistry::core();
        let program = build::program(vec![build::expr_stmt(build::ident("ghost"))]);
        let err = compile(&program, &registry).expect_err("must fail");
        assert!(matches!(err.kind, CompileErrorKind::UndefinedVariable { .. }));
    }

    #[test]
    fn locals_get_frame_slots() {
        // const x = 1; x;
        let program = compile_src(vec![
            build::const_decl("x", build::number(1.0)),
            build::expr_stmt(build::ident("x")),
        ]);
        let entry = &program.functions[0];
        assert_eq!(entry.env_size, 1);
        assert!(entry.code.contains(&SvmInstr::Stl(0)));
        assert!(entry.code.contains(&SvmInstr::Ldl(0)));
    }

    #[test]
    fn lambda_becomes_its_own_function() {
        // const f = x => x; f(1);
        let program = compile_src(vec![
            build::const_decl("f", build::arrow(&["x"], build::ident("x"))),
            build::expr_stmt(build::call_named("f", vec![build::number(1.0)])),
        ]);
        assert_eq!(program.functions.len(), 2);
        let lambda = &program.functions[1];
        assert_eq!(lambda.arity, 1);
        assert_eq!(lambda.env_size, 1);
        assert_eq!(lambda.code, vec![SvmInstr::Ldl(0), SvmInstr::Retg]);
    }

    #[test]
    fn tail_calls_compile_to_callt() {
        // const f = n => n === 0 ? 0 : f(n - 1);
        let recursive = build::arrow(
            &["n"],
            build::conditional(
                build::binary(BinaryOp::Eq, build::ident("n"), build::number(0.0)),
                build::number(0.0),
                build::call_named("f", vec![build::binary(
                    BinaryOp::Sub,
                    build::ident("n"),
                    build::number(1.0),
                )]),
            ),
        );
        let program = compile_src(vec![
            build::const_decl("f", recursive),
            build::expr_stmt(build::call_named("f", vec![build::number(3.0)])),
        ]);
        let lambda = &program.functions[1];
        assert!(lambda.code.contains(&SvmInstr::Callt(1)));
        // The non-call arm still returns normally.
        assert!(lambda.code.contains(&SvmInstr::Retg));
    }

    #[test]
    fn primitive_calls_use_callp_and_pair_lowers_to_newp() {
        let registry = BuiltinRegistry::core();
        let program = compile(
            &build::program(vec![build::expr_stmt(build::call_named(
                "pair",
                vec![build::number(1.0), build::null()],
            ))]),
            &registry,
        )
        .expect("compiles");
        let entry = &program.functions[0];
        assert!(entry.code.contains(&SvmInstr::Newp));

        let program = compile(
            &build::program(vec![build::expr_stmt(build::call_named(
                "is_null",
                vec![build::null()],
            ))]),
            &registry,
        )
        .expect("compiles");
        let entry = &program.functions[0];
        let is_null = registry.lookup("is_null").unwrap() as u8;
        assert!(entry.code.contains(&SvmInstr::Callp { prim: is_null, argc: 1 }));
    }

    #[test]
    fn assignment_to_const_is_a_compile_error() {
        let registry = BuiltinRegistry::core();
        let program = build::program(vec![
            build::const_decl("x", build::number(1.0)),
            build::expr_stmt(build::assign("x", build::number(2.0))),
        ]);
        let err = compile(&program, &registry).expect_err("must fail");
        assert!(matches!(err.kind, CompileErrorKind::ConstAssignment { .. }));
    }

    #[test]
    fn primitive_arity_checked_at_compile_time() {
        let registry = BuiltinRegistry::core();
        let program =
            build::program(vec![build::expr_stmt(build::call_named("head", vec![]))]);
        let err = compile(&program, &registry).expect_err("must fail");
        assert!(matches!(err.kind, CompileErrorKind::PrimitiveArity { expected: 1, got: 0, .. }));
    }

    #[test]
    fn block_scopes_use_parent_addressing() {
        // let x = 1; { const y = 2; x + y; }
        let program = compile_src(vec![
            build::let_decl("x", build::number(1.0)),
            build::block(vec![
                build::const_decl("y", build::number(2.0)),
                build::expr_stmt(build::binary(
                    BinaryOp::Add,
                    build::ident("x"),
                    build::ident("y"),
                )),
            ]),
        ]);
        let entry = &program.functions[0];
        assert!(entry.code.contains(&SvmInstr::Newenv(1)));
        assert!(entry.code.contains(&SvmInstr::Popenv));
        assert!(entry
            .code
            .contains(&SvmInstr::Ldp(EnvAddress { depth: 1, index: 0 })));
        assert!(entry.code.contains(&SvmInstr::Ldl(0)));
    }

    #[test]
    fn while_loop_branches_backwards() {
        // let i = 0; while (i < 3) { i = i + 1; }
        let program = compile_src(vec![
            build::let_decl("i", build::number(0.0)),
            build::while_stmt(
                build::binary(BinaryOp::Lt, build::ident("i"), build::number(3.0)),
                build::block(vec![build::expr_stmt(build::assign(
                    "i",
                    build::binary(BinaryOp::Add, build::ident("i"), build::number(1.0)),
                ))]),
            ),
        ]);
        let entry = &program.functions[0];
        let has_backward_jump = entry
            .code
            .iter()
            .any(|i| matches!(i, SvmInstr::Jmp(o) if *o < 0));
        assert!(has_backward_jump, "loop must jump backwards:\n{}", program);
    }

    #[test]
    fn entry_ends_with_done() {
        let program = compile_src(vec![build::expr_stmt(build::number(1.0))]);
        assert_eq!(program.functions[0].code.last(), Some(&SvmInstr::Done));
    }
}
