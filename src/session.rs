//! Sessions: the orchestrating context handed to embedders.
//!
//! A session owns the environment tree, the error log, the step accounting
//! and, between a suspension and its resume, the live machine state.
//! Sessions are single-threaded; the only cross-thread channel is the
//! interrupt flag.

use std::collections::HashSet;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::ast::{Program, RcStr};
use crate::builtins::{BuiltinRegistry, HostHooks, StdoutHost};
use crate::cse::control::MachineState;
use crate::environment::{EnvRef, Environment};
use crate::error::{Diagnostic, ErrorFormatter, SourceError};
use crate::value::Value;

// ---------------------------------------------------------------------------
// Language levels and variants
// ---------------------------------------------------------------------------

/// The graded language levels. Syntactic restrictions per level are
/// enforced by the upstream validator; the level is carried here for error
/// reporting and host display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    One,
    Two,
    Three,
    Four,
}

impl Level {
    pub fn as_number(&self) -> u8 {
        match self {
            Level::One => 1,
            Level::Two => 2,
            Level::Three => 3,
            Level::Four => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    #[default]
    Default,
    Typed,
}

/// How the embedder asked for the program to be executed. There is a single
/// evaluator; `native` and `auto` select it too and exist so option payloads
/// from existing frontends parse unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionMethod {
    #[default]
    Auto,
    Native,
    CseMachine,
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Options understood by the import preprocessor. The preprocessor itself
/// runs upstream; the session only forwards these.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImportOptions {
    pub should_add_file_name: Option<bool>,
}

/// Recognised evaluation options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EvalOptions {
    /// Steps granted per run or resume; 0 means unlimited.
    pub step_limit: u64,
    /// Wall-clock budget in milliseconds for one run.
    pub original_max_exec_time: u64,
    /// Grow the wall-clock budget tenfold, once, instead of timing out.
    pub should_increase_evaluation_timeout: bool,
    pub execution_method: ExecutionMethod,
    pub variant: Variant,
    /// Total-step target for the stepper; negative means no target.
    pub env_steps: i64,
    /// Report `PotentialInfiniteLoop` instead of suspending when the step
    /// budget runs out.
    pub throw_infinite_loops: bool,
    pub import_options: ImportOptions,
    pub should_add_file_name: Option<bool>,
    /// Step indices at which the evaluator suspends.
    pub breakpoints: Vec<u64>,
}

impl Default for EvalOptions {
    fn default() -> Self {
        EvalOptions {
            step_limit: 0,
            original_max_exec_time: 1000,
            should_increase_evaluation_timeout: false,
            execution_method: ExecutionMethod::Auto,
            variant: Variant::Default,
            env_steps: -1,
            throw_infinite_loops: false,
            import_options: ImportOptions::default(),
            should_add_file_name: None,
            breakpoints: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Results and status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Idle,
    Running,
    Suspended,
    Finished,
    Errored,
}

/// Outcome of a run or resume. On `Suspended` the machine state stays in
/// the session; call [`crate::resume`] to continue.
#[derive(Debug)]
pub enum EvalResult {
    Finished { value: Value },
    Suspended,
    Error { errors: Vec<SourceError> },
}

// ---------------------------------------------------------------------------
// Interrupts
// ---------------------------------------------------------------------------

/// Clonable handle that can stop a running evaluation from another thread.
/// The evaluator observes the flag between steps and reports an
/// interruption error before producing any further value.
#[derive(Debug, Clone)]
pub struct InterruptHandle {
    flag: Arc<AtomicBool>,
}

impl InterruptHandle {
    pub fn interrupt(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// AST rewriting procedure installed by advanced variants; inert otherwise.
pub type Transformer = Rc<dyn Fn(&Program) -> Program>;

pub struct Session {
    pub level: Level,
    pub variant: Variant,
    pub options: EvalOptions,
    pub global_env: EnvRef,
    pub errors: Vec<SourceError>,
    pub status: SessionStatus,
    /// Total control pops across the session's lifetime.
    pub steps: u64,
    /// High-water mark of the control stack, for tail-call diagnostics.
    pub max_control_depth: usize,
    /// Steps at which the environment tree changed.
    pub changepoints: Vec<u64>,
    pub breakpoints: HashSet<u64>,
    pub(crate) last_break_at: Option<u64>,
    pub(crate) builtins: Rc<BuiltinRegistry>,
    pub(crate) machine: Option<MachineState>,
    pub(crate) host: Box<dyn HostHooks>,
    pub(crate) interrupted: Arc<AtomicBool>,
    next_env_id: u32,
    transformers: IndexMap<RcStr, Transformer>,
}

impl Session {
    pub fn new(
        level: Level,
        options: EvalOptions,
        builtins: BuiltinRegistry,
        host: Box<dyn HostHooks>,
    ) -> Self {
        let global_env = Environment::new(0, "global".into(), None);
        builtins.install_globals(&global_env);
        let breakpoints = options.breakpoints.iter().copied().collect();
        Session {
            level,
            variant: options.variant,
            options,
            global_env,
            errors: Vec::new(),
            status: SessionStatus::Idle,
            steps: 0,
            max_control_depth: 0,
            changepoints: Vec::new(),
            breakpoints,
            last_break_at: None,
            builtins: Rc::new(builtins),
            machine: None,
            host,
            interrupted: Arc::new(AtomicBool::new(false)),
            next_env_id: 1,
            transformers: IndexMap::new(),
        }
    }

    /// Session with the core builtins, default options and a stdout host.
    pub fn with_defaults(level: Level) -> Self {
        Session::new(
            level,
            EvalOptions::default(),
            BuiltinRegistry::core(),
            Box::new(StdoutHost),
        )
    }

    pub fn builtins(&self) -> &BuiltinRegistry {
        &self.builtins
    }

    pub fn interrupt_handle(&self) -> InterruptHandle {
        InterruptHandle { flag: self.interrupted.clone() }
    }

    pub(crate) fn take_interrupt(&self) -> bool {
        self.interrupted.swap(false, Ordering::SeqCst)
    }

    pub(crate) fn fresh_env_id(&mut self) -> u32 {
        let id = self.next_env_id;
        self.next_env_id += 1;
        id
    }

    pub(crate) fn record_changepoint(&mut self) {
        self.changepoints.push(self.steps);
    }

    /// Install a named AST transformer. Transformers run, in installation
    /// order, over every program handed to [`crate::run_program`].
    pub fn install_transformer(&mut self, name: RcStr, transformer: Transformer) {
        self.transformers.insert(name, transformer);
    }

    pub(crate) fn apply_transformers(&self, program: &Program) -> Program {
        let mut current = program.clone();
        for transformer in self.transformers.values() {
            current = transformer(&current);
        }
        current
    }

    /// Serialisable projection of the error log.
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.errors.iter().map(Diagnostic::from_error).collect()
    }

    /// Render the error log, optionally with elaborations.
    pub fn format_errors(&self, verbose: bool) -> String {
        let formatter = if verbose { ErrorFormatter::verbose() } else { ErrorFormatter::terse() };
        formatter.format_all(&self.errors)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
