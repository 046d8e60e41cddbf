//! End-to-end scenarios for the CSE machine.

use std::cell::RefCell;
use std::rc::Rc;

use slc::ast::{build, BinaryOp, Program};
use slc::builtins::{BuiltinRegistry, RecordingHost};
use slc::error::{RuntimeErrorKind, SourceError};
use slc::session::{EvalOptions, EvalResult, Level, Session, SessionStatus};
use slc::value::{stringify, Value};

fn session() -> Session {
    Session::with_defaults(Level::Four)
}

fn session_with(options: EvalOptions) -> Session {
    Session::new(
        Level::Four,
        options,
        BuiltinRegistry::core(),
        Box::new(RecordingHost::default()),
    )
}

fn recording_session() -> (Session, Rc<RefCell<RecordingHost>>) {
    let host = Rc::new(RefCell::new(RecordingHost::default()));
    let session = Session::new(
        Level::Four,
        EvalOptions::default(),
        BuiltinRegistry::core(),
        Box::new(host.clone()),
    );
    (session, host)
}

fn run(session: &mut Session, program: &Program) -> Value {
    match slc::run_program(session, program) {
        EvalResult::Finished { value } => value,
        other => panic!("expected Finished, got {:?}\n{}", other, session.format_errors(true)),
    }
}

fn run_error(session: &mut Session, program: &Program) -> SourceError {
    match slc::run_program(session, program) {
        EvalResult::Error { mut errors } => errors.pop().expect("at least one error"),
        other => panic!("expected Error, got {:?}", other),
    }
}

fn runtime_kind(error: &SourceError) -> &RuntimeErrorKind {
    match error {
        SourceError::Runtime(e) => &e.kind,
        other => panic!("expected runtime error, got {:?}", other),
    }
}

// ---------------------------------------------------------------------------
// Arithmetic and operators
// ---------------------------------------------------------------------------

#[test]
fn precedence_shaped_tree_evaluates() {
    // 1 + 2 * 3;
    let program = build::program(vec![build::expr_stmt(build::binary(
        BinaryOp::Add,
        build::number(1.0),
        build::binary(BinaryOp::Mul, build::number(2.0), build::number(3.0)),
    ))]);
    assert_eq!(run(&mut session(), &program), Value::Number(7.0));
}

#[test]
fn string_concatenation_and_comparison() {
    // "foo" + "bar" === "foobar";
    let program = build::program(vec![build::expr_stmt(build::binary(
        BinaryOp::Eq,
        build::binary(BinaryOp::Add, build::string("foo"), build::string("bar")),
        build::string("foobar"),
    ))]);
    assert_eq!(run(&mut session(), &program), Value::Bool(true));
}

#[test]
fn operand_type_errors_carry_side_information() {
    // 1 + "x";
    let program = build::program(vec![build::expr_stmt(build::binary(
        BinaryOp::Add,
        build::number(1.0),
        build::string("x"),
    ))]);
    let err = run_error(&mut session(), &program);
    assert!(err.explain().contains("right hand side"));
}

#[test]
fn division_by_zero_follows_js() {
    let program = build::program(vec![build::expr_stmt(build::binary(
        BinaryOp::Div,
        build::number(1.0),
        build::number(0.0),
    ))]);
    assert_eq!(run(&mut session(), &program), Value::Number(f64::INFINITY));
}

// ---------------------------------------------------------------------------
// Declarations, scope, environments
// ---------------------------------------------------------------------------

#[test]
fn const_declaration_and_use() {
    let program = build::program(vec![
        build::const_decl("x", build::number(40.0)),
        build::expr_stmt(build::binary(BinaryOp::Add, build::ident("x"), build::number(2.0))),
    ]);
    assert_eq!(run(&mut session(), &program), Value::Number(42.0));
}

#[test]
fn assignment_to_const_is_a_runtime_error() {
    // const x = 1; x = 2;
    let program = build::program(vec![
        build::const_decl("x", build::number(1.0)),
        build::expr_stmt(build::assign("x", build::number(2.0))),
    ]);
    let err = run_error(&mut session(), &program);
    assert!(matches!(runtime_kind(&err), RuntimeErrorKind::ConstAssignment { .. }));
    assert!(err.explain().contains("constant x"));
}

#[test]
fn let_assignment_updates_nearest_binding() {
    // let x = 1; { x = 5; } x;
    let program = build::program(vec![
        build::let_decl("x", build::number(1.0)),
        build::block(vec![build::expr_stmt(build::assign("x", build::number(5.0)))]),
        build::expr_stmt(build::ident("x")),
    ]);
    assert_eq!(run(&mut session(), &program), Value::Number(5.0));
}

#[test]
fn undefined_variable_is_reported_with_name() {
    let program = build::program(vec![build::expr_stmt(build::ident("ghost"))]);
    let err = run_error(&mut session(), &program);
    assert!(matches!(runtime_kind(&err), RuntimeErrorKind::UndefinedVariable { .. }));
    assert!(err.explain().contains("ghost"));
}

#[test]
fn use_before_declaration_hits_the_dead_zone() {
    // x; const x = 1;
    let program = build::program(vec![
        build::expr_stmt(build::ident("x")),
        build::const_decl("x", build::number(1.0)),
    ]);
    let err = run_error(&mut session(), &program);
    assert!(matches!(runtime_kind(&err), RuntimeErrorKind::UnassignedVariable { .. }));
}

#[test]
fn block_scoping_shadows_and_restores() {
    // const x = 1; { const x = 2; } x;
    let program = build::program(vec![
        build::const_decl("x", build::number(1.0)),
        build::block(vec![build::const_decl("x", build::number(2.0))]),
        build::expr_stmt(build::ident("x")),
    ]);
    assert_eq!(run(&mut session(), &program), Value::Number(1.0));
}

#[test]
fn environment_chain_stays_acyclic() {
    let program = build::program(vec![
        build::function_decl(
            "f",
            &["n"],
            vec![build::ret(build::ident("n"))],
        ),
        build::expr_stmt(build::call_named("f", vec![build::number(1.0)])),
    ]);
    let mut s = session();
    run(&mut s, &program);
    assert_eq!(slc::environment::chain_depth(&s.global_env), 0);
}

// ---------------------------------------------------------------------------
// Functions, recursion, tail calls
// ---------------------------------------------------------------------------

#[test]
fn recursive_factorial_through_a_const_arrow() {
    // const f = n => n === 0 ? 1 : n * f(n - 1); f(5);
    let f = build::arrow(
        &["n"],
        build::conditional(
            build::binary(BinaryOp::Eq, build::ident("n"), build::number(0.0)),
            build::number(1.0),
            build::binary(
                BinaryOp::Mul,
                build::ident("n"),
                build::call_named("f", vec![build::binary(
                    BinaryOp::Sub,
                    build::ident("n"),
                    build::number(1.0),
                )]),
            ),
        ),
    );
    let program = build::program(vec![
        build::const_decl("f", f),
        build::expr_stmt(build::call_named("f", vec![build::number(5.0)])),
    ]);
    assert_eq!(run(&mut session(), &program), Value::Number(120.0));
}

fn tail_recursive_program(n: f64) -> Program {
    // const f = (n, a) => n === 0 ? a : f(n - 1, n * a); f(n, 1);
    let f = build::arrow(
        &["n", "a"],
        build::conditional(
            build::binary(BinaryOp::Eq, build::ident("n"), build::number(0.0)),
            build::ident("a"),
            build::call_named(
                "f",
                vec![
                    build::binary(BinaryOp::Sub, build::ident("n"), build::number(1.0)),
                    build::binary(BinaryOp::Mul, build::ident("n"), build::ident("a")),
                ],
            ),
        ),
    );
    build::program(vec![
        build::const_decl("f", f),
        build::expr_stmt(build::call_named("f", vec![build::number(n), build::number(1.0)])),
    ])
}

#[test]
fn tail_recursion_completes_ten_thousand_iterations() {
    let mut s = session();
    let value = run(&mut s, &tail_recursive_program(10_000.0));
    assert!(matches!(value, Value::Number(_)));
}

#[test]
fn tail_recursion_keeps_control_depth_bounded() {
    let mut shallow = session();
    run(&mut shallow, &tail_recursive_program(10.0));
    let mut deep = session();
    run(&mut deep, &tail_recursive_program(10_000.0));
    // A thousandfold more iterations must not grow the control stack.
    assert_eq!(shallow.max_control_depth, deep.max_control_depth);
}

fn block_tail_recursive_program(n: f64) -> Program {
    // function f(n, a) { if (n === 0) { return a; } return f(n - 1, n * a); }
    // f(n, 1);
    build::program(vec![
        build::function_decl(
            "f",
            &["n", "a"],
            vec![
                build::if_stmt(
                    build::binary(BinaryOp::Eq, build::ident("n"), build::number(0.0)),
                    build::block(vec![build::ret(build::ident("a"))]),
                    None,
                ),
                build::ret(build::call_named(
                    "f",
                    vec![
                        build::binary(BinaryOp::Sub, build::ident("n"), build::number(1.0)),
                        build::binary(BinaryOp::Mul, build::ident("n"), build::ident("a")),
                    ],
                )),
            ],
        ),
        build::expr_stmt(build::call_named("f", vec![build::number(n), build::number(1.0)])),
    ])
}

#[test]
fn block_bodied_tail_recursion_keeps_control_depth_bounded() {
    // The explicit `return f(...)` form: the tail call must also sweep the
    // superseded frame's trailing pop and synthetic return off the control,
    // or depth grows with the iteration count.
    let mut shallow = session();
    let small = run(&mut shallow, &block_tail_recursive_program(10.0));
    assert_eq!(small, Value::Number(3_628_800.0));
    let mut deep = session();
    let value = run(&mut deep, &block_tail_recursive_program(10_000.0));
    assert!(matches!(value, Value::Number(_)));
    assert_eq!(shallow.max_control_depth, deep.max_control_depth);
}

#[test]
fn function_declarations_hoist_within_their_scope() {
    // f(); is legal before function f() { return 7; } in the same scope.
    let program = build::program(vec![
        build::const_decl("r", build::call_named("f", vec![])),
        build::function_decl("f", &[], vec![build::ret(build::number(7.0))]),
    ]);
    // The call runs before `f`'s declaration statement executed: dead zone.
    let err = run_error(&mut session(), &program);
    assert!(matches!(runtime_kind(&err), RuntimeErrorKind::UnassignedVariable { .. }));
}

#[test]
fn function_without_return_yields_undefined() {
    let program = build::program(vec![
        build::function_decl("f", &[], vec![build::expr_stmt(build::number(5.0))]),
        build::expr_stmt(build::call_named("f", vec![])),
    ]);
    assert_eq!(run(&mut session(), &program), Value::Undefined);
}

#[test]
fn arity_mismatch_names_the_function() {
    let program = build::program(vec![
        build::function_decl("f", &["a", "b"], vec![build::ret(build::ident("a"))]),
        build::expr_stmt(build::call_named("f", vec![build::number(1.0)])),
    ]);
    let err = run_error(&mut session(), &program);
    match runtime_kind(&err) {
        RuntimeErrorKind::ArityMismatch { expected, got, .. } => {
            assert_eq!((*expected, *got), (2, 1));
        }
        other => panic!("unexpected kind: {:?}", other),
    }
    assert!(err.explain().contains("Function f"));
}

#[test]
fn calling_a_number_is_not_a_function() {
    let program = build::program(vec![build::expr_stmt(build::call(
        build::number(3.0),
        vec![],
    ))]);
    let err = run_error(&mut session(), &program);
    assert!(matches!(runtime_kind(&err), RuntimeErrorKind::CallingNonFunction { .. }));
}

#[test]
fn closures_capture_their_defining_environment() {
    // function make(n) { return x => x + n; } const add2 = make(2); add2(40);
    let program = build::program(vec![
        build::function_decl(
            "make",
            &["n"],
            vec![build::ret(build::arrow(
                &["x"],
                build::binary(BinaryOp::Add, build::ident("x"), build::ident("n")),
            ))],
        ),
        build::const_decl("add2", build::call_named("make", vec![build::number(2.0)])),
        build::expr_stmt(build::call_named("add2", vec![build::number(40.0)])),
    ]);
    assert_eq!(run(&mut session(), &program), Value::Number(42.0));
}

// ---------------------------------------------------------------------------
// Control flow
// ---------------------------------------------------------------------------

#[test]
fn while_loop_counts_up() {
    // let i = 0; let s = 0; while (i < 5) { s = s + i; i = i + 1; } s;
    let program = build::program(vec![
        build::let_decl("i", build::number(0.0)),
        build::let_decl("s", build::number(0.0)),
        build::while_stmt(
            build::binary(BinaryOp::Lt, build::ident("i"), build::number(5.0)),
            build::block(vec![
                build::expr_stmt(build::assign(
                    "s",
                    build::binary(BinaryOp::Add, build::ident("s"), build::ident("i")),
                )),
                build::expr_stmt(build::assign(
                    "i",
                    build::binary(BinaryOp::Add, build::ident("i"), build::number(1.0)),
                )),
            ]),
        ),
        build::expr_stmt(build::ident("s")),
    ]);
    assert_eq!(run(&mut session(), &program), Value::Number(10.0));
}

#[test]
fn for_loop_with_declared_counter() {
    // let s = 0; for (let i = 0; i < 4; i = i + 1) { s = s + i; } s;
    let program = build::program(vec![
        build::let_decl("s", build::number(0.0)),
        build::for_stmt(
            Some(slc::ast::ForInit::Declaration {
                kind: slc::ast::DeclKind::Let,
                name: "i".into(),
                init: build::number(0.0),
            }),
            Some(build::binary(BinaryOp::Lt, build::ident("i"), build::number(4.0))),
            Some(build::assign(
                "i",
                build::binary(BinaryOp::Add, build::ident("i"), build::number(1.0)),
            )),
            build::block(vec![build::expr_stmt(build::assign(
                "s",
                build::binary(BinaryOp::Add, build::ident("s"), build::ident("i")),
            ))]),
        ),
        build::expr_stmt(build::ident("s")),
    ]);
    assert_eq!(run(&mut session(), &program), Value::Number(6.0));
}

#[test]
fn condition_must_be_boolean() {
    // if (1) {} else {}
    let program = build::program(vec![build::if_stmt(
        build::number(1.0),
        build::block(vec![]),
        Some(build::block(vec![])),
    )]);
    let err = run_error(&mut session(), &program);
    assert!(matches!(runtime_kind(&err), RuntimeErrorKind::ConditionType { .. }));
}

#[test]
fn logical_operators_short_circuit() {
    // false && ghost(); ghost must never be called.
    let program = build::program(vec![build::expr_stmt(build::logical(
        slc::ast::LogicalOp::And,
        build::bool(false),
        build::call_named("ghost", vec![]),
    ))]);
    assert_eq!(run(&mut session(), &program), Value::Bool(false));
}

// ---------------------------------------------------------------------------
// Pairs, lists, arrays, display
// ---------------------------------------------------------------------------

#[test]
fn pair_chain_displays_as_nested_lists() {
    // display(pair(1, pair(2, pair(3, null))));
    let chain = build::call_named(
        "pair",
        vec![
            build::number(1.0),
            build::call_named(
                "pair",
                vec![
                    build::number(2.0),
                    build::call_named("pair", vec![build::number(3.0), build::null()]),
                ],
            ),
        ],
    );
    let program = build::program(vec![build::expr_stmt(build::call_named("display", vec![chain]))]);
    let (mut s, host) = recording_session();
    run(&mut s, &program);
    assert_eq!(host.borrow().displayed, vec!["[1, [2, [3, null]]]"]);
}

#[test]
fn cyclic_pair_display_terminates() {
    // const p = pair(1, null); set_tail(p, p); display(p);
    let program = build::program(vec![
        build::const_decl(
            "p",
            build::call_named("pair", vec![build::number(1.0), build::null()]),
        ),
        build::expr_stmt(build::call_named("set_tail", vec![build::ident("p"), build::ident("p")])),
        build::expr_stmt(build::call_named("display", vec![build::ident("p")])),
    ]);
    let (mut s, host) = recording_session();
    run(&mut s, &program);
    assert_eq!(host.borrow().displayed, vec!["[1, ...<circular>]"]);
}

#[test]
fn pairs_share_structure_by_reference() {
    // const p = pair(1, null); set_head(p, 9); head(p);
    let program = build::program(vec![
        build::const_decl(
            "p",
            build::call_named("pair", vec![build::number(1.0), build::null()]),
        ),
        build::expr_stmt(build::call_named("set_head", vec![build::ident("p"), build::number(9.0)])),
        build::expr_stmt(build::call_named("head", vec![build::ident("p")])),
    ]);
    assert_eq!(run(&mut session(), &program), Value::Number(9.0));
}

#[test]
fn array_literal_access_and_assignment() {
    // const a = [1, 2, 3]; a[1] = 20; a[0] + a[1];
    let program = build::program(vec![
        build::const_decl(
            "a",
            build::array(vec![build::number(1.0), build::number(2.0), build::number(3.0)]),
        ),
        build::expr_stmt(build::array_assign(
            build::ident("a"),
            build::number(1.0),
            build::number(20.0),
        )),
        build::expr_stmt(build::binary(
            BinaryOp::Add,
            build::member(build::ident("a"), build::number(0.0)),
            build::member(build::ident("a"), build::number(1.0)),
        )),
    ]);
    assert_eq!(run(&mut session(), &program), Value::Number(21.0));
}

#[test]
fn out_of_range_read_is_undefined_but_bad_index_errors() {
    let program = build::program(vec![
        build::const_decl("a", build::array(vec![build::number(1.0)])),
        build::expr_stmt(build::member(build::ident("a"), build::number(5.0))),
    ]);
    assert_eq!(run(&mut session(), &program), Value::Undefined);

    let program = build::program(vec![
        build::const_decl("a", build::array(vec![build::number(1.0)])),
        build::expr_stmt(build::member(build::ident("a"), build::number(-1.0))),
    ]);
    let err = run_error(&mut session(), &program);
    assert!(matches!(runtime_kind(&err), RuntimeErrorKind::InvalidArrayIndex { .. }));
}

#[test]
fn error_builtin_aborts_with_message() {
    let program = build::program(vec![build::expr_stmt(build::call_named(
        "error",
        vec![build::string("boom")],
    ))]);
    let err = run_error(&mut session(), &program);
    assert!(matches!(runtime_kind(&err), RuntimeErrorKind::BuiltinFailure { .. }));
    assert!(err.explain().contains("boom"));
}

#[test]
fn allocations_are_attributed_to_the_allocating_frame() {
    // function f() { return pair(1, null); } f();
    let program = build::program(vec![
        build::function_decl(
            "f",
            &[],
            vec![build::ret(build::call_named(
                "pair",
                vec![build::number(1.0), build::null()],
            ))],
        ),
        build::expr_stmt(build::call_named("f", vec![])),
    ]);
    let mut s = session();
    let value = run(&mut s, &program);
    // The pair was allocated inside f's frame, not the program frame.
    let pair_owner_heaps: usize = {
        fn count(env: &slc::environment::EnvRef, target: &Value) -> usize {
            let frame = env.borrow();
            frame.heap.iter().filter(|v| slc::value::identical(v, target)).count()
        }
        count(&s.global_env, &value)
    };
    assert_eq!(pair_owner_heaps, 0, "global frame must not own the pair");
    assert_eq!(stringify(&value), "[1, null]");
}

// ---------------------------------------------------------------------------
// Suspension, resumption, budgets
// ---------------------------------------------------------------------------

fn infinite_loop() -> Program {
    build::program(vec![build::while_stmt(build::bool(true), build::block(vec![]))])
}

#[test]
fn step_limit_suspends_and_resume_continues() {
    let mut s = session_with(EvalOptions { step_limit: 1000, ..EvalOptions::default() });
    match slc::run_program(&mut s, &infinite_loop()) {
        EvalResult::Suspended => {}
        other => panic!("expected Suspended, got {:?}", other),
    }
    assert_eq!(s.status, SessionStatus::Suspended);
    let first_pause = s.steps;
    assert!(first_pause >= 1000, "≈1000 steps before suspending, saw {}", first_pause);

    match slc::resume(&mut s) {
        EvalResult::Suspended => {}
        other => panic!("expected Suspended again, got {:?}", other),
    }
    assert!(s.steps > first_pause, "resume must make progress");
}

#[test]
fn throw_infinite_loops_reports_instead_of_suspending() {
    let mut s = session_with(EvalOptions {
        step_limit: 1000,
        throw_infinite_loops: true,
        ..EvalOptions::default()
    });
    let err = run_error(&mut s, &infinite_loop());
    assert!(matches!(runtime_kind(&err), RuntimeErrorKind::PotentialInfiniteLoop));
}

#[test]
fn step_resume_equivalence() {
    // Running with a tiny budget and resuming repeatedly must produce the
    // same answer as running unlimited.
    let program = tail_recursive_program(50.0);
    let mut unlimited = session();
    let expected = run(&mut unlimited, &program);

    let mut stepped = session_with(EvalOptions { step_limit: 7, ..EvalOptions::default() });
    let mut result = slc::run_program(&mut stepped, &program);
    let mut rounds = 0;
    let value = loop {
        match result {
            EvalResult::Finished { value } => break value,
            EvalResult::Suspended => {
                rounds += 1;
                assert!(rounds < 100_000, "resume loop ran away");
                result = slc::resume(&mut stepped);
            }
            EvalResult::Error { .. } => panic!("{}", stepped.format_errors(true)),
        }
    };
    assert!(rounds > 0, "budget of 7 must actually suspend");
    assert_eq!(value, expected);
}

#[test]
fn determinism_two_runs_agree() {
    let program = tail_recursive_program(30.0);
    let mut a = session();
    let mut b = session();
    assert_eq!(run(&mut a, &program), run(&mut b, &program));
    assert_eq!(a.steps, b.steps);
    assert_eq!(a.changepoints, b.changepoints);
}

#[test]
fn breakpoints_fire_at_exact_steps() {
    let mut s = session_with(EvalOptions {
        breakpoints: vec![5],
        original_max_exec_time: 100,
        ..EvalOptions::default()
    });
    match slc::run_program(&mut s, &infinite_loop()) {
        EvalResult::Suspended => assert_eq!(s.steps, 5),
        other => panic!("expected Suspended, got {:?}", other),
    }
    // Resuming passes the breakpoint and keeps going.
    match slc::resume(&mut s) {
        EvalResult::Error { .. } => {
            // Wall-clock timeout is the only way this loop ends.
            let err = s.errors.last().expect("an error was recorded");
            assert!(matches!(runtime_kind(err), RuntimeErrorKind::Timeout { .. }));
        }
        EvalResult::Suspended => panic!("no further breakpoints were set"),
        EvalResult::Finished { .. } => panic!("while (true) cannot finish"),
    }
}

#[test]
fn interrupt_surfaces_between_steps() {
    let mut s = session();
    s.interrupt_handle().interrupt();
    let err = run_error(&mut s, &infinite_loop());
    assert!(matches!(runtime_kind(&err), RuntimeErrorKind::Interrupted));
}

#[test]
fn timeout_fires_and_extension_defers_it() {
    let mut s = session_with(EvalOptions {
        original_max_exec_time: 20,
        ..EvalOptions::default()
    });
    let err = run_error(&mut s, &infinite_loop());
    assert!(matches!(runtime_kind(&err), RuntimeErrorKind::Timeout { .. }));

    let mut s = session_with(EvalOptions {
        original_max_exec_time: 20,
        should_increase_evaluation_timeout: true,
        ..EvalOptions::default()
    });
    let start = std::time::Instant::now();
    let err = run_error(&mut s, &infinite_loop());
    assert!(matches!(runtime_kind(&err), RuntimeErrorKind::Timeout { .. }));
    // The tenfold extension must have kept it running well past 20ms.
    assert!(start.elapsed() >= std::time::Duration::from_millis(150));
}

#[test]
fn errored_sessions_stay_inspectable_but_unresumable() {
    let mut s = session();
    run_error(
        &mut s,
        &build::program(vec![build::expr_stmt(build::ident("ghost"))]),
    );
    assert_eq!(s.status, SessionStatus::Errored);
    assert_eq!(s.diagnostics().len(), 1);
    match slc::resume(&mut s) {
        EvalResult::Error { errors } => assert!(!errors.is_empty()),
        other => panic!("expected Error, got {:?}", other),
    }
}

// ---------------------------------------------------------------------------
// Program-shape corners
// ---------------------------------------------------------------------------

#[test]
fn empty_program_finishes_with_undefined() {
    let program = build::program(vec![]);
    assert_eq!(run(&mut session(), &program), Value::Undefined);
}

#[test]
fn statement_sequences_share_the_enclosing_environment() {
    // A sequence (spliced import) declaring `x`, then a use of `x` from a
    // sibling statement.
    let seq = Rc::new(slc::ast::Stmt::Sequence {
        body: vec![build::const_decl("x", build::number(4.0))],
        loc: slc::ast::SourceLoc::unknown(),
    });
    let program = build::program(vec![seq, build::expr_stmt(build::ident("x"))]);
    assert_eq!(run(&mut session(), &program), Value::Number(4.0));
}

#[test]
fn declaration_as_final_statement_yields_undefined() {
    let program = build::program(vec![build::const_decl("x", build::number(1.0))]);
    assert_eq!(run(&mut session(), &program), Value::Undefined);
}

#[test]
fn prompt_and_alert_round_trip_through_hooks() {
    let host = Rc::new(RefCell::new(RecordingHost {
        prompt_responses: vec![Some("42".to_string())],
        ..RecordingHost::default()
    }));
    let mut s = Session::new(
        Level::Four,
        EvalOptions::default(),
        BuiltinRegistry::core(),
        Box::new(host.clone()),
    );
    let program = build::program(vec![
        build::expr_stmt(build::call_named("alert", vec![build::string("hi")])),
        build::expr_stmt(build::call_named("prompt", vec![build::string("n?")])),
    ]);
    let value = run(&mut s, &program);
    assert_eq!(stringify(&value), "\"42\"");
    assert_eq!(host.borrow().alerts, vec!["hi"]);
}
