//! Register-machine execution: raw-int specialization, terminators,
//! tail-call folding, try/catch ranges, synthetic static owners.

use std::sync::Arc;

use vela::{
    CaptureConsole, ExcKind, Interpreter, ProgramModule, SecurityPolicy, Value,
    mir::{
        CollKind, Cond, Inst, MODULE_OWNER, MirBlock, MirClass, MirField, MirFnKind, MirFunction, MirMethodRef,
        MirModule, Reg, StaticCache, SwitchKey, Terminator, TryCatchEntry, VirtualCache,
    },
    ops::BinOp,
    types::{ClassKind, Visibility},
};

fn function(name: &str, params: &[&str], frame_size: u16, blocks: Vec<MirBlock>) -> MirFunction {
    MirFunction {
        name: Arc::from(name),
        params: params.iter().map(|p| Arc::from(*p)).collect(),
        has_this: false,
        kind: MirFnKind::Normal,
        frame_size,
        blocks,
        try_catch: Vec::new(),
        reified: Vec::new(),
    }
}

fn block(insts: Vec<Inst>, term: Terminator) -> MirBlock {
    MirBlock { insts, term }
}

fn static_call(dst: Reg, method: &str, args: Vec<Reg>) -> Inst {
    Inst::InvokeStatic {
        dst: Some(dst),
        owner: Arc::from(MODULE_OWNER),
        method: Arc::from(method),
        args,
        named: None,
        cache: StaticCache::new(),
    }
}

fn run_mir(module: MirModule) -> Result<Value, vela::Exception> {
    let console = Arc::new(CaptureConsole::new());
    let mut interp = Interpreter::with_console(SecurityPolicy::unrestricted(), console);
    interp.register_builtins();
    interp.execute(ProgramModule::Mir(module))
}

fn expect_int(result: Result<Value, vela::Exception>, expected: i64) {
    let v = result.expect("execution failed");
    assert!(v.equals(&Value::Int(expected)), "expected {expected}, got {v:?}");
}

#[test]
fn raw_int_arithmetic_stays_unboxed_until_return() {
    // main() = 6 * 7
    let mut module = MirModule::new("m");
    module.add_function(function(
        "main",
        &[],
        3,
        vec![block(
            vec![
                Inst::ConstInt { dst: 0, value: 6 },
                Inst::ConstInt { dst: 1, value: 7 },
                Inst::Binary {
                    dst: 2,
                    op: BinOp::Mul,
                    lhs: 0,
                    rhs: 1,
                },
            ],
            Terminator::Return(Some(2)),
        )],
    ));
    expect_int(run_mir(module), 42);
}

#[test]
fn raw_division_by_zero_raises() {
    let mut module = MirModule::new("m");
    module.add_function(function(
        "main",
        &[],
        3,
        vec![block(
            vec![
                Inst::ConstInt { dst: 0, value: 1 },
                Inst::ConstInt { dst: 1, value: 0 },
                Inst::Binary {
                    dst: 2,
                    op: BinOp::Div,
                    lhs: 0,
                    rhs: 1,
                },
            ],
            Terminator::Return(Some(2)),
        )],
    ));
    let err = run_mir(module).unwrap_err();
    assert_eq!(err.kind, ExcKind::ArithmeticError);
}

#[test]
fn raw_int_never_equals_null() {
    let mut module = MirModule::new("m");
    module.add_function(function(
        "main",
        &[],
        3,
        vec![block(
            vec![
                Inst::ConstInt { dst: 0, value: 5 },
                Inst::ConstNull { dst: 1 },
                Inst::Binary {
                    dst: 2,
                    op: BinOp::Eq,
                    lhs: 0,
                    rhs: 1,
                },
            ],
            Terminator::Return(Some(2)),
        )],
    ));
    let v = run_mir(module).unwrap();
    assert!(v.equals(&Value::Bool(false)));
}

#[test]
fn fused_branch_and_goto_threading() {
    // main() = if (3 < 5) goes through an empty block to return 1 else 2.
    // Block 1 is empty and ends in a goto, exercising one-step threading.
    let mut module = MirModule::new("m");
    module.add_function(function(
        "main",
        &[],
        2,
        vec![
            // b0: branch on fused compare
            block(
                vec![
                    Inst::ConstInt { dst: 0, value: 3 },
                    Inst::ConstInt { dst: 1, value: 5 },
                ],
                Terminator::Branch {
                    cond: Cond::Cmp {
                        op: BinOp::Lt,
                        lhs: 0,
                        rhs: 1,
                    },
                    then_bb: 1,
                    else_bb: 3,
                },
            ),
            // b1: empty, threads to b2
            block(vec![], Terminator::Goto(2)),
            // b2: return 1
            block(vec![Inst::ConstInt { dst: 0, value: 1 }], Terminator::Return(Some(0))),
            // b3: return 2
            block(vec![Inst::ConstInt { dst: 0, value: 2 }], Terminator::Return(Some(0))),
        ],
    ));
    expect_int(run_mir(module), 1);
}

#[test]
fn tail_call_folding_keeps_stack_bounded() {
    // sum(n, acc) = if n == 0 then acc else sum(n - 1, acc + n), as a
    // TAIL_CALL terminator. 200_000 folded calls must complete.
    let mut module = MirModule::new("m");
    module.add_function(MirFunction {
        name: Arc::from("sum"),
        params: vec![Arc::from("n"), Arc::from("acc")],
        has_this: false,
        kind: MirFnKind::Normal,
        frame_size: 6,
        blocks: vec![
            block(
                vec![Inst::ConstInt { dst: 2, value: 0 }],
                Terminator::Branch {
                    cond: Cond::Cmp {
                        op: BinOp::Eq,
                        lhs: 0,
                        rhs: 2,
                    },
                    then_bb: 1,
                    else_bb: 2,
                },
            ),
            block(vec![], Terminator::Return(Some(1))),
            block(
                vec![
                    Inst::ConstInt { dst: 3, value: 1 },
                    Inst::Binary {
                        dst: 4,
                        op: BinOp::Sub,
                        lhs: 0,
                        rhs: 3,
                    },
                    Inst::Binary {
                        dst: 5,
                        op: BinOp::Add,
                        lhs: 1,
                        rhs: 0,
                    },
                ],
                Terminator::TailCall { args: vec![4, 5] },
            ),
        ],
        try_catch: Vec::new(),
        reified: Vec::new(),
    });
    module.add_function(function(
        "main",
        &[],
        3,
        vec![block(
            vec![
                Inst::ConstInt { dst: 0, value: 200_000 },
                Inst::ConstInt { dst: 1, value: 0 },
                static_call(2, "sum", vec![0, 1]),
            ],
            Terminator::Return(Some(2)),
        )],
    ));
    let v = run_mir(module).unwrap();
    assert!(v.equals(&Value::Int(20_000_100_000)));
}

#[test]
fn try_catch_range_catches_thrown_value() {
    // main: block 0 throws "boom"; handler (block 1) returns the exception.
    let mut module = MirModule::new("m");
    module.add_function(MirFunction {
        name: Arc::from("main"),
        params: vec![],
        has_this: false,
        kind: MirFnKind::Normal,
        frame_size: 2,
        blocks: vec![
            block(
                vec![Inst::ConstString {
                    dst: 0,
                    value: Arc::from("boom"),
                }],
                Terminator::Throw(0),
            ),
            block(vec![], Terminator::Return(Some(1))),
        ],
        try_catch: vec![TryCatchEntry {
            try_start_block: 0,
            try_end_block: 0,
            handler_block: 1,
            exception_local: 1,
        }],
        reified: Vec::new(),
    });
    let v = run_mir(module).unwrap();
    assert!(v.equals(&Value::str("boom")));
}

#[test]
fn uncatchable_errors_ignore_handlers() {
    // Division by zero is catchable; a loop-limit violation is not. Build a
    // spin loop wrapped in a handler and cap the back-edges.
    let mut module = MirModule::new("m");
    module.add_function(MirFunction {
        name: Arc::from("main"),
        params: vec![],
        has_this: false,
        kind: MirFnKind::Normal,
        frame_size: 2,
        blocks: vec![
            // b0: spin via self tail call
            block(vec![], Terminator::TailCall { args: vec![] }),
            // b1: handler returns 0 (must never run)
            block(vec![Inst::ConstInt { dst: 0, value: 0 }], Terminator::Return(Some(0))),
        ],
        try_catch: vec![TryCatchEntry {
            try_start_block: 0,
            try_end_block: 0,
            handler_block: 1,
            exception_local: 1,
        }],
        reified: Vec::new(),
    });
    let mut policy = SecurityPolicy::unrestricted();
    policy.max_loop_iterations = 1_000;
    let console = Arc::new(CaptureConsole::new());
    let mut interp = Interpreter::with_console(policy, console);
    interp.register_builtins();
    let err = interp.execute(ProgramModule::Mir(module)).unwrap_err();
    assert_eq!(err.kind, ExcKind::LoopLimit);
}

#[test]
fn dense_switch_on_strings() {
    let mut module = MirModule::new("m");
    module.add_function(function(
        "main",
        &[],
        2,
        vec![
            block(
                vec![Inst::ConstString {
                    dst: 0,
                    value: Arc::from("two"),
                }],
                Terminator::Switch {
                    src: 0,
                    keys: vec![(SwitchKey::Str(Arc::from("one")), 1), (SwitchKey::Str(Arc::from("two")), 2)],
                    default: 3,
                },
            ),
            block(vec![Inst::ConstInt { dst: 1, value: 1 }], Terminator::Return(Some(1))),
            block(vec![Inst::ConstInt { dst: 1, value: 2 }], Terminator::Return(Some(1))),
            block(vec![Inst::ConstInt { dst: 1, value: -1 }], Terminator::Return(Some(1))),
        ],
    ));
    expect_int(run_mir(module), 2);
}

#[test]
fn collections_and_raw_index_paths() {
    // xs = [10, 20, 30]; xs[1] read lands raw; xs[1] = xs[1] + 5; return xs[1]
    let mut module = MirModule::new("m");
    module.add_function(function(
        "main",
        &[],
        8,
        vec![block(
            vec![
                Inst::ConstInt { dst: 0, value: 10 },
                Inst::ConstInt { dst: 1, value: 20 },
                Inst::ConstInt { dst: 2, value: 30 },
                Inst::NewCollection {
                    dst: 3,
                    kind: CollKind::List,
                    items: vec![0, 1, 2],
                },
                Inst::ConstInt { dst: 4, value: 1 },
                Inst::IndexGet { dst: 5, recv: 3, index: 4 },
                Inst::ConstInt { dst: 6, value: 5 },
                Inst::Binary {
                    dst: 7,
                    op: BinOp::Add,
                    lhs: 5,
                    rhs: 6,
                },
                Inst::IndexSet { recv: 3, index: 4, src: 7 },
                Inst::IndexGet { dst: 5, recv: 3, index: 4 },
            ],
            Terminator::Return(Some(5)),
        )],
    ));
    expect_int(run_mir(module), 25);
}

#[test]
fn env_ops_define_get_and_duplicate() {
    fn env_call(dst: Option<Reg>, op: &str, name: &str, args: Vec<Reg>) -> Inst {
        Inst::InvokeStatic {
            dst,
            owner: Arc::from(format!("$ENV|{op}|")),
            method: Arc::from(name),
            args,
            named: None,
            cache: StaticCache::new(),
        }
    }

    let mut module = MirModule::new("m");
    module.add_function(function(
        "main",
        &[],
        3,
        vec![block(
            vec![
                Inst::ConstInt { dst: 0, value: 11 },
                env_call(None, "defineVal", "answer", vec![0]),
                env_call(Some(1), "get", "answer", vec![]),
            ],
            Terminator::Return(Some(1)),
        )],
    ));
    expect_int(run_mir(module), 11);

    // duplicate defineVal raises DuplicateBinding outside REPL mode
    let mut module = MirModule::new("m");
    module.add_function(function(
        "main",
        &[],
        2,
        vec![block(
            vec![
                Inst::ConstInt { dst: 0, value: 1 },
                env_call(None, "defineVal", "x", vec![0]),
                env_call(None, "defineVal", "x", vec![0]),
            ],
            Terminator::Return(None),
        )],
    ));
    let err = run_mir(module).unwrap_err();
    assert_eq!(err.kind, ExcKind::DuplicateBinding);
}

#[test]
fn range_create_synthetic_owner() {
    // $RANGE.create(1, 5, true) -> inclusive range of size 5
    let mut module = MirModule::new("m");
    module.add_function(function(
        "main",
        &[],
        4,
        vec![block(
            vec![
                Inst::ConstInt { dst: 0, value: 1 },
                Inst::ConstInt { dst: 1, value: 5 },
                Inst::ConstBool { dst: 2, value: true },
                Inst::InvokeStatic {
                    dst: Some(3),
                    owner: Arc::from("$RANGE"),
                    method: Arc::from("create"),
                    args: vec![0, 1, 2],
                    named: None,
                    cache: StaticCache::new(),
                },
            ],
            Terminator::Return(Some(3)),
        )],
    ));
    let v = run_mir(module).unwrap();
    let Value::Range(range) = v else { panic!("expected range, got {v:?}") };
    assert_eq!(range.size(), 5);
}

#[test]
fn partial_application_invokes_with_placeholders() {
    // Build a partial over the `range` builtin with operands
    // [placeholder, 6] (mask 0b01), fetch the builtin through $ENV, then
    // invoke the partial with 2: range(2, 6) has size 4.
    let mut module = MirModule::new("m");
    module.add_function(function(
        "main",
        &[],
        7,
        vec![block(
            vec![
                Inst::InvokeStatic {
                    dst: Some(0),
                    owner: Arc::from("$ENV|get|"),
                    method: Arc::from("range"),
                    args: vec![],
                    named: None,
                    cache: StaticCache::new(),
                },
                Inst::ConstNull { dst: 1 },
                Inst::ConstInt { dst: 2, value: 6 },
                Inst::InvokeStatic {
                    dst: Some(3),
                    owner: Arc::from("$PartialApplication|1"),
                    method: Arc::from("build"),
                    args: vec![0, 1, 2],
                    named: None,
                    cache: StaticCache::new(),
                },
                Inst::ConstInt { dst: 4, value: 2 },
                Inst::InvokeVirtual {
                    dst: Some(5),
                    recv: 3,
                    method: Arc::from("invoke"),
                    args: vec![4],
                    named: None,
                    cache: VirtualCache::new(),
                },
                Inst::GetField {
                    dst: 6,
                    obj: 5,
                    name: Arc::from("size"),
                },
            ],
            Terminator::Return(Some(6)),
        )],
    ));
    expect_int(run_mir(module), 4);
}

#[test]
fn pipe_call_resolves_module_functions() {
    // double(x) = x * 2; main pipes 21 through it.
    let mut module = MirModule::new("m");
    module.add_function(function(
        "double",
        &["x"],
        3,
        vec![block(
            vec![
                Inst::ConstInt { dst: 1, value: 2 },
                Inst::Binary {
                    dst: 2,
                    op: BinOp::Mul,
                    lhs: 0,
                    rhs: 1,
                },
            ],
            Terminator::Return(Some(2)),
        )],
    ));
    module.add_function(function(
        "main",
        &[],
        2,
        vec![block(
            vec![
                Inst::ConstInt { dst: 0, value: 21 },
                Inst::InvokeStatic {
                    dst: Some(1),
                    owner: Arc::from("$PipeCall"),
                    method: Arc::from("double"),
                    args: vec![0],
                    named: None,
                    cache: StaticCache::new(),
                },
            ],
            Terminator::Return(Some(1)),
        )],
    ));
    expect_int(run_mir(module), 42);
}

#[test]
fn mir_classes_fields_and_virtual_dispatch() {
    // class Box { var v; fun reading() = this.v } used twice so the call
    // site's inline cache gets a hit on the second call.
    let mut module = MirModule::new("m");
    module.add_function(MirFunction {
        name: Arc::from("Box_reading"),
        params: vec![Arc::from("this")],
        has_this: true,
        kind: MirFnKind::Normal,
        frame_size: 2,
        blocks: vec![block(
            vec![Inst::GetField {
                dst: 1,
                obj: 0,
                name: Arc::from("v"),
            }],
            Terminator::Return(Some(1)),
        )],
        try_catch: Vec::new(),
        reified: Vec::new(),
    });
    module.classes.push(MirClass {
        name: Arc::from("Box"),
        kind: ClassKind::Class,
        superclass: None,
        interfaces: Vec::new(),
        is_abstract: false,
        is_sealed: false,
        is_data: false,
        fields: vec![MirField {
            name: Arc::from("v"),
            mutable: true,
            visibility: Visibility::Public,
        }],
        methods: vec![MirMethodRef {
            name: Arc::from("reading"),
            function: Arc::from("Box_reading"),
            visibility: Visibility::Public,
            is_static: false,
            is_default: false,
            is_abstract: false,
        }],
        constructors: Vec::new(),
        data_fields: Vec::new(),
        annotations: Vec::new(),
        enum_entries: Vec::new(),
    });
    module.add_function(function(
        "main",
        &[],
        5,
        vec![block(
            vec![
                Inst::NewObject {
                    dst: 0,
                    owner: Arc::from("Box"),
                },
                Inst::ConstInt { dst: 1, value: 33 },
                Inst::SetField {
                    obj: 0,
                    name: Arc::from("v"),
                    src: 1,
                },
                // first call: cache miss, resolve + fill
                Inst::InvokeVirtual {
                    dst: Some(2),
                    recv: 0,
                    method: Arc::from("reading"),
                    args: vec![],
                    named: None,
                    cache: VirtualCache::new(),
                },
                // second call through the same kind of site
                Inst::InvokeVirtual {
                    dst: Some(3),
                    recv: 0,
                    method: Arc::from("reading"),
                    args: vec![],
                    named: None,
                    cache: VirtualCache::new(),
                },
                Inst::Binary {
                    dst: 4,
                    op: BinOp::Add,
                    lhs: 2,
                    rhs: 3,
                },
            ],
            Terminator::Return(Some(4)),
        )],
    ));
    expect_int(run_mir(module), 66);
}

#[test]
fn reified_type_arguments_flow_into_type_checks() {
    // isT(x) with reified [T]: returns x is T. Called as `isT#Int`.
    let mut module = MirModule::new("m");
    module.add_function(MirFunction {
        name: Arc::from("isT"),
        params: vec![Arc::from("x")],
        has_this: false,
        kind: MirFnKind::Normal,
        frame_size: 2,
        blocks: vec![block(
            vec![Inst::TypeCheck {
                dst: 1,
                src: 0,
                name: Arc::from("T"),
            }],
            Terminator::Return(Some(1)),
        )],
        try_catch: Vec::new(),
        reified: vec![Arc::from("T")],
    });
    module.add_function(function(
        "main",
        &[],
        3,
        vec![block(
            vec![
                Inst::ConstInt { dst: 0, value: 9 },
                static_call(1, "isT#Int", vec![0]),
                static_call(2, "isT#String", vec![0]),
            ],
            Terminator::Branch {
                cond: Cond::Reg(2),
                then_bb: 1,
                else_bb: 2,
            },
        ),
        block(vec![Inst::ConstInt { dst: 0, value: -1 }], Terminator::Return(Some(0))),
        // isT#Int must be true, isT#String false -> land here, return r1
        block(vec![], Terminator::Return(Some(1))),
        ],
    ));
    let v = run_mir(module).unwrap();
    assert!(v.equals(&Value::Bool(true)));
}

#[test]
fn virtual_cache_stores_and_hits_by_class_id() {
    use vela::types::Callable;

    let cache = VirtualCache::new();
    let id_a = vela::types::ClassId::new(0);
    let id_b = vela::types::ClassId::new(1);
    assert!(cache.lookup(id_a).is_none());
    cache.store(id_a, Callable::Builtin(vela::Builtin::TypeOf));
    assert!(cache.lookup(id_a).is_some());
    // a different receiver class misses
    assert!(cache.lookup(id_b).is_none());
}

#[test]
fn const_float_boxes_as_double() {
    let mut module = MirModule::new("m");
    module.add_function(function(
        "main",
        &[],
        1,
        vec![block(
            vec![Inst::ConstFloat { dst: 0, value: 2.5 }],
            Terminator::Return(Some(0)),
        )],
    ));
    let v = run_mir(module).unwrap();
    assert!(v.equals(&Value::Double(2.5)));
}
