//! End-to-end evaluation through the tree-walking tier.

mod common;

use common::*;
use vela::{
    ExcKind, Value,
    ops::{BinOp, UnOp},
};

#[test]
fn arithmetic_precedence() {
    // 1 + 2 * 3
    let result = run_main(vec![ret(bin(
        BinOp::Add,
        int(1),
        bin(BinOp::Mul, int(2), int(3)),
    ))]);
    assert_int(&result, 7);
}

#[test]
fn mixed_numeric_promotion() {
    // 1 + 2.5 -> 3.5
    let result = run_main(vec![ret(bin(BinOp::Add, int(1), dbl(2.5)))]);
    assert!(result.unwrap().equals(&Value::Double(3.5)));
}

#[test]
fn integer_division_by_zero_raises() {
    let result = run_main(vec![ret(bin(BinOp::Div, int(1), int(0)))]);
    let err = result.unwrap_err();
    assert_eq!(err.kind, ExcKind::ArithmeticError);
    assert_eq!(err.message.as_deref(), Some("Division by zero"));
}

#[test]
fn string_length_and_char_indexing() {
    let result = run_main(vec![ret(member(s("hello"), "length"))]);
    assert_int(&result, 5);

    let result = run_main(vec![ret(index(s("hello"), int(1)))]);
    assert!(result.unwrap().equals(&Value::Char('e')));
}

#[test]
fn string_concatenation_with_any() {
    let result = run_main(vec![ret(bin(BinOp::Add, s("n = "), int(42)))]);
    assert_str(&result, "n = 42");
}

#[test]
fn unary_operators() {
    let result = run_main(vec![ret(un(UnOp::Neg, int(5)))]);
    assert_int(&result, -5);
    let result = run_main(vec![ret(un(UnOp::Not, boolean(false)))]);
    assert!(result.unwrap().equals(&Value::Bool(true)));
}

#[test]
fn recursive_function_sums() {
    // fun f(n) = if (n == 0) 0 else n + f(n - 1); f(100) == 5050
    let body = if_else(
        bin(BinOp::Eq, ident("n"), int(0)),
        vec![e(int(0))],
        vec![e(bin(
            BinOp::Add,
            ident("n"),
            call(ident("f"), vec![bin(BinOp::Sub, ident("n"), int(1))]),
        ))],
    );
    let (result, _) = run_script(
        vec![fun("f", &["n"], vec![e(body)])],
        vec![ret(call(ident("f"), vec![int(100)]))],
    );
    assert_int(&result, 5050);
}

#[test]
fn while_loop_with_mutation() {
    let result = run_main(vec![
        var("i", int(0)),
        var("total", int(0)),
        while_loop(
            bin(BinOp::Lt, ident("i"), int(5)),
            vec![
                e(assign("total", bin(BinOp::Add, ident("total"), ident("i")))),
                e(assign("i", bin(BinOp::Add, ident("i"), int(1)))),
            ],
        ),
        ret(ident("total")),
    ]);
    assert_int(&result, 10);
}

#[test]
fn for_over_range_ascending_and_descending() {
    // ascending inclusive: 1..=4 sums to 10
    let result = run_main(vec![
        var("total", int(0)),
        for_in(
            "i",
            range_lit(int(1), int(4), true),
            vec![e(assign("total", bin(BinOp::Add, ident("total"), ident("i"))))],
        ),
        ret(ident("total")),
    ]);
    assert_int(&result, 10);

    // descending: 3..=1 visits 3, 2, 1 in order
    let result = run_main(vec![
        var("first", null()),
        for_in(
            "i",
            range_lit(int(3), int(1), true),
            vec![e(if_else(
                bin(BinOp::Eq, ident("first"), null()),
                vec![e(assign("first", ident("i")))],
                vec![],
            ))],
        ),
        ret(ident("first")),
    ]);
    assert_int(&result, 3);
}

#[test]
fn break_exits_loop() {
    let result = run_main(vec![
        var("i", int(0)),
        while_loop(
            boolean(true),
            vec![
                e(assign("i", bin(BinOp::Add, ident("i"), int(1)))),
                e(if_else(bin(BinOp::Ge, ident("i"), int(3)), vec![brk()], vec![])),
            ],
        ),
        ret(ident("i")),
    ]);
    assert_int(&result, 3);
}

#[test]
fn lambdas_capture_immutable_bindings() {
    // val base = 10; val add = { x -> x + base }; add(5) == 15
    let result = run_main(vec![
        val("base", int(10)),
        val(
            "add",
            lambda(&["x"], vec![e(bin(BinOp::Add, ident("x"), ident("base")))]),
        ),
        ret(call(ident("add"), vec![int(5)])),
    ]);
    assert_int(&result, 15);
}

#[test]
fn lambdas_share_mutable_captures() {
    // var count = 0; val inc = { count = count + 1 }; inc(); inc(); count == 2
    let result = run_main(vec![
        var("count", int(0)),
        val(
            "inc",
            lambda(&[], vec![e(assign("count", bin(BinOp::Add, ident("count"), int(1))))]),
        ),
        e(call(ident("inc"), vec![])),
        e(call(ident("inc"), vec![])),
        ret(ident("count")),
    ]);
    assert_int(&result, 2);
}

#[test]
fn list_map_filter_preserve_size_laws() {
    // [1,2,3,4].map { it * 2 } has size 4; filter { it > 4 } values all > 4
    let result = run_main(vec![
        val("xs", list_lit(vec![int(1), int(2), int(3), int(4)])),
        val(
            "doubled",
            mcall(
                ident("xs"),
                "map",
                vec![lambda(&["it"], vec![e(bin(BinOp::Mul, ident("it"), int(2)))])],
            ),
        ),
        ret(member(ident("doubled"), "size")),
    ]);
    assert_int(&result, 4);

    let result = run_main(vec![
        val("xs", list_lit(vec![int(1), int(5), int(8)])),
        val(
            "big",
            mcall(
                ident("xs"),
                "filter",
                vec![lambda(&["it"], vec![e(bin(BinOp::Gt, ident("it"), int(4)))])],
            ),
        ),
        ret(mcall(
            ident("big"),
            "all",
            vec![lambda(&["it"], vec![e(bin(BinOp::Gt, ident("it"), int(4)))])],
        )),
    ]);
    assert!(result.unwrap().equals(&Value::Bool(true)));
}

#[test]
fn index_assignment_on_lists() {
    let result = run_main(vec![
        val("xs", list_lit(vec![int(1), int(2)])),
        e(assign_index(ident("xs"), int(0), int(9))),
        ret(index(ident("xs"), int(0))),
    ]);
    assert_int(&result, 9);
}

#[test]
fn negative_list_index_raises() {
    let result = run_main(vec![
        val("xs", list_lit(vec![int(1)])),
        ret(index(ident("xs"), int(-1))),
    ]);
    assert_eq!(result.unwrap_err().kind, ExcKind::IndexOutOfBounds);
}

#[test]
fn catch_binds_thrown_message() {
    // try { error("boom") } catch (e) { e.message } == "boom"
    let result = run_main(vec![
        var("msg", null()),
        try_catch(
            vec![e(call(ident("error"), vec![s("boom")]))],
            "ex",
            None,
            vec![e(assign("msg", member(ident("ex"), "message")))],
        ),
        ret(ident("msg")),
    ]);
    assert_str(&result, "boom");
}

#[test]
fn finally_runs_on_both_paths() {
    let (result, console) = run_script(
        Vec::new(),
        vec![
            try_finally(
                vec![e(call(ident("error"), vec![s("bad")]))],
                "ex",
                vec![e(call(ident("println"), vec![s("caught")]))],
                vec![e(call(ident("println"), vec![s("finally")]))],
            ),
            ret(int(1)),
        ],
    );
    assert_int(&result, 1);
    assert_eq!(console.output(), "caught\nfinally\n");
}

#[test]
fn uncaught_exception_carries_stack_trace() {
    let (result, _) = run_script(
        vec![fun("inner", &[], vec![e(throw(s("kaput")))])],
        vec![e(call(ident("inner"), vec![]))],
    );
    let err = result.unwrap_err();
    assert_eq!(err.kind, ExcKind::UserThrown);
    // innermost frame first
    assert_eq!(&*err.stack[0].name, "inner");
}

#[test]
fn elvis_and_null_assert() {
    let result = run_main(vec![ret(elvis(null(), int(7)))]);
    assert_int(&result, 7);

    let result = run_main(vec![ret(null_assert(null()))]);
    assert_eq!(result.unwrap_err().kind, ExcKind::NullDereference);
}

#[test]
fn safe_member_on_null_short_circuits() {
    let result = run_main(vec![ret(safe_member(null(), "length"))]);
    assert!(result.unwrap().is_null());
}

#[test]
fn destructuring_pairs() {
    let result = run_main(vec![
        destructure(&["a", "b"], call(ident("Pair"), vec![int(3), int(4)])),
        ret(bin(BinOp::Add, ident("a"), ident("b"))),
    ]);
    assert_int(&result, 7);
}

#[test]
fn scope_functions_let_and_apply() {
    // 5.let { it + 1 } == 6
    let result = run_main(vec![ret(mcall(
        int(5),
        "let",
        vec![lambda(&["it"], vec![e(bin(BinOp::Add, ident("it"), int(1)))])],
    ))]);
    assert_int(&result, 6);

    // xs.also { ... } returns the receiver
    let result = run_main(vec![
        val("xs", list_lit(vec![int(1)])),
        ret(member(
            mcall(
                ident("xs"),
                "also",
                vec![lambda(&["it"], vec![e(mcall(ident("it"), "add", vec![int(2)]))])],
            ),
            "size",
        )),
    ]);
    assert_int(&result, 2);
}

#[test]
fn takeif_filters_receiver() {
    let result = run_main(vec![ret(mcall(
        int(10),
        "takeIf",
        vec![lambda(&["it"], vec![e(bin(BinOp::Gt, ident("it"), int(100)))])],
    ))]);
    assert!(result.unwrap().is_null());
}

#[test]
fn builtin_conversions_roundtrip() {
    let result = run_main(vec![ret(call(
        ident("toInt"),
        vec![call(ident("toString"), vec![int(123)])],
    ))]);
    assert_int(&result, 123);
}

#[test]
fn println_writes_to_console() {
    let (result, console) = run_script(
        Vec::new(),
        vec![e(call(ident("println"), vec![s("hi there")])), ret(int(0))],
    );
    assert_int(&result, 0);
    assert_eq!(console.output(), "hi there\n");
}

#[test]
fn repeat_builtin_counts() {
    let result = run_main(vec![
        var("n", int(0)),
        e(call(
            ident("repeat"),
            vec![
                int(4),
                lambda(&["i"], vec![e(assign("n", bin(BinOp::Add, ident("n"), int(1))))]),
            ],
        )),
        ret(ident("n")),
    ]);
    assert_int(&result, 4);
}

#[test]
fn user_extension_function_dispatches() {
    use vela::hir::{Block, FunDecl, Param, StmtKind};

    // fun Int.doubled() = this * 2
    let ext = vela::hir::Stmt::new(
        StmtKind::ExtensionFun {
            target: std::sync::Arc::from("Int"),
            fun: FunDecl {
                name: std::sync::Arc::from("doubled"),
                params: Vec::<Param>::new(),
                body: Block::of(vec![e(bin(
                    BinOp::Mul,
                    common::expr(vela::hir::ExprKind::This),
                    int(2),
                ))]),
                lambda: None,
            },
        },
        loc(),
    );
    let (result, _) = run_script(vec![ext], vec![ret(mcall(int(21), "doubled", vec![]))]);
    assert_int(&result, 42);
}

#[test]
fn propagation_operator_unwraps_ok_and_early_returns_err() {
    use vela::hir::ExprKind;

    let propagate = |e_: vela::hir::Expr| common::expr(ExprKind::Propagate(Box::new(e_)));

    // fun f() { val r = runCatching { 5 }; r? + 1 } == 6
    let (result, _) = run_script(
        vec![fun(
            "f",
            &[],
            vec![
                val(
                    "r",
                    call(ident("runCatching"), vec![lambda(&[], vec![e(int(5))])]),
                ),
                e(bin(BinOp::Add, propagate(ident("r")), int(1))),
            ],
        )],
        vec![ret(call(ident("f"), vec![]))],
    );
    assert_int(&result, 6);

    // an Err early-returns the whole Result from the enclosing function
    let (result, _) = run_script(
        vec![fun(
            "g",
            &[],
            vec![
                val(
                    "r",
                    call(
                        ident("runCatching"),
                        vec![lambda(&[], vec![e(call(ident("error"), vec![s("nope")]))])],
                    ),
                ),
                e(bin(BinOp::Add, propagate(ident("r")), int(1))),
            ],
        )],
        vec![ret(mcall(call(ident("g"), vec![]), "isErr", vec![]))],
    );
    assert!(result.unwrap().equals(&Value::Bool(true)));
}

#[test]
fn type_check_and_cast() {
    use vela::hir::ExprKind;

    let is_expr = |v: vela::hir::Expr, ty: &str| {
        common::expr(ExprKind::TypeCheck {
            operand: Box::new(v),
            ty: std::sync::Arc::from(ty),
            negated: false,
        })
    };
    let as_expr = |v: vela::hir::Expr, ty: &str, safe: bool| {
        common::expr(ExprKind::TypeCast {
            operand: Box::new(v),
            ty: std::sync::Arc::from(ty),
            safe,
        })
    };

    let result = run_main(vec![ret(is_expr(int(3), "Int"))]);
    assert!(result.unwrap().equals(&Value::Bool(true)));

    let result = run_main(vec![ret(is_expr(s("x"), "Int"))]);
    assert!(result.unwrap().equals(&Value::Bool(false)));

    // numeric conversion cast
    let result = run_main(vec![ret(as_expr(int(3), "Double", false))]);
    assert!(result.unwrap().equals(&Value::Double(3.0)));

    // safe cast yields null on mismatch, strict cast raises
    let result = run_main(vec![ret(as_expr(s("x"), "List", true))]);
    assert!(result.unwrap().is_null());
    let result = run_main(vec![ret(as_expr(s("x"), "List", false))]);
    assert_eq!(result.unwrap_err().kind, ExcKind::Cast);
}

#[test]
fn string_templates_interpolate() {
    use vela::hir::{ExprKind, TemplatePart};

    let template = common::expr(ExprKind::StrTemplate(vec![
        TemplatePart::Text(std::sync::Arc::from("sum is ")),
        TemplatePart::Expr(bin(BinOp::Add, int(2), int(3))),
        TemplatePart::Text(std::sync::Arc::from("!")),
    ]));
    let result = run_main(vec![ret(template)]);
    assert_str(&result, "sum is 5!");
}

#[test]
fn method_references_bind_their_receiver() {
    use vela::hir::ExprKind;

    // val f = xs::add; f(7); xs.size == 1
    let method_ref = common::expr(ExprKind::MethodRef {
        recv: Some(Box::new(ident("xs"))),
        name: std::sync::Arc::from("add"),
    });
    let result = run_main(vec![
        val("xs", list_lit(vec![])),
        val("f", method_ref),
        e(call(ident("f"), vec![int(7)])),
        ret(member(ident("xs"), "size")),
    ]);
    assert_int(&result, 1);
}

#[test]
fn range_properties() {
    let result = run_main(vec![ret(member(range_lit(int(2), int(9), false), "last"))]);
    assert_int(&result, 8);
    let result = run_main(vec![ret(member(range_lit(int(2), int(9), true), "size"))]);
    assert_int(&result, 8);
}
