//! Classes, data classes, enums, singletons, and annotation processors.

mod common;

use std::sync::Arc;

use common::*;
use vela::{
    Value,
    hir::{
        Block, ClassDecl, EnumEntryDecl, ExprKind, FieldDecl, FunDecl, MethodDecl, Param, PrimaryParam, PropertyKind,
        Stmt, StmtKind,
    },
    ops::BinOp,
    types::{ClassKind, Visibility},
};

fn this_expr() -> vela::hir::Expr {
    expr(ExprKind::This)
}

fn plain_class(name: &str) -> ClassDecl {
    ClassDecl {
        name: Arc::from(name),
        kind: ClassKind::Class,
        superclass: None,
        super_args: Vec::new(),
        interfaces: Vec::new(),
        is_abstract: false,
        is_sealed: false,
        is_data: false,
        primary_params: Vec::new(),
        fields: Vec::new(),
        methods: Vec::new(),
        getters: Vec::new(),
        ctors: Vec::new(),
        statics: Vec::new(),
        annotations: Vec::new(),
        enum_entries: Vec::new(),
    }
}

fn property_param(name: &str, kind: PropertyKind) -> PrimaryParam {
    PrimaryParam {
        name: Arc::from(name),
        property: Some(kind),
        default: None,
        visibility: Visibility::Public,
    }
}

fn method(name: &str, params: &[&str], body: Vec<Stmt>) -> MethodDecl {
    MethodDecl {
        fun: FunDecl {
            name: Arc::from(name),
            params: params.iter().map(|p| Param::required(*p)).collect(),
            body: Block::of(body),
            lambda: None,
        },
        visibility: Visibility::Public,
        is_abstract: false,
        is_default: false,
    }
}

fn class_stmt(decl: ClassDecl) -> Stmt {
    stmt(StmtKind::Class(Box::new(decl)))
}

#[test]
fn class_with_fields_and_methods() {
    // class Counter(var value) { fun bump(n) { this.value = this.value + n } }
    let mut decl = plain_class("Counter");
    decl.primary_params = vec![property_param("value", PropertyKind::Var)];
    decl.methods = vec![method(
        "bump",
        &["n"],
        vec![e(expr(ExprKind::Assign {
            target: Box::new(vela::hir::AssignTarget::Member {
                recv: this_expr(),
                name: Arc::from("value"),
            }),
            value: Box::new(bin(BinOp::Add, member(this_expr(), "value"), ident("n"))),
        }))],
    )];

    let (result, _) = run_script(
        vec![class_stmt(decl)],
        vec![
            val("c", call(ident("Counter"), vec![int(10)])),
            e(mcall(ident("c"), "bump", vec![int(5)])),
            e(mcall(ident("c"), "bump", vec![int(1)])),
            ret(member(ident("c"), "value")),
        ],
    );
    assert_int(&result, 16);
}

#[test]
fn field_initializers_run_in_order() {
    // class Box(val a) { val b = a + 1 }
    let mut decl = plain_class("Box");
    decl.primary_params = vec![property_param("a", PropertyKind::Val)];
    decl.fields = vec![FieldDecl {
        name: Arc::from("b"),
        mutable: false,
        visibility: Visibility::Public,
        init: Some(bin(BinOp::Add, ident("a"), int(1))),
    }];

    let (result, _) = run_script(
        vec![class_stmt(decl)],
        vec![ret(member(call(ident("Box"), vec![int(41)]), "b"))],
    );
    assert_int(&result, 42);
}

#[test]
fn data_class_equality_render_and_copy() {
    let mut decl = plain_class("Point");
    decl.is_data = true;
    decl.primary_params = vec![
        property_param("x", PropertyKind::Val),
        property_param("y", PropertyKind::Val),
    ];

    // equality is field-wise
    let (result, _) = run_script(
        vec![class_stmt(decl.clone())],
        vec![ret(bin(
            BinOp::Eq,
            call(ident("Point"), vec![int(1), int(2)]),
            call(ident("Point"), vec![int(1), int(2)]),
        ))],
    );
    assert!(result.unwrap().equals(&Value::Bool(true)));

    // rendering uses the data-class shape
    let (result, _) = run_script(
        vec![class_stmt(decl.clone())],
        vec![ret(call(
            ident("toString"),
            vec![call(ident("Point"), vec![int(1), int(2)])],
        ))],
    );
    assert_str(&result, "Point(x=1, y=2)");

    // copy replaces a positional prefix and keeps the rest
    let (result, _) = run_script(
        vec![class_stmt(decl.clone())],
        vec![ret(member(
            mcall(call(ident("Point"), vec![int(1), int(2)]), "copy", vec![int(9)]),
            "y",
        ))],
    );
    assert_int(&result, 2);

    // componentN destructuring
    let (result, _) = run_script(
        vec![class_stmt(decl)],
        vec![
            destructure(&["px", "py"], call(ident("Point"), vec![int(7), int(3)])),
            ret(bin(BinOp::Sub, ident("px"), ident("py"))),
        ],
    );
    assert_int(&result, 4);
}

#[test]
fn inheritance_dispatches_through_superclass() {
    // class Base { fun greet() = "base" }; class Sub : Base()
    let mut base = plain_class("Base");
    base.methods = vec![method("greet", &[], vec![e(s("base"))])];
    let mut sub = plain_class("Sub");
    sub.superclass = Some(Arc::from("Base"));

    let (result, _) = run_script(
        vec![class_stmt(base), class_stmt(sub)],
        vec![ret(mcall(call(ident("Sub"), vec![]), "greet", vec![]))],
    );
    assert_str(&result, "base");
}

#[test]
fn operator_overloading_plus() {
    // class Vec1(val v) { fun plus(other) = Vec1(this.v + other.v) }
    let mut decl = plain_class("Vec1");
    decl.primary_params = vec![property_param("v", PropertyKind::Val)];
    decl.methods = vec![method(
        "plus",
        &["other"],
        vec![e(call(
            ident("Vec1"),
            vec![bin(BinOp::Add, member(this_expr(), "v"), member(ident("other"), "v"))],
        ))],
    )];

    let (result, _) = run_script(
        vec![class_stmt(decl)],
        vec![ret(member(
            bin(
                BinOp::Add,
                call(ident("Vec1"), vec![int(2)]),
                call(ident("Vec1"), vec![int(3)]),
            ),
            "v",
        ))],
    );
    assert_int(&result, 5);
}

#[test]
fn compare_to_drives_ordering_operators() {
    // class Height(val cm) { fun compareTo(other) = this.cm - other.cm }
    let mut decl = plain_class("Height");
    decl.primary_params = vec![property_param("cm", PropertyKind::Val)];
    decl.methods = vec![method(
        "compareTo",
        &["other"],
        vec![e(bin(
            BinOp::Sub,
            member(this_expr(), "cm"),
            member(ident("other"), "cm"),
        ))],
    )];

    let (result, _) = run_script(
        vec![class_stmt(decl)],
        vec![ret(bin(
            BinOp::Lt,
            call(ident("Height"), vec![int(160)]),
            call(ident("Height"), vec![int(180)]),
        ))],
    );
    assert!(result.unwrap().equals(&Value::Bool(true)));
}

#[test]
fn custom_getter_is_auto_invoked() {
    // class Circle(val r) { val area get() = r * r }
    let mut decl = plain_class("Circle");
    decl.primary_params = vec![property_param("r", PropertyKind::Val)];
    decl.getters = vec![(
        Arc::from("area"),
        FunDecl {
            name: Arc::from("area"),
            params: Vec::new(),
            body: Block::of(vec![e(bin(
                BinOp::Mul,
                member(this_expr(), "r"),
                member(this_expr(), "r"),
            ))]),
            lambda: None,
        },
    )];

    let (result, _) = run_script(
        vec![class_stmt(decl)],
        vec![ret(member(call(ident("Circle"), vec![int(3)]), "area"))],
    );
    assert_int(&result, 9);
}

#[test]
fn enum_entries_values_and_value_of() {
    let mut decl = plain_class("Color");
    decl.kind = ClassKind::Enum;
    decl.enum_entries = vec![
        EnumEntryDecl {
            name: Arc::from("RED"),
            args: Vec::new(),
            overrides: Vec::new(),
        },
        EnumEntryDecl {
            name: Arc::from("GREEN"),
            args: Vec::new(),
            overrides: Vec::new(),
        },
        EnumEntryDecl {
            name: Arc::from("BLUE"),
            args: Vec::new(),
            overrides: Vec::new(),
        },
    ];

    // entry access, name and ordinal
    let (result, _) = run_script(
        vec![class_stmt(decl.clone())],
        vec![ret(member(member(ident("Color"), "GREEN"), "ordinal"))],
    );
    assert_int(&result, 1);

    let (result, _) = run_script(
        vec![class_stmt(decl.clone())],
        vec![ret(member(member(ident("Color"), "BLUE"), "name"))],
    );
    assert_str(&result, "BLUE");

    // values() size, valueOf identity
    let (result, _) = run_script(
        vec![class_stmt(decl.clone())],
        vec![ret(member(mcall(ident("Color"), "values", vec![]), "size"))],
    );
    assert_int(&result, 3);

    let (result, _) = run_script(
        vec![class_stmt(decl)],
        vec![ret(bin(
            BinOp::Eq,
            mcall(ident("Color"), "valueOf", vec![s("RED")]),
            member(ident("Color"), "RED"),
        ))],
    );
    assert!(result.unwrap().equals(&Value::Bool(true)));
}

#[test]
fn singleton_instance_is_shared() {
    // object Registry { var count } — INSTANCE created lazily, shared
    let mut decl = plain_class("Registry");
    decl.kind = ClassKind::Singleton;
    decl.fields = vec![FieldDecl {
        name: Arc::from("count"),
        mutable: true,
        visibility: Visibility::Public,
        init: Some(int(0)),
    }];
    decl.methods = vec![method(
        "bump",
        &[],
        vec![e(expr(ExprKind::Assign {
            target: Box::new(vela::hir::AssignTarget::Member {
                recv: this_expr(),
                name: Arc::from("count"),
            },),
            value: Box::new(bin(BinOp::Add, member(this_expr(), "count"), int(1))),
        }))],
    )];

    let (result, _) = run_script(
        vec![class_stmt(decl)],
        vec![
            e(mcall(ident("Registry"), "bump", vec![])),
            e(mcall(ident("Registry"), "bump", vec![])),
            ret(member(ident("Registry"), "count")),
        ],
    );
    assert_int(&result, 2);
}

#[test]
fn annotation_processor_sees_registered_class() {
    // registerAnnotationProcessor("Tagged", { cls -> seen = cls.name });
    // @Tagged class Thing
    let mut decl = plain_class("Thing");
    decl.annotations = vec![Arc::from("Tagged")];

    let (result, _) = run_script(
        Vec::new(),
        vec![
            var("seen", null()),
            e(call(
                ident("registerAnnotationProcessor"),
                vec![
                    s("Tagged"),
                    lambda(&["cls"], vec![e(assign("seen", member(ident("cls"), "name")))]),
                ],
            )),
            class_stmt(decl),
            ret(ident("seen")),
        ],
    );
    assert_str(&result, "Thing");
}

#[test]
fn visibility_blocks_private_members_from_outside() {
    let mut decl = plain_class("Vault");
    decl.fields = vec![FieldDecl {
        name: Arc::from("secret"),
        mutable: false,
        visibility: Visibility::Private,
        init: Some(int(99)),
    }];

    let (result, _) = run_script(
        vec![class_stmt(decl)],
        vec![ret(member(call(ident("Vault"), vec![]), "secret"))],
    );
    assert_eq!(result.unwrap_err().kind, vela::ExcKind::MemberNotAccessible);
}
