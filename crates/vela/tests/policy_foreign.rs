//! Security policy enforcement and the foreign bridge.

mod common;

use std::sync::Arc;

use common::*;
use parking_lot::Mutex;
use vela::{
    CaptureConsole, ExcKind, ForeignClass, Interpreter, ProgramModule, SecurityPolicy, Value,
    hir::HirModule,
    ops::BinOp,
};

#[test]
fn stdio_denial_is_not_catchable() {
    let mut policy = SecurityPolicy::unrestricted();
    policy.allow_stdio = false;
    let (result, _) = run_script_with_policy(
        policy,
        Vec::new(),
        vec![
            try_catch(
                vec![e(call(ident("println"), vec![s("blocked")]))],
                "ex",
                None,
                vec![e(int(0))],
            ),
            ret(int(1)),
        ],
    );
    let err = result.unwrap_err();
    assert_eq!(err.kind, ExcKind::SecurityDenied);
}

#[test]
fn loop_limit_aborts_through_catch() {
    let mut policy = SecurityPolicy::unrestricted();
    policy.max_loop_iterations = 100;
    let (result, _) = run_script_with_policy(
        policy,
        Vec::new(),
        vec![
            try_catch(
                vec![while_loop(boolean(true), vec![e(int(0))])],
                "ex",
                None,
                vec![e(int(0))],
            ),
            ret(int(1)),
        ],
    );
    assert_eq!(result.unwrap_err().kind, ExcKind::LoopLimit);
}

#[test]
fn recursion_limit_aborts() {
    let mut policy = SecurityPolicy::unrestricted();
    policy.max_recursion_depth = 32;
    let (result, _) = run_script_with_policy(
        policy,
        vec![fun(
            "spin",
            &[],
            vec![e(call(ident("spin"), vec![]))],
        )],
        vec![ret(call(ident("spin"), vec![]))],
    );
    assert_eq!(result.unwrap_err().kind, ExcKind::RecursionLimit);
}

#[test]
fn execution_deadline_trips() {
    let mut policy = SecurityPolicy::unrestricted();
    policy.max_execution_time_ms = 50;
    // busy loop; the time check samples on back-edges
    let (result, _) = run_script_with_policy(
        policy,
        Vec::new(),
        vec![
            var("i", int(0)),
            while_loop(
                boolean(true),
                vec![e(assign("i", bin(BinOp::Add, ident("i"), int(1))))],
            ),
            ret(int(0)),
        ],
    );
    assert_eq!(result.unwrap_err().kind, ExcKind::Timeout);
}

/// Host payload used by the bridge tests.
#[derive(Debug, Default)]
struct Buffer {
    text: Mutex<String>,
}

fn buffer_class() -> Arc<ForeignClass> {
    ForeignClass::builder("host.text.Buffer")
        .open()
        .ctor(0, |_, _| Ok(Box::new(Buffer::default())))
        .method("append", Some(1), |interp, this, args| {
            let Some(Value::External(ext)) = this else {
                return Err(vela::RunError::internal("append without receiver"));
            };
            let rendered = interp.display_value(&args[0])?;
            ext.downcast::<Buffer>()
                .expect("buffer payload")
                .text
                .lock()
                .push_str(&rendered);
            Ok(Value::Unit)
        })
        .method("getText", Some(0), |_, this, _| {
            let Some(Value::External(ext)) = this else {
                return Err(vela::RunError::internal("getText without receiver"));
            };
            Ok(Value::str(ext.downcast::<Buffer>().expect("buffer payload").text.lock().clone()))
        })
        .static_value("MOTTO", Value::str("host side"))
        .build()
}

fn interp_with_buffer(policy: SecurityPolicy) -> (Interpreter, Arc<CaptureConsole>) {
    let console = Arc::new(CaptureConsole::new());
    let mut interp = Interpreter::with_console(policy, console.clone());
    interp.register_builtins();
    interp.runtime().foreign().register(buffer_class());
    interp.runtime().foreign().add_common_package("host.text");
    (interp, console)
}

fn run_buffer_script(policy: SecurityPolicy, main_body: Vec<vela::hir::Stmt>) -> Result<Value, vela::Exception> {
    let (mut interp, _) = interp_with_buffer(policy);
    let mut module = HirModule::new("test");
    module.body.push(fun("main", &[], main_body));
    interp.execute(ProgramModule::Hir(module))
}

#[test]
fn foreign_construction_methods_and_bean_getter() {
    // Buffer resolves by simple name through the common-package list; the
    // `text` property goes through the JavaBean getter fallback.
    let result = run_buffer_script(
        SecurityPolicy::unrestricted(),
        vec![
            val("b", call(ident("Buffer"), vec![])),
            e(mcall(ident("b"), "append", vec![s("ab")])),
            e(mcall(ident("b"), "append", vec![int(3)])),
            ret(member(ident("b"), "text")),
        ],
    );
    assert_str(&result, "ab3");
}

#[test]
fn foreign_static_access_via_interop_namespace() {
    let result = run_buffer_script(
        SecurityPolicy::unrestricted(),
        vec![ret(mcall(
            ident("Interop"),
            "static",
            vec![s("host.text.Buffer"), s("MOTTO")],
        ))],
    );
    assert_str(&result, "host side");
}

#[test]
fn denied_class_is_unreachable_and_uncatchable() {
    let mut policy = SecurityPolicy::unrestricted();
    policy.deny_classes.insert("host.text.Buffer".into());
    let result = run_buffer_script(
        policy,
        vec![
            try_catch(
                vec![val("b", call(ident("Buffer"), vec![]))],
                "ex",
                None,
                vec![e(int(0))],
            ),
            ret(int(1)),
        ],
    );
    assert_eq!(result.unwrap_err().kind, ExcKind::SecurityDenied);
}

#[test]
fn deny_method_blocks_single_member() {
    let mut policy = SecurityPolicy::unrestricted();
    policy.deny_methods.insert("host.text.Buffer#append".into());
    let result = run_buffer_script(
        policy,
        vec![
            val("b", call(ident("Buffer"), vec![])),
            e(mcall(ident("b"), "append", vec![s("x")])),
            ret(int(1)),
        ],
    );
    assert_eq!(result.unwrap_err().kind, ExcKind::SecurityDenied);
}

#[test]
fn foreign_interop_disabled_blocks_resolution() {
    let mut policy = SecurityPolicy::unrestricted();
    policy.allow_foreign_interop = false;
    let result = run_buffer_script(
        policy,
        vec![ret(call(ident("Buffer"), vec![]))],
    );
    assert_eq!(result.unwrap_err().kind, ExcKind::SecurityDenied);
}

#[test]
fn sam_interface_accepts_callable() {
    // interface host.text.Renderer { fun render(v): String } — constructing
    // it from a lambda builds a proxy whose `render` calls back into the
    // language.
    let renderer = ForeignClass::builder("host.text.Renderer").sam("render").build();

    let console = Arc::new(CaptureConsole::new());
    let mut interp = Interpreter::with_console(SecurityPolicy::unrestricted(), console);
    interp.register_builtins();
    interp.runtime().foreign().register(renderer);
    interp.runtime().foreign().add_common_package("host.text");

    let mut module = HirModule::new("test");
    module.body.push(fun(
        "main",
        &[],
        vec![
            val(
                "r",
                call(
                    ident("Renderer"),
                    vec![lambda(&["v"], vec![e(bin(BinOp::Add, s("<"), ident("v")))])],
                ),
            ),
            ret(mcall(ident("r"), "render", vec![s("x")])),
        ],
    ));
    let result = interp.execute(ProgramModule::Hir(module));
    assert_str(&result, "<x");
}

#[test]
fn resolve_cache_serves_hits_and_misses() {
    let (interp, _) = interp_with_buffer(SecurityPolicy::unrestricted());
    let policy = SecurityPolicy::unrestricted();
    // miss is cached
    assert!(interp.runtime().foreign().resolve("NoSuchClass", &policy).unwrap().is_none());
    assert!(interp.runtime().foreign().resolve("NoSuchClass", &policy).unwrap().is_none());
    // hit by exact name and by simple name
    assert!(interp.runtime().foreign().resolve("host.text.Buffer", &policy).unwrap().is_some());
    assert!(interp.runtime().foreign().resolve("Buffer", &policy).unwrap().is_some());
}

#[test]
fn package_prefix_denial_applies_to_wildcards() {
    let mut policy = SecurityPolicy::unrestricted();
    policy.deny_packages.insert("host.text".into());
    let (interp, _) = interp_with_buffer(policy.clone());
    let err = interp.runtime().foreign().resolve("Buffer", &policy).unwrap_err();
    assert_eq!(err.kind(), ExcKind::SecurityDenied);
}
