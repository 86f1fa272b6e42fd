//! Shared helpers: terse HIR constructors and engine harnesses.
//!
//! The front end is out of scope for the engine crate, so tests build HIR
//! nodes directly; these constructors keep the programs readable.

use std::sync::Arc;

use vela::{
    CaptureConsole, Exception, Interpreter, ProgramModule, SecurityPolicy, Value,
    hir::{
        AssignTarget, Block, CatchClause, DeclNames, Expr, ExprKind, FunDecl, HirModule, Ident, Lit, Loc, Param,
        Stmt, StmtKind,
    },
    ops::{BinOp, UnOp},
};

pub fn loc() -> Loc {
    Loc::default()
}

pub fn expr(kind: ExprKind) -> Expr {
    Expr::new(kind, loc())
}

pub fn stmt(kind: StmtKind) -> Stmt {
    Stmt::new(kind, loc())
}

pub fn int(v: i64) -> Expr {
    expr(ExprKind::Literal(Lit::Int(v)))
}

pub fn dbl(v: f64) -> Expr {
    expr(ExprKind::Literal(Lit::Double(v)))
}

pub fn boolean(v: bool) -> Expr {
    expr(ExprKind::Literal(Lit::Bool(v)))
}

pub fn null() -> Expr {
    expr(ExprKind::Literal(Lit::Null))
}

pub fn s(v: &str) -> Expr {
    expr(ExprKind::Literal(Lit::Str(Arc::from(v))))
}

pub fn ident(name: &str) -> Expr {
    expr(ExprKind::Ident(Ident::new(name)))
}

pub fn bin(op: BinOp, lhs: Expr, rhs: Expr) -> Expr {
    expr(ExprKind::Binary {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    })
}

pub fn un(op: UnOp, operand: Expr) -> Expr {
    expr(ExprKind::Unary {
        op,
        operand: Box::new(operand),
    })
}

pub fn call(callee: Expr, args: Vec<Expr>) -> Expr {
    expr(ExprKind::Call {
        callee: Box::new(callee),
        args,
    })
}

pub fn mcall(recv: Expr, name: &str, args: Vec<Expr>) -> Expr {
    expr(ExprKind::MethodCall {
        recv: Box::new(recv),
        name: Arc::from(name),
        args,
        safe: false,
    })
}

pub fn member(recv: Expr, name: &str) -> Expr {
    expr(ExprKind::Member {
        recv: Box::new(recv),
        name: Arc::from(name),
        safe: false,
    })
}

pub fn safe_member(recv: Expr, name: &str) -> Expr {
    expr(ExprKind::Member {
        recv: Box::new(recv),
        name: Arc::from(name),
        safe: true,
    })
}

pub fn index(recv: Expr, idx: Expr) -> Expr {
    expr(ExprKind::Index {
        recv: Box::new(recv),
        index: Box::new(idx),
    })
}

pub fn assign(name: &str, value: Expr) -> Expr {
    expr(ExprKind::Assign {
        target: Box::new(AssignTarget::Ident(Ident::new(name))),
        value: Box::new(value),
    })
}

pub fn assign_index(recv: Expr, idx: Expr, value: Expr) -> Expr {
    expr(ExprKind::Assign {
        target: Box::new(AssignTarget::Index { recv, index: idx }),
        value: Box::new(value),
    })
}

pub fn if_else(cond: Expr, then: Vec<Stmt>, els: Vec<Stmt>) -> Expr {
    expr(ExprKind::If {
        cond: Box::new(cond),
        then: Block::of(then),
        els: Some(Block::of(els)),
    })
}

pub fn lambda(params: &[&str], body: Vec<Stmt>) -> Expr {
    expr(ExprKind::Lambda {
        params: params.iter().map(|p| Param::required(*p)).collect(),
        body: Block::of(body),
        id: None,
    })
}

pub fn list_lit(items: Vec<Expr>) -> Expr {
    expr(ExprKind::ListLit(items))
}

pub fn range_lit(start: Expr, end: Expr, inclusive: bool) -> Expr {
    expr(ExprKind::RangeLit {
        start: Box::new(start),
        end: Box::new(end),
        inclusive,
    })
}

pub fn elvis(value: Expr, fallback: Expr) -> Expr {
    expr(ExprKind::Elvis {
        value: Box::new(value),
        fallback: Box::new(fallback),
    })
}

pub fn null_assert(operand: Expr) -> Expr {
    expr(ExprKind::NullAssert(Box::new(operand)))
}

pub fn throw(operand: Expr) -> Expr {
    expr(ExprKind::Throw(Box::new(operand)))
}

pub fn await_expr(operand: Expr) -> Expr {
    expr(ExprKind::Await(Box::new(operand)))
}

pub fn e(ex: Expr) -> Stmt {
    stmt(StmtKind::Expr(ex))
}

pub fn val(name: &str, init: Expr) -> Stmt {
    stmt(StmtKind::Decl {
        names: DeclNames::Single(Arc::from(name)),
        init,
        mutable: false,
    })
}

pub fn var(name: &str, init: Expr) -> Stmt {
    stmt(StmtKind::Decl {
        names: DeclNames::Single(Arc::from(name)),
        init,
        mutable: true,
    })
}

pub fn destructure(names: &[&str], init: Expr) -> Stmt {
    stmt(StmtKind::Decl {
        names: DeclNames::Destructure(names.iter().map(|n| Arc::from(*n)).collect()),
        init,
        mutable: false,
    })
}

pub fn fun(name: &str, params: &[&str], body: Vec<Stmt>) -> Stmt {
    stmt(StmtKind::Fun(FunDecl {
        name: Arc::from(name),
        params: params.iter().map(|p| Param::required(*p)).collect(),
        body: Block::of(body),
        lambda: None,
    }))
}

pub fn ret(value: Expr) -> Stmt {
    stmt(StmtKind::Return(Some(value)))
}

pub fn while_loop(cond: Expr, body: Vec<Stmt>) -> Stmt {
    stmt(StmtKind::While {
        label: None,
        cond,
        body: Block::of(body),
    })
}

pub fn for_in(name: &str, iterable: Expr, body: Vec<Stmt>) -> Stmt {
    stmt(StmtKind::For {
        label: None,
        binding: DeclNames::Single(Arc::from(name)),
        iterable,
        body: Block::of(body),
    })
}

pub fn brk() -> Stmt {
    stmt(StmtKind::Break { label: None })
}

pub fn try_catch(body: Vec<Stmt>, binding: &str, class_name: Option<&str>, catch_body: Vec<Stmt>) -> Stmt {
    stmt(StmtKind::Try {
        body: Block::of(body),
        catches: vec![CatchClause {
            binding: Arc::from(binding),
            class_name: class_name.map(Arc::from),
            body: Block::of(catch_body),
        }],
        finally: None,
    })
}

pub fn try_finally(body: Vec<Stmt>, binding: &str, catch_body: Vec<Stmt>, finally: Vec<Stmt>) -> Stmt {
    stmt(StmtKind::Try {
        body: Block::of(body),
        catches: vec![CatchClause {
            binding: Arc::from(binding),
            class_name: None,
            body: Block::of(catch_body),
        }],
        finally: Some(Block::of(finally)),
    })
}

/// Builds a module whose `main` body is `stmts`, executes it, and returns
/// `main`'s value.
pub fn run_main(stmts: Vec<Stmt>) -> Result<Value, Exception> {
    run_script(Vec::new(), stmts).0
}

/// Executes `top` at module level, then `main_body` as `main()`; returns the
/// result and the captured console.
pub fn run_script(top: Vec<Stmt>, main_body: Vec<Stmt>) -> (Result<Value, Exception>, Arc<CaptureConsole>) {
    run_script_with_policy(SecurityPolicy::unrestricted(), top, main_body)
}

pub fn run_script_with_policy(
    policy: SecurityPolicy,
    top: Vec<Stmt>,
    main_body: Vec<Stmt>,
) -> (Result<Value, Exception>, Arc<CaptureConsole>) {
    let console = Arc::new(CaptureConsole::new());
    let mut interp = Interpreter::with_console(policy, console.clone());
    interp.register_builtins();
    let mut module = HirModule::new("test");
    module.body = top;
    module.body.push(fun("main", &[], main_body));
    let result = interp.execute(ProgramModule::Hir(module));
    (result, console)
}

/// Asserts an `Int`/`Long` result.
pub fn assert_int(result: &Result<Value, Exception>, expected: i64) {
    match result {
        Ok(v) => assert!(
            v.equals(&Value::Int(expected)),
            "expected {expected}, got {v:?}"
        ),
        Err(e) => panic!("expected {expected}, got error: {e}"),
    }
}

pub fn assert_str(result: &Result<Value, Exception>, expected: &str) {
    match result {
        Ok(Value::Str(sv)) => assert_eq!(&**sv, expected),
        other => panic!("expected string {expected:?}, got {other:?}"),
    }
}
