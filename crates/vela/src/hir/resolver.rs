//! Pre-execution variable resolution.
//!
//! A linear pass over an owned [`HirModule`] that, inside every function and
//! lambda body, assigns `(depth, slot)` indices to identifier references whose
//! declaration lives in the same body. Module-level identifiers are
//! intentionally not resolved: the global frame has an unpredictable slot
//! layout because builtins are injected ad hoc.
//!
//! The pass also performs the shallow free-variable analysis used by the
//! minimal-closure strategy, and moves every function/lambda body into the
//! module's lambda table so closures can reference bodies by id.
//!
//! Scope bookkeeping mirrors the evaluator's frame creation exactly: one
//! scope per function entry, per loop body, per catch clause, and per
//! non-transparent block. Transparent blocks share the enclosing scope.

use std::sync::Arc;

use ahash::AHashMap;

use crate::hir::{
    AssignTarget, Block, CaptureSpec, ClassDecl, Expr, ExprKind, FunDecl, HirModule, Ident, LambdaDef, LambdaId,
    Param, Stmt, StmtKind, TemplatePart,
};

/// Runs the resolver pass, filling identifier slots and the lambda table.
pub fn resolve_module(module: &mut HirModule) {
    let mut resolver = Resolver::default();
    let mut body = std::mem::take(&mut module.body);
    for stmt in &mut body {
        resolver.stmt(stmt);
    }
    module.body = body;
    module.lambdas = resolver.lambdas;
}

#[derive(Debug, Default)]
struct Scope {
    names: AHashMap<Arc<str>, u16>,
    next_slot: u16,
}

#[derive(Debug)]
struct Region {
    /// Scope-stack height at region entry; resolution never looks below it.
    scope_base: usize,
    /// Names referenced but not declared within this region.
    free: Vec<Arc<str>>,
    /// Whether the region body contains a nested function or lambda.
    ///
    /// The free-variable analysis is shallow, so a nested lambda forces the
    /// enclosing lambda onto the shared-environment path.
    has_nested: bool,
}

#[derive(Debug, Default)]
struct Resolver {
    lambdas: Vec<LambdaDef>,
    scopes: Vec<Scope>,
    regions: Vec<Region>,
}

impl Resolver {
    fn begin_scope(&mut self) {
        self.scopes.push(Scope::default());
    }

    fn end_scope(&mut self) {
        self.scopes.pop();
    }

    /// Declares a name in the innermost scope. No-op at module level.
    fn declare(&mut self, name: &Arc<str>) {
        if self.regions.is_empty() {
            return;
        }
        if let Some(scope) = self.scopes.last_mut() {
            let slot = scope.next_slot;
            scope.next_slot += 1;
            scope.names.insert(name.clone(), slot);
        }
    }

    /// Resolves a reference against the current region's scopes.
    ///
    /// Names declared outside the region (captures, globals, builtins) stay
    /// name-resolved and are recorded as free variables of the region.
    fn resolve(&mut self, ident: &mut Ident) {
        let Some(region) = self.regions.last_mut() else {
            return;
        };
        let base = region.scope_base;
        for (depth, scope) in self.scopes[base..].iter().rev().enumerate() {
            if let Some(&slot) = scope.names.get(&ident.name) {
                ident.slot = Some((depth as u16, slot));
                return;
            }
        }
        if &*ident.name != "this" && !region.free.contains(&ident.name) {
            region.free.push(ident.name.clone());
        }
    }

    /// Records a free name without assigning a slot (implicit `this` paths).
    fn note_free(&mut self, name: &Arc<str>) {
        if let Some(region) = self.regions.last_mut()
            && &**name != "this"
            && !region.free.contains(name)
        {
            region.free.push(name.clone());
        }
    }

    /// Resolves a function/lambda body as its own region and extracts it into
    /// the lambda table.
    ///
    /// `minimal` opts into the minimal-closure candidate path (lambdas only;
    /// named functions and methods always share their defining environment).
    fn extract(&mut self, name: Arc<str>, params: &mut Vec<Param>, body: &mut Block, minimal: bool) -> LambdaId {
        if let Some(parent) = self.regions.last_mut() {
            parent.has_nested = true;
        }
        self.regions.push(Region {
            scope_base: self.scopes.len(),
            free: Vec::new(),
            has_nested: false,
        });
        self.begin_scope();
        // Parameters first (defaults see earlier parameters), then the
        // receiver slot; the evaluator binds frames in the same order.
        for i in 0..params.len() {
            if let Some(default) = &mut params[i].default {
                self.expr(default);
            }
            let name = params[i].name.clone();
            self.declare(&name);
        }
        self.declare(&Arc::from("this"));
        for stmt in &mut body.stmts {
            self.stmt(stmt);
        }
        self.end_scope();
        let region = self.regions.pop().expect("region stack underflow");

        let captures = if minimal && !region.has_nested {
            CaptureSpec::Minimal(region.free)
        } else {
            CaptureSpec::ShareEnv
        };
        let id = LambdaId(self.lambdas.len() as u32);
        self.lambdas.push(LambdaDef {
            name,
            params: std::mem::take(params),
            body: std::mem::take(body),
            captures,
        });
        id
    }

    fn fun_decl(&mut self, fun: &mut FunDecl) {
        let id = self.extract(fun.name.clone(), &mut fun.params, &mut fun.body, false);
        fun.lambda = Some(id);
    }

    fn block(&mut self, block: &mut Block) {
        if block.transparent {
            for stmt in &mut block.stmts {
                self.stmt(stmt);
            }
        } else {
            self.begin_scope();
            for stmt in &mut block.stmts {
                self.stmt(stmt);
            }
            self.end_scope();
        }
    }

    /// Loop bodies and catch clauses get one scope holding both the binding
    /// and the body statements; the evaluator resets that single frame per
    /// iteration instead of stacking a block frame inside it.
    fn scoped_body(&mut self, bindings: &[Arc<str>], body: &mut Block) {
        self.begin_scope();
        for name in bindings {
            self.declare(name);
        }
        for stmt in &mut body.stmts {
            self.stmt(stmt);
        }
        self.end_scope();
    }

    fn stmt(&mut self, stmt: &mut Stmt) {
        match &mut stmt.kind {
            StmtKind::Expr(e) => self.expr(e),
            StmtKind::Decl { names, init, .. } => {
                self.expr(init);
                match names {
                    crate::hir::DeclNames::Single(name) => self.declare(&name.clone()),
                    crate::hir::DeclNames::Destructure(parts) => {
                        for name in parts.clone() {
                            self.declare(&name);
                        }
                    }
                }
            }
            StmtKind::Fun(fun) => {
                self.declare(&fun.name.clone());
                self.fun_decl(fun);
            }
            StmtKind::Class(decl) => self.class_decl(decl),
            StmtKind::While { cond, body, .. } => {
                self.expr(cond);
                self.scoped_body(&[], body);
            }
            StmtKind::For { binding, iterable, body, .. } => {
                self.expr(iterable);
                let names: Vec<Arc<str>> = match binding {
                    crate::hir::DeclNames::Single(name) => vec![name.clone()],
                    crate::hir::DeclNames::Destructure(parts) => parts.clone(),
                };
                self.scoped_body(&names, body);
            }
            StmtKind::Return(value) => {
                if let Some(value) = value {
                    self.expr(value);
                }
            }
            StmtKind::Break { .. } | StmtKind::Continue { .. } => {}
            StmtKind::Try { body, catches, finally } => {
                self.block(body);
                for catch in catches {
                    let binding = catch.binding.clone();
                    self.scoped_body(&[binding], &mut catch.body);
                }
                if let Some(finally) = finally {
                    self.block(finally);
                }
            }
            StmtKind::ExtensionFun { fun, .. } => self.fun_decl(fun),
            StmtKind::ExtensionProp { getter, .. } => self.fun_decl(getter),
        }
    }

    fn class_decl(&mut self, decl: &mut ClassDecl) {
        // Instantiation context: primary params + `this` are slot-addressable
        // inside field initializers and superclass arguments.
        self.regions.push(Region {
            scope_base: self.scopes.len(),
            free: Vec::new(),
            has_nested: false,
        });
        self.begin_scope();
        for i in 0..decl.primary_params.len() {
            if let Some(default) = &mut decl.primary_params[i].default {
                self.expr(default);
            }
            let name = decl.primary_params[i].name.clone();
            self.declare(&name);
        }
        self.declare(&Arc::from("this"));
        for arg in &mut decl.super_args {
            self.expr(arg);
        }
        for field in &mut decl.fields {
            if let Some(init) = &mut field.init {
                self.expr(init);
            }
        }
        self.end_scope();
        self.regions.pop();

        for method in &mut decl.methods {
            self.fun_decl(&mut method.fun);
        }
        for (_, getter) in &mut decl.getters {
            self.fun_decl(getter);
        }
        for ctor in &mut decl.ctors {
            let id = self.extract(
                Arc::from(format!("{}.<init>", decl.name)),
                &mut ctor.params,
                &mut ctor.body,
                false,
            );
            ctor.lambda = Some(id);
        }
        for entry in &mut decl.enum_entries {
            for arg in &mut entry.args {
                self.expr(arg);
            }
            for method in &mut entry.overrides {
                self.fun_decl(&mut method.fun);
            }
        }
        for static_field in &mut decl.statics {
            if let Some(init) = &mut static_field.init {
                self.expr(init);
            }
        }
    }

    fn expr(&mut self, expr: &mut Expr) {
        match &mut expr.kind {
            ExprKind::Literal(_) | ExprKind::This => {}
            ExprKind::StrTemplate(parts) => {
                for part in parts {
                    if let TemplatePart::Expr(e) = part {
                        self.expr(e);
                    }
                }
            }
            ExprKind::Ident(ident) => self.resolve(ident),
            ExprKind::Binary { lhs, rhs, .. } => {
                self.expr(lhs);
                self.expr(rhs);
            }
            ExprKind::Unary { operand, .. } => self.expr(operand),
            ExprKind::Call { callee, args } => {
                self.expr(callee);
                for arg in args {
                    self.expr(arg);
                }
            }
            ExprKind::MethodCall { recv, args, .. } => {
                self.expr(recv);
                for arg in args {
                    self.expr(arg);
                }
            }
            ExprKind::Member { recv, .. } => self.expr(recv),
            ExprKind::Index { recv, index } => {
                self.expr(recv);
                self.expr(index);
            }
            ExprKind::Assign { target, value } => {
                self.expr(value);
                match &mut **target {
                    AssignTarget::Ident(ident) => self.resolve(ident),
                    AssignTarget::Member { recv, .. } => self.expr(recv),
                    AssignTarget::Index { recv, index } => {
                        self.expr(recv);
                        self.expr(index);
                    }
                }
            }
            ExprKind::If { cond, then, els } => {
                self.expr(cond);
                self.block(then);
                if let Some(els) = els {
                    self.block(els);
                }
            }
            ExprKind::Block(block) => self.block(block),
            ExprKind::Lambda { params, body, id } => {
                *id = Some(self.extract(Arc::from("<lambda>"), params, body, true));
            }
            ExprKind::ListLit(items) => {
                for item in items {
                    self.expr(item);
                }
            }
            ExprKind::MapLit(entries) => {
                for (k, v) in entries {
                    self.expr(k);
                    self.expr(v);
                }
            }
            ExprKind::RangeLit { start, end, .. } => {
                self.expr(start);
                self.expr(end);
            }
            ExprKind::TypeCheck { operand, .. } | ExprKind::TypeCast { operand, .. } => self.expr(operand),
            ExprKind::MethodRef { recv, name } => {
                if let Some(recv) = recv {
                    self.expr(recv);
                } else {
                    self.note_free(&name.clone());
                }
            }
            ExprKind::NullAssert(operand) | ExprKind::Propagate(operand) | ExprKind::Await(operand) => {
                self.expr(operand);
            }
            ExprKind::Elvis { value, fallback } => {
                self.expr(value);
                self.expr(fallback);
            }
            ExprKind::Throw(operand) => self.expr(operand),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hir::{DeclNames, Lit, Loc};

    fn expr(kind: ExprKind) -> Expr {
        Expr::new(kind, Loc::default())
    }

    fn stmt(kind: StmtKind) -> Stmt {
        Stmt::new(kind, Loc::default())
    }

    fn ident_expr(name: &str) -> Expr {
        expr(ExprKind::Ident(Ident::new(name)))
    }

    /// `fun f(a) { val b = a; b }`
    #[test]
    fn locals_resolve_params_and_decls() {
        let mut module = HirModule::new("test");
        module.body.push(stmt(StmtKind::Fun(FunDecl {
            name: Arc::from("f"),
            params: vec![Param::required("a")],
            body: Block::of(vec![
                stmt(StmtKind::Decl {
                    names: DeclNames::Single(Arc::from("b")),
                    init: ident_expr("a"),
                    mutable: false,
                }),
                stmt(StmtKind::Expr(ident_expr("b"))),
            ]),
            lambda: None,
        })));
        resolve_module(&mut module);

        let def = &module.lambdas[0];
        // param `a` is slot 0, `this` slot 1, `b` slot 2
        let StmtKind::Decl { init, .. } = &def.body.stmts[0].kind else {
            panic!()
        };
        let ExprKind::Ident(a) = &init.kind else { panic!() };
        assert_eq!(a.slot, Some((0, 0)));
        let StmtKind::Expr(e) = &def.body.stmts[1].kind else { panic!() };
        let ExprKind::Ident(b) = &e.kind else { panic!() };
        assert_eq!(b.slot, Some((0, 2)));
    }

    /// Module-level identifiers stay unresolved.
    #[test]
    fn module_level_stays_name_resolved() {
        let mut module = HirModule::new("test");
        module.body.push(stmt(StmtKind::Expr(ident_expr("x"))));
        resolve_module(&mut module);
        let StmtKind::Expr(e) = &module.body[0].kind else { panic!() };
        let ExprKind::Ident(x) = &e.kind else { panic!() };
        assert_eq!(x.slot, None);
    }

    /// A lambda capturing only immutable outer names keeps the minimal path;
    /// free names are recorded for the capture set.
    #[test]
    fn lambda_free_variables_recorded() {
        let mut module = HirModule::new("test");
        module.body.push(stmt(StmtKind::Expr(expr(ExprKind::Lambda {
            params: vec![Param::required("x")],
            body: Block::of(vec![stmt(StmtKind::Expr(expr(ExprKind::Binary {
                op: crate::ops::BinOp::Add,
                lhs: Box::new(ident_expr("x")),
                rhs: Box::new(ident_expr("captured")),
            })))]),
            id: None,
        }))));
        resolve_module(&mut module);

        let def = &module.lambdas[0];
        match &def.captures {
            CaptureSpec::Minimal(free) => assert_eq!(free.as_slice(), &[Arc::from("captured")]),
            CaptureSpec::ShareEnv => panic!("expected minimal captures"),
        }
    }

    /// A lambda containing a nested lambda falls back to sharing the
    /// environment: the shallow analysis does not descend into it.
    #[test]
    fn nested_lambda_forces_shared_env() {
        let mut module = HirModule::new("test");
        module.body.push(stmt(StmtKind::Expr(expr(ExprKind::Lambda {
            params: vec![],
            body: Block::of(vec![stmt(StmtKind::Expr(expr(ExprKind::Lambda {
                params: vec![],
                body: Block::of(vec![stmt(StmtKind::Expr(ident_expr("deep")))]),
                id: None,
            })))]),
            id: None,
        }))));
        resolve_module(&mut module);

        // outer lambda is extracted last (inner bodies first)
        let outer = module.lambdas.last().unwrap();
        assert!(matches!(outer.captures, CaptureSpec::ShareEnv));
        assert!(matches!(&module.lambdas[0].captures, CaptureSpec::Minimal(f) if f.len() == 1));
    }

    /// Loop bindings and bodies share one scope, reset per iteration.
    #[test]
    fn for_binding_resolves_in_loop_scope() {
        let mut module = HirModule::new("test");
        module.body.push(stmt(StmtKind::Fun(FunDecl {
            name: Arc::from("f"),
            params: vec![],
            body: Block::of(vec![stmt(StmtKind::For {
                label: None,
                binding: DeclNames::Single(Arc::from("i")),
                iterable: expr(ExprKind::RangeLit {
                    start: Box::new(expr(ExprKind::Literal(Lit::Int(0)))),
                    end: Box::new(expr(ExprKind::Literal(Lit::Int(3)))),
                    inclusive: false,
                }),
                body: Block::of(vec![stmt(StmtKind::Expr(ident_expr("i")))]),
            })]),
            lambda: None,
        })));
        resolve_module(&mut module);

        let def = &module.lambdas[0];
        let StmtKind::For { body, .. } = &def.body.stmts[0].kind else {
            panic!()
        };
        let StmtKind::Expr(e) = &body.stmts[0].kind else { panic!() };
        let ExprKind::Ident(i) = &e.kind else { panic!() };
        assert_eq!(i.slot, Some((0, 0)));
    }
}
