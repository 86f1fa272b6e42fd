//! Tree-walking evaluator over HIR.
//!
//! Statements and expressions return [`Eval`], which either carries a value or
//! a control-flow signal (`return`/`break`/`continue`). Signals are plain
//! typed results, not exceptions; they propagate outward until a loop or call
//! frame consumes them, which keeps labelled escapes cheap and testable.

use std::sync::Arc;

use smallvec::{SmallVec, smallvec};

use crate::{
    env::{Binding, Env, EnvFrame},
    errors::{ExcKind, RunError, RunResult, SimpleException},
    hir::{
        AssignTarget, Block, CaptureSpec, CatchClause, ClassDecl, DeclNames, Expr, ExprKind, FunDecl, HirModule,
        Ident, LambdaId, Lit, PropertyKind, Stmt, StmtKind, TemplatePart,
    },
    interp::Interpreter,
    ops::{self, BinOp},
    types::{
        Args, Callable, ClassKind, ClassValue, Closure, ConstructorDef, EnumEntry, FieldDef, MethodDef, NativeFn,
        ObjectValue, ParamDef, ResultValue, ValueIter, Visibility,
    },
    value::Value,
};

/// Result of evaluating a node: a value, or an in-flight control signal.
#[derive(Debug)]
pub(crate) enum Eval {
    Value(Value),
    Signal(Signal),
}

#[derive(Debug)]
pub(crate) enum Signal {
    Return(Value),
    Break(Option<Arc<str>>),
    Continue(Option<Arc<str>>),
}

pub(crate) type EvalResult = RunResult<Eval>;

/// Unwraps a value from an [`EvalResult`], short-circuiting signals outward.
macro_rules! try_value {
    ($e:expr) => {
        match $e {
            Eval::Value(v) => v,
            signal => return Ok(signal),
        }
    };
}

/// Unwraps evaluated arguments, short-circuiting a signal raised while
/// evaluating any argument expression.
macro_rules! try_args {
    ($e:expr) => {
        match $e {
            Eval2Args::Args(args) => args,
            Eval2Args::Signal(signal) => return Ok(*signal),
        }
    };
}

impl Interpreter {
    /// Executes an HIR module: module body in order, then `main()` if defined.
    pub fn execute_hir(&mut self, module: &Arc<HirModule>) -> RunResult<Value> {
        let globals = self.globals().clone();
        self.push_call(module.name.clone(), None);
        let result = self.exec_stmts(module, &module.body, &globals);
        self.pop_call();
        match result? {
            Eval::Signal(Signal::Return(v)) => return Ok(v),
            Eval::Signal(_) => {
                return Err(RunError::exc(ExcKind::TypeMismatch, "break/continue outside a loop"));
            }
            Eval::Value(_) => {}
        }
        match globals.try_get("main") {
            Some(main) => self.call_value(&main, smallvec![]),
            None => Ok(Value::Unit),
        }
    }

    /// Executes a module body for its last value (the `eval` entry point).
    pub(crate) fn exec_module_for_value(&mut self, module: &Arc<HirModule>) -> RunResult<Value> {
        let globals = self.globals().clone();
        match self.exec_stmts(module, &module.body, &globals)? {
            Eval::Value(v) | Eval::Signal(Signal::Return(v)) => Ok(v),
            Eval::Signal(_) => Err(RunError::exc(ExcKind::TypeMismatch, "break/continue outside a loop")),
        }
    }

    /// Executes statements in `env`, yielding the last expression's value.
    fn exec_stmts(&mut self, module: &Arc<HirModule>, stmts: &[Stmt], env: &Env) -> EvalResult {
        let mut last = Value::Unit;
        for stmt in stmts {
            last = try_value!(self.exec_stmt(module, stmt, env)?);
        }
        Ok(Eval::Value(last))
    }

    fn exec_block(&mut self, module: &Arc<HirModule>, block: &Block, env: &Env) -> EvalResult {
        if block.transparent {
            self.exec_stmts(module, &block.stmts, env)
        } else {
            let frame = EnvFrame::child(env);
            self.exec_stmts(module, &block.stmts, &frame)
        }
    }

    fn exec_stmt(&mut self, module: &Arc<HirModule>, stmt: &Stmt, env: &Env) -> EvalResult {
        match &stmt.kind {
            StmtKind::Expr(expr) => self.eval_expr(module, expr, env),
            StmtKind::Decl { names, init, mutable } => {
                let value = try_value!(self.eval_expr(module, init, env)?);
                self.bind_names(names, value, *mutable, env)
                    .map_err(|e| self.located(e, stmt.loc, module))?;
                Ok(Eval::Value(Value::Unit))
            }
            StmtKind::Fun(fun) => {
                let closure = self.make_closure(module, fun, env, None);
                env.define(
                    fun.name.clone(),
                    Value::Func(Callable::Closure(closure)),
                    false,
                    self.repl_mode,
                )
                .map_err(|e| self.located(e, stmt.loc, module))?;
                Ok(Eval::Value(Value::Unit))
            }
            StmtKind::Class(decl) => {
                let class = self
                    .register_hir_class(module, decl, env)
                    .map_err(|e| self.located(e, stmt.loc, module))?;
                env.define(decl.name.clone(), Value::Class(class), false, self.repl_mode)
                    .map_err(|e| self.located(e, stmt.loc, module))?;
                Ok(Eval::Value(Value::Unit))
            }
            StmtKind::While { label, cond, body } => self.exec_while(module, label.as_ref(), cond, body, env),
            StmtKind::For {
                label,
                binding,
                iterable,
                body,
            } => self.exec_for(module, label.as_ref(), binding, iterable, body, env),
            StmtKind::Return(value) => {
                let v = match value {
                    Some(expr) => try_value!(self.eval_expr(module, expr, env)?),
                    None => Value::Unit,
                };
                Ok(Eval::Signal(Signal::Return(v)))
            }
            StmtKind::Break { label } => Ok(Eval::Signal(Signal::Break(label.clone()))),
            StmtKind::Continue { label } => Ok(Eval::Signal(Signal::Continue(label.clone()))),
            StmtKind::Try { body, catches, finally } => self.exec_try(module, body, catches, finally.as_ref(), env),
            StmtKind::ExtensionFun { target, fun } => {
                let closure = self.make_closure(module, fun, env, None);
                self.runtime()
                    .register_extension_fn(target.clone(), fun.name.clone(), Value::Func(Callable::Closure(closure)));
                Ok(Eval::Value(Value::Unit))
            }
            StmtKind::ExtensionProp { target, name, getter } => {
                let closure = self.make_closure(module, getter, env, None);
                self.runtime()
                    .register_extension_prop(target.clone(), name.clone(), Value::Func(Callable::Closure(closure)));
                Ok(Eval::Value(Value::Unit))
            }
        }
    }

    fn exec_while(
        &mut self,
        module: &Arc<HirModule>,
        label: Option<&Arc<str>>,
        cond: &Expr,
        body: &Block,
        env: &Env,
    ) -> EvalResult {
        let frame = EnvFrame::child(env);
        loop {
            let test = try_value!(self.eval_expr(module, cond, env)?);
            if !test.is_truthy() {
                break;
            }
            frame.clear();
            match self.exec_stmts(module, &body.stmts, &frame)? {
                Eval::Signal(Signal::Break(l)) if label_matches(label, l.as_ref()) => break,
                Eval::Signal(Signal::Continue(l)) if label_matches(label, l.as_ref()) => {}
                Eval::Value(_) => {}
                signal => return Ok(signal),
            }
            self.check_back_edge()?;
        }
        Ok(Eval::Value(Value::Unit))
    }

    /// For-loop execution; `Range` iterables take an inlined integer loop in a
    /// single reused frame.
    fn exec_for(
        &mut self,
        module: &Arc<HirModule>,
        label: Option<&Arc<str>>,
        binding: &DeclNames,
        iterable: &Expr,
        body: &Block,
        env: &Env,
    ) -> EvalResult {
        let source = try_value!(self.eval_expr(module, iterable, env)?);
        let frame = EnvFrame::child(env);

        if let Value::Range(range) = source {
            let (mut next, mut remaining, step) = range.iter_state();
            while remaining > 0 {
                frame.clear();
                self.bind_names(binding, Value::Int(next), false, &frame)?;
                next = next.wrapping_add(step);
                remaining -= 1;
                match self.exec_stmts(module, &body.stmts, &frame)? {
                    Eval::Signal(Signal::Break(l)) if label_matches(label, l.as_ref()) => break,
                    Eval::Signal(Signal::Continue(l)) if label_matches(label, l.as_ref()) => {}
                    Eval::Value(_) => {}
                    signal => return Ok(signal),
                }
                self.check_back_edge()?;
            }
            return Ok(Eval::Value(Value::Unit));
        }

        let iter = self.make_iterator(&source)?;
        let cancel = self.cancel_token().clone();
        loop {
            let Some(item) = iter_next_opt(&iter, &cancel)? else {
                break;
            };
            frame.clear();
            self.bind_names(binding, item, false, &frame)?;
            match self.exec_stmts(module, &body.stmts, &frame)? {
                Eval::Signal(Signal::Break(l)) if label_matches(label, l.as_ref()) => break,
                Eval::Signal(Signal::Continue(l)) if label_matches(label, l.as_ref()) => {}
                Eval::Value(_) => {}
                signal => return Ok(signal),
            }
            self.check_back_edge()?;
        }
        Ok(Eval::Value(Value::Unit))
    }

    fn exec_try(
        &mut self,
        module: &Arc<HirModule>,
        body: &Block,
        catches: &[CatchClause],
        finally: Option<&Block>,
        env: &Env,
    ) -> EvalResult {
        let outcome = match self.exec_block(module, body, env) {
            Err(err) => self.run_catches(module, err, catches, env),
            ok => ok,
        };

        if let Some(finally) = finally {
            match self.exec_block(module, finally, env)? {
                // A return (or other signal) from `finally` wins over the
                // try-block outcome; an exception inside `finally` likewise
                // replaces the in-flight one (propagated by `?` above).
                Eval::Signal(signal) => return Ok(Eval::Signal(signal)),
                Eval::Value(_) => {}
            }
        }
        outcome
    }

    fn run_catches(&mut self, module: &Arc<HirModule>, err: RunError, catches: &[CatchClause], env: &Env) -> EvalResult {
        if !err.is_catchable() {
            return Err(err);
        }
        let RunError::Exc(raise) = err else {
            return Err(err);
        };
        for clause in catches {
            if !self.catch_matches(clause.class_name.as_deref(), &raise) {
                continue;
            }
            let bound = self.caught_value(&raise);
            let frame = EnvFrame::child(env);
            frame.define_val(clause.binding.clone(), bound)?;
            return self.exec_stmts(module, &clause.body.stmts, &frame);
        }
        Err(RunError::Exc(raise))
    }

    /// Evaluates one expression node.
    ///
    /// The match arms are ordered with the hot node kinds first; rare nodes
    /// sit at the bottom of the dispatch.
    pub(crate) fn eval_expr(&mut self, module: &Arc<HirModule>, expr: &Expr, env: &Env) -> EvalResult {
        let result = self.eval_expr_inner(module, expr, env);
        match result {
            Err(e) => Err(self.located(e, expr.loc, module)),
            ok => ok,
        }
    }

    fn eval_expr_inner(&mut self, module: &Arc<HirModule>, expr: &Expr, env: &Env) -> EvalResult {
        match &expr.kind {
            ExprKind::Ident(ident) => self.eval_ident(ident, env).map(Eval::Value),
            ExprKind::Literal(lit) => Ok(Eval::Value(literal_value(lit))),
            ExprKind::Binary { op, lhs, rhs } => {
                // Short-circuit forms never evaluate the right operand eagerly.
                match op {
                    BinOp::And => {
                        let l = try_value!(self.eval_expr(module, lhs, env)?);
                        if !l.is_truthy() {
                            return Ok(Eval::Value(Value::Bool(false)));
                        }
                        let r = try_value!(self.eval_expr(module, rhs, env)?);
                        Ok(Eval::Value(Value::Bool(r.is_truthy())))
                    }
                    BinOp::Or => {
                        let l = try_value!(self.eval_expr(module, lhs, env)?);
                        if l.is_truthy() {
                            return Ok(Eval::Value(Value::Bool(true)));
                        }
                        let r = try_value!(self.eval_expr(module, rhs, env)?);
                        Ok(Eval::Value(Value::Bool(r.is_truthy())))
                    }
                    _ => {
                        let l = try_value!(self.eval_expr(module, lhs, env)?);
                        let r = try_value!(self.eval_expr(module, rhs, env)?);
                        ops::binary_op(self, *op, l, r).map(Eval::Value)
                    }
                }
            }
            ExprKind::Unary { op, operand } => {
                let v = try_value!(self.eval_expr(module, operand, env)?);
                ops::unary_op(self, *op, v).map(Eval::Value)
            }
            ExprKind::Call { callee, args } => {
                // Evaluate the callee in callee position so zero-arg members
                // come back as bound callables instead of auto-invoking.
                let callee_value = match &callee.kind {
                    ExprKind::Member { recv, name, safe } => {
                        let target = try_value!(self.eval_expr(module, recv, env)?);
                        if *safe && target.is_null() {
                            return Ok(Eval::Value(Value::Null));
                        }
                        self.resolve_member(&target, name, true)?
                    }
                    _ => try_value!(self.eval_expr(module, callee, env)?),
                };
                let argv = try_args!(self.eval_args(module, args, env)?);
                self.call_value(&callee_value, argv).map(Eval::Value)
            }
            ExprKind::MethodCall { recv, name, args, safe } => {
                let target = try_value!(self.eval_expr(module, recv, env)?);
                if *safe && target.is_null() {
                    return Ok(Eval::Value(Value::Null));
                }
                let argv = try_args!(self.eval_args(module, args, env)?);
                self.invoke_method(&target, name, argv).map(Eval::Value)
            }
            ExprKind::Member { recv, name, safe } => {
                let target = try_value!(self.eval_expr(module, recv, env)?);
                if *safe && target.is_null() {
                    return Ok(Eval::Value(Value::Null));
                }
                self.resolve_member(&target, name, false).map(Eval::Value)
            }
            ExprKind::Index { recv, index } => {
                let target = try_value!(self.eval_expr(module, recv, env)?);
                let idx = try_value!(self.eval_expr(module, index, env)?);
                self.index_get(&target, &idx).map(Eval::Value)
            }
            ExprKind::Assign { target, value } => {
                let v = try_value!(self.eval_expr(module, value, env)?);
                match &**target {
                    AssignTarget::Ident(ident) => self.assign_ident(ident, v.clone(), env)?,
                    AssignTarget::Member { recv, name } => {
                        let obj = try_value!(self.eval_expr(module, recv, env)?);
                        self.set_member(&obj, name, v.clone())?;
                    }
                    AssignTarget::Index { recv, index } => {
                        let obj = try_value!(self.eval_expr(module, recv, env)?);
                        let idx = try_value!(self.eval_expr(module, index, env)?);
                        self.index_set(&obj, &idx, v.clone())?;
                    }
                }
                Ok(Eval::Value(v))
            }
            ExprKind::If { cond, then, els } => {
                let test = try_value!(self.eval_expr(module, cond, env)?);
                if test.is_truthy() {
                    self.exec_block(module, then, env)
                } else if let Some(els) = els {
                    self.exec_block(module, els, env)
                } else {
                    Ok(Eval::Value(Value::Unit))
                }
            }
            ExprKind::Block(block) => self.exec_block(module, block, env),
            ExprKind::Lambda { id, .. } => {
                let id = id.expect("lambda not extracted by resolver pass");
                let closure = self.create_lambda(module, id, env);
                Ok(Eval::Value(Value::Func(Callable::Closure(closure))))
            }
            ExprKind::ListLit(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(try_value!(self.eval_expr(module, item, env)?));
                }
                Ok(Eval::Value(Value::list_of(values)))
            }
            ExprKind::MapLit(entries) => {
                let map = Value::map_new();
                if let Value::Map(m) = &map {
                    for (k, v) in entries {
                        let key = try_value!(self.eval_expr(module, k, env)?);
                        let value = try_value!(self.eval_expr(module, v, env)?);
                        m.write().insert(key, value);
                    }
                }
                Ok(Eval::Value(map))
            }
            ExprKind::RangeLit { start, end, inclusive } => {
                let s = try_value!(self.eval_expr(module, start, env)?);
                let e = try_value!(self.eval_expr(module, end, env)?);
                let (Some(s), Some(e)) = (s.as_int(), e.as_int()) else {
                    return Err(RunError::type_mismatch("range bounds must be Int"));
                };
                Ok(Eval::Value(Value::Range(crate::types::Range::new(s, e, *inclusive))))
            }
            ExprKind::This => self.eval_this(env).map(Eval::Value),
            ExprKind::TypeCheck { operand, ty, negated } => {
                let v = try_value!(self.eval_expr(module, operand, env)?);
                let holds = self.type_check(&v, ty);
                Ok(Eval::Value(Value::Bool(holds != *negated)))
            }
            ExprKind::TypeCast { operand, ty, safe } => {
                let v = try_value!(self.eval_expr(module, operand, env)?);
                self.type_cast(v, ty, *safe).map(Eval::Value)
            }
            ExprKind::MethodRef { recv, name } => match recv {
                Some(recv) => {
                    let target = try_value!(self.eval_expr(module, recv, env)?);
                    let callable = self.resolve_member(&target, name, true)?;
                    Ok(Eval::Value(self.bind_method(target, callable)))
                }
                None => self.eval_ident(&Ident::new(name.clone()), env).map(Eval::Value),
            },
            ExprKind::NullAssert(operand) => {
                let v = try_value!(self.eval_expr(module, operand, env)?);
                if v.is_null() {
                    Err(RunError::null_deref("null assertion failed"))
                } else {
                    Ok(Eval::Value(v))
                }
            }
            ExprKind::Elvis { value, fallback } => {
                let v = try_value!(self.eval_expr(module, value, env)?);
                if v.is_null() {
                    self.eval_expr(module, fallback, env)
                } else {
                    Ok(Eval::Value(v))
                }
            }
            ExprKind::Propagate(operand) => {
                let v = try_value!(self.eval_expr(module, operand, env)?);
                match &v {
                    Value::Result(r) => match &**r {
                        ResultValue::Ok(inner) => Ok(Eval::Value(inner.clone())),
                        ResultValue::Err(_) => Ok(Eval::Signal(Signal::Return(v))),
                    },
                    Value::Null => Ok(Eval::Signal(Signal::Return(Value::Null))),
                    other => Ok(Eval::Value(other.clone())),
                }
            }
            ExprKind::Await(operand) => {
                let v = try_value!(self.eval_expr(module, operand, env)?);
                self.await_value(&v).map(Eval::Value)
            }
            ExprKind::Throw(operand) => {
                let v = try_value!(self.eval_expr(module, operand, env)?);
                Err(self.raise_thrown(v))
            }
            ExprKind::StrTemplate(parts) => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        TemplatePart::Text(text) => out.push_str(text),
                        TemplatePart::Expr(e) => {
                            let v = try_value!(self.eval_expr(module, e, env)?);
                            out.push_str(&self.display_value(&v)?);
                        }
                    }
                }
                Ok(Eval::Value(Value::str(out)))
            }
        }
    }

    fn eval_args(&mut self, module: &Arc<HirModule>, args: &[Expr], env: &Env) -> RunResult<Eval2Args> {
        let mut out: Args = SmallVec::with_capacity(args.len());
        for arg in args {
            match self.eval_expr(module, arg, env)? {
                Eval::Value(v) => out.push(v),
                signal => return Ok(Eval2Args::Signal(Box::new(signal))),
            }
        }
        Ok(Eval2Args::Args(out))
    }

    /// Identifier resolution policy: pre-resolved slot, environment walk,
    /// implicit `this` member, wildcard foreign resolution, unknown-name.
    fn eval_ident(&mut self, ident: &Ident, env: &Env) -> RunResult<Value> {
        if let Some((depth, slot)) = ident.slot {
            return Ok(env.get_at_slot(depth, slot));
        }
        if let Some(v) = env.try_get(&ident.name) {
            return Ok(v);
        }
        // Implicit `this` member: fields, getters, methods, built-in members.
        if let Some(this) = self.current_this(env)
            && let Ok(v) = self.resolve_member(&this, &ident.name, false)
        {
            return Ok(v);
        }
        if let Some(v) = self.resolve_wildcard_foreign(&ident.name)? {
            return Ok(v);
        }
        Err(RunError::unknown_name(&ident.name))
    }

    fn assign_ident(&mut self, ident: &Ident, value: Value, env: &Env) -> RunResult<()> {
        if let Some((depth, slot)) = ident.slot {
            return env.assign_at_slot(depth, slot, value);
        }
        if env.try_assign(&ident.name, value.clone())? {
            return Ok(());
        }
        // Fall back to an implicit `this` field.
        if let Some(this) = self.current_this(env)
            && self.set_member(&this, &ident.name, value).is_ok()
        {
            return Ok(());
        }
        Err(RunError::unknown_name(&ident.name))
    }

    fn eval_this(&self, env: &Env) -> RunResult<Value> {
        self.current_this(env)
            .ok_or_else(|| RunError::exc(ExcKind::UnknownName, "'this' is not defined in this context"))
    }

    /// The receiver in scope: the frame's `this` binding, or the transient
    /// scope-function receiver installed by `$ScopeCall`-style dispatch.
    pub(crate) fn current_this(&self, env: &Env) -> Option<Value> {
        match env.try_get("this") {
            Some(Value::Null) | None => self.scope_receiver(),
            Some(v) => Some(v),
        }
    }

    fn bind_names(&mut self, names: &DeclNames, value: Value, mutable: bool, env: &Env) -> RunResult<()> {
        match names {
            DeclNames::Single(name) => {
                env.define(name.clone(), value, mutable, self.repl_mode)?;
            }
            DeclNames::Destructure(parts) => {
                for (i, name) in parts.iter().enumerate() {
                    let component = self.component_n(&value, i + 1)?;
                    env.define(name.clone(), component, mutable, self.repl_mode)?;
                }
            }
        }
        Ok(())
    }

    /// Destructuring: `component1`, `component2`, ... with fast paths for
    /// pairs and lists.
    pub(crate) fn component_n(&mut self, value: &Value, n: usize) -> RunResult<Value> {
        match value {
            Value::Pair(p) if n == 1 => Ok(p.first.clone()),
            Value::Pair(p) if n == 2 => Ok(p.second.clone()),
            Value::List(list) => list
                .read()
                .get(n - 1)
                .cloned()
                .ok_or_else(|| RunError::index_out_of_bounds(n as i64 - 1, list.read().len())),
            other => self.invoke_method(other, &format!("component{n}"), smallvec![]),
        }
    }

    // --- closures ---------------------------------------------------------

    fn make_closure(&mut self, module: &Arc<HirModule>, fun: &FunDecl, env: &Env, this: Option<Value>) -> Arc<Closure> {
        let id = fun.lambda.expect("function not extracted by resolver pass");
        Arc::new(Closure {
            name: fun.name.clone(),
            module: module.clone(),
            lambda: id,
            env: env.clone(),
            this,
        })
    }

    /// Lambda creation with the minimal-closure strategy.
    ///
    /// If the capture analysis produced a candidate set and every captured
    /// binding is currently immutable, a fresh minimal frame holding only
    /// those bindings (plus `this`) is used; any mutable capture falls back to
    /// sharing the creating environment so mutation stays observable.
    fn create_lambda(&mut self, module: &Arc<HirModule>, id: LambdaId, env: &Env) -> Arc<Closure> {
        let def = module.lambda(id);
        let this = self.current_this(env);
        let env = match &def.captures {
            CaptureSpec::ShareEnv => env.clone(),
            CaptureSpec::Minimal(names) => {
                let mut captured = Vec::with_capacity(names.len());
                let mut all_immutable = true;
                for name in names {
                    match lookup_binding(env, name) {
                        Some(binding) if !binding.mutable => captured.push(binding),
                        Some(_) => {
                            all_immutable = false;
                            break;
                        }
                        // Unbound names may be late-bound globals; keep the
                        // chain so they resolve at call time.
                        None => {
                            all_immutable = false;
                            break;
                        }
                    }
                }
                if all_immutable {
                    EnvFrame::with_bindings(Some(self.globals().clone()), captured)
                } else {
                    env.clone()
                }
            }
        };
        Arc::new(Closure {
            name: def.name.clone(),
            module: module.clone(),
            lambda: id,
            env,
            this,
        })
    }

    /// Calls an HIR closure: fresh frame, parameters, `this`, body.
    pub(crate) fn call_closure(&mut self, closure: &Arc<Closure>, args: Args) -> RunResult<Value> {
        let module = closure.module.clone();
        let def = module.lambda(closure.lambda);

        if args.len() > def.params.len() {
            return Err(RunError::arity(&def.name, def.params.len(), args.len()));
        }

        let frame = EnvFrame::child(&closure.env);
        let mut args = args.into_iter();
        for param in &def.params {
            let value = match args.next() {
                Some(v) => v,
                None => match &param.default {
                    Some(default) => match self.eval_expr(&module, default, &frame)? {
                        Eval::Value(v) => v,
                        Eval::Signal(_) => {
                            return Err(RunError::internal("control-flow signal in default parameter"));
                        }
                    },
                    None => return Err(RunError::arity(&def.name, def.params.len(), 0)),
                },
            };
            frame.define(param.name.clone(), value, false, false)?;
        }
        // `this` always occupies the slot after the parameters so resolved
        // slot indices stay stable whether or not a receiver is bound.
        frame.define(Arc::from("this"), closure.this.clone().unwrap_or(Value::Null), false, false)?;

        self.enter_call(&def.name, None)?;
        let result = self.exec_stmts(&module, &def.body.stmts, &frame);
        self.pop_call();

        match result? {
            Eval::Value(v) => Ok(v),
            Eval::Signal(Signal::Return(v)) => Ok(v),
            Eval::Signal(_) => Err(RunError::exc(ExcKind::TypeMismatch, "break/continue outside a loop")),
        }
    }

    // --- classes ----------------------------------------------------------

    /// Registers an HIR class: field layout, method table, constructors, data
    /// synthesis, statics, enum entries, annotation processors.
    pub(crate) fn register_hir_class(
        &mut self,
        module: &Arc<HirModule>,
        decl: &ClassDecl,
        env: &Env,
    ) -> RunResult<Arc<ClassValue>> {
        let superclass = decl
            .superclass
            .as_ref()
            .and_then(|name| self.runtime().class_by_name(name));
        // A superclass unknown to the engine must resolve through the bridge.
        let foreign_super = match (&decl.superclass, &superclass) {
            (Some(name), None) => {
                let resolved = self.runtime().resolve_foreign_class(name, self.policy())?;
                if resolved.is_none() {
                    return Err(RunError::exc(
                        ExcKind::ClassNotFound,
                        format!("unknown superclass: {name}"),
                    ));
                }
                resolved
            }
            _ => None,
        };
        let mut interfaces = Vec::with_capacity(decl.interfaces.len());
        for name in &decl.interfaces {
            match self.runtime().class_by_name(name) {
                Some(c) => interfaces.push(c),
                None => {
                    return Err(RunError::exc(
                        ExcKind::ClassNotFound,
                        format!("unknown interface: {name}"),
                    ));
                }
            }
        }

        let id = self.runtime().next_class_id();
        let mut class = ClassValue::new(
            id,
            decl.name.clone(),
            superclass,
            interfaces,
            decl.kind,
            decl.is_abstract,
            decl.is_sealed,
            decl.is_data,
        );
        class.foreign_super = foreign_super;
        class.annotations = decl.annotations.clone();

        // Field layout: property-flagged primary params first, then declared
        // fields, in declaration order.
        for param in &decl.primary_params {
            if let Some(kind) = param.property {
                class.fields.push(FieldDef {
                    name: param.name.clone(),
                    mutable: kind == PropertyKind::Var,
                    visibility: param.visibility,
                });
            }
        }
        for field in &decl.fields {
            class.fields.push(FieldDef {
                name: field.name.clone(),
                mutable: field.mutable,
                visibility: field.visibility,
            });
        }

        // Data-class field order comes from the primary constructor list.
        if decl.is_data {
            class.data_fields = decl
                .primary_params
                .iter()
                .filter(|p| p.property.is_some())
                .map(|p| p.name.clone())
                .collect();
        }

        for method in &decl.methods {
            let closure = self.make_closure(module, &method.fun, env, None);
            class.methods.insert(
                method.fun.name.clone(),
                MethodDef {
                    name: method.fun.name.clone(),
                    callable: Callable::Closure(closure),
                    visibility: method.visibility,
                    is_static: false,
                    is_abstract: method.is_abstract,
                    is_default: method.is_default,
                },
            );
        }
        for (name, getter) in &decl.getters {
            let closure = self.make_closure(module, getter, env, None);
            class.getters.insert(
                name.clone(),
                MethodDef {
                    name: name.clone(),
                    callable: Callable::Closure(closure),
                    visibility: Visibility::Public,
                    is_static: false,
                    is_abstract: false,
                    is_default: false,
                },
            );
        }

        // Primary constructor: a native that binds params, installs property
        // fields, and runs field initializers against the declaration.
        let decl_arc = Arc::new(decl.clone());
        {
            let module = module.clone();
            let decl_arc = decl_arc.clone();
            let env = env.clone();
            class.constructors.push(ConstructorDef {
                params: decl
                    .primary_params
                    .iter()
                    .map(|p| ParamDef {
                        name: p.name.clone(),
                        has_default: p.default.is_some(),
                    })
                    .collect(),
                callable: Callable::Native(NativeFn::new(
                    format!("{}.<init>", decl.name),
                    None,
                    move |interp, this, args| {
                        let this = this.ok_or_else(|| RunError::internal("constructor without receiver"))?;
                        interp.run_primary_ctor(&module, &decl_arc, &env, &this, args)?;
                        Ok(Value::Unit)
                    },
                )),
                visibility: Visibility::Public,
            });
        }
        for ctor in &decl.ctors {
            let id = ctor.lambda.expect("constructor not extracted");
            let closure = Arc::new(Closure {
                name: Arc::from(format!("{}.<init>", decl.name)),
                module: module.clone(),
                lambda: id,
                env: env.clone(),
                this: None,
            });
            class.constructors.push(ConstructorDef {
                params: module
                    .lambda(id)
                    .params
                    .iter()
                    .map(|p| ParamDef {
                        name: p.name.clone(),
                        has_default: p.default.is_some(),
                    })
                    .collect(),
                callable: Callable::Closure(closure),
                visibility: ctor.visibility,
            });
        }

        let class = Arc::new(class);
        self.runtime().register_class(class.clone());

        // Statics evaluate in the defining environment at registration time.
        for static_field in &decl.statics {
            let value = match &static_field.init {
                Some(init) => match self.eval_expr(module, init, env)? {
                    Eval::Value(v) => v,
                    Eval::Signal(_) => return Err(RunError::internal("control-flow signal in static initializer")),
                },
                None => Value::Null,
            };
            class.statics.write().insert(static_field.name.clone(), value);
        }

        // Enum entries are singletons created at registration, in order.
        for (ordinal, entry_decl) in decl.enum_entries.iter().enumerate() {
            let mut fields = ahash::AHashMap::new();
            for (param, arg) in decl.primary_params.iter().zip(&entry_decl.args) {
                let value = match self.eval_expr(module, arg, env)? {
                    Eval::Value(v) => v,
                    Eval::Signal(_) => return Err(RunError::internal("control-flow signal in enum entry")),
                };
                fields.insert(param.name.clone(), value);
            }
            let mut overrides = ahash::AHashMap::new();
            for method in &entry_decl.overrides {
                let closure = self.make_closure(module, &method.fun, env, None);
                overrides.insert(
                    method.fun.name.clone(),
                    MethodDef {
                        name: method.fun.name.clone(),
                        callable: Callable::Closure(closure),
                        visibility: method.visibility,
                        is_static: false,
                        is_abstract: false,
                        is_default: false,
                    },
                );
            }
            let entry = Arc::new(EnumEntry {
                owner: Arc::downgrade(&class),
                owner_name: class.name.clone(),
                name: entry_decl.name.clone(),
                ordinal: ordinal as u32,
                fields: parking_lot::RwLock::new(fields),
                overrides,
            });
            class.enum_entries.write().push(entry);
        }

        self.run_annotation_processors(&class)?;
        Ok(class)
    }

    /// Runs the primary constructor against a freshly allocated object:
    /// superclass chain first, then property params, then field initializers.
    fn run_primary_ctor(
        &mut self,
        module: &Arc<HirModule>,
        decl: &Arc<ClassDecl>,
        env: &Env,
        this: &Value,
        args: Args,
    ) -> RunResult<()> {
        let Value::Object(obj) = this else {
            return Err(RunError::internal("constructor receiver is not an object"));
        };

        // Bind primary parameters (defaults evaluate left to right with
        // earlier parameters visible), mirroring the resolver's layout.
        let frame = EnvFrame::child(env);
        let mut incoming = args.into_iter();
        for param in &decl.primary_params {
            let value = match incoming.next() {
                Some(v) => v,
                None => match &param.default {
                    Some(default) => match self.eval_expr(module, default, &frame)? {
                        Eval::Value(v) => v,
                        Eval::Signal(_) => return Err(RunError::internal("signal in parameter default")),
                    },
                    None => {
                        return Err(RunError::arity(&decl.name, decl.primary_params.len(), 0));
                    }
                },
            };
            frame.define(param.name.clone(), value, false, false)?;
        }
        frame.define(Arc::from("this"), this.clone(), false, false)?;

        // Superclass portion: engine superclass runs its own primary
        // constructor on the same object; a foreign superclass constructs the
        // delegate instance.
        if let Some(superclass) = &obj.class.superclass {
            let mut super_args: Args = SmallVec::with_capacity(decl.super_args.len());
            for arg in &decl.super_args {
                match self.eval_expr(module, arg, &frame)? {
                    Eval::Value(v) => super_args.push(v),
                    Eval::Signal(_) => return Err(RunError::internal("signal in super argument")),
                }
            }
            let ctor = superclass.find_constructor(super_args.len()).ok_or_else(|| {
                RunError::arity(&superclass.name, superclass.constructors.len(), super_args.len())
            })?;
            let callable = ctor.callable.clone();
            self.call_callable_with_this(&callable, Some(this.clone()), super_args)?;
        } else if let Some(foreign) = &obj.class.foreign_super {
            let mut super_args: Args = SmallVec::with_capacity(decl.super_args.len());
            for arg in &decl.super_args {
                match self.eval_expr(module, arg, &frame)? {
                    Eval::Value(v) => super_args.push(v),
                    Eval::Signal(_) => return Err(RunError::internal("signal in super argument")),
                }
            }
            let delegate = self.construct_foreign_subclass(foreign, &obj.class, this, super_args)?;
            let _ = obj.external.set(delegate);
        }

        // Property-flagged params become fields.
        for param in &decl.primary_params {
            if param.property.is_some()
                && let Some((slot, _)) = obj.class.field_slot(&param.name)
            {
                let value = frame.try_get(&param.name).unwrap_or(Value::Null);
                obj.set_field(slot, value);
            }
        }

        // Declared-field initializers run in order with params and `this`.
        for field in &decl.fields {
            let value = match &field.init {
                Some(init) => match self.eval_expr(module, init, &frame)? {
                    Eval::Value(v) => v,
                    Eval::Signal(_) => return Err(RunError::internal("signal in field initializer")),
                },
                None => Value::Null,
            };
            if let Some((slot, _)) = obj.class.field_slot(&field.name) {
                obj.set_field(slot, value);
            }
        }
        Ok(())
    }

    /// Instantiates an engine class: allocate, pick a constructor by arity,
    /// run it with `this` bound.
    pub(crate) fn instantiate_class(&mut self, class: &Arc<ClassValue>, args: Args) -> RunResult<Value> {
        if class.is_abstract || class.kind == ClassKind::Interface {
            return Err(RunError::type_mismatch(format!(
                "cannot instantiate abstract type {}",
                class.name
            )));
        }
        let ctor = class
            .find_constructor(args.len())
            .ok_or_else(|| RunError::arity(&class.name, class.constructors.len(), args.len()))?;
        let callable = ctor.callable.clone();
        let obj = Value::Object(Arc::new(ObjectValue::new(class.clone())));

        self.push_class(class.clone());
        let result = self.call_callable_with_this(&callable, Some(obj.clone()), args);
        self.pop_class();
        result?;
        Ok(obj)
    }

    // --- exceptions -------------------------------------------------------

    /// Builds the `UserThrown` raise for `throw v` / `error(msg)`.
    pub(crate) fn raise_thrown(&mut self, value: Value) -> RunError {
        let message = match &value {
            Value::Str(s) => Some(s.to_string()),
            Value::Object(obj) => obj
                .class
                .field_slot("message")
                .map(|(slot, _)| obj.get_field(slot))
                .and_then(|v| match v {
                    Value::Str(s) => Some(s.to_string()),
                    Value::Null => None,
                    other => Some(other.render()),
                }),
            other => Some(other.render()),
        };
        let mut raise = crate::errors::Raise::new(SimpleException::thrown(message, value));
        raise.stack = self.capture_stack();
        RunError::Exc(Box::new(raise))
    }

    /// Whether a declared catch class matches the in-flight raise.
    fn catch_matches(&self, declared: Option<&str>, raise: &crate::errors::Raise) -> bool {
        let Some(declared) = declared else {
            return true;
        };
        if declared == "Exception" || declared == "Any" {
            return true;
        }
        if raise.exc.kind() == ExcKind::UserThrown {
            if let Some(Value::Object(obj)) = raise.exc.payload() {
                return obj.class.is_subtype_of(declared);
            }
            if let Some(payload) = raise.exc.payload() {
                return &*payload.type_name() == declared;
            }
        }
        declared == raise.exc.kind().to_string()
    }

    /// The value bound by a catch clause: the original thrown value when
    /// there is one, otherwise a synthesized exception wrapper.
    fn caught_value(&mut self, raise: &crate::errors::Raise) -> Value {
        if raise.exc.kind() == ExcKind::UserThrown
            && let Some(payload) = raise.exc.payload()
            && matches!(payload, Value::Object(_))
        {
            return payload.clone();
        }
        self.runtime()
            .make_exception_value(raise.exc.kind(), raise.exc.message().unwrap_or_default())
    }

    // --- iteration --------------------------------------------------------

    /// The iterator protocol over every iterable value kind.
    pub(crate) fn make_iterator(&mut self, source: &Value) -> RunResult<Arc<crate::types::IterValue>> {
        use crate::types::IterValue;
        let iter = match source {
            Value::Range(range) => ValueIter::of_range(*range),
            Value::List(list) => ValueIter::List {
                list: list.clone(),
                idx: 0,
            },
            Value::Array(arr) => ValueIter::Array { arr: arr.clone(), idx: 0 },
            Value::Map(map) => ValueIter::MapEntries { map: map.clone(), idx: 0 },
            Value::Str(s) => ValueIter::of_str(s),
            Value::Channel(ch) => ValueIter::Channel {
                ch: ch.clone(),
                done: false,
            },
            Value::Iter(iter) => return Ok(iter.clone()),
            // Objects with an `iterator()` method drain it eagerly through
            // the hasNext/next protocol.
            Value::Object(_) | Value::External(_) => {
                let handle = self.invoke_method(source, "iterator", smallvec![])?;
                match handle {
                    Value::Iter(iter) => return Ok(iter.clone()),
                    other => {
                        let mut items = Vec::new();
                        let cancel = self.cancel_token().clone();
                        loop {
                            let has = self.invoke_method(&other, "hasNext", smallvec![])?;
                            if !has.is_truthy() {
                                break;
                            }
                            items.push(self.invoke_method(&other, "next", smallvec![])?);
                            if items.len() % 64 == 0 {
                                cancel.check()?;
                            }
                        }
                        ValueIter::Values(items.into_iter())
                    }
                }
            }
            other => {
                return Err(RunError::type_mismatch(format!(
                    "{} is not iterable",
                    other.type_name()
                )));
            }
        };
        Ok(IterValue::new(iter))
    }
}

/// Helper enum: either evaluated arguments or a propagating signal.
pub(crate) enum Eval2Args {
    Args(Args),
    Signal(Box<Eval>),
}

fn label_matches(loop_label: Option<&Arc<str>>, signal_label: Option<&Arc<str>>) -> bool {
    match signal_label {
        None => true,
        Some(l) => loop_label.is_some_and(|own| own == l),
    }
}

fn literal_value(lit: &Lit) -> Value {
    match lit {
        Lit::Null => Value::Null,
        Lit::Unit => Value::Unit,
        Lit::Bool(b) => Value::Bool(*b),
        Lit::Int(i) => Value::Int(*i),
        Lit::Long(i) => Value::Long(*i),
        Lit::Double(d) => Value::Double(*d),
        Lit::Char(c) => Value::Char(*c),
        Lit::Str(s) => Value::Str(s.clone()),
    }
}

/// Walks the environment chain for a binding snapshot (value + mutability).
fn lookup_binding(env: &Env, name: &Arc<str>) -> Option<Binding> {
    let mut frame: &EnvFrame = env;
    loop {
        if let Some(binding) = frame.local_binding(name) {
            return Some(binding);
        }
        frame = frame.parent()?.as_ref();
    }
}

fn iter_next_opt(iter: &Arc<crate::types::IterValue>, cancel: &crate::concurrent::CancelToken) -> RunResult<Option<Value>> {
    if iter.has_next(cancel)? {
        Ok(Some(iter.next(cancel)?))
    } else {
        Ok(None)
    }
}
