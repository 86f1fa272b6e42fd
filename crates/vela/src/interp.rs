//! The interpreter: embedding API and the call funnel shared by both tiers.
//!
//! One `Interpreter` executes single-threaded; async children are separate
//! instances created by [`Interpreter::fork_child`], sharing the runtime's
//! read-mostly tables, the globals frame, the console, and the tracer, while
//! owning their own call stack, resource tracker, and cancel token.

use std::sync::Arc;

use smallvec::smallvec;

use crate::{
    builtins,
    concurrent::CancelToken,
    env::{Env, EnvFrame},
    errors::{CodeLoc, ExcKind, Exception, RunError, RunResult, StackFrame},
    hir::{self, HirModule, Loc},
    io::{Console, StdConsole},
    mir::{FramePool, MirModule},
    policy::SecurityPolicy,
    resource::ResourceTracker,
    runtime::{AnnotationHandle, Runtime},
    tracer::{ExecTracer, NoopTracer},
    types::{Args, BoundMethod, Callable, ClassValue},
    value::Value,
};

/// A program unit handed to [`Interpreter::execute`]: either tier is valid.
#[derive(Debug)]
pub enum ProgramModule {
    Hir(HirModule),
    Mir(MirModule),
}

/// One entry of the language-level call stack.
#[derive(Debug, Clone)]
pub(crate) struct CallRecord {
    pub name: Arc<str>,
    pub location: Option<CodeLoc>,
    /// Tail calls folded into this frame; reported in trace assembly.
    pub folded_tail_calls: u32,
}

pub struct Interpreter {
    runtime: Arc<Runtime>,
    globals: Env,
    console: Arc<dyn Console>,
    tracer: Arc<dyn ExecTracer>,
    policy: Arc<SecurityPolicy>,
    pub(crate) tracker: ResourceTracker,
    cancel: CancelToken,
    pub(crate) repl_mode: bool,
    call_stack: Vec<CallRecord>,
    /// Class whose method body is executing; drives visibility checks.
    class_stack: Vec<Arc<ClassValue>>,
    /// Transient receivers installed by scope-function dispatch.
    scope_receivers: Vec<Value>,
    /// Ambient structured-concurrency scopes; the global `launch` builtin
    /// attaches its child to the innermost one.
    scope_context: Vec<Arc<crate::concurrent::ScopeValue>>,
    /// Module whose MIR is currently executing (same-module static calls).
    pub(crate) mir_module: Option<Arc<MirModule>>,
    pub(crate) frame_pool: FramePool,
    /// Root interpreters tear the runtime down on drop; children don't.
    owns_runtime: bool,
}

impl std::fmt::Debug for Interpreter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interpreter")
            .field("depth", &self.call_stack.len())
            .field("repl_mode", &self.repl_mode)
            .finish_non_exhaustive()
    }
}

impl Interpreter {
    /// Constructs an engine with the process console.
    pub fn new(policy: SecurityPolicy) -> Self {
        Self::with_console(policy, Arc::new(StdConsole))
    }

    /// Constructs an engine with a custom console (stdout/stderr/stdin).
    pub fn with_console(policy: SecurityPolicy, console: Arc<dyn Console>) -> Self {
        let tracker = ResourceTracker::new(policy.resource_limits());
        Self {
            runtime: Runtime::new(),
            globals: EnvFrame::new_global(),
            console,
            tracer: Arc::new(NoopTracer),
            policy: Arc::new(policy),
            tracker,
            cancel: CancelToken::new(),
            repl_mode: false,
            call_stack: Vec::new(),
            class_stack: Vec::new(),
            scope_receivers: Vec::new(),
            scope_context: Vec::new(),
            mir_module: None,
            frame_pool: FramePool::default(),
            owns_runtime: true,
        }
    }

    pub fn set_tracer(&mut self, tracer: Arc<dyn ExecTracer>) {
        self.tracer = tracer;
    }

    /// REPL mode permits in-place redefinition of existing bindings.
    pub fn set_repl_mode(&mut self, enabled: bool) {
        self.repl_mode = enabled;
    }

    pub fn get_environment(&self) -> &Env {
        &self.globals
    }

    pub fn get_globals(&self) -> &Env {
        &self.globals
    }

    pub(crate) fn globals(&self) -> &Env {
        &self.globals
    }

    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    pub fn policy(&self) -> &Arc<SecurityPolicy> {
        &self.policy
    }

    pub(crate) fn console(&self) -> &Arc<dyn Console> {
        &self.console
    }

    pub(crate) fn tracer_handle(&self) -> Arc<dyn ExecTracer> {
        self.tracer.clone()
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Registers the standard builtin set (§ embedding API).
    pub fn register_builtins(&mut self) {
        builtins::register_builtins(self);
    }

    /// Registers a user extension function on a type name.
    pub fn register_extension(&mut self, type_name: impl Into<Arc<str>>, name: impl Into<Arc<str>>, callable: Value) {
        self.runtime
            .register_extension_fn(type_name.into(), name.into(), callable);
    }

    /// Registers an annotation processor, returning its control handle.
    pub fn register_annotation_processor(
        &mut self,
        name: impl Into<Arc<str>>,
        handler: Value,
    ) -> AnnotationHandle {
        AnnotationHandle::new(self.runtime.clone(), name.into(), handler)
    }

    /// Executes a module; returns the value of `main` (or unit).
    pub fn execute(&mut self, module: ProgramModule) -> Result<Value, Exception> {
        self.tracker.restart_clock();
        let result = match module {
            ProgramModule::Hir(mut module) => {
                hir::resolver::resolve_module(&mut module);
                let module = Arc::new(module);
                self.execute_hir(&module)
            }
            ProgramModule::Mir(module) => {
                let module = Arc::new(module);
                self.execute_mir_module(&module)
            }
        };
        result.map_err(RunError::into_exception)
    }

    /// Evaluates a single HIR expression against the current globals.
    pub fn eval(&mut self, expr: hir::Expr) -> Result<Value, Exception> {
        let mut module = HirModule::new("<eval>");
        module.body.push(hir::Stmt::new(hir::StmtKind::Expr(expr), Loc::default()));
        hir::resolver::resolve_module(&mut module);
        let module = Arc::new(module);
        self.tracker.restart_clock();
        self.exec_module_for_value(&module).map_err(RunError::into_exception)
    }

    /// Child interpreter for one async task: shares runtime/globals/console/
    /// tracer/policy, owns a fresh tracker and the task's cancel token.
    pub(crate) fn fork_child(&self, cancel: CancelToken) -> Interpreter {
        Interpreter {
            runtime: self.runtime.clone(),
            globals: self.globals.clone(),
            console: self.console.clone(),
            tracer: self.tracer.clone(),
            policy: self.policy.clone(),
            tracker: ResourceTracker::new(self.policy.resource_limits()),
            cancel,
            repl_mode: self.repl_mode,
            call_stack: Vec::new(),
            class_stack: Vec::new(),
            scope_receivers: Vec::new(),
            scope_context: Vec::new(),
            mir_module: self.mir_module.clone(),
            frame_pool: FramePool::default(),
            owns_runtime: false,
        }
    }

    // --- call stack & limits ---------------------------------------------

    pub(crate) fn push_call(&mut self, name: Arc<str>, location: Option<CodeLoc>) {
        self.call_stack.push(CallRecord {
            name,
            location,
            folded_tail_calls: 0,
        });
    }

    /// Call entry: recursion/cancel checks, tracer hook, stack record.
    pub(crate) fn enter_call(&mut self, name: &Arc<str>, location: Option<CodeLoc>) -> RunResult<()> {
        self.cancel.check()?;
        self.tracker.check_recursion(self.call_stack.len() as u32)?;
        self.tracer.on_call(name, self.call_stack.len() + 1);
        self.push_call(name.clone(), location);
        Ok(())
    }

    pub(crate) fn pop_call(&mut self) {
        self.call_stack.pop();
        self.tracer.on_return(self.call_stack.len());
    }

    /// Bumps the tail-call fold counter of the current frame, enforcing the
    /// recursion cap on folded calls too.
    pub(crate) fn fold_tail_call(&mut self) -> RunResult<u32> {
        let depth = self.call_stack.len() as u32;
        if let Some(top) = self.call_stack.last_mut() {
            top.folded_tail_calls += 1;
            let folded = top.folded_tail_calls;
            self.tracker.check_recursion(depth.saturating_add(folded))?;
            return Ok(folded);
        }
        Ok(0)
    }

    /// Loop back-edge: cap check plus cooperative cancellation.
    pub(crate) fn check_back_edge(&mut self) -> RunResult<()> {
        self.cancel.check()?;
        self.tracker.check_loop_edge()?;
        Ok(())
    }

    /// Captured language-level stack trace, innermost frame first.
    pub(crate) fn capture_stack(&self) -> Vec<StackFrame> {
        self.call_stack
            .iter()
            .rev()
            .map(|record| StackFrame {
                name: record.name.clone(),
                location: record.location.clone(),
                folded_tail_calls: record.folded_tail_calls,
            })
            .collect()
    }

    /// Attaches node location and (once) the captured stack to an error.
    pub(crate) fn located(&self, err: RunError, loc: Loc, module: &Arc<HirModule>) -> RunError {
        self.locate_err(err, loc.code_loc(module.file.as_ref()))
    }

    pub(crate) fn locate_err(&self, err: RunError, loc: CodeLoc) -> RunError {
        let err = err.with_location(&loc);
        match err {
            RunError::Exc(mut raise) => {
                if raise.stack.is_empty() {
                    raise.stack = self.capture_stack();
                }
                RunError::Exc(raise)
            }
            RunError::Uncatchable(mut raise) => {
                if raise.stack.is_empty() {
                    raise.stack = self.capture_stack();
                }
                RunError::Uncatchable(raise)
            }
            other => other,
        }
    }

    // --- class & scope-receiver stacks -----------------------------------

    pub(crate) fn push_class(&mut self, class: Arc<ClassValue>) {
        self.class_stack.push(class);
    }

    pub(crate) fn pop_class(&mut self) {
        self.class_stack.pop();
    }

    pub(crate) fn current_class(&self) -> Option<&Arc<ClassValue>> {
        self.class_stack.last()
    }

    pub(crate) fn push_scope_receiver(&mut self, receiver: Value) {
        self.scope_receivers.push(receiver);
    }

    pub(crate) fn pop_scope_receiver(&mut self) {
        self.scope_receivers.pop();
    }

    pub(crate) fn scope_receiver(&self) -> Option<Value> {
        self.scope_receivers.last().cloned()
    }

    pub(crate) fn push_scope_context(&mut self, scope: Arc<crate::concurrent::ScopeValue>) {
        self.scope_context.push(scope);
    }

    pub(crate) fn pop_scope_context(&mut self) {
        self.scope_context.pop();
    }

    /// The innermost structured scope whose block is executing, if any.
    pub(crate) fn current_scope(&self) -> Option<Arc<crate::concurrent::ScopeValue>> {
        self.scope_context.last().cloned()
    }

    // --- the call funnel --------------------------------------------------

    /// Calls any callable value: closures, MIR functions, builtins, natives,
    /// partials, bound methods, classes, and foreign classes.
    pub fn call_value(&mut self, callee: &Value, args: Args) -> RunResult<Value> {
        match callee {
            Value::Func(callable) => {
                let callable = callable.clone();
                self.call_callable_with_this(&callable, None, args)
            }
            Value::Bound(bound) => {
                let BoundMethod { receiver, callable } = (**bound).clone();
                match callable {
                    Value::Func(callable) => self.call_callable_with_this(&callable, Some(receiver), args),
                    other => self.call_value(&other, args),
                }
            }
            Value::Class(class) => {
                let class = class.clone();
                self.instantiate_class(&class, args)
            }
            Value::ForeignClass(class) => {
                let class = class.clone();
                self.instantiate_foreign(&class, args)
            }
            other => Err(RunError::type_mismatch(format!(
                "{} is not callable",
                other.type_name()
            ))),
        }
    }

    /// The single funnel every callable shape passes through.
    pub(crate) fn call_callable_with_this(
        &mut self,
        callable: &Callable,
        this: Option<Value>,
        args: Args,
    ) -> RunResult<Value> {
        match callable {
            Callable::Closure(closure) => {
                let closure = match this {
                    Some(this) if closure.this.is_none() => closure.with_this(this),
                    _ => closure.clone(),
                };
                self.call_closure(&closure, args)
            }
            Callable::Mir(mir) => {
                let mir = mir.clone();
                self.call_mir_function(&mir, this, args)
            }
            Callable::Builtin(builtin) => builtins::call_builtin(self, *builtin, this, args),
            Callable::Native(native) => {
                if let Some(expected) = native.arity
                    && args.len() != expected
                {
                    return Err(RunError::arity(&native.name, expected, args.len()));
                }
                let native = native.clone();
                (native.f)(self, this, args)
            }
            Callable::Partial(partial) => {
                let partial = partial.clone();
                let merged = partial.merge(args);
                self.call_value(&partial.target, merged)
            }
        }
    }

    /// Calls `block` with `receiver` bound as `this`.
    ///
    /// Closures get a rebound receiver; other callables observe it through
    /// the transient scope-receiver stack.
    pub(crate) fn call_with_receiver(&mut self, block: &Value, receiver: Value, args: Args) -> RunResult<Value> {
        if let Value::Func(Callable::Closure(closure)) = block {
            let closure = closure.with_this(receiver);
            return self.call_closure(&closure, args);
        }
        self.push_scope_receiver(receiver);
        let result = self.call_value(block, args);
        self.pop_scope_receiver();
        result
    }

    /// Binds a resolved callable to its receiver as a first-class value.
    pub(crate) fn bind_method(&mut self, receiver: Value, callable: Value) -> Value {
        Value::Bound(Arc::new(BoundMethod { receiver, callable }))
    }

    // --- rendering --------------------------------------------------------

    /// Full `toString`: objects and enum entries with a user `toString`
    /// override go through it, everything else renders structurally.
    pub fn display_value(&mut self, value: &Value) -> RunResult<String> {
        match value {
            Value::Object(obj) => {
                if obj.class.find_method("toString").is_some() {
                    let rendered = self.invoke_method(value, "toString", smallvec![])?;
                    if let Value::Str(s) = rendered {
                        return Ok(s.to_string());
                    }
                }
                Ok(value.render())
            }
            Value::EnumEntry(entry) => {
                if entry.overrides.contains_key("toString") {
                    let rendered = self.invoke_method(value, "toString", smallvec![])?;
                    if let Value::Str(s) = rendered {
                        return Ok(s.to_string());
                    }
                }
                Ok(value.render())
            }
            other => Ok(other.render()),
        }
    }

    // --- type checks ------------------------------------------------------

    /// Language-level `is` check by type name.
    pub(crate) fn type_check(&self, value: &Value, ty: &str) -> bool {
        if let Some(inner) = ty.strip_suffix('?') {
            return value.is_null() || self.type_check(value, inner);
        }
        match ty {
            "Any" => !value.is_null(),
            "Number" => matches!(value, Value::Int(_) | Value::Long(_) | Value::Double(_)),
            "Nothing" => false,
            _ => match value {
                Value::Object(obj) => obj.class.is_subtype_of(ty),
                Value::EnumEntry(entry) => &*entry.owner_name == ty || ty == "EnumEntry",
                Value::External(ext) => &*ext.class.name == ty || &*ext.class.simple_name == ty,
                Value::Class(class) => ty == "Class" || &*class.name == ty,
                other => &*other.type_name() == ty,
            },
        }
    }

    /// Language-level `as` cast: identity for matching types, numeric
    /// conversions across the number family, otherwise `Cast` (or null for
    /// the safe form).
    pub(crate) fn type_cast(&self, value: Value, ty: &str, safe: bool) -> RunResult<Value> {
        if self.type_check(&value, ty) {
            // Cross-tag numeric identity still needs a retag.
            return Ok(match (ty, &value) {
                ("Long", Value::Int(v)) => Value::Long(*v),
                ("Int", Value::Long(v)) => Value::Int(*v),
                _ => value,
            });
        }
        let converted = match (ty, &value) {
            ("Int", Value::Long(v)) => Some(Value::Int(*v)),
            ("Int", Value::Double(v)) => Some(Value::Int(*v as i64)),
            ("Long", Value::Int(v)) => Some(Value::Long(*v)),
            ("Long", Value::Double(v)) => Some(Value::Long(*v as i64)),
            ("Double", Value::Int(v) | Value::Long(v)) => Some(Value::Double(*v as f64)),
            _ => None,
        };
        match converted {
            Some(v) => Ok(v),
            None if safe => Ok(Value::Null),
            None => Err(RunError::exc(
                ExcKind::Cast,
                format!("cannot cast {} to {ty}", value.type_name()),
            )),
        }
    }

    // --- annotation processors -------------------------------------------

    /// Applies registered annotation processors to a freshly created class.
    pub(crate) fn run_annotation_processors(&mut self, class: &Arc<ClassValue>) -> RunResult<()> {
        for ann in &class.annotations {
            if let Some(handler) = self.runtime.annotation_processor(ann) {
                self.call_value(&handler, smallvec![Value::Class(class.clone())])?;
            }
        }
        Ok(())
    }

    // --- teardown ---------------------------------------------------------

    /// Clears globals and shared registries, breaking closure/class cycles.
    pub fn shutdown(&mut self) {
        if self.owns_runtime {
            self.globals.clear();
            self.runtime.clear_registries();
        }
    }
}

impl Drop for Interpreter {
    fn drop(&mut self) {
        self.shutdown();
    }
}
