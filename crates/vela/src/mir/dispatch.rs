//! Method dispatch: virtual, interface, special, and static call resolution,
//! scope functions, synthetic static owners, and the shared index paths.
//!
//! Both tiers funnel method calls through [`Interpreter::invoke_method`] /
//! the cached MIR entry points here, so dispatch semantics cannot drift
//! between them.

use std::sync::Arc;

use smallvec::smallvec;

use crate::{
    concurrent::{ScopeMode, ScopeValue},
    errors::{ExcKind, RunError, RunResult},
    interp::Interpreter,
    mir::{Frame, MODULE_OWNER, MirModule, StaticCache, VirtualCache},
    types::{
        Args, Callable, ClassKind, ClassValue, IterValue, MirClosure, ParamDef, PartialApp, ResultValue, ValueIter,
    },
    value::{Marker, Value},
};

/// Splits a reified-type manifest (`name#T1,T2`) off a method name,
/// substituting each actual through the caller's reified map.
fn split_manifest<'a>(method: &'a str, frame: Option<&Frame>) -> (&'a str, Option<Vec<Arc<str>>>) {
    match method.split_once('#') {
        Some((base, manifest)) => {
            let actuals = manifest
                .split(',')
                .map(|t| {
                    let t = t.trim();
                    Arc::from(frame.map_or(t, |f| f.substitute_type(t)))
                })
                .collect();
            (base, Some(actuals))
        }
        None => (method, None),
    }
}

/// Reorders a call's trailing named arguments into the target's parameter
/// order. The positional prefix stays put.
fn reorder_named(params: &[ParamDef], args: Args, named: &[Arc<str>]) -> Args {
    if named.is_empty() || named.len() > args.len() {
        return args;
    }
    let split = args.len() - named.len();
    let mut out: Args = args[..split].iter().cloned().collect();
    for param in params.iter().skip(split) {
        if let Some(pos) = named.iter().position(|n| *n == param.name) {
            out.push(args[split + pos].clone());
        }
    }
    if out.len() == args.len() { out } else { args }
}

fn reorder_named_by_names(param_names: &[Arc<str>], skip: usize, args: Args, named: &[Arc<str>]) -> Args {
    let params: Vec<ParamDef> = param_names
        .iter()
        .skip(skip)
        .map(|name| ParamDef {
            name: name.clone(),
            has_default: false,
        })
        .collect();
    reorder_named(&params, args, named)
}

impl Interpreter {
    /// General method invocation (HIR tier and internal callers).
    pub fn invoke_method(&mut self, recv: &Value, name: &str, args: Args) -> RunResult<Value> {
        self.dispatch_call(recv, name, args, None, None, None)
    }

    /// `INVOKE_VIRTUAL`/`INVOKE_INTERFACE` entry with the per-site cache and
    /// the caller frame for manifest substitution.
    pub(crate) fn invoke_virtual_cached(
        &mut self,
        recv: &Value,
        method: &str,
        args: Args,
        named: Option<&[Arc<str>]>,
        cache: Option<&VirtualCache>,
        frame: &Frame,
    ) -> RunResult<Value> {
        let (base, type_args) = split_manifest(method, Some(frame));
        self.dispatch_call(recv, base, args, named, cache, type_args)
    }

    /// The C8 dispatch ladder.
    fn dispatch_call(
        &mut self,
        recv: &Value,
        name: &str,
        args: Args,
        named: Option<&[Arc<str>]>,
        cache: Option<&VirtualCache>,
        type_args: Option<Vec<Arc<str>>>,
    ) -> RunResult<Value> {
        match recv {
            // 1. Engine objects: visibility-checked method table walk with the
            //    per-site inline cache in front.
            Value::Object(obj) => {
                if name == "getClass" && args.is_empty() {
                    return Ok(Value::Class(obj.class.clone()));
                }
                if name == "<init>" {
                    let class = obj.class.clone();
                    return self.invoke_constructor(&class, recv.clone(), args, named);
                }
                if let Some(cache) = cache
                    && let Some(method) = cache.lookup(obj.class.id)
                {
                    let class = obj.class.clone();
                    return self.call_resolved_method(&class, &method, recv.clone(), args, named, type_args);
                }
                let class = obj.class.clone();
                if let Some(def) = class.find_method(name) {
                    crate::types::check_visibility(def.visibility, &class, self.current_class(), name)?;
                    let callable = def.callable.clone();
                    if let Some(cache) = cache {
                        cache.store(class.id, callable.clone());
                    }
                    return self.call_resolved_method(&class, &callable, recv.clone(), args, named, type_args);
                }
                self.generic_fallback(recv, name, args)
            }

            // Enum entries: per-entry overrides shadow the enum's methods.
            Value::EnumEntry(entry) => {
                if let Some(def) = entry.overrides.get(name) {
                    let callable = def.callable.clone();
                    return self.call_callable_with_this(&callable, Some(recv.clone()), args);
                }
                if let Some(owner) = entry.owner.upgrade()
                    && let Some(def) = owner.find_method(name)
                {
                    let callable = def.callable.clone();
                    return self.call_resolved_method(&owner, &callable, recv.clone(), args, named, type_args);
                }
                self.generic_fallback(recv, name, args)
            }

            // 2. Foreign instances: policy-gated host dispatch, with the
            //    console special case for print-stream style receivers.
            Value::External(ext) => {
                let ext = ext.clone();
                if matches!(name, "println" | "print")
                    && !ext.class.methods.contains_key(name)
                    && !ext.overrides.contains_key(name)
                {
                    self.policy().check_stdio()?;
                    let text = match args.first() {
                        Some(v) => self.display_value(v)?,
                        None => String::new(),
                    };
                    let console = self.console().clone();
                    console.write_out(&text);
                    if name == "println" {
                        console.write_out("\n");
                    }
                    return Ok(Value::Unit);
                }
                self.invoke_foreign(&ext, name, args)
            }

            // 3. Class receivers: enum surface, singleton delegation, statics.
            Value::Class(class) => {
                let class = class.clone();
                self.class_dispatch(&class, name, args, named)
            }
            Value::ForeignClass(class) => {
                let class = class.clone();
                let member = self.foreign_static(&class, name)?;
                self.call_value(&member, args)
            }

            // 4. Iterator protocol.
            Value::Iter(iter) => match name {
                "hasNext" => {
                    let cancel = self.cancel_token().clone();
                    Ok(Value::Bool(iter.has_next(&cancel)?))
                }
                "next" => {
                    let cancel = self.cancel_token().clone();
                    iter.next(&cancel)
                }
                _ => self.generic_fallback(recv, name, args),
            },

            // 5. Result members.
            Value::Result(result) => self.result_dispatch(result, recv, name, args),

            // 6. Concurrency handles.
            Value::Scope(scope) => {
                let scope = scope.clone();
                self.scope_dispatch(&scope, recv, name, args)
            }
            Value::Deferred(f) | Value::Future(f) => match name {
                "await" => {
                    let f = f.clone();
                    let waiter = self.cancel_token().clone();
                    f.await_value(&waiter)
                }
                "cancel" => {
                    f.cancel();
                    Ok(Value::Unit)
                }
                "isCompleted" => Ok(Value::Bool(f.is_terminal())),
                _ => self.generic_fallback(recv, name, args),
            },
            Value::Job(f) => match name {
                "join" => {
                    let f = f.clone();
                    let waiter = self.cancel_token().clone();
                    f.join(&waiter)?;
                    Ok(Value::Unit)
                }
                "cancel" => {
                    f.cancel();
                    Ok(Value::Unit)
                }
                "isCompleted" => Ok(Value::Bool(f.is_terminal())),
                _ => self.generic_fallback(recv, name, args),
            },
            Value::Task(task) => match name {
                "cancel" => {
                    task.cancel();
                    Ok(Value::Unit)
                }
                "isCancelled" => Ok(Value::Bool(task.is_cancelled())),
                _ => self.generic_fallback(recv, name, args),
            },
            Value::Channel(ch) => {
                let ch = ch.clone();
                self.channel_dispatch(&ch, recv, name, args)
            }
            Value::Mutex(m) => match name {
                "withLock" => {
                    let m = m.clone();
                    let block = one_arg("withLock", args)?;
                    m.with_lock(|| self.call_value(&block, smallvec![]))
                }
                _ => self.generic_fallback(recv, name, args),
            },
            Value::Atomic(atomic) => {
                let atomic = atomic.clone();
                self.atomic_dispatch(&atomic, recv, name, args)
            }

            // Callable receivers: `invoke`/`call` applies the callable, which
            // is how lowered lambda calls arrive from the MIR tier.
            Value::Func(_) | Value::Bound(_) if matches!(name, "invoke" | "call") => self.call_value(recv, args),

            Value::Marker(Marker::Interop) => self.interop_dispatch(name, args),

            // 7/8. Everything else: scope functions, then the generic
            //      fallback chain.
            other => {
                if name == "iterator" && args.is_empty() {
                    return self.make_iterator(other).map(Value::Iter);
                }
                self.generic_fallback(other, name, args)
            }
        }
    }

    fn call_resolved_method(
        &mut self,
        class: &Arc<ClassValue>,
        callable: &Callable,
        this: Value,
        args: Args,
        named: Option<&[Arc<str>]>,
        type_args: Option<Vec<Arc<str>>>,
    ) -> RunResult<Value> {
        let args = match (named, callable) {
            (Some(named), Callable::Mir(mir)) => {
                reorder_named_by_names(&mir.func.params, usize::from(mir.func.has_this), args, named)
            }
            _ => args,
        };
        self.push_class(class.clone());
        let result = match (callable, type_args) {
            (Callable::Mir(mir), type_args) => {
                let mir = mir.clone();
                self.call_mir_with_reified(&mir, Some(this), args, type_args)
            }
            (callable, _) => self.call_callable_with_this(callable, Some(this), args),
        };
        self.pop_class();
        result
    }

    /// Constructor selection by arity, with named-argument reordering.
    pub(crate) fn invoke_constructor(
        &mut self,
        class: &Arc<ClassValue>,
        this: Value,
        args: Args,
        named: Option<&[Arc<str>]>,
    ) -> RunResult<Value> {
        let ctor = class
            .find_constructor(args.len())
            .ok_or_else(|| RunError::arity(&class.name, class.constructors.len(), args.len()))?;
        let args = match named {
            Some(named) => reorder_named(&ctor.params, args, named),
            None => args,
        };
        let callable = ctor.callable.clone();
        self.push_class(class.clone());
        let result = self.call_callable_with_this(&callable, Some(this), args);
        self.pop_class();
        result
    }

    /// `INVOKE_SPECIAL`: non-virtual dispatch on a known owner class
    /// (constructors and super calls).
    pub(crate) fn invoke_special(
        &mut self,
        owner: &str,
        recv: &Value,
        method: &str,
        args: Args,
        named: Option<&[Arc<str>]>,
    ) -> RunResult<Value> {
        let class = self
            .runtime()
            .class_by_name(owner)
            .ok_or_else(|| RunError::exc(ExcKind::ClassNotFound, format!("unknown class: {owner}")))?;
        if method == "<init>" {
            return self.invoke_constructor(&class, recv.clone(), args, named);
        }
        let def = class
            .find_method(method)
            .ok_or_else(|| RunError::unknown_member(&class.name, method))?;
        let callable = def.callable.clone();
        self.call_resolved_method(&class, &callable, recv.clone(), args, named, None)
    }

    /// `INVOKE_STATIC`: same-module fast path, synthetic owners, class and
    /// foreign statics.
    pub(crate) fn invoke_static(
        &mut self,
        module: &Arc<MirModule>,
        owner: &str,
        method: &str,
        args: Args,
        named: Option<&[Arc<str>]>,
        cache: &StaticCache,
        frame: &Frame,
    ) -> RunResult<Value> {
        if owner == MODULE_OWNER {
            let (base, type_args) = split_manifest(method, Some(frame));
            let callable = match cache.get() {
                Some(callable) => callable,
                None => {
                    let func = module
                        .function(base)
                        .ok_or_else(|| RunError::unknown_name(base))?;
                    let callable = Callable::Mir(Arc::new(MirClosure {
                        module: module.clone(),
                        func: func.clone(),
                    }));
                    cache.store(callable.clone());
                    callable
                }
            };
            let args = match (&callable, named) {
                (Callable::Mir(mir), Some(named)) => {
                    reorder_named_by_names(&mir.func.params, usize::from(mir.func.has_this), args, named)
                }
                _ => args,
            };
            if let Callable::Mir(mir) = &callable {
                let mir = mir.clone();
                return self.call_mir_with_reified(&mir, None, args, type_args);
            }
            return self.call_callable_with_this(&callable, None, args);
        }

        if let Some(rest) = owner.strip_prefix('$') {
            return self.synthetic_static(rest, method, args, frame);
        }

        // Static call on an engine class.
        if let Some(class) = self.runtime().class_by_name(owner) {
            return self.class_dispatch(&class, method, args, named);
        }
        // Static call on a foreign class.
        let policy = self.policy().clone();
        if let Some(foreign) = self.runtime().foreign().resolve(owner, &policy)? {
            let member = self.foreign_static(&foreign, method)?;
            return self.call_value(&member, args);
        }
        Err(RunError::exc(ExcKind::ClassNotFound, format!("unknown class: {owner}")))
    }

    /// Synthetic static owners (`$ScopeCall`, `$ENV|…`, …).
    fn synthetic_static(&mut self, owner: &str, method: &str, mut args: Args, _frame: &Frame) -> RunResult<Value> {
        if owner == "ScopeCall" {
            // operands: [receiver, callable, rest...]
            if args.len() < 2 {
                return Err(RunError::internal("$ScopeCall needs receiver and callable"));
            }
            let rest: Args = args.drain(2..).collect();
            let callable = args.pop().expect("checked above");
            let receiver = args.pop().expect("checked above");
            return self.call_with_receiver(&callable, receiver, rest);
        }
        if let Some(mask) = owner.strip_prefix("PartialApplication|") {
            let mask: u32 = mask
                .parse()
                .map_err(|_| RunError::internal("malformed partial-application mask"))?;
            if args.is_empty() {
                return Err(RunError::internal("$PartialApplication needs a callable"));
            }
            let bound: Vec<Value> = args.drain(1..).collect();
            let target = args.pop().expect("checked above");
            return Ok(Value::Func(Callable::Partial(Arc::new(PartialApp { target, mask, bound }))));
        }
        if let Some(op) = owner.strip_prefix("ENV|") {
            let op = op.trim_end_matches('|');
            return self.env_op(op, method, args);
        }
        match owner {
            "PipeCall" => self.pipe_call(method, args),
            "RANGE" => {
                if method != "create" {
                    return Err(RunError::internal(format!("unknown $RANGE operation: {method}")));
                }
                let (Some(start), Some(end)) = (
                    args.first().and_then(Value::as_int),
                    args.get(1).and_then(Value::as_int),
                ) else {
                    return Err(RunError::type_mismatch("range bounds must be Int"));
                };
                let inclusive = args.get(2).is_none_or(Value::is_truthy);
                Ok(Value::Range(crate::types::Range::new(start, end, inclusive)))
            }
            "BIND_METHOD" => {
                if method != "bind" || args.len() != 2 {
                    return Err(RunError::internal("$BIND_METHOD.bind takes (target, name)"));
                }
                let name = args.pop().expect("checked above");
                let target = args.pop().expect("checked above");
                let Value::Str(name) = name else {
                    return Err(RunError::type_mismatch("method name must be String"));
                };
                let callable = self.resolve_member(&target, &name, true)?;
                Ok(self.bind_method(target, callable))
            }
            other => Err(RunError::internal(format!("unknown synthetic owner: ${other}"))),
        }
    }

    /// `$ENV` operations address the global frame by name at runtime
    /// (REPL-style script contexts).
    fn env_op(&mut self, op: &str, name: &str, mut args: Args) -> RunResult<Value> {
        let globals = self.globals().clone();
        match op {
            "get" => globals.try_get(name).ok_or_else(|| RunError::unknown_name(name)),
            "defineVal" | "defineVar" => {
                let value = args.pop().unwrap_or(Value::Null);
                globals.define(name, value, op == "defineVar", self.repl_mode)?;
                Ok(Value::Unit)
            }
            "set" => {
                let value = args.pop().unwrap_or(Value::Null);
                if globals.try_assign(name, value)? {
                    Ok(Value::Unit)
                } else {
                    Err(RunError::unknown_name(name))
                }
            }
            other => Err(RunError::internal(format!("unknown $ENV operation: {other}"))),
        }
    }

    /// Pipeline lowering: resolve against module functions, then the
    /// environment, then fall back to the first argument as receiver.
    fn pipe_call(&mut self, method: &str, args: Args) -> RunResult<Value> {
        if let Some(module) = self.mir_module.clone()
            && let Some(func) = module.function(method).cloned()
        {
            let mir = Arc::new(MirClosure { module, func });
            return self.call_mir_function(&mir, None, args);
        }
        if let Some(callable) = self.globals().try_get(method) {
            return self.call_value(&callable, args);
        }
        let mut args = args;
        if args.is_empty() {
            return Err(RunError::unknown_name(method));
        }
        let rest: Args = args.drain(1..).collect();
        let receiver = args.pop().expect("non-empty");
        self.invoke_method(&receiver, method, rest)
    }

    /// Class-receiver dispatch: enum surface, singleton delegation, statics.
    fn class_dispatch(
        &mut self,
        class: &Arc<ClassValue>,
        name: &str,
        args: Args,
        named: Option<&[Arc<str>]>,
    ) -> RunResult<Value> {
        if class.kind == ClassKind::Enum {
            match name {
                "values" => {
                    let entries = class.enum_entries.read().iter().cloned().map(Value::EnumEntry).collect();
                    return Ok(Value::list_of(entries));
                }
                "valueOf" => {
                    let arg = args.first().cloned().unwrap_or(Value::Null);
                    let Value::Str(entry_name) = arg else {
                        return Err(RunError::type_mismatch("valueOf expects a String"));
                    };
                    return class.enum_entry(&entry_name).map(Value::EnumEntry).ok_or_else(|| {
                        RunError::exc(
                            ExcKind::UnknownMember,
                            format!("no enum entry {}.{entry_name}", class.name),
                        )
                    });
                }
                _ => {}
            }
        }
        if name == "<init>" {
            return self.instantiate_class(class, args);
        }
        // Static method declared on the class.
        if let Some(def) = class.methods.get(name).filter(|m| m.is_static) {
            let callable = def.callable.clone();
            self.push_class(class.clone());
            let result = self.call_callable_with_this(&callable, None, args);
            self.pop_class();
            return result;
        }
        // Callable static field.
        if let Some(member) = class.statics.read().get(name).cloned() {
            return self.call_value(&member, args);
        }
        // Singleton objects delegate through their INSTANCE field.
        if class.kind == ClassKind::Singleton {
            let instance = self.singleton_instance(class)?;
            return self.dispatch_call(&instance, name, args, named, None, None);
        }
        let recv = Value::Class(class.clone());
        self.generic_fallback(&recv, name, args)
    }

    /// Lazily creates and caches the `INSTANCE` of a singleton object.
    pub(crate) fn singleton_instance(&mut self, class: &Arc<ClassValue>) -> RunResult<Value> {
        if let Some(instance) = class.statics.read().get("INSTANCE") {
            return Ok(instance.clone());
        }
        let instance = self.instantiate_class(class, smallvec![])?;
        class.statics.write().insert(Arc::from("INSTANCE"), instance.clone());
        Ok(instance)
    }

    fn result_dispatch(&mut self, result: &Arc<ResultValue>, recv: &Value, name: &str, args: Args) -> RunResult<Value> {
        match name {
            "isOk" => Ok(Value::Bool(result.is_ok())),
            "isErr" => Ok(Value::Bool(result.is_err())),
            "value" => Ok(result.value()),
            "error" => Ok(result.error()),
            "unwrap" => match &**result {
                ResultValue::Ok(v) => Ok(v.clone()),
                ResultValue::Err(e) => Err(self.raise_thrown(e.clone())),
            },
            "unwrapOr" => match &**result {
                ResultValue::Ok(v) => Ok(v.clone()),
                ResultValue::Err(_) => Ok(args.into_iter().next().unwrap_or(Value::Null)),
            },
            "map" => match &**result {
                ResultValue::Ok(v) => {
                    let f = one_arg("map", args)?;
                    let mapped = self.call_value(&f, smallvec![v.clone()])?;
                    Ok(Value::result_ok(mapped))
                }
                ResultValue::Err(_) => Ok(recv.clone()),
            },
            "mapErr" => match &**result {
                ResultValue::Err(e) => {
                    let f = one_arg("mapErr", args)?;
                    let mapped = self.call_value(&f, smallvec![e.clone()])?;
                    Ok(Value::result_err(mapped))
                }
                ResultValue::Ok(_) => Ok(recv.clone()),
            },
            _ => self.generic_fallback(recv, name, args),
        }
    }

    fn scope_dispatch(&mut self, scope: &Arc<ScopeValue>, recv: &Value, name: &str, args: Args) -> RunResult<Value> {
        match name {
            "async" => {
                let block = one_arg("async", args)?;
                let future = self.spawn_task(block, Some(scope.clone()), scope.executor().clone(), "async")?;
                Ok(Value::Deferred(future))
            }
            "launch" => {
                let block = one_arg("launch", args)?;
                let future = self.spawn_task(block, Some(scope.clone()), scope.executor().clone(), "launch")?;
                Ok(Value::Job(future))
            }
            "cancel" => {
                scope.cancel_all();
                Ok(Value::Unit)
            }
            "isSupervisor" => Ok(Value::Bool(scope.mode() == ScopeMode::Supervisor)),
            _ => self.generic_fallback(recv, name, args),
        }
    }

    fn channel_dispatch(
        &mut self,
        ch: &Arc<crate::concurrent::ChannelValue>,
        recv: &Value,
        name: &str,
        mut args: Args,
    ) -> RunResult<Value> {
        let cancel = self.cancel_token().clone();
        match name {
            "send" => {
                let value = args.pop().unwrap_or(Value::Null);
                ch.send(value, &cancel)?;
                Ok(Value::Unit)
            }
            "receive" => ch.receive(&cancel),
            "receiveTimeout" => {
                let ms = args
                    .first()
                    .and_then(Value::as_int)
                    .ok_or_else(|| RunError::type_mismatch("receiveTimeout expects milliseconds"))?;
                ch.receive_timeout(ms.max(0) as u64, &cancel)
            }
            "tryReceive" => Ok(ch.try_receive().unwrap_or(Value::Null)),
            "close" => {
                ch.close();
                Ok(Value::Unit)
            }
            "iterator" => Ok(Value::Iter(IterValue::new(ValueIter::Channel {
                ch: ch.clone(),
                done: false,
            }))),
            "isClosed" => Ok(Value::Bool(ch.is_closed())),
            _ => self.generic_fallback(recv, name, args),
        }
    }

    fn atomic_dispatch(
        &mut self,
        atomic: &Arc<crate::concurrent::AtomicValue>,
        recv: &Value,
        name: &str,
        args: Args,
    ) -> RunResult<Value> {
        let int_result = |v: Option<Value>| {
            v.ok_or_else(|| RunError::type_mismatch("arithmetic on a reference atomic"))
        };
        match name {
            "get" => Ok(atomic.get()),
            "set" => {
                let value = args.first().cloned().unwrap_or(Value::Null);
                if atomic.set(&value) {
                    Ok(Value::Unit)
                } else {
                    Err(RunError::type_mismatch("atomic set with a non-integer value"))
                }
            }
            "incrementAndGet" => int_result(atomic.increment_and_get()),
            "decrementAndGet" => int_result(atomic.decrement_and_get()),
            "addAndGet" => {
                let delta = args
                    .first()
                    .and_then(Value::as_int)
                    .ok_or_else(|| RunError::type_mismatch("addAndGet expects an Int"))?;
                int_result(atomic.add_and_get(delta))
            }
            "compareAndSet" => {
                let expect = args.first().cloned().unwrap_or(Value::Null);
                let new = args.get(1).cloned().unwrap_or(Value::Null);
                Ok(Value::Bool(atomic.compare_and_set(&expect, &new)))
            }
            _ => self.generic_fallback(recv, name, args),
        }
    }

    /// The foreign-interop namespace: `type`, `static`, `field`, `new`,
    /// `isInstance`, `class`.
    fn interop_dispatch(&mut self, name: &str, mut args: Args) -> RunResult<Value> {
        let policy = self.policy().clone();
        match name {
            "type" => {
                let class_name = str_arg("type", args.first())?;
                self.runtime()
                    .foreign()
                    .resolve(&class_name, &policy)?
                    .map(Value::ForeignClass)
                    .ok_or_else(|| RunError::exc(ExcKind::ClassNotFound, format!("unknown class: {class_name}")))
            }
            "static" => {
                let class_name = str_arg("static", args.first())?;
                let member = str_arg("static", args.get(1))?;
                let class = self
                    .runtime()
                    .foreign()
                    .resolve(&class_name, &policy)?
                    .ok_or_else(|| RunError::exc(ExcKind::ClassNotFound, format!("unknown class: {class_name}")))?;
                self.foreign_static(&class, &member)
            }
            "field" => {
                let member = str_arg("field", args.get(1))?;
                let target = args.first().cloned().unwrap_or(Value::Null);
                self.resolve_member(&target, &member, false)
            }
            "new" => {
                if args.is_empty() {
                    return Err(RunError::arity("new", 1, 0));
                }
                let rest: Args = args.drain(1..).collect();
                let class_name = str_arg("new", args.first())?;
                let class = self
                    .runtime()
                    .foreign()
                    .resolve(&class_name, &policy)?
                    .ok_or_else(|| RunError::exc(ExcKind::ClassNotFound, format!("unknown class: {class_name}")))?;
                self.instantiate_foreign(&class, rest)
            }
            "isInstance" => {
                let class_name = str_arg("isInstance", args.get(1))?;
                let target = args.first().cloned().unwrap_or(Value::Null);
                Ok(Value::Bool(self.type_check(&target, &class_name)))
            }
            "class" => {
                let target = args.first().cloned().unwrap_or(Value::Null);
                match &target {
                    Value::External(ext) => Ok(Value::ForeignClass(ext.class.clone())),
                    Value::Object(obj) => Ok(Value::Class(obj.class.clone())),
                    other => Ok(Value::str(other.type_name().into_owned())),
                }
            }
            other => Err(RunError::unknown_member("Interop", other)),
        }
    }

    /// Layers 7-8 of the dispatch ladder: scope functions, extension
    /// functions, stdlib extensions, member-resolver members, bean getters.
    fn generic_fallback(&mut self, recv: &Value, name: &str, args: Args) -> RunResult<Value> {
        // Scope functions apply to any receiver when the shape matches.
        if args.len() == 1
            && args[0].is_callable()
            && matches!(name, "let" | "also" | "run" | "apply" | "takeIf" | "takeUnless")
        {
            let f = args.into_iter().next().expect("arity checked");
            return self.scope_function(name, recv, &f);
        }

        // User extension function.
        if let Some(ext) = self.find_extension_fn(recv, name) {
            return self.call_with_receiver(&ext, recv.clone(), args);
        }
        // Stdlib extension table.
        if let Some(member) = self.runtime().stdlib_member(recv.type_tag(), name) {
            return (member.f.f)(self, Some(recv.clone()), args);
        }
        // Member resolver: callables come back bound and are invoked here; a
        // plain value (field, component, property) answers a zero-arg call
        // directly.
        match self.resolve_member(recv, name, true) {
            Ok(member) if member.is_callable() || matches!(member, Value::Bound(_)) => {
                self.call_value(&member, args)
            }
            Ok(member) if args.is_empty() => Ok(member),
            Ok(_) => Err(RunError::type_mismatch(format!("'{name}' is not callable"))),
            Err(err) => Err(err),
        }
    }

    /// The scope-function family: receiver-threading helpers usable on any
    /// value.
    fn scope_function(&mut self, name: &str, recv: &Value, f: &Value) -> RunResult<Value> {
        match name {
            "let" => self.call_value(f, smallvec![recv.clone()]),
            "also" => {
                self.call_value(f, smallvec![recv.clone()])?;
                Ok(recv.clone())
            }
            "run" => self.call_with_receiver(f, recv.clone(), smallvec![]),
            "apply" => {
                self.call_with_receiver(f, recv.clone(), smallvec![])?;
                Ok(recv.clone())
            }
            "takeIf" => {
                let keep = self.call_value(f, smallvec![recv.clone()])?;
                Ok(if keep.is_truthy() { recv.clone() } else { Value::Null })
            }
            "takeUnless" => {
                let drop = self.call_value(f, smallvec![recv.clone()])?;
                Ok(if drop.is_truthy() { Value::Null } else { recv.clone() })
            }
            _ => unreachable!("caller matched the scope-function names"),
        }
    }

    /// Extension-function lookup across the receiver's type-name chain.
    pub(crate) fn find_extension_fn(&self, recv: &Value, name: &str) -> Option<Value> {
        for type_name in type_name_chain(recv) {
            if let Some(ext) = self.runtime().extension_fn(&type_name, name) {
                return Some(ext);
            }
        }
        None
    }

    pub(crate) fn find_extension_prop(&self, recv: &Value, name: &str) -> Option<Value> {
        for type_name in type_name_chain(recv) {
            if let Some(ext) = self.runtime().extension_prop(&type_name, name) {
                return Some(ext);
            }
        }
        None
    }

    // --- index paths ------------------------------------------------------

    /// `recv[index]` over lists, maps, arrays, strings, and `get` overloads.
    pub(crate) fn index_get(&mut self, recv: &Value, index: &Value) -> RunResult<Value> {
        match recv {
            Value::List(list) => {
                let guard = list.read();
                let i = index.as_index()?;
                usize::try_from(i)
                    .ok()
                    .and_then(|i| guard.get(i).cloned())
                    .ok_or_else(|| RunError::index_out_of_bounds(i, guard.len()))
            }
            Value::Map(map) => Ok(map.read().get(index).cloned().unwrap_or(Value::Null)),
            Value::Array(arr) => arr.get(index.as_index()?),
            Value::Str(s) => {
                let i = index.as_index()?;
                usize::try_from(i)
                    .ok()
                    .and_then(|i| s.chars().nth(i))
                    .map(Value::Char)
                    .ok_or_else(|| RunError::index_out_of_bounds(i, s.chars().count()))
            }
            Value::Object(_) => {
                let index = index.clone();
                self.invoke_method(recv, "get", smallvec![index])
            }
            other => Err(RunError::type_mismatch(format!(
                "{} does not support indexing",
                other.type_name()
            ))),
        }
    }

    /// `recv[index] = value` over lists, maps, arrays, and `set` overloads.
    pub(crate) fn index_set(&mut self, recv: &Value, index: &Value, value: Value) -> RunResult<()> {
        match recv {
            Value::List(list) => {
                let mut guard = list.write();
                let i = index.as_index()?;
                let len = guard.len();
                match usize::try_from(i).ok().filter(|&i| i < len) {
                    Some(i) => {
                        guard[i] = value;
                        Ok(())
                    }
                    None => Err(RunError::index_out_of_bounds(i, len)),
                }
            }
            Value::Map(map) => {
                map.write().insert(index.clone(), value);
                Ok(())
            }
            Value::Array(arr) => arr.set(index.as_index()?, value),
            Value::Object(_) => {
                let index = index.clone();
                self.invoke_method(recv, "set", smallvec![index, value])?;
                Ok(())
            }
            other => Err(RunError::type_mismatch(format!(
                "{} does not support index assignment",
                other.type_name()
            ))),
        }
    }

    // --- field access shared with the MIR tier ----------------------------

    /// `GET_FIELD`: direct field slot on objects, resolver for the rest.
    pub(crate) fn get_field_value(&mut self, target: &Value, name: &str) -> RunResult<Value> {
        if let Value::Object(obj) = target
            && let Some((slot, def)) = obj.class.field_slot(name)
        {
            let class = obj.class.clone();
            crate::types::check_visibility(def.visibility, &class, self.current_class(), name)?;
            return Ok(obj.get_field(slot));
        }
        self.resolve_member(target, name, false)
    }

    /// Member assignment: object fields (with mutability/visibility checks),
    /// external fields, map entries.
    pub(crate) fn set_member(&mut self, target: &Value, name: &str, value: Value) -> RunResult<()> {
        match target {
            Value::Object(obj) => {
                let Some((slot, def)) = obj.class.field_slot(name) else {
                    return Err(RunError::unknown_member(&obj.class.name, name));
                };
                let class = obj.class.clone();
                crate::types::check_visibility(def.visibility, &class, self.current_class(), name)?;
                // `val` fields are writable only while their own constructor
                // chain runs (the class context is the owner).
                if !def.mutable && self.current_class().is_none_or(|c| c.id != class.id) {
                    return Err(RunError::exc(
                        ExcKind::ImmutableAssign,
                        format!("'{name}' is immutable and cannot be reassigned"),
                    ));
                }
                obj.set_field(slot, value);
                Ok(())
            }
            Value::External(ext) => {
                let accessor = ext
                    .class
                    .fields
                    .get(name)
                    .and_then(|f| f.set.clone())
                    .ok_or_else(|| RunError::unknown_member(&ext.class.name, name))?;
                if accessor(ext, value) {
                    Ok(())
                } else {
                    Err(RunError::exc(
                        ExcKind::MemberNotAccessible,
                        format!("cannot assign '{name}' on {}", ext.class.name),
                    ))
                }
            }
            Value::EnumEntry(entry) => {
                entry.fields.write().insert(Arc::from(name), value);
                Ok(())
            }
            other => Err(RunError::type_mismatch(format!(
                "cannot assign member '{name}' on {}",
                other.type_name()
            ))),
        }
    }

    /// `GET_STATIC`: enum entries, singleton `INSTANCE`, static fields, and
    /// foreign statics.
    pub(crate) fn get_static(&mut self, owner: &str, name: &str) -> RunResult<Value> {
        if let Some(class) = self.runtime().class_by_name(owner) {
            if class.kind == ClassKind::Enum
                && let Some(entry) = class.enum_entry(name)
            {
                return Ok(Value::EnumEntry(entry));
            }
            if name == "INSTANCE" && class.kind == ClassKind::Singleton {
                return self.singleton_instance(&class);
            }
            if let Some(value) = class.statics.read().get(name) {
                return Ok(value.clone());
            }
            return Err(RunError::unknown_member(&class.name, name));
        }
        let policy = self.policy().clone();
        if let Some(foreign) = self.runtime().foreign().resolve(owner, &policy)? {
            return self.foreign_static(&foreign, name);
        }
        Err(RunError::exc(ExcKind::ClassNotFound, format!("unknown class: {owner}")))
    }
}

fn one_arg(name: &str, mut args: Args) -> RunResult<Value> {
    if args.len() != 1 {
        return Err(RunError::arity(name, 1, args.len()));
    }
    Ok(args.pop().expect("arity checked"))
}

fn str_arg(name: &str, arg: Option<&Value>) -> RunResult<Arc<str>> {
    match arg {
        Some(Value::Str(s)) => Ok(s.clone()),
        other => Err(RunError::type_mismatch(format!(
            "{name} expects a String, got {}",
            other.map_or("nothing".into(), |v| v.type_name())
        ))),
    }
}

/// Type-name chain used by extension lookup: class hierarchy first, then the
/// plain tag name, then `Any`.
fn type_name_chain(value: &Value) -> Vec<Arc<str>> {
    let mut chain: Vec<Arc<str>> = Vec::with_capacity(4);
    if let Value::Object(obj) = value {
        let mut class = Some(obj.class.clone());
        while let Some(c) = class {
            chain.push(c.name.clone());
            for iface in &c.interfaces {
                chain.push(iface.name.clone());
            }
            class = c.superclass.clone();
        }
    } else if let Value::External(ext) = value {
        chain.push(ext.class.name.clone());
        chain.push(ext.class.simple_name.clone());
    }
    chain.push(Arc::from(&*value.type_name()));
    chain.push(Arc::from("Any"));
    chain
}
