//! The standard builtin function set and the stdlib extension table.
//!
//! Builtins are a fieldless enum dispatched through one `call_builtin`
//! funnel; `register_builtins` binds every builtin into the global frame and
//! installs the stdlib extension members (string/list/map/range helpers)
//! keyed by type tag.

use std::{
    sync::Arc,
    time::Instant,
};

use smallvec::smallvec;
use strum::{EnumIter, EnumString, IntoEnumIterator, IntoStaticStr};

use crate::{
    concurrent::{AtomicValue, CancelToken, ChannelValue, MutexValue, ScopeMode},
    errors::{ExcKind, RunError, RunResult},
    interp::Interpreter,
    types::{Args, ArrayValue, Callable, ElemType, NativeFn, Range},
    value::{Marker, TypeTag, Value},
};

/// Engine builtin functions. The strum serialization is the name bound in
/// the global frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, EnumString, IntoStaticStr)]
pub enum Builtin {
    #[strum(serialize = "println")]
    Println,
    #[strum(serialize = "print")]
    Print,
    #[strum(serialize = "readLine")]
    ReadLine,
    #[strum(serialize = "input")]
    Input,
    #[strum(serialize = "toInt")]
    ToInt,
    #[strum(serialize = "toLong")]
    ToLong,
    #[strum(serialize = "toDouble")]
    ToDouble,
    #[strum(serialize = "toFloat")]
    ToFloat,
    #[strum(serialize = "toString")]
    ToString,
    #[strum(serialize = "toBoolean")]
    ToBoolean,
    #[strum(serialize = "toChar")]
    ToChar,
    #[strum(serialize = "typeof")]
    TypeOf,
    #[strum(serialize = "isCallable")]
    IsCallable,
    #[strum(serialize = "Array")]
    MakeArray,
    #[strum(serialize = "arrayOf")]
    ArrayOf,
    #[strum(serialize = "Pair")]
    MakePair,
    #[strum(serialize = "pairOf")]
    PairOf,
    #[strum(serialize = "range")]
    MakeRange,
    #[strum(serialize = "rangeClosed")]
    RangeClosed,
    #[strum(serialize = "error")]
    RaiseError,
    #[strum(serialize = "List")]
    MakeList,
    #[strum(serialize = "with")]
    With,
    #[strum(serialize = "repeat")]
    Repeat,
    #[strum(serialize = "measureTimeMillis")]
    MeasureTimeMillis,
    #[strum(serialize = "measureNanoTime")]
    MeasureNanoTime,
    #[strum(serialize = "runCatching")]
    RunCatching,
    #[strum(serialize = "coroutineScope")]
    CoroutineScope,
    #[strum(serialize = "supervisorScope")]
    SupervisorScope,
    #[strum(serialize = "schedule")]
    Schedule,
    #[strum(serialize = "scheduleRepeat")]
    ScheduleRepeat,
    #[strum(serialize = "scope")]
    Scope,
    #[strum(serialize = "sync")]
    Sync,
    #[strum(serialize = "launch")]
    Launch,
    #[strum(serialize = "parallel")]
    Parallel,
    #[strum(serialize = "withTimeout")]
    WithTimeout,
    #[strum(serialize = "AtomicInt")]
    MakeAtomicInt,
    #[strum(serialize = "AtomicLong")]
    MakeAtomicLong,
    #[strum(serialize = "AtomicRef")]
    MakeAtomicRef,
    #[strum(serialize = "Channel")]
    MakeChannel,
    #[strum(serialize = "Mutex")]
    MakeMutex,
    #[strum(serialize = "awaitAll")]
    AwaitAll,
    #[strum(serialize = "awaitFirst")]
    AwaitFirst,
    #[strum(serialize = "withContext")]
    WithContext,
    #[strum(serialize = "classOf")]
    ClassOf,
    #[strum(serialize = "registerAnnotationProcessor")]
    RegisterAnnotationProcessor,
}

impl Builtin {
    pub fn as_str(self) -> &'static str {
        self.into()
    }
}

/// Binds the builtin set, the `Dispatchers` and interop namespaces, and the
/// stdlib extension members.
pub fn register_builtins(interp: &mut Interpreter) {
    let globals = interp.get_globals().clone();
    for builtin in Builtin::iter() {
        globals.redefine(builtin.as_str(), Value::Func(Callable::Builtin(builtin)), false);
    }
    globals.redefine("Dispatchers", Value::Marker(Marker::Dispatchers), false);
    globals.redefine("Interop", Value::Marker(Marker::Interop), false);
    register_stdlib_members(interp);
}

/// Central builtin dispatcher.
pub(crate) fn call_builtin(
    interp: &mut Interpreter,
    builtin: Builtin,
    _this: Option<Value>,
    mut args: Args,
) -> RunResult<Value> {
    match builtin {
        Builtin::Println | Builtin::Print => {
            interp.policy().check_stdio()?;
            let mut text = String::new();
            for (i, arg) in args.iter().enumerate() {
                if i > 0 {
                    text.push(' ');
                }
                text.push_str(&interp.display_value(arg)?);
            }
            if builtin == Builtin::Println {
                text.push('\n');
            }
            interp.console().write_out(&text);
            Ok(Value::Unit)
        }
        Builtin::ReadLine => {
            interp.policy().check_stdio()?;
            Ok(interp.console().read_line().map_or(Value::Null, Value::str))
        }
        Builtin::Input => {
            interp.policy().check_stdio()?;
            if let Some(prompt) = args.first() {
                let prompt = interp.display_value(prompt)?;
                interp.console().write_out(&prompt);
            }
            Ok(interp.console().read_line().map_or(Value::Null, Value::str))
        }

        Builtin::ToInt => convert_int(arg1("toInt", args)?).map(Value::Int),
        Builtin::ToLong => convert_int(arg1("toLong", args)?).map(Value::Long),
        Builtin::ToDouble | Builtin::ToFloat => {
            let v = arg1("toDouble", args)?;
            convert_double(v).map(Value::Double)
        }
        Builtin::ToString => {
            let v = arg1("toString", args)?;
            let s = interp.display_value(&v)?;
            Ok(Value::str(s))
        }
        Builtin::ToBoolean => {
            let v = arg1("toBoolean", args)?;
            Ok(Value::Bool(match &v {
                Value::Str(s) => s.trim() == "true",
                other => other.is_truthy(),
            }))
        }
        Builtin::ToChar => {
            let v = arg1("toChar", args)?;
            match &v {
                Value::Char(c) => Ok(Value::Char(*c)),
                Value::Int(i) | Value::Long(i) => u32::try_from(*i)
                    .ok()
                    .and_then(char::from_u32)
                    .map(Value::Char)
                    .ok_or_else(|| RunError::type_mismatch(format!("{i} is not a valid character code"))),
                Value::Str(s) if s.chars().count() == 1 => Ok(Value::Char(s.chars().next().expect("length checked"))),
                other => Err(RunError::type_mismatch(format!(
                    "cannot convert {} to Char",
                    other.type_name()
                ))),
            }
        }
        Builtin::TypeOf => {
            let v = arg1("typeof", args)?;
            Ok(Value::str(v.type_name().into_owned()))
        }
        Builtin::IsCallable => {
            let v = arg1("isCallable", args)?;
            Ok(Value::Bool(v.is_callable()))
        }

        Builtin::MakeArray => {
            // Array(n) or Array(n, init)
            let len = args
                .first()
                .and_then(Value::as_int)
                .ok_or_else(|| RunError::type_mismatch("Array expects a length"))?;
            let len = usize::try_from(len).map_err(|_| RunError::type_mismatch("array length must be non-negative"))?;
            let arr = ArrayValue::new(ElemType::Object, len);
            if let Some(init) = args.get(1).cloned() {
                for i in 0..len {
                    let v = interp.call_value(&init, smallvec![Value::Int(i as i64)])?;
                    arr.set(i as i64, v)?;
                }
            }
            Ok(Value::Array(Arc::new(arr)))
        }
        Builtin::ArrayOf => Ok(Value::Array(Arc::new(ArrayValue::of_values(args.into_vec())))),
        Builtin::MakePair | Builtin::PairOf => {
            if args.len() != 2 {
                return Err(RunError::arity("Pair", 2, args.len()));
            }
            let second = args.pop().expect("arity checked");
            let first = args.pop().expect("arity checked");
            Ok(Value::pair(first, second))
        }
        Builtin::MakeRange | Builtin::RangeClosed => {
            let (Some(start), Some(end)) = (
                args.first().and_then(Value::as_int),
                args.get(1).and_then(Value::as_int),
            ) else {
                return Err(RunError::type_mismatch("range bounds must be Int"));
            };
            Ok(Value::Range(Range::new(start, end, builtin == Builtin::RangeClosed)))
        }
        Builtin::RaiseError => {
            let v = args.into_iter().next().unwrap_or(Value::Null);
            Err(interp.raise_thrown(v))
        }
        Builtin::MakeList => {
            match (args.first().and_then(Value::as_int), args.get(1).cloned()) {
                (Some(len), init) => {
                    let len =
                        usize::try_from(len).map_err(|_| RunError::type_mismatch("list size must be non-negative"))?;
                    let mut items = Vec::with_capacity(len);
                    for i in 0..len {
                        match &init {
                            Some(f) => items.push(interp.call_value(f, smallvec![Value::Int(i as i64)])?),
                            None => items.push(Value::Null),
                        }
                    }
                    Ok(Value::list_of(items))
                }
                (None, _) => Ok(Value::list_of(Vec::new())),
            }
        }

        Builtin::With => {
            if args.len() != 2 {
                return Err(RunError::arity("with", 2, args.len()));
            }
            let block = args.pop().expect("arity checked");
            let receiver = args.pop().expect("arity checked");
            interp.call_with_receiver(&block, receiver, smallvec![])
        }
        Builtin::Repeat => {
            let times = args
                .first()
                .and_then(Value::as_int)
                .ok_or_else(|| RunError::type_mismatch("repeat expects a count"))?;
            let block = args
                .get(1)
                .cloned()
                .ok_or_else(|| RunError::arity("repeat", 2, args.len()))?;
            for i in 0..times.max(0) {
                interp.call_value(&block, smallvec![Value::Int(i)])?;
                interp.check_back_edge()?;
            }
            Ok(Value::Unit)
        }
        Builtin::MeasureTimeMillis => {
            let block = arg1("measureTimeMillis", args)?;
            let start = Instant::now();
            interp.call_value(&block, smallvec![])?;
            Ok(Value::Long(start.elapsed().as_millis() as i64))
        }
        Builtin::MeasureNanoTime => {
            let block = arg1("measureNanoTime", args)?;
            let start = Instant::now();
            interp.call_value(&block, smallvec![])?;
            Ok(Value::Long(start.elapsed().as_nanos() as i64))
        }
        Builtin::RunCatching => {
            let block = arg1("runCatching", args)?;
            match interp.call_value(&block, smallvec![]) {
                Ok(v) => Ok(Value::result_ok(v)),
                // Catchable failures reify; sandbox violations still abort.
                Err(RunError::Exc(mut raise)) => {
                    let err_value = match raise.exc.take_payload() {
                        Some(payload) => payload,
                        None => interp
                            .runtime()
                            .make_exception_value(raise.exc.kind(), raise.exc.message().unwrap_or_default()),
                    };
                    Ok(Value::result_err(err_value))
                }
                Err(other) => Err(other),
            }
        }

        Builtin::CoroutineScope => {
            let block = arg1("coroutineScope", args)?;
            interp.run_scope(ScopeMode::Strict, &block)
        }
        Builtin::SupervisorScope => {
            let block = arg1("supervisorScope", args)?;
            interp.run_scope(ScopeMode::Supervisor, &block)
        }
        Builtin::Schedule => {
            let delay = args
                .first()
                .and_then(Value::as_int)
                .ok_or_else(|| RunError::type_mismatch("schedule expects a delay in milliseconds"))?;
            let task = args
                .get(1)
                .cloned()
                .ok_or_else(|| RunError::arity("schedule", 2, args.len()))?;
            let mut child = interp.fork_child(CancelToken::new());
            let scheduler = interp.runtime().scheduler().clone();
            let handle = scheduler.schedule_later(
                delay.max(0) as u64,
                Box::new(move || {
                    let _ = child.call_value(&task, smallvec![]);
                }),
            );
            Ok(Value::Task(handle))
        }
        Builtin::ScheduleRepeat => {
            let delay = args
                .first()
                .and_then(Value::as_int)
                .ok_or_else(|| RunError::type_mismatch("scheduleRepeat expects a delay in milliseconds"))?;
            let period = args
                .get(1)
                .and_then(Value::as_int)
                .ok_or_else(|| RunError::type_mismatch("scheduleRepeat expects a period in milliseconds"))?;
            let task = args
                .get(2)
                .cloned()
                .ok_or_else(|| RunError::arity("scheduleRepeat", 3, args.len()))?;
            // One child interpreter serves every tick; ticks serialize on it.
            let child = Arc::new(parking_lot::Mutex::new(interp.fork_child(CancelToken::new())));
            let scheduler = interp.runtime().scheduler().clone();
            let handle = scheduler.schedule_repeat(delay.max(0) as u64, period.max(0) as u64, move || {
                let child = child.clone();
                let task = task.clone();
                Box::new(move || {
                    let _ = child.lock().call_value(&task, smallvec![]);
                })
            });
            Ok(Value::Task(handle))
        }
        Builtin::Scope => {
            let block = arg1("scope", args)?;
            let executor = interp.runtime().scheduler().background().clone();
            let future = interp.spawn_task(block, None, executor, "scope")?;
            Ok(Value::Future(future))
        }
        Builtin::Sync => {
            let block = arg1("sync", args)?;
            interp.sync_call(&block)
        }
        Builtin::Launch => {
            let block = arg1("launch", args)?;
            // Inside a scope block, `launch` attaches the child to that
            // scope; otherwise the job runs unsupervised.
            let scope = interp.current_scope();
            let executor = scope
                .as_ref()
                .map_or_else(|| interp.runtime().scheduler().background().clone(), |s| s.executor().clone());
            let future = interp.spawn_task(block, scope, executor, "launch")?;
            Ok(Value::Job(future))
        }
        Builtin::Parallel => {
            let executor = interp.runtime().scheduler().background().clone();
            let mut futures = Vec::with_capacity(args.len());
            for block in args {
                futures.push(interp.spawn_task(block, None, executor.clone(), "parallel")?);
            }
            let waiter = interp.cancel_token().clone();
            let mut results = Vec::with_capacity(futures.len());
            for future in futures {
                results.push(future.await_value(&waiter)?);
            }
            Ok(Value::list_of(results))
        }
        Builtin::WithTimeout => {
            let ms = args
                .first()
                .and_then(Value::as_int)
                .ok_or_else(|| RunError::type_mismatch("withTimeout expects milliseconds"))?;
            let block = args
                .get(1)
                .cloned()
                .ok_or_else(|| RunError::arity("withTimeout", 2, args.len()))?;
            interp.with_timeout(ms.max(0) as u64, &block)
        }

        Builtin::MakeAtomicInt => {
            let initial = args.first().and_then(Value::as_int).unwrap_or(0);
            Ok(Value::Atomic(Arc::new(AtomicValue::new_int(initial))))
        }
        Builtin::MakeAtomicLong => {
            let initial = args.first().and_then(Value::as_int).unwrap_or(0);
            Ok(Value::Atomic(Arc::new(AtomicValue::new_long(initial))))
        }
        Builtin::MakeAtomicRef => {
            let initial = args.into_iter().next().unwrap_or(Value::Null);
            Ok(Value::Atomic(Arc::new(AtomicValue::new_ref(initial))))
        }
        Builtin::MakeChannel => {
            let capacity = match args.first() {
                Some(v) => {
                    let c = v
                        .as_int()
                        .ok_or_else(|| RunError::type_mismatch("Channel capacity must be Int"))?;
                    Some(
                        usize::try_from(c)
                            .map_err(|_| RunError::type_mismatch("Channel capacity must be non-negative"))?,
                    )
                }
                None => None,
            };
            Ok(Value::Channel(Arc::new(ChannelValue::new(capacity))))
        }
        Builtin::MakeMutex => Ok(Value::Mutex(Arc::new(MutexValue::new()))),

        Builtin::AwaitAll => {
            let list = arg1("awaitAll", args)?;
            let handles = handle_list("awaitAll", &list)?;
            let waiter = interp.cancel_token().clone();
            let mut results = Vec::with_capacity(handles.len());
            for handle in handles {
                results.push(handle.await_value(&waiter)?);
            }
            Ok(Value::list_of(results))
        }
        Builtin::AwaitFirst => {
            let list = arg1("awaitFirst", args)?;
            let handles = handle_list("awaitFirst", &list)?;
            if handles.is_empty() {
                return Err(RunError::type_mismatch("awaitFirst on an empty list"));
            }
            let waiter = interp.cancel_token().clone();
            loop {
                waiter.check()?;
                if let Some(done) = handles.iter().find(|h| h.is_terminal()) {
                    let result = done.await_value(&waiter);
                    for other in &handles {
                        if !Arc::ptr_eq(other, done) {
                            other.cancel();
                        }
                    }
                    return result;
                }
                std::thread::sleep(std::time::Duration::from_millis(2));
            }
        }
        Builtin::WithContext => {
            if args.len() != 2 {
                return Err(RunError::arity("withContext", 2, args.len()));
            }
            let block = args.pop().expect("arity checked");
            let dispatcher = args.pop().expect("arity checked");
            match dispatcher {
                // Unconfined runs in the calling task.
                Value::Marker(Marker::DispatcherUnconfined) => interp.call_value(&block, smallvec![]),
                Value::Marker(Marker::DispatcherIo | Marker::DispatcherDefault) => {
                    let executor = interp.runtime().scheduler().background().clone();
                    let future = interp.spawn_task(block, None, executor, "withContext")?;
                    let waiter = interp.cancel_token().clone();
                    future.await_value(&waiter)
                }
                other => Err(RunError::type_mismatch(format!(
                    "withContext expects a dispatcher, got {}",
                    other.type_name()
                ))),
            }
        }

        Builtin::ClassOf => {
            let v = arg1("classOf", args)?;
            match &v {
                Value::Str(name) => interp
                    .runtime()
                    .class_by_name(name)
                    .map(Value::Class)
                    .ok_or_else(|| RunError::exc(ExcKind::ClassNotFound, format!("unknown class: {name}"))),
                Value::Object(obj) => Ok(Value::Class(obj.class.clone())),
                Value::Class(_) => Ok(v.clone()),
                other => Err(RunError::type_mismatch(format!(
                    "classOf expects a class name or object, got {}",
                    other.type_name()
                ))),
            }
        }
        Builtin::RegisterAnnotationProcessor => {
            if args.len() != 2 {
                return Err(RunError::arity("registerAnnotationProcessor", 2, args.len()));
            }
            let handler = args.pop().expect("arity checked");
            let name = args.pop().expect("arity checked");
            let Value::Str(name) = name else {
                return Err(RunError::type_mismatch("annotation name must be String"));
            };
            interp.runtime().set_annotation_processor(name, Some(handler));
            Ok(Value::Unit)
        }
    }
}

fn arg1(name: &str, mut args: Args) -> RunResult<Value> {
    if args.len() != 1 {
        return Err(RunError::arity(name, 1, args.len()));
    }
    Ok(args.pop().expect("arity checked"))
}

fn convert_int(v: Value) -> RunResult<i64> {
    match &v {
        Value::Int(i) | Value::Long(i) => Ok(*i),
        Value::Double(d) => Ok(*d as i64),
        Value::Char(c) => Ok(i64::from(*c as u32)),
        Value::Bool(b) => Ok(i64::from(*b)),
        Value::Str(s) => s
            .trim()
            .parse()
            .map_err(|_| RunError::type_mismatch(format!("cannot parse '{s}' as Int"))),
        other => Err(RunError::type_mismatch(format!(
            "cannot convert {} to Int",
            other.type_name()
        ))),
    }
}

fn convert_double(v: Value) -> RunResult<f64> {
    match &v {
        Value::Int(i) | Value::Long(i) => Ok(*i as f64),
        Value::Double(d) => Ok(*d),
        Value::Str(s) => s
            .trim()
            .parse()
            .map_err(|_| RunError::type_mismatch(format!("cannot parse '{s}' as Double"))),
        other => Err(RunError::type_mismatch(format!(
            "cannot convert {} to Double",
            other.type_name()
        ))),
    }
}

fn handle_list(name: &str, list: &Value) -> RunResult<Vec<Arc<crate::concurrent::FutureValue>>> {
    let Value::List(items) = list else {
        return Err(RunError::type_mismatch(format!("{name} expects a list of handles")));
    };
    items
        .read()
        .iter()
        .map(|item| match item {
            Value::Deferred(f) | Value::Job(f) | Value::Future(f) => Ok(f.clone()),
            other => Err(RunError::type_mismatch(format!(
                "{name} expects async handles, got {}",
                other.type_name()
            ))),
        })
        .collect()
}

// --- stdlib extension members ------------------------------------------------

use crate::runtime::{StdMember, StdMemberKind};

fn property(
    interp: &Interpreter,
    tag: TypeTag,
    name: &'static str,
    f: impl Fn(&mut Interpreter, Option<Value>, Args) -> RunResult<Value> + Send + Sync + 'static,
) {
    interp.runtime().register_stdlib_member(
        tag,
        name,
        StdMember {
            f: NativeFn::new(name, None, f),
            kind: StdMemberKind::Property,
        },
    );
}

fn method(
    interp: &Interpreter,
    tag: TypeTag,
    name: &'static str,
    f: impl Fn(&mut Interpreter, Option<Value>, Args) -> RunResult<Value> + Send + Sync + 'static,
) {
    interp.runtime().register_stdlib_member(
        tag,
        name,
        StdMember {
            f: NativeFn::new(name, None, f),
            kind: StdMemberKind::Method,
        },
    );
}

fn recv_str(this: &Option<Value>) -> RunResult<Arc<str>> {
    match this {
        Some(Value::Str(s)) => Ok(s.clone()),
        _ => Err(RunError::internal("string member without string receiver")),
    }
}

fn recv_list(this: &Option<Value>) -> RunResult<crate::value::ListRef> {
    match this {
        Some(Value::List(list)) => Ok(list.clone()),
        _ => Err(RunError::internal("list member without list receiver")),
    }
}

fn recv_map(this: &Option<Value>) -> RunResult<crate::value::MapRef> {
    match this {
        Some(Value::Map(map)) => Ok(map.clone()),
        _ => Err(RunError::internal("map member without map receiver")),
    }
}

fn str_param(name: &str, v: Option<&Value>) -> RunResult<Arc<str>> {
    match v {
        Some(Value::Str(s)) => Ok(s.clone()),
        other => Err(RunError::type_mismatch(format!(
            "{name} expects a String argument, got {}",
            other.map_or("nothing".into(), |v| v.type_name())
        ))),
    }
}

/// Ordering used by `sorted`: numbers before strings, errors elsewhere.
fn compare_values(a: &Value, b: &Value) -> RunResult<std::cmp::Ordering> {
    use std::cmp::Ordering;
    match (a, b) {
        (Value::Int(_) | Value::Long(_) | Value::Double(_), Value::Int(_) | Value::Long(_) | Value::Double(_)) => {
            let (x, y) = (a.as_f64().expect("numeric"), b.as_f64().expect("numeric"));
            Ok(x.partial_cmp(&y).unwrap_or(Ordering::Equal))
        }
        (Value::Str(x), Value::Str(y)) => Ok(x.cmp(y)),
        (Value::Char(x), Value::Char(y)) => Ok(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Ok(x.cmp(y)),
        _ => Err(RunError::type_mismatch(format!(
            "cannot compare {} with {}",
            a.type_name(),
            b.type_name()
        ))),
    }
}

#[expect(clippy::too_many_lines, reason = "one registration per stdlib member, straight-line")]
fn register_stdlib_members(interp: &mut Interpreter) {
    // --- String ---
    property(interp, TypeTag::Str, "isEmpty", |_, this, _| {
        Ok(Value::Bool(recv_str(&this)?.is_empty()))
    });
    property(interp, TypeTag::Str, "isNotEmpty", |_, this, _| {
        Ok(Value::Bool(!recv_str(&this)?.is_empty()))
    });
    method(interp, TypeTag::Str, "uppercase", |_, this, _| {
        Ok(Value::str(recv_str(&this)?.to_uppercase()))
    });
    method(interp, TypeTag::Str, "lowercase", |_, this, _| {
        Ok(Value::str(recv_str(&this)?.to_lowercase()))
    });
    method(interp, TypeTag::Str, "trim", |_, this, _| {
        Ok(Value::str(recv_str(&this)?.trim().to_owned()))
    });
    method(interp, TypeTag::Str, "contains", |_, this, args| {
        let needle = str_param("contains", args.first())?;
        Ok(Value::Bool(recv_str(&this)?.contains(&*needle)))
    });
    method(interp, TypeTag::Str, "startsWith", |_, this, args| {
        let prefix = str_param("startsWith", args.first())?;
        Ok(Value::Bool(recv_str(&this)?.starts_with(&*prefix)))
    });
    method(interp, TypeTag::Str, "endsWith", |_, this, args| {
        let suffix = str_param("endsWith", args.first())?;
        Ok(Value::Bool(recv_str(&this)?.ends_with(&*suffix)))
    });
    method(interp, TypeTag::Str, "indexOf", |_, this, args| {
        let needle = str_param("indexOf", args.first())?;
        let s = recv_str(&this)?;
        match s.find(&*needle) {
            Some(byte_pos) => Ok(Value::Int(s[..byte_pos].chars().count() as i64)),
            None => Ok(Value::Int(-1)),
        }
    });
    method(interp, TypeTag::Str, "substring", |_, this, args| {
        let s = recv_str(&this)?;
        let chars: Vec<char> = s.chars().collect();
        let start = args
            .first()
            .and_then(Value::as_int)
            .ok_or_else(|| RunError::type_mismatch("substring expects a start index"))?;
        let end = args.get(1).and_then(Value::as_int).unwrap_or(chars.len() as i64);
        let start = usize::try_from(start).map_err(|_| RunError::index_out_of_bounds(start, chars.len()))?;
        let end = usize::try_from(end).map_err(|_| RunError::index_out_of_bounds(end, chars.len()))?;
        if start > end || end > chars.len() {
            return Err(RunError::index_out_of_bounds(end as i64, chars.len()));
        }
        Ok(Value::str(chars[start..end].iter().collect::<String>()))
    });
    method(interp, TypeTag::Str, "split", |_, this, args| {
        let sep = str_param("split", args.first())?;
        let parts = recv_str(&this)?
            .split(&*sep)
            .map(|p| Value::str(p.to_owned()))
            .collect();
        Ok(Value::list_of(parts))
    });
    method(interp, TypeTag::Str, "replace", |_, this, args| {
        let from = str_param("replace", args.first())?;
        let to = str_param("replace", args.get(1))?;
        Ok(Value::str(recv_str(&this)?.replace(&*from, &to)))
    });
    method(interp, TypeTag::Str, "toInt", |_, this, _| {
        convert_int(Value::Str(recv_str(&this)?)).map(Value::Int)
    });
    method(interp, TypeTag::Str, "toDouble", |_, this, _| {
        convert_double(Value::Str(recv_str(&this)?)).map(Value::Double)
    });
    method(interp, TypeTag::Str, "repeat", |_, this, args| {
        let times = args
            .first()
            .and_then(Value::as_int)
            .ok_or_else(|| RunError::type_mismatch("repeat expects a count"))?;
        let times = usize::try_from(times).unwrap_or(0);
        Ok(Value::str(recv_str(&this)?.repeat(times)))
    });

    // --- List ---
    property(interp, TypeTag::List, "isEmpty", |_, this, _| {
        Ok(Value::Bool(recv_list(&this)?.read().is_empty()))
    });
    property(interp, TypeTag::List, "isNotEmpty", |_, this, _| {
        Ok(Value::Bool(!recv_list(&this)?.read().is_empty()))
    });
    property(interp, TypeTag::List, "first", |_, this, _| {
        recv_list(&this)?
            .read()
            .first()
            .cloned()
            .ok_or_else(|| RunError::index_out_of_bounds(0, 0))
    });
    property(interp, TypeTag::List, "last", |_, this, _| {
        let list = recv_list(&this)?;
        let guard = list.read();
        guard
            .last()
            .cloned()
            .ok_or_else(|| RunError::index_out_of_bounds(-1, guard.len()))
    });
    method(interp, TypeTag::List, "add", |_, this, args| {
        let list = recv_list(&this)?;
        for arg in args {
            list.write().push(arg);
        }
        Ok(Value::Unit)
    });
    method(interp, TypeTag::List, "removeAt", |_, this, args| {
        let list = recv_list(&this)?;
        let i = args
            .first()
            .and_then(Value::as_int)
            .ok_or_else(|| RunError::type_mismatch("removeAt expects an index"))?;
        let mut guard = list.write();
        let len = guard.len();
        match usize::try_from(i).ok().filter(|&i| i < len) {
            Some(i) => Ok(guard.remove(i)),
            None => Err(RunError::index_out_of_bounds(i, len)),
        }
    });
    method(interp, TypeTag::List, "contains", |_, this, args| {
        let needle = args.into_iter().next().unwrap_or(Value::Null);
        Ok(Value::Bool(recv_list(&this)?.read().iter().any(|v| v.equals(&needle))))
    });
    method(interp, TypeTag::List, "indexOf", |_, this, args| {
        let needle = args.into_iter().next().unwrap_or(Value::Null);
        let pos = recv_list(&this)?.read().iter().position(|v| v.equals(&needle));
        Ok(Value::Int(pos.map_or(-1, |p| p as i64)))
    });
    method(interp, TypeTag::List, "map", |interp, this, args| {
        let f = args.into_iter().next().ok_or_else(|| RunError::arity("map", 1, 0))?;
        let items: Vec<Value> = recv_list(&this)?.read().clone();
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            out.push(interp.call_value(&f, smallvec![item])?);
        }
        Ok(Value::list_of(out))
    });
    method(interp, TypeTag::List, "filter", |interp, this, args| {
        let p = args.into_iter().next().ok_or_else(|| RunError::arity("filter", 1, 0))?;
        let items: Vec<Value> = recv_list(&this)?.read().clone();
        let mut out = Vec::new();
        for item in items {
            if interp.call_value(&p, smallvec![item.clone()])?.is_truthy() {
                out.push(item);
            }
        }
        Ok(Value::list_of(out))
    });
    method(interp, TypeTag::List, "forEach", |interp, this, args| {
        let f = args.into_iter().next().ok_or_else(|| RunError::arity("forEach", 1, 0))?;
        let items: Vec<Value> = recv_list(&this)?.read().clone();
        for item in items {
            interp.call_value(&f, smallvec![item])?;
        }
        Ok(Value::Unit)
    });
    method(interp, TypeTag::List, "all", |interp, this, args| {
        let p = args.into_iter().next().ok_or_else(|| RunError::arity("all", 1, 0))?;
        let items: Vec<Value> = recv_list(&this)?.read().clone();
        for item in items {
            if !interp.call_value(&p, smallvec![item])?.is_truthy() {
                return Ok(Value::Bool(false));
            }
        }
        Ok(Value::Bool(true))
    });
    method(interp, TypeTag::List, "any", |interp, this, args| {
        let p = args.into_iter().next().ok_or_else(|| RunError::arity("any", 1, 0))?;
        let items: Vec<Value> = recv_list(&this)?.read().clone();
        for item in items {
            if interp.call_value(&p, smallvec![item])?.is_truthy() {
                return Ok(Value::Bool(true));
            }
        }
        Ok(Value::Bool(false))
    });
    method(interp, TypeTag::List, "joinToString", |interp, this, args| {
        let sep = match args.first() {
            Some(Value::Str(s)) => s.to_string(),
            _ => ", ".to_owned(),
        };
        let items: Vec<Value> = recv_list(&this)?.read().clone();
        let mut out = String::new();
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                out.push_str(&sep);
            }
            out.push_str(&interp.display_value(item)?);
        }
        Ok(Value::str(out))
    });
    method(interp, TypeTag::List, "sorted", |_, this, _| {
        let mut items: Vec<Value> = recv_list(&this)?.read().clone();
        let mut failed = None;
        items.sort_by(|a, b| match compare_values(a, b) {
            Ok(ord) => ord,
            Err(err) => {
                failed.get_or_insert(err);
                std::cmp::Ordering::Equal
            }
        });
        match failed {
            Some(err) => Err(err),
            None => Ok(Value::list_of(items)),
        }
    });
    method(interp, TypeTag::List, "reversed", |_, this, _| {
        let mut items: Vec<Value> = recv_list(&this)?.read().clone();
        items.reverse();
        Ok(Value::list_of(items))
    });
    method(interp, TypeTag::List, "sum", |_, this, _| {
        let items: Vec<Value> = recv_list(&this)?.read().clone();
        let mut int_sum = 0i64;
        let mut double_sum = 0f64;
        let mut is_double = false;
        for item in &items {
            match item {
                Value::Int(i) | Value::Long(i) => int_sum = int_sum.wrapping_add(*i),
                Value::Double(d) => {
                    is_double = true;
                    double_sum += d;
                }
                other => {
                    return Err(RunError::type_mismatch(format!(
                        "sum over non-numeric element {}",
                        other.type_name()
                    )));
                }
            }
        }
        if is_double {
            Ok(Value::Double(double_sum + int_sum as f64))
        } else {
            Ok(Value::Int(int_sum))
        }
    });
    method(interp, TypeTag::List, "take", |_, this, args| {
        let n = args.first().and_then(Value::as_int).unwrap_or(0).max(0) as usize;
        let items: Vec<Value> = recv_list(&this)?.read().iter().take(n).cloned().collect();
        Ok(Value::list_of(items))
    });
    method(interp, TypeTag::List, "drop", |_, this, args| {
        let n = args.first().and_then(Value::as_int).unwrap_or(0).max(0) as usize;
        let items: Vec<Value> = recv_list(&this)?.read().iter().skip(n).cloned().collect();
        Ok(Value::list_of(items))
    });

    // --- Map ---
    method(interp, TypeTag::Map, "containsKey", |_, this, args| {
        let key = args.into_iter().next().unwrap_or(Value::Null);
        Ok(Value::Bool(recv_map(&this)?.read().contains_key(&key)))
    });
    method(interp, TypeTag::Map, "put", |_, this, mut args| {
        if args.len() != 2 {
            return Err(RunError::arity("put", 2, args.len()));
        }
        let value = args.pop().expect("arity checked");
        let key = args.pop().expect("arity checked");
        Ok(recv_map(&this)?.write().insert(key, value).unwrap_or(Value::Null))
    });
    method(interp, TypeTag::Map, "get", |_, this, args| {
        let key = args.into_iter().next().unwrap_or(Value::Null);
        Ok(recv_map(&this)?.read().get(&key).cloned().unwrap_or(Value::Null))
    });
    method(interp, TypeTag::Map, "remove", |_, this, args| {
        let key = args.into_iter().next().unwrap_or(Value::Null);
        Ok(recv_map(&this)?.write().shift_remove(&key).unwrap_or(Value::Null))
    });

    // --- Range ---
    method(interp, TypeTag::Range, "contains", |_, this, args| {
        let Some(Value::Range(range)) = this else {
            return Err(RunError::internal("range member without range receiver"));
        };
        let v = args.first().and_then(Value::as_int).unwrap_or(i64::MIN);
        Ok(Value::Bool(range.contains(v)))
    });
    method(interp, TypeTag::Range, "toList", |_, this, _| {
        let Some(Value::Range(range)) = this else {
            return Err(RunError::internal("range member without range receiver"));
        };
        let (mut next, mut remaining, step) = range.iter_state();
        let mut items = Vec::new();
        while remaining > 0 {
            items.push(Value::Int(next));
            next = next.wrapping_add(step);
            remaining -= 1;
        }
        Ok(Value::list_of(items))
    });
    method(interp, TypeTag::Range, "reversed", |_, this, _| {
        let Some(Value::Range(range)) = this else {
            return Err(RunError::internal("range member without range receiver"));
        };
        let (Some(first), Some(last)) = (range.first(), range.last()) else {
            return Ok(Value::Range(range));
        };
        Ok(Value::Range(Range::new(last, first, true)))
    });
}
