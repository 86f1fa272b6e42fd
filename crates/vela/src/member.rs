//! Unified member resolution.
//!
//! `resolve_member` is the single entry used by property access, method
//! references, and call-site receiver resolution. The lookup is an explicit
//! ordered strategy chain; each strategy returns
//! `Found(value) | NotFound | Error`, which keeps every layer testable in
//! isolation and makes the fallback order auditable:
//!
//! 1. object members (fields, getters, methods, data-class synthetics)
//! 2. class members (statics, enum surface, reflection info)
//! 3. enum-entry members
//! 4. built-in members on primitive-backed values
//! 5. user extension functions, then extension properties
//! 6. the stdlib extension table
//! 7. foreign reflection (fields, methods, bean getters)
//!
//! Zero-argument property-like callables reached here are auto-invoked
//! unless the resolver runs in callee position: `obj.size` evaluates the
//! member, `obj.size()` receives a bound callable to call explicitly.

use std::sync::Arc;

use smallvec::smallvec;

use crate::{
    errors::{RunError, RunResult},
    interp::Interpreter,
    runtime::StdMemberKind,
    types::{Args, BoundMethod, Callable, ClassKind, NativeFn},
    value::{Marker, Value},
};

/// Outcome of one resolution strategy.
enum Resolution {
    Found(Value),
    NotFound,
    Error(RunError),
}

macro_rules! try_layer {
    ($e:expr) => {
        match $e {
            Resolution::Found(v) => return Ok(v),
            Resolution::Error(err) => return Err(err),
            Resolution::NotFound => {}
        }
    };
}

impl Interpreter {
    /// Resolves `target.name`.
    ///
    /// `callee_pos` is set by the caller when it is evaluating the function
    /// of a call expression; it suppresses auto-invocation of zero-argument
    /// members so the callable itself comes back.
    pub fn resolve_member(&mut self, target: &Value, name: &str, callee_pos: bool) -> RunResult<Value> {
        match target {
            Value::Null => {
                return Err(RunError::null_deref(&format!("cannot access '{name}' on null")));
            }
            Value::Object(_) => try_layer!(self.object_member(target, name)),
            Value::Class(_) => try_layer!(self.class_member(target, name)),
            Value::EnumEntry(_) => try_layer!(self.enum_entry_member(target, name)),
            Value::Marker(marker) => try_layer!(self.marker_member(*marker, name)),
            _ => {}
        }
        try_layer!(self.builtin_member(target, name));
        try_layer!(self.extension_member(target, name));
        try_layer!(self.stdlib_member_layer(target, name, callee_pos));
        try_layer!(self.foreign_member(target, name, callee_pos));
        try_layer!(self.handle_member(target, name));
        Err(RunError::unknown_member(target.type_name(), name))
    }

    /// Layer 1: instance fields, custom getters, methods, interface default
    /// methods, and data-class synthetics.
    fn object_member(&mut self, target: &Value, name: &str) -> Resolution {
        let Value::Object(obj) = target else {
            return Resolution::NotFound;
        };
        let class = obj.class.clone();

        if let Some((slot, def)) = class.field_slot(name) {
            if let Err(err) = crate::types::check_visibility(def.visibility, &class, self.current_class(), name) {
                return Resolution::Error(err);
            }
            return Resolution::Found(obj.get_field(slot));
        }
        if let Some(getter) = class.find_getter(name) {
            let callable = getter.callable.clone();
            return match self.call_callable_with_this(&callable, Some(target.clone()), smallvec![]) {
                Ok(v) => Resolution::Found(v),
                Err(err) => Resolution::Error(err),
            };
        }
        if let Some(def) = class.find_method(name) {
            if let Err(err) = crate::types::check_visibility(def.visibility, &class, self.current_class(), name) {
                return Resolution::Error(err);
            }
            return Resolution::Found(Value::Bound(Arc::new(BoundMethod {
                receiver: target.clone(),
                callable: Value::Func(def.callable.clone()),
            })));
        }
        if class.is_data {
            if name == "copy" {
                return Resolution::Found(self.data_copy_member(target));
            }
            if let Some(n) = component_index(name)
                && n <= class.data_fields.len()
            {
                let field = class.data_fields[n - 1].clone();
                if let Some((slot, _)) = class.field_slot(&field) {
                    return Resolution::Found(obj.get_field(slot));
                }
            }
        }
        Resolution::NotFound
    }

    /// Layer 2: class receivers expose statics, the enum surface, and cached
    /// reflection info.
    fn class_member(&mut self, target: &Value, name: &str) -> Resolution {
        let Value::Class(class) = target else {
            return Resolution::NotFound;
        };
        let class = class.clone();

        if class.kind == ClassKind::Enum {
            if let Some(entry) = class.enum_entry(name) {
                return Resolution::Found(Value::EnumEntry(entry));
            }
            if matches!(name, "values" | "valueOf") {
                return Resolution::Found(dispatch_member(target.clone(), name));
            }
        }
        if name == "INSTANCE" && class.kind == ClassKind::Singleton {
            return match self.singleton_instance(&class) {
                Ok(v) => Resolution::Found(v),
                Err(err) => Resolution::Error(err),
            };
        }
        if let Some(value) = class.statics.read().get(name) {
            return Resolution::Found(value.clone());
        }
        if let Some(def) = class.methods.get(name).filter(|m| m.is_static) {
            return Resolution::Found(Value::Func(def.callable.clone()));
        }
        match name {
            "name" | "simpleName" => return Resolution::Found(Value::Str(class.name.clone())),
            "annotations" => {
                let annotations = class
                    .reflect()
                    .annotations
                    .iter()
                    .map(|a| Value::Str(a.clone()))
                    .collect();
                return Resolution::Found(Value::list_of(annotations));
            }
            "members" => {
                let members = class.reflect().members.iter().map(|m| Value::Str(m.clone())).collect();
                return Resolution::Found(Value::list_of(members));
            }
            _ => {}
        }
        if class.kind == ClassKind::Singleton {
            // Remaining singleton members resolve through the INSTANCE delegate.
            return match self.singleton_instance(&class) {
                Ok(instance) => match self.resolve_member(&instance, name, false) {
                    Ok(v) => Resolution::Found(v),
                    Err(_) => Resolution::NotFound,
                },
                Err(err) => Resolution::Error(err),
            };
        }
        Resolution::NotFound
    }

    /// Layer 3: enum entries expose `name`, `ordinal`, constructor fields,
    /// and per-entry method overrides.
    fn enum_entry_member(&mut self, target: &Value, name: &str) -> Resolution {
        let Value::EnumEntry(entry) = target else {
            return Resolution::NotFound;
        };
        match name {
            "name" => Resolution::Found(Value::Str(entry.name.clone())),
            "ordinal" => Resolution::Found(Value::Int(i64::from(entry.ordinal))),
            _ => {
                if let Some(value) = entry.field(name) {
                    return Resolution::Found(value);
                }
                if entry.overrides.contains_key(name)
                    || entry
                        .owner
                        .upgrade()
                        .is_some_and(|owner| owner.find_method(name).is_some())
                {
                    return Resolution::Found(dispatch_member(target.clone(), name));
                }
                Resolution::NotFound
            }
        }
    }

    /// Markers expose their namespace members.
    fn marker_member(&mut self, marker: Marker, name: &str) -> Resolution {
        match (marker, name) {
            (Marker::Dispatchers, "IO") => Resolution::Found(Value::Marker(Marker::DispatcherIo)),
            (Marker::Dispatchers, "Default") => Resolution::Found(Value::Marker(Marker::DispatcherDefault)),
            (Marker::Dispatchers, "Unconfined") => Resolution::Found(Value::Marker(Marker::DispatcherUnconfined)),
            (Marker::Interop, "type" | "static" | "field" | "new" | "isInstance" | "class") => {
                Resolution::Found(dispatch_member(Value::Marker(Marker::Interop), name))
            }
            _ => Resolution::NotFound,
        }
    }

    /// Layer 4: built-in members on primitive-backed values.
    fn builtin_member(&mut self, target: &Value, name: &str) -> Resolution {
        let found = match (target, name) {
            (Value::Str(s), "length") => Some(Value::Int(s.chars().count() as i64)),
            (Value::List(list), "size") => Some(Value::Int(list.read().len() as i64)),
            (Value::Map(map), "size") => Some(Value::Int(map.read().len() as i64)),
            (Value::Map(map), "keys") => Some(Value::list_of(map.read().keys().cloned().collect())),
            (Value::Map(map), "values") => Some(Value::list_of(map.read().values().cloned().collect())),
            (Value::Map(map), "entries") => Some(Value::list_of(
                map.read()
                    .iter()
                    .map(|(k, v)| Value::pair(k.clone(), v.clone()))
                    .collect(),
            )),
            (Value::Range(r), "first") => Some(r.first().map_or(Value::Null, Value::Int)),
            (Value::Range(r), "last") => Some(r.last().map_or(Value::Null, Value::Int)),
            (Value::Range(r), "size") => Some(Value::Int(r.size())),
            (Value::Pair(p), "first" | "component1") => Some(p.first.clone()),
            (Value::Pair(p), "second" | "component2") => Some(p.second.clone()),
            (Value::Array(arr), "size" | "length") => Some(Value::Int(arr.len() as i64)),
            (Value::Result(r), "isOk") => Some(Value::Bool(r.is_ok())),
            (Value::Result(r), "isErr") => Some(Value::Bool(r.is_err())),
            (Value::Result(r), "value") => Some(r.value()),
            (Value::Result(r), "error") => Some(r.error()),
            _ => None,
        };
        found.map_or(Resolution::NotFound, Resolution::Found)
    }

    /// Layer 5: user extension functions, then extension properties.
    fn extension_member(&mut self, target: &Value, name: &str) -> Resolution {
        if let Some(ext) = self.find_extension_fn(target, name) {
            return Resolution::Found(Value::Bound(Arc::new(BoundMethod {
                receiver: target.clone(),
                callable: ext,
            })));
        }
        if let Some(getter) = self.find_extension_prop(target, name) {
            // Extension properties are always auto-invoked.
            return match self.call_with_receiver(&getter, target.clone(), smallvec![]) {
                Ok(v) => Resolution::Found(v),
                Err(err) => Resolution::Error(err),
            };
        }
        Resolution::NotFound
    }

    /// Layer 6: the stdlib extension table keyed by `(type tag, name)`.
    fn stdlib_member_layer(&mut self, target: &Value, name: &str, callee_pos: bool) -> Resolution {
        let Some(member) = self.runtime().stdlib_member(target.type_tag(), name) else {
            return Resolution::NotFound;
        };
        match member.kind {
            StdMemberKind::Property if !callee_pos => {
                match (member.f.f)(self, Some(target.clone()), smallvec![]) {
                    Ok(v) => Resolution::Found(v),
                    Err(err) => Resolution::Error(err),
                }
            }
            _ => Resolution::Found(Value::Bound(Arc::new(BoundMethod {
                receiver: target.clone(),
                callable: Value::Func(Callable::Native(member.f)),
            }))),
        }
    }

    /// Layer 7: foreign reflection. Fields first, then methods as bound
    /// callables, then the JavaBean getter fallback (`getX`, `isX`).
    fn foreign_member(&mut self, target: &Value, name: &str, callee_pos: bool) -> Resolution {
        match target {
            Value::External(ext) => {
                if let Err(err) = self.policy().check_method(&ext.class.name, name) {
                    return Resolution::Error(err);
                }
                if let Some(accessor) = ext.class.fields.get(name) {
                    return Resolution::Found((accessor.get)(ext));
                }
                if let Some(override_fn) = ext.overrides.get(name) {
                    return Resolution::Found(override_fn.clone());
                }
                if ext.class.methods.contains_key(name) {
                    return Resolution::Found(dispatch_member(target.clone(), name));
                }
                if let Some(getter) = ext.class.bean_getter(name) {
                    if callee_pos {
                        return Resolution::Found(Value::Bound(Arc::new(BoundMethod {
                            receiver: target.clone(),
                            callable: Value::Func(Callable::Native(getter.clone())),
                        })));
                    }
                    let getter = getter.clone();
                    return match (getter.f)(self, Some(target.clone()), smallvec![]) {
                        Ok(v) => Resolution::Found(v),
                        Err(err) => Resolution::Error(err),
                    };
                }
                Resolution::NotFound
            }
            Value::ForeignClass(class) => {
                let class = class.clone();
                match self.foreign_static(&class, name) {
                    Ok(v) => Resolution::Found(v),
                    Err(err) if err.kind() == crate::errors::ExcKind::UnknownMember => Resolution::NotFound,
                    Err(err) => Resolution::Error(err),
                }
            }
            _ => Resolution::NotFound,
        }
    }

    /// Concurrency handles and channels expose their method tables as
    /// late-bound members so method references work on them too.
    fn handle_member(&mut self, target: &Value, name: &str) -> Resolution {
        let known = match target {
            Value::Scope(_) => matches!(name, "async" | "launch" | "cancel" | "isSupervisor"),
            Value::Deferred(_) | Value::Future(_) => matches!(name, "await" | "cancel" | "isCompleted"),
            Value::Job(_) => matches!(name, "join" | "cancel" | "isCompleted"),
            Value::Task(_) => matches!(name, "cancel" | "isCancelled"),
            Value::Channel(_) => matches!(
                name,
                "send" | "receive" | "receiveTimeout" | "tryReceive" | "close" | "iterator" | "isClosed"
            ),
            Value::Mutex(_) => name == "withLock",
            Value::Atomic(_) => matches!(
                name,
                "get" | "set" | "incrementAndGet" | "decrementAndGet" | "addAndGet" | "compareAndSet"
            ),
            Value::Iter(_) => matches!(name, "hasNext" | "next"),
            _ => false,
        };
        if known {
            Resolution::Found(dispatch_member(target.clone(), name))
        } else {
            Resolution::NotFound
        }
    }

    /// Data-class `copy`: positional arguments in data-field order, missing
    /// positions keep the receiver's current values.
    fn data_copy_member(&mut self, target: &Value) -> Value {
        let receiver = target.clone();
        let native = NativeFn::new("copy", None, move |interp: &mut Interpreter, this, args: Args| {
            let Some(Value::Object(obj)) = this else {
                return Err(RunError::internal("copy without a data-class receiver"));
            };
            let class = obj.class.clone();
            let mut ctor_args: Args = smallvec![];
            for (i, field) in class.data_fields.iter().enumerate() {
                match args.get(i) {
                    Some(v) => ctor_args.push(v.clone()),
                    None => {
                        let current = class
                            .field_slot(field)
                            .map(|(slot, _)| obj.get_field(slot))
                            .unwrap_or(Value::Null);
                        ctor_args.push(current);
                    }
                }
            }
            interp.instantiate_class(&class, ctor_args)
        });
        Value::Bound(Arc::new(BoundMethod {
            receiver,
            callable: Value::Func(Callable::Native(native)),
        }))
    }
}

/// A late-bound member: calling it re-enters full method dispatch on the
/// receiver, so special-receiver methods behave identically whether invoked
/// directly or through a member reference.
fn dispatch_member(receiver: Value, name: &str) -> Value {
    let method_name: Arc<str> = Arc::from(name);
    let native = NativeFn::new(method_name.clone(), None, move |interp: &mut Interpreter, this, args| {
        let recv = this.ok_or_else(|| RunError::internal("late-bound member without receiver"))?;
        interp.invoke_method(&recv, &method_name, args)
    });
    Value::Bound(Arc::new(BoundMethod {
        receiver,
        callable: Value::Func(Callable::Native(native)),
    }))
}

/// Parses `componentN` names; `component1` is index 1.
fn component_index(name: &str) -> Option<usize> {
    name.strip_prefix("component")?.parse().ok().filter(|&n| n >= 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn component_names_parse() {
        assert_eq!(component_index("component1"), Some(1));
        assert_eq!(component_index("component12"), Some(12));
        assert_eq!(component_index("component0"), None);
        assert_eq!(component_index("components"), None);
    }
}
