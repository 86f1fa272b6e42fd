//! Controlled access to host ("foreign") classes.
//!
//! The engine never reflects over arbitrary host types; embedders register
//! [`ForeignClass`] descriptors exposing exactly the constructors, methods,
//! fields, and statics they want scripts to reach. Every resolution and call
//! goes through the security policy first, and resolution results (hits and
//! misses) are cached.

use std::{any::Any, fmt, sync::Arc};

use ahash::AHashMap;
use parking_lot::{Mutex, RwLock};
use smallvec::SmallVec;

use crate::{
    errors::{ExcKind, RunError, RunResult},
    interp::Interpreter,
    policy::SecurityPolicy,
    types::{Args, ClassValue, NativeFn},
    value::Value,
};

/// Constructor implementation: produces the host-side payload; the bridge
/// wraps it into an [`ExternalObject`] carrying the class descriptor.
pub type CtorImpl = Arc<dyn Fn(&mut Interpreter, Args) -> RunResult<Box<dyn Any + Send + Sync>> + Send + Sync>;

pub struct ForeignCtor {
    pub arity: usize,
    pub f: CtorImpl,
}

impl fmt::Debug for ForeignCtor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ForeignCtor(arity={})", self.arity)
    }
}

/// Host field accessor pair.
pub struct FieldAccessor {
    pub get: Arc<dyn Fn(&ExternalObject) -> Value + Send + Sync>,
    pub set: Option<Arc<dyn Fn(&ExternalObject, Value) -> bool + Send + Sync>>,
}

impl fmt::Debug for FieldAccessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FieldAccessor(settable={})", self.set.is_some())
    }
}

/// Descriptor of a host class reachable from scripts.
#[derive(Debug)]
pub struct ForeignClass {
    /// Fully qualified name, e.g. `java.lang.StringBuilder`.
    pub name: Arc<str>,
    /// Trailing segment of `name`, matched by wildcard resolution.
    pub simple_name: Arc<str>,
    pub constructors: Vec<ForeignCtor>,
    pub methods: AHashMap<Arc<str>, Arc<NativeFn>>,
    pub statics: AHashMap<Arc<str>, Value>,
    pub fields: AHashMap<Arc<str>, FieldAccessor>,
    /// Single abstract method name; present for SAM interfaces.
    pub sam_method: Option<Arc<str>>,
    /// Non-sealed: language classes may extend it via subclass synthesis.
    pub is_open: bool,
    pub is_interface: bool,
}

impl ForeignClass {
    pub fn builder(name: impl Into<Arc<str>>) -> ForeignClassBuilder {
        let name: Arc<str> = name.into();
        let simple_name: Arc<str> = name.rsplit('.').next().map_or_else(|| name.clone(), Arc::from);
        ForeignClassBuilder {
            class: Self {
                name,
                simple_name,
                constructors: Vec::new(),
                methods: AHashMap::new(),
                statics: AHashMap::new(),
                fields: AHashMap::new(),
                sam_method: None,
                is_open: false,
                is_interface: false,
            },
        }
    }

    /// Picks a constructor by positional arity.
    pub fn find_constructor(&self, argc: usize) -> Option<&ForeignCtor> {
        self.constructors.iter().find(|c| c.arity == argc)
    }

    /// JavaBean getter fallback: `x` resolves through zero-arg `getX`/`isX`.
    pub fn bean_getter(&self, property: &str) -> Option<&Arc<NativeFn>> {
        let mut upper = String::with_capacity(property.len() + 3);
        let mut chars = property.chars();
        let first = chars.next()?;
        upper.extend(first.to_uppercase());
        upper.push_str(chars.as_str());
        self.methods
            .get(format!("get{upper}").as_str())
            .or_else(|| self.methods.get(format!("is{upper}").as_str()))
            .filter(|m| m.arity == Some(0))
    }
}

/// Fluent registration surface for embedders.
pub struct ForeignClassBuilder {
    class: ForeignClass,
}

impl ForeignClassBuilder {
    pub fn ctor(
        mut self,
        arity: usize,
        f: impl Fn(&mut Interpreter, Args) -> RunResult<Box<dyn Any + Send + Sync>> + Send + Sync + 'static,
    ) -> Self {
        self.class.constructors.push(ForeignCtor { arity, f: Arc::new(f) });
        self
    }

    pub fn method(
        mut self,
        name: impl Into<Arc<str>>,
        arity: Option<usize>,
        f: impl Fn(&mut Interpreter, Option<Value>, Args) -> RunResult<Value> + Send + Sync + 'static,
    ) -> Self {
        let name = name.into();
        self.class.methods.insert(name.clone(), NativeFn::new(name, arity, f));
        self
    }

    pub fn static_value(mut self, name: impl Into<Arc<str>>, value: Value) -> Self {
        self.class.statics.insert(name.into(), value);
        self
    }

    pub fn field(
        mut self,
        name: impl Into<Arc<str>>,
        get: impl Fn(&ExternalObject) -> Value + Send + Sync + 'static,
    ) -> Self {
        self.class.fields.insert(
            name.into(),
            FieldAccessor {
                get: Arc::new(get),
                set: None,
            },
        );
        self
    }

    pub fn sam(mut self, method: impl Into<Arc<str>>) -> Self {
        self.class.sam_method = Some(method.into());
        self.class.is_interface = true;
        self
    }

    pub fn open(mut self) -> Self {
        self.class.is_open = true;
        self
    }

    pub fn interface(mut self) -> Self {
        self.class.is_interface = true;
        self
    }

    pub fn build(self) -> Arc<ForeignClass> {
        Arc::new(self.class)
    }
}

/// A host object instance held by a script.
pub struct ExternalObject {
    pub class: Arc<ForeignClass>,
    /// Host payload; methods downcast it.
    pub data: Box<dyn Any + Send + Sync>,
    /// Method overrides installed by subclass synthesis / dynamic proxies:
    /// names mapped to bound language callables.
    pub overrides: AHashMap<Arc<str>, Value>,
}

impl fmt::Debug for ExternalObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ExternalObject({})", self.class.name)
    }
}

impl ExternalObject {
    pub fn new(class: Arc<ForeignClass>, data: Box<dyn Any + Send + Sync>) -> Arc<Self> {
        Arc::new(Self {
            class,
            data,
            overrides: AHashMap::new(),
        })
    }

    pub fn downcast<T: 'static>(&self) -> Option<&T> {
        self.data.downcast_ref::<T>()
    }

    /// Routes a method call: overridden methods dispatch back into language
    /// code, everything else hits the host implementation.
    pub fn dispatch(self: &Arc<Self>, interp: &mut Interpreter, name: &str, args: Args) -> RunResult<Value> {
        if let Some(override_fn) = self.overrides.get(name) {
            return interp.call_value(override_fn, args);
        }
        let Some(method) = self.class.methods.get(name) else {
            return Err(RunError::unknown_member(&self.class.name, name));
        };
        let method = method.clone();
        (method.f)(interp, Some(Value::External(self.clone())), args)
    }
}

/// Wraps a language callable as an instance of a SAM interface.
///
/// Invoking the interface's single abstract method calls the callable.
pub fn make_sam_proxy(class: &Arc<ForeignClass>, callable: Value) -> RunResult<Arc<ExternalObject>> {
    let Some(sam) = &class.sam_method else {
        return Err(RunError::type_mismatch(format!(
            "{} is not a single-abstract-method interface",
            class.name
        )));
    };
    let mut proxy = ExternalObject {
        class: class.clone(),
        data: Box::new(()),
        overrides: AHashMap::new(),
    };
    proxy.overrides.insert(sam.clone(), callable);
    Ok(Arc::new(proxy))
}

/// Implements a foreign interface by delegating every interface method to the
/// language receiver (a dynamic proxy).
pub fn make_interface_proxy(
    class: &Arc<ForeignClass>,
    interp: &mut Interpreter,
    receiver: &Value,
) -> RunResult<Arc<ExternalObject>> {
    if !class.is_interface {
        return Err(RunError::type_mismatch(format!("{} is not an interface", class.name)));
    }
    let mut proxy = ExternalObject {
        class: class.clone(),
        data: Box::new(()),
        overrides: AHashMap::new(),
    };
    for name in class.methods.keys() {
        if let Ok(bound) = interp.resolve_member(receiver, name, true) {
            proxy.overrides.insert(name.clone(), bound);
        }
    }
    Ok(Arc::new(proxy))
}

/// Registry of foreign classes plus the resolve and method-handle caches.
#[derive(Debug, Default)]
pub struct ForeignRegistry {
    classes: RwLock<AHashMap<Arc<str>, Arc<ForeignClass>>>,
    /// Resolution cache; misses are cached too so repeated unknown-name
    /// lookups stay cheap.
    resolve_cache: Mutex<AHashMap<String, Option<Arc<ForeignClass>>>>,
    /// Packages searched for simple-name (wildcard) resolution.
    common_packages: RwLock<Vec<String>>,
    /// Method-handle cache keyed by `(class identity, name, arg count)`.
    method_cache: Mutex<AHashMap<(usize, Arc<str>, usize), Arc<NativeFn>>>,
}

impl ForeignRegistry {
    pub fn register(&self, class: Arc<ForeignClass>) {
        self.resolve_cache.lock().clear();
        self.classes.write().insert(class.name.clone(), class);
    }

    pub fn add_common_package(&self, package: impl Into<String>) {
        self.resolve_cache.lock().clear();
        self.common_packages.write().push(package.into());
    }

    /// Resolves a class name: exact qualified name first, then each common
    /// package prefix. Hits are policy-checked; hit and miss are both cached.
    pub fn resolve(&self, name: &str, policy: &SecurityPolicy) -> RunResult<Option<Arc<ForeignClass>>> {
        if let Some(cached) = self.resolve_cache.lock().get(name) {
            return match cached {
                Some(class) => {
                    policy.check_class(&class.name)?;
                    Ok(Some(class.clone()))
                }
                None => Ok(None),
            };
        }

        let found = {
            let classes = self.classes.read();
            classes.get(name).cloned().or_else(|| {
                self.common_packages
                    .read()
                    .iter()
                    .find_map(|pkg| classes.get(format!("{pkg}.{name}").as_str()).cloned())
            })
        };
        self.resolve_cache.lock().insert(name.to_owned(), found.clone());
        match found {
            Some(class) => {
                policy.check_class(&class.name)?;
                Ok(Some(class))
            }
            None => Ok(None),
        }
    }

    /// Looks up an instance method with the handle cache in front.
    pub fn method_handle(&self, class: &Arc<ForeignClass>, name: &str, argc: usize) -> Option<Arc<NativeFn>> {
        let key = (Arc::as_ptr(class) as usize, Arc::from(name), argc);
        if let Some(hit) = self.method_cache.lock().get(&key) {
            return Some(hit.clone());
        }
        let method = class
            .methods
            .get(name)
            .filter(|m| m.arity.is_none() || m.arity == Some(argc))
            .cloned()?;
        self.method_cache.lock().insert(key, method.clone());
        Some(method)
    }
}

impl Interpreter {
    /// Constructs the foreign delegate for a language class extending a
    /// non-sealed foreign class, installing the override dispatcher for
    /// every method the language class redefines.
    pub(crate) fn construct_foreign_subclass(
        &mut self,
        foreign: &Arc<ForeignClass>,
        class: &Arc<ClassValue>,
        this: &Value,
        args: Args,
    ) -> RunResult<Value> {
        if !foreign.is_open {
            return Err(RunError::type_mismatch(format!(
                "{} is sealed and cannot be extended",
                foreign.name
            )));
        }
        let ctor = foreign
            .find_constructor(args.len())
            .ok_or_else(|| RunError::arity(&foreign.name, foreign.constructors.len(), args.len()))?;
        let data = (ctor.f.clone())(self, args)?;

        let mut overrides = AHashMap::new();
        for name in class.methods.keys() {
            if foreign.methods.contains_key(name) || foreign.is_interface {
                overrides.insert(
                    name.clone(),
                    Value::Bound(Arc::new(crate::types::BoundMethod {
                        receiver: this.clone(),
                        callable: Value::Func(class.methods[name].callable.clone()),
                    })),
                );
            }
        }
        Ok(Value::External(Arc::new(ExternalObject {
            class: foreign.clone(),
            data,
            overrides,
        })))
    }

    /// Wildcard foreign resolution used as the last identifier fallback.
    pub(crate) fn resolve_wildcard_foreign(&mut self, name: &str) -> RunResult<Option<Value>> {
        // Only plausible class names (capitalized) hit the bridge; this keeps
        // ordinary unknown identifiers from churning the miss cache.
        if !name.chars().next().is_some_and(char::is_uppercase) {
            return Ok(None);
        }
        let policy = self.policy().clone();
        match self.runtime().foreign().resolve(name, &policy) {
            Ok(Some(class)) => Ok(Some(Value::ForeignClass(class))),
            Ok(None) => Ok(None),
            // Denials surface: a denied class must not silently fall through
            // to UnknownName.
            Err(err) => Err(err),
        }
    }

    /// Instantiates a foreign class directly (`new`, constructor call).
    pub(crate) fn instantiate_foreign(&mut self, class: &Arc<ForeignClass>, args: Args) -> RunResult<Value> {
        self.policy().check_class(&class.name)?;
        // A SAM interface called with a single callable builds a proxy.
        if class.sam_method.is_some()
            && args.len() == 1
            && args[0].is_callable()
        {
            let mut args = args;
            let callable = args.pop().expect("arity checked");
            return Ok(Value::External(make_sam_proxy(class, callable)?));
        }
        let ctor = class
            .find_constructor(args.len())
            .ok_or_else(|| RunError::arity(&class.name, class.constructors.len(), args.len()))?;
        let data = (ctor.f.clone())(self, args)?;
        Ok(Value::External(ExternalObject::new(class.clone(), data)))
    }

    /// Static member access on a foreign class.
    pub(crate) fn foreign_static(&mut self, class: &Arc<ForeignClass>, name: &str) -> RunResult<Value> {
        self.policy().check_method(&class.name, name)?;
        class
            .statics
            .get(name)
            .cloned()
            .ok_or_else(|| RunError::unknown_member(&class.name, name))
    }

    /// Instance method invocation on an external value, via the handle cache.
    pub(crate) fn invoke_foreign(
        &mut self,
        external: &Arc<ExternalObject>,
        name: &str,
        args: Args,
    ) -> RunResult<Value> {
        self.policy().check_method(&external.class.name, name)?;
        if let Some(override_fn) = external.overrides.get(name) {
            let override_fn = override_fn.clone();
            return self.call_value(&override_fn, args);
        }
        let handle = self.runtime().foreign().method_handle(&external.class, name, args.len());
        match handle {
            Some(method) => (method.f)(self, Some(Value::External(external.clone())), args),
            None => {
                // JavaBean getter fallback for zero-argument access.
                if args.is_empty()
                    && let Some(getter) = external.class.bean_getter(name)
                {
                    let getter = getter.clone();
                    return (getter.f)(self, Some(Value::External(external.clone())), SmallVec::new());
                }
                Err(RunError::exc(
                    ExcKind::UnknownMember,
                    format!("'{}' has no method '{name}' with {} argument(s)", external.class.name, args.len()),
                ))
            }
        }
    }
}
