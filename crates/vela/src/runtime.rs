//! The process-shared runtime handle.
//!
//! All shared registries live here: the class table (keyed by [`ClassId`]),
//! extension tables, the stdlib extension table, annotation processors, the
//! foreign bridge, and the scheduler. One `Arc<Runtime>` is passed to every
//! interpreter; child task interpreters share it. Registration happens
//! single-threaded (module load), reads happen from any task thread.

use std::sync::{
    Arc, OnceLock,
    atomic::{AtomicU32, Ordering},
};

use ahash::AHashMap;
use parking_lot::RwLock;

use crate::{
    concurrent::Scheduler,
    errors::{ExcKind, RunResult},
    foreign::{ExternalObject, ForeignClass, ForeignRegistry},
    policy::SecurityPolicy,
    resource::ResourceError,
    types::{ClassId, ClassValue, NativeFn},
    value::{TypeTag, Value},
};

/// How a stdlib extension member behaves on property-style access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StdMemberKind {
    /// Auto-invoked on member access (`"s".length`).
    Property,
    /// Returned as a bound callable (`list.map`).
    Method,
}

/// One entry of the stdlib extension table.
#[derive(Debug, Clone)]
pub struct StdMember {
    pub f: Arc<NativeFn>,
    pub kind: StdMemberKind,
}

/// Host payload behind synthesized exception values bound by catch clauses.
#[derive(Debug, Clone)]
pub struct CaughtException {
    pub kind: ExcKind,
    pub message: String,
}

#[derive(Debug, Default)]
pub struct Runtime {
    classes: RwLock<Vec<Arc<ClassValue>>>,
    class_names: RwLock<AHashMap<Arc<str>, Arc<ClassValue>>>,
    /// User extension functions keyed by `(target type name, member name)`.
    ext_fns: RwLock<AHashMap<(Arc<str>, Arc<str>), Value>>,
    /// User extension properties (zero-arg, auto-invoked).
    ext_props: RwLock<AHashMap<(Arc<str>, Arc<str>), Value>>,
    /// Stdlib extension table keyed by `(type tag, member name)`.
    stdlib_ext: RwLock<AHashMap<(TypeTag, Arc<str>), StdMember>>,
    annotation_processors: RwLock<AHashMap<Arc<str>, Value>>,
    foreign: ForeignRegistry,
    scheduler: OnceLock<Arc<Scheduler>>,
    /// Live async task count, bounded by the policy's `max_async_tasks`.
    active_tasks: AtomicU32,
    /// Lazily-built descriptor for engine-raised exception values.
    exception_class: OnceLock<Arc<ForeignClass>>,
}

impl Runtime {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    // --- classes ----------------------------------------------------------

    pub fn next_class_id(&self) -> ClassId {
        ClassId::new(self.classes.read().len())
    }

    /// Registers a class. Later registrations shadow earlier ones by name
    /// (REPL redefinition); the id-indexed table keeps both.
    pub fn register_class(&self, class: Arc<ClassValue>) {
        self.class_names.write().insert(class.name.clone(), class.clone());
        self.classes.write().push(class);
    }

    pub fn class_by_name(&self, name: &str) -> Option<Arc<ClassValue>> {
        self.class_names.read().get(name).cloned()
    }

    pub fn class_by_id(&self, id: ClassId) -> Option<Arc<ClassValue>> {
        self.classes.read().get(id.index()).cloned()
    }

    // --- extensions -------------------------------------------------------

    pub fn register_extension_fn(&self, target: Arc<str>, name: Arc<str>, callable: Value) {
        self.ext_fns.write().insert((target, name), callable);
    }

    pub fn register_extension_prop(&self, target: Arc<str>, name: Arc<str>, getter: Value) {
        self.ext_props.write().insert((target, name), getter);
    }

    pub fn extension_fn(&self, target: &str, name: &str) -> Option<Value> {
        self.ext_fns
            .read()
            .get(&(Arc::from(target), Arc::from(name)))
            .cloned()
    }

    pub fn extension_prop(&self, target: &str, name: &str) -> Option<Value> {
        self.ext_props
            .read()
            .get(&(Arc::from(target), Arc::from(name)))
            .cloned()
    }

    pub fn register_stdlib_member(&self, tag: TypeTag, name: impl Into<Arc<str>>, member: StdMember) {
        self.stdlib_ext.write().insert((tag, name.into()), member);
    }

    pub fn stdlib_member(&self, tag: TypeTag, name: &str) -> Option<StdMember> {
        self.stdlib_ext.read().get(&(tag, Arc::from(name))).cloned()
    }

    // --- annotation processors -------------------------------------------

    pub fn set_annotation_processor(&self, name: Arc<str>, handler: Option<Value>) {
        let mut processors = self.annotation_processors.write();
        match handler {
            Some(handler) => {
                processors.insert(name, handler);
            }
            None => {
                processors.remove(&name);
            }
        }
    }

    pub fn annotation_processor(&self, name: &str) -> Option<Value> {
        self.annotation_processors.read().get(name).cloned()
    }

    // --- foreign bridge ---------------------------------------------------

    pub fn foreign(&self) -> &ForeignRegistry {
        &self.foreign
    }

    pub fn resolve_foreign_class(
        &self,
        name: &str,
        policy: &SecurityPolicy,
    ) -> RunResult<Option<Arc<ForeignClass>>> {
        self.foreign.resolve(name, policy)
    }

    // --- scheduler & task budget -----------------------------------------

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        self.scheduler.get_or_init(|| Arc::new(Scheduler::new_default()))
    }

    /// Installs a host scheduler. Must happen before the first task spawn.
    pub fn set_scheduler(&self, scheduler: Arc<Scheduler>) {
        let _ = self.scheduler.set(scheduler);
    }

    pub fn acquire_task_permit(&self, policy: &SecurityPolicy) -> RunResult<()> {
        let max = policy.max_async_tasks;
        if max == 0 {
            self.active_tasks.fetch_add(1, Ordering::AcqRel);
            return Ok(());
        }
        let prev = self.active_tasks.fetch_add(1, Ordering::AcqRel);
        if prev >= max {
            self.active_tasks.fetch_sub(1, Ordering::AcqRel);
            return Err(ResourceError::Tasks { limit: max }.into());
        }
        Ok(())
    }

    pub fn release_task_permit(&self) {
        self.active_tasks.fetch_sub(1, Ordering::AcqRel);
    }

    // --- exception values -------------------------------------------------

    /// Builds the value bound by a catch clause for engine-raised errors:
    /// an external object exposing `message` and `kind`.
    pub fn make_exception_value(&self, kind: ExcKind, message: &str) -> Value {
        let class = self
            .exception_class
            .get_or_init(|| {
                ForeignClass::builder("Exception")
                    .field("message", |ext: &ExternalObject| {
                        ext.downcast::<CaughtException>()
                            .map_or(Value::Null, |c| Value::str(c.message.clone()))
                    })
                    .field("kind", |ext: &ExternalObject| {
                        ext.downcast::<CaughtException>()
                            .map_or(Value::Null, |c| Value::str(c.kind.to_string()))
                    })
                    .build()
            })
            .clone();
        Value::External(ExternalObject::new(
            class,
            Box::new(CaughtException {
                kind,
                message: message.to_owned(),
            }),
        ))
    }

    // --- teardown ---------------------------------------------------------

    /// Clears the class registries, breaking reference cycles between class
    /// method tables, closure environments, and class values held in global
    /// bindings. Called by the owning interpreter at shutdown.
    pub fn clear_registries(&self) {
        self.class_names.write().clear();
        for class in self.classes.write().drain(..) {
            class.statics.write().clear();
            class.enum_entries.write().clear();
        }
        self.ext_fns.write().clear();
        self.ext_props.write().clear();
        self.annotation_processors.write().clear();
    }
}

/// Registration handle returned by `register_annotation_processor`.
#[derive(Debug, Clone)]
pub struct AnnotationHandle {
    runtime: Arc<Runtime>,
    name: Arc<str>,
    handler: Value,
}

impl AnnotationHandle {
    pub(crate) fn new(runtime: Arc<Runtime>, name: Arc<str>, handler: Value) -> Self {
        runtime.set_annotation_processor(name.clone(), Some(handler.clone()));
        Self { runtime, name, handler }
    }

    /// Removes the processor; classes registered afterwards skip it.
    pub fn unregister(&self) {
        self.runtime.set_annotation_processor(self.name.clone(), None);
    }

    /// Re-installs the processor after `unregister`.
    pub fn register(&self) {
        self.runtime
            .set_annotation_processor(self.name.clone(), Some(self.handler.clone()));
    }

    /// Swaps the handler in place.
    pub fn replace(&mut self, new_handler: Value) {
        self.handler = new_handler;
        self.register();
    }
}
