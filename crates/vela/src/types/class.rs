use std::sync::{Arc, OnceLock, Weak};

use ahash::AHashMap;
use parking_lot::RwLock;

use crate::{
    errors::{ExcKind, RunError, RunResult},
    foreign::ForeignClass,
    types::{EnumEntry, func::Callable},
    value::Value,
};

/// Stable identifier of a registered class within one runtime.
///
/// Inline caches key on this instead of comparing `Arc` pointers so a cache
/// entry stays a plain integer compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(u32);

impl ClassId {
    pub fn new(index: usize) -> Self {
        Self(index.try_into().expect("class id overflow"))
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// What kind of declaration produced a class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassKind {
    Class,
    Interface,
    Enum,
    /// `object` declaration: a singleton whose instance lives in the
    /// `INSTANCE` static field, created lazily by static dispatch.
    Singleton,
    Annotation,
}

/// Member visibility. `Internal` behaves like public within one runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Visibility {
    #[default]
    Public,
    Internal,
    Protected,
    Private,
}

/// One declared instance field. The slot index is implied by declaration
/// order within the owning class's layout segment.
#[derive(Debug, Clone)]
pub struct FieldDef {
    pub name: Arc<str>,
    pub mutable: bool,
    pub visibility: Visibility,
}

/// A declared method or custom getter.
#[derive(Debug, Clone)]
pub struct MethodDef {
    pub name: Arc<str>,
    pub callable: Callable,
    pub visibility: Visibility,
    pub is_static: bool,
    pub is_abstract: bool,
    /// Interface method with a body, dispatched after superclass methods.
    pub is_default: bool,
}

/// One parameter of a constructor.
#[derive(Debug, Clone)]
pub struct ParamDef {
    pub name: Arc<str>,
    pub has_default: bool,
}

/// A constructor, selected by arity at the call site.
#[derive(Debug, Clone)]
pub struct ConstructorDef {
    pub params: Vec<ParamDef>,
    pub callable: Callable,
    pub visibility: Visibility,
}

impl ConstructorDef {
    /// Whether `argc` positional arguments can bind to this constructor.
    pub fn accepts(&self, argc: usize) -> bool {
        let required = self.params.iter().filter(|p| !p.has_default).count();
        argc >= required && argc <= self.params.len()
    }
}

/// Cached reflection info served via the `annotations` / member listing
/// surface on class values. Computed once per class.
#[derive(Debug, Clone)]
pub struct ReflectInfo {
    pub annotations: Vec<Arc<str>>,
    pub members: Vec<Arc<str>>,
}

/// A runtime class.
///
/// Classes are registered before any body executes and are read-mostly
/// afterwards; only `statics` and `enum_entries` keep interior mutability
/// (lazy singleton instances, enum entry installation, static writes).
#[derive(Debug)]
pub struct ClassValue {
    pub id: ClassId,
    pub name: Arc<str>,
    pub superclass: Option<Arc<ClassValue>>,
    pub interfaces: Vec<Arc<ClassValue>>,
    pub kind: ClassKind,
    pub is_abstract: bool,
    pub is_sealed: bool,
    pub is_data: bool,
    /// Fields declared by this class itself; inherited fields precede them in
    /// the instance layout.
    pub fields: Vec<FieldDef>,
    pub methods: AHashMap<Arc<str>, MethodDef>,
    /// Custom property getters, invoked on member access.
    pub getters: AHashMap<Arc<str>, MethodDef>,
    pub constructors: Vec<ConstructorDef>,
    pub statics: RwLock<AHashMap<Arc<str>, Value>>,
    /// Primary-constructor parameter order; drives data-class synthesis
    /// (`copy`, `componentN`, field-wise equality, rendering).
    pub data_fields: Vec<Arc<str>>,
    pub annotations: Vec<Arc<str>>,
    /// Entries of an enum class, in declaration order.
    pub enum_entries: RwLock<Vec<Arc<EnumEntry>>>,
    /// Foreign superclass for classes extending a host class.
    pub foreign_super: Option<Arc<ForeignClass>>,
    reflect: OnceLock<ReflectInfo>,
}

impl ClassValue {
    /// Total instance layout size: inherited segments plus own fields.
    pub fn layout_size(&self) -> usize {
        self.field_offset() + self.fields.len()
    }

    /// Offset of this class's own field segment in the instance layout.
    pub fn field_offset(&self) -> usize {
        self.superclass.as_ref().map_or(0, |s| s.layout_size())
    }

    /// Resolves a field name to its layout slot, walking superclasses.
    ///
    /// Own fields shadow inherited ones of the same name.
    pub fn field_slot(&self, name: &str) -> Option<(usize, &FieldDef)> {
        if let Some(pos) = self.fields.iter().position(|f| &*f.name == name) {
            return Some((self.field_offset() + pos, &self.fields[pos]));
        }
        self.superclass.as_ref().and_then(|s| s.field_slot(name))
    }

    /// Looks up an instance method: own table, then superclasses, then
    /// interface default methods (breadth-last so class methods win).
    pub fn find_method(&self, name: &str) -> Option<&MethodDef> {
        let mut class = Some(self);
        while let Some(c) = class {
            if let Some(m) = c.methods.get(name) {
                return Some(m);
            }
            class = c.superclass.as_deref();
        }
        self.find_interface_default(name)
    }

    fn find_interface_default(&self, name: &str) -> Option<&MethodDef> {
        let mut class = Some(self);
        while let Some(c) = class {
            for iface in &c.interfaces {
                if let Some(m) = iface.methods.get(name).filter(|m| m.is_default || !m.is_abstract) {
                    return Some(m);
                }
                if let Some(m) = iface.find_interface_default(name) {
                    return Some(m);
                }
            }
            class = c.superclass.as_deref();
        }
        None
    }

    /// Looks up a custom getter, walking superclasses.
    pub fn find_getter(&self, name: &str) -> Option<&MethodDef> {
        let mut class = Some(self);
        while let Some(c) = class {
            if let Some(g) = c.getters.get(name) {
                return Some(g);
            }
            class = c.superclass.as_deref();
        }
        None
    }

    /// Selects a constructor by positional arity.
    pub fn find_constructor(&self, argc: usize) -> Option<&ConstructorDef> {
        self.constructors.iter().find(|c| c.accepts(argc))
    }

    /// Language-level subtype test by class name, including interfaces.
    ///
    /// Every class is a subtype of `Any`.
    pub fn is_subtype_of(&self, type_name: &str) -> bool {
        if type_name == "Any" || &*self.name == type_name {
            return true;
        }
        if self.interfaces.iter().any(|i| i.is_subtype_of(type_name)) {
            return true;
        }
        self.superclass.as_ref().is_some_and(|s| s.is_subtype_of(type_name))
    }

    /// Cached reflection info, computed on first access.
    pub fn reflect(&self) -> &ReflectInfo {
        self.reflect.get_or_init(|| {
            let mut members: Vec<Arc<str>> = self.fields.iter().map(|f| f.name.clone()).collect();
            members.extend(self.methods.keys().cloned());
            members.extend(self.getters.keys().cloned());
            ReflectInfo {
                annotations: self.annotations.clone(),
                members,
            }
        })
    }

    /// Finds an enum entry by name.
    pub fn enum_entry(&self, name: &str) -> Option<Arc<EnumEntry>> {
        self.enum_entries.read().iter().find(|e| &*e.name == name).cloned()
    }
}

/// Builder-ish constructor used by both module-registration paths.
impl ClassValue {
    #[expect(clippy::too_many_arguments, reason = "registration funnels every class property through here")]
    pub fn new(
        id: ClassId,
        name: Arc<str>,
        superclass: Option<Arc<ClassValue>>,
        interfaces: Vec<Arc<ClassValue>>,
        kind: ClassKind,
        is_abstract: bool,
        is_sealed: bool,
        is_data: bool,
    ) -> Self {
        Self {
            id,
            name,
            superclass,
            interfaces,
            kind,
            is_abstract,
            is_sealed,
            is_data,
            fields: Vec::new(),
            methods: AHashMap::new(),
            getters: AHashMap::new(),
            constructors: Vec::new(),
            statics: RwLock::new(AHashMap::new()),
            data_fields: Vec::new(),
            annotations: Vec::new(),
            enum_entries: RwLock::new(Vec::new()),
            foreign_super: None,
            reflect: OnceLock::new(),
        }
    }
}

/// Checks member visibility from the calling class's perspective.
///
/// `caller` is the class whose method body is executing, if any; module-level
/// code has no caller class and sees only public/internal members.
pub fn check_visibility(
    visibility: Visibility,
    owner: &Arc<ClassValue>,
    caller: Option<&Arc<ClassValue>>,
    member: &str,
) -> RunResult<()> {
    let allowed = match visibility {
        Visibility::Public | Visibility::Internal => true,
        Visibility::Private => caller.is_some_and(|c| c.id == owner.id),
        Visibility::Protected => caller.is_some_and(|c| c.is_subtype_of(&owner.name)),
    };
    if allowed {
        Ok(())
    } else {
        let vis_name = match visibility {
            Visibility::Public => "public",
            Visibility::Internal => "internal",
            Visibility::Protected => "protected",
            Visibility::Private => "private",
        };
        Err(RunError::exc(
            ExcKind::MemberNotAccessible,
            format!("'{member}' is {vis_name} in '{}'", owner.name),
        ))
    }
}

/// An instance of a runtime class.
///
/// Fields are indexed by the class's layout; `external` holds the foreign
/// delegate for classes extending a host class, installed at construction.
#[derive(Debug)]
pub struct ObjectValue {
    pub class: Arc<ClassValue>,
    pub fields: RwLock<Vec<Value>>,
    pub external: OnceLock<Value>,
}

impl ObjectValue {
    /// Allocates an instance with every field slot set to `Null`.
    pub fn new(class: Arc<ClassValue>) -> Self {
        let fields = vec![Value::Null; class.layout_size()];
        Self {
            class,
            fields: RwLock::new(fields),
            external: OnceLock::new(),
        }
    }

    pub fn get_field(&self, slot: usize) -> Value {
        self.fields.read()[slot].clone()
    }

    pub fn set_field(&self, slot: usize, value: Value) {
        self.fields.write()[slot] = value;
    }

    /// Field values in data-class declaration order.
    pub fn data_field_values(&self) -> Vec<(Arc<str>, Value)> {
        self.class
            .data_fields
            .iter()
            .filter_map(|name| {
                self.class
                    .field_slot(name)
                    .map(|(slot, _)| (name.clone(), self.get_field(slot)))
            })
            .collect()
    }
}

/// Weak back-reference used by enum entries so the entry/class pair doesn't
/// form an `Arc` cycle.
pub type ClassRef = Weak<ClassValue>;
