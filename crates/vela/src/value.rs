use std::{
    borrow::Cow,
    fmt::Write as _,
    hash::{Hash, Hasher},
    sync::Arc,
};

use indexmap::IndexMap;
use parking_lot::RwLock;
use strum::{Display, EnumString, IntoStaticStr};

use crate::{
    concurrent::{AtomicKind, AtomicValue, ChannelValue, FutureValue, MutexValue, ScopeValue, TimerTask},
    errors::{RunError, RunResult},
    foreign::{ExternalObject, ForeignClass},
    types::{ArrayValue, BoundMethod, Callable, ClassValue, EnumEntry, IterValue, Range, ResultValue},
};

/// Shared mutable list storage. Insertion order is the element order.
pub type ListRef = Arc<RwLock<Vec<Value>>>;

/// Shared mutable map storage. Keys compare by value equality and the map
/// preserves insertion order.
pub type MapRef = Arc<RwLock<IndexMap<Value, Value>>>;

/// An immutable `(first, second)` pair.
#[derive(Debug, Clone)]
pub struct Pair {
    pub first: Value,
    pub second: Value,
}

/// Singleton namespace values with no behavior of their own.
///
/// These exist so member access can hang off a plain marker instead of a
/// full object: `Dispatchers.IO`, the foreign-interop namespace, etc.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Marker {
    /// The `Dispatchers` namespace exposing `IO`/`Default`/`Unconfined`.
    Dispatchers,
    DispatcherIo,
    DispatcherDefault,
    DispatcherUnconfined,
    /// The foreign-interop namespace (`type`, `static`, `field`, `new`,
    /// `isInstance`, `class`).
    Interop,
}

impl Marker {
    pub fn name(self) -> &'static str {
        match self {
            Self::Dispatchers => "Dispatchers",
            Self::DispatcherIo => "Dispatchers.IO",
            Self::DispatcherDefault => "Dispatchers.Default",
            Self::DispatcherUnconfined => "Dispatchers.Unconfined",
            Self::Interop => "Interop",
        }
    }
}

/// Language-internal type tags, used for `typeof`, type checks, and as the
/// key space of the stdlib extension table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
pub enum TypeTag {
    Int,
    Long,
    Double,
    Bool,
    Char,
    #[strum(serialize = "String")]
    Str,
    Unit,
    Null,
    List,
    Map,
    Range,
    Pair,
    Array,
    Object,
    Class,
    EnumEntry,
    Function,
    BoundMethod,
    External,
    ForeignClass,
    Result,
    Iterator,
    Scope,
    Deferred,
    Job,
    Task,
    Future,
    Channel,
    Mutex,
    AtomicInt,
    AtomicLong,
    AtomicRef,
    Marker,
}

/// Primary runtime value.
///
/// Small immediate values are stored inline; containers, objects, and handles
/// are `Arc`-shared so they can cross task boundaries. Cloning a `Value` is
/// always cheap (a tag copy or an `Arc` bump), which is why `Clone` is derived
/// here unlike in arena-based designs.
///
/// NOTE: keep this enum small; it is copied into every register and binding.
#[derive(Debug, Clone)]
pub enum Value {
    Unit,
    Null,
    Bool(bool),
    Int(i64),
    Long(i64),
    Double(f64),
    Char(char),
    Str(Arc<str>),
    List(ListRef),
    Map(MapRef),
    Range(Range),
    Pair(Arc<Pair>),
    Array(Arc<ArrayValue>),
    Object(Arc<crate::types::ObjectValue>),
    Class(Arc<ClassValue>),
    EnumEntry(Arc<EnumEntry>),
    /// Any callable: closure, MIR function, builtin, native, partial.
    Func(Callable),
    Bound(Arc<BoundMethod>),
    External(Arc<ExternalObject>),
    ForeignClass(Arc<ForeignClass>),
    Result(Arc<ResultValue>),
    Iter(Arc<IterValue>),
    Scope(Arc<ScopeValue>),
    Deferred(Arc<FutureValue>),
    Job(Arc<FutureValue>),
    Task(Arc<TimerTask>),
    Future(Arc<FutureValue>),
    Channel(Arc<ChannelValue>),
    Mutex(Arc<MutexValue>),
    Atomic(Arc<AtomicValue>),
    Marker(Marker),
    /// Sentinel: the true integer lives in the frame's `raw_locals` at the
    /// same index. Never escapes a MIR frame; boxing is deferred until the
    /// register is read by anything that needs a real value.
    RawInt,
}

/// Depth cap for structural equality/hash/render over nested data.
///
/// Protects against stack overflow on adversarially deep or cyclic
/// structures; beyond the cap, containers fall back to identity.
const MAX_DATA_DEPTH: u32 = 64;

impl Value {
    pub fn str(s: impl Into<Arc<str>>) -> Self {
        Self::Str(s.into())
    }

    pub fn list_of(items: Vec<Self>) -> Self {
        Self::List(Arc::new(RwLock::new(items)))
    }

    pub fn map_new() -> Self {
        Self::Map(Arc::new(RwLock::new(IndexMap::new())))
    }

    pub fn pair(first: Self, second: Self) -> Self {
        Self::Pair(Arc::new(Pair { first, second }))
    }

    pub fn result_ok(v: Self) -> Self {
        Self::Result(Arc::new(ResultValue::Ok(v)))
    }

    pub fn result_err(e: Self) -> Self {
        Self::Result(Arc::new(ResultValue::Err(e)))
    }

    pub fn type_tag(&self) -> TypeTag {
        match self {
            Self::Unit => TypeTag::Unit,
            Self::Null => TypeTag::Null,
            Self::Bool(_) => TypeTag::Bool,
            Self::Int(_) => TypeTag::Int,
            Self::Long(_) => TypeTag::Long,
            Self::Double(_) => TypeTag::Double,
            Self::Char(_) => TypeTag::Char,
            Self::Str(_) => TypeTag::Str,
            Self::List(_) => TypeTag::List,
            Self::Map(_) => TypeTag::Map,
            Self::Range(_) => TypeTag::Range,
            Self::Pair(_) => TypeTag::Pair,
            Self::Array(_) => TypeTag::Array,
            Self::Object(_) => TypeTag::Object,
            Self::Class(_) => TypeTag::Class,
            Self::EnumEntry(_) => TypeTag::EnumEntry,
            Self::Func(_) => TypeTag::Function,
            Self::Bound(_) => TypeTag::BoundMethod,
            Self::External(_) => TypeTag::External,
            Self::ForeignClass(_) => TypeTag::ForeignClass,
            Self::Result(_) => TypeTag::Result,
            Self::Iter(_) => TypeTag::Iterator,
            Self::Scope(_) => TypeTag::Scope,
            Self::Deferred(_) => TypeTag::Deferred,
            Self::Job(_) => TypeTag::Job,
            Self::Task(_) => TypeTag::Task,
            Self::Future(_) => TypeTag::Future,
            Self::Channel(_) => TypeTag::Channel,
            Self::Mutex(_) => TypeTag::Mutex,
            Self::Atomic(a) => match a.kind() {
                AtomicKind::Int => TypeTag::AtomicInt,
                AtomicKind::Long => TypeTag::AtomicLong,
                AtomicKind::Ref => TypeTag::AtomicRef,
            },
            Self::Marker(_) => TypeTag::Marker,
            Self::RawInt => panic!("RawInt marker escaped a MIR frame"),
        }
    }

    /// User-visible type name; objects report their class name.
    pub fn type_name(&self) -> Cow<'static, str> {
        match self {
            Self::Object(obj) => Cow::Owned(obj.class.name.to_string()),
            Self::EnumEntry(entry) => Cow::Owned(entry.owner_name.to_string()),
            Self::External(ext) => Cow::Owned(ext.class.name.to_string()),
            other => Cow::Borrowed(other.type_tag().into()),
        }
    }

    /// `Null` and `Unit` are the only non-truthy non-Bool values.
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Bool(b) => *b,
            Self::Null | Self::Unit => false,
            _ => true,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn is_callable(&self) -> bool {
        match self {
            Self::Func(_) | Self::Bound(_) => true,
            // Classes and foreign classes are constructible, hence callable.
            Self::Class(c) => !c.constructors.is_empty() || c.kind == crate::types::ClassKind::Class,
            Self::ForeignClass(_) => true,
            _ => false,
        }
    }

    /// Numeric view for mixed-type arithmetic, if this is a number.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) | Self::Long(i) => Some(*i as f64),
            Self::Double(d) => Some(*d),
            _ => None,
        }
    }

    /// Integer view of `Int`/`Long`.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) | Self::Long(i) => Some(*i),
            _ => None,
        }
    }

    /// Index operand: requires `Int`/`Long`.
    pub fn as_index(&self) -> RunResult<i64> {
        self.as_int()
            .ok_or_else(|| RunError::type_mismatch(format!("index must be Int, got {}", self.type_name())))
    }

    /// Reference equality: identity for shared values, bit equality for
    /// immediates.
    pub fn ref_equals(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Unit, Self::Unit) | (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) | (Self::Long(a), Self::Long(b)) => a == b,
            (Self::Double(a), Self::Double(b)) => a.to_bits() == b.to_bits(),
            (Self::Char(a), Self::Char(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => Arc::ptr_eq(a, b),
            (Self::List(a), Self::List(b)) => Arc::ptr_eq(a, b),
            (Self::Map(a), Self::Map(b)) => Arc::ptr_eq(a, b),
            (Self::Range(a), Self::Range(b)) => a == b,
            (Self::Pair(a), Self::Pair(b)) => Arc::ptr_eq(a, b),
            (Self::Array(a), Self::Array(b)) => Arc::ptr_eq(a, b),
            (Self::Object(a), Self::Object(b)) => Arc::ptr_eq(a, b),
            (Self::Class(a), Self::Class(b)) => Arc::ptr_eq(a, b),
            (Self::EnumEntry(a), Self::EnumEntry(b)) => Arc::ptr_eq(a, b),
            (Self::External(a), Self::External(b)) => Arc::ptr_eq(a, b),
            (Self::ForeignClass(a), Self::ForeignClass(b)) => Arc::ptr_eq(a, b),
            (Self::Result(a), Self::Result(b)) => Arc::ptr_eq(a, b),
            (Self::Channel(a), Self::Channel(b)) => Arc::ptr_eq(a, b),
            (Self::Mutex(a), Self::Mutex(b)) => Arc::ptr_eq(a, b),
            (Self::Atomic(a), Self::Atomic(b)) => Arc::ptr_eq(a, b),
            (Self::Marker(a), Self::Marker(b)) => a == b,
            _ => false,
        }
    }

    /// Value equality.
    ///
    /// Numbers compare across the integer family and against `Double`;
    /// strings, containers, pairs, and ranges compare structurally; data-class
    /// objects compare field-wise; everything else falls back to identity.
    /// `NaN` equals itself so equality stays reflexive for map keys.
    pub fn equals(&self, other: &Self) -> bool {
        self.equals_depth(other, 0)
    }

    fn equals_depth(&self, other: &Self, depth: u32) -> bool {
        if depth > MAX_DATA_DEPTH {
            return self.ref_equals(other);
        }
        match (self, other) {
            (Self::Int(a) | Self::Long(a), Self::Int(b) | Self::Long(b)) => a == b,
            (Self::Double(a), Self::Double(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Self::Int(a) | Self::Long(a), Self::Double(b)) | (Self::Double(b), Self::Int(a) | Self::Long(a)) => {
                (*a as f64) == *b
            }
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Char(a), Self::Char(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Unit, Self::Unit) | (Self::Null, Self::Null) => true,
            (Self::Range(a), Self::Range(b)) => a == b,
            (Self::Pair(a), Self::Pair(b)) => {
                a.first.equals_depth(&b.first, depth + 1) && a.second.equals_depth(&b.second, depth + 1)
            }
            (Self::List(a), Self::List(b)) => {
                if Arc::ptr_eq(a, b) {
                    return true;
                }
                let (a, b) = (a.read(), b.read());
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.equals_depth(y, depth + 1))
            }
            (Self::Map(a), Self::Map(b)) => {
                if Arc::ptr_eq(a, b) {
                    return true;
                }
                let (a, b) = (a.read(), b.read());
                a.len() == b.len()
                    && a.iter()
                        .all(|(k, v)| b.get(k).is_some_and(|bv| v.equals_depth(bv, depth + 1)))
            }
            (Self::Array(a), Self::Array(b)) => {
                if Arc::ptr_eq(a, b) {
                    return true;
                }
                a.elem_type() == b.elem_type()
                    && a.len() == b.len()
                    && a.to_values()
                        .iter()
                        .zip(b.to_values().iter())
                        .all(|(x, y)| x.equals_depth(y, depth + 1))
            }
            (Self::Object(a), Self::Object(b)) => {
                if Arc::ptr_eq(a, b) {
                    return true;
                }
                // Data classes compare field-wise; everything else is identity.
                if !Arc::ptr_eq(&a.class, &b.class) || !a.class.is_data {
                    return false;
                }
                let av = a.data_field_values();
                let bv = b.data_field_values();
                av.len() == bv.len()
                    && av
                        .iter()
                        .zip(bv.iter())
                        .all(|((_, x), (_, y))| x.equals_depth(y, depth + 1))
            }
            (Self::EnumEntry(a), Self::EnumEntry(b)) => Arc::ptr_eq(a, b),
            (Self::Result(a), Self::Result(b)) => match (&**a, &**b) {
                (ResultValue::Ok(x), ResultValue::Ok(y)) | (ResultValue::Err(x), ResultValue::Err(y)) => {
                    x.equals_depth(y, depth + 1)
                }
                _ => false,
            },
            _ => self.ref_equals(other),
        }
    }

    /// Plain rendering without invoking user `toString` overrides.
    ///
    /// The interpreter's `display_value` wraps this to honor user overrides
    /// on objects; everything the engine renders internally goes through here.
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.render_into(&mut out, 0);
        out
    }

    fn render_into(&self, out: &mut String, depth: u32) {
        if depth > MAX_DATA_DEPTH {
            out.push('…');
            return;
        }
        match self {
            Self::Unit => out.push_str("Unit"),
            Self::Null => out.push_str("null"),
            Self::Bool(b) => {
                let _ = write!(out, "{b}");
            }
            Self::Int(i) | Self::Long(i) => {
                let _ = write!(out, "{i}");
            }
            Self::Double(d) => {
                if d.is_finite() {
                    out.push_str(ryu::Buffer::new().format(*d));
                } else {
                    let _ = write!(out, "{d}");
                }
            }
            Self::Char(c) => out.push(*c),
            Self::Str(s) => out.push_str(s),
            Self::Range(r) => {
                let _ = write!(out, "{r}");
            }
            Self::Pair(p) => {
                out.push('(');
                p.first.render_into(out, depth + 1);
                out.push_str(", ");
                p.second.render_into(out, depth + 1);
                out.push(')');
            }
            Self::List(list) => {
                out.push('[');
                for (i, item) in list.read().iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    item.render_into(out, depth + 1);
                }
                out.push(']');
            }
            Self::Map(map) => {
                out.push('{');
                for (i, (k, v)) in map.read().iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    k.render_into(out, depth + 1);
                    out.push('=');
                    v.render_into(out, depth + 1);
                }
                out.push('}');
            }
            Self::Array(arr) => {
                out.push('[');
                for (i, item) in arr.to_values().iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    item.render_into(out, depth + 1);
                }
                out.push(']');
            }
            Self::Object(obj) => {
                if obj.class.is_data {
                    out.push_str(&obj.class.name);
                    out.push('(');
                    for (i, (name, value)) in obj.data_field_values().iter().enumerate() {
                        if i > 0 {
                            out.push_str(", ");
                        }
                        let _ = write!(out, "{name}=");
                        value.render_into(out, depth + 1);
                    }
                    out.push(')');
                } else {
                    let _ = write!(out, "{}@{:x}", obj.class.name, Arc::as_ptr(obj) as usize);
                }
            }
            Self::Class(c) => {
                let _ = write!(out, "class {}", c.name);
            }
            Self::EnumEntry(e) => out.push_str(&e.name),
            Self::Func(c) => {
                let _ = write!(out, "fun {}", c.name());
            }
            Self::Bound(b) => {
                if let Self::Func(c) = &b.callable {
                    let _ = write!(out, "fun {}", c.name());
                } else {
                    out.push_str("fun <bound>");
                }
            }
            Self::External(ext) => {
                let _ = write!(out, "{}@{:x}", ext.class.name, Arc::as_ptr(ext) as usize);
            }
            Self::ForeignClass(fc) => {
                let _ = write!(out, "foreign class {}", fc.name);
            }
            Self::Result(r) => match &**r {
                ResultValue::Ok(v) => {
                    out.push_str("Ok(");
                    v.render_into(out, depth + 1);
                    out.push(')');
                }
                ResultValue::Err(e) => {
                    out.push_str("Err(");
                    e.render_into(out, depth + 1);
                    out.push(')');
                }
            },
            Self::Marker(m) => out.push_str(m.name()),
            other => out.push_str(&other.type_name()),
        }
    }

    /// Converts a host-side value to an engine value.
    ///
    /// Identity is preserved for inputs that are already engine values: the
    /// `Foreign::Value` arm passes the shared handle through untouched.
    pub fn from_foreign(foreign: Foreign) -> Self {
        match foreign {
            Foreign::Unit => Self::Unit,
            Foreign::Null => Self::Null,
            Foreign::Bool(b) => Self::Bool(b),
            Foreign::Int(i) => Self::Int(i),
            Foreign::Long(i) => Self::Long(i),
            Foreign::Double(d) => Self::Double(d),
            Foreign::Char(c) => Self::Char(c),
            Foreign::Str(s) => Self::Str(Arc::from(s)),
            Foreign::Value(v) => v,
        }
    }

    /// Converts an engine value to the host boundary representation.
    ///
    /// Primitive tags map to their host forms; shared values (objects, pairs,
    /// containers, handles) cross as `Foreign::Value` so their identity
    /// survives the round trip.
    pub fn to_foreign(&self) -> Foreign {
        match self {
            Self::Unit => Foreign::Unit,
            Self::Null => Foreign::Null,
            Self::Bool(b) => Foreign::Bool(*b),
            Self::Int(i) => Foreign::Int(*i),
            Self::Long(i) => Foreign::Long(*i),
            Self::Double(d) => Foreign::Double(*d),
            Self::Char(c) => Foreign::Char(*c),
            Self::Str(s) => Foreign::Str(s.to_string()),
            other => Foreign::Value(other.clone()),
        }
    }
}

/// Host-boundary representation used by [`Value::from_foreign`] /
/// [`Value::to_foreign`].
#[derive(Debug, Clone)]
pub enum Foreign {
    Unit,
    Null,
    Bool(bool),
    Int(i64),
    Long(i64),
    Double(f64),
    Char(char),
    Str(String),
    /// An engine value crossing the boundary with identity preserved.
    Value(Value),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.equals(other)
    }
}

// NaN equals itself in `equals`, so equality is reflexive.
impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.hash_depth(state, 0);
    }
}

impl Value {
    fn hash_depth<H: Hasher>(&self, state: &mut H, depth: u32) {
        if depth > MAX_DATA_DEPTH {
            return;
        }
        match self {
            // The whole numeric family hashes as i64 when integral so that
            // Int(3), Long(3), and Double(3.0) collide as map keys, matching
            // cross-type equality.
            Self::Int(i) | Self::Long(i) => state.write_i64(*i),
            Self::Double(d) => {
                if d.fract() == 0.0 && d.is_finite() && (*d >= i64::MIN as f64) && (*d <= i64::MAX as f64) {
                    state.write_i64(*d as i64);
                } else {
                    state.write_u64(d.to_bits());
                }
            }
            Self::Bool(b) => state.write_u8(u8::from(*b) | 0x10),
            Self::Char(c) => state.write_u32(*c as u32),
            Self::Str(s) => s.hash(state),
            Self::Unit => state.write_u8(0x20),
            Self::Null => state.write_u8(0x21),
            Self::Range(r) => {
                state.write_i64(r.start);
                state.write_i64(r.end);
                state.write_u8(u8::from(r.inclusive));
            }
            Self::Pair(p) => {
                p.first.hash_depth(state, depth + 1);
                p.second.hash_depth(state, depth + 1);
            }
            Self::List(list) => {
                for item in list.read().iter() {
                    item.hash_depth(state, depth + 1);
                }
            }
            Self::EnumEntry(e) => {
                e.owner_name.hash(state);
                e.name.hash(state);
            }
            Self::Object(obj) => {
                if obj.class.is_data {
                    for (_, v) in obj.data_field_values() {
                        v.hash_depth(state, depth + 1);
                    }
                } else {
                    state.write_usize(Arc::as_ptr(obj) as usize);
                }
            }
            // Identity-keyed kinds hash their pointer.
            Self::Map(m) => state.write_usize(Arc::as_ptr(m) as usize),
            Self::Array(a) => state.write_usize(Arc::as_ptr(a) as usize),
            Self::Class(c) => state.write_usize(Arc::as_ptr(c) as usize),
            Self::External(e) => state.write_usize(Arc::as_ptr(e) as usize),
            other => std::mem::discriminant(other).hash(state),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthiness_matches_spec() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::Unit.is_truthy());
        assert!(!Value::Bool(false).is_truthy());
        assert!(Value::Bool(true).is_truthy());
        assert!(Value::Int(0).is_truthy());
        assert!(Value::str("").is_truthy());
    }

    #[test]
    fn equality_is_symmetric_across_numeric_tags() {
        let cases = [
            (Value::Int(3), Value::Long(3)),
            (Value::Int(3), Value::Double(3.0)),
            (Value::Double(f64::NAN), Value::Double(f64::NAN)),
            (Value::str("a"), Value::str("a")),
        ];
        for (a, b) in cases {
            assert!(a.equals(&b), "{a:?} == {b:?}");
            assert!(b.equals(&a), "{b:?} == {a:?}");
        }
    }

    #[test]
    fn list_equality_is_structural() {
        let a = Value::list_of(vec![Value::Int(1), Value::str("x")]);
        let b = Value::list_of(vec![Value::Int(1), Value::str("x")]);
        assert!(a.equals(&b));
        assert!(!a.ref_equals(&b));
        assert!(a.ref_equals(&a.clone()));
    }

    #[test]
    fn foreign_roundtrip_preserves_primitives_and_identity() {
        for v in [Value::Int(7), Value::Double(1.5), Value::Bool(true), Value::str("hi")] {
            assert!(Value::from_foreign(v.to_foreign()).equals(&v));
        }
        let list = Value::list_of(vec![Value::Int(1)]);
        let roundtripped = Value::from_foreign(list.to_foreign());
        assert!(list.ref_equals(&roundtripped));
    }

    #[test]
    fn map_keys_use_value_equality() {
        let map = Value::map_new();
        if let Value::Map(m) = &map {
            m.write().insert(Value::str("k"), Value::Int(1));
            assert!(m.read().contains_key(&Value::str("k")));
            m.write().insert(Value::Int(2), Value::str("two"));
            // Long(2) and Double(2.0) hit the same entry as Int(2)
            assert!(m.read().contains_key(&Value::Long(2)));
            assert!(m.read().contains_key(&Value::Double(2.0)));
        } else {
            unreachable!();
        }
    }

    #[test]
    fn render_basics() {
        assert_eq!(Value::Null.render(), "null");
        assert_eq!(Value::Double(3.0).render(), "3.0");
        assert_eq!(Value::pair(Value::Int(1), Value::str("a")).render(), "(1, a)");
        assert_eq!(
            Value::list_of(vec![Value::Int(1), Value::Int(2)]).render(),
            "[1, 2]"
        );
        assert_eq!(Value::Range(Range::new(1, 5, true)).render(), "1..=5");
    }
}
