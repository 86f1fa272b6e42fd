//! Lexically nested binding frames.
//!
//! Each frame owns a linear, index-addressable vector of bindings plus a
//! name-to-slot side table. Slot numbers are stable for the frame's lifetime,
//! so references resolved by the pre-execution pass can bypass the name table
//! entirely with a `(depth, slot)` pair. Frames are `Arc`-shared because
//! closures capture them and child tasks may outlive the creating call.

use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::RwLock;

use crate::{
    errors::{ExcKind, RunError, RunResult},
    value::Value,
};

/// Shared handle to one environment frame.
pub type Env = Arc<EnvFrame>;

/// One binding slot. The name is duplicated here (besides the side table) so
/// `export_all` and diagnostics can walk slots directly.
#[derive(Debug, Clone)]
pub struct Binding {
    pub name: Arc<str>,
    pub value: Value,
    pub mutable: bool,
}

#[derive(Debug, Default)]
struct FrameInner {
    slots: Vec<Binding>,
    names: AHashMap<Arc<str>, u32>,
}

/// A single environment frame with an optional enclosing frame.
#[derive(Debug, Default)]
pub struct EnvFrame {
    parent: Option<Env>,
    inner: RwLock<FrameInner>,
}

impl EnvFrame {
    /// Creates a root (global) frame.
    pub fn new_global() -> Env {
        Arc::new(Self::default())
    }

    /// Creates a child frame of `parent`.
    pub fn child(parent: &Env) -> Env {
        Arc::new(Self {
            parent: Some(parent.clone()),
            inner: RwLock::default(),
        })
    }

    /// Creates a detached frame pre-seeded with the given bindings.
    ///
    /// Used by the minimal-closure path: the frame has no parent beyond
    /// `parent`, and contains exactly the captured bindings.
    pub fn with_bindings(parent: Option<Env>, bindings: Vec<Binding>) -> Env {
        let mut names = AHashMap::with_capacity(bindings.len());
        for (i, b) in bindings.iter().enumerate() {
            names.insert(b.name.clone(), i as u32);
        }
        Arc::new(Self {
            parent,
            inner: RwLock::new(FrameInner { slots: bindings, names }),
        })
    }

    pub fn parent(&self) -> Option<&Env> {
        self.parent.as_ref()
    }

    /// Inserts a new binding at the next free slot and returns the slot.
    ///
    /// Fails with `DuplicateBinding` if the name already exists in this frame,
    /// unless `allow_redefine` (REPL mode) is set, in which case the existing
    /// binding is replaced in place and keeps its slot.
    pub fn define(&self, name: impl Into<Arc<str>>, value: Value, mutable: bool, allow_redefine: bool) -> RunResult<u32> {
        let name = name.into();
        let mut inner = self.inner.write();
        if let Some(&slot) = inner.names.get(&name) {
            if !allow_redefine {
                return Err(RunError::exc(
                    ExcKind::DuplicateBinding,
                    format!("'{name}' is already defined in this scope"),
                ));
            }
            inner.slots[slot as usize] = Binding { name, value, mutable };
            return Ok(slot);
        }
        let slot = inner.slots.len() as u32;
        inner.names.insert(name.clone(), slot);
        inner.slots.push(Binding { name, value, mutable });
        Ok(slot)
    }

    pub fn define_val(&self, name: impl Into<Arc<str>>, value: Value) -> RunResult<u32> {
        self.define(name, value, false, false)
    }

    pub fn define_var(&self, name: impl Into<Arc<str>>, value: Value) -> RunResult<u32> {
        self.define(name, value, true, false)
    }

    /// Replaces or creates a binding unconditionally, preserving the slot when
    /// the name already exists.
    pub fn redefine(&self, name: impl Into<Arc<str>>, value: Value, mutable: bool) -> u32 {
        self.define(name, value, mutable, true)
            .expect("redefine cannot fail")
    }

    /// Looks up a name, walking frames outward. First match wins.
    pub fn try_get(&self, name: &str) -> Option<Value> {
        let mut frame = self;
        loop {
            {
                let inner = frame.inner.read();
                if let Some(&slot) = inner.names.get(name) {
                    return Some(inner.slots[slot as usize].value.clone());
                }
            }
            frame = frame.parent.as_deref()?;
        }
    }

    /// Assigns to an existing binding, walking frames outward.
    ///
    /// Returns `Ok(false)` when the name is not bound anywhere, and
    /// `ImmutableAssign` when the first match is a `val`.
    pub fn try_assign(&self, name: &str, value: Value) -> RunResult<bool> {
        let mut frame = self;
        loop {
            {
                let mut inner = frame.inner.write();
                if let Some(&slot) = inner.names.get(name) {
                    let binding = &mut inner.slots[slot as usize];
                    if !binding.mutable {
                        return Err(RunError::exc(
                            ExcKind::ImmutableAssign,
                            format!("'{name}' is immutable and cannot be reassigned"),
                        ));
                    }
                    binding.value = value;
                    return Ok(true);
                }
            }
            match frame.parent.as_deref() {
                Some(parent) => frame = parent,
                None => return Ok(false),
            }
        }
    }

    fn frame_at_depth(self: &Arc<Self>, depth: u16) -> &Self {
        let mut frame: &Self = self;
        for _ in 0..depth {
            frame = frame
                .parent
                .as_deref()
                .expect("resolved depth exceeds environment nesting");
        }
        frame
    }

    /// Slot-indexed read used by pre-resolved references.
    ///
    /// # Panics
    /// Panics if `depth` or `slot` is out of bounds; resolution guarantees
    /// both.
    pub fn get_at_slot(self: &Arc<Self>, depth: u16, slot: u16) -> Value {
        let frame = self.frame_at_depth(depth);
        frame.inner.read().slots[slot as usize].value.clone()
    }

    /// Slot-indexed write used by pre-resolved references.
    ///
    /// # Panics
    /// Panics if `depth` or `slot` is out of bounds.
    pub fn assign_at_slot(self: &Arc<Self>, depth: u16, slot: u16, value: Value) -> RunResult<()> {
        let frame = self.frame_at_depth(depth);
        let mut inner = frame.inner.write();
        let binding = &mut inner.slots[slot as usize];
        if !binding.mutable {
            return Err(RunError::exc(
                ExcKind::ImmutableAssign,
                format!("'{}' is immutable and cannot be reassigned", binding.name),
            ));
        }
        binding.value = value;
        Ok(())
    }

    /// Returns the immutability flag of a binding.
    pub fn is_val(&self, name: &str) -> RunResult<bool> {
        let mut frame = self;
        loop {
            {
                let inner = frame.inner.read();
                if let Some(&slot) = inner.names.get(name) {
                    return Ok(!inner.slots[slot as usize].mutable);
                }
            }
            match frame.parent.as_deref() {
                Some(parent) => frame = parent,
                None => {
                    return Err(RunError::exc(
                        ExcKind::UnknownName,
                        format!("unresolved reference: {name}"),
                    ));
                }
            }
        }
    }

    /// Copies every binding of this frame (not its parents) into `target`.
    pub fn export_all(&self, target: &Env) {
        for binding in self.inner.read().slots.iter() {
            target.redefine(binding.name.clone(), binding.value.clone(), binding.mutable);
        }
    }

    /// Snapshot of a single binding by name in this frame only.
    pub fn local_binding(&self, name: &str) -> Option<Binding> {
        let inner = self.inner.read();
        let &slot = inner.names.get(name)?;
        Some(inner.slots[slot as usize].clone())
    }

    /// Whether this exact frame binds `name`.
    pub fn has_local(&self, name: &str) -> bool {
        self.inner.read().names.contains_key(name)
    }

    /// Number of slots in this frame.
    pub fn len(&self) -> usize {
        self.inner.read().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clears every binding. Used at engine teardown to break cycles between
    /// global bindings, classes, and closure environments.
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.slots.clear();
        inner.names.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn define_then_get_roundtrips() {
        let env = EnvFrame::new_global();
        env.define_val("x", Value::Int(42)).unwrap();
        assert!(env.try_get("x").unwrap().equals(&Value::Int(42)));
        assert!(env.try_get("y").is_none());
    }

    #[test]
    fn duplicate_define_fails_outside_repl() {
        let env = EnvFrame::new_global();
        env.define_val("x", Value::Int(1)).unwrap();
        let err = env.define_val("x", Value::Int(2)).unwrap_err();
        assert_eq!(err.kind(), ExcKind::DuplicateBinding);
    }

    #[test]
    fn redefine_preserves_slot() {
        let env = EnvFrame::new_global();
        let first = env.define_var("x", Value::Int(1)).unwrap();
        env.define_val("y", Value::Int(2)).unwrap();
        let again = env.redefine("x", Value::str("now a string"), false);
        assert_eq!(first, again);
        assert!(env.is_val("x").unwrap());
    }

    #[test]
    fn lookup_walks_outward_first_match_wins() {
        let global = EnvFrame::new_global();
        global.define_var("x", Value::Int(1)).unwrap();
        let child = EnvFrame::child(&global);
        child.define_val("x", Value::Int(2)).unwrap();
        assert!(child.try_get("x").unwrap().equals(&Value::Int(2)));
        assert!(global.try_get("x").unwrap().equals(&Value::Int(1)));
    }

    #[test]
    fn assign_respects_mutability() {
        let env = EnvFrame::new_global();
        env.define_val("k", Value::Int(1)).unwrap();
        let err = env.try_assign("k", Value::Int(2)).unwrap_err();
        assert_eq!(err.kind(), ExcKind::ImmutableAssign);
        assert!(!env.try_assign("missing", Value::Int(0)).unwrap());
    }

    #[test]
    fn slot_access_across_depth() {
        let global = EnvFrame::new_global();
        let slot = global.define_var("x", Value::Int(10)).unwrap();
        let child = EnvFrame::child(&global);
        assert!(child.get_at_slot(1, slot as u16).equals(&Value::Int(10)));
        child.assign_at_slot(1, slot as u16, Value::Int(20)).unwrap();
        assert!(global.try_get("x").unwrap().equals(&Value::Int(20)));
    }

    #[test]
    fn export_all_copies_frame_bindings() {
        let src = EnvFrame::new_global();
        src.define_val("a", Value::Int(1)).unwrap();
        src.define_var("b", Value::Int(2)).unwrap();
        let dst = EnvFrame::new_global();
        src.export_all(&dst);
        assert!(dst.try_get("a").is_some());
        assert!(!dst.is_val("b").unwrap());
    }
}
