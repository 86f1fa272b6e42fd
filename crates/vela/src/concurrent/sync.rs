use std::sync::atomic::{AtomicI64, Ordering};

use parking_lot::{Mutex, ReentrantMutex};

use crate::value::Value;

/// The language `Mutex` value. Reentrant: a thread may re-acquire a lock it
/// already holds, so nested `withLock` on the same mutex cannot self-deadlock.
#[derive(Debug, Default)]
pub struct MutexValue {
    lock: ReentrantMutex<()>,
}

impl MutexValue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `body` while holding the lock; the guard releases on every exit
    /// path, including error returns.
    pub fn with_lock<T>(&self, body: impl FnOnce() -> T) -> T {
        let _guard = self.lock.lock();
        body()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AtomicKind {
    Int,
    Long,
    Ref,
}

/// Integer, Long, and Reference atomics.
///
/// Int and Long share an `AtomicI64` cell (the engine's integer family is
/// 64-bit with distinct tags); Ref holds an arbitrary value behind a lock and
/// compares by reference equality for `compareAndSet`.
#[derive(Debug)]
pub struct AtomicValue {
    repr: AtomicRepr,
}

#[derive(Debug)]
enum AtomicRepr {
    Int(AtomicI64),
    Long(AtomicI64),
    Ref(Mutex<Value>),
}

impl AtomicValue {
    pub fn new_int(initial: i64) -> Self {
        Self {
            repr: AtomicRepr::Int(AtomicI64::new(initial)),
        }
    }

    pub fn new_long(initial: i64) -> Self {
        Self {
            repr: AtomicRepr::Long(AtomicI64::new(initial)),
        }
    }

    pub fn new_ref(initial: Value) -> Self {
        Self {
            repr: AtomicRepr::Ref(Mutex::new(initial)),
        }
    }

    pub fn kind(&self) -> AtomicKind {
        match &self.repr {
            AtomicRepr::Int(_) => AtomicKind::Int,
            AtomicRepr::Long(_) => AtomicKind::Long,
            AtomicRepr::Ref(_) => AtomicKind::Ref,
        }
    }

    fn wrap(&self, v: i64) -> Value {
        match self.kind() {
            AtomicKind::Int => Value::Int(v),
            AtomicKind::Long => Value::Long(v),
            AtomicKind::Ref => unreachable!("integer wrap on reference atomic"),
        }
    }

    pub fn get(&self) -> Value {
        match &self.repr {
            AtomicRepr::Int(cell) | AtomicRepr::Long(cell) => self.wrap(cell.load(Ordering::SeqCst)),
            AtomicRepr::Ref(cell) => cell.lock().clone(),
        }
    }

    pub fn set(&self, value: &Value) -> bool {
        match (&self.repr, value.as_int()) {
            (AtomicRepr::Int(cell) | AtomicRepr::Long(cell), Some(v)) => {
                cell.store(v, Ordering::SeqCst);
                true
            }
            (AtomicRepr::Ref(cell), _) => {
                *cell.lock() = value.clone();
                true
            }
            _ => false,
        }
    }

    pub fn add_and_get(&self, delta: i64) -> Option<Value> {
        match &self.repr {
            AtomicRepr::Int(cell) | AtomicRepr::Long(cell) => {
                let v = cell.fetch_add(delta, Ordering::SeqCst).wrapping_add(delta);
                Some(self.wrap(v))
            }
            AtomicRepr::Ref(_) => None,
        }
    }

    pub fn increment_and_get(&self) -> Option<Value> {
        self.add_and_get(1)
    }

    pub fn decrement_and_get(&self) -> Option<Value> {
        self.add_and_get(-1)
    }

    /// CAS. Integer atomics compare numerically; reference atomics compare by
    /// identity.
    pub fn compare_and_set(&self, expect: &Value, new: &Value) -> bool {
        match &self.repr {
            AtomicRepr::Int(cell) | AtomicRepr::Long(cell) => {
                let (Some(expect), Some(new)) = (expect.as_int(), new.as_int()) else {
                    return false;
                };
                cell.compare_exchange(expect, new, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
            }
            AtomicRepr::Ref(cell) => {
                let mut guard = cell.lock();
                if guard.ref_equals(expect) {
                    *guard = new.clone();
                    true
                } else {
                    false
                }
            }
        }
    }
}
