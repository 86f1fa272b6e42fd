use std::sync::Arc;

use ahash::AHashMap;
use parking_lot::RwLock;

use crate::{
    types::class::{ClassRef, MethodDef},
    value::Value,
};

/// A singleton entry of an enum class.
///
/// One `Arc<EnumEntry>` exists per `(enum, name)` pair; every reference to the
/// entry shares it, so reference equality doubles as entry identity. The back
/// reference to the owning class is weak to avoid an `Arc` cycle with the
/// class's entry list.
#[derive(Debug)]
pub struct EnumEntry {
    pub owner: ClassRef,
    /// Owning enum's name, kept inline so rendering never needs the upgrade.
    pub owner_name: Arc<str>,
    pub name: Arc<str>,
    pub ordinal: u32,
    /// Per-entry constructor-assigned fields.
    pub fields: RwLock<AHashMap<Arc<str>, Value>>,
    /// Per-entry method overrides, consulted before the enum's own methods.
    pub overrides: AHashMap<Arc<str>, MethodDef>,
}

impl EnumEntry {
    pub fn field(&self, name: &str) -> Option<Value> {
        self.fields.read().get(name).cloned()
    }

    /// Fully-qualified rendering, e.g. `Color.RED`.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.owner_name, self.name)
    }
}
