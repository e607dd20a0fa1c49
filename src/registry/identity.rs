//! registry::identity
//!
//! Weak index from (type, identity key) to the live instance.

use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;

use parking_lot::Mutex;
use serde_json::Value;

use crate::binding::Resource;
use crate::schema::{AnyResource, Model, ModelType, WeakAnyResource};

/// Normalized value of an identifying property.
///
/// Strings, numbers and booleans are accepted. Numbers are keyed by their
/// canonical text, so `42` and `"42"` name the same instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdentityKey(String);

impl IdentityKey {
    /// Key for a JSON value, or `None` for null and structured values.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(Self(s.clone())),
            Value::Number(n) => {
                let text = if let Some(i) = n.as_i64() {
                    i.to_string()
                } else if let Some(u) = n.as_u64() {
                    u.to_string()
                } else {
                    n.to_string()
                };
                Some(Self(text))
            }
            Value::Bool(b) => Some(Self(b.to_string())),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fewest entries a type holds before dead ones are swept.
const SWEEP_FLOOR: usize = 64;

/// Entries of one model type.
#[derive(Default)]
struct Slots {
    entries: HashMap<IdentityKey, WeakAnyResource>,
    sweep_at: usize,
}

impl Slots {
    fn live(&self, key: &IdentityKey) -> Option<AnyResource> {
        self.entries.get(key).and_then(WeakAnyResource::upgrade)
    }

    /// Insert, first sweeping dead entries once the table has doubled since
    /// the last sweep.
    fn insert(&mut self, key: IdentityKey, instance: WeakAnyResource) {
        if !self.entries.contains_key(&key) && self.entries.len() >= self.sweep_at.max(SWEEP_FLOOR) {
            self.sweep();
        }
        self.entries.insert(key, instance);
    }

    fn sweep(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, weak| weak.is_alive());
        self.sweep_at = self.entries.len() * 2;
        before - self.entries.len()
    }
}

type Table = HashMap<TypeId, Slots>;

/// At most one live instance per (type, key).
///
/// Entries never keep an instance alive. A dead entry counts as vacant and
/// is replaced on the next insert. Dead entries for other keys are swept as
/// the table grows, so it stays proportional to the live instances.
#[derive(Default)]
pub struct IdentityIndex {
    table: Mutex<Table>,
}

impl IdentityIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live instance for `key`, or a fresh one registered under `key`.
    ///
    /// Returns the instance and whether it was created. The check and the
    /// insert happen under one lock, so concurrent decoders agree.
    pub fn resolve_or_insert(&self, ty: ModelType, key: IdentityKey) -> (AnyResource, bool) {
        let mut table = self.table.lock();
        let slots = table.entry(ty.type_id()).or_default();
        if let Some(existing) = slots.live(&key) {
            return (existing, false);
        }
        let created = ty.create();
        tracing::trace!("identity index: new {} {}", ty.name(), key);
        slots.insert(key, created.downgrade());
        (created, true)
    }

    /// Live instance registered under `key`.
    pub fn lookup(&self, ty: TypeId, key: &IdentityKey) -> Option<AnyResource> {
        self.table
            .lock()
            .get(&ty)
            .and_then(|slots| slots.live(key))
    }

    /// Typed lookup by the identifying JSON value.
    pub fn lookup_typed<T: Model>(&self, value: &Value) -> Option<Resource<T>> {
        let key = IdentityKey::from_value(value)?;
        self.lookup(TypeId::of::<T>(), &key)?.downcast::<T>()
    }

    /// Register `instance` under `key` only if the slot is vacant or dead.
    /// Returns whether `instance` now occupies the slot.
    pub fn claim(&self, ty: TypeId, key: IdentityKey, instance: &AnyResource) -> bool {
        let mut table = self.table.lock();
        let slots = table.entry(ty).or_default();
        match slots.live(&key) {
            Some(existing) => existing.same(instance),
            None => {
                slots.insert(key, instance.downgrade());
                true
            }
        }
    }

    /// Register `instance` under `key`, replacing any previous entry.
    pub fn insert(&self, ty: TypeId, key: IdentityKey, instance: &AnyResource) {
        self.table
            .lock()
            .entry(ty)
            .or_default()
            .insert(key, instance.downgrade());
    }

    /// Forget `key`.
    pub fn remove(&self, ty: TypeId, key: &IdentityKey) {
        if let Some(slots) = self.table.lock().get_mut(&ty) {
            slots.entries.remove(key);
        }
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.table
            .lock()
            .values()
            .flat_map(|slots| slots.entries.values())
            .filter(|weak| weak.is_alive())
            .count()
    }

    /// Number of entries, dead ones included.
    pub fn tracked(&self) -> usize {
        self.table
            .lock()
            .values()
            .map(|slots| slots.entries.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop dead entries. Returns how many were removed.
    pub fn prune(&self) -> usize {
        let mut table = self.table.lock();
        let removed = table.values_mut().map(Slots::sweep).sum();
        table.retain(|_, slots| !slots.entries.is_empty());
        removed
    }
}

impl fmt::Debug for IdentityIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityIndex")
            .field("live", &self.len())
            .field("tracked", &self.tracked())
            .finish()
    }
}
