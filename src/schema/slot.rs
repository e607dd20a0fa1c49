//! schema::slot
//!
//! Values exchanged between the mapping engine and model implementations.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use super::Model;
use crate::binding::Resource;

/// A type-erased [`Resource`].
///
/// Cloning is cheap and keeps pointing at the same instance.
#[derive(Clone)]
pub struct AnyResource {
    handle: Arc<dyn Any + Send + Sync>,
    addr: usize,
    downgrade: fn(&AnyResource) -> Option<WeakAnyResource>,
}

/// Weak counterpart of [`AnyResource`].
#[derive(Clone)]
pub struct WeakAnyResource {
    upgrade: Arc<dyn Fn() -> Option<AnyResource> + Send + Sync>,
    addr: usize,
}

impl AnyResource {
    /// Erase a resource.
    pub fn new<T: Model>(resource: Resource<T>) -> Self {
        let addr = resource.addr();
        Self {
            handle: Arc::new(resource),
            addr,
            downgrade: downgrade_erased::<T>,
        }
    }

    /// Weak handle that does not keep the instance alive.
    pub fn downgrade(&self) -> WeakAnyResource {
        match (self.downgrade)(self) {
            Some(weak) => weak,
            None => WeakAnyResource {
                upgrade: Arc::new(|| None),
                addr: self.addr,
            },
        }
    }

    /// Recover the typed resource, if this is a `Resource<T>`.
    pub fn downcast<T: Model>(&self) -> Option<Resource<T>> {
        self.handle.downcast_ref::<Resource<T>>().cloned()
    }

    /// Whether both handles point at the same instance.
    pub fn same(&self, other: &AnyResource) -> bool {
        self.addr == other.addr
    }

    /// Address of the underlying instance, stable for its lifetime.
    pub fn addr(&self) -> usize {
        self.addr
    }
}

impl WeakAnyResource {
    /// Upgrade, if the instance is still alive.
    pub fn upgrade(&self) -> Option<AnyResource> {
        (self.upgrade)()
    }

    pub fn is_alive(&self) -> bool {
        self.upgrade().is_some()
    }

    pub fn addr(&self) -> usize {
        self.addr
    }
}

fn downgrade_erased<T: Model>(instance: &AnyResource) -> Option<WeakAnyResource> {
    let weak = instance.downcast::<T>()?.downgrade();
    Some(WeakAnyResource {
        upgrade: Arc::new(move || weak.upgrade().map(AnyResource::new)),
        addr: instance.addr,
    })
}

impl fmt::Debug for WeakAnyResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WeakAnyResource({:#x})", self.addr)
    }
}

impl fmt::Debug for AnyResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AnyResource({:#x})", self.addr)
    }
}

/// Content of one property, as read from or written to a model.
#[derive(Debug, Clone)]
pub enum Slot {
    /// A leaf JSON value.
    Value(Value),
    /// A nested instance, or none.
    Object(Option<AnyResource>),
    /// A list of nested instances.
    Array(Vec<AnyResource>),
}

impl Slot {
    /// Wrap a serializable leaf. Values serde cannot express become `null`.
    pub fn value<V: Serialize + ?Sized>(value: &V) -> Self {
        Slot::Value(serde_json::to_value(value).unwrap_or(Value::Null))
    }

    /// Wrap an optional nested resource.
    pub fn object<T: Model>(value: &Option<Resource<T>>) -> Self {
        Slot::Object(value.clone().map(AnyResource::new))
    }

    /// Wrap a list of nested resources.
    pub fn array<T: Model>(items: &[Resource<T>]) -> Self {
        Slot::Array(items.iter().cloned().map(AnyResource::new).collect())
    }

    /// Store a leaf value into `target`. Returns `false` (leaving `target`
    /// untouched) if the value does not deserialize into `V`.
    pub fn assign<V: DeserializeOwned>(self, target: &mut V) -> bool {
        match self {
            Slot::Value(value) => match serde_json::from_value(value) {
                Ok(decoded) => {
                    *target = decoded;
                    true
                }
                Err(e) => {
                    tracing::debug!("value rejected by property: {}", e);
                    false
                }
            },
            _ => false,
        }
    }

    /// Store a nested resource into `target`.
    pub fn assign_object<T: Model>(self, target: &mut Option<Resource<T>>) -> bool {
        match self {
            Slot::Object(None) => {
                *target = None;
                true
            }
            Slot::Object(Some(instance)) => match instance.downcast::<T>() {
                Some(resource) => {
                    *target = Some(resource);
                    true
                }
                None => false,
            },
            _ => false,
        }
    }

    /// Store a list of nested resources into `target`.
    pub fn assign_array<T: Model>(self, target: &mut Vec<Resource<T>>) -> bool {
        match self {
            Slot::Array(items) => {
                let typed: Option<Vec<Resource<T>>> =
                    items.iter().map(AnyResource::downcast::<T>).collect();
                match typed {
                    Some(items) => {
                        *target = items;
                        true
                    }
                    None => false,
                }
            }
            _ => false,
        }
    }

    /// The leaf value, if this is one.
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Slot::Value(value) => Some(value),
            _ => None,
        }
    }
}
