//! binding::resource
//!
//! Handle onto a single shared model instance.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::MutexGuard;
use serde_json::Value;

use super::{Node, Target};
use crate::manager::Manager;
use crate::mapping::{descend, Layout, Mapper, MappingError};
use crate::metadata::Metadata;
use crate::schema::{AnyResource, Model, ModelType};

/// A shared, bindable model instance.
///
/// Clones point at the same instance; mutations made by the mapping engine
/// (including identity-resolved in-place updates) are visible through every
/// clone.
///
/// A resource created directly (not resolved by the engine) joins the
/// identity index the first time it decodes a key nobody holds. If another
/// live instance already holds that key, the index keeps pointing at it and
/// both instances receive the decoded values.
pub struct Resource<T: Model> {
    node: Arc<Node<T, Resource<T>>>,
}

/// Weak counterpart of [`Resource`].
pub struct WeakResource<T: Model> {
    node: Weak<Node<T, Resource<T>>>,
}

impl<T: Model> Resource<T> {
    /// Wrap a value.
    pub fn new(value: T) -> Self {
        Self {
            node: Arc::new(Node::new(value)),
        }
    }

    /// Lock the instance for direct access.
    ///
    /// Do not hold the guard across calls into the engine for the same
    /// instance.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.node.value.lock()
    }

    /// Run `f` with shared access to the instance.
    pub fn read<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.node.value.lock())
    }

    /// Run `f` with mutable access to the instance.
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut self.node.value.lock())
    }

    /// Whether both handles point at the same instance.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.node, &other.node)
    }

    /// Weak handle that does not keep the instance alive.
    pub fn downgrade(&self) -> WeakResource<T> {
        WeakResource {
            node: Arc::downgrade(&self.node),
        }
    }

    pub(crate) fn addr(&self) -> usize {
        Arc::as_ptr(&self.node) as *const () as usize
    }
}

impl<T: Model> WeakResource<T> {
    /// Upgrade, if the instance is still alive.
    pub fn upgrade(&self) -> Option<Resource<T>> {
        self.node.upgrade().map(|node| Resource { node })
    }

    /// Whether the instance is still alive.
    pub fn is_alive(&self) -> bool {
        self.node.strong_count() > 0
    }
}

impl<T: Model> Clone for Resource<T> {
    fn clone(&self) -> Self {
        Self {
            node: Arc::clone(&self.node),
        }
    }
}

impl<T: Model> Clone for WeakResource<T> {
    fn clone(&self) -> Self {
        Self {
            node: Weak::clone(&self.node),
        }
    }
}

impl<T: Model> Default for Resource<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

// Identity only: the instance may be locked or reference itself.
impl<T: Model> fmt::Debug for Resource<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Resource<{}>({:#x})", T::NAME, self.addr())
    }
}

impl<T: Model> fmt::Debug for WeakResource<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WeakResource<{}>(alive: {})", T::NAME, self.is_alive())
    }
}

impl<T: Model> Target for Resource<T> {
    type Weak = WeakResource<T>;

    fn model_type() -> ModelType {
        ModelType::of::<T>()
    }

    fn default_class_depth() -> usize {
        0
    }

    fn downgrade(&self) -> Self::Weak {
        Resource::downgrade(self)
    }

    fn upgrade(weak: &Self::Weak) -> Option<Self> {
        weak.upgrade()
    }

    fn addr(&self) -> usize {
        Resource::addr(self)
    }

    fn metadata(&self) -> Metadata<Self> {
        self.node.record(self, Manager::default_instance)
    }

    fn bind_to(&self, manager: &Manager) -> Metadata<Self> {
        self.node.record(self, || manager.clone())
    }

    fn has_metadata(&self) -> bool {
        self.node.has_record()
    }

    fn decode(
        &self,
        mapper: &Mapper<'_>,
        tree: &Value,
        layout: &Layout,
    ) -> Result<usize, MappingError> {
        let depth = layout.class_depth.unwrap_or_else(Self::default_class_depth);
        let Some(object) = descend(tree, depth)
            .into_iter()
            .find_map(Value::as_object)
        else {
            return Err(MappingError::NoObject {
                model: T::NAME,
                depth,
            });
        };

        let ty = Self::model_type();
        let instance = AnyResource::new(self.clone());
        mapper.decode_into(ty, &instance, object);
        mapper.claim(ty, &instance, object);
        Ok(1)
    }

    fn encode(&self, mapper: &Mapper<'_>, template: Option<&Value>) -> Value {
        mapper.encode(Self::model_type(), &AnyResource::new(self.clone()), template)
    }

    fn detach_record(&self, record: &Metadata<Self>) {
        self.node.detach(record);
    }
}
