//! binding::collection
//!
//! Handle onto a shared, ordered list of model instances.

use std::fmt;
use std::sync::{Arc, Weak};

use serde_json::Value;

use super::{Node, Resource, Target};
use crate::manager::Manager;
use crate::mapping::{descend, Layout, Mapper, MappingError};
use crate::metadata::Metadata;
use crate::schema::{AnyResource, Model, ModelType};

/// A shared, bindable list of `T`.
///
/// Decoding replaces the contents by default, or merges into them when the
/// record's `append` flag is set. Elements are identity-resolved, so an
/// element that is already referenced elsewhere is updated in place.
pub struct Collection<T: Model> {
    node: Arc<Node<Vec<Resource<T>>, Collection<T>>>,
}

/// Weak counterpart of [`Collection`].
pub struct WeakCollection<T: Model> {
    node: Weak<Node<Vec<Resource<T>>, Collection<T>>>,
}

impl<T: Model> Collection<T> {
    /// An empty collection.
    pub fn new() -> Self {
        Self::from_items(Vec::new())
    }

    /// A collection holding `items`.
    pub fn from_items(items: Vec<Resource<T>>) -> Self {
        Self {
            node: Arc::new(Node::new(items)),
        }
    }

    /// Snapshot of the current elements.
    pub fn items(&self) -> Vec<Resource<T>> {
        self.node.value.lock().clone()
    }

    /// Element at `index`.
    pub fn get(&self, index: usize) -> Option<Resource<T>> {
        self.node.value.lock().get(index).cloned()
    }

    pub fn len(&self) -> usize {
        self.node.value.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.node.value.lock().is_empty()
    }

    /// Append an element.
    pub fn push(&self, item: Resource<T>) {
        self.node.value.lock().push(item);
    }

    /// Remove every element.
    pub fn clear(&self) {
        self.node.value.lock().clear();
    }

    /// Run `f` with mutable access to the element list.
    pub fn update<R>(&self, f: impl FnOnce(&mut Vec<Resource<T>>) -> R) -> R {
        f(&mut self.node.value.lock())
    }

    /// Whether both handles point at the same collection.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.node, &other.node)
    }

    /// Weak handle that does not keep the collection alive.
    pub fn downgrade(&self) -> WeakCollection<T> {
        WeakCollection {
            node: Arc::downgrade(&self.node),
        }
    }
}

impl<T: Model> WeakCollection<T> {
    /// Upgrade, if the collection is still alive.
    pub fn upgrade(&self) -> Option<Collection<T>> {
        self.node.upgrade().map(|node| Collection { node })
    }

    pub fn is_alive(&self) -> bool {
        self.node.strong_count() > 0
    }
}

impl<T: Model> Clone for Collection<T> {
    fn clone(&self) -> Self {
        Self {
            node: Arc::clone(&self.node),
        }
    }
}

impl<T: Model> Clone for WeakCollection<T> {
    fn clone(&self) -> Self {
        Self {
            node: Weak::clone(&self.node),
        }
    }
}

impl<T: Model> Default for Collection<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Model> fmt::Debug for Collection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Collection<{}>({:#x})",
            T::NAME,
            Arc::as_ptr(&self.node) as *const () as usize
        )
    }
}

impl<T: Model> fmt::Debug for WeakCollection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WeakCollection<{}>(alive: {})", T::NAME, self.is_alive())
    }
}

impl<T: Model> Target for Collection<T> {
    type Weak = WeakCollection<T>;

    fn model_type() -> ModelType {
        ModelType::of::<T>()
    }

    fn default_class_depth() -> usize {
        1
    }

    fn downgrade(&self) -> Self::Weak {
        Collection::downgrade(self)
    }

    fn upgrade(weak: &Self::Weak) -> Option<Self> {
        weak.upgrade()
    }

    fn addr(&self) -> usize {
        Arc::as_ptr(&self.node) as *const () as usize
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
        let incoming: Vec<&serde_json::Map<String, Value>> = descend(tree, depth)
            .into_iter()
            .filter_map(Value::as_object)
            .collect();

        let ty = Self::model_type();
        let existing: Vec<AnyResource> = self.items().into_iter().map(AnyResource::new).collect();
        let mut merged = mapper.merge(ty, &existing, &incoming, layout.append);
        if let Some(key) = layout.sort_key.as_deref() {
            mapper.sort(ty, &mut merged, key);
        }

        let items: Vec<Resource<T>> = merged.iter().filter_map(AnyResource::downcast::<T>).collect();
        *self.node.value.lock() = items;
        Ok(incoming.len())
    }

    fn encode(&self, mapper: &Mapper<'_>, template: Option<&Value>) -> Value {
        let element_template = template.and_then(Value::as_array).and_then(|t| t.first());
        let ty = Self::model_type();
        Value::Array(
            self.items()
                .into_iter()
                .map(|item| mapper.encode(ty, &AnyResource::new(item), element_template))
                .collect(),
        )
    }

    fn detach_record(&self, record: &Metadata<Self>) {
        self.node.detach(record);
    }
}
