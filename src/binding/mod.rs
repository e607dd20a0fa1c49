//! binding
//!
//! Host handles that own their metadata record.
//!
//! # Design
//!
//! A bound object is either a [`Resource<T>`] (one model instance) or a
//! [`Collection<T>`] (an ordered list of model instances). Both are cheap,
//! cloneable handles onto shared state. The metadata record is a first-class
//! field of that shared state: it is created lazily on the first call to
//! [`Target::metadata`], stays the same for as long as it is attached, and
//! refers back to its host only weakly. Dropping the last handle drops the
//! host and its record together.
//!
//! [`Bindable`] adds thin forwarding helpers so common calls read naturally
//! on the host itself.
//!
//! # Example
//!
//! ```ignore
//! use restbind::prelude::*;
//!
//! let user: Resource<User> = Resource::default();
//! user.get_from_url("https://api.example.com/users/42")
//!     .on_complete(|outcome| println!("loaded: {}", outcome.is_success()));
//! ```

mod collection;
mod resource;

pub use collection::{Collection, WeakCollection};
pub use resource::{Resource, WeakResource};

use parking_lot::Mutex;
use serde_json::Value;

use crate::manager::Manager;
use crate::mapping::{Layout, Mapper, MappingError};
use crate::metadata::{Metadata, Outcome};
use crate::schema::ModelType;

/// Shared state behind a host handle.
pub(crate) struct Node<V, H: Target> {
    pub(crate) value: Mutex<V>,
    record: Mutex<Option<Metadata<H>>>,
}

impl<V, H: Target> Node<V, H> {
    pub(crate) fn new(value: V) -> Self {
        Self {
            value: Mutex::new(value),
            record: Mutex::new(None),
        }
    }

    /// Current record, created with `manager` if none is attached.
    pub(crate) fn record(&self, host: &H, manager: impl FnOnce() -> Manager) -> Metadata<H> {
        let mut slot = self.record.lock();
        if let Some(existing) = slot.as_ref() {
            return existing.clone();
        }
        let metadata = Metadata::attach(host, manager());
        *slot = Some(metadata.clone());
        metadata
    }

    pub(crate) fn has_record(&self) -> bool {
        self.record.lock().is_some()
    }

    /// Drop the attached record if it is `record`.
    pub(crate) fn detach(&self, record: &Metadata<H>) {
        let mut slot = self.record.lock();
        if slot.as_ref().is_some_and(|current| current.ptr_eq(record)) {
            *slot = None;
        }
    }
}

/// A host type a metadata record can be attached to.
///
/// Implemented by [`Resource`] and [`Collection`].
pub trait Target: Clone + Send + Sync + Sized + 'static {
    /// Weak form of the handle, held by the record.
    type Weak: Clone + Send + Sync + 'static;

    /// Native type (or element type, for collections).
    fn model_type() -> ModelType;

    /// Class depth used when the record does not configure one.
    fn default_class_depth() -> usize;

    /// Downgrade to the weak form.
    fn downgrade(&self) -> Self::Weak;

    /// Upgrade a weak handle, if the host is still alive.
    fn upgrade(weak: &Self::Weak) -> Option<Self>;

    /// Address of the shared state, stable for the host's lifetime.
    fn addr(&self) -> usize;

    /// The host's metadata record, attached to the default manager on first
    /// use.
    fn metadata(&self) -> Metadata<Self>;

    /// The host's metadata record, attached to `manager` on first use.
    fn bind_to(&self, manager: &Manager) -> Metadata<Self>;

    /// Whether a record is currently attached.
    fn has_metadata(&self) -> bool;

    /// Populate the host from a JSON tree. Returns the number of model
    /// objects decoded.
    fn decode(
        &self,
        mapper: &Mapper<'_>,
        tree: &Value,
        layout: &Layout,
    ) -> Result<usize, MappingError>;

    /// Serialize the host, optionally restricted by a template.
    fn encode(&self, mapper: &Mapper<'_>, template: Option<&Value>) -> Value;

    #[doc(hidden)]
    fn detach_record(&self, record: &Metadata<Self>);
}

/// Convenience forwarding onto the host's metadata record.
pub trait Bindable: Target {
    /// Whether a load is in flight.
    fn is_loading(&self) -> bool {
        self.metadata().is_loading()
    }

    /// Whether the host was ever loaded successfully.
    fn is_loaded(&self) -> bool {
        self.metadata().is_loaded()
    }

    /// Load unless a load is in flight or the host is freshly loaded.
    fn load(&self) -> Metadata<Self> {
        let metadata = self.metadata();
        metadata.load();
        metadata
    }

    /// Point the record at `url` for GET.
    fn get_from_url(&self, url: impl Into<String>) -> Metadata<Self> {
        let metadata = self.metadata();
        metadata.get_from_url(url);
        metadata
    }

    /// Point the record at `url` for PUT with the host as payload.
    fn put_to_url(&self, url: impl Into<String>) -> Metadata<Self> {
        let metadata = self.metadata();
        metadata.put_to_url(url);
        metadata
    }

    /// Point the record at `url` for POST with the host as payload.
    fn post_to_url(&self, url: impl Into<String>) -> Metadata<Self> {
        let metadata = self.metadata();
        metadata.post_to_url(url);
        metadata
    }

    /// Point the record at `url` for DELETE.
    fn delete_from_url(&self, url: impl Into<String>) -> Metadata<Self> {
        let metadata = self.metadata();
        metadata.delete_from_url(url);
        metadata
    }

    /// PUT the host to its current source URL.
    fn put_self(&self) -> Metadata<Self> {
        let metadata = self.metadata();
        metadata.put_self();
        metadata
    }

    /// POST the host to its current source URL.
    fn post_self(&self) -> Metadata<Self> {
        let metadata = self.metadata();
        metadata.post_self();
        metadata
    }

    /// Force a reload.
    fn reload(&self) -> Metadata<Self> {
        let metadata = self.metadata();
        metadata.reload();
        metadata
    }

    /// Mark the host stale.
    fn invalidate(&self) -> Metadata<Self> {
        let metadata = self.metadata();
        metadata.invalidate();
        metadata
    }

    /// Populate from JSON text.
    fn load_with_json_str(&self, json: &str) -> Result<(), MappingError> {
        self.metadata().load_with_json_str(json).map(|_| ())
    }

    /// Serialize to compact JSON text.
    fn to_json_string(&self) -> String {
        self.metadata().to_json_string(false)
    }

    /// Register a completion callback.
    fn on_complete<F>(&self, callback: F) -> Metadata<Self>
    where
        F: Fn(&Outcome<Self>) + Send + Sync + 'static,
    {
        let metadata = self.metadata();
        metadata.on_complete(callback);
        metadata
    }

    /// Register a dependency callback with no owner.
    fn on_change<F>(&self, callback: F) -> Metadata<Self>
    where
        F: Fn(&Outcome<Self>) + Send + Sync + 'static,
    {
        let metadata = self.metadata();
        metadata.on_change(callback);
        metadata
    }
}

impl<H: Target> Bindable for H {}
