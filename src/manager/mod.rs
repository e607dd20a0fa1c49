//! manager
//!
//! Process-wide settings, registry, identity index and transport.
//!
//! # Design
//!
//! A [`Manager`] is a cheap, cloneable handle onto one shared context. Every
//! metadata record uses exactly one manager, normally the distinguished
//! [`Manager::default_instance`]. Independent managers (tests, multiple
//! backends) come from [`Manager::new`] or [`Manager::builder`].
//!
//! The manager owns:
//!
//! - settings: default error type, null handling, parent tracking, activity
//!   reporting, base URL, default headers, timeout
//! - the transform [`Registry`]
//! - the single [`IdentityIndex`]
//! - the [`Transport`] that executes requests
//! - an optional weakly held [`Delegate`]
//! - the active-request counter
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use restbind::prelude::*;
//! use restbind::transport::mock::MockTransport;
//!
//! let mock = MockTransport::new();
//! let manager = Manager::builder()
//!     .transport(Arc::new(mock.clone()))
//!     .build();
//! manager.map_remote_field("user_name", "name");
//!
//! let user = manager.get_from_url::<User>("https://api.example.com/users/42");
//! ```

mod delegate;

pub use delegate::Delegate;

use std::any::TypeId;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use parking_lot::RwLock;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Url;
use serde_json::Value;
use tokio::runtime::Handle;

use crate::binding::{Bindable, Collection, Resource, Target};
use crate::config::{Config, ConfigError};
use crate::mapping::{descend, Mapper};
use crate::metadata::ParentLink;
use crate::registry::{
    apply_request_chain, apply_response_chain, IdentityIndex, Registry,
};
use crate::schema::{AnyResource, Model, ModelType};
use crate::transport::{HttpTransport, Request, Response, Transport, TransportError};

static DEFAULT: OnceLock<Manager> = OnceLock::new();

#[derive(Debug, Clone, Default)]
struct Settings {
    default_error_type: Option<ModelType>,
    overwrite_nulls: bool,
    track_parents: bool,
    activity_indicator: bool,
    base_url: Option<Url>,
    headers: HeaderMap,
    timeout: Option<Duration>,
}

impl Settings {
    fn from_config(config: &Config) -> Result<Self, ConfigError> {
        Ok(Self {
            default_error_type: None,
            overwrite_nulls: config.overwrite_nulls(),
            track_parents: config.track_parents(),
            activity_indicator: config.activity_indicator(),
            base_url: config.base_url(),
            headers: config.header_map()?,
            timeout: config.timeout(),
        })
    }
}

struct Context {
    settings: RwLock<Settings>,
    registry: RwLock<Registry>,
    index: IdentityIndex,
    transport: RwLock<Arc<dyn Transport>>,
    delegate: RwLock<Option<Weak<dyn Delegate>>>,
    runtime: RwLock<Option<Handle>>,
    active: AtomicUsize,
    connection_down: AtomicBool,
}

/// Handle onto a shared binding context.
#[derive(Clone)]
pub struct Manager {
    inner: Arc<Context>,
}

/// Builder for a [`Manager`].
#[derive(Default)]
pub struct ManagerBuilder {
    config: Option<Config>,
    transport: Option<Arc<dyn Transport>>,
    runtime: Option<Handle>,
}

impl ManagerBuilder {
    /// Apply settings from a configuration.
    pub fn config(mut self, config: &Config) -> Self {
        self.config = Some(config.clone());
        self
    }

    /// Execute requests with `transport` instead of HTTP.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Spawn loads on `handle` instead of the caller's runtime.
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    /// Build the manager.
    ///
    /// Settings that fail to apply are logged and left at their defaults;
    /// use [`Manager::new`] to have them reported.
    pub fn build(self) -> Manager {
        let config = self.config.unwrap_or_default();
        let settings = Settings::from_config(&config).unwrap_or_else(|e| {
            tracing::warn!("ignoring invalid manager settings: {}", e);
            Settings::default()
        });
        let transport = self.transport.unwrap_or_else(|| {
            match HttpTransport::from_config(&config) {
                Ok(http) => Arc::new(http),
                Err(e) => {
                    tracing::warn!("using default HTTP transport: {}", e);
                    Arc::new(HttpTransport::new())
                }
            }
        });
        Manager::assemble(settings, transport, self.runtime)
    }
}

impl Manager {
    fn assemble(settings: Settings, transport: Arc<dyn Transport>, runtime: Option<Handle>) -> Self {
        tracing::debug!("manager created with {} transport", transport.name());
        Self {
            inner: Arc::new(Context {
                settings: RwLock::new(settings),
                registry: RwLock::new(Registry::default()),
                index: IdentityIndex::new(),
                transport: RwLock::new(transport),
                delegate: RwLock::new(None),
                runtime: RwLock::new(runtime),
                active: AtomicUsize::new(0),
                connection_down: AtomicBool::new(false),
            }),
        }
    }

    /// The process-wide manager, configured from `$RESTBIND_CONFIG` on first
    /// use.
    pub fn default_instance() -> Manager {
        DEFAULT
            .get_or_init(|| match Config::load(None) {
                Ok(config) => Manager::builder().config(&config).build(),
                Err(e) => {
                    tracing::warn!("default manager falls back to defaults: {}", e);
                    Manager::builder().build()
                }
            })
            .clone()
    }

    /// An independent manager configured from `config`.
    pub fn new(config: &Config) -> Result<Self, ConfigError> {
        let settings = Settings::from_config(config)?;
        let transport = HttpTransport::from_config(config)?;
        Ok(Self::assemble(settings, Arc::new(transport), None))
    }

    pub fn builder() -> ManagerBuilder {
        ManagerBuilder::default()
    }

    /// Whether both handles refer to the same context.
    pub fn ptr_eq(&self, other: &Manager) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    // ---- settings ----

    pub fn default_error_type(&self) -> Option<ModelType> {
        self.inner.settings.read().default_error_type
    }

    /// Decode non-2xx bodies as `E` for records without their own error type.
    pub fn set_default_error_type<E: Model>(&self) {
        self.inner.settings.write().default_error_type = Some(ModelType::of::<E>());
    }

    pub fn clear_default_error_type(&self) {
        self.inner.settings.write().default_error_type = None;
    }

    pub fn overwrite_nulls(&self) -> bool {
        self.inner.settings.read().overwrite_nulls
    }

    /// Whether JSON nulls overwrite existing property values.
    pub fn set_overwrite_nulls(&self, overwrite: bool) {
        self.inner.settings.write().overwrite_nulls = overwrite;
    }

    pub fn track_parents(&self) -> bool {
        self.inner.settings.read().track_parents
    }

    /// Whether nested objects link back to the record that decoded them.
    pub fn set_track_parents(&self, track: bool) {
        self.inner.settings.write().track_parents = track;
    }

    pub fn activity_indicator(&self) -> bool {
        self.inner.settings.read().activity_indicator
    }

    /// Whether the delegate hears about the active-request count.
    pub fn set_activity_indicator(&self, enabled: bool) {
        self.inner.settings.write().activity_indicator = enabled;
    }

    pub fn base_url(&self) -> Option<Url> {
        self.inner.settings.read().base_url.clone()
    }

    /// Relative source URLs are resolved against `url`.
    pub fn set_base_url(&self, url: Option<Url>) {
        self.inner.settings.write().base_url = url;
    }

    pub fn default_headers(&self) -> HeaderMap {
        self.inner.settings.read().headers.clone()
    }

    /// Send `name: value` with every request.
    pub fn set_default_header(&self, name: &str, value: &str) -> Result<(), TransportError> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| TransportError::InvalidRequest(format!("invalid header name '{}'", name)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| TransportError::InvalidRequest(format!("invalid value for header '{}'", name)))?;
        self.inner.settings.write().headers.insert(name, value);
        Ok(())
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.inner.settings.read().timeout
    }

    pub fn set_timeout(&self, timeout: Option<Duration>) {
        self.inner.settings.write().timeout = timeout;
    }

    pub fn transport(&self) -> Arc<dyn Transport> {
        Arc::clone(&self.inner.transport.read())
    }

    pub fn set_transport(&self, transport: Arc<dyn Transport>) {
        *self.inner.transport.write() = transport;
    }

    /// Install a delegate. The manager keeps only a weak reference.
    pub fn set_delegate(&self, delegate: &Arc<dyn Delegate>) {
        *self.inner.delegate.write() = Some(Arc::downgrade(delegate));
    }

    pub fn clear_delegate(&self) {
        *self.inner.delegate.write() = None;
    }

    /// Spawn loads on `handle` instead of the caller's runtime.
    pub fn set_runtime(&self, handle: Option<Handle>) {
        *self.inner.runtime.write() = handle;
    }

    /// Number of requests in flight.
    pub fn active_requests(&self) -> usize {
        self.inner.active.load(Ordering::SeqCst)
    }

    // ---- registry ----

    /// Map remote JSON key `field` to local `property` for every type.
    pub fn map_remote_field(&self, field: &str, property: &str) {
        self.inner.registry.write().map_remote_field(field, property);
    }

    /// Map remote JSON key `field` to local `property` for `T` only.
    pub fn map_remote_field_for<T: Model>(&self, field: &str, property: &str) {
        self.inner
            .registry
            .write()
            .map_remote_field_for(TypeId::of::<T>(), field, property);
    }

    pub fn property_name_for_field<T: Model>(&self, field: &str) -> String {
        self.inner
            .registry
            .read()
            .property_name_for_field(TypeId::of::<T>(), field)
    }

    pub fn field_name_for_property<T: Model>(&self, property: &str) -> String {
        self.inner
            .registry
            .read()
            .field_name_for_property(TypeId::of::<T>(), property)
    }

    /// Run `transformer` on every outgoing request.
    pub fn add_request_transformer<F>(&self, transformer: F)
    where
        F: Fn(&mut Request) + Send + Sync + 'static,
    {
        self.inner
            .registry
            .write()
            .add_global_request_transformer(Arc::new(transformer));
    }

    /// Run `transformer` on every parsed response tree.
    pub fn add_response_transformer<F>(&self, transformer: F)
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        self.inner
            .registry
            .write()
            .add_global_response_transformer(Arc::new(transformer));
    }

    /// Run `transformer` on requests of records bound to `T`.
    pub fn add_request_transformer_for<T: Model, F>(&self, transformer: F)
    where
        F: Fn(&mut Request) + Send + Sync + 'static,
    {
        self.inner
            .registry
            .write()
            .add_request_transformer_for(TypeId::of::<T>(), Arc::new(transformer));
    }

    /// Run `transformer` on responses of records bound to `T`.
    pub fn add_response_transformer_for<T: Model, F>(&self, transformer: F)
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        self.inner
            .registry
            .write()
            .add_response_transformer_for(TypeId::of::<T>(), Arc::new(transformer));
    }

    /// Whitelist `key` for serialization of `T`.
    pub fn add_serialization_key<T: Model>(&self, key: &str) {
        self.inner
            .registry
            .write()
            .add_serialization_key(TypeId::of::<T>(), key);
    }

    pub fn add_serialization_keys<T: Model, S: AsRef<str>>(&self, keys: &[S]) {
        self.inner
            .registry
            .write()
            .add_serialization_keys(TypeId::of::<T>(), keys);
    }

    pub fn should_property_be_serialized<T: Model>(&self, property: &str) -> bool {
        self.inner
            .registry
            .read()
            .should_property_be_serialized(ModelType::of::<T>(), property)
    }

    /// Apply the global request transformers to `request`.
    pub fn transform_request(&self, request: &mut Request) {
        let chain = self.inner.registry.read().request_chain(None);
        apply_request_chain(&chain, request);
    }

    /// Apply the global response transformers to `tree`.
    pub fn transform_response(&self, tree: Value) -> Value {
        let chain = self.inner.registry.read().response_chain(None);
        apply_response_chain(&chain, tree)
    }

    pub(crate) fn transform_request_for(&self, ty: TypeId, request: &mut Request) {
        let chain = self.inner.registry.read().request_chain(Some(ty));
        apply_request_chain(&chain, request);
    }

    pub(crate) fn transform_response_for(&self, ty: TypeId, tree: Value) -> Value {
        let chain = self.inner.registry.read().response_chain(Some(ty));
        apply_response_chain(&chain, tree)
    }

    // ---- objects ----

    /// A new instance bound to this manager.
    pub fn object_of<T: Model>(&self) -> Resource<T> {
        let resource = Resource::<T>::default();
        resource.bind_to(self);
        resource
    }

    /// A new empty collection bound to this manager.
    pub fn array_of<T: Model>(&self) -> Collection<T> {
        let collection = Collection::<T>::default();
        collection.bind_to(self);
        collection
    }

    /// A new instance pointed at `url`. Loads when a callback is attached.
    pub fn get_from_url<T: Model>(&self, url: impl Into<String>) -> Resource<T> {
        let resource = self.object_of::<T>();
        resource.get_from_url(url);
        resource
    }

    /// A new collection pointed at `url`.
    pub fn array_from_url<T: Model>(&self, url: impl Into<String>) -> Collection<T> {
        let collection = self.array_of::<T>();
        collection.get_from_url(url);
        collection
    }

    /// Send DELETE to `url` right away.
    pub fn delete_from_url<T: Model>(&self, url: impl Into<String>) -> Resource<T> {
        let resource = self.object_of::<T>();
        resource.delete_from_url(url).load();
        resource
    }

    pub fn identity_index(&self) -> &IdentityIndex {
        &self.inner.index
    }

    /// The live instance of `T` with identity `key`, if any.
    pub fn lookup<T: Model>(&self, key: &Value) -> Option<Resource<T>> {
        self.inner.index.lookup_typed::<T>(key)
    }

    // ---- load plumbing ----

    /// Run `f` with a mapper over this manager's registry and index.
    pub(crate) fn with_mapper<R>(
        &self,
        parent: Option<ParentLink>,
        f: impl FnOnce(&Mapper<'_>) -> R,
    ) -> R {
        let overwrite_nulls = self.overwrite_nulls();
        let registry = self.inner.registry.read();
        let mapper = Mapper::new(&registry, &self.inner.index, overwrite_nulls);
        let mapper = match parent {
            Some(parent) => mapper.with_parent(self, parent),
            None => mapper,
        };
        f(&mapper)
    }

    /// Decode a non-2xx body as `ty`. The error object is a fresh instance
    /// outside the identity index.
    pub(crate) fn decode_error(&self, ty: ModelType, tree: &Value, depth: usize) -> Option<AnyResource> {
        let object = descend(tree, depth).into_iter().find_map(Value::as_object)?;
        let instance = ty.create();
        self.with_mapper(None, |mapper| mapper.decode_into(ty, &instance, object));
        Some(instance)
    }

    pub(crate) fn resolve_url(&self, url: &str) -> Result<Url, TransportError> {
        match (Url::parse(url), self.base_url()) {
            (Ok(url), _) => Ok(url),
            (Err(_), Some(base)) if !url.contains("://") => base
                .join(url)
                .map_err(|e| TransportError::InvalidRequest(format!("'{}': {}", url, e))),
            (Err(e), _) => Err(TransportError::InvalidRequest(format!("'{}': {}", url, e))),
        }
    }

    pub(crate) fn runtime(&self) -> Option<Handle> {
        self.inner
            .runtime
            .read()
            .clone()
            .or_else(|| Handle::try_current().ok())
    }

    /// Call `f` on the delegate, if one is installed and alive.
    pub(crate) fn notify(&self, f: impl FnOnce(&dyn Delegate)) {
        let delegate = self.inner.delegate.read().as_ref().and_then(Weak::upgrade);
        if let Some(delegate) = delegate {
            f(delegate.as_ref());
        }
    }

    pub(crate) fn begin_request(&self) {
        let active = self.inner.active.fetch_add(1, Ordering::SeqCst) + 1;
        if self.activity_indicator() {
            self.notify(|d| d.activity_changed(active));
        }
    }

    pub(crate) fn end_request(&self) {
        let previous = self
            .inner
            .active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(n.saturating_sub(1)))
            .unwrap_or(0);
        if self.activity_indicator() {
            self.notify(|d| d.activity_changed(previous.saturating_sub(1)));
        }
    }

    /// Track connectivity and authentication from a transport result.
    pub(crate) fn note_response(&self, result: &Result<Response, TransportError>) {
        match result {
            Err(e) if e.is_connectivity() => {
                if !self.inner.connection_down.swap(true, Ordering::SeqCst) {
                    tracing::warn!("connection dropped: {}", e);
                    self.notify(|d| d.connection_dropped());
                }
            }
            Err(_) => {}
            Ok(response) => {
                if self.inner.connection_down.swap(false, Ordering::SeqCst) {
                    tracing::info!("connection re-established");
                    self.notify(|d| d.connection_established());
                }
                if response.status == 401 {
                    self.notify(|d| d.authentication_failed());
                }
            }
        }
    }
}

impl fmt::Debug for Manager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Manager")
            .field("transport", &self.transport().name())
            .field("settings", &*self.inner.settings.read())
            .field("active_requests", &self.active_requests())
            .field("identities", &self.inner.index.len())
            .finish()
    }
}
