//! metadata
//!
//! The per-host record: source, load state machine and callbacks.
//!
//! # Design
//!
//! Every bound host owns at most one [`Metadata`] record, created on first
//! access. The record refers to its host weakly and is shared by cheap
//! clones, so the spawned task that completes a load keeps the record alive
//! without keeping the host alive.
//!
//! Loading is lazy. Pointing a record at a URL does nothing by itself;
//! attaching a callback loads it if it is not deferred, not already loading
//! and not freshly completed. A completed record answers new callbacks
//! synchronously from its last result.
//!
//! ```text
//! Unbound ──send──> Deferred (deferred only)
//!    │                 │
//!    └──load / callback┴──> Loading ──> Loaded | Errored
//!                              ^                 │
//!                              └──── reload ─────┘
//! ```
//!
//! Each load takes a fresh token from the source. The response is applied
//! only if its token is still current, so a newer load, a new source or an
//! invalidation discards whatever is in flight. Responses are decoded under
//! a per-record lock and callbacks always fire with no lock held.
//!
//! # Example
//!
//! ```ignore
//! use restbind::prelude::*;
//!
//! let user: Resource<User> = Resource::default();
//! user.metadata()
//!     .get_from_url("https://api.example.com/users/42")
//!     .set_error_type::<ApiError>()
//!     .on_complete_or_fail(
//!         |outcome| println!("loaded {:?}", outcome.host()),
//!         |outcome| println!("failed: {:?}", outcome.failure()),
//!     );
//! ```

pub mod callback;
pub mod errors;
pub mod source;

pub use callback::{Callback, Lifeline, Liveness, Observer};
pub use errors::{Failure, LoadError, Outcome};
pub use source::{Payload, Source};

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::watch;
use uuid::Uuid;

use crate::binding::Target;
use crate::manager::Manager;
use crate::mapping::{Layout, MappingError};
use crate::registry::{apply_request_chain, apply_response_chain, RequestTransformer, ResponseTransformer};
use crate::schema::{Model, ModelType};
use crate::transport::{Credentials, Method, Request, Response, TransportError};
use callback::CallbackRecord;

/// Weak link from a nested record to the record that decoded it.
pub(crate) type ParentLink = Weak<dyn Hierarchy>;

/// Change and invalidation propagation along parent links.
pub(crate) trait Hierarchy: Send + Sync {
    fn propagate_change(&self, visited: &mut Vec<usize>);
    fn propagate_invalidate(&self, visited: &mut Vec<usize>);
}

/// Where a record is in its load lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    /// Nothing loaded and no load pending.
    Unbound,
    /// A source is set but automatic loading is suppressed.
    Deferred,
    /// A load is in flight.
    Loading,
    /// The last load succeeded.
    Loaded,
    /// The last load failed.
    Errored,
}

impl fmt::Display for LoadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadState::Unbound => write!(f, "unbound"),
            LoadState::Deferred => write!(f, "deferred"),
            LoadState::Loading => write!(f, "loading"),
            LoadState::Loaded => write!(f, "loaded"),
            LoadState::Errored => write!(f, "errored"),
        }
    }
}

#[derive(Debug, Clone)]
enum LastResult {
    Success,
    Failure(Failure),
}

struct RecordState<H: Target> {
    manager: Manager,
    source: Option<Source>,
    deferred: bool,
    completed: bool,
    loaded: bool,
    last: Option<LastResult>,
    last_success: Option<DateTime<Utc>>,
    callbacks: Vec<CallbackRecord<H>>,
    refresh_interval: Option<Duration>,
    layout: Layout,
    error_type: Option<ModelType>,
    error_depth: usize,
    request_transformers: Vec<RequestTransformer>,
    response_transformers: Vec<ResponseTransformer>,
    credentials: Option<Credentials>,
    parent: Option<ParentLink>,
    detached: bool,
}

impl<H: Target> RecordState<H> {
    fn new(manager: Manager) -> Self {
        Self {
            manager,
            source: None,
            deferred: false,
            completed: false,
            loaded: false,
            last: None,
            last_success: None,
            callbacks: Vec::new(),
            refresh_interval: None,
            layout: Layout::default(),
            error_type: None,
            error_depth: 0,
            request_transformers: Vec::new(),
            response_transformers: Vec::new(),
            credentials: None,
            parent: None,
            detached: false,
        }
    }

    fn is_loading(&self) -> bool {
        self.source.as_ref().is_some_and(Source::is_loading)
    }

    /// Source that can start a load right now.
    fn idle_source(&self) -> Option<&Source> {
        if self.detached {
            return None;
        }
        self.source
            .as_ref()
            .filter(|s| s.is_active() && !s.is_loading())
    }

    fn wants_autoload(&self, now: DateTime<Utc>) -> bool {
        !self.deferred
            && self
                .idle_source()
                .is_some_and(|s| !self.completed || s.is_stale(now))
    }

    fn is_current(&self, token: Uuid) -> bool {
        self.source.as_ref().is_some_and(|s| s.is_current(token))
    }

    /// Completions (consumed) followed by live dependencies. Dead
    /// dependencies are dropped.
    fn take_callbacks(&mut self) -> Vec<CallbackRecord<H>> {
        let mut completions = Vec::new();
        let mut dependencies = Vec::new();
        self.callbacks.retain(|cb| {
            if cb.is_completion() {
                completions.push(cb.clone());
                false
            } else if cb.is_live() {
                dependencies.push(cb.clone());
                true
            } else {
                false
            }
        });
        completions.extend(dependencies);
        completions
    }

    fn live_dependencies(&mut self) -> Vec<CallbackRecord<H>> {
        self.callbacks
            .retain(|cb| cb.is_completion() || cb.is_live());
        self.callbacks
            .iter()
            .filter(|cb| !cb.is_completion())
            .cloned()
            .collect()
    }
}

struct Record<H: Target> {
    me: Weak<Record<H>>,
    host: H::Weak,
    state: Mutex<RecordState<H>>,
    decoding: Mutex<()>,
    finished: watch::Sender<u64>,
}

impl<H: Target> Record<H> {
    fn addr(&self) -> usize {
        self as *const Self as usize
    }

    fn host(&self) -> Option<H> {
        H::upgrade(&self.host)
    }

    fn outcome(&self, last: &Option<LastResult>) -> Option<Outcome<H>> {
        match last {
            Some(LastResult::Success) => self.host().map(Outcome::Loaded),
            Some(LastResult::Failure(failure)) => Some(Outcome::Failed(failure.clone())),
            None => None,
        }
    }

    fn notify_finished(&self) {
        self.finished.send_modify(|generation| *generation += 1);
    }

    fn parent(&self) -> Option<Arc<dyn Hierarchy>> {
        self.state.lock().parent.as_ref().and_then(Weak::upgrade)
    }
}

impl<H: Target> Hierarchy for Record<H> {
    fn propagate_change(&self, visited: &mut Vec<usize>) {
        if visited.contains(&self.addr()) {
            return;
        }
        visited.push(self.addr());

        let (dependencies, outcome) = {
            let mut st = self.state.lock();
            if st.detached {
                return;
            }
            let outcome = match &st.last {
                Some(LastResult::Failure(failure)) => Some(Outcome::Failed(failure.clone())),
                _ => self.host().map(Outcome::Loaded),
            };
            (st.live_dependencies(), outcome)
        };

        if let Some(outcome) = outcome {
            for callback in dependencies.iter().filter(|cb| cb.is_live()) {
                callback.fire(&outcome);
            }
        }
        if let Some(parent) = self.parent() {
            parent.propagate_change(visited);
        }
    }

    fn propagate_invalidate(&self, visited: &mut Vec<usize>) {
        if visited.contains(&self.addr()) {
            return;
        }
        visited.push(self.addr());

        let restart = {
            let mut st = self.state.lock();
            let interrupted = st.is_loading();
            st.completed = false;
            st.last = None;
            if let Some(source) = st.source.as_mut() {
                source.reset();
            }
            interrupted && st.callbacks.iter().any(CallbackRecord::is_completion)
        };
        tracing::debug!("{} invalidated", H::model_type().name());

        // Waiting completions are owed a result.
        if restart {
            if let Some(record) = self.me.upgrade() {
                tracing::debug!("restarting interrupted {} load", H::model_type().name());
                Metadata { record }.start_load();
            }
        }
        self.notify_finished();

        if let Some(parent) = self.parent() {
            parent.propagate_invalidate(visited);
        }
    }
}

/// Everything a load needs, captured under the record lock.
struct LoadPlan {
    token: Uuid,
    method: Method,
    url: String,
    payload: Payload,
    credentials: Option<Credentials>,
    record_request: Vec<RequestTransformer>,
    source_request: Vec<RequestTransformer>,
    manager: Manager,
}

/// Decode settings captured when a response arrives.
struct DecodeContext {
    layout: Layout,
    error_type: Option<ModelType>,
    error_depth: usize,
    response_chain: Vec<ResponseTransformer>,
}

/// Callbacks to fire once the locks are released.
struct Settle<H> {
    callbacks: Vec<CallbackRecord<H>>,
    outcome: Option<Outcome<H>>,
    propagate: bool,
}

fn programmer_error(message: &str) {
    tracing::error!("{}", message);
    debug_assert!(false, "{}", message);
}

/// The metadata record of a bound host.
///
/// Cloning yields another handle onto the same record. Most methods return
/// `&Self` so configuration chains.
pub struct Metadata<H: Target> {
    record: Arc<Record<H>>,
}

impl<H: Target> Clone for Metadata<H> {
    fn clone(&self) -> Self {
        Self {
            record: Arc::clone(&self.record),
        }
    }
}

impl<H: Target> fmt::Debug for Metadata<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Metadata")
            .field("model", &H::model_type().name())
            .field("state", &self.state())
            .field("callbacks", &self.callback_count())
            .finish()
    }
}

impl<H: Target> Metadata<H> {
    /// A fresh record for `host`.
    pub(crate) fn attach(host: &H, manager: Manager) -> Self {
        let (finished, _) = watch::channel(0);
        tracing::trace!("attaching {} record", H::model_type().name());
        Self {
            record: Arc::new_cyclic(|me| Record {
                me: me.clone(),
                host: host.downgrade(),
                state: Mutex::new(RecordState::new(manager)),
                decoding: Mutex::new(()),
                finished,
            }),
        }
    }

    /// Whether both handles refer to the same record.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.record, &other.record)
    }

    /// The host, if it is still alive.
    pub fn host(&self) -> Option<H> {
        self.record.host()
    }

    pub fn manager(&self) -> Manager {
        self.record.state.lock().manager.clone()
    }

    pub fn set_manager(&self, manager: &Manager) -> &Self {
        self.record.state.lock().manager = manager.clone();
        self
    }

    // ---- sources ----

    /// Point the record at a new source. Does not load.
    ///
    /// The previous source is dropped along with any load it has in flight.
    /// The record is no longer completed, but stays loaded if it ever was.
    pub fn send(&self, method: Method, url: impl Into<String>, payload: Payload) -> &Self {
        let mut st = self.record.state.lock();
        if st.detached {
            tracing::debug!("ignoring new source on uninstalled record");
            return self;
        }
        let mut source = Source::new(method, url, payload);
        source.set_refresh_interval(st.refresh_interval);
        tracing::debug!(
            "{} source set to {} {}",
            H::model_type().name(),
            method,
            source.url()
        );
        st.source = Some(source);
        st.completed = false;
        st.last = None;
        self
    }

    pub fn get_from_url(&self, url: impl Into<String>) -> &Self {
        self.send(Method::Get, url, Payload::None)
    }

    /// PUT the host itself to `url`.
    pub fn put_to_url(&self, url: impl Into<String>) -> &Self {
        self.send(Method::Put, url, Payload::Host)
    }

    /// POST the host itself to `url`.
    pub fn post_to_url(&self, url: impl Into<String>) -> &Self {
        self.send(Method::Post, url, Payload::Host)
    }

    pub fn delete_from_url(&self, url: impl Into<String>) -> &Self {
        self.send(Method::Delete, url, Payload::None)
    }

    pub fn get_self(&self) -> &Self {
        self.repoint(Method::Get)
    }

    pub fn put_self(&self) -> &Self {
        self.repoint(Method::Put)
    }

    pub fn post_self(&self) -> &Self {
        self.repoint(Method::Post)
    }

    pub fn delete_self(&self) -> &Self {
        self.repoint(Method::Delete)
    }

    fn repoint(&self, method: Method) -> &Self {
        let url = self
            .record
            .state
            .lock()
            .source
            .as_ref()
            .map(|s| s.url().to_string());
        match url {
            Some(url) => {
                let payload = if method.sends_payload() {
                    Payload::Host
                } else {
                    Payload::None
                };
                self.send(method, url, payload)
            }
            None => {
                tracing::warn!(
                    "{} has no source to {} to",
                    H::model_type().name(),
                    method
                );
                self
            }
        }
    }

    // ---- callbacks ----

    /// Call `callback` once, when the next load completes.
    pub fn on_complete<F>(&self, callback: F) -> &Self
    where
        F: Fn(&Outcome<H>) + Send + Sync + 'static,
    {
        self.add_callback(CallbackRecord::completion(self.host(), Arc::new(callback), None))
    }

    /// Call `success` or `failure` once, when the next load completes.
    pub fn on_complete_or_fail<S, F>(&self, success: S, failure: F) -> &Self
    where
        S: Fn(&Outcome<H>) + Send + Sync + 'static,
        F: Fn(&Outcome<H>) + Send + Sync + 'static,
    {
        self.add_callback(CallbackRecord::completion(
            self.host(),
            Arc::new(success),
            Some(Arc::new(failure)),
        ))
    }

    /// Call `callback` on every completed load and change signal.
    pub fn on_change<F>(&self, callback: F) -> &Self
    where
        F: Fn(&Outcome<H>) + Send + Sync + 'static,
    {
        self.add_callback(CallbackRecord::dependency(None, Arc::new(callback)))
    }

    /// Like [`on_change`](Self::on_change), for as long as `owner` is alive.
    pub fn on_change_for<F>(&self, owner: Observer, callback: F) -> &Self
    where
        F: Fn(&Outcome<H>) + Send + Sync + 'static,
    {
        self.add_callback(CallbackRecord::dependency(Some(owner), Arc::new(callback)))
    }

    fn add_callback(&self, callback: CallbackRecord<H>) -> &Self {
        let now = Utc::now();
        let (immediate, autoload) = {
            let mut st = self.record.state.lock();
            if st.detached {
                drop(st);
                programmer_error("callback attached to an uninstalled record");
                return self;
            }
            if st.wants_autoload(now) {
                st.callbacks.push(callback);
                (None, true)
            } else if st.completed && !st.is_loading() {
                match self.record.outcome(&st.last) {
                    Some(outcome) => {
                        if !callback.is_completion() {
                            st.callbacks.push(callback.clone());
                        }
                        (Some((callback, outcome)), false)
                    }
                    None => {
                        st.callbacks.push(callback);
                        (None, false)
                    }
                }
            } else {
                st.callbacks.push(callback);
                (None, false)
            }
        };

        if let Some((callback, outcome)) = immediate {
            callback.fire(&outcome);
        }
        if autoload {
            self.start_load();
        }
        self
    }

    // ---- loading ----

    /// Load unless a load is in flight or the record is freshly completed.
    pub fn load(&self) -> &Self {
        self.load_with(false)
    }

    /// Like [`load`](Self::load); `force` also loads a fresh record.
    pub fn load_with(&self, force: bool) -> &Self {
        let go = {
            let st = self.record.state.lock();
            st.idle_source()
                .is_some_and(|s| force || !st.completed || s.is_stale(Utc::now()))
        };
        if go {
            self.start_load();
        }
        self
    }

    /// Load again, superseding any load in flight.
    pub fn reload(&self) -> &Self {
        self.reload_with(true)
    }

    /// With `force` false, do nothing if a load is in flight or the last
    /// load succeeded.
    pub fn reload_with(&self, force: bool) -> &Self {
        if force {
            self.start_load();
            return self;
        }
        let go = {
            let st = self.record.state.lock();
            st.idle_source().is_some()
                && !(st.completed && matches!(st.last, Some(LastResult::Success)))
        };
        if go {
            self.start_load();
        }
        self
    }

    /// Reload if the last successful load is older than `age`, never
    /// happened, or was invalidated.
    pub fn reload_if_older_than(&self, age: Duration) -> &Self {
        let go = {
            let st = self.record.state.lock();
            let expired = match (st.last_success, chrono::Duration::from_std(age)) {
                (Some(at), Ok(age)) => Utc::now() - at > age,
                (Some(_), Err(_)) => false,
                (None, _) => true,
            };
            st.idle_source().is_some() && (!st.completed || expired)
        };
        if go {
            self.start_load();
        } else {
            tracing::trace!("{} is recent enough, not reloading", H::model_type().name());
        }
        self
    }

    /// Register a completion and load, unless a load is already in flight.
    pub fn load_with_completion<F>(&self, callback: F) -> &Self
    where
        F: Fn(&Outcome<H>) + Send + Sync + 'static,
    {
        self.queue_and_load(CallbackRecord::completion(self.host(), Arc::new(callback), None))
    }

    pub fn load_with_completion_or_fail<S, F>(&self, success: S, failure: F) -> &Self
    where
        S: Fn(&Outcome<H>) + Send + Sync + 'static,
        F: Fn(&Outcome<H>) + Send + Sync + 'static,
    {
        self.queue_and_load(CallbackRecord::completion(
            self.host(),
            Arc::new(success),
            Some(Arc::new(failure)),
        ))
    }

    fn queue_and_load(&self, callback: CallbackRecord<H>) -> &Self {
        let loading = {
            let mut st = self.record.state.lock();
            if st.detached {
                drop(st);
                programmer_error("callback attached to an uninstalled record");
                return self;
            }
            st.callbacks.push(callback);
            st.is_loading()
        };
        if !loading {
            self.start_load();
        }
        self
    }

    fn start_load(&self) {
        let plan = {
            let mut st = self.record.state.lock();
            if st.detached {
                return;
            }
            let manager = st.manager.clone();
            let credentials = st.credentials.clone();
            let record_request = st.request_transformers.clone();
            let Some(source) = st.source.as_mut() else {
                tracing::debug!("{} has no source to load", H::model_type().name());
                return;
            };
            if !source.is_active() {
                tracing::debug!("{} source is inactive", H::model_type().name());
                return;
            }
            let plan = LoadPlan {
                token: source.begin(Utc::now()),
                method: source.method(),
                url: source.url().to_string(),
                payload: source.payload().clone(),
                credentials,
                record_request,
                source_request: source.request_transformers.clone(),
                manager,
            };
            st.completed = false;
            plan
        };

        tracing::debug!(
            "{} loading {} {}",
            H::model_type().name(),
            plan.method,
            plan.url
        );

        let body = match &plan.payload {
            Payload::None => None,
            Payload::Host => Some(self.to_json().to_string().into_bytes()),
            Payload::Json(value) => Some(value.to_string().into_bytes()),
            Payload::Bytes(bytes) => Some(bytes.clone()),
        };
        {
            let mut st = self.record.state.lock();
            if let Some(source) = st.source.as_mut().filter(|s| s.is_current(plan.token)) {
                source.set_payload_data(body.clone());
            }
        }

        let manager = plan.manager.clone();
        manager.begin_request();
        let request = match self.build_request(&plan, body) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!("cannot build request for {}: {}", plan.url, e);
                self.complete(plan.token, Err(e));
                return;
            }
        };

        match manager.runtime() {
            Some(handle) => {
                let transport = manager.transport();
                let record = self.clone();
                let token = plan.token;
                handle.spawn(async move {
                    let result = transport.execute(request).await;
                    record.complete(token, result);
                });
            }
            None => {
                tracing::error!("no tokio runtime to load {} on", plan.url);
                self.complete(plan.token, Err(TransportError::NoRuntime));
            }
        }
    }

    fn build_request(&self, plan: &LoadPlan, body: Option<Vec<u8>>) -> Result<Request, TransportError> {
        let manager = &plan.manager;
        let mut request = Request::new(plan.method, manager.resolve_url(&plan.url)?);
        request.headers = manager.default_headers();
        request.timeout = manager.timeout();
        request.body = body;
        request.basic_auth = plan.credentials.clone();

        manager.transform_request_for(H::model_type().type_id(), &mut request);
        apply_request_chain(&plan.record_request, &mut request);
        apply_request_chain(&plan.source_request, &mut request);
        Ok(request)
    }

    fn complete(&self, token: Uuid, result: Result<Response, TransportError>) {
        let manager = self.manager();
        manager.end_request();
        manager.note_response(&result);

        let Some(context) = self.decode_context(token) else {
            return;
        };
        let (status, body, prepared) = match result {
            Err(e) => (None, None, Err(Failure::new(e.into()))),
            Ok(response) => {
                let prepared = self.prepare(&manager, &context, &response);
                (Some(response.status), Some(response.body), prepared)
            }
        };

        // Delegates run outside the decode lock and may re-enter the record.
        let announced = prepared.is_ok();
        if let Ok(tree) = &prepared {
            manager.notify(|delegate| delegate.will_load(tree.as_ref().unwrap_or(&Value::Null)));
        }

        let settle = {
            let _decoding = self.record.decoding.lock();
            let current = self.record.state.lock().is_current(token);
            if current {
                let result = prepared.map(|tree| {
                    if let Some(tree) = tree {
                        self.decode_tree(&manager, &context, &tree);
                    }
                });
                let mut st = self.record.state.lock();
                if st.is_current(token) {
                    Some(self.settle(&mut st, status, body, result))
                } else {
                    None
                }
            } else {
                None
            }
        };

        if announced {
            manager.notify(|delegate| delegate.did_load());
        }
        match settle {
            Some(settle) => self.dispatch(settle),
            None => tracing::debug!(
                "{} was superseded while decoding",
                H::model_type().name()
            ),
        }
    }

    /// Decode settings for the load holding `token`, or `None` if it was
    /// superseded.
    fn decode_context(&self, token: Uuid) -> Option<DecodeContext> {
        let st = self.record.state.lock();
        if !st.is_current(token) {
            tracing::debug!(
                "discarding superseded {} response",
                H::model_type().name()
            );
            return None;
        }
        let mut response_chain = st.response_transformers.clone();
        if let Some(source) = st.source.as_ref() {
            response_chain.extend(source.response_transformers.iter().cloned());
        }
        Some(DecodeContext {
            layout: st.layout.clone(),
            error_type: st.error_type,
            error_depth: st.error_depth,
            response_chain,
        })
    }

    /// Parse and transform a response body. A success yields the tree to
    /// decode into the host, if the body had one.
    fn prepare(
        &self,
        manager: &Manager,
        context: &DecodeContext,
        response: &Response,
    ) -> Result<Option<Value>, Failure> {
        let tree = if response.body.iter().all(u8::is_ascii_whitespace) {
            None
        } else {
            match serde_json::from_slice::<Value>(&response.body) {
                Ok(tree) => Some(tree),
                Err(e) if response.is_success() => {
                    return Err(Failure::new(LoadError::Decode(e.to_string()))
                        .with_status(response.status));
                }
                Err(e) => {
                    tracing::debug!("error body is not JSON: {}", e);
                    None
                }
            }
        };
        let tree = tree.map(|tree| {
            let tree = manager.transform_response_for(H::model_type().type_id(), tree);
            apply_response_chain(&context.response_chain, tree)
        });

        if !response.is_success() {
            let mut failure = Failure::new(LoadError::Status {
                status: response.status,
            });
            let error_type = context.error_type.or_else(|| manager.default_error_type());
            if let (Some(tree), Some(error_type)) = (&tree, error_type) {
                failure.error_object = manager
                    .decode_error(error_type, tree, context.error_depth)
                    .map(|object| (error_type, object));
            }
            return Err(failure);
        }
        Ok(tree)
    }

    fn decode_tree(&self, manager: &Manager, context: &DecodeContext, tree: &Value) {
        let Some(host) = self.host() else {
            return;
        };
        let parent = manager.track_parents().then(|| self.as_parent());
        let decoded =
            manager.with_mapper(parent, |mapper| host.decode(mapper, tree, &context.layout));
        match decoded {
            Ok(count) => tracing::debug!("decoded {} {} object(s)", count, H::model_type().name()),
            Err(e) => tracing::debug!("{}", e),
        }
    }

    fn settle(
        &self,
        st: &mut RecordState<H>,
        status: Option<u16>,
        body: Option<Vec<u8>>,
        result: Result<(), Failure>,
    ) -> Settle<H> {
        let now = Utc::now();
        if let Some(source) = st.source.as_mut() {
            match &result {
                Ok(()) => source.finish_success(status.unwrap_or(200), body.unwrap_or_default(), now),
                Err(failure) => {
                    source.finish_failure(failure.status, failure.error.clone(), body, now)
                }
            }
        }

        let succeeded = result.is_ok();
        st.completed = true;
        st.last = Some(match result {
            Ok(()) => {
                st.loaded = true;
                st.last_success = Some(now);
                LastResult::Success
            }
            Err(failure) => {
                tracing::debug!("{} load failed: {}", H::model_type().name(), failure.error);
                LastResult::Failure(failure)
            }
        });

        let outcome = self.record.outcome(&st.last);
        let callbacks = if outcome.is_some() {
            st.take_callbacks()
        } else {
            Vec::new()
        };
        Settle {
            callbacks,
            outcome,
            propagate: succeeded,
        }
    }

    fn dispatch(&self, settle: Settle<H>) {
        if let Some(outcome) = &settle.outcome {
            for callback in settle.callbacks.iter().filter(|cb| cb.is_live()) {
                tracing::trace!("firing callback registered at {}", callback.created());
                callback.fire(outcome);
            }
        }
        self.record.notify_finished();
        if settle.propagate {
            if let Some(parent) = self.record.parent() {
                parent.propagate_change(&mut vec![self.record.addr()]);
            }
        }
    }

    /// Wait until no load is in flight.
    pub async fn until_complete(&self) {
        let mut finished = self.record.finished.subscribe();
        while self.is_loading() {
            if finished.changed().await.is_err() {
                break;
            }
        }
    }

    // ---- state changes ----

    /// Drop the loaded state and any load in flight, keeping the source.
    /// Propagates to the parent record.
    ///
    /// A load in flight with completions waiting on it is started again, so
    /// those completions still fire once. Dependencies alone do not restart
    /// it.
    pub fn invalidate(&self) -> &Self {
        self.record.propagate_invalidate(&mut Vec::new());
        self
    }

    /// Fire dependency callbacks without loading. Propagates to the parent
    /// record.
    pub fn signal_change(&self) -> &Self {
        self.record.propagate_change(&mut Vec::new());
        self
    }

    /// Detach the record from its host and drop its callbacks.
    pub fn uninstall(&self) {
        {
            let mut st = self.record.state.lock();
            st.detached = true;
            st.callbacks.clear();
            st.parent = None;
            if let Some(source) = st.source.as_mut() {
                source.reset();
            }
        }
        self.record.notify_finished();
        if let Some(host) = self.host() {
            host.detach_record(self);
        }
        tracing::debug!("{} record uninstalled", H::model_type().name());
    }

    // ---- local data ----

    /// Populate the host from `tree` as if it had been loaded.
    pub fn load_with_json(&self, tree: &Value) -> Result<&Self, MappingError> {
        let Some(host) = self.host() else {
            return Ok(self);
        };
        let (manager, layout) = {
            let st = self.record.state.lock();
            if st.detached {
                tracing::debug!("ignoring local load on uninstalled record");
                return Ok(self);
            }
            (st.manager.clone(), st.layout.clone())
        };

        let settle = {
            let _decoding = self.record.decoding.lock();
            let parent = manager.track_parents().then(|| self.as_parent());
            manager.with_mapper(parent, |mapper| host.decode(mapper, tree, &layout))?;

            let mut st = self.record.state.lock();
            let now = Utc::now();
            st.completed = true;
            st.loaded = true;
            st.last_success = Some(now);
            st.last = Some(LastResult::Success);
            Settle {
                callbacks: st.take_callbacks(),
                outcome: Some(Outcome::Loaded(host)),
                propagate: true,
            }
        };
        self.dispatch(settle);
        Ok(self)
    }

    /// Parse `text` and populate the host from it.
    pub fn load_with_json_str(&self, text: &str) -> Result<&Self, MappingError> {
        let tree: Value = serde_json::from_str(text)?;
        self.load_with_json(&tree)
    }

    /// Serialize the host.
    pub fn to_json(&self) -> Value {
        self.to_json_template(None)
    }

    /// Serialize the host, keeping only keys present in `template`.
    pub fn to_json_template(&self, template: Option<&Value>) -> Value {
        let Some(host) = self.host() else {
            return Value::Null;
        };
        self.manager()
            .with_mapper(None, |mapper| host.encode(mapper, template))
    }

    pub fn to_json_string(&self, pretty: bool) -> String {
        let value = self.to_json();
        if pretty {
            format!("{:#}", value)
        } else {
            value.to_string()
        }
    }

    // ---- configuration ----

    /// Suppress automatic loading.
    pub fn defer(&self) -> &Self {
        self.set_deferred(true)
    }

    /// Lifting deferral loads right away if callbacks are waiting.
    pub fn set_deferred(&self, deferred: bool) -> &Self {
        let autoload = {
            let mut st = self.record.state.lock();
            st.deferred = deferred;
            !deferred && !st.callbacks.is_empty() && st.wants_autoload(Utc::now())
        };
        if autoload {
            self.start_load();
        }
        self
    }

    /// Completed data older than `interval` is reloaded by the next trigger.
    pub fn set_refresh_interval(&self, interval: impl Into<Option<Duration>>) -> &Self {
        let interval = interval.into();
        let mut st = self.record.state.lock();
        st.refresh_interval = interval;
        if let Some(source) = st.source.as_mut() {
            source.set_refresh_interval(interval);
        }
        self
    }

    /// Merge decoded elements into a collection instead of replacing it.
    pub fn set_append(&self, append: bool) -> &Self {
        self.record.state.lock().layout.append = append;
        self
    }

    pub fn set_sort_key(&self, key: Option<&str>) -> &Self {
        self.record.state.lock().layout.sort_key = key.map(str::to_string);
        self
    }

    /// Depth in the response tree at which the native type is instantiated.
    pub fn set_class_depth(&self, depth: usize) -> &Self {
        self.record.state.lock().layout.class_depth = Some(depth);
        self
    }

    /// Decode non-2xx bodies as `E`.
    pub fn set_error_type<E: Model>(&self) -> &Self {
        self.record.state.lock().error_type = Some(ModelType::of::<E>());
        self
    }

    pub fn set_error_depth(&self, depth: usize) -> &Self {
        self.record.state.lock().error_depth = depth;
        self
    }

    /// Add a request transformer for this record's loads.
    pub fn with_request_transformer<F>(&self, transformer: F) -> &Self
    where
        F: Fn(&mut Request) + Send + Sync + 'static,
    {
        self.record
            .state
            .lock()
            .request_transformers
            .push(Arc::new(transformer));
        self
    }

    /// Add a response transformer for this record's loads.
    pub fn with_response_transformer<F>(&self, transformer: F) -> &Self
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        self.record
            .state
            .lock()
            .response_transformers
            .push(Arc::new(transformer));
        self
    }

    /// Add a request transformer to the current source only.
    pub fn with_source_request_transformer<F>(&self, transformer: F) -> &Self
    where
        F: Fn(&mut Request) + Send + Sync + 'static,
    {
        if let Some(source) = self.record.state.lock().source.as_mut() {
            source.request_transformers.push(Arc::new(transformer));
        }
        self
    }

    /// Add a response transformer to the current source only.
    pub fn with_source_response_transformer<F>(&self, transformer: F) -> &Self
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        if let Some(source) = self.record.state.lock().source.as_mut() {
            source.response_transformers.push(Arc::new(transformer));
        }
        self
    }

    /// Send basic-auth credentials with every load.
    pub fn with_username(&self, username: impl Into<String>, password: impl Into<String>) -> &Self {
        self.record.state.lock().credentials =
            Some(Credentials::new(username, Some(password.into())));
        self
    }

    /// Enable or disable the current source.
    pub fn set_active(&self, active: bool) -> &Self {
        if let Some(source) = self.record.state.lock().source.as_mut() {
            source.set_active(active);
        }
        self
    }

    // ---- accessors ----

    pub fn state(&self) -> LoadState {
        let st = self.record.state.lock();
        if st.is_loading() {
            LoadState::Loading
        } else if st.completed {
            match st.last {
                Some(LastResult::Failure(_)) => LoadState::Errored,
                _ => LoadState::Loaded,
            }
        } else if st.deferred && st.source.is_some() {
            LoadState::Deferred
        } else {
            LoadState::Unbound
        }
    }

    pub fn is_loading(&self) -> bool {
        self.record.state.lock().is_loading()
    }

    /// Whether any load ever succeeded. Stays true across reloads,
    /// failures and invalidation.
    pub fn is_loaded(&self) -> bool {
        self.record.state.lock().loaded
    }

    /// Whether the last load finished, successfully or not.
    pub fn is_completed(&self) -> bool {
        self.record.state.lock().completed
    }

    pub fn is_deferred(&self) -> bool {
        self.record.state.lock().deferred
    }

    /// False once the record was uninstalled.
    pub fn is_attached(&self) -> bool {
        !self.record.state.lock().detached
    }

    /// Error of the last completed load.
    pub fn error(&self) -> Option<LoadError> {
        self.failure().map(|f| f.error)
    }

    /// Failure of the last completed load.
    pub fn failure(&self) -> Option<Failure> {
        match &self.record.state.lock().last {
            Some(LastResult::Failure(failure)) => Some(failure.clone()),
            _ => None,
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        self.record
            .state
            .lock()
            .source
            .as_ref()
            .and_then(Source::status_code)
    }

    /// Snapshot of the current source.
    pub fn source(&self) -> Option<Source> {
        self.record.state.lock().source.clone()
    }

    /// Time of the last successful load.
    pub fn loaded_at(&self) -> Option<DateTime<Utc>> {
        self.record.state.lock().last_success
    }

    pub fn callback_count(&self) -> usize {
        self.record.state.lock().callbacks.len()
    }

    pub fn has_parent(&self) -> bool {
        self.record.parent().is_some()
    }

    // ---- hierarchy ----

    /// Link this record below `parent`. Links to itself are ignored.
    pub(crate) fn set_parent(&self, parent: ParentLink) {
        if parent.as_ptr() as *const () as usize == self.record.addr() {
            return;
        }
        self.record.state.lock().parent = Some(parent);
    }

    pub(crate) fn as_parent(&self) -> ParentLink {
        let link: Weak<dyn Hierarchy> = Arc::downgrade(&self.record) as Weak<dyn Hierarchy>;
        link
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use parking_lot::Mutex;
    use serde_json::json;

    use super::*;
    use crate::binding::{Resource, Target};
    use crate::schema::{Field, Slot};
    use crate::transport::mock::MockTransport;

    const URL: &str = "http://api.test/notes/1";

    #[derive(Debug, Default)]
    struct Note {
        id: Option<i64>,
        text: String,
    }

    impl Model for Note {
        const NAME: &'static str = "Note";

        fn fields() -> &'static [Field] {
            const FIELDS: &[Field] = &[Field::value("id"), Field::value("text")];
            FIELDS
        }

        fn identity() -> Option<&'static str> {
            Some("id")
        }

        fn read(&self, property: &str) -> Option<Slot> {
            match property {
                "id" => Some(Slot::value(&self.id)),
                "text" => Some(Slot::value(&self.text)),
                _ => None,
            }
        }

        fn write(&mut self, property: &str, value: Slot) -> bool {
            match property {
                "id" => value.assign(&mut self.id),
                "text" => value.assign(&mut self.text),
                _ => false,
            }
        }
    }

    fn setup() -> (Manager, MockTransport) {
        let mock = MockTransport::new();
        let manager = Manager::builder()
            .transport(Arc::new(mock.clone()))
            .build();
        (manager, mock)
    }

    fn counter() -> (Arc<AtomicUsize>, impl Fn(&Outcome<Resource<Note>>) + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        (count, move |_: &Outcome<Resource<Note>>| {
            c.fetch_add(1, Ordering::SeqCst);
        })
    }

    async fn drained(manager: &Manager) {
        for _ in 0..400 {
            if manager.active_requests() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("requests still in flight");
    }

    #[test]
    fn load_state_display() {
        assert_eq!(LoadState::Unbound.to_string(), "unbound");
        assert_eq!(LoadState::Errored.to_string(), "errored");
    }

    #[test]
    fn pointing_at_a_url_does_not_load() {
        let (manager, mock) = setup();
        let note = Resource::<Note>::default();
        let metadata = note.bind_to(&manager);

        metadata.get_from_url(URL);
        assert_eq!(metadata.state(), LoadState::Unbound);
        assert_eq!(mock.request_count(), 0);

        metadata.defer();
        assert_eq!(metadata.state(), LoadState::Deferred);
        metadata.on_change(|_| {});
        assert_eq!(metadata.state(), LoadState::Deferred);
        assert_eq!(metadata.callback_count(), 1);
    }

    #[test]
    fn loading_without_a_runtime_fails_synchronously() {
        let (manager, mock) = setup();
        let note = Resource::<Note>::default();
        let seen = Arc::new(Mutex::new(None));
        let s = seen.clone();

        note.bind_to(&manager)
            .get_from_url(URL)
            .on_complete(move |outcome| {
                *s.lock() = outcome.failure().map(|f| f.error.clone());
            });

        assert_eq!(
            *seen.lock(),
            Some(LoadError::Transport(TransportError::NoRuntime))
        );
        assert_eq!(manager.active_requests(), 0);
        assert_eq!(mock.request_count(), 0);
        assert_eq!(note.metadata().state(), LoadState::Errored);
    }

    #[tokio::test]
    async fn completed_record_answers_callbacks_without_network() {
        let (manager, mock) = setup();
        mock.reply_json(Method::Get, URL, 200, json!({"id": 1, "text": "hi"}));
        let note = Resource::<Note>::default();
        let metadata = note.bind_to(&manager);

        metadata.get_from_url(URL).on_complete(|_| {});
        metadata.until_complete().await;
        assert_eq!(note.read(|n| n.text.clone()), "hi");
        assert_eq!(metadata.state(), LoadState::Loaded);
        assert_eq!(mock.request_count(), 1);

        let (completions, on_complete) = counter();
        metadata.on_complete(on_complete);
        assert_eq!(completions.load(Ordering::SeqCst), 1);
        assert_eq!(metadata.callback_count(), 0);

        let (changes, on_change) = counter();
        metadata.on_change(on_change);
        assert_eq!(changes.load(Ordering::SeqCst), 1);
        assert_eq!(metadata.callback_count(), 1);
        assert_eq!(mock.request_count(), 1);
    }

    #[tokio::test]
    async fn expired_refresh_interval_reloads_on_next_callback() {
        let (manager, mock) = setup();
        mock.reply_json(Method::Get, URL, 200, json!({"id": 1, "text": "hi"}));
        let note = Resource::<Note>::default();
        let metadata = note.bind_to(&manager);

        metadata
            .set_refresh_interval(Duration::ZERO)
            .get_from_url(URL)
            .on_complete(|_| {});
        metadata.until_complete().await;
        assert_eq!(mock.request_count(), 1);

        metadata.on_complete(|_| {});
        metadata.until_complete().await;
        assert_eq!(mock.request_count(), 2);
    }

    #[tokio::test]
    async fn soft_reload_skips_successful_records() {
        let (manager, mock) = setup();
        mock.reply_json(Method::Get, URL, 200, json!({"id": 1, "text": "hi"}));
        let note = Resource::<Note>::default();
        let metadata = note.bind_to(&manager);

        metadata.get_from_url(URL).load();
        metadata.until_complete().await;
        metadata.reload_with(false);
        metadata.load();
        assert!(!metadata.is_loading());

        metadata.reload();
        assert!(metadata.is_loading());
        metadata.until_complete().await;
        assert_eq!(mock.request_count(), 2);
    }

    #[tokio::test]
    async fn non_success_status_marks_errored() {
        let (manager, mock) = setup();
        mock.reply_json(Method::Get, URL, 500, json!({"message": "boom"}));
        let note = Resource::<Note>::default();
        let metadata = note.bind_to(&manager);

        let (failures, on_failure) = counter();
        let (successes, on_success) = counter();
        metadata
            .get_from_url(URL)
            .on_complete_or_fail(on_success, on_failure);
        metadata.until_complete().await;

        assert_eq!(failures.load(Ordering::SeqCst), 1);
        assert_eq!(successes.load(Ordering::SeqCst), 0);
        assert_eq!(metadata.state(), LoadState::Errored);
        assert_eq!(metadata.status_code(), Some(500));
        assert_eq!(metadata.error(), Some(LoadError::Status { status: 500 }));
        assert!(metadata.failure().and_then(|f| f.error_type()).is_none());
        assert!(!metadata.is_loaded());
    }

    #[tokio::test]
    async fn unparsable_success_body_is_a_decode_failure() {
        let (manager, mock) = setup();
        mock.reply_raw(Method::Get, URL, 200, "<html>");
        let note = Resource::<Note>::default();
        let metadata = note.bind_to(&manager);

        metadata.get_from_url(URL).load();
        metadata.until_complete().await;

        let failure = metadata.failure().unwrap();
        assert!(matches!(failure.error, LoadError::Decode(_)));
        assert_eq!(failure.status, Some(200));
        assert_eq!(metadata.state(), LoadState::Errored);
    }

    #[tokio::test]
    async fn invalidate_discards_the_response_in_flight() {
        let (manager, mock) = setup();
        mock.reply_json(Method::Get, URL, 200, json!({"id": 1, "text": "late"}));
        mock.hold();
        let note = Resource::<Note>::default();
        let metadata = note.bind_to(&manager);
        let (changes, on_change) = counter();

        metadata.get_from_url(URL).on_change(on_change);
        mock.wait_for_parked(1).await;
        metadata.invalidate();
        assert!(!metadata.is_loading());

        mock.resume();
        drained(&manager).await;

        assert_eq!(note.read(|n| n.text.clone()), "");
        assert_eq!(changes.load(Ordering::SeqCst), 0);
        assert_eq!(metadata.state(), LoadState::Unbound);
        assert_eq!(metadata.callback_count(), 1);
        assert_eq!(mock.request_count(), 1);
    }

    #[tokio::test]
    async fn invalidate_restarts_a_load_with_waiting_completions() {
        let (manager, mock) = setup();
        mock.reply_json(Method::Get, URL, 200, json!({"id": 1, "text": "stale"}));
        mock.reply_json(Method::Get, URL, 200, json!({"id": 1, "text": "fresh"}));
        mock.hold();
        let note = Resource::<Note>::default();
        let metadata = note.bind_to(&manager);
        let (completions, on_complete) = counter();

        metadata.get_from_url(URL).on_complete(on_complete);
        mock.wait_for_parked(1).await;
        metadata.invalidate();
        assert!(metadata.is_loading());
        mock.wait_for_parked(2).await;

        mock.resume();
        drained(&manager).await;
        metadata.until_complete().await;

        assert_eq!(completions.load(Ordering::SeqCst), 1);
        assert_eq!(note.read(|n| n.text.clone()), "fresh");
        assert_eq!(metadata.state(), LoadState::Loaded);
        assert_eq!(metadata.callback_count(), 0);
        assert_eq!(mock.request_count(), 2);
    }

    /// Delegate that loads local data into a record from its hooks.
    struct Reentrant {
        note: Mutex<Option<Resource<Note>>>,
        hooks: AtomicUsize,
    }

    impl crate::manager::Delegate for Reentrant {
        fn will_load(&self, _tree: &serde_json::Value) {
            self.hooks.fetch_add(1, Ordering::SeqCst);
        }

        fn did_load(&self) {
            self.hooks.fetch_add(1, Ordering::SeqCst);
            if let Some(note) = self.note.lock().clone() {
                let _ = note.metadata().load_with_json(&json!({"text": "from delegate"}));
            }
        }
    }

    #[tokio::test]
    async fn delegates_may_reenter_the_loading_record() {
        let (manager, mock) = setup();
        mock.reply_json(Method::Get, URL, 200, json!({"id": 1, "text": "remote"}));
        let note = Resource::<Note>::default();
        let metadata = note.bind_to(&manager);
        let reentrant = Arc::new(Reentrant {
            note: Mutex::new(Some(note.clone())),
            hooks: AtomicUsize::new(0),
        });
        let delegate: Arc<dyn crate::manager::Delegate> = reentrant.clone();
        manager.set_delegate(&delegate);

        metadata.get_from_url(URL).load();
        tokio::time::timeout(Duration::from_secs(5), metadata.until_complete())
            .await
            .unwrap();

        assert_eq!(reentrant.hooks.load(Ordering::SeqCst), 2);
        assert_eq!(note.read(|n| n.text.clone()), "from delegate");
        assert_eq!(metadata.state(), LoadState::Loaded);
        reentrant.note.lock().take();
    }

    #[tokio::test]
    async fn loaded_survives_new_sources_and_failures() {
        let (manager, mock) = setup();
        mock.reply_json(Method::Get, URL, 200, json!({"id": 1, "text": "hi"}));
        mock.reply_json(Method::Get, "http://api.test/missing", 404, json!({}));
        let note = Resource::<Note>::default();
        let metadata = note.bind_to(&manager);

        metadata.get_from_url(URL).load();
        metadata.until_complete().await;
        let first = metadata.loaded_at().unwrap();

        metadata.get_from_url("http://api.test/missing");
        assert!(!metadata.is_completed());
        metadata.load();
        metadata.until_complete().await;

        assert!(metadata.is_loaded());
        assert_eq!(metadata.state(), LoadState::Errored);
        assert_eq!(metadata.loaded_at(), Some(first));
        metadata.invalidate();
        assert!(metadata.is_loaded());
    }

    #[tokio::test]
    async fn put_sends_the_host_and_applies_the_reply() {
        let (manager, mock) = setup();
        mock.reply_json(Method::Put, URL, 200, json!({"id": 7, "text": "saved"}));
        let note = Resource::new(Note {
            id: Some(7),
            text: "draft".into(),
        });
        let metadata = note.bind_to(&manager);

        metadata.put_to_url(URL).load();
        metadata.until_complete().await;

        let request = mock.last_request().unwrap();
        assert_eq!(request.method, Method::Put);
        assert_eq!(request.body_json(), Some(json!({"id": 7, "text": "draft"})));
        assert_eq!(note.read(|n| n.text.clone()), "saved");
        let source = metadata.source().unwrap();
        assert_eq!(source.payload(), &Payload::Host);
        assert!(source.payload_data().is_some());
    }

    #[tokio::test]
    async fn re_pointing_keeps_the_url() {
        let (manager, mock) = setup();
        mock.reply_raw(Method::Delete, URL, 204, "");
        let note = Resource::<Note>::default();
        let metadata = note.bind_to(&manager);

        metadata.get_from_url(URL).delete_self().load();
        metadata.until_complete().await;

        let request = mock.last_request().unwrap();
        assert_eq!(request.method, Method::Delete);
        assert_eq!(request.url, URL);
        assert_eq!(metadata.state(), LoadState::Loaded);
    }

    #[test]
    fn re_pointing_without_a_source_is_ignored() {
        let (manager, _mock) = setup();
        let note = Resource::<Note>::default();
        let metadata = note.bind_to(&manager);
        metadata.put_self();
        assert!(metadata.source().is_none());
    }

    #[test]
    fn local_json_loads_and_fires_callbacks() {
        let (manager, _mock) = setup();
        let note = Resource::<Note>::default();
        let metadata = note.bind_to(&manager);
        let (changes, on_change) = counter();
        metadata.on_change(on_change);

        metadata
            .load_with_json_str(r#"{"id": 3, "text": "local"}"#)
            .unwrap();

        assert_eq!(changes.load(Ordering::SeqCst), 1);
        assert!(metadata.is_loaded());
        assert_eq!(metadata.state(), LoadState::Loaded);
        assert_eq!(note.read(|n| n.text.clone()), "local");
        assert!(manager
            .lookup::<Note>(&json!(3))
            .is_some_and(|found| found.ptr_eq(&note)));

        metadata.signal_change();
        assert_eq!(changes.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn local_json_without_an_object_is_rejected() {
        let (manager, _mock) = setup();
        let note = Resource::<Note>::default();
        let metadata = note.bind_to(&manager);

        assert!(matches!(
            metadata.load_with_json_str("[1, 2]"),
            Err(MappingError::NoObject { model: "Note", .. })
        ));
        assert!(matches!(
            metadata.load_with_json_str("{"),
            Err(MappingError::Json(_))
        ));
        assert!(!metadata.is_loaded());
    }

    #[test]
    fn json_output() {
        let (manager, _mock) = setup();
        let note = Resource::new(Note {
            id: Some(1),
            text: "a".into(),
        });
        let metadata = note.bind_to(&manager);

        assert_eq!(metadata.to_json_string(false), r#"{"id":1,"text":"a"}"#);
        assert!(metadata.to_json_string(true).contains('\n'));
        assert_eq!(
            metadata.to_json_template(Some(&json!({"text": null}))),
            json!({"text": "a"})
        );
    }

    #[test]
    fn uninstall_detaches_the_record() {
        let (manager, mock) = setup();
        let note = Resource::<Note>::default();
        let metadata = note.bind_to(&manager);
        metadata.get_from_url(URL).defer().on_change(|_| {});

        metadata.uninstall();
        assert!(!metadata.is_attached());
        assert!(!note.has_metadata());
        assert_eq!(metadata.callback_count(), 0);

        metadata.load();
        metadata.reload();
        assert!(!metadata.is_loading());
        assert_eq!(mock.request_count(), 0);

        let fresh = note.bind_to(&manager);
        assert!(!fresh.ptr_eq(&metadata));
        assert!(fresh.is_attached());
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "uninstalled")]
    fn callbacks_on_uninstalled_record_are_a_programmer_error() {
        let (manager, _mock) = setup();
        let note = Resource::<Note>::default();
        let metadata = note.bind_to(&manager);
        metadata.uninstall();
        metadata.on_complete(|_| {});
    }

    #[test]
    fn metadata_outlives_its_host_quietly() {
        let (manager, _mock) = setup();
        let note = Resource::<Note>::default();
        let metadata = note.bind_to(&manager);
        drop(note);

        assert!(metadata.host().is_none());
        assert_eq!(metadata.to_json(), serde_json::Value::Null);
        assert!(metadata.load_with_json_str(r#"{"text": "x"}"#).is_ok());
        assert!(!metadata.is_loaded());
    }
}
