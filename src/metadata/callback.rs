//! metadata::callback
//!
//! Callback records and observer liveness.
//!
//! # Design
//!
//! A completion callback fires once for the next completed load and is then
//! dropped. A dependency callback fires on every completed load and change
//! signal for as long as its observer is alive; an observer is anything
//! implementing [`Liveness`], typically a weak handle. Dead observers are
//! pruned the next time callbacks fire.

use std::fmt;
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};

use super::errors::Outcome;
use crate::binding::{WeakCollection, WeakResource};
use crate::schema::Model;

/// Closure invoked with the outcome of a load.
pub type Callback<H> = Arc<dyn Fn(&Outcome<H>) + Send + Sync>;

/// Reports whether an observer still exists.
pub trait Liveness: Send + Sync {
    fn is_alive(&self) -> bool;
}

impl<T: ?Sized + Send + Sync> Liveness for Weak<T> {
    fn is_alive(&self) -> bool {
        self.strong_count() > 0
    }
}

impl<T: Model> Liveness for WeakResource<T> {
    fn is_alive(&self) -> bool {
        WeakResource::is_alive(self)
    }
}

impl<T: Model> Liveness for WeakCollection<T> {
    fn is_alive(&self) -> bool {
        WeakCollection::is_alive(self)
    }
}

/// Type-erased liveness check held by a dependency callback.
#[derive(Clone)]
pub struct Observer(Arc<dyn Liveness>);

impl Observer {
    pub fn new(liveness: impl Liveness + 'static) -> Self {
        Self(Arc::new(liveness))
    }

    /// Observer that lives as long as `owner`.
    pub fn of<T: ?Sized + Send + Sync + 'static>(owner: &Arc<T>) -> Self {
        Self::new(Arc::downgrade(owner))
    }

    pub fn is_alive(&self) -> bool {
        self.0.is_alive()
    }
}

impl fmt::Debug for Observer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Observer").field(&self.is_alive()).finish()
    }
}

/// A token whose lifetime stands in for an observer's.
///
/// Useful when the observer is not itself reference counted: keep the
/// lifeline in the observer and register [`Lifeline::observer`].
#[derive(Debug, Default)]
pub struct Lifeline(Arc<()>);

impl Lifeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observer(&self) -> Observer {
        Observer::of(&self.0)
    }
}

#[derive(Clone)]
pub(crate) enum CallbackKind<H> {
    Completion {
        #[allow(dead_code)]
        target: Option<H>,
    },
    Dependency {
        owner: Option<Observer>,
    },
}

#[derive(Clone)]
pub(crate) struct CallbackRecord<H> {
    kind: CallbackKind<H>,
    success: Callback<H>,
    failure: Option<Callback<H>>,
    created: DateTime<Utc>,
}

impl<H> CallbackRecord<H> {
    /// One-shot callback. `target` keeps the host alive until it fires.
    pub(crate) fn completion(
        target: Option<H>,
        success: Callback<H>,
        failure: Option<Callback<H>>,
    ) -> Self {
        Self {
            kind: CallbackKind::Completion { target },
            success,
            failure,
            created: Utc::now(),
        }
    }

    /// Persistent callback, dropped once `owner` is gone.
    pub(crate) fn dependency(owner: Option<Observer>, success: Callback<H>) -> Self {
        Self {
            kind: CallbackKind::Dependency { owner },
            success,
            failure: None,
            created: Utc::now(),
        }
    }

    pub(crate) fn is_completion(&self) -> bool {
        matches!(self.kind, CallbackKind::Completion { .. })
    }

    pub(crate) fn is_live(&self) -> bool {
        match &self.kind {
            CallbackKind::Dependency { owner: Some(owner) } => owner.is_alive(),
            _ => true,
        }
    }

    pub(crate) fn created(&self) -> DateTime<Utc> {
        self.created
    }

    /// Invoke the failure closure on failure if there is one, else the
    /// success closure.
    pub(crate) fn fire(&self, outcome: &Outcome<H>) {
        match (outcome, &self.failure) {
            (Outcome::Failed(_), Some(failure)) => failure(outcome),
            _ => (self.success)(outcome),
        }
    }
}
