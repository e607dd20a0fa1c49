//! restbind - Bind model objects to REST/JSON resources
//!
//! restbind attaches a metadata record to model objects so they can be
//! populated from, and pushed to, remote HTTP/JSON resources. Records load
//! lazily when a callback is attached, resolve objects with the same
//! identity to a single shared instance, and notify observers when data
//! arrives or changes.
//!
//! # Architecture
//!
//! The crate is layered leaves first:
//!
//! - [`schema`] - Explicit per-type field descriptors and typed accessors
//! - [`registry`] - Field-name mappings, transformer chains, identity index
//! - [`mapping`] - JSON tree to object graph and back
//! - [`transport`] - Async request execution (HTTP and mock)
//! - [`metadata`] - Per-host source, load state machine and callbacks
//! - [`manager`] - Process-wide settings, registry, index and transport
//! - [`binding`] - `Resource<T>` and `Collection<T>` host handles
//! - [`config`] - TOML configuration for manager settings
//!
//! # Guarantees
//!
//! 1. A bound host has at most one attached metadata record
//! 2. At most one live instance exists per model type and identity key
//! 3. A superseded or invalidated load never changes record state
//! 4. Callbacks fire with no engine lock held
//!
//! # Example
//!
//! ```ignore
//! use restbind::prelude::*;
//!
//! let user: Resource<User> = Resource::default();
//! user.get_from_url("https://api.example.com/users/42")
//!     .on_complete(|outcome| match outcome {
//!         Outcome::Loaded(user) => println!("{}", user.read(|u| u.name.clone())),
//!         Outcome::Failed(failure) => eprintln!("{}", failure.error),
//!     });
//! ```

pub mod binding;
pub mod config;
pub mod manager;
pub mod mapping;
pub mod metadata;
pub mod registry;
pub mod schema;
pub mod transport;

/// The types most callers need.
pub mod prelude {
    pub use crate::binding::{Bindable, Collection, Resource, Target, WeakCollection, WeakResource};
    pub use crate::config::Config;
    pub use crate::manager::{Delegate, Manager};
    pub use crate::metadata::{
        Failure, Lifeline, LoadError, LoadState, Metadata, Observer, Outcome, Payload,
    };
    pub use crate::schema::{Field, FieldKind, Model, ModelType, Slot};
    pub use crate::transport::{Method, Request, Transport, TransportError};
}
