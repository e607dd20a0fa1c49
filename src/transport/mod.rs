//! transport
//!
//! The HTTP collaborator the binding engine sends requests through.
//!
//! # Modules
//!
//! - `traits`: the [`Transport`] trait and request/response types
//! - [`http`]: reqwest-backed implementation
//! - [`mock`]: scripted implementation for deterministic testing
//!
//! The engine never talks to the network directly. A
//! [`Manager`](crate::manager::Manager) owns one `Arc<dyn Transport>` and
//! every load it starts goes through it.

pub mod http;
pub mod mock;
mod traits;

pub use http::HttpTransport;
pub use traits::*;
