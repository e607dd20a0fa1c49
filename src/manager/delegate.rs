//! manager::delegate
//!
//! Process-wide load and connectivity notifications.

use serde_json::Value;

/// Receives notifications from a [`Manager`](super::Manager).
///
/// Every method has a no-op default. The manager holds its delegate weakly,
/// so the caller keeps it alive.
///
/// Hooks run with no record lock held, so they may call back into records.
pub trait Delegate: Send + Sync {
    /// A 2xx response is about to be decoded. `tree` is the transformed
    /// response tree, or null for an empty body.
    fn will_load(&self, _tree: &Value) {}

    /// A 2xx response was decoded.
    fn did_load(&self) {}

    /// A request failed because the remote end could not be reached.
    fn connection_dropped(&self) {}

    /// A response arrived after a connectivity failure.
    fn connection_established(&self) {}

    /// The server answered 401.
    fn authentication_failed(&self) {}

    /// The number of requests in flight changed. Only sent when the activity
    /// indicator is enabled.
    fn activity_changed(&self, _active: usize) {}
}
