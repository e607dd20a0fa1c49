//! metadata::source
//!
//! The request a record loads from.
//!
//! A source is replaced wholesale whenever the record is pointed somewhere
//! new. Each load it starts gets a fresh token; a response is only applied
//! if its token is still the current one, which is how superseded and
//! invalidated loads are discarded.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use super::errors::LoadError;
use crate::registry::{RequestTransformer, ResponseTransformer};
use crate::transport::Method;

/// What a request sends as its body.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Payload {
    /// No body.
    #[default]
    None,
    /// The host, encoded when the request is built.
    Host,
    /// A fixed JSON value.
    Json(Value),
    /// Fixed bytes.
    Bytes(Vec<u8>),
}

/// One request descriptor and the state of its latest load.
#[derive(Clone)]
pub struct Source {
    id: Uuid,
    url: String,
    method: Method,
    payload: Payload,
    payload_data: Option<Vec<u8>>,
    last_response: Option<Vec<u8>>,
    status_code: Option<u16>,
    error: Option<LoadError>,
    pub(crate) request_transformers: Vec<RequestTransformer>,
    pub(crate) response_transformers: Vec<ResponseTransformer>,
    refresh_interval: Option<Duration>,
    active: bool,
    inflight: Option<Uuid>,
    loading_time: Option<DateTime<Utc>>,
    loaded_time: Option<DateTime<Utc>>,
}

impl Source {
    pub fn new(method: Method, url: impl Into<String>, payload: Payload) -> Self {
        Self {
            id: Uuid::new_v4(),
            url: url.into(),
            method,
            payload,
            payload_data: None,
            last_response: None,
            status_code: None,
            error: None,
            request_transformers: Vec::new(),
            response_transformers: Vec::new(),
            refresh_interval: None,
            active: true,
            inflight: None,
            loading_time: None,
            loaded_time: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Body bytes of the latest request.
    pub fn payload_data(&self) -> Option<&[u8]> {
        self.payload_data.as_deref()
    }

    /// Raw body of the latest response.
    pub fn last_response(&self) -> Option<&[u8]> {
        self.last_response.as_deref()
    }

    pub fn status_code(&self) -> Option<u16> {
        self.status_code
    }

    pub fn error(&self) -> Option<&LoadError> {
        self.error.as_ref()
    }

    pub fn refresh_interval(&self) -> Option<Duration> {
        self.refresh_interval
    }

    /// Inactive sources are never loaded.
    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_loading(&self) -> bool {
        self.inflight.is_some()
    }

    /// Whether the last load succeeded.
    pub fn is_loaded(&self) -> bool {
        self.loaded_time.is_some() && self.error.is_none()
    }

    pub fn loading_time(&self) -> Option<DateTime<Utc>> {
        self.loading_time
    }

    pub fn loaded_time(&self) -> Option<DateTime<Utc>> {
        self.loaded_time
    }

    pub(crate) fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    pub(crate) fn set_refresh_interval(&mut self, interval: Option<Duration>) {
        self.refresh_interval = interval;
    }

    pub(crate) fn set_payload_data(&mut self, data: Option<Vec<u8>>) {
        self.payload_data = data;
    }

    /// Start a load, superseding any load in flight.
    pub(crate) fn begin(&mut self, now: DateTime<Utc>) -> Uuid {
        let token = Uuid::new_v4();
        self.inflight = Some(token);
        self.loading_time = Some(now);
        token
    }

    pub(crate) fn is_current(&self, token: Uuid) -> bool {
        self.inflight == Some(token)
    }

    pub(crate) fn finish_success(&mut self, status: u16, body: Vec<u8>, now: DateTime<Utc>) {
        self.inflight = None;
        self.status_code = Some(status);
        self.error = None;
        self.last_response = Some(body);
        self.loaded_time = Some(now);
    }

    pub(crate) fn finish_failure(
        &mut self,
        status: Option<u16>,
        error: LoadError,
        body: Option<Vec<u8>>,
        now: DateTime<Utc>,
    ) {
        self.inflight = None;
        self.status_code = status;
        self.error = Some(error);
        self.last_response = body;
        self.loaded_time = Some(now);
    }

    /// Forget the outcome of previous loads and drop any load in flight.
    pub(crate) fn reset(&mut self) {
        self.inflight = None;
        self.status_code = None;
        self.error = None;
        self.loaded_time = None;
    }

    /// Whether the refresh interval has elapsed since the last load.
    pub(crate) fn is_stale(&self, now: DateTime<Utc>) -> bool {
        match (self.refresh_interval, self.loaded_time) {
            (Some(interval), Some(loaded)) => match chrono::Duration::from_std(interval) {
                Ok(interval) => now - loaded >= interval,
                Err(_) => false,
            },
            _ => false,
        }
    }
}

impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Source")
            .field("id", &self.id)
            .field("method", &self.method)
            .field("url", &self.url)
            .field("status_code", &self.status_code)
            .field("error", &self.error)
            .field("active", &self.active)
            .field("loading", &self.is_loading())
            .field("request_transformers", &self.request_transformers.len())
            .field("response_transformers", &self.response_transformers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_load_supersedes_previous_token() {
        let mut source = Source::new(Method::Get, "/users/1", Payload::None);
        let first = source.begin(Utc::now());
        let second = source.begin(Utc::now());
        assert!(!source.is_current(first));
        assert!(source.is_current(second));
        assert!(source.is_loading());
    }

    #[test]
    fn reset_drops_inflight_and_outcome() {
        let mut source = Source::new(Method::Get, "/users/1", Payload::None);
        source.finish_failure(
            Some(500),
            LoadError::Status { status: 500 },
            None,
            Utc::now(),
        );
        let token = source.begin(Utc::now());
        source.reset();
        assert!(!source.is_current(token));
        assert!(source.error().is_none());
        assert!(source.status_code().is_none());
        assert!(!source.is_loaded());
    }

    #[test]
    fn staleness_follows_refresh_interval() {
        let mut source = Source::new(Method::Get, "/users/1", Payload::None);
        let loaded = Utc::now();
        source.finish_success(200, b"{}".to_vec(), loaded);
        assert!(source.is_loaded());
        assert!(!source.is_stale(loaded + chrono::Duration::hours(1)));

        source.set_refresh_interval(Some(Duration::from_secs(60)));
        assert!(!source.is_stale(loaded + chrono::Duration::seconds(30)));
        assert!(source.is_stale(loaded + chrono::Duration::seconds(61)));
    }
}
