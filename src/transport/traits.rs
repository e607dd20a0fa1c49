//! transport::traits
//!
//! Transport trait and the request/response types it exchanges.
//!
//! # Design
//!
//! The `Transport` trait is async because it performs network I/O. The
//! engine builds a fully-resolved [`Request`] (absolute URL, headers, body,
//! credentials), runs the transformer chains over it, and hands it to the
//! transport exactly once. The transport reports either a [`Response`] with
//! any status code, or a [`TransportError`] when no response arrived at all.
//!
//! # Example
//!
//! ```ignore
//! use restbind::transport::{Method, Request, Transport};
//!
//! async fn fetch(transport: &dyn Transport) -> Result<(), TransportError> {
//!     let request = Request::new(Method::Get, "https://api.example.com/users/42".parse()?);
//!     let response = transport.execute(request).await?;
//!     println!("{} bytes, status {}", response.body.len(), response.status);
//!     Ok(())
//! }
//! ```

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Url;
use thiserror::Error;

/// Errors raised when no HTTP response was obtained.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Connection refused, reset, DNS failure and similar.
    #[error("network error: {0}")]
    Network(String),

    /// The request did not complete within its timeout.
    #[error("request timed out")]
    Timeout,

    /// The request could not be built (bad URL, bad header).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// No async runtime was available to run the request on.
    #[error("no async runtime available to execute the request")]
    NoRuntime,
}

impl TransportError {
    /// Whether this error means the remote end could not be reached.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, TransportError::Network(_) | TransportError::Timeout)
    }
}

/// HTTP verb of a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Method {
    #[default]
    Get,
    Put,
    Post,
    Delete,
}

impl Method {
    /// Whether requests with this verb carry the host as payload by default.
    pub fn sends_payload(&self) -> bool {
        matches!(self, Method::Put | Method::Post)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Get => write!(f, "GET"),
            Method::Put => write!(f, "PUT"),
            Method::Post => write!(f, "POST"),
            Method::Delete => write!(f, "DELETE"),
        }
    }
}

/// Basic-auth credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: Option<String>,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: Option<String>) -> Self {
        Self {
            username: username.into(),
            password,
        }
    }
}

// Never print the password.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("has_password", &self.password.is_some())
            .finish()
    }
}

/// A fully-resolved outgoing request.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
    pub basic_auth: Option<Credentials>,
    pub timeout: Option<Duration>,
}

impl Request {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
            basic_auth: None,
            timeout: None,
        }
    }

    /// Set a header, replacing any previous value. Invalid names or values
    /// are rejected.
    pub fn set_header(&mut self, name: &str, value: &str) -> Result<(), TransportError> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| TransportError::InvalidRequest(format!("header name '{}': {}", name, e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| TransportError::InvalidRequest(format!("header value: {}", e)))?;
        self.headers.insert(name, value);
        Ok(())
    }

    /// Header value as text, if present and visible ASCII.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Body as UTF-8 text, if any.
    pub fn body_text(&self) -> Option<&str> {
        self.body.as_deref().and_then(|b| std::str::from_utf8(b).ok())
    }
}

/// A received response, with any status code.
#[derive(Debug, Clone, Default)]
pub struct Response {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl Response {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    /// Whether the status is 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Executes requests for the binding engine.
///
/// Implementations must be `Send + Sync`; the engine shares one transport
/// across every in-flight load of a manager.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Short name for log output.
    fn name(&self) -> &'static str;

    /// Execute `request`. Non-2xx statuses are returned as `Ok`.
    async fn execute(&self, request: Request) -> Result<Response, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_display_is_uppercase() {
        assert_eq!(Method::Get.to_string(), "GET");
        assert_eq!(Method::Delete.to_string(), "DELETE");
        assert!(Method::Post.sends_payload());
        assert!(!Method::Get.sends_payload());
    }

    #[test]
    fn credentials_debug_hides_password() {
        let creds = Credentials::new("ann", Some("hunter2".to_string()));
        let printed = format!("{:?}", creds);
        assert!(printed.contains("ann"));
        assert!(!printed.contains("hunter2"));
    }

    #[test]
    fn set_header_rejects_invalid_name() {
        let mut request = Request::new(Method::Get, Url::parse("http://localhost/").unwrap());
        assert!(request.set_header("X-Ok", "yes").is_ok());
        assert_eq!(request.header("x-ok"), Some("yes"));
        assert!(matches!(
            request.set_header("bad header", "v"),
            Err(TransportError::InvalidRequest(_))
        ));
    }

    #[test]
    fn response_success_range() {
        assert!(Response::new(204, Vec::new()).is_success());
        assert!(!Response::new(304, Vec::new()).is_success());
        assert!(!Response::new(422, Vec::new()).is_success());
    }

    #[test]
    fn connectivity_errors() {
        assert!(TransportError::Timeout.is_connectivity());
        assert!(TransportError::Network("reset".into()).is_connectivity());
        assert!(!TransportError::NoRuntime.is_connectivity());
    }
}
