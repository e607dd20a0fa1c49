//! transport::mock
//!
//! Mock transport for deterministic testing.
//!
//! # Design
//!
//! Replies are scripted per (method, URL). Each route holds a queue of
//! replies: a request takes the next reply when it arrives, and the last
//! reply repeats once the queue is down to one. Requests to unscripted
//! routes get an empty 404.
//!
//! Every request is recorded. Calling [`MockTransport::hold`] parks
//! subsequent requests until they are released one by one, which lets tests
//! control the order in which responses arrive.
//!
//! # Example
//!
//! ```
//! use restbind::transport::mock::MockTransport;
//! use restbind::transport::{Method, Request, Transport};
//! use serde_json::json;
//!
//! # tokio_test::block_on(async {
//! let mock = MockTransport::new();
//! mock.reply_json(Method::Get, "http://api.test/users/1", 200, json!({"id": 1}));
//!
//! let request = Request::new(Method::Get, "http://api.test/users/1".parse().unwrap());
//! let response = mock.execute(request).await.unwrap();
//! assert_eq!(response.status, 200);
//! assert_eq!(mock.request_count(), 1);
//! # });
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::header::HeaderMap;
use serde_json::Value;
use tokio::sync::oneshot;

use super::traits::{Method, Request, Response, Transport, TransportError};

/// A scripted reply.
#[derive(Debug, Clone)]
pub enum MockReply {
    /// JSON body with a status.
    Json { status: u16, body: Value },
    /// Raw bytes with a status.
    Raw { status: u16, body: Vec<u8> },
    /// No response at all.
    Fail(TransportError),
}

/// A request as the mock received it.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
    pub username: Option<String>,
}

impl RecordedRequest {
    /// Body parsed as JSON, if present and valid.
    pub fn body_json(&self) -> Option<Value> {
        self.body
            .as_deref()
            .and_then(|b| serde_json::from_slice(b).ok())
    }

    /// Header value as text.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Mock transport for testing.
///
/// Thread-safe via internal `Arc<Mutex<...>>` wrapping; clones share state.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    inner: Arc<Mutex<MockInner>>,
}

#[derive(Debug, Default)]
struct MockInner {
    routes: HashMap<(Method, String), VecDeque<MockReply>>,
    requests: Vec<RecordedRequest>,
    holding: bool,
    parked: VecDeque<oneshot::Sender<()>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply for `method url`.
    pub fn reply(&self, method: Method, url: &str, reply: MockReply) {
        self.inner
            .lock()
            .routes
            .entry((method, url.to_string()))
            .or_default()
            .push_back(reply);
    }

    /// Queue a JSON reply for `method url`.
    pub fn reply_json(&self, method: Method, url: &str, status: u16, body: Value) {
        self.reply(method, url, MockReply::Json { status, body });
    }

    /// Queue a raw reply for `method url`.
    pub fn reply_raw(&self, method: Method, url: &str, status: u16, body: impl Into<Vec<u8>>) {
        self.reply(
            method,
            url,
            MockReply::Raw {
                status,
                body: body.into(),
            },
        );
    }

    /// Queue a transport failure for `method url`.
    pub fn fail(&self, method: Method, url: &str, error: TransportError) {
        self.reply(method, url, MockReply::Fail(error));
    }

    /// Park every subsequent request until released.
    pub fn hold(&self) {
        self.inner.lock().holding = true;
    }

    /// Stop parking and release every parked request.
    pub fn resume(&self) {
        let mut inner = self.inner.lock();
        inner.holding = false;
        for waiter in inner.parked.drain(..) {
            let _ = waiter.send(());
        }
    }

    /// Release the oldest parked request. Returns `false` if none was parked.
    pub fn release_next(&self) -> bool {
        match self.inner.lock().parked.pop_front() {
            Some(waiter) => {
                let _ = waiter.send(());
                true
            }
            None => false,
        }
    }

    /// Number of parked requests.
    pub fn parked(&self) -> usize {
        self.inner.lock().parked.len()
    }

    /// Yield until at least `count` requests are parked.
    pub async fn wait_for_parked(&self, count: usize) {
        while self.parked() < count {
            tokio::task::yield_now().await;
        }
    }

    /// Yield until at least `count` requests were received.
    pub async fn wait_for_requests(&self, count: usize) {
        while self.request_count() < count {
            tokio::task::yield_now().await;
        }
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.inner.lock().requests.clone()
    }

    /// Most recent request.
    pub fn last_request(&self) -> Option<RecordedRequest> {
        self.inner.lock().requests.last().cloned()
    }

    pub fn request_count(&self) -> usize {
        self.inner.lock().requests.len()
    }

    pub fn clear_requests(&self) {
        self.inner.lock().requests.clear();
    }

    fn next_reply(inner: &mut MockInner, method: Method, url: &str) -> MockReply {
        match inner.routes.get_mut(&(method, url.to_string())) {
            Some(queue) if queue.len() > 1 => queue.pop_front(),
            Some(queue) => queue.front().cloned(),
            None => None,
        }
        .unwrap_or(MockReply::Raw {
            status: 404,
            body: Vec::new(),
        })
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn execute(&self, request: Request) -> Result<Response, TransportError> {
        let url = request.url.to_string();
        let (reply, parked) = {
            let mut inner = self.inner.lock();
            inner.requests.push(RecordedRequest {
                method: request.method,
                url: url.clone(),
                headers: request.headers.clone(),
                body: request.body.clone(),
                username: request.basic_auth.as_ref().map(|c| c.username.clone()),
            });
            let reply = Self::next_reply(&mut inner, request.method, &url);
            let parked = if inner.holding {
                let (tx, rx) = oneshot::channel();
                inner.parked.push_back(tx);
                Some(rx)
            } else {
                None
            };
            (reply, parked)
        };

        if let Some(rx) = parked {
            let _ = rx.await;
        }

        match reply {
            MockReply::Json { status, body } => Ok(Response::new(status, body.to_string())),
            MockReply::Raw { status, body } => Ok(Response::new(status, body)),
            MockReply::Fail(error) => Err(error),
        }
    }
}
