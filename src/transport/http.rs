//! transport::http
//!
//! reqwest-backed transport.

use std::fmt;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;

use super::traits::{Method, Request, Response, Transport, TransportError};
use crate::config::{Config, ConfigError};

/// Transport over a shared `reqwest::Client`.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    user_agent: String,
}

impl fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpTransport")
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpTransport {
    /// Transport with a default client.
    pub fn new() -> Self {
        Self::with_client(Client::new())
    }

    /// Transport over an existing client.
    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            user_agent: Config::default().user_agent(),
        }
    }

    /// Transport whose client applies the configured timeout.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let mut builder = Client::builder().user_agent(config.user_agent());
        if let Some(timeout) = config.timeout() {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| ConfigError::InvalidValue(format!("http client: {}", e)))?;
        Ok(Self {
            client,
            user_agent: config.user_agent(),
        })
    }

    fn reqwest_method(method: Method) -> reqwest::Method {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Put => reqwest::Method::PUT,
            Method::Post => reqwest::Method::POST,
            Method::Delete => reqwest::Method::DELETE,
        }
    }

    fn map_error(e: reqwest::Error) -> TransportError {
        if e.is_timeout() {
            TransportError::Timeout
        } else if e.is_builder() {
            TransportError::InvalidRequest(e.to_string())
        } else {
            TransportError::Network(e.to_string())
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn execute(&self, request: Request) -> Result<Response, TransportError> {
        let Request {
            method,
            url,
            mut headers,
            body,
            basic_auth,
            timeout,
        } = request;

        tracing::debug!("{} {}", method, url);

        let mut builder = self.client.request(Self::reqwest_method(method), url);
        if let Some(body) = body {
            if !headers.contains_key(CONTENT_TYPE) {
                headers.insert(
                    CONTENT_TYPE,
                    reqwest::header::HeaderValue::from_static("application/json"),
                );
            }
            builder = builder.body(body);
        }
        builder = builder.headers(headers);
        if let Some(creds) = basic_auth {
            builder = builder.basic_auth(creds.username, creds.password);
        }
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await.map_err(Self::map_error)?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(Self::map_error)?.to_vec();

        tracing::debug!("{} -> {} ({} bytes)", method, status, body.len());

        Ok(Response {
            status,
            headers,
            body,
        })
    }
}
