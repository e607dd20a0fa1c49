//! config::schema
//!
//! Configuration schema types.
//!
//! # Validation
//!
//! Values are validated after parsing: the base URL must be an absolute
//! http(s) URL, the timeout must be positive, and header names and values
//! must be valid HTTP.

use std::collections::BTreeMap;
use std::path::PathBuf;

use reqwest::header::{HeaderName, HeaderValue};
use reqwest::Url;
use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Manager configuration.
///
/// # Example
///
/// ```toml
/// overwrite_nulls = false
/// track_parents = true
/// activity_indicator = true
///
/// [http]
/// base_url = "https://api.example.com/v1/"
/// timeout_secs = 30
/// user_agent = "my-app/1.0"
///
/// [http.headers]
/// Accept = "application/json"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Write JSON nulls into properties instead of skipping them
    pub overwrite_nulls: Option<bool>,

    /// Link nested records to their parents for change propagation
    pub track_parents: Option<bool>,

    /// Report the active request count to the delegate
    pub activity_indicator: Option<bool>,

    /// HTTP settings
    pub http: Option<HttpConfig>,

    /// File this configuration was read from
    #[serde(skip)]
    pub(super) path: Option<PathBuf>,
}

/// HTTP settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct HttpConfig {
    /// Base URL relative source URLs are resolved against
    pub base_url: Option<String>,

    /// Per-request timeout in seconds
    pub timeout_secs: Option<u64>,

    /// User-Agent header value
    pub user_agent: Option<String>,

    /// Headers added to every request
    pub headers: BTreeMap<String, String>,
}

impl Config {
    /// Validate the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if any value is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let Some(http) = &self.http else {
            return Ok(());
        };

        if let Some(base) = &http.base_url {
            let url = Url::parse(base).map_err(|e| {
                ConfigError::InvalidValue(format!("invalid base_url '{}': {}", base, e))
            })?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(ConfigError::InvalidValue(format!(
                    "base_url '{}' must use http or https",
                    base
                )));
            }
        }

        if http.timeout_secs == Some(0) {
            return Err(ConfigError::InvalidValue(
                "timeout_secs must be greater than zero".to_string(),
            ));
        }

        if let Some(agent) = &http.user_agent {
            HeaderValue::from_str(agent).map_err(|_| {
                ConfigError::InvalidValue(format!("invalid user_agent '{}'", agent))
            })?;
        }

        for (name, value) in &http.headers {
            HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
                ConfigError::InvalidValue(format!("invalid header name '{}'", name))
            })?;
            HeaderValue::from_str(value).map_err(|_| {
                ConfigError::InvalidValue(format!("invalid value for header '{}'", name))
            })?;
        }

        Ok(())
    }
}
