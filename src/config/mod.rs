//! config
//!
//! Configuration schema and loading.
//!
//! # Locations
//!
//! Searched in order:
//! 1. The path passed to [`Config::load`]
//! 2. `$RESTBIND_CONFIG` if set
//!
//! Missing files are not an error; defaults are used.
//!
//! # Example
//!
//! ```no_run
//! use restbind::config::Config;
//! use restbind::manager::Manager;
//! use std::path::Path;
//!
//! let config = Config::load(Some(Path::new("restbind.toml"))).unwrap();
//! println!("Overwrite nulls: {}", config.overwrite_nulls());
//! let manager = Manager::new(&config).unwrap();
//! ```

pub mod schema;

pub use schema::{Config, HttpConfig};

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Url;
use thiserror::Error;

/// Environment variable naming a config file.
pub const CONFIG_ENV: &str = "RESTBIND_CONFIG";

/// Errors from configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}': {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("invalid config value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from `path`, else `$RESTBIND_CONFIG`, else
    /// defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be read, parsed
    /// or validated.
    pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
        let candidate = match path {
            Some(p) => Some(p.to_path_buf()),
            None => std::env::var(CONFIG_ENV).ok().map(PathBuf::from),
        };

        match candidate {
            Some(p) if p.exists() => Self::read(&p),
            Some(p) => {
                tracing::debug!("config file {} not found, using defaults", p.display());
                Ok(Config::default())
            }
            None => Ok(Config::default()),
        }
    }

    /// Read, parse and validate a config file.
    pub fn read(path: &Path) -> Result<Config, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let mut config: Config =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
        config.validate()?;
        config.path = Some(path.to_path_buf());
        Ok(config)
    }

    /// Parse and validate TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Config, ConfigError> {
        let config: Config = toml::from_str(contents).map_err(|e| ConfigError::ParseError {
            path: PathBuf::from("<string>"),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// File this configuration was read from, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn overwrite_nulls(&self) -> bool {
        self.overwrite_nulls.unwrap_or(false)
    }

    pub fn track_parents(&self) -> bool {
        self.track_parents.unwrap_or(false)
    }

    pub fn activity_indicator(&self) -> bool {
        self.activity_indicator.unwrap_or(false)
    }

    /// Parsed base URL. Invalid values were rejected by validation.
    pub fn base_url(&self) -> Option<Url> {
        self.http
            .as_ref()
            .and_then(|h| h.base_url.as_deref())
            .and_then(|u| Url::parse(u).ok())
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.http
            .as_ref()
            .and_then(|h| h.timeout_secs)
            .map(Duration::from_secs)
    }

    /// User-Agent, defaulting to `restbind/<version>`.
    pub fn user_agent(&self) -> String {
        self.http
            .as_ref()
            .and_then(|h| h.user_agent.clone())
            .unwrap_or_else(|| format!("restbind/{}", env!("CARGO_PKG_VERSION")))
    }

    /// Default headers as a header map.
    pub fn header_map(&self) -> Result<HeaderMap, ConfigError> {
        let mut map = HeaderMap::new();
        let Some(http) = &self.http else {
            return Ok(map);
        };
        for (name, value) in &http.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
                ConfigError::InvalidValue(format!("invalid header name '{}'", name))
            })?;
            let value = HeaderValue::from_str(value).map_err(|_| {
                ConfigError::InvalidValue(format!("invalid value for header '{}'", name))
            })?;
            map.insert(name, value);
        }
        Ok(map)
    }
}
