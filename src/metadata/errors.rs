//! metadata::errors
//!
//! Load failures and the outcome handed to callbacks.

use thiserror::Error;

use crate::binding::Resource;
use crate::schema::{AnyResource, Model, ModelType};
use crate::transport::TransportError;

/// Why a load failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    /// No response was received.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The server answered with a non-2xx status.
    #[error("server responded with status {status}")]
    Status { status: u16 },

    /// A 2xx body could not be parsed.
    #[error("could not decode response: {0}")]
    Decode(String),
}

impl LoadError {
    /// HTTP status, if a response was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            LoadError::Status { status } => Some(*status),
            _ => None,
        }
    }
}

/// A failed load as seen by callbacks.
#[derive(Debug, Clone)]
pub struct Failure {
    /// HTTP status, absent for transport failures.
    pub status: Option<u16>,
    pub error: LoadError,
    pub(crate) error_object: Option<(ModelType, AnyResource)>,
}

impl Failure {
    pub(crate) fn new(error: LoadError) -> Self {
        Self {
            status: error.status(),
            error,
            error_object: None,
        }
    }

    pub(crate) fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// The decoded error body, if it was decoded as `E`.
    pub fn error_object<E: Model>(&self) -> Option<Resource<E>> {
        match &self.error_object {
            Some((ty, object)) if ty.is::<E>() => object.downcast::<E>(),
            _ => None,
        }
    }

    /// Type the error body was decoded as.
    pub fn error_type(&self) -> Option<ModelType> {
        self.error_object.as_ref().map(|(ty, _)| *ty)
    }
}

/// Result of a completed load.
#[derive(Debug, Clone)]
pub enum Outcome<H> {
    /// The host was populated.
    Loaded(H),
    /// The load failed.
    Failed(Failure),
}

impl<H> Outcome<H> {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Loaded(_))
    }

    pub fn host(&self) -> Option<&H> {
        match self {
            Outcome::Loaded(host) => Some(host),
            Outcome::Failed(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&Failure> {
        match self {
            Outcome::Loaded(_) => None,
            Outcome::Failed(failure) => Some(failure),
        }
    }
}
