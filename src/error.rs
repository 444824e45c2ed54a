//! Error types
//!
//! Every fallible operation in the crate returns [`Result`]. Absence (no
//! qualifying service, no assignment, unknown principal) is never an error;
//! it is reported through `Option` / `bool` / empty sets instead.

use std::time::Duration;

use crate::store::StoreError;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The key-value store could not serve the request
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A distributed lock could not be acquired within its wait budget
    #[error("timed out waiting for lock {key}")]
    LockTimeout { key: String },

    /// Input rejected before touching the store
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A stored payload could not be decoded
    #[error("malformed payload at {key}: {reason}")]
    Codec { key: String, reason: String },

    /// Invalid configuration
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The persistence layer behind the permission cache failed
    #[error("permission source error: {0}")]
    Source(String),
}

impl Error {
    /// Whether the caller may retry the same request.
    ///
    /// Store outages and lock contention are transient. Everything else
    /// will fail the same way again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Store(_) | Error::LockTimeout { .. })
    }

    pub(crate) fn codec(key: impl Into<String>, reason: impl ToString) -> Self {
        Error::Codec {
            key: key.into(),
            reason: reason.to_string(),
        }
    }
}

/// Domain validation failures
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("{field} must not be empty")]
    Empty { field: &'static str },

    #[error("{field} must not contain '::' or start or end with ':': {value}")]
    ReservedSeparator { field: &'static str, value: String },

    #[error("tag must be non-blank without surrounding whitespace: {0:?}")]
    MalformedTag(String),

    #[error("load factor must be finite and non-negative, got {0}")]
    InvalidLoadFactor(f64),

    #[error("port must be non-zero")]
    InvalidPort,

    #[error("unsupported record version {0}")]
    UnsupportedVersion(u32),

    #[error("heartbeat interval {interval:?} must be non-zero and shorter than the service ttl {ttl:?}")]
    HeartbeatInterval { interval: Duration, ttl: Duration },
}

/// Configuration failures
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} must be within [{min:?}, {max:?}], got {value:?}")]
    OutOfBounds {
        name: &'static str,
        value: Duration,
        min: Duration,
        max: Duration,
    },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("{0} must not be empty")]
    Empty(&'static str),

    #[error("environment variable {var} is invalid: {value:?}")]
    InvalidEnv { var: &'static str, value: String },
}
