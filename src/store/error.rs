//! Store error types

/// Error type for key-value store operations
///
/// Both variants are transient from the caller's point of view. A missing
/// key is never an error; lookups return `None` instead.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The store could not be reached (refused, dropped, timed out, pool exhausted)
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The store was reachable but rejected the command
    #[error("store command failed: {0}")]
    Command(String),
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error()
            || err.is_connection_refusal()
            || err.is_connection_dropped()
            || err.is_timeout()
        {
            StoreError::Unavailable(err.to_string())
        } else {
            StoreError::Command(err.to_string())
        }
    }
}

/// Result alias for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;
