//! Replay protection for signed requests
//!
//! Each nonce is recorded with `SET NX` under `NONCE::{nonce}`. The first
//! caller wins and every replay inside the TTL window is rejected.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use crate::error::{ConfigError, Result, ValidationError};
use crate::store::KvStore;

/// Prefix of nonce keys
pub const NONCE_PREFIX: &str = "NONCE::";

/// Nonce guard configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NonceConfig {
    /// How long a consumed nonce stays blocked
    pub ttl: Duration,
}

impl Default for NonceConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
        }
    }
}

impl NonceConfig {
    /// Set the TTL
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.ttl.is_zero() {
            return Err(ConfigError::Zero("nonce ttl"));
        }
        Ok(())
    }
}

/// Single-use nonce tracker
pub struct NonceGuard {
    store: Arc<dyn KvStore>,
    config: NonceConfig,
}

impl NonceGuard {
    pub fn new(store: Arc<dyn KvStore>, config: NonceConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { store, config })
    }

    /// Mark `nonce` as used
    ///
    /// Returns `true` the first time a nonce is seen within the TTL window
    /// and `false` for a replay.
    pub async fn consume(&self, nonce: &str) -> Result<bool> {
        if nonce.is_empty() {
            return Err(ValidationError::Empty { field: "nonce" }.into());
        }

        let key = format!("{}{}", NONCE_PREFIX, nonce);
        let fresh = self
            .store
            .set_nx(&key, Bytes::from_static(b"1"), Some(self.config.ttl))
            .await?;

        if !fresh {
            tracing::warn!(key = %key, "Nonce replay rejected");
        }

        Ok(fresh)
    }
}
