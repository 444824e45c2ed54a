//! Registry configuration

use std::time::Duration;

use crate::error::ConfigError;

/// Shortest accepted service TTL
pub const MIN_SERVICE_TTL: Duration = Duration::from_secs(10);

/// Longest accepted service TTL
pub const MAX_SERVICE_TTL: Duration = Duration::from_secs(600);

/// Configuration for the service registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Key namespace shared by every category (`{namespace}:{category}::{id}`)
    pub namespace: String,

    /// How long a registration stays visible without a refresh
    pub service_ttl: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            namespace: "services".to_string(),
            service_ttl: Duration::from_secs(60),
        }
    }
}

impl RegistryConfig {
    /// Set the key namespace
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Set the service TTL
    pub fn service_ttl(mut self, ttl: Duration) -> Self {
        self.service_ttl = ttl;
        self
    }

    /// Check bounds
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.namespace.is_empty() {
            return Err(ConfigError::Empty("registry namespace"));
        }

        if self.service_ttl < MIN_SERVICE_TTL || self.service_ttl > MAX_SERVICE_TTL {
            return Err(ConfigError::OutOfBounds {
                name: "service_ttl",
                value: self.service_ttl,
                min: MIN_SERVICE_TTL,
                max: MAX_SERVICE_TTL,
            });
        }

        Ok(())
    }
}

/// Configuration for metadata slots
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetadataConfig {
    /// Lease of the short lock optionally wrapped around slot operations
    pub lock_lease: Duration,

    /// How long a slot operation waits for that lock
    pub lock_wait: Duration,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            lock_lease: Duration::from_secs(1),
            lock_wait: Duration::from_secs(1),
        }
    }
}

impl MetadataConfig {
    /// Set the lock lease
    pub fn lock_lease(mut self, lease: Duration) -> Self {
        self.lock_lease = lease;
        self
    }

    /// Set the lock wait
    pub fn lock_wait(mut self, wait: Duration) -> Self {
        self.lock_wait = wait;
        self
    }
}
