//! Coordinator configuration

use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::nonce::NonceConfig;
use crate::permission::PermissionCacheConfig;
use crate::registry::{MetadataConfig, RegistryConfig};
use crate::room::AllocatorConfig;

pub const ENV_REDIS_URL: &str = "HICCUP_REGISTRY_REDIS_URL";
pub const ENV_POOL_SIZE: &str = "HICCUP_REDIS_POOL_SIZE";
pub const ENV_NAMESPACE: &str = "HICCUP_REGISTRY_NAMESPACE";
pub const ENV_SERVICE_TTL: &str = "HICCUP_REGISTRY_TTL_SECS";
pub const ENV_PERMISSION_TTL: &str = "HICCUP_PERMISSION_CACHE_TTL_SECS";
pub const ENV_NONCE_TTL: &str = "HICCUP_NONCE_TTL_SECS";

/// Key-value store connection options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Redis connection URL
    pub url: String,

    /// Maximum concurrent store operations
    pub pool_size: usize,

    /// How long an operation waits for a free connection
    pub checkout_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379/1".to_string(),
            pool_size: 16,
            checkout_timeout: Duration::from_secs(2),
        }
    }
}

impl StoreConfig {
    /// Set the connection URL
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Set the pool size
    pub fn pool_size(mut self, size: usize) -> Self {
        self.pool_size = size;
        self
    }

    /// Set the checkout timeout
    pub fn checkout_timeout(mut self, timeout: Duration) -> Self {
        self.checkout_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() {
            return Err(ConfigError::Empty("store url"));
        }
        if self.pool_size == 0 {
            return Err(ConfigError::Zero("pool_size"));
        }
        if self.checkout_timeout.is_zero() {
            return Err(ConfigError::Zero("checkout_timeout"));
        }
        Ok(())
    }
}

/// Configuration for every coordinator component
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoordinatorConfig {
    pub store: StoreConfig,
    pub registry: RegistryConfig,
    pub metadata: MetadataConfig,
    pub allocator: AllocatorConfig,
    pub permissions: PermissionCacheConfig,
    pub nonce: NonceConfig,
}

impl CoordinatorConfig {
    /// Build from `HICCUP_*` environment variables, defaulting unset ones
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup(ENV_REDIS_URL) {
            config.store.url = url;
        }
        if let Some(size) = parse_var(&lookup, ENV_POOL_SIZE)? {
            config.store.pool_size = size;
        }
        if let Some(namespace) = lookup(ENV_NAMESPACE) {
            config.registry.namespace = namespace;
        }
        if let Some(secs) = parse_var(&lookup, ENV_SERVICE_TTL)? {
            config.registry.service_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var(&lookup, ENV_PERMISSION_TTL)? {
            config.permissions.ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var(&lookup, ENV_NONCE_TTL)? {
            config.nonce.ttl = Duration::from_secs(secs);
        }

        config.validate()?;
        Ok(config)
    }

    /// Set the store URL
    pub fn redis_url(mut self, url: impl Into<String>) -> Self {
        self.store.url = url.into();
        self
    }

    /// Set the registry namespace
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.registry.namespace = namespace.into();
        self
    }

    /// Set the service TTL
    pub fn service_ttl(mut self, ttl: Duration) -> Self {
        self.registry.service_ttl = ttl;
        self
    }

    /// Set the category rooms are allocated from
    pub fn room_category(mut self, category: impl Into<String>) -> Self {
        self.allocator.category = category.into();
        self
    }

    /// Set the permission cache TTL
    pub fn permission_ttl(mut self, ttl: Duration) -> Self {
        self.permissions.ttl = ttl;
        self
    }

    /// Set the nonce TTL
    pub fn nonce_ttl(mut self, ttl: Duration) -> Self {
        self.nonce.ttl = ttl;
        self
    }

    /// Check every section
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.store.validate()?;
        self.registry.validate()?;
        self.allocator.validate()?;
        self.permissions.validate()?;
        self.nonce.validate()
    }
}

fn parse_var<F, T>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&'static str) -> Option<String>,
    T: FromStr,
{
    match lookup(var) {
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv { var, value }),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&'static str, &str)]) -> impl Fn(&'static str) -> Option<String> {
        let vars: HashMap<&'static str, String> =
            vars.iter().map(|(k, v)| (*k, v.to_string())).collect();
        move |var| vars.get(var).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = CoordinatorConfig::default();

        assert_eq!(config.store.url, "redis://localhost:6379/1");
        assert_eq!(config.store.pool_size, 16);
        assert_eq!(config.store.checkout_timeout, Duration::from_secs(2));
        assert_eq!(config.registry.namespace, "services");
        assert_eq!(config.registry.service_ttl, Duration::from_secs(60));
        assert_eq!(config.allocator.category, "media");
        assert_eq!(config.permissions.ttl, Duration::from_secs(600));
        assert_eq!(config.nonce.ttl, Duration::from_secs(300));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_chaining() {
        let config = CoordinatorConfig::default()
            .redis_url("redis://cache:6379/0")
            .namespace("staging")
            .service_ttl(Duration::from_secs(30))
            .room_category("voice")
            .permission_ttl(Duration::from_secs(60))
            .nonce_ttl(Duration::from_secs(120));

        assert_eq!(config.store.url, "redis://cache:6379/0");
        assert_eq!(config.registry.namespace, "staging");
        assert_eq!(config.registry.service_ttl, Duration::from_secs(30));
        assert_eq!(config.allocator.category, "voice");
        assert_eq!(config.permissions.ttl, Duration::from_secs(60));
        assert_eq!(config.nonce.ttl, Duration::from_secs(120));
    }

    #[test]
    fn test_store_validate() {
        assert!(StoreConfig::default().validate().is_ok());
        assert_eq!(
            StoreConfig::default().pool_size(0).validate(),
            Err(ConfigError::Zero("pool_size"))
        );
        assert_eq!(
            StoreConfig::default().url("").validate(),
            Err(ConfigError::Empty("store url"))
        );
    }

    #[test]
    fn test_service_ttl_out_of_bounds() {
        let config = CoordinatorConfig::default().service_ttl(Duration::from_secs(5));
        assert!(matches!(
            config.validate(),
            Err(ConfigError::OutOfBounds { name: "service_ttl", .. })
        ));
    }

    #[test]
    fn test_from_lookup_empty_uses_defaults() {
        let config = CoordinatorConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, CoordinatorConfig::default());
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = CoordinatorConfig::from_lookup(lookup(&[
            (ENV_REDIS_URL, "redis://10.1.1.1:6379/2"),
            (ENV_POOL_SIZE, "4"),
            (ENV_NAMESPACE, "prod"),
            (ENV_SERVICE_TTL, "120"),
            (ENV_PERMISSION_TTL, " 30 "),
            (ENV_NONCE_TTL, "60"),
        ]))
        .unwrap();

        assert_eq!(config.store.url, "redis://10.1.1.1:6379/2");
        assert_eq!(config.store.pool_size, 4);
        assert_eq!(config.registry.namespace, "prod");
        assert_eq!(config.registry.service_ttl, Duration::from_secs(120));
        assert_eq!(config.permissions.ttl, Duration::from_secs(30));
        assert_eq!(config.nonce.ttl, Duration::from_secs(60));
    }

    #[test]
    fn test_from_lookup_rejects_garbage() {
        let err = CoordinatorConfig::from_lookup(lookup(&[(ENV_POOL_SIZE, "many")])).unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidEnv {
                var: ENV_POOL_SIZE,
                value: "many".into()
            }
        );

        let err = CoordinatorConfig::from_lookup(lookup(&[(ENV_SERVICE_TTL, "3600")])).unwrap_err();
        assert!(matches!(err, ConfigError::OutOfBounds { .. }));
    }
}
