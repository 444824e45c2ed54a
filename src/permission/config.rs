//! Permission cache configuration

use std::time::Duration;

use crate::error::ConfigError;

/// Permission that satisfies every check
pub const SUPER_PERMISSION: &str = "admin:super_admin";

/// Configuration for the permission cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionCacheConfig {
    /// Expiry of cached permission sets
    pub ttl: Duration,

    /// Permission granting every capability (`None` disables the shortcut)
    pub super_permission: Option<String>,
}

impl Default for PermissionCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(600),
            super_permission: Some(SUPER_PERMISSION.to_string()),
        }
    }
}

impl PermissionCacheConfig {
    /// Set the cache expiry
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Set or clear the super permission
    pub fn super_permission(mut self, permission: Option<String>) -> Self {
        self.super_permission = permission;
        self
    }

    /// Check values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ttl.is_zero() {
            return Err(ConfigError::Zero("permission cache ttl"));
        }
        if matches!(&self.super_permission, Some(p) if p.is_empty()) {
            return Err(ConfigError::Empty("super permission"));
        }
        Ok(())
    }
}
