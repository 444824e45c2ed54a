//! Allocator configuration

use std::time::Duration;

use crate::error::ConfigError;

/// Configuration for the room allocator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocatorConfig {
    /// Registry category rooms are allocated from
    pub category: String,

    /// Lease of the per-channel allocation lock
    ///
    /// The lease is not extended while the allocation runs. It must exceed
    /// the worst-case critical section (one category scan plus one read
    /// per entry, and the assignment write), otherwise a waiter can take
    /// the lock while the first holder is still deciding and both write.
    pub lock_lease: Duration,

    /// How long an allocation waits for the per-channel lock
    pub lock_wait: Duration,

    /// Serialize deallocation against allocation with the same lock
    pub lock_deallocate: bool,

    /// Confirm an existing assignment's service is still registered
    /// before returning it, reallocating when it is gone
    pub check_liveness: bool,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            category: "media".to_string(),
            lock_lease: Duration::from_secs(10),
            lock_wait: Duration::from_secs(3),
            lock_deallocate: false,
            check_liveness: false,
        }
    }
}

impl AllocatorConfig {
    /// Set the category
    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

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

    /// Take the channel lock on deallocation too
    pub fn lock_deallocate(mut self, enabled: bool) -> Self {
        self.lock_deallocate = enabled;
        self
    }

    /// Check bound services with the registry before reusing them
    pub fn check_liveness(mut self, enabled: bool) -> Self {
        self.check_liveness = enabled;
        self
    }

    /// Check values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.category.is_empty() {
            return Err(ConfigError::Empty("allocator category"));
        }
        if self.lock_lease.is_zero() {
            return Err(ConfigError::Zero("allocator lock_lease"));
        }
        Ok(())
    }
}
