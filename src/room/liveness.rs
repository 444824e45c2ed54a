//! Liveness checks for bound services
//!
//! An existing room assignment is normally returned as-is. Plugging a
//! [`LivenessCheck`] into the allocator makes it confirm the bound service
//! first and reallocate when the service is gone.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::registry::{ServiceInfo, ServiceRegistry};

/// Decides whether a previously bound service can still host a room
#[async_trait]
pub trait LivenessCheck: Send + Sync {
    /// Whether `service` in `category` is still usable
    async fn is_live(&self, category: &str, service: &ServiceInfo) -> Result<bool>;
}

/// A service is live while its registry entry exists
pub struct RegistryLiveness {
    registry: Arc<ServiceRegistry>,
}

impl RegistryLiveness {
    pub fn new(registry: Arc<ServiceRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl LivenessCheck for RegistryLiveness {
    async fn is_live(&self, category: &str, service: &ServiceInfo) -> Result<bool> {
        Ok(self
            .registry
            .service_info(category, &service.id)
            .await?
            .is_some())
    }
}
