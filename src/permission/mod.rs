//! Principal permissions
//!
//! [`PermissionCache`] answers "what may this principal do" from the
//! shared store, falling back to a [`PermissionSource`] on a miss.

pub mod cache;
pub mod config;
pub mod source;

pub use cache::{permission_key, PermissionCache, PERMISSION_PREFIX};
pub use config::{PermissionCacheConfig, SUPER_PERMISSION};
pub use source::{MemoryPermissionSource, PermissionGroup, PermissionSource, PrincipalRecord};
