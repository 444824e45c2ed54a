//! Coordination substrate for real-time chat and media backends
//!
//! - [`registry`]: expiring service records with least-loaded discovery
//! - [`room`]: lock-guarded, idempotent channel to media service binding
//! - [`permission`]: look-aside cache of principal permissions
//! - [`nonce`]: single-use request nonces
//! - [`store`]: the key-value adapter and distributed lock underneath
//!
//! [`Coordinator`] wires them together on one store.
//!
//! ```no_run
//! use std::sync::Arc;
//! use hiccup_coord::{Coordinator, CoordinatorConfig};
//! use hiccup_coord::permission::MemoryPermissionSource;
//!
//! # async fn run() -> hiccup_coord::Result<()> {
//! let config = CoordinatorConfig::from_env()?;
//! let coordinator = Coordinator::connect(config, Arc::new(MemoryPermissionSource::new())).await?;
//!
//! if let Some(room) = coordinator.allocate(42, None).await? {
//!     println!("channel 42 -> {}:{}", room.address.connection_host(), room.address.port);
//! }
//!
//! coordinator.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod coordinator;
pub mod error;
pub mod nonce;
pub mod permission;
pub mod registry;
pub mod room;
pub mod stats;
pub mod store;

pub use config::{CoordinatorConfig, StoreConfig};
pub use coordinator::Coordinator;
pub use error::{ConfigError, Error, Result, ValidationError};
pub use registry::{NetworkAddress, ServiceInfo, ServiceRegistry};
pub use store::{KvStore, MemoryStore, RedisStore};
