//! Service registry for worker discovery
//!
//! Workers advertise themselves under a category (`"media"`, ...) as
//! expiring records in the shared key-value store. Callers look up the
//! least-loaded worker whose capabilities fit a request.
//!
//! # Key Layout
//!
//! ```text
//!   {namespace}:{category}::{service_id}              service record, TTL
//!   {namespace}:{category}::metadata::{name}          metadata slot
//!   lock::{namespace}:{category}::metadata::{name}    metadata slot lock
//! ```
//!
//! Identifier segments may not contain `::` nor start or end with `:`, so
//! distinct (category, id) pairs never share a key and a service id never
//! collides with the metadata sub-namespace.

pub mod config;
pub mod entry;
pub mod key;
pub mod metadata;
pub mod store;

pub use config::{MetadataConfig, RegistryConfig};
pub use entry::{NetworkAddress, ServiceInfo, RECORD_VERSION};
pub use key::Keyspace;
pub use metadata::{MetadataOptions, MetadataStore};
pub use store::ServiceRegistry;

pub(crate) use entry::validate_tags;
