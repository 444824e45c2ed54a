//! Room allocation
//!
//! Maps a chat channel to the media service hosting its room:
//!
//! ```text
//!   get_or_allocate(channel)
//!          │
//!          ▼
//!   lock::room_of_{channel} ──► metadata room_of_{channel} ──► hit: return
//!                                          │
//!                                        miss
//!                                          ▼
//!                               registry.find("media", tags)
//!                                          │
//!                                          ▼
//!                                 persist + return choice
//! ```

pub mod allocator;
pub mod config;
pub mod liveness;

pub use allocator::{room_slot, RoomAllocator};
pub use config::AllocatorConfig;
pub use liveness::{LivenessCheck, RegistryLiveness};
