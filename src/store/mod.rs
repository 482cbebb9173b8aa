//! Storage engine: backends and the region-aware client on top of them.

pub mod backend;
pub mod client;
pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;

pub use backend::{Backend, BackendError};
pub use client::{now_millis, StoreClient, EXPIRY_INDEX_PREFIX};
pub use memory::MemoryBackend;
#[cfg(feature = "redis")]
pub use self::redis::RedisBackend;
