//! region-cache: a region-partitioned second-level object cache.
//!
//! Entries live in one hash per region on a key-value backend that has no
//! per-field TTL. Expiry is emulated with a per-region sorted index scored by
//! expiry time and a background sweeper. On top of the regions, four access
//! strategies (read-only, nonstrict read/write, soft-locking read/write and
//! transactional) keep cached entries consistent with the database across
//! concurrent transactions.
//!
//! ```text
//! RegionFactory ──> StoreClient ──> Backend (memory | redis)
//!      │                 ▲
//!      ├─ Sweeper ───────┤
//!      └─ Region ────────┘
//!           ▲
//!      AccessStrategy
//! ```

pub mod config;
pub mod error;
pub mod factory;
pub mod metrics;
pub mod region;
pub mod serializer;
pub mod store;
pub mod strategy;

pub use config::{Config, RegionSettings};
pub use error::{CacheError, Result};
pub use factory::{FactoryFlavor, RegionFactory};
pub use region::{CacheDataDescription, GeneralDataRegion, RegionKind, TransactionalDataRegion};
pub use store::StoreClient;
pub use strategy::{AccessStrategy, AccessType, SoftLock};
