//! Named cache regions.
//!
//! A region is a logical partition over the shared [`StoreClient`]. Two shapes
//! exist:
//! - [`GeneralDataRegion`]: query-result and timestamp caches, plain
//!   get/put/evict with no transactional semantics
//! - [`TransactionalDataRegion`]: entity, collection and natural-id caches,
//!   wrapped by an access strategy that layers the consistency protocol on top
//!
//! Both deref to [`DataRegion`], which owns the name, TTL, lock timeout and
//! the destroyed flag.
//!
//! [`StoreClient`]: crate::store::StoreClient

pub mod data;
pub mod general;
pub mod transactional;

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

use serde::{Deserialize, Serialize};

pub use data::DataRegion;
pub use general::GeneralDataRegion;
pub use transactional::TransactionalDataRegion;

use crate::store::now_millis;

/// What a region caches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionKind {
    Entity,
    Collection,
    NaturalId,
    QueryResults,
    Timestamps,
}

impl RegionKind {
    /// Entity, collection and natural-id regions take access strategies.
    pub fn is_transactional(&self) -> bool {
        matches!(self, RegionKind::Entity | RegionKind::Collection | RegionKind::NaturalId)
    }
}

impl fmt::Display for RegionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RegionKind::Entity => "entity",
            RegionKind::Collection => "collection",
            RegionKind::NaturalId => "natural-id",
            RegionKind::QueryResults => "query-results",
            RegionKind::Timestamps => "timestamps",
        };
        f.write_str(name)
    }
}

/// Metadata the host declares for the data cached in a transactional region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheDataDescription {
    /// The cached entity (or collection) can change after it is first loaded.
    pub mutable: bool,
    /// Writes carry a version usable for stale-write detection.
    pub versioned: bool,
}

impl Default for CacheDataDescription {
    fn default() -> Self {
        Self {
            mutable: true,
            versioned: false,
        }
    }
}

/// Point-in-time counters for one region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct RegionStatistics {
    pub hit_count: u64,
    pub miss_count: u64,
    pub put_count: u64,
    /// `-1` when the backend couldn't be read.
    pub element_count: i64,
    /// Backend-wide key count, `-1` when it couldn't be read.
    pub size_in_memory: i64,
}

static LAST_TIMESTAMP: AtomicI64 = AtomicI64::new(0);

/// A process-wide, strictly increasing timestamp in milliseconds.
///
/// Follows the wall clock, but never repeats or goes backwards: two calls in
/// the same millisecond (or across a clock step back) get consecutive values.
pub fn next_timestamp() -> i64 {
    let now = now_millis();
    let previous = LAST_TIMESTAMP
        .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
            Some(if now > last { now } else { last + 1 })
        })
        .unwrap_or_else(|last| last);
    if now > previous {
        now
    } else {
        previous + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamps_strictly_increase() {
        let mut last = next_timestamp();
        for _ in 0..10_000 {
            let next = next_timestamp();
            assert!(next > last);
            last = next;
        }
    }

    #[test]
    fn test_region_kinds() {
        assert!(RegionKind::Entity.is_transactional());
        assert!(RegionKind::NaturalId.is_transactional());
        assert!(!RegionKind::Timestamps.is_transactional());
        assert_eq!(RegionKind::QueryResults.to_string(), "query-results");
    }
}
