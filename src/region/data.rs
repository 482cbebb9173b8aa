//! Behavior shared by every region shape.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::error::{CacheError, Result};
use crate::region::{next_timestamp, RegionKind, RegionStatistics};
use crate::store::StoreClient;

/// Name, TTL and lock timeout of one region, bound to the shared client.
pub struct DataRegion {
    client: Arc<StoreClient>,
    name: String,
    kind: RegionKind,
    expiry_in_seconds: u64,
    lock_timeout_ms: u64,
    deleted: AtomicBool,
}

impl DataRegion {
    pub fn new(
        client: Arc<StoreClient>,
        name: impl Into<String>,
        kind: RegionKind,
        expiry_in_seconds: u64,
        lock_timeout_ms: u64,
    ) -> Self {
        let name = name.into();
        trace!(region = %name, %kind, expiry_in_seconds, lock_timeout_ms, "Creating region");
        Self {
            client,
            name,
            kind,
            expiry_in_seconds,
            lock_timeout_ms,
            deleted: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> RegionKind {
        self.kind
    }

    pub fn client(&self) -> &Arc<StoreClient> {
        &self.client
    }

    /// Entry TTL in seconds; 0 means entries never expire.
    pub fn expiry_in_seconds(&self) -> u64 {
        self.expiry_in_seconds
    }

    /// Soft-lock timeout in milliseconds.
    pub fn timeout(&self) -> u64 {
        self.lock_timeout_ms
    }

    pub fn next_timestamp(&self) -> i64 {
        next_timestamp()
    }

    pub fn is_destroyed(&self) -> bool {
        self.deleted.load(Ordering::Acquire)
    }

    /// Drop the region's entries and TTL index. A second call does nothing.
    pub async fn destroy(&self) -> Result<()> {
        if self.is_destroyed() {
            return Ok(());
        }
        debug!(region = %self.name, "Destroying region");
        self.client.delete_region(&self.name).await?;
        self.deleted.store(true, Ordering::Release);
        Ok(())
    }

    pub async fn contains<K: Serialize + ?Sized>(&self, key: &K) -> bool {
        if self.is_destroyed() {
            return false;
        }
        self.client.exists(&self.name, key).await
    }

    /// Number of entries in the region, `-1` on failure.
    pub async fn element_count_in_memory(&self) -> i64 {
        if self.is_destroyed() {
            return 0;
        }
        self.client.region_size(&self.name).await
    }

    /// Entries are never spilled anywhere else.
    pub fn element_count_on_disk(&self) -> i64 {
        -1
    }

    /// Backend-wide key count, `-1` on failure.
    pub async fn size_in_memory(&self) -> i64 {
        self.client.size_info().await
    }

    /// Every entry of the region; empty on failure.
    pub async fn to_map<K, V>(&self) -> HashMap<K, V>
    where
        K: DeserializeOwned + Eq + Hash,
        V: DeserializeOwned,
    {
        if self.is_destroyed() {
            return HashMap::new();
        }
        match self.client.all_entries(&self.name).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(region = %self.name, error = %e, "Failed to read region; returning an empty map");
                HashMap::new()
            }
        }
    }

    pub async fn statistics(&self) -> RegionStatistics {
        let metrics = self.client.metrics();
        RegionStatistics {
            hit_count: metrics.hits(&self.name),
            miss_count: metrics.misses(&self.name),
            put_count: metrics.puts(&self.name),
            element_count: self.element_count_in_memory().await,
            size_in_memory: self.size_in_memory().await,
        }
    }

    // ─── Primitives for the region shapes ───────────────────────────────────

    pub(crate) async fn read<K, V>(&self, key: &K) -> Option<V>
    where
        K: Serialize + ?Sized,
        V: DeserializeOwned,
    {
        if self.is_destroyed() {
            return None;
        }
        self.client.get(&self.name, key).await
    }

    pub(crate) async fn write<K, V>(&self, key: &K, value: &V) -> Result<()>
    where
        K: Serialize + ?Sized,
        V: Serialize + ?Sized,
    {
        self.ensure_live()?;
        self.client
            .put_with_ttl(&self.name, key, value, self.expiry_in_seconds)
            .await
    }

    pub(crate) async fn delete<K: Serialize + ?Sized>(&self, key: &K) -> Result<()> {
        self.ensure_live()?;
        self.client.delete(&self.name, key).await
    }

    pub(crate) async fn delete_all(&self) -> Result<()> {
        self.ensure_live()?;
        self.client.delete_region(&self.name).await
    }

    pub(crate) fn record_lookup(&self, hit: bool) {
        let metrics = self.client.metrics();
        if hit {
            metrics.record_hit(&self.name);
        } else {
            metrics.record_miss(&self.name);
        }
    }

    pub(crate) fn ensure_live(&self) -> Result<()> {
        if self.is_destroyed() {
            return Err(CacheError::RegionDestroyed(self.name.clone()));
        }
        Ok(())
    }
}

impl std::fmt::Debug for DataRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataRegion")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("expiry_in_seconds", &self.expiry_in_seconds)
            .field("lock_timeout_ms", &self.lock_timeout_ms)
            .field("deleted", &self.is_destroyed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::metrics::CacheMetrics;
    use crate::store::MemoryBackend;

    fn region(name: &str) -> DataRegion {
        let client = StoreClient::new(
            Arc::new(MemoryBackend::new()),
            &Config::default(),
            CacheMetrics::standalone(),
        );
        DataRegion::new(Arc::new(client), name, RegionKind::Entity, 120, 60_000)
    }

    #[tokio::test]
    async fn test_destroy_is_idempotent() {
        let region = region("people");
        region.write("1", &"alice".to_string()).await.unwrap();
        assert!(region.contains("1").await);

        region.destroy().await.unwrap();
        region.destroy().await.unwrap();

        assert!(!region.contains("1").await);
        assert_eq!(region.read::<_, String>("1").await, None);
        assert!(matches!(
            region.write("2", &"bob".to_string()).await,
            Err(CacheError::RegionDestroyed(_))
        ));
    }

    #[tokio::test]
    async fn test_counts_and_map() {
        let region = region("people");
        region.write("1", &10u32).await.unwrap();
        region.write("2", &20u32).await.unwrap();

        assert_eq!(region.element_count_in_memory().await, 2);
        assert_eq!(region.element_count_on_disk(), -1);

        let map: HashMap<String, u32> = region.to_map().await;
        assert_eq!(map.get("2"), Some(&20));
    }

    #[tokio::test]
    async fn test_statistics_track_hits_and_misses() {
        let region = region("people");
        region.write("1", &10u32).await.unwrap();
        let _: Option<u32> = region.read("1").await;
        let _: Option<u32> = region.read("nope").await;

        let stats = region.statistics().await;
        assert_eq!(stats.hit_count, 1);
        assert_eq!(stats.miss_count, 1);
        assert_eq!(stats.put_count, 1);
        assert_eq!(stats.element_count, 1);
    }
}
