//! Entity, collection and natural-id regions.

use std::ops::Deref;
use std::sync::Arc;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::trace;

use crate::error::Result;
use crate::region::{CacheDataDescription, DataRegion, RegionKind};
use crate::store::StoreClient;

/// A region wrapped by an access strategy.
///
/// The region's own reads and writes are not lock-aware; the locking
/// protocol lives in the strategy, so the lock hooks here do nothing.
#[derive(Debug)]
pub struct TransactionalDataRegion {
    base: DataRegion,
    description: CacheDataDescription,
}

impl TransactionalDataRegion {
    pub fn new(
        client: Arc<StoreClient>,
        name: impl Into<String>,
        kind: RegionKind,
        description: CacheDataDescription,
        expiry_in_seconds: u64,
        lock_timeout_ms: u64,
    ) -> Self {
        debug_assert!(kind.is_transactional());
        Self {
            base: DataRegion::new(client, name, kind, expiry_in_seconds, lock_timeout_ms),
            description,
        }
    }

    pub fn cache_data_description(&self) -> CacheDataDescription {
        self.description
    }

    pub fn is_transaction_aware(&self) -> bool {
        false
    }

    pub fn locks_are_independent_of_cache(&self) -> bool {
        false
    }

    pub async fn get<K, V>(&self, key: &K) -> Option<V>
    where
        K: Serialize + ?Sized,
        V: DeserializeOwned,
    {
        trace!(region = %self.name(), "Returning cached item");
        self.base.read(key).await
    }

    pub async fn put<K, V>(&self, key: &K, value: &V) -> Result<()>
    where
        K: Serialize + ?Sized,
        V: Serialize + ?Sized,
    {
        trace!(region = %self.name(), "Setting cached item");
        self.base.write(key, value).await
    }

    pub async fn remove<K: Serialize + ?Sized>(&self, key: &K) -> Result<()> {
        trace!(region = %self.name(), "Removing cached item");
        self.base.delete(key).await
    }

    pub async fn clear(&self) -> Result<()> {
        trace!(region = %self.name(), "Clearing region");
        self.base.delete_all().await
    }

    pub async fn evict<K: Serialize + ?Sized>(&self, key: &K) -> Result<()> {
        trace!(region = %self.name(), "Evicting cached item");
        self.base.delete(key).await
    }

    pub async fn evict_all(&self) -> Result<()> {
        trace!(region = %self.name(), "Evicting all cached items");
        self.base.delete_all().await
    }

    pub fn read_lock<K: ?Sized>(&self, _key: &K) {}

    pub fn read_unlock<K: ?Sized>(&self, _key: &K) {}

    pub fn write_lock<K: ?Sized>(&self, _key: &K) {}

    pub fn write_unlock<K: ?Sized>(&self, _key: &K) {}

    // ─── Slot-level primitives for the access strategies ────────────────────

    /// The raw bytes in a key's slot, keeping read failures visible.
    pub(crate) async fn read_slot<K: Serialize + ?Sized>(&self, key: &K) -> Result<Option<Bytes>> {
        if self.is_destroyed() {
            return Ok(None);
        }
        self.client().get_raw(self.name(), key).await
    }

    pub(crate) fn decode_slot<V: DeserializeOwned>(&self, raw: &Bytes) -> Option<V> {
        self.client().value_codec().decode(raw)
    }

    /// Replace the slot if it still holds `expected` (`None` = empty).
    pub(crate) async fn swap_slot<K, V>(&self, key: &K, expected: Option<&Bytes>, value: &V) -> Result<bool>
    where
        K: Serialize + ?Sized,
        V: Serialize + ?Sized,
    {
        self.ensure_live()?;
        self.client()
            .compare_and_set(self.name(), key, expected, value, self.expiry_in_seconds())
            .await
    }

    /// Empty the slot if it still holds `expected`.
    pub(crate) async fn clear_slot<K: Serialize + ?Sized>(&self, key: &K, expected: &Bytes) -> Result<bool> {
        self.ensure_live()?;
        self.client().compare_and_delete(self.name(), key, expected).await
    }
}

impl Deref for TransactionalDataRegion {
    type Target = DataRegion;

    fn deref(&self) -> &DataRegion {
        &self.base
    }
}
