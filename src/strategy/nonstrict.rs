//! Non-strict read/write access.
//!
//! Loads overwrite, writes evict. A reader racing a committing writer sees
//! either the new value or a miss, never a blend, but the cache may be stale
//! for the length of the race.

use std::marker::PhantomData;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::Result;
use crate::region::TransactionalDataRegion;
use crate::strategy::entry::{Entry, Slot};
use crate::strategy::{ensure_access_type, AccessType, CacheValue, SoftLock};
use crate::store::now_millis;

pub struct NonstrictReadWriteAccess<V> {
    region: Arc<TransactionalDataRegion>,
    _value: PhantomData<fn() -> V>,
}

impl<V> NonstrictReadWriteAccess<V> {
    pub fn region(&self) -> &Arc<TransactionalDataRegion> {
        &self.region
    }
}

impl<V: CacheValue> NonstrictReadWriteAccess<V> {
    pub fn new(region: Arc<TransactionalDataRegion>, access_type: AccessType) -> Result<Self> {
        ensure_access_type(&region, AccessType::NonstrictReadWrite, access_type)?;
        Ok(Self {
            region,
            _value: PhantomData,
        })
    }

    pub async fn get<K: Serialize + ?Sized>(&self, key: &K) -> Option<V> {
        let value = match Slot::<V>::read(&self.region, key).await {
            Ok(slot) => slot.entry.and_then(|entry| entry.readable(now_millis())),
            Err(e) => {
                warn!(region = %self.region.name(), error = %e, "Read failed; treating as a cache miss");
                None
            }
        };
        self.region.record_lookup(value.is_some());
        value
    }

    pub async fn put_from_load<K: Serialize + ?Sized>(
        &self,
        key: &K,
        value: V,
        _version: Option<u64>,
        minimal_put: bool,
    ) -> Result<bool> {
        if minimal_put && self.region.contains(key).await {
            debug!(region = %self.region.name(), "Item already cached; skipping minimal put");
            return Ok(false);
        }
        self.region.put(key, &Entry::Value(value)).await?;
        Ok(true)
    }

    pub async fn insert<K: Serialize + ?Sized>(&self, _key: &K, _value: V, _version: Option<u64>) -> Result<bool> {
        Ok(false)
    }

    pub async fn after_insert<K: Serialize + ?Sized>(&self, _key: &K, _value: V, _version: Option<u64>) -> Result<bool> {
        Ok(false)
    }

    /// Evict before the database write so no reader keeps the old value.
    pub async fn update<K: Serialize + ?Sized>(
        &self,
        key: &K,
        _value: V,
        _current_version: Option<u64>,
        _previous_version: Option<u64>,
    ) -> Result<bool> {
        self.region.evict(key).await?;
        Ok(false)
    }

    /// Evict again after commit; a load in between may have cached the old row.
    pub async fn after_update<K: Serialize + ?Sized>(
        &self,
        key: &K,
        _value: V,
        _current_version: Option<u64>,
        _previous_version: Option<u64>,
        _lock: Option<&SoftLock>,
    ) -> Result<bool> {
        self.region.evict(key).await?;
        Ok(false)
    }

    pub async fn lock_item<K: Serialize + ?Sized>(&self, _key: &K, _version: Option<u64>) -> Result<Option<SoftLock>> {
        Ok(None)
    }

    pub async fn unlock_item<K: Serialize + ?Sized>(&self, key: &K, _lock: Option<&SoftLock>) -> Result<()> {
        self.region.evict(key).await
    }

    pub async fn remove<K: Serialize + ?Sized>(&self, key: &K) -> Result<()> {
        self.region.evict(key).await
    }

    pub async fn remove_all(&self) -> Result<()> {
        self.region.clear().await
    }

    pub async fn evict<K: Serialize + ?Sized>(&self, key: &K) -> Result<()> {
        self.region.evict(key).await
    }

    pub async fn evict_all(&self) -> Result<()> {
        self.region.evict_all().await
    }

    pub async fn lock_region(&self) -> Result<Option<SoftLock>> {
        Ok(None)
    }

    pub async fn unlock_region(&self, _lock: Option<&SoftLock>) -> Result<()> {
        self.evict_all().await
    }
}
