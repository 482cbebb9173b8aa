//! Read-only access: a key is written once and never changed.

use std::marker::PhantomData;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{CacheError, Result};
use crate::region::TransactionalDataRegion;
use crate::strategy::entry::{Entry, Slot};
use crate::strategy::{ensure_access_type, AccessType, CacheValue, SoftLock};
use crate::store::now_millis;

pub struct ReadOnlyAccess<V> {
    region: Arc<TransactionalDataRegion>,
    _value: PhantomData<fn() -> V>,
}

impl<V> ReadOnlyAccess<V> {
    pub fn region(&self) -> &Arc<TransactionalDataRegion> {
        &self.region
    }
}

impl<V: CacheValue> ReadOnlyAccess<V> {
    pub fn new(region: Arc<TransactionalDataRegion>, access_type: AccessType) -> Result<Self> {
        ensure_access_type(&region, AccessType::ReadOnly, access_type)?;
        if region.cache_data_description().mutable {
            warn!(region = %region.name(), "Read-only cache configured for mutable data");
        }
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

    /// Cache a freshly loaded value. Only the first put for a key succeeds.
    ///
    /// With `minimal_put` set, an occupied key is skipped (`Ok(false)`);
    /// otherwise writing over it is a [`CacheError::ReadOnlyViolation`].
    pub async fn put_from_load<K: Serialize + ?Sized>(
        &self,
        key: &K,
        value: V,
        _version: Option<u64>,
        minimal_put: bool,
    ) -> Result<bool> {
        if minimal_put && Slot::<V>::read(&self.region, key).await?.is_occupied() {
            debug!(region = %self.region.name(), "Item already cached; skipping minimal put");
            return Ok(false);
        }
        if self.region.swap_slot(key, None, &Entry::Value(value)).await? {
            return Ok(true);
        }
        Err(self.violation())
    }

    pub async fn insert<K: Serialize + ?Sized>(&self, _key: &K, _value: V, _version: Option<u64>) -> Result<bool> {
        Ok(false)
    }

    /// Cache a newly inserted value unless a load got there first.
    pub async fn after_insert<K: Serialize + ?Sized>(&self, key: &K, value: V, _version: Option<u64>) -> Result<bool> {
        self.region.swap_slot(key, None, &Entry::Value(value)).await
    }

    pub async fn update<K: Serialize + ?Sized>(
        &self,
        _key: &K,
        _value: V,
        _current_version: Option<u64>,
        _previous_version: Option<u64>,
    ) -> Result<bool> {
        Err(self.violation())
    }

    pub async fn after_update<K: Serialize + ?Sized>(
        &self,
        _key: &K,
        _value: V,
        _current_version: Option<u64>,
        _previous_version: Option<u64>,
        _lock: Option<&SoftLock>,
    ) -> Result<bool> {
        Err(self.violation())
    }

    pub async fn lock_item<K: Serialize + ?Sized>(&self, _key: &K, _version: Option<u64>) -> Result<Option<SoftLock>> {
        Ok(None)
    }

    /// Entity deletion releases the item; drop it from the cache.
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

    fn violation(&self) -> CacheError {
        CacheError::ReadOnlyViolation {
            region: self.region.name().to_string(),
        }
    }
}
