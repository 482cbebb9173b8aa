//! Read/write access with soft locks.
//!
//! A write runs in two phases around the database transaction:
//!
//! 1. [`lock_item`](ReadWriteAccess::lock_item) parks a [`Lock`] in the slot,
//!    keeping the cached item underneath. Readers see a miss until the lock's
//!    deadline (`now + lock timeout`) passes, after which they fall through
//!    to the old item.
//! 2. On commit, [`after_update`](ReadWriteAccess::after_update) swaps the
//!    lock for the new versioned item, but only for the token that installed
//!    it and only if the new version is newer than the one underneath. On
//!    rollback, [`unlock_item`](ReadWriteAccess::unlock_item) restores the old
//!    item.
//!
//! A second writer locking an unexpired lock joins it instead; a lock that
//! has been shared never publishes, and the last holder out empties the slot.
//! A delete runs lock, [`remove`](ReadWriteAccess::remove), unlock: the remove
//! drops the item under the lock, so the unlock leaves the slot empty.
//!
//! Every transition is a compare-and-swap on the slot's raw bytes, so writers
//! only ever contend on the same key.

use std::marker::PhantomData;
use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::error::{CacheError, Result};
use crate::region::TransactionalDataRegion;
use crate::store::now_millis;
use crate::strategy::entry::{Entry, Item, Lock, Slot};
use crate::strategy::{ensure_access_type, AccessType, CacheValue, SoftLock, MAX_SWAP_ATTEMPTS};

pub struct ReadWriteAccess<V> {
    region: Arc<TransactionalDataRegion>,
    owner: Uuid,
    _value: PhantomData<fn() -> V>,
}

impl<V> ReadWriteAccess<V> {
    pub fn region(&self) -> &Arc<TransactionalDataRegion> {
        &self.region
    }
}

impl<V: CacheValue> ReadWriteAccess<V> {
    pub fn new(region: Arc<TransactionalDataRegion>, access_type: AccessType) -> Result<Self> {
        ensure_access_type(&region, AccessType::ReadWrite, access_type)?;
        Ok(Self {
            region,
            owner: Uuid::new_v4(),
            _value: PhantomData,
        })
    }

    /// The cached value, or a miss while an unexpired lock covers the key.
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

    /// Cache a value read from the database.
    ///
    /// Skipped when `minimal_put` is set and the key is occupied, when the
    /// cached version is newer, or while an unexpired lock covers the key.
    pub async fn put_from_load<K: Serialize + ?Sized>(
        &self,
        key: &K,
        value: V,
        version: Option<u64>,
        minimal_put: bool,
    ) -> Result<bool> {
        for _ in 0..MAX_SWAP_ATTEMPTS {
            let slot = Slot::<V>::read(&self.region, key).await?;
            if minimal_put && slot.is_occupied() {
                debug!(region = %self.region.name(), "Item already cached; skipping minimal put");
                return Ok(false);
            }

            let now = now_millis();
            let writeable = match &slot.entry {
                None => true,
                Some(Entry::Value(_)) => true,
                Some(Entry::Versioned(item)) => item.is_writeable(version),
                Some(Entry::Locked(lock)) => lock.is_expired(now),
            };
            if !writeable {
                debug!(region = %self.region.name(), ?version, "Cached item is newer or locked; skipping put");
                return Ok(false);
            }

            let entry = Entry::Versioned(Item {
                value: &value,
                version,
                timestamp: self.region.next_timestamp(),
            });
            if self.region.swap_slot(key, slot.raw.as_ref(), &entry).await? {
                return Ok(true);
            }
            trace!(region = %self.region.name(), "Slot changed under put; retrying");
        }
        Err(self.contention())
    }

    pub async fn insert<K: Serialize + ?Sized>(&self, _key: &K, _value: V, _version: Option<u64>) -> Result<bool> {
        Ok(false)
    }

    /// Cache a newly inserted row if nothing has been cached for it since.
    pub async fn after_insert<K: Serialize + ?Sized>(&self, key: &K, value: V, version: Option<u64>) -> Result<bool> {
        let entry = Entry::Versioned(Item {
            value,
            version,
            timestamp: self.region.next_timestamp(),
        });
        self.region.swap_slot(key, None, &entry).await
    }

    pub async fn update<K: Serialize + ?Sized>(
        &self,
        _key: &K,
        _value: V,
        _current_version: Option<u64>,
        _previous_version: Option<u64>,
    ) -> Result<bool> {
        Ok(false)
    }

    /// Install (or join) a soft lock ahead of a database write.
    pub async fn lock_item<K: Serialize + ?Sized>(&self, key: &K, _version: Option<u64>) -> Result<Option<SoftLock>> {
        for _ in 0..MAX_SWAP_ATTEMPTS {
            let slot = Slot::<V>::read(&self.region, key).await?;
            let now = now_millis();
            let deadline = now + self.region.timeout() as i64;

            let lock = match slot.entry {
                Some(Entry::Locked(mut held)) if !held.is_expired(now) => {
                    held.holders += 1;
                    held.concurrent = true;
                    held.deadline_ms = held.deadline_ms.max(deadline);
                    held
                }
                Some(Entry::Locked(expired)) => {
                    warn!(
                        region = %self.region.name(),
                        lock_id = expired.id,
                        "Replacing timed-out soft lock"
                    );
                    Lock::new(self.owner, deadline, expired.previous)
                }
                other => Lock::new(self.owner, deadline, other.and_then(Entry::into_previous)),
            };

            let token = lock.token();
            let holders = lock.holders;
            if self.region.swap_slot(key, slot.raw.as_ref(), &Entry::Locked(lock)).await? {
                trace!(region = %self.region.name(), lock_id = token.id, holders, "Soft lock installed");
                return Ok(Some(token));
            }
        }
        Err(self.contention())
    }

    /// Release a lock after a rolled-back write, restoring the item it hid.
    pub async fn unlock_item<K: Serialize + ?Sized>(&self, key: &K, lock: Option<&SoftLock>) -> Result<()> {
        for _ in 0..MAX_SWAP_ATTEMPTS {
            let slot = Slot::<V>::read(&self.region, key).await?;
            let Some(raw) = slot.raw.as_ref() else {
                return Ok(());
            };

            let applied = match (slot.entry, lock) {
                (Some(Entry::Locked(held)), Some(token)) if held.is_unlockable(token) => {
                    if held.concurrent {
                        self.release_shared(key, raw, held).await?
                    } else {
                        self.restore(key, raw, held.previous).await?
                    }
                }
                (Some(Entry::Locked(held)), _) if held.is_expired(now_millis()) => {
                    warn!(region = %self.region.name(), lock_id = held.id, "Evicting timed-out soft lock");
                    self.region.clear_slot(key, raw).await?
                }
                _ => {
                    debug!(region = %self.region.name(), "No matching soft lock to release");
                    return Ok(());
                }
            };
            if applied {
                return Ok(());
            }
        }
        Err(self.contention())
    }

    /// Publish a committed write in place of the lock it held.
    ///
    /// Returns `false` when the commit was not published: the token no longer
    /// matches, the lock was shared with another writer, or a version at
    /// least as new is already cached.
    pub async fn after_update<K: Serialize + ?Sized>(
        &self,
        key: &K,
        value: V,
        current_version: Option<u64>,
        previous_version: Option<u64>,
        lock: Option<&SoftLock>,
    ) -> Result<bool> {
        for _ in 0..MAX_SWAP_ATTEMPTS {
            let slot = Slot::<V>::read(&self.region, key).await?;
            let Some(raw) = slot.raw.as_ref() else {
                debug!(region = %self.region.name(), "Soft lock vanished before commit; not caching");
                return Ok(false);
            };

            let held = match (slot.entry, lock) {
                (Some(Entry::Locked(held)), Some(token)) if held.is_unlockable(token) => held,
                (Some(Entry::Locked(held)), _) if held.is_expired(now_millis()) => {
                    warn!(region = %self.region.name(), lock_id = held.id, "Soft lock timed out before commit");
                    if self.region.clear_slot(key, raw).await? {
                        return Ok(false);
                    }
                    continue;
                }
                _ => {
                    debug!(
                        region = %self.region.name(),
                        ?current_version,
                        "Stale lock token at commit; keeping cached state"
                    );
                    return Ok(false);
                }
            };

            if held.concurrent {
                if self.release_shared(key, raw, held).await? {
                    return Ok(false);
                }
                continue;
            }

            let visible = held.previous.as_ref().and_then(|item| item.version);
            if let (Some(visible), Some(incoming)) = (visible, current_version) {
                if incoming <= visible {
                    debug!(
                        region = %self.region.name(),
                        visible,
                        incoming,
                        ?previous_version,
                        "Stale commit rejected"
                    );
                    if self.restore(key, raw, held.previous).await? {
                        return Ok(false);
                    }
                    continue;
                }
            }

            let entry = Entry::Versioned(Item {
                value: &value,
                version: current_version,
                timestamp: self.region.next_timestamp(),
            });
            if self.region.swap_slot(key, Some(raw), &entry).await? {
                return Ok(true);
            }
        }
        Err(self.contention())
    }

    /// The row is being deleted: drop the item a held lock keeps underneath,
    /// so the following unlock empties the slot instead of restoring it.
    /// Without a live lock the entry is evicted outright.
    pub async fn remove<K: Serialize + ?Sized>(&self, key: &K) -> Result<()> {
        for _ in 0..MAX_SWAP_ATTEMPTS {
            let slot = Slot::<V>::read(&self.region, key).await?;
            let Some(raw) = slot.raw.as_ref() else {
                return Ok(());
            };

            let applied = match slot.entry {
                Some(Entry::Locked(mut held)) if !held.is_expired(now_millis()) => {
                    if held.previous.is_none() {
                        return Ok(());
                    }
                    held.previous = None;
                    trace!(region = %self.region.name(), lock_id = held.id, "Dropped item under soft lock");
                    self.region.swap_slot(key, Some(raw), &Entry::Locked(held)).await?
                }
                _ => self.region.clear_slot(key, raw).await?,
            };
            if applied {
                return Ok(());
            }
        }
        Err(self.contention())
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

    /// One holder of a shared lock leaves; the last one empties the slot.
    async fn release_shared<K: Serialize + ?Sized>(
        &self,
        key: &K,
        raw: &Bytes,
        mut held: Lock<V>,
    ) -> Result<bool> {
        held.holders = held.holders.saturating_sub(1);
        if held.holders == 0 {
            trace!(region = %self.region.name(), lock_id = held.id, "Last holder left shared lock");
            return self.region.clear_slot(key, raw).await;
        }
        self.region.swap_slot(key, Some(raw), &Entry::Locked(held)).await
    }

    async fn restore<K: Serialize + ?Sized>(
        &self,
        key: &K,
        raw: &Bytes,
        previous: Option<Item<V>>,
    ) -> Result<bool> {
        match previous {
            Some(item) => self.region.swap_slot(key, Some(raw), &Entry::Versioned(item)).await,
            None => self.region.clear_slot(key, raw).await,
        }
    }

    fn contention(&self) -> CacheError {
        CacheError::LockContention {
            region: self.region.name().to_string(),
        }
    }
}
