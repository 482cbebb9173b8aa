//! Transactional access.
//!
//! Writes never touch the cache while the database transaction is open.
//! [`lock_item`](TransactionalAccess::lock_item) opens a staging slot,
//! [`insert`](TransactionalAccess::insert) and
//! [`update`](TransactionalAccess::update) stage the pending version, the
//! commit notification ([`after_insert`](TransactionalAccess::after_insert) /
//! [`after_update`](TransactionalAccess::after_update)) applies the committed
//! value with a version check, and the completion notification
//! ([`unlock_item`](TransactionalAccess::unlock_item)) throws away anything
//! still staged, which is how a rollback leaves the cache untouched.
//!
//! Two transactions locking the same key mark its slot conflicted. Neither
//! may publish; the first to commit evicts the key instead, and loads are
//! refused until every holder has left.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::error::{CacheError, Result};
use crate::region::TransactionalDataRegion;
use crate::store::{now_millis, StoreClient};
use crate::strategy::entry::{Entry, Item, Slot};
use crate::strategy::{ensure_access_type, AccessType, CacheValue, SoftLock, MAX_SWAP_ATTEMPTS};

/// Open transactions on one key.
struct Staged {
    holders: Vec<SoftLock>,
    version: Option<u64>,
    conflicted: bool,
}

/// What a holder leaving a staging slot found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Release {
    /// The token holds no slot for the key.
    NotHeld,
    /// The holder was alone; its pending version, if any.
    Sole(Option<u64>),
    /// Another transaction locked the key too.
    Conflicted,
}

pub struct TransactionalAccess<V> {
    region: Arc<TransactionalDataRegion>,
    owner: Uuid,
    staged: Mutex<HashMap<Bytes, Staged>>,
    natural_ids: Option<Arc<StoreClient>>,
    _value: PhantomData<fn() -> V>,
}

impl<V> TransactionalAccess<V> {
    pub fn region(&self) -> &Arc<TransactionalDataRegion> {
        &self.region
    }
}

impl<V: CacheValue> TransactionalAccess<V> {
    pub fn new(region: Arc<TransactionalDataRegion>, access_type: AccessType) -> Result<Self> {
        ensure_access_type(&region, AccessType::Transactional, access_type)?;
        Ok(Self {
            region,
            owner: Uuid::new_v4(),
            staged: Mutex::new(HashMap::new()),
            natural_ids: None,
            _value: PhantomData,
        })
    }

    /// The natural-id flavor: also resolves batches of natural ids through
    /// `client` in one round-trip.
    pub fn for_natural_ids(
        region: Arc<TransactionalDataRegion>,
        access_type: AccessType,
        client: Arc<StoreClient>,
    ) -> Result<Self> {
        let mut access = Self::new(region, access_type)?;
        access.natural_ids = Some(client);
        Ok(access)
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

    /// Look up many natural ids at once; one slot per key, in order.
    pub async fn resolve_many<K: Serialize>(&self, keys: &[K]) -> Result<Vec<Option<V>>> {
        let client = self.natural_ids.as_ref().ok_or_else(|| {
            CacheError::Configuration(format!(
                "region '{}' was not built for natural-id lookups",
                self.region.name()
            ))
        })?;
        if self.region.is_destroyed() {
            return Ok(keys.iter().map(|_| None).collect());
        }

        let now = now_millis();
        let entries: Vec<Option<Entry<V>>> = client.try_multi_get(self.region.name(), keys).await?;
        Ok(entries
            .into_iter()
            .map(|entry| entry.and_then(|entry| entry.readable(now)))
            .collect())
    }

    pub async fn put_from_load<K: Serialize + ?Sized>(
        &self,
        key: &K,
        value: V,
        version: Option<u64>,
        minimal_put: bool,
    ) -> Result<bool> {
        if self.is_conflicted(key)? {
            debug!(region = %self.region.name(), "Concurrent transactions hold the key; skipping put");
            return Ok(false);
        }
        if minimal_put && Slot::<V>::read(&self.region, key).await?.is_occupied() {
            debug!(region = %self.region.name(), "Item already cached; skipping minimal put");
            return Ok(false);
        }
        self.apply(key, value, version, false).await
    }

    /// Stage an inserted row until the transaction commits.
    pub async fn insert<K: Serialize + ?Sized>(&self, key: &K, _value: V, version: Option<u64>) -> Result<bool> {
        self.stage(key, version)
    }

    /// Apply the committed insert.
    pub async fn after_insert<K: Serialize + ?Sized>(&self, key: &K, value: V, version: Option<u64>) -> Result<bool> {
        let released = self.release(key, None)?;
        self.commit(key, value, version, released).await
    }

    /// Stage an updated row until the transaction commits.
    pub async fn update<K: Serialize + ?Sized>(
        &self,
        key: &K,
        _value: V,
        current_version: Option<u64>,
        _previous_version: Option<u64>,
    ) -> Result<bool> {
        self.stage(key, current_version)
    }

    /// Apply the committed update, if `lock` still holds the key alone.
    pub async fn after_update<K: Serialize + ?Sized>(
        &self,
        key: &K,
        value: V,
        current_version: Option<u64>,
        _previous_version: Option<u64>,
        lock: Option<&SoftLock>,
    ) -> Result<bool> {
        let released = self.release(key, lock)?;
        self.commit(key, value, current_version, released).await
    }

    /// Open a staging slot for the key, or join one another transaction
    /// holds, which marks it conflicted.
    pub async fn lock_item<K: Serialize + ?Sized>(&self, key: &K, version: Option<u64>) -> Result<Option<SoftLock>> {
        let raw_key = self.raw_key(key)?;
        let token = SoftLock::issue(self.owner);
        let mut staged = self.staged.lock();
        let slot = staged.entry(raw_key).or_insert_with(|| Staged {
            holders: Vec::new(),
            version,
            conflicted: false,
        });
        if !slot.holders.is_empty() {
            slot.conflicted = true;
            debug!(
                region = %self.region.name(),
                holders = slot.holders.len() + 1,
                "Concurrent transactions on one key; neither will publish"
            );
        }
        slot.holders.push(token);
        trace!(region = %self.region.name(), lock_id = token.id, "Staging slot opened");
        Ok(Some(token))
    }

    /// Completion: anything still staged was never committed.
    pub async fn unlock_item<K: Serialize + ?Sized>(&self, key: &K, lock: Option<&SoftLock>) -> Result<()> {
        if self.release(key, lock)? != Release::NotHeld {
            debug!(region = %self.region.name(), "Discarded staged write");
        }
        Ok(())
    }

    /// Deletion evicts immediately; an absent entry is never stale.
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

    /// Keys with a staging slot still open.
    pub fn staged_count(&self) -> usize {
        self.staged.lock().len()
    }

    fn raw_key<K: Serialize + ?Sized>(&self, key: &K) -> Result<Bytes> {
        self.region.client().key_codec().encode(key)
    }

    /// Record a pending version. A slot several transactions hold is left
    /// alone; without a slot (an insert needs no lock) one is opened.
    fn stage<K: Serialize + ?Sized>(&self, key: &K, version: Option<u64>) -> Result<bool> {
        let raw_key = self.raw_key(key)?;
        let mut staged = self.staged.lock();
        let slot = staged.entry(raw_key).or_insert_with(|| Staged {
            holders: vec![SoftLock::issue(self.owner)],
            version: None,
            conflicted: false,
        });
        if slot.conflicted {
            return Ok(false);
        }
        slot.version = version;
        Ok(true)
    }

    fn is_conflicted<K: Serialize + ?Sized>(&self, key: &K) -> Result<bool> {
        let raw_key = self.raw_key(key)?;
        Ok(self.staged.lock().get(&raw_key).is_some_and(|slot| slot.conflicted))
    }

    /// Leave the key's staging slot. `None` stands for whichever transaction
    /// staged without a lock; the last holder out closes the slot.
    fn release<K: Serialize + ?Sized>(&self, key: &K, lock: Option<&SoftLock>) -> Result<Release> {
        let raw_key = self.raw_key(key)?;
        let mut staged = self.staged.lock();
        let Some(slot) = staged.get_mut(&raw_key) else {
            return Ok(Release::NotHeld);
        };

        let left = match lock {
            Some(token) => match slot.holders.iter().position(|held| held == token) {
                Some(i) => {
                    slot.holders.swap_remove(i);
                    true
                }
                None => false,
            },
            None => slot.holders.pop().is_some(),
        };
        if !left {
            return Ok(Release::NotHeld);
        }

        let released = if slot.conflicted {
            Release::Conflicted
        } else {
            Release::Sole(slot.version)
        };
        if slot.holders.is_empty() {
            staged.remove(&raw_key);
        }
        Ok(released)
    }

    /// Act on a commit notification after leaving the staging slot.
    async fn commit<K: Serialize + ?Sized>(
        &self,
        key: &K,
        value: V,
        version: Option<u64>,
        released: Release,
    ) -> Result<bool> {
        match released {
            Release::Sole(staged_version) => self.apply(key, value, version.or(staged_version), true).await,
            Release::Conflicted => {
                debug!(region = %self.region.name(), "Commit raced another transaction; evicting");
                self.region.evict(key).await?;
                Ok(false)
            }
            Release::NotHeld => {
                debug!(region = %self.region.name(), "No staged write for this token at commit");
                Ok(false)
            }
        }
    }

    /// Write a value unless the cached version rules it out.
    ///
    /// A load may re-cache the version already visible; a commit must be
    /// strictly newer.
    async fn apply<K: Serialize + ?Sized>(
        &self,
        key: &K,
        value: V,
        version: Option<u64>,
        commit: bool,
    ) -> Result<bool> {
        for _ in 0..MAX_SWAP_ATTEMPTS {
            let slot = Slot::<V>::read(&self.region, key).await?;
            let visible = slot.entry.as_ref().and_then(Entry::visible_version);
            if let (Some(visible), Some(incoming)) = (visible, version) {
                if incoming < visible || (commit && incoming == visible) {
                    debug!(region = %self.region.name(), visible, incoming, "Stale write rejected");
                    return Ok(false);
                }
            }

            let entry = Entry::Versioned(Item {
                value: &value,
                version,
                timestamp: self.region.next_timestamp(),
            });
            if self.region.swap_slot(key, slot.raw.as_ref(), &entry).await? {
                return Ok(true);
            }
        }
        Err(CacheError::LockContention {
            region: self.region.name().to_string(),
        })
    }
}
