//! What an access strategy stores in a key's slot.
//!
//! The slot always holds an [`Entry`], serialized with its discriminator, so a
//! reader can tell a plain value, a versioned item and an in-flight soft lock
//! apart without guessing from the decoded shape.

use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::region::TransactionalDataRegion;

static NEXT_LOCK_ID: AtomicU64 = AtomicU64::new(1);

/// A cache slot's content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Entry<V> {
    /// A value stored without version tracking.
    Value(V),
    /// A value stamped with its version.
    Versioned(Item<V>),
    /// A write is in flight; readers must not see the value underneath.
    Locked(Lock<V>),
}

impl<V> Entry<V> {
    /// The value a reader may see at `now_ms`, if any.
    pub fn readable(self, now_ms: i64) -> Option<V> {
        match self {
            Entry::Value(value) => Some(value),
            Entry::Versioned(item) => Some(item.value),
            Entry::Locked(lock) if lock.is_expired(now_ms) => lock.previous.map(|item| item.value),
            Entry::Locked(_) => None,
        }
    }

    /// The version a new write must not be older than.
    pub fn visible_version(&self) -> Option<u64> {
        match self {
            Entry::Value(_) => None,
            Entry::Versioned(item) => item.version,
            Entry::Locked(lock) => lock.previous.as_ref().and_then(|item| item.version),
        }
    }

    /// Demote whatever the slot holds to the item a new lock keeps underneath.
    pub(crate) fn into_previous(self) -> Option<Item<V>> {
        match self {
            Entry::Value(value) => Some(Item {
                value,
                version: None,
                timestamp: 0,
            }),
            Entry::Versioned(item) => Some(item),
            Entry::Locked(lock) => lock.previous,
        }
    }
}

/// A versioned cache value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item<V> {
    pub value: V,
    pub version: Option<u64>,
    /// When the item was written, from [`next_timestamp`](crate::region::next_timestamp).
    pub timestamp: i64,
}

impl<V> Item<V> {
    /// Whether a write carrying `version` may replace this item.
    ///
    /// Unversioned data is always replaceable; versioned data only by a
    /// version that is not older.
    pub fn is_writeable(&self, version: Option<u64>) -> bool {
        match (self.version, version) {
            (Some(current), Some(incoming)) => incoming >= current,
            _ => true,
        }
    }
}

/// A soft lock parked in a slot while the owning transaction writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lock<V> {
    pub owner: Uuid,
    pub id: u64,
    /// Epoch millis after which the lock is ignored.
    pub deadline_ms: i64,
    /// Writers currently holding the lock.
    pub holders: u32,
    /// Set once a second writer has joined; such a lock never publishes.
    pub concurrent: bool,
    pub previous: Option<Item<V>>,
}

impl<V> Lock<V> {
    pub fn new(owner: Uuid, deadline_ms: i64, previous: Option<Item<V>>) -> Self {
        let token = SoftLock::issue(owner);
        Self {
            owner,
            id: token.id,
            deadline_ms,
            holders: 1,
            concurrent: false,
            previous,
        }
    }

    /// Strictly after the deadline.
    pub fn is_expired(&self, now_ms: i64) -> bool {
        now_ms > self.deadline_ms
    }

    pub fn token(&self) -> SoftLock {
        SoftLock {
            owner: self.owner,
            id: self.id,
        }
    }

    pub fn is_unlockable(&self, lock: &SoftLock) -> bool {
        self.owner == lock.owner && self.id == lock.id
    }
}

/// The token a writer presents to commit or release its lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SoftLock {
    pub owner: Uuid,
    pub id: u64,
}

impl SoftLock {
    /// A token with a process-unique id.
    pub fn issue(owner: Uuid) -> Self {
        Self {
            owner,
            id: NEXT_LOCK_ID.fetch_add(1, Ordering::Relaxed),
        }
    }
}

/// A slot as last read: the raw bytes to compare-and-swap against, plus the
/// decoded entry. Undecodable bytes leave `entry` empty but keep `raw`.
pub(crate) struct Slot<V> {
    pub raw: Option<Bytes>,
    pub entry: Option<Entry<V>>,
}

impl<V: serde::de::DeserializeOwned> Slot<V> {
    pub async fn read<K: Serialize + ?Sized>(region: &TransactionalDataRegion, key: &K) -> Result<Self> {
        let raw = region.read_slot(key).await?;
        let entry = raw.as_ref().and_then(|raw| region.decode_slot(raw));
        Ok(Self { raw, entry })
    }

    pub fn is_occupied(&self) -> bool {
        self.raw.is_some()
    }
}
