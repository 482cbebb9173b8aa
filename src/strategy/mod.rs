//! Access strategies: the consistency protocols layered over a region.
//!
//! - [`ReadOnlyAccess`]: one-time inserts, any later write is a violation
//! - [`NonstrictReadWriteAccess`]: overwrite on load, evict on write
//! - [`ReadWriteAccess`]: soft locks with a timed deadline and version checks
//! - [`TransactionalAccess`]: stage on write, apply only on commit
//!
//! [`AccessStrategy`] is the closed sum over the four. Every strategy shares
//! one method surface so callers drive them identically; each constructor
//! rejects an access type it wasn't built for.

pub mod entry;
pub mod nonstrict;
pub mod read_only;
pub mod read_write;
pub mod transactional;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

pub use entry::{Entry, Item, Lock, SoftLock};
pub use nonstrict::NonstrictReadWriteAccess;
pub use read_only::ReadOnlyAccess;
pub use read_write::ReadWriteAccess;
pub use transactional::TransactionalAccess;

use crate::error::{CacheError, Result};
use crate::region::TransactionalDataRegion;
use crate::store::StoreClient;

/// Compare-and-swap attempts before a write gives up with
/// [`CacheError::LockContention`].
pub(crate) const MAX_SWAP_ATTEMPTS: usize = 16;

/// Anything a strategy can cache.
pub trait CacheValue: Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> CacheValue for T where T: Serialize + DeserializeOwned + Send + Sync + 'static {}

/// The consistency policy declared for a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessType {
    ReadOnly,
    ReadWrite,
    NonstrictReadWrite,
    Transactional,
}

impl AccessType {
    pub fn external_name(&self) -> &'static str {
        match self {
            AccessType::ReadOnly => "read-only",
            AccessType::ReadWrite => "read-write",
            AccessType::NonstrictReadWrite => "nonstrict-read-write",
            AccessType::Transactional => "transactional",
        }
    }
}

impl FromStr for AccessType {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "read-only" => Ok(AccessType::ReadOnly),
            "read-write" => Ok(AccessType::ReadWrite),
            "nonstrict-read-write" => Ok(AccessType::NonstrictReadWrite),
            "transactional" => Ok(AccessType::Transactional),
            other => Err(CacheError::Configuration(format!(
                "unrecognized access strategy type [{other}]"
            ))),
        }
    }
}

impl fmt::Display for AccessType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.external_name())
    }
}

pub(crate) fn ensure_access_type(
    region: &TransactionalDataRegion,
    expected: AccessType,
    requested: AccessType,
) -> Result<()> {
    if requested != expected {
        return Err(CacheError::Configuration(format!(
            "{expected} strategy can't serve access type [{requested}] for region '{}'",
            region.name()
        )));
    }
    Ok(())
}

/// One of the four strategies, chosen by declared access type.
pub enum AccessStrategy<V> {
    ReadOnly(ReadOnlyAccess<V>),
    NonstrictReadWrite(NonstrictReadWriteAccess<V>),
    ReadWrite(ReadWriteAccess<V>),
    Transactional(TransactionalAccess<V>),
}

macro_rules! dispatch {
    ($self:ident, $s:ident => $call:expr) => {
        match $self {
            AccessStrategy::ReadOnly($s) => $call,
            AccessStrategy::NonstrictReadWrite($s) => $call,
            AccessStrategy::ReadWrite($s) => $call,
            AccessStrategy::Transactional($s) => $call,
        }
    };
}

impl<V: CacheValue> AccessStrategy<V> {
    /// Build the strategy for `access_type` over `region`.
    pub fn new(region: Arc<TransactionalDataRegion>, access_type: AccessType) -> Result<Self> {
        debug!(
            region = %region.name(),
            kind = %region.kind(),
            access_type = %access_type,
            "Creating access strategy"
        );
        Ok(match access_type {
            AccessType::ReadOnly => AccessStrategy::ReadOnly(ReadOnlyAccess::new(region, access_type)?),
            AccessType::NonstrictReadWrite => {
                AccessStrategy::NonstrictReadWrite(NonstrictReadWriteAccess::new(region, access_type)?)
            }
            AccessType::ReadWrite => AccessStrategy::ReadWrite(ReadWriteAccess::new(region, access_type)?),
            AccessType::Transactional => {
                AccessStrategy::Transactional(TransactionalAccess::new(region, access_type)?)
            }
        })
    }

    /// Like [`new`](Self::new), handing the transactional variant a direct
    /// client for batched natural-id lookups.
    pub fn for_natural_ids(
        region: Arc<TransactionalDataRegion>,
        access_type: AccessType,
        client: Arc<StoreClient>,
    ) -> Result<Self> {
        match access_type {
            AccessType::Transactional => Ok(AccessStrategy::Transactional(
                TransactionalAccess::for_natural_ids(region, access_type, client)?,
            )),
            other => Self::new(region, other),
        }
    }

    pub fn access_type(&self) -> AccessType {
        match self {
            AccessStrategy::ReadOnly(_) => AccessType::ReadOnly,
            AccessStrategy::NonstrictReadWrite(_) => AccessType::NonstrictReadWrite,
            AccessStrategy::ReadWrite(_) => AccessType::ReadWrite,
            AccessStrategy::Transactional(_) => AccessType::Transactional,
        }
    }

    pub fn region(&self) -> &Arc<TransactionalDataRegion> {
        dispatch!(self, s => s.region())
    }

    pub async fn get<K: Serialize + ?Sized>(&self, key: &K) -> Option<V> {
        dispatch!(self, s => s.get(key).await)
    }

    pub async fn put_from_load<K: Serialize + ?Sized>(
        &self,
        key: &K,
        value: V,
        version: Option<u64>,
        minimal_put: bool,
    ) -> Result<bool> {
        dispatch!(self, s => s.put_from_load(key, value, version, minimal_put).await)
    }

    pub async fn insert<K: Serialize + ?Sized>(&self, key: &K, value: V, version: Option<u64>) -> Result<bool> {
        dispatch!(self, s => s.insert(key, value, version).await)
    }

    pub async fn after_insert<K: Serialize + ?Sized>(&self, key: &K, value: V, version: Option<u64>) -> Result<bool> {
        dispatch!(self, s => s.after_insert(key, value, version).await)
    }

    pub async fn update<K: Serialize + ?Sized>(
        &self,
        key: &K,
        value: V,
        current_version: Option<u64>,
        previous_version: Option<u64>,
    ) -> Result<bool> {
        dispatch!(self, s => s.update(key, value, current_version, previous_version).await)
    }

    pub async fn after_update<K: Serialize + ?Sized>(
        &self,
        key: &K,
        value: V,
        current_version: Option<u64>,
        previous_version: Option<u64>,
        lock: Option<&SoftLock>,
    ) -> Result<bool> {
        dispatch!(self, s => s.after_update(key, value, current_version, previous_version, lock).await)
    }

    pub async fn lock_item<K: Serialize + ?Sized>(&self, key: &K, version: Option<u64>) -> Result<Option<SoftLock>> {
        dispatch!(self, s => s.lock_item(key, version).await)
    }

    pub async fn unlock_item<K: Serialize + ?Sized>(&self, key: &K, lock: Option<&SoftLock>) -> Result<()> {
        dispatch!(self, s => s.unlock_item(key, lock).await)
    }

    pub async fn remove<K: Serialize + ?Sized>(&self, key: &K) -> Result<()> {
        dispatch!(self, s => s.remove(key).await)
    }

    pub async fn remove_all(&self) -> Result<()> {
        dispatch!(self, s => s.remove_all().await)
    }

    pub async fn evict<K: Serialize + ?Sized>(&self, key: &K) -> Result<()> {
        dispatch!(self, s => s.evict(key).await)
    }

    pub async fn evict_all(&self) -> Result<()> {
        dispatch!(self, s => s.evict_all().await)
    }

    pub async fn lock_region(&self) -> Result<Option<SoftLock>> {
        dispatch!(self, s => s.lock_region().await)
    }

    pub async fn unlock_region(&self, lock: Option<&SoftLock>) -> Result<()> {
        dispatch!(self, s => s.unlock_region(lock).await)
    }
}

impl<V> fmt::Debug for AccessStrategy<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (variant, region) = match self {
            AccessStrategy::ReadOnly(s) => ("ReadOnly", s.region().name()),
            AccessStrategy::NonstrictReadWrite(s) => ("NonstrictReadWrite", s.region().name()),
            AccessStrategy::ReadWrite(s) => ("ReadWrite", s.region().name()),
            AccessStrategy::Transactional(s) => ("Transactional", s.region().name()),
        };
        f.debug_struct("AccessStrategy")
            .field("variant", &variant)
            .field("region", &region)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_type_external_names() {
        for name in ["read-only", "read-write", "nonstrict-read-write", "transactional"] {
            let parsed: AccessType = name.parse().unwrap();
            assert_eq!(parsed.external_name(), name);
        }
    }

    #[test]
    fn test_unknown_access_type_is_configuration_error() {
        let result = "write-behind".parse::<AccessType>();
        assert!(matches!(result, Err(CacheError::Configuration(_))));
    }
}
