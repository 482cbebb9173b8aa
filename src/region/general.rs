//! Query-result and timestamp regions.

use std::ops::Deref;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::trace;

use crate::error::Result;
use crate::region::{DataRegion, RegionKind};
use crate::store::StoreClient;

/// A region with plain get/put/evict semantics.
///
/// `get` never fails: backend and decode errors come back as a miss.
/// `put`, `evict` and `evict_all` propagate failures.
#[derive(Debug)]
pub struct GeneralDataRegion {
    base: DataRegion,
}

impl GeneralDataRegion {
    pub fn new(
        client: Arc<StoreClient>,
        name: impl Into<String>,
        kind: RegionKind,
        expiry_in_seconds: u64,
        lock_timeout_ms: u64,
    ) -> Self {
        debug_assert!(!kind.is_transactional());
        Self {
            base: DataRegion::new(client, name, kind, expiry_in_seconds, lock_timeout_ms),
        }
    }

    pub async fn get<K, V>(&self, key: &K) -> Option<V>
    where
        K: Serialize + ?Sized,
        V: DeserializeOwned,
    {
        trace!(region = %self.name(), "Getting cache item");
        self.base.read(key).await
    }

    pub async fn put<K, V>(&self, key: &K, value: &V) -> Result<()>
    where
        K: Serialize + ?Sized,
        V: Serialize + ?Sized,
    {
        trace!(region = %self.name(), "Putting cache item");
        self.base.write(key, value).await
    }

    pub async fn evict<K: Serialize + ?Sized>(&self, key: &K) -> Result<()> {
        self.base.delete(key).await
    }

    pub async fn evict_all(&self) -> Result<()> {
        self.base.delete_all().await
    }
}

impl Deref for GeneralDataRegion {
    type Target = DataRegion;

    fn deref(&self) -> &DataRegion {
        &self.base
    }
}
