//! Region-aware store client.
//!
//! Maps `(region, key) -> value` onto one hash per region, and mirrors every
//! expiring entry into a per-region sorted index scored by its expiry time in
//! epoch milliseconds. Writes touching both structures go out as one atomic
//! batch, so an entry is never visible without its index row or vice versa.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, trace, warn};

use crate::config::{BackendKind, Config};
use crate::error::{CacheError, Result};
use crate::metrics::CacheMetrics;
use crate::serializer::Codec;
use crate::store::backend::{Backend, BackendError, Command, CompareAndSwap, IndexUpdate};
use crate::store::memory::MemoryBackend;

/// Prefix of every TTL-index key. Region names chosen by callers never
/// receive it, so an index can't collide with a data region.
pub const EXPIRY_INDEX_PREFIX: &str = "z:";

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// The store client shared by every region of a factory.
pub struct StoreClient {
    backend: Arc<dyn Backend>,
    key_codec: Codec,
    value_codec: Codec,
    default_expiry_secs: u64,
    region_prefix: String,
    metrics: CacheMetrics,
}

impl StoreClient {
    pub fn new(backend: Arc<dyn Backend>, config: &Config, metrics: CacheMetrics) -> Self {
        debug!(
            expiry_in_seconds = config.cache.expiry_in_seconds,
            key_codec = ?config.cache.key_codec,
            value_codec = ?config.cache.value_codec,
            "Store client created"
        );

        Self {
            backend,
            key_codec: config.cache.key_codec(),
            value_codec: config.cache.value_codec(),
            default_expiry_secs: config.cache.expiry_in_seconds,
            region_prefix: config.cache.region_prefix.clone(),
            metrics,
        }
    }

    /// Connect the backend named by the configuration.
    pub async fn connect(config: &Config, metrics: CacheMetrics) -> Result<Self> {
        config.validate()?;
        let backend: Arc<dyn Backend> = match config.backend.kind {
            BackendKind::Memory => Arc::new(MemoryBackend::new()),
            #[cfg(feature = "redis")]
            BackendKind::Redis => Arc::new(
                crate::store::redis::RedisBackend::connect(&config.backend)
                    .await
                    .map_err(|e| CacheError::backend("connect", e))?,
            ),
            #[cfg(not(feature = "redis"))]
            BackendKind::Redis => {
                return Err(CacheError::Configuration(
                    "the redis backend requires the `redis` feature".to_string(),
                ))
            }
        };
        info!(backend = ?config.backend.kind, "Store client connected");
        Ok(Self::new(backend, config, metrics))
    }

    pub fn default_expiry_secs(&self) -> u64 {
        self.default_expiry_secs
    }

    pub fn key_codec(&self) -> Codec {
        self.key_codec
    }

    pub fn value_codec(&self) -> Codec {
        self.value_codec
    }

    pub fn metrics(&self) -> &CacheMetrics {
        &self.metrics
    }

    // ─── Diagnostics ────────────────────────────────────────────────────────

    pub async fn ping(&self) -> Result<String> {
        self.backend
            .ping()
            .await
            .map_err(|e| self.fail("ping", e))
    }

    /// Number of keys in the backend database, or `-1` if it can't be read.
    pub async fn size_info(&self) -> i64 {
        match self.backend.db_size().await {
            Ok(size) => size as i64,
            Err(e) => {
                warn!(error = %e, "Failed to read backend size");
                self.metrics.record_error("size_info");
                -1
            }
        }
    }

    /// Number of entries in a region, or `-1` if it can't be read.
    pub async fn region_size(&self, region: &str) -> i64 {
        match self.backend.hlen(&self.raw_region(region)).await {
            Ok(len) => len as i64,
            Err(e) => {
                warn!(region, error = %e, "Failed to read region size");
                self.metrics.record_error("region_size");
                -1
            }
        }
    }

    // ─── Reads ──────────────────────────────────────────────────────────────

    pub async fn try_exists<K: Serialize + ?Sized>(&self, region: &str, key: &K) -> Result<bool> {
        let raw_key = self.key_codec.encode(key)?;
        self.backend
            .hexists(&self.raw_region(region), &raw_key)
            .await
            .map_err(|e| self.fail("exists", e))
    }

    /// `false` on any failure.
    pub async fn exists<K: Serialize + ?Sized>(&self, region: &str, key: &K) -> bool {
        match self.try_exists(region, key).await {
            Ok(found) => found,
            Err(e) => {
                warn!(region, error = %e, "Existence check failed; reporting absent");
                false
            }
        }
    }

    /// The undecoded bytes stored for `key`.
    pub async fn get_raw<K: Serialize + ?Sized>(&self, region: &str, key: &K) -> Result<Option<Bytes>> {
        let raw_key = self.key_codec.encode(key)?;
        self.backend
            .hget(&self.raw_region(region), &raw_key)
            .await
            .map_err(|e| self.fail("get", e))
    }

    pub async fn try_get<K, V>(&self, region: &str, key: &K) -> Result<Option<V>>
    where
        K: Serialize + ?Sized,
        V: DeserializeOwned,
    {
        trace!(region, "Retrieving object");
        match self.get_raw(region, key).await? {
            Some(raw) => self.value_codec.try_decode(&raw),
            None => Ok(None),
        }
    }

    /// Absent on a miss, on a backend failure, and on undecodable bytes.
    pub async fn get<K, V>(&self, region: &str, key: &K) -> Option<V>
    where
        K: Serialize + ?Sized,
        V: DeserializeOwned,
    {
        let value = match self.try_get(region, key).await {
            Ok(value) => value,
            Err(e) => {
                warn!(region, error = %e, "Read failed; treating as a cache miss");
                None
            }
        };
        if value.is_some() {
            self.metrics.record_hit(region);
        } else {
            self.metrics.record_miss(region);
        }
        value
    }

    /// Every key cached in `region`. Undecodable keys are skipped.
    pub async fn keys<K>(&self, region: &str) -> Result<Vec<K>>
    where
        K: DeserializeOwned,
    {
        let raw = self
            .backend
            .hkeys(&self.raw_region(region))
            .await
            .map_err(|e| self.fail("keys", e))?;
        Ok(raw
            .iter()
            .filter_map(|k| self.key_codec.decode(k))
            .collect())
    }

    /// Every entry of `region`. Undecodable entries are skipped.
    pub async fn all_entries<K, V>(&self, region: &str) -> Result<HashMap<K, V>>
    where
        K: DeserializeOwned + Eq + Hash,
        V: DeserializeOwned,
    {
        let raw = self
            .backend
            .hgetall(&self.raw_region(region))
            .await
            .map_err(|e| self.fail("all_entries", e))?;
        Ok(raw
            .iter()
            .filter_map(|(k, v)| Some((self.key_codec.decode(k)?, self.value_codec.decode(v)?)))
            .collect())
    }

    /// Every field of `region` as stored, undecoded.
    pub async fn raw_entries(&self, region: &str) -> Result<Vec<(Bytes, Bytes)>> {
        self.backend
            .hgetall(&self.raw_region(region))
            .await
            .map_err(|e| self.fail("raw_entries", e))
    }

    /// One slot per key, in input order; misses are `None`.
    pub async fn try_multi_get<K, V>(&self, region: &str, keys: &[K]) -> Result<Vec<Option<V>>>
    where
        K: Serialize,
        V: DeserializeOwned,
    {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let raw_keys = keys
            .iter()
            .map(|k| self.key_codec.encode(k))
            .collect::<Result<Vec<_>>>()?;
        let raw = self
            .backend
            .hmget(&self.raw_region(region), &raw_keys)
            .await
            .map_err(|e| self.fail("multi_get", e))?;
        Ok(raw
            .into_iter()
            .map(|slot| slot.and_then(|v| self.value_codec.decode(&v)))
            .collect())
    }

    /// Like [`try_multi_get`](Self::try_multi_get) but all-absent on failure.
    pub async fn multi_get<K, V>(&self, region: &str, keys: &[K]) -> Vec<Option<V>>
    where
        K: Serialize,
        V: DeserializeOwned,
    {
        match self.try_multi_get(region, keys).await {
            Ok(values) => values,
            Err(e) => {
                warn!(region, keys = keys.len(), error = %e, "Multi-get failed; treating as misses");
                keys.iter().map(|_| None).collect()
            }
        }
    }

    // ─── Writes ─────────────────────────────────────────────────────────────

    /// Put with the configured default TTL.
    pub async fn put<K, V>(&self, region: &str, key: &K, value: &V) -> Result<()>
    where
        K: Serialize + ?Sized,
        V: Serialize + ?Sized,
    {
        self.put_with_ttl(region, key, value, self.default_expiry_secs).await
    }

    /// Write the hash field and its TTL-index row as one atomic batch.
    ///
    /// `ttl_secs == 0` stores a non-expiring entry and drops any index row an
    /// earlier expiring put left behind.
    pub async fn put_with_ttl<K, V>(&self, region: &str, key: &K, value: &V, ttl_secs: u64) -> Result<()>
    where
        K: Serialize + ?Sized,
        V: Serialize + ?Sized,
    {
        let raw_key = self.key_codec.encode(key)?;
        let raw_value = self.value_codec.encode(value)?;
        self.put_raw(region, raw_key, raw_value, ttl_secs).await
    }

    async fn put_raw(&self, region: &str, raw_key: Bytes, raw_value: Bytes, ttl_secs: u64) -> Result<()> {
        trace!(region, ttl_secs, value_len = raw_value.len(), "Setting value");

        let mut batch = vec![Command::HSet {
            key: self.raw_region(region),
            field: raw_key.clone(),
            value: raw_value,
        }];
        batch.push(match self.index_update(region, ttl_secs) {
            IndexUpdate::Upsert { key, score } => Command::ZAdd {
                key,
                score,
                member: raw_key,
            },
            IndexUpdate::Remove { key } => Command::ZRem { key, member: raw_key },
        });

        self.backend
            .exec(batch)
            .await
            .map_err(|e| self.fail("put", e))?;
        self.metrics.record_put(region);
        Ok(())
    }

    /// Store `value` only if the slot still holds `expected` (`None` = empty).
    ///
    /// This is the per-key compare-and-swap the lock-aware strategies build on.
    pub async fn compare_and_set<K, V>(
        &self,
        region: &str,
        key: &K,
        expected: Option<&Bytes>,
        value: &V,
        ttl_secs: u64,
    ) -> Result<bool>
    where
        K: Serialize + ?Sized,
        V: Serialize + ?Sized,
    {
        let raw_key = self.key_codec.encode(key)?;
        let raw_value = self.value_codec.encode(value)?;
        let applied = self
            .backend
            .compare_and_swap(CompareAndSwap {
                key: self.raw_region(region),
                field: raw_key,
                expected: expected.cloned(),
                replacement: Some(raw_value),
                index: self.index_update(region, ttl_secs),
            })
            .await
            .map_err(|e| self.fail("compare_and_set", e))?;
        if applied {
            self.metrics.record_put(region);
        }
        Ok(applied)
    }

    /// Delete the slot only if it still holds `expected`.
    pub async fn compare_and_delete<K>(&self, region: &str, key: &K, expected: &Bytes) -> Result<bool>
    where
        K: Serialize + ?Sized,
    {
        let raw_key = self.key_codec.encode(key)?;
        let applied = self
            .backend
            .compare_and_swap(CompareAndSwap {
                key: self.raw_region(region),
                field: raw_key,
                expected: Some(expected.clone()),
                replacement: None,
                index: IndexUpdate::Remove {
                    key: self.raw_index(region),
                },
            })
            .await
            .map_err(|e| self.fail("compare_and_delete", e))?;
        if applied {
            self.metrics.record_removal(region);
        }
        Ok(applied)
    }

    // ─── Deletes ────────────────────────────────────────────────────────────

    /// Remove the hash field and its index row atomically.
    pub async fn delete<K: Serialize + ?Sized>(&self, region: &str, key: &K) -> Result<()> {
        trace!(region, "Deleting key");
        let raw_key = self.key_codec.encode(key)?;
        self.backend
            .exec(vec![
                Command::HDel {
                    key: self.raw_region(region),
                    field: raw_key.clone(),
                },
                Command::ZRem {
                    key: self.raw_index(region),
                    member: raw_key,
                },
            ])
            .await
            .map_err(|e| self.fail("delete", e))?;
        self.metrics.record_removal(region);
        Ok(())
    }

    /// Remove many keys as one atomic unit.
    pub async fn delete_many<K: Serialize>(&self, region: &str, keys: &[K]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        trace!(region, keys = keys.len(), "Deleting keys");

        let raw_region = self.raw_region(region);
        let raw_index = self.raw_index(region);
        let mut batch = Vec::with_capacity(keys.len() * 2);
        for key in keys {
            let raw_key = self.key_codec.encode(key)?;
            batch.push(Command::HDel {
                key: raw_region.clone(),
                field: raw_key.clone(),
            });
            batch.push(Command::ZRem {
                key: raw_index.clone(),
                member: raw_key,
            });
        }

        self.backend
            .exec(batch)
            .await
            .map_err(|e| self.fail("delete_many", e))?;
        for _ in keys {
            self.metrics.record_removal(region);
        }
        Ok(())
    }

    /// Drop a region's hash and its TTL index together.
    pub async fn delete_region(&self, region: &str) -> Result<()> {
        debug!(region, "Deleting region");
        self.backend
            .exec(vec![
                Command::Del {
                    key: self.raw_region(region),
                },
                Command::Del {
                    key: self.raw_index(region),
                },
            ])
            .await
            .map_err(|e| self.fail("delete_region", e))
    }

    /// Remove every entry whose expiry score is `<= now_ms`.
    ///
    /// Returns the number of entries removed. The scan and the removal are
    /// separate round-trips; the removal itself is one atomic batch.
    pub async fn expire_region(&self, region: &str, now_ms: i64) -> Result<usize> {
        let raw_region = self.raw_region(region);
        let raw_index = self.raw_index(region);

        let expired = self
            .backend
            .zrange_by_score(&raw_index, 0, now_ms)
            .await
            .map_err(|e| self.fail("expire_region", e))?;
        if expired.is_empty() {
            return Ok(0);
        }

        let count = expired.len();
        let mut batch: Vec<Command> = expired
            .into_iter()
            .map(|field| Command::HDel {
                key: raw_region.clone(),
                field,
            })
            .collect();
        batch.push(Command::ZRemRangeByScore {
            key: raw_index,
            min: 0,
            max: now_ms,
        });

        self.backend
            .exec(batch)
            .await
            .map_err(|e| self.fail("expire_region", e))?;

        debug!(region, expired = count, before = now_ms, "Expired entries");
        Ok(count)
    }

    /// Wipe the entire backend database.
    ///
    /// Only for a backend owned by a single cache instance; never call this
    /// when other tenants may share the database.
    pub async fn flush_all(&self) -> Result<()> {
        info!("Flushing backend database");
        self.backend
            .flush_db()
            .await
            .map_err(|e| self.fail("flush_all", e))
    }

    // ─── Helpers ────────────────────────────────────────────────────────────

    fn raw_region(&self, region: &str) -> Bytes {
        Bytes::from(format!("{}{}", self.region_prefix, region).into_bytes())
    }

    fn raw_index(&self, region: &str) -> Bytes {
        Bytes::from(format!("{}{}{}", EXPIRY_INDEX_PREFIX, self.region_prefix, region).into_bytes())
    }

    fn index_update(&self, region: &str, ttl_secs: u64) -> IndexUpdate {
        if ttl_secs > 0 {
            IndexUpdate::Upsert {
                key: self.raw_index(region),
                score: now_millis() + (ttl_secs as i64) * 1000,
            }
        } else {
            IndexUpdate::Remove {
                key: self.raw_index(region),
            }
        }
    }

    fn fail(&self, operation: &'static str, source: BackendError) -> CacheError {
        self.metrics.record_error(operation);
        CacheError::backend(operation, source)
    }
}

impl std::fmt::Debug for StoreClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreClient")
            .field("key_codec", &self.key_codec)
            .field("value_codec", &self.value_codec)
            .field("default_expiry_secs", &self.default_expiry_secs)
            .field("region_prefix", &self.region_prefix)
            .finish()
    }
}
