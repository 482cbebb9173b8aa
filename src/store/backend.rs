//! The key-value backend seam.
//!
//! The store client needs exactly these primitives from a backend:
//! hash maps per key, a sorted-by-score index, whole-key deletion,
//! all-or-nothing batches and database-scope flush. A single-field
//! compare-and-swap is layered on top for the lock-aware access strategies.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Operation timed out after {0} ms")]
    Timeout(u64),

    #[error("Key {key:?} holds a value of the wrong type")]
    WrongType { key: String },

    #[error("Unexpected backend reply: {0}")]
    Protocol(String),

    #[cfg(feature = "redis")]
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

impl BackendError {
    pub(crate) fn wrong_type(key: &[u8]) -> Self {
        BackendError::WrongType {
            key: String::from_utf8_lossy(key).into_owned(),
        }
    }
}

/// One write inside an atomic batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    HSet { key: Bytes, field: Bytes, value: Bytes },
    HDel { key: Bytes, field: Bytes },
    ZAdd { key: Bytes, score: i64, member: Bytes },
    ZRem { key: Bytes, member: Bytes },
    /// Remove every index row with `min <= score <= max`.
    ZRemRangeByScore { key: Bytes, min: i64, max: i64 },
    Del { key: Bytes },
}

/// Index maintenance that accompanies a successful compare-and-swap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexUpdate {
    /// Upsert the field's row with this score.
    Upsert { key: Bytes, score: i64 },
    /// Drop the field's row, if any.
    Remove { key: Bytes },
}

/// Replace a hash field only if it still holds `expected`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompareAndSwap {
    pub key: Bytes,
    pub field: Bytes,
    /// `None` means the field must currently be absent.
    pub expected: Option<Bytes>,
    /// `None` deletes the field.
    pub replacement: Option<Bytes>,
    pub index: IndexUpdate,
}

#[async_trait]
pub trait Backend: Send + Sync + 'static {
    async fn ping(&self) -> Result<String, BackendError>;

    /// Number of top-level keys in the selected database.
    async fn db_size(&self) -> Result<u64, BackendError>;

    async fn hexists(&self, key: &[u8], field: &[u8]) -> Result<bool, BackendError>;

    async fn hget(&self, key: &[u8], field: &[u8]) -> Result<Option<Bytes>, BackendError>;

    async fn hkeys(&self, key: &[u8]) -> Result<Vec<Bytes>, BackendError>;

    async fn hgetall(&self, key: &[u8]) -> Result<Vec<(Bytes, Bytes)>, BackendError>;

    /// Values for `fields`, positionally; missing fields are `None`.
    async fn hmget(&self, key: &[u8], fields: &[Bytes]) -> Result<Vec<Option<Bytes>>, BackendError>;

    async fn hlen(&self, key: &[u8]) -> Result<u64, BackendError>;

    /// Members with `min <= score <= max`, ascending by score.
    async fn zrange_by_score(&self, key: &[u8], min: i64, max: i64) -> Result<Vec<Bytes>, BackendError>;

    /// Apply every command or none of them.
    async fn exec(&self, batch: Vec<Command>) -> Result<(), BackendError>;

    /// Returns `true` when the swap was applied.
    async fn compare_and_swap(&self, cas: CompareAndSwap) -> Result<bool, BackendError>;

    async fn flush_db(&self) -> Result<(), BackendError>;
}
