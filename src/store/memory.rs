//! In-process backend.
//!
//! Implements the backend primitives over plain tables. Every batch and
//! compare-and-swap runs under one write lock, so readers observe either
//! none or all of a batch's effects.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;

use crate::store::backend::{Backend, BackendError, Command, CompareAndSwap, IndexUpdate};

#[derive(Debug, Default)]
struct SortedSet {
    scores: HashMap<Bytes, i64>,
    index: BTreeSet<(i64, Bytes)>,
}

impl SortedSet {
    fn add(&mut self, member: Bytes, score: i64) {
        if let Some(old) = self.scores.insert(member.clone(), score) {
            self.index.remove(&(old, member.clone()));
        }
        self.index.insert((score, member));
    }

    fn remove(&mut self, member: &[u8]) {
        if let Some((member, score)) = self.scores.remove_entry(member) {
            self.index.remove(&(score, member));
        }
    }

    fn range(&self, min: i64, max: i64) -> impl Iterator<Item = &Bytes> {
        self.index
            .range((min, Bytes::new())..)
            .take_while(move |(score, _)| *score <= max)
            .map(|(_, member)| member)
    }

    fn remove_range(&mut self, min: i64, max: i64) {
        let doomed: Vec<Bytes> = self.range(min, max).cloned().collect();
        for member in doomed {
            self.remove(&member);
        }
    }

    fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }
}

#[derive(Debug)]
enum Value {
    Hash(HashMap<Bytes, Bytes>),
    Sorted(SortedSet),
}

#[derive(Debug, Default)]
struct Database {
    keys: HashMap<Bytes, Value>,
}

impl Database {
    fn hash(&self, key: &[u8]) -> Result<Option<&HashMap<Bytes, Bytes>>, BackendError> {
        match self.keys.get(key) {
            None => Ok(None),
            Some(Value::Hash(h)) => Ok(Some(h)),
            Some(_) => Err(BackendError::wrong_type(key)),
        }
    }

    fn hash_mut(&mut self, key: &Bytes) -> Result<&mut HashMap<Bytes, Bytes>, BackendError> {
        match self
            .keys
            .entry(key.clone())
            .or_insert_with(|| Value::Hash(HashMap::new()))
        {
            Value::Hash(h) => Ok(h),
            _ => Err(BackendError::wrong_type(key)),
        }
    }

    fn sorted(&self, key: &[u8]) -> Result<Option<&SortedSet>, BackendError> {
        match self.keys.get(key) {
            None => Ok(None),
            Some(Value::Sorted(z)) => Ok(Some(z)),
            Some(_) => Err(BackendError::wrong_type(key)),
        }
    }

    fn sorted_mut(&mut self, key: &Bytes) -> Result<&mut SortedSet, BackendError> {
        match self
            .keys
            .entry(key.clone())
            .or_insert_with(|| Value::Sorted(SortedSet::default()))
        {
            Value::Sorted(z) => Ok(z),
            _ => Err(BackendError::wrong_type(key)),
        }
    }

    /// Drop keys whose structure became empty, like a real server does.
    fn prune(&mut self, key: &[u8]) {
        let empty = match self.keys.get(key) {
            Some(Value::Hash(h)) => h.is_empty(),
            Some(Value::Sorted(z)) => z.is_empty(),
            None => false,
        };
        if empty {
            self.keys.remove(key);
        }
    }

    /// Reject a batch up front if any command targets a key of the wrong type,
    /// so a failing batch leaves no partial effects behind.
    fn check(&self, command: &Command) -> Result<(), BackendError> {
        match command {
            Command::HSet { key, .. } | Command::HDel { key, .. } => self.hash(key).map(|_| ()),
            Command::ZAdd { key, .. }
            | Command::ZRem { key, .. }
            | Command::ZRemRangeByScore { key, .. } => self.sorted(key).map(|_| ()),
            Command::Del { .. } => Ok(()),
        }
    }

    fn apply(&mut self, command: Command) -> Result<(), BackendError> {
        match command {
            Command::HSet { key, field, value } => {
                self.hash_mut(&key)?.insert(field, value);
            }
            Command::HDel { key, field } => {
                if self.hash(&key)?.is_some() {
                    self.hash_mut(&key)?.remove(&field);
                    self.prune(&key);
                }
            }
            Command::ZAdd { key, score, member } => {
                self.sorted_mut(&key)?.add(member, score);
            }
            Command::ZRem { key, member } => {
                if self.sorted(&key)?.is_some() {
                    self.sorted_mut(&key)?.remove(&member);
                    self.prune(&key);
                }
            }
            Command::ZRemRangeByScore { key, min, max } => {
                if self.sorted(&key)?.is_some() {
                    self.sorted_mut(&key)?.remove_range(min, max);
                    self.prune(&key);
                }
            }
            Command::Del { key } => {
                self.keys.remove(&key);
            }
        }
        Ok(())
    }
}

/// A backend living entirely in this process.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    db: RwLock<Database>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn ping(&self) -> Result<String, BackendError> {
        Ok("PONG".to_string())
    }

    async fn db_size(&self) -> Result<u64, BackendError> {
        Ok(self.db.read().keys.len() as u64)
    }

    async fn hexists(&self, key: &[u8], field: &[u8]) -> Result<bool, BackendError> {
        let db = self.db.read();
        Ok(db.hash(key)?.is_some_and(|h| h.contains_key(field)))
    }

    async fn hget(&self, key: &[u8], field: &[u8]) -> Result<Option<Bytes>, BackendError> {
        let db = self.db.read();
        Ok(db.hash(key)?.and_then(|h| h.get(field).cloned()))
    }

    async fn hkeys(&self, key: &[u8]) -> Result<Vec<Bytes>, BackendError> {
        let db = self.db.read();
        Ok(db
            .hash(key)?
            .map(|h| h.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn hgetall(&self, key: &[u8]) -> Result<Vec<(Bytes, Bytes)>, BackendError> {
        let db = self.db.read();
        Ok(db
            .hash(key)?
            .map(|h| h.iter().map(|(f, v)| (f.clone(), v.clone())).collect())
            .unwrap_or_default())
    }

    async fn hmget(&self, key: &[u8], fields: &[Bytes]) -> Result<Vec<Option<Bytes>>, BackendError> {
        let db = self.db.read();
        let hash = db.hash(key)?;
        Ok(fields
            .iter()
            .map(|f| hash.and_then(|h| h.get(f).cloned()))
            .collect())
    }

    async fn hlen(&self, key: &[u8]) -> Result<u64, BackendError> {
        let db = self.db.read();
        Ok(db.hash(key)?.map(|h| h.len() as u64).unwrap_or(0))
    }

    async fn zrange_by_score(&self, key: &[u8], min: i64, max: i64) -> Result<Vec<Bytes>, BackendError> {
        let db = self.db.read();
        Ok(db
            .sorted(key)?
            .map(|z| z.range(min, max).cloned().collect())
            .unwrap_or_default())
    }

    async fn exec(&self, batch: Vec<Command>) -> Result<(), BackendError> {
        let mut db = self.db.write();
        for command in &batch {
            db.check(command)?;
        }
        for command in batch {
            db.apply(command)?;
        }
        Ok(())
    }

    async fn compare_and_swap(&self, cas: CompareAndSwap) -> Result<bool, BackendError> {
        let mut db = self.db.write();

        let current = db.hash(&cas.key)?.and_then(|h| h.get(&cas.field).cloned());
        if current != cas.expected {
            return Ok(false);
        }

        let index_key = match &cas.index {
            IndexUpdate::Upsert { key, .. } | IndexUpdate::Remove { key } => key.clone(),
        };
        db.sorted(&index_key)?;

        match cas.replacement {
            Some(value) => {
                db.apply(Command::HSet {
                    key: cas.key,
                    field: cas.field.clone(),
                    value,
                })?;
            }
            None => {
                db.apply(Command::HDel {
                    key: cas.key,
                    field: cas.field.clone(),
                })?;
            }
        }
        match cas.index {
            IndexUpdate::Upsert { key, score } => db.apply(Command::ZAdd {
                key,
                score,
                member: cas.field,
            })?,
            IndexUpdate::Remove { key } => db.apply(Command::ZRem {
                key,
                member: cas.field,
            })?,
        }
        Ok(true)
    }

    async fn flush_db(&self) -> Result<(), BackendError> {
        self.db.write().keys.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b(s: &str) -> Bytes {
        Bytes::copy_from_slice(s.as_bytes())
    }

    #[tokio::test]
    async fn test_hash_roundtrip_and_prune() {
        let backend = MemoryBackend::new();
        backend
            .exec(vec![Command::HSet {
                key: b("r"),
                field: b("k"),
                value: b("v"),
            }])
            .await
            .unwrap();

        assert_eq!(backend.hget(b"r", b"k").await.unwrap(), Some(b("v")));
        assert!(backend.hexists(b"r", b"k").await.unwrap());
        assert_eq!(backend.db_size().await.unwrap(), 1);

        backend
            .exec(vec![Command::HDel {
                key: b("r"),
                field: b("k"),
            }])
            .await
            .unwrap();
        assert_eq!(backend.db_size().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_sorted_range_is_inclusive_and_ordered() {
        let backend = MemoryBackend::new();
        backend
            .exec(vec![
                Command::ZAdd { key: b("z"), score: 30, member: b("c") },
                Command::ZAdd { key: b("z"), score: 10, member: b("a") },
                Command::ZAdd { key: b("z"), score: 20, member: b("b") },
            ])
            .await
            .unwrap();

        let members = backend.zrange_by_score(b"z", 0, 20).await.unwrap();
        assert_eq!(members, vec![b("a"), b("b")]);

        // Re-scoring a member moves it rather than duplicating it.
        backend
            .exec(vec![Command::ZAdd { key: b("z"), score: 40, member: b("a") }])
            .await
            .unwrap();
        assert_eq!(backend.zrange_by_score(b"z", 0, 20).await.unwrap(), vec![b("b")]);

        backend
            .exec(vec![Command::ZRemRangeByScore { key: b("z"), min: 0, max: 35 }])
            .await
            .unwrap();
        assert_eq!(backend.zrange_by_score(b"z", 0, i64::MAX).await.unwrap(), vec![b("a")]);
    }

    #[tokio::test]
    async fn test_failed_batch_has_no_effect() {
        let backend = MemoryBackend::new();
        backend
            .exec(vec![Command::ZAdd { key: b("z"), score: 1, member: b("m") }])
            .await
            .unwrap();

        // Second command targets a sorted set as a hash.
        let result = backend
            .exec(vec![
                Command::HSet { key: b("r"), field: b("k"), value: b("v") },
                Command::HSet { key: b("z"), field: b("k"), value: b("v") },
            ])
            .await;
        assert!(matches!(result, Err(BackendError::WrongType { .. })));
        assert!(!backend.hexists(b"r", b"k").await.unwrap());
    }

    #[tokio::test]
    async fn test_compare_and_swap() {
        let backend = MemoryBackend::new();
        let cas = |expected: Option<Bytes>, replacement: Option<Bytes>| CompareAndSwap {
            key: b("r"),
            field: b("k"),
            expected,
            replacement,
            index: IndexUpdate::Upsert { key: b("z:r"), score: 99 },
        };

        assert!(backend.compare_and_swap(cas(None, Some(b("v1")))).await.unwrap());
        assert!(!backend.compare_and_swap(cas(None, Some(b("v2")))).await.unwrap());
        assert!(!backend.compare_and_swap(cas(Some(b("x")), Some(b("v2")))).await.unwrap());
        assert!(backend.compare_and_swap(cas(Some(b("v1")), Some(b("v2")))).await.unwrap());
        assert_eq!(backend.hget(b"r", b"k").await.unwrap(), Some(b("v2")));
        assert_eq!(backend.zrange_by_score(b"z:r", 0, 100).await.unwrap(), vec![b("k")]);

        let delete = CompareAndSwap {
            key: b("r"),
            field: b("k"),
            expected: Some(b("v2")),
            replacement: None,
            index: IndexUpdate::Remove { key: b("z:r") },
        };
        assert!(backend.compare_and_swap(delete).await.unwrap());
        assert_eq!(backend.db_size().await.unwrap(), 0);
    }
}
