//! Redis backend.
//!
//! Hashes hold region entries, sorted sets hold the TTL index, `MULTI/EXEC`
//! pipelines provide atomic batches and a Lua script provides the
//! single-field compare-and-swap.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use redis::aio::MultiplexedConnection;
use tokio::sync::Semaphore;
use tracing::{debug, info};

use crate::config::BackendConfig;
use crate::store::backend::{Backend, BackendError, Command, CompareAndSwap, IndexUpdate};

/// KEYS[1] = hash, KEYS[2] = index
/// ARGV[1] = field, ARGV[2] = "1" if a current value is expected,
/// ARGV[3] = expected value, ARGV[4] = "1" if replacing (else delete),
/// ARGV[5] = replacement, ARGV[6] = "1" to upsert the index row, ARGV[7] = score
const COMPARE_AND_SWAP_SCRIPT: &str = r#"
local current = redis.call('HGET', KEYS[1], ARGV[1])
if ARGV[2] == '1' then
  if current ~= ARGV[3] then return 0 end
else
  if current then return 0 end
end
if ARGV[4] == '1' then
  redis.call('HSET', KEYS[1], ARGV[1], ARGV[5])
else
  redis.call('HDEL', KEYS[1], ARGV[1])
end
if ARGV[6] == '1' then
  redis.call('ZADD', KEYS[2], ARGV[7], ARGV[1])
else
  redis.call('ZREM', KEYS[2], ARGV[1])
end
return 1
"#;

/// A small pool of multiplexed connections.
///
/// `min_idle` connections are opened up front and used round-robin; at most
/// `max_active` commands are in flight at once.
pub struct RedisBackend {
    connections: Vec<MultiplexedConnection>,
    next: AtomicUsize,
    permits: Semaphore,
    cas_script: redis::Script,
}

impl RedisBackend {
    pub async fn connect(config: &BackendConfig) -> Result<Self, BackendError> {
        let client = redis::Client::open(config.connection_info())?;
        let timeout = Duration::from_millis(config.connect_timeout_ms);
        let count = config.pool.min_idle.max(1);

        let mut connections = Vec::with_capacity(count);
        for _ in 0..count {
            let connection =
                tokio::time::timeout(timeout, client.get_multiplexed_async_connection())
                    .await
                    .map_err(|_| BackendError::Timeout(config.connect_timeout_ms))??;
            connections.push(connection);
        }

        info!(
            host = %config.host,
            port = config.port,
            database = config.database,
            connections = count,
            max_active = config.pool.max_active,
            "Connected to redis"
        );

        Ok(Self {
            connections,
            next: AtomicUsize::new(0),
            permits: Semaphore::new(config.pool.max_active.max(1)),
            cas_script: redis::Script::new(COMPARE_AND_SWAP_SCRIPT),
        })
    }

    fn connection(&self) -> MultiplexedConnection {
        let i = self.next.fetch_add(1, Ordering::Relaxed) % self.connections.len();
        self.connections[i].clone()
    }

    async fn query<T: redis::FromRedisValue>(&self, cmd: &redis::Cmd) -> Result<T, BackendError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| BackendError::Connection(e.to_string()))?;
        let mut con = self.connection();
        let value: T = cmd.query_async(&mut con).await?;
        Ok(value)
    }
}

fn to_bytes(raw: Vec<u8>) -> Bytes {
    Bytes::from(raw)
}

#[async_trait]
impl Backend for RedisBackend {
    async fn ping(&self) -> Result<String, BackendError> {
        self.query(&redis::cmd("PING")).await
    }

    async fn db_size(&self) -> Result<u64, BackendError> {
        self.query(&redis::cmd("DBSIZE")).await
    }

    async fn hexists(&self, key: &[u8], field: &[u8]) -> Result<bool, BackendError> {
        self.query(redis::cmd("HEXISTS").arg(key).arg(field)).await
    }

    async fn hget(&self, key: &[u8], field: &[u8]) -> Result<Option<Bytes>, BackendError> {
        let raw: Option<Vec<u8>> = self.query(redis::cmd("HGET").arg(key).arg(field)).await?;
        Ok(raw.map(to_bytes))
    }

    async fn hkeys(&self, key: &[u8]) -> Result<Vec<Bytes>, BackendError> {
        let raw: Vec<Vec<u8>> = self.query(redis::cmd("HKEYS").arg(key)).await?;
        Ok(raw.into_iter().map(to_bytes).collect())
    }

    async fn hgetall(&self, key: &[u8]) -> Result<Vec<(Bytes, Bytes)>, BackendError> {
        let raw: HashMap<Vec<u8>, Vec<u8>> = self.query(redis::cmd("HGETALL").arg(key)).await?;
        Ok(raw
            .into_iter()
            .map(|(f, v)| (to_bytes(f), to_bytes(v)))
            .collect())
    }

    async fn hmget(&self, key: &[u8], fields: &[Bytes]) -> Result<Vec<Option<Bytes>>, BackendError> {
        if fields.is_empty() {
            return Ok(Vec::new());
        }
        let mut cmd = redis::cmd("HMGET");
        cmd.arg(key);
        for field in fields {
            cmd.arg(field.as_ref());
        }
        let raw: Vec<Option<Vec<u8>>> = self.query(&cmd).await?;
        if raw.len() != fields.len() {
            return Err(BackendError::Protocol(format!(
                "HMGET returned {} values for {} fields",
                raw.len(),
                fields.len()
            )));
        }
        Ok(raw.into_iter().map(|v| v.map(to_bytes)).collect())
    }

    async fn hlen(&self, key: &[u8]) -> Result<u64, BackendError> {
        self.query(redis::cmd("HLEN").arg(key)).await
    }

    async fn zrange_by_score(&self, key: &[u8], min: i64, max: i64) -> Result<Vec<Bytes>, BackendError> {
        let raw: Vec<Vec<u8>> = self
            .query(redis::cmd("ZRANGEBYSCORE").arg(key).arg(min).arg(max))
            .await?;
        Ok(raw.into_iter().map(to_bytes).collect())
    }

    async fn exec(&self, batch: Vec<Command>) -> Result<(), BackendError> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut pipe = redis::pipe();
        pipe.atomic();
        for command in &batch {
            match command {
                Command::HSet { key, field, value } => {
                    pipe.cmd("HSET").arg(key.as_ref()).arg(field.as_ref()).arg(value.as_ref()).ignore();
                }
                Command::HDel { key, field } => {
                    pipe.cmd("HDEL").arg(key.as_ref()).arg(field.as_ref()).ignore();
                }
                Command::ZAdd { key, score, member } => {
                    pipe.cmd("ZADD").arg(key.as_ref()).arg(*score).arg(member.as_ref()).ignore();
                }
                Command::ZRem { key, member } => {
                    pipe.cmd("ZREM").arg(key.as_ref()).arg(member.as_ref()).ignore();
                }
                Command::ZRemRangeByScore { key, min, max } => {
                    pipe.cmd("ZREMRANGEBYSCORE").arg(key.as_ref()).arg(*min).arg(*max).ignore();
                }
                Command::Del { key } => {
                    pipe.cmd("DEL").arg(key.as_ref()).ignore();
                }
            }
        }

        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| BackendError::Connection(e.to_string()))?;
        let mut con = self.connection();
        let () = pipe.query_async(&mut con).await?;
        debug!(commands = batch.len(), "Executed atomic batch");
        Ok(())
    }

    async fn compare_and_swap(&self, cas: CompareAndSwap) -> Result<bool, BackendError> {
        let (index_key, upsert, score) = match &cas.index {
            IndexUpdate::Upsert { key, score } => (key.clone(), "1", *score),
            IndexUpdate::Remove { key } => (key.clone(), "0", 0),
        };

        let mut invocation = self.cas_script.prepare_invoke();
        invocation
            .key(cas.key.as_ref())
            .key(index_key.as_ref())
            .arg(cas.field.as_ref())
            .arg(if cas.expected.is_some() { "1" } else { "0" })
            .arg(cas.expected.as_deref().unwrap_or_default())
            .arg(if cas.replacement.is_some() { "1" } else { "0" })
            .arg(cas.replacement.as_deref().unwrap_or_default())
            .arg(upsert)
            .arg(score);

        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| BackendError::Connection(e.to_string()))?;
        let mut con = self.connection();
        let applied: i64 = invocation.invoke_async(&mut con).await?;
        Ok(applied == 1)
    }

    async fn flush_db(&self) -> Result<(), BackendError> {
        self.query(&redis::cmd("FLUSHDB")).await
    }
}
