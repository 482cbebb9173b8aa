//! Runtime configuration for region-cache.
//!
//! Configuration can be loaded from a JSON file, from Java-style properties
//! (the option names a host ORM passes through), or constructed
//! programmatically. Backend connection settings, entry TTLs and lock
//! timeouts all live here.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

use crate::error::{CacheError, Result};
use crate::serializer::{Codec, CodecKind};

/// Default entry TTL in seconds.
pub const DEFAULT_EXPIRY_IN_SECONDS: u64 = 120;

/// Default soft-lock timeout in milliseconds.
pub const DEFAULT_CACHE_LOCK_TIMEOUT_MS: u64 = 60_000;

/// Default sweeper wake-up interval in milliseconds.
pub const DEFAULT_SWEEP_INTERVAL_MS: u64 = 1_000;

pub const PROP_HOST: &str = "redis.host";
pub const PROP_PORT: &str = "redis.port";
pub const PROP_TIMEOUT: &str = "redis.timeout";
pub const PROP_PASSWORD: &str = "redis.password";
pub const PROP_DATABASE: &str = "redis.database";
pub const PROP_EXPIRY: &str = "redis.expiryInSeconds";
pub const PROP_LOCK_TIMEOUT: &str = "io.redis.hibernate.cache_lock_timeout";
pub const PROP_POOL_MAX_ACTIVE: &str = "redis.pool.maxActive";
pub const PROP_POOL_MIN_IDLE: &str = "redis.pool.minIdle";

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(name = "region-cache", about = "Inspect and maintain a region cache backend")]
pub struct Cli {
    /// Path to configuration file (JSON).
    #[arg(short, long, default_value = "region-cache.json")]
    pub config: PathBuf,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Subcommand, Debug, Clone)]
pub enum CliCommand {
    /// Check the backend answers.
    Ping,
    /// Print backend size information.
    Info,
    /// List the keys cached in a region.
    Keys { region: String },
    /// Print every entry of a region.
    Dump { region: String },
    /// Run one expiration sweep over a region.
    Expire { region: String },
    /// Drop a region and its TTL index.
    EvictRegion { region: String },
}

/// Which backend implementation to connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Process-local tables.
    #[default]
    Memory,
    /// A redis server (requires the `redis` feature).
    Redis,
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Backend connection settings.
    pub backend: BackendConfig,

    /// Cache behavior settings.
    pub cache: CacheConfig,
}

/// Backend connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub kind: BackendKind,

    pub host: String,

    pub port: u16,

    /// Connect timeout in milliseconds.
    pub connect_timeout_ms: u64,

    pub password: Option<String>,

    /// Logical database index.
    pub database: u32,

    pub pool: PoolConfig,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::Memory,
            host: "localhost".to_string(),
            port: 6379,
            connect_timeout_ms: 2_000,
            password: None,
            database: 0,
            pool: PoolConfig::default(),
        }
    }
}

impl BackendConfig {
    /// Connection parameters for the redis client. The password is carried
    /// as a field, so no URL escaping is involved.
    #[cfg(feature = "redis")]
    pub fn connection_info(&self) -> redis::ConnectionInfo {
        redis::ConnectionInfo {
            addr: redis::ConnectionAddr::Tcp(self.host.clone(), self.port),
            redis: redis::RedisConnectionInfo {
                db: i64::from(self.database),
                password: self.password.clone().filter(|p| !p.is_empty()),
                ..Default::default()
            },
        }
    }
}

/// Connection pool sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum concurrent backend commands.
    pub max_active: usize,

    /// Connections opened eagerly at start.
    pub min_idle: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_active: 32,
            min_idle: 2,
        }
    }
}

/// Cache behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Default entry TTL in seconds (0 = never expire).
    pub expiry_in_seconds: u64,

    /// Soft-lock timeout in milliseconds.
    pub lock_timeout_ms: u64,

    /// Sweeper wake-up interval in milliseconds.
    pub sweep_interval_ms: u64,

    /// Codec for entry keys.
    pub key_codec: CodecKind,

    /// Codec for entry values.
    pub value_codec: CodecKind,

    /// zstd level used when `value_codec` is `zstd` (1-22).
    pub compression_level: i32,

    /// Prepended to every region name.
    pub region_prefix: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            expiry_in_seconds: DEFAULT_EXPIRY_IN_SECONDS,
            lock_timeout_ms: DEFAULT_CACHE_LOCK_TIMEOUT_MS,
            sweep_interval_ms: DEFAULT_SWEEP_INTERVAL_MS,
            key_codec: CodecKind::Binary,
            value_codec: CodecKind::Binary,
            compression_level: 3,
            region_prefix: String::new(),
        }
    }
}

impl CacheConfig {
    pub fn key_codec(&self) -> Codec {
        Codec::from_kind(self.key_codec, self.compression_level)
    }

    pub fn value_codec(&self) -> Codec {
        Codec::from_kind(self.value_codec, self.compression_level)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

/// Per-region overrides passed to the region builders.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionSettings {
    pub expiry_in_seconds: Option<u64>,
    pub lock_timeout_ms: Option<u64>,
}

impl RegionSettings {
    /// Read overrides from region-level properties.
    pub fn from_properties(props: &HashMap<String, String>) -> Result<Self> {
        Ok(Self {
            expiry_in_seconds: parse_prop(props, PROP_EXPIRY)?,
            lock_timeout_ms: parse_prop(props, PROP_LOCK_TIMEOUT)?,
        })
    }

    pub fn expiry_or(&self, defaults: &CacheConfig) -> u64 {
        self.expiry_in_seconds.unwrap_or(defaults.expiry_in_seconds)
    }

    pub fn lock_timeout_or(&self, defaults: &CacheConfig) -> u64 {
        self.lock_timeout_ms.unwrap_or(defaults.lock_timeout_ms)
    }
}

impl Config {
    /// Load configuration from a JSON file, falling back to defaults for missing fields.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if path.exists() {
            let data = std::fs::read_to_string(path)?;
            let config: Config = serde_json::from_str(&data)?;
            config.validate()?;
            Ok(config)
        } else {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            Ok(Config::default())
        }
    }

    /// Build configuration from Java-style properties.
    ///
    /// A `redis.host` entry selects the redis backend; without one the
    /// in-memory backend is used.
    pub fn from_properties(props: &HashMap<String, String>) -> Result<Self> {
        let mut config = Config::default();

        if let Some(host) = props.get(PROP_HOST) {
            config.backend.kind = BackendKind::Redis;
            config.backend.host = host.clone();
        }
        if let Some(port) = parse_prop(props, PROP_PORT)? {
            config.backend.port = port;
        }
        if let Some(timeout) = parse_prop(props, PROP_TIMEOUT)? {
            config.backend.connect_timeout_ms = timeout;
        }
        if let Some(password) = props.get(PROP_PASSWORD) {
            config.backend.password = Some(password.clone());
        }
        if let Some(database) = parse_prop(props, PROP_DATABASE)? {
            config.backend.database = database;
        }
        if let Some(max_active) = parse_prop(props, PROP_POOL_MAX_ACTIVE)? {
            config.backend.pool.max_active = max_active;
        }
        if let Some(min_idle) = parse_prop(props, PROP_POOL_MIN_IDLE)? {
            config.backend.pool.min_idle = min_idle;
        }
        if let Some(expiry) = parse_prop(props, PROP_EXPIRY)? {
            config.cache.expiry_in_seconds = expiry;
        }
        if let Some(lock_timeout) = parse_prop(props, PROP_LOCK_TIMEOUT)? {
            config.cache.lock_timeout_ms = lock_timeout;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings no component can work with.
    pub fn validate(&self) -> Result<()> {
        if self.cache.sweep_interval_ms == 0 {
            return Err(CacheError::Configuration(
                "sweep_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.cache.key_codec == CodecKind::Zstd {
            return Err(CacheError::Configuration(
                "keys must use the text or binary codec".to_string(),
            ));
        }
        if self.cache.value_codec == CodecKind::Text {
            return Err(CacheError::Configuration(
                "values must use the binary or zstd codec".to_string(),
            ));
        }
        if !(1..=22).contains(&self.cache.compression_level) {
            return Err(CacheError::Configuration(format!(
                "compression_level {} is outside 1-22",
                self.cache.compression_level
            )));
        }
        if self.backend.pool.max_active == 0 {
            return Err(CacheError::Configuration(
                "pool.max_active must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_prop<T: std::str::FromStr>(props: &HashMap<String, String>, name: &str) -> Result<Option<T>> {
    match props.get(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| CacheError::Configuration(format!("invalid value {raw:?} for {name}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_default_config() {
        let cfg = Config::default();
        assert_eq!(cfg.cache.expiry_in_seconds, 120);
        assert_eq!(cfg.cache.lock_timeout_ms, 60_000);
        assert_eq!(cfg.cache.sweep_interval_ms, 1_000);
        assert_eq!(cfg.backend.pool.max_active, 32);
        assert_eq!(cfg.backend.pool.min_idle, 2);
        assert_eq!(cfg.backend.kind, BackendKind::Memory);
    }

    #[test]
    fn test_from_properties() {
        let cfg = Config::from_properties(&props(&[
            ("redis.host", "cache.internal"),
            ("redis.port", "6380"),
            ("redis.database", "3"),
            ("redis.expiryInSeconds", "30"),
            ("io.redis.hibernate.cache_lock_timeout", "5000"),
        ]))
        .unwrap();

        assert_eq!(cfg.backend.kind, BackendKind::Redis);
        assert_eq!(cfg.backend.host, "cache.internal");
        assert_eq!(cfg.backend.port, 6380);
        assert_eq!(cfg.backend.database, 3);
        assert_eq!(cfg.cache.expiry_in_seconds, 30);
        assert_eq!(cfg.cache.lock_timeout_ms, 5000);
    }

    #[test]
    fn test_malformed_property_is_configuration_error() {
        let result = Config::from_properties(&props(&[("redis.port", "not-a-port")]));
        assert!(matches!(result, Err(CacheError::Configuration(_))));
    }

    #[test]
    fn test_region_settings_inherit_defaults() {
        let defaults = CacheConfig::default();
        let settings = RegionSettings::from_properties(&props(&[("redis.expiryInSeconds", "0")])).unwrap();
        assert_eq!(settings.expiry_or(&defaults), 0);
        assert_eq!(settings.lock_timeout_or(&defaults), 60_000);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let cfg: Config = serde_json::from_str(r#"{ "cache": { "expiry_in_seconds": 5 } }"#).unwrap();
        assert_eq!(cfg.cache.expiry_in_seconds, 5);
        assert_eq!(cfg.cache.lock_timeout_ms, 60_000);
        assert_eq!(cfg.backend.port, 6379);
    }

    #[cfg(feature = "redis")]
    #[test]
    fn test_connection_info_keeps_password_verbatim() {
        let mut backend = BackendConfig::default();
        backend.host = "cache.internal".to_string();
        backend.port = 6380;
        backend.database = 3;
        backend.password = Some("p@ss/w:rd".to_string());

        let info = backend.connection_info();
        assert_eq!(info.redis.password.as_deref(), Some("p@ss/w:rd"));
        assert_eq!(info.redis.db, 3);
        assert!(matches!(
            info.addr,
            redis::ConnectionAddr::Tcp(ref host, 6380) if host == "cache.internal"
        ));
    }

    #[cfg(feature = "redis")]
    #[test]
    fn test_empty_password_is_omitted() {
        let mut backend = BackendConfig::default();
        backend.password = Some(String::new());
        assert_eq!(backend.connection_info().redis.password, None);
    }
}
