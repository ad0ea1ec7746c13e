//! Statement cache configuration.
//!
//! [`CacheConfig`] is the runtime policy handed to
//! [`StatementCache::new`](super::StatementCache::new). [`CacheSettings`] is
//! its serializable mirror, loadable from a `[statement_cache]` TOML table or
//! from `SQLSTASH_CACHE_*` environment variables.
//!
//! ```rust
//! use std::time::Duration;
//! use sqlstash_core::CacheConfig;
//!
//! let config = CacheConfig::default()
//!     .with_shard_count(4)
//!     .with_min_promote_count(1)
//!     .with_idle_ttl(Duration::from_secs(60));
//! assert!(config.validate().is_ok());
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{QueryError, QueryResult};
use crate::hash::{Fnv1aHasher, KeyHasher};

/// Default number of shards.
pub const DEFAULT_SHARD_COUNT: usize = 16;
/// Default hit count a queued entry must exceed to be promoted.
pub const DEFAULT_MIN_PROMOTE_COUNT: u64 = 2;
/// Default janitor tick.
pub const DEFAULT_JANITOR_INTERVAL: Duration = Duration::from_secs(30);
/// Default idle time after which an unused core entry is evicted.
pub const DEFAULT_IDLE_TTL: Duration = Duration::from_secs(30 * 60);

/// Policy for a [`StatementCache`](super::StatementCache).
#[derive(Clone)]
pub struct CacheConfig {
    /// Number of shards; fixed for the cache's lifetime.
    pub shard_count: usize,
    /// A queued entry whose hit count exceeds this is promoted to core.
    pub min_promote_count: u64,
    /// Janitor tick. `Duration::ZERO` disables the background janitor.
    pub janitor_interval: Duration,
    /// Idle time after which an unused core entry is evicted.
    pub idle_ttl: Duration,
    /// Key derivation.
    pub hasher: Arc<dyn KeyHasher>,
}

impl fmt::Debug for CacheConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheConfig")
            .field("shard_count", &self.shard_count)
            .field("min_promote_count", &self.min_promote_count)
            .field("janitor_interval", &self.janitor_interval)
            .field("idle_ttl", &self.idle_ttl)
            .field("hasher", &self.hasher.name())
            .finish()
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            shard_count: DEFAULT_SHARD_COUNT,
            min_promote_count: DEFAULT_MIN_PROMOTE_COUNT,
            janitor_interval: DEFAULT_JANITOR_INTERVAL,
            idle_ttl: DEFAULT_IDLE_TTL,
            hasher: Arc::new(Fnv1aHasher),
        }
    }
}

impl CacheConfig {
    /// Create a config with default policy.
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults with the shard count scaled to the machine.
    pub fn high_concurrency() -> Self {
        let shard_count = (num_cpus::get() * 4).next_power_of_two().max(DEFAULT_SHARD_COUNT);
        Self::default().with_shard_count(shard_count)
    }

    /// Set the shard count.
    pub fn with_shard_count(mut self, shard_count: usize) -> Self {
        self.shard_count = shard_count;
        self
    }

    /// Set the promotion threshold.
    pub fn with_min_promote_count(mut self, count: u64) -> Self {
        self.min_promote_count = count;
        self
    }

    /// Set the janitor interval (`Duration::ZERO` disables the janitor).
    pub fn with_janitor_interval(mut self, interval: Duration) -> Self {
        self.janitor_interval = interval;
        self
    }

    /// Disable the background janitor; sweeps then only run on demand.
    pub fn without_janitor(self) -> Self {
        self.with_janitor_interval(Duration::ZERO)
    }

    /// Set the idle TTL for core entries.
    pub fn with_idle_ttl(mut self, ttl: Duration) -> Self {
        self.idle_ttl = ttl;
        self
    }

    /// Override the key hasher.
    pub fn with_hasher(mut self, hasher: impl KeyHasher + 'static) -> Self {
        self.hasher = Arc::new(hasher);
        self
    }

    /// Whether the background janitor runs.
    #[inline]
    pub fn janitor_enabled(&self) -> bool {
        !self.janitor_interval.is_zero()
    }

    /// Check the policy for values the cache cannot run with.
    pub fn validate(&self) -> QueryResult<()> {
        if self.shard_count == 0 {
            return Err(QueryError::invalid_config("shard_count", "must be at least 1"));
        }
        if self.idle_ttl.is_zero() {
            return Err(QueryError::invalid_config(
                "idle_ttl",
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// Serializable form of [`CacheConfig`], durations in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheSettings {
    /// Number of shards.
    pub shards: usize,
    /// Promotion threshold.
    pub min_promote_count: u64,
    /// Janitor tick in milliseconds (0 disables it).
    pub janitor_interval_ms: u64,
    /// Idle TTL in milliseconds.
    pub idle_ttl_ms: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            shards: DEFAULT_SHARD_COUNT,
            min_promote_count: DEFAULT_MIN_PROMOTE_COUNT,
            janitor_interval_ms: DEFAULT_JANITOR_INTERVAL.as_millis() as u64,
            idle_ttl_ms: DEFAULT_IDLE_TTL.as_millis() as u64,
        }
    }
}

#[derive(Deserialize)]
struct SettingsFile {
    #[serde(default)]
    statement_cache: CacheSettings,
}

/// Environment variable names read by [`CacheSettings::from_env`].
pub mod env_vars {
    /// Shard count.
    pub const SHARDS: &str = "SQLSTASH_CACHE_SHARDS";
    /// Promotion threshold.
    pub const MIN_PROMOTE: &str = "SQLSTASH_CACHE_MIN_PROMOTE";
    /// Janitor interval in milliseconds.
    pub const JANITOR_MS: &str = "SQLSTASH_CACHE_JANITOR_MS";
    /// Idle TTL in milliseconds.
    pub const IDLE_TTL_MS: &str = "SQLSTASH_CACHE_IDLE_TTL_MS";
}

impl CacheSettings {
    /// Parse the `[statement_cache]` table of a TOML document.
    ///
    /// A document without the table yields the defaults.
    pub fn from_toml(content: &str) -> QueryResult<Self> {
        let file: SettingsFile = toml::from_str(content).map_err(|e| {
            QueryError::invalid_config("statement_cache", e.message().to_string()).with_source(e)
        })?;
        Ok(file.statement_cache)
    }

    /// Defaults overridden by `SQLSTASH_CACHE_*` variables from `source`.
    pub fn from_env<S: EnvSource>(source: &S) -> QueryResult<Self> {
        let mut settings = Self::default();
        if let Some(value) = parse_var(source, env_vars::SHARDS)? {
            settings.shards = value as usize;
        }
        if let Some(value) = parse_var(source, env_vars::MIN_PROMOTE)? {
            settings.min_promote_count = value;
        }
        if let Some(value) = parse_var(source, env_vars::JANITOR_MS)? {
            settings.janitor_interval_ms = value;
        }
        if let Some(value) = parse_var(source, env_vars::IDLE_TTL_MS)? {
            settings.idle_ttl_ms = value;
        }
        Ok(settings)
    }

    /// Build and validate a [`CacheConfig`] with the default hasher.
    pub fn into_config(self) -> QueryResult<CacheConfig> {
        let config = CacheConfig::from(self);
        config.validate()?;
        Ok(config)
    }
}

impl From<CacheSettings> for CacheConfig {
    fn from(settings: CacheSettings) -> Self {
        CacheConfig::default()
            .with_shard_count(settings.shards)
            .with_min_promote_count(settings.min_promote_count)
            .with_janitor_interval(Duration::from_millis(settings.janitor_interval_ms))
            .with_idle_ttl(Duration::from_millis(settings.idle_ttl_ms))
    }
}

fn parse_var<S: EnvSource>(source: &S, name: &str) -> QueryResult<Option<u64>> {
    match source.get(name) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|e| QueryError::invalid_config(name, format!("'{}' is not a number", raw)).with_source(e)),
    }
}

/// Source for environment variables.
pub trait EnvSource: Send + Sync {
    /// Get an environment variable value.
    fn get(&self, name: &str) -> Option<String>;
}

/// Default environment source using `std::env`.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdEnvSource;

impl EnvSource for StdEnvSource {
    fn get(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

/// Environment source backed by a HashMap.
#[derive(Debug, Clone, Default)]
pub struct MapEnvSource {
    vars: HashMap<String, String>,
}

impl MapEnvSource {
    /// Create a new map-based environment source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a variable.
    pub fn set(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(name.into(), value.into());
        self
    }
}

impl EnvSource for MapEnvSource {
    fn get(&self, name: &str) -> Option<String> {
        self.vars.get(name).cloned()
    }
}
