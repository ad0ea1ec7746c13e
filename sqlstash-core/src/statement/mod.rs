//! Prepared statement caching.
//!
//! The cache is split into a fixed number of shards selected by key. Each
//! shard holds two tiers behind one `RwLock`:
//!
//! - **queue**: where new statements land. Every janitor sweep either
//!   promotes a queued statement (hit count above `min_promote_count`),
//!   halves its hit count (still leased) or evicts it (not leased).
//! - **core**: statements that proved reuse. Evicted only after sitting
//!   unleased for longer than `idle_ttl`.
//!
//! Misses are serialized per key through a small lock table so a statement
//! is never prepared twice concurrently.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use sqlstash_core::{CacheConfig, Namespace, StatementBackend, StatementCache};
//!
//! async fn example<B: StatementBackend>(backend: B) -> sqlstash_core::QueryResult<()> {
//!     let config = CacheConfig::default()
//!         .with_shard_count(8)
//!         .with_janitor_interval(Duration::from_secs(10));
//!     let cache = StatementCache::new(backend, config)?;
//!
//!     {
//!         let lease = cache.get_or_prepare(Namespace::Exec, "UPDATE t SET x = $1").await?;
//!         let _handle = lease.handle();
//!     } // released here
//!
//!     println!("hit rate: {:.2}", cache.stats().hit_rate());
//!     cache.close().await;
//!     Ok(())
//! }
//! ```

mod cache;
mod config;
mod entry;
mod janitor;
mod lock_table;
mod shard;
mod stats;

pub use cache::StatementCache;
pub use config::{
    CacheConfig, CacheSettings, DEFAULT_IDLE_TTL, DEFAULT_JANITOR_INTERVAL,
    DEFAULT_MIN_PROMOTE_COUNT, DEFAULT_SHARD_COUNT, EnvSource, MapEnvSource, StdEnvSource,
    env_vars,
};
pub use entry::Lease;
pub use shard::Tier;
pub use stats::{CacheStats, SweepReport};
