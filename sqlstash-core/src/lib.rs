//! # sqlstash-core
//!
//! Client-side cache for prepared SQL statements.
//!
//! This crate provides:
//! - A sharded, two-tier [`StatementCache`] with per-key prepare
//!   deduplication and a background janitor
//! - SQL [`normalize`]-ation and [`KeyHasher`]-based cache keys
//! - The [`StatementBackend`] seam drivers implement
//! - An [`Executor`] that routes calls through the cache and [`hooks`]
//! - Configuration from code, TOML or environment variables
//!
//! ## Caching Statements
//!
//! ```rust,no_run
//! use sqlstash_core::{CacheConfig, Namespace, QueryResult, StatementBackend, StatementCache};
//!
//! async fn lookup<B: StatementBackend>(backend: B) -> QueryResult<()> {
//!     let cache = StatementCache::new(backend, CacheConfig::default())?;
//!
//!     // First call prepares, later calls reuse the handle.
//!     let lease = cache.get_or_prepare(Namespace::Query, "SELECT * FROM users WHERE id = $1").await?;
//!     assert!(!lease.cache_hit());
//!     drop(lease);
//!
//!     let lease = cache.get_or_prepare(Namespace::Query, "SELECT *  FROM users WHERE id = $1").await?;
//!     assert!(lease.cache_hit());
//!     Ok(())
//! }
//! ```
//!
//! ## Cache Keys
//!
//! ```rust
//! use sqlstash_core::{Fnv1aHasher, KeyHasher, Namespace, normalize};
//!
//! let hasher = Fnv1aHasher;
//! let a = hasher.hash(&normalize("SELECT 1 -- one"), Namespace::Query);
//! let b = hasher.hash(&normalize("SELECT   1"), Namespace::Query);
//! assert_eq!(a, b);
//! assert_ne!(a, hasher.hash("SELECT 1", Namespace::Exec));
//! ```
//!
//! ## Configuration
//!
//! ```rust
//! use sqlstash_core::CacheSettings;
//!
//! let settings = CacheSettings::from_toml("[statement_cache]\nshards = 4\n").unwrap();
//! let config = settings.into_config().unwrap();
//! assert_eq!(config.shard_count, 4);
//! ```
//!
//! ## Error Handling
//!
//! ```rust
//! use sqlstash_core::{ErrorCode, QueryError};
//!
//! let err = QueryError::prepare_failed("syntax error at or near \"SELEC\"", "SELEC 1");
//! assert_eq!(err.code, ErrorCode::PrepareFailed);
//! assert!(err.is_retryable());
//! ```

pub mod backend;
pub mod error;
pub mod executor;
pub mod hash;
pub mod hooks;
pub mod logging;
pub mod normalize;
pub mod statement;

pub use backend::StatementBackend;
pub use error::{ErrorCode, ErrorContext, QueryError, QueryResult, Suggestion};
pub use executor::Executor;
pub use hash::{Fnv1aHasher, KeyHasher, Namespace, StatementKey, fnv1a};
pub use hooks::{HookChain, HookContext, QueryHook, QueryOp, QueryTiming};
pub use normalize::normalize;
pub use statement::{
    CacheConfig, CacheSettings, CacheStats, EnvSource, Lease, MapEnvSource, StatementCache,
    StdEnvSource, SweepReport, Tier, env_vars,
};

// Re-export logging utilities
pub use logging::{
    get_log_format, get_log_level, init as init_logging, init_with_level, is_debug_enabled,
};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::backend::StatementBackend;
    pub use crate::error::{ErrorCode, QueryError, QueryResult};
    pub use crate::executor::Executor;
    pub use crate::hash::Namespace;
    pub use crate::hooks::{HookChain, LoggingHook, MetricsHook, QueryHook, QueryOp};
    pub use crate::statement::{CacheConfig, CacheStats, Lease, StatementCache};
}
