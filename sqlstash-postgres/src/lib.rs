//! # sqlstash-postgres
//!
//! PostgreSQL backend for the sqlstash statement cache.
//!
//! This crate provides:
//! - [`PgStatementBackend`], preparing statements on a `tokio-postgres` session
//! - [`PgConnection`], a session whose queries go through a per-connection
//!   [`StatementCache`](sqlstash_core::StatementCache) and hook chain
//! - [`PgConfig`], parsed from `postgres://` URLs including cache parameters
//!
//! ## Example
//!
//! ```rust,no_run
//! use sqlstash_core::hooks::{HookChain, LoggingHook};
//! use sqlstash_postgres::{PgConfig, PgConnection};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PgConfig::from_url("postgres://app@localhost/app?cache_shards=4")?;
//!     let mut conn =
//!         PgConnection::connect_with_hooks(&config, HookChain::new().with(LoggingHook::new())).await?;
//!
//!     let row = conn.query_one("SELECT $1::INT4 + 1", &[&41i32]).await?;
//!     assert_eq!(row.get::<_, i32>(0), 42);
//!
//!     let tx = conn.transaction().await?;
//!     tx.execute("UPDATE accounts SET balance = balance - 1 WHERE id = $1", &[&7i64]).await?;
//!     tx.commit().await?;
//!
//!     println!("{:?}", conn.cache_stats());
//!     conn.close().await;
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod config;
pub mod connection;
pub mod error;

pub use backend::PgStatementBackend;
pub use config::{PgConfig, PgConfigBuilder, SslMode};
pub use connection::{Params, PgConnection, PgTransaction};
pub use error::{PgError, PgResult};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::config::{PgConfig, PgConfigBuilder};
    pub use crate::connection::{PgConnection, PgTransaction};
    pub use crate::error::{PgError, PgResult};
}
