//! # sqlstash
//!
//! A sharded, two-tier cache for prepared SQL statements.
//!
//! sqlstash provides:
//! - A [`StatementCache`] that prepares each normalized statement at most
//!   once, keeps hot statements in a core tier and lets a background janitor
//!   promote, decay and evict entries
//! - Hooks for logging and metrics around every executed call
//! - A PostgreSQL backend built on `tokio-postgres` (feature `postgres`)
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use sqlstash::postgres::{PgConfig, PgConnection};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PgConfig::from_url("postgres://localhost/app")?;
//!     let conn = PgConnection::connect(&config).await?;
//!
//!     for id in 0..10i32 {
//!         // Prepared once, served from the cache afterwards.
//!         conn.query("SELECT * FROM users WHERE id = $1", &[&id]).await?;
//!     }
//!     assert_eq!(conn.cache_stats().prepares, 1);
//!
//!     conn.close().await;
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub use sqlstash_core::*;

/// PostgreSQL backend.
#[cfg(feature = "postgres")]
#[cfg_attr(docsrs, doc(cfg(feature = "postgres")))]
pub mod postgres {
    pub use sqlstash_postgres::*;
}
