//! Observability hooks invoked around every executor call.
//!
//! A [`QueryHook`] sees each call twice: [`before`](QueryHook::before) once
//! the statement has been looked up (so `used_cache` is known) and
//! [`after`](QueryHook::after) with timings, the affected row count and the
//! error, if any.
//!
//! ```rust
//! use std::sync::Arc;
//! use sqlstash_core::hooks::{HookChain, LoggingHook, MetricsHook};
//!
//! let metrics = Arc::new(MetricsHook::new());
//! let hooks = HookChain::new()
//!     .with(LoggingHook::new().with_slow_threshold_ms(250))
//!     .with_shared(metrics.clone());
//! assert_eq!(hooks.len(), 2);
//! ```

mod logging;
mod metrics;
mod types;

pub use logging::{LogLevel, LoggingConfig, LoggingHook};
pub use metrics::{MetricsHook, QueryMetrics};
pub use types::{HookChain, HookContext, QueryHook, QueryOp, QueryTiming};
