//! Logging hook for query tracing.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use super::types::{HookContext, QueryHook, QueryTiming};
use crate::error::QueryError;

/// Log level for query logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    /// Log nothing.
    Off,
    /// Log only errors.
    Error,
    /// Log errors and warnings (slow queries).
    Warn,
    /// Log all queries.
    #[default]
    Info,
    /// Also log query starts.
    Debug,
    /// Log everything including timing breakdowns.
    Trace,
}

/// Configuration for the logging hook.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Minimum log level.
    pub level: LogLevel,
    /// Threshold for slow query warnings.
    pub slow_query_threshold: Duration,
    /// Maximum length of logged SQL (0 = unlimited).
    pub max_sql_length: usize,
    /// Prefix for log messages.
    pub prefix: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            slow_query_threshold: Duration::from_secs(1),
            max_sql_length: 500,
            prefix: "sqlstash".to_string(),
        }
    }
}

/// Hook that logs every call through `tracing`.
///
/// # Example
///
/// ```rust
/// use sqlstash_core::hooks::{LoggingHook, LogLevel};
///
/// let logging = LoggingHook::new()
///     .with_level(LogLevel::Debug)
///     .with_slow_threshold_ms(500);
/// assert_eq!(logging.query_count(), 0);
/// ```
#[derive(Debug)]
pub struct LoggingHook {
    config: LoggingConfig,
    query_count: AtomicU64,
}

impl LoggingHook {
    /// Create a new logging hook with default settings.
    pub fn new() -> Self {
        Self::with_config(LoggingConfig::default())
    }

    /// Create with custom configuration.
    pub fn with_config(config: LoggingConfig) -> Self {
        Self {
            config,
            query_count: AtomicU64::new(0),
        }
    }

    /// Set the log level.
    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.config.level = level;
        self
    }

    /// Set the slow query threshold.
    pub fn with_slow_threshold(mut self, threshold: Duration) -> Self {
        self.config.slow_query_threshold = threshold;
        self
    }

    /// Set the slow query threshold in milliseconds.
    pub fn with_slow_threshold_ms(self, ms: u64) -> Self {
        self.with_slow_threshold(Duration::from_millis(ms))
    }

    /// Set the maximum logged SQL length.
    pub fn with_max_sql_length(mut self, len: usize) -> Self {
        self.config.max_sql_length = len;
        self
    }

    /// Set the log prefix.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.prefix = prefix.into();
        self
    }

    /// Number of calls that completed through this hook.
    pub fn query_count(&self) -> u64 {
        self.query_count.load(Ordering::Relaxed)
    }

    fn truncate_sql<'s>(&self, sql: &'s str) -> std::borrow::Cow<'s, str> {
        let max = self.config.max_sql_length;
        if max == 0 || sql.len() <= max {
            return sql.into();
        }
        let mut cut = max;
        while !sql.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}...", &sql[..cut]).into()
    }

    fn is_slow(&self, timing: &QueryTiming) -> bool {
        timing.total >= self.config.slow_query_threshold
    }
}

impl Default for LoggingHook {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryHook for LoggingHook {
    fn before(&self, ctx: &HookContext<'_>) {
        if self.config.level < LogLevel::Debug {
            return;
        }
        tracing::debug!(
            target: "sqlstash::query",
            op = %ctx.op,
            sql = %self.truncate_sql(ctx.sql),
            in_tx = ctx.in_tx,
            used_cache = ctx.used_cache,
            "[{}] Starting query",
            self.config.prefix
        );
    }

    fn after(
        &self,
        ctx: &HookContext<'_>,
        timing: &QueryTiming,
        rows_affected: Option<u64>,
        error: Option<&QueryError>,
    ) {
        self.query_count.fetch_add(1, Ordering::Relaxed);

        if let Some(error) = error {
            if self.config.level >= LogLevel::Error {
                tracing::error!(
                    target: "sqlstash::query",
                    op = %ctx.op,
                    sql = %self.truncate_sql(ctx.sql),
                    duration_us = timing.total_us(),
                    error = %error,
                    "[{}] Query failed",
                    self.config.prefix
                );
            }
            return;
        }

        if self.is_slow(timing) && self.config.level >= LogLevel::Warn {
            tracing::warn!(
                target: "sqlstash::query",
                op = %ctx.op,
                sql = %self.truncate_sql(ctx.sql),
                duration_ms = timing.total.as_millis() as u64,
                threshold_ms = self.config.slow_query_threshold.as_millis() as u64,
                cache_hit = timing.cache_hit,
                "[{}] Slow query detected",
                self.config.prefix
            );
        } else if self.config.level >= LogLevel::Trace {
            tracing::trace!(
                target: "sqlstash::query",
                op = %ctx.op,
                prepare_us = timing.prepare.as_micros() as u64,
                execute_us = timing.execute.as_micros() as u64,
                duration_us = timing.total_us(),
                rows_affected = ?rows_affected,
                cache_hit = timing.cache_hit,
                in_tx = ctx.in_tx,
                "[{}] Query completed",
                self.config.prefix
            );
        } else if self.config.level >= LogLevel::Info {
            tracing::info!(
                target: "sqlstash::query",
                op = %ctx.op,
                duration_us = timing.total_us(),
                rows_affected = ?rows_affected,
                cache_hit = timing.cache_hit,
                "[{}] Query completed",
                self.config.prefix
            );
        }
    }

    fn name(&self) -> &'static str {
        "LoggingHook"
    }
}
