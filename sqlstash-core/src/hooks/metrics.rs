//! Metrics hook for query performance tracking.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;

use super::types::{HookContext, QueryHook, QueryOp, QueryTiming};
use crate::error::QueryError;

/// Collected metrics for queries.
#[derive(Debug, Clone, Serialize)]
pub struct QueryMetrics {
    /// Total number of calls.
    pub total_queries: u64,
    /// Number of successful calls.
    pub successful_queries: u64,
    /// Number of failed calls.
    pub failed_queries: u64,
    /// Total wall time in microseconds.
    pub total_time_us: u64,
    /// Average wall time in microseconds.
    pub avg_time_us: u64,
    /// Minimum wall time in microseconds.
    pub min_time_us: u64,
    /// Maximum wall time in microseconds.
    pub max_time_us: u64,
    /// Total time spent in lookup/prepare, in microseconds.
    pub prepare_time_us: u64,
    /// Number of slow calls.
    pub slow_queries: u64,
    /// Calls whose statement came from the cache.
    pub cache_hits: u64,
    /// Calls that ran inside a transaction.
    pub in_tx_queries: u64,
    /// Rows affected, summed over calls that reported a count.
    pub rows_affected: u64,
    /// Calls by operation.
    pub queries_by_op: HashMap<String, u64>,
}

impl Default for QueryMetrics {
    fn default() -> Self {
        Self {
            total_queries: 0,
            successful_queries: 0,
            failed_queries: 0,
            total_time_us: 0,
            avg_time_us: 0,
            min_time_us: 0,
            max_time_us: 0,
            prepare_time_us: 0,
            slow_queries: 0,
            cache_hits: 0,
            in_tx_queries: 0,
            rows_affected: 0,
            queries_by_op: HashMap::new(),
        }
    }
}

impl QueryMetrics {
    /// Calculate success rate (0.0 to 1.0).
    pub fn success_rate(&self) -> f64 {
        if self.total_queries == 0 {
            1.0
        } else {
            self.successful_queries as f64 / self.total_queries as f64
        }
    }

    /// Calculate cache hit rate (0.0 to 1.0).
    pub fn cache_hit_rate(&self) -> f64 {
        if self.total_queries == 0 {
            0.0
        } else {
            self.cache_hits as f64 / self.total_queries as f64
        }
    }

    /// Calculate slow query rate (0.0 to 1.0).
    pub fn slow_query_rate(&self) -> f64 {
        if self.total_queries == 0 {
            0.0
        } else {
            self.slow_queries as f64 / self.total_queries as f64
        }
    }

    /// Calls recorded for `op`.
    pub fn count_for(&self, op: QueryOp) -> u64 {
        self.queries_by_op.get(op.as_str()).copied().unwrap_or(0)
    }
}

/// Hook that aggregates call metrics in memory.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use sqlstash_core::hooks::{HookChain, MetricsHook};
///
/// let metrics = Arc::new(MetricsHook::new());
/// let hooks = HookChain::new().with_shared(metrics.clone());
///
/// // Route calls through an executor using `hooks`...
///
/// let stats = metrics.metrics();
/// println!("Total queries: {}", stats.total_queries);
/// println!("Avg time: {}us", stats.avg_time_us);
/// ```
#[derive(Debug)]
pub struct MetricsHook {
    total_queries: AtomicU64,
    successful_queries: AtomicU64,
    failed_queries: AtomicU64,
    total_time_us: AtomicU64,
    min_time_us: AtomicU64,
    max_time_us: AtomicU64,
    prepare_time_us: AtomicU64,
    slow_queries: AtomicU64,
    cache_hits: AtomicU64,
    in_tx_queries: AtomicU64,
    rows_affected: AtomicU64,
    slow_threshold_us: u64,
    queries_by_op: RwLock<HashMap<QueryOp, u64>>,
}

impl MetricsHook {
    /// Create a metrics hook with a one second slow threshold.
    pub fn new() -> Self {
        Self::with_slow_threshold(Duration::from_secs(1))
    }

    /// Create with a custom slow query threshold.
    pub fn with_slow_threshold(threshold: Duration) -> Self {
        Self {
            total_queries: AtomicU64::new(0),
            successful_queries: AtomicU64::new(0),
            failed_queries: AtomicU64::new(0),
            total_time_us: AtomicU64::new(0),
            min_time_us: AtomicU64::new(u64::MAX),
            max_time_us: AtomicU64::new(0),
            prepare_time_us: AtomicU64::new(0),
            slow_queries: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            in_tx_queries: AtomicU64::new(0),
            rows_affected: AtomicU64::new(0),
            slow_threshold_us: threshold.as_micros() as u64,
            queries_by_op: RwLock::new(HashMap::new()),
        }
    }

    /// Get a snapshot of the current metrics.
    pub fn metrics(&self) -> QueryMetrics {
        let total = self.total_queries.load(Ordering::SeqCst);
        let total_time = self.total_time_us.load(Ordering::SeqCst);
        let min = self.min_time_us.load(Ordering::SeqCst);

        QueryMetrics {
            total_queries: total,
            successful_queries: self.successful_queries.load(Ordering::SeqCst),
            failed_queries: self.failed_queries.load(Ordering::SeqCst),
            total_time_us: total_time,
            avg_time_us: if total > 0 { total_time / total } else { 0 },
            min_time_us: if min == u64::MAX { 0 } else { min },
            max_time_us: self.max_time_us.load(Ordering::SeqCst),
            prepare_time_us: self.prepare_time_us.load(Ordering::SeqCst),
            slow_queries: self.slow_queries.load(Ordering::SeqCst),
            cache_hits: self.cache_hits.load(Ordering::SeqCst),
            in_tx_queries: self.in_tx_queries.load(Ordering::SeqCst),
            rows_affected: self.rows_affected.load(Ordering::SeqCst),
            queries_by_op: self
                .queries_by_op
                .read()
                .iter()
                .map(|(op, count)| (op.as_str().to_string(), *count))
                .collect(),
        }
    }

    /// Reset all metrics.
    pub fn reset(&self) {
        self.total_queries.store(0, Ordering::SeqCst);
        self.successful_queries.store(0, Ordering::SeqCst);
        self.failed_queries.store(0, Ordering::SeqCst);
        self.total_time_us.store(0, Ordering::SeqCst);
        self.min_time_us.store(u64::MAX, Ordering::SeqCst);
        self.max_time_us.store(0, Ordering::SeqCst);
        self.prepare_time_us.store(0, Ordering::SeqCst);
        self.slow_queries.store(0, Ordering::SeqCst);
        self.cache_hits.store(0, Ordering::SeqCst);
        self.in_tx_queries.store(0, Ordering::SeqCst);
        self.rows_affected.store(0, Ordering::SeqCst);
        self.queries_by_op.write().clear();
    }

    fn record_min(&self, duration_us: u64) {
        let mut current = self.min_time_us.load(Ordering::SeqCst);
        while duration_us < current {
            match self.min_time_us.compare_exchange(
                current,
                duration_us,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
    }

    fn record_max(&self, duration_us: u64) {
        let mut current = self.max_time_us.load(Ordering::SeqCst);
        while duration_us > current {
            match self.max_time_us.compare_exchange(
                current,
                duration_us,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
    }
}

impl Default for MetricsHook {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryHook for MetricsHook {
    fn after(
        &self,
        ctx: &HookContext<'_>,
        timing: &QueryTiming,
        rows_affected: Option<u64>,
        error: Option<&QueryError>,
    ) {
        let duration_us = timing.total_us();

        self.total_queries.fetch_add(1, Ordering::SeqCst);
        if error.is_none() {
            self.successful_queries.fetch_add(1, Ordering::SeqCst);
        } else {
            self.failed_queries.fetch_add(1, Ordering::SeqCst);
        }

        self.total_time_us.fetch_add(duration_us, Ordering::SeqCst);
        self.prepare_time_us
            .fetch_add(timing.prepare.as_micros() as u64, Ordering::SeqCst);
        self.record_min(duration_us);
        self.record_max(duration_us);

        if duration_us >= self.slow_threshold_us {
            self.slow_queries.fetch_add(1, Ordering::SeqCst);
        }
        if timing.cache_hit {
            self.cache_hits.fetch_add(1, Ordering::SeqCst);
        }
        if ctx.in_tx {
            self.in_tx_queries.fetch_add(1, Ordering::SeqCst);
        }
        if let Some(rows) = rows_affected {
            self.rows_affected.fetch_add(rows, Ordering::SeqCst);
        }

        *self.queries_by_op.write().entry(ctx.op).or_insert(0) += 1;
    }

    fn name(&self) -> &'static str {
        "MetricsHook"
    }
}
