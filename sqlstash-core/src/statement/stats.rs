//! Cache counters and sweep reports.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Statement cache statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Lookups served from the cache.
    pub hits: u64,
    /// Lookups that had to prepare.
    pub misses: u64,
    /// Successful prepares.
    pub prepares: u64,
    /// Failed prepares.
    pub prepare_failures: u64,
    /// Queue entries promoted to core.
    pub promotions: u64,
    /// Queue entries whose hit count was halved.
    pub decays: u64,
    /// Entries removed from the cache (cold, idle or on close).
    pub evictions: u64,
    /// Handles the backend failed to close.
    pub close_failures: u64,
    /// Current number of core entries.
    pub core_size: usize,
    /// Current number of queue entries.
    pub queue_size: usize,
}

impl CacheStats {
    /// Calculate hit rate.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Total cached entries.
    pub fn size(&self) -> usize {
        self.core_size + self.queue_size
    }
}

/// Thread-safe counters backing [`CacheStats`].
#[derive(Debug, Default)]
pub(crate) struct AtomicCacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    prepares: AtomicU64,
    prepare_failures: AtomicU64,
    promotions: AtomicU64,
    decays: AtomicU64,
    evictions: AtomicU64,
    close_failures: AtomicU64,
}

impl AtomicCacheStats {
    #[inline]
    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_prepare(&self) {
        self.prepares.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_prepare_failure(&self) {
        self.prepare_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_close_failure(&self) {
        self.close_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_sweep(&self, report: &SweepReport) {
        self.promotions.fetch_add(report.promoted as u64, Ordering::Relaxed);
        self.decays.fetch_add(report.decayed as u64, Ordering::Relaxed);
        self.record_evictions(report.evicted());
    }

    #[inline]
    pub(crate) fn record_evictions(&self, count: usize) {
        self.evictions.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Get a snapshot; sizes are filled in by the caller.
    pub(crate) fn snapshot(&self, core_size: usize, queue_size: usize) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            prepares: self.prepares.load(Ordering::Relaxed),
            prepare_failures: self.prepare_failures.load(Ordering::Relaxed),
            promotions: self.promotions.load(Ordering::Relaxed),
            decays: self.decays.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            close_failures: self.close_failures.load(Ordering::Relaxed),
            core_size,
            queue_size,
        }
    }
}

/// What one sweep over every shard did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Queue entries moved to core.
    pub promoted: usize,
    /// In-use queue entries whose hit count was halved.
    pub decayed: usize,
    /// Unused queue entries evicted.
    pub evicted_cold: usize,
    /// Unused core entries evicted for idleness.
    pub evicted_idle: usize,
    /// Evicted handles the backend failed to close.
    pub close_failures: usize,
}

impl SweepReport {
    /// Total entries evicted.
    pub fn evicted(&self) -> usize {
        self.evicted_cold + self.evicted_idle
    }

    /// Whether the sweep changed nothing.
    pub fn is_noop(&self) -> bool {
        *self == Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate() {
        let stats = CacheStats {
            hits: 3,
            misses: 1,
            ..CacheStats::default()
        };
        assert!((stats.hit_rate() - 0.75).abs() < f64::EPSILON);
        assert_eq!(CacheStats::default().hit_rate(), 0.0);
    }

    #[test]
    fn test_record_sweep() {
        let stats = AtomicCacheStats::default();
        stats.record_sweep(&SweepReport {
            promoted: 2,
            decayed: 1,
            evicted_cold: 3,
            evicted_idle: 1,
            close_failures: 0,
        });
        let snapshot = stats.snapshot(2, 1);
        assert_eq!(snapshot.promotions, 2);
        assert_eq!(snapshot.decays, 1);
        assert_eq!(snapshot.evictions, 4);
        assert_eq!(snapshot.size(), 3);
    }

    #[test]
    fn test_stats_serialize() {
        let json = serde_json::to_value(CacheStats::default()).unwrap();
        assert_eq!(json["hits"], 0);
        assert_eq!(json["queue_size"], 0);
    }

    #[test]
    fn test_sweep_report_noop() {
        assert!(SweepReport::default().is_noop());
        let report = SweepReport {
            decayed: 1,
            ..SweepReport::default()
        };
        assert!(!report.is_noop());
    }
}
