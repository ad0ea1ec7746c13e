//! Cached entries and the leases handed out to callers.

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use tokio::time::Instant;
use tracing::warn;

use crate::hash::{Namespace, StatementKey};

/// One prepared statement and its usage counters.
///
/// The three counters are independent atomics. No invariant spans them, so
/// a reader may see e.g. a fresh `hit_count` with a stale `last_access`;
/// that only shifts when the janitor promotes or evicts, never who owns the
/// handle. Ownership is decided by `in_use`, which the janitor reads under
/// the shard write lock while acquirers increment it under the read lock.
pub(crate) struct Entry<H> {
    handle: H,
    key: StatementKey,
    namespace: Namespace,
    sql: Box<str>,
    epoch: Instant,
    in_use: AtomicUsize,
    hit_count: AtomicU64,
    last_access_nanos: AtomicU64,
}

impl<H> Entry<H> {
    /// A freshly prepared entry, already held by its first caller.
    pub(crate) fn new(
        handle: H,
        key: StatementKey,
        namespace: Namespace,
        sql: &str,
        epoch: Instant,
    ) -> Self {
        let entry = Self {
            handle,
            key,
            namespace,
            sql: sql.into(),
            epoch,
            in_use: AtomicUsize::new(1),
            hit_count: AtomicU64::new(1),
            last_access_nanos: AtomicU64::new(0),
        };
        entry.touch();
        entry
    }

    #[inline]
    pub(crate) fn handle(&self) -> &H {
        &self.handle
    }

    #[inline]
    pub(crate) fn key(&self) -> StatementKey {
        self.key
    }

    #[inline]
    pub(crate) fn sql(&self) -> &str {
        &self.sql
    }

    /// Whether this entry was cached for exactly this statement.
    #[inline]
    pub(crate) fn matches(&self, namespace: Namespace, sql: &str) -> bool {
        self.namespace == namespace && &*self.sql == sql
    }

    /// Register a new user. Must be called under the shard lock.
    #[inline]
    pub(crate) fn acquire(&self) {
        self.in_use.fetch_add(1, Ordering::AcqRel);
        self.hit_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Drop one user and stamp the access time.
    ///
    /// Clamps at zero: an extra release is logged, never wrapped.
    pub(crate) fn release(&self) {
        let previous = self
            .in_use
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        if previous.is_err() {
            warn!(key = %self.key, sql = %self.sql, "statement released more often than acquired");
        }
        self.touch();
    }

    #[inline]
    pub(crate) fn in_use(&self) -> usize {
        self.in_use.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn hit_count(&self) -> u64 {
        self.hit_count.load(Ordering::Relaxed)
    }

    /// Halve the hit count.
    pub(crate) fn decay(&self) {
        // fetch_update with an infallible closure cannot fail.
        let _ = self
            .hit_count
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| Some(n / 2));
    }

    fn touch(&self) {
        let nanos = self.epoch.elapsed().as_nanos().min(u64::MAX as u128) as u64;
        self.last_access_nanos.fetch_max(nanos, Ordering::Relaxed);
    }

    /// Time since the last release (or creation).
    pub(crate) fn idle_for(&self, now: Instant) -> Duration {
        let last = self.epoch + Duration::from_nanos(self.last_access_nanos.load(Ordering::Relaxed));
        now.saturating_duration_since(last)
    }
}

impl<H> fmt::Debug for Entry<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("key", &self.key)
            .field("sql", &self.sql)
            .field("in_use", &self.in_use())
            .field("hit_count", &self.hit_count())
            .finish()
    }
}

/// A borrowed prepared statement.
///
/// The statement stays cached and open while any lease on it is alive.
/// Dropping the lease releases it; [`Lease::release`] does the same
/// explicitly. A lease can only be released once.
pub struct Lease<H> {
    entry: Arc<Entry<H>>,
    cache_hit: bool,
    released: bool,
}

impl<H> Lease<H> {
    pub(crate) fn new(entry: Arc<Entry<H>>, cache_hit: bool) -> Self {
        Self {
            entry,
            cache_hit,
            released: false,
        }
    }

    /// The prepared statement handle.
    #[inline]
    pub fn handle(&self) -> &H {
        self.entry.handle()
    }

    /// Whether the statement came from the cache rather than a new prepare
    /// issued for this call.
    #[inline]
    pub fn cache_hit(&self) -> bool {
        self.cache_hit
    }

    /// The cache key of the statement.
    #[inline]
    pub fn key(&self) -> StatementKey {
        self.entry.key()
    }

    /// The normalized statement text.
    #[inline]
    pub fn sql(&self) -> &str {
        self.entry.sql()
    }

    /// Number of leases currently held on this statement, this one included.
    #[inline]
    pub fn in_use(&self) -> usize {
        self.entry.in_use()
    }

    /// Usage count driving promotion.
    #[inline]
    pub fn hit_count(&self) -> u64 {
        self.entry.hit_count()
    }

    /// Return the statement to the cache.
    pub fn release(mut self) {
        self.release_once();
    }

    fn release_once(&mut self) {
        if !self.released {
            self.released = true;
            self.entry.release();
        }
    }
}

impl<H> Deref for Lease<H> {
    type Target = H;

    fn deref(&self) -> &H {
        self.handle()
    }
}

impl<H> Drop for Lease<H> {
    fn drop(&mut self) {
        self.release_once();
    }
}

impl<H> fmt::Debug for Lease<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease")
            .field("key", &self.entry.key())
            .field("cache_hit", &self.cache_hit)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> Arc<Entry<&'static str>> {
        Arc::new(Entry::new(
            "stmt",
            StatementKey::new(1),
            Namespace::Query,
            "SELECT 1",
            Instant::now(),
        ))
    }

    #[test]
    fn test_new_entry_counters() {
        let entry = entry();
        assert_eq!(entry.in_use(), 1);
        assert_eq!(entry.hit_count(), 1);
        assert!(entry.matches(Namespace::Query, "SELECT 1"));
        assert!(!entry.matches(Namespace::Exec, "SELECT 1"));
        assert!(!entry.matches(Namespace::Query, "SELECT 2"));
    }

    #[test]
    fn test_acquire_release() {
        let entry = entry();
        entry.acquire();
        assert_eq!(entry.in_use(), 2);
        assert_eq!(entry.hit_count(), 2);

        entry.release();
        entry.release();
        assert_eq!(entry.in_use(), 0);
        assert_eq!(entry.hit_count(), 2);
    }

    #[test]
    fn test_release_clamps_at_zero() {
        let entry = entry();
        entry.release();
        entry.release();
        assert_eq!(entry.in_use(), 0);
    }

    #[test]
    fn test_decay_halves() {
        let entry = entry();
        for _ in 0..6 {
            entry.acquire();
        }
        assert_eq!(entry.hit_count(), 7);
        entry.decay();
        assert_eq!(entry.hit_count(), 3);
        entry.decay();
        entry.decay();
        entry.decay();
        assert_eq!(entry.hit_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_for_tracks_release() {
        let entry = entry();
        tokio::time::advance(Duration::from_millis(100)).await;
        assert!(entry.idle_for(Instant::now()) >= Duration::from_millis(100));

        entry.release();
        assert_eq!(entry.idle_for(Instant::now()), Duration::ZERO);

        tokio::time::advance(Duration::from_millis(30)).await;
        assert_eq!(entry.idle_for(Instant::now()), Duration::from_millis(30));
    }

    #[test]
    fn test_lease_releases_once() {
        let entry = entry();
        let lease = Lease::new(Arc::clone(&entry), false);
        assert_eq!(*lease, "stmt");
        assert!(!lease.cache_hit());
        lease.release();
        assert_eq!(entry.in_use(), 0);
    }

    #[test]
    fn test_lease_releases_on_drop() {
        let entry = entry();
        entry.acquire();
        {
            let _lease = Lease::new(Arc::clone(&entry), true);
        }
        assert_eq!(entry.in_use(), 1);
    }
}
