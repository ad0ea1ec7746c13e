//! The sharded two-tier statement cache.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::config::CacheConfig;
use super::entry::{Entry, Lease};
use super::janitor::Janitor;
use super::shard::{Shard, Tier};
use super::stats::{AtomicCacheStats, CacheStats, SweepReport};
use crate::backend::StatementBackend;
use crate::error::{QueryError, QueryResult};
use crate::hash::{Namespace, StatementKey};
use crate::normalize::normalize;
use crate::{stash_debug, stash_trace};

/// State shared between the cache handle and its janitor.
pub(crate) struct CacheInner<B: StatementBackend> {
    shards: Box<[Shard<B::Handle>]>,
    config: CacheConfig,
    backend: B,
    stats: AtomicCacheStats,
    closed: AtomicBool,
    epoch: Instant,
}

impl<B: StatementBackend> CacheInner<B> {
    #[inline]
    pub(crate) fn config(&self) -> &CacheConfig {
        &self.config
    }

    #[inline]
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    #[inline]
    fn shard(&self, key: StatementKey) -> &Shard<B::Handle> {
        &self.shards[key.shard_index(self.shards.len())]
    }

    /// Promote, decay and evict across all shards, then close what was evicted.
    pub(crate) async fn sweep(&self) -> SweepReport {
        let now = Instant::now();
        let mut report = SweepReport::default();
        let mut evicted = Vec::new();

        for shard in self.shards.iter() {
            let swept = shard.sweep(self.config.min_promote_count, self.config.idle_ttl, now);
            report.promoted += swept.promoted;
            report.decayed += swept.decayed;
            report.evicted_cold += swept.evicted_cold.len();
            report.evicted_idle += swept.evicted_idle.len();
            evicted.extend(swept.evicted_cold);
            evicted.extend(swept.evicted_idle);
        }

        for entry in &evicted {
            if !self.close_entry(entry).await {
                report.close_failures += 1;
            }
        }

        self.stats.record_sweep(&report);
        report
    }

    /// Close one handle. Failures are logged and counted, never propagated.
    async fn close_entry(&self, entry: &Entry<B::Handle>) -> bool {
        match self.backend.close(entry.handle()).await {
            Ok(()) => {
                stash_trace!(key = %entry.key(), "closed statement");
                true
            }
            Err(err) => {
                self.stats.record_close_failure();
                warn!(key = %entry.key(), sql = %entry.sql(), error = %err, "failed to close statement");
                false
            }
        }
    }
}

/// A sharded, two-tier, reference-counted prepared statement cache.
///
/// Statements are keyed by their normalized text and a [`Namespace`]. New
/// entries land in a per-shard queue; entries used more than
/// `min_promote_count` times between janitor ticks move to the core tier,
/// where they stay until idle for longer than `idle_ttl`. Entries are never
/// evicted while a [`Lease`] on them is alive.
///
/// At most one prepare per key is in flight at any time: concurrent misses
/// on the same key wait for the first one and then share its statement.
///
/// Only [`close`](Self::close) closes every cached handle through the
/// backend. Dropping the cache lets a janitor sweep already in progress
/// finish closing what it evicted, then drops the remaining handles without
/// calling [`StatementBackend::close`].
///
/// ```rust,no_run
/// use sqlstash_core::{CacheConfig, Namespace, StatementBackend, StatementCache};
///
/// async fn run<B: StatementBackend>(backend: B) -> sqlstash_core::QueryResult<()> {
///     let cache = StatementCache::new(backend, CacheConfig::default())?;
///
///     let lease = cache
///         .get_or_prepare(Namespace::Query, "SELECT * FROM users WHERE id = $1")
///         .await?;
///     // ... execute `lease.handle()` ...
///     lease.release();
///
///     cache.close().await;
///     Ok(())
/// }
/// ```
pub struct StatementCache<B: StatementBackend> {
    inner: Arc<CacheInner<B>>,
    janitor: Mutex<Option<Janitor>>,
}

impl<B: StatementBackend> StatementCache<B> {
    /// Create a cache over `backend`.
    ///
    /// Spawns the janitor on the current Tokio runtime unless
    /// `config.janitor_interval` is zero; without a runtime this fails with
    /// [`ErrorCode::RuntimeUnavailable`](crate::ErrorCode::RuntimeUnavailable).
    pub fn new(backend: B, config: CacheConfig) -> QueryResult<Self> {
        config.validate()?;

        let runtime = if config.janitor_enabled() {
            Some(tokio::runtime::Handle::try_current().map_err(|e| {
                QueryError::runtime_unavailable().with_source(e)
            })?)
        } else {
            None
        };

        let shards = (0..config.shard_count).map(|_| Shard::new()).collect();
        debug!(
            backend = backend.name(),
            shards = config.shard_count,
            min_promote_count = config.min_promote_count,
            idle_ttl_ms = config.idle_ttl.as_millis() as u64,
            hasher = config.hasher.name(),
            "statement cache created"
        );

        let inner = Arc::new(CacheInner {
            shards,
            config,
            backend,
            stats: AtomicCacheStats::default(),
            closed: AtomicBool::new(false),
            epoch: Instant::now(),
        });
        let janitor = runtime.map(|runtime| Janitor::spawn(&inner, &runtime));

        Ok(Self {
            inner,
            janitor: Mutex::new(janitor),
        })
    }

    /// Create a cache with default policy.
    pub fn with_defaults(backend: B) -> QueryResult<Self> {
        Self::new(backend, CacheConfig::default())
    }

    /// Get a cached statement, preparing it through the backend on a miss.
    pub async fn get_or_prepare(&self, namespace: Namespace, sql: &str) -> QueryResult<Lease<B::Handle>> {
        let backend = &self.inner.backend;
        self.get_or_prepare_with(namespace, sql, |sql| backend.prepare(sql))
            .await
    }

    /// Get a cached statement, running `prepare` on a miss.
    ///
    /// `prepare` receives the SQL exactly as passed in; normalization only
    /// derives the cache key. It is called at most once, and only while this
    /// caller holds the per-key lock. Whatever it returns becomes the cached
    /// handle and is later closed through the backend.
    pub async fn get_or_prepare_with<'a, F, Fut>(
        &self,
        namespace: Namespace,
        sql: &'a str,
        prepare: F,
    ) -> QueryResult<Lease<B::Handle>>
    where
        F: FnOnce(&'a str) -> Fut,
        Fut: Future<Output = QueryResult<B::Handle>>,
    {
        let inner = &*self.inner;
        if inner.is_closed() {
            return Err(QueryError::cache_closed());
        }

        let normalized = normalize(sql);
        let key = inner.config.hasher.hash(&normalized, namespace);
        let shard = inner.shard(key);

        if let Some(entry) = shard.lookup(key, namespace, &normalized)? {
            inner.stats.record_hit();
            stash_trace!(key = %key, "statement cache hit");
            return Ok(Lease::new(entry, true));
        }

        let _key_lock = shard.lock_key(key).await;

        // Another caller may have prepared it while we waited.
        if let Some(entry) = shard.lookup(key, namespace, &normalized)? {
            inner.stats.record_hit();
            stash_trace!(key = %key, "statement prepared by a concurrent caller");
            return Ok(Lease::new(entry, true));
        }

        inner.stats.record_miss();
        stash_debug!(key = %key, sql = %normalized, "statement cache miss");

        let handle = match prepare(sql).await {
            Ok(handle) => handle,
            Err(err) => {
                inner.stats.record_prepare_failure();
                stash_debug!(key = %key, error = %err, "prepare failed");
                return Err(err);
            }
        };
        inner.stats.record_prepare();

        let entry = Arc::new(Entry::new(handle, key, namespace, &normalized, inner.epoch));
        match shard.insert(Arc::clone(&entry)) {
            Ok(()) => Ok(Lease::new(entry, false)),
            Err(orphan) => {
                drop(entry);
                debug!(key = %key, "cache closed during prepare, closing statement");
                inner.close_entry(&orphan).await;
                Err(QueryError::cache_closed())
            }
        }
    }

    /// Return a statement to the cache. Same as dropping the lease.
    pub fn release(&self, lease: Lease<B::Handle>) {
        lease.release();
    }

    /// Run one janitor pass now.
    pub async fn sweep(&self) -> SweepReport {
        if self.inner.is_closed() {
            return SweepReport::default();
        }
        self.inner.sweep().await
    }

    /// Close the cache and every cached statement.
    ///
    /// Idempotent. Statements still leased are closed as well (with a
    /// warning); later lookups fail with
    /// [`ErrorCode::CacheClosed`](crate::ErrorCode::CacheClosed).
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        // Marking each shard closed under its write lock fences off inserts
        // from prepares still in flight.
        let drained: Vec<_> = self.inner.shards.iter().flat_map(|shard| shard.close()).collect();

        let janitor = self.janitor.lock().take();
        if let Some(janitor) = janitor {
            janitor.stop().await;
        }

        let mut failures = 0usize;
        for entry in &drained {
            if entry.in_use() > 0 {
                warn!(
                    key = %entry.key(),
                    in_use = entry.in_use(),
                    "closing statement that is still leased"
                );
            }
            if !self.inner.close_entry(entry).await {
                failures += 1;
            }
        }
        self.inner.stats.record_evictions(drained.len());

        info!(closed = drained.len(), close_failures = failures, "statement cache closed");
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    /// The tier currently holding a statement, if cached.
    pub fn tier(&self, namespace: Namespace, sql: &str) -> Option<Tier> {
        let key = self.key_for(namespace, sql);
        self.inner.shard(key).tier_of(key)
    }

    /// The cache key `sql` maps to under `namespace`.
    pub fn key_for(&self, namespace: Namespace, sql: &str) -> StatementKey {
        self.inner.config.hasher.hash(&normalize(sql), namespace)
    }

    /// Number of cached statements.
    pub fn len(&self) -> usize {
        self.inner
            .shards
            .iter()
            .map(|shard| {
                let (core, queue) = shard.sizes();
                core + queue
            })
            .sum()
    }

    /// Whether no statements are cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of keys with a prepare in flight or awaited.
    pub fn in_flight(&self) -> usize {
        self.inner.shards.iter().map(|shard| shard.pending_locks()).sum()
    }

    /// Get cache statistics.
    pub fn stats(&self) -> CacheStats {
        let (core, queue) = self
            .inner
            .shards
            .iter()
            .map(|shard| shard.sizes())
            .fold((0, 0), |(c, q), (sc, sq)| (c + sc, q + sq));
        self.inner.stats.snapshot(core, queue)
    }

    /// The cache policy.
    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// The backend statements are prepared through.
    pub fn backend(&self) -> &B {
        &self.inner.backend
    }
}

impl<B: StatementBackend> Drop for StatementCache<B> {
    fn drop(&mut self) {
        if let Some(janitor) = self.janitor.get_mut().take() {
            janitor.detach();
        }
        if !self.inner.is_closed() && !self.is_empty() {
            debug!(cached = self.len(), "statement cache dropped without close()");
        }
    }
}

impl<B: StatementBackend> std::fmt::Debug for StatementCache<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatementCache")
            .field("backend", &self.inner.backend.name())
            .field("config", &self.inner.config)
            .field("len", &self.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use super::*;
    use crate::backend::mock::MockBackend;
    use crate::error::ErrorCode;
    use pretty_assertions::assert_eq;

    fn cache() -> StatementCache<MockBackend> {
        StatementCache::new(MockBackend::default(), CacheConfig::default().without_janitor()).unwrap()
    }

    async fn touch(cache: &StatementCache<MockBackend>, sql: &str) {
        cache.get_or_prepare(Namespace::Query, sql).await.unwrap().release();
    }

    #[tokio::test]
    async fn test_miss_then_hit() {
        let cache = cache();

        let first = cache.get_or_prepare(Namespace::Query, "SELECT 1").await.unwrap();
        assert!(!first.cache_hit());
        let second = cache.get_or_prepare(Namespace::Query, "SELECT 1").await.unwrap();
        assert!(second.cache_hit());
        assert_eq!(first.handle(), second.handle());
        assert_eq!(second.in_use(), 2);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.prepares, 1);
        assert_eq!(stats.queue_size, 1);
        assert_eq!(cache.tier(Namespace::Query, "SELECT 1"), Some(Tier::Queue));
    }

    #[tokio::test]
    async fn test_equivalent_text_shares_entry() {
        let cache = cache();
        touch(&cache, "SELECT *\n  FROM users -- all of them").await;
        let lease = cache
            .get_or_prepare(Namespace::Query, "SELECT * FROM users")
            .await
            .unwrap();

        assert!(lease.cache_hit());
        // The backend saw the text as written by the first caller.
        assert_eq!(lease.handle().sql, "SELECT *\n  FROM users -- all of them");
        assert_eq!(lease.sql(), "SELECT * FROM users");
        assert_eq!(cache.backend().total_prepares(), 1);
    }

    #[tokio::test]
    async fn test_namespaces_are_independent() {
        let cache = cache();
        touch(&cache, "DELETE FROM sessions").await;
        let lease = cache
            .get_or_prepare(Namespace::Exec, "DELETE FROM sessions")
            .await
            .unwrap();
        assert!(!lease.cache_hit());
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn test_custom_namespace_with_builtin_tag_byte() {
        let cache = cache();
        touch(&cache, "SELECT 1").await;

        for namespace in [Namespace::Custom(b'q'), Namespace::Custom(b'e')] {
            let lease = cache.get_or_prepare(namespace, "SELECT 1").await.unwrap();
            assert!(!lease.cache_hit());
        }
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.backend().prepare_count("SELECT 1"), 3);
    }

    #[tokio::test]
    async fn test_prepare_failure_leaves_no_trace() {
        let cache = cache();
        cache.backend().fail_prepare.store(true, Ordering::SeqCst);

        let err = cache.get_or_prepare(Namespace::Query, "SELEC 1").await.unwrap_err();
        assert_eq!(err.code, ErrorCode::PrepareFailed);
        assert!(cache.is_empty());
        assert_eq!(cache.in_flight(), 0);
        assert_eq!(cache.stats().prepare_failures, 1);

        cache.backend().fail_prepare.store(false, Ordering::SeqCst);
        let lease = cache.get_or_prepare(Namespace::Query, "SELEC 1").await.unwrap();
        assert!(!lease.cache_hit());
    }

    #[tokio::test]
    async fn test_custom_prepare_fn() {
        let cache = cache();
        let lease = cache
            .get_or_prepare_with(Namespace::Query, "SELECT 2", |sql| async move {
                Ok(crate::backend::mock::MockHandle {
                    id: 99,
                    sql: sql.to_string(),
                })
            })
            .await
            .unwrap();
        assert_eq!(lease.handle().id, 99);
        drop(lease);

        // A hit never calls the prepare function.
        let lease = cache
            .get_or_prepare_with(Namespace::Query, "SELECT 2", |_| async {
                Err(QueryError::internal("must not be called"))
            })
            .await
            .unwrap();
        assert!(lease.cache_hit());
    }

    #[tokio::test]
    async fn test_sweep_evicts_once_used_statements() {
        let cache = cache();
        touch(&cache, "SELECT 1").await;

        let report = cache.sweep().await;
        assert_eq!(report.evicted_cold, 1);
        assert!(cache.is_empty());
        assert_eq!(cache.backend().close_count(), 1);
        assert_eq!(cache.stats().evictions, 1);
    }

    #[tokio::test]
    async fn test_sweep_never_evicts_leased_statements() {
        let cache = cache();
        let lease = cache.get_or_prepare(Namespace::Query, "SELECT 1").await.unwrap();

        for _ in 0..10 {
            let report = cache.sweep().await;
            assert_eq!(report.evicted(), 0);
        }
        assert_eq!(cache.tier(Namespace::Query, "SELECT 1"), Some(Tier::Queue));
        assert_eq!(cache.backend().close_count(), 0);

        lease.release();
        assert_eq!(cache.sweep().await.evicted_cold, 1);
    }

    #[tokio::test]
    async fn test_promotion_threshold() {
        let cache = cache();
        for _ in 0..3 {
            touch(&cache, "SELECT hot").await;
        }
        for _ in 0..2 {
            touch(&cache, "SELECT warm").await;
        }

        let report = cache.sweep().await;
        assert_eq!(report.promoted, 1);
        assert_eq!(report.evicted_cold, 1);
        assert_eq!(cache.tier(Namespace::Query, "SELECT hot"), Some(Tier::Core));
        assert_eq!(cache.tier(Namespace::Query, "SELECT warm"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_core_eviction() {
        let cache = StatementCache::new(
            MockBackend::default(),
            CacheConfig::default()
                .without_janitor()
                .with_idle_ttl(Duration::from_secs(10)),
        )
        .unwrap();
        for _ in 0..3 {
            touch(&cache, "SELECT 1").await;
            touch(&cache, "SELECT 2").await;
        }
        assert_eq!(cache.sweep().await.promoted, 2);

        tokio::time::advance(Duration::from_secs(9)).await;
        touch(&cache, "SELECT 2").await;
        tokio::time::advance(Duration::from_secs(2)).await;

        let report = cache.sweep().await;
        assert_eq!(report.evicted_idle, 1);
        assert_eq!(cache.tier(Namespace::Query, "SELECT 1"), None);
        assert_eq!(cache.tier(Namespace::Query, "SELECT 2"), Some(Tier::Core));
    }

    #[tokio::test]
    async fn test_key_collision_is_rejected() {
        let cache = StatementCache::new(
            MockBackend::default(),
            CacheConfig::default()
                .without_janitor()
                .with_hasher(|_: &str, _: Namespace| 7u64),
        )
        .unwrap();
        touch(&cache, "SELECT 1").await;

        let err = cache.get_or_prepare(Namespace::Query, "SELECT 2").await.unwrap_err();
        assert_eq!(err.code, ErrorCode::KeyCollision);
        assert_eq!(err.context.sql.as_deref(), Some("SELECT 2"));
        assert_eq!(cache.backend().total_prepares(), 1);
    }

    #[tokio::test]
    async fn test_close_closes_everything() {
        let cache = cache();
        touch(&cache, "SELECT 1").await;
        let leased = cache.get_or_prepare(Namespace::Query, "SELECT 2").await.unwrap();

        cache.close().await;
        assert!(cache.is_closed());
        assert!(cache.is_empty());
        assert_eq!(cache.backend().close_count(), 2);

        let err = cache.get_or_prepare(Namespace::Query, "SELECT 1").await.unwrap_err();
        assert!(err.is_cache_closed());

        // Idempotent.
        cache.close().await;
        assert_eq!(cache.backend().close_count(), 2);
        drop(leased);
    }

    #[tokio::test]
    async fn test_close_failures_are_counted() {
        let cache = cache();
        touch(&cache, "SELECT 1").await;
        cache.backend().fail_close.store(true, Ordering::SeqCst);

        let report = cache.sweep().await;
        assert_eq!(report.evicted_cold, 1);
        assert_eq!(report.close_failures, 1);
        assert_eq!(cache.stats().close_failures, 1);
        assert!(cache.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_misses_prepare_once() {
        let backend = MockBackend::default();
        *backend.prepare_delay.lock() = Some(Duration::from_millis(20));
        let cache = Arc::new(
            StatementCache::new(backend, CacheConfig::default().without_janitor()).unwrap(),
        );

        let tasks: Vec<_> = (0..32)
            .map(|_| {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move {
                    let lease = cache
                        .get_or_prepare(Namespace::Query, "SELECT pg_sleep(0)")
                        .await
                        .unwrap();
                    lease.cache_hit()
                })
            })
            .collect();

        let mut misses = 0;
        for task in tasks {
            if !task.await.unwrap() {
                misses += 1;
            }
        }

        assert_eq!(misses, 1);
        assert_eq!(cache.backend().prepare_count("SELECT pg_sleep(0)"), 1);
        assert_eq!(cache.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_prepare_inserts_nothing() {
        let backend = MockBackend::default();
        *backend.prepare_delay.lock() = Some(Duration::from_secs(5));
        let cache = StatementCache::new(backend, CacheConfig::default().without_janitor()).unwrap();

        let attempt = tokio::time::timeout(
            Duration::from_secs(1),
            cache.get_or_prepare(Namespace::Query, "SELECT 1"),
        )
        .await;
        assert!(attempt.is_err());
        assert!(cache.is_empty());
        assert_eq!(cache.in_flight(), 0);

        *cache.backend().prepare_delay.lock() = None;
        let lease = cache.get_or_prepare(Namespace::Query, "SELECT 1").await.unwrap();
        assert!(!lease.cache_hit());
    }

    #[test]
    fn test_janitor_requires_runtime() {
        let err = StatementCache::new(MockBackend::default(), CacheConfig::default()).unwrap_err();
        assert_eq!(err.code, ErrorCode::RuntimeUnavailable);

        let cache = StatementCache::new(MockBackend::default(), CacheConfig::default().without_janitor());
        assert!(cache.is_ok());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let err = StatementCache::new(
            MockBackend::default(),
            CacheConfig::default().without_janitor().with_shard_count(0),
        )
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidConfiguration);
    }
}
