//! Integration tests for the statement cache.
//!
//! These tests drive the cache through its public API only:
//! - Prepare deduplication under concurrency
//! - Janitor promotion and eviction on a paused clock
//! - Leases pinning entries
//! - Cancellation, close and key collisions

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::RecordingBackend;
use pretty_assertions::assert_eq;
use sqlstash::{
    CacheConfig, CacheSettings, ErrorCode, MapEnvSource, Namespace, StatementCache, Tier, env_vars,
};

fn manual() -> CacheConfig {
    CacheConfig::default().without_janitor()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_misses_prepare_once() {
    let cache = Arc::new(
        StatementCache::new(RecordingBackend::with_delay(Duration::from_millis(20)), manual()).unwrap(),
    );

    let tasks: Vec<_> = (0..32)
        .map(|i| {
            let cache = Arc::clone(&cache);
            // Same statement, different layout.
            let sql = if i % 2 == 0 {
                "SELECT * FROM users WHERE id = $1".to_string()
            } else {
                "SELECT *\n  FROM users -- by id\n WHERE id = $1".to_string()
            };
            tokio::spawn(async move {
                let lease = cache.get_or_prepare(Namespace::Query, &sql).await.unwrap();
                lease.handle().id
            })
        })
        .collect();

    let mut ids = Vec::new();
    for task in tasks {
        ids.push(task.await.unwrap());
    }

    assert!(ids.iter().all(|id| *id == ids[0]));
    assert_eq!(cache.backend().total_prepares(), 1);

    let stats = cache.stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.prepares, 1);
    assert_eq!(stats.hits, 31);
    assert_eq!(cache.in_flight(), 0);
    assert_eq!(cache.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_promote_then_idle_eviction_end_to_end() {
    let config = CacheConfig::default()
        .with_shard_count(1)
        .with_min_promote_count(1)
        .with_janitor_interval(Duration::from_millis(50))
        .with_idle_ttl(Duration::from_millis(150));
    let cache = StatementCache::new(RecordingBackend::default(), config).unwrap();

    for _ in 0..3 {
        let lease = cache.get_or_prepare(Namespace::Query, "SELECT 1").await.unwrap();
        cache.release(lease);
    }
    assert_eq!(cache.backend().prepares_of("SELECT 1"), 1);
    assert_eq!(cache.tier(Namespace::Query, "SELECT 1"), Some(Tier::Queue));

    // First janitor tick promotes.
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(cache.tier(Namespace::Query, "SELECT 1"), Some(Tier::Core));
    assert!(cache.backend().closed().is_empty());

    // Idle past the TTL: evicted and closed exactly once.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(cache.tier(Namespace::Query, "SELECT 1"), None);
    assert_eq!(cache.backend().closed().len(), 1);

    let stats = cache.stats();
    assert_eq!(stats.promotions, 1);
    assert_eq!(stats.evictions, 1);
    assert_eq!(stats.size(), 0);
}

#[tokio::test]
async fn test_leased_entries_survive_sweeps() {
    let cache = StatementCache::new(RecordingBackend::default(), manual()).unwrap();

    let lease = cache.get_or_prepare(Namespace::Exec, "DELETE FROM sessions").await.unwrap();
    for _ in 0..10 {
        let report = cache.sweep().await;
        assert_eq!(report.evicted(), 0);
    }
    assert_eq!(cache.tier(Namespace::Exec, "DELETE FROM sessions"), Some(Tier::Queue));
    assert!(cache.backend().closed().is_empty());

    drop(lease);
    let report = cache.sweep().await;
    assert_eq!(report.evicted_cold, 1);
    assert_eq!(cache.backend().closed().len(), 1);
    assert!(cache.is_empty());
}

#[tokio::test]
async fn test_once_used_entries_evicted_by_next_sweep() {
    let cache = StatementCache::new(RecordingBackend::default(), manual()).unwrap();

    cache.get_or_prepare(Namespace::Query, "SELECT 1").await.unwrap().release();
    for _ in 0..3 {
        cache.get_or_prepare(Namespace::Query, "SELECT 2").await.unwrap().release();
    }

    let report = cache.sweep().await;
    assert_eq!(report.promoted, 1);
    assert_eq!(report.evicted_cold, 1);
    assert_eq!(cache.tier(Namespace::Query, "SELECT 1"), None);
    assert_eq!(cache.tier(Namespace::Query, "SELECT 2"), Some(Tier::Core));
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_prepare_leaves_nothing_behind() {
    let cache = StatementCache::new(RecordingBackend::with_delay(Duration::from_secs(1)), manual()).unwrap();

    let attempt = tokio::time::timeout(
        Duration::from_millis(100),
        cache.get_or_prepare(Namespace::Query, "SELECT pg_sleep(1)"),
    )
    .await;
    assert!(attempt.is_err());
    assert!(cache.is_empty());
    assert_eq!(cache.in_flight(), 0);

    // The key is not stuck: the next caller prepares it.
    let lease = cache.get_or_prepare(Namespace::Query, "SELECT pg_sleep(1)").await.unwrap();
    assert!(!lease.cache_hit());
    assert_eq!(cache.backend().prepares_of("SELECT pg_sleep(1)"), 1);
}

#[tokio::test]
async fn test_prepare_failure_is_returned_and_not_cached() {
    let cache = StatementCache::new(RecordingBackend::default(), manual()).unwrap();
    cache.backend().fail_prepares(true);

    let err = cache.get_or_prepare(Namespace::Query, "SELECT * FROM missing").await.unwrap_err();
    assert_eq!(err.code, ErrorCode::PrepareFailed);
    assert!(cache.is_empty());
    assert_eq!(cache.stats().prepare_failures, 1);

    cache.backend().fail_prepares(false);
    let lease = cache.get_or_prepare(Namespace::Query, "SELECT * FROM missing").await.unwrap();
    assert!(!lease.cache_hit());
}

#[tokio::test]
async fn test_close_closes_everything() {
    let cache = StatementCache::new(RecordingBackend::default(), CacheConfig::default()).unwrap();

    for sql in ["SELECT 1", "SELECT 2", "UPDATE t SET x = 1"] {
        cache.get_or_prepare(Namespace::Query, sql).await.unwrap().release();
    }
    let held = cache.get_or_prepare(Namespace::Query, "SELECT 1").await.unwrap();

    cache.close().await;
    cache.close().await;

    assert!(cache.is_closed());
    assert!(cache.is_empty());
    let mut closed = cache.backend().closed();
    closed.sort_unstable();
    assert_eq!(closed, vec![0, 1, 2]);

    let err = cache.get_or_prepare(Namespace::Query, "SELECT 1").await.unwrap_err();
    assert!(err.is_cache_closed());
    drop(held);
}

#[tokio::test]
async fn test_key_collision_is_reported() {
    let config = manual().with_hasher(|_: &str, _: Namespace| 42u64);
    let cache = StatementCache::new(RecordingBackend::default(), config).unwrap();

    cache.get_or_prepare(Namespace::Query, "SELECT 1").await.unwrap().release();
    let err = cache.get_or_prepare(Namespace::Query, "SELECT 2").await.unwrap_err();

    assert_eq!(err.code, ErrorCode::KeyCollision);
    assert_eq!(cache.backend().prepares_of("SELECT 2"), 0);
}

#[tokio::test]
async fn test_namespaces_do_not_share_entries() {
    let cache = StatementCache::new(RecordingBackend::default(), manual()).unwrap();

    let query = cache.get_or_prepare(Namespace::Query, "SELECT 1").await.unwrap();
    let exec = cache.get_or_prepare(Namespace::Exec, "SELECT 1").await.unwrap();

    assert_ne!(query.handle().id, exec.handle().id);
    assert_ne!(query.key(), exec.key());
    assert_eq!(cache.backend().prepares_of("SELECT 1"), 2);
}

#[tokio::test]
async fn test_config_from_environment() {
    let source = MapEnvSource::new()
        .set(env_vars::SHARDS, "2")
        .set(env_vars::JANITOR_MS, "0");
    let config = CacheSettings::from_env(&source).unwrap().into_config().unwrap();
    assert_eq!(config.shard_count, 2);
    assert!(!config.janitor_enabled());

    let cache = StatementCache::new(RecordingBackend::default(), config).unwrap();
    assert_eq!(cache.config().shard_count, 2);

    let bad = MapEnvSource::new().set(env_vars::SHARDS, "0");
    let err = CacheSettings::from_env(&bad).unwrap().into_config().unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidConfiguration);
}
