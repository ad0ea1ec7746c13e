//! Integration tests for the executor and the provided hooks.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::RecordingBackend;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use sqlstash::hooks::{LoggingHook, MetricsHook};
use sqlstash::{
    CacheConfig, ErrorCode, Executor, HookChain, HookContext, QueryError, QueryHook, QueryOp,
    QueryTiming, StatementCache,
};

#[derive(Default)]
struct CacheUsage {
    seen: Mutex<Vec<(QueryOp, bool, bool)>>,
}

impl QueryHook for CacheUsage {
    fn after(
        &self,
        ctx: &HookContext<'_>,
        _timing: &QueryTiming,
        _rows_affected: Option<u64>,
        _error: Option<&QueryError>,
    ) {
        self.seen.lock().push((ctx.op, ctx.used_cache, ctx.in_tx));
    }
}

fn executor(hooks: HookChain) -> Executor<RecordingBackend> {
    let cache = StatementCache::new(RecordingBackend::default(), CacheConfig::default().without_janitor())
        .unwrap();
    Executor::new(Arc::new(cache)).with_hooks(hooks)
}

#[tokio::test]
async fn test_hooks_observe_cache_usage_and_transactions() {
    let usage = Arc::new(CacheUsage::default());
    let executor = executor(HookChain::new().with_shared(usage.clone()));

    executor
        .run_uncached(QueryOp::Begin, "BEGIN", true, async { Ok(((), None)) })
        .await
        .unwrap();
    for _ in 0..2 {
        executor
            .run(QueryOp::Query, "SELECT * FROM t WHERE id = $1", true, |stmt| async move {
                Ok((stmt.id, None))
            })
            .await
            .unwrap();
    }
    executor
        .run_uncached(QueryOp::Commit, "COMMIT", true, async { Ok(((), None)) })
        .await
        .unwrap();

    assert_eq!(
        *usage.seen.lock(),
        vec![
            (QueryOp::Begin, false, true),
            (QueryOp::Query, false, true),
            (QueryOp::Query, true, true),
            (QueryOp::Commit, false, true),
        ]
    );
}

#[tokio::test]
async fn test_metrics_hook_through_executor() {
    let metrics = Arc::new(MetricsHook::with_slow_threshold(Duration::from_secs(60)));
    let executor = executor(
        HookChain::new()
            .with(LoggingHook::new().with_max_sql_length(32))
            .with_shared(metrics.clone()),
    );

    for _ in 0..3 {
        let rows = executor
            .run(QueryOp::Execute, "UPDATE accounts SET seen = true", false, |_| async {
                Ok((5u64, Some(5)))
            })
            .await
            .unwrap();
        assert_eq!(rows, 5);
    }
    executor.cache().backend().fail_prepares(true);
    let err = executor
        .run(QueryOp::Query, "SELECT nope", false, |_| async { Ok(((), None)) })
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::PrepareFailed);

    let snapshot = metrics.metrics();
    assert_eq!(snapshot.total_queries, 4);
    assert_eq!(snapshot.successful_queries, 3);
    assert_eq!(snapshot.failed_queries, 1);
    assert_eq!(snapshot.cache_hits, 2);
    assert_eq!(snapshot.rows_affected, 15);
    assert_eq!(snapshot.count_for(QueryOp::Execute), 3);
    assert_eq!(snapshot.slow_queries, 0);

    let stats = executor.cache().stats();
    assert_eq!(stats.hits, 2);
    assert_eq!(stats.prepare_failures, 1);
}

#[tokio::test]
async fn test_executor_releases_on_error() {
    let executor = executor(HookChain::new());

    let err = executor
        .run(QueryOp::Execute, "DELETE FROM t", false, |_| async {
            Err::<((), Option<u64>), _>(QueryError::database("deadlock detected"))
        })
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::DatabaseError);

    let report = executor.cache().sweep().await;
    assert_eq!(report.evicted_cold, 1);
    assert_eq!(executor.cache().backend().closed().len(), 1);
}
