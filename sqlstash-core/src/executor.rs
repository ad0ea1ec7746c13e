//! Routes calls through the statement cache and the hooks.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::backend::StatementBackend;
use crate::error::QueryResult;
use crate::hooks::{HookChain, HookContext, QueryHook, QueryOp, QueryTiming};
use crate::statement::StatementCache;

/// Executes statements through a [`StatementCache`], reporting every call
/// to a [`HookChain`].
///
/// The executor does not know how to run a statement; the caller passes a
/// closure that receives the prepared handle and returns the value plus an
/// optional affected-row count. Handles are passed by value, so backends
/// should use cheaply clonable (reference counted) handles.
pub struct Executor<B: StatementBackend> {
    cache: Arc<StatementCache<B>>,
    hooks: HookChain,
}

impl<B: StatementBackend> Clone for Executor<B> {
    fn clone(&self) -> Self {
        Self {
            cache: Arc::clone(&self.cache),
            hooks: self.hooks.clone(),
        }
    }
}

impl<B: StatementBackend> Executor<B> {
    /// Create an executor without hooks.
    pub fn new(cache: Arc<StatementCache<B>>) -> Self {
        Self {
            cache,
            hooks: HookChain::new(),
        }
    }

    /// Replace the hook chain.
    pub fn with_hooks(mut self, hooks: HookChain) -> Self {
        self.hooks = hooks;
        self
    }

    /// Append a hook.
    pub fn with_hook<H: QueryHook + 'static>(mut self, hook: H) -> Self {
        self.hooks.push(hook);
        self
    }

    /// The underlying cache.
    pub fn cache(&self) -> &Arc<StatementCache<B>> {
        &self.cache
    }

    /// The hook chain.
    pub fn hooks(&self) -> &HookChain {
        &self.hooks
    }

    /// Look up or prepare `sql`, then run `execute` with the handle.
    ///
    /// The statement is keyed under [`QueryOp::namespace`]. The lease is held
    /// for the duration of `execute` and released on every path, including
    /// when the returned future is dropped.
    pub async fn run<T, F, Fut>(&self, op: QueryOp, sql: &str, in_tx: bool, execute: F) -> QueryResult<T>
    where
        B::Handle: Clone,
        F: FnOnce(B::Handle) -> Fut,
        Fut: Future<Output = QueryResult<(T, Option<u64>)>>,
    {
        let start = Instant::now();
        let ctx = HookContext::new(op, sql).in_transaction(in_tx);

        let lease = match self.cache.get_or_prepare(op.namespace(), sql).await {
            Ok(lease) => lease,
            Err(err) => {
                let prepare = start.elapsed();
                self.hooks.before(&ctx);
                let timing = QueryTiming {
                    prepare,
                    execute: Duration::ZERO,
                    total: start.elapsed(),
                    cache_hit: false,
                };
                self.hooks.after(&ctx, &timing, None, Some(&err));
                return Err(err);
            }
        };
        let prepare = start.elapsed();
        let cache_hit = lease.cache_hit();
        let ctx = ctx.with_cache(cache_hit);

        self.hooks.before(&ctx);
        let exec_start = Instant::now();
        let result = execute(lease.handle().clone()).await;
        let execute = exec_start.elapsed();
        lease.release();

        let timing = QueryTiming {
            prepare,
            execute,
            total: start.elapsed(),
            cache_hit,
        };
        match result {
            Ok((value, rows_affected)) => {
                self.hooks.after(&ctx, &timing, rows_affected, None);
                Ok(value)
            }
            Err(err) => {
                self.hooks.after(&ctx, &timing, None, Some(&err));
                Err(err)
            }
        }
    }

    /// Run a call that bypasses the cache (transaction control, batches).
    ///
    /// Hooks still observe it, with `used_cache = false`.
    pub async fn run_uncached<T, Fut>(&self, op: QueryOp, sql: &str, in_tx: bool, call: Fut) -> QueryResult<T>
    where
        Fut: Future<Output = QueryResult<(T, Option<u64>)>>,
    {
        let start = Instant::now();
        let ctx = HookContext::new(op, sql).in_transaction(in_tx);

        self.hooks.before(&ctx);
        let result = call.await;
        let elapsed = start.elapsed();
        let timing = QueryTiming {
            prepare: Duration::ZERO,
            execute: elapsed,
            total: elapsed,
            cache_hit: false,
        };

        match result {
            Ok((value, rows_affected)) => {
                self.hooks.after(&ctx, &timing, rows_affected, None);
                Ok(value)
            }
            Err(err) => {
                self.hooks.after(&ctx, &timing, None, Some(&err));
                Err(err)
            }
        }
    }
}

impl<B: StatementBackend> std::fmt::Debug for Executor<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("cache", &self.cache)
            .field("hooks", &self.hooks)
            .finish()
    }
}
