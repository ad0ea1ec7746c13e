//! Core hook types and traits.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::QueryError;
use crate::hash::Namespace;

/// The kind of call a hook is observing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryOp {
    /// Row-returning query.
    Query,
    /// Query expected to return exactly one row.
    QueryOne,
    /// Statement executed for its side effects.
    Execute,
    /// Explicit prepare without execution.
    Prepare,
    /// Transaction start.
    Begin,
    /// Transaction commit.
    Commit,
    /// Transaction rollback.
    Rollback,
}

impl QueryOp {
    /// Short lowercase name, used as a metrics/log label.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::QueryOne => "query_one",
            Self::Execute => "execute",
            Self::Prepare => "prepare",
            Self::Begin => "begin",
            Self::Commit => "commit",
            Self::Rollback => "rollback",
        }
    }

    /// Cache namespace statements for this operation are keyed under.
    pub fn namespace(&self) -> Namespace {
        match self {
            Self::Query | Self::QueryOne | Self::Prepare => Namespace::Query,
            Self::Execute | Self::Begin | Self::Commit | Self::Rollback => Namespace::Exec,
        }
    }

    /// Whether this is a transaction control statement.
    pub fn is_transaction_control(&self) -> bool {
        matches!(self, Self::Begin | Self::Commit | Self::Rollback)
    }
}

impl fmt::Display for QueryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a hook knows about the call in progress.
#[derive(Debug, Clone, Copy)]
pub struct HookContext<'a> {
    /// Operation kind.
    pub op: QueryOp,
    /// SQL as passed by the caller.
    pub sql: &'a str,
    /// Whether the call runs inside a transaction.
    pub in_tx: bool,
    /// Whether the statement came from the cache.
    pub used_cache: bool,
}

impl<'a> HookContext<'a> {
    /// Create a context.
    pub fn new(op: QueryOp, sql: &'a str) -> Self {
        Self {
            op,
            sql,
            in_tx: false,
            used_cache: false,
        }
    }

    /// Mark as running inside a transaction.
    pub fn in_transaction(mut self, in_tx: bool) -> Self {
        self.in_tx = in_tx;
        self
    }

    /// Record whether the cache served the statement.
    pub fn with_cache(mut self, used_cache: bool) -> Self {
        self.used_cache = used_cache;
        self
    }
}

/// Timings reported to [`QueryHook::after`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryTiming {
    /// Cache lookup plus prepare on a miss.
    pub prepare: Duration,
    /// Execution of the statement.
    pub execute: Duration,
    /// Wall time of the whole call.
    pub total: Duration,
    /// Whether the cache served the statement.
    pub cache_hit: bool,
}

impl QueryTiming {
    /// Total time in microseconds.
    pub fn total_us(&self) -> u64 {
        self.total.as_micros() as u64
    }
}

/// Callbacks around each executor call.
///
/// Hooks run inline on the calling task and must not block.
pub trait QueryHook: Send + Sync {
    /// Called before the statement executes.
    fn before(&self, _ctx: &HookContext<'_>) {}

    /// Called after the call completes, successfully or not.
    fn after(
        &self,
        ctx: &HookContext<'_>,
        timing: &QueryTiming,
        rows_affected: Option<u64>,
        error: Option<&QueryError>,
    );

    /// Name of this hook (for debugging/logging).
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// A shared hook.
pub type SharedHook = Arc<dyn QueryHook>;

impl<H: QueryHook + ?Sized> QueryHook for Arc<H> {
    fn before(&self, ctx: &HookContext<'_>) {
        (**self).before(ctx)
    }

    fn after(
        &self,
        ctx: &HookContext<'_>,
        timing: &QueryTiming,
        rows_affected: Option<u64>,
        error: Option<&QueryError>,
    ) {
        (**self).after(ctx, timing, rows_affected, error)
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

/// Fans each callback out to several hooks, in insertion order.
#[derive(Clone, Default)]
pub struct HookChain {
    hooks: Vec<SharedHook>,
}

impl HookChain {
    /// Create an empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a hook to the end of the chain.
    pub fn with<H: QueryHook + 'static>(mut self, hook: H) -> Self {
        self.hooks.push(Arc::new(hook));
        self
    }

    /// Add a hook that is also held elsewhere (e.g. to read its metrics).
    pub fn with_shared(mut self, hook: SharedHook) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Add a hook to the end of the chain.
    pub fn push<H: QueryHook + 'static>(&mut self, hook: H) {
        self.hooks.push(Arc::new(hook));
    }

    /// Number of hooks.
    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    /// Check if the chain is empty.
    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }
}

impl QueryHook for HookChain {
    fn before(&self, ctx: &HookContext<'_>) {
        for hook in &self.hooks {
            hook.before(ctx);
        }
    }

    fn after(
        &self,
        ctx: &HookContext<'_>,
        timing: &QueryTiming,
        rows_affected: Option<u64>,
        error: Option<&QueryError>,
    ) {
        for hook in &self.hooks {
            hook.after(ctx, timing, rows_affected, error);
        }
    }

    fn name(&self) -> &'static str {
        "HookChain"
    }
}

impl fmt::Debug for HookChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.hooks.iter().map(|hook| hook.name()))
            .finish()
    }
}
