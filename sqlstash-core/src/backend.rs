//! The driver seam: how the cache prepares and closes statements.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::QueryResult;

/// A connection-like object that can prepare statements.
///
/// The cache never executes anything through the backend. It calls
/// [`prepare`](Self::prepare) on a miss and [`close`](Self::close) once per
/// handle when the entry is evicted or the cache is closed.
#[async_trait]
pub trait StatementBackend: Send + Sync + 'static {
    /// The prepared statement handle.
    type Handle: Send + Sync + 'static;

    /// Prepare `sql` on the server.
    async fn prepare(&self, sql: &str) -> QueryResult<Self::Handle>;

    /// Release the server-side resources of `handle`.
    async fn close(&self, handle: &Self::Handle) -> QueryResult<()>;

    /// Name of this backend (for logging).
    fn name(&self) -> &'static str {
        "statement-backend"
    }
}

#[async_trait]
impl<B: StatementBackend> StatementBackend for Arc<B> {
    type Handle = B::Handle;

    async fn prepare(&self, sql: &str) -> QueryResult<Self::Handle> {
        (**self).prepare(sql).await
    }

    async fn close(&self, handle: &Self::Handle) -> QueryResult<()> {
        (**self).close(handle).await
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}
