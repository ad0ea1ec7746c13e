//! [`StatementBackend`] over a shared `tokio_postgres::Client`.

use std::sync::Arc;

use async_trait::async_trait;
use sqlstash_core::{QueryResult, StatementBackend};
use tokio_postgres::{Client, Statement};
use tracing::{debug, trace};

use crate::error::prepare_failed;

/// Prepares statements on one PostgreSQL session.
///
/// Prepared statements belong to the session that created them, so each
/// connection gets its own backend and cache.
#[derive(Clone)]
pub struct PgStatementBackend {
    client: Arc<Client>,
}

impl PgStatementBackend {
    /// Wrap a connected client.
    pub fn new(client: Arc<Client>) -> Self {
        Self { client }
    }

    /// The underlying client.
    pub fn client(&self) -> &Arc<Client> {
        &self.client
    }
}

#[async_trait]
impl StatementBackend for PgStatementBackend {
    type Handle = Statement;

    async fn prepare(&self, sql: &str) -> QueryResult<Statement> {
        debug!(sql = %sql, "Preparing statement");
        self.client
            .prepare(sql)
            .await
            .map_err(|e| prepare_failed(e, sql))
    }

    async fn close(&self, handle: &Statement) -> QueryResult<()> {
        // The server-side Close is sent when the last clone of the handle
        // drops, which happens once the cache lets go of its entry.
        trace!(params = handle.params().len(), "Releasing prepared statement");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "postgres"
    }
}

impl std::fmt::Debug for PgStatementBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgStatementBackend")
            .field("closed", &self.client.is_closed())
            .finish()
    }
}
