//! PostgreSQL connection wrapper.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use sqlstash_core::hooks::{HookChain, QueryOp};
use sqlstash_core::{CacheStats, Executor, QueryError, StatementCache};
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, NoTls, Row, Statement};
use tracing::{debug, error, info, warn};

use crate::backend::PgStatementBackend;
use crate::config::PgConfig;
use crate::error::{PgResult, from_postgres};

/// Query parameters.
pub type Params<'p> = &'p [&'p (dyn ToSql + Sync)];

/// A PostgreSQL session whose statements go through a [`StatementCache`].
///
/// Every query, execute and transaction control statement is reported to
/// the hooks the connection was built with.
pub struct PgConnection {
    client: Arc<Client>,
    executor: Executor<PgStatementBackend>,
    rollback_pending: AtomicBool,
}

impl PgConnection {
    /// Connect without hooks.
    pub async fn connect(config: &PgConfig) -> PgResult<Self> {
        Self::connect_with_hooks(config, HookChain::new()).await
    }

    /// Connect and report every call to `hooks`.
    pub async fn connect_with_hooks(config: &PgConfig, hooks: HookChain) -> PgResult<Self> {
        debug!(host = %config.host, port = config.port, database = %config.database, "Connecting to PostgreSQL");

        let (client, connection) = config.to_pg_config().connect(NoTls).await?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!(error = %e, "PostgreSQL connection terminated");
            }
        });

        if let Some(timeout) = config.statement_timeout {
            client
                .batch_execute(&format!("SET statement_timeout = {}", timeout.as_millis()))
                .await?;
        }

        let client = Arc::new(client);
        let backend = PgStatementBackend::new(Arc::clone(&client));
        let cache = StatementCache::new(backend, config.cache.clone())?;
        let executor = Executor::new(Arc::new(cache)).with_hooks(hooks);

        info!(
            host = %config.host,
            database = %config.database,
            shards = config.cache.shard_count,
            "Connected to PostgreSQL"
        );

        Ok(Self {
            client,
            executor,
            rollback_pending: AtomicBool::new(false),
        })
    }

    fn session(&self, in_tx: bool) -> Session<'_> {
        Session {
            client: &self.client,
            executor: &self.executor,
            in_tx,
        }
    }

    /// Roll back a transaction that was dropped without commit or rollback.
    async fn settle(&self) -> PgResult<()> {
        if self.rollback_pending.swap(false, Ordering::AcqRel) {
            warn!("Rolling back abandoned transaction");
            self.session(true).control(QueryOp::Rollback, "ROLLBACK").await?;
        }
        Ok(())
    }

    /// Prepare (or fetch from the cache) a statement without running it.
    pub async fn prepare(&self, sql: &str) -> PgResult<Statement> {
        self.settle().await?;
        self.session(false).prepare(sql).await
    }

    /// Execute a query and return all rows.
    pub async fn query(&self, sql: &str, params: Params<'_>) -> PgResult<Vec<Row>> {
        self.settle().await?;
        self.session(false).query(sql, params).await
    }

    /// Execute a query and return exactly one row.
    pub async fn query_one(&self, sql: &str, params: Params<'_>) -> PgResult<Row> {
        self.settle().await?;
        self.session(false).query_one(sql, params).await
    }

    /// Execute a query and return zero or one row.
    pub async fn query_opt(&self, sql: &str, params: Params<'_>) -> PgResult<Option<Row>> {
        self.settle().await?;
        self.session(false).query_opt(sql, params).await
    }

    /// Execute a statement and return the number of affected rows.
    pub async fn execute(&self, sql: &str, params: Params<'_>) -> PgResult<u64> {
        self.settle().await?;
        self.session(false).execute(sql, params).await
    }

    /// Execute a batch of statements in a single round-trip, bypassing the cache.
    pub async fn batch_execute(&self, sql: &str) -> PgResult<()> {
        self.settle().await?;
        self.session(false).batch_execute(sql).await
    }

    /// Begin a transaction.
    ///
    /// The transaction borrows the connection mutably, so nothing else runs
    /// on this session until it is committed, rolled back or dropped.
    pub async fn transaction(&mut self) -> PgResult<PgTransaction<'_>> {
        self.settle().await?;
        self.session(true).control(QueryOp::Begin, "BEGIN").await?;
        Ok(PgTransaction {
            conn: self,
            finished: false,
        })
    }

    /// Statement cache counters.
    pub fn cache_stats(&self) -> CacheStats {
        self.executor.cache().stats()
    }

    /// The statement cache of this session.
    pub fn cache(&self) -> &Arc<StatementCache<PgStatementBackend>> {
        self.executor.cache()
    }

    /// The executor, for running statements with a custom closure.
    pub fn executor(&self) -> &Executor<PgStatementBackend> {
        &self.executor
    }

    /// Get the underlying tokio-postgres client.
    ///
    /// Calls made directly on the client bypass the cache and hooks.
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Check whether the server connection has gone away.
    pub fn is_closed(&self) -> bool {
        self.client.is_closed()
    }

    /// Close the statement cache and drop the session.
    pub async fn close(self) {
        let stats = self.cache_stats();
        self.executor.cache().close().await;
        debug!(hits = stats.hits, misses = stats.misses, "PostgreSQL connection closed");
    }
}

impl std::fmt::Debug for PgConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgConnection")
            .field("executor", &self.executor)
            .field("closed", &self.client.is_closed())
            .finish()
    }
}

/// A PostgreSQL transaction.
///
/// Dropping it without [`commit`](Self::commit) or
/// [`rollback`](Self::rollback) rolls back before the connection's next call.
pub struct PgTransaction<'a> {
    conn: &'a mut PgConnection,
    finished: bool,
}

impl<'a> PgTransaction<'a> {
    fn session(&self) -> Session<'_> {
        self.conn.session(true)
    }

    /// Prepare (or fetch from the cache) a statement without running it.
    pub async fn prepare(&self, sql: &str) -> PgResult<Statement> {
        self.session().prepare(sql).await
    }

    /// Execute a query and return all rows.
    pub async fn query(&self, sql: &str, params: Params<'_>) -> PgResult<Vec<Row>> {
        self.session().query(sql, params).await
    }

    /// Execute a query and return exactly one row.
    pub async fn query_one(&self, sql: &str, params: Params<'_>) -> PgResult<Row> {
        self.session().query_one(sql, params).await
    }

    /// Execute a query and return zero or one row.
    pub async fn query_opt(&self, sql: &str, params: Params<'_>) -> PgResult<Option<Row>> {
        self.session().query_opt(sql, params).await
    }

    /// Execute a statement and return the number of affected rows.
    pub async fn execute(&self, sql: &str, params: Params<'_>) -> PgResult<u64> {
        self.session().execute(sql, params).await
    }

    /// Create a savepoint.
    pub async fn savepoint(&mut self, name: &str) -> PgResult<()> {
        debug!(name = %name, "Creating savepoint");
        self.session().batch_execute(&format!("SAVEPOINT {}", name)).await
    }

    /// Rollback to a savepoint.
    pub async fn rollback_to(&mut self, name: &str) -> PgResult<()> {
        debug!(name = %name, "Rolling back to savepoint");
        self.session()
            .batch_execute(&format!("ROLLBACK TO SAVEPOINT {}", name))
            .await
    }

    /// Release a savepoint.
    pub async fn release_savepoint(&mut self, name: &str) -> PgResult<()> {
        debug!(name = %name, "Releasing savepoint");
        self.session()
            .batch_execute(&format!("RELEASE SAVEPOINT {}", name))
            .await
    }

    /// Commit the transaction.
    pub async fn commit(mut self) -> PgResult<()> {
        self.finished = true;
        let result = self.session().control(QueryOp::Commit, "COMMIT").await;
        if result.is_err() {
            // A failed COMMIT leaves the session in the transaction.
            self.conn.rollback_pending.store(true, Ordering::Release);
        }
        result
    }

    /// Rollback the transaction.
    pub async fn rollback(mut self) -> PgResult<()> {
        self.finished = true;
        let result = self.session().control(QueryOp::Rollback, "ROLLBACK").await;
        if result.is_err() {
            self.conn.rollback_pending.store(true, Ordering::Release);
        }
        result
    }
}

impl Drop for PgTransaction<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.conn.rollback_pending.store(true, Ordering::Release);
        }
    }
}

/// The calls shared by connections and transactions.
struct Session<'a> {
    client: &'a Client,
    executor: &'a Executor<PgStatementBackend>,
    in_tx: bool,
}

impl Session<'_> {
    async fn prepare(&self, sql: &str) -> PgResult<Statement> {
        let stmt = self
            .executor
            .run(QueryOp::Prepare, sql, self.in_tx, |stmt| async move {
                Ok::<_, QueryError>((stmt, None))
            })
            .await?;
        Ok(stmt)
    }

    async fn query(&self, sql: &str, params: Params<'_>) -> PgResult<Vec<Row>> {
        let client = self.client;
        let rows = self
            .executor
            .run(QueryOp::Query, sql, self.in_tx, |stmt| async move {
                let rows = client.query(&stmt, params).await.map_err(from_postgres)?;
                Ok::<_, QueryError>((rows, None))
            })
            .await?;
        Ok(rows)
    }

    async fn query_one(&self, sql: &str, params: Params<'_>) -> PgResult<Row> {
        let client = self.client;
        let row = self
            .executor
            .run(QueryOp::QueryOne, sql, self.in_tx, |stmt| async move {
                let row = client.query_one(&stmt, params).await.map_err(from_postgres)?;
                Ok::<_, QueryError>((row, None))
            })
            .await?;
        Ok(row)
    }

    async fn query_opt(&self, sql: &str, params: Params<'_>) -> PgResult<Option<Row>> {
        let client = self.client;
        let row = self
            .executor
            .run(QueryOp::QueryOne, sql, self.in_tx, |stmt| async move {
                let row = client.query_opt(&stmt, params).await.map_err(from_postgres)?;
                Ok::<_, QueryError>((row, None))
            })
            .await?;
        Ok(row)
    }

    async fn execute(&self, sql: &str, params: Params<'_>) -> PgResult<u64> {
        let client = self.client;
        let count = self
            .executor
            .run(QueryOp::Execute, sql, self.in_tx, |stmt| async move {
                let count = client.execute(&stmt, params).await.map_err(from_postgres)?;
                Ok::<_, QueryError>((count, Some(count)))
            })
            .await?;
        Ok(count)
    }

    async fn batch_execute(&self, sql: &str) -> PgResult<()> {
        let call = async {
            self.client.batch_execute(sql).await.map_err(from_postgres)?;
            Ok::<_, QueryError>(((), None))
        };
        self.executor
            .run_uncached(QueryOp::Execute, sql, self.in_tx, call)
            .await?;
        Ok(())
    }

    async fn control(&self, op: QueryOp, sql: &str) -> PgResult<()> {
        debug!(op = %op, "Transaction control");
        let call = async {
            self.client.batch_execute(sql).await.map_err(from_postgres)?;
            Ok::<_, QueryError>(((), None))
        };
        self.executor.run_uncached(op, sql, true, call).await?;
        Ok(())
    }
}
