//! Error types for PostgreSQL operations.

use sqlstash_core::{ErrorCode, QueryError};
use thiserror::Error;

/// Result type for PostgreSQL operations.
pub type PgResult<T> = Result<T, PgError>;

/// Errors that can occur during PostgreSQL operations.
#[derive(Error, Debug)]
pub enum PgError {
    /// PostgreSQL error.
    #[error("postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Connection error.
    #[error("connection error: {0}")]
    Connection(String),

    /// Query execution error.
    #[error("query error: {0}")]
    Query(String),

    /// Statement cache or executor error.
    #[error("{0}")]
    Cache(#[from] QueryError),

    /// Timeout error.
    #[error("operation timed out after {0}ms")]
    Timeout(u64),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl PgError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }

    /// Create a query error.
    pub fn query(message: impl Into<String>) -> Self {
        Self::Query(message.into())
    }

    /// Check if this is a connection error.
    pub fn is_connection_error(&self) -> bool {
        match self {
            Self::Connection(_) => true,
            Self::Postgres(e) => e.is_closed(),
            Self::Cache(e) => e.is_connection_error(),
            _ => false,
        }
    }

    /// Check if this is a timeout error.
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Timeout(_) => true,
            Self::Cache(e) => e.is_timeout(),
            _ => false,
        }
    }

    /// Check if the statement cache was closed.
    pub fn is_cache_closed(&self) -> bool {
        matches!(self, Self::Cache(e) if e.is_cache_closed())
    }
}

/// Map a driver error onto the error codes the cache and hooks understand.
pub(crate) fn from_postgres(err: tokio_postgres::Error) -> QueryError {
    if err.is_closed() {
        return QueryError::connection(err.to_string()).with_source(err);
    }

    let code = match err.code().map(|state| state.code()) {
        Some("42601") => ErrorCode::SqlSyntax,
        Some("57014") => ErrorCode::QueryTimeout,
        Some("22023") | Some("42P18") | Some("08P01") => ErrorCode::InvalidParameter,
        Some(state) if state.starts_with("08") => ErrorCode::ConnectionFailed,
        Some(state) if state.starts_with("40") => ErrorCode::TransactionFailed,
        _ => ErrorCode::DatabaseError,
    };
    QueryError::new(code, err.to_string()).with_source(err)
}

/// A prepare failure, keeping the driver error as the source.
pub(crate) fn prepare_failed(err: tokio_postgres::Error, sql: &str) -> QueryError {
    if err.is_closed() {
        return QueryError::connection(err.to_string()).with_source(err);
    }
    QueryError::prepare_failed(err.to_string(), sql).with_source(err)
}

impl From<PgError> for QueryError {
    fn from(err: PgError) -> Self {
        match err {
            PgError::Postgres(e) => from_postgres(e),
            PgError::Config(msg) => QueryError::new(ErrorCode::InvalidConfiguration, msg),
            PgError::Connection(msg) => QueryError::connection(msg),
            PgError::Query(msg) => QueryError::database(msg),
            PgError::Cache(e) => e,
            PgError::Timeout(ms) => QueryError::timeout(ms),
            PgError::Internal(msg) => QueryError::internal(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = PgError::config("invalid URL");
        assert!(matches!(err, PgError::Config(_)));

        let err = PgError::connection("connection refused");
        assert!(err.is_connection_error());

        let err = PgError::Timeout(5000);
        assert!(err.is_timeout());
    }

    #[test]
    fn test_into_query_error() {
        let query_err: QueryError = PgError::Timeout(1000).into();
        assert!(query_err.is_timeout());

        let query_err: QueryError = PgError::config("bad port").into();
        assert_eq!(query_err.code, ErrorCode::InvalidConfiguration);
    }

    #[test]
    fn test_cache_errors_pass_through() {
        let err = PgError::from(QueryError::cache_closed());
        assert!(err.is_cache_closed());
        assert_eq!(err.to_string(), QueryError::cache_closed().to_string());

        let back: QueryError = err.into();
        assert_eq!(back.code, ErrorCode::CacheClosed);
    }
}
