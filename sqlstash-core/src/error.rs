//! Error types for cache and execution operations with actionable messages.
//!
//! Every error carries an [`ErrorCode`] for programmatic handling, a message,
//! optional context (operation, SQL, suggestions) and an optional source.
//!
//! # Error Codes
//!
//! Error codes follow a pattern: P{category}{number}
//! - 1xxx: Statement cache errors (closed, key collision, prepare/close)
//! - 3xxx: Connection errors
//! - 4xxx: Transaction errors
//! - 5xxx: Execution errors (timeout, syntax, params)
//! - 7xxx: Configuration errors
//! - 9xxx: Internal errors
//!
//! ```rust
//! use sqlstash_core::{ErrorCode, QueryError};
//!
//! let err = QueryError::cache_closed();
//! assert_eq!(err.code, ErrorCode::CacheClosed);
//! assert_eq!(err.code.code(), "P1001");
//! ```

use std::fmt;
use thiserror::Error;

/// Result type for cache and query operations.
pub type QueryResult<T> = Result<T, QueryError>;

/// Error codes for programmatic error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // Statement cache errors (1xxx)
    /// The cache was closed (P1001).
    CacheClosed = 1001,
    /// Two distinct statements produced the same cache key (P1002).
    KeyCollision = 1002,
    /// The backend failed to prepare a statement (P1003).
    PrepareFailed = 1003,
    /// The backend failed to close a statement (P1004).
    CloseFailed = 1004,
    /// No async runtime is available to run the janitor (P1005).
    RuntimeUnavailable = 1005,

    // Connection errors (3xxx)
    /// Database connection failed (P3001).
    ConnectionFailed = 3001,
    /// Connection timeout (P3003).
    ConnectionTimeout = 3003,

    // Transaction errors (4xxx)
    /// Transaction failed (P4001).
    TransactionFailed = 4001,
    /// Transaction already committed/rolled back (P4004).
    TransactionClosed = 4004,

    // Query execution errors (5xxx)
    /// Query timeout (P5001).
    QueryTimeout = 5001,
    /// SQL syntax error (P5002).
    SqlSyntax = 5002,
    /// Invalid parameter (P5003).
    InvalidParameter = 5003,
    /// General database error (P5005).
    DatabaseError = 5005,

    // Configuration errors (7xxx)
    /// Invalid configuration (P7001).
    InvalidConfiguration = 7001,
    /// Missing configuration (P7002).
    MissingConfiguration = 7002,

    // Internal errors (9xxx)
    /// Internal error (P9001).
    Internal = 9001,
    /// Unknown error (P9999).
    Unknown = 9999,
}

impl ErrorCode {
    /// Get the error code string (e.g., "P1001").
    pub fn code(&self) -> String {
        format!("P{}", *self as u16)
    }

    /// Get a short description of the error code.
    pub fn description(&self) -> &'static str {
        match self {
            Self::CacheClosed => "Statement cache closed",
            Self::KeyCollision => "Statement cache key collision",
            Self::PrepareFailed => "Statement prepare failed",
            Self::CloseFailed => "Statement close failed",
            Self::RuntimeUnavailable => "Async runtime unavailable",
            Self::ConnectionFailed => "Database connection failed",
            Self::ConnectionTimeout => "Connection timeout",
            Self::TransactionFailed => "Transaction failed",
            Self::TransactionClosed => "Transaction already closed",
            Self::QueryTimeout => "Query timeout",
            Self::SqlSyntax => "SQL syntax error",
            Self::InvalidParameter => "Invalid parameter",
            Self::DatabaseError => "Database error",
            Self::InvalidConfiguration => "Invalid configuration",
            Self::MissingConfiguration => "Missing configuration",
            Self::Internal => "Internal error",
            Self::Unknown => "Unknown error",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Suggestion for fixing an error.
#[derive(Debug, Clone)]
pub struct Suggestion {
    /// The suggestion text.
    pub text: String,
    /// Optional code example.
    pub code: Option<String>,
}

impl Suggestion {
    /// Create a new suggestion.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            code: None,
        }
    }

    /// Add a code example.
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

/// Additional context for an error.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    /// The operation that was being performed.
    pub operation: Option<String>,
    /// The SQL statement (if available).
    pub sql: Option<String>,
    /// The configuration key involved (if any).
    pub setting: Option<String>,
    /// Suggestions for fixing the error.
    pub suggestions: Vec<Suggestion>,
    /// Help text.
    pub help: Option<String>,
}

/// Errors that can occur during cache and query operations.
#[derive(Error, Debug)]
pub struct QueryError {
    /// The error code.
    pub code: ErrorCode,
    /// The error message.
    pub message: String,
    /// Additional context.
    pub context: ErrorContext,
    /// The source error (if any).
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code.code(), self.message)
    }
}

impl QueryError {
    /// Create a new error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            context: ErrorContext::default(),
            source: None,
        }
    }

    /// Add context about the operation.
    pub fn with_context(mut self, operation: impl Into<String>) -> Self {
        self.context.operation = Some(operation.into());
        self
    }

    /// Add a suggestion for fixing the error.
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.context.suggestions.push(Suggestion::new(suggestion));
        self
    }

    /// Add a code suggestion.
    pub fn with_code_suggestion(mut self, text: impl Into<String>, code: impl Into<String>) -> Self {
        self.context.suggestions.push(Suggestion::new(text).with_code(code));
        self
    }

    /// Add help text.
    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.context.help = Some(help.into());
        self
    }

    /// Set the SQL statement.
    pub fn with_sql(mut self, sql: impl Into<String>) -> Self {
        self.context.sql = Some(sql.into());
        self
    }

    /// Set the configuration key.
    pub fn with_setting(mut self, setting: impl Into<String>) -> Self {
        self.context.setting = Some(setting.into());
        self
    }

    /// Set the source error.
    pub fn with_source<E: std::error::Error + Send + Sync + 'static>(mut self, source: E) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    // ============== Constructor Functions ==============

    /// Create an error for an operation attempted after the cache was closed.
    pub fn cache_closed() -> Self {
        Self::new(ErrorCode::CacheClosed, "The statement cache has been closed")
            .with_suggestion("Do not use a connection after calling close()")
    }

    /// Create a key collision error.
    pub fn key_collision(key: u64, cached_sql: &str, requested_sql: &str) -> Self {
        Self::new(
            ErrorCode::KeyCollision,
            format!(
                "Cache key {:#018x} is already bound to a different statement: {}",
                key, cached_sql
            ),
        )
        .with_sql(requested_sql)
        .with_suggestion("Configure a stronger KeyHasher for this workload")
    }

    /// Create a prepare failure.
    pub fn prepare_failed(message: impl Into<String>, sql: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::PrepareFailed,
            format!("Failed to prepare statement: {}", message.into()),
        )
        .with_sql(sql)
    }

    /// Create a close failure.
    pub fn close_failed(message: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::CloseFailed,
            format!("Failed to close statement: {}", message.into()),
        )
    }

    /// Create an error for a missing async runtime.
    pub fn runtime_unavailable() -> Self {
        Self::new(
            ErrorCode::RuntimeUnavailable,
            "The statement cache janitor requires a running Tokio runtime",
        )
        .with_code_suggestion(
            "Create the cache inside a runtime, or disable the janitor",
            "CacheConfig::default().with_janitor_interval(Duration::ZERO)",
        )
    }

    /// Create an invalid configuration error.
    pub fn invalid_config(setting: impl Into<String>, message: impl Into<String>) -> Self {
        let setting = setting.into();
        Self::new(
            ErrorCode::InvalidConfiguration,
            format!("Invalid value for '{}': {}", setting, message.into()),
        )
        .with_setting(setting)
    }

    /// Create a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConnectionFailed, message.into())
            .with_suggestion("Check that the database server is running and reachable")
    }

    /// Create a timeout error.
    pub fn timeout(duration_ms: u64) -> Self {
        Self::new(
            ErrorCode::QueryTimeout,
            format!("Query timed out after {}ms", duration_ms),
        )
    }

    /// Create a transaction error.
    pub fn transaction(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::TransactionFailed, message.into())
    }

    /// Create a general database error.
    pub fn database(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::DatabaseError, message.into())
            .with_suggestion("Check the database logs for more details")
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, format!("Internal error: {}", message.into()))
    }

    // ============== Error Checks ==============

    /// Check if this error was raised because the cache is closed.
    pub fn is_cache_closed(&self) -> bool {
        self.code == ErrorCode::CacheClosed
    }

    /// Check if this is a timeout error.
    pub fn is_timeout(&self) -> bool {
        matches!(self.code, ErrorCode::QueryTimeout | ErrorCode::ConnectionTimeout)
    }

    /// Check if this is a connection error.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self.code,
            ErrorCode::ConnectionFailed | ErrorCode::ConnectionTimeout
        )
    }

    /// Check if this error is retryable.
    ///
    /// A failed prepare leaves no trace in the cache, so the next call
    /// prepares again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.code,
            ErrorCode::ConnectionTimeout | ErrorCode::QueryTimeout | ErrorCode::PrepareFailed
        )
    }

    /// Display the full error with all context and suggestions.
    pub fn display_full(&self) -> String {
        let mut output = String::new();

        output.push_str(&format!("Error [{}]: {}\n", self.code.code(), self.message));

        if let Some(ref op) = self.context.operation {
            output.push_str(&format!("  → While: {}\n", op));
        }
        if let Some(ref setting) = self.context.setting {
            output.push_str(&format!("  → Setting: {}\n", setting));
        }

        // SQL (truncated if too long)
        if let Some(ref sql) = self.context.sql {
            let sql_display = if sql.chars().count() > 200 {
                format!("{}...", sql.chars().take(200).collect::<String>())
            } else {
                sql.clone()
            };
            output.push_str(&format!("  → SQL: {}\n", sql_display));
        }

        if !self.context.suggestions.is_empty() {
            output.push_str("\nSuggestions:\n");
            for (i, suggestion) in self.context.suggestions.iter().enumerate() {
                output.push_str(&format!("  {}. {}\n", i + 1, suggestion.text));
                if let Some(ref code) = suggestion.code {
                    output.push_str(&format!(
                        "     ```\n     {}\n     ```\n",
                        code.replace('\n', "\n     ")
                    ));
                }
            }
        }

        if let Some(ref help) = self.context.help {
            output.push_str(&format!("\nHelp: {}\n", help));
        }

        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_format() {
        assert_eq!(ErrorCode::CacheClosed.code(), "P1001");
        assert_eq!(ErrorCode::ConnectionFailed.code(), "P3001");
        assert_eq!(ErrorCode::InvalidConfiguration.code(), "P7001");
    }

    #[test]
    fn test_cache_closed_error() {
        let err = QueryError::cache_closed();
        assert!(err.is_cache_closed());
        assert!(!err.is_retryable());
        assert!(!err.context.suggestions.is_empty());
    }

    #[test]
    fn test_key_collision_error() {
        let err = QueryError::key_collision(0xdead_beef, "SELECT 1", "SELECT 2");
        assert_eq!(err.code, ErrorCode::KeyCollision);
        assert!(err.message.contains("0x00000000deadbeef"));
        assert_eq!(err.context.sql.as_deref(), Some("SELECT 2"));
    }

    #[test]
    fn test_prepare_failed_is_retryable() {
        let err = QueryError::prepare_failed("syntax error at or near \"SELEC\"", "SELEC 1");
        assert!(err.is_retryable());
        assert!(err.message.contains("SELEC"));
    }

    #[test]
    fn test_timeout_error() {
        let err = QueryError::timeout(5000);
        assert!(err.is_timeout());
        assert!(err.message.contains("5000"));
    }

    #[test]
    fn test_invalid_config() {
        let err = QueryError::invalid_config("shard_count", "must be at least 1");
        assert_eq!(err.code, ErrorCode::InvalidConfiguration);
        assert_eq!(err.context.setting.as_deref(), Some("shard_count"));
    }

    #[test]
    fn test_display_full() {
        let err = QueryError::key_collision(7, "SELECT 1", "SELECT 2").with_context("Looking up statement");

        let output = err.display_full();
        assert!(output.contains("P1002"));
        assert!(output.contains("Looking up statement"));
        assert!(output.contains("SELECT 2"));
        assert!(output.contains("Suggestions"));
    }

    #[test]
    fn test_display_full_truncates_long_sql() {
        let sql = format!("SELECT {}", "x, ".repeat(200));
        let output = QueryError::database("boom").with_sql(sql).display_full();
        assert!(output.contains("..."));
    }

    #[test]
    fn test_suggestion_with_code() {
        let err = QueryError::runtime_unavailable();
        let suggestion = err.context.suggestions.last().unwrap();
        assert!(suggestion.code.is_some());
    }
}
