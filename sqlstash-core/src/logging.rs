//! Logging infrastructure for sqlstash.
//!
//! Structured logging controlled by the `SQLSTASH_DEBUG` environment variable.
//!
//! # Environment Variables
//!
//! - `SQLSTASH_DEBUG=true` / `SQLSTASH_DEBUG=1` - Enable debug logging
//! - `SQLSTASH_LOG_LEVEL=debug|info|warn|error|trace` - Set specific log level
//! - `SQLSTASH_LOG_FORMAT=json|pretty|compact` - Set output format (default: json)
//!
//! # Usage
//!
//! ```rust,no_run
//! use sqlstash_core::logging;
//!
//! // Initialize logging (call once at startup)
//! logging::init();
//! ```
//!
//! Inside the crate the standard tracing macros are used: `trace!` for cache
//! hits, `debug!` for misses and sweeps, `warn!` for close failures and
//! release anomalies, `error!` for a janitor sweep that panicked.

use std::env;
use std::sync::Once;

static INIT: Once = Once::new();

/// Check if debug logging is enabled via `SQLSTASH_DEBUG`.
///
/// Returns `true` if `SQLSTASH_DEBUG` is set to "true", "1", or "yes" (case-insensitive).
#[inline]
pub fn is_debug_enabled() -> bool {
    env::var("SQLSTASH_DEBUG")
        .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(false)
}

/// Get the configured log level from `SQLSTASH_LOG_LEVEL`.
///
/// Defaults to "debug" if `SQLSTASH_DEBUG` is enabled, otherwise "warn".
pub fn get_log_level() -> &'static str {
    let fallback = if is_debug_enabled() { "debug" } else { "warn" };
    match env::var("SQLSTASH_LOG_LEVEL") {
        Ok(level) => match level.to_lowercase().as_str() {
            "trace" => "trace",
            "debug" => "debug",
            "info" => "info",
            "warn" => "warn",
            "error" => "error",
            _ => fallback,
        },
        Err(_) => fallback,
    }
}

/// Get the configured log format from `SQLSTASH_LOG_FORMAT`.
pub fn get_log_format() -> &'static str {
    env::var("SQLSTASH_LOG_FORMAT")
        .map(|f| match f.to_lowercase().as_str() {
            "pretty" => "pretty",
            "compact" => "compact",
            _ => "json",
        })
        .unwrap_or("json")
}

/// Initialize the sqlstash logging system.
///
/// Subsequent calls are no-ops. Nothing is installed unless `SQLSTASH_DEBUG`
/// or `SQLSTASH_LOG_LEVEL` is set, so applications with their own subscriber
/// are left alone.
pub fn init() {
    INIT.call_once(|| {
        if !is_debug_enabled() && env::var("SQLSTASH_LOG_LEVEL").is_err() {
            return;
        }

        #[cfg(feature = "tracing-subscriber")]
        {
            use tracing_subscriber::{EnvFilter, fmt, prelude::*};

            let level = get_log_level();
            let filter = EnvFilter::try_new(format!(
                "sqlstash={},sqlstash_core={},sqlstash_postgres={}",
                level, level, level
            ))
            .unwrap_or_else(|_| EnvFilter::new("warn"));

            // try_init: another subscriber may already be installed.
            let result = match get_log_format() {
                "json" => tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt::layer().json())
                    .try_init(),
                "compact" => tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt::layer().compact())
                    .try_init(),
                _ => tracing_subscriber::registry()
                    .with(filter)
                    .with(fmt::layer().pretty())
                    .try_init(),
            };

            if result.is_ok() {
                tracing::info!(
                    level = level,
                    format = get_log_format(),
                    "sqlstash logging initialized"
                );
            }
        }
    });
}

/// Initialize logging with a specific level.
///
/// # Safety
///
/// This function modifies environment variables, which is unsafe in
/// multi-threaded programs. Call this early in your program before
/// spawning threads.
pub fn init_with_level(level: &str) {
    // SAFETY: This should only be called at program startup before threads are spawned.
    unsafe {
        env::set_var("SQLSTASH_LOG_LEVEL", level);
    }
    init();
}

/// Macro for conditional debug logging.
///
/// Only logs if `SQLSTASH_DEBUG` is enabled at runtime.
#[macro_export]
macro_rules! stash_debug {
    ($($arg:tt)*) => {
        if $crate::logging::is_debug_enabled() {
            tracing::debug!($($arg)*);
        }
    };
}

/// Macro for conditional trace logging.
#[macro_export]
macro_rules! stash_trace {
    ($($arg:tt)*) => {
        if $crate::logging::is_debug_enabled() {
            tracing::trace!($($arg)*);
        }
    };
}
