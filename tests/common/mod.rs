//! Shared test backend for the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use sqlstash::{QueryError, QueryResult, StatementBackend};

/// A statement "prepared" by [`RecordingBackend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prepared {
    pub id: u64,
    pub sql: String,
}

/// Records every prepare and close; can stall or fail prepares.
#[derive(Default)]
pub struct RecordingBackend {
    next_id: AtomicU64,
    prepared: Mutex<HashMap<String, usize>>,
    closed: Mutex<Vec<u64>>,
    delay: Mutex<Option<Duration>>,
    fail: AtomicBool,
}

impl RecordingBackend {
    pub fn with_delay(delay: Duration) -> Self {
        let backend = Self::default();
        *backend.delay.lock() = Some(delay);
        backend
    }

    pub fn fail_prepares(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn prepares_of(&self, sql: &str) -> usize {
        self.prepared.lock().get(sql).copied().unwrap_or(0)
    }

    pub fn total_prepares(&self) -> usize {
        self.prepared.lock().values().sum()
    }

    pub fn closed(&self) -> Vec<u64> {
        self.closed.lock().clone()
    }
}

#[async_trait]
impl StatementBackend for RecordingBackend {
    type Handle = Prepared;

    async fn prepare(&self, sql: &str) -> QueryResult<Prepared> {
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(QueryError::prepare_failed("relation does not exist", sql));
        }
        *self.prepared.lock().entry(sql.to_string()).or_default() += 1;
        Ok(Prepared {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            sql: sql.to_string(),
        })
    }

    async fn close(&self, handle: &Prepared) -> QueryResult<()> {
        self.closed.lock().push(handle.id);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}
