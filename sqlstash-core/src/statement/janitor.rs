//! Background task that rebalances and trims the cache.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::FutureExt;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error};

use super::cache::CacheInner;
use crate::backend::StatementBackend;

/// Handle to a running janitor task.
///
/// The task only holds a weak reference to the cache, so it also exits on
/// its next tick once the cache is gone.
pub(crate) struct Janitor {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl Janitor {
    pub(crate) fn spawn<B: StatementBackend>(inner: &Arc<CacheInner<B>>, runtime: &Handle) -> Self {
        let (shutdown, signal) = watch::channel(false);
        let period = inner.config().janitor_interval;
        let task = runtime.spawn(run(Arc::downgrade(inner), period, signal));
        debug!(interval_ms = period.as_millis() as u64, "statement cache janitor started");
        Self { shutdown, task }
    }

    /// Signal shutdown and wait for the task to finish its current sweep.
    pub(crate) async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(err) = self.task.await {
            if err.is_panic() {
                error!(error = %err, "statement cache janitor panicked");
            }
        }
    }

    /// Signal shutdown without waiting.
    ///
    /// The task is detached, not aborted: a sweep already running finishes
    /// closing the handles it evicted before the task exits.
    pub(crate) fn detach(self) {
        let _ = self.shutdown.send(true);
        drop(self.task);
    }
}

async fn run<B: StatementBackend>(
    cache: Weak<CacheInner<B>>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    // First sweep one full period after start.
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
            _ = ticker.tick() => {}
        }

        let Some(inner) = cache.upgrade() else {
            break;
        };
        if inner.is_closed() {
            break;
        }

        match AssertUnwindSafe(inner.sweep()).catch_unwind().await {
            Ok(report) if !report.is_noop() => {
                debug!(
                    promoted = report.promoted,
                    decayed = report.decayed,
                    evicted_cold = report.evicted_cold,
                    evicted_idle = report.evicted_idle,
                    close_failures = report.close_failures,
                    "janitor sweep"
                );
            }
            Ok(_) => {}
            Err(_) => error!("statement cache sweep panicked; janitor continues"),
        }
    }

    debug!("statement cache janitor stopped");
}
