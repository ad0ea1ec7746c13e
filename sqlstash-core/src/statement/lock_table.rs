//! Per-key mutual exclusion for the prepare path.
//!
//! Each key that is currently being prepared (or waited on) has one slot
//! holding an async mutex and a count of registered users. The slot is
//! removed when its last user leaves, so the table only ever holds keys with
//! a miss in flight.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::hash::StatementKey;

struct Slot {
    mutex: Arc<AsyncMutex<()>>,
    users: usize,
}

/// Lazily populated table of per-key locks.
#[derive(Default)]
pub(crate) struct KeyLockTable {
    slots: Mutex<HashMap<StatementKey, Slot>>,
}

impl KeyLockTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`.
    ///
    /// Cancel-safe: dropping the future while it waits unregisters the
    /// caller, and dropping the returned guard releases the lock.
    pub(crate) async fn lock(&self, key: StatementKey) -> KeyLockGuard<'_> {
        let mutex = {
            let mut slots = self.slots.lock();
            let slot = slots.entry(key).or_insert_with(|| Slot {
                mutex: Arc::new(AsyncMutex::new(())),
                users: 0,
            });
            slot.users += 1;
            Arc::clone(&slot.mutex)
        };

        let mut guard = KeyLockGuard {
            table: self,
            key,
            held: None,
        };
        guard.held = Some(mutex.lock_owned().await);
        guard
    }

    /// Number of keys with a registered user.
    pub(crate) fn len(&self) -> usize {
        self.slots.lock().len()
    }

    fn leave(&self, key: StatementKey) {
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.get_mut(&key) {
            slot.users -= 1;
            if slot.users == 0 {
                slots.remove(&key);
            }
        }
    }
}

/// Exclusive access to one key; released on drop.
pub(crate) struct KeyLockGuard<'a> {
    table: &'a KeyLockTable,
    key: StatementKey,
    held: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyLockGuard<'_> {
    fn drop(&mut self) {
        drop(self.held.take());
        self.table.leave(self.key);
    }
}
