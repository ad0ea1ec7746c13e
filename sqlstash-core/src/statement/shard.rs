//! One partition of the statement cache.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::Instant;

use super::entry::Entry;
use super::lock_table::{KeyLockGuard, KeyLockTable};
use crate::error::{QueryError, QueryResult};
use crate::hash::{Namespace, StatementKey};

/// Which tier an entry lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    /// Entries that proved reuse; evicted only when idle.
    Core,
    /// Newly prepared entries; evicted on the next sweep unless promoted or in use.
    Queue,
}

struct ShardState<H> {
    core: HashMap<StatementKey, Arc<Entry<H>>>,
    queue: HashMap<StatementKey, Arc<Entry<H>>>,
    closed: bool,
}

/// Outcome of sweeping one shard.
pub(crate) struct ShardSweep<H> {
    pub(crate) promoted: usize,
    pub(crate) decayed: usize,
    pub(crate) evicted_cold: Vec<Arc<Entry<H>>>,
    pub(crate) evicted_idle: Vec<Arc<Entry<H>>>,
}

/// Two maps behind one lock, plus the per-key lock table.
///
/// A key is in at most one of `core` and `queue`. The shard lock is never
/// held across an `.await`.
pub(crate) struct Shard<H> {
    state: RwLock<ShardState<H>>,
    locks: KeyLockTable,
}

impl<H> Shard<H> {
    pub(crate) fn new() -> Self {
        Self {
            state: RwLock::new(ShardState {
                core: HashMap::new(),
                queue: HashMap::new(),
                closed: false,
            }),
            locks: KeyLockTable::new(),
        }
    }

    /// Find and acquire a cached entry.
    ///
    /// Only takes the read lock; the acquire happens before it is dropped so
    /// a concurrent sweep cannot evict the entry in between.
    pub(crate) fn lookup(
        &self,
        key: StatementKey,
        namespace: Namespace,
        sql: &str,
    ) -> QueryResult<Option<Arc<Entry<H>>>> {
        let state = self.state.read();
        if state.closed {
            return Err(QueryError::cache_closed());
        }

        let Some(entry) = state.core.get(&key).or_else(|| state.queue.get(&key)) else {
            return Ok(None);
        };
        if !entry.matches(namespace, sql) {
            return Err(QueryError::key_collision(key.get(), entry.sql(), sql));
        }

        entry.acquire();
        Ok(Some(Arc::clone(entry)))
    }

    /// Serialize the miss path for `key`.
    pub(crate) async fn lock_key(&self, key: StatementKey) -> KeyLockGuard<'_> {
        self.locks.lock(key).await
    }

    /// Insert a freshly prepared entry into the queue.
    ///
    /// Hands the entry back if the shard was closed meanwhile.
    pub(crate) fn insert(&self, entry: Arc<Entry<H>>) -> Result<(), Arc<Entry<H>>> {
        let mut state = self.state.write();
        if state.closed {
            return Err(entry);
        }
        debug_assert!(!state.core.contains_key(&entry.key()));
        state.queue.insert(entry.key(), entry);
        Ok(())
    }

    /// One janitor pass: promote, decay or evict cold entries, evict idle core entries.
    ///
    /// Evicted entries are returned so their handles can be closed after the
    /// lock is dropped.
    pub(crate) fn sweep(&self, min_promote_count: u64, idle_ttl: Duration, now: Instant) -> ShardSweep<H> {
        let mut guard = self.state.write();
        let ShardState { core, queue, .. } = &mut *guard;
        let mut sweep = ShardSweep {
            promoted: 0,
            decayed: 0,
            evicted_cold: Vec::new(),
            evicted_idle: Vec::new(),
        };

        queue.retain(|key, entry| {
            if entry.hit_count() > min_promote_count {
                core.insert(*key, Arc::clone(entry));
                sweep.promoted += 1;
                false
            } else {
                true
            }
        });

        queue.retain(|_, entry| {
            if entry.in_use() == 0 {
                sweep.evicted_cold.push(Arc::clone(entry));
                false
            } else {
                entry.decay();
                sweep.decayed += 1;
                true
            }
        });

        core.retain(|_, entry| {
            if entry.in_use() == 0 && entry.idle_for(now) > idle_ttl {
                sweep.evicted_idle.push(Arc::clone(entry));
                false
            } else {
                true
            }
        });

        sweep
    }

    /// Mark the shard closed and take every entry out of it.
    pub(crate) fn close(&self) -> Vec<Arc<Entry<H>>> {
        let mut state = self.state.write();
        state.closed = true;
        let mut drained: Vec<_> = state.core.drain().map(|(_, entry)| entry).collect();
        drained.extend(state.queue.drain().map(|(_, entry)| entry));
        drained
    }

    pub(crate) fn tier_of(&self, key: StatementKey) -> Option<Tier> {
        let state = self.state.read();
        if state.core.contains_key(&key) {
            Some(Tier::Core)
        } else if state.queue.contains_key(&key) {
            Some(Tier::Queue)
        } else {
            None
        }
    }

    /// `(core, queue)` sizes.
    pub(crate) fn sizes(&self) -> (usize, usize) {
        let state = self.state.read();
        (state.core.len(), state.queue.len())
    }

    pub(crate) fn pending_locks(&self) -> usize {
        self.locks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SQL: &str = "SELECT 1";

    fn shard_with(key: u64) -> (Shard<u32>, Arc<Entry<u32>>) {
        let shard = Shard::new();
        let entry = Arc::new(Entry::new(
            key as u32,
            StatementKey::new(key),
            Namespace::Query,
            SQL,
            Instant::now(),
        ));
        shard.insert(Arc::clone(&entry)).unwrap();
        (shard, entry)
    }

    #[test]
    fn test_lookup_hit_and_miss() {
        let (shard, entry) = shard_with(1);
        let found = shard
            .lookup(StatementKey::new(1), Namespace::Query, SQL)
            .unwrap()
            .unwrap();
        assert!(Arc::ptr_eq(&found, &entry));
        assert_eq!(entry.in_use(), 2);
        assert_eq!(entry.hit_count(), 2);

        assert!(shard
            .lookup(StatementKey::new(2), Namespace::Query, SQL)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_lookup_detects_collision() {
        let (shard, entry) = shard_with(1);
        let err = shard
            .lookup(StatementKey::new(1), Namespace::Query, "SELECT 2")
            .unwrap_err();
        assert_eq!(err.code, crate::ErrorCode::KeyCollision);
        assert_eq!(entry.in_use(), 1);
    }

    #[test]
    fn test_sweep_promotes_hot_entries() {
        let (shard, entry) = shard_with(1);
        entry.acquire();
        entry.acquire();
        entry.release();
        entry.release();
        entry.release();

        let sweep = shard.sweep(2, Duration::from_secs(60), Instant::now());
        assert_eq!(sweep.promoted, 1);
        assert!(sweep.evicted_cold.is_empty());
        assert_eq!(shard.tier_of(StatementKey::new(1)), Some(Tier::Core));
    }

    #[test]
    fn test_sweep_evicts_unused_cold_entries() {
        let (shard, entry) = shard_with(1);
        entry.release();

        let sweep = shard.sweep(2, Duration::from_secs(60), Instant::now());
        assert_eq!(sweep.evicted_cold.len(), 1);
        assert_eq!(shard.tier_of(StatementKey::new(1)), None);
    }

    #[test]
    fn test_sweep_decays_in_use_cold_entries() {
        let (shard, entry) = shard_with(1);
        entry.acquire();
        entry.release();
        assert_eq!(entry.hit_count(), 2);

        let sweep = shard.sweep(2, Duration::from_secs(60), Instant::now());
        assert_eq!(sweep.decayed, 1);
        assert_eq!(entry.hit_count(), 1);
        assert_eq!(shard.tier_of(StatementKey::new(1)), Some(Tier::Queue));
    }

    #[test]
    fn test_close_drains_and_rejects() {
        let (shard, _entry) = shard_with(1);
        assert_eq!(shard.close().len(), 1);
        assert_eq!(shard.sizes(), (0, 0));

        let err = shard
            .lookup(StatementKey::new(1), Namespace::Query, SQL)
            .unwrap_err();
        assert!(err.is_cache_closed());

        let late = Arc::new(Entry::new(
            2,
            StatementKey::new(2),
            Namespace::Query,
            SQL,
            Instant::now(),
        ));
        assert!(shard.insert(late).is_err());
    }
}
