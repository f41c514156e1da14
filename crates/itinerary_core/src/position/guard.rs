//! Group locking and transaction scope for position mutations.
//!
//! # Responsibility
//! - Serialize in-process operations whose affected-group sets overlap.
//! - Wrap each operation in one `IMMEDIATE` SQLite transaction.
//!
//! # Invariants
//! - Keys are acquired one at a time in ascending [`GroupKey`] order, so two
//!   operations can never wait on each other in a cycle.
//! - Lock waits are bounded; expiry yields `ConcurrencyAborted`.
//! - Leases release on drop, after the transaction has committed or rolled
//!   back.

use super::{Collection, GroupId, PositionError, PositionResult};
use crate::config::PositionConfig;
use log::debug;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::collections::BTreeSet;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Lock identity of one group. Ordering is the canonical acquisition order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupKey {
    pub collection: Collection,
    pub group: GroupId,
}

impl GroupKey {
    pub fn new(collection: Collection, group: GroupId) -> Self {
        Self { collection, group }
    }
}

/// Process-wide table of held group keys.
#[derive(Debug, Default)]
pub struct GroupLockTable {
    held: Mutex<BTreeSet<GroupKey>>,
    released: Condvar,
}

impl GroupLockTable {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Acquires every key in `keys`, waiting at most `timeout` in total.
    pub fn acquire(
        self: &Arc<Self>,
        keys: &BTreeSet<GroupKey>,
        timeout: Duration,
    ) -> PositionResult<GroupLease> {
        let deadline = Instant::now() + timeout;
        let mut lease = GroupLease {
            table: Arc::clone(self),
            keys: Vec::with_capacity(keys.len()),
        };
        let mut held = self.lock_held();
        for key in keys {
            while held.contains(key) {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    drop(held);
                    return Err(PositionError::ConcurrencyAborted(format!(
                        "timed out after {}ms waiting for {} group {}",
                        timeout.as_millis(),
                        key.collection,
                        key.group
                    )));
                }
                held = self
                    .released
                    .wait_timeout(held, remaining)
                    .unwrap_or_else(PoisonError::into_inner)
                    .0;
            }
            held.insert(*key);
            lease.keys.push(*key);
        }
        Ok(lease)
    }

    /// Whether `key` is currently held by any lease.
    pub fn is_held(&self, key: &GroupKey) -> bool {
        self.lock_held().contains(key)
    }

    fn lock_held(&self) -> MutexGuard<'_, BTreeSet<GroupKey>> {
        // The set stays consistent even if a holder panicked mid-operation.
        self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Keys held by one operation; released on drop.
#[derive(Debug)]
pub struct GroupLease {
    table: Arc<GroupLockTable>,
    keys: Vec<GroupKey>,
}

impl GroupLease {
    pub fn keys(&self) -> &[GroupKey] {
        &self.keys
    }
}

impl Drop for GroupLease {
    fn drop(&mut self) {
        if self.keys.is_empty() {
            return;
        }
        let mut held = self.table.lock_held();
        for key in &self.keys {
            held.remove(key);
        }
        drop(held);
        self.table.released.notify_all();
    }
}

/// Runs position mutations under group locks and one transaction.
///
/// Cloning shares the lock table; every connection that mutates the same
/// database in this process should use clones of one guard.
#[derive(Debug, Clone)]
pub struct ConcurrencyGuard {
    locks: Arc<GroupLockTable>,
    lock_timeout: Duration,
}

impl ConcurrencyGuard {
    pub fn new(lock_timeout: Duration) -> Self {
        Self::with_table(GroupLockTable::new(), lock_timeout)
    }

    pub fn from_config(config: &PositionConfig) -> Self {
        Self::new(Duration::from_millis(config.lock_timeout_ms))
    }

    pub fn with_table(locks: Arc<GroupLockTable>, lock_timeout: Duration) -> Self {
        Self {
            locks,
            lock_timeout,
        }
    }

    pub fn lock_table(&self) -> &Arc<GroupLockTable> {
        &self.locks
    }

    /// Builds the key set for `groups` of one collection.
    pub fn keys_for(
        collection: Collection,
        groups: impl IntoIterator<Item = GroupId>,
    ) -> BTreeSet<GroupKey> {
        groups
            .into_iter()
            .map(|group| GroupKey::new(collection, group))
            .collect()
    }

    /// Acquires `keys`, opens an `IMMEDIATE` transaction and runs `op`.
    ///
    /// Commits when `op` succeeds; rolls back on any error.
    pub fn run<T, F>(&self, conn: &Connection, keys: &BTreeSet<GroupKey>, op: F) -> PositionResult<T>
    where
        F: FnOnce(&Transaction<'_>) -> PositionResult<T>,
    {
        let lease = self.locks.acquire(keys, self.lock_timeout)?;
        debug!(
            "event=group_locks_acquired module=position status=ok keys={}",
            lease.keys().len()
        );
        let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
        let value = op(&tx)?;
        tx.commit()?;
        drop(lease);
        Ok(value)
    }
}
