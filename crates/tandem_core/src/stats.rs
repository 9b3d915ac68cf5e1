//! Coordinator statistics.
//!
//! Counters are updated by the coordinator, the resource access layer, the
//! rollback manager and the retry wrapper.
//!
//! # Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use tandem_core::{CoordinatorConfig, TransactionCoordinator};
//! use tandem_store::InMemoryProvider;
//!
//! let coordinator =
//!     TransactionCoordinator::new(Arc::new(InMemoryProvider::new()), CoordinatorConfig::default());
//! let txn = coordinator.begin().unwrap();
//! coordinator.commit(txn).unwrap();
//!
//! let stats = coordinator.stats();
//! assert_eq!(stats.transactions_begun, 1);
//! assert_eq!(stats.transactions_committed, 1);
//! ```

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Coordinator statistics.
///
/// All counters are atomic and monotonically increasing.
#[derive(Debug, Default)]
pub struct CoordinatorStats {
    transactions_begun: AtomicU64,
    transactions_committed: AtomicU64,
    transactions_aborted: AtomicU64,
    transactions_rolled_back: AtomicU64,
    lock_conflicts: AtomicU64,
    deadlocks: AtomicU64,
    retries: AtomicU64,
    compensations: AtomicU64,
    commit_inconsistencies: AtomicU64,
}

impl CoordinatorStats {
    /// Creates a new stats instance.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // === Increment methods (internal use) ===

    pub(crate) fn record_begin(&self) {
        self.transactions_begun.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_commit(&self) {
        self.transactions_committed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_abort(&self) {
        self.transactions_aborted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rollback(&self) {
        self.transactions_rolled_back.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_lock_conflict(&self) {
        self.lock_conflicts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_deadlock(&self) {
        self.deadlocks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_compensation(&self, operations: u64) {
        self.compensations.fetch_add(operations, Ordering::Relaxed);
    }

    pub(crate) fn record_commit_inconsistency(&self) {
        self.commit_inconsistencies.fetch_add(1, Ordering::Relaxed);
    }

    // === Getter methods (public API) ===

    /// Returns the number of transactions begun.
    pub fn transactions_begun(&self) -> u64 {
        self.transactions_begun.load(Ordering::Relaxed)
    }

    /// Returns the number of transactions committed.
    pub fn transactions_committed(&self) -> u64 {
        self.transactions_committed.load(Ordering::Relaxed)
    }

    /// Returns the number of transactions that ended aborted during commit.
    pub fn transactions_aborted(&self) -> u64 {
        self.transactions_aborted.load(Ordering::Relaxed)
    }

    /// Returns the number of explicit rollbacks.
    pub fn transactions_rolled_back(&self) -> u64 {
        self.transactions_rolled_back.load(Ordering::Relaxed)
    }

    /// Returns the number of denied lock requests without a deadlock.
    pub fn lock_conflicts(&self) -> u64 {
        self.lock_conflicts.load(Ordering::Relaxed)
    }

    /// Returns the number of detected deadlocks.
    pub fn deadlocks(&self) -> u64 {
        self.deadlocks.load(Ordering::Relaxed)
    }

    /// Returns the number of retried attempts.
    pub fn retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }

    /// Returns the number of operations compensated.
    pub fn compensations(&self) -> u64 {
        self.compensations.load(Ordering::Relaxed)
    }

    /// Returns the number of commit inconsistencies.
    pub fn commit_inconsistencies(&self) -> u64 {
        self.commit_inconsistencies.load(Ordering::Relaxed)
    }

    /// Returns a snapshot of all stats.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            transactions_begun: self.transactions_begun(),
            transactions_committed: self.transactions_committed(),
            transactions_aborted: self.transactions_aborted(),
            transactions_rolled_back: self.transactions_rolled_back(),
            lock_conflicts: self.lock_conflicts(),
            deadlocks: self.deadlocks(),
            retries: self.retries(),
            compensations: self.compensations(),
            commit_inconsistencies: self.commit_inconsistencies(),
        }
    }
}

/// A point-in-time snapshot of coordinator statistics.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct StatsSnapshot {
    /// Transactions begun.
    pub transactions_begun: u64,
    /// Transactions committed.
    pub transactions_committed: u64,
    /// Transactions that ended aborted during commit.
    pub transactions_aborted: u64,
    /// Explicit rollbacks.
    pub transactions_rolled_back: u64,
    /// Denied lock requests without a deadlock.
    pub lock_conflicts: u64,
    /// Detected deadlocks.
    pub deadlocks: u64,
    /// Retried attempts.
    pub retries: u64,
    /// Operations compensated.
    pub compensations: u64,
    /// Commit inconsistencies.
    pub commit_inconsistencies: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_stats_are_zero() {
        assert_eq!(CoordinatorStats::new().snapshot(), StatsSnapshot::default());
    }

    #[test]
    fn record_and_snapshot() {
        let stats = CoordinatorStats::new();
        stats.record_begin();
        stats.record_begin();
        stats.record_commit();
        stats.record_rollback();
        stats.record_lock_conflict();
        stats.record_deadlock();
        stats.record_retry();
        stats.record_compensation(3);

        let snap = stats.snapshot();
        assert_eq!(snap.transactions_begun, 2);
        assert_eq!(snap.transactions_committed, 1);
        assert_eq!(snap.transactions_rolled_back, 1);
        assert_eq!(snap.lock_conflicts, 1);
        assert_eq!(snap.deadlocks, 1);
        assert_eq!(snap.retries, 1);
        assert_eq!(snap.compensations, 3);
        assert_eq!(snap.commit_inconsistencies, 0);
    }

    #[test]
    fn concurrent_updates() {
        use std::sync::Arc;
        use std::thread;

        let stats = Arc::new(CoordinatorStats::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let stats = Arc::clone(&stats);
                thread::spawn(move || {
                    for _ in 0..100 {
                        stats.record_lock_conflict();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(stats.lock_conflicts(), 800);
    }
}
