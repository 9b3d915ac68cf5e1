//! Strict two-phase locking scheduler.

use super::deadlock::DeadlockDetector;
use super::{LockEntry, LockMode, LockPhase};
use crate::error::{CoreError, CoreResult};
use crate::oplog::Operation;
use crate::types::{ResourceKey, TransactionId};
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::{debug, warn};

/// A concurrency-control algorithm consulted before every operation.
///
/// Lock requests never block. `can_execute` returns `Ok(true)` when the
/// operation may run, `Ok(false)` when it conflicts and the caller should
/// abort or retry, and an error when the request is fatal for this attempt
/// (deadlock or protocol violation).
pub trait SchedulingAlgorithm: Send + Sync {
    /// Human-readable algorithm name.
    fn name(&self) -> &'static str;

    /// Requests the lock `operation` needs on behalf of `txn`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Deadlock`] if the request closes a wait-for
    /// cycle, or [`CoreError::ProtocolViolation`] if `txn` already entered
    /// its shrinking phase.
    fn can_execute(&self, txn: TransactionId, operation: &Operation) -> CoreResult<bool>;

    /// Called after an operation executed successfully.
    fn on_operation_complete(&self, txn: TransactionId, operation: &Operation);

    /// Moves `txn` into its shrinking phase. Further requests are rejected.
    fn enter_shrinking(&self, txn: TransactionId);

    /// Releases everything `txn` holds after a commit.
    fn on_transaction_commit(&self, txn: TransactionId);

    /// Releases everything `txn` holds after an abort or rollback.
    fn on_transaction_abort(&self, txn: TransactionId);

    /// Returns the locks `txn` currently holds.
    fn locks_held(&self, txn: TransactionId) -> Vec<LockEntry>;

    /// Returns every granted lock.
    fn lock_snapshot(&self) -> Vec<LockEntry>;

    /// Returns the locking phase of `txn`, if it has one.
    fn phase(&self, txn: TransactionId) -> Option<LockPhase>;
}

#[derive(Debug, Clone, Copy)]
struct Lock {
    txn: TransactionId,
    mode: LockMode,
}

/// Lock table, wait-for graph and phase markers, always mutated together.
#[derive(Debug, Default)]
struct LockState {
    table: HashMap<ResourceKey, Vec<Lock>>,
    detector: DeadlockDetector,
    phases: HashMap<TransactionId, LockPhase>,
}

impl LockState {
    fn release(&mut self, txn: TransactionId) -> usize {
        self.phases.insert(txn, LockPhase::Shrinking);

        let mut released = 0;
        for locks in self.table.values_mut() {
            let before = locks.len();
            locks.retain(|l| l.txn != txn);
            released += before - locks.len();
        }
        self.table.retain(|_, locks| !locks.is_empty());

        self.detector.remove_transaction(txn);
        self.phases.remove(&txn);
        released
    }
}

/// Strict two-phase locking.
///
/// Locks are acquired per [`ResourceKey`] in shared or exclusive mode and
/// held until the transaction commits or aborts. Lock table, deadlock
/// graph and phase markers live behind a single mutex so acquire, release
/// and detection are linearizable relative to each other.
///
/// # Acquisition rules
///
/// 1. Already holding EXCLUSIVE on the key: granted.
/// 2. Holding SHARED, requesting SHARED: granted.
/// 3. Holding SHARED, requesting EXCLUSIVE: upgraded in place if no other
///    transaction holds the key, else denied.
/// 4. Holding nothing: granted if compatible with every other holder.
///    Otherwise a wait-for edge to each blocking holder is recorded and
///    the graph is checked for a cycle through the requester. A cycle the
///    requester merely waits on is reported to its members, not to it.
#[derive(Debug, Default)]
pub struct TwoPhaseLockingScheduler {
    state: Mutex<LockState>,
}

impl TwoPhaseLockingScheduler {
    /// Creates a scheduler with an empty lock table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of resource keys with at least one lock.
    pub fn locked_resources(&self) -> usize {
        self.state.lock().table.len()
    }

    /// Returns the transaction `txn` is recorded as waiting for.
    pub fn waits_for(&self, txn: TransactionId) -> Option<TransactionId> {
        self.state.lock().detector.waits_for(txn)
    }

    fn try_acquire(
        &self,
        txn: TransactionId,
        mode: LockMode,
        resource: &ResourceKey,
    ) -> CoreResult<bool> {
        let mut guard = self.state.lock();
        let LockState {
            table,
            detector,
            phases,
        } = &mut *guard;

        if *phases.entry(txn).or_insert(LockPhase::Growing) == LockPhase::Shrinking {
            return Err(CoreError::protocol_violation(format!(
                "{txn} requested {mode} on {resource} in its shrinking phase"
            )));
        }

        let holders = table.get(resource).map(Vec::as_slice).unwrap_or_default();

        if let Some(own) = holders.iter().find(|l| l.txn == txn) {
            return Ok(match (own.mode, mode) {
                (LockMode::Exclusive, _) | (LockMode::Shared, LockMode::Shared) => true,
                (LockMode::Shared, LockMode::Exclusive) => {
                    let shared_with_others = holders.iter().any(|l| l.txn != txn);
                    if shared_with_others {
                        debug!(txn = %txn, resource = %resource, "lock upgrade denied");
                        false
                    } else {
                        if let Some(locks) = table.get_mut(resource) {
                            for lock in locks.iter_mut().filter(|l| l.txn == txn) {
                                lock.mode = LockMode::Exclusive;
                            }
                        }
                        debug!(txn = %txn, resource = %resource, "lock upgraded");
                        true
                    }
                }
            });
        }

        let blockers: Vec<TransactionId> = holders
            .iter()
            .filter(|l| !mode.is_compatible_with(l.mode))
            .map(|l| l.txn)
            .collect();

        if blockers.is_empty() {
            table
                .entry(resource.clone())
                .or_default()
                .push(Lock { txn, mode });
            detector.clear_wait(txn);
            debug!(txn = %txn, resource = %resource, mode = %mode, "lock granted");
            return Ok(true);
        }

        for holder in blockers {
            detector.add_wait_for(txn, holder);
            if let Some(cycle) = detector.cycle_through(txn) {
                warn!(txn = %txn, resource = %resource, ?cycle, "deadlock detected");
                return Err(CoreError::Deadlock { txn, cycle });
            }
        }

        debug!(
            txn = %txn,
            resource = %resource,
            mode = %mode,
            waits_for = ?detector.waits_for(txn),
            "lock denied"
        );
        Ok(false)
    }

    fn release_all(&self, txn: TransactionId, outcome: &'static str) {
        let released = self.state.lock().release(txn);
        debug!(txn = %txn, released, outcome, "locks released");
    }
}

impl SchedulingAlgorithm for TwoPhaseLockingScheduler {
    fn name(&self) -> &'static str {
        "Two-Phase Locking (2PL)"
    }

    fn can_execute(&self, txn: TransactionId, operation: &Operation) -> CoreResult<bool> {
        self.try_acquire(
            txn,
            operation.op_type().lock_mode(),
            &operation.resource_key(),
        )
    }

    fn on_operation_complete(&self, _txn: TransactionId, _operation: &Operation) {
        // Strict 2PL releases nothing before the transaction ends.
    }

    fn enter_shrinking(&self, txn: TransactionId) {
        self.state.lock().phases.insert(txn, LockPhase::Shrinking);
    }

    fn on_transaction_commit(&self, txn: TransactionId) {
        self.release_all(txn, "commit");
    }

    fn on_transaction_abort(&self, txn: TransactionId) {
        self.release_all(txn, "abort");
    }

    fn locks_held(&self, txn: TransactionId) -> Vec<LockEntry> {
        let state = self.state.lock();
        let mut held: Vec<LockEntry> = state
            .table
            .iter()
            .flat_map(|(resource, locks)| {
                locks.iter().filter(|l| l.txn == txn).map(|l| LockEntry {
                    resource: resource.clone(),
                    txn: l.txn,
                    mode: l.mode,
                })
            })
            .collect();
        held.sort_by(|a, b| a.resource.cmp(&b.resource));
        held
    }

    fn lock_snapshot(&self) -> Vec<LockEntry> {
        let state = self.state.lock();
        let mut all: Vec<LockEntry> = state
            .table
            .iter()
            .flat_map(|(resource, locks)| {
                locks.iter().map(|l| LockEntry {
                    resource: resource.clone(),
                    txn: l.txn,
                    mode: l.mode,
                })
            })
            .collect();
        all.sort_by(|a, b| a.resource.cmp(&b.resource).then(a.txn.cmp(&b.txn)));
        all
    }

    fn phase(&self, txn: TransactionId) -> Option<LockPhase> {
        self.state.lock().phases.get(&txn).copied()
    }
}
