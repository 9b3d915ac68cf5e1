//! Transaction coordinator.

use super::context::TransactionContext;
use super::scope::TransactionScope;
use super::state::{Transaction, TransactionStatus, TransactionSummary};
use super::{ActiveTransaction, TransactionRegistry};
use crate::access::ResourceAccessLayer;
use crate::config::CoordinatorConfig;
use crate::error::{CoreError, CoreResult};
use crate::lock::{SchedulingAlgorithm, TwoPhaseLockingScheduler};
use crate::oplog::OperationLog;
use crate::retry;
use crate::rollback::RollbackManager;
use crate::stats::{CoordinatorStats, StatsSnapshot};
use crate::types::TransactionId;
use crate::version::VersionTracker;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tandem_store::ConnectionProvider;
use tracing::{debug, error, info, warn};

/// Coordinates transactions across independently committing stores.
///
/// The coordinator provides:
/// - Begin: one manual-commit connection per configured store
/// - Commit: two-phase commit across the stores a transaction touched
/// - Rollback: physical rollback plus log-based compensation
/// - Lock release through the scheduler on every terminal path
///
/// ## Commit protocol
///
/// `commit` moves the transaction to `PREPARING` and checks that every
/// touched store's connection is still usable. A failed check rolls every
/// store back, compensates and ends `ABORTED`. Otherwise the stores commit
/// in first-touched order. If a store fails after another already
/// committed, the coordinator compensates what it can, ends `ABORTED` and
/// reports [`CoreError::CommitInconsistency`].
pub struct TransactionCoordinator {
    provider: Arc<dyn ConnectionProvider>,
    scheduler: Arc<dyn SchedulingAlgorithm>,
    log: Arc<OperationLog>,
    versions: Arc<VersionTracker>,
    registry: Arc<TransactionRegistry>,
    stats: Arc<CoordinatorStats>,
    access: ResourceAccessLayer,
    rollback_manager: RollbackManager,
    config: CoordinatorConfig,
    history: Mutex<VecDeque<TransactionSummary>>,
    next_txid: AtomicU64,
}

impl std::fmt::Debug for TransactionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionCoordinator")
            .field("scheduler", &self.scheduler.name())
            .field("stores", &self.provider.store_names())
            .field("active", &self.registry.ids())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl TransactionCoordinator {
    /// Creates a coordinator using strict two-phase locking.
    pub fn new(provider: Arc<dyn ConnectionProvider>, config: CoordinatorConfig) -> Self {
        Self::with_scheduler(provider, Arc::new(TwoPhaseLockingScheduler::new()), config)
    }

    /// Creates a coordinator with a custom scheduling algorithm.
    pub fn with_scheduler(
        provider: Arc<dyn ConnectionProvider>,
        scheduler: Arc<dyn SchedulingAlgorithm>,
        config: CoordinatorConfig,
    ) -> Self {
        let log = Arc::new(OperationLog::new());
        let versions = Arc::new(VersionTracker::new());
        let registry = Arc::new(TransactionRegistry::default());
        let stats = Arc::new(CoordinatorStats::new());

        let access = ResourceAccessLayer::new(
            Arc::clone(&scheduler),
            Arc::clone(&log),
            Arc::clone(&versions),
            Arc::clone(&registry),
            Arc::clone(&provider),
            config.execution_failure_policy,
            Arc::clone(&stats),
        );
        let rollback_manager = RollbackManager::new(
            Arc::clone(&log),
            Arc::clone(&versions),
            Arc::clone(&provider),
            Arc::clone(&stats),
        );

        Self {
            provider,
            scheduler,
            log,
            versions,
            registry,
            stats,
            access,
            rollback_manager,
            config,
            history: Mutex::new(VecDeque::new()),
            next_txid: AtomicU64::new(1),
        }
    }

    /// Begins a transaction.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ConnectionFailed`] if a store connection cannot
    /// be opened. Connections opened before the failure are closed.
    pub fn begin(&self) -> CoreResult<TransactionId> {
        let id = TransactionId::new(self.next_txid.fetch_add(1, Ordering::SeqCst));
        let ctx = TransactionContext::open(self.provider.as_ref(), id)?;
        self.registry.insert(Transaction::new(id), ctx);
        self.stats.record_begin();
        info!(txn = %id, "transaction started");
        Ok(id)
    }

    /// Begins a transaction that rolls back when dropped uncommitted.
    ///
    /// # Errors
    ///
    /// Same as [`begin`](Self::begin).
    pub fn scope(&self) -> CoreResult<TransactionScope<'_>> {
        TransactionScope::begin(self)
    }

    /// Commits a transaction with two-phase commit.
    ///
    /// The transaction is finished whether or not this succeeds: its locks
    /// are released and its connections closed.
    ///
    /// # Errors
    ///
    /// - [`CoreError::ProtocolViolation`] if `txn` is not active
    /// - [`CoreError::PrepareFailed`] if a touched store failed its liveness check
    /// - [`CoreError::CommitInconsistency`] if a store failed after another committed
    /// - [`CoreError::CompensationFailed`] if compensation after a failure failed
    pub fn commit(&self, txn: TransactionId) -> CoreResult<()> {
        let handle = self.registry.remove(txn).ok_or_else(|| {
            CoreError::protocol_violation(format!("commit of {txn}, which is not active"))
        })?;
        let mut active = handle.lock();

        active.txn.transition(TransactionStatus::Preparing)?;
        self.scheduler.enter_shrinking(txn);
        let stores = self.log.affected_stores(txn);
        debug!(txn = %txn, stores = ?stores, "preparing");

        let result = self.two_phase_commit(&mut active, &stores);
        match &result {
            Ok(()) => {
                self.stats.record_commit();
                info!(txn = %txn, "transaction committed");
            }
            Err(e) => {
                self.stats.record_abort();
                warn!(txn = %txn, error = %e, "transaction aborted during commit");
            }
        }
        self.finish(&mut active, stores);
        result
    }

    /// Rolls back a transaction.
    ///
    /// Every connection is rolled back; a store whose physical rollback
    /// fails is logged and skipped. The operation log is then compensated.
    /// Rolling back a transaction that is no longer active does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::CompensationFailed`] if compensation fails. The
    /// transaction still ends and releases its locks.
    pub fn rollback(&self, txn: TransactionId) -> CoreResult<()> {
        let Some(handle) = self.registry.remove(txn) else {
            debug!(txn = %txn, "rollback of inactive transaction ignored");
            return Ok(());
        };
        let mut active = handle.lock();

        self.scheduler.enter_shrinking(txn);
        let stores = self.log.affected_stores(txn);
        if let Some(ctx) = active.ctx.as_mut() {
            ctx.rollback_all();
        }

        let result = self.rollback_manager.rollback(&mut active.txn).map(|_| ());
        if let Err(e) = &result {
            error!(txn = %txn, error = %e, "rollback could not compensate");
            if let Err(status_err) = active.txn.transition(TransactionStatus::Aborted) {
                debug!(txn = %txn, error = %status_err, "status unchanged");
            }
        }
        self.stats.record_rollback();
        self.finish(&mut active, stores);
        result
    }

    /// Runs `work` in a transaction, retrying on lock conflicts and deadlocks.
    ///
    /// Uses the coordinator's [`RetryConfig`](crate::RetryConfig).
    ///
    /// # Errors
    ///
    /// See [`retry::with_retry`](crate::retry::with_retry).
    pub fn run<T, F>(&self, action: &str, work: F) -> CoreResult<T>
    where
        F: FnMut(TransactionId) -> CoreResult<T>,
    {
        retry::with_retry(self, &self.config.retry, action, work)
    }

    fn two_phase_commit(
        &self,
        active: &mut ActiveTransaction,
        stores: &[String],
    ) -> CoreResult<()> {
        let txn = active.txn.id();
        let ctx = active.ctx.as_mut().ok_or_else(|| {
            CoreError::protocol_violation(format!("{txn} has no live connections"))
        })?;

        // Phase one: every touched store must still be usable.
        let mut unprepared = None;
        for store in stores {
            if !ctx.connection(store)?.is_valid() {
                unprepared = Some(store.clone());
                break;
            }
        }
        if let Some(store) = unprepared {
            warn!(txn = %txn, store = %store, "prepare failed; aborting");
            ctx.rollback_all();
            let compensated = self.rollback_manager.compensate(txn);
            active.txn.transition(TransactionStatus::Aborted)?;
            compensated?;
            return Err(CoreError::PrepareFailed { txn, store });
        }

        // Phase two: commit in first-touched order.
        let mut committed: Vec<String> = Vec::with_capacity(stores.len());
        for (index, store) in stores.iter().enumerate() {
            let failure = match ctx.connection(store) {
                Ok(conn) => conn.commit().err(),
                Err(e) => Some(tandem_store::StoreError::execution(e.to_string())),
            };
            let Some(failure) = failure else {
                committed.push(store.clone());
                continue;
            };

            // The failed store is rolled back too so its connection ends clean.
            for remaining in &stores[index..] {
                if let Ok(conn) = ctx.connection(remaining) {
                    if let Err(e) = conn.rollback() {
                        warn!(txn = %txn, store = %remaining, error = %e, "physical rollback failed");
                    }
                }
            }

            if committed.is_empty() {
                warn!(txn = %txn, store = %store, error = %failure, "commit failed before any store committed");
                let compensated = self.rollback_manager.compensate(txn);
                active.txn.transition(TransactionStatus::Aborted)?;
                compensated?;
                return Err(failure.into());
            }

            error!(
                txn = %txn,
                committed = ?committed,
                failed_store = %store,
                error = %failure,
                "commit inconsistency"
            );
            self.stats.record_commit_inconsistency();
            if let Err(e) = self.rollback_manager.compensate(txn) {
                error!(txn = %txn, error = %e, "best-effort compensation failed");
            }
            active.txn.transition(TransactionStatus::Aborted)?;
            return Err(CoreError::CommitInconsistency {
                txn,
                committed,
                failed_store: store.clone(),
                reason: failure.to_string(),
            });
        }

        active.txn.transition(TransactionStatus::Committed)?;
        self.versions.forget(txn);
        Ok(())
    }

    /// Releases locks and connections and records the outcome.
    fn finish(&self, active: &mut ActiveTransaction, stores: Vec<String>) {
        let txn = active.txn.id();
        if active.txn.status() == TransactionStatus::Committed {
            self.scheduler.on_transaction_commit(txn);
        } else {
            self.scheduler.on_transaction_abort(txn);
        }

        if let Some(mut ctx) = active.ctx.take() {
            ctx.release();
        }
        if !self.config.retain_log {
            self.log.clear(txn);
        }

        let summary = active.txn.summarize(stores);
        let mut history = self.history.lock();
        if self.config.history_capacity > 0 {
            while history.len() >= self.config.history_capacity {
                history.pop_front();
            }
            history.push_back(summary);
        }
    }

    /// Returns the status of a transaction, active or recently finished.
    pub fn status(&self, txn: TransactionId) -> Option<TransactionStatus> {
        if let Some(handle) = self.registry.get(txn) {
            return Some(handle.lock().txn.status());
        }
        self.summary(txn).map(|s| s.status)
    }

    /// Returns the summary of a finished transaction, if still retained.
    pub fn summary(&self, txn: TransactionId) -> Option<TransactionSummary> {
        self.history.lock().iter().rev().find(|s| s.id == txn).cloned()
    }

    /// Returns the ids of all active transactions.
    pub fn active_transactions(&self) -> Vec<TransactionId> {
        self.registry.ids()
    }

    /// Returns the resource access layer.
    pub fn access(&self) -> &ResourceAccessLayer {
        &self.access
    }

    /// Returns the rollback manager.
    pub fn rollback_manager(&self) -> &RollbackManager {
        &self.rollback_manager
    }

    /// Returns the scheduler.
    pub fn scheduler(&self) -> &Arc<dyn SchedulingAlgorithm> {
        &self.scheduler
    }

    /// Returns the operation log.
    pub fn log(&self) -> &Arc<OperationLog> {
        &self.log
    }

    /// Returns the version tracker.
    pub fn versions(&self) -> &Arc<VersionTracker> {
        &self.versions
    }

    /// Returns the configuration.
    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Returns a snapshot of the coordinator's statistics.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub(crate) fn record_retry(&self) {
        self.stats.record_retry();
    }
}
