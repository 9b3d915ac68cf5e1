//! Log-based compensating rollback.
//!
//! Replays a transaction's operation log last-first and issues the inverse
//! of every executed write:
//!
//! | logged                 | compensation                                     |
//! |------------------------|--------------------------------------------------|
//! | INSERT                 | delete by the captured key                       |
//! | UPDATE                 | restore every before-image column except the key |
//! | DELETE                 | re-insert the before image, skipping if present  |
//! | READ, READ_FOR_UPDATE  | nothing                                          |
//!
//! Compensation runs on dedicated connections, one per store, which are
//! committed together once replay succeeds. The transaction's own locks are
//! still held while this happens.

use crate::error::{CoreError, CoreResult};
use crate::oplog::{Operation, OperationLog, OperationType};
use crate::stats::CoordinatorStats;
use crate::transaction::{Transaction, TransactionStatus};
use crate::types::TransactionId;
use crate::version::VersionTracker;
use std::collections::BTreeMap;
use std::sync::Arc;
use tandem_store::{ConnectionProvider, Expr, Statement, StoreConnection, Value};
use tracing::{debug, error, info, warn};

/// Applies compensating actions from the operation log.
pub struct RollbackManager {
    log: Arc<OperationLog>,
    versions: Arc<VersionTracker>,
    provider: Arc<dyn ConnectionProvider>,
    stats: Arc<CoordinatorStats>,
}

impl RollbackManager {
    pub(crate) fn new(
        log: Arc<OperationLog>,
        versions: Arc<VersionTracker>,
        provider: Arc<dyn ConnectionProvider>,
        stats: Arc<CoordinatorStats>,
    ) -> Self {
        Self {
            log,
            versions,
            provider,
            stats,
        }
    }

    /// Compensates `txn` and marks it rolled back.
    ///
    /// Returns the number of operations compensated.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::CompensationFailed`] if any compensating action
    /// fails, or [`CoreError::ProtocolViolation`] if the transaction cannot
    /// move to `ROLLED_BACK`.
    pub fn rollback(&self, txn: &mut Transaction) -> CoreResult<usize> {
        let compensated = self.compensate(txn.id())?;
        txn.transition(TransactionStatus::RolledBack)?;
        info!(txn = %txn.id(), compensated, "transaction rolled back");
        Ok(compensated)
    }

    /// Replays the log of `txn` in reverse and invalidates its versions.
    ///
    /// Operations already marked rolled back are skipped, so calling this
    /// twice compensates nothing the second time.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::CompensationFailed`] if any compensating action
    /// fails. Nothing is committed in that case.
    pub fn compensate(&self, txn: TransactionId) -> CoreResult<usize> {
        let pending: Vec<Arc<Operation>> = self
            .log
            .operations_in_reverse_order(txn)
            .into_iter()
            .filter(|op| op.is_executed() && !op.is_rolled_back())
            .collect();

        if pending.is_empty() {
            debug!(txn = %txn, "nothing to compensate");
            self.versions.invalidate_versions(txn);
            return Ok(0);
        }

        let mut connections: BTreeMap<String, Box<dyn StoreConnection>> = BTreeMap::new();
        let mut undone: Vec<Arc<Operation>> = Vec::new();

        let replay = self
            .replay(txn, &pending, &mut connections, &mut undone)
            .and_then(|()| commit_all(txn, &mut connections));

        for (store, conn) in &mut connections {
            if let Err(e) = conn.close() {
                warn!(txn = %txn, store = %store, error = %e, "failed to close compensation connection");
            }
        }

        if let Err(e) = replay {
            error!(txn = %txn, error = %e, "compensation failed");
            return Err(e);
        }

        for op in &undone {
            op.mark_rolled_back();
        }
        self.stats.record_compensation(undone.len() as u64);
        self.versions.invalidate_versions(txn);
        Ok(undone.len())
    }

    fn replay(
        &self,
        txn: TransactionId,
        pending: &[Arc<Operation>],
        connections: &mut BTreeMap<String, Box<dyn StoreConnection>>,
        undone: &mut Vec<Arc<Operation>>,
    ) -> CoreResult<()> {
        for op in pending {
            if self.undo(txn, op, connections)? {
                undone.push(Arc::clone(op));
            }
        }
        Ok(())
    }

    /// Applies the inverse of one operation. Returns false if it was skipped.
    fn undo(
        &self,
        txn: TransactionId,
        op: &Operation,
        connections: &mut BTreeMap<String, Box<dyn StoreConnection>>,
    ) -> CoreResult<bool> {
        let (statement, params) = match op.op_type() {
            OperationType::Read | OperationType::ReadForUpdate => return Ok(true),
            OperationType::Insert => {
                let key = op.key().ok_or_else(|| {
                    CoreError::compensation_failed(
                        txn,
                        format!("insert into {} has no captured key", op.table()),
                    )
                })?;
                let pk = self.primary_key(txn, op)?;
                (
                    Statement::delete_from(op.table()).filter_eq(pk, Expr::param(0)),
                    vec![key.clone()],
                )
            }
            OperationType::Update => {
                let (Some(before), Some(key)) = (op.before_image(), op.key()) else {
                    warn!(
                        txn = %txn,
                        op = %op.id(),
                        table = op.table(),
                        "update has no before image or key; skipping compensation"
                    );
                    return Ok(false);
                };
                let pk = self.primary_key(txn, op)?;
                let mut statement = Statement::update(op.table());
                let mut params: Vec<Value> = Vec::with_capacity(before.len());
                for (column, value) in before.iter().filter(|(c, _)| *c != pk) {
                    statement = statement.set(column, Expr::param(params.len()));
                    params.push(value.clone());
                }
                if params.is_empty() {
                    return Ok(true);
                }
                statement = statement.filter_eq(pk, Expr::param(params.len()));
                params.push(key.clone());
                (statement, params)
            }
            OperationType::Delete => {
                let before = op.before_image().ok_or_else(|| {
                    CoreError::compensation_failed(
                        txn,
                        format!("delete from {} has no before image", op.table()),
                    )
                })?;
                let mut statement = Statement::insert_into(op.table()).on_conflict_do_nothing();
                let mut params: Vec<Value> = Vec::with_capacity(before.len());
                for (column, value) in before.iter() {
                    statement = statement.set(column, Expr::param(params.len()));
                    params.push(value.clone());
                }
                (statement, params)
            }
        };

        let conn = self.compensation_connection(txn, op.store(), connections)?;
        let outcome = conn.execute(&statement, &params).map_err(|e| {
            CoreError::compensation_failed(txn, format!("{statement}: {e}"))
        })?;
        debug!(
            txn = %txn,
            op = %op.op_type(),
            store = op.store(),
            rows = outcome.rows_affected,
            statement = %statement,
            "compensated"
        );
        Ok(true)
    }

    fn compensation_connection<'a>(
        &self,
        txn: TransactionId,
        store: &str,
        connections: &'a mut BTreeMap<String, Box<dyn StoreConnection>>,
    ) -> CoreResult<&'a mut dyn StoreConnection> {
        if !connections.contains_key(store) {
            let mut conn = self.provider.connect(store).map_err(|e| {
                CoreError::compensation_failed(txn, format!("cannot connect to {store}: {e}"))
            })?;
            if conn.auto_commit() {
                conn.set_auto_commit(false).map_err(|e| {
                    CoreError::compensation_failed(txn, format!("{store}: {e}"))
                })?;
            }
            connections.insert(store.to_string(), conn);
        }
        match connections.get_mut(store) {
            Some(conn) => {
                let conn: &mut dyn StoreConnection = conn.as_mut();
                Ok(conn)
            }
            None => Err(CoreError::compensation_failed(
                txn,
                format!("no compensation connection for {store}"),
            )),
        }
    }

    fn primary_key(&self, txn: TransactionId, op: &Operation) -> CoreResult<String> {
        self.provider
            .metadata(op.store())
            .ok()
            .and_then(|meta| meta.primary_key(op.table()).map(str::to_string))
            .ok_or_else(|| {
                CoreError::compensation_failed(
                    txn,
                    format!("no primary key known for {}.{}", op.store(), op.table()),
                )
            })
    }
}

fn commit_all(
    txn: TransactionId,
    connections: &mut BTreeMap<String, Box<dyn StoreConnection>>,
) -> CoreResult<()> {
    for (store, conn) in connections.iter_mut() {
        conn.commit().map_err(|e| {
            CoreError::compensation_failed(txn, format!("commit on {store} failed: {e}"))
        })?;
    }
    Ok(())
}
