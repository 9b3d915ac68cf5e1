//! Resource access layer.
//!
//! Every read and write a transaction issues goes through here:
//!
//! 1. Describe the operation and ask the scheduler for its lock
//! 2. Check the transaction's connection to the target store
//! 3. Execute the statement, capturing before and after images
//! 4. Mark the operation executed, log it and track the touched row
//!
//! A denied lock surfaces as [`CoreError::LockConflict`]. A write that
//! matches no rows is not logged and returns `0`. Updates and deletes
//! addressed to a whole table are expanded into one logged operation per
//! matching row, so every logged write carries a key and a before image.

use crate::config::ExecutionFailurePolicy;
use crate::error::{CoreError, CoreResult};
use crate::lock::SchedulingAlgorithm;
use crate::oplog::{Operation, OperationLog, OperationType};
use crate::stats::CoordinatorStats;
use crate::transaction::{
    ActiveTransaction, Transaction, TransactionContext, TransactionRegistry,
};
use crate::types::TransactionId;
use crate::version::VersionTracker;
use std::sync::Arc;
use tandem_store::{
    ConnectionProvider, Expr, KeyGeneration, Record, Statement, StoreConnection, StoreError,
    StoreResult, Value,
};
use tracing::{debug, warn};

/// The row or table an operation addresses.
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    /// Store name.
    pub store: String,
    /// Table name.
    pub table: String,
    /// Primary key of the row, if the operation addresses a single row.
    pub key: Option<Value>,
}

impl Target {
    /// Addresses one row by primary key.
    pub fn row(store: impl Into<String>, table: impl Into<String>, key: impl Into<Value>) -> Self {
        Self {
            store: store.into(),
            table: table.into(),
            key: Some(key.into()),
        }
    }

    /// Addresses a whole table.
    pub fn table(store: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            store: store.into(),
            table: table.into(),
            key: None,
        }
    }
}

/// Executes reads and writes under locks and records them.
///
/// Obtained from [`TransactionCoordinator::access`](crate::TransactionCoordinator::access).
pub struct ResourceAccessLayer {
    scheduler: Arc<dyn SchedulingAlgorithm>,
    log: Arc<OperationLog>,
    versions: Arc<VersionTracker>,
    registry: Arc<TransactionRegistry>,
    provider: Arc<dyn ConnectionProvider>,
    policy: ExecutionFailurePolicy,
    stats: Arc<CoordinatorStats>,
}

impl ResourceAccessLayer {
    pub(crate) fn new(
        scheduler: Arc<dyn SchedulingAlgorithm>,
        log: Arc<OperationLog>,
        versions: Arc<VersionTracker>,
        registry: Arc<TransactionRegistry>,
        provider: Arc<dyn ConnectionProvider>,
        policy: ExecutionFailurePolicy,
        stats: Arc<CoordinatorStats>,
    ) -> Self {
        Self {
            scheduler,
            log,
            versions,
            registry,
            provider,
            policy,
            stats,
        }
    }

    /// Runs a select under a shared lock.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::LockConflict`] or [`CoreError::Deadlock`] if the
    /// lock is denied, or a store error classified by the execution failure
    /// policy.
    pub fn read(
        &self,
        txn: TransactionId,
        target: &Target,
        statement: &Statement,
        params: &[Value],
    ) -> CoreResult<Vec<Record>> {
        self.run_query(txn, OperationType::Read, target, statement, params)
    }

    /// Runs a select under an exclusive lock.
    ///
    /// # Errors
    ///
    /// Same as [`read`](Self::read).
    pub fn read_for_update(
        &self,
        txn: TransactionId,
        target: &Target,
        statement: &Statement,
        params: &[Value],
    ) -> CoreResult<Vec<Record>> {
        self.run_query(txn, OperationType::ReadForUpdate, target, statement, params)
    }

    /// Runs an update and returns the number of rows it changed.
    ///
    /// If `before` is `None` and the target names a row, the before image
    /// is read through the transaction's own connection once the lock is
    /// held.
    ///
    /// A [`Target::table`] write first selects the rows its filter matches,
    /// locks each one exclusively and logs one operation per row with that
    /// row's before image. `before` is ignored in that case.
    ///
    /// # Errors
    ///
    /// Same as [`read`](Self::read). Zero affected rows is not an error.
    pub fn update(
        &self,
        txn: TransactionId,
        target: &Target,
        statement: &Statement,
        params: &[Value],
        before: Option<Record>,
    ) -> CoreResult<u64> {
        self.run_write(txn, OperationType::Update, target, statement, params, before)
    }

    /// Runs a delete and returns the number of rows it removed.
    ///
    /// The before image is captured the same way as for
    /// [`update`](Self::update).
    ///
    /// # Errors
    ///
    /// Same as [`read`](Self::read). Zero affected rows is not an error.
    pub fn delete(
        &self,
        txn: TransactionId,
        target: &Target,
        statement: &Statement,
        params: &[Value],
        before: Option<Record>,
    ) -> CoreResult<u64> {
        self.run_write(txn, OperationType::Delete, target, statement, params, before)
    }

    /// Runs an insert and returns the new row's primary key.
    ///
    /// For tables with supplied keys the first parameter is the key and the
    /// row is locked individually. For generated keys the table is locked
    /// and the key reported by the store is captured for undo.
    ///
    /// Returns `None` if the insert affected no rows.
    ///
    /// # Errors
    ///
    /// Same as [`read`](Self::read).
    pub fn insert(
        &self,
        txn: TransactionId,
        store: &str,
        table: &str,
        statement: &Statement,
        params: &[Value],
    ) -> CoreResult<Option<Value>> {
        let generation = self
            .provider
            .metadata(store)?
            .key_generation(table)
            .ok_or_else(|| unknown_table(store, table))?;
        let supplied = match generation {
            KeyGeneration::Supplied => Some(params.first().cloned().ok_or_else(|| {
                CoreError::Store(StoreError::MissingKey {
                    table: table.to_string(),
                    column: "first parameter".to_string(),
                })
            })?),
            KeyGeneration::Generated => None,
        };

        self.with_transaction(txn, |state, ctx| {
            let mut op = Operation::new(txn, OperationType::Insert, store, table, statement, params)
                .with_key(supplied.clone())
                .with_after_image(insert_payload(statement, params));
            self.acquire(txn, &op)?;

            let conn = checked_connection(txn, ctx, store)?;
            let outcome = conn
                .execute(statement, params)
                .map_err(|e| self.execution_failure(txn, &op, e))?;
            if outcome.rows_affected == 0 {
                debug!(txn = %txn, store, table, "insert affected no rows; not logged");
                return Ok(None);
            }

            let key = supplied.or(outcome.generated_key);
            match &key {
                Some(key) => {
                    if generation == KeyGeneration::Generated {
                        let pk = self.primary_key(store, table)?;
                        let payload = op
                            .after_image()
                            .cloned()
                            .map(|row| row.with(pk, key.clone()));
                        op.set_after_image(payload);
                    }
                    op.resolve_key(key.clone());
                }
                None => warn!(txn = %txn, store, table, "insert key unresolved; it cannot be undone"),
            }

            self.record(state, op)?;
            Ok(key)
        })
    }

    /// Reads the current image of a row through the transaction's connection.
    ///
    /// No lock is taken; the read sees the transaction's own pending writes.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ResourceNotFound`] if the row does not exist.
    pub fn fetch_before_image(
        &self,
        txn: TransactionId,
        store: &str,
        table: &str,
        key: &Value,
    ) -> CoreResult<Record> {
        self.with_transaction(txn, |_, ctx| {
            let conn = checked_connection(txn, ctx, store)?;
            self.fetch_row(conn, store, table, key)?.ok_or_else(|| {
                CoreError::resource_not_found(format!("{table} row {key} in store {store}"))
            })
        })
    }

    fn run_query(
        &self,
        txn: TransactionId,
        op_type: OperationType,
        target: &Target,
        statement: &Statement,
        params: &[Value],
    ) -> CoreResult<Vec<Record>> {
        self.with_transaction(txn, |state, ctx| {
            let op = Operation::new(txn, op_type, &target.store, &target.table, statement, params)
                .with_key(target.key.clone());
            self.acquire(txn, &op)?;

            let conn = checked_connection(txn, ctx, &target.store)?;
            let rows = conn
                .query(statement, params)
                .map_err(|e| self.execution_failure(txn, &op, e))?;

            self.record(state, op)?;
            Ok(rows)
        })
    }

    fn run_write(
        &self,
        txn: TransactionId,
        op_type: OperationType,
        target: &Target,
        statement: &Statement,
        params: &[Value],
        before: Option<Record>,
    ) -> CoreResult<u64> {
        if target.key.is_none() {
            return self.run_table_write(txn, op_type, target, statement, params);
        }
        self.with_transaction(txn, |state, ctx| {
            let mut op = Operation::new(txn, op_type, &target.store, &target.table, statement, params)
                .with_key(target.key.clone());
            self.acquire(txn, &op)?;

            let conn = checked_connection(txn, ctx, &target.store)?;
            let before = match (before, &target.key) {
                (Some(image), _) => Some(image),
                (None, Some(key)) => self
                    .fetch_row(conn, &target.store, &target.table, key)
                    .map_err(|e| self.execution_failure(txn, &op, e))?,
                (None, None) => None,
            };

            let outcome = conn
                .execute(statement, params)
                .map_err(|e| self.execution_failure(txn, &op, e))?;
            if outcome.rows_affected == 0 {
                debug!(
                    txn = %txn,
                    resource = %op.resource_key(),
                    op = %op_type,
                    "no rows affected; not logged"
                );
                return Ok(0);
            }

            let after = match (&target.key, op_type) {
                (Some(key), OperationType::Update) => self
                    .fetch_row(conn, &target.store, &target.table, key)
                    .map_err(|e| self.execution_failure(txn, &op, e))?,
                _ => None,
            };
            op.set_before_image(before);
            op.set_after_image(after);

            self.record(state, op)?;
            Ok(outcome.rows_affected)
        })
    }

    /// Runs an update or delete addressed to a whole table as one logged
    /// operation per matching row.
    fn run_table_write(
        &self,
        txn: TransactionId,
        op_type: OperationType,
        target: &Target,
        statement: &Statement,
        params: &[Value],
    ) -> CoreResult<u64> {
        let select = statement.matching_select().ok_or_else(|| {
            CoreError::protocol_violation(format!("{op_type} cannot run `{statement}`"))
        })?;
        let pk = self.primary_key(&target.store, &target.table)?;

        self.with_transaction(txn, |state, ctx| {
            let table_op =
                Operation::new(txn, op_type, &target.store, &target.table, statement, params);
            self.acquire(txn, &table_op)?;

            let conn = checked_connection(txn, ctx, &target.store)?;
            let matched = conn
                .query(&select, params)
                .map_err(|e| self.execution_failure(txn, &table_op, e))?;

            let mut row_ops = Vec::with_capacity(matched.len());
            for before in matched {
                let key = before.get(&pk).cloned().ok_or_else(|| {
                    CoreError::Store(StoreError::MissingKey {
                        table: target.table.clone(),
                        column: pk.clone(),
                    })
                })?;
                let op = Operation::new(txn, op_type, &target.store, &target.table, statement, params)
                    .with_key(Some(key))
                    .with_before_image(Some(before));
                self.acquire(txn, &op)?;
                row_ops.push(op);
            }

            let outcome = conn
                .execute(statement, params)
                .map_err(|e| self.execution_failure(txn, &table_op, e))?;
            if outcome.rows_affected == 0 {
                debug!(
                    txn = %txn,
                    resource = %table_op.resource_key(),
                    op = %op_type,
                    "no rows affected; not logged"
                );
                return Ok(0);
            }

            for mut op in row_ops {
                if op_type == OperationType::Update {
                    if let Some(key) = op.key().cloned() {
                        let after = self
                            .fetch_row(conn, &target.store, &target.table, &key)
                            .map_err(|e| self.execution_failure(txn, &op, e))?;
                        op.set_after_image(after);
                    }
                }
                self.record(state, op)?;
            }
            Ok(outcome.rows_affected)
        })
    }

    fn with_transaction<T>(
        &self,
        txn: TransactionId,
        f: impl FnOnce(&mut Transaction, &mut TransactionContext) -> CoreResult<T>,
    ) -> CoreResult<T> {
        let handle = self
            .registry
            .get(txn)
            .ok_or(CoreError::TransactionNotFound(txn))?;
        let mut guard = handle.lock();
        let ActiveTransaction { txn: state, ctx } = &mut *guard;
        if !state.is_active() {
            return Err(CoreError::protocol_violation(format!(
                "{txn} is {} and cannot run operations",
                state.status()
            )));
        }
        let ctx = ctx.as_mut().ok_or(CoreError::TransactionNotFound(txn))?;
        f(state, ctx)
    }

    fn acquire(&self, txn: TransactionId, op: &Operation) -> CoreResult<()> {
        match self.scheduler.can_execute(txn, op) {
            Ok(true) => Ok(()),
            Ok(false) => {
                self.stats.record_lock_conflict();
                Err(CoreError::lock_conflict(txn, op.resource_key().to_string()))
            }
            Err(e) => {
                if matches!(e, CoreError::Deadlock { .. }) {
                    self.stats.record_deadlock();
                }
                Err(e)
            }
        }
    }

    fn execution_failure(&self, txn: TransactionId, op: &Operation, err: StoreError) -> CoreError {
        match self.policy {
            ExecutionFailurePolicy::Propagate => CoreError::Store(err),
            ExecutionFailurePolicy::TreatAsConflict => {
                debug!(
                    txn = %txn,
                    resource = %op.resource_key(),
                    error = %err,
                    "execution failure reported as lock conflict"
                );
                self.stats.record_lock_conflict();
                CoreError::lock_conflict(txn, op.resource_key().to_string())
            }
        }
    }

    fn record(&self, state: &mut Transaction, op: Operation) -> CoreResult<()> {
        let txn = state.id();
        op.mark_executed();
        let op = Arc::new(op);
        self.log.log_operation(Arc::clone(&op));
        state.push_operation(Arc::clone(&op))?;
        if op.op_type().mutates() {
            if let Some(key) = op.key() {
                self.versions.track_version(txn, op.table(), key);
            }
        }
        self.scheduler.on_operation_complete(txn, &op);
        debug!(
            txn = %txn,
            op = %op.op_type(),
            resource = %op.resource_key(),
            "operation logged"
        );
        Ok(())
    }

    fn primary_key(&self, store: &str, table: &str) -> CoreResult<String> {
        self.provider
            .metadata(store)?
            .primary_key(table)
            .map(str::to_string)
            .ok_or_else(|| unknown_table(store, table))
    }

    fn fetch_row(
        &self,
        conn: &mut dyn StoreConnection,
        store: &str,
        table: &str,
        key: &Value,
    ) -> StoreResult<Option<Record>> {
        let pk = self
            .provider
            .metadata(store)?
            .primary_key(table)
            .map(str::to_string)
            .ok_or_else(|| StoreError::UnknownTable {
                store: store.to_string(),
                table: table.to_string(),
            })?;
        let select = Statement::select(table).filter_eq(pk, Expr::param(0));
        Ok(conn.query(&select, std::slice::from_ref(key))?.into_iter().next())
    }
}

/// Resolves the connection to `store` and repairs an auto-committing one.
fn checked_connection<'a>(
    txn: TransactionId,
    ctx: &'a mut TransactionContext,
    store: &str,
) -> CoreResult<&'a mut dyn StoreConnection> {
    let conn = ctx.connection(store)?;
    if conn.is_closed() {
        return Err(StoreError::Closed(store.to_string()).into());
    }
    if conn.auto_commit() {
        warn!(txn = %txn, store, "connection was auto-committing; switching to manual commit");
        conn.set_auto_commit(false)?;
    }
    Ok(conn)
}

fn insert_payload(statement: &Statement, params: &[Value]) -> Option<Record> {
    match statement {
        Statement::Insert {
            columns, values, ..
        } => columns
            .iter()
            .zip(values)
            .map(|(column, expr)| expr.eval(params, None).ok().map(|v| (column.clone(), v)))
            .collect(),
        _ => None,
    }
}

fn unknown_table(store: &str, table: &str) -> CoreError {
    CoreError::Store(StoreError::UnknownTable {
        store: store.to_string(),
        table: table.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_payload_evaluates_parameters() {
        let stmt = Statement::insert_into("orders")
            .set("customer_id", Expr::param(0))
            .set("status", Expr::literal("PENDING"));
        let payload = insert_payload(&stmt, &[Value::Int(9)]).unwrap();
        assert_eq!(payload.get_i64("customer_id"), Some(9));
        assert_eq!(payload.get_str("status"), Some("PENDING"));
    }

    #[test]
    fn insert_payload_needs_bound_parameters() {
        let stmt = Statement::insert_into("orders").set("customer_id", Expr::param(3));
        assert_eq!(insert_payload(&stmt, &[]), None);
        assert_eq!(insert_payload(&Statement::select("orders"), &[]), None);
    }

    #[test]
    fn targets() {
        let row = Target::row("inventory", "products", 4);
        assert_eq!(row.key, Some(Value::Int(4)));
        assert_eq!(Target::table("order", "orders").key, None);
    }
}
