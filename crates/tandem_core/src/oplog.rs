//! Per-transaction operation log.
//!
//! Every operation executed through the
//! [`ResourceAccessLayer`](crate::ResourceAccessLayer) is appended here with
//! its before and after images. The log drives two-phase commit scope
//! ([`OperationLog::affected_stores`]) and compensation
//! ([`OperationLog::operations_in_reverse_order`]).
//!
//! Entries are immutable once appended except for two flags, `executed`
//! and `rolled_back`, which only ever go from false to true.

use crate::lock::LockMode;
use crate::types::{OperationId, ResourceKey, TransactionId};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tandem_store::{Record, Statement, Value};

/// Kind of a logged operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationType {
    /// Plain read under a shared lock.
    Read,
    /// Read under an exclusive lock.
    ReadForUpdate,
    /// Row insert.
    Insert,
    /// Row update.
    Update,
    /// Row delete.
    Delete,
}

impl OperationType {
    /// Returns true for operations that need an exclusive lock.
    #[must_use]
    pub fn is_write(self) -> bool {
        !matches!(self, OperationType::Read)
    }

    /// Returns true for operations that change rows.
    #[must_use]
    pub fn mutates(self) -> bool {
        matches!(
            self,
            OperationType::Insert | OperationType::Update | OperationType::Delete
        )
    }

    /// Returns the lock mode this operation requires.
    #[must_use]
    pub fn lock_mode(self) -> LockMode {
        if self.is_write() {
            LockMode::Exclusive
        } else {
            LockMode::Shared
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationType::Read => "READ",
            OperationType::ReadForUpdate => "READ_FOR_UPDATE",
            OperationType::Insert => "INSERT",
            OperationType::Update => "UPDATE",
            OperationType::Delete => "DELETE",
        };
        f.pad(name)
    }
}

/// One operation issued by a transaction against a store table.
#[derive(Debug)]
pub struct Operation {
    id: OperationId,
    txn: TransactionId,
    op_type: OperationType,
    store: String,
    table: String,
    key: Option<Value>,
    before_image: Option<Record>,
    after_image: Option<Record>,
    statement: String,
    params: Vec<Value>,
    executed: AtomicBool,
    rolled_back: AtomicBool,
}

impl Operation {
    /// Describes a new, not yet executed operation.
    pub fn new(
        txn: TransactionId,
        op_type: OperationType,
        store: impl Into<String>,
        table: impl Into<String>,
        statement: &Statement,
        params: &[Value],
    ) -> Self {
        Self {
            id: OperationId::generate(),
            txn,
            op_type,
            store: store.into(),
            table: table.into(),
            key: None,
            before_image: None,
            after_image: None,
            statement: statement.to_string(),
            params: params.to_vec(),
            executed: AtomicBool::new(false),
            rolled_back: AtomicBool::new(false),
        }
    }

    /// Sets the primary key of the affected row.
    #[must_use]
    pub fn with_key(mut self, key: Option<Value>) -> Self {
        self.key = key;
        self
    }

    /// Sets the before image.
    #[must_use]
    pub fn with_before_image(mut self, image: Option<Record>) -> Self {
        self.before_image = image;
        self
    }

    /// Sets the after image or insert payload.
    #[must_use]
    pub fn with_after_image(mut self, image: Option<Record>) -> Self {
        self.after_image = image;
        self
    }

    pub(crate) fn resolve_key(&mut self, key: Value) {
        self.key = Some(key);
    }

    pub(crate) fn set_before_image(&mut self, image: Option<Record>) {
        self.before_image = image;
    }

    pub(crate) fn set_after_image(&mut self, image: Option<Record>) {
        self.after_image = image;
    }

    /// Returns the operation id.
    pub fn id(&self) -> OperationId {
        self.id
    }

    /// Returns the owning transaction.
    pub fn txn(&self) -> TransactionId {
        self.txn
    }

    /// Returns the operation type.
    pub fn op_type(&self) -> OperationType {
        self.op_type
    }

    /// Returns the store name.
    pub fn store(&self) -> &str {
        &self.store
    }

    /// Returns the table name.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Returns the primary key of the affected row, once known.
    pub fn key(&self) -> Option<&Value> {
        self.key.as_ref()
    }

    /// Returns the row image captured before the operation.
    pub fn before_image(&self) -> Option<&Record> {
        self.before_image.as_ref()
    }

    /// Returns the row image after the operation, or the insert payload.
    pub fn after_image(&self) -> Option<&Record> {
        self.after_image.as_ref()
    }

    /// Returns the rendered statement text.
    pub fn statement(&self) -> &str {
        &self.statement
    }

    /// Returns the bound parameters.
    pub fn params(&self) -> &[Value] {
        &self.params
    }

    /// Returns the resource key this operation locks.
    pub fn resource_key(&self) -> ResourceKey {
        ResourceKey::for_target(&self.store, &self.table, self.key.as_ref())
    }

    /// Returns true once the operation ran successfully.
    pub fn is_executed(&self) -> bool {
        self.executed.load(Ordering::Acquire)
    }

    /// Returns true once the operation has been compensated.
    pub fn is_rolled_back(&self) -> bool {
        self.rolled_back.load(Ordering::Acquire)
    }

    /// Marks the operation as executed.
    pub fn mark_executed(&self) {
        self.executed.store(true, Ordering::Release);
    }

    /// Marks the operation as compensated.
    pub fn mark_rolled_back(&self) {
        self.rolled_back.store(true, Ordering::Release);
    }

    /// Returns a serializable view of the operation.
    pub fn to_record(&self) -> OperationRecord {
        OperationRecord {
            id: self.id,
            txn: self.txn,
            op_type: self.op_type,
            store: self.store.clone(),
            table: self.table.clone(),
            key: self.key.clone(),
            statement: self.statement.clone(),
            params: self.params.clone(),
            before_image: self.before_image.clone(),
            after_image: self.after_image.clone(),
            executed: self.is_executed(),
            rolled_back: self.is_rolled_back(),
        }
    }
}

/// Serializable view of an [`Operation`], used by log dumps.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationRecord {
    /// Operation id.
    pub id: OperationId,
    /// Owning transaction.
    pub txn: TransactionId,
    /// Operation type.
    #[serde(rename = "type")]
    pub op_type: OperationType,
    /// Store name.
    pub store: String,
    /// Table name.
    pub table: String,
    /// Primary key of the affected row.
    pub key: Option<Value>,
    /// Rendered statement text.
    pub statement: String,
    /// Bound parameters.
    pub params: Vec<Value>,
    /// Row image before the operation.
    pub before_image: Option<Record>,
    /// Row image after the operation.
    pub after_image: Option<Record>,
    /// Executed flag.
    pub executed: bool,
    /// Rolled-back flag.
    pub rolled_back: bool,
}

/// Append-only log of operations, partitioned by transaction.
///
/// Appends from different transactions may run concurrently. A single
/// transaction's own appends arrive sequentially.
#[derive(Debug, Default)]
pub struct OperationLog {
    entries: RwLock<HashMap<TransactionId, Vec<Arc<Operation>>>>,
}

impl OperationLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an operation to its transaction's log.
    pub fn log_operation(&self, operation: Arc<Operation>) {
        self.entries
            .write()
            .entry(operation.txn())
            .or_default()
            .push(operation);
    }

    /// Returns a snapshot of a transaction's operations in execution order.
    pub fn operations(&self, txn: TransactionId) -> Vec<Arc<Operation>> {
        self.entries.read().get(&txn).cloned().unwrap_or_default()
    }

    /// Returns a snapshot of a transaction's operations, last executed first.
    pub fn operations_in_reverse_order(&self, txn: TransactionId) -> Vec<Arc<Operation>> {
        let mut ops = self.operations(txn);
        ops.reverse();
        ops
    }

    /// Returns the distinct stores a transaction touched, in first-touched order.
    pub fn affected_stores(&self, txn: TransactionId) -> Vec<String> {
        let entries = self.entries.read();
        let mut stores: Vec<String> = Vec::new();
        for op in entries.get(&txn).into_iter().flatten() {
            if !stores.iter().any(|s| s == op.store()) {
                stores.push(op.store().to_string());
            }
        }
        stores
    }

    /// Returns the number of operations logged for a transaction.
    pub fn operation_count(&self, txn: TransactionId) -> usize {
        self.entries.read().get(&txn).map_or(0, Vec::len)
    }

    /// Returns the transactions that currently have log entries.
    pub fn transactions(&self) -> Vec<TransactionId> {
        let mut txns: Vec<_> = self.entries.read().keys().copied().collect();
        txns.sort_unstable();
        txns
    }

    /// Drops a transaction's log.
    pub fn clear(&self, txn: TransactionId) {
        self.entries.write().remove(&txn);
    }

    /// Returns a serializable view of a transaction's log in execution order.
    pub fn dump(&self, txn: TransactionId) -> Vec<OperationRecord> {
        self.operations(txn)
            .iter()
            .map(|op| op.to_record())
            .collect()
    }
}
