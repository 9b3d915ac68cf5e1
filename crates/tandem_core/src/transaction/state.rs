//! Transaction state.

use crate::error::{CoreError, CoreResult};
use crate::oplog::Operation;
use crate::types::TransactionId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

/// Status of a transaction.
///
/// ```text
/// ACTIVE -> PREPARING -> COMMITTED
///                     -> ABORTED
/// ACTIVE -> ROLLED_BACK
/// ACTIVE -> ABORTED -> ROLLED_BACK
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    /// Accepting operations.
    Active,
    /// Two-phase commit in progress.
    Preparing,
    /// Every touched store committed.
    Committed,
    /// Commit failed; compensation was attempted.
    Aborted,
    /// Rolled back and compensated.
    RolledBack,
}

impl TransactionStatus {
    /// Returns true once no further operations may run.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransactionStatus::Committed | TransactionStatus::Aborted | TransactionStatus::RolledBack
        )
    }

    /// Returns true if moving from `self` to `next` is allowed.
    #[must_use]
    pub fn can_transition_to(self, next: TransactionStatus) -> bool {
        use TransactionStatus::{Aborted, Active, Committed, Preparing, RolledBack};
        matches!(
            (self, next),
            (Active, Preparing | Aborted | RolledBack)
                | (Preparing, Committed | Aborted)
                | (Aborted, RolledBack)
        )
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransactionStatus::Active => "ACTIVE",
            TransactionStatus::Preparing => "PREPARING",
            TransactionStatus::Committed => "COMMITTED",
            TransactionStatus::Aborted => "ABORTED",
            TransactionStatus::RolledBack => "ROLLED_BACK",
        };
        f.write_str(name)
    }
}

/// A transaction owned by the coordinator.
///
/// Status and operation list only change while the transaction is not
/// terminal.
#[derive(Debug)]
pub struct Transaction {
    id: TransactionId,
    started_at: SystemTime,
    status: TransactionStatus,
    operations: Vec<Arc<Operation>>,
}

impl Transaction {
    /// Creates an active transaction.
    pub(crate) fn new(id: TransactionId) -> Self {
        Self {
            id,
            started_at: SystemTime::now(),
            status: TransactionStatus::Active,
            operations: Vec::new(),
        }
    }

    /// Returns the transaction ID.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Returns when the transaction began.
    #[must_use]
    pub fn started_at(&self) -> SystemTime {
        self.started_at
    }

    /// Returns the current status.
    #[must_use]
    pub fn status(&self) -> TransactionStatus {
        self.status
    }

    /// Checks if the transaction still accepts operations.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == TransactionStatus::Active
    }

    /// Returns the executed operations in order.
    #[must_use]
    pub fn operations(&self) -> &[Arc<Operation>] {
        &self.operations
    }

    /// Appends an executed operation.
    pub(crate) fn push_operation(&mut self, operation: Arc<Operation>) -> CoreResult<()> {
        if !self.is_active() {
            return Err(CoreError::protocol_violation(format!(
                "{} is {} and cannot record operations",
                self.id, self.status
            )));
        }
        self.operations.push(operation);
        Ok(())
    }

    /// Moves to a new status.
    pub(crate) fn transition(&mut self, next: TransactionStatus) -> CoreResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(CoreError::protocol_violation(format!(
                "{} cannot move from {} to {}",
                self.id, self.status, next
            )));
        }
        self.status = next;
        Ok(())
    }

    /// Summarizes the transaction once it has finished.
    pub(crate) fn summarize(&self, stores: Vec<String>) -> TransactionSummary {
        TransactionSummary {
            id: self.id,
            status: self.status,
            started_at: self.started_at,
            finished_at: SystemTime::now(),
            operation_count: self.operations.len(),
            stores,
        }
    }
}

/// Record of a finished transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransactionSummary {
    /// Transaction ID.
    pub id: TransactionId,
    /// Final status.
    pub status: TransactionStatus,
    /// When the transaction began.
    pub started_at: SystemTime,
    /// When the transaction finished.
    pub finished_at: SystemTime,
    /// Number of executed operations.
    pub operation_count: usize,
    /// Stores the transaction touched, in first-touched order.
    pub stores: Vec<String>,
}
