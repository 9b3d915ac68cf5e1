//! Error types for Tandem core.

use crate::types::TransactionId;
use tandem_store::StoreError;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur while coordinating transactions.
///
/// Only [`CoreError::LockConflict`] and [`CoreError::Deadlock`] are
/// retryable; see [`CoreError::is_retryable`].
#[derive(Debug, Error)]
pub enum CoreError {
    /// A lock was denied and no deadlock was found.
    #[error("lock conflict: {txn} was denied {resource}")]
    LockConflict {
        /// The transaction whose request was denied.
        txn: TransactionId,
        /// The contended resource key.
        resource: String,
    },

    /// A lock request closed a cycle in the wait-for graph.
    #[error("deadlock detected for {txn}: cycle {}", format_cycle(.cycle))]
    Deadlock {
        /// The transaction whose request closed the cycle.
        txn: TransactionId,
        /// The transactions in the cycle, in wait-for order.
        cycle: Vec<TransactionId>,
    },

    /// The locking or transaction protocol was used incorrectly.
    ///
    /// This indicates a programming defect in the caller.
    #[error("protocol violation: {message}")]
    ProtocolViolation {
        /// Description of the violation.
        message: String,
    },

    /// A business-level lookup found no row.
    #[error("resource not found: {message}")]
    ResourceNotFound {
        /// Description of what was looked up.
        message: String,
    },

    /// The unit of work refused to proceed, e.g. a business rule failed.
    ///
    /// The transaction is rolled back and the error is never retried.
    #[error("rejected: {reason}")]
    Rejected {
        /// Why the work was rejected.
        reason: String,
    },

    /// Some stores committed and another failed after a successful prepare.
    #[error(
        "commit inconsistency in {txn}: committed {committed:?}, failed on {failed_store}: {reason}"
    )]
    CommitInconsistency {
        /// The transaction being committed.
        txn: TransactionId,
        /// Stores that had already committed physically.
        committed: Vec<String>,
        /// The store whose commit failed.
        failed_store: String,
        /// Description of the failure.
        reason: String,
    },

    /// A touched store failed its liveness check during prepare.
    #[error("prepare failed for {txn} on store {store}")]
    PrepareFailed {
        /// The transaction being committed.
        txn: TransactionId,
        /// The store that failed.
        store: String,
    },

    /// A compensating action could not be applied.
    #[error("compensation failed for {txn}: {message}")]
    CompensationFailed {
        /// The transaction being compensated.
        txn: TransactionId,
        /// Description of the failure.
        message: String,
    },

    /// A retried action kept failing with retryable errors.
    #[error("{action} failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        /// Name of the action.
        action: String,
        /// Number of attempts made.
        attempts: u32,
        /// The last failure.
        #[source]
        source: Box<CoreError>,
    },

    /// A store connection could not be opened.
    #[error("failed to open connection to store {store}: {source}")]
    ConnectionFailed {
        /// The store being connected to.
        store: String,
        /// The underlying store error.
        #[source]
        source: StoreError,
    },

    /// The transaction is not active.
    #[error("transaction not active: {0}")]
    TransactionNotFound(TransactionId),

    /// Store error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

fn format_cycle(cycle: &[TransactionId]) -> String {
    cycle
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

impl CoreError {
    /// Creates a lock conflict error.
    pub fn lock_conflict(txn: TransactionId, resource: impl Into<String>) -> Self {
        Self::LockConflict {
            txn,
            resource: resource.into(),
        }
    }

    /// Creates a protocol violation error.
    pub fn protocol_violation(message: impl Into<String>) -> Self {
        Self::ProtocolViolation {
            message: message.into(),
        }
    }

    /// Creates a resource not found error.
    pub fn resource_not_found(message: impl Into<String>) -> Self {
        Self::ResourceNotFound {
            message: message.into(),
        }
    }

    /// Creates a rejection error.
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            reason: reason.into(),
        }
    }

    /// Creates a compensation failed error.
    pub fn compensation_failed(txn: TransactionId, message: impl Into<String>) -> Self {
        Self::CompensationFailed {
            txn,
            message: message.into(),
        }
    }

    /// Returns true if re-running the whole action may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::LockConflict { .. } | Self::Deadlock { .. })
    }

    /// Returns true for failures that may have left stores inconsistent.
    #[must_use]
    pub fn is_inconsistency(&self) -> bool {
        matches!(
            self,
            Self::CommitInconsistency { .. } | Self::CompensationFailed { .. }
        )
    }
}
