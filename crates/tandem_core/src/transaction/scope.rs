//! Scoped transactions.

use super::coordinator::TransactionCoordinator;
use crate::error::CoreResult;
use crate::types::TransactionId;
use tracing::{error, warn};

/// A transaction that rolls back when dropped without being finished.
///
/// Locks and connections are only released on commit or rollback, so a
/// caller that bails out early (an `?`, a panic) would otherwise leak them.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use tandem_core::{CoordinatorConfig, TransactionCoordinator};
/// use tandem_store::InMemoryProvider;
///
/// let coordinator =
///     TransactionCoordinator::new(Arc::new(InMemoryProvider::new()), CoordinatorConfig::default());
/// let id = {
///     let scope = coordinator.scope().unwrap();
///     scope.id()
///     // dropped here: rolled back
/// };
/// assert!(coordinator.active_transactions().is_empty());
/// assert_eq!(
///     coordinator.status(id),
///     Some(tandem_core::TransactionStatus::RolledBack)
/// );
/// ```
#[derive(Debug)]
#[must_use = "a scope rolls back as soon as it is dropped"]
pub struct TransactionScope<'a> {
    coordinator: &'a TransactionCoordinator,
    id: TransactionId,
    finished: bool,
}

impl<'a> TransactionScope<'a> {
    /// Begins a transaction on `coordinator`.
    ///
    /// # Errors
    ///
    /// Same as [`TransactionCoordinator::begin`].
    pub fn begin(coordinator: &'a TransactionCoordinator) -> CoreResult<Self> {
        let id = coordinator.begin()?;
        Ok(Self {
            coordinator,
            id,
            finished: false,
        })
    }

    /// Returns the transaction id.
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Commits the transaction.
    ///
    /// # Errors
    ///
    /// Same as [`TransactionCoordinator::commit`]. The transaction is
    /// finished either way.
    pub fn commit(mut self) -> CoreResult<()> {
        self.finished = true;
        self.coordinator.commit(self.id)
    }

    /// Rolls the transaction back.
    ///
    /// # Errors
    ///
    /// Same as [`TransactionCoordinator::rollback`].
    pub fn rollback(mut self) -> CoreResult<()> {
        self.finished = true;
        self.coordinator.rollback(self.id)
    }
}

impl Drop for TransactionScope<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        warn!(txn = %self.id, "transaction scope dropped unfinished; rolling back");
        if let Err(e) = self.coordinator.rollback(self.id) {
            error!(txn = %self.id, error = %e, "rollback on drop failed");
        }
    }
}
