//! Transaction lifecycle.
//!
//! Tandem coordinates transactions that span independently committing
//! stores:
//! - **Isolation**: strict two-phase locking per row or table
//! - **Atomicity**: two-phase commit across the stores a transaction touched
//! - **Recovery**: log-based compensation when a commit cannot complete

mod context;
mod coordinator;
mod scope;
mod state;

pub use context::TransactionContext;
pub use coordinator::TransactionCoordinator;
pub use scope::TransactionScope;
pub use state::{Transaction, TransactionStatus, TransactionSummary};

use crate::types::TransactionId;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

/// A transaction together with its live connections.
///
/// The context becomes `None` once released.
#[derive(Debug)]
pub(crate) struct ActiveTransaction {
    pub(crate) txn: Transaction,
    pub(crate) ctx: Option<TransactionContext>,
}

pub(crate) type TransactionHandle = Arc<Mutex<ActiveTransaction>>;

/// The set of active transactions.
///
/// Each transaction only ever touches its own entry; the outer lock is
/// held just long enough to look an entry up, add it or remove it.
#[derive(Debug, Default)]
pub(crate) struct TransactionRegistry {
    active: RwLock<HashMap<TransactionId, TransactionHandle>>,
}

impl TransactionRegistry {
    pub(crate) fn insert(&self, txn: Transaction, ctx: TransactionContext) {
        let id = txn.id();
        let handle = Arc::new(Mutex::new(ActiveTransaction {
            txn,
            ctx: Some(ctx),
        }));
        self.active.write().insert(id, handle);
    }

    pub(crate) fn get(&self, id: TransactionId) -> Option<TransactionHandle> {
        self.active.read().get(&id).cloned()
    }

    pub(crate) fn remove(&self, id: TransactionId) -> Option<TransactionHandle> {
        self.active.write().remove(&id)
    }

    pub(crate) fn ids(&self) -> Vec<TransactionId> {
        let mut ids: Vec<_> = self.active.read().keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}
