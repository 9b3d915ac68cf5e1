//! Tracks the rows each transaction touched.
//!
//! On abort the touched keys are handed back so an external cache can treat
//! them as stale.

use crate::types::TransactionId;
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use tandem_store::Value;
use tracing::{debug, warn};

/// Per-transaction set of touched `table:id` keys.
#[derive(Debug, Default)]
pub struct VersionTracker {
    touched: RwLock<HashMap<TransactionId, BTreeSet<String>>>,
}

impl VersionTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `txn` touched row `id` of `table`.
    pub fn track_version(&self, txn: TransactionId, table: &str, id: &Value) {
        self.touched
            .write()
            .entry(txn)
            .or_default()
            .insert(format!("{table}:{id}"));
    }

    /// Returns the keys tracked for `txn`, in sorted order.
    pub fn tracked(&self, txn: TransactionId) -> Vec<String> {
        self.touched
            .read()
            .get(&txn)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Removes and returns every key tracked for `txn`.
    pub fn invalidate_versions(&self, txn: TransactionId) -> Vec<String> {
        let keys: Vec<String> = self
            .touched
            .write()
            .remove(&txn)
            .map(|keys| keys.into_iter().collect())
            .unwrap_or_default();

        if keys.is_empty() {
            debug!(txn = %txn, "no versions to invalidate");
        } else {
            warn!(txn = %txn, keys = ?keys, "invalidating versions");
        }
        keys
    }

    /// Drops the keys tracked for `txn` without reporting them.
    pub fn forget(&self, txn: TransactionId) {
        self.touched.write().remove(&txn);
    }
}
