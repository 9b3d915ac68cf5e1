//! Live store connections of one transaction.

use crate::error::{CoreError, CoreResult};
use crate::types::TransactionId;
use std::collections::BTreeMap;
use tandem_store::{ConnectionProvider, StoreConnection, StoreError};
use tracing::{debug, warn};

/// One manual-commit connection per configured store.
///
/// Created when a transaction begins and released exactly once when it
/// finishes. Connections are owned exclusively by this context.
pub struct TransactionContext {
    txn: TransactionId,
    connections: BTreeMap<String, Box<dyn StoreConnection>>,
    released: bool,
}

impl std::fmt::Debug for TransactionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionContext")
            .field("txn", &self.txn)
            .field("stores", &self.connections.keys().collect::<Vec<_>>())
            .field("released", &self.released)
            .finish()
    }
}

impl TransactionContext {
    /// Opens a connection to every store the provider knows.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ConnectionFailed`] if any connection cannot be
    /// opened or switched to manual commit. Connections opened before the
    /// failure are closed.
    pub fn open(provider: &dyn ConnectionProvider, txn: TransactionId) -> CoreResult<Self> {
        let mut context = Self {
            txn,
            connections: BTreeMap::new(),
            released: false,
        };

        for store in provider.store_names() {
            match Self::connect(provider, &store) {
                Ok(conn) => {
                    context.connections.insert(store, conn);
                }
                Err(source) => {
                    warn!(txn = %txn, store = %store, error = %source, "connection failed");
                    context.release();
                    return Err(CoreError::ConnectionFailed { store, source });
                }
            }
        }
        Ok(context)
    }

    fn connect(
        provider: &dyn ConnectionProvider,
        store: &str,
    ) -> Result<Box<dyn StoreConnection>, StoreError> {
        let mut conn = provider.connect(store)?;
        if conn.auto_commit() {
            conn.set_auto_commit(false)?;
        }
        Ok(conn)
    }

    /// Returns the owning transaction.
    #[must_use]
    pub fn txn(&self) -> TransactionId {
        self.txn
    }

    /// Returns the connected store names.
    #[must_use]
    pub fn stores(&self) -> Vec<String> {
        self.connections.keys().cloned().collect()
    }

    /// Returns true once the connections have been released.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Returns the connection to `store`.
    ///
    /// # Errors
    ///
    /// Returns an error if no connection to `store` exists.
    pub fn connection(&mut self, store: &str) -> CoreResult<&mut dyn StoreConnection> {
        match self.connections.get_mut(store) {
            Some(conn) => {
                let conn: &mut dyn StoreConnection = conn.as_mut();
                Ok(conn)
            }
            None => Err(StoreError::UnknownStore(store.to_string()).into()),
        }
    }

    /// Rolls back every connection, logging and tolerating failures.
    ///
    /// Returns the stores whose physical rollback failed.
    pub fn rollback_all(&mut self) -> Vec<String> {
        let mut failed = Vec::new();
        for (store, conn) in &mut self.connections {
            if conn.is_closed() {
                continue;
            }
            if let Err(e) = conn.rollback() {
                warn!(txn = %self.txn, store = %store, error = %e, "physical rollback failed");
                failed.push(store.clone());
            }
        }
        failed
    }

    /// Closes every connection. Safe to call more than once.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        for (store, mut conn) in std::mem::take(&mut self.connections) {
            if let Err(e) = conn.close() {
                warn!(txn = %self.txn, store = %store, error = %e, "failed to close connection");
            }
        }
        debug!(txn = %self.txn, "context released");
    }
}

impl Drop for TransactionContext {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_store::{InMemoryProvider, InMemoryStore, Schema, TableSchema};

    fn provider() -> InMemoryProvider {
        InMemoryProvider::new()
            .with_store(InMemoryStore::new(
                "inventory",
                Schema::new().with_table(TableSchema::generated("products", "product_id")),
            ))
            .with_store(InMemoryStore::new(
                "order",
                Schema::new().with_table(TableSchema::generated("orders", "order_id")),
            ))
    }

    #[test]
    fn opens_one_manual_commit_connection_per_store() {
        let provider = provider();
        let mut ctx = TransactionContext::open(&provider, TransactionId::new(1)).unwrap();
        assert_eq!(ctx.stores(), vec!["inventory", "order"]);
        assert!(!ctx.connection("order").unwrap().auto_commit());
        assert!(ctx.connection("billing").is_err());
    }

    #[test]
    fn connect_failure_is_reported() {
        let provider = provider();
        provider.store("order").unwrap().fail_next_connect();
        let err = TransactionContext::open(&provider, TransactionId::new(1)).unwrap_err();
        match err {
            CoreError::ConnectionFailed { store, .. } => assert_eq!(store, "order"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn release_is_idempotent() {
        let provider = provider();
        let mut ctx = TransactionContext::open(&provider, TransactionId::new(1)).unwrap();
        ctx.release();
        ctx.release();
        assert!(ctx.is_released());
        assert!(ctx.stores().is_empty());
    }

    #[test]
    fn rollback_failure_is_tolerated() {
        let provider = provider();
        let mut ctx = TransactionContext::open(&provider, TransactionId::new(1)).unwrap();
        provider.store("inventory").unwrap().fail_next_rollback();
        assert_eq!(ctx.rollback_all(), vec!["inventory"]);
        assert!(ctx.rollback_all().is_empty());
    }
}
