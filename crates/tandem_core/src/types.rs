//! Core type definitions for Tandem.

use serde::{Deserialize, Serialize};
use std::fmt;
use tandem_store::Value;
use uuid::Uuid;

/// Unique identifier for a transaction.
///
/// Transaction IDs are monotonically increasing and never reused within a
/// coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(pub u64);

impl TransactionId {
    /// Creates a new transaction ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn:{}", self.0)
    }
}

/// Unique identifier for a logged operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(Uuid);

impl OperationId {
    /// Generates a fresh random operation ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op:{}", self.0)
    }
}

/// The unit a lock protects.
///
/// Either one row, `store.table.key`, or a whole table, `store.table.*`,
/// when the row key is not known yet.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceKey(String);

impl ResourceKey {
    /// Key for a single row.
    #[must_use]
    pub fn row(store: &str, table: &str, key: &Value) -> Self {
        Self(format!("{store}.{table}.{key}"))
    }

    /// Key for a whole table.
    #[must_use]
    pub fn table(store: &str, table: &str) -> Self {
        Self(format!("{store}.{table}.*"))
    }

    /// Key for a row if its primary key is known, else for the table.
    #[must_use]
    pub fn for_target(store: &str, table: &str, key: Option<&Value>) -> Self {
        match key {
            Some(key) => Self::row(store, table, key),
            None => Self::table(store, table),
        }
    }

    /// Returns true for a table-level key.
    #[must_use]
    pub fn is_table_level(&self) -> bool {
        self.0.ends_with(".*")
    }

    /// Returns the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_id_display() {
        assert_eq!(TransactionId::new(42).to_string(), "txn:42");
        assert_eq!(TransactionId::new(42).as_u64(), 42);
    }

    #[test]
    fn operation_ids_are_unique() {
        assert_ne!(OperationId::generate(), OperationId::generate());
    }

    #[test]
    fn resource_keys() {
        let row = ResourceKey::row("inventory", "products", &Value::Int(7));
        assert_eq!(row.as_str(), "inventory.products.7");
        assert!(!row.is_table_level());

        let table = ResourceKey::for_target("order", "orders", None);
        assert_eq!(table.to_string(), "order.orders.*");
        assert!(table.is_table_level());
    }
}
