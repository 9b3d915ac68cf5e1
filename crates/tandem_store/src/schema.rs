//! Table metadata.

use std::collections::BTreeMap;

/// How a table's primary key values are assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyGeneration {
    /// The store assigns the next value of a per-table sequence.
    Generated,
    /// The caller supplies the key as the first inserted value.
    Supplied,
}

/// Description of one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    /// Table name.
    pub name: String,
    /// Primary key column.
    pub primary_key: String,
    /// Key assignment strategy.
    pub key_generation: KeyGeneration,
}

impl TableSchema {
    /// A table whose keys are generated by the store.
    #[must_use]
    pub fn generated(name: impl Into<String>, primary_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            primary_key: primary_key.into(),
            key_generation: KeyGeneration::Generated,
        }
    }

    /// A table whose keys are supplied by the caller.
    #[must_use]
    pub fn supplied(name: impl Into<String>, primary_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            primary_key: primary_key.into(),
            key_generation: KeyGeneration::Supplied,
        }
    }
}

/// Resolves table metadata by name.
///
/// Used by the transaction core only to build undo statements generically
/// and to resolve the key of freshly inserted rows.
pub trait TableMetadata: Send + Sync {
    /// Returns the schema of a table, if known.
    fn table(&self, table: &str) -> Option<&TableSchema>;

    /// Returns the primary key column of a table.
    fn primary_key(&self, table: &str) -> Option<&str> {
        self.table(table).map(|t| t.primary_key.as_str())
    }

    /// Returns how keys of a table are assigned.
    fn key_generation(&self, table: &str) -> Option<KeyGeneration> {
        self.table(table).map(|t| t.key_generation)
    }
}

/// The set of tables in one store.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    tables: BTreeMap<String, TableSchema>,
}

impl Schema {
    /// Creates an empty schema.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a table.
    #[must_use]
    pub fn with_table(mut self, table: TableSchema) -> Self {
        self.tables.insert(table.name.clone(), table);
        self
    }

    /// Iterates table schemas in name order.
    pub fn tables(&self) -> impl Iterator<Item = &TableSchema> {
        self.tables.values()
    }
}

impl TableMetadata for Schema {
    fn table(&self, table: &str) -> Option<&TableSchema> {
        self.tables.get(table)
    }
}
