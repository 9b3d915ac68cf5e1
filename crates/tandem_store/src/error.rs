//! Error types for store operations.

use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur while talking to a store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No store is registered under the given name.
    #[error("unknown store: {0}")]
    UnknownStore(String),

    /// The table does not exist in the store.
    #[error("unknown table {table} in store {store}")]
    UnknownTable {
        /// The store that was searched.
        store: String,
        /// The missing table.
        table: String,
    },

    /// A connection could not be opened.
    #[error("failed to connect to store {store}: {reason}")]
    ConnectFailed {
        /// The store being connected to.
        store: String,
        /// Description of the failure.
        reason: String,
    },

    /// The connection was used after it was closed.
    #[error("connection to store {0} is closed")]
    Closed(String),

    /// A row with the same primary key already exists.
    #[error("duplicate key {key} in {table}")]
    DuplicateKey {
        /// The table written to.
        table: String,
        /// Rendered primary key.
        key: String,
    },

    /// An insert into a supplied-key table did not carry its key.
    #[error("missing primary key column {column} for {table}")]
    MissingKey {
        /// The table written to.
        table: String,
        /// The primary key column.
        column: String,
    },

    /// A statement referenced a parameter that was not bound.
    #[error("statement references parameter {index} but only {bound} were bound")]
    UnboundParameter {
        /// Zero-based parameter index.
        index: usize,
        /// Number of bound parameters.
        bound: usize,
    },

    /// An expression could not be evaluated.
    #[error("type error: {0}")]
    Type(String),

    /// Statement execution failed.
    #[error("execution failed: {0}")]
    Execution(String),

    /// Physical commit failed.
    #[error("commit failed on store {store}: {reason}")]
    CommitFailed {
        /// The store whose commit failed.
        store: String,
        /// Description of the failure.
        reason: String,
    },

    /// Physical rollback failed.
    #[error("rollback failed on store {store}: {reason}")]
    RollbackFailed {
        /// The store whose rollback failed.
        store: String,
        /// Description of the failure.
        reason: String,
    },
}

impl StoreError {
    /// Creates an execution error.
    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution(message.into())
    }

    /// Creates a type error.
    pub fn type_error(message: impl Into<String>) -> Self {
        Self::Type(message.into())
    }
}
