//! Store connection and provider traits.

use crate::error::StoreResult;
use crate::schema::TableMetadata;
use crate::statement::Statement;
use crate::value::{Record, Value};
use std::sync::Arc;

/// Result of a write statement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutcome {
    /// Number of rows inserted, updated or deleted. Zero is not an error.
    pub rows_affected: u64,
    /// Key assigned by the store to an inserted row, if it generated one.
    pub generated_key: Option<Value>,
}

impl ExecOutcome {
    /// An outcome that touched `rows` rows.
    #[must_use]
    pub fn rows(rows: u64) -> Self {
        Self {
            rows_affected: rows,
            generated_key: None,
        }
    }
}

/// A live connection to one store.
///
/// A connection is exclusively owned by a single transaction context for
/// its lifetime. In manual-commit mode writes stay private to the
/// connection until [`commit`](StoreConnection::commit).
///
/// # Invariants
///
/// - `execute` reports zero affected rows as `Ok`, never as an error
/// - `rollback` discards every write since the last commit
/// - `close` is idempotent
pub trait StoreConnection: Send {
    /// Name of the store this connection talks to.
    fn store(&self) -> &str;

    /// Runs a `SELECT` and returns the matching rows.
    ///
    /// # Errors
    ///
    /// Returns an error if the statement is not a select, the table is
    /// unknown, or the connection is closed.
    fn query(&mut self, statement: &Statement, params: &[Value]) -> StoreResult<Vec<Record>>;

    /// Runs an `INSERT`, `UPDATE` or `DELETE`.
    ///
    /// # Errors
    ///
    /// Returns an error if execution fails. Matching zero rows is not a
    /// failure.
    fn execute(&mut self, statement: &Statement, params: &[Value]) -> StoreResult<ExecOutcome>;

    /// Makes pending writes durable and visible.
    ///
    /// # Errors
    ///
    /// Returns an error if the commit fails; pending writes are discarded.
    fn commit(&mut self) -> StoreResult<()>;

    /// Discards pending writes.
    ///
    /// # Errors
    ///
    /// Returns an error if the rollback could not be performed.
    fn rollback(&mut self) -> StoreResult<()>;

    /// Liveness check: the connection is open and usable.
    fn is_valid(&mut self) -> bool;

    /// Returns true once the connection has been closed.
    fn is_closed(&self) -> bool;

    /// Returns true if every statement commits on its own.
    fn auto_commit(&self) -> bool;

    /// Switches auto-commit. Enabling it commits pending writes.
    ///
    /// # Errors
    ///
    /// Returns an error if the implied commit fails.
    fn set_auto_commit(&mut self, enabled: bool) -> StoreResult<()>;

    /// Closes the connection, discarding uncommitted writes.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying resource could not be released.
    fn close(&mut self) -> StoreResult<()>;
}

/// Hands out connections to named stores.
pub trait ConnectionProvider: Send + Sync {
    /// Names of every configured store, in a stable order.
    fn store_names(&self) -> Vec<String>;

    /// Opens a manual-commit connection to a store.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unknown or unreachable.
    fn connect(&self, store: &str) -> StoreResult<Box<dyn StoreConnection>>;

    /// Returns the table metadata of a store.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unknown.
    fn metadata(&self, store: &str) -> StoreResult<Arc<dyn TableMetadata>>;
}
