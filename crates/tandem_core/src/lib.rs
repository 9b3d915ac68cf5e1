//! # Tandem Core
//!
//! Transaction coordination across two independently committing stores.
//!
//! This crate supplies the concurrency control and cross-store atomicity a
//! single database engine would normally provide:
//!
//! - **Locking**: strict two-phase locking with shared and exclusive modes
//! - **Deadlocks**: a wait-for graph checked whenever a request is denied
//! - **Operation log**: before and after images of every executed operation
//! - **Two-phase commit**: prepare and commit across the stores a transaction touched
//! - **Compensation**: log-based undo when a transaction cannot commit
//! - **Retry**: bounded re-execution of whole actions on conflict
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use tandem_core::{CoordinatorConfig, Target, TransactionCoordinator};
//! use tandem_store::{
//!     Expr, InMemoryProvider, InMemoryStore, Record, Schema, Statement, TableSchema, Value,
//! };
//!
//! let inventory = InMemoryStore::new(
//!     "inventory",
//!     Schema::new().with_table(TableSchema::generated("products", "product_id")),
//! );
//! inventory
//!     .seed("products", Record::new().with("stock", 10).with("version", 0))
//!     .unwrap();
//! let provider = InMemoryProvider::new().with_store(inventory);
//! let coordinator = TransactionCoordinator::new(Arc::new(provider.clone()), CoordinatorConfig::default());
//!
//! let txn = coordinator.begin().unwrap();
//! let decrease = Statement::update("products")
//!     .set("stock", Expr::column("stock").sub(Expr::param(0)))
//!     .set("version", Expr::column("version").add(Expr::literal(1)))
//!     .filter_eq("product_id", Expr::param(1))
//!     .filter_eq("version", Expr::param(2));
//! let rows = coordinator
//!     .access()
//!     .update(
//!         txn,
//!         &Target::row("inventory", "products", 1),
//!         &decrease,
//!         &[5.into(), 1.into(), 0.into()],
//!         None,
//!     )
//!     .unwrap();
//! assert_eq!(rows, 1);
//! coordinator.commit(txn).unwrap();
//!
//! let row = provider.store("inventory").unwrap().row("products", &Value::Int(1)).unwrap();
//! assert_eq!(row.get_i64("stock"), Some(5));
//! assert_eq!(row.get_i64("version"), Some(1));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod access;
mod config;
mod error;
pub mod lock;
mod oplog;
pub mod retry;
mod rollback;
mod stats;
mod transaction;
mod types;
mod version;

pub use access::{ResourceAccessLayer, Target};
pub use config::{CoordinatorConfig, ExecutionFailurePolicy, RetryConfig};
pub use error::{CoreError, CoreResult};
pub use lock::{
    DeadlockDetector, LockEntry, LockMode, LockPhase, SchedulingAlgorithm,
    TwoPhaseLockingScheduler,
};
pub use oplog::{Operation, OperationLog, OperationRecord, OperationType};
pub use rollback::RollbackManager;
pub use stats::{CoordinatorStats, StatsSnapshot};
pub use transaction::{
    Transaction, TransactionContext, TransactionCoordinator, TransactionScope, TransactionStatus,
    TransactionSummary,
};
pub use types::{OperationId, ResourceKey, TransactionId};
pub use version::VersionTracker;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
