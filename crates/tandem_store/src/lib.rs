//! # Tandem Store
//!
//! Store connection seam and in-memory stores for Tandem.
//!
//! This crate is the lowest layer of Tandem. It knows how to run
//! statements against a named store over a connection, and nothing about
//! locking, logging or compensation.
//!
//! ## Design Principles
//!
//! - Statements are structured values, rendered as SQL only for display
//! - Connections start in manual-commit mode and are owned by one transaction
//! - Matching zero rows is a normal outcome, never an error
//! - Table metadata exists only so callers can build undo statements
//!
//! ## Available Stores
//!
//! - [`InMemoryStore`] - Ordered in-memory tables with fault injection
//!
//! ## Example
//!
//! ```rust
//! use tandem_store::{
//!     ConnectionProvider, Expr, InMemoryProvider, InMemoryStore, Record, Schema, Statement,
//!     TableSchema,
//! };
//!
//! let store = InMemoryStore::new(
//!     "inventory",
//!     Schema::new().with_table(TableSchema::generated("products", "product_id")),
//! );
//! store.seed("products", Record::new().with("stock", 10)).unwrap();
//!
//! let provider = InMemoryProvider::new().with_store(store);
//! let mut conn = provider.connect("inventory").unwrap();
//! let update = Statement::update("products")
//!     .set("stock", Expr::column("stock").sub(Expr::param(0)))
//!     .filter_eq("product_id", Expr::param(1));
//! assert_eq!(conn.execute(&update, &[3.into(), 1.into()]).unwrap().rows_affected, 1);
//! conn.commit().unwrap();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod connection;
mod error;
mod memory;
mod schema;
mod statement;
mod value;

pub use connection::{ConnectionProvider, ExecOutcome, StoreConnection};
pub use error::{StoreError, StoreResult};
pub use memory::{InMemoryConnection, InMemoryProvider, InMemoryStore};
pub use schema::{KeyGeneration, Schema, TableMetadata, TableSchema};
pub use statement::{Condition, Expr, OnConflict, Statement};
pub use value::{Record, Value};
