//! # Tandem Testkit
//!
//! Test utilities for Tandem.
//!
//! This crate provides:
//! - Fixtures for the inventory and order stores
//! - Business actions run through the coordinator: place, restock, cancel,
//!   ship, modify, return, exchange and discontinue
//! - Property-based test generators using proptest
//! - A concurrent order workload for stress testing
//!
//! ## Usage
//!
//! ```rust
//! use tandem_testkit::prelude::*;
//!
//! let stores = TestStores::new();
//! let products = stores.seed_catalog(1, 2.0, 10).unwrap();
//! let order_id = place_order(&stores, 1, products[0], 4).unwrap();
//!
//! assert_eq!(stores.stock(products[0]), Some(6));
//! assert_eq!(stores.order(order_id).unwrap().get_str("status"), Some("PENDING"));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod commerce;
pub mod fixtures;
pub mod generators;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::commerce::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::stress::*;
}

pub use commerce::*;
pub use fixtures::*;
pub use generators::*;
pub use stress::*;
