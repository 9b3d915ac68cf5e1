//! CLI command implementations.

pub mod deadlock_demo;
pub mod dump_oplog;
pub mod simulate;
