//! Lock scheduling and deadlock detection.
//!
//! The [`TwoPhaseLockingScheduler`] grants shared and exclusive locks on
//! [`ResourceKey`](crate::ResourceKey)s. A denied request never blocks:
//! the caller gets `Ok(false)` for a plain conflict or
//! [`CoreError::Deadlock`](crate::CoreError::Deadlock) when the request
//! closes a cycle in the wait-for graph kept by the [`DeadlockDetector`].

mod deadlock;
mod scheduler;

pub use deadlock::DeadlockDetector;
pub use scheduler::{SchedulingAlgorithm, TwoPhaseLockingScheduler};

use crate::types::{ResourceKey, TransactionId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lock mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LockMode {
    /// Compatible with other shared locks.
    Shared,
    /// Compatible with nothing.
    Exclusive,
}

impl LockMode {
    /// Returns true if a lock in this mode can coexist with `other`
    /// held by a different transaction.
    #[must_use]
    pub fn is_compatible_with(self, other: LockMode) -> bool {
        self == LockMode::Shared && other == LockMode::Shared
    }
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockMode::Shared => f.write_str("SHARED"),
            LockMode::Exclusive => f.write_str("EXCLUSIVE"),
        }
    }
}

/// Two-phase locking phase of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LockPhase {
    /// The transaction may acquire locks.
    Growing,
    /// The transaction may only release locks.
    Shrinking,
}

/// One granted lock, as reported by [`SchedulingAlgorithm::lock_snapshot`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockEntry {
    /// The locked resource.
    pub resource: ResourceKey,
    /// The holder.
    pub txn: TransactionId,
    /// The granted mode.
    pub mode: LockMode,
}
