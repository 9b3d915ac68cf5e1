//! Wait-for graph with cycle detection.

use crate::types::TransactionId;
use std::collections::{HashMap, HashSet};

/// Wait-for graph over transactions.
///
/// Each waiting transaction has at most one outgoing edge, so the graph is
/// a set of chains with at most one cycle per connected component. Adding
/// an edge for a transaction that already waits replaces the old edge.
///
/// The detector is not synchronized on its own; the scheduler owns it
/// inside the same critical section as the lock table.
#[derive(Debug, Default)]
pub struct DeadlockDetector {
    waits_for: HashMap<TransactionId, TransactionId>,
}

impl DeadlockDetector {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `waiting` waits for `holding`, replacing any earlier edge.
    ///
    /// Self-edges are ignored.
    pub fn add_wait_for(&mut self, waiting: TransactionId, holding: TransactionId) {
        if waiting != holding {
            self.waits_for.insert(waiting, holding);
        }
    }

    /// Removes the outgoing edge of `waiting`, if any.
    pub fn clear_wait(&mut self, waiting: TransactionId) {
        self.waits_for.remove(&waiting);
    }

    /// Removes the outgoing edge of `txn` and every edge pointing at it.
    pub fn remove_transaction(&mut self, txn: TransactionId) {
        self.waits_for.remove(&txn);
        self.waits_for.retain(|_, holding| *holding != txn);
    }

    /// Returns the transaction `waiting` waits for.
    #[must_use]
    pub fn waits_for(&self, waiting: TransactionId) -> Option<TransactionId> {
        self.waits_for.get(&waiting).copied()
    }

    /// Returns the number of edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.waits_for.len()
    }

    /// Returns the cycle that runs through `txn`, starting at `txn`.
    ///
    /// With one outgoing edge per node, any cycle closed by a new edge from
    /// `txn` must pass through `txn`. Cycles elsewhere in the graph are not
    /// reported.
    #[must_use]
    pub fn cycle_through(&self, txn: TransactionId) -> Option<Vec<TransactionId>> {
        let mut path = vec![txn];
        let mut seen: HashSet<TransactionId> = HashSet::from([txn]);
        let mut current = txn;
        while let Some(&next) = self.waits_for.get(&current) {
            if next == txn {
                return Some(path);
            }
            if !seen.insert(next) {
                // Entered a cycle that does not include `txn`.
                return None;
            }
            path.push(next);
            current = next;
        }
        None
    }

    /// Searches for a cycle.
    ///
    /// Walks from every node in ascending id order, following the single
    /// outgoing edge. The first time the walk reaches a node already on the
    /// current path, the path from that node onward is returned.
    #[must_use]
    pub fn detect_deadlock(&self) -> Option<Vec<TransactionId>> {
        let mut starts: Vec<TransactionId> = self.waits_for.keys().copied().collect();
        starts.sort_unstable();

        let mut visited: HashSet<TransactionId> = HashSet::new();
        for start in starts {
            if visited.contains(&start) {
                continue;
            }

            let mut path: Vec<TransactionId> = Vec::new();
            let mut on_path: HashMap<TransactionId, usize> = HashMap::new();
            let mut current = start;
            loop {
                if let Some(&index) = on_path.get(&current) {
                    return Some(path[index..].to_vec());
                }
                if !visited.insert(current) {
                    // Reached a chain explored by an earlier walk.
                    break;
                }
                on_path.insert(current, path.len());
                path.push(current);
                match self.waits_for.get(&current) {
                    Some(&next) => current = next,
                    None => break,
                }
            }
        }
        None
    }
}
