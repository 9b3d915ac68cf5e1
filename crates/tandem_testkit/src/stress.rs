//! Concurrent order workloads.
//!
//! Worker threads place orders against shared stores and, on a fixed
//! cadence, change their latest order or restock. The stock balance (see
//! [`TestStores::stock_balance`]) must be the same before and after,
//! however the workers interleave.

use crate::commerce::{
    cancel_order, discontinue_product, exchange_product, modify_order_quantity, place_order,
    restock, return_order, ship_order,
};
use crate::fixtures::TestStores;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tandem_core::{CoreError, StatsSnapshot};
use tracing::debug;

/// Configuration for an order workload.
#[derive(Debug, Clone, Serialize)]
pub struct StressConfig {
    /// Number of worker threads.
    pub workers: usize,
    /// Actions issued by each worker.
    pub actions_per_worker: usize,
    /// Quantity per order.
    pub quantity: i64,
    /// Every n-th action cancels the worker's previous order. Zero disables.
    pub cancel_every: usize,
    /// Every n-th action restocks a product. Zero disables.
    pub restock_every: usize,
    /// Every n-th action adds one unit to the worker's previous order.
    /// Zero disables.
    pub modify_every: usize,
    /// Every n-th action moves the worker's previous order to the next
    /// product in the catalog. Zero disables.
    pub exchange_every: usize,
    /// Every n-th action ships the worker's previous order and takes it
    /// back. Zero disables.
    pub return_every: usize,
    /// Every n-th action discontinues a product. Zero disables.
    pub discontinue_every: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            actions_per_worker: 50,
            quantity: 1,
            cancel_every: 5,
            restock_every: 7,
            modify_every: 3,
            exchange_every: 4,
            return_every: 9,
            discontinue_every: 0,
        }
    }
}

impl StressConfig {
    fn due(every: usize, action: usize) -> bool {
        every > 0 && action % every == 0
    }
}

/// Outcome of a workload.
#[derive(Debug, Clone, Serialize)]
pub struct StressTestResult {
    /// Actions that committed.
    pub committed: usize,
    /// Actions refused by a business rule or lookup.
    pub rejected: usize,
    /// Actions that failed otherwise, including exhausted retries.
    pub failed: usize,
    /// Wall-clock duration.
    pub duration: Duration,
    /// Actions per second.
    pub ops_per_second: f64,
    /// Coordinator counters accumulated during the run.
    pub stats: StatsSnapshot,
    /// Whether the stock balance was unchanged.
    pub stock_conserved: bool,
}

impl StressTestResult {
    /// Total actions attempted.
    #[must_use]
    pub fn total(&self) -> usize {
        self.committed + self.rejected + self.failed
    }

    /// Prints a summary of the run.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {name} ===");
        println!("Actions:            {}", self.total());
        println!("Committed:          {}", self.committed);
        println!("Rejected:           {}", self.rejected);
        println!("Failed:             {}", self.failed);
        println!("Retries:            {}", self.stats.retries);
        println!("Lock conflicts:     {}", self.stats.lock_conflicts);
        println!("Deadlocks:          {}", self.stats.deadlocks);
        println!("Compensations:      {}", self.stats.compensations);
        println!("Duration:           {:?}", self.duration);
        println!("Throughput:         {:.2} actions/sec", self.ops_per_second);
        println!(
            "Stock conserved:    {}",
            if self.stock_conserved { "yes" } else { "NO" }
        );
    }
}

#[derive(Default)]
struct Tally {
    committed: AtomicUsize,
    rejected: AtomicUsize,
    failed: AtomicUsize,
}

impl Tally {
    fn record<T>(&self, result: Result<T, CoreError>) -> Option<T> {
        match result {
            Ok(value) => {
                self.committed.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
            Err(CoreError::Rejected { .. } | CoreError::ResourceNotFound { .. }) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                None
            }
            Err(e) => {
                debug!(error = %e, "action failed");
                self.failed.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }
}

/// Runs concurrent order traffic over every seeded product.
///
/// Worker `w` orders products in round-robin order starting at product
/// `w`, so workers collide on the same rows.
pub fn stress_orders(stores: &TestStores, products: &[i64], config: &StressConfig) -> StressTestResult {
    let balance_before = stores.stock_balance();
    let stats_before = stores.stats();
    let tally = Tally::default();
    let start = Instant::now();

    if !products.is_empty() {
        thread::scope(|scope| {
            for worker in 0..config.workers {
                let tally = &tally;
                scope.spawn(move || {
                    let customer = worker as i64 + 1;
                    // The worker's latest live order and the product it holds.
                    let mut last_order: Option<(i64, usize)> = None;
                    for action in 1..=config.actions_per_worker {
                        let index = (worker + action) % products.len();
                        let product = products[index];
                        let due = |every| StressConfig::due(every, action);

                        if due(config.cancel_every) {
                            if let Some((order_id, _)) = last_order.take() {
                                tally.record(cancel_order(stores, order_id));
                                continue;
                            }
                        }
                        if due(config.return_every) {
                            if let Some((order_id, _)) = last_order.take() {
                                tally.record(
                                    ship_order(stores, order_id)
                                        .and_then(|()| return_order(stores, order_id)),
                                );
                                continue;
                            }
                        }
                        if due(config.modify_every) {
                            if let Some((order_id, _)) = last_order {
                                tally.record(modify_order_quantity(
                                    stores,
                                    order_id,
                                    config.quantity + 1,
                                ));
                                continue;
                            }
                        }
                        if due(config.exchange_every) && products.len() > 1 {
                            if let Some((order_id, held)) = last_order {
                                let next = (held + 1) % products.len();
                                if tally
                                    .record(exchange_product(stores, order_id, products[next]))
                                    .is_some()
                                {
                                    last_order = Some((order_id, next));
                                }
                                continue;
                            }
                        }
                        if due(config.discontinue_every) {
                            tally.record(discontinue_product(stores, product));
                            continue;
                        }
                        if due(config.restock_every) {
                            tally.record(restock(stores, product, config.quantity));
                            continue;
                        }
                        if let Some(order_id) =
                            tally.record(place_order(stores, customer, product, config.quantity))
                        {
                            last_order = Some((order_id, index));
                        }
                    }
                });
            }
        });
    }

    let duration = start.elapsed();
    let committed = tally.committed.load(Ordering::Relaxed);
    let rejected = tally.rejected.load(Ordering::Relaxed);
    let failed = tally.failed.load(Ordering::Relaxed);
    let total = committed + rejected + failed;
    let ops_per_second = if duration.as_secs_f64() > 0.0 {
        total as f64 / duration.as_secs_f64()
    } else {
        0.0
    };

    StressTestResult {
        committed,
        rejected,
        failed,
        duration,
        ops_per_second,
        stats: delta(&stats_before, &stores.stats()),
        stock_conserved: stores.stock_balance() == balance_before,
    }
}

fn delta(before: &StatsSnapshot, after: &StatsSnapshot) -> StatsSnapshot {
    StatsSnapshot {
        transactions_begun: after.transactions_begun - before.transactions_begun,
        transactions_committed: after.transactions_committed - before.transactions_committed,
        transactions_aborted: after.transactions_aborted - before.transactions_aborted,
        transactions_rolled_back: after.transactions_rolled_back
            - before.transactions_rolled_back,
        lock_conflicts: after.lock_conflicts - before.lock_conflicts,
        deadlocks: after.deadlocks - before.deadlocks,
        retries: after.retries - before.retries,
        compensations: after.compensations - before.compensations,
        commit_inconsistencies: after.commit_inconsistencies - before.commit_inconsistencies,
    }
}
