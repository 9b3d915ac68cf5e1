//! Deadlock demo command implementation.
//!
//! Two transactions each lock one product, then ask for the other's.
//! The scheduler never blocks, so the first crossing request is denied
//! with a lock conflict and records a wait-for edge; the second closes
//! the cycle.

use tandem_core::{CoreError, Target, TransactionCoordinator, TransactionId};
use tandem_store::{Expr, Record, Statement};
use tandem_testkit::{tables, ProductSeed, TestStores, INVENTORY};

/// Runs the deadlock-demo command.
pub fn run() -> Result<(), Box<dyn std::error::Error>> {
    let stores = TestStores::new();
    let products = stores.seed_products(&[
        ProductSeed::new("left", 1.0, 10),
        ProductSeed::new("right", 1.0, 10),
    ])?;
    let (left, right) = (products[0], products[1]);

    let t1 = stores.begin()?;
    let t2 = stores.begin()?;
    println!("Started {t1} and {t2}");

    lock_product(&stores, t1, left)?;
    println!("{t1} locked product {left}");
    lock_product(&stores, t2, right)?;
    println!("{t2} locked product {right}");

    match lock_product(&stores, t1, right) {
        Err(e @ CoreError::LockConflict { .. }) => println!("{t1} denied: {e}"),
        other => return Err(unexpected(other).into()),
    }

    let outcome = lock_product(&stores, t2, left);
    stores.rollback(t1)?;
    stores.rollback(t2)?;

    match outcome {
        Err(CoreError::Deadlock { txn, cycle }) => {
            let cycle: Vec<String> = cycle.iter().map(ToString::to_string).collect();
            println!("{txn} denied: deadlock");
            println!("Cycle: {}", cycle.join(" -> "));
        }
        other => return Err(unexpected(other).into()),
    }

    let stats = stores.stats();
    println!(
        "Lock conflicts: {}, deadlocks: {}, rolled back: {}",
        stats.lock_conflicts, stats.deadlocks, stats.transactions_rolled_back
    );
    println!(
        "Locks held after rollback: {}",
        stores.scheduler().lock_snapshot().len()
    );
    Ok(())
}

fn lock_product(
    coordinator: &TransactionCoordinator,
    txn: TransactionId,
    product_id: i64,
) -> Result<Vec<Record>, CoreError> {
    let select = Statement::select(tables::PRODUCTS).filter_eq("product_id", Expr::param(0));
    coordinator.access().read_for_update(
        txn,
        &Target::row(INVENTORY, tables::PRODUCTS, product_id),
        &select,
        &[product_id.into()],
    )
}

fn unexpected(outcome: Result<Vec<Record>, CoreError>) -> String {
    match outcome {
        Ok(_) => "lock was granted unexpectedly".to_string(),
        Err(e) => format!("unexpected error: {e}"),
    }
}
