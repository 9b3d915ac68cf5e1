//! Lock table invariants under random and concurrent schedules.

use proptest::prelude::*;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use tandem_core::{
    CoreError, LockEntry, LockMode, Operation, OperationType, SchedulingAlgorithm, TransactionId,
    TwoPhaseLockingScheduler,
};
use tandem_store::{Expr, Statement, Value};

fn op(txn: TransactionId, op_type: OperationType, key: i64) -> Operation {
    let statement = Statement::update("products")
        .set("stock", Expr::param(0))
        .filter_eq("product_id", Expr::param(1));
    Operation::new(txn, op_type, "inventory", "products", &statement, &[0.into(), key.into()])
        .with_key(Some(Value::Int(key)))
}

/// No resource has an exclusive holder alongside any other holder.
fn assert_compatible(snapshot: &[LockEntry]) {
    let mut by_resource: HashMap<String, Vec<&LockEntry>> = HashMap::new();
    for entry in snapshot {
        by_resource
            .entry(entry.resource.to_string())
            .or_default()
            .push(entry);
    }
    for (resource, holders) in by_resource {
        if holders.iter().any(|h| h.mode == LockMode::Exclusive) {
            assert_eq!(holders.len(), 1, "{resource} has incompatible holders: {holders:?}");
        }
    }
}

#[derive(Debug, Clone)]
enum Step {
    Acquire { txn: u64, write: bool, key: i64 },
    Finish { txn: u64 },
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        4 => (1u64..5, any::<bool>(), 1i64..4)
            .prop_map(|(txn, write, key)| Step::Acquire { txn, write, key }),
        1 => (1u64..5).prop_map(|txn| Step::Finish { txn }),
    ]
}

proptest! {
    #[test]
    fn holders_stay_compatible(steps in prop::collection::vec(step(), 1..60)) {
        let scheduler = TwoPhaseLockingScheduler::new();
        // A finished transaction id is never reused.
        let mut generation: HashMap<u64, u64> = HashMap::new();
        let id = |slot: u64, generation: &HashMap<u64, u64>| {
            TransactionId::new(slot * 1000 + generation.get(&slot).copied().unwrap_or(0))
        };

        for step in steps {
            match step {
                Step::Acquire { txn, write, key } => {
                    let txn = id(txn, &generation);
                    let op_type = if write { OperationType::Update } else { OperationType::Read };
                    match scheduler.can_execute(txn, &op(txn, op_type, key)) {
                        Ok(true) => {
                            let held = scheduler.locks_held(txn);
                            let holds_expected_lock = held.iter().any(|l| {
                                l.resource.as_str() == format!("inventory.products.{key}")
                                    && (!write || l.mode == LockMode::Exclusive)
                            });
                            prop_assert!(holds_expected_lock);
                        }
                        Ok(false) => {}
                        Err(CoreError::Deadlock { cycle, .. }) => {
                            prop_assert!(cycle.contains(&txn));
                        }
                        Err(other) => prop_assert!(false, "unexpected error: {other}"),
                    }
                }
                Step::Finish { txn } => {
                    let current = id(txn, &generation);
                    scheduler.on_transaction_abort(current);
                    prop_assert!(scheduler.locks_held(current).is_empty());
                    *generation.entry(txn).or_default() += 1;
                }
            }
            assert_compatible(&scheduler.lock_snapshot());
        }
    }

    #[test]
    fn release_frees_everything(keys in prop::collection::vec(1i64..50, 1..20)) {
        let scheduler = TwoPhaseLockingScheduler::new();
        let txn = TransactionId::new(1);
        for key in &keys {
            prop_assert!(scheduler.can_execute(txn, &op(txn, OperationType::Delete, *key)).unwrap());
        }
        scheduler.on_transaction_commit(txn);
        prop_assert!(scheduler.lock_snapshot().is_empty());
        prop_assert_eq!(scheduler.locked_resources(), 0);
        prop_assert_eq!(scheduler.phase(txn), None);
    }
}

#[test]
fn concurrent_writers_never_share_a_row() {
    const THREADS: u64 = 8;
    const ROUNDS: u64 = 200;

    let scheduler = Arc::new(TwoPhaseLockingScheduler::new());
    let owners: Arc<Vec<AtomicUsize>> = Arc::new((0..4).map(|_| AtomicUsize::new(0)).collect());
    let barrier = Arc::new(Barrier::new(THREADS as usize));

    let handles: Vec<_> = (0..THREADS)
        .map(|worker| {
            let scheduler = Arc::clone(&scheduler);
            let owners = Arc::clone(&owners);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let mut granted = 0;
                for round in 0..ROUNDS {
                    let txn = TransactionId::new(worker * 10_000 + round + 1);
                    let key = ((worker + round) % 4) as i64;
                    if let Ok(true) = scheduler.can_execute(txn, &op(txn, OperationType::Update, key)) {
                        let slot = &owners[key as usize];
                        let previous = slot.swap(txn.as_u64() as usize, Ordering::SeqCst);
                        assert_eq!(previous, 0, "row {key} already owned by txn:{previous}");
                        slot.store(0, Ordering::SeqCst);
                        granted += 1;
                    }
                    scheduler.on_transaction_abort(txn);
                }
                granted
            })
        })
        .collect();

    let granted: u64 = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert!(granted > 0);
    assert!(scheduler.lock_snapshot().is_empty());
}
