//! Integration tests for the coordinator over in-memory stores.

use std::sync::Arc;
use tandem_core::{
    CoordinatorConfig, CoreError, ExecutionFailurePolicy, LockMode, OperationType, Target,
    TransactionCoordinator, TransactionId, TransactionStatus,
};
use tandem_store::{
    Expr, InMemoryProvider, InMemoryStore, Record, Schema, Statement, TableSchema, Value,
};

struct Fixture {
    provider: InMemoryProvider,
    coordinator: TransactionCoordinator,
}

impl Fixture {
    fn new(config: CoordinatorConfig) -> Self {
        let inventory = InMemoryStore::new(
            "inventory",
            Schema::new()
                .with_table(TableSchema::generated("products", "product_id"))
                .with_table(TableSchema::supplied("inventory_transactions", "transaction_id")),
        );
        for (name, stock) in [("widget", 10), ("gadget", 20)] {
            inventory
                .seed(
                    "products",
                    Record::new()
                        .with("name", name)
                        .with("price", 9.5)
                        .with("stock", stock)
                        .with("version", 0),
                )
                .unwrap();
        }
        let order = InMemoryStore::new(
            "order",
            Schema::new()
                .with_table(TableSchema::generated("orders", "order_id"))
                .with_table(TableSchema::generated("payments", "payment_id")),
        );
        let provider = InMemoryProvider::new()
            .with_store(inventory)
            .with_store(order);
        let coordinator = TransactionCoordinator::new(Arc::new(provider.clone()), config);
        Self {
            provider,
            coordinator,
        }
    }

    fn product(&self, id: i64) -> Record {
        self.provider
            .store("inventory")
            .unwrap()
            .row("products", &Value::Int(id))
            .unwrap()
    }

    fn products(&self) -> Vec<Record> {
        self.provider.store("inventory").unwrap().rows("products")
    }

    fn order_count(&self) -> usize {
        self.provider.store("order").unwrap().row_count("orders")
    }

    fn decrease_stock(&self, txn: TransactionId, product: i64, qty: i64, version: i64) -> u64 {
        self.try_decrease_stock(txn, product, qty, version).unwrap()
    }

    fn try_decrease_stock(
        &self,
        txn: TransactionId,
        product: i64,
        qty: i64,
        version: i64,
    ) -> Result<u64, CoreError> {
        let statement = Statement::update("products")
            .set("stock", Expr::column("stock").sub(Expr::param(0)))
            .set("version", Expr::column("version").add(Expr::literal(1)))
            .filter_eq("product_id", Expr::param(1))
            .filter_eq("version", Expr::param(2));
        self.coordinator.access().update(
            txn,
            &Target::row("inventory", "products", product),
            &statement,
            &[qty.into(), product.into(), version.into()],
            None,
        )
    }

    fn insert_order(&self, txn: TransactionId, customer: i64) -> Value {
        let statement = Statement::insert_into("orders")
            .set("customer_id", Expr::param(0))
            .set("status", Expr::param(1));
        self.coordinator
            .access()
            .insert(
                txn,
                "order",
                "orders",
                &statement,
                &[customer.into(), "PENDING".into()],
            )
            .unwrap()
            .unwrap()
    }
}

fn fixture() -> Fixture {
    Fixture::new(CoordinatorConfig::default())
}

#[test]
fn committed_decrease_updates_stock_and_version() {
    let f = fixture();
    let txn = f.coordinator.begin().unwrap();
    assert_eq!(f.decrease_stock(txn, 1, 5, 0), 1);
    assert_eq!(f.coordinator.scheduler().locks_held(txn).len(), 1);

    f.coordinator.commit(txn).unwrap();

    let row = f.product(1);
    assert_eq!(row.get_i64("stock"), Some(5));
    assert_eq!(row.get_i64("version"), Some(1));
    assert!(f.coordinator.scheduler().locks_held(txn).is_empty());
    assert!(f.coordinator.scheduler().lock_snapshot().is_empty());
    assert_eq!(f.coordinator.status(txn), Some(TransactionStatus::Committed));
}

#[test]
fn uncommitted_writes_are_invisible() {
    let f = fixture();
    let txn = f.coordinator.begin().unwrap();
    f.decrease_stock(txn, 1, 5, 0);
    assert_eq!(f.product(1).get_i64("stock"), Some(10));
    f.coordinator.rollback(txn).unwrap();
}

#[test]
fn stale_version_update_returns_zero_and_logs_nothing() {
    let f = Fixture::new(CoordinatorConfig::default().retain_log(true));
    let txn = f.coordinator.begin().unwrap();
    assert_eq!(f.decrease_stock(txn, 1, 5, 3), 0);
    assert_eq!(f.coordinator.log().operation_count(txn), 0);
    assert!(f.coordinator.versions().tracked(txn).is_empty());

    f.coordinator.commit(txn).unwrap();
    assert_eq!(f.product(1).get_i64("stock"), Some(10));
    assert_eq!(f.coordinator.summary(txn).unwrap().operation_count, 0);
}

#[test]
fn commit_inconsistency_compensates_committed_store() {
    let f = fixture();
    let txn = f.coordinator.begin().unwrap();
    f.decrease_stock(txn, 1, 5, 0);
    f.insert_order(txn, 7);

    // inventory commits first, then order fails.
    f.provider.store("order").unwrap().fail_next_commit();
    let err = f.coordinator.commit(txn).unwrap_err();
    match &err {
        CoreError::CommitInconsistency {
            committed,
            failed_store,
            ..
        } => {
            assert_eq!(committed, &vec!["inventory".to_string()]);
            assert_eq!(failed_store, "order");
        }
        other => panic!("expected commit inconsistency, got {other:?}"),
    }
    assert!(err.is_inconsistency());
    assert!(!err.is_retryable());

    assert_eq!(f.coordinator.status(txn), Some(TransactionStatus::Aborted));
    let row = f.product(1);
    assert_eq!(row.get_i64("stock"), Some(10));
    assert_eq!(row.get_i64("version"), Some(0));
    assert_eq!(f.order_count(), 0);
    assert!(f.coordinator.scheduler().lock_snapshot().is_empty());

    let stats = f.coordinator.stats();
    assert_eq!(stats.commit_inconsistencies, 1);
    assert_eq!(stats.transactions_aborted, 1);
    assert!(stats.compensations >= 1);

    // The store whose commit failed is rolled back as well.
    assert_eq!(f.provider.store("order").unwrap().rollback_count(), 1);
    assert_eq!(f.provider.store("inventory").unwrap().rollback_count(), 0);
}

#[test]
fn commit_inconsistency_restores_deleted_row() {
    let f = fixture();
    let txn = f.coordinator.begin().unwrap();
    let deleted = f
        .coordinator
        .access()
        .delete(
            txn,
            &Target::row("inventory", "products", 2),
            &Statement::delete_from("products").filter_eq("product_id", Expr::param(0)),
            &[2.into()],
            None,
        )
        .unwrap();
    assert_eq!(deleted, 1);
    f.insert_order(txn, 7);

    f.provider.store("order").unwrap().fail_next_commit();
    let err = f.coordinator.commit(txn).unwrap_err();
    assert!(matches!(err, CoreError::CommitInconsistency { .. }));

    let row = f.product(2);
    assert_eq!(row.get_str("name"), Some("gadget"));
    assert_eq!(row.get_i64("stock"), Some(20));
    assert_eq!(row.get_i64("version"), Some(0));
    assert_eq!(f.order_count(), 0);
}

#[test]
fn table_delete_logs_each_matched_row() {
    let f = fixture();
    let txn = f.coordinator.begin().unwrap();
    let deleted = f
        .coordinator
        .access()
        .delete(
            txn,
            &Target::table("inventory", "products"),
            &Statement::delete_from("products").filter_eq("stock", Expr::param(0)),
            &[20.into()],
            None,
        )
        .unwrap();
    assert_eq!(deleted, 1);

    let ops = f.coordinator.log().operations(txn);
    assert_eq!(ops.len(), 1);
    assert_eq!(ops[0].key(), Some(&Value::Int(2)));
    assert_eq!(ops[0].before_image().unwrap().get_i64("stock"), Some(20));
    let held: Vec<_> = f
        .coordinator
        .scheduler()
        .locks_held(txn)
        .into_iter()
        .map(|l| l.resource.to_string())
        .collect();
    assert!(held.contains(&"inventory.products.*".to_string()));
    assert!(held.contains(&"inventory.products.2".to_string()));

    f.insert_order(txn, 7);
    f.provider.store("order").unwrap().fail_next_commit();
    let err = f.coordinator.commit(txn).unwrap_err();
    assert!(matches!(err, CoreError::CommitInconsistency { .. }));

    let row = f.product(2);
    assert_eq!(row.get_i64("stock"), Some(20));
    assert_eq!(row.get_i64("version"), Some(0));
    assert_eq!(f.products().len(), 2);
}

#[test]
fn table_update_logs_before_and_after_per_row() {
    let f = Fixture::new(CoordinatorConfig::default().retain_log(true));
    let txn = f.coordinator.begin().unwrap();
    let restock = Statement::update("products")
        .set("stock", Expr::column("stock").add(Expr::param(0)))
        .filter_eq("price", Expr::param(1));
    let changed = f
        .coordinator
        .access()
        .update(
            txn,
            &Target::table("inventory", "products"),
            &restock,
            &[5.into(), 9.5.into()],
            None,
        )
        .unwrap();
    assert_eq!(changed, 2);

    let ops = f.coordinator.log().operations(txn);
    assert_eq!(ops.len(), 2);
    for op in &ops {
        let before = op.before_image().unwrap().get_i64("stock").unwrap();
        let after = op.after_image().unwrap().get_i64("stock").unwrap();
        assert_eq!(after, before + 5);
        assert!(op.key().is_some());
    }

    f.coordinator.rollback(txn).unwrap();
    assert_eq!(f.product(1).get_i64("stock"), Some(10));
    assert_eq!(f.product(2).get_i64("stock"), Some(20));
}

#[test]
fn table_write_conflicts_with_a_locked_row() {
    let f = fixture();
    let holder = f.coordinator.begin().unwrap();
    f.decrease_stock(holder, 2, 1, 0);

    let txn = f.coordinator.begin().unwrap();
    let err = f
        .coordinator
        .access()
        .delete(
            txn,
            &Target::table("inventory", "products"),
            &Statement::delete_from("products").filter_eq("stock", Expr::param(0)),
            &[20.into()],
            None,
        )
        .unwrap_err();
    assert!(matches!(err, CoreError::LockConflict { .. }));
    assert_eq!(f.coordinator.log().operation_count(txn), 0);

    f.coordinator.rollback(txn).unwrap();
    f.coordinator.commit(holder).unwrap();
    assert_eq!(f.products().len(), 2);
}

#[test]
fn failed_compensation_is_reported() {
    let f = fixture();
    let txn = f.coordinator.begin().unwrap();
    f.decrease_stock(txn, 1, 5, 0);

    f.provider.store("inventory").unwrap().fail_next_execute();
    let err = f.coordinator.rollback(txn).unwrap_err();
    assert!(matches!(err, CoreError::CompensationFailed { .. }));
    assert!(err.is_inconsistency());
    assert_eq!(f.coordinator.status(txn), Some(TransactionStatus::Aborted));
    assert!(f.coordinator.scheduler().lock_snapshot().is_empty());
}

#[test]
fn commit_inconsistency_undoes_committed_insert() {
    let f = fixture();
    let txn = f.coordinator.begin().unwrap();
    f.insert_order(txn, 7);
    f.decrease_stock(txn, 2, 1, 0);

    // order commits first, then inventory fails.
    f.provider.store("inventory").unwrap().fail_next_commit();
    let err = f.coordinator.commit(txn).unwrap_err();
    assert!(matches!(err, CoreError::CommitInconsistency { .. }));
    assert_eq!(f.order_count(), 0);
    assert_eq!(f.product(2).get_i64("stock"), Some(20));
}

#[test]
fn first_store_commit_failure_aborts_cleanly() {
    let f = fixture();
    let txn = f.coordinator.begin().unwrap();
    f.decrease_stock(txn, 1, 5, 0);
    f.insert_order(txn, 7);

    f.provider.store("inventory").unwrap().fail_next_commit();
    let err = f.coordinator.commit(txn).unwrap_err();
    assert!(matches!(err, CoreError::Store(_)));
    assert_eq!(f.coordinator.status(txn), Some(TransactionStatus::Aborted));
    assert_eq!(f.product(1).get_i64("stock"), Some(10));
    assert_eq!(f.order_count(), 0);
    assert_eq!(f.coordinator.stats().commit_inconsistencies, 0);
}

#[test]
fn prepare_failure_aborts_all_stores() {
    let f = fixture();
    let txn = f.coordinator.begin().unwrap();
    f.decrease_stock(txn, 1, 5, 0);
    f.insert_order(txn, 7);

    f.provider.store("order").unwrap().fail_next_validation();
    let err = f.coordinator.commit(txn).unwrap_err();
    match err {
        CoreError::PrepareFailed { store, .. } => assert_eq!(store, "order"),
        other => panic!("expected prepare failure, got {other:?}"),
    }
    assert_eq!(f.coordinator.status(txn), Some(TransactionStatus::Aborted));
    assert_eq!(f.product(1).get_i64("stock"), Some(10));
    assert_eq!(f.order_count(), 0);
    assert!(f.coordinator.scheduler().lock_snapshot().is_empty());
}

#[test]
fn rollback_restores_every_touched_row() {
    let f = fixture();
    let before = f.products();

    let txn = f.coordinator.begin().unwrap();
    f.decrease_stock(txn, 1, 3, 0);
    f.decrease_stock(txn, 1, 2, 1);
    f.insert_order(txn, 4);
    let deleted = f
        .coordinator
        .access()
        .delete(
            txn,
            &Target::row("inventory", "products", 2),
            &Statement::delete_from("products").filter_eq("product_id", Expr::param(0)),
            &[2.into()],
            None,
        )
        .unwrap();
    assert_eq!(deleted, 1);

    f.coordinator.rollback(txn).unwrap();

    assert_eq!(f.products(), before);
    assert_eq!(f.order_count(), 0);
    assert_eq!(f.coordinator.status(txn), Some(TransactionStatus::RolledBack));
    assert!(f.coordinator.scheduler().lock_snapshot().is_empty());
}

#[test]
fn rollback_twice_is_a_noop() {
    let f = fixture();
    let txn = f.coordinator.begin().unwrap();
    f.decrease_stock(txn, 1, 5, 0);

    f.coordinator.rollback(txn).unwrap();
    let after_first = f.coordinator.stats();
    f.coordinator.rollback(txn).unwrap();
    let after_second = f.coordinator.stats();

    assert_eq!(after_first, after_second);
    assert_eq!(f.coordinator.status(txn), Some(TransactionStatus::RolledBack));
}

#[test]
fn rollback_tolerates_physical_rollback_failure() {
    let f = fixture();
    let txn = f.coordinator.begin().unwrap();
    f.decrease_stock(txn, 1, 5, 0);
    f.insert_order(txn, 1);

    f.provider.store("order").unwrap().fail_next_rollback();
    f.coordinator.rollback(txn).unwrap();

    assert_eq!(f.coordinator.status(txn), Some(TransactionStatus::RolledBack));
    assert_eq!(f.product(1).get_i64("stock"), Some(10));
    assert_eq!(f.order_count(), 0);
}

#[test]
fn crossing_locks_report_deadlock_with_both_ids() {
    let f = fixture();
    let t1 = f.coordinator.begin().unwrap();
    let t2 = f.coordinator.begin().unwrap();

    f.decrease_stock(t1, 1, 1, 0);
    f.decrease_stock(t2, 2, 1, 0);

    let err = f.try_decrease_stock(t1, 2, 1, 0).unwrap_err();
    assert!(matches!(err, CoreError::LockConflict { .. }));

    let err = f.try_decrease_stock(t2, 1, 1, 0).unwrap_err();
    match err {
        CoreError::Deadlock { txn, cycle } => {
            assert_eq!(txn, t2);
            assert!(cycle.contains(&t1));
            assert!(cycle.contains(&t2));
        }
        other => panic!("expected deadlock, got {other:?}"),
    }

    // Neither request was granted.
    let held: Vec<_> = f
        .coordinator
        .scheduler()
        .locks_held(t1)
        .into_iter()
        .chain(f.coordinator.scheduler().locks_held(t2))
        .map(|l| l.resource.to_string())
        .collect();
    assert_eq!(held, vec!["inventory.products.1", "inventory.products.2"]);

    f.coordinator.rollback(t2).unwrap();
    assert_eq!(f.try_decrease_stock(t1, 2, 1, 0).unwrap(), 1);
    f.coordinator.commit(t1).unwrap();

    assert_eq!(f.product(1).get_i64("stock"), Some(9));
    assert_eq!(f.product(2).get_i64("stock"), Some(19));
    let stats = f.coordinator.stats();
    assert_eq!(stats.deadlocks, 1);
    assert_eq!(stats.lock_conflicts, 1);
}

#[test]
fn readers_share_and_writers_conflict() {
    let f = fixture();
    let select = Statement::select("products").filter_eq("product_id", Expr::param(0));
    let target = Target::row("inventory", "products", 1);

    let r1 = f.coordinator.begin().unwrap();
    let r2 = f.coordinator.begin().unwrap();
    let w = f.coordinator.begin().unwrap();

    let rows = f.coordinator.access().read(r1, &target, &select, &[1.into()]).unwrap();
    assert_eq!(rows.len(), 1);
    f.coordinator.access().read(r2, &target, &select, &[1.into()]).unwrap();

    let err = f.try_decrease_stock(w, 1, 1, 0).unwrap_err();
    assert!(err.is_retryable());

    for txn in [r1, r2, w] {
        f.coordinator.commit(txn).unwrap();
    }
    assert!(f.coordinator.scheduler().lock_snapshot().is_empty());
}

#[test]
fn read_for_update_takes_exclusive_lock() {
    let f = fixture();
    let select = Statement::select("products")
        .filter_eq("product_id", Expr::param(0))
        .for_update();
    let txn = f.coordinator.begin().unwrap();
    f.coordinator
        .access()
        .read_for_update(txn, &Target::row("inventory", "products", 1), &select, &[1.into()])
        .unwrap();
    let held = f.coordinator.scheduler().locks_held(txn);
    assert_eq!(held[0].mode, LockMode::Exclusive);
    f.coordinator.rollback(txn).unwrap();
}

#[test]
fn supplied_key_insert_locks_the_row() {
    let f = Fixture::new(CoordinatorConfig::default().retain_log(true));
    let txn = f.coordinator.begin().unwrap();
    let statement = Statement::insert_into("inventory_transactions")
        .set("transaction_id", Expr::param(0))
        .set("product_id", Expr::param(1))
        .set("quantity", Expr::param(2));
    let key = f
        .coordinator
        .access()
        .insert(
            txn,
            "inventory",
            "inventory_transactions",
            &statement,
            &["3f1c".into(), 1.into(), (-5).into()],
        )
        .unwrap();
    assert_eq!(key, Some(Value::from("3f1c")));
    assert_eq!(
        f.coordinator.scheduler().locks_held(txn)[0].resource.as_str(),
        "inventory.inventory_transactions.3f1c"
    );
    f.coordinator.commit(txn).unwrap();

    let dump = f.coordinator.log().dump(txn);
    assert_eq!(dump.len(), 1);
    assert_eq!(dump[0].op_type, OperationType::Insert);
    assert_eq!(dump[0].key, Some(Value::from("3f1c")));
}

#[test]
fn generated_insert_captures_key_in_log() {
    let f = Fixture::new(CoordinatorConfig::default().retain_log(true));
    let txn = f.coordinator.begin().unwrap();
    let key = f.insert_order(txn, 3);
    f.coordinator.commit(txn).unwrap();

    let ops = f.coordinator.log().operations(txn);
    assert_eq!(ops[0].key(), Some(&key));
    assert_eq!(ops[0].after_image().unwrap().get("order_id"), Some(&key));
    assert_eq!(ops[0].resource_key().to_string(), format!("order.orders.{key}"));
}

#[test]
fn logs_are_cleared_unless_retained() {
    let f = fixture();
    let txn = f.coordinator.begin().unwrap();
    f.decrease_stock(txn, 1, 1, 0);
    assert_eq!(f.coordinator.log().operation_count(txn), 1);
    f.coordinator.commit(txn).unwrap();
    assert_eq!(f.coordinator.log().operation_count(txn), 0);
    assert_eq!(f.coordinator.summary(txn).unwrap().stores, vec!["inventory"]);
}

#[test]
fn operations_after_finish_are_rejected() {
    let f = fixture();
    let txn = f.coordinator.begin().unwrap();
    f.coordinator.commit(txn).unwrap();
    let err = f.try_decrease_stock(txn, 1, 1, 0).unwrap_err();
    assert!(matches!(err, CoreError::TransactionNotFound(id) if id == txn));
}

#[test]
fn fetch_before_image_reports_missing_rows() {
    let f = fixture();
    let txn = f.coordinator.begin().unwrap();
    let image = f
        .coordinator
        .access()
        .fetch_before_image(txn, "inventory", "products", &Value::Int(1))
        .unwrap();
    assert_eq!(image.get_str("name"), Some("widget"));

    let err = f
        .coordinator
        .access()
        .fetch_before_image(txn, "inventory", "products", &Value::Int(99))
        .unwrap_err();
    assert!(matches!(err, CoreError::ResourceNotFound { .. }));
    f.coordinator.rollback(txn).unwrap();
}

#[test]
fn execution_failures_propagate_by_default() {
    let f = fixture();
    let txn = f.coordinator.begin().unwrap();
    f.provider.store("inventory").unwrap().fail_next_execute();
    let err = f.try_decrease_stock(txn, 1, 1, 0).unwrap_err();
    assert!(matches!(err, CoreError::Store(_)));
    assert!(!err.is_retryable());
    f.coordinator.rollback(txn).unwrap();
}

#[test]
fn execution_failures_can_be_treated_as_conflicts() {
    let f = Fixture::new(
        CoordinatorConfig::default()
            .execution_failure_policy(ExecutionFailurePolicy::TreatAsConflict),
    );
    let txn = f.coordinator.begin().unwrap();
    f.provider.store("inventory").unwrap().fail_next_execute();
    let err = f.try_decrease_stock(txn, 1, 1, 0).unwrap_err();
    assert!(matches!(err, CoreError::LockConflict { .. }));
    f.coordinator.rollback(txn).unwrap();
}

#[test]
fn scope_rolls_back_on_drop() {
    let f = fixture();
    let id = {
        let scope = f.coordinator.scope().unwrap();
        f.decrease_stock(scope.id(), 1, 5, 0);
        scope.id()
    };
    assert_eq!(f.coordinator.status(id), Some(TransactionStatus::RolledBack));
    assert_eq!(f.product(1).get_i64("stock"), Some(10));
    assert!(f.coordinator.scheduler().lock_snapshot().is_empty());
}

#[test]
fn scope_commit_keeps_writes() {
    let f = fixture();
    let scope = f.coordinator.scope().unwrap();
    f.decrease_stock(scope.id(), 1, 5, 0);
    scope.commit().unwrap();
    assert_eq!(f.product(1).get_i64("stock"), Some(5));
}

#[test]
fn run_retries_until_lock_is_free() {
    let f = Fixture::new(CoordinatorConfig::default().retry(
        tandem_core::RetryConfig::new(3).with_initial_delay(std::time::Duration::from_millis(1)),
    ));
    let blocker = f.coordinator.begin().unwrap();
    f.decrease_stock(blocker, 1, 1, 0);

    let mut attempts = 0;
    let result = f.coordinator.run("decrease_stock", |txn| {
        attempts += 1;
        if attempts == 2 {
            // Free the row before the second attempt reaches it.
            f.coordinator.commit(blocker)?;
        }
        let version = f.product(1).get_i64("version").unwrap_or_default();
        f.try_decrease_stock(txn, 1, 1, version)
    });
    assert_eq!(result.unwrap(), 1);
    assert_eq!(attempts, 2);
    assert_eq!(f.product(1).get_i64("stock"), Some(8));
    assert_eq!(f.coordinator.stats().retries, 1);
}

#[test]
fn run_does_not_retry_after_failed_compensation() {
    let f = fixture();
    let mut attempts = 0;
    let result: Result<u64, CoreError> = f.coordinator.run("decrease_stock", |txn| {
        attempts += 1;
        f.decrease_stock(txn, 1, 1, 0);
        f.provider.store("inventory").unwrap().fail_next_execute();
        Err(CoreError::lock_conflict(txn, "inventory.products.1"))
    });

    assert!(matches!(result, Err(CoreError::CompensationFailed { .. })));
    assert_eq!(attempts, 1);
    assert_eq!(f.coordinator.stats().retries, 0);
    assert!(f.coordinator.scheduler().lock_snapshot().is_empty());
    assert_eq!(f.product(1).get_i64("stock"), Some(10));
}
