//! Integration tests for generated business workloads.

use proptest::prelude::*;
use tandem_core::{CoordinatorConfig, CoreError, RetryConfig};
use tandem_testkit::prelude::*;

fn stores() -> TestStores {
    TestStores::with_config(
        CoordinatorConfig::default()
            .retry(RetryConfig::new(2).with_initial_delay(std::time::Duration::from_millis(1))),
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn sequential_workloads_conserve_stock(actions in workload_strategy(30)) {
        let stores = stores();
        let products = stores.seed_catalog(3, 1.5, 8).unwrap();
        let initial = stores.total_stock();
        let mut orders = Vec::new();

        for action in &actions {
            match action.apply(&stores, &products, &mut orders) {
                Ok(()) | Err(CoreError::Rejected { .. }) => {}
                Err(other) => prop_assert!(false, "{action:?} failed: {other}"),
            }
            prop_assert!(stores.scheduler().lock_snapshot().is_empty());
        }

        prop_assert!(stores.stock_conserved(initial));
        for product in &products {
            prop_assert!(stores.stock(*product).unwrap() >= 0);
        }
        // A sequential run never contends.
        prop_assert_eq!(stores.stats().retries, 0);
    }
}

#[test]
fn every_order_ends_in_a_known_status() {
    let stores = stores();
    let products = stores.seed_catalog(2, 3.0, 20).unwrap();
    let a = place_order(&stores, 1, products[0], 2).unwrap();
    let b = place_order(&stores, 2, products[1], 3).unwrap();
    let c = place_order(&stores, 3, products[0], 1).unwrap();
    cancel_order(&stores, a).unwrap();
    ship_order(&stores, b).unwrap();

    let statuses: Vec<_> = [a, b, c]
        .iter()
        .map(|id| stores.order(*id).unwrap().get_str("status").unwrap().to_string())
        .collect();
    assert_eq!(statuses, vec!["CANCELLED", "SHIPPED", "PENDING"]);
    assert_eq!(stores.stock(products[0]), Some(19));
    assert_eq!(stores.stock(products[1]), Some(17));
    assert!(stores.stock_conserved(40));
}

#[test]
fn order_lifecycle_keeps_the_balance() {
    let stores = stores();
    let products = stores.seed_catalog(3, 2.0, 10).unwrap();
    let a = place_order(&stores, 1, products[0], 2).unwrap();
    let b = place_order(&stores, 2, products[1], 3).unwrap();

    modify_order_quantity(&stores, a, 5).unwrap();
    exchange_product(&stores, a, products[2]).unwrap();
    ship_order(&stores, b).unwrap();
    return_order(&stores, b).unwrap();
    discontinue_product(&stores, products[1]).unwrap();

    assert_eq!(stores.stock(products[0]), Some(10));
    assert_eq!(stores.stock(products[1]), Some(0));
    assert_eq!(stores.stock(products[2]), Some(5));
    assert_eq!(stores.order(a).unwrap().get_i64("total_amount"), Some(10));
    assert_eq!(stores.order(b).unwrap().get_str("status"), Some(status::RETURNED));
    assert!(stores.stock_conserved(30));
}

#[test]
fn cancelled_orders_cannot_ship() {
    let stores = stores();
    let products = stores.seed_catalog(1, 1.0, 5).unwrap();
    let order = place_order(&stores, 1, products[0], 1).unwrap();
    cancel_order(&stores, order).unwrap();
    assert!(matches!(
        ship_order(&stores, order),
        Err(CoreError::Rejected { .. })
    ));
    assert_eq!(stores.payment_for(order).unwrap().get_str("status"), Some(status::REFUNDED));
}

#[test]
fn concurrent_orders_never_oversell() {
    let stores = TestStores::with_config(CoordinatorConfig::default().retry(
        RetryConfig::new(20)
            .with_initial_delay(std::time::Duration::from_micros(100))
            .with_max_delay(std::time::Duration::from_millis(2))
            .with_jitter(true),
    ));
    let products = stores.seed_catalog(1, 1.0, 10).unwrap();
    let config = StressConfig {
        workers: 8,
        actions_per_worker: 5,
        quantity: 1,
        cancel_every: 0,
        restock_every: 0,
        modify_every: 0,
        exchange_every: 0,
        return_every: 0,
        discontinue_every: 0,
    };

    let result = stress_orders(&stores, &products, &config);

    assert!(result.stock_conserved);
    let stock = stores.stock(products[0]).unwrap();
    assert!(stock >= 0);
    let placed = stores.orders().len() as i64;
    assert_eq!(stock + placed, 10);
    assert!(result.committed as i64 <= 10);
}
