//! Benchmark utilities.

use rand::Rng;
use tandem_core::{Operation, OperationType, TransactionId};
use tandem_store::{Expr, Statement, Value};

/// Builds a product operation of the given type for `txn`.
pub fn product_operation(txn: TransactionId, op_type: OperationType, product_id: i64) -> Operation {
    let statement = Statement::select("products").filter_eq("product_id", Expr::param(0));
    Operation::new(
        txn,
        op_type,
        "inventory",
        "products",
        &statement,
        &[Value::Int(product_id)],
    )
    .with_key(Some(Value::Int(product_id)))
}

/// Picks `count` random product ids in `1..=catalog`.
pub fn random_products(count: usize, catalog: i64) -> Vec<i64> {
    let mut rng = rand::thread_rng();
    (0..count).map(|_| rng.gen_range(1..=catalog)).collect()
}
