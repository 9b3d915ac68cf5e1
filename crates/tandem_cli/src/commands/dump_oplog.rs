//! Dump oplog command implementation.

use serde::Serialize;
use tandem_core::{CoordinatorConfig, OperationRecord, TransactionId};
use tandem_store::Record;
use tandem_testkit::{place_order, TestStores};

/// Operation log of one transaction, for output.
#[derive(Debug, Serialize)]
pub struct TransactionLogInfo {
    /// Transaction id.
    pub txn: TransactionId,
    /// Operations in execution order.
    pub operations: Vec<OperationRecord>,
}

/// Runs the dump-oplog command.
pub fn run(format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let stores = TestStores::with_config(CoordinatorConfig::default().retain_log(true));
    let products = stores.seed_catalog(1, 9.99, 10)?;
    let customer = stores.seed_customer("sample", "sample@example.com")?;
    let order_id = place_order(&stores, customer, products[0], 3)?;

    let logs: Vec<TransactionLogInfo> = stores
        .log()
        .transactions()
        .into_iter()
        .map(|txn| TransactionLogInfo {
            txn,
            operations: stores.log().dump(txn),
        })
        .collect();

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&logs)?);
        }
        _ => {
            println!("Sample order {order_id}");
            for log in &logs {
                println!("\nTransaction {} ({} operations)", log.txn, log.operations.len());
                println!("{}", "-".repeat(60));
                for op in &log.operations {
                    print_operation(op)?;
                }
            }
        }
    }

    Ok(())
}

fn print_operation(op: &OperationRecord) -> Result<(), serde_json::Error> {
    let key = op
        .key
        .as_ref()
        .map_or_else(|| "-".to_string(), ToString::to_string);
    let mut flags = Vec::new();
    if op.executed {
        flags.push("executed");
    }
    if op.rolled_back {
        flags.push("rolled back");
    }
    println!(
        "{} {:<16} {}.{} key={} [{}]",
        op.id,
        op.op_type,
        op.store,
        op.table,
        key,
        flags.join(", ")
    );
    println!("    {}", op.statement);
    println!("    before: {}", image(op.before_image.as_ref())?);
    println!("    after:  {}", image(op.after_image.as_ref())?);
    Ok(())
}

fn image(record: Option<&Record>) -> Result<String, serde_json::Error> {
    record.map_or_else(|| Ok("-".to_string()), serde_json::to_string)
}
