//! Simulate command implementation.

use serde::Serialize;
use std::time::Duration;
use tandem_core::{CoordinatorConfig, RetryConfig};
use tandem_testkit::{stress_orders, StressConfig, StressTestResult, TestStores};
use tracing::info;

/// Simulation report for JSON output.
#[derive(Debug, Serialize)]
pub struct SimulationInfo {
    /// Workload configuration.
    pub config: StressConfig,
    /// Workload outcome.
    pub result: StressTestResult,
    /// Committed stock per product id.
    pub final_stock: Vec<(i64, i64)>,
    /// Orders recorded in the order store.
    pub orders: usize,
}

/// Runs the simulate command.
pub fn run(
    workers: usize,
    orders: usize,
    stock: i64,
    products: usize,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    if workers == 0 {
        return Err("at least one worker is required".into());
    }
    if products == 0 {
        return Err("at least one product is required".into());
    }

    let stores = TestStores::with_config(CoordinatorConfig::default().retry(
        RetryConfig::new(10)
            .with_initial_delay(Duration::from_millis(1))
            .with_max_delay(Duration::from_millis(20))
            .with_jitter(true),
    ));
    let catalog = stores.seed_catalog(products, 9.99, stock)?;
    info!(workers, orders, products, stock, "starting simulation");

    let config = StressConfig {
        workers,
        actions_per_worker: orders,
        ..StressConfig::default()
    };
    let result = stress_orders(&stores, &catalog, &config);
    let info = SimulationInfo {
        final_stock: catalog
            .iter()
            .map(|id| (*id, stores.stock(*id).unwrap_or_default()))
            .collect(),
        orders: stores.orders().len(),
        config,
        result,
    };

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&info)?);
        }
        _ => {
            info.result.print_summary("Order simulation");
            println!("\nFinal stock:");
            for (product_id, stock) in &info.final_stock {
                println!("  product {product_id}: {stock}");
            }
            println!("Orders recorded:    {}", info.orders);
        }
    }

    if !info.result.stock_conserved {
        return Err("stock balance changed during the simulation".into());
    }
    if info.result.stats.commit_inconsistencies > 0 {
        return Err(format!(
            "{} commit inconsistencies reported",
            info.result.stats.commit_inconsistencies
        )
        .into());
    }
    Ok(())
}
