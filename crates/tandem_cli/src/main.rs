//! Tandem CLI
//!
//! Command-line tools for exercising the transaction coordinator against
//! in-memory stores.
//!
//! # Commands
//!
//! - `simulate` - Run a concurrent order workload and check stock conservation
//! - `deadlock-demo` - Cross two transactions' locks and show the reported cycle
//! - `dump-oplog` - Run a sample order and print its operation log

mod commands;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// Tandem transaction coordinator tools.
#[derive(Parser)]
#[command(name = "tandem")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run concurrent orders against in-memory stores
    Simulate {
        /// Number of worker threads
        #[arg(short, long, default_value = "4")]
        workers: usize,

        /// Actions issued by each worker
        #[arg(short, long, default_value = "100")]
        orders: usize,

        /// Initial stock per product
        #[arg(short, long, default_value = "500")]
        stock: i64,

        /// Number of products in the catalog
        #[arg(short, long, default_value = "3")]
        products: usize,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Cross two transactions' locks and print the deadlock cycle
    DeadlockDemo,

    /// Run a sample order and dump its operation log
    DumpOplog {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Simulate {
            workers,
            orders,
            stock,
            products,
            format,
        } => {
            commands::simulate::run(workers, orders, stock, products, &format)?;
        }
        Commands::DeadlockDemo => {
            commands::deadlock_demo::run()?;
        }
        Commands::DumpOplog { format } => {
            commands::dump_oplog::run(&format)?;
        }
        Commands::Version => {
            println!("Tandem CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Tandem Core v{}", tandem_core::VERSION);
        }
    }

    Ok(())
}
