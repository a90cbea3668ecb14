//! Corebank Simulator
//!
//! Drives the ledger engine with concurrent random workloads and checks that
//! money is conserved and every balance reconciles with its history.

use clap::Parser;
use rust_decimal::Decimal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod controller;
mod metrics;
mod workload;

use corebank_ledger::LedgerConfig;

use controller::{SimulationConfig, SimulationController};
use workload::Workload;

/// Corebank Simulator CLI
#[derive(Parser, Debug)]
#[command(name = "simulator")]
#[command(about = "Concurrent workload simulator for the Corebank ledger")]
struct Args {
    /// Number of accounts to open
    #[arg(short, long, default_value = "8")]
    accounts: usize,

    /// Number of concurrent workers
    #[arg(short, long, default_value = "4")]
    workers: usize,

    /// Operations per worker
    #[arg(short, long, default_value = "1000")]
    operations: usize,

    /// Workload to run (balanced, transfer-heavy, overdraft, failure-recovery)
    #[arg(long, default_value = "balanced")]
    workload: String,

    /// Opening deposit per account
    #[arg(long, default_value = "10000.00")]
    initial_balance: Decimal,

    /// Random seed for reproducibility
    #[arg(long)]
    seed: Option<u64>,

    /// Record FAILED transactions for rejected operations
    #[arg(long)]
    audit_failures: bool,

    /// Emit logs as JSON
    #[arg(long)]
    json: bool,

    /// Print the final report as JSON
    #[arg(long)]
    report_json: bool,

    /// Print ledger counters in Prometheus text format
    #[arg(long)]
    prometheus: bool,
}

fn init_logging(json: bool) {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
    );

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.json);

    let mut ledger = LedgerConfig::from_env()?;
    if args.audit_failures {
        ledger.engine.audit_failed_transactions = true;
    }

    let workload = Workload::load(&args.workload)?;

    info!("Starting Corebank Simulator");
    info!("Workload: {} - {}", workload.name, workload.description);
    info!("Accounts: {}, workers: {}", args.accounts, args.workers);

    let config = SimulationConfig {
        accounts: args.accounts,
        workers: args.workers,
        operations: args.operations,
        initial_balance: args.initial_balance,
        seed: args.seed,
    };

    let mut controller = SimulationController::new(config, workload, ledger);
    controller.initialize().await?;
    let report = controller.run().await?;

    info!("Simulation complete");
    info!("Total operations: {}", report.metrics.total_operations);
    info!("Completed: {}", report.metrics.completed);
    info!("Insufficient funds: {}", report.metrics.insufficient_funds);
    info!("Store failures: {}", report.metrics.store_failures);
    info!("Throughput: {:.0} ops/s", report.throughput);
    info!("Average latency: {}us (p99 {}us)", report.average_latency_us, report.p99_latency_us);
    if let Some(ledger) = &report.ledger {
        info!(
            commit_retries = ledger.commit_retries,
            conflicts = ledger.conflicts,
            "Ledger counters"
        );
    }

    if args.report_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }
    if args.prometheus {
        print!("{}", controller.prometheus());
    }

    if !report.is_sound() {
        error!(
            expected = %report.expected_total,
            actual = %report.actual_total,
            inconsistent = report.inconsistent_accounts.len(),
            "Ledger invariants violated"
        );
        anyhow::bail!("ledger invariants violated");
    }

    info!(total = %report.actual_total, "Money conserved across all accounts");
    Ok(())
}
