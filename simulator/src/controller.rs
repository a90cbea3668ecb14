//! Simulation controller.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use corebank_common::{AccountNumber, OwnerId};
use corebank_ledger::{
    AccountLockManager, Fault, InMemoryLedgerStore, LedgerConfig, MetricsSnapshot,
    TransactionEngine,
};

use crate::metrics::SimulationMetrics;
use crate::workload::{Operation, Workload};

/// Simulation settings.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// Accounts to open.
    pub accounts: usize,
    /// Concurrent workers.
    pub workers: usize,
    /// Operations per worker.
    pub operations: usize,
    /// Opening deposit per account.
    pub initial_balance: Decimal,
    /// Random seed for reproducibility.
    pub seed: Option<u64>,
}

/// End-of-run report.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub workload: String,
    pub elapsed_ms: u128,
    pub throughput: f64,
    pub average_latency_us: u64,
    pub p99_latency_us: u64,
    pub metrics: SimulationMetrics,
    pub expected_total: Decimal,
    pub actual_total: Decimal,
    pub inconsistent_accounts: Vec<AccountNumber>,
    #[serde(skip)]
    pub ledger: Option<MetricsSnapshot>,
}

impl SimulationReport {
    /// Check money was conserved and every balance matches its history.
    pub fn is_sound(&self) -> bool {
        self.expected_total == self.actual_total && self.inconsistent_accounts.is_empty()
    }
}

/// Controls the simulation.
pub struct SimulationController {
    /// Settings.
    config: SimulationConfig,
    /// Workload profile.
    workload: Arc<Workload>,
    /// Store, kept for fault injection.
    store: InMemoryLedgerStore,
    /// Engine under test.
    engine: Arc<TransactionEngine>,
    /// Opened accounts.
    accounts: Arc<Vec<AccountNumber>>,
    /// Simulation metrics.
    metrics: Arc<RwLock<SimulationMetrics>>,
}

impl SimulationController {
    /// Create a new simulation controller.
    pub fn new(config: SimulationConfig, workload: Workload, ledger: LedgerConfig) -> Self {
        let store = InMemoryLedgerStore::new();
        let engine = TransactionEngine::new(
            Arc::new(store.clone()),
            Arc::new(AccountLockManager::new()),
            ledger,
        );

        Self {
            config,
            workload: Arc::new(workload),
            store,
            engine: Arc::new(engine),
            accounts: Arc::new(Vec::new()),
            metrics: Arc::new(RwLock::new(SimulationMetrics::new())),
        }
    }

    /// Open and fund the accounts.
    pub async fn initialize(&mut self) -> anyhow::Result<()> {
        info!(
            accounts = self.config.accounts,
            workload = %self.workload.name,
            "Initializing simulation"
        );

        let mut accounts = Vec::with_capacity(self.config.accounts);
        for i in 0..self.config.accounts {
            let kind = self.workload.kind_for(i);
            let account = self
                .engine
                .open_account(OwnerId::new(format!("sim-user-{i}")), kind)
                .await?;

            if self.config.initial_balance > Decimal::ZERO {
                self.engine
                    .deposit(&account.number, self.config.initial_balance, Some("opening deposit"))
                    .await?;
                self.metrics
                    .write()
                    .await
                    .external_net += self.config.initial_balance;
            }

            info!(account = %account.number, kind = ?kind, "Account funded");
            accounts.push(account.number);
        }

        self.accounts = Arc::new(accounts);
        Ok(())
    }

    /// Run every worker to completion and verify the ledger.
    pub async fn run(&self) -> anyhow::Result<SimulationReport> {
        if self.accounts.is_empty() {
            anyhow::bail!("Simulation has no accounts; call initialize first");
        }

        info!(
            workers = self.config.workers,
            operations = self.config.operations,
            "Running simulation"
        );

        let start = Instant::now();
        let base_seed = match self.config.seed {
            Some(seed) => seed,
            None => rand::thread_rng().gen(),
        };

        let mut handles = Vec::with_capacity(self.config.workers);
        for worker in 0..self.config.workers {
            let worker_ctx = Worker {
                id: worker,
                rng: StdRng::seed_from_u64(base_seed.wrapping_add(worker as u64)),
                operations: self.config.operations,
                workload: self.workload.clone(),
                engine: self.engine.clone(),
                store: self.store.clone(),
                accounts: self.accounts.clone(),
                metrics: self.metrics.clone(),
            };
            handles.push(tokio::spawn(worker_ctx.run()));
        }

        for handle in futures::future::join_all(handles).await {
            handle?;
        }

        let locks = self.engine.lock_manager();
        let pruned = locks.prune_idle();
        info!(pruned, remaining = locks.tracked_accounts(), "Idle account locks released");

        let elapsed = start.elapsed();
        self.report(elapsed).await
    }

    /// Ledger counters in Prometheus text format.
    pub fn prometheus(&self) -> String {
        self.engine.shared_metrics().to_prometheus()
    }

    async fn report(&self, elapsed: Duration) -> anyhow::Result<SimulationReport> {
        let metrics = self.metrics.read().await.clone();

        let mut actual_total = Decimal::ZERO;
        let mut inconsistent_accounts = Vec::new();
        for account in self.accounts.iter() {
            actual_total += self.engine.balance(account).await?.balance;

            let reconciliation = self.engine.reconcile(account).await?;
            if !reconciliation.is_consistent() {
                error!(
                    account = %account,
                    discrepancy = %reconciliation.discrepancy(),
                    "Reconciliation failed"
                );
                inconsistent_accounts.push(account.clone());
            }
        }

        Ok(SimulationReport {
            workload: self.workload.name.clone(),
            elapsed_ms: elapsed.as_millis(),
            throughput: metrics.throughput(elapsed.as_secs_f64()),
            average_latency_us: metrics.average_latency_us(),
            p99_latency_us: metrics.p99_latency_us(),
            expected_total: metrics.external_net,
            actual_total,
            inconsistent_accounts,
            metrics,
            ledger: Some(self.engine.metrics()),
        })
    }
}

/// One concurrent client issuing operations.
struct Worker {
    id: usize,
    rng: StdRng,
    operations: usize,
    workload: Arc<Workload>,
    engine: Arc<TransactionEngine>,
    store: InMemoryLedgerStore,
    accounts: Arc<Vec<AccountNumber>>,
    metrics: Arc<RwLock<SimulationMetrics>>,
}

impl Worker {
    async fn run(mut self) {
        for n in 1..=self.operations {
            if let Some(every) = self.workload.fault_every {
                if every > 0 && n % every == 0 {
                    self.store.inject_fault(Fault::SaveAccount { nth: 1 });
                    self.metrics.write().await.record_fault();
                }
            }

            let operation = self.workload.next_operation(&mut self.rng, self.accounts.len());
            let started = Instant::now();
            let result = self.execute(operation).await;
            let latency = started.elapsed().as_micros() as u64;

            let mut metrics = self.metrics.write().await;
            match result {
                Ok(delta) => metrics.record_success(latency, delta),
                Err(e) => {
                    if !matches!(e, corebank_common::LedgerError::InsufficientFunds { .. }) {
                        warn!(worker = self.id, error = %e, "Operation failed");
                    }
                    metrics.record_failure(&e);
                }
            }
        }

        info!(worker = self.id, "Worker finished");
    }

    /// Run one operation. Returns the change in money held by the ledger.
    async fn execute(&self, operation: Operation) -> corebank_common::Result<Decimal> {
        let amount = operation.amount();
        match operation {
            Operation::Deposit { account, .. } => {
                self.engine
                    .deposit(&self.accounts[account], amount, None)
                    .await?;
                Ok(amount)
            }
            Operation::Withdraw { account, .. } => {
                self.engine
                    .withdraw(&self.accounts[account], amount, None)
                    .await?;
                Ok(-amount)
            }
            Operation::Transfer { from, to, .. } => {
                self.engine
                    .transfer(&self.accounts[from], &self.accounts[to], amount, None)
                    .await?;
                Ok(Decimal::ZERO)
            }
        }
    }
}
