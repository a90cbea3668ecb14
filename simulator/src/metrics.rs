//! Simulation metrics.

use std::collections::VecDeque;

use rust_decimal::Decimal;
use serde::Serialize;

use corebank_common::LedgerError;

/// Simulation metrics.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationMetrics {
    /// Total operations attempted.
    pub total_operations: u64,
    /// Completed operations.
    pub completed: u64,
    /// Operations rejected for insufficient funds.
    pub insufficient_funds: u64,
    /// Operations failed by an injected store fault.
    pub store_failures: u64,
    /// Any other error.
    pub other_errors: u64,
    /// Faults armed.
    pub faults_injected: u64,
    /// Money that entered the ledger minus money that left it.
    pub external_net: Decimal,
    /// Latency samples (microseconds).
    #[serde(skip)]
    latency_samples: VecDeque<u64>,
    /// Maximum samples to keep.
    #[serde(skip)]
    max_samples: usize,
}

impl SimulationMetrics {
    /// Create new metrics.
    pub fn new() -> Self {
        Self {
            total_operations: 0,
            completed: 0,
            insufficient_funds: 0,
            store_failures: 0,
            other_errors: 0,
            faults_injected: 0,
            external_net: Decimal::ZERO,
            latency_samples: VecDeque::with_capacity(10000),
            max_samples: 10000,
        }
    }

    /// Record a completed operation and its effect on money held by the
    /// ledger (positive for deposits, negative for withdrawals, zero for
    /// transfers).
    pub fn record_success(&mut self, latency_us: u64, external_delta: Decimal) {
        self.total_operations += 1;
        self.completed += 1;
        self.external_net += external_delta;

        if self.latency_samples.len() >= self.max_samples {
            self.latency_samples.pop_front();
        }
        self.latency_samples.push_back(latency_us);
    }

    /// Record a failed operation.
    pub fn record_failure(&mut self, error: &LedgerError) {
        self.total_operations += 1;
        match error {
            LedgerError::InsufficientFunds { .. } => self.insufficient_funds += 1,
            LedgerError::TransactionFailed { .. } => self.store_failures += 1,
            _ => self.other_errors += 1,
        }
    }

    /// Record an armed fault.
    pub fn record_fault(&mut self) {
        self.faults_injected += 1;
    }

    /// Get average latency in microseconds.
    pub fn average_latency_us(&self) -> u64 {
        if self.latency_samples.is_empty() {
            return 0;
        }

        let sum: u64 = self.latency_samples.iter().sum();
        sum / self.latency_samples.len() as u64
    }

    /// Get p50 latency.
    pub fn p50_latency_us(&self) -> u64 {
        self.percentile_latency(50)
    }

    /// Get p99 latency.
    pub fn p99_latency_us(&self) -> u64 {
        self.percentile_latency(99)
    }

    fn percentile_latency(&self, percentile: usize) -> u64 {
        if self.latency_samples.is_empty() {
            return 0;
        }

        let mut sorted: Vec<_> = self.latency_samples.iter().copied().collect();
        sorted.sort_unstable();

        let idx = (sorted.len() * percentile / 100).min(sorted.len() - 1);
        sorted[idx]
    }

    /// Get success rate.
    pub fn success_rate(&self) -> f64 {
        if self.total_operations == 0 {
            return 0.0;
        }

        self.completed as f64 / self.total_operations as f64
    }

    /// Get throughput (operations per second).
    pub fn throughput(&self, elapsed_secs: f64) -> f64 {
        if elapsed_secs <= 0.0 {
            return 0.0;
        }

        self.total_operations as f64 / elapsed_secs
    }
}

impl Default for SimulationMetrics {
    fn default() -> Self {
        Self::new()
    }
}
