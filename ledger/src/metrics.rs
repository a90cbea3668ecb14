//! Counters for ledger monitoring.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::transaction::TransactionKind;

/// Ledger metrics.
#[derive(Debug, Default)]
pub struct LedgerMetrics {
    /// Completed deposits.
    pub deposits_completed: AtomicU64,
    /// Completed withdrawals.
    pub withdrawals_completed: AtomicU64,
    /// Completed transfers.
    pub transfers_completed: AtomicU64,
    /// Operations rejected before any account was locked.
    pub rejected: AtomicU64,
    /// Operations that failed after locking.
    pub failed: AtomicU64,
    /// Requests answered from a prior idempotent result.
    pub replayed: AtomicU64,
    /// Commits retried after an identifier collision.
    pub commit_retries: AtomicU64,
    /// Stale writes rejected by the store.
    pub conflicts: AtomicU64,
    /// Lock sets acquired.
    pub locks_acquired: AtomicU64,
    /// Accounts opened.
    pub accounts_opened: AtomicU64,
}

impl LedgerMetrics {
    /// Create new metrics instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a completed transaction.
    pub fn completed(&self, kind: TransactionKind) {
        let counter = match kind {
            TransactionKind::Deposit => &self.deposits_completed,
            TransactionKind::Withdrawal => &self.withdrawals_completed,
            TransactionKind::Transfer => &self.transfers_completed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a validation rejection.
    pub fn rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failure after locking.
    pub fn failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an idempotent replay.
    pub fn replayed(&self) {
        self.replayed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a commit retry.
    pub fn commit_retry(&self) {
        self.commit_retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a stale-write conflict.
    pub fn conflict(&self) {
        self.conflicts.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a lock acquisition.
    pub fn lock_acquired(&self) {
        self.locks_acquired.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an opened account.
    pub fn account_opened(&self) {
        self.accounts_opened.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            deposits_completed: self.deposits_completed.load(Ordering::Relaxed),
            withdrawals_completed: self.withdrawals_completed.load(Ordering::Relaxed),
            transfers_completed: self.transfers_completed.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            replayed: self.replayed.load(Ordering::Relaxed),
            commit_retries: self.commit_retries.load(Ordering::Relaxed),
            conflicts: self.conflicts.load(Ordering::Relaxed),
            locks_acquired: self.locks_acquired.load(Ordering::Relaxed),
            accounts_opened: self.accounts_opened.load(Ordering::Relaxed),
        }
    }

    /// Export metrics in Prometheus text format.
    pub fn to_prometheus(&self) -> String {
        let s = self.snapshot();
        let counters = [
            ("deposits_completed", "Completed deposits", s.deposits_completed),
            ("withdrawals_completed", "Completed withdrawals", s.withdrawals_completed),
            ("transfers_completed", "Completed transfers", s.transfers_completed),
            ("rejected", "Operations rejected by validation", s.rejected),
            ("failed", "Operations that passed validation but failed", s.failed),
            ("replayed", "Idempotent replays", s.replayed),
            ("commit_retries", "Commits retried after ID collision", s.commit_retries),
            ("conflicts", "Stale writes rejected by the store", s.conflicts),
            ("locks_acquired", "Account lock sets acquired", s.locks_acquired),
            ("accounts_opened", "Accounts opened", s.accounts_opened),
        ];

        let mut out = String::new();
        for (name, help, value) in counters {
            out.push_str(&format!(
                "# HELP corebank_{name} {help}\n# TYPE corebank_{name} counter\ncorebank_{name} {value}\n\n"
            ));
        }
        out
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub deposits_completed: u64,
    pub withdrawals_completed: u64,
    pub transfers_completed: u64,
    pub rejected: u64,
    pub failed: u64,
    pub replayed: u64,
    pub commit_retries: u64,
    pub conflicts: u64,
    pub locks_acquired: u64,
    pub accounts_opened: u64,
}

impl MetricsSnapshot {
    /// Total completed transactions of any kind.
    pub fn completed(&self) -> u64 {
        self.deposits_completed + self.withdrawals_completed + self.transfers_completed
    }
}

/// Shared metrics instance.
pub type SharedMetrics = Arc<LedgerMetrics>;
