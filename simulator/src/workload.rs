//! Simulation workloads.

use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use corebank_ledger::AccountKind;

/// A named workload profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workload {
    /// Workload name.
    pub name: String,
    /// Description.
    pub description: String,
    /// Relative operation weights.
    pub mix: OperationMix,
    /// Account kinds cycled through when opening accounts.
    pub kinds: Vec<AccountKind>,
    /// Largest generated amount, in cents.
    pub max_amount_cents: i64,
    /// Arm a store fault every this many operations per worker.
    pub fault_every: Option<usize>,
}

/// Relative weights of each operation kind.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OperationMix {
    pub deposit: u32,
    pub withdraw: u32,
    pub transfer: u32,
}

impl OperationMix {
    fn total(&self) -> u32 {
        self.deposit + self.withdraw + self.transfer
    }
}

/// One generated operation, by account index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Deposit { account: usize, cents: i64 },
    Withdraw { account: usize, cents: i64 },
    Transfer { from: usize, to: usize, cents: i64 },
}

impl Operation {
    /// Amount as a ledger decimal.
    pub fn amount(&self) -> Decimal {
        let cents = match self {
            Operation::Deposit { cents, .. }
            | Operation::Withdraw { cents, .. }
            | Operation::Transfer { cents, .. } => *cents,
        };
        Decimal::new(cents, 2)
    }
}

impl Workload {
    /// Load a workload by name.
    pub fn load(name: &str) -> anyhow::Result<Self> {
        match name {
            "balanced" => Ok(Self::balanced()),
            "transfer-heavy" => Ok(Self::transfer_heavy()),
            "overdraft" => Ok(Self::overdraft()),
            "failure-recovery" => Ok(Self::failure_recovery()),
            _ => Err(anyhow::anyhow!("Unknown workload: {}", name)),
        }
    }

    /// Even mix across every account kind.
    fn balanced() -> Self {
        Self {
            name: "balanced".to_string(),
            description: "Deposits, withdrawals and transfers in equal measure".to_string(),
            mix: OperationMix {
                deposit: 1,
                withdraw: 1,
                transfer: 1,
            },
            kinds: AccountKind::ALL.to_vec(),
            max_amount_cents: 50_000,
            fault_every: None,
        }
    }

    /// Mostly transfers over few accounts, maximizing lock contention.
    fn transfer_heavy() -> Self {
        Self {
            name: "transfer-heavy".to_string(),
            description: "Transfers between a small set of hot accounts".to_string(),
            mix: OperationMix {
                deposit: 1,
                withdraw: 1,
                transfer: 8,
            },
            kinds: vec![AccountKind::Savings, AccountKind::Current],
            max_amount_cents: 100_000,
            fault_every: None,
        }
    }

    /// Large withdrawals from CURRENT accounts, exercising the overdraft floor.
    fn overdraft() -> Self {
        Self {
            name: "overdraft".to_string(),
            description: "Large withdrawals against CURRENT accounts".to_string(),
            mix: OperationMix {
                deposit: 1,
                withdraw: 6,
                transfer: 3,
            },
            kinds: vec![AccountKind::Current],
            max_amount_cents: 2_000_000,
            fault_every: None,
        }
    }

    /// Balanced mix with periodic store failures.
    fn failure_recovery() -> Self {
        Self {
            name: "failure-recovery".to_string(),
            description: "Balanced mix with a store fault armed every 25 operations".to_string(),
            fault_every: Some(25),
            ..Self::balanced()
        }
    }

    /// Account kind for the `index`-th opened account.
    pub fn kind_for(&self, index: usize) -> AccountKind {
        if self.kinds.is_empty() {
            return AccountKind::Savings;
        }
        self.kinds[index % self.kinds.len()]
    }

    /// Generate the next operation over `accounts` accounts.
    pub fn next_operation<R: Rng>(&self, rng: &mut R, accounts: usize) -> Operation {
        let cents = rng.gen_range(1..=self.max_amount_cents.max(1));
        let account = rng.gen_range(0..accounts);

        let total = self.mix.total().max(1);
        let roll = rng.gen_range(0..total);

        if roll < self.mix.deposit {
            Operation::Deposit { account, cents }
        } else if roll < self.mix.deposit + self.mix.withdraw {
            Operation::Withdraw { account, cents }
        } else {
            let mut to = rng.gen_range(0..accounts);
            if accounts > 1 {
                while to == account {
                    to = rng.gen_range(0..accounts);
                }
            }
            Operation::Transfer {
                from: account,
                to,
                cents,
            }
        }
    }
}
