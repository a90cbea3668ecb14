//! Account balance snapshots.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use corebank_common::AccountNumber;

use crate::account::AccountKind;

/// Account balance at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountBalance {
    /// Account number.
    pub account: AccountNumber,
    /// Account kind.
    pub kind: AccountKind,
    /// Booked balance. Negative only for overdrawn CURRENT accounts.
    pub balance: Decimal,
    /// Overdraft limit in force.
    pub overdraft_limit: Decimal,
    /// Whether the account accepts transactions.
    pub active: bool,
    /// When this balance was last updated.
    pub as_of: DateTime<Utc>,
}

impl AccountBalance {
    /// Amount that can still be debited (balance plus overdraft headroom).
    pub fn available(&self) -> Decimal {
        self.balance.saturating_add(self.overdraft_limit)
    }

    /// Check if a debit of `amount` stays above the overdraft floor.
    pub fn has_sufficient_funds(&self, amount: Decimal) -> bool {
        within_floor(self.balance, amount, self.overdraft_limit)
    }

    /// Check if the account is currently drawing on its overdraft.
    pub fn is_overdrawn(&self) -> bool {
        self.balance < Decimal::ZERO
    }
}

/// `balance - amount >= -overdraft_limit`. A difference that does not fit in
/// a `Decimal` is below any floor.
fn within_floor(balance: Decimal, amount: Decimal, overdraft_limit: Decimal) -> bool {
    balance
        .checked_sub(amount)
        .is_some_and(|after| after >= -overdraft_limit)
}
