//! Account definitions for the ledger.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use corebank_common::{
    to_ledger_scale, AccountNumber, Amount, LedgerError, OwnerId, Result, MAX_BALANCE,
};

use crate::balance::AccountBalance;

/// Account kind. Closed set; each kind carries its own policy defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountKind {
    Savings,
    Current,
    Salary,
    FixedDeposit,
}

impl AccountKind {
    /// All account kinds.
    pub const ALL: [AccountKind; 4] = [
        AccountKind::Savings,
        AccountKind::Current,
        AccountKind::Salary,
        AccountKind::FixedDeposit,
    ];

    /// Default policy for this kind.
    pub fn default_policy(&self) -> AccountPolicy {
        AccountPolicy::for_kind(*self)
    }
}

/// Kind-specific policy fields.
///
/// Only CURRENT accounts may carry a nonzero overdraft limit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountPolicy {
    interest_rate: Decimal,
    minimum_balance: Decimal,
    overdraft_limit: Decimal,
}

impl AccountPolicy {
    /// Policy defaults for an account kind.
    pub fn for_kind(kind: AccountKind) -> Self {
        let (interest_rate, minimum_balance, overdraft_limit) = match kind {
            AccountKind::Savings => (Decimal::new(35, 1), Decimal::from(1000), Decimal::ZERO),
            AccountKind::Current => (Decimal::ZERO, Decimal::from(5000), Decimal::from(50000)),
            AccountKind::Salary => (Decimal::new(30, 1), Decimal::ZERO, Decimal::ZERO),
            AccountKind::FixedDeposit => (Decimal::new(65, 1), Decimal::from(10000), Decimal::ZERO),
        };

        Self {
            interest_rate,
            minimum_balance: to_ledger_scale(minimum_balance),
            overdraft_limit: to_ledger_scale(overdraft_limit),
        }
    }

    /// CURRENT account policy with a custom overdraft limit.
    pub fn current_with_overdraft(overdraft_limit: Decimal) -> Result<Self> {
        if overdraft_limit < Decimal::ZERO {
            return Err(LedgerError::InvalidAmount {
                amount: overdraft_limit.to_string(),
                reason: "overdraft limit cannot be negative".to_string(),
            });
        }
        if overdraft_limit > MAX_BALANCE {
            return Err(LedgerError::InvalidAmount {
                amount: overdraft_limit.to_string(),
                reason: format!("overdraft limit exceeds {MAX_BALANCE}"),
            });
        }

        Ok(Self {
            overdraft_limit: to_ledger_scale(overdraft_limit),
            ..Self::for_kind(AccountKind::Current)
        })
    }

    /// Annual interest rate in percent. Informational.
    pub fn interest_rate(&self) -> Decimal {
        self.interest_rate
    }

    /// Minimum balance. Informational, not enforced on debits.
    pub fn minimum_balance(&self) -> Decimal {
        self.minimum_balance
    }

    /// Overdraft limit; the balance may not go below its negation.
    pub fn overdraft_limit(&self) -> Decimal {
        self.overdraft_limit
    }
}

/// A ledger account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    /// Unique account number.
    pub number: AccountNumber,
    /// Owning user.
    pub owner: OwnerId,
    /// Account kind.
    pub kind: AccountKind,
    /// Current balance, booked at two fractional digits.
    pub balance: Decimal,
    /// Whether the account accepts debits and credits.
    pub active: bool,
    /// Kind-specific policy.
    pub policy: AccountPolicy,
    /// When the account was created.
    pub created_at: DateTime<Utc>,
    /// When the account was last updated.
    pub updated_at: DateTime<Utc>,
    /// Store version, bumped on every committed write.
    pub version: u64,
}

impl Account {
    /// Open a new account with zero balance and the kind's default policy.
    pub fn open(number: AccountNumber, owner: OwnerId, kind: AccountKind) -> Self {
        Self::with_policy(number, owner, kind, kind.default_policy())
    }

    /// Open a new account with an explicit policy.
    pub fn with_policy(
        number: AccountNumber,
        owner: OwnerId,
        kind: AccountKind,
        policy: AccountPolicy,
    ) -> Self {
        let now = Utc::now();
        Self {
            number,
            owner,
            kind,
            balance: to_ledger_scale(Decimal::ZERO),
            active: true,
            policy,
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    /// Check if account can transact.
    pub fn can_transact(&self) -> bool {
        self.active
    }

    /// Fail with `AccountInactive` unless the account can transact.
    pub fn ensure_active(&self) -> Result<()> {
        if !self.can_transact() {
            return Err(LedgerError::AccountInactive(self.number.clone()));
        }
        Ok(())
    }

    /// Lowest balance the account may reach.
    pub fn overdraft_floor(&self) -> Decimal {
        -self.policy.overdraft_limit()
    }

    /// Increase the balance.
    pub fn credit(&mut self, amount: Amount) -> Result<()> {
        self.ensure_active()?;

        let balance = self
            .balance
            .checked_add(amount.value())
            .filter(|balance| *balance <= MAX_BALANCE)
            .ok_or_else(|| LedgerError::InvalidAmount {
                amount: amount.to_string(),
                reason: format!("credit would take the balance above {MAX_BALANCE}"),
            })?;

        self.set_balance(balance);
        Ok(())
    }

    /// Decrease the balance, honoring the overdraft floor.
    pub fn debit(&mut self, amount: Amount) -> Result<()> {
        self.ensure_active()?;

        let balance = self
            .balance
            .checked_sub(amount.value())
            .filter(|balance| *balance >= self.overdraft_floor());
        match balance {
            Some(balance) => {
                self.set_balance(balance);
                Ok(())
            }
            None => Err(LedgerError::InsufficientFunds {
                account: self.number.clone(),
                requested: amount.value(),
                available: self.balance.saturating_add(self.policy.overdraft_limit()),
            }),
        }
    }

    /// Soft-deactivate the account. Prior transactions are not reversed.
    pub fn deactivate(&mut self) {
        self.active = false;
        self.updated_at = Utc::now();
    }

    /// Point-in-time balance snapshot.
    pub fn snapshot(&self) -> AccountBalance {
        AccountBalance {
            account: self.number.clone(),
            kind: self.kind,
            balance: self.balance,
            overdraft_limit: self.policy.overdraft_limit(),
            active: self.active,
            as_of: self.updated_at,
        }
    }

    fn set_balance(&mut self, balance: Decimal) {
        self.balance = to_ledger_scale(balance);
        self.updated_at = Utc::now();
    }
}
