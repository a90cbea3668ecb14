//! Transaction records and their status state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use corebank_common::{
    AccountNumber, Amount, IdempotencyKey, LedgerError, ReferenceNumber, Result, TransactionId,
};

/// Kind of money movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionKind {
    Deposit,
    Withdrawal,
    Transfer,
}

/// Transaction status representing the lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    /// Being validated; never persisted in this state.
    Pending,
    /// All balance mutations durably applied.
    Completed,
    /// No balance mutation applied.
    Failed,
}

impl TransactionStatus {
    /// Check if this is a final state.
    pub fn is_final(&self) -> bool {
        matches!(self, TransactionStatus::Completed | TransactionStatus::Failed)
    }

    /// Get valid next states from current state.
    pub fn valid_transitions(&self) -> &[TransactionStatus] {
        match self {
            TransactionStatus::Pending => &[TransactionStatus::Completed, TransactionStatus::Failed],
            TransactionStatus::Completed => &[],
            TransactionStatus::Failed => &[],
        }
    }

    /// Check if transition to given state is valid.
    pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
        self.valid_transitions().contains(&next)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransactionStatus::Pending => "PENDING",
            TransactionStatus::Completed => "COMPLETED",
            TransactionStatus::Failed => "FAILED",
        };
        write!(f, "{name}")
    }
}

/// An immutable ledger transaction record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Unique transaction identifier.
    pub id: TransactionId,
    /// Kind of movement.
    pub kind: TransactionKind,
    /// Strictly positive amount.
    pub amount: Amount,
    /// Free-text description.
    pub description: Option<String>,
    /// Debited account. Absent for deposits.
    pub source: Option<AccountNumber>,
    /// Credited account. Absent for withdrawals.
    pub destination: Option<AccountNumber>,
    /// Current status.
    pub status: TransactionStatus,
    /// When the transaction was created.
    pub created_at: DateTime<Utc>,
    /// External correlation identifier.
    pub reference: ReferenceNumber,
    /// Caller-supplied deduplication key.
    pub idempotency_key: Option<IdempotencyKey>,
    /// Why the transaction failed (FAILED records only).
    pub failure_reason: Option<String>,
}

impl Transaction {
    /// Pending deposit into `destination`.
    pub fn deposit(
        id: TransactionId,
        reference: ReferenceNumber,
        destination: AccountNumber,
        amount: Amount,
        description: Option<String>,
    ) -> Self {
        Self::pending(id, reference, TransactionKind::Deposit, amount, description, None, Some(destination))
    }

    /// Pending withdrawal from `source`.
    pub fn withdrawal(
        id: TransactionId,
        reference: ReferenceNumber,
        source: AccountNumber,
        amount: Amount,
        description: Option<String>,
    ) -> Self {
        Self::pending(id, reference, TransactionKind::Withdrawal, amount, description, Some(source), None)
    }

    /// Pending transfer. Fails with `SameAccount` when both sides match.
    pub fn transfer(
        id: TransactionId,
        reference: ReferenceNumber,
        source: AccountNumber,
        destination: AccountNumber,
        amount: Amount,
        description: Option<String>,
    ) -> Result<Self> {
        if source == destination {
            return Err(LedgerError::SameAccount(source));
        }

        Ok(Self::pending(
            id,
            reference,
            TransactionKind::Transfer,
            amount,
            description,
            Some(source),
            Some(destination),
        ))
    }

    fn pending(
        id: TransactionId,
        reference: ReferenceNumber,
        kind: TransactionKind,
        amount: Amount,
        description: Option<String>,
        source: Option<AccountNumber>,
        destination: Option<AccountNumber>,
    ) -> Self {
        Self {
            id,
            kind,
            amount,
            description,
            source,
            destination,
            status: TransactionStatus::Pending,
            created_at: Utc::now(),
            reference,
            idempotency_key: None,
            failure_reason: None,
        }
    }

    /// Attach an idempotency key.
    pub fn with_idempotency_key(mut self, key: Option<IdempotencyKey>) -> Self {
        self.idempotency_key = key;
        self
    }

    /// Mark the transaction completed.
    pub fn complete(&mut self) -> Result<()> {
        self.transition_to(TransactionStatus::Completed)
    }

    /// Mark the transaction failed.
    pub fn fail(&mut self, reason: impl Into<String>) -> Result<()> {
        self.transition_to(TransactionStatus::Failed)?;
        self.failure_reason = Some(reason.into());
        Ok(())
    }

    fn transition_to(&mut self, next: TransactionStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(LedgerError::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        Ok(())
    }

    /// Check the source/destination shape matches the kind.
    pub fn is_well_formed(&self) -> bool {
        match (self.kind, &self.source, &self.destination) {
            (TransactionKind::Deposit, None, Some(_)) => true,
            (TransactionKind::Withdrawal, Some(_), None) => true,
            (TransactionKind::Transfer, Some(from), Some(to)) => from != to,
            _ => false,
        }
    }

    /// Check if `account` is the source or destination.
    pub fn involves(&self, account: &AccountNumber) -> bool {
        self.source.as_ref() == Some(account) || self.destination.as_ref() == Some(account)
    }

    /// Accounts touched by this transaction.
    pub fn accounts(&self) -> Vec<&AccountNumber> {
        self.source.iter().chain(self.destination.iter()).collect()
    }
}
