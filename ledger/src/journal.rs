//! Postings derived from completed transactions.
//!
//! Postings are not stored. They are the per-account view of a transaction
//! and are what reconciliation replays.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use corebank_common::{AccountNumber, TransactionId};

use crate::transaction::{Transaction, TransactionStatus};

/// Type of posting, from the account holder's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryType {
    /// Money leaves the account.
    Debit,
    /// Money enters the account.
    Credit,
}

/// A single balance effect of a transaction on one account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Posting {
    /// Transaction the posting belongs to.
    pub transaction_id: TransactionId,
    /// Account affected.
    pub account: AccountNumber,
    /// Entry type (debit or credit).
    pub entry_type: EntryType,
    /// Unsigned amount.
    pub amount: Decimal,
    /// When the transaction was created.
    pub created_at: DateTime<Utc>,
}

impl Posting {
    /// Signed effect on the account balance.
    pub fn signed_amount(&self) -> Decimal {
        match self.entry_type {
            EntryType::Debit => -self.amount,
            EntryType::Credit => self.amount,
        }
    }
}

impl Transaction {
    /// Postings of this transaction. Empty unless the transaction completed.
    pub fn postings(&self) -> Vec<Posting> {
        if self.status != TransactionStatus::Completed {
            return Vec::new();
        }

        let posting = |account: &AccountNumber, entry_type| Posting {
            transaction_id: self.id.clone(),
            account: account.clone(),
            entry_type,
            amount: self.amount.value(),
            created_at: self.created_at,
        };

        let mut postings = Vec::with_capacity(2);
        if let Some(source) = &self.source {
            postings.push(posting(source, EntryType::Debit));
        }
        if let Some(destination) = &self.destination {
            postings.push(posting(destination, EntryType::Credit));
        }
        postings
    }
}

/// Net effect of a set of postings on `account`.
pub fn net_effect<'a>(
    account: &AccountNumber,
    postings: impl IntoIterator<Item = &'a Posting>,
) -> Decimal {
    postings
        .into_iter()
        .filter(|p| &p.account == account)
        .map(Posting::signed_amount)
        .sum()
}
