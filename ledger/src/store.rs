//! Ledger store abstraction.
//!
//! The store owns durable state. All writes go through a [`UnitOfWork`]:
//! staged writes become visible together on [`UnitOfWork::commit`] or not at
//! all. A unit of work that is dropped without committing is discarded, so an
//! early `?` return or a panic in the caller never leaves partial state.

use async_trait::async_trait;

use corebank_common::{AccountNumber, DateRange, IdempotencyKey, OwnerId, Result, TransactionId};

use crate::account::Account;
use crate::history::{Page, PageRequest};
use crate::transaction::Transaction;

/// Durable keyed storage for accounts and the transaction log.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Open a unit of work.
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>>;

    // === Accounts ===

    /// Get committed account state. Fails with `AccountNotFound`.
    async fn get_account(&self, number: &AccountNumber) -> Result<Account>;

    /// Check if an account number is taken.
    async fn account_exists(&self, number: &AccountNumber) -> Result<bool>;

    /// All accounts, ordered by account number.
    async fn list_accounts(&self) -> Result<Vec<Account>>;

    /// Accounts opened for `owner`, ordered by account number. With
    /// `active_only`, deactivated accounts are skipped.
    async fn accounts_for_owner(&self, owner: &OwnerId, active_only: bool) -> Result<Vec<Account>>;

    // === Transactions ===

    /// Get a transaction. Fails with `TransactionNotFound`.
    async fn get_transaction(&self, id: &TransactionId) -> Result<Transaction>;

    /// Check if a transaction ID is taken.
    async fn transaction_exists(&self, id: &TransactionId) -> Result<bool>;

    /// Find the transaction committed under an idempotency key.
    async fn find_by_idempotency_key(&self, key: &IdempotencyKey)
        -> Result<Option<Transaction>>;

    /// Transactions where the account is source or destination, newest
    /// first. Fails with `AccountNotFound`.
    async fn history_page(
        &self,
        number: &AccountNumber,
        request: PageRequest,
    ) -> Result<Page<Transaction>>;

    /// Transactions involving the account created within `range`
    /// (inclusive), newest first. Fails with `AccountNotFound`.
    async fn history_between(
        &self,
        number: &AccountNumber,
        range: DateRange,
    ) -> Result<Vec<Transaction>>;
}

/// A scoped set of reads and staged writes applied atomically.
///
/// After `commit` or `rollback` every further call fails.
#[async_trait]
pub trait UnitOfWork: Send {
    /// Read an account, including writes staged in this unit of work.
    async fn get_account(&mut self, number: &AccountNumber) -> Result<Account>;

    /// Stage a new account. Rejected with `DuplicateId` if the number exists.
    async fn insert_account(&mut self, account: Account) -> Result<()>;

    /// Stage an updated account. Rejected with `Conflict` if `account.version`
    /// is no longer the committed version.
    async fn save_account(&mut self, account: Account) -> Result<()>;

    /// Stage a transaction record. Rejected with `DuplicateId` on a taken
    /// transaction ID or reference number, `DuplicateIdempotencyKey` on a
    /// taken idempotency key.
    async fn append_transaction(&mut self, transaction: Transaction) -> Result<()>;

    /// Apply every staged write, or none.
    async fn commit(&mut self) -> Result<()>;

    /// Discard staged writes.
    async fn rollback(&mut self);
}
