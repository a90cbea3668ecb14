//! Transaction engine.
//!
//! Each operation validates its input, locks the accounts it touches in
//! ascending order, and then reads, checks, mutates and commits inside one
//! unit of work while still holding the locks. No balance read outside the
//! lock ever decides the outcome of a mutation.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{error, info, instrument, warn};

use corebank_common::{
    to_ledger_scale, AccountNumber, Amount, DateRange, IdempotencyKey, LedgerError, OwnerId,
    ReferenceNumber, Result, TransactionId,
};

use crate::account::{Account, AccountKind, AccountPolicy};
use crate::balance::AccountBalance;
use crate::config::{EngineConfig, LedgerConfig};
use crate::history::{Page, PageRequest, Reconciliation};
use crate::id_generator::IdGenerator;
use crate::journal::net_effect;
use crate::lock_manager::AccountLockManager;
use crate::metrics::{LedgerMetrics, MetricsSnapshot, SharedMetrics};
use crate::store::{LedgerStore, UnitOfWork};
use crate::transaction::{Transaction, TransactionKind, TransactionStatus};

/// A validated money movement request.
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerCommand {
    /// Credit `account`.
    Deposit {
        account: AccountNumber,
        amount: Amount,
        description: Option<String>,
    },
    /// Debit `account`.
    Withdraw {
        account: AccountNumber,
        amount: Amount,
        description: Option<String>,
    },
    /// Debit `from` and credit `to` atomically.
    Transfer {
        from: AccountNumber,
        to: AccountNumber,
        amount: Amount,
        description: Option<String>,
    },
}

impl LedgerCommand {
    /// Transaction kind this command produces.
    pub fn kind(&self) -> TransactionKind {
        match self {
            LedgerCommand::Deposit { .. } => TransactionKind::Deposit,
            LedgerCommand::Withdraw { .. } => TransactionKind::Withdrawal,
            LedgerCommand::Transfer { .. } => TransactionKind::Transfer,
        }
    }

    /// Amount moved.
    pub fn amount(&self) -> Amount {
        match self {
            LedgerCommand::Deposit { amount, .. }
            | LedgerCommand::Withdraw { amount, .. }
            | LedgerCommand::Transfer { amount, .. } => *amount,
        }
    }

    fn description(&self) -> Option<&String> {
        match self {
            LedgerCommand::Deposit { description, .. }
            | LedgerCommand::Withdraw { description, .. }
            | LedgerCommand::Transfer { description, .. } => description.as_ref(),
        }
    }

    fn source(&self) -> Option<&AccountNumber> {
        match self {
            LedgerCommand::Withdraw { account, .. } => Some(account),
            LedgerCommand::Transfer { from, .. } => Some(from),
            LedgerCommand::Deposit { .. } => None,
        }
    }

    fn destination(&self) -> Option<&AccountNumber> {
        match self {
            LedgerCommand::Deposit { account, .. } => Some(account),
            LedgerCommand::Transfer { to, .. } => Some(to),
            LedgerCommand::Withdraw { .. } => None,
        }
    }

    /// Accounts the command touches.
    pub fn accounts(&self) -> Vec<&AccountNumber> {
        self.source().into_iter().chain(self.destination()).collect()
    }

    fn validate(&self) -> Result<()> {
        if let LedgerCommand::Transfer { from, to, .. } = self {
            if from == to {
                return Err(LedgerError::SameAccount(from.clone()));
            }
        }
        Ok(())
    }

    /// Check a stored transaction was produced by an identical request.
    fn matches(&self, transaction: &Transaction) -> bool {
        transaction.kind == self.kind()
            && transaction.amount == self.amount()
            && transaction.source.as_ref() == self.source()
            && transaction.destination.as_ref() == self.destination()
            && transaction.description.as_ref() == self.description()
    }

    fn pending(&self, id: TransactionId, reference: ReferenceNumber) -> Result<Transaction> {
        let description = self.description().cloned();
        match self {
            LedgerCommand::Deposit { account, amount, .. } => Ok(Transaction::deposit(
                id,
                reference,
                account.clone(),
                *amount,
                description,
            )),
            LedgerCommand::Withdraw { account, amount, .. } => Ok(Transaction::withdrawal(
                id,
                reference,
                account.clone(),
                *amount,
                description,
            )),
            LedgerCommand::Transfer {
                from, to, amount, ..
            } => Transaction::transfer(id, reference, from.clone(), to.clone(), *amount, description),
        }
    }
}

/// The transaction engine.
pub struct TransactionEngine {
    /// Ledger store.
    store: Arc<dyn LedgerStore>,
    /// Per-account locks. Every engine over the same store must share one.
    locks: Arc<AccountLockManager>,
    /// Identifier generator.
    ids: IdGenerator,
    /// Engine configuration.
    config: EngineConfig,
    /// Counters.
    metrics: SharedMetrics,
}

impl TransactionEngine {
    /// Create an engine over `store`.
    pub fn new(
        store: Arc<dyn LedgerStore>,
        locks: Arc<AccountLockManager>,
        config: LedgerConfig,
    ) -> Self {
        Self {
            store,
            locks,
            ids: IdGenerator::new(config.id),
            config: config.engine,
            metrics: Arc::new(LedgerMetrics::new()),
        }
    }

    /// Get the lock manager.
    pub fn lock_manager(&self) -> &Arc<AccountLockManager> {
        &self.locks
    }

    /// Get the shared metrics handle.
    pub fn shared_metrics(&self) -> SharedMetrics {
        self.metrics.clone()
    }

    /// Get a metrics snapshot.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    // === Accounts ===

    /// Open an account with the kind's default policy.
    pub async fn open_account(&self, owner: OwnerId, kind: AccountKind) -> Result<Account> {
        self.open_account_with_policy(owner, kind, kind.default_policy())
            .await
    }

    /// Open an account with an explicit policy. Only CURRENT accounts may
    /// carry an overdraft.
    #[instrument(skip(self, policy))]
    pub async fn open_account_with_policy(
        &self,
        owner: OwnerId,
        kind: AccountKind,
        policy: AccountPolicy,
    ) -> Result<Account> {
        self.insert_account(owner, kind, policy)
            .await
            .map_err(|e| self.observe(e))
    }

    async fn insert_account(
        &self,
        owner: OwnerId,
        kind: AccountKind,
        policy: AccountPolicy,
    ) -> Result<Account> {
        if kind != AccountKind::Current && !policy.overdraft_limit().is_zero() {
            return Err(LedgerError::InvalidAmount {
                amount: policy.overdraft_limit().to_string(),
                reason: format!("{kind:?} accounts cannot carry an overdraft"),
            });
        }

        for attempt in 1..=self.config.max_commit_attempts {
            let number = self.ids.account_number(self.store.as_ref()).await?;
            let account = Account::with_policy(number, owner.clone(), kind, policy.clone());

            let mut uow = self.store.begin().await?;
            let result = match uow.insert_account(account.clone()).await {
                Ok(()) => uow.commit().await,
                Err(e) => {
                    uow.rollback().await;
                    Err(e)
                }
            };

            match result {
                Ok(()) => {
                    self.metrics.account_opened();
                    info!(account = %account.number, "Account opened");
                    return Ok(account);
                }
                Err(LedgerError::DuplicateId(number)) => {
                    warn!(attempt, account = %number, "Account number taken at commit, retrying");
                    self.metrics.commit_retry();
                }
                Err(e) => return Err(e),
            }
        }

        Err(LedgerError::IdGenerationExhausted {
            attempts: self.config.max_commit_attempts,
        })
    }

    /// Deactivate an account. Past transactions are untouched; calling this
    /// on an inactive account is a no-op.
    #[instrument(skip(self), fields(account = %number))]
    pub async fn deactivate_account(&self, number: &AccountNumber) -> Result<Account> {
        self.mark_inactive(number).await.map_err(|e| self.observe(e))
    }

    async fn mark_inactive(&self, number: &AccountNumber) -> Result<Account> {
        self.ensure_known(&[number]).await?;
        let _locks = self.locks.acquire_one(number).await;
        self.metrics.lock_acquired();

        let mut uow = self.store.begin().await?;
        let mut account = uow.get_account(number).await?;
        if !account.active {
            uow.rollback().await;
            return Ok(account);
        }

        account.deactivate();
        uow.save_account(account).await?;
        uow.commit().await?;

        info!("Account deactivated");
        self.store.get_account(number).await
    }

    /// Get an account.
    pub async fn account(&self, number: &AccountNumber) -> Result<Account> {
        self.store.get_account(number).await
    }

    /// All accounts, ordered by account number.
    pub async fn accounts(&self) -> Result<Vec<Account>> {
        self.store.list_accounts().await
    }

    /// Accounts opened for `owner`, ordered by account number. With
    /// `active_only`, deactivated accounts are skipped.
    pub async fn accounts_for_owner(
        &self,
        owner: &OwnerId,
        active_only: bool,
    ) -> Result<Vec<Account>> {
        self.store.accounts_for_owner(owner, active_only).await
    }

    /// Point-in-time balance snapshot.
    pub async fn balance(&self, number: &AccountNumber) -> Result<AccountBalance> {
        Ok(self.store.get_account(number).await?.snapshot())
    }

    // === Money movement ===

    /// Credit `account`.
    pub async fn deposit(
        &self,
        account: &AccountNumber,
        amount: Decimal,
        description: Option<&str>,
    ) -> Result<Transaction> {
        let amount = self.amount(amount)?;
        self.execute(
            LedgerCommand::Deposit {
                account: account.clone(),
                amount,
                description: description.map(str::to_string),
            },
            None,
        )
        .await
    }

    /// Debit `account`, honoring its overdraft floor.
    pub async fn withdraw(
        &self,
        account: &AccountNumber,
        amount: Decimal,
        description: Option<&str>,
    ) -> Result<Transaction> {
        let amount = self.amount(amount)?;
        self.execute(
            LedgerCommand::Withdraw {
                account: account.clone(),
                amount,
                description: description.map(str::to_string),
            },
            None,
        )
        .await
    }

    /// Move `amount` from `from` to `to`.
    pub async fn transfer(
        &self,
        from: &AccountNumber,
        to: &AccountNumber,
        amount: Decimal,
        description: Option<&str>,
    ) -> Result<Transaction> {
        let amount = self.amount(amount)?;
        self.execute(
            LedgerCommand::Transfer {
                from: from.clone(),
                to: to.clone(),
                amount,
                description: description.map(str::to_string),
            },
            None,
        )
        .await
    }

    fn amount(&self, value: Decimal) -> Result<Amount> {
        Amount::new(value).map_err(|e| {
            self.metrics.rejected();
            warn!(amount = %value, error = %e, "Amount rejected");
            e
        })
    }

    /// Run a command. With an idempotency key, a repeated identical request
    /// returns the originally committed transaction instead of running again.
    #[instrument(skip(self, command), fields(kind = ?command.kind(), amount = %command.amount()))]
    pub async fn execute(
        &self,
        command: LedgerCommand,
        idempotency_key: Option<IdempotencyKey>,
    ) -> Result<Transaction> {
        if let Err(e) = self.validate(&command, idempotency_key.as_ref()) {
            self.metrics.rejected();
            warn!(error = %e, "Request rejected");
            return Err(e);
        }

        if let Some(key) = &idempotency_key {
            if let Some(existing) = self.store.find_by_idempotency_key(key).await? {
                return self.replay(&command, key, existing);
            }
        }

        if let Err(e) = self.ensure_known(&command.accounts()).await {
            return self.fail(&command, idempotency_key.as_ref(), e).await;
        }

        let result = {
            let _locks = self.locks.acquire(&command.accounts()).await;
            self.metrics.lock_acquired();
            self.run_locked(&command, idempotency_key.as_ref()).await
        };

        match result {
            Ok(transaction) => {
                self.metrics.completed(transaction.kind);
                info!(
                    transaction_id = %transaction.id,
                    reference = %transaction.reference,
                    "Transaction completed"
                );
                Ok(transaction)
            }
            Err(e) => self.fail(&command, idempotency_key.as_ref(), e).await,
        }
    }

    fn validate(&self, command: &LedgerCommand, key: Option<&IdempotencyKey>) -> Result<()> {
        command.validate()?;
        if let Some(key) = key {
            if !key.is_valid() {
                return Err(LedgerError::InvalidIdempotencyKey(key.clone()));
            }
        }
        Ok(())
    }

    /// Fail with `AccountNotFound` for the first unknown account. Accounts
    /// are never removed, so the answer still holds once locked, and no lock
    /// entry is created for a number that was never opened.
    async fn ensure_known(&self, accounts: &[&AccountNumber]) -> Result<()> {
        for account in accounts {
            if !self.store.account_exists(account).await? {
                return Err(LedgerError::AccountNotFound((*account).clone()));
            }
        }
        Ok(())
    }

    fn replay(
        &self,
        command: &LedgerCommand,
        key: &IdempotencyKey,
        existing: Transaction,
    ) -> Result<Transaction> {
        if !command.matches(&existing) {
            self.metrics.rejected();
            warn!(idempotency_key = %key, "Idempotency key reused with a different request");
            return Err(LedgerError::IdempotencyKeyReused(key.clone()));
        }

        self.metrics.replayed();
        info!(
            idempotency_key = %key,
            transaction_id = %existing.id,
            "Returning previously committed transaction"
        );
        Ok(existing)
    }

    /// Must be called with every account of `command` locked.
    async fn run_locked(
        &self,
        command: &LedgerCommand,
        key: Option<&IdempotencyKey>,
    ) -> Result<Transaction> {
        if let Some(key) = key {
            // A same-account request with this key may have committed while
            // we waited on the lock.
            if self.store.find_by_idempotency_key(key).await?.is_some() {
                return Err(LedgerError::DuplicateIdempotencyKey(key.clone()));
            }
        }

        for attempt in 1..=self.config.max_commit_attempts {
            let id = self.ids.transaction_id(self.store.as_ref()).await?;
            let pending = command
                .pending(id, self.ids.reference_number())?
                .with_idempotency_key(key.cloned());

            match self.apply(command, pending).await {
                Err(LedgerError::DuplicateId(taken)) => {
                    warn!(attempt, id = %taken, "Identifier taken at commit, retrying");
                    self.metrics.commit_retry();
                }
                other => return other,
            }
        }

        Err(LedgerError::IdGenerationExhausted {
            attempts: self.config.max_commit_attempts,
        })
    }

    async fn apply(&self, command: &LedgerCommand, mut transaction: Transaction) -> Result<Transaction> {
        let mut uow = self.store.begin().await?;

        match stage(uow.as_mut(), command, &mut transaction).await {
            Ok(()) => {
                uow.commit().await?;
                Ok(transaction)
            }
            Err(e) => {
                uow.rollback().await;
                Err(e)
            }
        }
    }

    async fn fail(
        &self,
        command: &LedgerCommand,
        key: Option<&IdempotencyKey>,
        error: LedgerError,
    ) -> Result<Transaction> {
        if let (LedgerError::DuplicateIdempotencyKey(_), Some(key)) = (&error, key) {
            if let Some(winner) = self.store.find_by_idempotency_key(key).await? {
                return self.replay(command, key, winner);
            }
        }

        let error = self.observe(error);
        if self.config.audit_failed_transactions && is_auditable(&error) {
            self.record_failure(command, &error).await;
        }

        Err(error)
    }

    /// Surface store failures as `TransactionFailed`, then count and log the
    /// error.
    fn observe(&self, error: LedgerError) -> LedgerError {
        let error = match error {
            LedgerError::StoreUnavailable(reason) => LedgerError::TransactionFailed { reason },
            other => other,
        };

        match &error {
            LedgerError::Conflict { .. } => {
                self.metrics.conflict();
                error!(error = %error, "Stale write rejected under account lock");
            }
            LedgerError::AccountNotFound(_) => {
                self.metrics.rejected();
                warn!(error = %error, "Request rejected");
            }
            e if e.is_validation() => {
                self.metrics.rejected();
                warn!(error = %error, "Request rejected");
            }
            _ => {
                self.metrics.failed();
                warn!(error = %error, code = error.error_code(), "Operation failed");
            }
        }

        error
    }

    /// Persist a FAILED record for a rejected command. Best effort: a store
    /// failure here is logged and the original error still reaches the
    /// caller.
    async fn record_failure(&self, command: &LedgerCommand, cause: &LedgerError) {
        let result = async {
            let id = self.ids.transaction_id(self.store.as_ref()).await?;
            let mut record = command.pending(id, self.ids.reference_number())?;
            record.fail(cause.to_string())?;

            let mut uow = self.store.begin().await?;
            uow.append_transaction(record.clone()).await?;
            uow.commit().await?;
            Ok::<_, LedgerError>(record)
        }
        .await;

        match result {
            Ok(record) => info!(transaction_id = %record.id, "Failed transaction recorded"),
            Err(e) => warn!(error = %e, "Could not record failed transaction"),
        }
    }

    // === Queries ===

    /// Get a transaction.
    pub async fn transaction(&self, id: &TransactionId) -> Result<Transaction> {
        self.store.get_transaction(id).await
    }

    /// One page of an account's history, newest first. The page size is
    /// capped at the configured maximum.
    pub async fn history_page(
        &self,
        account: &AccountNumber,
        page: usize,
        size: usize,
    ) -> Result<Page<Transaction>> {
        let request = PageRequest::new(page, size)?.clamp(self.config.max_page_size);
        self.store.history_page(account, request).await
    }

    /// Every transaction of an account created within `[start, end]`,
    /// newest first.
    pub async fn history_between(
        &self,
        account: &AccountNumber,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Transaction>> {
        let range = DateRange::new(start, end)?;
        self.store.history_between(account, range).await
    }

    /// Full history of an account, newest first.
    pub async fn history(&self, account: &AccountNumber) -> Result<Vec<Transaction>> {
        Ok(self
            .store
            .history_page(account, PageRequest::all())
            .await?
            .items)
    }

    /// Replay an account's completed transactions and compare the result
    /// with its stored balance.
    #[instrument(skip(self), fields(account = %number))]
    pub async fn reconcile(&self, number: &AccountNumber) -> Result<Reconciliation> {
        self.ensure_known(&[number]).await?;
        let _locks = self.locks.acquire_one(number).await;
        self.metrics.lock_acquired();

        let account = self.store.get_account(number).await?;
        let history = self.store.history_page(number, PageRequest::all()).await?;

        let completed: Vec<&Transaction> = history
            .items
            .iter()
            .filter(|t| t.status == TransactionStatus::Completed)
            .collect();
        let postings: Vec<_> = completed.iter().flat_map(|t| t.postings()).collect();

        let reconciliation = Reconciliation {
            account: number.clone(),
            balance: account.balance,
            replayed: to_ledger_scale(net_effect(number, &postings)),
            transactions: completed.len(),
        };

        if reconciliation.is_consistent() {
            info!(transactions = reconciliation.transactions, "Account reconciled");
        } else {
            error!(
                balance = %reconciliation.balance,
                replayed = %reconciliation.replayed,
                "Account balance does not match its history"
            );
        }

        Ok(reconciliation)
    }
}

/// Stage the balance mutations and the completed record for `command`.
async fn stage(
    uow: &mut dyn UnitOfWork,
    command: &LedgerCommand,
    transaction: &mut Transaction,
) -> Result<()> {
    match command {
        LedgerCommand::Deposit { account, amount, .. } => {
            let mut account = uow.get_account(account).await?;
            account.credit(*amount)?;
            uow.save_account(account).await?;
        }
        LedgerCommand::Withdraw { account, amount, .. } => {
            let mut account = uow.get_account(account).await?;
            account.debit(*amount)?;
            uow.save_account(account).await?;
        }
        LedgerCommand::Transfer {
            from, to, amount, ..
        } => {
            let mut source = uow.get_account(from).await?;
            let mut destination = uow.get_account(to).await?;
            source.ensure_active()?;
            destination.ensure_active()?;

            source.debit(*amount)?;
            destination.credit(*amount)?;
            uow.save_account(source).await?;
            uow.save_account(destination).await?;
        }
    }

    transaction.complete()?;
    uow.append_transaction(transaction.clone()).await
}

fn is_auditable(error: &LedgerError) -> bool {
    matches!(
        error,
        LedgerError::InsufficientFunds { .. }
            | LedgerError::AccountInactive(_)
            | LedgerError::TransactionFailed { .. }
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{Fault, InMemoryLedgerStore};
    use rust_decimal_macros::dec;

    fn engine_with(config: LedgerConfig) -> (TransactionEngine, InMemoryLedgerStore) {
        let store = InMemoryLedgerStore::new();
        let engine = TransactionEngine::new(
            Arc::new(store.clone()),
            Arc::new(AccountLockManager::new()),
            config,
        );
        (engine, store)
    }

    fn engine() -> (TransactionEngine, InMemoryLedgerStore) {
        engine_with(LedgerConfig::default())
    }

    async fn open(engine: &TransactionEngine, kind: AccountKind) -> AccountNumber {
        engine
            .open_account(OwnerId::new("owner"), kind)
            .await
            .unwrap()
            .number
    }

    #[tokio::test]
    async fn test_open_account_applies_defaults() {
        let (engine, _) = engine();
        let account = engine
            .open_account(OwnerId::new("user-1"), AccountKind::Current)
            .await
            .unwrap();

        assert!(account.number.as_str().starts_with("ACC"));
        assert!(account.active);
        assert_eq!(account.balance, dec!(0));
        assert_eq!(account.policy.overdraft_limit(), dec!(50000));
        assert_eq!(engine.metrics().accounts_opened, 1);
    }

    #[tokio::test]
    async fn test_overdraft_only_on_current() {
        let (engine, _) = engine();
        let policy = AccountPolicy::current_with_overdraft(dec!(100)).unwrap();
        let err = engine
            .open_account_with_policy(OwnerId::new("u"), AccountKind::Savings, policy)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidAmount { .. }));
    }

    #[tokio::test]
    async fn test_deposit_and_withdraw() {
        let (engine, _) = engine();
        let acc = open(&engine, AccountKind::Savings).await;

        let deposit = engine.deposit(&acc, dec!(500), Some("cash")).await.unwrap();
        assert_eq!(deposit.status, TransactionStatus::Completed);
        assert_eq!(deposit.destination.as_ref(), Some(&acc));
        assert!(deposit.id.as_str().starts_with("TXN"));

        let withdrawal = engine.withdraw(&acc, dec!(200), None).await.unwrap();
        assert_eq!(withdrawal.kind, TransactionKind::Withdrawal);
        assert_eq!(engine.balance(&acc).await.unwrap().balance, dec!(300));
    }

    #[tokio::test]
    async fn test_invalid_amounts_rejected() {
        let (engine, store) = engine();
        let acc = open(&engine, AccountKind::Savings).await;

        for amount in [dec!(0), dec!(-5), dec!(1.005)] {
            let err = engine.deposit(&acc, amount, None).await.unwrap_err();
            assert!(matches!(err, LedgerError::InvalidAmount { .. }));
        }
        assert_eq!(store.transaction_count(), 0);
        assert_eq!(engine.metrics().rejected, 3);
    }

    #[tokio::test]
    async fn test_unknown_account() {
        let (engine, _) = engine();
        let missing = AccountNumber::new("ACC404");
        let err = engine.deposit(&missing, dec!(1), None).await.unwrap_err();
        assert_eq!(err, LedgerError::AccountNotFound(missing));
    }

    #[tokio::test]
    async fn test_unknown_accounts_leave_no_lock_entries() {
        let (engine, _) = engine();
        let a = open(&engine, AccountKind::Savings).await;
        engine.deposit(&a, dec!(100), None).await.unwrap();
        assert_eq!(engine.lock_manager().tracked_accounts(), 1);

        for i in 0..100 {
            let ghost = AccountNumber::new(format!("ACC-GHOST-{i}"));
            let err = engine.deposit(&ghost, dec!(1), None).await.unwrap_err();
            assert_eq!(err, LedgerError::AccountNotFound(ghost.clone()));
            assert!(engine.withdraw(&ghost, dec!(1), None).await.is_err());
            assert!(engine.transfer(&a, &ghost, dec!(1), None).await.is_err());
            assert!(engine.deactivate_account(&ghost).await.is_err());
            assert!(engine.reconcile(&ghost).await.is_err());
        }

        assert_eq!(engine.lock_manager().tracked_accounts(), 1);
        assert_eq!(engine.metrics().rejected, 400);
        assert_eq!(engine.balance(&a).await.unwrap().balance, dec!(100));
    }

    #[tokio::test]
    async fn test_duplicate_id_at_commit_is_retried() {
        let (engine, store) = engine();
        let a = open(&engine, AccountKind::Savings).await;

        store.inject_fault(Fault::DuplicateOnCommit { times: 1 });
        let deposit = engine.deposit(&a, dec!(40), None).await.unwrap();
        assert_eq!(deposit.status, TransactionStatus::Completed);
        assert_eq!(engine.metrics().commit_retries, 1);
        assert_eq!(store.transaction_count(), 1);
        assert_eq!(engine.transaction(&deposit.id).await.unwrap().id, deposit.id);
        assert_eq!(engine.balance(&a).await.unwrap().balance, dec!(40));

        store.inject_fault(Fault::DuplicateOnCommit { times: 1 });
        let opened = engine
            .open_account(OwnerId::new("retry"), AccountKind::Salary)
            .await
            .unwrap();
        assert_eq!(engine.metrics().commit_retries, 2);
        assert_eq!(store.account_count(), 2);
        assert_eq!(engine.account(&opened.number).await.unwrap().number, opened.number);
    }

    #[tokio::test]
    async fn test_persistent_duplicate_id_exhausts_attempts() {
        let (engine, store) = engine();
        let a = open(&engine, AccountKind::Savings).await;

        store.inject_fault(Fault::DuplicateOnCommit { times: 3 });
        let err = engine.deposit(&a, dec!(40), None).await.unwrap_err();
        assert_eq!(err, LedgerError::IdGenerationExhausted { attempts: 3 });
        assert_eq!(engine.metrics().commit_retries, 3);
        assert_eq!(engine.metrics().failed, 1);
        assert_eq!(store.transaction_count(), 0);
        assert_eq!(engine.balance(&a).await.unwrap().balance, dec!(0));

        store.inject_fault(Fault::DuplicateOnCommit { times: 3 });
        let err = engine
            .open_account(OwnerId::new("unlucky"), AccountKind::Savings)
            .await
            .unwrap_err();
        assert_eq!(err, LedgerError::IdGenerationExhausted { attempts: 3 });
        assert_eq!(store.account_count(), 1);
    }

    #[tokio::test]
    async fn test_accounts_for_owner() {
        let (engine, _) = engine();
        let owner = OwnerId::new("alice");
        let savings = engine
            .open_account(owner.clone(), AccountKind::Savings)
            .await
            .unwrap();
        let current = engine
            .open_account(owner.clone(), AccountKind::Current)
            .await
            .unwrap();
        engine
            .open_account(OwnerId::new("bob"), AccountKind::Salary)
            .await
            .unwrap();
        engine.deactivate_account(&current.number).await.unwrap();

        let mut expected = vec![savings.number.clone(), current.number.clone()];
        expected.sort();
        let all: Vec<_> = engine
            .accounts_for_owner(&owner, false)
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.number)
            .collect();
        assert_eq!(all, expected);

        let active = engine.accounts_for_owner(&owner, true).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].number, savings.number);

        let nobody = engine.accounts_for_owner(&OwnerId::new("carol"), false).await.unwrap();
        assert!(nobody.is_empty());
    }

    #[tokio::test]
    async fn test_account_store_failures_surface_as_transaction_failed() {
        let (engine, store) = engine();

        store.inject_fault(Fault::Begin);
        let err = engine
            .open_account(OwnerId::new("u"), AccountKind::Savings)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::TransactionFailed { .. }));
        assert_eq!(store.account_count(), 0);
        assert_eq!(engine.metrics().failed, 1);

        let a = open(&engine, AccountKind::Savings).await;
        store.inject_fault(Fault::Commit);
        let err = engine.deactivate_account(&a).await.unwrap_err();
        assert!(matches!(err, LedgerError::TransactionFailed { .. }));
        assert!(engine.account(&a).await.unwrap().active);
        assert_eq!(engine.metrics().failed, 2);
    }

    #[tokio::test]
    async fn test_inactive_account_rejected_and_deactivation_idempotent() {
        let (engine, _) = engine();
        let a = open(&engine, AccountKind::Savings).await;
        let b = open(&engine, AccountKind::Savings).await;
        engine.deposit(&a, dec!(100), None).await.unwrap();

        let deactivated = engine.deactivate_account(&b).await.unwrap();
        assert!(!deactivated.active);
        let again = engine.deactivate_account(&b).await.unwrap();
        assert_eq!(again.version, deactivated.version);

        let err = engine.transfer(&a, &b, dec!(10), None).await.unwrap_err();
        assert_eq!(err, LedgerError::AccountInactive(b.clone()));
        assert_eq!(engine.balance(&a).await.unwrap().balance, dec!(100));
    }

    #[tokio::test]
    async fn test_transfer_to_self_rejected() {
        let (engine, _) = engine();
        let a = open(&engine, AccountKind::Savings).await;
        let err = engine.transfer(&a, &a, dec!(1), None).await.unwrap_err();
        assert_eq!(err, LedgerError::SameAccount(a));
    }

    #[tokio::test]
    async fn test_store_failure_surfaces_as_transaction_failed() {
        let (engine, store) = engine();
        let a = open(&engine, AccountKind::Savings).await;

        store.inject_fault(Fault::Commit);
        let err = engine.deposit(&a, dec!(10), None).await.unwrap_err();
        assert!(matches!(err, LedgerError::TransactionFailed { .. }));
        assert!(err.is_retryable());
        assert_eq!(engine.balance(&a).await.unwrap().balance, dec!(0));
    }

    #[tokio::test]
    async fn test_idempotent_replay() {
        let (engine, store) = engine();
        let a = open(&engine, AccountKind::Savings).await;
        let key = IdempotencyKey::new("req-1");
        let command = LedgerCommand::Deposit {
            account: a.clone(),
            amount: Amount::new(dec!(25)).unwrap(),
            description: None,
        };

        let first = engine.execute(command.clone(), Some(key.clone())).await.unwrap();
        let second = engine.execute(command, Some(key.clone())).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(store.transaction_count(), 1);
        assert_eq!(engine.balance(&a).await.unwrap().balance, dec!(25));

        let different = LedgerCommand::Deposit {
            account: a.clone(),
            amount: Amount::new(dec!(26)).unwrap(),
            description: None,
        };
        let err = engine.execute(different, Some(key.clone())).await.unwrap_err();
        assert_eq!(err, LedgerError::IdempotencyKeyReused(key));
    }

    #[tokio::test]
    async fn test_blank_idempotency_key_rejected() {
        let (engine, _) = engine();
        let a = open(&engine, AccountKind::Savings).await;
        let command = LedgerCommand::Deposit {
            account: a,
            amount: Amount::new(dec!(1)).unwrap(),
            description: None,
        };
        let err = engine
            .execute(command, Some(IdempotencyKey::new(" ")))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidIdempotencyKey(_)));
    }

    #[tokio::test]
    async fn test_failed_audit_record() {
        let mut config = LedgerConfig::default();
        config.engine.audit_failed_transactions = true;
        let (engine, _) = engine_with(config);
        let a = open(&engine, AccountKind::Savings).await;

        let err = engine.withdraw(&a, dec!(5), None).await.unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientFunds { .. }));

        let history = engine.history(&a).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, TransactionStatus::Failed);
        assert!(history[0].failure_reason.is_some());

        let reconciliation = engine.reconcile(&a).await.unwrap();
        assert!(reconciliation.is_consistent());
        assert_eq!(reconciliation.transactions, 0);
    }

    #[tokio::test]
    async fn test_failures_not_audited_by_default() {
        let (engine, store) = engine();
        let a = open(&engine, AccountKind::Savings).await;
        assert!(engine.withdraw(&a, dec!(5), None).await.is_err());
        assert_eq!(store.transaction_count(), 0);
    }

    #[tokio::test]
    async fn test_history_page_validation() {
        let (engine, _) = engine();
        let a = open(&engine, AccountKind::Savings).await;
        let err = engine.history_page(&a, 0, 0).await.unwrap_err();
        assert_eq!(err, LedgerError::InvalidPage { page: 0, size: 0 });

        let page = engine.history_page(&a, 0, 10_000).await.unwrap();
        assert_eq!(page.size, 100);
    }

    #[tokio::test]
    async fn test_history_between_rejects_inverted_range() {
        let (engine, _) = engine();
        let a = open(&engine, AccountKind::Savings).await;
        let now = Utc::now();
        let err = engine
            .history_between(&a, now, now - chrono::Duration::seconds(1))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidRange { .. }));
    }
}
