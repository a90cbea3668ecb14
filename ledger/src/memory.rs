//! In-memory ledger store.
//!
//! State lives behind a single `RwLock`. A unit of work stages its writes
//! privately and applies them under one write-lock acquisition at commit,
//! after every uniqueness and version check has passed, so commits are
//! all-or-nothing.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use corebank_common::{
    AccountNumber, DateRange, IdempotencyKey, LedgerError, OwnerId, ReferenceNumber, Result,
    Timestamp, TransactionId,
};

use crate::account::Account;
use crate::history::{Page, PageRequest};
use crate::store::{LedgerStore, UnitOfWork};
use crate::transaction::Transaction;

/// Failure injected into the next unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// `begin` fails.
    Begin,
    /// The nth `save_account` call (1-based) fails.
    SaveAccount { nth: usize },
    /// `append_transaction` fails.
    AppendTransaction,
    /// `commit` fails before applying anything.
    Commit,
    /// `commit` reports the staged identifier as already taken, for the next
    /// `times` units of work.
    DuplicateOnCommit { times: usize },
}

/// Secondary index key: (account, created_at) ordering with a commit
/// sequence tiebreak.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct HistoryKey {
    created_at: Timestamp,
    sequence: u64,
    id: TransactionId,
}

#[derive(Debug, Default)]
struct LedgerState {
    accounts: HashMap<AccountNumber, Account>,
    owners: HashMap<OwnerId, BTreeSet<AccountNumber>>,
    transactions: HashMap<TransactionId, Transaction>,
    history: HashMap<AccountNumber, BTreeSet<HistoryKey>>,
    idempotency: HashMap<IdempotencyKey, TransactionId>,
    references: HashSet<ReferenceNumber>,
    sequence: u64,
}

impl LedgerState {
    fn account(&self, number: &AccountNumber) -> Result<&Account> {
        self.accounts
            .get(number)
            .ok_or_else(|| LedgerError::AccountNotFound(number.clone()))
    }

    fn check_transaction_unique(&self, transaction: &Transaction) -> Result<()> {
        if self.transactions.contains_key(&transaction.id) {
            return Err(LedgerError::DuplicateId(transaction.id.to_string()));
        }
        if self.references.contains(&transaction.reference) {
            return Err(LedgerError::DuplicateId(transaction.reference.to_string()));
        }
        if let Some(key) = &transaction.idempotency_key {
            if self.idempotency.contains_key(key) {
                return Err(LedgerError::DuplicateIdempotencyKey(key.clone()));
            }
        }
        Ok(())
    }

    fn check_version(&self, account: &Account) -> Result<()> {
        let committed = self.account(&account.number)?;
        if committed.version != account.version {
            return Err(LedgerError::Conflict {
                account: account.number.clone(),
                expected: account.version,
                actual: committed.version,
            });
        }
        Ok(())
    }

    fn validate(&self, staged: &Staged) -> Result<()> {
        for write in staged.accounts.values() {
            match write {
                StagedAccount::Insert(account) => {
                    if self.accounts.contains_key(&account.number) {
                        return Err(LedgerError::DuplicateId(account.number.to_string()));
                    }
                }
                StagedAccount::Update(account) => self.check_version(account)?,
            }
        }

        for transaction in &staged.transactions {
            self.check_transaction_unique(transaction)?;
        }

        Ok(())
    }

    fn apply(&mut self, staged: Staged) {
        for (number, write) in staged.accounts {
            let account = match write {
                StagedAccount::Insert(account) => {
                    self.owners
                        .entry(account.owner.clone())
                        .or_default()
                        .insert(number.clone());
                    account
                }
                StagedAccount::Update(mut account) => {
                    account.version += 1;
                    account
                }
            };
            self.accounts.insert(number, account);
        }

        for transaction in staged.transactions {
            self.sequence += 1;
            let key = HistoryKey {
                created_at: transaction.created_at,
                sequence: self.sequence,
                id: transaction.id.clone(),
            };

            for account in transaction.accounts() {
                self.history
                    .entry(account.clone())
                    .or_default()
                    .insert(key.clone());
            }

            if let Some(idempotency_key) = &transaction.idempotency_key {
                self.idempotency
                    .insert(idempotency_key.clone(), transaction.id.clone());
            }
            self.references.insert(transaction.reference);
            self.transactions.insert(transaction.id.clone(), transaction);
        }
    }

    fn history_keys(&self, number: &AccountNumber) -> Result<impl DoubleEndedIterator<Item = &HistoryKey>> {
        self.account(number)?;
        Ok(self.history.get(number).into_iter().flatten())
    }
}

#[derive(Debug)]
enum StagedAccount {
    Insert(Account),
    Update(Account),
}

impl StagedAccount {
    fn account(&self) -> &Account {
        match self {
            StagedAccount::Insert(account) | StagedAccount::Update(account) => account,
        }
    }
}

#[derive(Debug, Default)]
struct Staged {
    accounts: HashMap<AccountNumber, StagedAccount>,
    transactions: Vec<Transaction>,
}

impl Staged {
    fn is_empty(&self) -> bool {
        self.accounts.is_empty() && self.transactions.is_empty()
    }

    /// First identifier a commit would claim.
    fn first_identifier(&self) -> Option<String> {
        self.transactions
            .first()
            .map(|t| t.id.to_string())
            .or_else(|| self.accounts.keys().next().map(|n| n.to_string()))
    }
}

/// In-memory [`LedgerStore`] with fault injection for failure testing.
#[derive(Clone, Default)]
pub struct InMemoryLedgerStore {
    state: Arc<RwLock<LedgerState>>,
    fault: Arc<Mutex<Option<Fault>>>,
}

impl InMemoryLedgerStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm a fault for the next unit of work. One-shot.
    pub fn inject_fault(&self, fault: Fault) {
        warn!(?fault, "Fault armed for next unit of work");
        *self.fault.lock() = Some(fault);
    }

    /// Number of committed transaction records.
    pub fn transaction_count(&self) -> usize {
        self.state.read().transactions.len()
    }

    /// Number of accounts.
    pub fn account_count(&self) -> usize {
        self.state.read().accounts.len()
    }

    fn read_account(&self, number: &AccountNumber) -> Result<Account> {
        self.state.read().account(number).cloned()
    }

    fn read_transaction(&self, id: &TransactionId) -> Result<Transaction> {
        self.state
            .read()
            .transactions
            .get(id)
            .cloned()
            .ok_or_else(|| LedgerError::TransactionNotFound(id.clone()))
    }

    fn read_idempotent(&self, key: &IdempotencyKey) -> Option<Transaction> {
        let state = self.state.read();
        state
            .idempotency
            .get(key)
            .and_then(|id| state.transactions.get(id))
            .cloned()
    }

    fn read_page(&self, number: &AccountNumber, request: PageRequest) -> Result<Page<Transaction>> {
        let state = self.state.read();
        let total = state.history_keys(number)?.count();
        let items = state
            .history_keys(number)?
            .rev()
            .skip(request.offset())
            .take(request.size())
            .filter_map(|key| state.transactions.get(&key.id).cloned())
            .collect();

        Ok(Page {
            items,
            page: request.page(),
            size: request.size(),
            total,
        })
    }

    fn read_range(&self, number: &AccountNumber, range: DateRange) -> Result<Vec<Transaction>> {
        let state = self.state.read();
        let items = state
            .history_keys(number)?
            .rev()
            .skip_while(|key| key.created_at > range.end())
            .take_while(|key| key.created_at >= range.start())
            .filter_map(|key| state.transactions.get(&key.id).cloned())
            .collect();
        Ok(items)
    }

    fn read_owned(&self, owner: &OwnerId, active_only: bool) -> Vec<Account> {
        let state = self.state.read();
        state
            .owners
            .get(owner)
            .into_iter()
            .flatten()
            .filter_map(|number| state.accounts.get(number))
            .filter(|account| !active_only || account.active)
            .cloned()
            .collect()
    }

    fn read_accounts(&self) -> Vec<Account> {
        let mut accounts: Vec<Account> = self.state.read().accounts.values().cloned().collect();
        accounts.sort_by(|a, b| a.number.cmp(&b.number));
        accounts
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>> {
        let fault = {
            let mut armed = self.fault.lock();
            match armed.take() {
                Some(Fault::DuplicateOnCommit { times: 0 }) => None,
                Some(Fault::DuplicateOnCommit { times }) if times > 1 => {
                    *armed = Some(Fault::DuplicateOnCommit { times: times - 1 });
                    Some(Fault::DuplicateOnCommit { times: 1 })
                }
                fault => fault,
            }
        };
        if fault == Some(Fault::Begin) {
            return Err(LedgerError::StoreUnavailable(
                "injected fault on begin".to_string(),
            ));
        }

        Ok(Box::new(MemoryUnitOfWork {
            state: self.state.clone(),
            staged: Staged::default(),
            fault,
            saves: 0,
            finished: false,
        }))
    }

    async fn get_account(&self, number: &AccountNumber) -> Result<Account> {
        self.read_account(number)
    }

    async fn account_exists(&self, number: &AccountNumber) -> Result<bool> {
        Ok(self.state.read().accounts.contains_key(number))
    }

    async fn list_accounts(&self) -> Result<Vec<Account>> {
        Ok(self.read_accounts())
    }

    async fn accounts_for_owner(&self, owner: &OwnerId, active_only: bool) -> Result<Vec<Account>> {
        Ok(self.read_owned(owner, active_only))
    }

    async fn get_transaction(&self, id: &TransactionId) -> Result<Transaction> {
        self.read_transaction(id)
    }

    async fn transaction_exists(&self, id: &TransactionId) -> Result<bool> {
        Ok(self.state.read().transactions.contains_key(id))
    }

    async fn find_by_idempotency_key(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<Transaction>> {
        Ok(self.read_idempotent(key))
    }

    async fn history_page(
        &self,
        number: &AccountNumber,
        request: PageRequest,
    ) -> Result<Page<Transaction>> {
        self.read_page(number, request)
    }

    async fn history_between(
        &self,
        number: &AccountNumber,
        range: DateRange,
    ) -> Result<Vec<Transaction>> {
        self.read_range(number, range)
    }
}

/// Unit of work over [`InMemoryLedgerStore`].
pub struct MemoryUnitOfWork {
    state: Arc<RwLock<LedgerState>>,
    staged: Staged,
    fault: Option<Fault>,
    saves: usize,
    finished: bool,
}

impl MemoryUnitOfWork {
    fn ensure_open(&self) -> Result<()> {
        if self.finished {
            return Err(LedgerError::StoreUnavailable(
                "unit of work already finished".to_string(),
            ));
        }
        Ok(())
    }

    fn read(&self, number: &AccountNumber) -> Result<Account> {
        self.ensure_open()?;
        if let Some(write) = self.staged.accounts.get(number) {
            return Ok(write.account().clone());
        }
        self.state.read().account(number).cloned()
    }

    fn stage_insert(&mut self, account: Account) -> Result<()> {
        self.ensure_open()?;
        if self.staged.accounts.contains_key(&account.number)
            || self.state.read().accounts.contains_key(&account.number)
        {
            return Err(LedgerError::DuplicateId(account.number.to_string()));
        }
        self.staged
            .accounts
            .insert(account.number.clone(), StagedAccount::Insert(account));
        Ok(())
    }

    fn stage_save(&mut self, account: Account) -> Result<()> {
        self.ensure_open()?;

        self.saves += 1;
        if self.fault == Some(Fault::SaveAccount { nth: self.saves }) {
            return Err(LedgerError::StoreUnavailable(format!(
                "injected fault on account save #{}",
                self.saves
            )));
        }

        let write = match self.staged.accounts.get(&account.number) {
            Some(StagedAccount::Insert(_)) => StagedAccount::Insert(account),
            Some(StagedAccount::Update(previous)) => {
                if previous.version != account.version {
                    return Err(LedgerError::Conflict {
                        account: account.number.clone(),
                        expected: account.version,
                        actual: previous.version,
                    });
                }
                StagedAccount::Update(account)
            }
            None => {
                self.state.read().check_version(&account)?;
                StagedAccount::Update(account)
            }
        };

        self.staged
            .accounts
            .insert(write.account().number.clone(), write);
        Ok(())
    }

    fn stage_transaction(&mut self, transaction: Transaction) -> Result<()> {
        self.ensure_open()?;

        if self.fault == Some(Fault::AppendTransaction) {
            return Err(LedgerError::StoreUnavailable(
                "injected fault on transaction append".to_string(),
            ));
        }

        if !transaction.status.is_final() {
            return Err(LedgerError::TransactionFailed {
                reason: format!("refusing to persist {} transaction", transaction.status),
            });
        }
        if !transaction.is_well_formed() {
            return Err(LedgerError::TransactionFailed {
                reason: format!("malformed {:?} transaction", transaction.kind),
            });
        }

        let clashes_with_staged = self.staged.transactions.iter().any(|staged| {
            staged.id == transaction.id || staged.reference == transaction.reference
        });
        if clashes_with_staged {
            return Err(LedgerError::DuplicateId(transaction.id.to_string()));
        }
        self.state.read().check_transaction_unique(&transaction)?;

        self.staged.transactions.push(transaction);
        Ok(())
    }

    fn apply(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.finished = true;

        if self.fault == Some(Fault::Commit) {
            return Err(LedgerError::StoreUnavailable(
                "injected fault on commit".to_string(),
            ));
        }

        let staged = std::mem::take(&mut self.staged);
        if matches!(self.fault, Some(Fault::DuplicateOnCommit { .. })) {
            if let Some(id) = staged.first_identifier() {
                return Err(LedgerError::DuplicateId(id));
            }
        }

        let mut state = self.state.write();
        state.validate(&staged)?;
        state.apply(staged);
        Ok(())
    }

    fn discard(&mut self) {
        if !self.finished && !self.staged.is_empty() {
            debug!(
                accounts = self.staged.accounts.len(),
                transactions = self.staged.transactions.len(),
                "Discarding staged writes"
            );
        }
        self.finished = true;
        self.staged = Staged::default();
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn get_account(&mut self, number: &AccountNumber) -> Result<Account> {
        self.read(number)
    }

    async fn insert_account(&mut self, account: Account) -> Result<()> {
        self.stage_insert(account)
    }

    async fn save_account(&mut self, account: Account) -> Result<()> {
        self.stage_save(account)
    }

    async fn append_transaction(&mut self, transaction: Transaction) -> Result<()> {
        self.stage_transaction(transaction)
    }

    async fn commit(&mut self) -> Result<()> {
        self.apply()
    }

    async fn rollback(&mut self) {
        self.discard()
    }
}

impl Drop for MemoryUnitOfWork {
    fn drop(&mut self) {
        self.discard();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::AccountKind;
    use corebank_common::{Amount, OwnerId};
    use rust_decimal_macros::dec;

    async fn store_with(numbers: &[&str]) -> InMemoryLedgerStore {
        let store = InMemoryLedgerStore::new();
        let mut uow = store.begin().await.unwrap();
        for number in numbers {
            uow.insert_account(Account::open(
                AccountNumber::new(*number),
                OwnerId::new("owner"),
                AccountKind::Savings,
            ))
            .await
            .unwrap();
        }
        uow.commit().await.unwrap();
        store
    }

    fn completed_deposit(id: &str, account: &str) -> Transaction {
        let mut tx = Transaction::deposit(
            TransactionId::new(id),
            ReferenceNumber::new(),
            AccountNumber::new(account),
            Amount::new(dec!(10)).unwrap(),
            None,
        );
        tx.complete().unwrap();
        tx
    }

    #[tokio::test]
    async fn test_uncommitted_writes_are_invisible() {
        let store = store_with(&["ACC1"]).await;
        let number = AccountNumber::new("ACC1");

        let mut uow = store.begin().await.unwrap();
        let mut account = uow.get_account(&number).await.unwrap();
        account.balance = dec!(99);
        uow.save_account(account).await.unwrap();

        // Read-your-writes inside the unit of work only.
        assert_eq!(uow.get_account(&number).await.unwrap().balance, dec!(99));
        assert_eq!(store.get_account(&number).await.unwrap().balance, dec!(0));

        drop(uow);
        assert_eq!(store.get_account(&number).await.unwrap().balance, dec!(0));
    }

    #[tokio::test]
    async fn test_commit_bumps_version() {
        let store = store_with(&["ACC1"]).await;
        let number = AccountNumber::new("ACC1");

        let mut uow = store.begin().await.unwrap();
        let account = uow.get_account(&number).await.unwrap();
        uow.save_account(account).await.unwrap();
        uow.commit().await.unwrap();

        assert_eq!(store.get_account(&number).await.unwrap().version, 1);
    }

    #[tokio::test]
    async fn test_stale_write_conflicts() {
        let store = store_with(&["ACC1"]).await;
        let number = AccountNumber::new("ACC1");

        let mut first = store.begin().await.unwrap();
        let mut second = store.begin().await.unwrap();
        let a = first.get_account(&number).await.unwrap();
        let b = second.get_account(&number).await.unwrap();

        first.save_account(a).await.unwrap();
        second.save_account(b).await.unwrap();
        first.commit().await.unwrap();

        let err = second.commit().await.unwrap_err();
        assert!(matches!(err, LedgerError::Conflict { expected: 0, actual: 1, .. }));
    }

    #[tokio::test]
    async fn test_duplicate_transaction_id_rejected() {
        let store = store_with(&["ACC1"]).await;

        let mut uow = store.begin().await.unwrap();
        uow.append_transaction(completed_deposit("TXN1", "ACC1")).await.unwrap();
        uow.commit().await.unwrap();

        let mut uow = store.begin().await.unwrap();
        let err = uow
            .append_transaction(completed_deposit("TXN1", "ACC1"))
            .await
            .unwrap_err();
        assert_eq!(err, LedgerError::DuplicateId("TXN1".to_string()));
    }

    #[tokio::test]
    async fn test_pending_transaction_not_persisted() {
        let store = store_with(&["ACC1"]).await;
        let pending = Transaction::deposit(
            TransactionId::new("TXN1"),
            ReferenceNumber::new(),
            AccountNumber::new("ACC1"),
            Amount::new(dec!(10)).unwrap(),
            None,
        );

        let mut uow = store.begin().await.unwrap();
        assert!(uow.append_transaction(pending).await.is_err());
    }

    #[tokio::test]
    async fn test_commit_fault_applies_nothing() {
        let store = store_with(&["ACC1"]).await;
        store.inject_fault(Fault::Commit);

        let mut uow = store.begin().await.unwrap();
        uow.append_transaction(completed_deposit("TXN1", "ACC1")).await.unwrap();
        assert!(uow.commit().await.is_err());
        assert_eq!(store.transaction_count(), 0);

        // One-shot: the next unit of work is healthy.
        let mut uow = store.begin().await.unwrap();
        uow.append_transaction(completed_deposit("TXN1", "ACC1")).await.unwrap();
        uow.commit().await.unwrap();
        assert_eq!(store.transaction_count(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_on_commit_counts_down() {
        let store = store_with(&["ACC1"]).await;
        store.inject_fault(Fault::DuplicateOnCommit { times: 2 });

        for _ in 0..2 {
            let mut uow = store.begin().await.unwrap();
            uow.append_transaction(completed_deposit("TXN1", "ACC1")).await.unwrap();
            assert_eq!(
                uow.commit().await.unwrap_err(),
                LedgerError::DuplicateId("TXN1".to_string())
            );
        }

        let mut uow = store.begin().await.unwrap();
        uow.append_transaction(completed_deposit("TXN1", "ACC1")).await.unwrap();
        uow.commit().await.unwrap();
        assert_eq!(store.transaction_count(), 1);
    }

    #[tokio::test]
    async fn test_accounts_for_owner() {
        let store = store_with(&["ACC2", "ACC1"]).await;
        let mut uow = store.begin().await.unwrap();
        uow.insert_account(Account::open(
            AccountNumber::new("ACC3"),
            OwnerId::new("someone-else"),
            AccountKind::Current,
        ))
        .await
        .unwrap();
        let mut closed = uow.get_account(&AccountNumber::new("ACC2")).await.unwrap();
        closed.deactivate();
        uow.save_account(closed).await.unwrap();
        uow.commit().await.unwrap();

        let owner = OwnerId::new("owner");
        let all: Vec<_> = store
            .accounts_for_owner(&owner, false)
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.number.to_string())
            .collect();
        assert_eq!(all, vec!["ACC1", "ACC2"]);

        let active = store.accounts_for_owner(&owner, true).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].number, AccountNumber::new("ACC1"));

        assert!(store
            .accounts_for_owner(&OwnerId::new("nobody"), false)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_finished_unit_of_work_rejects_calls() {
        let store = store_with(&["ACC1"]).await;
        let mut uow = store.begin().await.unwrap();
        uow.rollback().await;
        assert!(uow.get_account(&AccountNumber::new("ACC1")).await.is_err());
    }

    #[tokio::test]
    async fn test_history_is_newest_first() {
        let store = store_with(&["ACC1"]).await;
        for id in ["TXN1", "TXN2", "TXN3"] {
            let mut uow = store.begin().await.unwrap();
            uow.append_transaction(completed_deposit(id, "ACC1")).await.unwrap();
            uow.commit().await.unwrap();
        }

        let page = store
            .history_page(&AccountNumber::new("ACC1"), PageRequest::new(0, 2).unwrap())
            .await
            .unwrap();
        assert_eq!(page.total, 3);
        let ids: Vec<_> = page.items.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["TXN3", "TXN2"]);
    }

    #[tokio::test]
    async fn test_history_unknown_account() {
        let store = InMemoryLedgerStore::new();
        let err = store
            .history_page(&AccountNumber::new("NOPE"), PageRequest::all())
            .await
            .unwrap_err();
        assert_eq!(err, LedgerError::AccountNotFound(AccountNumber::new("NOPE")));
    }
}
