//! Per-account mutual exclusion.
//!
//! Every operation that reads-then-writes an account balance holds that
//! account's lock for the whole read-validate-write-commit sequence. Locks
//! are always acquired in ascending [`AccountNumber`] order so two
//! operations touching the same pair of accounts can never deadlock.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, trace};

use corebank_common::AccountNumber;

/// Exclusive hold on a set of accounts. Dropping it releases every lock.
pub struct AccountLocks {
    accounts: Vec<AccountNumber>,
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl AccountLocks {
    /// Accounts held, in acquisition order.
    pub fn accounts(&self) -> &[AccountNumber] {
        &self.accounts
    }

    /// Check if `account` is held.
    pub fn holds(&self, account: &AccountNumber) -> bool {
        self.accounts.binary_search(account).is_ok()
    }
}

impl Drop for AccountLocks {
    fn drop(&mut self) {
        trace!(accounts = ?self.accounts, "Account locks released");
    }
}

/// Lock table keyed by account number.
///
/// Entries are created on first use. Holding a lock never blocks a worker
/// thread; waiters park on the async mutex.
#[derive(Default)]
pub struct AccountLockManager {
    locks: DashMap<AccountNumber, Arc<Mutex<()>>>,
}

impl AccountLockManager {
    /// Create an empty lock table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire every listed account lock in ascending account order.
    /// Duplicates are collapsed, so a caller never waits on itself.
    pub async fn acquire(&self, accounts: &[&AccountNumber]) -> AccountLocks {
        let mut ordered: Vec<AccountNumber> = accounts.iter().map(|a| (*a).clone()).collect();
        ordered.sort();
        ordered.dedup();

        let mut guards = Vec::with_capacity(ordered.len());
        for account in &ordered {
            // Clone the handle out before awaiting; no map shard guard may
            // be held across the await.
            let lock = self.handle(account);
            guards.push(lock.lock_owned().await);
        }

        debug!(accounts = ?ordered, "Account locks acquired");

        AccountLocks {
            accounts: ordered,
            _guards: guards,
        }
    }

    /// Acquire a single account lock.
    pub async fn acquire_one(&self, account: &AccountNumber) -> AccountLocks {
        self.acquire(&[account]).await
    }

    fn handle(&self, account: &AccountNumber) -> Arc<Mutex<()>> {
        self.locks
            .entry(account.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone()
    }

    /// Number of accounts with a lock entry.
    pub fn tracked_accounts(&self) -> usize {
        self.locks.len()
    }

    /// Drop entries nobody holds or waits on.
    pub fn prune_idle(&self) -> usize {
        let before = self.locks.len();
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        let pruned = before.saturating_sub(self.locks.len());
        if pruned > 0 {
            debug!(pruned, "Pruned idle account locks");
        }
        pruned
    }
}
