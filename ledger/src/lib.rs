//! Corebank Ledger
//!
//! Account balances and the immutable transaction history that explains
//! them. Deposits, withdrawals and transfers run as atomic units of work
//! under per-account locks acquired in a fixed order.

pub mod account;
pub mod balance;
pub mod config;
pub mod engine;
pub mod history;
pub mod id_generator;
pub mod journal;
pub mod lock_manager;
pub mod memory;
pub mod metrics;
pub mod store;
pub mod transaction;

pub use account::{Account, AccountKind, AccountPolicy};
pub use balance::AccountBalance;
pub use config::{EngineConfig, IdConfig, LedgerConfig};
pub use engine::{LedgerCommand, TransactionEngine};
pub use history::{Page, PageRequest, Reconciliation};
pub use id_generator::IdGenerator;
pub use journal::{EntryType, Posting};
pub use lock_manager::{AccountLockManager, AccountLocks};
pub use memory::{Fault, InMemoryLedgerStore};
pub use metrics::{LedgerMetrics, MetricsSnapshot, SharedMetrics};
pub use store::{LedgerStore, UnitOfWork};
pub use transaction::{Transaction, TransactionKind, TransactionStatus};
