//! Error types for ledger operations.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use crate::{AccountNumber, IdempotencyKey, TransactionId};

/// Main error type for ledger operations.
///
/// Every failure a caller can observe has its own variant; callers match on
/// the variant (or on [`LedgerError::error_code`]), never on the message.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LedgerError {
    /// Account does not exist.
    #[error("Account not found: {0}")]
    AccountNotFound(AccountNumber),

    /// Transaction does not exist.
    #[error("Transaction not found: {0}")]
    TransactionNotFound(TransactionId),

    /// Amount is not strictly positive, has the wrong precision, or is not a
    /// number at all.
    #[error("Invalid amount {amount}: {reason}")]
    InvalidAmount { amount: String, reason: String },

    /// Debit would take the account below its overdraft floor.
    #[error("Insufficient funds in {account}: requested {requested}, available {available}")]
    InsufficientFunds {
        account: AccountNumber,
        requested: Decimal,
        available: Decimal,
    },

    /// Account is deactivated.
    #[error("Account inactive: {0}")]
    AccountInactive(AccountNumber),

    /// Transfer source and destination are the same account.
    #[error("Cannot transfer from {0} to itself")]
    SameAccount(AccountNumber),

    /// Date range has start after end.
    #[error("Invalid range: start {start} is after end {end}")]
    InvalidRange {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    /// Page request with a zero page size.
    #[error("Invalid page request: page {page}, size {size}")]
    InvalidPage { page: usize, size: usize },

    /// Store rejected a stale write. The locking layer should make this
    /// unreachable, so it is an internal invariant violation.
    #[error("Write conflict on {account}: expected version {expected}, found {actual}")]
    Conflict {
        account: AccountNumber,
        expected: u64,
        actual: u64,
    },

    /// Store uniqueness constraint rejected a generated identifier.
    #[error("Duplicate identifier: {0}")]
    DuplicateId(String),

    /// Another transaction already committed under this idempotency key.
    #[error("Duplicate idempotency key: {0}")]
    DuplicateIdempotencyKey(IdempotencyKey),

    /// Idempotency key is blank or longer than 128 bytes.
    #[error("Invalid idempotency key: {0:?}")]
    InvalidIdempotencyKey(IdempotencyKey),

    /// Idempotency key was reused for a different request.
    #[error("Idempotency key {0} was already used for a different request")]
    IdempotencyKeyReused(IdempotencyKey),

    /// Transaction status transition is not allowed.
    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    /// Identifier generator ran out of attempts.
    #[error("Could not generate a unique identifier after {attempts} attempts")]
    IdGenerationExhausted { attempts: usize },

    /// Underlying store failed.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Unit of work failed after validation and was rolled back.
    #[error("Transaction failed: {reason}")]
    TransactionFailed { reason: String },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
}

impl LedgerError {
    /// Check if the caller may retry the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LedgerError::StoreUnavailable(_)
                | LedgerError::TransactionFailed { .. }
                | LedgerError::IdGenerationExhausted { .. }
        )
    }

    /// Check if this error was raised by input validation, before any
    /// account was touched.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            LedgerError::InvalidAmount { .. }
                | LedgerError::SameAccount(_)
                | LedgerError::InvalidRange { .. }
                | LedgerError::InvalidPage { .. }
                | LedgerError::InvalidIdempotencyKey(_)
                | LedgerError::IdempotencyKeyReused(_)
        )
    }

    /// Get a stable error code.
    pub fn error_code(&self) -> &'static str {
        match self {
            LedgerError::AccountNotFound(_) => "ACCOUNT_NOT_FOUND",
            LedgerError::TransactionNotFound(_) => "TRANSACTION_NOT_FOUND",
            LedgerError::InvalidAmount { .. } => "INVALID_AMOUNT",
            LedgerError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            LedgerError::AccountInactive(_) => "ACCOUNT_INACTIVE",
            LedgerError::SameAccount(_) => "SAME_ACCOUNT",
            LedgerError::InvalidRange { .. } => "INVALID_RANGE",
            LedgerError::InvalidPage { .. } => "INVALID_PAGE",
            LedgerError::Conflict { .. } => "CONFLICT",
            LedgerError::DuplicateId(_) => "DUPLICATE_ID",
            LedgerError::DuplicateIdempotencyKey(_) => "DUPLICATE_IDEMPOTENCY_KEY",
            LedgerError::InvalidIdempotencyKey(_) => "INVALID_IDEMPOTENCY_KEY",
            LedgerError::IdempotencyKeyReused(_) => "IDEMPOTENCY_KEY_REUSED",
            LedgerError::InvalidTransition { .. } => "INVALID_TRANSITION",
            LedgerError::IdGenerationExhausted { .. } => "ID_GENERATION_EXHAUSTED",
            LedgerError::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            LedgerError::TransactionFailed { .. } => "TRANSACTION_FAILED",
            LedgerError::ConfigurationError(_) => "CONFIGURATION_ERROR",
        }
    }
}

/// Result type alias for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;
