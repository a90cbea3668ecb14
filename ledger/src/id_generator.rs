//! Identifier generation.
//!
//! Identifiers are `<prefix><unix millis><random suffix>`. The generator
//! checks candidates against the store before handing them out, but that
//! check is advisory: two concurrent callers can still pick the same
//! candidate, and the store's uniqueness constraint decides. Callers retry
//! with a fresh candidate on `DuplicateId`.

use rand::Rng;
use tracing::warn;

use corebank_common::{
    unix_millis, AccountNumber, LedgerError, ReferenceNumber, Result, TransactionId,
};

use crate::config::IdConfig;
use crate::store::LedgerStore;

/// Generator for account numbers, transaction IDs and reference numbers.
#[derive(Debug, Clone)]
pub struct IdGenerator {
    config: IdConfig,
}

impl IdGenerator {
    /// Create a generator.
    pub fn new(config: IdConfig) -> Self {
        Self { config }
    }

    /// Get the configuration.
    pub fn config(&self) -> &IdConfig {
        &self.config
    }

    /// Build a candidate identifier without checking the store.
    pub fn candidate(&self, prefix: &str) -> String {
        let digits = self.config.suffix_digits;
        let bound = 10u64.pow(digits);
        let suffix = rand::thread_rng().gen_range(0..bound);
        format!(
            "{prefix}{millis}{suffix:0width$}",
            millis = unix_millis(),
            width = digits as usize
        )
    }

    /// A fresh account number not currently taken in `store`.
    pub async fn account_number(&self, store: &dyn LedgerStore) -> Result<AccountNumber> {
        for attempt in 1..=self.config.max_attempts {
            let number = AccountNumber::new(self.candidate(&self.config.account_prefix));
            if !store.account_exists(&number).await? {
                return Ok(number);
            }
            warn!(attempt, account = %number, "Account number collision");
        }

        Err(LedgerError::IdGenerationExhausted {
            attempts: self.config.max_attempts,
        })
    }

    /// A fresh transaction ID not currently taken in `store`.
    pub async fn transaction_id(&self, store: &dyn LedgerStore) -> Result<TransactionId> {
        for attempt in 1..=self.config.max_attempts {
            let id = TransactionId::new(self.candidate(&self.config.transaction_prefix));
            if !store.transaction_exists(&id).await? {
                return Ok(id);
            }
            warn!(attempt, transaction_id = %id, "Transaction ID collision");
        }

        Err(LedgerError::IdGenerationExhausted {
            attempts: self.config.max_attempts,
        })
    }

    /// A fresh reference number.
    pub fn reference_number(&self) -> ReferenceNumber {
        ReferenceNumber::new()
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new(IdConfig::default())
    }
}
