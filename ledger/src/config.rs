//! Ledger configuration.

use corebank_common::{LedgerError, Result};

/// Identifier generation configuration.
#[derive(Debug, Clone)]
pub struct IdConfig {
    /// Prefix for account numbers.
    pub account_prefix: String,
    /// Prefix for transaction IDs.
    pub transaction_prefix: String,
    /// Digits in the random suffix.
    pub suffix_digits: u32,
    /// Attempts before giving up on a unique identifier.
    pub max_attempts: usize,
}

impl Default for IdConfig {
    fn default() -> Self {
        Self {
            account_prefix: "ACC".to_string(),
            transaction_prefix: "TXN".to_string(),
            suffix_digits: 6,
            max_attempts: 10,
        }
    }
}

/// Transaction engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Commit attempts per operation when the store rejects a generated ID.
    pub max_commit_attempts: usize,
    /// Persist a FAILED record for operations rejected after locking.
    pub audit_failed_transactions: bool,
    /// Upper bound on history page size.
    pub max_page_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_commit_attempts: 3,
            audit_failed_transactions: false,
            max_page_size: 100,
        }
    }
}

/// Main ledger configuration.
#[derive(Debug, Clone, Default)]
pub struct LedgerConfig {
    /// Identifier configuration.
    pub id: IdConfig,
    /// Engine configuration.
    pub engine: EngineConfig,
}

impl LedgerConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(prefix) = std::env::var("COREBANK_ACCOUNT_PREFIX") {
            config.id.account_prefix = prefix;
        }

        if let Ok(prefix) = std::env::var("COREBANK_TRANSACTION_PREFIX") {
            config.id.transaction_prefix = prefix;
        }

        if let Some(digits) = parse_var("COREBANK_ID_SUFFIX_DIGITS")? {
            config.id.suffix_digits = digits;
        }

        if let Some(attempts) = parse_var("COREBANK_ID_MAX_ATTEMPTS")? {
            config.id.max_attempts = attempts;
        }

        if let Some(attempts) = parse_var("COREBANK_MAX_COMMIT_ATTEMPTS")? {
            config.engine.max_commit_attempts = attempts;
        }

        if let Some(audit) = parse_var("COREBANK_AUDIT_FAILED_TRANSACTIONS")? {
            config.engine.audit_failed_transactions = audit;
        }

        if let Some(size) = parse_var("COREBANK_MAX_PAGE_SIZE")? {
            config.engine.max_page_size = size;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        if self.id.account_prefix.is_empty() || self.id.transaction_prefix.is_empty() {
            return Err(LedgerError::ConfigurationError(
                "Identifier prefixes cannot be empty".to_string(),
            ));
        }

        if !(1..=18).contains(&self.id.suffix_digits) {
            return Err(LedgerError::ConfigurationError(format!(
                "Suffix digits must be between 1 and 18, got {}",
                self.id.suffix_digits
            )));
        }

        if self.id.max_attempts == 0 || self.engine.max_commit_attempts == 0 {
            return Err(LedgerError::ConfigurationError(
                "Attempt limits must be at least 1".to_string(),
            ));
        }

        if self.engine.max_page_size == 0 {
            return Err(LedgerError::ConfigurationError(
                "Max page size cannot be 0".to_string(),
            ));
        }

        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| LedgerError::ConfigurationError(format!("Invalid value for {name}: {raw}"))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LedgerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.id.account_prefix, "ACC");
        assert_eq!(config.id.transaction_prefix, "TXN");
        assert_eq!(config.id.suffix_digits, 6);
        assert!(!config.engine.audit_failed_transactions);
    }

    #[test]
    fn test_invalid_config() {
        let mut config = LedgerConfig::default();
        config.id.suffix_digits = 0;
        assert!(config.validate().is_err());

        let mut config = LedgerConfig::default();
        config.engine.max_page_size = 0;
        assert!(matches!(
            config.validate(),
            Err(LedgerError::ConfigurationError(_))
        ));
    }
}
