//! Monetary types for the ledger.
//!
//! Money is always an exact [`Decimal`]. Floating point never enters the
//! ledger; callers hand over either a `Decimal` or its string form.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{LedgerError, Result};

/// Number of fractional digits the ledger books amounts and balances at.
pub const LEDGER_SCALE: u32 = 2;

/// Largest single amount the ledger accepts: 999,999,999,999,999.99.
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(0x5D89_FFFF, 0x0163_4578, 0, false, 2);

/// Largest magnitude an account balance or overdraft limit may reach:
/// 10^24. Any balance within this bound plus any [`Amount`] stays exact at
/// [`LEDGER_SCALE`] inside the 96-bit decimal mantissa.
pub const MAX_BALANCE: Decimal = Decimal::from_parts(0xE400_0000, 0xDCC8_0CD2, 0x0052_B7D2, false, 2);

/// A strictly positive transaction amount with at most [`LEDGER_SCALE`]
/// fractional digits, no larger than [`MAX_AMOUNT`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Amount(Decimal);

impl Amount {
    /// Validate and wrap a decimal value.
    pub fn new(value: Decimal) -> Result<Self> {
        if value <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount {
                amount: value.to_string(),
                reason: "amount must be strictly positive".to_string(),
            });
        }

        if value > MAX_AMOUNT {
            return Err(LedgerError::InvalidAmount {
                amount: value.to_string(),
                reason: format!("amount exceeds the maximum of {MAX_AMOUNT}"),
            });
        }

        let normalized = value.normalize();
        if normalized.scale() > LEDGER_SCALE {
            return Err(LedgerError::InvalidAmount {
                amount: value.to_string(),
                reason: format!("amount has more than {LEDGER_SCALE} fractional digits"),
            });
        }

        Ok(Self(to_ledger_scale(normalized)))
    }

    /// Parse an amount from its decimal string form.
    pub fn parse(value: &str) -> Result<Self> {
        let decimal = Decimal::from_str_exact(value.trim()).map_err(|e| {
            LedgerError::InvalidAmount {
                amount: value.to_string(),
                reason: e.to_string(),
            }
        })?;
        Self::new(decimal)
    }

    /// Get the underlying decimal.
    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = LedgerError;

    fn try_from(value: Decimal) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl FromStr for Amount {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Rescale a value so it carries at least [`LEDGER_SCALE`] fractional digits.
/// Values already at a finer scale are left untouched.
pub fn to_ledger_scale(value: Decimal) -> Decimal {
    let mut scaled = value;
    if scaled.scale() < LEDGER_SCALE {
        scaled.rescale(LEDGER_SCALE);
    }
    scaled
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_amount_rejects_non_positive() {
        assert!(matches!(
            Amount::new(Decimal::ZERO),
            Err(LedgerError::InvalidAmount { .. })
        ));
        assert!(matches!(
            Amount::new(dec!(-10)),
            Err(LedgerError::InvalidAmount { .. })
        ));
    }

    #[test]
    fn test_amount_rejects_sub_cent_precision() {
        assert!(Amount::new(dec!(10.001)).is_err());
        // Trailing zeros beyond two places are not extra precision.
        assert_eq!(Amount::new(dec!(10.100)).unwrap().to_string(), "10.10");
    }

    #[test]
    fn test_amount_is_booked_at_two_places() {
        let amount = Amount::new(dec!(500)).unwrap();
        assert_eq!(amount.to_string(), "500.00");
        assert_eq!(amount.value(), dec!(500.00));
    }

    #[test]
    fn test_amount_upper_bound() {
        assert_eq!(MAX_AMOUNT.to_string(), "999999999999999.99");
        assert_eq!(MAX_BALANCE, Decimal::from(10u64.pow(12)) * Decimal::from(10u64.pow(12)));
        assert_eq!(Amount::new(MAX_AMOUNT).unwrap().value(), MAX_AMOUNT);
        assert!(matches!(
            Amount::new(MAX_AMOUNT + dec!(0.01)),
            Err(LedgerError::InvalidAmount { .. })
        ));
        assert!(Amount::new(Decimal::MAX).is_err());
    }

    #[test]
    fn test_amount_parse() {
        assert_eq!(Amount::parse("50000.01").unwrap().value(), dec!(50000.01));
        assert!(Amount::parse("NaN").is_err());
        assert!(Amount::parse("inf").is_err());
        assert!(Amount::parse("").is_err());
    }

    #[test]
    fn test_amount_deserialize_validates() {
        let ok: Amount = serde_json::from_str("\"12.50\"").unwrap();
        assert_eq!(ok.value(), dec!(12.50));
        assert!(serde_json::from_str::<Amount>("\"-1\"").is_err());
    }

    #[test]
    fn test_to_ledger_scale_keeps_finer_scale() {
        assert_eq!(to_ledger_scale(dec!(7)).to_string(), "7.00");
        assert_eq!(to_ledger_scale(dec!(7.125)).to_string(), "7.125");
    }
}
