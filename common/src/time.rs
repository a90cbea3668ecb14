//! Time utilities for the ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, Result};

/// A timestamp (always UTC).
pub type Timestamp = DateTime<Utc>;

/// Get the current timestamp.
pub fn now() -> Timestamp {
    Utc::now()
}

/// Current Unix time in milliseconds.
pub fn unix_millis() -> i64 {
    now().timestamp_millis()
}

/// Inclusive timestamp range used for history queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    start: Timestamp,
    end: Timestamp,
}

impl DateRange {
    /// Create a range. Fails with `InvalidRange` when `start > end`.
    pub fn new(start: Timestamp, end: Timestamp) -> Result<Self> {
        if start > end {
            return Err(LedgerError::InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// Range start (inclusive).
    pub fn start(&self) -> Timestamp {
        self.start
    }

    /// Range end (inclusive).
    pub fn end(&self) -> Timestamp {
        self.end
    }

    /// Check if a timestamp falls inside the range.
    pub fn contains(&self, at: Timestamp) -> bool {
        self.start <= at && at <= self.end
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_range_rejects_inverted_bounds() {
        let t = now();
        let err = DateRange::new(t, t - Duration::seconds(1)).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_RANGE");
    }

    #[test]
    fn test_range_is_inclusive() {
        let start = now();
        let end = start + Duration::seconds(10);
        let range = DateRange::new(start, end).unwrap();
        assert!(range.contains(start));
        assert!(range.contains(end));
        assert!(!range.contains(end + Duration::milliseconds(1)));
    }

    #[test]
    fn test_single_instant_range() {
        let t = now();
        assert!(DateRange::new(t, t).unwrap().contains(t));
    }
}
