//! Paging and reconciliation types for history queries.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use corebank_common::{AccountNumber, LedgerError, Result};

/// Zero-based page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    page: usize,
    size: usize,
}

impl PageRequest {
    /// Create a page request. Fails with `InvalidPage` for a zero size.
    pub fn new(page: usize, size: usize) -> Result<Self> {
        if size == 0 {
            return Err(LedgerError::InvalidPage { page, size });
        }
        Ok(Self { page, size })
    }

    /// A single page holding everything.
    pub fn all() -> Self {
        Self {
            page: 0,
            size: usize::MAX,
        }
    }

    /// Page index.
    pub fn page(&self) -> usize {
        self.page
    }

    /// Page size.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of items to skip.
    pub fn offset(&self) -> usize {
        self.page.saturating_mul(self.size)
    }

    /// Cap the page size.
    pub fn clamp(self, max_size: usize) -> Self {
        Self {
            page: self.page,
            size: self.size.min(max_size),
        }
    }
}

/// A bounded slice of results plus the total match count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    /// Items on this page.
    pub items: Vec<T>,
    /// Page index.
    pub page: usize,
    /// Page size used.
    pub size: usize,
    /// Total matches across all pages.
    pub total: usize,
}

impl<T> Page<T> {
    /// Total number of pages.
    pub fn total_pages(&self) -> usize {
        if self.size == 0 {
            return 0;
        }
        self.total.div_ceil(self.size)
    }

    /// Check if a later page exists.
    pub fn has_next(&self) -> bool {
        self.page.saturating_add(1) < self.total_pages()
    }
}

/// Outcome of replaying an account's completed transactions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reconciliation {
    /// Account reconciled.
    pub account: AccountNumber,
    /// Stored balance.
    pub balance: Decimal,
    /// Balance implied by the completed transactions.
    pub replayed: Decimal,
    /// Number of completed transactions replayed.
    pub transactions: usize,
}

impl Reconciliation {
    /// Check the history explains the stored balance.
    pub fn is_consistent(&self) -> bool {
        self.balance == self.replayed
    }

    /// Stored balance minus replayed balance.
    pub fn discrepancy(&self) -> Decimal {
        self.balance - self.replayed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_size_rejected() {
        assert_eq!(
            PageRequest::new(3, 0).unwrap_err(),
            LedgerError::InvalidPage { page: 3, size: 0 }
        );
    }

    #[test]
    fn test_offset_and_clamp() {
        let request = PageRequest::new(2, 500).unwrap().clamp(100);
        assert_eq!(request.size(), 100);
        assert_eq!(request.offset(), 200);
        assert_eq!(PageRequest::all().offset(), 0);
    }

    #[test]
    fn test_last_possible_page_index() {
        let request = PageRequest::new(usize::MAX, 3).unwrap();
        assert_eq!(request.offset(), usize::MAX);

        let page = Page::<u8> {
            items: vec![],
            page: usize::MAX,
            size: 3,
            total: 7,
        };
        assert!(!page.has_next());
    }

    #[test]
    fn test_page_counts() {
        let page = Page {
            items: vec![1, 2, 3],
            page: 0,
            size: 3,
            total: 7,
        };
        assert_eq!(page.total_pages(), 3);
        assert!(page.has_next());

        let last = Page::<u8> {
            items: vec![],
            page: 2,
            size: 3,
            total: 7,
        };
        assert!(!last.has_next());
    }
}
