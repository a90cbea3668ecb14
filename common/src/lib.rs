//! Corebank Common Types
//!
//! Shared types used across the ledger workspace: identifiers, exact-decimal
//! amounts, the error taxonomy and time helpers.

pub mod identifiers;
pub mod monetary;
pub mod error;
pub mod time;

pub use identifiers::*;
pub use monetary::*;
pub use error::*;
pub use time::*;
