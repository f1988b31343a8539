//! Contract ledger for runbot.
//!
//! - `TransactionLedger`: per-account contract history keyed by storage
//!   identity, with run dividers, alias-aware display merge and recovery
//! - `LedgerStatistics`: stake/payout/profit totals

pub mod entry;
pub mod error;
pub mod ledger;
pub mod stats;

pub use entry::{LedgerEntry, RecordOutcome};
pub use error::{LedgerError, LedgerResult};
pub use ledger::{LedgerConfig, TransactionLedger};
pub use stats::LedgerStatistics;
