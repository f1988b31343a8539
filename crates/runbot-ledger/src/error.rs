//! Ledger error types.

use runbot_persistence::PersistenceError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Ledger persistence failed: {0}")]
    Persistence(#[from] PersistenceError),
}

pub type LedgerResult<T> = Result<T, LedgerError>;
