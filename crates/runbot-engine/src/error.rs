//! Engine error types.

use runbot_account::AccountError;
use runbot_core::ApiError;
use runbot_executor::ExecutorError;
use runbot_ledger::LedgerError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Log in to run the bot")]
    NotLoggedIn,

    #[error("Bot is already running")]
    AlreadyRunning,

    #[error("Self-exclusion limit reached: {0}")]
    SelfExclusion(String),

    #[error("Account error: {0}")]
    Account(#[from] AccountError),

    #[error("Executor error: {0}")]
    Executor(#[from] ExecutorError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    /// Normalized `{code, message}` form for the journal.
    pub fn to_api_error(&self) -> ApiError {
        match self {
            Self::NotLoggedIn => ApiError::new("AuthorizationRequired", self.to_string()),
            Self::AlreadyRunning => ApiError::new("AlreadyRunning", self.to_string()),
            Self::SelfExclusion(_) => ApiError::new("SelfExclusion", self.to_string()),
            Self::Account(e) => e.to_api_error(),
            Self::Executor(e) => e.to_api_error(),
            Self::Ledger(e) => ApiError::new("LedgerError", e.to_string()),
        }
    }
}
