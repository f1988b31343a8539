//! Executor error types.

use runbot_account::AccountError;
use runbot_core::ApiError;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecutorError {
    /// Identity could not be resolved or the transport could not be
    /// authorized as it. Never retried.
    #[error("Identity resolution failed: {0}")]
    Identity(#[from] AccountError),

    #[error("Purchase rejected: {0}")]
    Rejected(ApiError),

    #[error("Purchase failed after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: ApiError },

    #[error("Transport did not reconnect within {0:?}")]
    ReconnectTimeout(Duration),
}

pub type ExecutorResult<T> = Result<T, ExecutorError>;

impl ExecutorError {
    /// Normalized `{code, message}` form for the run panel and journal.
    pub fn to_api_error(&self) -> ApiError {
        match self {
            Self::Identity(e) => e.to_api_error(),
            Self::Rejected(e) => e.clone(),
            Self::RetriesExhausted { last, .. } => last.clone(),
            Self::ReconnectTimeout(_) => ApiError::disconnect(self.to_string()),
        }
    }
}
