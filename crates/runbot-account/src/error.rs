//! Account error types.

use runbot_core::{ApiError, LoginId};
use runbot_persistence::PersistenceError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AccountError {
    #[error("No account is logged in")]
    NotLoggedIn,

    #[error("No token stored for account {0}")]
    MissingToken(LoginId),

    /// The alias table points at an account whose credential is unknown.
    #[error("Alias {display} executes on {execution}, but no token is stored for {execution}")]
    MissingAliasToken { display: LoginId, execution: LoginId },

    #[error("Account switching is disabled while the bot is running")]
    SwitchingDisabled,

    #[error("Authorization failed: {0}")]
    Authorization(ApiError),

    #[error("Authorized as {actual:?}, expected {expected}")]
    IdentityMismatch {
        expected: LoginId,
        actual: Option<LoginId>,
    },

    #[error("Invalid alias table: {0}")]
    InvalidAliasTable(String),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),
}

pub type AccountResult<T> = Result<T, AccountError>;

impl AccountError {
    /// Normalized `{code, message}` form for the journal.
    pub fn to_api_error(&self) -> ApiError {
        match self {
            Self::Authorization(api) => api.clone(),
            Self::NotLoggedIn => ApiError::new("AuthorizationRequired", self.to_string()),
            Self::MissingToken(_) | Self::MissingAliasToken { .. } => {
                ApiError::new("InvalidToken", self.to_string())
            }
            Self::IdentityMismatch { .. } => ApiError::new("PermissionDenied", self.to_string()),
            _ => ApiError::new("AccountError", self.to_string()),
        }
    }
}
