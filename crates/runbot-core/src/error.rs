//! Error types for runbot-core.
//!
//! `ApiError` is the normalized `{code, message}` shape every low-level
//! brokerage failure is converted into before it reaches the run panel.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Core error types.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid login id: {0:?}")]
    InvalidLoginId(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Decimal parse error: {0}")]
    DecimalParse(#[from] rust_decimal::Error),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Severity of a trade error for the run session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// Run session stays alive; message goes to the journal.
    Recoverable,
    /// Force full stop; counters reset; fresh run click required.
    Unrecoverable,
}

/// Normalized brokerage API error.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct ApiError {
    pub code: String,
    pub message: String,
}

impl ApiError {
    pub const PRICE_MOVED: &'static str = "PriceMoved";
    pub const INVALID_CONTRACT_PROPOSAL: &'static str = "InvalidContractProposal";
    pub const DISCONNECT: &'static str = "DisconnectError";
    pub const TIMEOUT: &'static str = "RequestTimeout";

    /// Error codes that trigger the bounded purchase recovery loop.
    pub const RETRYABLE_CODES: [&'static str; 2] =
        [Self::PRICE_MOVED, Self::INVALID_CONTRACT_PROPOSAL];

    /// Error codes that force a full stop of the run session.
    pub const UNRECOVERABLE_CODES: [&'static str; 16] = [
        "InsufficientBalance",
        "CustomLimitsReached",
        "OfferingsValidationError",
        "InvalidCurrency",
        "ContractBuyValidationError",
        "NotDefaultCurrency",
        "PleaseAuthenticate",
        "FinancialAssessmentRequired",
        "AuthorizationRequired",
        "InvalidToken",
        "MarketIsClosed",
        "InvalidSymbol",
        "InputValidationFailed",
        "PermissionDenied",
        "SelfExclusion",
        "AccountDisabled",
    ];

    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Transport-level failure (socket closed, channel dropped).
    pub fn disconnect(message: impl Into<String>) -> Self {
        Self::new(Self::DISCONNECT, message)
    }

    /// Request that received no response in time.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(Self::TIMEOUT, message)
    }

    /// True for `PriceMoved` / `InvalidContractProposal`.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        Self::RETRYABLE_CODES.contains(&self.code.as_str())
    }

    #[must_use]
    pub fn is_disconnect(&self) -> bool {
        self.code == Self::DISCONNECT
    }

    /// Classify by the fixed code lists. Codes not on the unrecoverable
    /// list keep the run session alive.
    #[must_use]
    pub fn severity(&self) -> ErrorSeverity {
        if Self::UNRECOVERABLE_CODES.contains(&self.code.as_str()) {
            ErrorSeverity::Unrecoverable
        } else {
            ErrorSeverity::Recoverable
        }
    }
}
