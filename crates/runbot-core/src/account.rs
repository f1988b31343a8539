//! Account identity types.
//!
//! The vendor encodes the account type in the login id prefix:
//! `VRTC`/`VRW` are virtual (demo) accounts, `CR`/`MF`/`MX`/`MLT` are real.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::decimal::Money;
use crate::error::CoreError;

/// Account category derived from the login id prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountKind {
    Demo,
    Real,
    Unknown,
}

/// Vendor-assigned account identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LoginId(String);

impl LoginId {
    const DEMO_PREFIXES: [&'static str; 2] = ["VRTC", "VRW"];
    const REAL_PREFIXES: [&'static str; 4] = ["CR", "MF", "MX", "MLT"];

    /// Create a login id, rejecting empty or whitespace-only input.
    pub fn new(value: impl Into<String>) -> Result<Self, CoreError> {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(CoreError::InvalidLoginId(value));
        }
        Ok(Self(trimmed.to_string()))
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Account category from the id prefix.
    #[must_use]
    pub fn kind(&self) -> AccountKind {
        let upper = self.0.to_ascii_uppercase();
        if Self::DEMO_PREFIXES.iter().any(|p| upper.starts_with(p)) {
            AccountKind::Demo
        } else if Self::REAL_PREFIXES.iter().any(|p| upper.starts_with(p)) {
            AccountKind::Real
        } else {
            AccountKind::Unknown
        }
    }

    #[must_use]
    pub fn is_demo(&self) -> bool {
        self.kind() == AccountKind::Demo
    }
}

impl fmt::Display for LoginId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<&str> for LoginId {
    type Error = CoreError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

/// Opaque API credential.
///
/// `Debug` and `Display` never print the secret.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Token(String);

impl Token {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Raw credential, for the authorize request only.
    #[inline]
    pub fn expose(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Token(***)")
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

/// Server-reported balance of one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountBalance {
    pub login_id: LoginId,
    pub balance: Money,
    pub currency: String,
}

impl AccountBalance {
    pub fn new(login_id: LoginId, balance: Money, currency: impl Into<String>) -> Self {
        Self {
            login_id,
            balance,
            currency: currency.into(),
        }
    }
}
