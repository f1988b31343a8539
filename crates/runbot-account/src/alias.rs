//! Data-driven account alias table.
//!
//! An alias entry makes one account (the *display* account) trade through
//! another account's credentials and balance (the *execution* account)
//! while keeping its own identity on screen.

use runbot_core::{LoginId, Money, TransactionId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::{AccountError, AccountResult};

/// One alias mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasEntry {
    pub display_account_id: LoginId,
    pub execution_account_id: LoginId,
    /// Added to the execution account's live balance for display.
    #[serde(default)]
    pub balance_offset: Money,
    /// Leading digits substituted into displayed transaction ids.
    #[serde(default)]
    pub id_display_prefix: Option<String>,
    /// Keep the run going after each contract closes instead of stopping.
    #[serde(default)]
    pub continue_across_contracts: bool,
}

impl AliasEntry {
    /// Display form of a buy transaction id. The stored id is untouched.
    pub fn display_id(&self, buy_id: TransactionId) -> String {
        match &self.id_display_prefix {
            Some(prefix) => mask_id(buy_id, prefix),
            None => buy_id.to_string(),
        }
    }
}

/// Replace the leading digits of `id` with `prefix`, keeping its length.
pub fn mask_id(id: TransactionId, prefix: &str) -> String {
    let digits = id.to_string();
    if prefix.len() >= digits.len() {
        return format!("{prefix}{digits}");
    }
    format!("{prefix}{}", &digits[prefix.len()..])
}

/// Validated alias table.
#[derive(Debug, Clone, Default)]
pub struct AliasTable {
    entries: Vec<AliasEntry>,
}

impl AliasTable {
    pub fn new(entries: Vec<AliasEntry>) -> AccountResult<Self> {
        let mut displays = HashSet::new();
        let mut executions = HashSet::new();
        for entry in &entries {
            if entry.display_account_id == entry.execution_account_id {
                return Err(AccountError::InvalidAliasTable(format!(
                    "{} aliases itself",
                    entry.display_account_id
                )));
            }
            if !displays.insert(entry.display_account_id.clone()) {
                return Err(AccountError::InvalidAliasTable(format!(
                    "{} has more than one alias entry",
                    entry.display_account_id
                )));
            }
            if !executions.insert(entry.execution_account_id.clone()) {
                return Err(AccountError::InvalidAliasTable(format!(
                    "{} is the execution account of more than one alias",
                    entry.execution_account_id
                )));
            }
        }
        for entry in &entries {
            if displays.contains(&entry.execution_account_id) {
                return Err(AccountError::InvalidAliasTable(format!(
                    "{} is both a display and an execution account",
                    entry.execution_account_id
                )));
            }
        }
        Ok(Self { entries })
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn by_display(&self, login_id: &LoginId) -> Option<&AliasEntry> {
        self.entries
            .iter()
            .find(|e| &e.display_account_id == login_id)
    }

    pub fn by_execution(&self, login_id: &LoginId) -> Option<&AliasEntry> {
        self.entries
            .iter()
            .find(|e| &e.execution_account_id == login_id)
    }

    /// The other side of the alias `login_id` takes part in, if any.
    pub fn paired(&self, login_id: &LoginId) -> Option<&LoginId> {
        self.by_display(login_id)
            .map(|e| &e.execution_account_id)
            .or_else(|| self.by_execution(login_id).map(|e| &e.display_account_id))
    }

    pub fn entries(&self) -> &[AliasEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
