//! Persisted key names.

use runbot_core::LoginId;

/// `loginid -> token` map of every logged-in account.
pub const ACCOUNTS_LIST: &str = "accountsList";
/// Login id the user last selected.
pub const ACTIVE_LOGINID: &str = "active_loginid";
/// Alias display mode flag.
pub const SHOW_AS_CR: &str = "show_as_cr";
pub const ADMIN_MIRROR_MODE_ENABLED: &str = "adminMirrorModeEnabled";
pub const BALANCE_SWAP_STATE: &str = "balanceSwapState";
/// Copy-trading follower tokens.
pub const COPY_TOKENS_ARRAY: &str = "copyTokensArray";

const TRANSACTIONS_PREFIX: &str = "transactions_";

/// Per-account ledger bucket key.
pub fn transactions_key(login_id: &LoginId) -> String {
    format!("{TRANSACTIONS_PREFIX}{login_id}")
}

/// Inverse of [`transactions_key`].
pub fn login_id_from_transactions_key(key: &str) -> Option<LoginId> {
    key.strip_prefix(TRANSACTIONS_PREFIX)
        .and_then(|id| LoginId::new(id).ok())
}
