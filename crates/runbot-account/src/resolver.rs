//! Account Identity Resolver.
//!
//! Maps the account shown to the user onto the account (and credential)
//! that trades must actually be placed under. Every lookup reads the
//! persisted state fresh; nothing here caches identity.

use runbot_core::{LoginId, Token};
use runbot_persistence::keys::{ACCOUNTS_LIST, SHOW_AS_CR};
use runbot_persistence::{SessionStore, SessionStoreExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use crate::alias::{AliasEntry, AliasTable};
use crate::error::{AccountError, AccountResult};

/// Persisted `loginid -> token` map.
pub type AccountsList = BTreeMap<LoginId, Token>;

/// Account a trade must be executed under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradingIdentity {
    pub displayed_login_id: LoginId,
    pub api_login_id: LoginId,
    pub token: Token,
    pub is_aliased: bool,
}

pub struct IdentityResolver {
    aliases: AliasTable,
    store: Arc<dyn SessionStore>,
}

impl IdentityResolver {
    pub fn new(aliases: AliasTable, store: Arc<dyn SessionStore>) -> Self {
        Self { aliases, store }
    }

    pub fn aliases(&self) -> &AliasTable {
        &self.aliases
    }

    /// Whether the persisted alias display flag is on.
    pub fn is_alias_mode_active(&self) -> bool {
        self.store.get_or_default::<bool>(SHOW_AS_CR)
    }

    pub fn accounts(&self) -> AccountsList {
        self.store.get_or_default(ACCOUNTS_LIST)
    }

    pub fn token_for(&self, login_id: &LoginId) -> Option<Token> {
        self.accounts()
            .remove(login_id)
            .filter(|token| !token.is_empty())
    }

    /// Alias entry in effect for `displayed`, if alias mode is on.
    pub fn alias_entry_for(&self, displayed: &LoginId) -> Option<&AliasEntry> {
        if !self.is_alias_mode_active() {
            return None;
        }
        self.aliases.by_display(displayed)
    }

    /// Resolve the `(api_login_id, token)` pair for `displayed`.
    ///
    /// A missing credential for an alias target is a configuration error
    /// and is never papered over with the displayed account's own token.
    pub fn resolve_trading_identity(&self, displayed: &LoginId) -> AccountResult<TradingIdentity> {
        if let Some(entry) = self.alias_entry_for(displayed) {
            let execution = entry.execution_account_id.clone();
            let token = self
                .token_for(&execution)
                .ok_or_else(|| AccountError::MissingAliasToken {
                    display: displayed.clone(),
                    execution: execution.clone(),
                })?;
            debug!(displayed = %displayed, execution = %execution, "Resolved aliased identity");
            return Ok(TradingIdentity {
                displayed_login_id: displayed.clone(),
                api_login_id: execution,
                token,
                is_aliased: true,
            });
        }

        let token = self
            .token_for(displayed)
            .ok_or_else(|| AccountError::MissingToken(displayed.clone()))?;
        Ok(TradingIdentity {
            displayed_login_id: displayed.clone(),
            api_login_id: displayed.clone(),
            token,
            is_aliased: false,
        })
    }

    /// Ledger bucket that events tagged with `login_id` belong to.
    pub fn storage_identity(&self, login_id: &LoginId) -> LoginId {
        self.alias_entry_for(login_id)
            .map(|entry| entry.execution_account_id.clone())
            .unwrap_or_else(|| login_id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use runbot_core::Money;
    use runbot_persistence::MemoryStore;

    fn id(s: &str) -> LoginId {
        LoginId::new(s).unwrap()
    }

    fn resolver(with_demo_token: bool) -> (IdentityResolver, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let mut accounts = AccountsList::new();
        accounts.insert(id("CR100"), Token::new("tok-real"));
        if with_demo_token {
            accounts.insert(id("VRTC200"), Token::new("tok-demo"));
        }
        store.set(ACCOUNTS_LIST, &accounts).unwrap();

        let table = AliasTable::new(vec![AliasEntry {
            display_account_id: id("CR100"),
            execution_account_id: id("VRTC200"),
            balance_offset: Money::ZERO,
            id_display_prefix: None,
            continue_across_contracts: true,
        }])
        .unwrap();
        let dyn_store: Arc<dyn SessionStore> = store.clone();
        (IdentityResolver::new(table, dyn_store), store)
    }

    #[test]
    fn test_pass_through_when_alias_mode_off() {
        let (resolver, _store) = resolver(true);
        let identity = resolver.resolve_trading_identity(&id("CR100")).unwrap();

        assert!(!identity.is_aliased);
        assert_eq!(identity.api_login_id, id("CR100"));
        assert_eq!(identity.token.expose(), "tok-real");
        assert_eq!(resolver.storage_identity(&id("CR100")), id("CR100"));
    }

    #[test]
    fn test_alias_mode_routes_to_execution_account() {
        let (resolver, store) = resolver(true);
        store.set(SHOW_AS_CR, &true).unwrap();

        let identity = resolver.resolve_trading_identity(&id("CR100")).unwrap();

        assert!(identity.is_aliased);
        assert_eq!(identity.displayed_login_id, id("CR100"));
        assert_eq!(identity.api_login_id, id("VRTC200"));
        assert_eq!(identity.token.expose(), "tok-demo");
        assert_eq!(resolver.storage_identity(&id("CR100")), id("VRTC200"));
        assert_eq!(resolver.storage_identity(&id("VRTC200")), id("VRTC200"));
    }

    #[test]
    fn test_missing_alias_token_fails_loudly() {
        let (resolver, store) = resolver(false);
        store.set(SHOW_AS_CR, &true).unwrap();

        let err = resolver.resolve_trading_identity(&id("CR100")).unwrap_err();
        assert!(matches!(err, AccountError::MissingAliasToken { .. }));
    }

    #[test]
    fn test_unknown_account_has_no_identity() {
        let (resolver, _store) = resolver(true);
        let err = resolver.resolve_trading_identity(&id("CR404")).unwrap_err();
        assert!(matches!(err, AccountError::MissingToken(_)));
    }
}
