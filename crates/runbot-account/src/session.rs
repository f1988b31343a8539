//! Account session: the single owner of the transport's authorization
//! context.
//!
//! Only one `(api_login_id, token)` pair is active on the transport at a
//! time. [`AccountSession::ensure_authorized`] serializes re-authorization
//! and returns only after the server has confirmed the target account.

use runbot_core::LoginId;
use runbot_persistence::keys::{ACCOUNTS_LIST, ACTIVE_LOGINID, SHOW_AS_CR};
use runbot_persistence::{SessionStore, SessionStoreExt};
use runbot_telemetry::Metrics;
use runbot_ws::DynBrokerApi;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::{AccountError, AccountResult};
use crate::resolver::{AccountsList, IdentityResolver, TradingIdentity};

pub struct AccountSession {
    api: DynBrokerApi,
    resolver: Arc<IdentityResolver>,
    store: Arc<dyn SessionStore>,
    switching_disabled: AtomicBool,
    auth_lock: Mutex<()>,
}

impl AccountSession {
    pub fn new(
        api: DynBrokerApi,
        resolver: Arc<IdentityResolver>,
        store: Arc<dyn SessionStore>,
    ) -> Self {
        Self {
            api,
            resolver,
            store,
            switching_disabled: AtomicBool::new(false),
            auth_lock: Mutex::new(()),
        }
    }

    pub fn api(&self) -> &DynBrokerApi {
        &self.api
    }

    pub fn resolver(&self) -> &Arc<IdentityResolver> {
        &self.resolver
    }

    /// Account the user has selected.
    pub fn active_login_id(&self) -> Option<LoginId> {
        self.store.get_or_default::<Option<LoginId>>(ACTIVE_LOGINID)
    }

    pub fn is_logged_in(&self) -> bool {
        self.active_login_id()
            .is_some_and(|id| self.resolver.token_for(&id).is_some())
    }

    /// Identity the next trade must use, derived fresh from persisted state.
    pub fn current_identity(&self) -> AccountResult<TradingIdentity> {
        let displayed = self.active_login_id().ok_or(AccountError::NotLoggedIn)?;
        self.resolver.resolve_trading_identity(&displayed)
    }

    /// Account the transport is authorized as right now.
    pub fn authorized_login_id(&self) -> Option<LoginId> {
        self.api.authorized_login_id()
    }

    /// Make the transport authorized as `identity.api_login_id`.
    ///
    /// Awaits the authorize round trip and checks the returned account.
    pub async fn ensure_authorized(&self, identity: &TradingIdentity) -> AccountResult<()> {
        let _guard = self.auth_lock.lock().await;

        let current = self.api.authorized_login_id();
        if current.as_ref() == Some(&identity.api_login_id) {
            return Ok(());
        }

        info!(
            from = ?current.as_ref().map(LoginId::as_str),
            to = %identity.api_login_id,
            aliased = identity.is_aliased,
            "Re-authorizing transport"
        );

        let authorized = match self.api.authorize(identity.token.clone()).await {
            Ok(info) => info,
            Err(e) => {
                warn!(code = %e.code, target = %identity.api_login_id, "Re-authorize failed");
                Metrics::reauthorize("error");
                return Err(AccountError::Authorization(e));
            }
        };

        if authorized.login_id != identity.api_login_id {
            Metrics::reauthorize("mismatch");
            return Err(AccountError::IdentityMismatch {
                expected: identity.api_login_id.clone(),
                actual: Some(authorized.login_id),
            });
        }

        // The transport may have dropped the session while we were waiting.
        let confirmed = self.api.authorized_login_id();
        if confirmed.as_ref() != Some(&identity.api_login_id) {
            Metrics::reauthorize("mismatch");
            return Err(AccountError::IdentityMismatch {
                expected: identity.api_login_id.clone(),
                actual: confirmed,
            });
        }

        Metrics::reauthorize("ok");
        Ok(())
    }

    /// Select `login_id` as the active account.
    pub async fn switch_account(&self, login_id: &LoginId) -> AccountResult<TradingIdentity> {
        if !self.is_switching_enabled() {
            return Err(AccountError::SwitchingDisabled);
        }
        let identity = self.resolver.resolve_trading_identity(login_id)?;
        self.ensure_authorized(&identity).await?;
        self.store.set(ACTIVE_LOGINID, login_id)?;
        info!(login_id = %login_id, api_login_id = %identity.api_login_id, "Active account switched");
        Ok(identity)
    }

    /// Store the credentials of every account and activate `active`.
    pub async fn login(
        &self,
        accounts: AccountsList,
        active: &LoginId,
    ) -> AccountResult<TradingIdentity> {
        let mut stored = self.resolver.accounts();
        stored.extend(accounts);
        self.store.set(ACCOUNTS_LIST, &stored)?;
        self.switch_account(active).await
    }

    /// Forget every credential and the active account.
    pub fn logout(&self) -> AccountResult<()> {
        self.store.remove(ACCOUNTS_LIST)?;
        self.store.remove(ACTIVE_LOGINID)?;
        info!("Logged out");
        Ok(())
    }

    /// Disabled for the duration of a bot run.
    pub fn set_switching_enabled(&self, enabled: bool) {
        self.switching_disabled.store(!enabled, Ordering::SeqCst);
    }

    pub fn is_switching_enabled(&self) -> bool {
        !self.switching_disabled.load(Ordering::SeqCst)
    }

    pub fn set_alias_mode(&self, enabled: bool) -> AccountResult<()> {
        self.store.set(SHOW_AS_CR, &enabled)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alias::{AliasEntry, AliasTable};
    use runbot_core::{Money, Token};
    use runbot_persistence::MemoryStore;
    use runbot_ws::{BrokerApi, MockBrokerApi, MockCall};
    use std::time::Duration;

    fn id(s: &str) -> LoginId {
        LoginId::new(s).unwrap()
    }

    struct Fixture {
        api: Arc<MockBrokerApi>,
        store: Arc<MemoryStore>,
        session: AccountSession,
    }

    fn fixture() -> Fixture {
        let api = Arc::new(MockBrokerApi::new());
        api.add_account("tok-real", "CR100");
        api.add_account("tok-demo", "VRTC200");

        let store = Arc::new(MemoryStore::new());
        let mut accounts = AccountsList::new();
        accounts.insert(id("CR100"), Token::new("tok-real"));
        accounts.insert(id("VRTC200"), Token::new("tok-demo"));
        store.set(ACCOUNTS_LIST, &accounts).unwrap();
        store.set(ACTIVE_LOGINID, &id("CR100")).unwrap();

        let table = AliasTable::new(vec![AliasEntry {
            display_account_id: id("CR100"),
            execution_account_id: id("VRTC200"),
            balance_offset: Money::ZERO,
            id_display_prefix: None,
            continue_across_contracts: false,
        }])
        .unwrap();
        let dyn_store: Arc<dyn SessionStore> = store.clone();
        let resolver = Arc::new(IdentityResolver::new(table, Arc::clone(&dyn_store)));
        let dyn_api: DynBrokerApi = api.clone();
        let session = AccountSession::new(dyn_api, resolver, dyn_store);
        Fixture {
            api,
            store,
            session,
        }
    }

    #[tokio::test]
    async fn test_ensure_authorized_is_noop_when_already_authorized() {
        let f = fixture();
        f.api.set_authorized(Some("CR100"));

        let identity = f.session.current_identity().unwrap();
        f.session.ensure_authorized(&identity).await.unwrap();

        assert!(f.api.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ensure_authorized_awaits_alias_switch() {
        let f = fixture();
        f.api.set_authorized(Some("CR100"));
        f.api.set_authorize_delay(Duration::from_millis(500));
        f.session.set_alias_mode(true).unwrap();

        let identity = f.session.current_identity().unwrap();
        assert_eq!(identity.api_login_id, id("VRTC200"));

        f.session.ensure_authorized(&identity).await.unwrap();
        assert_eq!(f.session.authorized_login_id(), Some(id("VRTC200")));
        assert!(matches!(
            f.api.calls().as_slice(),
            [MockCall::Authorize { login_id: Some(l) }] if l == &id("VRTC200")
        ));
    }

    #[tokio::test]
    async fn test_rejected_token_is_an_authorization_error() {
        let f = fixture();
        let mut accounts: AccountsList = f.store.get_or_default(ACCOUNTS_LIST);
        accounts.insert(id("CR100"), Token::new("revoked"));
        f.store.set(ACCOUNTS_LIST, &accounts).unwrap();

        let identity = f.session.current_identity().unwrap();
        let err = f.session.ensure_authorized(&identity).await.unwrap_err();

        assert!(matches!(err, AccountError::Authorization(ref e) if e.code == "InvalidToken"));
        assert_eq!(err.to_api_error().code, "InvalidToken");
    }

    #[tokio::test]
    async fn test_mismatched_account_is_rejected() {
        let f = fixture();
        // Token for CR100 actually authorizes the demo account.
        f.api.add_account("tok-real", "VRTC200");

        let identity = f.session.current_identity().unwrap();
        let err = f.session.ensure_authorized(&identity).await.unwrap_err();
        assert!(matches!(err, AccountError::IdentityMismatch { .. }));
    }

    #[tokio::test]
    async fn test_switch_blocked_while_disabled() {
        let f = fixture();
        f.session.set_switching_enabled(false);

        let err = f.session.switch_account(&id("VRTC200")).await.unwrap_err();
        assert!(matches!(err, AccountError::SwitchingDisabled));
        assert_eq!(f.session.active_login_id(), Some(id("CR100")));

        f.session.set_switching_enabled(true);
        f.session.switch_account(&id("VRTC200")).await.unwrap();
        assert_eq!(f.session.active_login_id(), Some(id("VRTC200")));
    }

    #[tokio::test]
    async fn test_logout_forgets_credentials() {
        let f = fixture();
        assert!(f.session.is_logged_in());

        f.session.logout().unwrap();

        assert!(!f.session.is_logged_in());
        assert!(matches!(
            f.session.current_identity(),
            Err(AccountError::NotLoggedIn)
        ));
    }

    #[tokio::test]
    async fn test_login_persists_and_activates() {
        let f = fixture();
        f.session.logout().unwrap();

        let mut accounts = AccountsList::new();
        accounts.insert(id("VRTC200"), Token::new("tok-demo"));
        let identity = f.session.login(accounts, &id("VRTC200")).await.unwrap();

        assert_eq!(identity.api_login_id, id("VRTC200"));
        assert!(f.session.is_logged_in());
        assert_eq!(f.api.authorized_login_id(), Some(id("VRTC200")));
    }
}
