//! Push message routing.
//!
//! Fans the connection's push stream out to its consumers:
//! - contract updates to the bot driver
//! - balances to the display projection
//! - connection events to metrics

use parking_lot::Mutex;
use runbot_account::{
    compute_display, AccountSession, BalanceSwapState, DisplayBalance, DisplayContext,
};
use runbot_core::{AccountBalance, ContractUpdate};
use runbot_persistence::SessionStore;
use runbot_telemetry::Metrics;
use runbot_ws::PushMessage;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub struct PushRouter {
    account: Arc<AccountSession>,
    store: Arc<dyn SessionStore>,
    contracts: mpsc::Sender<ContractUpdate>,
    /// Latest balance per account.
    balances: Mutex<Vec<AccountBalance>>,
    connected_once: AtomicBool,
}

impl PushRouter {
    pub fn new(
        account: Arc<AccountSession>,
        store: Arc<dyn SessionStore>,
        contracts: mpsc::Sender<ContractUpdate>,
    ) -> Self {
        Self {
            account,
            store,
            contracts,
            balances: Mutex::new(Vec::new()),
            connected_once: AtomicBool::new(false),
        }
    }

    /// Route pushes until the connection's sender is dropped.
    pub async fn run(self: Arc<Self>, mut pushes: mpsc::Receiver<PushMessage>) {
        while let Some(push) = pushes.recv().await {
            self.route(push).await;
        }
        debug!("Push router stopped");
    }

    pub async fn route(&self, push: PushMessage) {
        match push {
            PushMessage::Contract(update) => {
                let contract_id = update.contract_id;
                if self.contracts.send(update).await.is_err() {
                    debug!(%contract_id, "Contract update dropped, no run listening");
                }
            }
            PushMessage::Balance(balance) => {
                self.record_balance(balance);
            }
            PushMessage::Transaction(tx) => {
                debug!(
                    action = %tx.action,
                    amount = %tx.amount,
                    balance = %tx.balance,
                    transaction_id = %tx.transaction_id,
                    "Transaction"
                );
            }
            PushMessage::Reconnected(login_id) => {
                Metrics::ws_connected();
                if !self.connected_once.swap(true, Ordering::SeqCst) {
                    info!("Connected");
                    return;
                }
                Metrics::ws_reconnect("transport");
                match login_id {
                    Some(login_id) => {
                        Metrics::reauthorize("ok");
                        info!(%login_id, "Connection restored");
                    }
                    None => {
                        Metrics::reauthorize("skipped");
                        info!("Connection restored without authorization");
                    }
                }
            }
            PushMessage::Disconnected => {
                Metrics::ws_disconnected();
                warn!("Connection lost");
            }
        }
    }

    /// Store `balance` and return what the account shows for it.
    pub fn record_balance(&self, balance: AccountBalance) -> DisplayBalance {
        let all = {
            let mut balances = self.balances.lock();
            match balances.iter_mut().find(|b| b.login_id == balance.login_id) {
                Some(existing) => *existing = balance.clone(),
                None => balances.push(balance.clone()),
            }
            balances.clone()
        };

        let is_active = self.account.active_login_id().as_ref() == Some(&balance.login_id);
        let swap = BalanceSwapState::load(self.store.as_ref());
        let ctx = DisplayContext::from_store(
            self.store.as_ref(),
            &swap,
            self.account.resolver().aliases(),
        );
        let shown = compute_display(&balance.login_id, &balance, &all, is_active, &ctx);
        info!(
            login_id = %balance.login_id,
            raw = %balance.balance,
            shown = %shown.balance,
            currency = %shown.currency,
            aliased = shown.is_aliased,
            "Balance"
        );
        shown
    }

    pub fn balances(&self) -> Vec<AccountBalance> {
        self.balances.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use runbot_account::{AccountsList, AliasEntry, AliasTable, IdentityResolver};
    use runbot_core::{
        ContractId, ContractType, LoginId, Money, Token, TransactionId, TransactionIds,
    };
    use runbot_persistence::keys::{ACCOUNTS_LIST, ACTIVE_LOGINID, SHOW_AS_CR};
    use runbot_persistence::{MemoryStore, SessionStoreExt};
    use runbot_ws::{DynBrokerApi, MockBrokerApi};
    use rust_decimal_macros::dec;

    fn id(s: &str) -> LoginId {
        LoginId::new(s).unwrap()
    }

    fn router(alias_mode: bool) -> (PushRouter, mpsc::Receiver<ContractUpdate>) {
        let store = Arc::new(MemoryStore::new());
        let mut accounts = AccountsList::new();
        accounts.insert(id("CR200"), Token::new("tok-cr"));
        accounts.insert(id("VRTC300"), Token::new("tok-demo"));
        store.set(ACCOUNTS_LIST, &accounts).unwrap();
        store.set(ACTIVE_LOGINID, &id("CR200")).unwrap();
        store.set(SHOW_AS_CR, &alias_mode).unwrap();

        let dyn_store: Arc<dyn SessionStore> = store;
        let aliases = AliasTable::new(vec![AliasEntry {
            display_account_id: id("CR200"),
            execution_account_id: id("VRTC300"),
            balance_offset: Money::new(dec!(100)),
            id_display_prefix: None,
            continue_across_contracts: false,
        }])
        .unwrap();
        let resolver = Arc::new(IdentityResolver::new(aliases, Arc::clone(&dyn_store)));
        let api: DynBrokerApi = Arc::new(MockBrokerApi::new());
        let account = Arc::new(AccountSession::new(api, resolver, Arc::clone(&dyn_store)));

        let (tx, rx) = mpsc::channel(8);
        (PushRouter::new(account, dyn_store, tx), rx)
    }

    fn balance(login: &str, amount: Money) -> AccountBalance {
        AccountBalance::new(id(login), amount, "USD")
    }

    #[tokio::test]
    async fn test_contract_updates_reach_driver_channel() {
        let (router, mut rx) = router(false);
        let update = ContractUpdate {
            contract_id: ContractId(7),
            transaction_ids: TransactionIds::bought(TransactionId(8)),
            buy_price: Money::new(dec!(1)),
            payout: Money::new(dec!(1.95)),
            profit: Money::ZERO,
            currency: "USD".to_string(),
            is_sold: false,
            is_completed: false,
            date_start: 0,
            contract_type: ContractType::new("CALL"),
            symbol: "R_100".to_string(),
            run_id: None,
            display_buy_id: None,
        };
        router.route(PushMessage::Contract(update.clone())).await;
        assert_eq!(rx.recv().await, Some(update));
    }

    #[tokio::test]
    async fn test_alias_balance_projects_execution_account() {
        let (router, _rx) = router(true);
        router
            .route(PushMessage::Balance(balance("VRTC300", Money::new(dec!(50)))))
            .await;
        let shown = router.record_balance(balance("CR200", Money::new(dec!(7))));
        assert!(shown.is_aliased);
        assert_eq!(shown.balance, Money::new(dec!(150)));
        assert_eq!(router.balances().len(), 2);
    }

    #[test]
    fn test_balance_passes_through_without_alias_mode() {
        let (router, _rx) = router(false);
        router.record_balance(balance("VRTC300", Money::new(dec!(50))));
        let shown = router.record_balance(balance("CR200", Money::new(dec!(7))));
        assert!(!shown.is_aliased);
        assert_eq!(shown.balance, Money::new(dec!(7)));
    }

    #[test]
    fn test_inactive_account_is_never_projected() {
        let (router, _rx) = router(true);
        let shown = router.record_balance(balance("VRTC300", Money::new(dec!(50))));
        assert_eq!(shown.balance, Money::new(dec!(50)));
        assert_eq!(shown.flag, "demo");
    }

    #[test]
    fn test_latest_balance_replaces_previous() {
        let (router, _rx) = router(false);
        router.record_balance(balance("CR200", Money::new(dec!(1))));
        router.record_balance(balance("CR200", Money::new(dec!(2))));
        let balances = router.balances();
        assert_eq!(balances.len(), 1);
        assert_eq!(balances[0].balance, Money::new(dec!(2)));
    }
}
