//! Bot driver loop.
//!
//! One call to [`BotDriver::run`] is one run session:
//!
//! 1. Start the run on the panel and reset the strategy
//! 2. Open the purchase window, prepare proposals, purchase
//! 3. Record contract updates in the ledger until the bought contract
//!    closes, then report it sold
//! 4. Ask the panel (take-profit, stop requests) and then the strategy
//!    whether to trade again
//!
//! Contract updates arrive on an mpsc channel fed by the push router.

use runbot_account::AccountSession;
use runbot_core::{
    BotEvent, ContractRecord, ContractStatus, ContractStatusEvent, ContractUpdate, EventBus,
    LoginId, Money, RunId,
};
use runbot_executor::{PurchaseExecutor, PurchaseOutcome, PurchaseRecord};
use runbot_ledger::TransactionLedger;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{EngineError, EngineResult};
use crate::panel::{RunDirective, RunPanel};
use crate::strategy::{Strategy, TradeDecision};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Pause before a purchase is restarted after a recoverable error.
    pub restart_delay_ms: u64,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            restart_delay_ms: 1_000,
        }
    }
}

/// Totals of one finished run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub run_id: RunId,
    pub contracts: u32,
    pub session_profit: Money,
}

pub struct BotDriver {
    panel: Arc<RunPanel>,
    executor: Arc<PurchaseExecutor>,
    ledger: Arc<TransactionLedger>,
    account: Arc<AccountSession>,
    strategy: Arc<dyn Strategy>,
    bus: EventBus,
    config: DriverConfig,
}

impl BotDriver {
    pub fn new(
        panel: Arc<RunPanel>,
        executor: Arc<PurchaseExecutor>,
        ledger: Arc<TransactionLedger>,
        account: Arc<AccountSession>,
        strategy: Arc<dyn Strategy>,
        bus: EventBus,
        config: DriverConfig,
    ) -> Self {
        Self {
            panel,
            executor,
            ledger,
            account,
            strategy,
            bus,
            config,
        }
    }

    pub fn panel(&self) -> &Arc<RunPanel> {
        &self.panel
    }

    /// Run one session until the strategy, the panel or `shutdown` ends it.
    pub async fn run(
        &self,
        updates: &mut mpsc::Receiver<ContractUpdate>,
        shutdown: CancellationToken,
    ) -> EngineResult<RunSummary> {
        let run_id = self.panel.on_run_button_click()?;
        let login_id = self
            .account
            .active_login_id()
            .ok_or(EngineError::NotLoggedIn)?;
        self.strategy.on_run_start();
        info!(run_id = %run_id, strategy = self.strategy.name(), "Run loop started");

        let mut contracts: u32 = 0;
        loop {
            if shutdown.is_cancelled() {
                self.panel.on_stop_button_click();
            }
            if !self.panel.should_trade_again() {
                break;
            }

            let contract_type = self.strategy.next_contract_type();
            self.executor.scope().set_before_purchase();
            let result = match self.executor.prepare(&contract_type).await {
                Ok(()) => self.executor.purchase(contract_type).await,
                Err(e) => Err(e),
            };

            let purchase = match result {
                Ok(PurchaseOutcome::Purchased(record)) => record,
                Ok(PurchaseOutcome::Skipped) => {
                    debug!("Purchase window closed, re-checking run state");
                    continue;
                }
                Ok(PurchaseOutcome::Abandoned) => break,
                Err(e) => {
                    let api_error = e.to_api_error();
                    match self
                        .panel
                        .on_bot_stop_event(Some(&api_error), self.strategy.restart_on_error())
                    {
                        RunDirective::Restart | RunDirective::Continue => {
                            tokio::time::sleep(Duration::from_millis(self.config.restart_delay_ms))
                                .await;
                            continue;
                        }
                        RunDirective::Stop => break,
                    }
                }
            };
            contracts += 1;

            let Some(closed) = self
                .await_contract(&purchase, &login_id, &run_id, updates, &shutdown)
                .await
            else {
                break;
            };

            self.bus
                .emit(BotEvent::ContractStatus(ContractStatusEvent::ContractSold {
                    contract_id: closed.contract_id,
                    profit: closed.profit,
                }));
            if !self.panel.should_trade_again() {
                break;
            }
            if self.strategy.on_contract_closed(&closed) == TradeDecision::Stop {
                info!(run_id = %run_id, "Strategy finished");
                match self.panel.on_bot_stop_event(None, false) {
                    RunDirective::Stop => break,
                    RunDirective::Continue | RunDirective::Restart => {
                        info!(run_id = %run_id, "Continuing across contracts");
                        self.strategy.on_run_start();
                    }
                }
            }
        }

        if self.panel.is_running() {
            self.panel.force_stop("driver_exit");
        }
        let summary = RunSummary {
            run_id,
            contracts,
            session_profit: self.panel.session_profit(),
        };
        info!(
            run_id = %summary.run_id,
            contracts = summary.contracts,
            session_profit = %summary.session_profit,
            "Run loop finished"
        );
        Ok(summary)
    }

    /// Record updates until the purchased contract closes. `None` when the
    /// update channel closed first.
    async fn await_contract(
        &self,
        purchase: &PurchaseRecord,
        login_id: &LoginId,
        run_id: &RunId,
        updates: &mut mpsc::Receiver<ContractUpdate>,
        shutdown: &CancellationToken,
    ) -> Option<ContractRecord> {
        let contract_id = purchase.receipt.contract_id;
        let mut stopping = false;
        loop {
            let update = tokio::select! {
                _ = shutdown.cancelled(), if !stopping => {
                    stopping = true;
                    self.panel.on_stop_button_click();
                    continue;
                }
                update = updates.recv() => update,
            };
            let Some(mut update) = update else {
                warn!(contract_id = %contract_id, "Contract update channel closed");
                return None;
            };

            let ours = update.contract_id == contract_id;
            if ours && update.run_id.is_none() {
                update.run_id = Some(run_id.clone());
            }
            if let Err(e) = self.ledger.record_contract_event(login_id, &update) {
                error!(error = %e, contract_id = %update.contract_id, "Failed to record contract");
            }
            if ours && update.status() == ContractStatus::Closed {
                return Some(ContractRecord::from_update(&update));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::panel::RunConfig;
    use crate::strategy::{MartingaleConfig, MartingaleStrategy};
    use runbot_account::{AccountsList, AliasEntry, AliasTable, IdentityResolver};
    use runbot_core::{
        Basis, BuyRequest, ContractId, ContractStage, ContractType, DurationUnit, EventName,
        PurchaseMode, Token, TradeIntent, TransactionId, TransactionIds,
    };
    use runbot_executor::{PurchaseConfig, ScopeTracker, SharedStake};
    use runbot_ledger::LedgerConfig;
    use runbot_persistence::keys::{ACCOUNTS_LIST, ACTIVE_LOGINID, SHOW_AS_CR};
    use runbot_persistence::{MemoryStore, SessionStore, SessionStoreExt};
    use runbot_ws::{DynBrokerApi, MockBrokerApi};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    struct Fixture {
        api: Arc<MockBrokerApi>,
        ledger: Arc<TransactionLedger>,
        driver: Arc<BotDriver>,
        received: mpsc::UnboundedReceiver<(ContractId, Money)>,
        _listener: runbot_core::Subscription,
    }

    fn login() -> LoginId {
        LoginId::new("CR100").unwrap()
    }

    fn fixture(max_trades: u32, restart_on_error: bool) -> Fixture {
        fixture_with(max_trades, restart_on_error, RunConfig::default(), None)
    }

    /// `continue_across` puts CR100 in alias mode on top of VRTC200 with
    /// the given continue policy.
    fn fixture_with(
        max_trades: u32,
        restart_on_error: bool,
        run: RunConfig,
        continue_across: Option<bool>,
    ) -> Fixture {
        let api = Arc::new(MockBrokerApi::new());
        api.add_account("tok-real", "CR100");
        api.add_account("tok-demo", "VRTC200");
        api.set_authorized(Some("CR100"));

        let store = Arc::new(MemoryStore::new());
        let mut accounts = AccountsList::new();
        accounts.insert(login(), Token::new("tok-real"));
        accounts.insert(LoginId::new("VRTC200").unwrap(), Token::new("tok-demo"));
        store.set(ACCOUNTS_LIST, &accounts).unwrap();
        store.set(ACTIVE_LOGINID, &login()).unwrap();

        let aliases = match continue_across {
            Some(continue_across_contracts) => {
                store.set(SHOW_AS_CR, &true).unwrap();
                AliasTable::new(vec![AliasEntry {
                    display_account_id: login(),
                    execution_account_id: LoginId::new("VRTC200").unwrap(),
                    balance_offset: Money::ZERO,
                    id_display_prefix: None,
                    continue_across_contracts,
                }])
                .unwrap()
            }
            None => AliasTable::empty(),
        };
        let dyn_store: Arc<dyn SessionStore> = store;
        let resolver = Arc::new(IdentityResolver::new(aliases, Arc::clone(&dyn_store)));
        let dyn_api: DynBrokerApi = api.clone();
        let account = Arc::new(AccountSession::new(
            dyn_api,
            Arc::clone(&resolver),
            Arc::clone(&dyn_store),
        ));

        let bus = EventBus::new();
        let scope = Arc::new(ScopeTracker::new());
        let stake = SharedStake::new(Money::ZERO);
        let strategy = Arc::new(MartingaleStrategy::new(
            MartingaleConfig {
                contract_type: ContractType::new("CALL"),
                base_stake: Money::new(dec!(1)),
                multiplier: dec!(2),
                max_stake: None,
                max_trades: Some(max_trades),
                restart_on_error,
            },
            stake.clone(),
        ));
        let executor = Arc::new(PurchaseExecutor::new(
            Arc::clone(&account),
            bus.clone(),
            Arc::clone(&scope),
            Arc::new(stake),
            TradeIntent {
                contract_type: ContractType::new("CALL"),
                symbol: "R_100".to_string(),
                amount: Money::new(dec!(1)),
                duration: 5,
                duration_unit: DurationUnit::Ticks,
                prediction: None,
                currency: "USD".to_string(),
                basis: Basis::Stake,
            },
            PurchaseConfig {
                mode: PurchaseMode::Direct,
                ..PurchaseConfig::default()
            },
        ));
        let ledger = Arc::new(TransactionLedger::new(
            resolver,
            dyn_store,
            LedgerConfig::default(),
        ));
        let panel = Arc::new(RunPanel::new(
            Arc::clone(&account),
            bus.clone(),
            scope,
            run,
        ));

        let (tx, received) = mpsc::unbounded_channel();
        let listener = bus.register(EventName::ContractStatus, move |event| {
            if let BotEvent::ContractStatus(ContractStatusEvent::PurchaseReceived {
                contract_id,
                buy_price,
            }) = event
            {
                let _ = tx.send((*contract_id, *buy_price));
            }
        });

        let driver = Arc::new(BotDriver::new(
            panel,
            executor,
            Arc::clone(&ledger),
            account,
            strategy,
            bus,
            DriverConfig {
                restart_delay_ms: 0,
            },
        ));
        Fixture {
            api,
            ledger,
            driver,
            received,
            _listener: listener,
        }
    }

    /// Push for a mock contract. The mock numbers contract `1000 + n` with
    /// buy transaction `2000 + 2n`.
    fn push(contract_id: ContractId, price: Money, profit: Option<Decimal>) -> ContractUpdate {
        let n = contract_id.0 - 1000;
        ContractUpdate {
            contract_id,
            transaction_ids: TransactionIds::bought(TransactionId(2000 + n * 2)),
            buy_price: price,
            payout: price * dec!(1.95),
            profit: profit.map(Money::new).unwrap_or_default(),
            currency: "USD".to_string(),
            is_sold: profit.is_some(),
            is_completed: profit.is_some(),
            date_start: 1_700_000_000 + n,
            contract_type: ContractType::new("CALL"),
            symbol: "R_100".to_string(),
            run_id: None,
            display_buy_id: None,
        }
    }

    fn spawn_run(
        driver: &Arc<BotDriver>,
        shutdown: CancellationToken,
    ) -> (
        mpsc::Sender<ContractUpdate>,
        tokio::task::JoinHandle<EngineResult<RunSummary>>,
    ) {
        let (tx, mut rx) = mpsc::channel(16);
        let driver = Arc::clone(driver);
        let handle = tokio::spawn(async move { driver.run(&mut rx, shutdown).await });
        (tx, handle)
    }

    #[tokio::test]
    async fn test_martingale_stakes_are_read_fresh() {
        let mut f = fixture(4, false);
        let (updates, handle) = spawn_run(&f.driver, CancellationToken::new());

        let results = [dec!(-1), dec!(-2), dec!(-4), dec!(7.6)];
        for (i, profit) in results.into_iter().enumerate() {
            let (contract_id, price) = f.received.recv().await.unwrap();
            if i == 0 {
                updates.send(push(contract_id, price, None)).await.unwrap();
            }
            updates
                .send(push(contract_id, price, Some(profit)))
                .await
                .unwrap();
        }

        let summary = handle.await.unwrap().unwrap();
        assert_eq!(summary.contracts, 4);
        assert_eq!(summary.session_profit, Money::new(dec!(0.6)));

        let prices: Vec<Money> = f.api.buys().iter().map(|(r, _)| r.price()).collect();
        assert_eq!(
            prices,
            vec![
                Money::new(dec!(1)),
                Money::new(dec!(2)),
                Money::new(dec!(4)),
                Money::new(dec!(8)),
            ]
        );
        assert!(f
            .api
            .buys()
            .iter()
            .all(|(r, _)| matches!(r, BuyRequest::Direct { .. })));

        let entries = f.ledger.entries(&login());
        assert_eq!(entries.len(), 4);
        assert!(entries.iter().all(|e| e.as_contract().is_some_and(|c| c.is_completed)));
        assert_eq!(f.ledger.statistics(&login()).won, 1);
        assert!(!f.driver.panel().is_running());
    }

    #[tokio::test]
    async fn test_unrecoverable_error_ends_run() {
        let f = fixture(4, true);
        f.api.push_buy_error("InsufficientBalance", "Your balance is too low");
        let (_updates, handle) = spawn_run(&f.driver, CancellationToken::new());

        let summary = handle.await.unwrap().unwrap();

        assert_eq!(summary.contracts, 0);
        assert_eq!(f.driver.panel().stage(), ContractStage::NotRunning);
        assert_eq!(f.driver.panel().self_exclusion().runs(), 0);
        assert!(f.ledger.entries(&login()).is_empty());
    }

    #[tokio::test]
    async fn test_recoverable_error_restarts_purchase() {
        let mut f = fixture(1, true);
        f.api.push_buy_error("ContractCreationFailure", "Try again");
        let (updates, handle) = spawn_run(&f.driver, CancellationToken::new());

        let (contract_id, price) = f.received.recv().await.unwrap();
        updates
            .send(push(contract_id, price, Some(dec!(0.95))))
            .await
            .unwrap();

        let summary = handle.await.unwrap().unwrap();
        assert_eq!(summary.contracts, 1);
        assert_eq!(f.api.buys().len(), 2);
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_open_contract() {
        let mut f = fixture(10, false);
        let shutdown = CancellationToken::new();
        let (updates, handle) = spawn_run(&f.driver, shutdown.clone());

        let (contract_id, price) = f.received.recv().await.unwrap();
        shutdown.cancel();
        tokio::task::yield_now().await;
        updates
            .send(push(contract_id, price, Some(dec!(-1))))
            .await
            .unwrap();

        let summary = handle.await.unwrap().unwrap();
        assert_eq!(summary.contracts, 1);
        assert_eq!(f.api.buys().len(), 1);
        assert_eq!(f.ledger.entries(&login()).len(), 1);
        assert!(!f.driver.panel().is_running());
    }

    #[tokio::test]
    async fn test_take_profit_stops_after_threshold_contract() {
        let mut f = fixture_with(
            10,
            false,
            RunConfig {
                take_profit: Some(Money::new(dec!(2))),
                ..RunConfig::default()
            },
            None,
        );
        let (updates, handle) = spawn_run(&f.driver, CancellationToken::new());

        for profit in [dec!(0.95), dec!(1.05)] {
            let (contract_id, price) = f.received.recv().await.unwrap();
            updates
                .send(push(contract_id, price, Some(profit)))
                .await
                .unwrap();
        }

        let summary = handle.await.unwrap().unwrap();
        assert_eq!(summary.contracts, 2);
        assert_eq!(summary.session_profit, Money::new(dec!(2.00)));
        assert_eq!(f.api.buys().len(), 2);
        assert!(!f.driver.panel().is_running());
    }

    #[tokio::test]
    async fn test_alias_continue_policy_keeps_trading_after_strategy_stop() {
        let mut f = fixture_with(1, false, RunConfig::default(), Some(true));
        let shutdown = CancellationToken::new();
        let (updates, handle) = spawn_run(&f.driver, shutdown.clone());

        let (first, price) = f.received.recv().await.unwrap();
        updates
            .send(push(first, price, Some(dec!(0.95))))
            .await
            .unwrap();

        // The strategy stops after one trade; the alias policy starts the next.
        let (second, price) = f.received.recv().await.unwrap();
        assert_ne!(first, second);
        assert_eq!(price, Money::new(dec!(1)));
        assert!(f.driver.panel().is_running());

        shutdown.cancel();
        tokio::task::yield_now().await;
        updates
            .send(push(second, price, Some(dec!(-1))))
            .await
            .unwrap();

        let summary = handle.await.unwrap().unwrap();
        assert_eq!(summary.contracts, 2);
        assert_eq!(f.api.buys().len(), 2);
        assert!(f
            .api
            .buys()
            .iter()
            .all(|(_, account)| account.as_ref().map(LoginId::as_str) == Some("VRTC200")));
        assert_eq!(f.ledger.statistics(&login()).contracts, 2);
        assert!(!f.driver.panel().is_running());
    }

    #[tokio::test]
    async fn test_strategy_stop_ends_run_without_continue_policy() {
        let mut f = fixture_with(1, false, RunConfig::default(), Some(false));
        let (updates, handle) = spawn_run(&f.driver, CancellationToken::new());

        let (contract_id, price) = f.received.recv().await.unwrap();
        updates
            .send(push(contract_id, price, Some(dec!(0.95))))
            .await
            .unwrap();

        let summary = handle.await.unwrap().unwrap();
        assert_eq!(summary.contracts, 1);
        assert_eq!(f.api.buys().len(), 1);
    }
}
