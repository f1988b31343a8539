//! Main application orchestration.
//!
//! Coordinates all components:
//! - WebSocket connection and push routing
//! - Login and identity resolution
//! - Journal persistence
//! - Recovery of contracts left open by a previous session
//! - Copy trading
//! - The bot run itself

use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use crate::router::PushRouter;
use runbot_account::{AccountSession, AliasTable, IdentityResolver};
use runbot_core::{BotEvent, ContractUpdate, EventBus, EventName, JournalMessage, LoginId};
use runbot_engine::{BotDriver, MartingaleStrategy, RunPanel, RunSummary};
use runbot_executor::{
    subscribe_with_retry, CopyTradeRelay, PurchaseExecutor, ScopeTracker, SharedStake,
};
use runbot_ledger::TransactionLedger;
use runbot_persistence::keys::{ADMIN_MIRROR_MODE_ENABLED, COPY_TOKENS_ARRAY};
use runbot_persistence::{JournalWriter, JsonFileStore, SessionStore, SessionStoreExt};
use runbot_telemetry::Metrics;
use runbot_ws::{
    ApiClient, ApiRequest, BrokerApi, ConnectionManager, DynBrokerApi, DynBrokerConnector,
    PushMessage, WsConnector,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How long shutdown waits for background tasks.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Main application.
pub struct Application {
    config: AppConfig,
    store: Arc<dyn SessionStore>,
    shutdown: CancellationToken,
}

impl Application {
    /// Create an application backed by the on-disk session store.
    pub fn new(config: AppConfig) -> AppResult<Self> {
        let store: Arc<dyn SessionStore> =
            Arc::new(JsonFileStore::open(&config.session.store_dir)?);
        Ok(Self::with_store(config, store))
    }

    pub fn with_store(config: AppConfig, store: Arc<dyn SessionStore>) -> Self {
        Self {
            config,
            store,
            shutdown: CancellationToken::new(),
        }
    }

    /// Cancelling this token stops the run once its open contract closes.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run one bot session.
    pub async fn run(self) -> AppResult<RunSummary> {
        info!(
            ws_url = %self.config.ws_url,
            symbol = %self.config.trade.symbol,
            strategy = "martingale",
            "Starting application"
        );
        self.persist_flags()?;

        // Create push channel and WebSocket connection manager
        let (push_tx, push_rx) = mpsc::channel::<PushMessage>(1000);
        let connection_manager = Arc::new(ConnectionManager::with_shutdown(
            self.config.connection_config(),
            push_tx,
            self.shutdown.child_token(),
        ));
        let connection_manager_clone = Arc::clone(&connection_manager);
        let ws_handle = tokio::spawn(async move {
            if let Err(e) = connection_manager_clone.connect().await {
                error!(error = %e, "WebSocket connection failed");
            }
        });

        let signal_token = self.shutdown.clone();
        let signal_handle = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown signal received");
                signal_token.cancel();
            }
        });

        let result = self.run_session(connection_manager.client(), push_rx).await;

        // Cleanup
        self.shutdown.cancel();
        connection_manager.shutdown();
        signal_handle.abort();
        if tokio::time::timeout(SHUTDOWN_GRACE, ws_handle).await.is_err() {
            warn!("WebSocket task did not stop in time");
        }
        result
    }

    /// Store the display and copy-trade flags read by the lower layers.
    fn persist_flags(&self) -> AppResult<()> {
        self.store
            .set(ADMIN_MIRROR_MODE_ENABLED, &self.config.session.mirror_mode)?;
        self.store
            .set(COPY_TOKENS_ARRAY, &self.config.follower_tokens())?;
        Ok(())
    }

    async fn run_session(
        &self,
        client: ApiClient,
        push_rx: mpsc::Receiver<PushMessage>,
    ) -> AppResult<RunSummary> {
        let connect_timeout = Duration::from_millis(self.config.websocket.request_timeout_ms);
        tokio::select! {
            connected = tokio::time::timeout(connect_timeout, client.wait_connected()) => {
                if connected.is_err() {
                    return Err(AppError::Login("connection timed out".to_string()));
                }
            }
            _ = self.shutdown.cancelled() => return Err(AppError::Shutdown),
        }

        // Login
        let aliases = AliasTable::new(self.config.aliases.clone())?;
        let resolver = Arc::new(IdentityResolver::new(aliases, Arc::clone(&self.store)));
        let api: DynBrokerApi = Arc::new(client.clone());
        let account = Arc::new(AccountSession::new(
            Arc::clone(&api),
            Arc::clone(&resolver),
            Arc::clone(&self.store),
        ));
        account.set_alias_mode(self.config.session.alias_mode)?;

        let active = self
            .config
            .active_account()
            .ok_or_else(|| AppError::Login("no account configured".to_string()))?;
        let identity = account.login(self.config.accounts(), &active).await?;
        info!(
            displayed = %active,
            api_login_id = %identity.api_login_id,
            "Logged in"
        );

        // Push routing; balance pushes start once subscribed
        let (contract_tx, mut contract_rx) = mpsc::channel::<ContractUpdate>(256);
        let router = Arc::new(PushRouter::new(
            Arc::clone(&account),
            Arc::clone(&self.store),
            contract_tx,
        ));
        let router_handle = tokio::spawn(Arc::clone(&router).run(push_rx));
        match client.request(ApiRequest::subscribe_balance()).await {
            Ok(msg) => {
                if let Some(e) = msg.error {
                    warn!(code = %e.code, message = %e.message, "Balance subscription rejected");
                }
            }
            Err(e) => warn!(code = %e.code, "Balance subscription failed"),
        }

        // Journal
        let bus = EventBus::new();
        let (journal_tx, journal_rx) = mpsc::unbounded_channel::<JournalMessage>();
        let journal_subscription = bus.register(EventName::Journal, move |event| {
            if let BotEvent::Journal(message) = event {
                let _ = journal_tx.send(message.clone());
            }
        });
        let journal_handle = tokio::spawn(write_journal(
            JournalWriter::new(&self.config.journal.dir, self.config.journal.buffer_size),
            journal_rx,
        ));

        let ledger = Arc::new(TransactionLedger::new(
            Arc::clone(&resolver),
            Arc::clone(&self.store),
            self.config.ledger.clone(),
        ));
        let resumed = self.recover_open_contracts(&ledger, &api, &active).await;
        if resumed > 0 {
            info!(resumed, "Open contracts resumed");
        }

        let relay = if self.config.copy_trade.enabled {
            let connector: DynBrokerConnector = Arc::new(WsConnector::new(
                self.config.connection_config(),
                self.shutdown.child_token(),
            ));
            let relay = Arc::new(CopyTradeRelay::new(connector, Arc::clone(&self.store)));
            info!(
                followers = relay.follower_tokens().len(),
                "Copy trading enabled"
            );
            Some(relay.start(&bus))
        } else {
            None
        };

        // Trade core
        let scope = Arc::new(ScopeTracker::new());
        let stake = SharedStake::new(self.config.strategy.base_stake);
        let strategy = Arc::new(MartingaleStrategy::new(
            self.config.strategy.clone(),
            stake.clone(),
        ));
        let executor = Arc::new(PurchaseExecutor::new(
            Arc::clone(&account),
            bus.clone(),
            Arc::clone(&scope),
            Arc::new(stake),
            self.config.purchase_template(),
            self.config.purchase.clone(),
        ));
        let panel = Arc::new(RunPanel::new(
            Arc::clone(&account),
            bus.clone(),
            scope,
            self.config.run.clone(),
        ));
        let driver = BotDriver::new(
            panel,
            executor,
            Arc::clone(&ledger),
            Arc::clone(&account),
            strategy,
            bus.clone(),
            self.config.driver.clone(),
        );

        let stats_handle = tokio::spawn(report_statistics(
            Arc::clone(&ledger),
            Arc::clone(&account),
            Duration::from_secs(self.config.telemetry.stats_interval_secs.max(1)),
        ));

        info!("Entering run loop");
        let summary = driver
            .run(&mut contract_rx, self.shutdown.child_token())
            .await;

        // Final statistics
        let stats = ledger.statistics(&active);
        info!(
            contracts = stats.contracts,
            won = stats.won,
            lost = stats.lost,
            total_profit = %stats.total_profit,
            "Final statistics summary"
        );

        if let Some((subscription, handle)) = relay {
            drop(subscription);
            handle.abort();
        }
        stats_handle.abort();
        router_handle.abort();
        drop(journal_subscription);
        if tokio::time::timeout(SHUTDOWN_GRACE, journal_handle)
            .await
            .is_err()
        {
            warn!("Journal writer did not stop in time");
        }

        summary.map_err(AppError::from)
    }

    /// Re-subscribe to recent contracts the ledger still shows as open.
    async fn recover_open_contracts(
        &self,
        ledger: &TransactionLedger,
        api: &DynBrokerApi,
        login_id: &LoginId,
    ) -> usize {
        let candidates = ledger.recovery_candidates(login_id);
        if candidates.is_empty() {
            return 0;
        }
        info!(count = candidates.len(), "Recovering open contracts");

        let attempt_timeout = Duration::from_millis(self.config.purchase.subscribe_timeout_ms);
        let mut resumed = 0;
        for record in candidates {
            ledger.mark_recovered(record.contract_id);
            if subscribe_with_retry(Arc::clone(api), record.contract_id, attempt_timeout).await {
                resumed += 1;
            }
        }
        resumed
    }
}

async fn write_journal(mut writer: JournalWriter, mut rx: mpsc::UnboundedReceiver<JournalMessage>) {
    while let Some(message) = rx.recv().await {
        if let Err(e) = writer.append(message) {
            warn!(error = %e, "Failed to write journal message");
        }
    }
    if let Err(e) = writer.close() {
        warn!(error = %e, "Failed to close journal");
    }
    debug!("Journal writer stopped");
}

async fn report_statistics(
    ledger: Arc<TransactionLedger>,
    account: Arc<AccountSession>,
    period: Duration,
) {
    let mut interval = tokio::time::interval(period);
    interval.tick().await;
    loop {
        interval.tick().await;
        let Some(login_id) = account.active_login_id() else {
            continue;
        };
        let stats = ledger.statistics(&login_id);
        info!(
            login_id = %login_id,
            contracts = stats.contracts,
            won = stats.won,
            lost = stats.lost,
            open = stats.open,
            total_stake = %stats.total_stake,
            total_profit = %stats.total_profit,
            "Periodic statistics summary"
        );
        match Metrics::render() {
            Ok(text) => debug!(metrics = %text, "Metrics snapshot"),
            Err(e) => warn!(error = %e, "Metrics render failed"),
        }
    }
}
