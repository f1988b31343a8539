//! Purchase Executor.
//!
//! # Purchase sequence
//!
//! 1. Claim the purchase window (`BeforePurchase -> DuringPurchase`), else
//!    `Skipped`
//! 2. Resolve the trading identity and await re-authorization if the
//!    transport is on another account
//! 3. Re-read the stake from the live stake source
//! 4. Build the buy request (proposal id + ask price, or full parameters)
//! 5. Emit `replicator.purchase` and `contract.status` (purchase sent)
//! 6. Await the buy; on success emit purchase received and spawn the
//!    contract subscription
//!
//! `PriceMoved` / `InvalidContractProposal` and `DisconnectError` go
//! through a bounded recovery loop; every other error is returned.

use parking_lot::{Mutex, RwLock};
use runbot_account::{AccountSession, TradingIdentity};
use runbot_core::{
    ApiError, BotEvent, BuyReceipt, BuyRequest, Clock, ContractStatusEvent, ContractType,
    EventBus, JournalLevel, JournalMessage, LoginId, Money, PurchaseMode, ReplicatedBuy,
    SystemClock, TradeIntent,
};
use runbot_telemetry::Metrics;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{ExecutorError, ExecutorResult};
use crate::proposal::ProposalBook;
use crate::scope::ScopeTracker;
use crate::stake::StakeSource;
use crate::subscription::subscribe_with_retry;

/// Purchase tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PurchaseConfig {
    pub mode: PurchaseMode,
    /// Re-attempts after a recoverable failure.
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    /// How long recovery waits for the purchase window to reopen.
    pub recovery_wait_ms: u64,
    /// How long recovery waits for the transport after a disconnect.
    pub reconnect_wait_ms: u64,
    pub subscribe_timeout_ms: u64,
}

impl Default for PurchaseConfig {
    fn default() -> Self {
        Self {
            mode: PurchaseMode::Proposal,
            max_retries: 3,
            retry_base_delay_ms: 500,
            retry_max_delay_ms: 5_000,
            recovery_wait_ms: 10_000,
            reconnect_wait_ms: 30_000,
            subscribe_timeout_ms: 5_000,
        }
    }
}

/// A confirmed purchase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseRecord {
    pub receipt: BuyReceipt,
    pub request: BuyRequest,
    pub intent: TradeIntent,
    pub displayed_login_id: LoginId,
    /// Account the buy was executed under.
    pub api_login_id: LoginId,
    pub attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PurchaseOutcome {
    /// The purchase window was not open.
    Skipped,
    Purchased(Box<PurchaseRecord>),
    /// The run was stopped while recovering from a failed attempt.
    Abandoned,
}

enum AttemptError {
    Fatal(ExecutorError),
    Api(ApiError),
}

fn mode_label(mode: PurchaseMode) -> &'static str {
    match mode {
        PurchaseMode::Proposal => "proposal",
        PurchaseMode::Direct => "direct",
    }
}

pub struct PurchaseExecutor {
    account: Arc<AccountSession>,
    bus: EventBus,
    scope: Arc<ScopeTracker>,
    stake: Arc<dyn StakeSource>,
    book: ProposalBook,
    template: RwLock<TradeIntent>,
    last_amount: Mutex<Money>,
    config: PurchaseConfig,
    clock: Arc<dyn Clock>,
}

impl PurchaseExecutor {
    pub fn new(
        account: Arc<AccountSession>,
        bus: EventBus,
        scope: Arc<ScopeTracker>,
        stake: Arc<dyn StakeSource>,
        template: TradeIntent,
        config: PurchaseConfig,
    ) -> Self {
        let last_amount = Mutex::new(template.amount);
        Self {
            account,
            bus,
            scope,
            stake,
            book: ProposalBook::new(),
            template: RwLock::new(template),
            last_amount,
            config,
            clock: Arc::new(SystemClock),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn scope(&self) -> &Arc<ScopeTracker> {
        &self.scope
    }

    pub fn proposals(&self) -> &ProposalBook {
        &self.book
    }

    pub fn config(&self) -> &PurchaseConfig {
        &self.config
    }

    pub fn template(&self) -> TradeIntent {
        self.template.read().clone()
    }

    /// Change the traded symbol. Outstanding proposals become stale.
    pub fn set_symbol(&self, symbol: impl Into<String>) {
        self.template.write().symbol = symbol.into();
        self.book.clear();
        self.scope.set_proposals_ready(false);
    }

    /// Stake sent with the most recent purchase attempt.
    pub fn last_amount(&self) -> Money {
        *self.last_amount.lock()
    }

    /// Intent for `contract_type` with the stake read now.
    fn build_intent(&self, contract_type: &ContractType) -> TradeIntent {
        let mut intent = self.template.read().with_contract_type(contract_type.clone());
        let amount = match self.stake.current_stake() {
            Some(stake) => stake,
            None => {
                let last = self.last_amount();
                warn!(last = %last, "Stake unreadable, keeping last known value");
                last
            }
        };
        *self.last_amount.lock() = amount;
        intent.amount = amount;
        intent
    }

    /// Fetch proposals for the next purchase and mark the window ready.
    pub async fn prepare(&self, contract_type: &ContractType) -> ExecutorResult<()> {
        if self.config.mode == PurchaseMode::Direct {
            self.scope.set_proposals_ready(true);
            return Ok(());
        }
        let identity = self.account.current_identity()?;
        self.account.ensure_authorized(&identity).await?;
        let intent = self.build_intent(contract_type);
        match self.book.rebuild(self.account.api().as_ref(), &intent).await {
            Ok(_) => {
                self.scope.set_proposals_ready(true);
                Ok(())
            }
            Err(e) => Err(ExecutorError::Rejected(e)),
        }
    }

    /// Buy `contract_type` once the purchase window is open.
    pub async fn purchase(&self, contract_type: ContractType) -> ExecutorResult<PurchaseOutcome> {
        if !self.scope.try_begin_purchase() {
            debug!(scope = ?self.scope.scope(), "Purchase skipped, window not open");
            return Ok(PurchaseOutcome::Skipped);
        }
        let result = self.purchase_with_recovery(&contract_type).await;
        self.scope.finish_purchase();
        result
    }

    async fn purchase_with_recovery(
        &self,
        contract_type: &ContractType,
    ) -> ExecutorResult<PurchaseOutcome> {
        let mode = mode_label(self.config.mode);
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let error = match self.attempt(contract_type, attempt).await {
                Ok(record) => return Ok(PurchaseOutcome::Purchased(Box::new(record))),
                Err(AttemptError::Fatal(e)) => {
                    Metrics::purchase(mode, "identity_error");
                    return Err(e);
                }
                Err(AttemptError::Api(e)) => e,
            };

            if !(error.is_retryable() || error.is_disconnect()) {
                Metrics::purchase(mode, "rejected");
                return Err(ExecutorError::Rejected(error));
            }
            if attempt > self.config.max_retries {
                Metrics::purchase(mode, "retries_exhausted");
                return Err(ExecutorError::RetriesExhausted {
                    attempts: attempt,
                    last: error,
                });
            }

            Metrics::purchase_retry(&error.code);
            warn!(code = %error.code, attempt, "Purchase failed, recovering");
            self.journal(JournalLevel::Warn, format!("{}: retrying purchase", error.message));

            if !self.recover(&error, contract_type, attempt).await? {
                info!("Run stopped during purchase recovery");
                return Ok(PurchaseOutcome::Abandoned);
            }
        }
    }

    async fn attempt(
        &self,
        contract_type: &ContractType,
        attempt: u32,
    ) -> Result<PurchaseRecord, AttemptError> {
        let identity = self
            .account
            .current_identity()
            .map_err(|e| AttemptError::Fatal(e.into()))?;
        self.account
            .ensure_authorized(&identity)
            .await
            .map_err(|e| AttemptError::Fatal(e.into()))?;

        let intent = self.build_intent(contract_type);
        let api = Arc::clone(self.account.api());

        let request = match self.config.mode {
            PurchaseMode::Proposal => {
                let proposal = match self.book.take_matching(&intent) {
                    Some(p) => p,
                    None => api.proposal(intent.clone()).await.map_err(AttemptError::Api)?,
                };
                BuyRequest::Proposal {
                    id: proposal.id,
                    price: proposal.ask_price,
                }
            }
            PurchaseMode::Direct => BuyRequest::Direct {
                price: intent.amount,
                parameters: intent.to_parameters(),
            },
        };

        // The proposal round trip may have let another account take over.
        self.reconfirm_identity(&identity)
            .await
            .map_err(AttemptError::Fatal)?;

        self.bus.emit(BotEvent::ReplicatorPurchase(ReplicatedBuy {
            login_id: identity.api_login_id.clone(),
            request: request.clone(),
            intent: intent.clone(),
        }));
        self.bus
            .emit(BotEvent::ContractStatus(ContractStatusEvent::PurchaseSent {
                amount: intent.amount,
            }));
        info!(
            api_login_id = %identity.api_login_id,
            displayed = %identity.displayed_login_id,
            amount = %intent.amount,
            contract_type = %intent.contract_type,
            attempt,
            "Submitting buy"
        );

        let receipt = api.buy(request.clone()).await.map_err(AttemptError::Api)?;
        Metrics::purchase(mode_label(self.config.mode), "ok");
        info!(
            contract_id = %receipt.contract_id,
            transaction_id = %receipt.transaction_id,
            buy_price = %receipt.buy_price,
            "Purchase received"
        );

        self.bus
            .emit(BotEvent::ContractStatus(ContractStatusEvent::PurchaseReceived {
                contract_id: receipt.contract_id,
                buy_price: receipt.buy_price,
            }));

        let timeout = Duration::from_millis(self.config.subscribe_timeout_ms);
        tokio::spawn(subscribe_with_retry(api, receipt.contract_id, timeout));

        Ok(PurchaseRecord {
            receipt,
            request,
            intent,
            displayed_login_id: identity.displayed_login_id,
            api_login_id: identity.api_login_id,
            attempts: attempt,
        })
    }

    async fn reconfirm_identity(&self, identity: &TradingIdentity) -> ExecutorResult<()> {
        if self.account.authorized_login_id().as_ref() == Some(&identity.api_login_id) {
            return Ok(());
        }
        warn!(expected = %identity.api_login_id, "Transport account changed before buy");
        self.account.ensure_authorized(identity).await?;
        Ok(())
    }

    /// Wait for the purchase window to reopen. Returns `false` if the run
    /// was stopped in the meantime.
    async fn recover(
        &self,
        error: &ApiError,
        contract_type: &ContractType,
        attempt: u32,
    ) -> ExecutorResult<bool> {
        if error.is_disconnect() {
            self.book.clear();
            self.scope.set_proposals_ready(false);
            let wait = Duration::from_millis(self.config.reconnect_wait_ms);
            info!(wait = ?wait, "Waiting for transport to resume");
            if tokio::time::timeout(wait, self.account.api().wait_connected())
                .await
                .is_err()
            {
                return Err(ExecutorError::ReconnectTimeout(wait));
            }
        }

        if !self.scope.reopen() {
            return Ok(false);
        }

        if let Err(e) = self.prepare(contract_type).await {
            warn!(error = %e, "Proposal refresh failed during recovery");
        }

        let wait = Duration::from_millis(self.config.recovery_wait_ms);
        match tokio::time::timeout(wait, self.scope.wait_purchase_window()).await {
            Ok(true) => {}
            Ok(false) => return Ok(false),
            Err(_) => {
                return Err(ExecutorError::RetriesExhausted {
                    attempts: attempt,
                    last: error.clone(),
                })
            }
        }

        tokio::time::sleep(self.backoff_delay(attempt)).await;
        Ok(self.scope.try_begin_purchase())
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let delay = self
            .config
            .retry_base_delay_ms
            .saturating_mul(1u64 << exp)
            .min(self.config.retry_max_delay_ms);
        Duration::from_millis(delay)
    }

    fn journal(&self, level: JournalLevel, message: String) {
        self.bus.emit(BotEvent::Journal(JournalMessage::new(
            level,
            message,
            self.clock.now_ms(),
        )));
    }
}
