//! Run Panel State Machine.
//!
//! Owns the run session: `run_id`, the contract stage, the open-contract
//! flag, session profit and the error class of the last stop. Stage
//! changes driven by the executor arrive as `contract.status` events on
//! listeners the panel registers at run start and disposes when the run
//! ends.
//!
//! # Stop handling
//!
//! - Unrecoverable error: force `NotRunning`, dispose listeners, reset
//!   self-exclusion counters
//! - Recoverable error with restart-on-error: back to `PurchaseSent`
//! - Recoverable error without restart: graceful stop
//! - No error with an open or just-sold contract: `ContractClosed`, then
//!   stop or keep running depending on the [`ContinuePolicy`]
//!
//! Take-profit is checked after every sold contract and again before each
//! trade-again decision.

use parking_lot::Mutex;
use runbot_account::AccountSession;
use runbot_core::{
    ApiError, BotEvent, Clock, ContractId, ContractStage, ContractStatusEvent, ErrorSeverity,
    ErrorType, EventBus, EventName, JournalLevel, JournalMessage, Money, PurchaseScope, RunId,
    Subscription, SystemClock,
};
use runbot_executor::ScopeTracker;
use runbot_telemetry::Metrics;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{EngineError, EngineResult};
use crate::self_exclusion::{SelfExclusion, SelfExclusionLimits};

/// Run-level settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Stop once session profit reaches this amount.
    #[serde(default)]
    pub take_profit: Option<Money>,
    #[serde(default)]
    pub self_exclusion: SelfExclusionLimits,
}

/// What happens to the run when the bot reports a stop while a contract
/// is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContinuePolicy {
    #[default]
    StopAfterContract,
    ContinueAcrossContracts,
}

/// Outcome of [`RunPanel::on_bot_stop_event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunDirective {
    /// Keep trading with the next contract.
    Continue,
    /// Re-attempt the purchase that failed.
    Restart,
    /// The run is over.
    Stop,
}

/// Snapshot of the run session.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RunSnapshot {
    pub run_id: Option<RunId>,
    pub is_running: bool,
    pub stage: ContractStage,
    pub has_open_contract: bool,
    pub error_type: Option<ErrorType>,
    pub session_profit: Money,
    pub policy: ContinuePolicy,
}

#[derive(Debug, Default)]
struct RunState {
    run_id: Option<RunId>,
    is_running: bool,
    stage: ContractStage,
    has_open_contract: bool,
    error_type: Option<ErrorType>,
    session_profit: Money,
    policy: ContinuePolicy,
    stop_requested: bool,
}

impl RunState {
    fn snapshot(&self) -> RunSnapshot {
        RunSnapshot {
            run_id: self.run_id.clone(),
            is_running: self.is_running,
            stage: self.stage,
            has_open_contract: self.has_open_contract,
            error_type: self.error_type,
            session_profit: self.session_profit,
            policy: self.policy,
        }
    }

    fn set_stage(&mut self, next: ContractStage) -> bool {
        if self.stage == next {
            return true;
        }
        if !self.stage.can_transition_to(next) {
            warn!(from = %self.stage, to = %next, "Illegal stage transition ignored");
            return false;
        }
        debug!(from = %self.stage, to = %next, "Contract stage");
        self.stage = next;
        Metrics::run_stage(next.code());
        true
    }
}

struct PanelInner {
    account: Arc<AccountSession>,
    bus: EventBus,
    scope: Arc<ScopeTracker>,
    config: RunConfig,
    self_exclusion: SelfExclusion,
    clock: Arc<dyn Clock>,
    state: Mutex<RunState>,
    listeners: Mutex<Vec<Subscription>>,
}

pub struct RunPanel {
    inner: Arc<PanelInner>,
}

impl RunPanel {
    pub fn new(
        account: Arc<AccountSession>,
        bus: EventBus,
        scope: Arc<ScopeTracker>,
        config: RunConfig,
    ) -> Self {
        let self_exclusion = SelfExclusion::new(config.self_exclusion.clone());
        Self {
            inner: Arc::new(PanelInner {
                account,
                bus,
                scope,
                config,
                self_exclusion,
                clock: Arc::new(SystemClock),
                state: Mutex::new(RunState::default()),
                listeners: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Replace the clock. Must be called before the panel is shared.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.clock = clock;
        }
        self
    }

    pub fn snapshot(&self) -> RunSnapshot {
        self.inner.state.lock().snapshot()
    }

    pub fn stage(&self) -> ContractStage {
        self.inner.state.lock().stage
    }

    pub fn is_running(&self) -> bool {
        self.inner.state.lock().is_running
    }

    pub fn run_id(&self) -> Option<RunId> {
        self.inner.state.lock().run_id.clone()
    }

    pub fn session_profit(&self) -> Money {
        self.inner.state.lock().session_profit
    }

    pub fn self_exclusion(&self) -> &SelfExclusion {
        &self.inner.self_exclusion
    }

    pub fn config(&self) -> &RunConfig {
        &self.inner.config
    }

    /// Listeners registered for the current run.
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.lock().len()
    }

    /// Start a run.
    ///
    /// Rejected when nobody is logged in, when a run or purchase is already
    /// in progress, or when a self-exclusion limit is reached.
    pub fn on_run_button_click(&self) -> EngineResult<RunId> {
        let inner = &self.inner;
        let login_id = match inner.account.active_login_id() {
            Some(id) if inner.account.is_logged_in() => id,
            _ => {
                inner.bus.emit(BotEvent::LoginPrompt);
                return Err(EngineError::NotLoggedIn);
            }
        };

        let policy = match inner.account.resolver().alias_entry_for(&login_id) {
            Some(entry) if entry.continue_across_contracts => ContinuePolicy::ContinueAcrossContracts,
            _ => ContinuePolicy::StopAfterContract,
        };

        let run_id = {
            let mut state = inner.state.lock();
            if state.is_running
                || state.stage.is_active()
                || inner.scope.scope() == PurchaseScope::DuringPurchase
            {
                debug!("Run click ignored, already running");
                return Err(EngineError::AlreadyRunning);
            }
            if let Err(reason) = inner.self_exclusion.check() {
                drop(state);
                inner.journal(JournalLevel::Error, format!("Self-exclusion: {reason}"));
                return Err(EngineError::SelfExclusion(reason.to_string()));
            }

            let run_id = RunId::new();
            *state = RunState {
                run_id: Some(run_id.clone()),
                is_running: true,
                policy,
                ..RunState::default()
            };
            state.set_stage(ContractStage::Starting);
            run_id
        };

        inner.self_exclusion.record_run();
        inner.account.set_switching_enabled(false);
        inner.register_listeners();
        Metrics::session_profit(0.0);

        info!(run_id = %run_id, login_id = %login_id, ?policy, "Bot started");
        inner.bus.emit(BotEvent::BotRunning {
            run_id: run_id.clone(),
        });
        inner.journal(JournalLevel::Info, "Bot is starting".to_string());
        Ok(run_id)
    }

    /// Stop requested by the user. Waits for an open contract to settle.
    pub fn on_stop_button_click(&self) {
        let inner = &self.inner;
        inner.scope.stop();
        let open = {
            let mut state = inner.state.lock();
            if !state.is_running {
                return;
            }
            state.stop_requested = true;
            if state.has_open_contract {
                state.set_stage(ContractStage::IsStopping);
            }
            state.has_open_contract
        };
        if open {
            info!("Stop requested, waiting for the open contract");
            inner.journal(JournalLevel::Info, "Bot is stopping".to_string());
        } else {
            inner.finish("user", None);
        }
    }

    /// Stop reported by the bot, with the error that caused it if any.
    pub fn on_bot_stop_event(
        &self,
        error: Option<&ApiError>,
        restart_on_error: bool,
    ) -> RunDirective {
        let inner = &self.inner;
        if !self.is_running() {
            return RunDirective::Stop;
        }

        let Some(error) = error else {
            return inner.on_stop_without_error();
        };

        inner.bus.emit(BotEvent::Journal(JournalMessage::from_error(
            error,
            inner.clock.now_ms(),
        )));
        match error.severity() {
            ErrorSeverity::Unrecoverable => {
                warn!(code = %error.code, "Unrecoverable error, stopping run");
                inner.state.lock().error_type = Some(ErrorType::Unrecoverable);
                inner.self_exclusion.reset();
                inner.finish("unrecoverable", Some(error.clone()));
                RunDirective::Stop
            }
            ErrorSeverity::Recoverable => {
                let restart = {
                    let mut state = inner.state.lock();
                    state.error_type = Some(ErrorType::Recoverable);
                    if restart_on_error && !state.stop_requested {
                        state.error_type = None;
                        state.set_stage(ContractStage::PurchaseSent)
                    } else {
                        false
                    }
                };
                if restart {
                    info!(code = %error.code, "Recoverable error, restarting purchase");
                    RunDirective::Restart
                } else {
                    warn!(code = %error.code, "Recoverable error, stopping run");
                    self.on_stop_button_click();
                    RunDirective::Stop
                }
            }
        }
    }

    /// End the run now, without waiting for an open contract.
    pub fn force_stop(&self, reason: &str) {
        self.inner.finish(reason, None);
    }

    /// Whether the driver may buy another contract. Ends the run when a
    /// stop was requested or take-profit is reached.
    pub fn should_trade_again(&self) -> bool {
        let inner = &self.inner;
        let (running, stop_requested, open) = {
            let state = inner.state.lock();
            (state.is_running, state.stop_requested, state.has_open_contract)
        };
        if !running {
            return false;
        }
        if inner.take_profit_reached() {
            return false;
        }
        if stop_requested {
            if !open {
                inner.finish("user", None);
            }
            return false;
        }
        true
    }
}

impl PanelInner {
    fn register_listeners(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let subscription = self.bus.register(EventName::ContractStatus, move |event| {
            if let (Some(inner), BotEvent::ContractStatus(status)) = (weak.upgrade(), event) {
                inner.on_contract_status(status);
            }
        });
        self.listeners.lock().push(subscription);
    }

    fn dispose_listeners(&self) {
        let listeners: Vec<Subscription> = std::mem::take(&mut *self.listeners.lock());
        for subscription in listeners {
            subscription.dispose();
        }
    }

    fn on_contract_status(&self, status: &ContractStatusEvent) {
        match status {
            ContractStatusEvent::PurchaseSent { .. } => {
                let mut state = self.state.lock();
                if state.is_running && !state.stop_requested {
                    state.set_stage(ContractStage::PurchaseSent);
                }
            }
            ContractStatusEvent::PurchaseReceived { contract_id, .. } => {
                let mut state = self.state.lock();
                state.has_open_contract = true;
                if state.stage != ContractStage::IsStopping {
                    state.set_stage(ContractStage::PurchaseReceived);
                }
                debug!(contract_id = %contract_id, "Contract open");
            }
            ContractStatusEvent::ContractSold {
                contract_id,
                profit,
            } => self.on_contract_sold(contract_id, *profit),
        }
    }

    fn on_contract_sold(&self, contract_id: &ContractId, profit: Money) {
        self.self_exclusion.record_result(profit);
        let (total, stopping) = {
            let mut state = self.state.lock();
            state.has_open_contract = false;
            state.session_profit += profit;
            let stopping = state.stop_requested;
            state.set_stage(ContractStage::ContractClosed);
            (state.session_profit, stopping)
        };
        Metrics::session_profit(total.inner().to_f64().unwrap_or_default());
        info!(contract_id = %contract_id, profit = %profit, session_profit = %total, "Contract sold");

        if self.take_profit_reached() {
            return;
        }
        if stopping {
            self.finish("user", None);
        }
    }

    /// Stops the run when session profit reached the take-profit
    /// threshold.
    fn take_profit_reached(&self) -> bool {
        let Some(threshold) = self.config.take_profit else {
            return false;
        };
        let profit = {
            let state = self.state.lock();
            if !state.is_running {
                return false;
            }
            state.session_profit
        };
        if profit < threshold {
            return false;
        }
        info!(profit = %profit, threshold = %threshold, "Take profit reached");
        self.journal(
            JournalLevel::Success,
            format!("Take profit reached: {profit}"),
        );
        self.scope.stop();
        self.finish("take_profit", None);
        true
    }

    fn on_stop_without_error(&self) -> RunDirective {
        let continue_run = {
            let mut state = self.state.lock();
            // The stop may arrive while the contract is open or right after
            // it sold; both end the contract under the run's policy.
            let contract_ended = if state.has_open_contract {
                state.set_stage(ContractStage::ContractClosed)
            } else {
                state.stage == ContractStage::ContractClosed
            };
            contract_ended
                && state.policy == ContinuePolicy::ContinueAcrossContracts
                && !state.stop_requested
        };
        if continue_run {
            debug!("Bot stop ignored, continuing across contracts");
            return RunDirective::Continue;
        }
        self.finish("bot", None);
        RunDirective::Stop
    }

    /// End the run: `NotRunning`, listeners disposed, switching enabled.
    fn finish(&self, reason: &str, error: Option<ApiError>) {
        let run_id = {
            let mut state = self.state.lock();
            if !state.is_running {
                return;
            }
            state.is_running = false;
            state.stop_requested = false;
            state.set_stage(ContractStage::NotRunning);
            if state.error_type == Some(ErrorType::Unrecoverable) {
                state.error_type = None;
            }
            state.run_id.clone()
        };

        self.scope.stop();
        self.dispose_listeners();
        self.account.set_switching_enabled(true);
        Metrics::bot_stop(reason);
        info!(run_id = ?run_id.as_ref().map(RunId::as_str), reason, "Bot stopped");
        self.bus.emit(BotEvent::BotStop { run_id, error });
        self.journal(JournalLevel::Info, "Bot has stopped".to_string());
    }

    fn journal(&self, level: JournalLevel, message: String) {
        self.bus.emit(BotEvent::Journal(JournalMessage::new(
            level,
            message,
            self.clock.now_ms(),
        )));
    }
}
