//! Strategy seam.
//!
//! A strategy picks the contract to buy, updates the live stake between
//! contracts and decides whether to trade again. Take-profit and stop
//! requests are checked by the run panel before a strategy is consulted.

use parking_lot::Mutex;
use runbot_core::{ContractRecord, ContractType, Money};
use runbot_executor::SharedStake;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// What to do after a contract closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeDecision {
    TradeAgain,
    Stop,
}

pub trait Strategy: Send + Sync {
    fn name(&self) -> &str;

    /// Contract type of the next purchase.
    fn next_contract_type(&self) -> ContractType;

    /// Reset per-run state.
    fn on_run_start(&self);

    fn on_contract_closed(&self, record: &ContractRecord) -> TradeDecision;

    /// Whether a recoverable error restarts the purchase instead of
    /// stopping the run.
    fn restart_on_error(&self) -> bool;
}

/// Martingale parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MartingaleConfig {
    pub contract_type: ContractType,
    pub base_stake: Money,
    #[serde(default = "default_multiplier")]
    pub multiplier: Decimal,
    /// Stake never exceeds this; the progression resets to the base
    /// stake instead.
    #[serde(default)]
    pub max_stake: Option<Money>,
    /// Contracts per run. `None` trades until stopped.
    #[serde(default)]
    pub max_trades: Option<u32>,
    #[serde(default)]
    pub restart_on_error: bool,
}

fn default_multiplier() -> Decimal {
    Decimal::TWO
}

#[derive(Debug)]
struct MartingaleState {
    stake: Money,
    trades: u32,
}

/// Multiplies the stake after each loss and returns to the base stake
/// after a win.
pub struct MartingaleStrategy {
    config: MartingaleConfig,
    stake: SharedStake,
    state: Mutex<MartingaleState>,
}

impl MartingaleStrategy {
    /// `stake` is the value the executor reads at every purchase.
    pub fn new(config: MartingaleConfig, stake: SharedStake) -> Self {
        let base = config.base_stake;
        stake.set(base);
        Self {
            config,
            stake,
            state: Mutex::new(MartingaleState {
                stake: base,
                trades: 0,
            }),
        }
    }

    pub fn current_stake(&self) -> Money {
        self.state.lock().stake
    }

    pub fn trades(&self) -> u32 {
        self.state.lock().trades
    }

    fn next_stake(&self, current: Money, lost: bool) -> Money {
        if !lost {
            return self.config.base_stake;
        }
        let next = (current * self.config.multiplier).round_dp(2);
        match self.config.max_stake {
            Some(max) if next > max => {
                info!(next = %next, max = %max, "Martingale stake capped, resetting");
                self.config.base_stake
            }
            _ => next,
        }
    }
}

impl Strategy for MartingaleStrategy {
    fn name(&self) -> &str {
        "martingale"
    }

    fn next_contract_type(&self) -> ContractType {
        self.config.contract_type.clone()
    }

    fn on_run_start(&self) {
        let mut state = self.state.lock();
        state.stake = self.config.base_stake;
        state.trades = 0;
        self.stake.set(state.stake);
    }

    fn on_contract_closed(&self, record: &ContractRecord) -> TradeDecision {
        let mut state = self.state.lock();
        state.trades += 1;
        let lost = !record.is_won();
        state.stake = self.next_stake(state.stake, lost);
        self.stake.set(state.stake);
        debug!(
            trades = state.trades,
            lost,
            next_stake = %state.stake,
            "Martingale updated"
        );

        match self.config.max_trades {
            Some(max) if state.trades >= max => TradeDecision::Stop,
            _ => TradeDecision::TradeAgain,
        }
    }

    fn restart_on_error(&self) -> bool {
        self.config.restart_on_error
    }
}
