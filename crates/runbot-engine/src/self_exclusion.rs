//! Session self-exclusion limits.
//!
//! Counts runs started and net loss since the last reset. A new run is
//! refused once either limit is reached. Counters reset on an
//! unrecoverable stop.

use parking_lot::RwLock;
use runbot_core::Money;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::{info, warn};

/// Configured limits. `None` disables a limit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelfExclusionLimits {
    /// Maximum net loss across runs.
    #[serde(default)]
    pub max_losses: Option<Money>,
    /// Maximum number of runs.
    #[serde(default)]
    pub max_runs: Option<u32>,
}

/// Reason a run was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExclusionReason {
    MaxLosses { net_loss: Money, limit: Money },
    MaxRuns { runs: u32, limit: u32 },
}

impl std::fmt::Display for ExclusionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MaxLosses { net_loss, limit } => {
                write!(f, "net loss {} reached the limit of {}", net_loss, limit)
            }
            Self::MaxRuns { runs, limit } => {
                write!(f, "{} runs reached the limit of {}", runs, limit)
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct SelfExclusion {
    limits: SelfExclusionLimits,
    runs: AtomicU32,
    /// Cumulative profit since reset; negative means a net loss.
    profit: RwLock<Money>,
}

impl SelfExclusion {
    pub fn new(limits: SelfExclusionLimits) -> Self {
        Self {
            limits,
            runs: AtomicU32::new(0),
            profit: RwLock::new(Money::ZERO),
        }
    }

    pub fn limits(&self) -> &SelfExclusionLimits {
        &self.limits
    }

    /// Whether another run may start.
    pub fn check(&self) -> Result<(), ExclusionReason> {
        if let Some(limit) = self.limits.max_runs {
            let runs = self.runs();
            if runs >= limit {
                return Err(ExclusionReason::MaxRuns { runs, limit });
            }
        }
        if let Some(limit) = self.limits.max_losses {
            let net_loss = self.net_loss();
            if limit.is_positive() && net_loss >= limit {
                return Err(ExclusionReason::MaxLosses { net_loss, limit });
            }
        }
        Ok(())
    }

    pub fn record_run(&self) {
        self.runs.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_result(&self, profit: Money) {
        let mut total = self.profit.write();
        *total += profit;
        if let Some(limit) = self.limits.max_losses {
            if limit.is_positive() && -*total >= limit {
                warn!(net_loss = %(-*total), limit = %limit, "Self-exclusion loss limit reached");
            }
        }
    }

    pub fn runs(&self) -> u32 {
        self.runs.load(Ordering::SeqCst)
    }

    /// Net loss since reset, zero when in profit.
    pub fn net_loss(&self) -> Money {
        let total = *self.profit.read();
        if total.is_negative() {
            -total
        } else {
            Money::ZERO
        }
    }

    pub fn reset(&self) {
        self.runs.store(0, Ordering::SeqCst);
        *self.profit.write() = Money::ZERO;
        info!("Self-exclusion counters reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_unlimited_by_default() {
        let exclusion = SelfExclusion::default();
        for _ in 0..100 {
            exclusion.record_run();
            exclusion.record_result(Money::new(dec!(-5)));
        }
        assert!(exclusion.check().is_ok());
    }

    #[test]
    fn test_run_limit() {
        let exclusion = SelfExclusion::new(SelfExclusionLimits {
            max_runs: Some(2),
            ..Default::default()
        });
        exclusion.record_run();
        assert!(exclusion.check().is_ok());
        exclusion.record_run();
        assert_eq!(
            exclusion.check(),
            Err(ExclusionReason::MaxRuns { runs: 2, limit: 2 })
        );
    }

    #[test]
    fn test_loss_limit_counts_net_loss() {
        let exclusion = SelfExclusion::new(SelfExclusionLimits {
            max_losses: Some(Money::new(dec!(10))),
            ..Default::default()
        });
        exclusion.record_result(Money::new(dec!(-8)));
        exclusion.record_result(Money::new(dec!(3)));
        assert_eq!(exclusion.net_loss(), Money::new(dec!(5)));
        assert!(exclusion.check().is_ok());

        exclusion.record_result(Money::new(dec!(-5)));
        assert!(matches!(
            exclusion.check(),
            Err(ExclusionReason::MaxLosses { .. })
        ));
    }

    #[test]
    fn test_reset_clears_counters() {
        let exclusion = SelfExclusion::new(SelfExclusionLimits {
            max_losses: Some(Money::new(dec!(1))),
            max_runs: Some(1),
        });
        exclusion.record_run();
        exclusion.record_result(Money::new(dec!(-1)));
        assert!(exclusion.check().is_err());

        exclusion.reset();
        assert_eq!(exclusion.runs(), 0);
        assert_eq!(exclusion.net_loss(), Money::ZERO);
        assert!(exclusion.check().is_ok());
    }
}
