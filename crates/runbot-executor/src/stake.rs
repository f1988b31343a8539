//! Live stake source.
//!
//! The stake is read at the moment of every purchase call, never cached at
//! run start, so progressive staking strategies take effect immediately.

use parking_lot::RwLock;
use runbot_core::Money;
use std::sync::Arc;

pub trait StakeSource: Send + Sync {
    /// Current stake, or `None` if it cannot be read right now.
    fn current_stake(&self) -> Option<Money>;
}

/// Stake variable shared between a strategy and the executor.
#[derive(Debug, Clone, Default)]
pub struct SharedStake {
    value: Arc<RwLock<Option<Money>>>,
}

impl SharedStake {
    pub fn new(initial: Money) -> Self {
        Self {
            value: Arc::new(RwLock::new(Some(initial))),
        }
    }

    pub fn set(&self, stake: Money) {
        *self.value.write() = Some(stake);
    }

    /// Make the stake unreadable.
    pub fn clear(&self) {
        *self.value.write() = None;
    }
}

impl StakeSource for SharedStake {
    fn current_stake(&self) -> Option<Money> {
        *self.value.read()
    }
}
