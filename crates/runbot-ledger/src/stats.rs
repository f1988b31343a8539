//! Ledger statistics.

use runbot_core::{ContractRecord, Money, RunId};
use serde::Serialize;
use std::collections::HashSet;

/// Totals over the contracts shown for one account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LedgerStatistics {
    pub total_stake: Money,
    /// Amount returned by completed contracts.
    pub total_payout: Money,
    pub total_profit: Money,
    pub contracts: usize,
    pub won: usize,
    pub lost: usize,
    pub open: usize,
    pub runs: usize,
}

impl LedgerStatistics {
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a ContractRecord>) -> Self {
        let mut stats = Self::default();
        let mut runs: HashSet<&RunId> = HashSet::new();
        for record in records {
            stats.contracts += 1;
            stats.total_stake += record.buy_price;
            if let Some(run_id) = record.run_id.as_ref() {
                runs.insert(run_id);
            }
            if !record.is_completed {
                stats.open += 1;
                continue;
            }
            stats.total_payout += record.buy_price + record.profit;
            stats.total_profit += record.profit;
            if record.is_won() {
                stats.won += 1;
            } else {
                stats.lost += 1;
            }
        }
        stats.runs = runs.len();
        stats
    }
}
