//! Contract lifecycle records.
//!
//! A contract is created on purchase confirmation, mutated on every
//! `proposal_open_contract` push and finalized once the server reports it
//! sold. Its identity is the original `buy` transaction id; `display_buy_id`
//! is a presentation transform and never participates in matching.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::decimal::Money;
use crate::trade::ContractType;

/// Vendor contract identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContractId(pub u64);

impl fmt::Display for ContractId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Vendor transaction identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(pub u64);

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Buy and (once sold) sell transaction ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionIds {
    pub buy: TransactionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sell: Option<TransactionId>,
}

impl TransactionIds {
    pub fn bought(buy: TransactionId) -> Self {
        Self { buy, sell: None }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContractStatus {
    #[default]
    Open,
    Closed,
}

/// Groups every contract bought during one run session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    /// Mint a fresh run id.
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self(format!("run-{}", uuid::Uuid::new_v4().simple()))
    }

    pub fn from_string(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Server push describing the current state of one contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractUpdate {
    pub contract_id: ContractId,
    pub transaction_ids: TransactionIds,
    pub buy_price: Money,
    #[serde(default)]
    pub payout: Money,
    #[serde(default)]
    pub profit: Money,
    pub currency: String,
    #[serde(default)]
    pub is_sold: bool,
    #[serde(default)]
    pub is_completed: bool,
    /// Unix seconds.
    pub date_start: u64,
    pub contract_type: ContractType,
    #[serde(default)]
    pub symbol: String,
    /// Run the update belongs to. Tagged by the router, absent on the wire.
    #[serde(default)]
    pub run_id: Option<RunId>,
    /// Display-layer id (possibly masked). Never used for identity.
    #[serde(default)]
    pub display_buy_id: Option<String>,
}

impl ContractUpdate {
    #[must_use]
    pub fn status(&self) -> ContractStatus {
        if self.is_sold || self.is_completed {
            ContractStatus::Closed
        } else {
            ContractStatus::Open
        }
    }

    #[must_use]
    pub fn with_run_id(mut self, run_id: RunId) -> Self {
        self.run_id = Some(run_id);
        self
    }
}

/// Stored contract record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractRecord {
    pub contract_id: ContractId,
    pub transaction_ids: TransactionIds,
    #[serde(default)]
    pub display_buy_id: Option<String>,
    pub buy_price: Money,
    pub payout: Money,
    pub profit: Money,
    pub currency: String,
    pub status: ContractStatus,
    pub is_completed: bool,
    pub run_id: Option<RunId>,
    pub date_start: u64,
    pub contract_type: ContractType,
    pub symbol: String,
}

impl ContractRecord {
    pub fn from_update(update: &ContractUpdate) -> Self {
        Self {
            contract_id: update.contract_id,
            transaction_ids: update.transaction_ids,
            display_buy_id: update.display_buy_id.clone(),
            buy_price: update.buy_price,
            payout: update.payout,
            profit: update.profit,
            currency: update.currency.clone(),
            status: update.status(),
            is_completed: update.is_completed || update.is_sold,
            run_id: update.run_id.clone(),
            date_start: update.date_start,
            contract_type: update.contract_type.clone(),
            symbol: update.symbol.clone(),
        }
    }

    /// Identity key: the original buy transaction id.
    #[inline]
    pub fn buy_id(&self) -> TransactionId {
        self.transaction_ids.buy
    }

    /// Merge a newer server push into this record.
    ///
    /// The original `run_id` and `date_start` are kept; a completed record
    /// never reopens.
    pub fn apply_update(&mut self, update: &ContractUpdate) {
        if update.transaction_ids.sell.is_some() {
            self.transaction_ids.sell = update.transaction_ids.sell;
        }
        if update.display_buy_id.is_some() {
            self.display_buy_id = update.display_buy_id.clone();
        }
        self.buy_price = update.buy_price;
        self.payout = update.payout;
        self.profit = update.profit;
        if !self.is_completed {
            self.is_completed = update.is_completed || update.is_sold;
            self.status = update.status();
        }
        if self.run_id.is_none() {
            self.run_id = update.run_id.clone();
        }
        if self.symbol.is_empty() {
            self.symbol = update.symbol.clone();
        }
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.is_completed
    }

    #[must_use]
    pub fn is_won(&self) -> bool {
        self.is_completed && self.profit.is_positive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn update(buy: u64, sold: bool, profit: rust_decimal::Decimal) -> ContractUpdate {
        ContractUpdate {
            contract_id: ContractId(buy + 1000),
            transaction_ids: TransactionIds::bought(TransactionId(buy)),
            buy_price: Money::new(dec!(1)),
            payout: Money::new(dec!(1.95)),
            profit: Money::new(profit),
            currency: "USD".to_string(),
            is_sold: sold,
            is_completed: sold,
            date_start: 1_700_000_000,
            contract_type: ContractType::new("CALL"),
            symbol: "R_100".to_string(),
            run_id: Some(RunId::from_string("run-a")),
            display_buy_id: None,
        }
    }

    #[test]
    fn test_record_from_open_update() {
        let record = ContractRecord::from_update(&update(7, false, dec!(0)));
        assert_eq!(record.status, ContractStatus::Open);
        assert!(record.is_open());
        assert_eq!(record.buy_id(), TransactionId(7));
    }

    #[test]
    fn test_apply_update_keeps_run_id_and_closes() {
        let mut record = ContractRecord::from_update(&update(7, false, dec!(0)));
        let mut closing = update(7, true, dec!(0.95));
        closing.run_id = Some(RunId::from_string("run-b"));
        closing.transaction_ids.sell = Some(TransactionId(8));

        record.apply_update(&closing);

        assert_eq!(record.run_id, Some(RunId::from_string("run-a")));
        assert_eq!(record.status, ContractStatus::Closed);
        assert_eq!(record.transaction_ids.sell, Some(TransactionId(8)));
        assert!(record.is_won());
    }

    #[test]
    fn test_completed_record_never_reopens() {
        let mut record = ContractRecord::from_update(&update(7, true, dec!(-1)));
        record.apply_update(&update(7, false, dec!(-1)));
        assert!(record.is_completed);
        assert_eq!(record.status, ContractStatus::Closed);
    }

    #[test]
    fn test_run_ids_are_unique() {
        assert_ne!(RunId::new(), RunId::new());
    }
}
