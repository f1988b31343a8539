//! Trade intent and buy request types.
//!
//! A purchase is issued in one of two mutually exclusive modes:
//! - Proposal mode: buy a pre-fetched proposal by id at its ask price
//! - Direct mode: buy with the full contract parameters

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::contract::{ContractId, TransactionId};
use crate::decimal::Money;

/// Vendor contract type (e.g. `CALL`, `PUT`, `DIGITOVER`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContractType(String);

impl ContractType {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into().to_ascii_uppercase())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Digit contracts require a prediction (barrier digit).
    #[must_use]
    pub fn needs_prediction(&self) -> bool {
        matches!(
            self.0.as_str(),
            "DIGITMATCH" | "DIGITDIFF" | "DIGITOVER" | "DIGITUNDER"
        )
    }
}

impl fmt::Display for ContractType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Contract duration unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DurationUnit {
    #[default]
    #[serde(rename = "t")]
    Ticks,
    #[serde(rename = "s")]
    Seconds,
    #[serde(rename = "m")]
    Minutes,
    #[serde(rename = "h")]
    Hours,
    #[serde(rename = "d")]
    Days,
}

/// Whether `amount` is the stake or the target payout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Basis {
    #[default]
    Stake,
    Payout,
}

/// Purchase mode selected by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PurchaseMode {
    /// Buy a pre-fetched proposal (id + ask price).
    #[default]
    Proposal,
    /// Buy with full contract parameters.
    Direct,
}

/// What the bot wants to trade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeIntent {
    pub contract_type: ContractType,
    pub symbol: String,
    /// Stake. Refreshed from the live stake source before every purchase.
    pub amount: Money,
    pub duration: u32,
    #[serde(default)]
    pub duration_unit: DurationUnit,
    /// Last-digit prediction for digit contracts.
    #[serde(default)]
    pub prediction: Option<u8>,
    pub currency: String,
    #[serde(default)]
    pub basis: Basis,
}

impl TradeIntent {
    /// Same intent with a different contract type.
    #[must_use]
    pub fn with_contract_type(&self, contract_type: ContractType) -> Self {
        Self {
            contract_type,
            ..self.clone()
        }
    }

    /// Full parameter payload for direct-mode purchases.
    #[must_use]
    pub fn to_parameters(&self) -> BuyParameters {
        BuyParameters {
            amount: self.amount,
            basis: self.basis,
            contract_type: self.contract_type.clone(),
            currency: self.currency.clone(),
            duration: self.duration,
            duration_unit: self.duration_unit,
            symbol: self.symbol.clone(),
            barrier: if self.contract_type.needs_prediction() {
                self.prediction.map(|d| d.to_string())
            } else {
                None
            },
        }
    }
}

/// Direct-mode parameter payload (vendor field names).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuyParameters {
    pub amount: Money,
    pub basis: Basis,
    pub contract_type: ContractType,
    pub currency: String,
    pub duration: u32,
    pub duration_unit: DurationUnit,
    #[serde(rename = "underlying_symbol", alias = "symbol")]
    pub symbol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub barrier: Option<String>,
}

/// Live price quote for a contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub id: String,
    pub ask_price: Money,
    pub payout: Money,
    pub contract_type: ContractType,
    pub symbol: String,
}

/// A buy request in either purchase mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum BuyRequest {
    Proposal { id: String, price: Money },
    Direct { price: Money, parameters: BuyParameters },
}

impl BuyRequest {
    /// Maximum price the buyer accepts.
    #[must_use]
    pub fn price(&self) -> Money {
        match self {
            Self::Proposal { price, .. } | Self::Direct { price, .. } => *price,
        }
    }

    #[must_use]
    pub fn mode(&self) -> PurchaseMode {
        match self {
            Self::Proposal { .. } => PurchaseMode::Proposal,
            Self::Direct { .. } => PurchaseMode::Direct,
        }
    }
}

/// Server confirmation of a purchase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuyReceipt {
    pub contract_id: ContractId,
    pub transaction_id: TransactionId,
    pub buy_price: Money,
    pub payout: Money,
    /// Unix seconds.
    pub start_time: u64,
    #[serde(default)]
    pub longcode: String,
    #[serde(default)]
    pub balance_after: Option<Money>,
}
