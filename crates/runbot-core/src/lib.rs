//! Core domain types for the runbot trade execution core.
//!
//! This crate provides fundamental types used throughout the system:
//! - `LoginId`, `Token`: Account identity and credentials
//! - `Money`: Precision-safe stake/payout/balance type
//! - `ContractRecord`, `ContractUpdate`: Contract lifecycle records
//! - `ContractStage`, `PurchaseScope`: Run session state enums
//! - `ApiError`: Normalized brokerage error with severity classification
//! - `EventBus`: In-process named events with disposable subscriptions

pub mod account;
pub mod clock;
pub mod contract;
pub mod decimal;
pub mod error;
pub mod events;
pub mod stage;
pub mod trade;

pub use account::{AccountBalance, AccountKind, LoginId, Token};
pub use clock::{Clock, ManualClock, SystemClock};
pub use contract::{
    ContractId, ContractRecord, ContractStatus, ContractUpdate, RunId, TransactionId,
    TransactionIds,
};
pub use decimal::Money;
pub use error::{ApiError, CoreError, ErrorSeverity, Result};
pub use events::{
    BotEvent, ContractStatusEvent, EventBus, EventName, JournalLevel, JournalMessage,
    ReplicatedBuy, Subscription,
};
pub use stage::{ContractStage, ErrorType, PurchaseScope};
pub use trade::{
    Basis, BuyParameters, BuyReceipt, BuyRequest, ContractType, DurationUnit, Proposal,
    PurchaseMode, TradeIntent,
};
