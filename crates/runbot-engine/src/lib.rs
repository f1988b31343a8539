//! Run session engine for runbot.
//!
//! Key components:
//! - `RunPanel`: run session state machine (stages, stop handling, take-profit)
//! - `SelfExclusion`: session loss and run limits
//! - `Strategy` / `MartingaleStrategy`: contract selection and stake progression
//! - `BotDriver`: the purchase / settle / decide loop

pub mod driver;
pub mod error;
pub mod panel;
pub mod self_exclusion;
pub mod strategy;

pub use driver::{BotDriver, DriverConfig, RunSummary};
pub use error::{EngineError, EngineResult};
pub use panel::{ContinuePolicy, RunConfig, RunDirective, RunPanel, RunSnapshot};
pub use self_exclusion::{ExclusionReason, SelfExclusion, SelfExclusionLimits};
pub use strategy::{MartingaleConfig, MartingaleStrategy, Strategy, TradeDecision};
