//! Purchase execution for runbot.
//!
//! Key components:
//! - `PurchaseExecutor`: identity-checked buys with bounded recovery
//! - `ScopeTracker`: atomic purchase window guard
//! - `ProposalBook`: single-use live proposals
//! - `StakeSource`: stake read fresh at every purchase
//! - `CopyTradeRelay`: replays leader buys on follower accounts

pub mod copy;
pub mod error;
pub mod proposal;
pub mod purchase;
pub mod scope;
pub mod stake;
pub mod subscription;

pub use copy::{CopySummary, CopyTradeRelay};
pub use error::{ExecutorError, ExecutorResult};
pub use proposal::ProposalBook;
pub use purchase::{PurchaseConfig, PurchaseExecutor, PurchaseOutcome, PurchaseRecord};
pub use scope::{ScopeState, ScopeTracker};
pub use stake::{SharedStake, StakeSource};
pub use subscription::subscribe_with_retry;
