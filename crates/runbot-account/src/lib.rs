//! Account identity and balance display for runbot.
//!
//! - `AliasTable`: data-driven display/execution account pairs
//! - `IdentityResolver`: displayed account to trading identity
//! - `AccountSession`: owner of the transport's authorization context
//! - `compute_display`: balance projection (mirror, swap, alias offset)

pub mod alias;
pub mod balance;
pub mod error;
pub mod resolver;
pub mod session;

pub use alias::{mask_id, AliasEntry, AliasTable};
pub use balance::{
    compute_display, BalanceSwapState, DisplayBalance, DisplayContext, MirrorConfig,
    SwappedAccount,
};
pub use error::{AccountError, AccountResult};
pub use resolver::{AccountsList, IdentityResolver, TradingIdentity};
pub use session::AccountSession;
