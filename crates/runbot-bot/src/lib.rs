//! runbot: contract purchase bot.
//!
//! Main application that orchestrates all components:
//! - WebSocket connection to the brokerage
//! - Account login and identity resolution
//! - Purchase execution and the run panel
//! - Transaction ledger and journal persistence
//! - Copy trading to follower accounts

pub mod app;
pub mod config;
pub mod error;
pub mod router;

pub use app::Application;
pub use config::AppConfig;
pub use error::{AppError, AppResult};
pub use router::PushRouter;
