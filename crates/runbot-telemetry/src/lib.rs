//! Prometheus metrics and structured logging for runbot.
//!
//! - `init_logging`: `tracing` subscriber, JSON in production
//! - `Metrics`: static Prometheus metrics for purchases, retries,
//!   subscriptions, re-authorizations, run stage, session profit, ledger
//!   size and connection state

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::init_logging;
pub use metrics::Metrics;
