//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] Box<runbot_ws::WsError>),

    #[error("Persistence error: {0}")]
    Persistence(#[from] runbot_persistence::PersistenceError),

    #[error("Account error: {0}")]
    Account(#[from] runbot_account::AccountError),

    #[error("Engine error: {0}")]
    Engine(#[from] runbot_engine::EngineError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] runbot_ledger::LedgerError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] runbot_telemetry::TelemetryError),

    #[error("Login failed: {0}")]
    Login(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Shutdown requested")]
    Shutdown,
}

pub type AppResult<T> = Result<T, AppError>;
