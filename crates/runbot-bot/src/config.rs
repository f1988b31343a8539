//! Application configuration.

use crate::error::{AppError, AppResult};
use runbot_account::{AccountsList, AliasEntry};
use runbot_core::{Basis, DurationUnit, LoginId, Token, TradeIntent};
use runbot_engine::{DriverConfig, MartingaleConfig, RunConfig};
use runbot_executor::PurchaseConfig;
use runbot_ledger::LedgerConfig;
use runbot_ws::ConnectionConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Prefix of the environment variable holding a credential that is not
/// written in the config file, e.g. `RUNBOT_TOKEN_CR100`.
pub const TOKEN_ENV_PREFIX: &str = "RUNBOT_TOKEN_";

/// One brokerage account the bot may log in as.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialConfig {
    pub login_id: LoginId,
    /// API token. Falls back to `RUNBOT_TOKEN_<LOGIN_ID>` when absent.
    #[serde(default)]
    pub token: Option<String>,
}

impl CredentialConfig {
    fn resolve_token(&self) -> Option<Token> {
        let env_key = format!("{}{}", TOKEN_ENV_PREFIX, self.login_id.as_str());
        self.token
            .clone()
            .or_else(|| std::env::var(env_key).ok())
            .filter(|t| !t.trim().is_empty())
            .map(Token::new)
    }
}

/// Session and display flags persisted to the session store at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Directory of the JSON session store.
    #[serde(default = "default_store_dir")]
    pub store_dir: String,
    /// Account to trade on.
    pub active_account: Option<LoginId>,
    /// Enables the alias table for identity and display.
    #[serde(default)]
    pub alias_mode: bool,
    /// Allows the mirror display mode to take effect.
    #[serde(default)]
    pub mirror_mode: bool,
}

fn default_store_dir() -> String {
    "./data/session".to_string()
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            store_dir: default_store_dir(),
            active_account: None,
            alias_mode: false,
            mirror_mode: false,
        }
    }
}

/// WebSocket tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsConfig {
    /// Maximum reconnection attempts (0 = infinite).
    #[serde(default)]
    pub max_reconnect_attempts: u32,
    /// Base delay for reconnection backoff (ms).
    #[serde(default = "default_reconnect_base_delay_ms")]
    pub reconnect_base_delay_ms: u64,
    #[serde(default = "default_reconnect_max_delay_ms")]
    pub reconnect_max_delay_ms: u64,
    /// Heartbeat interval (ms).
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_reconnect_base_delay_ms() -> u64 {
    1000
}

fn default_reconnect_max_delay_ms() -> u64 {
    30000
}

fn default_heartbeat_interval_ms() -> u64 {
    30000
}

fn default_request_timeout_ms() -> u64 {
    30000
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: 0,
            reconnect_base_delay_ms: default_reconnect_base_delay_ms(),
            reconnect_max_delay_ms: default_reconnect_max_delay_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl From<WsConfig> for ConnectionConfig {
    fn from(cfg: WsConfig) -> Self {
        Self {
            url: String::new(), // Set separately
            app_id: None,       // Set separately
            max_reconnect_attempts: cfg.max_reconnect_attempts,
            reconnect_base_delay_ms: cfg.reconnect_base_delay_ms,
            reconnect_max_delay_ms: cfg.reconnect_max_delay_ms,
            heartbeat_interval_ms: cfg.heartbeat_interval_ms,
            request_timeout_ms: cfg.request_timeout_ms,
            ..ConnectionConfig::default()
        }
    }
}

/// Contract parameters shared by every purchase. Contract type and stake
/// come from the strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeConfig {
    pub symbol: String,
    pub duration: u32,
    #[serde(default)]
    pub duration_unit: DurationUnit,
    #[serde(default)]
    pub prediction: Option<u8>,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub basis: Basis,
}

fn default_currency() -> String {
    "USD".to_string()
}

impl TradeConfig {
    /// Purchase template for `strategy`.
    pub fn to_intent(&self, strategy: &MartingaleConfig) -> TradeIntent {
        TradeIntent {
            contract_type: strategy.contract_type.clone(),
            symbol: self.symbol.clone(),
            amount: strategy.base_stake,
            duration: self.duration,
            duration_unit: self.duration_unit,
            prediction: self.prediction,
            currency: self.currency.clone(),
            basis: self.basis,
        }
    }
}

/// Copy trading: leader buys replayed on follower credentials.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CopyTradeConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub tokens: Vec<String>,
}

/// Journal output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JournalConfig {
    /// Base directory for daily journal files.
    pub dir: String,
    /// Messages buffered before a flush.
    pub buffer_size: usize,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            dir: "./data/journal".to_string(),
            buffer_size: 20,
        }
    }
}

/// Telemetry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Interval of the periodic statistics summary (seconds).
    pub stats_interval_secs: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            stats_interval_secs: 3600,
        }
    }
}

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// WebSocket endpoint URL.
    pub ws_url: String,
    /// Application id appended to the endpoint.
    #[serde(default)]
    pub app_id: Option<String>,
    #[serde(default)]
    pub websocket: WsConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub credentials: Vec<CredentialConfig>,
    pub trade: TradeConfig,
    pub strategy: MartingaleConfig,
    #[serde(default)]
    pub purchase: PurchaseConfig,
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub driver: DriverConfig,
    #[serde(default)]
    pub aliases: Vec<AliasEntry>,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub copy_trade: CopyTradeConfig,
    #[serde(default)]
    pub journal: JournalConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    /// Load from a specific file.
    pub fn from_file(path: impl AsRef<Path>) -> AppResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| AppError::Config(format!("Failed to read config: {e}")))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> AppResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> AppResult<()> {
        if self.ws_url.is_empty() {
            return Err(AppError::Config("ws_url must be set".to_string()));
        }
        if self.trade.symbol.is_empty() {
            return Err(AppError::Config("trade.symbol must be set".to_string()));
        }
        if !self.strategy.base_stake.is_positive() {
            return Err(AppError::Config(
                "strategy.base_stake must be positive".to_string(),
            ));
        }
        if self.strategy.contract_type.needs_prediction() && self.trade.prediction.is_none() {
            return Err(AppError::Config(format!(
                "{} contracts need trade.prediction",
                self.strategy.contract_type
            )));
        }
        Ok(())
    }

    /// Connection settings for the primary and follower sockets.
    pub fn connection_config(&self) -> ConnectionConfig {
        let mut ws_config: ConnectionConfig = self.websocket.clone().into();
        ws_config.url = self.ws_url.clone();
        ws_config.app_id = self.app_id.clone();
        ws_config
    }

    /// Credentials with a token, keyed by login id.
    pub fn accounts(&self) -> AccountsList {
        let mut accounts = AccountsList::new();
        for credential in &self.credentials {
            match credential.resolve_token() {
                Some(token) => {
                    accounts.insert(credential.login_id.clone(), token);
                }
                None => {
                    tracing::warn!(login_id = %credential.login_id, "No token for account, skipped");
                }
            }
        }
        accounts
    }

    /// Account to activate: the configured one, else the first credential.
    pub fn active_account(&self) -> Option<LoginId> {
        self.session
            .active_account
            .clone()
            .or_else(|| self.credentials.first().map(|c| c.login_id.clone()))
    }

    pub fn purchase_template(&self) -> TradeIntent {
        self.trade.to_intent(&self.strategy)
    }

    pub fn follower_tokens(&self) -> Vec<Token> {
        if !self.copy_trade.enabled {
            return Vec::new();
        }
        self.copy_trade
            .tokens
            .iter()
            .filter(|t| !t.trim().is_empty())
            .map(Token::new)
            .collect()
    }
}
