//! Prometheus metrics for runbot.
//!
//! # Panics
//!
//! Metric registration uses `unwrap()`. A failure means a duplicate metric
//! name, which is a startup bug; it can only happen during static
//! initialization.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge, register_int_counter, register_int_counter_vec,
    register_int_gauge, register_int_gauge_vec, CounterVec, Encoder, Gauge, IntCounter,
    IntCounterVec, IntGauge, IntGaugeVec, TextEncoder,
};

use crate::error::TelemetryResult;

/// WebSocket connection state (1 = connected).
pub static WS_CONNECTED: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("runbot_ws_connected", "WebSocket connection state (1=connected)")
        .unwrap()
});

/// Reconnections by reason.
pub static WS_RECONNECT_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "runbot_ws_reconnect_total",
        "Total WebSocket reconnections",
        &["reason"]
    )
    .unwrap()
});

/// Re-authorizations before a trade.
pub static REAUTHORIZE_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "runbot_reauthorize_total",
        "Transport re-authorizations",
        &["result"]
    )
    .unwrap()
});

/// Buy requests by mode and outcome.
pub static PURCHASE_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "runbot_purchase_total",
        "Buy requests by purchase mode and outcome",
        &["mode", "outcome"]
    )
    .unwrap()
});

/// Purchase recovery attempts by error code.
pub static PURCHASE_RETRY_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "runbot_purchase_retry_total",
        "Purchase re-attempts by triggering error code",
        &["code"]
    )
    .unwrap()
});

/// Contract subscriptions that could not be confirmed.
pub static SUBSCRIPTION_FAILURE_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "runbot_subscription_failure_total",
        "proposal_open_contract subscriptions never confirmed"
    )
    .unwrap()
});

/// Copy-trade replays by outcome.
pub static COPY_TRADE_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "runbot_copy_trade_total",
        "Follower buy replays by outcome",
        &["outcome"]
    )
    .unwrap()
});

/// Current run stage code (0 = not running).
pub static RUN_STAGE: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("runbot_run_stage", "Current contract stage code").unwrap()
});

/// Bot stop events by error type.
pub static BOT_STOP_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!("runbot_bot_stop_total", "Run session stops", &["reason"]).unwrap()
});

/// Cumulative profit of the current run session.
pub static SESSION_PROFIT: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!("runbot_session_profit", "Cumulative profit of the run session").unwrap()
});

/// Ledger entries per storage bucket.
pub static LEDGER_SIZE: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "runbot_ledger_entries",
        "Stored ledger entries per account bucket",
        &["login_id"]
    )
    .unwrap()
});

/// Metrics facade.
pub struct Metrics;

impl Metrics {
    pub fn ws_connected() {
        WS_CONNECTED.set(1);
    }

    pub fn ws_disconnected() {
        WS_CONNECTED.set(0);
    }

    pub fn ws_reconnect(reason: &str) {
        WS_RECONNECT_TOTAL.with_label_values(&[reason]).inc();
    }

    /// `result` is `ok` or `error`.
    pub fn reauthorize(result: &str) {
        REAUTHORIZE_TOTAL.with_label_values(&[result]).inc();
    }

    pub fn purchase(mode: &str, outcome: &str) {
        PURCHASE_TOTAL.with_label_values(&[mode, outcome]).inc();
    }

    pub fn purchase_retry(code: &str) {
        PURCHASE_RETRY_TOTAL.with_label_values(&[code]).inc();
    }

    pub fn subscription_failure() {
        SUBSCRIPTION_FAILURE_TOTAL.inc();
    }

    pub fn copy_trade(outcome: &str) {
        COPY_TRADE_TOTAL.with_label_values(&[outcome]).inc();
    }

    pub fn run_stage(code: i64) {
        RUN_STAGE.set(code);
    }

    pub fn bot_stop(reason: &str) {
        BOT_STOP_TOTAL.with_label_values(&[reason]).inc();
    }

    pub fn session_profit(profit: f64) {
        SESSION_PROFIT.set(profit);
    }

    pub fn ledger_size(login_id: &str, entries: usize) {
        LEDGER_SIZE
            .with_label_values(&[login_id])
            .set(i64::try_from(entries).unwrap_or(i64::MAX));
    }

    /// Render every registered metric in the Prometheus text format.
    pub fn render() -> TelemetryResult<String> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&prometheus::gather(), &mut buf)?;
        Ok(String::from_utf8(buf)?)
    }
}
