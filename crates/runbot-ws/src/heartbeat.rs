//! Application-level heartbeat.
//!
//! The brokerage answers `{"ping": 1}` with a `msg_type: "ping"` message.
//! A ping is only sent after `interval_ms` of silence; if its answer does
//! not arrive within `timeout_ms` the connection is considered dead.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Copy)]
struct HeartbeatState {
    last_ping: Option<DateTime<Utc>>,
    last_message: DateTime<Utc>,
    waiting_for_pong: bool,
}

/// Heartbeat tracker for one connection.
#[derive(Debug)]
pub struct HeartbeatManager {
    interval_ms: u64,
    timeout_ms: u64,
    state: RwLock<HeartbeatState>,
}

impl HeartbeatManager {
    pub fn new(interval_ms: u64, timeout_ms: u64) -> Self {
        Self {
            interval_ms,
            timeout_ms,
            state: RwLock::new(HeartbeatState {
                last_ping: None,
                last_message: Utc::now(),
                waiting_for_pong: false,
            }),
        }
    }

    /// Reset on (re)connection.
    pub fn reset(&self) {
        *self.state.write() = HeartbeatState {
            last_ping: None,
            last_message: Utc::now(),
            waiting_for_pong: false,
        };
    }

    pub fn record_ping(&self) {
        let mut state = self.state.write();
        state.last_ping = Some(Utc::now());
        state.waiting_for_pong = true;
    }

    pub fn record_pong(&self) {
        let mut state = self.state.write();
        state.waiting_for_pong = false;
        if let Some(ping) = state.last_ping {
            debug!(rtt_ms = (Utc::now() - ping).num_milliseconds(), "Heartbeat answered");
        }
    }

    /// Any inbound traffic counts as liveness.
    pub fn record_message(&self) {
        self.state.write().last_message = Utc::now();
    }

    pub fn is_timed_out(&self) -> bool {
        let state = self.state.read();
        match (state.waiting_for_pong, state.last_ping) {
            (true, Some(ping)) => (Utc::now() - ping).num_milliseconds() > self.timeout_ms as i64,
            _ => false,
        }
    }

    pub fn should_send_ping(&self) -> bool {
        let state = self.state.read();
        !state.waiting_for_pong
            && (Utc::now() - state.last_message).num_milliseconds() >= self.interval_ms as i64
    }

    /// Sleep until the next check.
    pub async fn wait_for_check(&self) {
        tokio::time::sleep(Duration::from_millis((self.interval_ms / 2).max(1))).await;
    }
}
