//! WebSocket connection manager.
//!
//! Handles connection lifecycle, automatic reconnection with exponential
//! backoff, re-authorization with the last token after reconnect and
//! restoration of open contract subscriptions.

use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use runbot_core::{ContractId, Token};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex as TokioMutex};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::client::ApiClient;
use crate::error::{WsError, WsResult};
use crate::heartbeat::HeartbeatManager;
use crate::message::{ApiRequest, AuthorizeInfo, IncomingMessage, PushMessage, RequestEnvelope};
use crate::pending::PendingRequests;

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;
type WsSink = futures_util::stream::SplitSink<WsStream, Message>;
type WsSource = futures_util::stream::SplitStream<WsStream>;

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// WebSocket URL.
    pub url: String,
    /// Application id appended as `?app_id=`.
    pub app_id: Option<String>,
    /// Maximum reconnection attempts (0 = infinite).
    pub max_reconnect_attempts: u32,
    pub reconnect_base_delay_ms: u64,
    pub reconnect_max_delay_ms: u64,
    pub heartbeat_interval_ms: u64,
    /// Ping answer must arrive within this.
    pub heartbeat_timeout_ms: u64,
    /// Default timeout for request/response calls.
    pub request_timeout_ms: u64,
    /// Timeout for the re-authorize handshake after reconnect.
    pub reauthorize_timeout_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            app_id: None,
            max_reconnect_attempts: 0,
            reconnect_base_delay_ms: 1000,
            reconnect_max_delay_ms: 30000,
            heartbeat_interval_ms: 30000,
            heartbeat_timeout_ms: 10000,
            request_timeout_ms: 30000,
            reauthorize_timeout_ms: 10000,
        }
    }
}

impl ConnectionConfig {
    /// URL including the app id query parameter.
    pub fn endpoint(&self) -> String {
        match &self.app_id {
            Some(app_id) if !self.url.contains("app_id=") => {
                let sep = if self.url.contains('?') { '&' } else { '?' };
                format!("{}{}app_id={}", self.url, sep, app_id)
            }
            _ => self.url.clone(),
        }
    }
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// State shared between the connection loop and its [`ApiClient`]s.
#[derive(Debug)]
pub(crate) struct SharedSession {
    pub(crate) state: watch::Sender<ConnectionState>,
    pub(crate) pending: PendingRequests,
    pub(crate) outbound_tx: mpsc::Sender<String>,
    pub(crate) authorized: RwLock<Option<AuthorizeInfo>>,
    pub(crate) last_token: RwLock<Option<Token>>,
    pub(crate) contract_subscriptions: Mutex<HashSet<ContractId>>,
}

impl SharedSession {
    pub(crate) fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }
}

/// WebSocket connection manager.
pub struct ConnectionManager {
    config: ConnectionConfig,
    shared: Arc<SharedSession>,
    heartbeat: HeartbeatManager,
    push_tx: mpsc::Sender<PushMessage>,
    outbound_rx: TokioMutex<mpsc::Receiver<String>>,
    reconnect_count: AtomicU32,
    shutdown_token: CancellationToken,
}

impl ConnectionManager {
    pub fn new(config: ConnectionConfig, push_tx: mpsc::Sender<PushMessage>) -> Self {
        Self::with_shutdown(config, push_tx, CancellationToken::new())
    }

    /// Create a manager whose shutdown follows `shutdown_token`.
    pub fn with_shutdown(
        config: ConnectionConfig,
        push_tx: mpsc::Sender<PushMessage>,
        shutdown_token: CancellationToken,
    ) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(100);
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            heartbeat: HeartbeatManager::new(
                config.heartbeat_interval_ms,
                config.heartbeat_timeout_ms,
            ),
            config,
            shared: Arc::new(SharedSession {
                state,
                pending: PendingRequests::new(),
                outbound_tx,
                authorized: RwLock::new(None),
                last_token: RwLock::new(None),
                contract_subscriptions: Mutex::new(HashSet::new()),
            }),
            push_tx,
            outbound_rx: TokioMutex::new(outbound_rx),
            reconnect_count: AtomicU32::new(0),
            shutdown_token,
        }
    }

    /// Request/response client sharing this connection. Cheap to clone.
    pub fn client(&self) -> ApiClient {
        ApiClient::new(
            Arc::clone(&self.shared),
            Duration::from_millis(self.config.request_timeout_ms),
        )
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn reconnect_count(&self) -> u32 {
        self.reconnect_count.load(Ordering::Relaxed)
    }

    /// Signal graceful shutdown.
    pub fn shutdown(&self) {
        info!("ConnectionManager shutdown requested");
        self.shutdown_token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    /// Connect and run the message loop until shutdown or until the
    /// reconnect budget is exhausted.
    pub async fn connect(&self) -> WsResult<()> {
        let mut attempt = 0u32;

        loop {
            if self.is_shutdown() {
                info!("Shutdown requested, exiting connect loop");
                self.shared.set_state(ConnectionState::Disconnected);
                return Ok(());
            }

            self.shared.set_state(ConnectionState::Connecting);

            match self.try_connect().await {
                Ok(()) => info!("WebSocket connection closed"),
                Err(e) => error!(error = %e, "WebSocket connection error"),
            }
            self.on_disconnect().await;

            if self.is_shutdown() {
                info!("Shutdown requested after disconnect, not reconnecting");
                self.shared.set_state(ConnectionState::Disconnected);
                return Ok(());
            }

            attempt += 1;
            self.reconnect_count.store(attempt, Ordering::Relaxed);

            if self.config.max_reconnect_attempts > 0
                && attempt >= self.config.max_reconnect_attempts
            {
                error!(attempt, "Max reconnection attempts reached");
                self.shared.set_state(ConnectionState::Disconnected);
                return Err(WsError::ConnectionFailed(
                    "Max reconnection attempts reached".to_string(),
                ));
            }

            self.shared.set_state(ConnectionState::Reconnecting);

            let delay = self.calculate_backoff_delay(attempt);
            warn!(attempt, delay_ms = delay.as_millis() as u64, "Reconnecting");

            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = self.shutdown_token.cancelled() => {
                    info!("Shutdown requested during backoff, exiting");
                    self.shared.set_state(ConnectionState::Disconnected);
                    return Ok(());
                }
            }
        }
    }

    async fn on_disconnect(&self) {
        self.shared.set_state(ConnectionState::Reconnecting);
        self.shared.pending.fail_all();
        *self.shared.authorized.write() = None;
        // Requests queued for the dead socket already had their waiters failed.
        let mut rx = self.outbound_rx.lock().await;
        while rx.try_recv().is_ok() {}
        drop(rx);
        if self.push_tx.send(PushMessage::Disconnected).await.is_err() {
            debug!("Push receiver dropped");
        }
    }

    async fn try_connect(&self) -> WsResult<()> {
        let endpoint = self.config.endpoint();
        info!(url = %self.config.url, "Connecting to WebSocket");

        let (ws_stream, _response) = connect_async(endpoint.as_str()).await?;
        let (mut write, mut read) = ws_stream.split();

        self.heartbeat.reset();
        let login_id = self.restore_session(&mut write, &mut read).await?;

        self.shared.set_state(ConnectionState::Connected);
        info!(login_id = ?login_id, "WebSocket connected");
        if self
            .push_tx
            .send(PushMessage::Reconnected(login_id))
            .await
            .is_err()
        {
            debug!("Push receiver dropped");
        }

        loop {
            let outbound_recv = async { self.outbound_rx.lock().await.recv().await };

            tokio::select! {
                () = self.shutdown_token.cancelled() => {
                    info!("Shutdown signal received in message loop");
                    if let Err(e) = write.send(Message::Close(None)).await {
                        warn!(?e, "Failed to send Close frame during shutdown");
                    }
                    return Ok(());
                }

                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.handle_text_message(&text).await?;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let (code, reason) = frame
                                .map(|f| (f.code.into(), f.reason.to_string()))
                                .unwrap_or((1000, "Normal close".to_string()));
                            warn!(code, %reason, "WebSocket closed by server");
                            return Err(WsError::ConnectionClosed { code, reason });
                        }
                        Some(Err(e)) => {
                            error!(?e, "WebSocket read error");
                            return Err(e.into());
                        }
                        None => {
                            warn!("WebSocket stream ended");
                            return Ok(());
                        }
                        _ => {}
                    }
                }

                outbound = outbound_recv => {
                    match outbound {
                        Some(text) => write.send(Message::Text(text)).await?,
                        None => return Err(WsError::SendFailed("outbound channel closed".to_string())),
                    }
                }

                () = self.heartbeat.wait_for_check() => {
                    if self.heartbeat.is_timed_out() {
                        error!("Heartbeat timeout");
                        return Err(WsError::HeartbeatTimeout);
                    }
                    if self.heartbeat.should_send_ping() {
                        let req_id = self.shared.pending.next_req_id();
                        let ping = RequestEnvelope::new(&ApiRequest::ping(), req_id).to_json()?;
                        write.send(Message::Text(ping)).await?;
                        self.heartbeat.record_ping();
                        debug!("Sent heartbeat ping");
                    }
                }
            }
        }
    }

    async fn handle_text_message(&self, text: &str) -> WsResult<()> {
        self.heartbeat.record_message();

        let msg = match IncomingMessage::parse(text) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(error = %e, "Dropping unparseable message");
                return Ok(());
            }
        };

        if msg.msg_type == "ping" {
            self.heartbeat.record_pong();
        }

        let push = msg.to_push();
        if let Some(PushMessage::Contract(update)) = &push {
            if update.is_completed {
                self.shared
                    .contract_subscriptions
                    .lock()
                    .remove(&update.contract_id);
            }
        }

        if let Some(unmatched) = self.shared.pending.complete(msg) {
            if push.is_none() && unmatched.msg_type != "ping" {
                debug!(msg_type = %unmatched.msg_type, "Unrouted message");
            }
        }

        if let Some(push) = push {
            if self.push_tx.send(push).await.is_err() {
                warn!("Push receiver dropped");
            }
        }
        Ok(())
    }

    /// Re-authorize with the last token and restore contract subscriptions.
    ///
    /// Runs before the connection is published as `Connected`, so no trade
    /// request can be sent against an unauthorized socket.
    async fn restore_session(
        &self,
        write: &mut WsSink,
        read: &mut WsSource,
    ) -> WsResult<Option<runbot_core::LoginId>> {
        let token = self.shared.last_token.read().clone();
        let Some(token) = token else {
            return Ok(None);
        };

        let req_id = self.shared.pending.next_req_id();
        let text = RequestEnvelope::new(&ApiRequest::authorize(&token), req_id).to_json()?;
        write.send(Message::Text(text)).await?;

        let timeout = Duration::from_millis(self.config.reauthorize_timeout_ms);
        let response = tokio::time::timeout(timeout, self.read_until(read, req_id))
            .await
            .map_err(|_| WsError::Timeout("re-authorize".to_string()))??;

        let login_id = match response.into_result::<AuthorizeInfo>() {
            Ok(info) => {
                info!(login_id = %info.login_id, "Re-authorized after reconnect");
                let login_id = info.login_id.clone();
                *self.shared.authorized.write() = Some(info);
                Some(login_id)
            }
            Err(api) => {
                error!(code = %api.code, message = %api.message, "Re-authorize rejected");
                *self.shared.last_token.write() = None;
                return Ok(None);
            }
        };

        let contracts: Vec<ContractId> = self
            .shared
            .contract_subscriptions
            .lock()
            .iter()
            .copied()
            .collect();
        for contract_id in contracts {
            let req_id = self.shared.pending.next_req_id();
            let text = RequestEnvelope::new(&ApiRequest::subscribe_contract(contract_id), req_id)
                .to_json()?;
            write.send(Message::Text(text)).await?;
            debug!(%contract_id, "Restored contract subscription");
        }

        Ok(login_id)
    }

    /// Read until the response for `req_id`, handling everything else.
    async fn read_until(&self, read: &mut WsSource, req_id: u64) -> WsResult<IncomingMessage> {
        loop {
            match read.next().await {
                Some(Ok(Message::Text(text))) => {
                    self.heartbeat.record_message();
                    let msg = IncomingMessage::parse(&text)?;
                    if msg.req_id == Some(req_id) {
                        return Ok(msg);
                    }
                    if let Some(push) = msg.to_push() {
                        if self.push_tx.send(push).await.is_err() {
                            warn!("Push receiver dropped");
                        }
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = frame
                        .map(|f| (f.code.into(), f.reason.to_string()))
                        .unwrap_or((1000, "Close during re-authorize".to_string()));
                    return Err(WsError::ConnectionClosed { code, reason });
                }
                Some(Err(e)) => return Err(e.into()),
                None => {
                    return Err(WsError::ConnectionClosed {
                        code: 1006,
                        reason: "Stream ended during re-authorize".to_string(),
                    })
                }
                _ => {}
            }
        }
    }

    fn calculate_backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.config.reconnect_base_delay_ms;
        let max = self.config.reconnect_max_delay_ms;

        // base * 2^(attempt-1), capped
        let exponent = attempt.saturating_sub(1).min(10);
        let delay = base.saturating_mul(1u64 << exponent).min(max);

        Duration::from_millis(delay + rand_jitter(base.min(1000)))
    }
}

/// Random jitter in `0..bound_ms`.
fn rand_jitter(bound_ms: u64) -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    if bound_ms == 0 {
        return 0;
    }
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    u64::from(nanos) % bound_ms
}
