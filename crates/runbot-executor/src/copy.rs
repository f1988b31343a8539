//! Copy-trading relay.
//!
//! Replays every leader buy on each follower credential stored under
//! `copyTokensArray`. Followers get their own transport session and always
//! buy with full parameters, since a proposal id is only valid on the
//! session that requested it. Follower failures never reach the leader.

use futures_util::future::join_all;
use parking_lot::Mutex;
use runbot_core::{BotEvent, BuyRequest, EventBus, EventName, LoginId, ReplicatedBuy, Subscription, Token};
use runbot_persistence::keys::COPY_TOKENS_ARRAY;
use runbot_persistence::{SessionStore, SessionStoreExt};
use runbot_telemetry::Metrics;
use runbot_ws::{ApiResult, DynBrokerApi, DynBrokerConnector};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const RELAY_QUEUE: usize = 64;

/// Result of replaying one leader buy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopySummary {
    pub replicated: usize,
    pub failed: usize,
    /// Followers that are the leader account itself.
    pub skipped: usize,
}

enum FollowerResult {
    Replicated,
    Failed,
    Skipped,
}

pub struct CopyTradeRelay {
    connector: DynBrokerConnector,
    store: Arc<dyn SessionStore>,
    sessions: Mutex<HashMap<Token, DynBrokerApi>>,
}

impl CopyTradeRelay {
    pub fn new(connector: DynBrokerConnector, store: Arc<dyn SessionStore>) -> Self {
        Self {
            connector,
            store,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Follower credentials, deduplicated, in stored order.
    pub fn follower_tokens(&self) -> Vec<Token> {
        let stored: Vec<Token> = self.store.get_or_default(COPY_TOKENS_ARRAY);
        let mut tokens: Vec<Token> = Vec::with_capacity(stored.len());
        for token in stored {
            if !token.is_empty() && !tokens.contains(&token) {
                tokens.push(token);
            }
        }
        tokens
    }

    /// Listen for leader buys on `bus`. Dropping the returned subscription
    /// ends the relay task.
    pub fn start(self: Arc<Self>, bus: &EventBus) -> (Subscription, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<ReplicatedBuy>(RELAY_QUEUE);
        let subscription = bus.register(EventName::ReplicatorPurchase, move |event| {
            if let BotEvent::ReplicatorPurchase(buy) = event {
                if let Err(e) = tx.try_send(buy.clone()) {
                    warn!(error = %e, "Copy-trade queue full, buy not replicated");
                    Metrics::copy_trade("dropped");
                }
            }
        });

        let handle = tokio::spawn(async move {
            while let Some(buy) = rx.recv().await {
                let summary = self.replicate(&buy).await;
                debug!(?summary, "Leader buy replicated");
            }
            debug!("Copy-trade relay stopped");
        });
        (subscription, handle)
    }

    /// Replay `buy` on every follower concurrently.
    pub async fn replicate(&self, buy: &ReplicatedBuy) -> CopySummary {
        let tokens = self.follower_tokens();
        if tokens.is_empty() {
            return CopySummary::default();
        }

        let request = BuyRequest::Direct {
            price: buy.request.price(),
            parameters: buy.intent.to_parameters(),
        };
        let results = join_all(
            tokens
                .into_iter()
                .map(|token| self.replicate_one(token, &buy.login_id, request.clone())),
        )
        .await;

        let mut summary = CopySummary::default();
        for result in results {
            match result {
                FollowerResult::Replicated => summary.replicated += 1,
                FollowerResult::Failed => summary.failed += 1,
                FollowerResult::Skipped => summary.skipped += 1,
            }
        }
        summary
    }

    async fn replicate_one(
        &self,
        token: Token,
        leader: &LoginId,
        request: BuyRequest,
    ) -> FollowerResult {
        let api = match self.session(&token).await {
            Ok(api) => api,
            Err(e) => {
                warn!(code = %e.code, "Follower session unavailable");
                Metrics::copy_trade("session_error");
                return FollowerResult::Failed;
            }
        };

        let follower = api.authorized_login_id();
        if follower.as_ref() == Some(leader) {
            return FollowerResult::Skipped;
        }

        match api.buy(request).await {
            Ok(receipt) => {
                info!(
                    follower = ?follower.as_ref().map(LoginId::as_str),
                    contract_id = %receipt.contract_id,
                    "Follower buy placed"
                );
                Metrics::copy_trade("ok");
                FollowerResult::Replicated
            }
            Err(e) => {
                warn!(
                    follower = ?follower.as_ref().map(LoginId::as_str),
                    code = %e.code,
                    "Follower buy failed"
                );
                if e.is_disconnect() {
                    self.sessions.lock().remove(&token);
                }
                Metrics::copy_trade("error");
                FollowerResult::Failed
            }
        }
    }

    async fn session(&self, token: &Token) -> ApiResult<DynBrokerApi> {
        let cached = self
            .sessions
            .lock()
            .get(token)
            .filter(|api| api.is_connected())
            .cloned();
        if let Some(api) = cached {
            return Ok(api);
        }
        let api = self.connector.open(token.clone()).await?;
        self.sessions.lock().insert(token.clone(), Arc::clone(&api));
        Ok(api)
    }
}
