//! Production [`BrokerApi`] over a [`ConnectionManager`].

use runbot_core::{ApiError, BuyReceipt, BuyRequest, ContractId, LoginId, Proposal, Token, TradeIntent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::{ApiResult, BoxFuture, BrokerApi, BrokerConnector, DynBrokerApi};
use crate::connection::{ConnectionConfig, ConnectionManager, ConnectionState, SharedSession};
use crate::error::WsError;
use crate::message::{
    ApiRequest, AuthorizeInfo, BuyPayload, IncomingMessage, ProposalPayload, RequestEnvelope,
};

/// Request/response client. Clones share one connection.
#[derive(Clone)]
pub struct ApiClient {
    shared: Arc<SharedSession>,
    request_timeout: Duration,
}

impl ApiClient {
    pub(crate) fn new(shared: Arc<SharedSession>, request_timeout: Duration) -> Self {
        Self {
            shared,
            request_timeout,
        }
    }

    /// Send `request` and await the response with the matching req_id.
    pub async fn request(&self, request: ApiRequest) -> ApiResult<IncomingMessage> {
        if self.shared.state() != ConnectionState::Connected {
            return Err(WsError::NotConnected.into());
        }

        let kind = request.kind();
        let (req_id, rx) = self.shared.pending.create(kind);
        let text = match RequestEnvelope::new(&request, req_id).to_json() {
            Ok(text) => text,
            Err(e) => {
                self.shared.pending.cancel(req_id);
                return Err(e.into());
            }
        };

        if self.shared.outbound_tx.send(text).await.is_err() {
            self.shared.pending.cancel(req_id);
            return Err(WsError::SendFailed("outbound channel closed".to_string()).into());
        }
        debug!(req_id, kind, "Request queued");

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(msg)) => Ok(msg),
            Ok(Err(_)) => Err(ApiError::disconnect(format!("{kind} interrupted by disconnect"))),
            Err(_) => {
                self.shared.pending.cancel(req_id);
                Err(WsError::Timeout(kind.to_string()).into())
            }
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }
}

impl BrokerApi for ApiClient {
    fn authorize(&self, token: Token) -> BoxFuture<'_, ApiResult<AuthorizeInfo>> {
        Box::pin(async move {
            let response = self.request(ApiRequest::authorize(&token)).await?;
            match response.into_result::<AuthorizeInfo>() {
                Ok(info) => {
                    info!(login_id = %info.login_id, currency = %info.currency, "Authorized");
                    *self.shared.authorized.write() = Some(info.clone());
                    *self.shared.last_token.write() = Some(token);
                    Ok(info)
                }
                Err(e) => {
                    warn!(code = %e.code, "Authorize rejected");
                    *self.shared.authorized.write() = None;
                    Err(e)
                }
            }
        })
    }

    fn buy(&self, request: BuyRequest) -> BoxFuture<'_, ApiResult<BuyReceipt>> {
        Box::pin(async move {
            let response = self.request(ApiRequest::buy(&request)).await?;
            response.into_result::<BuyPayload>().map(BuyReceipt::from)
        })
    }

    fn proposal(&self, intent: TradeIntent) -> BoxFuture<'_, ApiResult<Proposal>> {
        Box::pin(async move {
            let response = self.request(ApiRequest::proposal(&intent)).await?;
            response
                .into_result::<ProposalPayload>()
                .map(|p| p.into_proposal(&intent))
        })
    }

    fn subscribe_contract(&self, contract_id: ContractId) -> BoxFuture<'_, ApiResult<()>> {
        Box::pin(async move {
            let response = self
                .request(ApiRequest::subscribe_contract(contract_id))
                .await?;
            if let Some(error) = response.error {
                return Err(error);
            }
            self.shared.contract_subscriptions.lock().insert(contract_id);
            Ok(())
        })
    }

    fn authorized_login_id(&self) -> Option<LoginId> {
        self.shared
            .authorized
            .read()
            .as_ref()
            .map(|info| info.login_id.clone())
    }

    fn is_connected(&self) -> bool {
        self.shared.state() == ConnectionState::Connected
    }

    fn wait_connected(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let mut rx = self.shared.state.subscribe();
            if rx
                .wait_for(|state| *state == ConnectionState::Connected)
                .await
                .is_err()
            {
                warn!("Connection state channel closed while waiting");
            }
        })
    }
}

/// Opens a dedicated connection per follower credential.
pub struct WsConnector {
    config: ConnectionConfig,
    shutdown_token: CancellationToken,
    connect_timeout: Duration,
}

impl WsConnector {
    pub fn new(config: ConnectionConfig, shutdown_token: CancellationToken) -> Self {
        let connect_timeout = Duration::from_millis(config.request_timeout_ms);
        Self {
            config,
            shutdown_token,
            connect_timeout,
        }
    }
}

impl BrokerConnector for WsConnector {
    fn open(&self, token: Token) -> BoxFuture<'_, ApiResult<DynBrokerApi>> {
        Box::pin(async move {
            let (push_tx, mut push_rx) = mpsc::channel(64);
            let manager = Arc::new(ConnectionManager::with_shutdown(
                self.config.clone(),
                push_tx,
                self.shutdown_token.child_token(),
            ));
            let client = manager.client();

            let runner = Arc::clone(&manager);
            tokio::spawn(async move {
                if let Err(e) = runner.connect().await {
                    warn!(error = %e, "Follower connection ended");
                }
            });
            // Follower pushes are not routed anywhere.
            tokio::spawn(async move { while push_rx.recv().await.is_some() {} });

            if tokio::time::timeout(self.connect_timeout, client.wait_connected())
                .await
                .is_err()
            {
                manager.shutdown();
                return Err(ApiError::disconnect("follower connection timed out"));
            }
            if let Err(e) = client.authorize(token).await {
                manager.shutdown();
                return Err(e);
            }
            Ok(Arc::new(client) as DynBrokerApi)
        })
    }
}
