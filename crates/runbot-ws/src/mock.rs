//! Scriptable in-memory [`BrokerApi`] for tests.

use parking_lot::{Mutex, RwLock};
use runbot_core::{
    ApiError, BuyReceipt, BuyRequest, ContractId, LoginId, Money, Proposal, Token, TradeIntent,
    TransactionId,
};
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::api::{ApiResult, BoxFuture, BrokerApi, BrokerConnector, DynBrokerApi};
use crate::message::AuthorizeInfo;

/// Recorded call, in submission order.
#[derive(Debug, Clone, PartialEq)]
pub enum MockCall {
    Authorize {
        login_id: Option<LoginId>,
    },
    Buy {
        request: BuyRequest,
        /// Account the transport was authorized as when the buy was sent.
        authorized_as: Option<LoginId>,
    },
    Proposal {
        intent: TradeIntent,
    },
    Subscribe {
        contract_id: ContractId,
    },
}

/// Scripted behaviour of one `subscribe_contract` call.
#[derive(Debug, Clone)]
pub enum SubscribeBehavior {
    Ok,
    Fail(ApiError),
    /// Never answers.
    Hang,
}

/// In-memory brokerage.
///
/// Unscripted buys succeed with sequential ids; unscripted proposals quote
/// the intent's amount.
pub struct MockBrokerApi {
    accounts: RwLock<HashMap<String, LoginId>>,
    authorized: RwLock<Option<LoginId>>,
    connected: watch::Sender<bool>,
    calls: Mutex<Vec<MockCall>>,
    buy_results: Mutex<VecDeque<ApiResult<BuyReceipt>>>,
    proposal_results: Mutex<VecDeque<ApiResult<Proposal>>>,
    subscribe_behaviors: Mutex<VecDeque<SubscribeBehavior>>,
    authorize_delay: Mutex<Duration>,
    next_id: AtomicU64,
    start_time: AtomicU64,
}

impl Default for MockBrokerApi {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBrokerApi {
    pub fn new() -> Self {
        let (connected, _) = watch::channel(true);
        Self {
            accounts: RwLock::new(HashMap::new()),
            authorized: RwLock::new(None),
            connected,
            calls: Mutex::new(Vec::new()),
            buy_results: Mutex::new(VecDeque::new()),
            proposal_results: Mutex::new(VecDeque::new()),
            subscribe_behaviors: Mutex::new(VecDeque::new()),
            authorize_delay: Mutex::new(Duration::ZERO),
            next_id: AtomicU64::new(1),
            start_time: AtomicU64::new(1_700_000_000),
        }
    }

    /// Make `token` authorize as `login_id`.
    pub fn add_account(&self, token: &str, login_id: &str) {
        if let Ok(id) = LoginId::new(login_id) {
            self.accounts.write().insert(token.to_string(), id);
        }
    }

    /// Pretend the transport is already authorized.
    pub fn set_authorized(&self, login_id: Option<&str>) {
        *self.authorized.write() = login_id.and_then(|id| LoginId::new(id).ok());
    }

    pub fn set_authorize_delay(&self, delay: Duration) {
        *self.authorize_delay.lock() = delay;
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.send_replace(connected);
    }

    /// Unix seconds reported as the start time of the next buys.
    pub fn set_start_time(&self, secs: u64) {
        self.start_time.store(secs, Ordering::SeqCst);
    }

    pub fn push_buy_result(&self, result: ApiResult<BuyReceipt>) {
        self.buy_results.lock().push_back(result);
    }

    pub fn push_buy_error(&self, code: &str, message: &str) {
        self.push_buy_result(Err(ApiError::new(code, message)));
    }

    pub fn push_proposal_result(&self, result: ApiResult<Proposal>) {
        self.proposal_results.lock().push_back(result);
    }

    pub fn push_subscribe_behavior(&self, behavior: SubscribeBehavior) {
        self.subscribe_behaviors.lock().push_back(behavior);
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().clone()
    }

    pub fn buys(&self) -> Vec<(BuyRequest, Option<LoginId>)> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                MockCall::Buy {
                    request,
                    authorized_as,
                } => Some((request.clone(), authorized_as.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn subscribe_count(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| matches!(c, MockCall::Subscribe { .. }))
            .count()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    fn next_receipt(&self, request: &BuyRequest) -> BuyReceipt {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let price = request.price();
        BuyReceipt {
            contract_id: ContractId(1000 + n),
            transaction_id: TransactionId(2000 + n * 2),
            buy_price: price,
            payout: price * Decimal::new(195, 2),
            start_time: self.start_time.load(Ordering::SeqCst),
            longcode: String::new(),
            balance_after: None,
        }
    }
}

impl BrokerApi for MockBrokerApi {
    fn authorize(&self, token: Token) -> BoxFuture<'_, ApiResult<AuthorizeInfo>> {
        Box::pin(async move {
            let delay = *self.authorize_delay.lock();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let login_id = self.accounts.read().get(token.expose()).cloned();
            self.calls.lock().push(MockCall::Authorize {
                login_id: login_id.clone(),
            });
            match login_id {
                Some(login_id) => {
                    *self.authorized.write() = Some(login_id.clone());
                    Ok(AuthorizeInfo {
                        login_id,
                        balance: Money::new(Decimal::new(10000, 0)),
                        currency: "USD".to_string(),
                        is_virtual: 0,
                    })
                }
                None => {
                    *self.authorized.write() = None;
                    Err(ApiError::new("InvalidToken", "The token is invalid."))
                }
            }
        })
    }

    fn buy(&self, request: BuyRequest) -> BoxFuture<'_, ApiResult<BuyReceipt>> {
        Box::pin(async move {
            if !*self.connected.borrow() {
                return Err(ApiError::disconnect("mock transport disconnected"));
            }
            self.calls.lock().push(MockCall::Buy {
                request: request.clone(),
                authorized_as: self.authorized.read().clone(),
            });
            let scripted = self.buy_results.lock().pop_front();
            match scripted {
                Some(result) => result,
                None => Ok(self.next_receipt(&request)),
            }
        })
    }

    fn proposal(&self, intent: TradeIntent) -> BoxFuture<'_, ApiResult<Proposal>> {
        Box::pin(async move {
            self.calls.lock().push(MockCall::Proposal {
                intent: intent.clone(),
            });
            let scripted = self.proposal_results.lock().pop_front();
            match scripted {
                Some(result) => result,
                None => {
                    let n = self.next_id.fetch_add(1, Ordering::SeqCst);
                    Ok(Proposal {
                        id: format!("prop-{n}"),
                        ask_price: intent.amount,
                        payout: intent.amount * Decimal::new(195, 2),
                        contract_type: intent.contract_type.clone(),
                        symbol: intent.symbol.clone(),
                    })
                }
            }
        })
    }

    fn subscribe_contract(&self, contract_id: ContractId) -> BoxFuture<'_, ApiResult<()>> {
        Box::pin(async move {
            self.calls.lock().push(MockCall::Subscribe { contract_id });
            let behavior = self
                .subscribe_behaviors
                .lock()
                .pop_front()
                .unwrap_or(SubscribeBehavior::Ok);
            match behavior {
                SubscribeBehavior::Ok => Ok(()),
                SubscribeBehavior::Fail(e) => Err(e),
                SubscribeBehavior::Hang => std::future::pending().await,
            }
        })
    }

    fn authorized_login_id(&self) -> Option<LoginId> {
        self.authorized.read().clone()
    }

    fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    fn wait_connected(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let mut rx = self.connected.subscribe();
            let _ = rx.wait_for(|c| *c).await;
        })
    }
}

/// Connector handing out one [`MockBrokerApi`] per follower token.
#[derive(Default)]
pub struct MockConnector {
    sessions: Mutex<HashMap<String, Arc<MockBrokerApi>>>,
    failing: RwLock<Vec<String>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `open` fail for `token`.
    pub fn fail_token(&self, token: &str) {
        self.failing.write().push(token.to_string());
    }

    /// Session opened for `token`, if any.
    pub fn session(&self, token: &str) -> Option<Arc<MockBrokerApi>> {
        self.sessions.lock().get(token).cloned()
    }
}

impl BrokerConnector for MockConnector {
    fn open(&self, token: Token) -> BoxFuture<'_, ApiResult<DynBrokerApi>> {
        Box::pin(async move {
            if self.failing.read().iter().any(|t| t == token.expose()) {
                return Err(ApiError::new("InvalidToken", "The token is invalid."));
            }
            let session = Arc::clone(
                self.sessions
                    .lock()
                    .entry(token.expose().to_string())
                    .or_insert_with(|| {
                        let api = MockBrokerApi::new();
                        let login = format!("CR{}", token.expose().len() + 9000);
                        api.add_account(token.expose(), &login);
                        Arc::new(api)
                    }),
            );
            session.authorize(token).await?;
            Ok(session as DynBrokerApi)
        })
    }
}
