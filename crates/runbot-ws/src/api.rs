//! Brokerage API seam.
//!
//! The trade core talks to the brokerage only through [`BrokerApi`], so the
//! executor and run panel can be driven by [`crate::MockBrokerApi`] in
//! tests and by [`crate::ApiClient`] in production.

use runbot_core::{
    ApiError, BuyReceipt, BuyRequest, ContractId, LoginId, Proposal, Token, TradeIntent,
};
use std::pin::Pin;
use std::sync::Arc;

use crate::message::AuthorizeInfo;

/// Boxed future for dyn-compatible async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

/// Result of a brokerage call, already normalized to `{code, message}`.
pub type ApiResult<T> = Result<T, ApiError>;

/// Operations the trade core needs from the brokerage.
pub trait BrokerApi: Send + Sync {
    /// Authorize the transport with `token`. Resolves only once the server
    /// has answered.
    fn authorize(&self, token: Token) -> BoxFuture<'_, ApiResult<AuthorizeInfo>>;

    fn buy(&self, request: BuyRequest) -> BoxFuture<'_, ApiResult<BuyReceipt>>;

    /// Fetch a live proposal for `intent`.
    fn proposal(&self, intent: TradeIntent) -> BoxFuture<'_, ApiResult<Proposal>>;

    /// Subscribe to `proposal_open_contract` pushes for one contract.
    fn subscribe_contract(&self, contract_id: ContractId) -> BoxFuture<'_, ApiResult<()>>;

    /// Account the transport is currently authorized as. Read fresh on
    /// every call.
    fn authorized_login_id(&self) -> Option<LoginId>;

    fn is_connected(&self) -> bool;

    /// Resolves once the transport is connected (and re-authorized).
    fn wait_connected(&self) -> BoxFuture<'_, ()>;
}

/// Shared trait object.
pub type DynBrokerApi = Arc<dyn BrokerApi>;

/// Opens an independent authorized session for another credential.
pub trait BrokerConnector: Send + Sync {
    fn open(&self, token: Token) -> BoxFuture<'_, ApiResult<DynBrokerApi>>;
}

pub type DynBrokerConnector = Arc<dyn BrokerConnector>;
