//! Brokerage WebSocket transport for runbot.
//!
//! Provides:
//! - Automatic reconnection with exponential backoff and jitter
//! - Re-authorization with the last token before the socket is reported
//!   connected again
//! - Request/response correlation by `req_id`
//! - Application-level heartbeat
//! - The `BrokerApi` seam with a production client and an in-memory mock

pub mod api;
pub mod client;
pub mod connection;
pub mod error;
pub mod heartbeat;
pub mod message;
pub mod mock;
pub mod pending;

pub use api::{ApiResult, BoxFuture, BrokerApi, BrokerConnector, DynBrokerApi, DynBrokerConnector};
pub use client::{ApiClient, WsConnector};
pub use connection::{ConnectionConfig, ConnectionManager, ConnectionState};
pub use error::{WsError, WsResult};
pub use message::{ApiRequest, AuthorizeInfo, IncomingMessage, PushMessage, TransactionPush};
pub use mock::{MockBrokerApi, MockCall, MockConnector, SubscribeBehavior};

use std::sync::Once;

static INIT_CRYPTO: Once = Once::new();

/// Install the TLS crypto provider. Call once before connecting.
pub fn init_crypto() {
    INIT_CRYPTO.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
