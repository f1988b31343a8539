//! WebSocket lifecycle integration tests.
//!
//! Tests the connection lifecycle:
//! - Connection establishment
//! - Authorization over the socket
//! - Buy round trip and contract pushes

mod integration;
use integration::common::mock_broker::MockBroker;

use runbot_core::{
    Basis, BuyRequest, ContractId, ContractType, DurationUnit, LoginId, Money, Token, TradeIntent,
};
use runbot_ws::{BrokerApi, ConnectionConfig, ConnectionManager, PushMessage};
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

fn start_manager(url: String) -> (Arc<ConnectionManager>, mpsc::Receiver<PushMessage>) {
    let config = ConnectionConfig {
        url,
        max_reconnect_attempts: 3,
        ..Default::default()
    };
    let (push_tx, push_rx) = mpsc::channel::<PushMessage>(100);
    let manager = Arc::new(ConnectionManager::new(config, push_tx));
    let runner = manager.clone();
    tokio::spawn(async move {
        let _ = runner.connect().await;
    });
    (manager, push_rx)
}

/// Test that ConnectionManager connects and reports the connection.
#[tokio::test]
async fn test_ws_connects_to_server() {
    let server = MockBroker::start("CR100", "tok-100").await;
    let (manager, mut push_rx) = start_manager(server.url());
    let client = manager.client();

    let connected = timeout(Duration::from_secs(2), client.wait_connected()).await;
    assert!(connected.is_ok(), "Should connect within timeout");
    assert_eq!(server.connection_count().await, 1);

    // First connection has no token to restore
    let push = timeout(Duration::from_secs(1), push_rx.recv()).await.unwrap();
    assert_eq!(push, Some(PushMessage::Reconnected(None)));

    manager.shutdown();
    server.shutdown().await;
}

#[tokio::test]
async fn test_authorize_round_trip() {
    let server = MockBroker::start("CR100", "tok-100").await;
    let (manager, _push_rx) = start_manager(server.url());
    let client = manager.client();
    timeout(Duration::from_secs(2), client.wait_connected())
        .await
        .unwrap();

    let rejected = client.authorize(Token::new("wrong")).await;
    assert_eq!(rejected.unwrap_err().code, "InvalidToken");
    assert_eq!(client.authorized_login_id(), None);

    let info = client.authorize(Token::new("tok-100")).await.unwrap();
    assert_eq!(info.login_id.as_str(), "CR100");
    assert_eq!(
        client.authorized_login_id(),
        Some(LoginId::new("CR100").unwrap())
    );

    let sent = server.received_with("authorize").await;
    assert_eq!(sent.len(), 2);
    assert!(sent.iter().all(|m| m.get("req_id").is_some()));

    manager.shutdown();
    server.shutdown().await;
}

#[tokio::test]
async fn test_buy_receives_settlement_pushes() {
    let server = MockBroker::start("CR100", "tok-100").await;
    server.set_outcomes(&[true]).await;
    let (manager, mut push_rx) = start_manager(server.url());
    let client = manager.client();
    timeout(Duration::from_secs(2), client.wait_connected())
        .await
        .unwrap();
    client.authorize(Token::new("tok-100")).await.unwrap();

    let intent = TradeIntent {
        contract_type: ContractType::new("CALL"),
        symbol: "R_100".to_string(),
        amount: Money::new(dec!(2)),
        duration: 5,
        duration_unit: DurationUnit::Ticks,
        prediction: None,
        currency: "USD".to_string(),
        basis: Basis::Stake,
    };
    let receipt = client
        .buy(BuyRequest::Direct {
            price: intent.amount,
            parameters: intent.to_parameters(),
        })
        .await
        .unwrap();
    assert_eq!(receipt.contract_id, ContractId(5000));
    assert_eq!(receipt.buy_price, Money::new(dec!(2)));

    let sold = timeout(Duration::from_secs(2), async {
        while let Some(push) = push_rx.recv().await {
            if let PushMessage::Contract(update) = push {
                if update.is_sold {
                    return Some(update);
                }
            }
        }
        None
    })
    .await
    .unwrap()
    .expect("sold update");
    assert_eq!(sold.contract_id, ContractId(5000));
    assert_eq!(sold.profit, Money::new(dec!(1.90)));
    assert!(sold.transaction_ids.sell.is_some());

    let buys = server.received_with("buy").await;
    assert_eq!(buys.len(), 1);
    assert_eq!(buys[0]["buy"], "1");
    assert_eq!(buys[0]["parameters"]["underlying_symbol"], "R_100");

    manager.shutdown();
    server.shutdown().await;
}
