//! Mock brokerage WebSocket server for integration tests.
//!
//! Provides a simple WebSocket server that can:
//! - Accept connections
//! - Answer authorize, balance, proposal, buy, contract subscription and
//!   ping requests, echoing `req_id`
//! - Settle every bought contract right away with a scripted outcome
//! - Record received messages

use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::{accept_async, tungstenite::Message};

const FIRST_CONTRACT_ID: u64 = 5000;
const FIRST_TRANSACTION_ID: u64 = 9000;

#[derive(Default)]
struct BrokerState {
    messages: Vec<Value>,
    connections: u32,
    /// Win/loss of the next contracts. Missing entries lose.
    outcomes: VecDeque<bool>,
    contracts: u64,
    proposals: u64,
}

/// A mock brokerage server for testing.
pub struct MockBroker {
    addr: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
    state: Arc<Mutex<BrokerState>>,
}

impl MockBroker {
    /// Start a server accepting `token` for `login_id`.
    pub async fn start(login_id: &str, token: &str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(Mutex::new(BrokerState::default()));
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let account = Arc::new((login_id.to_string(), token.to_string()));
        let state_clone = state.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Ok((stream, _)) = listener.accept() => {
                        tokio::spawn(handle_connection(stream, state_clone.clone(), account.clone()));
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }
        });

        Self {
            addr,
            shutdown_tx,
            state,
        }
    }

    /// Get the server's WebSocket URL.
    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Script the outcomes of the next contracts.
    pub async fn set_outcomes(&self, outcomes: &[bool]) {
        self.state.lock().await.outcomes = outcomes.iter().copied().collect();
    }

    pub async fn connection_count(&self) -> u32 {
        self.state.lock().await.connections
    }

    /// All received requests.
    pub async fn received(&self) -> Vec<Value> {
        self.state.lock().await.messages.clone()
    }

    /// Received requests carrying `key`.
    pub async fn received_with(&self, key: &str) -> Vec<Value> {
        self.received()
            .await
            .into_iter()
            .filter(|m| m.get(key).is_some())
            .collect()
    }

    /// Shutdown the server.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

fn decimal(value: &Value) -> Decimal {
    match value {
        Value::String(s) => Decimal::from_str(s).unwrap(),
        Value::Number(n) => Decimal::from_str(&n.to_string()).unwrap(),
        other => panic!("not a decimal: {other}"),
    }
}

fn reply(msg_type: &str, req_id: &Value, payload: Value) -> String {
    json!({ "msg_type": msg_type, "req_id": req_id, msg_type: payload }).to_string()
}

fn open_contract(contract_id: u64, buy_tx: u64, price: Decimal, now: u64) -> Value {
    json!({
        "contract_id": contract_id,
        "transaction_ids": { "buy": buy_tx },
        "buy_price": price.to_string(),
        "payout": (price * Decimal::new(195, 2)).to_string(),
        "profit": "0",
        "currency": "USD",
        "is_sold": 0,
        "is_expired": 0,
        "status": "open",
        "date_start": now,
        "contract_type": "CALL",
        "underlying": "R_100"
    })
}

async fn handle_connection(
    stream: TcpStream,
    state: Arc<Mutex<BrokerState>>,
    account: Arc<(String, String)>,
) {
    state.lock().await.connections += 1;

    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            eprintln!("WebSocket handshake failed: {}", e);
            return;
        }
    };

    let (mut write, mut read) = ws_stream.split();
    let (login_id, token) = (&account.0, &account.1);

    while let Some(msg) = read.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Ping(data)) => {
                let _ = write.send(Message::Pong(data)).await;
                continue;
            }
            Ok(Message::Close(_)) | Err(_) => break,
            _ => continue,
        };
        let Ok(request) = serde_json::from_str::<Value>(&text) else {
            continue;
        };
        state.lock().await.messages.push(request.clone());
        let req_id = request.get("req_id").cloned().unwrap_or(Value::Null);

        let mut outgoing: Vec<String> = Vec::new();
        if let Some(given) = request.get("authorize").and_then(Value::as_str) {
            if given == token {
                outgoing.push(reply(
                    "authorize",
                    &req_id,
                    json!({ "loginid": login_id, "balance": "1000", "currency": "USD", "is_virtual": 0 }),
                ));
            } else {
                outgoing.push(
                    json!({
                        "msg_type": "authorize",
                        "req_id": req_id,
                        "error": { "code": "InvalidToken", "message": "The token is invalid." }
                    })
                    .to_string(),
                );
            }
        } else if request.get("balance").is_some() {
            outgoing.push(reply(
                "balance",
                &req_id,
                json!({ "balance": "1000", "currency": "USD", "loginid": login_id }),
            ));
        } else if request.get("proposal").is_some() {
            let amount = decimal(&request["amount"]);
            let n = {
                let mut s = state.lock().await;
                s.proposals += 1;
                s.proposals
            };
            outgoing.push(reply(
                "proposal",
                &req_id,
                json!({
                    "id": format!("prop-{n}"),
                    "ask_price": amount.to_string(),
                    "payout": (amount * Decimal::new(195, 2)).to_string()
                }),
            ));
        } else if request.get("buy").is_some() {
            let price = decimal(&request["price"]);
            let (n, won) = {
                let mut s = state.lock().await;
                let n = s.contracts;
                s.contracts += 1;
                (n, s.outcomes.pop_front().unwrap_or(false))
            };
            let contract_id = FIRST_CONTRACT_ID + n;
            let buy_tx = FIRST_TRANSACTION_ID + 2 * n;
            let now = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_secs();

            outgoing.push(reply(
                "buy",
                &req_id,
                json!({
                    "contract_id": contract_id,
                    "transaction_id": buy_tx,
                    "buy_price": price.to_string(),
                    "payout": (price * Decimal::new(195, 2)).to_string(),
                    "start_time": now,
                    "longcode": "Win payout if the market rises."
                }),
            ));

            let open = open_contract(contract_id, buy_tx, price, now);
            outgoing.push(json!({ "msg_type": "proposal_open_contract", "proposal_open_contract": open }).to_string());

            let profit = if won {
                price * Decimal::new(95, 2)
            } else {
                -price
            };
            let mut sold = open_contract(contract_id, buy_tx, price, now);
            sold["transaction_ids"]["sell"] = json!(buy_tx + 1);
            sold["profit"] = json!(profit.to_string());
            sold["is_sold"] = json!(1);
            sold["is_expired"] = json!(1);
            sold["status"] = json!(if won { "won" } else { "lost" });
            outgoing.push(json!({ "msg_type": "proposal_open_contract", "proposal_open_contract": sold }).to_string());
        } else if request.get("proposal_open_contract").is_some() {
            outgoing.push(reply("proposal_open_contract", &req_id, json!({})));
        } else if request.get("ping").is_some() {
            outgoing.push(reply("ping", &req_id, json!("pong")));
        }

        for text in outgoing {
            if write.send(Message::Text(text)).await.is_err() {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_broker_starts() {
        let server = MockBroker::start("CR100", "tok").await;
        assert!(server.url().starts_with("ws://127.0.0.1:"));
        server.shutdown().await;
    }
}
