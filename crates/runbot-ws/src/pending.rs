//! Request/response correlation by `req_id`.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::message::IncomingMessage;

#[derive(Debug)]
struct PendingRequest {
    kind: &'static str,
    tx: oneshot::Sender<IncomingMessage>,
}

/// In-flight requests awaiting their response.
///
/// Dropping a request's sender (on disconnect) wakes its receiver with an
/// error, which callers treat as `DisconnectError`.
#[derive(Debug)]
pub struct PendingRequests {
    pending: DashMap<u64, PendingRequest>,
    next_req_id: AtomicU64,
}

impl Default for PendingRequests {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingRequests {
    #[must_use]
    pub fn new() -> Self {
        Self {
            pending: DashMap::new(),
            next_req_id: AtomicU64::new(1),
        }
    }

    /// Allocate a req_id without registering a waiter.
    pub fn next_req_id(&self) -> u64 {
        self.next_req_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Register a request. Returns its req_id and the response receiver.
    pub fn create(&self, kind: &'static str) -> (u64, oneshot::Receiver<IncomingMessage>) {
        let req_id = self.next_req_id();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(req_id, PendingRequest { kind, tx });
        (req_id, rx)
    }

    /// Route a response to its waiter.
    ///
    /// Returns the message back when no waiter matches (pushes, late
    /// responses).
    pub fn complete(&self, msg: IncomingMessage) -> Option<IncomingMessage> {
        let Some(req_id) = msg.req_id else {
            return Some(msg);
        };
        match self.pending.remove(&req_id) {
            Some((_, request)) => {
                debug!(req_id, kind = request.kind, "Response matched");
                if request.tx.send(msg).is_err() {
                    debug!(req_id, "Waiter dropped before response");
                }
                None
            }
            None => Some(msg),
        }
    }

    /// Forget a request whose waiter gave up.
    pub fn cancel(&self, req_id: u64) {
        self.pending.remove(&req_id);
    }

    /// Drop every waiter. Returns how many were pending.
    pub fn fail_all(&self) -> usize {
        let count = self.pending.len();
        if count > 0 {
            warn!(count, "Failing in-flight requests on disconnect");
        }
        self.pending.clear();
        count
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn response(req_id: Option<u64>) -> IncomingMessage {
        IncomingMessage {
            msg_type: "ping".to_string(),
            req_id,
            error: None,
            payload: Value::String("pong".to_string()),
        }
    }

    #[tokio::test]
    async fn test_response_reaches_waiter() {
        let pending = PendingRequests::new();
        let (req_id, rx) = pending.create("ping");

        assert!(pending.complete(response(Some(req_id))).is_none());
        let msg = rx.await.unwrap();
        assert_eq!(msg.req_id, Some(req_id));
        assert_eq!(pending.pending_count(), 0);
    }

    #[test]
    fn test_unmatched_messages_are_returned() {
        let pending = PendingRequests::new();
        assert!(pending.complete(response(None)).is_some());
        assert!(pending.complete(response(Some(99))).is_some());
    }

    #[tokio::test]
    async fn test_fail_all_wakes_waiters_with_error() {
        let pending = PendingRequests::new();
        let (_, rx1) = pending.create("buy");
        let (_, rx2) = pending.create("proposal");

        assert_eq!(pending.fail_all(), 2);
        assert!(rx1.await.is_err());
        assert!(rx2.await.is_err());
    }

    #[test]
    fn test_req_ids_are_monotonic() {
        let pending = PendingRequests::new();
        let (a, _rx_a) = pending.create("a");
        let (b, _rx_b) = pending.create("b");
        assert!(b > a);
    }
}
