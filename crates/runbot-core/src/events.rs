//! In-process event bus with explicit subscription handles.
//!
//! `register` returns a [`Subscription`]; dropping or disposing it removes
//! the listener. Several listeners may share one event name and each is
//! removed only through its own handle.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::trace;

use crate::account::LoginId;
use crate::contract::{ContractId, RunId};
use crate::decimal::Money;
use crate::error::ApiError;
use crate::trade::{BuyRequest, TradeIntent};

/// Named event channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventName {
    BotRunning,
    BotStop,
    ContractStatus,
    ReplicatorPurchase,
    Journal,
    LoginPrompt,
}

impl EventName {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BotRunning => "bot.running",
            Self::BotStop => "bot.stop",
            Self::ContractStatus => "contract.status",
            Self::ReplicatorPurchase => "replicator.purchase",
            Self::Journal => "journal",
            Self::LoginPrompt => "login.prompt",
        }
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Contract progress reported on `contract.status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ContractStatusEvent {
    PurchaseSent {
        amount: Money,
    },
    PurchaseReceived {
        contract_id: ContractId,
        buy_price: Money,
    },
    ContractSold {
        contract_id: ContractId,
        profit: Money,
    },
}

/// Exact buy request, published before the buy response is awaited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicatedBuy {
    pub login_id: LoginId,
    pub request: BuyRequest,
    pub intent: TradeIntent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JournalLevel {
    Info,
    Success,
    Warn,
    Error,
}

/// User-visible journal line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalMessage {
    pub level: JournalLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub timestamp_ms: u64,
}

impl JournalMessage {
    pub fn new(level: JournalLevel, message: impl Into<String>, timestamp_ms: u64) -> Self {
        Self {
            level,
            message: message.into(),
            code: None,
            timestamp_ms,
        }
    }

    pub fn from_error(error: &ApiError, timestamp_ms: u64) -> Self {
        Self {
            level: JournalLevel::Error,
            message: error.message.clone(),
            code: Some(error.code.clone()),
            timestamp_ms,
        }
    }
}

/// Event payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BotEvent {
    BotRunning { run_id: RunId },
    BotStop { run_id: Option<RunId>, error: Option<ApiError> },
    ContractStatus(ContractStatusEvent),
    ReplicatorPurchase(ReplicatedBuy),
    Journal(JournalMessage),
    LoginPrompt,
}

impl BotEvent {
    pub fn name(&self) -> EventName {
        match self {
            Self::BotRunning { .. } => EventName::BotRunning,
            Self::BotStop { .. } => EventName::BotStop,
            Self::ContractStatus(_) => EventName::ContractStatus,
            Self::ReplicatorPurchase(_) => EventName::ReplicatorPurchase,
            Self::Journal(_) => EventName::Journal,
            Self::LoginPrompt => EventName::LoginPrompt,
        }
    }
}

type Listener = Arc<dyn Fn(&BotEvent) + Send + Sync>;

#[derive(Default)]
struct BusInner {
    listeners: RwLock<HashMap<EventName, Vec<(u64, Listener)>>>,
    next_id: AtomicU64,
}

impl BusInner {
    fn unregister(&self, name: EventName, id: u64) {
        let mut listeners = self.listeners.write();
        if let Some(list) = listeners.get_mut(&name) {
            list.retain(|(lid, _)| *lid != id);
            if list.is_empty() {
                listeners.remove(&name);
            }
        }
    }
}

/// Cloneable handle to the shared bus.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener for `name`.
    pub fn register<F>(&self, name: EventName, listener: F) -> Subscription
    where
        F: Fn(&BotEvent) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .listeners
            .write()
            .entry(name)
            .or_default()
            .push((id, Arc::new(listener)));
        trace!(event = %name, id, "Listener registered");
        Subscription {
            bus: Arc::downgrade(&self.inner),
            name,
            id,
            active: true,
        }
    }

    /// Deliver `event` to every listener of its name.
    ///
    /// Listeners are called outside the lock, so a listener may register or
    /// dispose subscriptions.
    pub fn emit(&self, event: BotEvent) {
        let name = event.name();
        let listeners: Vec<Listener> = match self.inner.listeners.read().get(&name) {
            Some(list) => list.iter().map(|(_, l)| Arc::clone(l)).collect(),
            None => return,
        };
        for listener in listeners {
            listener(&event);
        }
    }

    pub fn listener_count(&self, name: EventName) -> usize {
        self.inner
            .listeners
            .read()
            .get(&name)
            .map_or(0, Vec::len)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let listeners = self.inner.listeners.read();
        f.debug_struct("EventBus")
            .field("names", &listeners.len())
            .finish()
    }
}

/// Registration handle. Unregisters on drop.
#[must_use = "dropping a Subscription immediately unregisters the listener"]
pub struct Subscription {
    bus: Weak<BusInner>,
    name: EventName,
    id: u64,
    active: bool,
}

impl Subscription {
    pub fn name(&self) -> EventName {
        self.name
    }

    /// Unregister now.
    pub fn dispose(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        if let Some(bus) = self.bus.upgrade() {
            bus.unregister(self.name, self.id);
            trace!(event = %self.name, id = self.id, "Listener disposed");
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("name", &self.name)
            .field("id", &self.id)
            .field("active", &self.active)
            .finish()
    }
}
