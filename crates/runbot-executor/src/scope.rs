//! Purchase scope tracker.
//!
//! Guards the purchase window: a buy may only start from
//! `BeforePurchase`, and the move to `DuringPurchase` is a single atomic
//! step, so duplicate triggers cannot submit twice. Changes are broadcast
//! on a watch channel so recovery can wait for the window to reopen.

use runbot_core::PurchaseScope;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Scope plus whether proposals for the next buy are ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScopeState {
    pub scope: PurchaseScope,
    pub proposals_ready: bool,
}

#[derive(Debug)]
pub struct ScopeTracker {
    tx: watch::Sender<ScopeState>,
}

impl Default for ScopeTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ScopeTracker {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ScopeState::default());
        Self { tx }
    }

    #[must_use]
    pub fn state(&self) -> ScopeState {
        *self.tx.borrow()
    }

    #[must_use]
    pub fn scope(&self) -> PurchaseScope {
        self.tx.borrow().scope
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ScopeState> {
        self.tx.subscribe()
    }

    /// Open the window for the next purchase.
    pub fn set_before_purchase(&self) {
        self.tx.send_if_modified(|s| {
            if s.scope == PurchaseScope::BeforePurchase {
                return false;
            }
            s.scope = PurchaseScope::BeforePurchase;
            true
        });
        debug!("Purchase scope: before_purchase");
    }

    /// Atomically claim the window. Returns `false` if no purchase may
    /// start now.
    pub fn try_begin_purchase(&self) -> bool {
        let mut begun = false;
        self.tx.send_if_modified(|s| {
            if s.scope != PurchaseScope::BeforePurchase {
                return false;
            }
            s.scope = PurchaseScope::DuringPurchase;
            begun = true;
            true
        });
        begun
    }

    /// Reopen the window after a failed attempt. Proposals must be
    /// rebuilt before the window counts as ready. A stop issued in the
    /// meantime is kept.
    pub fn reopen(&self) -> bool {
        let mut reopened = false;
        self.tx.send_if_modified(|s| {
            if s.scope != PurchaseScope::DuringPurchase {
                return false;
            }
            s.scope = PurchaseScope::BeforePurchase;
            s.proposals_ready = false;
            reopened = true;
            true
        });
        reopened
    }

    /// Close the window after a purchase attempt finished.
    pub fn finish_purchase(&self) {
        self.tx.send_if_modified(|s| {
            if s.scope != PurchaseScope::DuringPurchase {
                return false;
            }
            s.scope = PurchaseScope::Stopped;
            true
        });
    }

    /// Close the window and drop proposal readiness.
    pub fn stop(&self) {
        self.tx.send_replace(ScopeState::default());
        debug!("Purchase scope: stopped");
    }

    pub fn set_proposals_ready(&self, ready: bool) {
        self.tx.send_if_modified(|s| {
            let changed = s.proposals_ready != ready;
            s.proposals_ready = ready;
            changed
        });
    }

    /// Wait until the window is open with proposals ready.
    ///
    /// Returns `false` if the window closes instead.
    pub async fn wait_purchase_window(&self) -> bool {
        let mut rx = self.tx.subscribe();
        let open = match rx
            .wait_for(|s| s.scope != PurchaseScope::BeforePurchase || s.proposals_ready)
            .await
        {
            Ok(state) => state.scope == PurchaseScope::BeforePurchase && state.proposals_ready,
            Err(_) => {
                warn!("Scope channel closed while waiting");
                false
            }
        };
        open
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_begin_requires_before_purchase() {
        let tracker = ScopeTracker::new();
        assert!(!tracker.try_begin_purchase());

        tracker.set_before_purchase();
        assert!(tracker.try_begin_purchase());
        assert_eq!(tracker.scope(), PurchaseScope::DuringPurchase);

        // Second claim of the same window is rejected.
        assert!(!tracker.try_begin_purchase());
    }

    #[test]
    fn test_reopen_keeps_stop() {
        let tracker = ScopeTracker::new();
        tracker.set_before_purchase();
        assert!(tracker.try_begin_purchase());

        tracker.stop();
        assert!(!tracker.reopen());
        assert_eq!(tracker.scope(), PurchaseScope::Stopped);
    }

    #[test]
    fn test_reopen_clears_readiness() {
        let tracker = ScopeTracker::new();
        tracker.set_before_purchase();
        tracker.set_proposals_ready(true);
        assert!(tracker.try_begin_purchase());

        assert!(tracker.reopen());
        assert_eq!(
            tracker.state(),
            ScopeState {
                scope: PurchaseScope::BeforePurchase,
                proposals_ready: false,
            }
        );
    }

    #[tokio::test]
    async fn test_wait_returns_when_ready() {
        let tracker = Arc::new(ScopeTracker::new());
        tracker.set_before_purchase();

        let waiter = {
            let tracker = Arc::clone(&tracker);
            tokio::spawn(async move { tracker.wait_purchase_window().await })
        };
        tokio::task::yield_now().await;
        tracker.set_proposals_ready(true);

        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn test_wait_returns_false_on_stop() {
        let tracker = Arc::new(ScopeTracker::new());
        tracker.set_before_purchase();

        let waiter = {
            let tracker = Arc::clone(&tracker);
            tokio::spawn(async move { tracker.wait_purchase_window().await })
        };
        tokio::task::yield_now().await;
        tracker.stop();

        assert!(!waiter.await.unwrap());
    }

    #[tokio::test]
    async fn test_wait_returns_immediately_when_already_open() {
        let tracker = ScopeTracker::new();
        tracker.set_before_purchase();
        tracker.set_proposals_ready(true);

        let open = tokio::time::timeout(
            std::time::Duration::from_millis(100),
            tracker.wait_purchase_window(),
        )
        .await
        .unwrap();
        assert!(open);
    }

    #[test]
    fn test_wait_pends_until_proposals_ready() {
        let tracker = ScopeTracker::new();
        tracker.set_before_purchase();

        let mut wait = tokio_test::task::spawn(tracker.wait_purchase_window());
        tokio_test::assert_pending!(wait.poll());

        tracker.set_proposals_ready(true);
        assert!(wait.is_woken());
        assert!(tokio_test::assert_ready!(wait.poll()));
    }
}
