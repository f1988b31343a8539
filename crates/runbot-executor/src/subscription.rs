//! Post-purchase contract subscription.
//!
//! Two bounded attempts, then one last unconditional attempt that is not
//! waited on. A missed subscription is never fatal; the ledger recovery
//! scan picks up contracts left open.

use runbot_core::ContractId;
use runbot_telemetry::Metrics;
use runbot_ws::DynBrokerApi;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Bounded attempts before the final best-effort one.
const BOUNDED_ATTEMPTS: u32 = 2;

/// Subscribe to `proposal_open_contract` updates for `contract_id`.
///
/// Returns whether one of the bounded attempts was confirmed.
pub async fn subscribe_with_retry(
    api: DynBrokerApi,
    contract_id: ContractId,
    attempt_timeout: Duration,
) -> bool {
    for attempt in 1..=BOUNDED_ATTEMPTS {
        match tokio::time::timeout(attempt_timeout, api.subscribe_contract(contract_id)).await {
            Ok(Ok(())) => {
                debug!(%contract_id, attempt, "Contract subscription confirmed");
                return true;
            }
            Ok(Err(e)) => {
                warn!(%contract_id, attempt, code = %e.code, "Contract subscription failed");
            }
            Err(_) => {
                warn!(%contract_id, attempt, timeout = ?attempt_timeout, "Contract subscription timed out");
            }
        }
    }

    Metrics::subscription_failure();
    tokio::spawn(async move {
        match api.subscribe_contract(contract_id).await {
            Ok(()) => info!(%contract_id, "Best-effort contract subscription confirmed"),
            Err(e) => warn!(%contract_id, code = %e.code, "Best-effort contract subscription failed"),
        }
    });
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use runbot_core::ApiError;
    use runbot_ws::{MockBrokerApi, SubscribeBehavior};
    use std::sync::Arc;

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_attempt_confirms() {
        let api = Arc::new(MockBrokerApi::new());
        let ok = subscribe_with_retry(api.clone(), ContractId(1), Duration::from_secs(5)).await;

        assert!(ok);
        assert_eq!(api.subscribe_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_timeout() {
        let api = Arc::new(MockBrokerApi::new());
        api.push_subscribe_behavior(SubscribeBehavior::Hang);

        let started = tokio::time::Instant::now();
        let ok = subscribe_with_retry(api.clone(), ContractId(1), Duration::from_secs(5)).await;

        assert!(ok);
        assert_eq!(api.subscribe_count(), 2);
        assert_eq!(started.elapsed(), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_final_best_effort_attempt() {
        let api = Arc::new(MockBrokerApi::new());
        api.push_subscribe_behavior(SubscribeBehavior::Hang);
        api.push_subscribe_behavior(SubscribeBehavior::Fail(ApiError::new(
            "RateLimit",
            "too many requests",
        )));

        let ok = subscribe_with_retry(api.clone(), ContractId(1), Duration::from_secs(5)).await;
        settle().await;

        assert!(!ok);
        assert_eq!(api.subscribe_count(), 3);
    }
}
