//! CleanupHandler - backstop sweep of the pending request table
//!
//! Every request already has its own watchdog; the sweeper only catches entries whose
//! watchdog never ran, so they cannot accumulate.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::error::RelayError;
use crate::pending::PendingRequestTable;

/// Periodically fail pending requests older than `max_age` with 504
pub async fn sweep_pending(pending: Arc<PendingRequestTable>, max_age: Duration, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;

        let expired = pending.expire(max_age);
        if expired.is_empty() {
            continue;
        }

        warn!("Sweeper expired {} pending requests", expired.len());
        for request in expired {
            debug!("Expiring {} for {}", request.request_id, request.subdomain);
            request.sink.fail(&RelayError::DeliveryTimeout);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pending::PendingRequest;
    use crate::sink::ResponseSink;
    use http::StatusCode;

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_expires_stale_entries() {
        let pending = Arc::new(PendingRequestTable::new());
        let (sink, rx) = ResponseSink::channel();
        pending.insert(PendingRequest::new(
            "r1".to_string(),
            sink,
            "x7q2".to_string(),
            1,
        ));

        let sweeper = tokio::spawn(sweep_pending(
            Arc::clone(&pending),
            Duration::from_secs(35),
            Duration::from_secs(5),
        ));

        let response = rx.await.unwrap();
        assert_eq!(response.status, StatusCode::GATEWAY_TIMEOUT);
        assert!(pending.is_empty());
        sweeper.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_leaves_fresh_entries() {
        let pending = Arc::new(PendingRequestTable::new());
        let (sink, _rx) = ResponseSink::channel();
        pending.insert(PendingRequest::new(
            "r1".to_string(),
            sink,
            "x7q2".to_string(),
            1,
        ));

        let sweeper = tokio::spawn(sweep_pending(
            Arc::clone(&pending),
            Duration::from_secs(35),
            Duration::from_secs(5),
        ));

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(pending.len(), 1);
        sweeper.abort();
    }
}
