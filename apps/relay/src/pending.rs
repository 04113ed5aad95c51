//! Pending Request Table
//!
//! Correlates each forwarded request id with the caller waiting on it. Every exit path
//! (matching response, watchdog, disconnect, sweeper, failed send) goes through
//! [`PendingRequestTable::take`] or one of its filtered variants, so only one of them
//! ever gets the [`ResponseSink`].

use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

use crate::sink::ResponseSink;

/// One in-flight HTTP call awaiting a tunneled response
#[derive(Debug)]
pub struct PendingRequest {
    pub request_id: String,
    pub sink: ResponseSink,
    pub subdomain: String,
    /// Control connection the request frame was sent on
    pub connection_id: u64,
    pub created_at: Instant,
}

impl PendingRequest {
    pub fn new(request_id: String, sink: ResponseSink, subdomain: String, connection_id: u64) -> Self {
        Self {
            request_id,
            sink,
            subdomain,
            connection_id,
            created_at: Instant::now(),
        }
    }
}

#[derive(Debug, Default)]
pub struct PendingRequestTable {
    entries: DashMap<String, PendingRequest>,
}

impl PendingRequestTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, pending: PendingRequest) {
        self.entries.insert(pending.request_id.clone(), pending);
    }

    /// Remove the entry if present; `None` means someone else already consumed it
    pub fn take(&self, request_id: &str) -> Option<PendingRequest> {
        self.entries.remove(request_id).map(|(_, pending)| pending)
    }

    /// Like [`take`](Self::take), but only for requests sent on the given connection
    pub fn take_for(&self, request_id: &str, connection_id: u64) -> Option<PendingRequest> {
        self.entries
            .remove_if(request_id, |_, pending| pending.connection_id == connection_id)
            .map(|(_, pending)| pending)
    }

    /// Remove every request forwarded over a connection
    pub fn drain_connection(&self, connection_id: u64) -> Vec<PendingRequest> {
        self.drain_where(|pending| pending.connection_id == connection_id)
    }

    /// Remove every request older than `max_age`
    pub fn expire(&self, max_age: Duration) -> Vec<PendingRequest> {
        let now = Instant::now();
        self.drain_where(|pending| now.duration_since(pending.created_at) >= max_age)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    // Collect ids first: removing while iterating a DashMap shard deadlocks.
    fn drain_where(&self, predicate: impl Fn(&PendingRequest) -> bool) -> Vec<PendingRequest> {
        let ids: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| predicate(entry.value()))
            .map(|entry| entry.key().clone())
            .collect();

        ids.into_iter()
            .filter_map(|id| {
                self.entries
                    .remove_if(&id, |_, pending| predicate(pending))
                    .map(|(_, pending)| pending)
            })
            .collect()
    }
}
