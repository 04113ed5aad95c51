//! Subdomain Registry
//!
//! Maps each subdomain to the one control connection currently serving it. Routing
//! reads go straight to the sharded map; `register` and `unregister` take the shard
//! lock for their key, so supersede-and-close and the guarded removal are atomic per
//! subdomain.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};
use tunnel_relay_common::{ConnectionMetadata, Message, TunnelError};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate a process-unique connection handle
pub fn next_connection_id() -> u64 {
    NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed)
}

/// Handle to one authenticated control connection
///
/// Frames are queued on `outbound` and written by the connection's single writer task,
/// so concurrent senders never interleave bytes within a frame.
#[derive(Debug)]
pub struct ControlConnection {
    metadata: ConnectionMetadata,
    outbound: mpsc::Sender<Message>,
    closed: watch::Sender<bool>,
}

impl ControlConnection {
    pub fn new(
        metadata: ConnectionMetadata,
        outbound: mpsc::Sender<Message>,
        closed: watch::Sender<bool>,
    ) -> Self {
        Self {
            metadata,
            outbound,
            closed,
        }
    }

    pub fn id(&self) -> u64 {
        self.metadata.connection_id
    }

    pub fn subdomain(&self) -> &str {
        &self.metadata.subdomain
    }

    pub fn client_id(&self) -> &str {
        &self.metadata.client_id
    }

    pub fn metadata(&self) -> &ConnectionMetadata {
        &self.metadata
    }

    /// Queue a frame for the writer task
    pub async fn send(&self, message: Message) -> Result<(), TunnelError> {
        if self.is_closed() {
            return Err(TunnelError::ConnectionClosed);
        }
        self.outbound
            .send(message)
            .await
            .map_err(|_| TunnelError::ConnectionClosed)
    }

    /// Signal the transport to shut down; safe to call more than once
    pub fn close(&self) {
        if !self.closed.send_replace(true) {
            debug!(
                "Closing control connection {} for {}",
                self.id(),
                self.subdomain()
            );
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }
}

#[derive(Debug, Default)]
pub struct SubdomainRegistry {
    connections: DashMap<String, Arc<ControlConnection>>,
}

impl SubdomainRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `connection` for its subdomain, closing and returning any connection it
    /// supersedes
    pub fn register(&self, connection: Arc<ControlConnection>) -> Option<Arc<ControlConnection>> {
        let subdomain = connection.subdomain().to_string();
        match self.connections.entry(subdomain) {
            Entry::Occupied(mut occupied) => {
                let previous = occupied.insert(connection);
                previous.close();
                info!(
                    "Connection {} superseded by {} for {}",
                    previous.id(),
                    occupied.get().id(),
                    occupied.key()
                );
                Some(previous)
            }
            Entry::Vacant(vacant) => {
                vacant.insert(connection);
                None
            }
        }
    }

    pub fn lookup(&self, subdomain: &str) -> Option<Arc<ControlConnection>> {
        self.connections
            .get(subdomain)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Remove the entry only if it still belongs to this connection instance
    pub fn unregister(&self, connection: &ControlConnection) -> bool {
        self.connections
            .remove_if(connection.subdomain(), |_, current| {
                current.id() == connection.id()
            })
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Metadata of every routable connection, ordered by subdomain
    pub fn subdomains(&self) -> Vec<ConnectionMetadata> {
        let mut all: Vec<ConnectionMetadata> = self
            .connections
            .iter()
            .map(|entry| entry.value().metadata().clone())
            .collect();
        all.sort_by(|a, b| a.subdomain.cmp(&b.subdomain));
        all
    }
}
