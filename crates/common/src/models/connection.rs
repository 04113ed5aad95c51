use serde::{Deserialize, Serialize};

/// Descriptive metadata of a live control connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionMetadata {
    /// Relay-local handle, unique for the lifetime of the process
    pub connection_id: u64,

    /// Subdomain this connection serves
    pub subdomain: String,

    /// Client identity; never exposed on public endpoints
    #[serde(skip_serializing, default)]
    pub client_id: String,

    /// Public URL announced in the `init` frame
    pub public_url: String,

    /// Timestamp when the connection authenticated (Unix epoch seconds)
    pub connected_at: i64,
}

impl ConnectionMetadata {
    /// Create a new connection metadata entry
    pub fn new(
        connection_id: u64,
        subdomain: String,
        client_id: String,
        public_url: String,
        connected_at: i64,
    ) -> Self {
        Self {
            connection_id,
            subdomain,
            client_id,
            public_url,
            connected_at,
        }
    }
}
