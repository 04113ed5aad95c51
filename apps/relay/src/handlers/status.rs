use axum::Json;
use axum::extract::State;
use serde::Serialize;
use tunnel_relay_common::ConnectionMetadata;

use crate::RelayState;

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub tunnels: Vec<ConnectionMetadata>,
    pub pending_requests: usize,
}

pub async fn health() -> &'static str {
    "ok"
}

/// Live tunnels and in-flight request count; client identities are not exposed
pub async fn status(State(relay): State<RelayState>) -> Json<StatusReport> {
    Json(StatusReport {
        tunnels: relay.registry.subdomains(),
        pending_requests: relay.pending.len(),
    })
}
