//! ForwardingHandler - public HTTP entry point
//!
//! Buffers the public request, hands it to the dispatcher and waits on the response
//! sink. Whatever completes the sink first (the tunnel's answer, a disconnect or the
//! watchdog) is what the caller receives.

use axum::body::to_bytes;
use axum::extract::{Request, State};
use http::header::HOST;
use tracing::debug;
use tunnel_relay_common::headers_to_map;

use crate::RelayState;
use crate::dispatcher::InboundRequest;
use crate::error::RelayError;
use crate::sink::{RelayResponse, ResponseSink};

pub async fn forward_request(State(relay): State<RelayState>, request: Request) -> RelayResponse {
    let (parts, body) = request.into_parts();

    let host = parts
        .headers
        .get(HOST)
        .and_then(|value| value.to_str().ok())
        .or_else(|| parts.uri.host())
        .unwrap_or_default()
        .to_string();

    let body = match to_bytes(body, relay.config.max_body_bytes).await {
        Ok(body) => body,
        Err(e) => {
            debug!("Rejecting body for {}: {}", host, e);
            return RelayError::PayloadTooLarge.into();
        }
    };

    let path = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());

    let inbound = InboundRequest {
        host,
        method: parts.method.to_string(),
        path,
        headers: headers_to_map(&parts.headers),
        body: body.to_vec(),
    };

    let (sink, response) = ResponseSink::channel();
    relay.dispatcher.dispatch(inbound, sink).await;

    response
        .await
        .unwrap_or_else(|_| RelayError::TunnelDisconnected.into())
}
