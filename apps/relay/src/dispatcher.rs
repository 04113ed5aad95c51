//! HTTP Dispatcher
//!
//! Turns one public HTTP call into one `request` frame on the owning control
//! connection. The caller's [`ResponseSink`] is parked in the pending table until a
//! matching `response` frame, the connection closing, or the per-request watchdog
//! completes it.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, warn};
use tunnel_relay_common::protocol::HeaderValues;
use tunnel_relay_common::validation::{sanitize_header_value, validate_path};
use tunnel_relay_common::{
    HttpRequest, Message, current_timestamp_millis, encode_body, generate_request_id,
};

use crate::error::RelayError;
use crate::pending::{PendingRequest, PendingRequestTable};
use crate::registry::SubdomainRegistry;
use crate::sink::ResponseSink;

/// A public HTTP call as delivered by the listener
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub host: String,
    pub method: String,
    /// Path and query string
    pub path: String,
    pub headers: HeaderValues,
    pub body: Vec<u8>,
}

/// Routing key of a host: its first label, without port, lowercased
pub fn extract_subdomain(host: &str) -> Result<String, RelayError> {
    let host = host.trim();
    let host = match host.rsplit_once(':') {
        Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name,
        _ => host,
    };

    let label = host.split('.').next().unwrap_or_default();
    if label.is_empty() {
        return Err(RelayError::InvalidHost);
    }
    Ok(label.to_ascii_lowercase())
}

pub struct Dispatcher {
    registry: Arc<SubdomainRegistry>,
    pending: Arc<PendingRequestTable>,
    request_timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<SubdomainRegistry>,
        pending: Arc<PendingRequestTable>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            pending,
            request_timeout,
        }
    }

    /// Forward `request` to its tunnel; `sink` is completed exactly once, now or later
    pub async fn dispatch(&self, request: InboundRequest, sink: ResponseSink) {
        let subdomain = match extract_subdomain(&request.host) {
            Ok(subdomain) => subdomain,
            Err(e) => {
                debug!("Rejecting request with host {:?}: {}", request.host, e);
                sink.fail(&e);
                return;
            }
        };

        let Some(connection) = self.registry.lookup(&subdomain) else {
            debug!("No tunnel for subdomain {}", subdomain);
            sink.fail(&RelayError::RoutingFailure(subdomain));
            return;
        };

        let uri = match validate_path(&request.path) {
            Ok(uri) => uri,
            Err(e) => {
                sink.fail(&RelayError::BadRequest(e));
                return;
            }
        };

        let request_id = generate_request_id();
        let mut frame = HttpRequest::new(
            request.method,
            uri,
            request_id.clone(),
            current_timestamp_millis(),
        );
        frame.headers = sanitize_headers(request.headers);
        frame.body = encode_body(&request.body);

        debug!(
            "Forwarding {} {} to {} as {}",
            frame.method, frame.uri, subdomain, request_id
        );

        self.pending.insert(PendingRequest::new(
            request_id.clone(),
            sink,
            subdomain,
            connection.id(),
        ));
        self.arm_watchdog(request_id.clone());

        // A client that stops reading fills its queue; the wait for room is bounded too.
        let failure = match timeout(self.request_timeout, connection.send(Message::Request(frame)))
            .await
        {
            Ok(Ok(())) => return,
            Ok(Err(e)) => {
                warn!("Failed to queue request {}: {}", request_id, e);
                RelayError::TunnelDisconnected
            }
            Err(_) => {
                warn!(
                    "Outbound queue for {} stayed full for {:?}, dropping {}",
                    connection.subdomain(),
                    self.request_timeout,
                    request_id
                );
                RelayError::DeliveryTimeout
            }
        };

        if let Some(pending) = self.pending.take(&request_id) {
            pending.sink.fail(&failure);
        }
    }

    fn arm_watchdog(&self, request_id: String) {
        let pending = Arc::clone(&self.pending);
        let timeout = self.request_timeout;

        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(expired) = pending.take(&request_id) {
                warn!(
                    "Request {} to {} timed out after {:?}",
                    request_id, expired.subdomain, timeout
                );
                expired.sink.fail(&RelayError::DeliveryTimeout);
            }
        });
    }
}

fn sanitize_headers(headers: HeaderValues) -> HeaderValues {
    headers
        .into_iter()
        .map(|(name, values)| {
            let values = values
                .iter()
                .filter_map(|value| sanitize_header_value(value).ok())
                .collect();
            (name, values)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::tests::connection;
    use http::StatusCode;
    use tunnel_relay_common::constants::OUTBOUND_QUEUE_DEPTH;
    use tunnel_relay_common::decode_body;

    fn dispatcher(timeout: Duration) -> (Dispatcher, Arc<SubdomainRegistry>, Arc<PendingRequestTable>) {
        let registry = Arc::new(SubdomainRegistry::new());
        let pending = Arc::new(PendingRequestTable::new());
        (
            Dispatcher::new(Arc::clone(&registry), Arc::clone(&pending), timeout),
            registry,
            pending,
        )
    }

    fn inbound(host: &str, path: &str) -> InboundRequest {
        InboundRequest {
            host: host.to_string(),
            method: "GET".to_string(),
            path: path.to_string(),
            headers: HeaderValues::new(),
            body: Vec::new(),
        }
    }

    #[test]
    fn test_extract_subdomain() {
        assert_eq!(extract_subdomain("x7q2.example.com").unwrap(), "x7q2");
        assert_eq!(extract_subdomain("X7Q2.Example.com:443").unwrap(), "x7q2");
        assert_eq!(extract_subdomain(" abc.localhost:3000 ").unwrap(), "abc");
        assert_eq!(extract_subdomain("localhost").unwrap(), "localhost");
        assert!(matches!(extract_subdomain(""), Err(RelayError::InvalidHost)));
        assert!(matches!(extract_subdomain(":8080"), Err(RelayError::InvalidHost)));
        assert!(matches!(extract_subdomain(".example.com"), Err(RelayError::InvalidHost)));
    }

    #[tokio::test]
    async fn test_unknown_subdomain_is_404_without_state() {
        let (dispatcher, _registry, pending) = dispatcher(Duration::from_secs(30));
        let (sink, rx) = ResponseSink::channel();

        dispatcher.dispatch(inbound("ghost.example.com", "/"), sink).await;

        let response = rx.await.unwrap();
        assert_eq!(response.status, StatusCode::NOT_FOUND);
        assert_eq!(response.body, b"tunnel not connected");
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn test_empty_host_is_400() {
        let (dispatcher, _registry, _pending) = dispatcher(Duration::from_secs(30));
        let (sink, rx) = ResponseSink::channel();

        dispatcher.dispatch(inbound("", "/"), sink).await;
        assert_eq!(rx.await.unwrap().status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_dispatch_sends_request_frame() {
        let (dispatcher, registry, pending) = dispatcher(Duration::from_secs(30));
        let (conn, mut frames, _closed) = connection("x7q2");
        registry.register(Arc::clone(&conn));

        let mut request = inbound("x7q2.example.com", "/api?x=1");
        request.method = "POST".to_string();
        request.body = b"payload".to_vec();
        request
            .headers
            .insert("x-trace".to_string(), vec!["abc".to_string()]);

        let (sink, _rx) = ResponseSink::channel();
        dispatcher.dispatch(request, sink).await;

        let Some(Message::Request(frame)) = frames.recv().await else {
            panic!("Expected a request frame");
        };
        assert_eq!(frame.method, "POST");
        assert_eq!(frame.uri, "/api?x=1");
        assert_eq!(decode_body(&frame.body).unwrap(), b"payload");
        assert_eq!(frame.headers.get("x-trace").unwrap(), &vec!["abc"]);
        assert!(frame.request_id.starts_with("req_"));

        let entry = pending.take(&frame.request_id).unwrap();
        assert_eq!(entry.subdomain, "x7q2");
        assert_eq!(entry.connection_id, conn.id());
    }

    #[tokio::test(start_paused = true)]
    async fn test_watchdog_answers_504_once() {
        let (dispatcher, registry, pending) = dispatcher(Duration::from_secs(30));
        let (conn, mut frames, _closed) = connection("x7q2");
        registry.register(conn);

        let (sink, rx) = ResponseSink::channel();
        dispatcher.dispatch(inbound("x7q2.example.com", "/"), sink).await;
        assert!(frames.recv().await.is_some());
        assert_eq!(pending.len(), 1);

        let response = rx.await.unwrap();
        assert_eq!(response.status, StatusCode::GATEWAY_TIMEOUT);
        assert!(pending.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_watchdog_after_completion_is_noop() {
        let (dispatcher, registry, pending) = dispatcher(Duration::from_secs(30));
        let (conn, mut frames, _closed) = connection("x7q2");
        registry.register(conn);

        let (sink, rx) = ResponseSink::channel();
        dispatcher.dispatch(inbound("x7q2.example.com", "/"), sink).await;
        let Some(Message::Request(frame)) = frames.recv().await else {
            panic!("Expected a request frame");
        };

        let entry = pending.take(&frame.request_id).unwrap();
        entry.sink.fail(&RelayError::TunnelDisconnected);

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(rx.await.unwrap().status, StatusCode::BAD_GATEWAY);
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn test_send_failure_is_502() {
        let (dispatcher, registry, pending) = dispatcher(Duration::from_secs(30));
        let (conn, frames, _closed) = connection("x7q2");
        registry.register(conn);
        drop(frames);

        let (sink, rx) = ResponseSink::channel();
        dispatcher.dispatch(inbound("x7q2.example.com", "/"), sink).await;

        let response = rx.await.unwrap();
        assert_eq!(response.status, StatusCode::BAD_GATEWAY);
        assert_eq!(response.body, b"tunnel disconnected");
        assert!(pending.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_client_queue_still_times_out() {
        let request_timeout = Duration::from_secs(30);
        let (dispatcher, registry, _pending) = dispatcher(request_timeout);
        // Held but never drained, like a writer stuck on a client that stopped reading
        let (conn, _frames, _closed) = connection("x7q2");
        registry.register(conn);

        let mut parked = Vec::new();
        for _ in 0..OUTBOUND_QUEUE_DEPTH {
            let (sink, rx) = ResponseSink::channel();
            dispatcher.dispatch(inbound("x7q2.example.com", "/"), sink).await;
            parked.push(rx);
        }

        let started = tokio::time::Instant::now();
        let (sink, rx) = ResponseSink::channel();
        let outcome = tokio::time::timeout(Duration::from_secs(300), async {
            dispatcher.dispatch(inbound("x7q2.example.com", "/"), sink).await;
            rx.await
        })
        .await;

        let response = outcome.expect("caller left waiting").unwrap();
        assert_eq!(response.status, StatusCode::GATEWAY_TIMEOUT);
        assert!(started.elapsed() <= request_timeout + Duration::from_secs(1));
    }

    #[test]
    fn test_sanitize_headers_drops_oversized_values() {
        let mut headers = HeaderValues::new();
        headers.insert(
            "x-big".to_string(),
            vec!["a".repeat(10_000), "ok".to_string()],
        );
        let cleaned = sanitize_headers(headers);
        assert_eq!(cleaned.get("x-big").unwrap(), &vec!["ok"]);
    }
}
