//! Control Protocol Handler
//!
//! One [`ControlSession`] per control connection, independent of the transport. The
//! transport feeds it text frames and acts on the returned [`Flow`]; the session owns
//! the `Connecting → Authenticated → Closed` state machine and all registry and
//! pending-table side effects.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use tunnel_relay_common::validation::validate_client_id;
use tunnel_relay_common::{
    ConnectionMetadata, ErrorCode, HttpResponse, Message, current_timestamp_secs,
};

use crate::RelayState;
use crate::error::RelayError;
use crate::registry::{ControlConnection, next_connection_id};
use crate::sink::RelayResponse;

/// What the transport should do after a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Close,
}

enum SessionState {
    Connecting,
    Authenticated(Arc<ControlConnection>),
    Closed,
}

pub struct ControlSession {
    state: SessionState,
    relay: RelayState,
    outbound: mpsc::Sender<Message>,
    /// Close signal for the transport; moves into the connection once authenticated
    close_signal: Option<watch::Sender<bool>>,
}

impl ControlSession {
    pub fn new(
        relay: RelayState,
        outbound: mpsc::Sender<Message>,
        close_signal: watch::Sender<bool>,
    ) -> Self {
        Self {
            state: SessionState::Connecting,
            relay,
            outbound,
            close_signal: Some(close_signal),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self.state, SessionState::Authenticated(_))
    }

    pub fn connection(&self) -> Option<&Arc<ControlConnection>> {
        match &self.state {
            SessionState::Authenticated(connection) => Some(connection),
            _ => None,
        }
    }

    /// Handle one text frame
    pub async fn on_text(&mut self, text: &str) -> Flow {
        let message = match Message::from_json(text) {
            Ok(message) => message,
            Err(e) => return self.on_malformed(&e.to_string()),
        };

        let connection = match &self.state {
            SessionState::Connecting => None,
            SessionState::Authenticated(connection) => Some(Arc::clone(connection)),
            SessionState::Closed => return Flow::Close,
        };

        match connection {
            None => self.authenticate(message).await,
            Some(connection) => self.on_frame(&connection, message).await,
        }
    }

    /// A frame that could not be decoded: fatal before authentication, dropped after
    pub fn on_malformed(&mut self, reason: &str) -> Flow {
        let err = RelayError::MalformedFrame(reason.to_string());
        match &self.state {
            SessionState::Connecting => {
                warn!("Closing unauthenticated connection: {}", err);
                Flow::Close
            }
            SessionState::Authenticated(connection) => {
                warn!("Dropping frame from {}: {}", connection.subdomain(), err);
                Flow::Continue
            }
            SessionState::Closed => Flow::Close,
        }
    }

    async fn authenticate(&mut self, message: Message) -> Flow {
        let (token, client_id) = match message {
            Message::Auth { token, client_id } => (token, client_id),
            other => {
                warn!(
                    "Expected auth frame, got {}; closing connection",
                    other.kind()
                );
                return Flow::Close;
            }
        };

        if !self.relay.verifier.is_valid_token(&token) {
            warn!(
                "{}",
                RelayError::AuthenticationFailure(format!("invalid token from client {}", client_id))
            );
            return Flow::Close;
        }

        if let Err(e) = validate_client_id(&client_id) {
            warn!("Rejecting auth: {}", e);
            return Flow::Close;
        }

        let subdomain = match self.relay.resolver.resolve(&client_id).await {
            Ok(subdomain) => subdomain,
            Err(e) => {
                warn!("Identity resolution failed for {}: {}", client_id, e);
                return Flow::Close;
            }
        };

        let Some(close_signal) = self.close_signal.take() else {
            return Flow::Close;
        };

        let public_url = self.relay.config.public_url(&subdomain);
        let metadata = ConnectionMetadata::new(
            next_connection_id(),
            subdomain.clone(),
            client_id,
            public_url.clone(),
            current_timestamp_secs(),
        );
        let connection = Arc::new(ControlConnection::new(
            metadata,
            self.outbound.clone(),
            close_signal,
        ));

        // Queue init before the connection becomes routable so it precedes any request.
        let init = Message::Init {
            url: public_url.clone(),
            subdomain: Some(subdomain.clone()),
        };
        if connection.send(init).await.is_err() {
            connection.close();
            return Flow::Close;
        }

        self.relay.registry.register(Arc::clone(&connection));
        info!(
            "Tunnel active: {} (connection {})",
            public_url,
            connection.id()
        );
        self.state = SessionState::Authenticated(connection);

        Flow::Continue
    }

    async fn on_frame(&self, connection: &ControlConnection, message: Message) -> Flow {
        match message {
            Message::Response(response) => {
                self.on_response(connection, response);
                Flow::Continue
            }
            Message::Error {
                request_id,
                code,
                message,
            } => {
                self.on_agent_error(connection, request_id, code, message);
                Flow::Continue
            }
            Message::Ping => match connection.send(Message::Pong).await {
                Ok(()) => Flow::Continue,
                Err(_) => Flow::Close,
            },
            other => {
                debug!(
                    "Ignoring {} frame from {}",
                    other.kind(),
                    connection.subdomain()
                );
                Flow::Continue
            }
        }
    }

    fn on_response(&self, connection: &ControlConnection, response: HttpResponse) {
        let request_id = response.request_id.clone();
        let Some(pending) = self.relay.pending.take_for(&request_id, connection.id()) else {
            debug!("{}", RelayError::StaleResponse(request_id));
            return;
        };

        let relayed = RelayResponse::from_tunnel(response).unwrap_or_else(|e| {
            warn!("Response {} from {}: {}", request_id, connection.subdomain(), e);
            RelayResponse::from_error(&e)
        });

        debug!(
            "Completing {} with {} ({} bytes)",
            request_id,
            relayed.status,
            relayed.body.len()
        );
        if !pending.sink.complete(relayed) {
            debug!("Caller for {} went away before the response", request_id);
        }
    }

    fn on_agent_error(
        &self,
        connection: &ControlConnection,
        request_id: Option<String>,
        code: ErrorCode,
        message: String,
    ) {
        let Some(request_id) = request_id else {
            warn!(
                "Agent {} reported {:?}: {}",
                connection.subdomain(),
                code,
                message
            );
            return;
        };

        match self.relay.pending.take_for(&request_id, connection.id()) {
            Some(pending) => {
                debug!("Agent failed {}: {:?} {}", request_id, code, message);
                pending.sink.fail(&RelayError::Agent { code, message });
            }
            None => debug!("{}", RelayError::StaleResponse(request_id)),
        }
    }

    /// Tear down: unregister, close and fail everything still in flight on this
    /// connection. Later calls do nothing.
    pub fn on_close(&mut self) {
        match std::mem::replace(&mut self.state, SessionState::Closed) {
            SessionState::Authenticated(connection) => {
                self.relay.registry.unregister(&connection);
                connection.close();

                let orphaned = self.relay.pending.drain_connection(connection.id());
                if !orphaned.is_empty() {
                    info!(
                        "Failing {} in-flight requests for {}",
                        orphaned.len(),
                        connection.subdomain()
                    );
                }
                for pending in orphaned {
                    pending.sink.fail(&RelayError::TunnelDisconnected);
                }
                info!(
                    "Tunnel closed: {} (connection {})",
                    connection.subdomain(),
                    connection.id()
                );
            }
            SessionState::Connecting => {
                if let Some(close_signal) = self.close_signal.take() {
                    close_signal.send_replace(true);
                }
            }
            SessionState::Closed => {}
        }
    }
}

impl Drop for ControlSession {
    fn drop(&mut self) {
        self.on_close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::SharedToken;
    use crate::config::Config;
    use crate::identity::MemoryBindingStore;
    use crate::pending::PendingRequest;
    use crate::sink::ResponseSink;
    use http::StatusCode;
    use tunnel_relay_common::constants::OUTBOUND_QUEUE_DEPTH;

    const TOKEN: &str = "token-secreto-123";

    fn relay() -> RelayState {
        let config = Config {
            domain: "example.com".to_string(),
            scheme: "https".to_string(),
            ..Config::default()
        };
        RelayState::new(
            config,
            Arc::new(SharedToken::new(TOKEN)),
            Arc::new(MemoryBindingStore::new()),
        )
    }

    struct Harness {
        session: ControlSession,
        frames: mpsc::Receiver<Message>,
        closed: watch::Receiver<bool>,
    }

    fn harness(relay: &RelayState) -> Harness {
        let (tx, frames) = mpsc::channel(OUTBOUND_QUEUE_DEPTH);
        let (close_tx, closed) = watch::channel(false);
        Harness {
            session: ControlSession::new(relay.clone(), tx, close_tx),
            frames,
            closed,
        }
    }

    fn auth_frame(client_id: &str) -> String {
        format!(
            r#"{{"type":"auth","token":"{}","clientId":"{}"}}"#,
            TOKEN, client_id
        )
    }

    async fn authenticated(relay: &RelayState, client_id: &str) -> (Harness, String) {
        let mut h = harness(relay);
        assert_eq!(h.session.on_text(&auth_frame(client_id)).await, Flow::Continue);
        let Some(Message::Init { url, subdomain }) = h.frames.recv().await else {
            panic!("Expected init frame");
        };
        let subdomain = subdomain.unwrap();
        assert_eq!(url, format!("https://{}.example.com", subdomain));
        (h, subdomain)
    }

    fn park(relay: &RelayState, h: &Harness, request_id: &str) -> tokio::sync::oneshot::Receiver<RelayResponse> {
        let (sink, rx) = ResponseSink::channel();
        let connection = h.session.connection().unwrap();
        relay.pending.insert(PendingRequest::new(
            request_id.to_string(),
            sink,
            connection.subdomain().to_string(),
            connection.id(),
        ));
        rx
    }

    #[tokio::test]
    async fn test_auth_registers_and_sends_init() {
        let relay = relay();
        let (h, subdomain) = authenticated(&relay, "abc").await;

        assert!(h.session.is_authenticated());
        let routed = relay.registry.lookup(&subdomain).unwrap();
        assert_eq!(routed.client_id(), "abc");
    }

    #[tokio::test]
    async fn test_same_client_gets_same_subdomain() {
        let relay = relay();
        let (mut first, a) = authenticated(&relay, "abc").await;
        first.session.on_close();
        let (_second, b) = authenticated(&relay, "abc").await;
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_bad_token_closes_without_reply() {
        let relay = relay();
        let mut h = harness(&relay);

        let flow = h
            .session
            .on_text(r#"{"type":"auth","token":"wrong","clientId":"abc"}"#)
            .await;
        assert_eq!(flow, Flow::Close);
        assert!(h.frames.try_recv().is_err());
        assert!(relay.registry.is_empty());

        h.session.on_close();
        assert!(*h.closed.borrow());
    }

    #[tokio::test]
    async fn test_invalid_client_id_closes() {
        let relay = relay();
        let mut h = harness(&relay);
        let flow = h.session.on_text(&auth_frame("has space")).await;
        assert_eq!(flow, Flow::Close);
        assert!(relay.registry.is_empty());
    }

    #[tokio::test]
    async fn test_frames_before_auth_close() {
        let relay = relay();

        let mut h = harness(&relay);
        assert_eq!(h.session.on_text("not json").await, Flow::Close);

        let mut h = harness(&relay);
        assert_eq!(h.session.on_text(r#"{"type":"ping"}"#).await, Flow::Close);
    }

    #[tokio::test]
    async fn test_malformed_after_auth_is_dropped() {
        let relay = relay();
        let (mut h, _) = authenticated(&relay, "abc").await;

        assert_eq!(h.session.on_text("{broken").await, Flow::Continue);
        assert_eq!(h.session.on_malformed("binary frame"), Flow::Continue);
        assert_eq!(
            h.session.on_text(r#"{"type":"stats","n":1}"#).await,
            Flow::Continue
        );
        assert!(h.session.is_authenticated());
    }

    #[tokio::test]
    async fn test_ping_gets_pong() {
        let relay = relay();
        let (mut h, _) = authenticated(&relay, "abc").await;

        assert_eq!(h.session.on_text(r#"{"type":"ping"}"#).await, Flow::Continue);
        assert!(matches!(h.frames.recv().await, Some(Message::Pong)));
    }

    #[tokio::test]
    async fn test_response_completes_pending_once() {
        let relay = relay();
        let (mut h, _) = authenticated(&relay, "abc").await;
        let rx = park(&relay, &h, "r1");

        let frame = r#"{"type":"response","id":"r1","status":200,"headers":{"content-type":"text/plain"},"body":"aGk="}"#;
        assert_eq!(h.session.on_text(frame).await, Flow::Continue);
        assert_eq!(h.session.on_text(frame).await, Flow::Continue);

        let response = rx.await.unwrap();
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body, b"hi");
        assert_eq!(response.headers.get("content-type").unwrap(), "text/plain");
        assert!(relay.pending.is_empty());
    }

    #[tokio::test]
    async fn test_response_from_other_connection_is_stale() {
        let relay = relay();
        let (owner, _) = authenticated(&relay, "owner").await;
        let (mut other, _) = authenticated(&relay, "other").await;
        let _rx = park(&relay, &owner, "r1");

        let frame = r#"{"type":"response","id":"r1","status":200,"headers":{},"body":""}"#;
        assert_eq!(other.session.on_text(frame).await, Flow::Continue);
        assert_eq!(relay.pending.len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_status_becomes_502() {
        let relay = relay();
        let (mut h, _) = authenticated(&relay, "abc").await;
        let rx = park(&relay, &h, "r1");

        let frame = r#"{"type":"response","id":"r1","status":42,"headers":{},"body":""}"#;
        h.session.on_text(frame).await;
        assert_eq!(rx.await.unwrap().status, StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_agent_error_frame_maps_status() {
        let relay = relay();
        let (mut h, _) = authenticated(&relay, "abc").await;
        let rx = park(&relay, &h, "r1");

        let frame = r#"{"type":"error","id":"r1","code":"local_service_unavailable","message":"connection refused"}"#;
        assert_eq!(h.session.on_text(frame).await, Flow::Continue);

        let response = rx.await.unwrap();
        assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.body, b"connection refused");
    }

    #[tokio::test]
    async fn test_close_fails_in_flight_and_unregisters() {
        let relay = relay();
        let (mut h, subdomain) = authenticated(&relay, "abc").await;
        let rx = park(&relay, &h, "r1");

        h.session.on_close();
        h.session.on_close();

        let response = rx.await.unwrap();
        assert_eq!(response.status, StatusCode::BAD_GATEWAY);
        assert_eq!(response.body, b"tunnel disconnected");
        assert!(relay.registry.lookup(&subdomain).is_none());
        assert!(relay.pending.is_empty());
        assert!(*h.closed.borrow());
    }

    #[tokio::test]
    async fn test_supersede_keeps_new_connection_routable() {
        let relay = relay();
        let (mut old, subdomain) = authenticated(&relay, "abc").await;
        let (new, again) = authenticated(&relay, "abc").await;
        assert_eq!(subdomain, again);

        // The registry closed the old connection; its transport would now shut down.
        assert!(*old.closed.borrow());
        let rx = park(&relay, &new, "r-new");

        old.session.on_close();

        let routed = relay.registry.lookup(&subdomain).unwrap();
        assert_eq!(routed.id(), new.session.connection().unwrap().id());
        assert_eq!(relay.pending.len(), 1);
        drop(rx);
    }

    #[tokio::test]
    async fn test_drop_runs_close() {
        let relay = relay();
        let (h, subdomain) = authenticated(&relay, "abc").await;
        drop(h);
        assert!(relay.registry.lookup(&subdomain).is_none());
    }
}
