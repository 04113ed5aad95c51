//! Relay error taxonomy
//!
//! Every failure is handled at the boundary where it is detected. Variants that reach a
//! public caller map to a status code and a short client-facing message; the full
//! detail only goes to the log.

use http::StatusCode;
use thiserror::Error;
use tunnel_relay_common::ErrorCode;
use tunnel_relay_common::validation::ValidationError;

use crate::identity::StoreError;

#[derive(Debug, Error)]
pub enum RelayError {
    /// Invalid or missing token; the control connection is closed without a reply
    #[error("Authentication failed: {0}")]
    AuthenticationFailure(String),

    /// No live control connection for the requested subdomain
    #[error("No tunnel connected for subdomain: {0}")]
    RoutingFailure(String),

    /// The tunnel did not answer within the request timeout
    #[error("Request timeout waiting for response")]
    DeliveryTimeout,

    /// A `response` frame whose id is not pending (timed out, duplicate or forged)
    #[error("Stale response for request: {0}")]
    StaleResponse(String),

    /// A control frame that could not be decoded
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// The freshly generated subdomain is already owned by a different client
    #[error("Subdomain {subdomain} is already bound to another client")]
    PersistenceConflict { subdomain: String },

    /// The control connection went away while the request was in flight
    #[error("Tunnel disconnected")]
    TunnelDisconnected,

    /// The public request had no usable Host
    #[error("Missing or invalid host header")]
    InvalidHost,

    /// The public request could not be forwarded as given
    #[error("Bad request: {0}")]
    BadRequest(#[from] ValidationError),

    /// The public request body exceeds the configured limit
    #[error("Request entity too large")]
    PayloadTooLarge,

    /// The agent answered with something the relay cannot turn into HTTP
    #[error("Invalid response from tunnel: {0}")]
    InvalidResponse(String),

    /// The agent reported that it could not serve the request
    #[error("Agent error ({code:?}): {message}")]
    Agent { code: ErrorCode, message: String },

    #[error("Binding store error: {0}")]
    Storage(#[from] StoreError),
}

impl RelayError {
    /// Status code returned to the public caller
    pub fn status_code(&self) -> StatusCode {
        match self {
            RelayError::RoutingFailure(_) => StatusCode::NOT_FOUND,
            RelayError::DeliveryTimeout => StatusCode::GATEWAY_TIMEOUT,
            RelayError::InvalidHost | RelayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            RelayError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            RelayError::TunnelDisconnected | RelayError::InvalidResponse(_) => {
                StatusCode::BAD_GATEWAY
            }
            RelayError::Agent { code, .. } => {
                StatusCode::from_u16(code.status_code()).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            RelayError::AuthenticationFailure(_)
            | RelayError::StaleResponse(_)
            | RelayError::MalformedFrame(_)
            | RelayError::PersistenceConflict { .. }
            | RelayError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short label sent in the `x-tunnel-error` header
    pub fn label(&self) -> &'static str {
        match self {
            RelayError::AuthenticationFailure(_) => "authentication-failure",
            RelayError::RoutingFailure(_) => "not-connected",
            RelayError::DeliveryTimeout => "gateway-timeout",
            RelayError::StaleResponse(_) => "stale-response",
            RelayError::MalformedFrame(_) => "malformed-frame",
            RelayError::PersistenceConflict { .. } => "persistence-conflict",
            RelayError::TunnelDisconnected => "disconnected",
            RelayError::InvalidHost => "invalid-host",
            RelayError::BadRequest(_) => "bad-request",
            RelayError::PayloadTooLarge => "payload-too-large",
            RelayError::InvalidResponse(_) => "invalid-response",
            RelayError::Agent { .. } => "agent-error",
            RelayError::Storage(_) => "internal",
        }
    }

    /// Body returned to the public caller; never leaks internal details
    pub fn client_message(&self) -> String {
        match self {
            RelayError::RoutingFailure(_) => "tunnel not connected".to_string(),
            RelayError::DeliveryTimeout => "Gateway Timeout: No response from tunnel".to_string(),
            RelayError::TunnelDisconnected => "tunnel disconnected".to_string(),
            RelayError::InvalidResponse(_) => "Bad Gateway: invalid response from tunnel".to_string(),
            RelayError::Agent { message, .. } => message.clone(),
            RelayError::InvalidHost | RelayError::BadRequest(_) | RelayError::PayloadTooLarge => {
                self.to_string()
            }
            _ => "Internal server error".to_string(),
        }
    }
}
