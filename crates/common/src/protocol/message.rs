use serde::{Deserialize, Serialize};

use super::{HttpRequest, HttpResponse};
use crate::error::{Result, TunnelError};

/// All control-channel frames are wrapped in this typed envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// Handshake: the first frame a client sends on a fresh connection
    Auth {
        token: String,
        #[serde(rename = "clientId")]
        client_id: String,
    },

    /// Handshake reply advertising the public URL bound to the client
    Init {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        subdomain: Option<String>,
    },

    /// Data plane messages
    Request(HttpRequest),
    Response(HttpResponse),

    /// The agent could not produce a response for a forwarded request
    Error {
        #[serde(rename = "id", default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        code: ErrorCode,
        message: String,
    },

    /// Heartbeat
    Ping,
    Pong,

    /// Any frame type this build does not know about
    #[serde(other)]
    Unknown,
}

impl Message {
    /// Decode a single text frame
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| TunnelError::InvalidMessage(format!("Failed to parse message: {}", e)))
    }

    /// Encode into a single text frame
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Short name of the frame type, for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Auth { .. } => "auth",
            Message::Init { .. } => "init",
            Message::Request(_) => "request",
            Message::Response(_) => "response",
            Message::Error { .. } => "error",
            Message::Ping => "ping",
            Message::Pong => "pong",
            Message::Unknown => "unknown",
        }
    }
}

/// Error codes an agent reports for a request it could not serve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidRequest,
    Timeout,
    LocalServiceUnavailable,
    InternalError,
}

impl ErrorCode {
    /// HTTP status the relay answers the public caller with
    pub fn status_code(self) -> u16 {
        match self {
            ErrorCode::InvalidRequest => 400,
            ErrorCode::Timeout => 504,
            ErrorCode::LocalServiceUnavailable => 503,
            ErrorCode::InternalError => 502,
        }
    }
}
