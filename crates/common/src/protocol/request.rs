use serde::{Deserialize, Serialize};

use super::HeaderValues;
use super::headers::deserialize_header_values;

/// An inbound public HTTP call, forwarded from the relay to the agent as a `request` frame
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpRequest {
    /// Unique identifier to correlate request and response
    #[serde(rename = "id")]
    pub request_id: String,

    /// HTTP method (GET, POST, PUT, DELETE, etc.)
    pub method: String,

    /// Request target including path and query string
    /// Example: "/api/v1/users?limit=10"
    #[serde(rename = "url")]
    pub uri: String,

    /// HTTP headers as a map of header name to list of values
    #[serde(default, deserialize_with = "deserialize_header_values")]
    pub headers: HeaderValues,

    /// Request body encoded in Base64
    /// Empty string for requests without body
    #[serde(default)]
    pub body: String,

    /// Timestamp when the relay received the request (Unix epoch in milliseconds)
    #[serde(default)]
    pub timestamp: u64,
}

impl HttpRequest {
    /// Create a new HTTP request
    pub fn new(method: String, uri: String, request_id: String, timestamp: u64) -> Self {
        Self {
            request_id,
            method,
            uri,
            headers: HeaderValues::new(),
            body: String::new(),
            timestamp,
        }
    }

    /// Check if the request has a body
    pub fn has_body(&self) -> bool {
        !self.body.is_empty()
    }
}
