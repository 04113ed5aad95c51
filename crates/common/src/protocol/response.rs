use serde::{Deserialize, Serialize};

use super::HeaderValues;
use super::headers::deserialize_header_values;
use crate::utils::{decode_body, encode_body};

/// The local service's reply, sent back through the tunnel as a `response` frame
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpResponse {
    /// Must match the id of the corresponding `request` frame
    #[serde(rename = "id")]
    pub request_id: String,

    /// HTTP status code (200, 404, 500, etc.)
    #[serde(rename = "status")]
    pub status_code: u16,

    /// Response headers as a map of header name to list of values
    #[serde(default, deserialize_with = "deserialize_header_values")]
    pub headers: HeaderValues,

    /// Response body encoded in Base64
    #[serde(default)]
    pub body: String,

    /// Processing time in milliseconds (local service response time)
    #[serde(default)]
    pub processing_time_ms: u64,
}

impl HttpResponse {
    /// Create a new HTTP response
    pub fn new(request_id: String, status_code: u16) -> Self {
        Self {
            request_id,
            status_code,
            headers: HeaderValues::new(),
            body: String::new(),
            processing_time_ms: 0,
        }
    }

    /// Attach raw body bytes, encoding them for the wire
    pub fn with_body(mut self, body: &[u8]) -> Self {
        self.body = encode_body(body);
        self
    }

    /// Check if the response has a body
    pub fn has_body(&self) -> bool {
        !self.body.is_empty()
    }

    /// Decode the wire body back into raw bytes
    pub fn decoded_body(&self) -> Result<Vec<u8>, base64::DecodeError> {
        decode_body(&self.body)
    }
}
