use base64::{Engine as _, engine::general_purpose::STANDARD};

/// Body field of `request`/`response` frames: standard base64 with padding.
/// An empty string is an empty body.
pub fn encode_body(body: &[u8]) -> String {
    STANDARD.encode(body)
}

pub fn decode_body(encoded: &str) -> Result<Vec<u8>, base64::DecodeError> {
    STANDARD.decode(encoded)
}
