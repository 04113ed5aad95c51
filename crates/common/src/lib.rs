//! Common utilities and types for the tunnel relay
//!
//! This crate provides the control-channel wire protocol, shared data structures and
//! utilities used by both the relay (public side) and the agent (client side).

pub mod constants;
pub mod error;
pub mod models;
pub mod protocol;
pub mod utils;
pub mod validation;

// Re-export commonly used types for convenience
pub use error::{Result, TunnelError};
pub use models::{ConnectionMetadata, TunnelBinding};
pub use protocol::{ErrorCode, HttpRequest, HttpResponse, Message};
pub use utils::{
    current_timestamp_millis, current_timestamp_secs, decode_body, encode_body,
    generate_client_id, generate_request_id, generate_subdomain, headers_to_map, is_hop_by_hop,
    map_to_headers,
};
