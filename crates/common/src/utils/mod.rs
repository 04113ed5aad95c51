
mod body;
mod headers;
mod id;
mod time;
pub use body::{decode_body, encode_body};
pub use headers::{headers_to_map, is_hop_by_hop, map_to_headers};
pub use id::{generate_client_id, generate_request_id, generate_subdomain};
pub use time::{current_timestamp_millis, current_timestamp_secs};
