use rand::distributions::Alphanumeric;
use rand::{Rng, thread_rng};
use uuid::Uuid;

/// Length of generated subdomains
pub const SUBDOMAIN_LEN: usize = 12;

/// Generate a random, URL-safe subdomain
/// Format: 12 lowercase alphanumeric characters
pub fn generate_subdomain() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SUBDOMAIN_LEN)
        .map(|c| c.to_ascii_lowercase())
        .map(char::from)
        .collect()
}

/// Generate a unique request identifier: `req_` followed by a UUID v4
pub fn generate_request_id() -> String {
    format!("req_{}", Uuid::new_v4())
}

/// Generate a fresh client identity for agents that were not given one
pub fn generate_client_id() -> String {
    Uuid::new_v4().to_string()
}
