//! Input validation for security-critical data
//!
//! Everything a control client or a public caller hands to the relay passes through
//! these checks before it reaches logs, persistence or a routing decision.

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// A single DNS label: lowercase alphanumerics and inner hyphens, at most 63 characters
static SUBDOMAIN_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?$").unwrap());

/// Regex for validating request IDs (req_ prefix + UUID format)
static REQUEST_ID_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^req_[a-f0-9]{8}-[a-f0-9]{4}-[a-f0-9]{4}-[a-f0-9]{4}-[a-f0-9]{12}$").unwrap()
});

/// Client identities are opaque but bounded and printable
static CLIENT_ID_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.:@=-]{1,128}$").unwrap());

/// Maximum length for forwarded request targets (path + query)
pub const MAX_PATH_LENGTH: usize = 8192;

/// Maximum length for a single forwarded header value
pub const MAX_HEADER_VALUE_LENGTH: usize = 8192;

/// Validation errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid subdomain format: {0}")]
    InvalidSubdomain(String),

    #[error("Invalid request ID format: {0}")]
    InvalidRequestId(String),

    #[error("Invalid client ID format: {0}")]
    InvalidClientId(String),

    #[error("Path too long: {0} bytes (max: {1})")]
    PathTooLong(usize, usize),

    #[error("Header value too long: {0} bytes (max: {1})")]
    HeaderValueTooLong(usize, usize),
}

/// Keep attacker-controlled input short in error messages and logs
fn truncate(input: &str) -> String {
    input.chars().take(50).collect()
}

/// Validate subdomain format
///
/// # Examples
///
/// ```
/// use tunnel_relay_common::validation::validate_subdomain;
///
/// assert!(validate_subdomain("abc123def456").is_ok());
/// assert!(validate_subdomain("x7q2").is_ok());
/// assert!(validate_subdomain("INVALID").is_err());
/// assert!(validate_subdomain("-leading").is_err());
/// ```
pub fn validate_subdomain(subdomain: &str) -> Result<(), ValidationError> {
    if !SUBDOMAIN_REGEX.is_match(subdomain) {
        return Err(ValidationError::InvalidSubdomain(truncate(subdomain)));
    }
    Ok(())
}

/// Validate request ID format
///
/// Request IDs must start with "req_" followed by a UUID.
///
/// ```
/// use tunnel_relay_common::validation::validate_request_id;
///
/// assert!(validate_request_id("req_550e8400-e29b-41d4-a716-446655440000").is_ok());
/// assert!(validate_request_id("invalid").is_err());
/// ```
pub fn validate_request_id(id: &str) -> Result<(), ValidationError> {
    if !REQUEST_ID_REGEX.is_match(id) {
        return Err(ValidationError::InvalidRequestId(truncate(id)));
    }
    Ok(())
}

/// Validate the identity a client presents in its `auth` frame
pub fn validate_client_id(id: &str) -> Result<(), ValidationError> {
    if !CLIENT_ID_REGEX.is_match(id) {
        return Err(ValidationError::InvalidClientId(truncate(id)));
    }
    Ok(())
}

/// Validate and sanitize an HTTP request target
///
/// - Removes control characters
/// - Enforces length limits
/// - Ensures the target starts with /
pub fn validate_path(path: &str) -> Result<String, ValidationError> {
    if path.len() > MAX_PATH_LENGTH {
        return Err(ValidationError::PathTooLong(path.len(), MAX_PATH_LENGTH));
    }

    let sanitized: String = path.chars().filter(|c| !c.is_control()).collect();

    if sanitized.is_empty() {
        Ok("/".to_string())
    } else if sanitized.starts_with('/') {
        Ok(sanitized)
    } else {
        Ok(format!("/{}", sanitized))
    }
}

/// Sanitize a header value before it crosses the tunnel
///
/// Control characters are removed, except tab which HTTP allows.
pub fn sanitize_header_value(value: &str) -> Result<String, ValidationError> {
    if value.len() > MAX_HEADER_VALUE_LENGTH {
        return Err(ValidationError::HeaderValueTooLong(
            value.len(),
            MAX_HEADER_VALUE_LENGTH,
        ));
    }

    Ok(value
        .chars()
        .filter(|c| !c.is_control() || *c == '\t')
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_subdomain_valid() {
        assert!(validate_subdomain("abc123def456").is_ok());
        assert!(validate_subdomain("x7q2").is_ok());
        assert!(validate_subdomain("a").is_ok());
        assert!(validate_subdomain("my-app").is_ok());
        assert!(validate_subdomain(&"a".repeat(63)).is_ok());
    }

    #[test]
    fn test_validate_subdomain_invalid() {
        assert!(validate_subdomain("ABC123").is_err()); // uppercase
        assert!(validate_subdomain("").is_err()); // empty
        assert!(validate_subdomain("-abc").is_err()); // leading hyphen
        assert!(validate_subdomain("abc-").is_err()); // trailing hyphen
        assert!(validate_subdomain("a.b").is_err()); // more than one label
        assert!(validate_subdomain(&"a".repeat(64)).is_err()); // too long
        assert!(validate_subdomain("../../etc").is_err());
    }

    #[test]
    fn test_validate_request_id() {
        assert!(validate_request_id("req_550e8400-e29b-41d4-a716-446655440000").is_ok());
        assert!(validate_request_id("req_12345").is_err());
        assert!(validate_request_id("550e8400-e29b-41d4-a716-446655440000").is_err()); // no prefix
        assert!(validate_request_id("").is_err());
    }

    #[test]
    fn test_validate_client_id() {
        assert!(validate_client_id("abc").is_ok());
        assert!(validate_client_id("550e8400-e29b-41d4-a716-446655440000").is_ok());
        assert!(validate_client_id("user@laptop:dev").is_ok());
        assert!(validate_client_id("").is_err());
        assert!(validate_client_id("has space").is_err());
        assert!(validate_client_id("line\nbreak").is_err());
        assert!(validate_client_id(&"a".repeat(129)).is_err());
    }

    #[test]
    fn test_error_message_is_truncated() {
        let long = "X".repeat(500);
        match validate_client_id(&long) {
            Err(ValidationError::InvalidClientId(shown)) => assert_eq!(shown.len(), 50),
            other => panic!("Expected InvalidClientId, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_path() {
        assert_eq!(validate_path("/foo/bar?x=1").unwrap(), "/foo/bar?x=1");
        assert_eq!(validate_path("foo/bar").unwrap(), "/foo/bar");
        assert_eq!(validate_path("").unwrap(), "/");

        let sanitized = validate_path("/foo\x00/bar\n/baz").unwrap();
        assert_eq!(sanitized, "/foo/bar/baz");

        let long_path = "/".to_string() + &"a".repeat(MAX_PATH_LENGTH);
        assert_eq!(
            validate_path(&long_path),
            Err(ValidationError::PathTooLong(MAX_PATH_LENGTH + 1, MAX_PATH_LENGTH))
        );
    }

    #[test]
    fn test_sanitize_header_value() {
        assert_eq!(sanitize_header_value("text/html").unwrap(), "text/html");
        assert_eq!(
            sanitize_header_value("value\twith\ttabs").unwrap(),
            "value\twith\ttabs"
        );

        let sanitized = sanitize_header_value("evil\r\nx-injected: 1").unwrap();
        assert_eq!(sanitized, "evilx-injected: 1");

        let long_value = "a".repeat(MAX_HEADER_VALUE_LENGTH + 1);
        assert!(matches!(
            sanitize_header_value(&long_value),
            Err(ValidationError::HeaderValueTooLong(_, _))
        ));
    }
}
