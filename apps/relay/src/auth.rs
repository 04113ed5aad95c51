//! Token verification for control connections
//!
//! A client proves it may open a tunnel by presenting a token in its `auth` frame.
//! The relay is configured with exactly one verifier: a shared secret compared in
//! constant time, or an HS256 JWT signed with a shared key.

use std::sync::Arc;

use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

use crate::config::AuthConfig;
use crate::error::RelayError;

/// Decides whether a presented token grants access
pub trait TokenVerifier: Send + Sync {
    fn is_valid_token(&self, token: &str) -> bool;
}

/// Build the verifier selected by configuration
pub fn verifier_from_config(auth: &AuthConfig) -> Arc<dyn TokenVerifier> {
    match auth {
        AuthConfig::SharedToken(token) => Arc::new(SharedToken::new(token.clone())),
        AuthConfig::Jwt { secret } => Arc::new(JwtVerifier::new(secret)),
    }
}

/// A single secret shared by the relay and all of its clients
pub struct SharedToken {
    expected: String,
}

impl SharedToken {
    pub fn new(expected: impl Into<String>) -> Self {
        Self {
            expected: expected.into(),
        }
    }
}

impl TokenVerifier for SharedToken {
    fn is_valid_token(&self, token: &str) -> bool {
        if self.expected.is_empty() {
            return false;
        }
        token.as_bytes().ct_eq(self.expected.as_bytes()).into()
    }
}

/// JWT Claims structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // Subject (user ID)
    pub exp: usize,  // Expiration time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<usize>, // Issued at
}

/// HS256 tokens signed with a shared key
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    /// Decode and validate a token, returning its claims
    pub fn validate(&self, token: &str) -> Result<Claims, RelayError> {
        decode::<Claims>(token, &self.key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| {
                warn!("Token validation failed: {}", e);
                RelayError::AuthenticationFailure("invalid or expired token".to_string())
            })
    }
}

impl TokenVerifier for JwtVerifier {
    fn is_valid_token(&self, token: &str) -> bool {
        if token.is_empty() {
            return false;
        }
        match self.validate(token) {
            Ok(claims) => {
                debug!("Token validated for subject: {}", claims.sub);
                true
            }
            Err(_) => false,
        }
    }
}
