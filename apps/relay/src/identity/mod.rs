//! Identity Resolver
//!
//! Gives every client identity one stable subdomain. The mapping lives in a
//! [`BindingStore`]; the store's unique constraints make first-time registration
//! atomic, and the resolver only interprets the outcome.

mod memory;
mod sqlite;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};
use tunnel_relay_common::generate_subdomain;

use crate::error::RelayError;

pub use memory::MemoryBindingStore;
pub use sqlite::SqliteBindingStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Inconsistent binding state: {0}")]
    Inconsistent(String),
}

/// Result of trying to persist a `(subdomain, client_id)` pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindOutcome {
    /// The pair was stored
    Bound,
    /// The exact pair already existed
    AlreadyBound,
    /// The subdomain belongs to a different client
    SubdomainTaken { owner: String },
    /// The client won a concurrent registration with another subdomain
    ClientBound { subdomain: String },
}

/// Durable subdomain ↔ client identity bindings
#[async_trait]
pub trait BindingStore: Send + Sync {
    async fn get_subdomain(&self, client_id: &str) -> Result<Option<String>, StoreError>;

    async fn bind_subdomain(
        &self,
        subdomain: &str,
        client_id: &str,
    ) -> Result<BindOutcome, StoreError>;
}

pub struct IdentityResolver {
    store: Arc<dyn BindingStore>,
}

impl IdentityResolver {
    pub fn new(store: Arc<dyn BindingStore>) -> Self {
        Self { store }
    }

    /// Return the subdomain bound to `client_id`, creating the binding on first sight
    pub async fn resolve(&self, client_id: &str) -> Result<String, RelayError> {
        if let Some(subdomain) = self.store.get_subdomain(client_id).await? {
            return Ok(subdomain);
        }

        let candidate = generate_subdomain();
        match self.store.bind_subdomain(&candidate, client_id).await? {
            BindOutcome::Bound | BindOutcome::AlreadyBound => {
                info!("Bound new subdomain {} for client {}", candidate, client_id);
                Ok(candidate)
            }
            BindOutcome::ClientBound { subdomain } => Ok(subdomain),
            BindOutcome::SubdomainTaken { owner } => {
                // A concurrent registration for this client may have landed meanwhile.
                if let Some(subdomain) = self.store.get_subdomain(client_id).await? {
                    return Ok(subdomain);
                }
                warn!(
                    "Subdomain {} already owned by {}, refusing client {}",
                    candidate, owner, client_id
                );
                Err(RelayError::PersistenceConflict {
                    subdomain: candidate,
                })
            }
        }
    }
}
