use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tunnel_relay_common::{TunnelBinding, current_timestamp_secs};

use super::{BindOutcome, BindingStore, StoreError};

/// Process-local bindings; identities are forgotten on restart
#[derive(Debug, Default)]
pub struct MemoryBindingStore {
    inner: Mutex<Bindings>,
}

#[derive(Debug, Default)]
struct Bindings {
    by_subdomain: HashMap<String, TunnelBinding>,
    by_client: HashMap<String, String>,
}

impl MemoryBindingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BindingStore for MemoryBindingStore {
    async fn get_subdomain(&self, client_id: &str) -> Result<Option<String>, StoreError> {
        Ok(self.inner.lock().await.by_client.get(client_id).cloned())
    }

    async fn bind_subdomain(
        &self,
        subdomain: &str,
        client_id: &str,
    ) -> Result<BindOutcome, StoreError> {
        let mut bindings = self.inner.lock().await;

        if let Some(existing) = bindings.by_subdomain.get(subdomain) {
            return Ok(if existing.is_owned_by(client_id) {
                BindOutcome::AlreadyBound
            } else {
                BindOutcome::SubdomainTaken {
                    owner: existing.client_id.clone(),
                }
            });
        }

        if let Some(existing) = bindings.by_client.get(client_id) {
            return Ok(BindOutcome::ClientBound {
                subdomain: existing.clone(),
            });
        }

        bindings
            .by_client
            .insert(client_id.to_string(), subdomain.to_string());
        bindings.by_subdomain.insert(
            subdomain.to_string(),
            TunnelBinding::new(
                subdomain.to_string(),
                client_id.to_string(),
                current_timestamp_secs(),
            ),
        );

        Ok(BindOutcome::Bound)
    }
}
