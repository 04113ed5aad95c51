//! Reverse tunnel relay
//!
//! Clients keep one control WebSocket open to the relay and are given a stable public
//! subdomain. Public HTTP calls for that subdomain are framed onto the control
//! connection and completed when the client answers.

use std::sync::Arc;

use crate::auth::TokenVerifier;
use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::identity::{BindingStore, IdentityResolver};
use crate::pending::PendingRequestTable;
use crate::registry::SubdomainRegistry;

pub mod auth;
pub mod config;
pub mod control;
pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod identity;
pub mod pending;
pub mod registry;
pub mod server;
pub mod sink;

pub use error::RelayError;
pub use server::{Relay, serve};

/// Shared components handed to every listener and control session
#[derive(Clone)]
pub struct RelayState {
    pub config: Arc<Config>,
    pub registry: Arc<SubdomainRegistry>,
    pub pending: Arc<PendingRequestTable>,
    pub dispatcher: Arc<Dispatcher>,
    pub resolver: Arc<IdentityResolver>,
    pub verifier: Arc<dyn TokenVerifier>,
}

impl RelayState {
    pub fn new(
        config: Config,
        verifier: Arc<dyn TokenVerifier>,
        store: Arc<dyn BindingStore>,
    ) -> Self {
        let registry = Arc::new(SubdomainRegistry::new());
        let pending = Arc::new(PendingRequestTable::new());
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&registry),
            Arc::clone(&pending),
            config.request_timeout,
        ));

        Self {
            config: Arc::new(config),
            registry,
            pending,
            dispatcher,
            resolver: Arc::new(IdentityResolver::new(store)),
            verifier,
        }
    }
}
