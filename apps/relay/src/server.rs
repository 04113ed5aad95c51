//! Listeners
//!
//! The relay binds two ports: the control listener where clients open their tunnel
//! WebSocket, and the public listener that every tunneled HTTP call arrives on.

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use axum::routing::get;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::RelayState;
use crate::auth::verifier_from_config;
use crate::config::Config;
use crate::handlers::{control_upgrade, forward_request, health, status, sweep_pending};
use crate::identity::{BindingStore, MemoryBindingStore, SqliteBindingStore};

/// Routes served on the control port
pub fn control_router(state: RelayState) -> Router {
    Router::new()
        .route("/", get(control_upgrade))
        .route("/connect", get(control_upgrade))
        .route("/health", get(health))
        .route("/status", get(status))
        .with_state(state)
}

/// Every method and path on the public port goes to the dispatcher
pub fn public_router(state: RelayState) -> Router {
    Router::new()
        .fallback(forward_request)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Binding store selected by configuration
pub async fn open_store(config: &Config) -> Result<Arc<dyn BindingStore>> {
    match &config.database {
        Some(path) => {
            let store = SqliteBindingStore::open(path)
                .await
                .with_context(|| format!("Failed to open database {}", path.display()))?;
            Ok(Arc::new(store))
        }
        None => {
            info!("No database configured, bindings are kept in memory");
            Ok(Arc::new(MemoryBindingStore::new()))
        }
    }
}

/// A relay with both listeners bound but not yet serving
pub struct Relay {
    state: RelayState,
    control: TcpListener,
    public: TcpListener,
}

impl Relay {
    pub async fn bind(config: Config) -> Result<Self> {
        let store = open_store(&config).await?;
        let verifier = verifier_from_config(&config.auth);
        Self::bind_with(RelayState::new(config, verifier, store)).await
    }

    pub async fn bind_with(state: RelayState) -> Result<Self> {
        let control = TcpListener::bind(state.config.control_addr)
            .await
            .with_context(|| format!("Failed to bind control listener {}", state.config.control_addr))?;
        let public = TcpListener::bind(state.config.http_addr)
            .await
            .with_context(|| format!("Failed to bind HTTP listener {}", state.config.http_addr))?;

        Ok(Self {
            state,
            control,
            public,
        })
    }

    pub fn state(&self) -> &RelayState {
        &self.state
    }

    pub fn control_addr(&self) -> Result<SocketAddr> {
        Ok(self.control.local_addr()?)
    }

    pub fn http_addr(&self) -> Result<SocketAddr> {
        Ok(self.public.local_addr()?)
    }

    /// Serve both listeners and the pending-request sweeper until a listener fails
    pub async fn run(self) -> Result<()> {
        let config = Arc::clone(&self.state.config);
        info!("Control listener on {}", self.control_addr()?);
        info!(
            "Public listener on {} for *.{}",
            self.http_addr()?,
            config.domain
        );

        let sweeper = tokio::spawn(sweep_pending(
            Arc::clone(&self.state.pending),
            config.request_timeout + config.sweep_interval,
            config.sweep_interval,
        ));

        let control = axum::serve(self.control, control_router(self.state.clone()));
        let public = axum::serve(self.public, public_router(self.state));

        let result = tokio::select! {
            result = control.into_future() => result.context("Control listener failed"),
            result = public.into_future() => result.context("HTTP listener failed"),
        };

        sweeper.abort();
        result
    }
}

/// Run the relay until Ctrl-C
pub async fn serve(config: Config) -> Result<()> {
    let relay = Relay::bind(config).await?;

    tokio::select! {
        result = relay.run() => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl-C, shutting down");
            Ok(())
        }
    }
}
