//! Relay server bootstrap and router wiring.

use std::{net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use axum::{
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tracing::info;

use courier_dispatch::{DispatchEngine, DispatchOptions};
use courier_provider::{MessageSender, TokenRefresher};

mod endpoints;
mod send_handlers;
mod token_handlers;
mod types;

use endpoints::{
    HEALTH_ENDPOINT, REFRESH_TOKEN_ENDPOINT, SEND_MESSAGE_ENDPOINT, SEND_SEQUENTIAL_ENDPOINT,
};
use send_handlers::{handle_send_message, handle_send_sequential};
use token_handlers::{handle_health, handle_refresh_token};

#[derive(Debug, Clone)]
/// Runtime configuration for the relay HTTP server.
pub struct RelayServerConfig {
    pub bind: String,
    pub parallel_options: DispatchOptions,
    pub sequential_options: DispatchOptions,
}

/// Shared state behind every route handler.
pub struct RelayServerState {
    pub(crate) engine: Arc<DispatchEngine>,
    pub(crate) refresher: Arc<dyn TokenRefresher>,
    pub(crate) config: RelayServerConfig,
}

impl RelayServerState {
    pub fn new(
        sender: Arc<dyn MessageSender>,
        refresher: Arc<dyn TokenRefresher>,
        config: RelayServerConfig,
    ) -> Self {
        Self {
            engine: Arc::new(DispatchEngine::new(sender, Arc::clone(&refresher))),
            refresher,
            config,
        }
    }
}

pub fn build_relay_router(state: Arc<RelayServerState>) -> Router {
    Router::new()
        .route(SEND_MESSAGE_ENDPOINT, post(handle_send_message))
        .route(SEND_SEQUENTIAL_ENDPOINT, post(handle_send_sequential))
        .route(REFRESH_TOKEN_ENDPOINT, post(handle_refresh_token))
        .route(HEALTH_ENDPOINT, get(handle_health))
        .with_state(state)
}

/// Binds the configured address and serves the relay API until ctrl-c.
pub async fn run_relay_server(state: Arc<RelayServerState>) -> Result<()> {
    let bind_addr = state
        .config
        .bind
        .parse::<SocketAddr>()
        .with_context(|| format!("invalid --bind '{}'", state.config.bind))?;
    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind relay server on {bind_addr}"))?;
    let local_addr = listener
        .local_addr()
        .context("failed to resolve bound relay server address")?;
    info!(addr = %local_addr, "relay server listening");

    let app = build_relay_router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("relay server exited unexpectedly")
}
