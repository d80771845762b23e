//! Relay Server - WebSocket front end for the session relay.
//!
//! This crate provides:
//! - a WebSocket endpoint on `/` speaking the relay's JSON message protocol
//! - a `/health` check
//! - one session bridge per connection, tracked by the session registry
//!
//! Each session drives an agent runtime (the Claude Code CLI by default) in
//! the configured working directory.

#![deny(clippy::print_stdout, clippy::print_stderr)]

pub mod config;
pub mod error;
pub mod registry;
pub mod state;
pub mod websocket;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::http::Uri;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

pub use config::{RuntimeKind, ServerConfig};
pub use error::{AppError, AppResult};
pub use registry::SessionRegistry;
pub use state::AppState;

/// Run the server with the given configuration.
pub async fn run(config: ServerConfig) -> anyhow::Result<()> {
    run_with_shutdown(config, std::future::pending()).await
}

/// Run the server with graceful shutdown support.
pub async fn run_with_shutdown<F>(config: ServerConfig, shutdown: F) -> anyhow::Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let addr: SocketAddr = config.listen_addr.parse()?;
    let state = Arc::new(AppState::new(config)?);
    let state_for_cleanup = Arc::clone(&state);
    let app = create_router_with_state(state);

    let listener = TcpListener::bind(addr).await?;
    info!("Relay server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    // Close every bridge so runtimes are stopped before exit.
    info!("Server shutting down, cleaning up active sessions...");
    state_for_cleanup.registry.shutdown_all().await;

    Ok(())
}

/// Create the application router with an Arc-wrapped state.
///
/// Keeps a handle to the state available for shutdown cleanup.
pub fn create_router_with_state(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(websocket::routes())
        .fallback(not_found)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn not_found(uri: Uri) -> AppError {
    AppError::NotFound(uri.path().to_string())
}
