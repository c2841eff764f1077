//! The wsrtunnel Gateway: accepts public HTTP traffic on any path plus the
//! single Agent WebSocket on `/_ws`, and multiplexes HTTP exchanges over
//! that one link. See SPEC_FULL.md for the protocol this implements.

pub mod error;
mod handlers;
pub mod state;

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::UnixListener;
use tracing::info;

pub use state::GatewayState;
/// The wire frame types, re-exported under the name this library's own
/// surface uses for them.
pub use wire as frame;

/// Build the Gateway's axum [`Router`](axum::Router), independent of how it
/// is served. Tests bind this over a plain TCP listener; [`run`] binds it
/// over the real UNIX domain socket.
pub fn app(state: Arc<GatewayState>) -> axum::Router {
    handlers::router(state)
}

/// Bind the UNIX domain socket at `path` (removing any stale socket file
/// left behind by a previous run) and serve the Gateway until the process
/// receives Ctrl-C.
pub async fn run(path: &Path) -> anyhow::Result<()> {
    if path.exists() {
        std::fs::remove_file(path)
            .with_context(|| format!("removing stale socket at {}", path.display()))?;
    }

    let listener = UnixListener::bind(path)
        .with_context(|| format!("binding unix socket at {}", path.display()))?;
    info!(path = %path.display(), "gateway listening");

    let state = GatewayState::new();
    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("gateway server error")
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received"),
        Err(e) => tracing::error!(error = %e, "failed to install ctrl-c handler"),
    }
}
