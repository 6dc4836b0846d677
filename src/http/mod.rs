//! HTTP surface: axum router, extractors and error rendering.

pub mod error;
pub mod extract;
pub mod routes;

use std::net::SocketAddr;

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub use routes::create_router;

/// Router with request tracing; what `serve` runs and tests drive.
pub fn app(state: AppState) -> Router {
    create_router(state).layer(TraceLayer::new_for_http())
}

/// Serve until ctrl-c.
pub async fn serve(state: AppState) -> anyhow::Result<()> {
    let bind = state.config.bind;
    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("bind {bind}"))?;
    let addr = listener.local_addr().context("read bound address")?;
    tracing::info!(target: "autosentinel", event = "server_listening", %addr);

    axum::serve(
        listener,
        app(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("http server")?;

    tracing::info!(target: "autosentinel", event = "server_stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(target: "autosentinel", event = "signal_listener_failed", error = %err);
        std::future::pending::<()>().await;
    }
    tracing::info!(target: "autosentinel", event = "shutdown_requested");
}
