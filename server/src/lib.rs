//! swe-swe server: Axum HTTP + WebSocket fan-out over `swe_core::session`.

mod recording_api;
mod repo_api;
mod routes;
mod state;
mod ws;

use std::net::SocketAddr;

use swe_core::config::Config;
use swe_core::registry::Registry;

use state::AppState;

/// Build the router, bind `cfg.port`, and serve until SIGTERM/SIGINT, then
/// wait up to `cfg.shutdown_grace` for every session to exit (spec.md §5).
pub async fn run_server(cfg: &'static Config) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let recordings_root = Some(cfg.recordings_root.clone());
    let registry = Registry::new(recordings_root, cfg.max_upload_bytes);
    registry.spawn_background_tasks(cfg);

    let router = routes::build_router(AppState { registry: registry.clone() });

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "swe-server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!(grace = ?cfg.shutdown_grace, "shutting down sessions");
    registry.shutdown(cfg.shutdown_grace).await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
