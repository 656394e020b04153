//! Standalone swe-swe server binary.

use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env().add_directive("swe_server=info".parse()?)).init();

    let cfg = swe_core::config::ensure_loaded();
    swe_server::run_server(cfg).await
}
