use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use prompt_pages::config::Config;
use prompt_pages::server;
use prompt_pages::service::PagesService;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    // Load configuration
    let config = Config::load();

    let service = Arc::new(PagesService::from_config(&config).await?);
    let router = server::router(service, &config.server.public_dir);

    let bind: SocketAddr = config
        .server
        .bind
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid bind address {}: {e}", config.server.bind))?;
    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!(
        %bind,
        public_dir = %config.server.public_dir.display(),
        "Server is running on http://{}",
        bind
    );

    axum::serve(listener, router).await?;
    Ok(())
}
