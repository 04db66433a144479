//! Gateway binary: WebSocket fan-out server

use std::sync::Arc;

use anyhow::Result;
use gateway::{AppState, router};
use services_common::{AppConfig, MarketCache};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AppConfig::from_env();
    let cache = Arc::new(MarketCache::connect(&config.cache.url()).await?);
    let shutdown = CancellationToken::new();

    let state = AppState {
        cache,
        exchanges: Arc::new(config.exchanges.clone()),
        shutdown: shutdown.clone(),
    };

    let listener = tokio::net::TcpListener::bind(&config.gateway_addr).await?;
    info!(addr = %config.gateway_addr, "gateway listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
            shutdown.cancel();
        })
        .await?;

    Ok(())
}
