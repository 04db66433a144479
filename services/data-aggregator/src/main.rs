//! Data aggregator binary: the queue's single consumer

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use data_aggregator::Processor;
use services_common::{
    AppConfig, CONNECT_MAX_RETRIES, CONNECT_RETRY_DELAY_SECS, MarketCache, QueueClient,
};
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
    info!("starting data aggregator");

    // an unreachable broker at boot is fatal: nothing to consume from
    let queue = QueueClient::connect(
        &config.broker.url(),
        CONNECT_MAX_RETRIES,
        Duration::from_secs(CONNECT_RETRY_DELAY_SECS),
    )
    .await?;
    let cache = MarketCache::connect(&config.cache.url()).await?;
    let processor = Arc::new(Processor::new(cache));

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            signal.cancel();
        }
    });

    queue
        .consume(
            move |payload| {
                let processor = processor.clone();
                async move { processor.handle(payload).await }
            },
            shutdown,
        )
        .await;

    Ok(())
}
