//! Market connector binary: one supervised feed per configured exchange

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use market_connector::exchanges::{BinanceFeed, KuCoinFeed};
use market_connector::{FeedConfig, supervisor};
use services_common::{
    AppConfig, CONNECT_MAX_RETRIES, CONNECT_RETRY_DELAY_SECS, MarketCache, QueueClient, StatusSink,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const EVENT_BUFFER: usize = 1024;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AppConfig::from_env();
    info!(symbols = ?config.symbols, exchanges = ?config.exchanges, "starting market connector");

    // an unreachable broker at boot is fatal: nothing downstream can work
    let queue = QueueClient::connect(
        &config.broker.url(),
        CONNECT_MAX_RETRIES,
        Duration::from_secs(CONNECT_RETRY_DELAY_SECS),
    )
    .await?;
    let status: Arc<dyn StatusSink> = Arc::new(MarketCache::connect(&config.cache.url()).await?);

    let shutdown = CancellationToken::new();
    let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);

    let feed_config = FeedConfig {
        symbols: config.symbols.clone(),
        ping_interval: config.ping_interval,
    };

    let mut feeds = Vec::new();
    for exchange in &config.exchanges {
        match exchange.as_str() {
            "Binance" => feeds.push(tokio::spawn(supervisor::run_feed(
                BinanceFeed::new(feed_config.clone()),
                events_tx.clone(),
                status.clone(),
                config.reconnect_delay,
                shutdown.clone(),
            ))),
            "KuCoin" => feeds.push(tokio::spawn(supervisor::run_feed(
                KuCoinFeed::new(feed_config.clone()),
                events_tx.clone(),
                status.clone(),
                config.reconnect_delay,
                shutdown.clone(),
            ))),
            other => warn!(exchange = other, "no connector for exchange, skipping"),
        }
    }
    drop(events_tx);

    let publisher = tokio::spawn(supervisor::publish_events(
        queue,
        events_rx,
        shutdown.clone(),
    ));

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    shutdown.cancel();

    for feed in feeds {
        let _ = feed.await;
    }
    let _ = publisher.await;
    Ok(())
}
