//! Binance WebSocket feed
//!
//! Static combined-stream endpoint: one connection carries the ticker and
//! partial-depth streams for every configured symbol. Keepalive is a protocol
//! ping on the configured fixed interval, plus pong replies to server pings.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use services_common::{
    ConnectionState, OrderBook, OrderBookEntry, QueueMessage, StatusSink, Ticker, normalize_symbol,
};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{ExchangeFeed, FeedConfig};

pub const EXCHANGE: &str = "Binance";

const STREAM_URL: &str = "wss://stream.binance.com:9443/stream";

/// Combined-stream envelope wrapping every payload
#[derive(Debug, Deserialize)]
struct StreamMessage {
    stream: String,
    data: serde_json::Value,
}

/// 24hr rolling ticker event
#[derive(Debug, Deserialize)]
pub struct TickerEvent {
    #[serde(rename = "e")]
    pub event_type: String,
    #[serde(rename = "E")]
    pub event_time: i64,
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "c")]
    pub last_price: String,
    #[serde(rename = "v")]
    pub volume: String,
}

/// Partial depth snapshot (top levels, full arrays each update)
#[derive(Debug, Deserialize)]
pub struct DepthSnapshot {
    #[serde(rename = "lastUpdateId")]
    pub last_update_id: u64,
    pub bids: Vec<[String; 2]>,
    pub asks: Vec<[String; 2]>,
}

/// Binance market data feed
pub struct BinanceFeed {
    config: FeedConfig,
}

impl BinanceFeed {
    pub fn new(config: FeedConfig) -> Self {
        Self { config }
    }

    /// Stream names subscribed for every configured symbol
    pub fn stream_params(symbols: &[String]) -> Vec<String> {
        symbols
            .iter()
            .flat_map(|symbol| {
                let symbol = symbol.to_lowercase();
                [format!("{symbol}@ticker"), format!("{symbol}@depth5@100ms")]
            })
            .collect()
    }

    /// Decode one text frame into at most one normalized event.
    ///
    /// Subscription acks and unrecognized payloads return `None`; a frame
    /// with a malformed numeric field also returns `None`, dropping that one
    /// message only.
    pub fn decode_frame(text: &str) -> Option<QueueMessage> {
        let message: StreamMessage = serde_json::from_str(text).ok()?;

        if let Ok(event) = serde_json::from_value::<TickerEvent>(message.data.clone()) {
            if event.event_type == "24hrTicker" {
                return decode_ticker(&event);
            }
        }

        if message.data.get("lastUpdateId").is_some() {
            // depth payloads carry no symbol; it comes from the stream name
            let raw_symbol = message.stream.split('@').next()?;
            let depth: DepthSnapshot = serde_json::from_value(message.data).ok()?;
            return decode_depth(raw_symbol, &depth);
        }

        None
    }
}

fn decode_ticker(event: &TickerEvent) -> Option<QueueMessage> {
    let price: Decimal = event.last_price.parse().ok()?;
    let volume: Decimal = event.volume.parse().ok()?;
    let timestamp = DateTime::from_timestamp_millis(event.event_time).unwrap_or_else(Utc::now);

    Some(QueueMessage::Ticker(Ticker {
        symbol: normalize_symbol(&event.symbol),
        price,
        volume,
        timestamp,
        exchange: EXCHANGE.to_string(),
    }))
}

fn decode_depth(raw_symbol: &str, depth: &DepthSnapshot) -> Option<QueueMessage> {
    Some(QueueMessage::OrderBook(OrderBook {
        symbol: normalize_symbol(raw_symbol),
        bids: parse_levels(&depth.bids)?,
        asks: parse_levels(&depth.asks)?,
        timestamp: Utc::now(),
        exchange: EXCHANGE.to_string(),
    }))
}

fn parse_levels(levels: &[[String; 2]]) -> Option<Vec<OrderBookEntry>> {
    levels
        .iter()
        .map(|level| {
            let [price, quantity] = level;
            Some(OrderBookEntry {
                price: price.parse().ok()?,
                quantity: quantity.parse().ok()?,
            })
        })
        .collect()
}

#[async_trait]
impl ExchangeFeed for BinanceFeed {
    fn exchange(&self) -> &'static str {
        EXCHANGE
    }

    async fn stream(
        &mut self,
        events: &mpsc::Sender<QueueMessage>,
        status: &dyn StatusSink,
        shutdown: &CancellationToken,
    ) -> Result<()> {
        let (ws, _) = connect_async(STREAM_URL).await.context("Binance connect")?;
        let (mut write, mut read) = ws.split();

        let subscribe = json!({
            "method": "SUBSCRIBE",
            "params": Self::stream_params(&self.config.symbols),
            "id": 1,
        });
        write
            .send(Message::Text(subscribe.to_string()))
            .await
            .context("Binance subscribe")?;
        info!(symbols = self.config.symbols.len(), "Binance subscribed");
        status.record(EXCHANGE, ConnectionState::Connected).await;

        let mut keepalive = tokio::time::interval_at(
            tokio::time::Instant::now() + self.config.ping_interval,
            self.config.ping_interval,
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
                _ = keepalive.tick() => {
                    // a failed ping ends the session and forces a reconnect
                    write
                        .send(Message::Ping(Vec::new()))
                        .await
                        .context("Binance keepalive ping")?;
                }
                frame = read.next() => match frame {
                    Some(Ok(Message::Text(text))) => match Self::decode_frame(&text) {
                        Some(event) => {
                            if events.send(event).await.is_err() {
                                return Ok(());
                            }
                        }
                        None => debug!("Binance: skipping frame"),
                    },
                    Some(Ok(Message::Ping(payload))) => {
                        write
                            .send(Message::Pong(payload))
                            .await
                            .context("Binance pong")?;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        info!(?frame, "Binance closed the stream");
                        return Ok(());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e).context("Binance receive"),
                    None => return Ok(()),
                },
            }
        }
    }
}
