//! KuCoin WebSocket feed
//!
//! Token-bootstrapped endpoint: every session first POSTs the public bullet
//! endpoint for a token, the server address, and the keepalive interval the
//! server expects, which overrides the configured fallback. Keepalive is a
//! JSON ping message, not a protocol ping frame.

use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use rustc_hash::FxHashMap;
use serde::Deserialize;
use serde_json::json;
use services_common::{
    ConnectionState, OrderBook, OrderBookEntry, QueueMessage, StatusSink, Ticker, normalize_symbol,
};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{ExchangeFeed, FeedConfig};
use tracing::{debug, info, warn};

pub const EXCHANGE: &str = "KuCoin";

const BULLET_URL: &str = "https://api.kucoin.com/api/v1/bullet-public";
const STATS_URL: &str = "https://api.kucoin.com/api/v1/market/stats";
const TICKER_TOPIC: &str = "/market/ticker";
const DEPTH_TOPIC: &str = "/spotMarket/level2Depth5";

/// How long a fallback volume stays served for a symbol
const VOLUME_TTL: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct BulletResponse {
    data: BulletData,
}

#[derive(Debug, Deserialize)]
struct BulletData {
    token: String,
    #[serde(rename = "instanceServers")]
    instance_servers: Vec<InstanceServer>,
}

#[derive(Debug, Deserialize)]
struct InstanceServer {
    endpoint: String,
    #[serde(rename = "pingInterval")]
    ping_interval: u64,
}

/// Generic message envelope; `kind` distinguishes welcome/ack/pong/message
#[derive(Debug, Deserialize)]
struct WsMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    topic: String,
    #[serde(default)]
    data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct TickerPayload {
    price: Option<String>,
    #[serde(rename = "volValue")]
    vol_value: Option<String>,
    vol: Option<String>,
    time: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct DepthPayload {
    #[serde(default)]
    bids: Vec<[String; 2]>,
    #[serde(default)]
    asks: Vec<[String; 2]>,
    timestamp: Option<i64>,
}

/// Per-symbol 24h volume fallback with bounded staleness
///
/// Owned by the feed; an entry older than the TTL is treated as absent so a
/// quiet symbol cannot keep serving an arbitrarily old volume.
pub struct VolumeCache {
    ttl: Duration,
    entries: FxHashMap<String, (Decimal, Instant)>,
}

impl VolumeCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: FxHashMap::default(),
        }
    }

    pub fn insert(&mut self, pair: &str, volume: Decimal) {
        self.entries.insert(pair.to_string(), (volume, Instant::now()));
    }

    pub fn get(&self, pair: &str) -> Option<Decimal> {
        self.entries
            .get(pair)
            .filter(|(_, stored_at)| stored_at.elapsed() < self.ttl)
            .map(|(volume, _)| *volume)
    }
}

/// KuCoin market data feed
pub struct KuCoinFeed {
    config: FeedConfig,
    http: reqwest::Client,
    volumes: VolumeCache,
}

impl KuCoinFeed {
    pub fn new(config: FeedConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
            volumes: VolumeCache::new(VOLUME_TTL),
        }
    }

    /// Dashed pair form used on KuCoin topics: `BTCUSDT` -> `BTC-USDT`
    pub fn pair_name(symbol: &str) -> String {
        let symbol = symbol.to_uppercase();
        if symbol.contains('-') {
            return symbol;
        }
        match symbol.strip_suffix("USDT") {
            Some(base) if !base.is_empty() => format!("{base}-USDT"),
            _ => symbol,
        }
    }

    /// Topics subscribed for every configured symbol
    pub fn subscription_topics(symbols: &[String]) -> Vec<String> {
        symbols
            .iter()
            .flat_map(|symbol| {
                let pair = Self::pair_name(symbol);
                [
                    format!("{TICKER_TOPIC}:{pair}"),
                    format!("{DEPTH_TOPIC}:{pair}"),
                ]
            })
            .collect()
    }

    /// Decode one text frame into at most one normalized event.
    async fn decode_frame(&mut self, text: &str) -> Option<QueueMessage> {
        let message: WsMessage = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(e) => {
                debug!("KuCoin: unparseable frame: {e}");
                return None;
            }
        };
        if message.kind != "message" {
            // welcome / ack / pong
            return None;
        }

        let (topic, pair) = message.topic.split_once(':')?;
        // level2 payloads nest the book one level deeper
        let payload = match message.data.get("data") {
            Some(inner) => inner.clone(),
            None => message.data,
        };

        match topic {
            TICKER_TOPIC => self.decode_ticker(pair, &payload).await,
            DEPTH_TOPIC => decode_depth(pair, &payload),
            _ => {
                debug!(topic, "KuCoin: unhandled topic");
                None
            }
        }
    }

    async fn decode_ticker(&mut self, pair: &str, payload: &serde_json::Value) -> Option<QueueMessage> {
        let fields: TickerPayload = serde_json::from_value(payload.clone()).ok()?;
        // a malformed price drops this message only
        let price: Decimal = fields.price.as_deref()?.parse().ok()?;
        let timestamp = fields
            .time
            .and_then(DateTime::from_timestamp_millis)
            .unwrap_or_else(Utc::now);

        let volume = match reported_volume(&fields) {
            Some(volume) => volume,
            None => self.fallback_volume(pair).await,
        };

        Some(QueueMessage::Ticker(Ticker {
            symbol: normalize_symbol(pair),
            price,
            volume,
            timestamp,
            exchange: EXCHANGE.to_string(),
        }))
    }

    /// 24h stats lookup, cached per symbol.
    ///
    /// The endpoint result refreshes the cache; when the endpoint fails, a
    /// still-fresh cached value is served, otherwise zero.
    async fn fallback_volume(&mut self, pair: &str) -> Decimal {
        match self.fetch_volume(pair).await {
            Ok(volume) => {
                self.volumes.insert(pair, volume);
                volume
            }
            Err(e) => {
                warn!(pair, "KuCoin stats lookup failed: {e:#}");
                self.volumes.get(pair).unwrap_or(Decimal::ZERO)
            }
        }
    }

    async fn fetch_volume(&self, pair: &str) -> Result<Decimal> {
        #[derive(Deserialize)]
        struct Stats {
            data: StatsData,
        }
        #[derive(Deserialize)]
        struct StatsData {
            #[serde(rename = "volValue")]
            vol_value: Option<String>,
        }

        let stats: Stats = self
            .http
            .get(STATS_URL)
            .query(&[("symbol", pair)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        stats
            .data
            .vol_value
            .ok_or_else(|| anyhow!("stats response without volValue"))?
            .parse()
            .context("volValue parse")
    }
}

/// Reported volume from the frame itself: `volValue` preferred, `vol` as a
/// fallback; zero counts as unreported.
fn reported_volume(fields: &TickerPayload) -> Option<Decimal> {
    fields
        .vol_value
        .as_deref()
        .or(fields.vol.as_deref())
        .and_then(|raw| raw.parse::<Decimal>().ok())
        .filter(|volume| !volume.is_zero())
}

fn decode_depth(pair: &str, payload: &serde_json::Value) -> Option<QueueMessage> {
    let depth: DepthPayload = serde_json::from_value(payload.clone()).ok()?;
    let timestamp = depth
        .timestamp
        .and_then(DateTime::from_timestamp_millis)
        .unwrap_or_else(Utc::now);

    Some(QueueMessage::OrderBook(OrderBook {
        symbol: normalize_symbol(pair),
        bids: parse_levels(&depth.bids),
        asks: parse_levels(&depth.asks),
        timestamp,
        exchange: EXCHANGE.to_string(),
    }))
}

fn parse_levels(levels: &[[String; 2]]) -> Vec<OrderBookEntry> {
    levels
        .iter()
        .filter_map(|level| {
            let [price, quantity] = level;
            Some(OrderBookEntry {
                price: price.parse().ok()?,
                quantity: quantity.parse().ok()?,
            })
        })
        .collect()
}

#[async_trait]
impl ExchangeFeed for KuCoinFeed {
    fn exchange(&self) -> &'static str {
        EXCHANGE
    }

    async fn stream(
        &mut self,
        events: &mpsc::Sender<QueueMessage>,
        status: &dyn StatusSink,
        shutdown: &CancellationToken,
    ) -> Result<()> {
        let bullet: BulletResponse = self
            .http
            .post(BULLET_URL)
            .send()
            .await
            .context("KuCoin bullet request")?
            .error_for_status()
            .context("KuCoin bullet status")?
            .json()
            .await
            .context("KuCoin bullet decode")?;

        let server = bullet
            .data
            .instance_servers
            .first()
            .ok_or_else(|| anyhow!("bullet response without instance servers"))?;
        // the server-dictated interval wins over the configured fallback
        let ping_interval = if server.ping_interval > 0 {
            Duration::from_millis(server.ping_interval)
        } else {
            self.config.ping_interval
        };

        let url = format!(
            "{}?token={}&connectId={}",
            server.endpoint,
            bullet.data.token,
            Uuid::new_v4()
        );
        let (ws, _) = connect_async(&url).await.context("KuCoin connect")?;
        let (mut write, mut read) = ws.split();

        for topic in Self::subscription_topics(&self.config.symbols) {
            let subscribe = json!({
                "id": Uuid::new_v4().to_string(),
                "type": "subscribe",
                "topic": topic,
                "privateChannel": false,
                "response": true,
            });
            write
                .send(Message::Text(subscribe.to_string()))
                .await
                .context("KuCoin subscribe")?;
        }
        info!(
            symbols = self.config.symbols.len(),
            ping_interval_ms = ping_interval.as_millis() as u64,
            "KuCoin subscribed"
        );
        status.record(EXCHANGE, ConnectionState::Connected).await;

        let mut keepalive = tokio::time::interval_at(
            tokio::time::Instant::now() + ping_interval,
            ping_interval,
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
                _ = keepalive.tick() => {
                    let ping = json!({"id": Uuid::new_v4().to_string(), "type": "ping"});
                    // a failed ping ends the session and forces a reconnect
                    write
                        .send(Message::Text(ping.to_string()))
                        .await
                        .context("KuCoin keepalive ping")?;
                }
                frame = read.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(event) = self.decode_frame(&text).await {
                            if events.send(event).await.is_err() {
                                return Ok(());
                            }
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        write
                            .send(Message::Pong(payload))
                            .await
                            .context("KuCoin pong")?;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        info!(?frame, "KuCoin closed the stream");
                        return Ok(());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e).context("KuCoin receive"),
                    None => return Ok(()),
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::time::Duration;

    fn feed() -> KuCoinFeed {
        KuCoinFeed::new(FeedConfig {
            symbols: vec!["BTCUSDT".to_string()],
            ping_interval: Duration::from_millis(18_000),
        })
    }

    #[rstest]
    #[case("BTCUSDT", "BTC-USDT")]
    #[case("ethusdt", "ETH-USDT")]
    #[case("BTC-USDT", "BTC-USDT")]
    #[case("SOMETHING", "SOMETHING")]
    fn maps_symbols_to_dashed_pairs(#[case] symbol: &str, #[case] expected: &str) {
        assert_eq!(KuCoinFeed::pair_name(symbol), expected);
    }

    #[test]
    fn subscribes_ticker_and_depth_per_symbol() {
        let symbols = vec!["BTCUSDT".to_string(), "ETHUSDT".to_string()];
        assert_eq!(
            KuCoinFeed::subscription_topics(&symbols),
            vec![
                "/market/ticker:BTC-USDT",
                "/spotMarket/level2Depth5:BTC-USDT",
                "/market/ticker:ETH-USDT",
                "/spotMarket/level2Depth5:ETH-USDT",
            ]
        );
    }

    #[tokio::test]
    async fn decodes_ticker_message() {
        let frame = json!({
            "type": "message",
            "topic": "/market/ticker:BTC-USDT",
            "subject": "trade.ticker",
            "data": {
                "price": "65010.0",
                "volValue": "123456.78",
                "time": 1_700_000_000_000i64,
            }
        })
        .to_string();

        let QueueMessage::Ticker(ticker) = feed().decode_frame(&frame).await.unwrap() else {
            panic!("expected ticker");
        };
        assert_eq!(ticker.symbol, "BTCUSDT");
        assert_eq!(ticker.price, "65010.0".parse::<Decimal>().unwrap());
        assert_eq!(ticker.volume, "123456.78".parse::<Decimal>().unwrap());
        assert_eq!(ticker.exchange, "KuCoin");
        assert_eq!(ticker.timestamp.timestamp_millis(), 1_700_000_000_000);
    }

    #[tokio::test]
    async fn decodes_nested_depth_message() {
        let frame = json!({
            "type": "message",
            "topic": "/spotMarket/level2Depth5:ETH-USDT",
            "data": {
                "data": {
                    "bids": [["3400.10", "1.5"], ["bad", "1.0"]],
                    "asks": [["3400.50", "0.7"]],
                    "timestamp": 1_700_000_000_000i64,
                }
            }
        })
        .to_string();

        let QueueMessage::OrderBook(book) = feed().decode_frame(&frame).await.unwrap() else {
            panic!("expected order book");
        };
        assert_eq!(book.symbol, "ETHUSDT");
        assert_eq!(book.exchange, "KuCoin");
        // the malformed level is skipped, the rest of the book survives
        assert_eq!(book.bids.len(), 1);
        assert_eq!(book.asks.len(), 1);
        assert_eq!(book.timestamp.timestamp_millis(), 1_700_000_000_000);
    }

    #[rstest]
    #[case::welcome(json!({"id": "x", "type": "welcome"}).to_string())]
    #[case::ack(json!({"id": "x", "type": "ack"}).to_string())]
    #[case::pong(json!({"id": "x", "type": "pong"}).to_string())]
    #[case::unknown_topic(
        json!({"type": "message", "topic": "/market/candles:BTC-USDT", "data": {}}).to_string()
    )]
    #[case::not_json("{{{".to_string())]
    #[tokio::test]
    async fn skips_non_data_frames(#[case] frame: String) {
        assert!(feed().decode_frame(&frame).await.is_none());
    }

    #[tokio::test]
    async fn malformed_price_drops_the_message() {
        let frame = json!({
            "type": "message",
            "topic": "/market/ticker:BTC-USDT",
            "data": {"price": "oops", "volValue": "1", "time": 1i64}
        })
        .to_string();
        assert!(feed().decode_frame(&frame).await.is_none());
    }

    #[test]
    fn volume_prefers_vol_value_and_ignores_zero() {
        let fields = TickerPayload {
            price: Some("1".to_string()),
            vol_value: Some("200.5".to_string()),
            vol: Some("100".to_string()),
            time: None,
        };
        assert_eq!(
            reported_volume(&fields),
            Some("200.5".parse::<Decimal>().unwrap())
        );

        let only_vol = TickerPayload {
            price: Some("1".to_string()),
            vol_value: None,
            vol: Some("100".to_string()),
            time: None,
        };
        assert_eq!(
            reported_volume(&only_vol),
            Some("100".parse::<Decimal>().unwrap())
        );

        let zero = TickerPayload {
            price: Some("1".to_string()),
            vol_value: Some("0".to_string()),
            vol: None,
            time: None,
        };
        assert_eq!(reported_volume(&zero), None);
    }

    #[test]
    fn volume_cache_expires_entries() {
        let mut fresh = VolumeCache::new(Duration::from_secs(60));
        fresh.insert("BTC-USDT", "42".parse().unwrap());
        assert_eq!(fresh.get("BTC-USDT"), Some("42".parse().unwrap()));
        assert_eq!(fresh.get("ETH-USDT"), None);

        // zero TTL: every entry is already stale
        let mut stale = VolumeCache::new(Duration::ZERO);
        stale.insert("BTC-USDT", "42".parse().unwrap());
        assert_eq!(stale.get("BTC-USDT"), None);
    }
}
