//! Latest-value cache and pub/sub fan-out over Redis
//!
//! Every write carries a TTL; an absent key means "no recent data" and is
//! never an error. The same backing service carries the `updates:*` pub/sub
//! topics live subscribers listen on.

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tracing::warn;

use crate::constants::STATUS_TTL_SECS;
use crate::errors::ServiceError;
use crate::types::{ConnectionState, ExchangeStatus, OrderBook, Ticker};

/// `ticker:{SYMBOL}:{EXCHANGE}`
pub fn ticker_key(symbol: &str, exchange: &str) -> String {
    format!("ticker:{symbol}:{exchange}")
}

/// `orderbook:{SYMBOL}:{EXCHANGE}`
pub fn orderbook_key(symbol: &str, exchange: &str) -> String {
    format!("orderbook:{symbol}:{exchange}")
}

/// `status:{EXCHANGE}`
pub fn status_key(exchange: &str) -> String {
    format!("status:{exchange}")
}

/// `updates:{kind}:{SYMBOL}:{EXCHANGE}`
pub fn update_topic(kind: &str, symbol: &str, exchange: &str) -> String {
    format!("updates:{kind}:{symbol}:{exchange}")
}

/// Where connectors report connection state transitions
///
/// Infallible on purpose: a status write must never take a streaming session
/// down with it.
#[async_trait]
pub trait StatusSink: Send + Sync {
    async fn record(&self, exchange: &str, state: ConnectionState);
}

/// Cache and pub/sub handle shared by the aggregator and the gateway
#[derive(Clone)]
pub struct MarketCache {
    client: redis::Client,
    conn: ConnectionManager,
}

impl MarketCache {
    pub async fn connect(url: &str) -> Result<Self, ServiceError> {
        let client =
            redis::Client::open(url).map_err(|e| ServiceError::ConnectionFailed(e.to_string()))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| ServiceError::ConnectionFailed(e.to_string()))?;
        Ok(Self { client, conn })
    }

    /// Write one value with a TTL (last-write-wins).
    pub async fn put(&self, key: &str, payload: &str, ttl_secs: u64) -> Result<(), ServiceError> {
        let mut conn = self.conn.clone();
        let () = conn
            .set_ex(key, payload, ttl_secs)
            .await
            .map_err(|e| ServiceError::Cache(e.to_string()))?;
        Ok(())
    }

    /// Point read; `None` when the key is absent or expired.
    pub async fn get(&self, key: &str) -> Result<Option<String>, ServiceError> {
        let mut conn = self.conn.clone();
        conn.get(key)
            .await
            .map_err(|e| ServiceError::Cache(e.to_string()))
    }

    /// Publish a payload on a fan-out topic.
    pub async fn publish(&self, topic: &str, payload: &str) -> Result<(), ServiceError> {
        let mut conn = self.conn.clone();
        let _receivers: u64 = conn
            .publish(topic, payload)
            .await
            .map_err(|e| ServiceError::Cache(e.to_string()))?;
        Ok(())
    }

    /// Dedicated pub/sub connection for one subscriber session.
    pub async fn subscriber(&self) -> Result<redis::aio::PubSub, ServiceError> {
        self.client
            .get_async_pubsub()
            .await
            .map_err(|e| ServiceError::ConnectionFailed(e.to_string()))
    }

    /// Current tickers for a symbol across the given exchanges.
    ///
    /// Absent keys are skipped; an unparseable value is logged and skipped so
    /// one bad entry cannot hide the others.
    pub async fn tickers(
        &self,
        symbol: &str,
        exchanges: &[String],
    ) -> Result<Vec<Ticker>, ServiceError> {
        let mut tickers = Vec::with_capacity(exchanges.len());
        for exchange in exchanges {
            let key = ticker_key(symbol, exchange);
            if let Some(raw) = self.get(&key).await? {
                match serde_json::from_str(&raw) {
                    Ok(ticker) => tickers.push(ticker),
                    Err(e) => warn!(%key, "skipping unparseable cached ticker: {e}"),
                }
            }
        }
        Ok(tickers)
    }

    /// Current order books for a symbol across the given exchanges.
    pub async fn order_books(
        &self,
        symbol: &str,
        exchanges: &[String],
    ) -> Result<Vec<OrderBook>, ServiceError> {
        let mut books = Vec::with_capacity(exchanges.len());
        for exchange in exchanges {
            let key = orderbook_key(symbol, exchange);
            if let Some(raw) = self.get(&key).await? {
                match serde_json::from_str(&raw) {
                    Ok(book) => books.push(book),
                    Err(e) => warn!(%key, "skipping unparseable cached order book: {e}"),
                }
            }
        }
        Ok(books)
    }
}

#[async_trait]
impl StatusSink for MarketCache {
    async fn record(&self, exchange: &str, state: ConnectionState) {
        let status = ExchangeStatus::now(state);
        let payload = match serde_json::to_string(&status) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(exchange, "status encode failed: {e}");
                return;
            }
        };
        if let Err(e) = self
            .put(&status_key(exchange), &payload, STATUS_TTL_SECS)
            .await
        {
            warn!(exchange, "status write failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_formats_match_contract() {
        assert_eq!(ticker_key("BTCUSDT", "Binance"), "ticker:BTCUSDT:Binance");
        assert_eq!(
            orderbook_key("ETHUSDT", "KuCoin"),
            "orderbook:ETHUSDT:KuCoin"
        );
        assert_eq!(status_key("Binance"), "status:Binance");
        assert_eq!(
            update_topic("ticker", "BTCUSDT", "KuCoin"),
            "updates:ticker:BTCUSDT:KuCoin"
        );
    }
}
