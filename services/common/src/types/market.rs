//! Normalized market events shared by connectors, aggregator, and gateway
//!
//! Field names serialize in PascalCase; the cache and pub/sub payloads are
//! part of the external contract consumed by the read API.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Normalize an exchange symbol: strip separator characters, uppercase.
///
/// Runs once at the connector boundary; everything downstream assumes
/// separator-free upper-case symbols.
pub fn normalize_symbol(raw: &str) -> String {
    raw.chars()
        .filter(|c| !matches!(c, '-' | '_' | '/'))
        .collect::<String>()
        .to_uppercase()
}

/// Latest trade/price update from one exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Ticker {
    pub symbol: String,
    pub price: Decimal,
    pub volume: Decimal,
    pub timestamp: DateTime<Utc>,
    pub exchange: String,
}

/// One price level of an order book side
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OrderBookEntry {
    pub price: Decimal,
    pub quantity: Decimal,
}

/// Top-of-book snapshot from one exchange
///
/// Snapshot semantics: bids and asks always carry the full current top-N
/// levels as delivered by the exchange subscription, never deltas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OrderBook {
    pub symbol: String,
    pub bids: Vec<OrderBookEntry>,
    pub asks: Vec<OrderBookEntry>,
    pub timestamp: DateTime<Utc>,
    pub exchange: String,
}

/// Connection state of an exchange session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

/// Last observed connection state for one exchange
///
/// Written with a bounded TTL so a crashed connector expires to absent
/// instead of reporting stale `Connected`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExchangeStatus {
    pub status: ConnectionState,
    pub last_update: DateTime<Utc>,
}

impl ExchangeStatus {
    /// Status record stamped with the current time
    pub fn now(status: ConnectionState) -> Self {
        Self {
            status,
            last_update: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("btc-usdt", "BTCUSDT")]
    #[case("ETH_USDT", "ETHUSDT")]
    #[case("sol/usdt", "SOLUSDT")]
    #[case("BTCUSDT", "BTCUSDT")]
    fn normalizes_separators_and_case(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(normalize_symbol(raw), expected);
    }

    #[test]
    fn ticker_serializes_pascal_case() {
        let ticker = Ticker {
            symbol: "BTCUSDT".to_string(),
            price: "65000.5".parse().unwrap(),
            volume: "12.3".parse().unwrap(),
            timestamp: DateTime::from_timestamp_millis(1_700_000_000_000).unwrap(),
            exchange: "Binance".to_string(),
        };

        let value: serde_json::Value = serde_json::to_value(&ticker).unwrap();
        assert!(value.get("Symbol").is_some());
        assert!(value.get("Price").is_some());
        assert!(value.get("Volume").is_some());
        assert!(value.get("Timestamp").is_some());
        assert_eq!(value["Exchange"], "Binance");
    }

    #[test]
    fn status_round_trips() {
        let status = ExchangeStatus::now(ConnectionState::Connected);
        let json = serde_json::to_string(&status).unwrap();
        assert!(json.contains("\"Status\":\"Connected\""));

        let back: ExchangeStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back, status);
    }
}
