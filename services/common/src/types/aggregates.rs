//! Cross-exchange views computed fresh from cached per-exchange state
//!
//! These are views, not stored records: the gateway recomputes them from the
//! current cache contents on every trigger, so the functions here stay pure
//! and take the already-fetched per-exchange sets as input.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::market::{OrderBook, OrderBookEntry, Ticker};

/// Price/volume aggregate over every exchange currently reporting a symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AggregatedTicker {
    pub symbol: String,
    pub average_price: Decimal,
    pub total_volume: Decimal,
    pub min_price: Decimal,
    pub max_price: Decimal,
    pub timestamp: DateTime<Utc>,
    pub exchanges_count: usize,
}

/// Best bid/ask across every exchange's current book for a symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BestOrderBook {
    pub symbol: String,
    pub best_bid: Option<OrderBookEntry>,
    pub best_ask: Option<OrderBookEntry>,
    pub timestamp: DateTime<Utc>,
}

/// Aggregate the per-exchange tickers for one symbol.
///
/// Returns `None` on an empty set; no data must never surface as a zero
/// aggregate.
pub fn aggregate_tickers(symbol: &str, tickers: &[Ticker]) -> Option<AggregatedTicker> {
    if tickers.is_empty() {
        return None;
    }

    let sum: Decimal = tickers.iter().map(|t| t.price).sum();
    let min_price = tickers.iter().map(|t| t.price).min()?;
    let max_price = tickers.iter().map(|t| t.price).max()?;
    let total_volume: Decimal = tickers.iter().map(|t| t.volume).sum();
    let timestamp = tickers.iter().map(|t| t.timestamp).max()?;

    Some(AggregatedTicker {
        symbol: symbol.to_string(),
        average_price: sum / Decimal::from(tickers.len() as u64),
        total_volume,
        min_price,
        max_price,
        timestamp,
        exchanges_count: tickers.len(),
    })
}

/// Pick the best bid (highest price) and best ask (lowest price) across all
/// exchanges' books.
///
/// Returns `None` when no exchange has a book at all; a side with no levels
/// yields `None` for that side. Ties keep the first-seen entry in the order
/// the books were supplied.
pub fn best_order_book(symbol: &str, books: &[OrderBook]) -> Option<BestOrderBook> {
    if books.is_empty() {
        return None;
    }

    let mut best_bid: Option<&OrderBookEntry> = None;
    let mut best_ask: Option<&OrderBookEntry> = None;

    for book in books {
        for bid in &book.bids {
            if best_bid.is_none_or(|current| bid.price > current.price) {
                best_bid = Some(bid);
            }
        }
        for ask in &book.asks {
            if best_ask.is_none_or(|current| ask.price < current.price) {
                best_ask = Some(ask);
            }
        }
    }

    Some(BestOrderBook {
        symbol: symbol.to_string(),
        best_bid: best_bid.cloned(),
        best_ask: best_ask.cloned(),
        timestamp: Utc::now(),
    })
}
