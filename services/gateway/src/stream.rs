//! Subscriber sessions: topic resolution and per-trigger payload production

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use services_common::{
    MarketCache, OrderBook, Ticker, aggregate_tickers, best_order_book, cache::update_topic,
    normalize_symbol,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Stream kinds a subscriber can request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Ticker,
    OrderBook,
    AggregatedTicker,
    BestOrderBook,
}

impl StreamKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "ticker" => Some(Self::Ticker),
            "orderbook" => Some(Self::OrderBook),
            "aggregated-ticker" => Some(Self::AggregatedTicker),
            "best-orderbook" => Some(Self::BestOrderBook),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ticker => "ticker",
            Self::OrderBook => "orderbook",
            Self::AggregatedTicker => "aggregated-ticker",
            Self::BestOrderBook => "best-orderbook",
        }
    }

    /// Cache kind whose updates drive this stream
    fn source_kind(self) -> &'static str {
        match self {
            Self::Ticker | Self::AggregatedTicker => "ticker",
            Self::OrderBook | Self::BestOrderBook => "orderbook",
        }
    }
}

/// Topics a session listens on: one per configured exchange.
///
/// Pass-through kinds listen on their own updates; derived kinds listen on
/// the updates of the data they are computed from, so any exchange's change
/// triggers a recomputation.
pub fn resolve_channels(kind: StreamKind, symbol: &str, exchanges: &[String]) -> Vec<String> {
    exchanges
        .iter()
        .map(|exchange| update_topic(kind.source_kind(), symbol, exchange))
        .collect()
}

/// Aggregated-ticker payload recomputed from the cached per-exchange set
pub fn aggregated_payload(symbol: &str, tickers: &[Ticker]) -> Option<String> {
    let view = aggregate_tickers(symbol, tickers)?;
    serde_json::to_string(&view).ok()
}

/// Best-order-book payload recomputed from the cached per-exchange books
pub fn best_book_payload(symbol: &str, books: &[OrderBook]) -> Option<String> {
    let view = best_order_book(symbol, books)?;
    serde_json::to_string(&view).ok()
}

/// Payload delivered for one topic trigger.
///
/// Pass-through kinds forward the published payload untouched. Derived kinds
/// ignore the trigger payload and re-read the cache for every configured
/// exchange, so the result always reflects the full cross-exchange state at
/// delivery time.
async fn outbound_payload(
    kind: StreamKind,
    symbol: &str,
    cache: &MarketCache,
    exchanges: &[String],
    trigger: String,
) -> Option<String> {
    match kind {
        StreamKind::Ticker | StreamKind::OrderBook => Some(trigger),
        StreamKind::AggregatedTicker => {
            let tickers = match cache.tickers(symbol, exchanges).await {
                Ok(tickers) => tickers,
                Err(e) => {
                    warn!(symbol, "cache read failed, skipping update: {e}");
                    return None;
                }
            };
            aggregated_payload(symbol, &tickers)
        }
        StreamKind::BestOrderBook => {
            let books = match cache.order_books(symbol, exchanges).await {
                Ok(books) => books,
                Err(e) => {
                    warn!(symbol, "cache read failed, skipping update: {e}");
                    return None;
                }
            };
            best_book_payload(symbol, &books)
        }
    }
}

/// Run one subscriber session until the client closes, the connection drops,
/// or shutdown is requested.
///
/// Updates are handled one at a time in this loop; nothing is spawned per
/// message. Subscribers are not expected to send data frames, only control
/// frames.
pub async fn run_session(
    socket: WebSocket,
    kind: StreamKind,
    symbol: String,
    cache: Arc<MarketCache>,
    exchanges: Vec<String>,
    shutdown: CancellationToken,
) {
    let symbol = normalize_symbol(&symbol);
    let channels = resolve_channels(kind, &symbol, &exchanges);

    let mut pubsub = match cache.subscriber().await {
        Ok(pubsub) => pubsub,
        Err(e) => {
            warn!("pub/sub connection failed, dropping session: {e}");
            return;
        }
    };
    for channel in &channels {
        if let Err(e) = pubsub.subscribe(channel).await {
            warn!(%channel, "subscribe failed, dropping session: {e}");
            return;
        }
    }
    info!(
        kind = kind.as_str(),
        %symbol,
        channels = channels.len(),
        "session subscribed"
    );

    let (mut sink, mut client) = socket.split();

    {
        let mut updates = pubsub.on_message();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                inbound = client.next() => match inbound {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!("client socket error: {e}");
                        break;
                    }
                },
                update = updates.next() => {
                    let Some(message) = update else { break };
                    let trigger: String = match message.get_payload() {
                        Ok(payload) => payload,
                        Err(e) => {
                            debug!("unreadable publish payload: {e}");
                            continue;
                        }
                    };
                    if let Some(payload) =
                        outbound_payload(kind, &symbol, &cache, &exchanges, trigger).await
                    {
                        if sink.send(Message::Text(payload)).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    }

    // every channel this session subscribed is released, whichever way the
    // loop ended
    for channel in &channels {
        if let Err(e) = pubsub.unsubscribe(channel).await {
            warn!(%channel, "unsubscribe failed: {e}");
        }
    }
    let _ = sink.send(Message::Close(None)).await;
    info!(kind = kind.as_str(), %symbol, "session closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use rstest::rstest;
    use rust_decimal::Decimal;
    use services_common::{BestOrderBook, OrderBookEntry};

    fn exchanges() -> Vec<String> {
        vec!["Binance".to_string(), "KuCoin".to_string()]
    }

    #[rstest]
    #[case("ticker", StreamKind::Ticker)]
    #[case("orderbook", StreamKind::OrderBook)]
    #[case("aggregated-ticker", StreamKind::AggregatedTicker)]
    #[case("best-orderbook", StreamKind::BestOrderBook)]
    fn parses_stream_kinds(#[case] raw: &str, #[case] expected: StreamKind) {
        assert_eq!(StreamKind::parse(raw), Some(expected));
        assert_eq!(expected.as_str(), raw);
    }

    #[test]
    fn rejects_unknown_stream_kind() {
        assert_eq!(StreamKind::parse("candles"), None);
    }

    #[test]
    fn pass_through_kinds_listen_on_their_own_topics() {
        assert_eq!(
            resolve_channels(StreamKind::Ticker, "BTCUSDT", &exchanges()),
            vec![
                "updates:ticker:BTCUSDT:Binance",
                "updates:ticker:BTCUSDT:KuCoin",
            ]
        );
        assert_eq!(
            resolve_channels(StreamKind::OrderBook, "BTCUSDT", &exchanges()),
            vec![
                "updates:orderbook:BTCUSDT:Binance",
                "updates:orderbook:BTCUSDT:KuCoin",
            ]
        );
    }

    #[test]
    fn derived_kinds_listen_on_their_source_topics() {
        assert_eq!(
            resolve_channels(StreamKind::AggregatedTicker, "ETHUSDT", &exchanges()),
            vec![
                "updates:ticker:ETHUSDT:Binance",
                "updates:ticker:ETHUSDT:KuCoin",
            ]
        );
        // best-orderbook is driven by order-book updates from every exchange
        assert_eq!(
            resolve_channels(StreamKind::BestOrderBook, "ETHUSDT", &exchanges()),
            vec![
                "updates:orderbook:ETHUSDT:Binance",
                "updates:orderbook:ETHUSDT:KuCoin",
            ]
        );
    }

    fn book(exchange: &str, bid: &str, ask: &str) -> OrderBook {
        OrderBook {
            symbol: "ETHUSDT".to_string(),
            bids: vec![OrderBookEntry {
                price: bid.parse().unwrap(),
                quantity: "1".parse().unwrap(),
            }],
            asks: vec![OrderBookEntry {
                price: ask.parse().unwrap(),
                quantity: "1".parse().unwrap(),
            }],
            timestamp: Utc::now(),
            exchange: exchange.to_string(),
        }
    }

    #[test]
    fn best_book_payload_reflects_every_exchange() {
        // whichever exchange triggered, both cached books shape the result
        let books = vec![
            book("Binance", "3400.1", "3400.6"),
            book("KuCoin", "3400.3", "3400.4"),
        ];

        let payload = best_book_payload("ETHUSDT", &books).unwrap();
        let view: BestOrderBook = serde_json::from_str(&payload).unwrap();

        assert_eq!(
            view.best_bid.unwrap().price,
            "3400.3".parse::<Decimal>().unwrap()
        );
        assert_eq!(
            view.best_ask.unwrap().price,
            "3400.4".parse::<Decimal>().unwrap()
        );
    }

    #[test]
    fn derived_payloads_are_empty_without_data() {
        assert!(aggregated_payload("ETHUSDT", &[]).is_none());
        assert!(best_book_payload("ETHUSDT", &[]).is_none());
    }

    #[test]
    fn aggregated_payload_serializes_the_view() {
        let tickers = vec![
            Ticker {
                symbol: "BTCUSDT".to_string(),
                price: "65000.5".parse().unwrap(),
                volume: "12.3".parse().unwrap(),
                timestamp: DateTime::from_timestamp_millis(1_700_000_000_000).unwrap(),
                exchange: "Binance".to_string(),
            },
            Ticker {
                symbol: "BTCUSDT".to_string(),
                price: "65010.0".parse().unwrap(),
                volume: "8.0".parse().unwrap(),
                timestamp: DateTime::from_timestamp_millis(1_700_000_005_000).unwrap(),
                exchange: "KuCoin".to_string(),
            },
        ];

        let payload = aggregated_payload("BTCUSDT", &tickers).unwrap();
        let value: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(value["AveragePrice"], "65005.25");
        assert_eq!(value["ExchangesCount"], 2);
    }
}
