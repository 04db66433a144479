//! Data Aggregator Service
//!
//! Sole consumer of the durable queue. Every delivery is classified by its
//! envelope, re-normalized, written to the latest-value cache under
//! `{kind}:{SYMBOL}:{EXCHANGE}`, and republished on the matching
//! `updates:{kind}:{SYMBOL}:{EXCHANGE}` topic for live subscribers.

use services_common::{
    ConsumeError, MarketCache, ORDERBOOK_TTL_SECS, QueueMessage, TICKER_TTL_SECS, cache,
    normalize_symbol,
};
use tracing::debug;

/// Cache write and topic publish derived from one queue message
#[derive(Debug, Clone, PartialEq)]
pub struct WritePlan {
    pub key: String,
    pub topic: String,
    pub payload: String,
    pub ttl_secs: u64,
}

/// Decode the queue envelope.
///
/// A payload that does not parse can never be processed; it is classified
/// non-retryable so the queue drops it instead of redelivering forever.
pub fn decode_payload(payload: &str) -> Result<QueueMessage, ConsumeError> {
    serde_json::from_str(payload)
        .map_err(|e| ConsumeError::Discard(format!("unrecognized queue payload: {e}")))
}

/// Derive the cache write and topic publish for a message.
///
/// Pure and deterministic: the same message always yields the same plan, so
/// at-least-once redelivery collapses to a harmless overwrite. Symbols are
/// normalized once more here before they become cache keys.
pub fn plan_writes(message: QueueMessage) -> Result<WritePlan, ConsumeError> {
    match message {
        QueueMessage::Ticker(mut ticker) => {
            ticker.symbol = normalize_symbol(&ticker.symbol);
            let payload = serde_json::to_string(&ticker)
                .map_err(|e| ConsumeError::Discard(format!("ticker encode: {e}")))?;
            Ok(WritePlan {
                key: cache::ticker_key(&ticker.symbol, &ticker.exchange),
                topic: cache::update_topic("ticker", &ticker.symbol, &ticker.exchange),
                payload,
                ttl_secs: TICKER_TTL_SECS,
            })
        }
        QueueMessage::OrderBook(mut book) => {
            book.symbol = normalize_symbol(&book.symbol);
            let payload = serde_json::to_string(&book)
                .map_err(|e| ConsumeError::Discard(format!("order book encode: {e}")))?;
            Ok(WritePlan {
                key: cache::orderbook_key(&book.symbol, &book.exchange),
                topic: cache::update_topic("orderbook", &book.symbol, &book.exchange),
                payload,
                ttl_secs: ORDERBOOK_TTL_SECS,
            })
        }
    }
}

/// Queue handler: classify, cache, republish
pub struct Processor {
    cache: MarketCache,
}

impl Processor {
    pub fn new(cache: MarketCache) -> Self {
        Self { cache }
    }

    /// Handle one queue delivery end to end.
    ///
    /// Cache and publish failures are transient: the delivery stays pending
    /// and the state update is retried, while the consumer loop survives.
    pub async fn handle(&self, payload: String) -> Result<(), ConsumeError> {
        let message = decode_payload(&payload)?;
        let plan = plan_writes(message)?;

        self.cache
            .put(&plan.key, &plan.payload, plan.ttl_secs)
            .await
            .map_err(|e| ConsumeError::Retry(format!("cache write: {e}")))?;
        self.cache
            .publish(&plan.topic, &plan.payload)
            .await
            .map_err(|e| ConsumeError::Retry(format!("topic publish: {e}")))?;

        debug!(key = %plan.key, "state refreshed");
        Ok(())
    }
}
