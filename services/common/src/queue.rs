//! Durable queue client over a Redis Stream consumer group
//!
//! Connectors publish tagged envelopes onto one well-known stream; the
//! aggregator consumes it through a consumer group, acknowledging each
//! delivery explicitly so unprocessed entries survive a consumer crash and
//! are redelivered.

use std::future::Future;
use std::time::Duration;

use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use redis::streams::{StreamReadOptions, StreamReadReply};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::constants::{QUEUE_CONSUMER, QUEUE_GROUP, QUEUE_STREAM};
use crate::errors::{ConsumeError, ServiceError};
use crate::types::{OrderBook, Ticker};

const READ_BATCH: usize = 32;
const READ_BLOCK_MS: usize = 5_000;
const RETRY_PAUSE: Duration = Duration::from_secs(1);

/// Envelope for every message crossing the queue
///
/// Carries an explicit `Kind` discriminant; consumers never have to sniff
/// payload shapes by field presence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "Kind")]
pub enum QueueMessage {
    Ticker(Ticker),
    OrderBook(OrderBook),
}

impl QueueMessage {
    /// Cache-key kind segment for this message
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ticker(_) => "ticker",
            Self::OrderBook(_) => "orderbook",
        }
    }

    pub fn symbol(&self) -> &str {
        match self {
            Self::Ticker(t) => &t.symbol,
            Self::OrderBook(b) => &b.symbol,
        }
    }

    pub fn exchange(&self) -> &str {
        match self {
            Self::Ticker(t) => &t.exchange,
            Self::OrderBook(b) => &b.exchange,
        }
    }
}

/// Publish/consume handle on the durable stream
///
/// Cloning is cheap; the underlying connection manager multiplexes and is
/// safe for concurrent publishers.
#[derive(Clone)]
pub struct QueueClient {
    conn: ConnectionManager,
}

impl QueueClient {
    /// Connect to the broker with bounded retries and declare the stream and
    /// consumer group.
    ///
    /// Exhausting the retries is fatal by design: without a working queue the
    /// pipeline must not pretend to be healthy.
    pub async fn connect(
        url: &str,
        max_retries: u32,
        retry_delay: Duration,
    ) -> Result<Self, ServiceError> {
        let client =
            redis::Client::open(url).map_err(|e| ServiceError::ConnectionFailed(e.to_string()))?;

        let mut attempt = 0u32;
        let mut conn = loop {
            attempt += 1;
            info!(attempt, max_retries, "connecting to broker");
            match client.get_connection_manager().await {
                Ok(conn) => break conn,
                Err(e) if attempt >= max_retries => {
                    error!("broker connection attempts exhausted: {e}");
                    return Err(ServiceError::ConnectionFailed(e.to_string()));
                }
                Err(e) => {
                    warn!(
                        "broker connect failed ({e}), retrying in {}s",
                        retry_delay.as_secs()
                    );
                    tokio::time::sleep(retry_delay).await;
                }
            }
        };

        let created: Result<String, redis::RedisError> = conn
            .xgroup_create_mkstream(QUEUE_STREAM, QUEUE_GROUP, "0")
            .await;
        match created {
            Ok(_) => info!(stream = QUEUE_STREAM, group = QUEUE_GROUP, "queue declared"),
            Err(e) if e.code() == Some("BUSYGROUP") => {
                debug!(stream = QUEUE_STREAM, "consumer group already declared");
            }
            Err(e) => return Err(ServiceError::Broker(e.to_string())),
        }

        Ok(Self { conn })
    }

    /// Publish one event to the stream.
    ///
    /// Not retried here: on failure the caller drops this single event and
    /// keeps streaming.
    pub async fn publish(&self, message: &QueueMessage) -> Result<(), ServiceError> {
        let payload =
            serde_json::to_string(message).map_err(|e| ServiceError::Decode(e.to_string()))?;

        let mut conn = self.conn.clone();
        let _id: String = conn
            .xadd(QUEUE_STREAM, "*", &[("payload", payload.as_str())])
            .await
            .map_err(|e| ServiceError::Broker(e.to_string()))?;

        debug!(
            kind = message.kind(),
            symbol = message.symbol(),
            exchange = message.exchange(),
            "event queued"
        );
        Ok(())
    }

    /// Run the single-consumer loop until shutdown.
    ///
    /// The group backlog (deliveries left pending by an earlier failure or
    /// crash) is drained before new entries. The handler is invoked once per
    /// delivery; `Ok` and `Discard` acknowledge, `Retry` leaves the entry
    /// pending and schedules another backlog sweep.
    pub async fn consume<F, Fut>(&self, mut handler: F, shutdown: CancellationToken)
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<(), ConsumeError>>,
    {
        let mut conn = self.conn.clone();
        let mut backlog = true;

        while !shutdown.is_cancelled() {
            let cursor = if backlog { "0" } else { ">" };
            let options = StreamReadOptions::default()
                .group(QUEUE_GROUP, QUEUE_CONSUMER)
                .count(READ_BATCH)
                .block(READ_BLOCK_MS);

            let cursors = [cursor];
            let reply: StreamReadReply = tokio::select! {
                read = conn.xread_options(&[QUEUE_STREAM], &cursors, &options) => match read {
                    Ok(reply) => reply,
                    Err(e) => {
                        warn!("queue read failed ({e}), retrying");
                        backlog = true;
                        tokio::select! {
                            _ = tokio::time::sleep(RETRY_PAUSE) => continue,
                            _ = shutdown.cancelled() => break,
                        }
                    }
                },
                _ = shutdown.cancelled() => break,
            };

            let mut delivered = 0usize;
            let mut retry_seen = false;
            for key in reply.keys {
                for entry in key.ids {
                    delivered += 1;

                    let Some(payload) = entry.get::<String>("payload") else {
                        warn!(id = %entry.id, "queue entry without payload, acknowledging");
                        Self::ack(&mut conn, &entry.id).await;
                        continue;
                    };

                    match handler(payload).await {
                        Ok(()) => Self::ack(&mut conn, &entry.id).await,
                        Err(ConsumeError::Discard(reason)) => {
                            warn!(id = %entry.id, %reason, "dropping queue message");
                            Self::ack(&mut conn, &entry.id).await;
                        }
                        Err(ConsumeError::Retry(reason)) => {
                            warn!(id = %entry.id, %reason, "leaving delivery pending");
                            retry_seen = true;
                        }
                    }
                }
            }

            if retry_seen {
                backlog = true;
                tokio::select! {
                    _ = tokio::time::sleep(RETRY_PAUSE) => {}
                    _ = shutdown.cancelled() => break,
                }
            } else if backlog && delivered == 0 {
                // backlog drained, switch to new entries
                backlog = false;
            }
        }

        info!("queue consumer stopped");
    }

    async fn ack(conn: &mut ConnectionManager, id: &str) {
        let acked: Result<u64, redis::RedisError> =
            conn.xack(QUEUE_STREAM, QUEUE_GROUP, &[id]).await;
        if let Err(e) = acked {
            warn!(id, "acknowledge failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;

    fn sample_ticker() -> Ticker {
        Ticker {
            symbol: "BTCUSDT".to_string(),
            price: "65000.5".parse().unwrap(),
            volume: "12.3".parse().unwrap(),
            timestamp: DateTime::from_timestamp_millis(1_700_000_000_000).unwrap(),
            exchange: "Binance".to_string(),
        }
    }

    #[test]
    fn envelope_carries_explicit_kind() {
        let message = QueueMessage::Ticker(sample_ticker());
        let value: serde_json::Value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["Kind"], "Ticker");
        assert_eq!(value["Symbol"], "BTCUSDT");
    }

    #[test]
    fn envelope_round_trips() {
        let message = QueueMessage::Ticker(sample_ticker());
        let json = serde_json::to_string(&message).unwrap();
        let back: QueueMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, message);
    }

    #[test]
    fn untagged_payload_is_rejected() {
        // the old shape-sniffing format has no Kind field and must not parse
        let legacy = r#"{"Symbol":"BTCUSDT","Price":"65000.5","Volume":"12.3"}"#;
        assert!(serde_json::from_str::<QueueMessage>(legacy).is_err());
    }

    #[test]
    fn accessors_reach_through_variants() {
        let message = QueueMessage::Ticker(sample_ticker());
        assert_eq!(message.kind(), "ticker");
        assert_eq!(message.symbol(), "BTCUSDT");
        assert_eq!(message.exchange(), "Binance");
    }
}
