//! Feed supervision and queue publishing
//!
//! Each feed runs under a supervisor loop that keeps its session alive
//! forever: stream, record the disconnect, back off, reconnect. A separate
//! publisher task drains the shared event channel into the durable queue so
//! no feed ever blocks on the broker.

use std::sync::Arc;
use std::time::Duration;

use services_common::{ConnectionState, QueueClient, QueueMessage, StatusSink};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::ExchangeFeed;

/// Drive one feed through connect/stream/reconnect cycles until shutdown.
///
/// Every session exit, clean or not, records `Disconnected` before the
/// backoff; subscriptions are re-issued by the next `stream` call.
pub async fn run_feed<F: ExchangeFeed>(
    mut feed: F,
    events: mpsc::Sender<QueueMessage>,
    status: Arc<dyn StatusSink>,
    reconnect_delay: Duration,
    shutdown: CancellationToken,
) {
    while !shutdown.is_cancelled() {
        info!(exchange = feed.exchange(), "connecting");
        match feed.stream(&events, status.as_ref(), &shutdown).await {
            Ok(()) => info!(exchange = feed.exchange(), "session ended"),
            Err(e) => error!(exchange = feed.exchange(), "session failed: {e:#}"),
        }
        status
            .record(feed.exchange(), ConnectionState::Disconnected)
            .await;

        if shutdown.is_cancelled() {
            break;
        }
        tokio::select! {
            _ = tokio::time::sleep(reconnect_delay) => {}
            _ = shutdown.cancelled() => break,
        }
    }
    info!(exchange = feed.exchange(), "supervisor stopped");
}

/// Drain connector events into the durable queue.
///
/// A publish failure drops that single event; streaming must never stall on
/// the broker.
pub async fn publish_events(
    queue: QueueClient,
    mut events: mpsc::Receiver<QueueMessage>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            received = events.recv() => match received {
                Some(event) => {
                    if let Err(e) = queue.publish(&event).await {
                        warn!(
                            symbol = event.symbol(),
                            exchange = event.exchange(),
                            "dropping event, publish failed: {e}"
                        );
                    }
                }
                None => break,
            },
            _ = shutdown.cancelled() => break,
        }
    }
    info!("event publisher stopped");
}
