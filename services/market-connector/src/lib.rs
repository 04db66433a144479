//! Market Connector Service
//!
//! Owns one streaming session per exchange: protocol handshake, per-symbol
//! subscriptions, keepalive, and decoding of exchange wire frames into the
//! normalized event model. The supervisor keeps each session alive across
//! disconnects and reports connection state transitions.

pub mod exchanges;
pub mod supervisor;

use std::time::Duration;

use async_trait::async_trait;
use services_common::{QueueMessage, StatusSink};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Per-feed settings shared by all exchange implementations
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Symbols to subscribe, in normalized form
    pub symbols: Vec<String>,
    /// Keepalive interval; feeds with a server-dictated interval override it
    pub ping_interval: Duration,
}

/// One exchange's streaming session
///
/// `stream` runs exactly one session: handshake, connect, subscribe, then
/// frame processing until the connection ends, a keepalive send fails, or
/// shutdown is requested. Reconnecting is the supervisor's job.
#[async_trait]
pub trait ExchangeFeed: Send {
    /// Exchange name attached to every event this feed emits
    fn exchange(&self) -> &'static str;

    async fn stream(
        &mut self,
        events: &mpsc::Sender<QueueMessage>,
        status: &dyn StatusSink,
        shutdown: &CancellationToken,
    ) -> anyhow::Result<()>;
}
