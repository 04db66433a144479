//! Shared types and infrastructure clients for the market-data pipeline
//!
//! Everything the connectors, the aggregator, and the gateway have in common
//! lives here: the normalized event model, the derived cross-exchange views,
//! the durable queue client, the cache/pub-sub client, configuration, and
//! error types.

pub mod cache;
pub mod config;
pub mod constants;
pub mod errors;
pub mod queue;
pub mod types;

pub use cache::{MarketCache, StatusSink};
pub use config::{AppConfig, RedisEndpoint};
pub use constants::*;
pub use errors::{ConsumeError, ServiceError};
pub use queue::{QueueClient, QueueMessage};
pub use types::*;
