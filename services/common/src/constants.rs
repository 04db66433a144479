//! Shared naming and timing constants

/// Durable stream every connector publishes to and the aggregator consumes
pub const QUEUE_STREAM: &str = "queue:market-data";

/// Consumer group backing the aggregator's at-least-once delivery
pub const QUEUE_GROUP: &str = "aggregator";

/// Logical consumer name within the group
pub const QUEUE_CONSUMER: &str = "aggregator-1";

/// TTL for cached tickers
pub const TICKER_TTL_SECS: u64 = 60;

/// TTL for cached order books
pub const ORDERBOOK_TTL_SECS: u64 = 60;

/// TTL for exchange status records; a dead connector expires to absent
pub const STATUS_TTL_SECS: u64 = 300;

/// Startup connection attempts against the broker before giving up
pub const CONNECT_MAX_RETRIES: u32 = 30;

/// Delay between startup connection attempts
pub const CONNECT_RETRY_DELAY_SECS: u64 = 5;
