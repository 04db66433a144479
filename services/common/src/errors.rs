//! Common error types for services

use thiserror::Error;

/// Service error types
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Connection failed error
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Handshake failed error
    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    /// Broker operation failed
    #[error("Broker error: {0}")]
    Broker(String),

    /// Cache operation failed
    #[error("Cache error: {0}")]
    Cache(String),

    /// Payload could not be encoded or decoded
    #[error("Decode error: {0}")]
    Decode(String),
}

/// Classification a queue handler must give every failure
///
/// `Discard` acknowledges the delivery and drops it (the message can never be
/// processed, e.g. it does not parse). `Retry` leaves the delivery pending so
/// the broker hands it out again (transient downstream fault, e.g. the cache
/// is unreachable).
#[derive(Debug, Error)]
pub enum ConsumeError {
    /// Non-retryable; acknowledge and drop
    #[error("discarded message: {0}")]
    Discard(String),

    /// Transient; leave pending for redelivery
    #[error("retryable failure: {0}")]
    Retry(String),
}
