//! Fan-Out Gateway
//!
//! Accepts live subscription sessions over WebSocket, maps each request onto
//! the underlying pub/sub topics for every configured exchange, and forwards
//! updates. Derived views (aggregated ticker, best order book) are recomputed
//! from current cache state on every trigger rather than forwarded verbatim.

pub mod server;
pub mod stream;

pub use server::{AppState, router};
pub use stream::StreamKind;
