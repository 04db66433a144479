//! Exchange-specific feed implementations

pub mod binance;
pub mod kucoin;

pub use binance::BinanceFeed;
pub use kucoin::KuCoinFeed;
