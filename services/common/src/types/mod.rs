//! Normalized event model and derived cross-exchange views

pub mod aggregates;
pub mod market;

pub use aggregates::{AggregatedTicker, BestOrderBook, aggregate_tickers, best_order_book};
pub use market::{
    ConnectionState, ExchangeStatus, OrderBook, OrderBookEntry, Ticker, normalize_symbol,
};
