//! Queue-to-cache pipeline scenarios, driven through the pure planning layer

use data_aggregator::{decode_payload, plan_writes};
use rust_decimal::Decimal;
use serde_json::json;
use services_common::{ConsumeError, Ticker, aggregate_tickers};

fn ticker_envelope(exchange: &str, price: &str, volume: &str) -> String {
    json!({
        "Kind": "Ticker",
        "Symbol": "BTCUSDT",
        "Price": price,
        "Volume": volume,
        "Timestamp": "2024-05-01T12:00:00Z",
        "Exchange": exchange,
    })
    .to_string()
}

#[test]
fn two_exchange_feed_produces_both_cache_entries_and_the_aggregate() {
    let binance = ticker_envelope("Binance", "65000.5", "12.3");
    let kucoin = ticker_envelope("KuCoin", "65010.0", "8.0");

    let plans: Vec<_> = [&binance, &kucoin]
        .iter()
        .map(|payload| plan_writes(decode_payload(payload).unwrap()).unwrap())
        .collect();

    assert_eq!(plans[0].key, "ticker:BTCUSDT:Binance");
    assert_eq!(plans[1].key, "ticker:BTCUSDT:KuCoin");

    // what the cache now holds is exactly what aggregation reads back
    let cached: Vec<Ticker> = plans
        .iter()
        .map(|plan| serde_json::from_str(&plan.payload).unwrap())
        .collect();

    let agg = aggregate_tickers("BTCUSDT", &cached).unwrap();
    assert_eq!(agg.average_price, "65005.25".parse::<Decimal>().unwrap());
    assert_eq!(agg.total_volume, "20.3".parse::<Decimal>().unwrap());
    assert_eq!(agg.min_price, "65000.5".parse::<Decimal>().unwrap());
    assert_eq!(agg.max_price, "65010.0".parse::<Decimal>().unwrap());
    assert_eq!(agg.exchanges_count, 2);
}

#[test]
fn duplicate_delivery_overwrites_with_the_same_value() {
    let envelope = ticker_envelope("Binance", "65000.5", "12.3");

    let first = plan_writes(decode_payload(&envelope).unwrap()).unwrap();
    let second = plan_writes(decode_payload(&envelope).unwrap()).unwrap();

    // same key, same payload: at-least-once delivery collapses to one value
    assert_eq!(first.key, second.key);
    assert_eq!(first.payload, second.payload);
}

#[test]
fn legacy_untagged_payload_is_discarded() {
    let legacy = json!({
        "Symbol": "BTCUSDT",
        "Price": "65000.5",
        "Volume": "12.3",
        "Timestamp": "2024-05-01T12:00:00Z",
        "Exchange": "Binance",
    })
    .to_string();

    assert!(matches!(
        decode_payload(&legacy),
        Err(ConsumeError::Discard(_))
    ));
}
