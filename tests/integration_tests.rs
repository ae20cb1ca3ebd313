//! Integration tests for the market-sync system
//!
//! These drive the `Market` facade end to end against a scripted in-process
//! exchange and an in-memory store.

use approx::assert_relative_eq;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use market_sync::error::{MarketError, SourceError};
use market_sync::frame::PERCENT_CHANGE;
use market_sync::normalize::RawRecord;
use market_sync::resample::Period;
use market_sync::source::RemoteSource;
use market_sync::store::{SeriesFilter, SeriesStoreExt};
use market_sync::sync::Watermark;
use market_sync::{
    chart_collection, epoch_to_datetime, trade_collection, Candle, ChartRequest, Config,
    LendingEvent, Market, Pair, SeriesKind, SqliteSeriesStore, TradeQuery, TradeSide, DAY,
    LENDING_COLLECTION, UTC_FORMAT, YEAR,
};

// =============================================================================
// Test Utilities
// =============================================================================

const NOW: i64 = 1_500_000_000;

fn fixed_now() -> i64 {
    NOW
}

fn utc(ts: i64) -> String {
    epoch_to_datetime(ts).unwrap().format(UTC_FORMAT).to_string()
}

/// Exchange double: serves whatever has been published to it, honoring the
/// start-inclusive filter, and logs every requested start
#[derive(Default)]
struct ScriptedExchange {
    candles: Mutex<Vec<Value>>,
    trades: Mutex<Vec<Value>>,
    lending: Mutex<Vec<Value>>,
    starts: Mutex<Vec<(SeriesKind, i64)>>,
    down: AtomicBool,
}

impl ScriptedExchange {
    fn publish_candle(&self, ts: i64, close: f64) {
        self.candles.lock().unwrap().push(json!({
            "date": ts, "open": close, "high": close + 0.5, "low": close - 0.5,
            "close": close, "volume": 10.0, "quoteVolume": 10.0 / close,
            "weightedAverage": close
        }));
    }

    fn publish_trade(&self, global_id: i64, ts: i64, side: &str) {
        self.trades.lock().unwrap().push(json!({
            "globalTradeID": global_id, "tradeID": (global_id * 10).to_string(),
            "date": utc(ts), "rate": "0.0125", "amount": "2.0", "total": "0.025",
            "fee": "0.0025", "orderNumber": "4242", "type": side, "category": "exchange"
        }));
    }

    fn publish_loan(&self, id: i64, currency: &str, open: i64) {
        self.lending.lock().unwrap().push(json!({
            "id": id, "currency": currency, "rate": "0.00020000", "amount": "100.0",
            "duration": "0.5", "interest": "0.01", "fee": "-0.0015", "earned": "0.0085",
            "open": utc(open), "close": utc(open + 43_200)
        }));
    }

    fn starts(&self, kind: SeriesKind) -> Vec<i64> {
        self.starts
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, s)| *s)
            .collect()
    }

    fn serve(
        &self,
        kind: SeriesKind,
        start: i64,
        rows: &Mutex<Vec<Value>>,
        time_of: fn(&Value) -> i64,
    ) -> Result<Vec<RawRecord>, SourceError> {
        self.starts.lock().unwrap().push((kind, start));
        if self.down.load(Ordering::SeqCst) {
            return Err(SourceError::Status {
                status: 503,
                body: "maintenance".to_string(),
            });
        }
        Ok(rows
            .lock()
            .unwrap()
            .iter()
            .filter(|v| time_of(v) >= start)
            .filter_map(|v| v.as_object().cloned())
            .collect())
    }
}

fn epoch_field(v: &Value, field: &str) -> i64 {
    match &v[field] {
        Value::Number(n) => n.as_i64().unwrap_or(0),
        Value::String(s) => market_sync::utc_str_to_epoch(s).unwrap_or(0),
        _ => 0,
    }
}

impl RemoteSource for ScriptedExchange {
    fn fetch_candles(&self, _: &Pair, _: i64, start: i64) -> Result<Vec<RawRecord>, SourceError> {
        self.serve(SeriesKind::Candles, start, &self.candles, |v| epoch_field(v, "date"))
    }

    fn fetch_trades(&self, _: &Pair, start: i64) -> Result<Vec<RawRecord>, SourceError> {
        self.serve(SeriesKind::Trades, start, &self.trades, |v| epoch_field(v, "date"))
    }

    fn fetch_lending(&self, start: i64) -> Result<Vec<RawRecord>, SourceError> {
        self.serve(SeriesKind::Lending, start, &self.lending, |v| epoch_field(v, "open"))
    }
}

struct Harness {
    exchange: Arc<ScriptedExchange>,
    store: Arc<SqliteSeriesStore>,
    market: Market,
}

fn harness(pair: &str) -> Harness {
    let exchange = Arc::new(ScriptedExchange::default());
    let store = Arc::new(SqliteSeriesStore::open_in_memory().unwrap());
    let market = Market::new(
        Pair::new(pair).unwrap(),
        exchange.clone(),
        store.clone(),
        &Config::default(),
    )
    .with_clock(fixed_now);

    Harness {
        exchange,
        store,
        market,
    }
}

// =============================================================================
// Candles
// =============================================================================

#[test]
fn test_first_chart_read_bootstraps_full_history() {
    let h = harness("BTC_LTC");
    for i in 0..6 {
        h.exchange.publish_candle(NOW - 3_000 + i * 300, 1.0 + i as f64);
    }

    let frame = h.market.get_chart(&ChartRequest::default()).unwrap();

    assert_eq!(h.exchange.starts(SeriesKind::Candles), vec![NOW - YEAR * 13]);
    assert_eq!(frame.len(), 6);
    assert_eq!(frame.timestamps()[0], NOW - 3_000);
}

#[test]
fn test_next_sync_starts_at_last_stored_candle() {
    let h = harness("BTC_LTC");
    let last = NOW - 600;
    h.exchange.publish_candle(last - 300, 1.0);
    h.exchange.publish_candle(last, 2.0);

    h.market.sync(SeriesKind::Candles).unwrap();
    h.exchange.publish_candle(last + 300, 3.0);
    let report = h.market.sync(SeriesKind::Candles).unwrap();

    assert_eq!(report.watermark, Watermark::Stored(last));
    assert_eq!(h.exchange.starts(SeriesKind::Candles)[1], last);
    assert_eq!(report.inserted, 1);
    assert_eq!(report.unchanged, 1);
}

#[test]
fn test_resync_leaves_store_unchanged() {
    let h = harness("BTC_ETH");
    for i in 0..20 {
        h.exchange.publish_candle(NOW - 6_000 + i * 300, 50.0 + i as f64);
    }
    let filter = SeriesFilter::collection(chart_collection(h.market.pair()));

    h.market.sync(SeriesKind::Candles).unwrap();
    let before: Vec<Candle> = h.store.range(&filter).unwrap();

    // force a full overlap with what is already stored
    let target = h.market.target(SeriesKind::Candles);
    let report = h.market.synchronizer().sync(&target, Some(0)).unwrap();
    let after: Vec<Candle> = h.store.range(&filter).unwrap();

    assert_eq!(report.fetched, 20);
    assert_eq!(report.unchanged, 20);
    assert_eq!(report.changed(), 0);
    assert_eq!(before, after);
}

#[test]
fn test_keys_stay_unique_across_overlapping_batches() {
    let h = harness("BTC_LTC");
    for i in 0..5 {
        h.exchange.publish_candle(NOW - 1_500 + i * 300, 1.0);
    }
    // the exchange repeats a revised copy of a candle it already sent
    h.exchange.publish_candle(NOW - 900, 9.0);

    h.market.sync(SeriesKind::Candles).unwrap();
    h.market.sync(SeriesKind::Candles).unwrap();

    let collection = chart_collection(h.market.pair());
    assert_eq!(h.store.count(&collection).unwrap(), 5);

    let stored: Vec<Candle> = h.store.range(&SeriesFilter::collection(collection)).unwrap();
    let revised = stored.iter().find(|c| c.timestamp == NOW - 900).unwrap();
    assert_eq!(revised.close, 9.0);
}

#[test]
fn test_chart_resampled_with_percent_change() {
    let h = harness("BTC_LTC");
    // two full 25 minute windows, closes 1..=10; origin is 01:40 UTC, on
    // the 25 minute grid of that day
    let origin = NOW - 3_600;
    for i in 0..10 {
        h.exchange.publish_candle(origin + i * 300, (i + 1) as f64);
    }

    let request = ChartRequest::since(origin).bucket("25m".parse::<Period>().unwrap());
    let frame = h.market.get_chart(&request).unwrap();

    assert_eq!(frame.timestamps(), &[origin, origin + 1_500]);
    assert_eq!(frame.column("open").unwrap(), &[Some(1.0), Some(6.0)]);
    assert_eq!(frame.column("close").unwrap(), &[Some(5.0), Some(10.0)]);
    assert_eq!(frame.column("high").unwrap(), &[Some(5.5), Some(10.5)]);
    assert_eq!(frame.column("low").unwrap(), &[Some(0.5), Some(5.5)]);
    assert_eq!(frame.column("volume").unwrap(), &[Some(50.0), Some(50.0)]);

    let pct = frame.column(PERCENT_CHANGE).unwrap();
    assert_eq!(pct[0], None);
    assert_relative_eq!(pct[1].unwrap(), 100.0, epsilon = 1e-9);
}

#[test]
fn test_chart_with_indicators() {
    let h = harness("BTC_LTC");
    for i in 0..40 {
        h.exchange.publish_candle(NOW - 12_000 + i * 300, 100.0 + (i % 7) as f64);
    }

    let request = ChartRequest::default()
        .indicator("sma:period=10".parse().unwrap())
        .indicator("bbands:period=10,std=2".parse().unwrap())
        .indicator("unheard_of".parse().unwrap());
    let frame = h.market.get_chart(&request).unwrap();

    let sma = frame.column("sma_10").unwrap();
    let middle = frame.column("bb_middle").unwrap();
    assert_eq!(sma[8], None);
    for i in 9..frame.len() {
        assert_relative_eq!(sma[i].unwrap(), middle[i].unwrap(), epsilon = 1e-9);
    }
    assert!(frame.column("unheard_of").is_none());
}

#[test]
fn test_placeholder_candle_is_not_stored() {
    let h = harness("BTC_LTC");
    h.exchange.candles.lock().unwrap().push(json!({
        "date": 0, "open": 0, "high": 0, "low": 0, "close": 0,
        "volume": 0, "quoteVolume": 0, "weightedAverage": 0
    }));

    let target = h.market.target(SeriesKind::Candles);
    let report = h.market.synchronizer().sync(&target, Some(0)).unwrap();
    assert_eq!(report.fetched, 1);
    assert_eq!(report.changed(), 0);
    assert_eq!(report.skipped, 0);

    let frame = h.market.get_chart(&ChartRequest::since(0)).unwrap();
    assert!(frame.is_empty());
}

#[test]
fn test_exchange_failure_propagates() {
    let h = harness("BTC_LTC");
    h.exchange.publish_candle(NOW - 300, 1.0);
    h.market.sync(SeriesKind::Candles).unwrap();

    h.exchange.down.store(true, Ordering::SeqCst);
    let err = h.market.get_chart(&ChartRequest::since(0)).unwrap_err();

    assert!(matches!(
        err,
        MarketError::Source(SourceError::Status { status: 503, .. })
    ));
    assert_eq!(h.store.count(&chart_collection(h.market.pair())).unwrap(), 1);
}

// =============================================================================
// Trades
// =============================================================================

#[test]
fn test_trade_history_sync_and_query() {
    let h = harness("BTC_LTC");
    h.exchange.publish_trade(101, NOW - 7_200, "buy");
    h.exchange.publish_trade(102, NOW - 3_600, "sell");
    h.exchange.publish_trade(103, NOW - 1_800, "buy");

    let all = h.market.get_trade_history(&TradeQuery::default()).unwrap();
    let ids: Vec<i64> = all.iter().map(|t| t.global_trade_id).collect();
    assert_eq!(ids, vec![101, 102, 103]);
    assert_eq!(all[0].trade_id, 1_010);
    assert_eq!(all[0].rate, 0.0125);

    let buys = h
        .market
        .get_trade_history(&TradeQuery {
            start: Some(NOW - 3_600),
            end: None,
            side: Some(TradeSide::Buy),
        })
        .unwrap();
    let ids: Vec<i64> = buys.iter().map(|t| t.global_trade_id).collect();
    assert_eq!(ids, vec![103]);

    let window = h
        .market
        .get_trade_history(&TradeQuery {
            start: None,
            end: Some(NOW - 3_600),
            side: None,
        })
        .unwrap();
    assert_eq!(window.len(), 2);
}

#[test]
fn test_trade_query_does_not_move_watermark() {
    let h = harness("BTC_LTC");
    h.exchange.publish_trade(1, NOW - 7_200, "buy");
    h.market.get_trade_history(&TradeQuery::default()).unwrap();

    // a narrow query still syncs from the last stored trade
    h.market
        .get_trade_history(&TradeQuery {
            start: Some(NOW),
            end: None,
            side: None,
        })
        .unwrap();

    assert_eq!(
        h.exchange.starts(SeriesKind::Trades),
        vec![NOW - YEAR * 10, NOW - 7_200 - 1]
    );
}

#[test]
fn test_malformed_trade_is_skipped() {
    let h = harness("BTC_LTC");
    h.exchange.publish_trade(1, NOW - 600, "buy");
    h.exchange.trades.lock().unwrap().push(json!({
        "globalTradeID": 2, "tradeID": "20", "date": utc(NOW - 500),
        "rate": "n/a", "amount": "1", "total": "1", "fee": "0",
        "orderNumber": "1", "type": "buy"
    }));
    h.exchange.publish_trade(3, NOW - 400, "sell");

    let report = h.market.sync(SeriesKind::Trades).unwrap();
    assert_eq!(report.skipped, 1);
    assert_eq!(report.inserted, 2);
    assert_eq!(
        h.store.count(&trade_collection(h.market.pair())).unwrap(),
        2
    );
}

// =============================================================================
// Lending
// =============================================================================

#[test]
fn test_lending_defaults_to_child_currency_and_last_day() {
    let h = harness("BTC_LTC");
    h.exchange.publish_loan(1, "LTC", NOW - DAY * 3);
    h.exchange.publish_loan(2, "LTC", NOW - 3_600);
    h.exchange.publish_loan(3, "BTC", NOW - 1_800);
    h.exchange.publish_loan(4, "LTC", NOW - 600);

    let loans = h.market.get_lending_history(None, None).unwrap();

    let ids: Vec<i64> = loans.iter().map(|l| l.id).collect();
    assert_eq!(ids, vec![2, 4]);
    assert!(loans.iter().all(|l| l.currency == "LTC"));

    // the older LTC loan was stored, only the read is bounded
    let stored: Vec<LendingEvent> = h
        .store
        .range(&SeriesFilter::collection(LENDING_COLLECTION))
        .unwrap();
    let stored_ids: Vec<i64> = stored.iter().map(|l| l.id).collect();
    assert_eq!(stored_ids, vec![1, 2, 4]);
}

#[test]
fn test_lending_for_explicit_currency() {
    let h = harness("BTC_LTC");
    h.exchange.publish_loan(7, "BTC", NOW - 1_000);
    h.exchange.publish_loan(8, "LTC", NOW - 900);

    let loans = h.market.get_lending_history(Some("btc"), Some(0)).unwrap();
    assert_eq!(loans.len(), 1);
    assert_eq!(loans[0].id, 7);
    assert_relative_eq!(loans[0].earned, 0.0085);

    // the LTC series was never synced, so its watermark is still the fallback
    h.market.sync(SeriesKind::Lending).unwrap();
    assert_eq!(
        h.exchange.starts(SeriesKind::Lending),
        vec![NOW - YEAR * 10, NOW - YEAR * 10]
    );
}
