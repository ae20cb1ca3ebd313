//! Core data types shared by the synchronizer, store and readers

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

// =============================================================================
// Time
// =============================================================================

pub const MINUTE: i64 = 60;
pub const HOUR: i64 = MINUTE * 60;
pub const DAY: i64 = HOUR * 24;
pub const WEEK: i64 = DAY * 7;
pub const MONTH: i64 = DAY * 30;
pub const YEAR: i64 = DAY * 365;

/// Wire format for textual UTC timestamps returned by the exchange
pub const UTC_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Current time as epoch seconds
pub fn now_epoch() -> i64 {
    Utc::now().timestamp()
}

/// Convert epoch seconds to a UTC datetime
pub fn epoch_to_datetime(ts: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(ts, 0)
}

/// Parse a `YYYY-MM-DD HH:MM:SS` UTC string into epoch seconds
pub fn utc_str_to_epoch(s: &str) -> Option<i64> {
    NaiveDateTime::parse_from_str(s.trim(), UTC_FORMAT)
        .ok()
        .map(|ndt| ndt.and_utc().timestamp())
}

/// Parse a date given on the command line (YYYY-MM-DD, YYYY-MM-DD HH:MM:SS,
/// RFC 3339 or raw epoch seconds) into epoch seconds
pub fn parse_date(date_str: &str) -> Option<i64> {
    let s = date_str.trim();
    if let Ok(ts) = s.parse::<i64>() {
        return Some(ts);
    }
    if let Some(ts) = utc_str_to_epoch(s) {
        return Some(ts);
    }
    if let Ok(dt) = s.parse::<DateTime<Utc>>() {
        return Some(dt.timestamp());
    }
    chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|ndt| ndt.and_utc().timestamp())
}

// =============================================================================
// Pair
// =============================================================================

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid pair '{0}': expected PARENT_CHILD, e.g. BTC_LTC")]
pub struct PairError(pub String);

/// Exchange trading pair such as `BTC_LTC` (parent currency first)
///
/// Pairs are cloned into every sync target and collection name, so the
/// symbol is held in an `Arc<str>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Pair(std::sync::Arc<str>);

impl Pair {
    pub fn new(s: impl AsRef<str>) -> Result<Self, PairError> {
        let symbol = s.as_ref().trim().to_uppercase();
        match symbol.split_once('_') {
            Some((parent, child))
                if !parent.is_empty() && !child.is_empty() && !child.contains('_') =>
            {
                Ok(Pair(std::sync::Arc::from(symbol.as_str())))
            }
            _ => Err(PairError(s.as_ref().to_string())),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Currency the pair is quoted in (`BTC` for `BTC_LTC`)
    pub fn parent(&self) -> &str {
        self.0.split_once('_').map(|(p, _)| p).unwrap_or(&self.0)
    }

    /// Currency being traded (`LTC` for `BTC_LTC`)
    pub fn child(&self) -> &str {
        self.0.split_once('_').map(|(_, c)| c).unwrap_or(&self.0)
    }
}

impl FromStr for Pair {
    type Err = PairError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Pair::new(s)
    }
}

impl TryFrom<String> for Pair {
    type Error = PairError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Pair::new(s)
    }
}

impl From<Pair> for String {
    fn from(pair: Pair) -> Self {
        pair.0.to_string()
    }
}

impl std::fmt::Display for Pair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Series
// =============================================================================

/// Kind of cached time series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeriesKind {
    Candles,
    Trades,
    Lending,
}

impl SeriesKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeriesKind::Candles => "candles",
            SeriesKind::Trades => "trades",
            SeriesKind::Lending => "lending",
        }
    }
}

impl std::fmt::Display for SeriesKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Collection holding the candles of a pair
pub fn chart_collection(pair: &Pair) -> String {
    format!("{}-chart", pair)
}

/// Collection holding the trade history of a pair
pub fn trade_collection(pair: &Pair) -> String {
    format!("{}-tradeHistory", pair)
}

/// Collection shared by the lending history of every currency
pub const LENDING_COLLECTION: &str = "lendingHistory";

/// A record that can live in a series: it has a unique key and a time
pub trait SeriesRecord: Serialize + serde::de::DeserializeOwned {
    /// Unique key within the series
    fn key(&self) -> String;

    /// Ordering time in epoch seconds
    fn time(&self) -> i64;

    /// Sub-scope inside a shared collection (the currency for lending)
    fn scope(&self) -> Option<&str> {
        None
    }
}

// =============================================================================
// Records
// =============================================================================

/// OHLCV candle for one base period, keyed by its opening timestamp
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candle {
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub quote_volume: f64,
    pub weighted_average: f64,
}

impl Candle {
    pub fn datetime(&self) -> Option<DateTime<Utc>> {
        epoch_to_datetime(self.timestamp)
    }
}

impl SeriesRecord for Candle {
    fn key(&self) -> String {
        self.timestamp.to_string()
    }

    fn time(&self) -> i64 {
        self.timestamp
    }
}

/// Trade direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl FromStr for TradeSide {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "buy" => Ok(TradeSide::Buy),
            "sell" => Ok(TradeSide::Sell),
            other => Err(format!("unknown trade side '{}'", other)),
        }
    }
}

impl std::fmt::Display for TradeSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradeSide::Buy => f.write_str("buy"),
            TradeSide::Sell => f.write_str("sell"),
        }
    }
}

/// One of our own fills on a pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trade {
    #[serde(rename = "globalTradeID")]
    pub global_trade_id: i64,
    #[serde(rename = "tradeID")]
    pub trade_id: i64,
    pub order_number: i64,
    pub date: i64,
    pub rate: f64,
    pub amount: f64,
    pub total: f64,
    pub fee: f64,
    #[serde(rename = "type")]
    pub side: TradeSide,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

impl SeriesRecord for Trade {
    fn key(&self) -> String {
        self.global_trade_id.to_string()
    }

    fn time(&self) -> i64 {
        self.date
    }
}

/// A closed loan from the lending market
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LendingEvent {
    pub id: i64,
    pub currency: String,
    pub rate: f64,
    pub amount: f64,
    pub duration: f64,
    pub interest: f64,
    pub fee: f64,
    pub earned: f64,
    pub open: i64,
    pub close: i64,
}

impl SeriesRecord for LendingEvent {
    fn key(&self) -> String {
        self.id.to_string()
    }

    fn time(&self) -> i64 {
        self.open
    }

    fn scope(&self) -> Option<&str> {
        Some(&self.currency)
    }
}
