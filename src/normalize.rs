//! Canonicalization of wire records
//!
//! The exchange reports most numbers as strings and dates as
//! `YYYY-MM-DD HH:MM:SS` UTC text. Everything is coerced here, before a
//! record reaches the store.

use serde_json::Value;
use thiserror::Error;

use crate::types::{utc_str_to_epoch, Candle, LendingEvent, Trade, TradeSide};

/// A record as decoded from the exchange, before canonicalization
pub type RawRecord = serde_json::Map<String, Value>;

/// A fetched record that cannot be ingested
#[derive(Debug, Error, PartialEq)]
pub enum MalformedRecord {
    #[error("missing field '{0}'")]
    MissingField(&'static str),

    #[error("field '{field}' is not a number: {value}")]
    NotNumeric { field: &'static str, value: String },

    #[error("field '{field}' is not an integer: {value}")]
    NotInteger { field: &'static str, value: String },

    #[error("field '{field}' is not a UTC date: {value}")]
    BadDate { field: &'static str, value: String },

    #[error("field '{field}' is invalid: {reason}")]
    Invalid { field: &'static str, reason: String },
}

fn field<'a>(raw: &'a RawRecord, name: &'static str) -> Result<&'a Value, MalformedRecord> {
    match raw.get(name) {
        Some(Value::Null) | None => Err(MalformedRecord::MissingField(name)),
        Some(v) => Ok(v),
    }
}

/// Coerce a number or numeric string to `f64`
pub fn float_field(raw: &RawRecord, name: &'static str) -> Result<f64, MalformedRecord> {
    let value = field(raw, name)?;
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed
        .filter(|v| v.is_finite())
        .ok_or_else(|| MalformedRecord::NotNumeric {
            field: name,
            value: value.to_string(),
        })
}

/// Coerce an integer or integral string to `i64`
pub fn int_field(raw: &RawRecord, name: &'static str) -> Result<i64, MalformedRecord> {
    let value = field(raw, name)?;
    let parsed = match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| MalformedRecord::NotInteger {
        field: name,
        value: value.to_string(),
    })
}

/// Coerce a UTC date string (or raw epoch number) to epoch seconds
pub fn date_field(raw: &RawRecord, name: &'static str) -> Result<i64, MalformedRecord> {
    let value = field(raw, name)?;
    let parsed = match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => utc_str_to_epoch(s).or_else(|| s.trim().parse::<i64>().ok()),
        _ => None,
    };
    parsed.ok_or_else(|| MalformedRecord::BadDate {
        field: name,
        value: value.to_string(),
    })
}

fn str_field<'a>(raw: &'a RawRecord, name: &'static str) -> Result<&'a str, MalformedRecord> {
    field(raw, name)?
        .as_str()
        .ok_or_else(|| MalformedRecord::Invalid {
            field: name,
            reason: "expected a string".to_string(),
        })
}

/// Canonicalize a chart record
///
/// Returns `Ok(None)` for the all-zero placeholder the exchange sends when
/// a range holds no candles.
pub fn candle(raw: &RawRecord) -> Result<Option<Candle>, MalformedRecord> {
    let timestamp = int_field(raw, "date")?;
    if timestamp == 0 {
        return Ok(None);
    }

    Ok(Some(Candle {
        timestamp,
        open: float_field(raw, "open")?,
        high: float_field(raw, "high")?,
        low: float_field(raw, "low")?,
        close: float_field(raw, "close")?,
        volume: float_field(raw, "volume")?,
        quote_volume: float_field(raw, "quoteVolume")?,
        weighted_average: float_field(raw, "weightedAverage")?,
    }))
}

/// Canonicalize a trade history record, keyed by `globalTradeID`
pub fn trade(raw: &RawRecord) -> Result<Trade, MalformedRecord> {
    let side = str_field(raw, "type")?
        .parse::<TradeSide>()
        .map_err(|reason| MalformedRecord::Invalid {
            field: "type",
            reason,
        })?;

    Ok(Trade {
        global_trade_id: int_field(raw, "globalTradeID")?,
        trade_id: int_field(raw, "tradeID")?,
        order_number: int_field(raw, "orderNumber")?,
        date: date_field(raw, "date")?,
        rate: float_field(raw, "rate")?,
        amount: float_field(raw, "amount")?,
        total: float_field(raw, "total")?,
        fee: float_field(raw, "fee")?,
        side,
        category: raw
            .get("category")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

/// Canonicalize a lending history record, keyed by `id`
pub fn lending(raw: &RawRecord) -> Result<LendingEvent, MalformedRecord> {
    Ok(LendingEvent {
        id: int_field(raw, "id")?,
        currency: str_field(raw, "currency")?.trim().to_uppercase(),
        rate: float_field(raw, "rate")?,
        amount: float_field(raw, "amount")?,
        duration: float_field(raw, "duration")?,
        interest: float_field(raw, "interest")?,
        fee: float_field(raw, "fee")?,
        earned: float_field(raw, "earned")?,
        open: date_field(raw, "open")?,
        close: date_field(raw, "close")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(value: Value) -> RawRecord {
        match value {
            Value::Object(map) => map,
            other => panic!("not an object: {}", other),
        }
    }

    #[test]
    fn test_candle_from_numbers() {
        let c = candle(&raw(json!({
            "date": 1_496_275_200,
            "high": 0.0121,
            "low": 0.0118,
            "open": 0.0119,
            "close": 0.012,
            "volume": 12.5,
            "quoteVolume": 1050.0,
            "weightedAverage": 0.01195
        })))
        .unwrap()
        .unwrap();

        assert_eq!(c.timestamp, 1_496_275_200);
        assert_eq!(c.close, 0.012);
        assert_eq!(c.quote_volume, 1050.0);
    }

    #[test]
    fn test_candle_placeholder_is_dropped() {
        let c = candle(&raw(json!({
            "date": 0, "high": 0, "low": 0, "open": 0, "close": 0,
            "volume": 0, "quoteVolume": 0, "weightedAverage": 0
        })))
        .unwrap();
        assert!(c.is_none());
    }

    #[test]
    fn test_candle_missing_field() {
        let err = candle(&raw(json!({"date": 300, "open": 1.0}))).unwrap_err();
        assert_eq!(err, MalformedRecord::MissingField("high"));
    }

    #[test]
    fn test_trade_coerces_strings() {
        let t = trade(&raw(json!({
            "globalTradeID": 25129732,
            "tradeID": "6325758",
            "date": "2016-04-05 08:08:40",
            "rate": "0.02565498",
            "amount": "0.10000000",
            "total": "0.00256549",
            "fee": "0.00200000",
            "orderNumber": "34225313575",
            "type": "sell",
            "category": "exchange"
        })))
        .unwrap();

        assert_eq!(t.global_trade_id, 25_129_732);
        assert_eq!(t.trade_id, 6_325_758);
        assert_eq!(t.order_number, 34_225_313_575);
        assert_eq!(t.date, 1_459_843_720);
        assert_eq!(t.rate, 0.02565498);
        assert_eq!(t.amount, 0.1);
        assert_eq!(t.side, TradeSide::Sell);
        assert_eq!(t.category.as_deref(), Some("exchange"));
    }

    #[test]
    fn test_trade_rejects_bad_number() {
        let err = trade(&raw(json!({
            "globalTradeID": 1, "tradeID": "1", "date": "2016-04-05 08:08:40",
            "rate": "abc", "amount": "1", "total": "1", "fee": "0",
            "orderNumber": "1", "type": "buy"
        })))
        .unwrap_err();
        assert!(matches!(err, MalformedRecord::NotNumeric { field: "rate", .. }));
    }

    #[test]
    fn test_trade_rejects_bad_date() {
        let err = trade(&raw(json!({
            "globalTradeID": 1, "tradeID": "1", "date": "last tuesday",
            "rate": "1", "amount": "1", "total": "1", "fee": "0",
            "orderNumber": "1", "type": "buy"
        })))
        .unwrap_err();
        assert!(matches!(err, MalformedRecord::BadDate { field: "date", .. }));
    }

    #[test]
    fn test_lending_coerces_fields() {
        let l = lending(&raw(json!({
            "id": 175589553,
            "currency": "btc",
            "rate": "0.00057400",
            "amount": "0.04374404",
            "duration": "0.47610000",
            "interest": "0.00001196",
            "fee": "-0.00000179",
            "earned": "0.00001017",
            "open": "2016-09-28 06:47:26",
            "close": "2016-09-28 18:13:03"
        })))
        .unwrap();

        assert_eq!(l.id, 175_589_553);
        assert_eq!(l.currency, "BTC");
        assert_eq!(l.open, 1_475_045_246);
        assert_eq!(l.close, 1_475_086_383);
        assert_eq!(l.fee, -0.00000179);
    }
}
