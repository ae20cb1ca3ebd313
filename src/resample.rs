//! Candle resampling into coarser, calendar-aligned buckets

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

use crate::types::{Candle, DAY, HOUR, MINUTE, WEEK};

/// 1970-01-05 00:00 UTC
const FIRST_MONDAY: i64 = 4 * DAY;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PeriodError {
    #[error("invalid period '{0}': expected seconds or a number with m/h/d/w suffix")]
    Parse(String),

    #[error("period must be positive, got {0}s")]
    NotPositive(i64),

    #[error("bucket of {bucket}s is not a multiple of the {base}s base period")]
    NotMultiple { bucket: i64, base: i64 },
}

/// A candle period in seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Period(i64);

impl Period {
    pub fn from_secs(secs: i64) -> Result<Self, PeriodError> {
        if secs <= 0 {
            return Err(PeriodError::NotPositive(secs));
        }
        Ok(Period(secs))
    }

    pub fn secs(&self) -> i64 {
        self.0
    }

    /// Start of the bucket containing `ts`
    ///
    /// Week multiples start on Monday 00:00 UTC. Buckets that divide a day,
    /// and whole-day buckets, sit on the epoch grid. Any other sub-day bucket
    /// restarts at UTC midnight, leaving a shorter last window each day.
    pub fn floor(&self, ts: i64) -> i64 {
        let secs = self.0;
        if secs % WEEK == 0 {
            ts - (ts - FIRST_MONDAY).rem_euclid(secs)
        } else if secs < DAY && DAY % secs != 0 {
            let midnight = ts - ts.rem_euclid(DAY);
            midnight + (ts - midnight) / secs * secs
        } else {
            ts - ts.rem_euclid(secs)
        }
    }
}

impl FromStr for Period {
    type Err = PeriodError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        let (digits, unit) = match s.char_indices().last() {
            Some((i, c)) if c.is_ascii_alphabetic() => (&s[..i], Some(c)),
            _ => (s.as_str(), None),
        };

        let n: i64 = digits
            .parse()
            .map_err(|_| PeriodError::Parse(s.clone()))?;
        let scale = match unit {
            None | Some('s') => 1,
            Some('m') => MINUTE,
            Some('h') => HOUR,
            Some('d') => DAY,
            Some('w') => WEEK,
            Some(_) => return Err(PeriodError::Parse(s.clone())),
        };

        let secs = n
            .checked_mul(scale)
            .ok_or_else(|| PeriodError::Parse(s.clone()))?;
        Period::from_secs(secs)
    }
}

impl std::fmt::Display for Period {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let secs = self.0;
        if secs % WEEK == 0 {
            write!(f, "{}w", secs / WEEK)
        } else if secs % DAY == 0 {
            write!(f, "{}d", secs / DAY)
        } else if secs % HOUR == 0 {
            write!(f, "{}h", secs / HOUR)
        } else if secs % MINUTE == 0 {
            write!(f, "{}m", secs / MINUTE)
        } else {
            write!(f, "{}s", secs)
        }
    }
}

/// Group base-period candles into `bucket`-wide windows
///
/// Windows are left-closed and labeled by their start, aligned as
/// [`Period::floor`] describes. Input must be ascending by timestamp. Empty
/// windows produce no candle.
pub fn resample(candles: &[Candle], base: i64, bucket: Period) -> Result<Vec<Candle>, PeriodError> {
    if base <= 0 {
        return Err(PeriodError::NotPositive(base));
    }
    if bucket.secs() % base != 0 {
        return Err(PeriodError::NotMultiple {
            bucket: bucket.secs(),
            base,
        });
    }
    if bucket.secs() == base {
        return Ok(candles.to_vec());
    }

    let out = candles
        .iter()
        .chunk_by(|c| bucket.floor(c.timestamp))
        .into_iter()
        .filter_map(|(start, group)| reduce(start, group))
        .collect();

    Ok(out)
}

fn reduce<'a>(start: i64, group: impl Iterator<Item = &'a Candle>) -> Option<Candle> {
    let mut group = group.peekable();
    let first = group.peek()?;

    let mut acc = Candle {
        timestamp: start,
        open: first.open,
        high: f64::NEG_INFINITY,
        low: f64::INFINITY,
        close: first.close,
        volume: 0.0,
        quote_volume: 0.0,
        weighted_average: 0.0,
    };

    let mut n = 0usize;
    for c in group {
        acc.high = acc.high.max(c.high);
        acc.low = acc.low.min(c.low);
        acc.close = c.close;
        acc.volume += c.volume;
        acc.quote_volume += c.quote_volume;
        acc.weighted_average += c.weighted_average;
        n += 1;
    }
    acc.weighted_average /= n as f64;

    Some(acc)
}
