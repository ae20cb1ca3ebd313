//! Remote source contract
//!
//! The exchange is the source of truth for every series. Implementations
//! return raw wire records; canonicalization happens in [`crate::normalize`].

use crate::error::SourceError;
use crate::normalize::RawRecord;
use crate::types::Pair;

/// Supplier of raw time-stamped records. All `start` values are
/// start-inclusive lower bounds in epoch seconds.
pub trait RemoteSource {
    /// Candles of `pair` at the given base period (seconds)
    fn fetch_candles(
        &self,
        pair: &Pair,
        period: i64,
        start: i64,
    ) -> Result<Vec<RawRecord>, SourceError>;

    /// Our own trades on `pair`
    fn fetch_trades(&self, pair: &Pair, start: i64) -> Result<Vec<RawRecord>, SourceError>;

    /// Our own closed loans, all currencies mixed
    fn fetch_lending(&self, start: i64) -> Result<Vec<RawRecord>, SourceError>;
}
