//! Chart reads: stored candles -> optional resample -> percent change ->
//! indicators

use std::sync::Arc;
use tracing::debug;

use crate::error::MarketResult;
use crate::frame::ChartFrame;
use crate::indicators::{IndicatorRegistry, IndicatorRequest};
use crate::resample::{resample, Period};
use crate::store::{SeriesFilter, SeriesStore, SeriesStoreExt};
use crate::types::{chart_collection, Candle, Pair};

pub struct Aggregator {
    store: Arc<dyn SeriesStore>,
    registry: Arc<IndicatorRegistry>,
    base_period: i64,
}

impl Aggregator {
    pub fn new(
        store: Arc<dyn SeriesStore>,
        registry: Arc<IndicatorRegistry>,
        base_period: i64,
    ) -> Self {
        Aggregator {
            store,
            registry,
            base_period,
        }
    }

    /// Stored candles of `pair` with `timestamp >= start`, ascending
    pub fn candles(&self, pair: &Pair, start: i64) -> MarketResult<Vec<Candle>> {
        let filter = SeriesFilter::collection(chart_collection(pair)).since(start);
        Ok(self.store.range(&filter)?)
    }

    /// Build the chart frame of `pair` from `start` on
    pub fn read(
        &self,
        pair: &Pair,
        start: i64,
        bucket: Option<Period>,
        indicators: &[IndicatorRequest],
    ) -> MarketResult<ChartFrame> {
        let mut candles = self.candles(pair, start)?;
        debug!("Loaded {} candles of {} from {}", candles.len(), pair, start);

        if let Some(bucket) = bucket {
            candles = resample(&candles, self.base_period, bucket)?;
            debug!("Resampled {} into {} buckets of {}", pair, candles.len(), bucket);
        }

        let frame = ChartFrame::from_candles(&candles).add_percent_change()?;
        Ok(self.registry.apply_all(frame, indicators)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MarketError;
    use crate::frame::PERCENT_CHANGE;
    use crate::resample::PeriodError;
    use crate::store::SqliteSeriesStore;

    fn seeded() -> (Aggregator, Pair) {
        let store = Arc::new(SqliteSeriesStore::open_in_memory().unwrap());
        let pair = Pair::new("BTC_LTC").unwrap();
        let collection = chart_collection(&pair);
        for i in 0..12 {
            let close = 10.0 + i as f64;
            store
                .put(
                    &collection,
                    &Candle {
                        timestamp: 3_000 + i * 300,
                        open: close,
                        high: close,
                        low: close,
                        close,
                        volume: 1.0,
                        quote_volume: 1.0,
                        weighted_average: close,
                    },
                )
                .unwrap();
        }
        let aggregator = Aggregator::new(store, Arc::new(IndicatorRegistry::with_builtin()), 300);
        (aggregator, pair)
    }

    #[test]
    fn test_read_raw_slice() {
        let (agg, pair) = seeded();
        let frame = agg.read(&pair, 3_600, None, &[]).unwrap();

        assert_eq!(frame.len(), 10);
        assert_eq!(frame.timestamps()[0], 3_600);
        assert_eq!(frame.column(PERCENT_CHANGE).unwrap()[0], None);
        assert!(frame.dates()[0].is_some());
    }

    #[test]
    fn test_read_resampled() {
        let (agg, pair) = seeded();
        let frame = agg
            .read(&pair, 0, Some("30m".parse().unwrap()), &[])
            .unwrap();

        // 3000..6300 spans the 1800-aligned windows 1800, 3600 and 5400
        assert_eq!(frame.timestamps(), &[1_800, 3_600, 5_400]);
        assert_eq!(frame.column("volume").unwrap(), &[Some(2.0), Some(6.0), Some(4.0)]);
    }

    #[test]
    fn test_read_rejects_misaligned_bucket() {
        let (agg, pair) = seeded();
        let err = agg
            .read(&pair, 0, Some(Period::from_secs(450).unwrap()), &[])
            .unwrap_err();
        assert!(matches!(
            err,
            MarketError::Period(PeriodError::NotMultiple { bucket: 450, base: 300 })
        ));
    }

    #[test]
    fn test_read_with_indicators() {
        let (agg, pair) = seeded();
        let requests = vec!["sma:period=4".parse().unwrap(), "nope".parse().unwrap()];
        let frame = agg.read(&pair, 0, None, &requests).unwrap();

        let sma = frame.column("sma_4").unwrap();
        assert_eq!(sma[2], None);
        assert_eq!(sma[3], Some(11.5));
        assert!(frame.column("nope").is_none());
    }
}
