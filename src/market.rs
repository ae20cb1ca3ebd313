//! Caller-facing read API for one pair
//!
//! Every read first runs a sync of the series it touches, so results always
//! include whatever the exchange has added since the last call.

use std::sync::Arc;
use tracing::info;

use crate::aggregate::Aggregator;
use crate::config::{Config, DefaultsConfig};
use crate::error::MarketResult;
use crate::frame::ChartFrame;
use crate::indicators::{IndicatorRegistry, IndicatorRequest};
use crate::resample::Period;
use crate::source::RemoteSource;
use crate::store::{SeriesStore, SeriesStoreExt};
use crate::sync::{SyncReport, SyncTarget, Synchronizer};
use crate::types::{LendingEvent, Pair, SeriesKind, Trade, TradeSide};

/// Chart read parameters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChartRequest {
    /// Earliest candle; defaults to the configured chart lookback
    pub start: Option<i64>,
    /// Resample into buckets of this width
    pub bucket: Option<Period>,
    pub indicators: Vec<IndicatorRequest>,
}

impl ChartRequest {
    pub fn since(start: i64) -> Self {
        ChartRequest {
            start: Some(start),
            ..Default::default()
        }
    }

    pub fn bucket(mut self, bucket: Period) -> Self {
        self.bucket = Some(bucket);
        self
    }

    pub fn indicator(mut self, request: IndicatorRequest) -> Self {
        self.indicators.push(request);
        self
    }
}

/// Filter over the stored trade history. Narrows what is returned, never what
/// is synced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TradeQuery {
    /// Inclusive lower bound on the trade date
    pub start: Option<i64>,
    /// Inclusive upper bound on the trade date
    pub end: Option<i64>,
    pub side: Option<TradeSide>,
}

impl TradeQuery {
    pub fn matches(&self, trade: &Trade) -> bool {
        self.start.map_or(true, |s| trade.date >= s)
            && self.end.map_or(true, |e| trade.date <= e)
            && self.side.map_or(true, |side| trade.side == side)
    }
}

pub struct Market {
    pair: Pair,
    store: Arc<dyn SeriesStore>,
    synchronizer: Synchronizer,
    aggregator: Aggregator,
    defaults: DefaultsConfig,
}

impl Market {
    pub fn new(
        pair: Pair,
        source: Arc<dyn RemoteSource>,
        store: Arc<dyn SeriesStore>,
        config: &Config,
    ) -> Self {
        Self::with_registry(pair, source, store, config, Arc::new(IndicatorRegistry::default()))
    }

    pub fn with_registry(
        pair: Pair,
        source: Arc<dyn RemoteSource>,
        store: Arc<dyn SeriesStore>,
        config: &Config,
        registry: Arc<IndicatorRegistry>,
    ) -> Self {
        let synchronizer = Synchronizer::new(source, store.clone(), config.sync.clone());
        let aggregator = Aggregator::new(store.clone(), registry, config.sync.candle_period);

        Market {
            pair,
            store,
            synchronizer,
            aggregator,
            defaults: config.defaults.clone(),
        }
    }

    /// Replace the wall clock used for watermarks and default starts
    pub fn with_clock(mut self, clock: fn() -> i64) -> Self {
        self.synchronizer = self.synchronizer.with_clock(clock);
        self
    }

    pub fn pair(&self) -> &Pair {
        &self.pair
    }

    pub fn synchronizer(&self) -> &Synchronizer {
        &self.synchronizer
    }

    /// Sync target of one series of this pair; lending tracks the child
    /// currency
    pub fn target(&self, kind: SeriesKind) -> SyncTarget {
        match kind {
            SeriesKind::Candles => self.synchronizer.candles(&self.pair),
            SeriesKind::Trades => SyncTarget::Trades {
                pair: self.pair.clone(),
            },
            SeriesKind::Lending => SyncTarget::Lending {
                currency: self.pair.child().to_string(),
            },
        }
    }

    /// Sync one series of this pair from its stored watermark
    pub fn sync(&self, kind: SeriesKind) -> MarketResult<SyncReport> {
        self.synchronizer.sync(&self.target(kind), None)
    }

    /// Candle chart of this pair, synced first
    pub fn get_chart(&self, request: &ChartRequest) -> MarketResult<ChartFrame> {
        self.sync(SeriesKind::Candles)?;

        let start = request
            .start
            .unwrap_or_else(|| self.synchronizer.now() - self.defaults.chart_lookback_secs);

        let frame = self
            .aggregator
            .read(&self.pair, start, request.bucket, &request.indicators)?;
        info!("{} chart: {} rows from {}", self.pair, frame.len(), start);
        Ok(frame)
    }

    /// Our trades on this pair matching `query`, ascending by date
    pub fn get_trade_history(&self, query: &TradeQuery) -> MarketResult<Vec<Trade>> {
        self.sync(SeriesKind::Trades)?;

        let mut filter = self.target(SeriesKind::Trades).filter();
        if let Some(start) = query.start {
            filter = filter.since(start);
        }
        if let Some(end) = query.end {
            filter = filter.until(end.saturating_add(1));
        }

        let trades: Vec<Trade> = self.store.range(&filter)?;
        Ok(trades.into_iter().filter(|t| query.matches(t)).collect())
    }

    /// Closed loans of `currency` (default: the pair's child currency)
    /// opened at or after `start` (default: one lookback ago)
    pub fn get_lending_history(
        &self,
        currency: Option<&str>,
        start: Option<i64>,
    ) -> MarketResult<Vec<LendingEvent>> {
        let currency = currency
            .map(|c| c.trim().to_uppercase())
            .unwrap_or_else(|| self.pair.child().to_string());
        let target = SyncTarget::Lending { currency };

        self.synchronizer.sync(&target, None)?;

        let start = start
            .unwrap_or_else(|| self.synchronizer.now() - self.defaults.lending_lookback_secs);
        Ok(self.store.range(&target.filter().since(start))?)
    }
}
