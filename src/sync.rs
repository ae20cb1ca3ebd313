//! Incremental synchronization of cached series against the remote source
//!
//! A sync pass picks a watermark from the store, fetches only records at or
//! after it, canonicalizes them and upserts them by key. Re-running a pass
//! over an overlapping range leaves the store unchanged.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::error::{MarketResult, StoreError};
use crate::normalize::{self, MalformedRecord, RawRecord};
use crate::source::RemoteSource;
use crate::store::{SeriesFilter, SeriesStore, SeriesStoreExt, Upsert};
use crate::types::{
    chart_collection, now_epoch, trade_collection, Pair, SeriesKind, SeriesRecord,
    LENDING_COLLECTION,
};

/// What to synchronize
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncTarget {
    Candles { pair: Pair, period: i64 },
    Trades { pair: Pair },
    Lending { currency: String },
}

impl SyncTarget {
    pub fn kind(&self) -> SeriesKind {
        match self {
            SyncTarget::Candles { .. } => SeriesKind::Candles,
            SyncTarget::Trades { .. } => SeriesKind::Trades,
            SyncTarget::Lending { .. } => SeriesKind::Lending,
        }
    }

    /// Store filter selecting the whole series of this target
    pub fn filter(&self) -> SeriesFilter {
        match self {
            SyncTarget::Candles { pair, .. } => SeriesFilter::collection(chart_collection(pair)),
            SyncTarget::Trades { pair } => SeriesFilter::collection(trade_collection(pair)),
            SyncTarget::Lending { currency } => {
                SeriesFilter::collection(LENDING_COLLECTION).scope(currency.trim().to_uppercase())
            }
        }
    }
}

impl std::fmt::Display for SyncTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncTarget::Candles { pair, period } => write!(f, "{} candles ({}s)", pair, period),
            SyncTarget::Trades { pair } => write!(f, "{} trades", pair),
            SyncTarget::Lending { currency } => write!(f, "{} lending", currency),
        }
    }
}

/// Where a fetch starts, and why
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Watermark {
    /// Derived from the latest stored record
    Stored(i64),
    /// Nothing usable stored; reach back the full fallback lookback
    Fallback(i64),
    /// Given explicitly by the caller
    Override(i64),
}

impl Watermark {
    pub fn start(&self) -> i64 {
        match *self {
            Watermark::Stored(t) | Watermark::Fallback(t) | Watermark::Override(t) => t,
        }
    }
}

/// Outcome of one sync pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub kind: SeriesKind,
    pub watermark: Watermark,
    pub fetched: usize,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Malformed records dropped from the batch
    pub skipped: usize,
}

impl SyncReport {
    fn new(kind: SeriesKind, watermark: Watermark, fetched: usize) -> Self {
        SyncReport {
            kind,
            watermark,
            fetched,
            inserted: 0,
            updated: 0,
            unchanged: 0,
            skipped: 0,
        }
    }

    /// Records that were new or changed
    pub fn changed(&self) -> usize {
        self.inserted + self.updated
    }

    fn record(&mut self, outcome: Upsert) {
        match outcome {
            Upsert::Inserted => self.inserted += 1,
            Upsert::Updated => self.updated += 1,
            Upsert::Unchanged => self.unchanged += 1,
        }
    }
}

/// Pulls new records from a [`RemoteSource`] into a [`SeriesStore`]
pub struct Synchronizer {
    source: Arc<dyn RemoteSource>,
    store: Arc<dyn SeriesStore>,
    config: SyncConfig,
    clock: fn() -> i64,
}

impl Synchronizer {
    pub fn new(source: Arc<dyn RemoteSource>, store: Arc<dyn SeriesStore>, config: SyncConfig) -> Self {
        Synchronizer {
            source,
            store,
            config,
            clock: now_epoch,
        }
    }

    /// Replace the wall clock (epoch seconds)
    pub fn with_clock(mut self, clock: fn() -> i64) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn now(&self) -> i64 {
        (self.clock)()
    }

    /// Candles of `pair` at the configured base period
    pub fn candles(&self, pair: &Pair) -> SyncTarget {
        SyncTarget::Candles {
            pair: pair.clone(),
            period: self.config.candle_period,
        }
    }

    /// Choose the fetch start for a target
    ///
    /// Store failures are logged and treated like an empty series.
    pub fn watermark(&self, target: &SyncTarget) -> Watermark {
        let now = self.now();
        let policy = self.config.policy(target.kind());

        let mut filter = target.filter();
        if let Some(window) = policy.revision_window_secs {
            filter = filter.since(now - window);
        }

        match self.store.find_latest(&filter) {
            Ok(Some(doc)) => Watermark::Stored(doc.time - policy.overlap_secs),
            Ok(None) => {
                warn!("No recent {} stored, fetching full history", target);
                Watermark::Fallback(now - policy.fallback_lookback_secs)
            }
            Err(e) => {
                warn!("Watermark lookup for {} failed, fetching full history: {}", target, e);
                Watermark::Fallback(now - policy.fallback_lookback_secs)
            }
        }
    }

    /// Run one sync pass; `since` overrides the stored watermark
    pub fn sync(&self, target: &SyncTarget, since: Option<i64>) -> MarketResult<SyncReport> {
        let watermark = match since {
            Some(t) => Watermark::Override(t),
            None => self.watermark(target),
        };

        info!("Getting new {} from {}", target, watermark.start());

        let report = match target {
            SyncTarget::Candles { pair, period } => {
                let raw = self.source.fetch_candles(pair, *period, watermark.start())?;
                self.merge(target, watermark, raw, normalize::candle)?
            }
            SyncTarget::Trades { pair } => {
                let raw = self.source.fetch_trades(pair, watermark.start())?;
                self.merge(target, watermark, raw, |r| normalize::trade(r).map(Some))?
            }
            SyncTarget::Lending { currency } => {
                let raw = self.source.fetch_lending(watermark.start())?;
                self.merge(target, watermark, raw, |r| {
                    normalize::lending(r).map(|loan| {
                        Some(loan).filter(|l| l.currency.eq_ignore_ascii_case(currency.trim()))
                    })
                })?
            }
        };

        if report.changed() > 0 {
            info!(
                "Updating {} with {} new and {} updated entries",
                target, report.inserted, report.updated
            );
        } else {
            debug!("{} already up to date ({} fetched)", target, report.fetched);
        }
        if report.skipped > 0 {
            warn!("{}: skipped {} malformed records", target, report.skipped);
        }

        Ok(report)
    }

    /// Canonicalize and upsert a fetched batch
    ///
    /// `normalize` returns `Ok(None)` for records that belong to no series
    /// (placeholders, other currencies). A malformed record is skipped and
    /// the rest of the batch is still merged.
    fn merge<R, F>(
        &self,
        target: &SyncTarget,
        watermark: Watermark,
        raw: Vec<RawRecord>,
        normalize: F,
    ) -> Result<SyncReport, StoreError>
    where
        R: SeriesRecord,
        F: Fn(&RawRecord) -> Result<Option<R>, MalformedRecord>,
    {
        let collection = target.filter().collection;
        let mut report = SyncReport::new(target.kind(), watermark, raw.len());

        for record in &raw {
            match normalize(record) {
                Ok(Some(record)) => {
                    let outcome = self.store.put(&collection, &record)?;
                    report.record(outcome);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("Skipping malformed {} record: {}", target.kind(), e);
                    report.skipped += 1;
                }
            }
        }

        Ok(report)
    }
}
