//! Market Sync
//!
//! Locally cached candle, trade and lending history for exchange pairs,
//! incrementally synchronized against the exchange, with resampling and
//! indicators applied on read.

pub mod aggregate;
pub mod config;
pub mod error;
pub mod frame;
pub mod indicators;
pub mod market;
pub mod normalize;
pub mod poloniex;
pub mod resample;
pub mod source;
pub mod store;
pub mod sync;
pub mod types;

pub use config::Config;
pub use error::{MarketError, MarketResult};
pub use frame::ChartFrame;
pub use market::{ChartRequest, Market, TradeQuery};
pub use store::{SeriesStore, SqliteSeriesStore};
pub use sync::{SyncReport, SyncTarget, Synchronizer};
pub use types::*;
