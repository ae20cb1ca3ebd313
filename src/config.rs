//! Configuration management
//!
//! Handles loading and parsing of JSON configuration files with environment
//! variable support for API credentials. Every section has defaults, so an
//! empty `{}` file (or no file at all) is a valid configuration.

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::fs;
use std::path::Path;

use crate::types::{Pair, SeriesKind, DAY, WEEK, YEAR};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub exchange: ExchangeConfig,
    pub store: StoreConfig,
    pub sync: SyncConfig,
    pub defaults: DefaultsConfig,
}

impl Config {
    /// Load configuration from JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref()).with_context(|| {
            format!("Failed to read config file: {}", path.as_ref().display())
        })?;
        let mut config: Config =
            serde_json::from_str(&contents).context("Failed to parse config JSON")?;

        config.apply_env();
        Ok(config)
    }

    /// Load from file when it exists, otherwise start from defaults
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        if path.as_ref().exists() {
            Self::from_file(path)
        } else {
            let mut config = Config::default();
            config.apply_env();
            Ok(config)
        }
    }

    /// Load API credentials from environment if set
    fn apply_env(&mut self) {
        if let Ok(api_key) = std::env::var("POLONIEX_API_KEY") {
            self.exchange.api_key = Some(api_key);
        }
        if let Ok(api_secret) = std::env::var("POLONIEX_API_SECRET") {
            self.exchange.api_secret = Some(api_secret);
        }
    }
}

/// Exchange configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    pub public_url: String,
    pub trading_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_secret: Option<String>,
    pub timeout_secs: u64,
    /// Minimum spacing between two requests (the exchange allows ~6 req/s)
    pub request_delay_ms: u64,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        ExchangeConfig {
            public_url: "https://poloniex.com/public".to_string(),
            trading_url: "https://poloniex.com/tradingApi".to_string(),
            api_key: None,
            api_secret: None,
            timeout_secs: 30,
            request_delay_ms: 170,
        }
    }
}

/// Store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            path: "data/market.db".to_string(),
        }
    }
}

/// How the watermark of one series is chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesPolicy {
    /// Only records newer than `now - window` may serve as watermark, so
    /// recent records are fetched again and revised. `None` looks at the
    /// whole series.
    pub revision_window_secs: Option<i64>,
    /// How far back the first sync of an empty series reaches
    pub fallback_lookback_secs: i64,
    /// Subtracted from the stored watermark before fetching
    pub overlap_secs: i64,
}

impl SeriesPolicy {
    pub fn candles() -> Self {
        SeriesPolicy {
            revision_window_secs: Some(WEEK * 2),
            fallback_lookback_secs: YEAR * 13,
            overlap_secs: 0,
        }
    }

    pub fn history() -> Self {
        SeriesPolicy {
            revision_window_secs: None,
            fallback_lookback_secs: YEAR * 10,
            overlap_secs: 1,
        }
    }
}

/// Fields given for one policy in a config file; the rest keep the
/// defaults of that series kind
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PolicyOverride {
    /// Absent keeps the default, `null` disables the window
    #[serde(deserialize_with = "present")]
    revision_window_secs: Option<Option<i64>>,
    fallback_lookback_secs: Option<i64>,
    overlap_secs: Option<i64>,
}

impl PolicyOverride {
    fn over(self, base: SeriesPolicy) -> SeriesPolicy {
        SeriesPolicy {
            revision_window_secs: self.revision_window_secs.unwrap_or(base.revision_window_secs),
            fallback_lookback_secs: self.fallback_lookback_secs.unwrap_or(base.fallback_lookback_secs),
            overlap_secs: self.overlap_secs.unwrap_or(base.overlap_secs),
        }
    }
}

fn present<'de, D, T>(deserializer: D) -> std::result::Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

fn candle_policy<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<SeriesPolicy, D::Error> {
    PolicyOverride::deserialize(deserializer).map(|o| o.over(SeriesPolicy::candles()))
}

fn history_policy<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<SeriesPolicy, D::Error> {
    PolicyOverride::deserialize(deserializer).map(|o| o.over(SeriesPolicy::history()))
}

/// Synchronization configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Base candle period in seconds, the finest granularity stored
    pub candle_period: i64,
    #[serde(deserialize_with = "candle_policy")]
    pub candles: SeriesPolicy,
    #[serde(deserialize_with = "history_policy")]
    pub trades: SeriesPolicy,
    #[serde(deserialize_with = "history_policy")]
    pub lending: SeriesPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            candle_period: 300,
            candles: SeriesPolicy::candles(),
            trades: SeriesPolicy::history(),
            lending: SeriesPolicy::history(),
        }
    }
}

impl SyncConfig {
    pub fn policy(&self, kind: SeriesKind) -> &SeriesPolicy {
        match kind {
            SeriesKind::Candles => &self.candles,
            SeriesKind::Trades => &self.trades,
            SeriesKind::Lending => &self.lending,
        }
    }
}

/// Read defaults and the pairs synced by `market-sync sync`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultsConfig {
    pub pairs: Vec<Pair>,
    /// Chart reads without a start return this much history
    pub chart_lookback_secs: i64,
    /// Lending reads without a start return this much history
    pub lending_lookback_secs: i64,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        DefaultsConfig {
            pairs: Vec::new(),
            chart_lookback_secs: YEAR,
            lending_lookback_secs: DAY,
        }
    }
}
