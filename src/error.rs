//! Error types for the store, the remote source and the read pipeline

use thiserror::Error;

/// Failures of the series store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("document codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("store connection lock poisoned")]
    Poisoned,

    #[error("failed to prepare store location: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures of the remote source (transport or malformed payloads)
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("exchange returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("exchange error: {0}")]
    Exchange(String),

    #[error("unexpected response for {command}: {detail}")]
    Decode { command: String, detail: String },

    #[error("{0} requires API credentials")]
    MissingCredentials(&'static str),
}

/// Failures while building or widening a chart frame
#[derive(Debug, Error, PartialEq)]
pub enum FrameError {
    #[error("column '{name}' has {actual} values, frame has {expected} rows")]
    LengthMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("no column named '{0}'")]
    MissingColumn(String),

    #[error("column '{name}' has a gap at row {index}")]
    Gap { name: String, index: usize },
}

/// Failures of a known indicator (unknown names are skipped, never an error)
#[derive(Debug, Error, PartialEq)]
pub enum IndicatorError {
    #[error("indicator '{indicator}': invalid parameter '{param}': {reason}")]
    InvalidParam {
        indicator: &'static str,
        param: String,
        reason: String,
    },

    #[error("indicator '{indicator}': {reason}")]
    Compute {
        indicator: &'static str,
        reason: String,
    },

    #[error("invalid indicator request '{0}': expected name or name:key=value,...")]
    Request(String),

    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// Top-level error of the market read API
#[derive(Debug, Error)]
pub enum MarketError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Indicator(#[from] IndicatorError),

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Period(#[from] crate::resample::PeriodError),
}

pub type MarketResult<T> = Result<T, MarketError>;
