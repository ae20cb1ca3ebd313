//! Indicator pipeline powered by the `ta` crate
//!
//! Indicators are looked up by name in an explicit registry. Each one takes
//! the chart frame built so far plus keyword parameters and returns the frame
//! widened with its output columns. Unknown names are skipped.
//!
//! Built-in indicators:
//! - `sma`, `ema`, `rsi`: `period`, `column` (default `close`), `name`
//! - `macd`: `fast`, `slow`, `signal`, `column`
//! - `bbands`: `period`, `std`, `column`
//! - `atr`: `period`, `name`
//!
//! Input columns may start with a gap (the warm-up of an earlier indicator),
//! so indicators can be chained.

use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;
use ta::indicators::{
    AverageTrueRange, BollingerBands, ExponentialMovingAverage,
    MovingAverageConvergenceDivergence, RelativeStrengthIndex, SimpleMovingAverage,
};
use ta::{DataItem, Next};
use tracing::debug;

use crate::error::{FrameError, IndicatorError};
use crate::frame::ChartFrame;

// =============================================================================
// Parameters and Requests
// =============================================================================

/// Keyword parameters of one indicator invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndicatorParams(BTreeMap<String, String>);

impl IndicatorParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.0.insert(key.into(), value.to_string());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn str_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    /// Positive integer parameter
    pub fn period(
        &self,
        indicator: &'static str,
        key: &str,
        default: usize,
    ) -> Result<usize, IndicatorError> {
        let Some(raw) = self.get(key) else {
            return Ok(default);
        };
        match raw.trim().parse::<usize>() {
            Ok(n) if n > 0 => Ok(n),
            _ => Err(IndicatorError::InvalidParam {
                indicator,
                param: key.to_string(),
                reason: format!("expected a positive integer, got '{}'", raw),
            }),
        }
    }

    pub fn float(
        &self,
        indicator: &'static str,
        key: &str,
        default: f64,
    ) -> Result<f64, IndicatorError> {
        let Some(raw) = self.get(key) else {
            return Ok(default);
        };
        match raw.trim().parse::<f64>() {
            Ok(x) if x.is_finite() && x > 0.0 => Ok(x),
            _ => Err(IndicatorError::InvalidParam {
                indicator,
                param: key.to_string(),
                reason: format!("expected a positive number, got '{}'", raw),
            }),
        }
    }
}

/// An indicator name with its parameters, e.g. `sma:period=20,column=close`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndicatorRequest {
    pub name: String,
    pub params: IndicatorParams,
}

impl IndicatorRequest {
    pub fn new(name: impl Into<String>, params: IndicatorParams) -> Self {
        IndicatorRequest {
            name: name.into(),
            params,
        }
    }
}

impl FromStr for IndicatorRequest {
    type Err = IndicatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || IndicatorError::Request(s.to_string());

        let (name, rest) = match s.split_once(':') {
            Some((name, rest)) => (name.trim(), Some(rest)),
            None => (s.trim(), None),
        };
        if name.is_empty() {
            return Err(bad());
        }

        let mut params = IndicatorParams::new();
        for pair in rest.into_iter().flat_map(|r| r.split(',')) {
            let (key, value) = pair.split_once('=').ok_or_else(bad)?;
            let (key, value) = (key.trim(), value.trim());
            if key.is_empty() || value.is_empty() {
                return Err(bad());
            }
            params = params.with(key, value);
        }

        Ok(IndicatorRequest::new(name.to_lowercase(), params))
    }
}

// =============================================================================
// Registry
// =============================================================================

pub type IndicatorFn = fn(ChartFrame, &IndicatorParams) -> Result<ChartFrame, IndicatorError>;

/// Explicit name -> indicator mapping, populated at startup
#[derive(Clone)]
pub struct IndicatorRegistry {
    indicators: BTreeMap<&'static str, IndicatorFn>,
}

impl Default for IndicatorRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

impl std::fmt::Debug for IndicatorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.indicators.keys()).finish()
    }
}

impl IndicatorRegistry {
    /// Registry without any indicator
    pub fn empty() -> Self {
        IndicatorRegistry {
            indicators: BTreeMap::new(),
        }
    }

    pub fn with_builtin() -> Self {
        let mut registry = Self::empty();
        registry.register("sma", sma);
        registry.register("ema", ema);
        registry.register("rsi", rsi);
        registry.register("macd", macd);
        registry.register("bbands", bbands);
        registry.register("atr", atr);
        registry
    }

    /// Add an indicator, replacing one of the same name
    pub fn register(&mut self, name: &'static str, indicator: IndicatorFn) {
        self.indicators.insert(name, indicator);
    }

    pub fn names(&self) -> BTreeSet<&'static str> {
        self.indicators.keys().copied().collect()
    }

    pub fn get(&self, name: &str) -> Option<IndicatorFn> {
        self.indicators.get(name).copied()
    }

    /// Run one indicator; an unknown name leaves the frame unchanged
    pub fn apply(
        &self,
        name: &str,
        frame: ChartFrame,
        params: &IndicatorParams,
    ) -> Result<ChartFrame, IndicatorError> {
        match self.get(name) {
            Some(indicator) => {
                debug!("Applying indicator {} {:?}", name, params);
                indicator(frame, params)
            }
            None => {
                debug!("Unknown indicator '{}', skipping", name);
                Ok(frame)
            }
        }
    }

    /// Run the requests in order, each on the output of the previous one
    pub fn apply_all(
        &self,
        frame: ChartFrame,
        requests: &[IndicatorRequest],
    ) -> Result<ChartFrame, IndicatorError> {
        requests
            .iter()
            .try_fold(frame, |frame, req| self.apply(&req.name, frame, &req.params))
    }
}

// =============================================================================
// Column Helpers
// =============================================================================

/// Values of a column after its leading gap, with the gap length
///
/// A missing value after the first present one is an error.
fn dense(frame: &ChartFrame, column: &str) -> Result<(usize, Vec<f64>), FrameError> {
    let values = frame.require(column)?;
    let offset = values.iter().take_while(|v| v.is_none()).count();

    let dense = values[offset..]
        .iter()
        .enumerate()
        .map(|(i, v)| {
            v.ok_or_else(|| FrameError::Gap {
                name: column.to_string(),
                index: offset + i,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok((offset, dense))
}

/// Re-align indicator output to the frame, hiding the first `warmup - 1` values
fn pad(offset: usize, warmup: usize, out: Vec<f64>) -> Vec<Option<f64>> {
    let mut result = vec![None; offset];
    result.extend(
        out.into_iter()
            .enumerate()
            .map(|(i, v)| if i + 1 >= warmup { Some(v) } else { None }),
    );
    result
}

fn compute_err(indicator: &'static str, err: impl std::fmt::Debug) -> IndicatorError {
    IndicatorError::Compute {
        indicator,
        reason: format!("{:?}", err),
    }
}

/// Run a single-output `ta` indicator over one column
fn single<I, F>(
    frame: ChartFrame,
    params: &IndicatorParams,
    indicator: &'static str,
    build: F,
) -> Result<ChartFrame, IndicatorError>
where
    I: Next<f64, Output = f64>,
    F: FnOnce(usize) -> ta::errors::Result<I>,
{
    let period = params.period(indicator, "period", 14)?;
    let column = params.str_or("column", "close");
    let default_name = format!("{}_{}", indicator, period);
    let name = params.str_or("name", &default_name).to_string();

    let (offset, values) = dense(&frame, column)?;
    let mut ind = build(period).map_err(|e| compute_err(indicator, e))?;
    let out: Vec<f64> = values.iter().map(|&v| ind.next(v)).collect();

    Ok(frame.with_column(name, pad(offset, period, out))?)
}

// =============================================================================
// Built-in Indicators
// =============================================================================

/// Simple moving average
pub fn sma(frame: ChartFrame, params: &IndicatorParams) -> Result<ChartFrame, IndicatorError> {
    single(frame, params, "sma", SimpleMovingAverage::new)
}

/// Exponential moving average
pub fn ema(frame: ChartFrame, params: &IndicatorParams) -> Result<ChartFrame, IndicatorError> {
    single(frame, params, "ema", ExponentialMovingAverage::new)
}

/// Relative strength index
pub fn rsi(frame: ChartFrame, params: &IndicatorParams) -> Result<ChartFrame, IndicatorError> {
    single(frame, params, "rsi", RelativeStrengthIndex::new)
}

/// MACD line, signal line and histogram
pub fn macd(frame: ChartFrame, params: &IndicatorParams) -> Result<ChartFrame, IndicatorError> {
    let fast = params.period("macd", "fast", 12)?;
    let slow = params.period("macd", "slow", 26)?;
    let signal = params.period("macd", "signal", 9)?;
    if fast >= slow {
        return Err(IndicatorError::InvalidParam {
            indicator: "macd",
            param: "fast".to_string(),
            reason: format!("must be below slow ({} >= {})", fast, slow),
        });
    }
    let column = params.str_or("column", "close");

    let (offset, values) = dense(&frame, column)?;
    let mut ind = MovingAverageConvergenceDivergence::new(fast, slow, signal)
        .map_err(|e| compute_err("macd", e))?;

    let mut line = Vec::with_capacity(values.len());
    let mut sig = Vec::with_capacity(values.len());
    let mut hist = Vec::with_capacity(values.len());
    for &v in &values {
        let out = ind.next(v);
        line.push(out.macd);
        sig.push(out.signal);
        hist.push(out.histogram);
    }

    Ok(frame
        .with_column("macd", pad(offset, slow, line))?
        .with_column("macd_signal", pad(offset, slow, sig))?
        .with_column("macd_hist", pad(offset, slow, hist))?)
}

/// Bollinger bands: upper, middle (SMA) and lower
pub fn bbands(frame: ChartFrame, params: &IndicatorParams) -> Result<ChartFrame, IndicatorError> {
    let period = params.period("bbands", "period", 20)?;
    let k = params.float("bbands", "std", 2.0)?;
    let column = params.str_or("column", "close");

    let (offset, values) = dense(&frame, column)?;
    let mut ind = BollingerBands::new(period, k).map_err(|e| compute_err("bbands", e))?;

    let mut upper = Vec::with_capacity(values.len());
    let mut middle = Vec::with_capacity(values.len());
    let mut lower = Vec::with_capacity(values.len());
    for &v in &values {
        let out = ind.next(v);
        upper.push(out.upper);
        middle.push(out.average);
        lower.push(out.lower);
    }

    Ok(frame
        .with_column("bb_upper", pad(offset, period, upper))?
        .with_column("bb_middle", pad(offset, period, middle))?
        .with_column("bb_lower", pad(offset, period, lower))?)
}

/// Average true range over the high, low and close columns
pub fn atr(frame: ChartFrame, params: &IndicatorParams) -> Result<ChartFrame, IndicatorError> {
    let period = params.period("atr", "period", 14)?;
    let default_name = format!("atr_{}", period);
    let name = params.str_or("name", &default_name).to_string();

    let (high_off, high) = dense(&frame, "high")?;
    let (low_off, low) = dense(&frame, "low")?;
    let (close_off, close) = dense(&frame, "close")?;
    let offset = high_off.max(low_off).max(close_off);

    let mut ind = AverageTrueRange::new(period).map_err(|e| compute_err("atr", e))?;
    let mut out = Vec::with_capacity(frame.len() - offset);
    for i in offset..frame.len() {
        let (h, l, c) = (high[i - high_off], low[i - low_off], close[i - close_off]);
        let item = DataItem::builder()
            .open(c)
            .high(h)
            .low(l)
            .close(c)
            .volume(0.0)
            .build()
            .map_err(|e| compute_err("atr", e))?;
        out.push(ind.next(&item));
    }

    Ok(frame.with_column(name, pad(offset, period, out))?)
}
