//! Column-oriented chart frame handed to callers and indicators

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io::Write;

use crate::error::FrameError;
use crate::types::{epoch_to_datetime, Candle, UTC_FORMAT};

pub const PERCENT_CHANGE: &str = "percentChange";

/// One named column; `None` marks rows without a value (warm-up, first row)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Column {
    pub name: String,
    pub values: Vec<Option<f64>>,
}

/// Time-indexed table of candle columns plus derived ones
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChartFrame {
    timestamps: Vec<i64>,
    columns: Vec<Column>,
}

impl ChartFrame {
    pub fn from_candles(candles: &[Candle]) -> Self {
        let column = |name: &str, f: fn(&Candle) -> f64| Column {
            name: name.to_string(),
            values: candles.iter().map(|c| Some(f(c))).collect(),
        };

        ChartFrame {
            timestamps: candles.iter().map(|c| c.timestamp).collect(),
            columns: vec![
                column("open", |c| c.open),
                column("high", |c| c.high),
                column("low", |c| c.low),
                column("close", |c| c.close),
                column("volume", |c| c.volume),
                column("quoteVolume", |c| c.quote_volume),
                column("weightedAverage", |c| c.weighted_average),
            ],
        }
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn timestamps(&self) -> &[i64] {
        &self.timestamps
    }

    /// UTC datetime of every row
    pub fn dates(&self) -> Vec<Option<DateTime<Utc>>> {
        self.timestamps.iter().map(|&ts| epoch_to_datetime(ts)).collect()
    }

    pub fn column(&self, name: &str) -> Option<&[Option<f64>]> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.values.as_slice())
    }

    /// Column values, failing when the column does not exist
    pub fn require(&self, name: &str) -> Result<&[Option<f64>], FrameError> {
        self.column(name)
            .ok_or_else(|| FrameError::MissingColumn(name.to_string()))
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    /// Add a column, replacing one of the same name
    pub fn with_column(
        mut self,
        name: impl Into<String>,
        values: Vec<Option<f64>>,
    ) -> Result<Self, FrameError> {
        let name = name.into();
        if values.len() != self.len() {
            return Err(FrameError::LengthMismatch {
                name,
                expected: self.len(),
                actual: values.len(),
            });
        }

        match self.columns.iter_mut().find(|c| c.name == name) {
            Some(existing) => existing.values = values,
            None => self.columns.push(Column { name, values }),
        }
        Ok(self)
    }

    /// Keep only the last `n` rows
    pub fn tail(mut self, n: usize) -> Self {
        let skip = self.len().saturating_sub(n);
        self.timestamps.drain(..skip);
        for column in &mut self.columns {
            column.values.drain(..skip);
        }
        self
    }

    /// Add `percentChange`: close over previous close minus one, rounded to
    /// 8 decimals, times 100
    pub fn add_percent_change(self) -> Result<Self, FrameError> {
        let close = self.require("close")?;

        let values = (0..close.len())
            .map(|i| {
                let prev = i.checked_sub(1).and_then(|j| close[j])?;
                let cur = close[i]?;
                if prev == 0.0 {
                    return None;
                }
                Some(round8(cur / prev - 1.0) * 100.0)
            })
            .collect();

        self.with_column(PERCENT_CHANGE, values)
    }

    /// Write the frame as CSV with `timestamp` and `date` leading columns
    pub fn write_csv<W: Write>(&self, writer: W) -> csv::Result<()> {
        let mut wtr = csv::Writer::from_writer(writer);

        let mut header = vec!["timestamp".to_string(), "date".to_string()];
        header.extend(self.columns.iter().map(|c| c.name.clone()));
        wtr.write_record(&header)?;

        for (row, ts) in self.timestamps.iter().enumerate() {
            let date = epoch_to_datetime(*ts)
                .map(|dt| dt.format(UTC_FORMAT).to_string())
                .unwrap_or_default();

            let mut record = vec![ts.to_string(), date];
            record.extend(
                self.columns
                    .iter()
                    .map(|c| c.values[row].map(|v| v.to_string()).unwrap_or_default()),
            );
            wtr.write_record(&record)?;
        }

        wtr.flush()?;
        Ok(())
    }
}

fn round8(x: f64) -> f64 {
    (x * 1e8).round() / 1e8
}
