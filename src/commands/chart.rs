//! Chart command - print or export candles with resampling and indicators

use anyhow::{Context, Result};
use market_sync::indicators::IndicatorRequest;
use market_sync::resample::Period;
use market_sync::ChartRequest;
use std::fs::File;
use std::path::PathBuf;
use tracing::info;

pub fn run(
    config_path: String,
    pair: String,
    start: Option<String>,
    bucket: Option<String>,
    indicators: Vec<String>,
    output: Option<PathBuf>,
    tail: Option<usize>,
) -> Result<()> {
    let market = super::market(&config_path, &pair)?;

    let request = ChartRequest {
        start: super::parse_when(start.as_deref())?,
        bucket: bucket.map(|b| b.parse::<Period>()).transpose()?,
        indicators: indicators
            .iter()
            .map(|s| s.parse::<IndicatorRequest>())
            .collect::<Result<_, _>>()?,
    };

    let mut frame = market.get_chart(&request)?;
    if let Some(n) = tail {
        frame = frame.tail(n);
    }

    match output {
        Some(path) => {
            let file = File::create(&path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            frame.write_csv(file)?;
            info!("Wrote {} rows to {}", frame.len(), path.display());
        }
        None => frame.write_csv(std::io::stdout().lock())?,
    }

    Ok(())
}
