//! Sync command - bring cached series up to date for several pairs

use anyhow::{bail, Result};
use indicatif::{ProgressBar, ProgressStyle};
use market_sync::{Market, Pair, SeriesKind};
use tracing::{error, info};

pub fn run(config_path: String, pairs: Option<String>, trades: bool, lending: bool) -> Result<()> {
    let (config, client, store) = super::open(&config_path)?;

    let pairs: Vec<Pair> = match pairs {
        Some(list) => list
            .split(',')
            .map(|s| s.trim().parse())
            .collect::<Result<_, _>>()?,
        None => config.defaults.pairs.clone(),
    };
    if pairs.is_empty() {
        bail!("No pairs to sync: pass --pairs or list them under defaults.pairs");
    }

    let mut kinds = vec![SeriesKind::Candles];
    if trades {
        kinds.push(SeriesKind::Trades);
    }
    if lending {
        kinds.push(SeriesKind::Lending);
    }

    let pb = ProgressBar::new((pairs.len() * kinds.len()) as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("#>-"),
    );

    let mut failures = 0;
    let mut changed = 0;

    for pair in &pairs {
        let market = Market::new(pair.clone(), client.clone(), store.clone(), &config);

        for &kind in &kinds {
            let target = market.target(kind);
            pb.set_message(target.to_string());

            match market.sync(kind) {
                Ok(report) => {
                    changed += report.changed();
                    pb.println(format!(
                        "  ✓ {:<28} {:>6} fetched {:>6} new {:>6} updated {:>4} skipped",
                        target.to_string(),
                        report.fetched,
                        report.inserted,
                        report.updated,
                        report.skipped
                    ));
                }
                Err(e) => {
                    failures += 1;
                    error!("Sync of {} failed: {}", target, e);
                    pb.println(format!("  ✗ {:<28} {}", target.to_string(), e));
                }
            }
            pb.inc(1);
        }
    }

    pb.finish_with_message("done");
    info!("Sync finished: {} records changed, {} failures", changed, failures);

    if failures > 0 {
        bail!("{} of {} syncs failed", failures, pairs.len() * kinds.len());
    }
    Ok(())
}
