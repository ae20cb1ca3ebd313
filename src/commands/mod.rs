pub mod chart;
pub mod history;
pub mod sync;

use anyhow::{Context, Result};
use market_sync::poloniex::PoloniexClient;
use market_sync::{parse_date, Config, Market, Pair, SqliteSeriesStore};
use std::sync::Arc;
use tracing::info;

/// Load the config and open the exchange client and series store it names
pub fn open(config_path: &str) -> Result<(Config, Arc<PoloniexClient>, Arc<SqliteSeriesStore>)> {
    let config = Config::load_or_default(config_path)?;
    info!("Loaded configuration from: {}", config_path);

    let client = PoloniexClient::new(&config.exchange).context("Failed to create exchange client")?;
    let store = SqliteSeriesStore::open(&config.store.path)
        .with_context(|| format!("Failed to open series store: {}", config.store.path))?;

    Ok((config, Arc::new(client), Arc::new(store)))
}

/// Market facade for one pair
pub fn market(config_path: &str, pair: &str) -> Result<Market> {
    let pair: Pair = pair.parse()?;
    let (config, client, store) = open(config_path)?;
    Ok(Market::new(pair, client, store, &config))
}

pub fn parse_when(arg: Option<&str>) -> Result<Option<i64>> {
    arg.map(|s| parse_date(s).with_context(|| format!("Invalid date: {}", s)))
        .transpose()
}
