//! Market sync - main entry point
//!
//! This binary provides four subcommands:
//! - sync: Bring cached candles (and optionally trades/lending) up to date
//! - chart: Print or export a candle chart with resampling and indicators
//! - trades: Show our trade history for a pair
//! - lending: Show our lending history for a currency

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, Subscriber};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

mod commands;

const DEFAULT_CONFIG: &str = "configs/market.json";

#[derive(Parser, Debug)]
#[command(name = "market-sync")]
#[command(about = "Incrementally synced candle, trade and lending history", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Sync cached series with the exchange
    Sync {
        /// Path to configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG)]
        config: String,

        /// Pairs to sync (comma-separated). E.g., "BTC_LTC,USDT_BTC".
        /// Defaults to the pairs listed in the config
        #[arg(short, long)]
        pairs: Option<String>,

        /// Also sync our trade history (needs API credentials)
        #[arg(long)]
        trades: bool,

        /// Also sync our lending history of each pair's child currency
        #[arg(long)]
        lending: bool,
    },

    /// Show a candle chart
    Chart {
        #[arg(short, long, default_value = DEFAULT_CONFIG)]
        config: String,

        /// Trading pair. E.g., "BTC_LTC"
        pair: String,

        /// Start date (YYYY-MM-DD, "YYYY-MM-DD HH:MM:SS" or epoch seconds)
        #[arg(long)]
        start: Option<String>,

        /// Resample bucket. E.g., "25m", "1h", "1d"
        #[arg(short, long)]
        bucket: Option<String>,

        /// Indicator to apply, repeatable. E.g., "sma:period=20"
        #[arg(short, long = "indicator")]
        indicators: Vec<String>,

        /// Write the chart as CSV to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Only show the last N rows
        #[arg(long)]
        tail: Option<usize>,
    },

    /// Show trade history
    Trades {
        #[arg(short, long, default_value = DEFAULT_CONFIG)]
        config: String,

        /// Trading pair. E.g., "BTC_LTC"
        pair: String,

        /// Start date
        #[arg(long)]
        start: Option<String>,

        /// End date (inclusive)
        #[arg(long)]
        end: Option<String>,

        /// Only trades of this side (buy or sell)
        #[arg(long)]
        side: Option<String>,
    },

    /// Show lending history
    Lending {
        #[arg(short, long, default_value = DEFAULT_CONFIG)]
        config: String,

        /// Trading pair whose child currency is the default
        pair: String,

        /// Currency to show instead of the pair's child currency
        #[arg(long)]
        currency: Option<String>,

        /// Start date
        #[arg(long)]
        start: Option<String>,
    },
}

fn setup_logging(verbose: bool, command_name: &str, file_only: bool) -> Result<()> {
    std::fs::create_dir_all("logs")?;

    // Log file naming pattern: {command}_{date}.log
    let log_filename = format!(
        "{}_{}.log",
        command_name,
        chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
    );
    let log_path = PathBuf::from("logs").join(&log_filename);

    // Filter out noisy external crates
    let level = if verbose { "debug" } else { "info" };
    let filter_str = format!(
        "{},hyper=warn,hyper_util=warn,reqwest=warn,rustls=warn,h2=warn",
        level
    );
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&filter_str));

    let file_appender = tracing_appender::rolling::never("logs", &log_filename);

    if file_only {
        // Keep the console clean for the progress bar
        tracing_subscriber::registry()
            .with(env_filter)
            .with(file_layer(file_appender))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer())
            .with(file_layer(file_appender))
            .init();

        info!("Log file: {}", log_path.display());
    }

    Ok(())
}

/// Plain-text layer with source locations, built per subscriber stack
fn file_layer<S, W>(writer: W) -> impl Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_target(true)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(false)
}

fn console_layer<S>() -> impl Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(true)
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let (command_name, file_only) = match &cli.command {
        Commands::Sync { .. } => ("sync", true),
        Commands::Chart { .. } => ("chart", false),
        Commands::Trades { .. } => ("trades", false),
        Commands::Lending { .. } => ("lending", false),
    };

    setup_logging(cli.verbose, command_name, file_only)?;

    match cli.command {
        Commands::Sync {
            config,
            pairs,
            trades,
            lending,
        } => commands::sync::run(config, pairs, trades, lending),

        Commands::Chart {
            config,
            pair,
            start,
            bucket,
            indicators,
            output,
            tail,
        } => commands::chart::run(config, pair, start, bucket, indicators, output, tail),

        Commands::Trades {
            config,
            pair,
            start,
            end,
            side,
        } => commands::history::trades(config, pair, start, end, side),

        Commands::Lending {
            config,
            pair,
            currency,
            start,
        } => commands::history::lending(config, pair, currency, start),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_only_stack_accepts_events() {
        let subscriber = tracing_subscriber::registry()
            .with(EnvFilter::new("info"))
            .with(file_layer(std::io::sink));
        tracing::subscriber::with_default(subscriber, || info!("file only"));
    }

    #[test]
    fn test_console_and_file_stack_accepts_events() {
        let subscriber = tracing_subscriber::registry()
            .with(EnvFilter::new("info"))
            .with(console_layer())
            .with(file_layer(std::io::sink));
        tracing::subscriber::with_default(subscriber, || info!("console and file"));
    }

    #[test]
    fn test_cli_parses_chart_arguments() {
        let cli = Cli::try_parse_from([
            "market-sync",
            "chart",
            "BTC_LTC",
            "--bucket",
            "25m",
            "-i",
            "sma:period=20",
        ])
        .unwrap();
        match cli.command {
            Commands::Chart {
                pair,
                bucket,
                indicators,
                ..
            } => {
                assert_eq!(pair, "BTC_LTC");
                assert_eq!(bucket.as_deref(), Some("25m"));
                assert_eq!(indicators, vec!["sma:period=20".to_string()]);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
