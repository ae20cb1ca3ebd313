//! Trade and lending history commands

use anyhow::{anyhow, Result};
use market_sync::{epoch_to_datetime, TradeQuery, TradeSide, UTC_FORMAT};

fn fmt_time(ts: i64) -> String {
    epoch_to_datetime(ts)
        .map(|dt| dt.format(UTC_FORMAT).to_string())
        .unwrap_or_else(|| ts.to_string())
}

pub fn trades(
    config_path: String,
    pair: String,
    start: Option<String>,
    end: Option<String>,
    side: Option<String>,
) -> Result<()> {
    let market = super::market(&config_path, &pair)?;

    let query = TradeQuery {
        start: super::parse_when(start.as_deref())?,
        end: super::parse_when(end.as_deref())?,
        side: side
            .map(|s| s.parse::<TradeSide>().map_err(|e| anyhow!(e)))
            .transpose()?,
    };

    let trades = market.get_trade_history(&query)?;

    println!("\n{}", "=".repeat(100));
    println!("TRADE HISTORY: {} ({} trades)", market.pair(), trades.len());
    println!("{}", "=".repeat(100));
    println!(
        "{:<20} {:>12} {:<5} {:>16} {:>16} {:>16} {:>10}",
        "Date", "Trade ID", "Side", "Rate", "Amount", "Total", "Fee"
    );
    for t in &trades {
        println!(
            "{:<20} {:>12} {:<5} {:>16.8} {:>16.8} {:>16.8} {:>10.4}",
            fmt_time(t.date),
            t.global_trade_id,
            t.side.to_string(),
            t.rate,
            t.amount,
            t.total,
            t.fee
        );
    }

    Ok(())
}

pub fn lending(
    config_path: String,
    pair: String,
    currency: Option<String>,
    start: Option<String>,
) -> Result<()> {
    let market = super::market(&config_path, &pair)?;
    let start = super::parse_when(start.as_deref())?;
    let currency = currency.unwrap_or_else(|| market.pair().child().to_string());

    let loans = market.get_lending_history(Some(&currency), start)?;
    let earned: f64 = loans.iter().map(|l| l.earned).sum();

    println!("\n{}", "=".repeat(100));
    println!("LENDING HISTORY: {} ({} loans)", currency.to_uppercase(), loans.len());
    println!("{}", "=".repeat(100));
    println!(
        "{:<20} {:<20} {:>12} {:>14} {:>10} {:>14}",
        "Open", "Close", "Rate", "Amount", "Days", "Earned"
    );
    for l in &loans {
        println!(
            "{:<20} {:<20} {:>12.8} {:>14.8} {:>10.4} {:>14.8}",
            fmt_time(l.open),
            fmt_time(l.close),
            l.rate,
            l.amount,
            l.duration,
            l.earned
        );
    }
    println!("{}", "-".repeat(100));
    println!("Total earned: {:.8} {}", earned, currency.to_uppercase());

    Ok(())
}
