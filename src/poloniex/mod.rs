//! Poloniex exchange adapter
//! Public chart data plus signed trade and lending history.

pub mod auth;
mod client;

pub use client::{parse_records, PoloniexClient};
