//! Poloniex API client implementing [`RemoteSource`]
//!
//! Chart data comes from the public API and needs no key. Trade and lending
//! history are private commands and need credentials.

use chrono::Utc;
use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use serde_json::Value;
use std::sync::Mutex;
use std::thread::sleep;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::auth::{Credentials, Nonce};
use crate::config::ExchangeConfig;
use crate::error::SourceError;
use crate::normalize::{self, RawRecord};
use crate::source::RemoteSource;
use crate::types::Pair;

/// Maximum rows the history commands return per call
const HISTORY_LIMIT: usize = 10_000;

/// Poloniex API client
#[derive(Debug)]
pub struct PoloniexClient {
    http: Client,
    public_url: String,
    trading_url: String,
    credentials: Option<Credentials>,
    request_delay: Duration,
    last_request: Mutex<Option<Instant>>,
    nonce: Nonce,
}

impl PoloniexClient {
    /// Create a client from the exchange section of the config
    pub fn new(config: &ExchangeConfig) -> Result<Self, SourceError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        let credentials = match (&config.api_key, &config.api_secret) {
            (Some(key), Some(secret)) => Some(Credentials::new(key, secret)),
            _ => None,
        };

        Ok(PoloniexClient {
            http,
            public_url: config.public_url.clone(),
            trading_url: config.trading_url.clone(),
            credentials,
            request_delay: Duration::from_millis(config.request_delay_ms),
            last_request: Mutex::new(None),
            nonce: Nonce::default(),
        })
    }

    pub fn has_credentials(&self) -> bool {
        self.credentials.is_some()
    }

    /// Wait until the configured delay since the previous request has passed
    fn pace(&self) {
        if let Ok(mut last) = self.last_request.lock() {
            if let Some(prev) = *last {
                let elapsed = prev.elapsed();
                if elapsed < self.request_delay {
                    sleep(self.request_delay - elapsed);
                }
            }
            *last = Some(Instant::now());
        }
    }

    fn public(&self, command: &str, params: &[(&str, String)]) -> Result<Value, SourceError> {
        let mut query = vec![("command", command.to_string())];
        query.extend(params.iter().map(|(k, v)| (*k, v.clone())));

        debug!("Public request: {} {:?}", command, params);
        self.pace();

        let response = self.http.get(&self.public_url).query(&query).send()?;
        decode_response(command, response)
    }

    fn private(&self, command: &'static str, params: &[(&str, String)]) -> Result<Value, SourceError> {
        let credentials = self
            .credentials
            .as_ref()
            .ok_or(SourceError::MissingCredentials(command))?;

        let nonce = self.nonce.next(Utc::now().timestamp_millis() as u64);
        let body = encode_form(command, params, nonce);
        let signature = credentials.sign(&body);

        debug!("Private request: {} {:?}", command, params);
        self.pace();

        let response = self
            .http
            .post(&self.trading_url)
            .header("Key", credentials.api_key())
            .header("Sign", signature)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(body)
            .send()?;
        decode_response(command, response)
    }
}

/// Form body of a private command; parameters are plain ASCII tokens
fn encode_form(command: &str, params: &[(&str, String)], nonce: u64) -> String {
    let mut parts = vec![format!("command={}", command)];
    parts.extend(params.iter().map(|(k, v)| format!("{}={}", k, v)));
    parts.push(format!("nonce={}", nonce));
    parts.join("&")
}

fn decode_response(
    command: &str,
    response: reqwest::blocking::Response,
) -> Result<Value, SourceError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().unwrap_or_default();
        return Err(SourceError::Status {
            status: status.as_u16(),
            body,
        });
    }

    let value: Value = response.json()?;
    if let Some(message) = value.get("error").and_then(Value::as_str) {
        return Err(SourceError::Exchange(format!("{}: {}", command, message)));
    }
    Ok(value)
}

/// Split a decoded response into records; anything but an array of objects
/// is a malformed payload
pub fn parse_records(command: &str, value: Value) -> Result<Vec<RawRecord>, SourceError> {
    if let Some(message) = value.get("error").and_then(Value::as_str) {
        return Err(SourceError::Exchange(format!("{}: {}", command, message)));
    }

    let Value::Array(items) = value else {
        return Err(SourceError::Decode {
            command: command.to_string(),
            detail: format!("expected an array, got {}", value),
        });
    };

    items
        .into_iter()
        .map(|item| match item {
            Value::Object(map) => Ok(map),
            other => Err(SourceError::Decode {
                command: command.to_string(),
                detail: format!("expected an object, got {}", other),
            }),
        })
        .collect()
}

/// Earliest `time_field` among the records that carry a readable date
fn oldest_time(records: &[RawRecord], time_field: &'static str) -> Option<i64> {
    records
        .iter()
        .filter_map(|r| normalize::date_field(r, time_field).ok())
        .min()
}

/// Collect a newest-first history from `end` back to `start`
///
/// The exchange caps each answer at `limit` rows. A full page means older
/// rows may remain, so the next call ends at the oldest row seen. Rows on
/// that boundary come back twice and are merged by key downstream.
fn page_backwards<F>(
    command: &str,
    start: i64,
    end: i64,
    limit: usize,
    time_field: &'static str,
    mut fetch: F,
) -> Result<Vec<RawRecord>, SourceError>
where
    F: FnMut(i64) -> Result<Vec<RawRecord>, SourceError>,
{
    let mut records = Vec::new();
    let mut end = end;

    loop {
        let page = fetch(end)?;
        let full = page.len() >= limit;
        let oldest = oldest_time(&page, time_field);
        records.extend(page);

        if !full {
            break;
        }
        match oldest {
            Some(t) if t <= start => break,
            Some(t) if t < end => {
                debug!("{}: full page, continuing before {}", command, t);
                end = t;
            }
            _ => {
                warn!(
                    "{}: full page of {} rows did not move back from {}, stopping",
                    command, limit, end
                );
                break;
            }
        }
    }

    Ok(records)
}

impl RemoteSource for PoloniexClient {
    fn fetch_candles(
        &self,
        pair: &Pair,
        period: i64,
        start: i64,
    ) -> Result<Vec<RawRecord>, SourceError> {
        let command = "returnChartData";
        let value = self.public(
            command,
            &[
                ("currencyPair", pair.to_string()),
                ("period", period.to_string()),
                ("start", start.to_string()),
                ("end", Utc::now().timestamp().to_string()),
            ],
        )?;
        parse_records(command, value)
    }

    fn fetch_trades(&self, pair: &Pair, start: i64) -> Result<Vec<RawRecord>, SourceError> {
        let command = "returnTradeHistory";
        let now = Utc::now().timestamp();
        page_backwards(command, start, now, HISTORY_LIMIT, "date", |end| {
            let value = self.private(
                command,
                &[
                    ("currencyPair", pair.to_string()),
                    ("start", start.to_string()),
                    ("end", end.to_string()),
                    ("limit", HISTORY_LIMIT.to_string()),
                ],
            )?;
            parse_records(command, value)
        })
    }

    fn fetch_lending(&self, start: i64) -> Result<Vec<RawRecord>, SourceError> {
        let command = "returnLendingHistory";
        let now = Utc::now().timestamp();
        page_backwards(command, start, now, HISTORY_LIMIT, "open", |end| {
            let value = self.private(
                command,
                &[
                    ("start", start.to_string()),
                    ("end", end.to_string()),
                    ("limit", HISTORY_LIMIT.to_string()),
                ],
            )?;
            parse_records(command, value)
        })
    }
}
