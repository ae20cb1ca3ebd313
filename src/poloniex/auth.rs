//! Authentication utilities for the Poloniex trading API
//!
//! Private commands are POSTed as a form body. The body is signed with
//! HMAC-SHA512 using the API secret and sent hex encoded in the `Sign`
//! header, next to the API key in the `Key` header.

use hmac::{Hmac, Mac};
use sha2::Sha512;
use std::sync::atomic::{AtomicU64, Ordering};

type HmacSha512 = Hmac<Sha512>;

/// Generate the HMAC-SHA512 signature of a form-encoded body
pub fn sign_request(body: &str, secret: &str) -> String {
    let mut mac =
        HmacSha512::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(body.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// API credentials container
#[derive(Clone)]
pub struct Credentials {
    api_key: String,
    api_secret: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .finish()
    }
}

impl Credentials {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
        }
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Sign a request body
    pub fn sign(&self, body: &str) -> String {
        sign_request(body, &self.api_secret)
    }
}

/// Strictly increasing nonce source
///
/// The exchange rejects any nonce not greater than the last one it saw for
/// the key, so values are wall-clock milliseconds bumped past the previous one.
#[derive(Debug, Default)]
pub struct Nonce {
    last: AtomicU64,
}

impl Nonce {
    pub fn next(&self, now_millis: u64) -> u64 {
        let mut prev = self.last.load(Ordering::SeqCst);
        loop {
            let candidate = now_millis.max(prev + 1);
            match self
                .last
                .compare_exchange(prev, candidate, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return candidate,
                Err(actual) => prev = actual,
            }
        }
    }
}
