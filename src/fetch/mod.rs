// src/fetch/mod.rs

pub mod github;
pub mod local;

use anyhow::Result;
use reqwest::Client;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Minimum spacing between requests to the rate-limited source listing.
pub const MIN_REQUEST_SPACING: Duration = Duration::from_millis(100);

/// One enumerated report: a stable identifier plus its raw text.
#[derive(Debug, Clone)]
pub struct Source {
    pub identifier: String,
    pub text: String,
}

/// Shared HTTP client: every request carries a timeout so no fetch blocks
/// the batch indefinitely.
pub fn http_client() -> Result<Client> {
    Ok(Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .user_agent(concat!("csdscraper/", env!("CARGO_PKG_VERSION")))
        .build()?)
}
