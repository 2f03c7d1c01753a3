// src/fetch/github.rs
use anyhow::{Context, Result};
use reqwest::{header, Client, Response};
use serde::Deserialize;
use std::collections::VecDeque;
use tokio::time::sleep;
use tracing::{debug, warn};
use url::Url;

use crate::fetch::{Source, MIN_REQUEST_SPACING};

const API_BASE: &str = "https://api.github.com";
const PER_PAGE: &str = "100";

#[derive(Debug, Deserialize)]
struct ContentItem {
    name: String,
    path: String,
    #[serde(rename = "type")]
    kind: String,
    download_url: Option<String>,
}

/// One listed report file, ready to download.
#[derive(Debug, Clone)]
pub struct CsvEntry {
    /// Repository-relative path; stable across runs, used as the source
    /// identifier everywhere downstream.
    pub path: String,
    pub download_url: String,
}

/// Enumerates `.csv` files in a hosted repository via the contents API,
/// walking directories recursively with Link-header pagination.
pub struct GithubEnumerator {
    client: Client,
    repo: String,
    root: String,
    token: Option<String>,
}

impl GithubEnumerator {
    pub fn new(
        client: Client,
        repo: impl Into<String>,
        root: impl Into<String>,
        token: Option<String>,
    ) -> Self {
        Self {
            client,
            repo: repo.into(),
            root: root.into(),
            token,
        }
    }

    pub async fn list(&self) -> Result<Vec<CsvEntry>> {
        let mut entries = Vec::new();
        let mut dirs = VecDeque::from([self.root.clone()]);
        while let Some(dir) = dirs.pop_front() {
            debug!(dir = %dir, "listing");
            let mut url = self.listing_url(&dir)?;
            loop {
                let resp = self.get(url.as_str()).await?;
                let next = next_page(resp.headers());
                let items: Vec<ContentItem> = resp
                    .json()
                    .await
                    .with_context(|| format!("decoding listing for {dir:?}"))?;
                for item in items {
                    if item.kind == "dir" {
                        dirs.push_back(item.path);
                    } else if item.kind == "file" && item.name.to_lowercase().ends_with(".csv") {
                        match item.download_url {
                            Some(download_url) => entries.push(CsvEntry {
                                path: item.path,
                                download_url,
                            }),
                            None => warn!(path = %item.path, "listing entry has no download url"),
                        }
                    }
                }
                sleep(MIN_REQUEST_SPACING).await;
                match next {
                    Some(n) => url = Url::parse(&n).context("bad pagination link")?,
                    None => break,
                }
            }
        }
        Ok(entries)
    }

    fn listing_url(&self, dir: &str) -> Result<Url> {
        let mut url = Url::parse(API_BASE)?;
        url.set_path(&format!("repos/{}/contents/{}", self.repo, dir));
        url.query_pairs_mut().append_pair("per_page", PER_PAGE);
        Ok(url)
    }

    async fn get(&self, url: &str) -> Result<Response> {
        let mut req = self
            .client
            .get(url)
            .header(header::ACCEPT, "application/vnd.github+json");
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        let resp = req
            .send()
            .await
            .with_context(|| format!("requesting {url}"))?;
        resp.error_for_status()
            .with_context(|| format!("listing {url}"))
    }
}

/// Download one report's raw text. Lossy decoding: a malformed byte turns
/// into the replacement character instead of failing the source.
pub async fn fetch_report(client: &Client, identifier: &str, download_url: &str) -> Result<Source> {
    let resp = client
        .get(download_url)
        .send()
        .await
        .with_context(|| format!("fetching {identifier}"))?
        .error_for_status()
        .with_context(|| format!("fetching {identifier}"))?;
    let bytes = resp.bytes().await.context("reading response body")?;
    Ok(Source {
        identifier: identifier.to_string(),
        text: String::from_utf8_lossy(&bytes).into_owned(),
    })
}

/// Extract the rel="next" target from an RFC 8288 Link header.
fn next_page(headers: &header::HeaderMap) -> Option<String> {
    let value = headers.get(header::LINK)?.to_str().ok()?;
    for part in value.split(',') {
        let mut pieces = part.trim().split(';');
        let target = pieces.next()?.trim();
        if pieces.any(|p| p.trim() == "rel=\"next\"") {
            return Some(
                target
                    .trim_start_matches('<')
                    .trim_end_matches('>')
                    .to_string(),
            );
        }
    }
    None
}
