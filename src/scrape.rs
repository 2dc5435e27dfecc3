// HTTP scrape client for the upstream metrics and usage endpoints.

use crate::config::ScrapeConfig;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ScrapeError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("upstream returned status {0}")]
    Status(u16),
}

/// Fetches `<source>/metrics` (text exposition) and `<source>/usage`
/// (optional JSON). Every request carries the configured timeout; transient
/// failures are retried up to `retries` times before the cycle gives up.
pub struct ScrapeClient {
    http: reqwest::Client,
    source_url: String,
    retries: u32,
}

impl ScrapeClient {
    pub fn new(config: &ScrapeConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;
        Ok(Self {
            http,
            source_url: config.source_url.trim_end_matches('/').to_string(),
            retries: config.retries,
        })
    }

    /// Fetch the exposition payload. Retries on timeout/connection errors and
    /// 5xx; aborts immediately on other statuses.
    pub async fn fetch_metrics(&self) -> Result<String, ScrapeError> {
        let url = format!("{}/metrics", self.source_url);
        let mut attempt = 0;
        loop {
            match self.fetch_text(&url).await {
                Ok(body) => return Ok(body),
                Err(e) if attempt < self.retries && retryable(&e) => {
                    attempt += 1;
                    tracing::debug!(url = %url, attempt, error = %e, "metrics fetch retry");
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn fetch_text(&self, url: &str) -> Result<String, ScrapeError> {
        let response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ScrapeError::Status(status.as_u16()));
        }
        Ok(response.text().await?)
    }

    /// Fetch the optional usage payload. Callers treat any error here as
    /// non-fatal; no retry, one shot per cycle.
    pub async fn fetch_usage(&self) -> Result<serde_json::Value, ScrapeError> {
        let url = format!("{}/usage", self.source_url);
        let response = self.http.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ScrapeError::Status(status.as_u16()));
        }
        Ok(response.json().await?)
    }
}

fn retryable(e: &ScrapeError) -> bool {
    match e {
        ScrapeError::Status(code) => *code >= 500,
        ScrapeError::Request(e) => e.is_timeout() || e.is_connect(),
    }
}
