//! Source image downloads with bounded exponential backoff.
//!
//! [`Fetch`] performs a single attempt; [`fetch_with_retry`] wraps any
//! implementation with the retry policy. An attempt either returns the whole
//! body or counts as a failure. Partial bodies are never returned.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Transport(String),
    #[error("HTTP {0}")]
    Status(u16),
    #[error("failed after {retries} retries: {last}")]
    Exhausted {
        retries: u32,
        #[source]
        last: Box<FetchError>,
    },
}

/// One download attempt.
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

/// Retry policy: `max_retries` retries after the first attempt, waiting
/// `base_backoff * 2^attempt` between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_backoff: Duration,
}

impl RetryPolicy {
    /// Wait before the attempt following failed attempt number `attempt`
    /// (0-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_backoff.saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// Fetch `url`, retrying per `policy`. Makes at most `max_retries + 1`
/// attempts and sleeps only between attempts.
pub async fn fetch_with_retry(
    fetcher: &dyn Fetch,
    url: &str,
    policy: RetryPolicy,
) -> Result<Vec<u8>, FetchError> {
    let mut attempt = 0;
    loop {
        match fetcher.fetch(url).await {
            Ok(bytes) => return Ok(bytes),
            Err(e) if attempt < policy.max_retries => {
                let wait = policy.backoff(attempt);
                debug!(url, attempt, error = %e, ?wait, "fetch failed, retrying");
                tokio::time::sleep(wait).await;
                attempt += 1;
            }
            Err(e) => {
                return Err(FetchError::Exhausted {
                    retries: policy.max_retries,
                    last: Box::new(e),
                });
            }
        }
    }
}

/// [`Fetch`] over HTTP(S). Success is status 200 only.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(50)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetch for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        if response.status() != reqwest::StatusCode::OK {
            return Err(FetchError::Status(response.status().as_u16()));
        }
        let body = response
            .bytes()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        Ok(body.to_vec())
    }
}
