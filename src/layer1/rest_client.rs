// REST Client for Binance Spot public market data
// Rate-limited depth snapshots with retry and exponential backoff

use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::core::config::FeedConfig;
use crate::layer2::parser::{parse_depth_snapshot, ParseError, ParsedDepthSnapshot};

/// Snapshot requests per minute; resync storms must not trip exchange limits.
const SNAPSHOT_REQUESTS_PER_MINUTE: u32 = 60;
const MAX_RETRIES: u32 = 3;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum RestClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API error {code}: {message}")]
    Api { code: i64, message: String },
    #[error("Snapshot parse error: {0}")]
    Parse(#[from] ParseError),
    #[error("Max retries exceeded")]
    MaxRetries,
}

// ============================================================================
// Rate Limiter
// ============================================================================

/// Token bucket rate limiter for API requests
/// Used behind Arc<Mutex<RateLimiter>>, so no internal lock needed.
pub struct RateLimiter {
    tokens: f64,
    max_tokens: f64,
    rate_per_sec: f64,
    last_update: Instant,
}

impl RateLimiter {
    pub fn new(requests_per_minute: u32) -> Self {
        let rpm = f64::from(requests_per_minute.max(1));
        Self {
            tokens: rpm,
            max_tokens: rpm,
            rate_per_sec: rpm / 60.0,
            last_update: Instant::now(),
        }
    }

    /// Wait until a token is available (caller must hold the Mutex)
    pub async fn acquire(&mut self) {
        loop {
            self.add_tokens();

            if self.tokens >= 1.0 {
                self.tokens -= 1.0;
                return;
            }

            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    pub fn available(&mut self) -> f64 {
        self.add_tokens();
        self.tokens
    }

    fn add_tokens(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate_per_sec).min(self.max_tokens);
        self.last_update = now;
    }
}

// ============================================================================
// Client Statistics
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RestClientStats {
    pub requests_sent: u64,
    pub requests_succeeded: u64,
    pub requests_failed: u64,
    pub retries: u64,
    pub success_rate: f64,
}

impl fmt::Display for RestClientStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RestClientStats(sent={}, ok={}, fail={}, retries={}, rate={:.2}%)",
            self.requests_sent,
            self.requests_succeeded,
            self.requests_failed,
            self.retries,
            self.success_rate * 100.0
        )
    }
}

#[derive(Debug, Default)]
struct Counters {
    sent: u64,
    succeeded: u64,
    failed: u64,
    retries: u64,
}

// ============================================================================
// Binance REST Client
// ============================================================================

/// Public market-data client for the order-book snapshot.
pub struct BinanceRestClient {
    base_url: String,
    client: Client,
    limiter: Arc<Mutex<RateLimiter>>,
    counters: Arc<Mutex<Counters>>,
}

impl BinanceRestClient {
    pub fn new(base_url: &str, timeout_seconds: u64) -> Result<Self, RestClientError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            limiter: Arc::new(Mutex::new(RateLimiter::new(SNAPSHOT_REQUESTS_PER_MINUTE))),
            counters: Arc::new(Mutex::new(Counters::default())),
        })
    }

    pub fn from_config(config: &FeedConfig) -> Result<Self, RestClientError> {
        Self::new(&config.rest_base_url, config.request_timeout_seconds)
    }

    pub fn depth_url(&self) -> String {
        format!("{}/api/v3/depth", self.base_url)
    }

    /// GET with rate limiting and up to three retries (1 s, 2 s, 4 s).
    async fn get(&self, url: &str, params: &[(&str, String)]) -> Result<Value, RestClientError> {
        self.limiter.lock().await.acquire().await;

        for attempt in 0..=MAX_RETRIES {
            self.counters.lock().await.sent += 1;

            let failure = match self.client.get(url).query(params).send().await {
                Ok(response) => {
                    let status = response.status();
                    let data: Value = response.json().await?;

                    if status == StatusCode::OK {
                        self.counters.lock().await.succeeded += 1;
                        return Ok(data);
                    }

                    let code = data.get("code").and_then(|c| c.as_i64()).unwrap_or(-1);
                    let message = data
                        .get("msg")
                        .and_then(|m| m.as_str())
                        .unwrap_or("Unknown error")
                        .to_string();

                    // Client errors other than rate limiting will not improve on retry
                    if status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS {
                        self.counters.lock().await.failed += 1;
                        return Err(RestClientError::Api { code, message });
                    }
                    RestClientError::Api { code, message }
                }
                Err(e) => RestClientError::Http(e),
            };

            if attempt < MAX_RETRIES {
                let delay = 2u64.pow(attempt);
                warn!(
                    attempt = attempt + 1,
                    max_retries = MAX_RETRIES,
                    error = %failure,
                    delay_secs = delay,
                    "Request failed, retrying"
                );
                self.counters.lock().await.retries += 1;
                tokio::time::sleep(Duration::from_secs(delay)).await;
                continue;
            }

            self.counters.lock().await.failed += 1;
            return Err(failure);
        }

        self.counters.lock().await.failed += 1;
        Err(RestClientError::MaxRetries)
    }

    /// Fetch the order-book snapshot the diff stream is aligned against.
    pub async fn get_depth_snapshot(
        &self,
        symbol: &str,
        limit: u32,
    ) -> Result<ParsedDepthSnapshot, RestClientError> {
        let params = [("symbol", symbol.to_uppercase()), ("limit", limit.to_string())];
        let body = self.get(&self.depth_url(), &params).await?;
        let snapshot = parse_depth_snapshot(&body)?;

        debug!(
            symbol = symbol,
            last_update_id = snapshot.last_update_id,
            bids = snapshot.bids.len(),
            asks = snapshot.asks.len(),
            "Depth snapshot fetched"
        );
        Ok(snapshot)
    }

    pub async fn get_stats(&self) -> RestClientStats {
        let c = self.counters.lock().await;
        let success_rate = if c.sent > 0 {
            c.succeeded as f64 / c.sent as f64
        } else {
            0.0
        };

        RestClientStats {
            requests_sent: c.sent,
            requests_succeeded: c.succeeded,
            requests_failed: c.failed,
            retries: c.retries,
            success_rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limiter_starts_full() {
        let mut limiter = RateLimiter::new(60);
        assert!(limiter.available() >= 60.0 - f64::EPSILON);
    }

    #[tokio::test]
    async fn test_rate_limiter_consumes_tokens() {
        let mut limiter = RateLimiter::new(2);
        limiter.acquire().await;
        limiter.acquire().await;
        assert!(limiter.available() < 1.0);
    }

    #[test]
    fn test_client_from_config() {
        let config = FeedConfig {
            rest_base_url: "https://api.binance.com/".to_string(),
            ..FeedConfig::default()
        };
        let client = BinanceRestClient::from_config(&config).unwrap();
        assert_eq!(client.depth_url(), "https://api.binance.com/api/v3/depth");
    }

    #[tokio::test]
    async fn test_stats_initial() {
        let client = BinanceRestClient::from_config(&FeedConfig::default()).unwrap();
        let stats = client.get_stats().await;
        assert_eq!(stats, RestClientStats::default());
    }
}
