//! HTTP client with per-domain adaptive rate limiting.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use tracing::debug;

use super::rate_limiter::RateLimiter;
use super::{PageFetcher, ScrapeError};

const USER_AGENT: &str = "flyerfeed/0.1 (+flyer price tracking)";

/// Real browser user agents for impersonate mode.
const IMPERSONATE_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:133.0) Gecko/20100101 Firefox/133.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/18.1 Safari/605.1.15",
];

fn random_user_agent() -> &'static str {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_nanos() as usize)
        .unwrap_or(0);
    IMPERSONATE_USER_AGENTS[nanos % IMPERSONATE_USER_AGENTS.len()]
}

/// Resolve user agent from config value.
/// - None => default flyerfeed user agent
/// - "impersonate" => random real browser user agent
/// - other => custom user agent string
pub fn resolve_user_agent(config: Option<&str>) -> String {
    match config {
        None => USER_AGENT.to_string(),
        Some("impersonate") => random_user_agent().to_string(),
        Some(custom) => custom.to_string(),
    }
}

/// Shared HTTP client for listing pages and page images.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    request_delay: Duration,
    rate_limiter: RateLimiter,
}

impl HttpClient {
    /// Create a new HTTP client with its own rate limiter.
    pub fn new(
        timeout: Duration,
        request_delay: Duration,
        user_agent_config: Option<&str>,
    ) -> Result<Self, ScrapeError> {
        Self::with_rate_limiter(timeout, request_delay, RateLimiter::new(), user_agent_config)
    }

    /// Create a new HTTP client sharing an existing rate limiter.
    pub fn with_rate_limiter(
        timeout: Duration,
        request_delay: Duration,
        rate_limiter: RateLimiter,
        user_agent_config: Option<&str>,
    ) -> Result<Self, ScrapeError> {
        let user_agent = resolve_user_agent(user_agent_config);
        let client = Client::builder()
            .user_agent(&user_agent)
            .timeout(timeout)
            .gzip(true)
            .brotli(true)
            .build()?;

        Ok(Self {
            client,
            request_delay,
            rate_limiter,
        })
    }

    /// Make a GET request. Uses adaptive rate limiting per domain.
    pub async fn get(&self, url: &str) -> Result<HttpResponse, reqwest::Error> {
        let domain = self.rate_limiter.acquire(url).await;

        let response = self.client.get(url).send().await?;
        let status = response.status();
        debug!(url, status = status.as_u16(), "GET");

        if let Some(ref domain) = domain {
            self.rate_limiter.report_status(domain, status.as_u16()).await;
        }

        // Base delay on top of whatever the limiter imposed
        if !self.request_delay.is_zero() {
            tokio::time::sleep(self.request_delay).await;
        }

        Ok(HttpResponse { status, response })
    }

    async fn get_success(&self, url: &str) -> Result<HttpResponse, ScrapeError> {
        let response = self.get(url).await?;
        if !response.is_success() {
            return Err(ScrapeError::Status {
                url: url.to_string(),
                status: response.status.as_u16(),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl PageFetcher for HttpClient {
    async fn fetch_text(&self, url: &str) -> Result<String, ScrapeError> {
        Ok(self.get_success(url).await?.text().await?)
    }

    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, ScrapeError> {
        Ok(self.get_success(url).await?.bytes().await?)
    }
}

/// HTTP response wrapper.
pub struct HttpResponse {
    pub status: StatusCode,
    response: Response,
}

impl HttpResponse {
    /// Check if the response is successful.
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Get response body as bytes.
    pub async fn bytes(self) -> Result<Vec<u8>, reqwest::Error> {
        self.response.bytes().await.map(|b| b.to_vec())
    }

    /// Get response body as text.
    pub async fn text(self) -> Result<String, reqwest::Error> {
        self.response.text().await
    }
}
