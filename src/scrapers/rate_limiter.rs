//! Adaptive per-domain rate limiter.
//!
//! Retailer listings and the image CDN are separate hosts, so delays are kept
//! per domain. Backs off on 429/503, gradually recovers on success.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use url::Url;

/// Configuration for rate limiting behavior.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Base delay between requests to the same domain.
    pub base_delay: Duration,
    /// Minimum delay (floor).
    pub min_delay: Duration,
    /// Maximum delay (ceiling for backoff).
    pub max_delay: Duration,
    /// Multiplier for exponential backoff on rate limit.
    pub backoff_multiplier: f64,
    /// Multiplier for recovery on success (< 1.0 to decrease delay).
    pub recovery_multiplier: f64,
    /// Number of consecutive successes before reducing delay.
    pub recovery_threshold: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(250),
            min_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            recovery_multiplier: 0.8,
            recovery_threshold: 5,
        }
    }
}

impl RateLimitConfig {
    /// Default config with a different base delay.
    pub fn with_base_delay(base_delay: Duration) -> Self {
        Self {
            base_delay,
            min_delay: base_delay.min(Self::default().min_delay),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone)]
struct DomainState {
    current_delay: Duration,
    last_request: Option<Instant>,
    consecutive_successes: u32,
    in_backoff: bool,
    rate_limit_hits: u64,
}

impl DomainState {
    fn new(base_delay: Duration) -> Self {
        Self {
            current_delay: base_delay,
            last_request: None,
            consecutive_successes: 0,
            in_backoff: false,
            rate_limit_hits: 0,
        }
    }

    fn time_until_ready(&self) -> Duration {
        match self.last_request {
            Some(last) => self.current_delay.saturating_sub(last.elapsed()),
            None => Duration::ZERO,
        }
    }

    fn back_off(&mut self, multiplier: f64, max_delay: Duration) {
        let new_delay = Duration::from_secs_f64(self.current_delay.as_secs_f64() * multiplier);
        self.current_delay = new_delay.min(max_delay);
    }
}

/// Adaptive rate limiter that tracks per-domain request timing.
///
/// Clones share state.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    config: RateLimitConfig,
    domains: Arc<RwLock<HashMap<String, DomainState>>>,
}

impl RateLimiter {
    /// Create a new rate limiter with default config.
    pub fn new() -> Self {
        Self::with_config(RateLimitConfig::default())
    }

    /// Create a new rate limiter with custom config.
    pub fn with_config(config: RateLimitConfig) -> Self {
        Self {
            config,
            domains: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Extract domain from URL.
    pub fn extract_domain(url: &str) -> Option<String> {
        Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(|s| s.to_string()))
    }

    /// Wait until the domain is ready, then mark request as started.
    pub async fn acquire(&self, url: &str) -> Option<String> {
        let domain = Self::extract_domain(url)?;

        let wait_time = {
            let domains = self.domains.read().await;
            domains
                .get(&domain)
                .map(|s| s.time_until_ready())
                .unwrap_or(Duration::ZERO)
        };

        if wait_time > Duration::ZERO {
            debug!("Rate limiting {}: waiting {:?}", domain, wait_time);
            tokio::time::sleep(wait_time).await;
        }

        let mut domains = self.domains.write().await;
        let state = domains
            .entry(domain.clone())
            .or_insert_with(|| DomainState::new(self.config.base_delay));
        state.last_request = Some(Instant::now());

        Some(domain)
    }

    /// Feed a response status back into the limiter.
    pub async fn report_status(&self, domain: &str, status_code: u16) {
        if matches!(status_code, 429 | 503) {
            self.report_rate_limit(domain, status_code).await;
        } else if status_code >= 500 {
            self.report_server_error(domain).await;
        } else if (200..400).contains(&status_code) {
            self.report_success(domain).await;
        }
    }

    /// Report a successful request - may decrease delay.
    pub async fn report_success(&self, domain: &str) {
        let mut domains = self.domains.write().await;
        if let Some(state) = domains.get_mut(domain) {
            state.consecutive_successes += 1;

            if state.in_backoff && state.consecutive_successes >= self.config.recovery_threshold {
                state.back_off(self.config.recovery_multiplier, self.config.max_delay);
                state.current_delay = state.current_delay.max(self.config.min_delay);

                if state.current_delay <= self.config.base_delay {
                    state.in_backoff = false;
                    state.current_delay = self.config.base_delay;
                    info!("Domain {} recovered from rate limit backoff", domain);
                } else {
                    debug!(
                        "Domain {} delay reduced to {:?}",
                        domain, state.current_delay
                    );
                }

                state.consecutive_successes = 0;
            }
        }
    }

    /// Report a definite rate limit hit (429 or 503) - increases delay.
    pub async fn report_rate_limit(&self, domain: &str, status_code: u16) {
        let mut domains = self.domains.write().await;
        if let Some(state) = domains.get_mut(domain) {
            state.rate_limit_hits += 1;
            state.consecutive_successes = 0;
            state.in_backoff = true;
            state.back_off(self.config.backoff_multiplier, self.config.max_delay);

            warn!(
                "Rate limited by {} (HTTP {}, hit {}), backing off to {:?}",
                domain, status_code, state.rate_limit_hits, state.current_delay
            );
        }
    }

    /// Report a server error (5xx other than 503) - mild backoff.
    pub async fn report_server_error(&self, domain: &str) {
        let mut domains = self.domains.write().await;
        if let Some(state) = domains.get_mut(domain) {
            state.consecutive_successes = 0;
            state.back_off(1.5, self.config.max_delay);
            debug!(
                "Server error for {}, delay increased to {:?}",
                domain, state.current_delay
            );
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn state(limiter: &RateLimiter, domain: &str) -> DomainState {
        limiter.domains.read().await.get(domain).cloned().unwrap()
    }

    #[test]
    fn test_extract_domain() {
        assert_eq!(
            RateLimiter::extract_domain("https://www.akcniceny.cz/letaky/lidl/"),
            Some("www.akcniceny.cz".to_string())
        );
        assert_eq!(RateLimiter::extract_domain("not a url"), None);
    }

    #[tokio::test]
    async fn test_backoff_on_rate_limit() {
        let limiter = RateLimiter::with_config(RateLimitConfig {
            base_delay: Duration::from_millis(100),
            backoff_multiplier: 2.0,
            ..Default::default()
        });

        limiter.acquire("https://example.com/1").await;
        limiter.report_status("example.com", 429).await;

        let state = state(&limiter, "example.com").await;
        assert!(state.current_delay >= Duration::from_millis(200));
        assert!(state.in_backoff);
        assert_eq!(state.rate_limit_hits, 1);
    }

    #[tokio::test]
    async fn test_recovers_after_successes() {
        let limiter = RateLimiter::with_config(RateLimitConfig {
            base_delay: Duration::from_millis(10),
            min_delay: Duration::from_millis(1),
            recovery_threshold: 1,
            recovery_multiplier: 0.1,
            ..Default::default()
        });

        limiter.acquire("https://cdn.example.com/a.jpg").await;
        limiter.report_status("cdn.example.com", 503).await;
        limiter.report_status("cdn.example.com", 200).await;

        let state = state(&limiter, "cdn.example.com").await;
        assert!(!state.in_backoff);
        assert_eq!(state.current_delay, Duration::from_millis(10));
    }
}
