//! Retailer flyer acquisition: catalog, crawler, and page downloader.

pub mod crawler;
pub mod downloader;
pub mod http_client;
pub mod rate_limiter;
pub mod retailers;

use async_trait::async_trait;
use thiserror::Error;

pub use crawler::{Crawler, FlyerInfo, BASE_URL};
pub use downloader::download;
pub use http_client::HttpClient;
pub use rate_limiter::{RateLimitConfig, RateLimiter};
pub use retailers::{find_retailer, Retailer, RETAILERS};

/// Errors from fetching retailer pages and images.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("unknown retailer: {0}")]
    UnknownRetailer(String),

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Source of remote page and image content.
///
/// [`HttpClient`] is the network implementation; the crawler and downloader
/// only see this trait.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// GET a URL and return its body as text. Non-2xx is an error.
    async fn fetch_text(&self, url: &str) -> Result<String, ScrapeError>;

    /// GET a URL and return its raw body. Non-2xx is an error.
    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, ScrapeError>;
}
