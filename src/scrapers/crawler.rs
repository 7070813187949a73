//! Crawler for the flyer aggregator site.
//!
//! Listing pages carry one schema.org `SaleEvent` microdata block per flyer.
//! A flyer's detail page shows a handful of page images and links to the next
//! detail page; walking that chain yields every page image of the flyer.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info};
use url::Url;

use super::retailers::find_retailer;
use super::{PageFetcher, ScrapeError};

/// Aggregator site root.
pub const BASE_URL: &str = "https://www.akcniceny.cz";

static SALE_EVENT: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(r#"[itemtype$="schema.org/SaleEvent"]"#).expect("valid selector")
});
static NAME_PROP: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"[itemprop="name"][content]"#).expect("valid selector"));
static URL_PROP: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"[itemprop="url"][content]"#).expect("valid selector"));

static PAGE_IMAGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"src="(https://[^"]+staticac\.cz/foto/letaky/[^"]+\.jpg)""#).expect("valid regex")
});
static NEXT_MORE_PAGES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"href="(/letak/[^/"]+/strana-\d+/)"[^>]*>Zobrazit další stránky</a>"#)
        .expect("valid regex")
});
static NEXT_PAGINATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"href="(/letak/[^/"]+/strana-\d+/)"[^>]*aria-label="Následující""#)
        .expect("valid regex")
});

/// A flyer discovered on a retailer listing page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlyerInfo {
    /// Site-assigned id taken from the detail URL.
    pub id: String,
    /// Absolute detail page URL.
    pub url: String,
    /// Flyer title as listed.
    pub title: String,
}

/// Crawler over a [`PageFetcher`].
#[derive(Clone)]
pub struct Crawler {
    fetcher: Arc<dyn PageFetcher>,
    base_url: String,
}

impl Crawler {
    /// Create a crawler against the public aggregator site.
    pub fn new(fetcher: Arc<dyn PageFetcher>) -> Self {
        Self::with_base_url(fetcher, BASE_URL)
    }

    /// Create a crawler against another site root (mirrors, tests).
    pub fn with_base_url(fetcher: Arc<dyn PageFetcher>, base_url: &str) -> Self {
        Self {
            fetcher,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Fetch a retailer's listing page and return the flyers its predicate accepts.
    pub async fn fetch_flyer_list(&self, retailer_id: &str) -> Result<Vec<FlyerInfo>, ScrapeError> {
        let retailer = find_retailer(retailer_id)
            .ok_or_else(|| ScrapeError::UnknownRetailer(retailer_id.to_string()))?;

        let listing_url = retailer.listing_url(&self.base_url);
        debug!(retailer = retailer.id, url = %listing_url, "Fetching flyer listing");
        let html = self.fetcher.fetch_text(&listing_url).await?;

        let flyers: Vec<FlyerInfo> = parse_listing(&html, &self.base_url)
            .into_iter()
            .filter(|info| retailer.accepts(&info.title))
            .collect();

        info!(retailer = retailer.id, count = flyers.len(), "Found flyers");
        Ok(flyers)
    }

    /// Walk a flyer's detail pages and collect its page image URLs in order.
    ///
    /// Sleeps `delay` between page fetches. Any fetch failure aborts the walk.
    pub async fn fetch_flyer_images(
        &self,
        detail_url: &str,
        delay: Duration,
    ) -> Result<Vec<String>, ScrapeError> {
        let mut images: Vec<String> = Vec::new();
        let mut current = detail_url.to_string();

        loop {
            debug!(url = %current, "Fetching flyer page");
            let html = self.fetcher.fetch_text(&current).await?;

            for image in page_images(&html) {
                if !images.contains(&image) {
                    images.push(image);
                }
            }

            let next = match next_page_path(&html) {
                Some(path) => format!("{}{}", self.base_url, path),
                None => break,
            };
            if next == current {
                break;
            }
            current = next;

            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }

        debug!(url = detail_url, count = images.len(), "Collected flyer images");
        Ok(images)
    }
}

/// Extract `SaleEvent` blocks from a listing page. Blocks without a name and
/// URL are skipped.
pub fn parse_listing(html: &str, base_url: &str) -> Vec<FlyerInfo> {
    let document = Html::parse_document(html);

    document
        .select(&SALE_EVENT)
        .filter_map(|block| {
            let title = first_content(block, &NAME_PROP)?;
            let url = resolve_url(base_url, &first_content(block, &URL_PROP)?);
            Some(FlyerInfo {
                id: flyer_id_from_url(&url),
                url,
                title,
            })
        })
        .collect()
}

fn first_content(block: ElementRef<'_>, selector: &Selector) -> Option<String> {
    block
        .select(selector)
        .find_map(|el| el.value().attr("content"))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn resolve_url(base_url: &str, href: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        return href.to_string();
    }
    Url::parse(base_url)
        .and_then(|base| base.join(href))
        .map(|u| u.to_string())
        .unwrap_or_else(|_| format!("{}{}", base_url, href))
}

/// Flyer id: the text after the last `-` of the URL's final path segment.
pub fn flyer_id_from_url(url: &str) -> String {
    let segment = url
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default();
    segment
        .rsplit_once('-')
        .map(|(_, id)| id)
        .unwrap_or(segment)
        .to_string()
}

/// Page image URLs on one detail page, in document order.
pub fn page_images(html: &str) -> Vec<String> {
    PAGE_IMAGE
        .captures_iter(html)
        .map(|c| c[1].to_string())
        .collect()
}

/// Site-relative path of the next detail page, if any.
pub fn next_page_path(html: &str) -> Option<String> {
    NEXT_MORE_PAGES
        .captures(html)
        .or_else(|| NEXT_PAGINATION.captures(html))
        .map(|c| c[1].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;

    const LISTING: &str = r#"<html><body>
        <div itemscope itemtype="http://schema.org/SaleEvent">
            <meta itemprop="name" content="Lidl leták od pondělí">
            <meta itemprop="url" content="https://www.akcniceny.cz/letak/lidl-leták-42/">
        </div>
        <div itemscope itemtype="http://schema.org/SaleEvent">
            <meta itemprop="name" content="Lidl spotřební zboží">
            <meta itemprop="url" content="/letak/lidl-spotrebni-43/">
        </div>
        <div itemscope itemtype="http://schema.org/SaleEvent">
            <meta itemprop="description" content="broken block">
        </div>
    </body></html>"#;

    struct MapFetcher(HashMap<String, String>);

    #[async_trait]
    impl PageFetcher for MapFetcher {
        async fn fetch_text(&self, url: &str) -> Result<String, ScrapeError> {
            self.0.get(url).cloned().ok_or(ScrapeError::Status {
                url: url.to_string(),
                status: 404,
            })
        }

        async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, ScrapeError> {
            self.fetch_text(url).await.map(String::into_bytes)
        }
    }

    #[test]
    fn test_parse_listing() {
        let flyers = parse_listing(LISTING, BASE_URL);
        assert_eq!(flyers.len(), 2);
        assert_eq!(flyers[0].id, "42");
        assert_eq!(flyers[0].title, "Lidl leták od pondělí");
        assert_eq!(flyers[1].url, "https://www.akcniceny.cz/letak/lidl-spotrebni-43/");
        assert_eq!(flyers[1].id, "43");
    }

    #[test]
    fn test_parse_listing_without_blocks() {
        assert!(parse_listing("<html><body>nothing</body></html>", BASE_URL).is_empty());
    }

    #[test]
    fn test_flyer_id_from_url() {
        assert_eq!(flyer_id_from_url("https://x.cz/letak/leaflet-42/"), "42");
        assert_eq!(flyer_id_from_url("https://x.cz/letak/a-b-c-977"), "977");
        assert_eq!(flyer_id_from_url("https://x.cz/letak/plain/"), "plain");
    }

    #[test]
    fn test_next_page_path_variants() {
        let more = r#"<a href="/letak/lidl-42/strana-4/" class="btn">Zobrazit další stránky</a>"#;
        assert_eq!(next_page_path(more).as_deref(), Some("/letak/lidl-42/strana-4/"));

        let pager = r#"<a href="/letak/lidl-42/strana-2/" rel="next" aria-label="Následující">&gt;</a>"#;
        assert_eq!(next_page_path(pager).as_deref(), Some("/letak/lidl-42/strana-2/"));

        assert_eq!(next_page_path("<a href=\"/jinam/\">x</a>"), None);
    }

    #[tokio::test]
    async fn test_unknown_retailer() {
        let crawler = Crawler::new(Arc::new(MapFetcher(HashMap::new())));
        let err = crawler.fetch_flyer_list("penny").await.unwrap_err();
        assert!(matches!(err, ScrapeError::UnknownRetailer(_)));
    }

    #[tokio::test]
    async fn test_listing_filtered_by_predicate() {
        let mut pages = HashMap::new();
        pages.insert(format!("{}/letaky/kaufland/kraj-praha/praha/kaufland-praha-5-stodulky-pod-hranici-1304-17/", BASE_URL), LISTING.to_string());
        let crawler = Crawler::new(Arc::new(MapFetcher(pages)));

        let flyers = crawler.fetch_flyer_list("kaufland").await.unwrap();
        assert_eq!(flyers.len(), 1);
        assert_eq!(flyers[0].id, "42");
    }

    #[tokio::test]
    async fn test_walk_stops_on_repeated_next_link() {
        let img = |n: u32| {
            format!(r#"<img src="https://img.staticac.cz/foto/letaky/42/{}.jpg">"#, n)
        };
        let next = |n: u32| {
            format!(r#"<a href="/letak/lidl-42/strana-{}/">Zobrazit další stránky</a>"#, n)
        };

        let mut pages = HashMap::new();
        pages.insert(
            format!("{}/letak/lidl-42/", BASE_URL),
            format!("{}{}{}", img(1), img(2), next(3)),
        );
        pages.insert(
            format!("{}/letak/lidl-42/strana-3/", BASE_URL),
            format!("{}{}{}", img(2), img(3), next(3)),
        );
        let crawler = Crawler::new(Arc::new(MapFetcher(pages)));

        let images = crawler
            .fetch_flyer_images(&format!("{}/letak/lidl-42/", BASE_URL), Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(images.len(), 3);
        assert!(images[2].ends_with("/3.jpg"));
    }

    #[tokio::test]
    async fn test_walk_failure_discards_images() {
        let mut pages = HashMap::new();
        pages.insert(
            format!("{}/letak/lidl-42/", BASE_URL),
            r#"<img src="https://img.staticac.cz/foto/letaky/42/1.jpg"><a href="/letak/lidl-42/strana-2/" aria-label="Následující">"#.to_string(),
        );
        let crawler = Crawler::new(Arc::new(MapFetcher(pages)));

        let result = crawler
            .fetch_flyer_images(&format!("{}/letak/lidl-42/", BASE_URL), Duration::ZERO)
            .await;
        assert!(result.is_err());
    }
}
