//! Flyer pipeline orchestration: crawl, download, extract, reconcile.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use super::reconcile::{PageContext, Reconciler};
use super::scheduler::{PipelineJobs, FLYER_DOWNLOAD_JOB};
use super::splitter::PageSplitter;
use crate::llm::{Attachment, FlyerExtractor};
use crate::models::FlyerPage;
use crate::repository::{DieselFlyerRepository, JobStatusStore};
use crate::scrapers::{download, find_retailer, Crawler, FlyerInfo, PageFetcher};
use crate::storage::page_image_path;

/// Knobs for [`FlyerManager`].
#[derive(Debug, Clone)]
pub struct ManagerOptions {
    pub uploads_dir: PathBuf,
    /// Pause between detail page fetches and between image downloads.
    pub page_delay: Duration,
    /// Retailer ids to crawl.
    pub retailers: Vec<String>,
}

/// Totals for one crawl.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadReport {
    pub retailers: usize,
    pub flyers_seen: usize,
    pub flyers_skipped: usize,
    pub pages_downloaded: usize,
    pub errors: usize,
}

/// Totals for one pass over pending pages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessReport {
    pub pages_attempted: usize,
    pub pages_parsed: usize,
    pub pages_failed: usize,
    pub items_saved: usize,
}

/// Totals for manually ingested documents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub pages: usize,
    pub flyers_created: usize,
    pub items_saved: usize,
    pub pages_failed: usize,
    /// Documents rejected before any page was extracted.
    pub documents_failed: usize,
}

impl IngestReport {
    pub fn absorb(&mut self, other: &IngestReport) {
        self.pages += other.pages;
        self.flyers_created += other.flyers_created;
        self.items_saved += other.items_saved;
        self.pages_failed += other.pages_failed;
        self.documents_failed += other.documents_failed;
    }
}

/// Counts reported by `flyerfeed status`.
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    pub flyers: u64,
    pub pages: u64,
    pub parsed_pages: u64,
    pub error_pages: u64,
    pub exhausted_pages: u64,
    pub items: u64,
    pub last_crawl: Option<DateTime<Utc>>,
}

/// Drives the acquisition and parsing stages against one repository.
pub struct FlyerManager {
    repo: DieselFlyerRepository,
    crawler: Crawler,
    fetcher: Arc<dyn PageFetcher>,
    extractor: Arc<dyn FlyerExtractor>,
    reconciler: Reconciler,
    splitter: PageSplitter,
    job_status: Option<Arc<dyn JobStatusStore>>,
    options: ManagerOptions,
}

impl FlyerManager {
    pub fn new(
        repo: DieselFlyerRepository,
        crawler: Crawler,
        fetcher: Arc<dyn PageFetcher>,
        extractor: Arc<dyn FlyerExtractor>,
        reconciler: Reconciler,
        options: ManagerOptions,
    ) -> Self {
        Self {
            repo,
            crawler,
            fetcher,
            extractor,
            reconciler,
            splitter: PageSplitter::default(),
            job_status: None,
            options,
        }
    }

    pub fn with_splitter(mut self, splitter: PageSplitter) -> Self {
        self.splitter = splitter;
        self
    }

    /// Job status store consulted for the last crawl time in [`Self::stats`].
    pub fn with_job_status(mut self, store: Arc<dyn JobStatusStore>) -> Self {
        self.job_status = Some(store);
        self
    }

    pub fn repository(&self) -> &DieselFlyerRepository {
        &self.repo
    }

    /// Crawl every configured retailer and download pages of flyers that
    /// have none yet. A failing retailer or flyer is logged and skipped.
    pub async fn download_new_flyers(&self) -> anyhow::Result<DownloadReport> {
        let mut report = DownloadReport::default();

        for retailer_id in &self.options.retailers {
            let Some(retailer) = find_retailer(retailer_id) else {
                warn!(retailer = %retailer_id, "Unknown retailer in configuration");
                report.errors += 1;
                continue;
            };
            report.retailers += 1;

            let flyers = match self.crawler.fetch_flyer_list(retailer.id).await {
                Ok(flyers) => flyers,
                Err(e) => {
                    error!(retailer = retailer.id, error = %e, "Failed to fetch flyer list");
                    report.errors += 1;
                    continue;
                }
            };

            for info in flyers {
                report.flyers_seen += 1;
                match self.download_flyer(retailer.id, &info).await {
                    Ok(0) => report.flyers_skipped += 1,
                    Ok(pages) => report.pages_downloaded += pages,
                    Err(e) => {
                        error!(retailer = retailer.id, url = %info.url, error = %e, "Failed to download flyer");
                        report.errors += 1;
                    }
                }
            }
        }

        info!(
            flyers = report.flyers_seen,
            pages = report.pages_downloaded,
            errors = report.errors,
            "Flyer download finished"
        );
        Ok(report)
    }

    /// Download one flyer's pages. Returns the number of new pages, 0 when
    /// the flyer was already downloaded.
    async fn download_flyer(&self, shop: &str, info: &FlyerInfo) -> anyhow::Result<usize> {
        let flyer = self.repo.find_or_create_by_url(shop, &info.url).await?;
        if self.repo.count_pages(flyer.id).await? > 0 {
            debug!(flyer_id = flyer.id, url = %info.url, "Flyer already downloaded");
            return Ok(0);
        }

        let images = self
            .crawler
            .fetch_flyer_images(&info.url, self.options.page_delay)
            .await?;

        let mut saved = 0;
        for (index, image_url) in images.iter().enumerate() {
            let page_number = index as u32 + 1;
            let dest = page_image_path(&self.options.uploads_dir, shop, flyer.id, page_number);

            if let Err(e) = download(self.fetcher.as_ref(), image_url, &dest).await {
                warn!(flyer_id = flyer.id, page_number, url = %image_url, error = %e, "Failed to download page");
                continue;
            }
            if let Err(e) = self
                .repo
                .add_page(
                    flyer.id,
                    page_number,
                    Some(image_url.as_str()),
                    &dest.to_string_lossy(),
                )
                .await
            {
                warn!(flyer_id = flyer.id, page_number, error = %e, "Failed to store page row");
                continue;
            }
            saved += 1;

            if !self.options.page_delay.is_zero() {
                tokio::time::sleep(self.options.page_delay).await;
            }
        }

        info!(flyer_id = flyer.id, shop, title = %info.title, pages = saved, "Downloaded flyer");
        Ok(saved)
    }

    /// Extract and reconcile every pending page still under the retry ceiling.
    pub async fn process_pending_pages(&self) -> anyhow::Result<ProcessReport> {
        let pages = self.repo.get_eligible_pages().await?;
        let mut report = ProcessReport::default();

        if pages.is_empty() {
            debug!("No pending pages");
            return Ok(report);
        }
        info!(count = pages.len(), "Processing pending pages");

        for page in pages {
            report.pages_attempted += 1;
            match self.process_page(&page).await {
                Ok(items) => {
                    report.pages_parsed += 1;
                    report.items_saved += items;
                }
                Err(e) => {
                    warn!(page_id = page.id, error = %e, "Page not processed");
                    report.pages_failed += 1;
                }
            }
        }

        info!(
            parsed = report.pages_parsed,
            failed = report.pages_failed,
            items = report.items_saved,
            "Page processing finished"
        );
        Ok(report)
    }

    /// Process one page, recording the failure on the page row.
    ///
    /// Only extraction failures consume a retry.
    async fn process_page(&self, page: &FlyerPage) -> anyhow::Result<usize> {
        let data = match tokio::fs::read(&page.local_path).await {
            Ok(data) => data,
            Err(e) => {
                let message = format!("failed to read {}: {}", page.local_path, e);
                self.repo.record_page_error(page.id, &message).await?;
                anyhow::bail!(message);
            }
        };

        let Some(flyer) = self.repo.get(page.flyer_id).await? else {
            let message = format!("flyer {} not found", page.flyer_id);
            self.repo.record_page_error(page.id, &message).await?;
            anyhow::bail!(message);
        };

        let attachment = Attachment::new(
            format!("page_{}.jpg", page.page_number),
            "image/jpeg",
            data,
        );
        let parsed = match self.extractor.extract(std::slice::from_ref(&attachment)).await {
            Ok(parsed) => parsed,
            Err(e) => {
                let message = e.to_string();
                self.repo
                    .record_extraction_failure(page.id, &message)
                    .await?;
                anyhow::bail!("extraction failed: {}", message);
            }
        };

        let context = PageContext {
            shop: flyer.shop_name.clone(),
            flyer_url: flyer.url.clone(),
            page_source_url: page.source_url.clone(),
            page_id: Some(page.id),
        };
        let summary = match self
            .reconciler
            .save_parsed_flyer(&parsed, &attachment.data, &context)
            .await
        {
            Ok(summary) => summary,
            Err(e) => {
                let message = format!("failed to save results: {}", e);
                self.repo.record_page_error(page.id, &message).await?;
                anyhow::bail!(message);
            }
        };

        self.repo.mark_page_parsed(page.id).await?;
        debug!(page_id = page.id, items = summary.items_saved, "Page parsed");
        Ok(summary.items_saved)
    }

    /// Parse a document that did not come from the crawler.
    ///
    /// PDFs are rasterized and each page reconciled as its own flyer; images
    /// are sent as-is. No page rows are stored, so nothing is retried.
    pub async fn ingest_document(
        &self,
        shop: &str,
        filename: &str,
        data: Vec<u8>,
    ) -> anyhow::Result<IngestReport> {
        let document = Attachment::sniffed(filename, data);
        if !document.is_supported() {
            anyhow::bail!(
                "{} has unsupported content type {}",
                filename,
                document.content_type
            );
        }

        let pages = if document.is_pdf() {
            self.split_pdf(&document).await?
        } else {
            vec![document]
        };

        let mut report = IngestReport {
            pages: pages.len(),
            ..Default::default()
        };
        let context = PageContext::manual(shop);

        for page in &pages {
            let parsed = match self.extractor.extract(std::slice::from_ref(page)).await {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!(file = %page.filename, error = %e, "Extraction failed");
                    report.pages_failed += 1;
                    continue;
                }
            };

            match self
                .reconciler
                .save_parsed_flyer(&parsed, &page.data, &context)
                .await
            {
                Ok(summary) => {
                    report.flyers_created += usize::from(summary.created);
                    report.items_saved += summary.items_saved;
                }
                Err(e) => {
                    warn!(file = %page.filename, error = %e, "Failed to save parsed page");
                    report.pages_failed += 1;
                }
            }
        }

        info!(
            shop,
            file = filename,
            pages = report.pages,
            items = report.items_saved,
            "Ingested document"
        );
        Ok(report)
    }

    async fn split_pdf(&self, document: &Attachment) -> anyhow::Result<Vec<Attachment>> {
        let splitter = self.splitter.clone();
        let data = document.data.clone();
        let stem = document
            .filename
            .trim_end_matches(".pdf")
            .trim_end_matches(".PDF")
            .to_string();

        tokio::task::spawn_blocking(move || -> anyhow::Result<Vec<Attachment>> {
            let split = splitter.split_document(&data)?;
            split
                .pages()
                .iter()
                .enumerate()
                .map(|(i, path)| {
                    let bytes = std::fs::read(path)?;
                    Ok(Attachment::new(
                        format!("{}_page_{}.png", stem, i + 1),
                        "image/png",
                        bytes,
                    ))
                })
                .collect()
        })
        .await?
    }

    pub async fn stats(&self) -> anyhow::Result<PipelineStats> {
        let counts = self.repo.page_counts().await?;
        let last_crawl = match &self.job_status {
            Some(store) => store.last_run(FLYER_DOWNLOAD_JOB).await?,
            None => None,
        };

        Ok(PipelineStats {
            flyers: self.repo.count().await?,
            pages: counts.total,
            parsed_pages: counts.parsed,
            error_pages: counts.errored,
            exhausted_pages: counts.exhausted,
            items: self.repo.count_items().await?,
            last_crawl,
        })
    }
}

#[async_trait]
impl PipelineJobs for FlyerManager {
    async fn download_new_flyers(&self) -> anyhow::Result<DownloadReport> {
        FlyerManager::download_new_flyers(self).await
    }

    async fn process_pending_pages(&self) -> anyhow::Result<ProcessReport> {
        FlyerManager::process_pending_pages(self).await
    }
}
