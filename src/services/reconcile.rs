//! Merge extraction results into stored flyers and items.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::cropper::crop_item;
use crate::llm::{ParsedFlyer, ParsedItem};
use crate::models::{Flyer, NewFlyerItem, ValidityWindow};
use crate::repository::{DieselError, DieselFlyerRepository};

/// Where a parsed page came from.
#[derive(Debug, Clone, Default)]
pub struct PageContext {
    pub shop: String,
    /// Detail page URL of the flyer. Empty for manually ingested documents.
    pub flyer_url: String,
    /// Remote URL of the page image, stored as each item's photo URL.
    pub page_source_url: Option<String>,
    /// Stored page row the items came from, if any.
    pub page_id: Option<i64>,
}

impl PageContext {
    /// Context for a document that was not crawled.
    pub fn manual(shop: &str) -> Self {
        Self {
            shop: shop.to_string(),
            ..Default::default()
        }
    }
}

/// Outcome of reconciling one extraction result.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaveSummary {
    pub flyer_id: i64,
    /// Whether a new flyer row was created.
    pub created: bool,
    pub items_saved: usize,
    pub items_failed: usize,
    pub crops_saved: usize,
}

/// Writes parsed flyers into the repository and crops item images.
#[derive(Clone)]
pub struct Reconciler {
    repo: DieselFlyerRepository,
    items_dir: PathBuf,
}

impl Reconciler {
    pub fn new(repo: DieselFlyerRepository, items_dir: PathBuf) -> Self {
        Self { repo, items_dir }
    }

    /// Persist `parsed` against its flyer.
    ///
    /// The flyer is matched by URL; a miss (or an empty URL) creates it with
    /// the parsed dates. A hit only gains dates it does not have yet. Items
    /// are appended, never de-duplicated. Individual crop or item failures
    /// are logged and skipped; only flyer lookup and creation errors abort.
    pub async fn save_parsed_flyer(
        &self,
        parsed: &ParsedFlyer,
        page_image: &[u8],
        context: &PageContext,
    ) -> Result<SaveSummary, DieselError> {
        let window = ValidityWindow::parse(&parsed.start_date, &parsed.end_date);
        let (flyer, created) = self.resolve_flyer(context, window).await?;

        let mut summary = SaveSummary {
            flyer_id: flyer.id,
            created,
            ..Default::default()
        };

        let image = can_crop(page_image).then(|| Arc::new(page_image.to_vec()));

        for item in &parsed.items {
            let local_photo_path = match (&image, item.bounding_box()) {
                (Some(image), Some(bbox)) => self.crop(image.clone(), bbox, &item.name).await,
                _ => None,
            };
            if local_photo_path.is_some() {
                summary.crops_saved += 1;
            }

            let row = new_item(item, &flyer, window, context, local_photo_path);
            match self.repo.insert_item(&row).await {
                Ok(_) => summary.items_saved += 1,
                Err(e) => {
                    warn!(flyer_id = flyer.id, item = %item.name, error = %e, "Failed to save item");
                    summary.items_failed += 1;
                }
            }
        }

        info!(
            flyer_id = flyer.id,
            shop = %context.shop,
            created,
            items = summary.items_saved,
            crops = summary.crops_saved,
            "Reconciled parsed flyer"
        );
        Ok(summary)
    }

    async fn resolve_flyer(
        &self,
        context: &PageContext,
        window: ValidityWindow,
    ) -> Result<(Flyer, bool), DieselError> {
        if !context.flyer_url.is_empty() {
            if let Some(existing) = self.repo.find_by_url(&context.flyer_url).await? {
                let flyer = self.repo.fill_missing_dates(existing.id, window).await?;
                return Ok((flyer, false));
            }
        }

        let flyer = self
            .repo
            .create(&context.shop, &context.flyer_url, window, true)
            .await?;
        Ok((flyer, true))
    }

    async fn crop(&self, image: Arc<Vec<u8>>, bbox: [f64; 4], name: &str) -> Option<String> {
        let items_dir = self.items_dir.clone();
        let result =
            tokio::task::spawn_blocking(move || crop_item(&image, &bbox, &items_dir)).await;

        match result {
            Ok(Ok(path)) => {
                debug!(item = name, path = %path.display(), "Cropped item image");
                Some(path.to_string_lossy().into_owned())
            }
            Ok(Err(e)) => {
                warn!(item = name, error = %e, "Failed to crop item image");
                None
            }
            Err(e) => {
                warn!(item = name, error = %e, "Crop task panicked");
                None
            }
        }
    }
}

/// PDFs cannot be cropped without rasterizing them first.
fn can_crop(page_image: &[u8]) -> bool {
    !page_image.is_empty() && !page_image.starts_with(b"%PDF")
}

/// Item dates fall back to the page's own dates, then to the flyer row.
fn new_item(
    item: &ParsedItem,
    flyer: &Flyer,
    page_window: ValidityWindow,
    context: &PageContext,
    local_photo_path: Option<String>,
) -> NewFlyerItem {
    let window = ValidityWindow::parse(&item.start_date, &item.end_date)
        .or(page_window)
        .or(flyer.validity());

    NewFlyerItem {
        flyer_id: flyer.id,
        flyer_page_id: context.page_id,
        name: item.name.clone(),
        price: item.price,
        original_price: item.original_price,
        quantity: item.quantity.clone(),
        start_date: window.start,
        end_date: window.end,
        shop_name: context.shop.clone(),
        categories: item.categories.join(", "),
        keywords: item.keywords.join(", "),
        photo_url: context.page_source_url.clone(),
        local_photo_path,
    }
}
