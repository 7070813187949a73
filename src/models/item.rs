//! Extracted flyer item model.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A product offer extracted from a flyer page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlyerItem {
    pub id: i64,
    pub flyer_id: i64,
    pub flyer_page_id: Option<i64>,
    pub name: String,
    pub price: f64,
    pub original_price: Option<f64>,
    pub quantity: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub shop_name: String,
    /// Comma-joined category tags.
    pub categories: String,
    /// Comma-joined search keywords.
    pub keywords: String,
    pub photo_url: Option<String>,
    pub local_photo_path: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl FlyerItem {
    pub fn category_list(&self) -> Vec<&str> {
        split_tags(&self.categories)
    }
}

/// Item values ready for insertion.
#[derive(Debug, Clone)]
pub struct NewFlyerItem {
    pub flyer_id: i64,
    pub flyer_page_id: Option<i64>,
    pub name: String,
    pub price: f64,
    pub original_price: Option<f64>,
    pub quantity: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub shop_name: String,
    pub categories: String,
    pub keywords: String,
    pub photo_url: Option<String>,
    pub local_photo_path: Option<String>,
}

fn split_tags(joined: &str) -> Vec<&str> {
    joined
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect()
}
