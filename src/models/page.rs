//! Flyer page model and its processing state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Extraction attempts allowed before a page stops being selected.
pub const MAX_PAGE_RETRIES: i32 = 3;

/// Processing status of a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageStatus {
    /// Waiting for (another) extraction attempt.
    Pending,
    /// Extracted and reconciled. Terminal.
    Parsed,
}

impl PageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Parsed => "parsed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "parsed" => Some(Self::Parsed),
            _ => None,
        }
    }
}

/// A single downloaded page image of a crawled flyer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlyerPage {
    pub id: i64,
    pub flyer_id: i64,
    pub page_number: u32,
    pub source_url: Option<String>,
    pub local_path: String,
    pub status: PageStatus,
    pub retries: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FlyerPage {
    /// Whether the page is still selected for processing.
    pub fn is_eligible(&self) -> bool {
        self.status == PageStatus::Pending && self.retries < MAX_PAGE_RETRIES
    }

    /// Pending pages that ran out of extraction attempts.
    pub fn is_exhausted(&self) -> bool {
        self.status == PageStatus::Pending && self.retries >= MAX_PAGE_RETRIES
    }
}
