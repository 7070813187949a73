//! Flyer model.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Date format used by extraction results and stored validity dates.
pub const FLYER_DATE_FORMAT: &str = "%Y-%m-%d";

/// Parse a `YYYY-MM-DD` date, treating blank or malformed input as unset.
pub fn parse_flyer_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    NaiveDate::parse_from_str(value, FLYER_DATE_FORMAT).ok()
}

/// Validity window of a flyer or item. Either end may be unset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidityWindow {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl ValidityWindow {
    pub fn new(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        Self { start, end }
    }

    /// Build a window from raw extraction strings.
    pub fn parse(start: &str, end: &str) -> Self {
        Self::new(parse_flyer_date(start), parse_flyer_date(end))
    }

    /// Fill each unset end from `fallback`, keeping ends that are already set.
    pub fn or(self, fallback: ValidityWindow) -> Self {
        Self {
            start: self.start.or(fallback.start),
            end: self.end.or(fallback.end),
        }
    }
}

/// A promotional flyer from a retailer.
///
/// Crawled flyers are keyed by their detail-page URL. Flyers ingested from
/// attachments carry an empty URL and are never matched against existing rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flyer {
    pub id: i64,
    pub shop_name: String,
    pub url: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    /// Last time an extraction result was reconciled into this flyer.
    pub parsed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Flyer {
    /// The flyer's current validity window.
    pub fn validity(&self) -> ValidityWindow {
        ValidityWindow::new(self.start_date, self.end_date)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flyer_date() {
        assert_eq!(
            parse_flyer_date("2025-03-01"),
            NaiveDate::from_ymd_opt(2025, 3, 1)
        );
        assert_eq!(parse_flyer_date(""), None);
        assert_eq!(parse_flyer_date("  "), None);
        assert_eq!(parse_flyer_date("01.03.2025"), None);
    }

    #[test]
    fn test_window_fallback_keeps_set_ends() {
        let own = ValidityWindow::parse("2025-03-05", "");
        let flyer = ValidityWindow::parse("2025-03-01", "2025-03-07");
        let merged = own.or(flyer);
        assert_eq!(merged.start, NaiveDate::from_ymd_opt(2025, 3, 5));
        assert_eq!(merged.end, NaiveDate::from_ymd_opt(2025, 3, 7));
    }
}
