//! Persistence layer: SQLite through Diesel, one repository per aggregate.

pub mod diesel_flyer;
pub mod diesel_job_status;
pub mod diesel_models;
pub mod diesel_pool;
pub mod migrations;

use std::path::Path;

use chrono::{DateTime, NaiveDate, Utc};

pub use diesel_flyer::{DieselFlyerRepository, PageCounts};
pub use diesel_job_status::{DieselJobStatusRepository, JobStatusStore, MemoryJobStatusStore};
pub use diesel_pool::{create_diesel_pool, run_blocking, DieselError, SqlitePool};
pub use migrations::init_schema;

use crate::models::{parse_flyer_date, FLYER_DATE_FORMAT};

/// Parse an RFC 3339 timestamp column, falling back to now for corrupt values.
pub fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// Parse an optional RFC 3339 timestamp column.
pub fn parse_datetime_opt(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// Parse an optional `YYYY-MM-DD` column.
pub fn parse_date_opt(s: Option<String>) -> Option<NaiveDate> {
    s.as_deref().and_then(parse_flyer_date)
}

/// Format a validity date for storage.
pub fn format_date(date: NaiveDate) -> String {
    date.format(FLYER_DATE_FORMAT).to_string()
}

/// Open (creating if needed) the database at `path` and bootstrap its tables.
pub async fn open_database(path: &Path) -> anyhow::Result<SqlitePool> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let pool = create_diesel_pool(path)?;
    init_schema(&pool).await?;
    Ok(pool)
}
