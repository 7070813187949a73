//! Diesel-based flyer repository for SQLite.
//!
//! Flyers own their pages and items; page and item operations live in
//! submodules and extend the same repository type.

mod items;
mod pages;

pub use pages::PageCounts;

use chrono::Utc;
use diesel::prelude::*;

use super::diesel_models::{FlyerRecord, LastInsertRowId, NewFlyer};
use super::diesel_pool::{run_blocking, DieselError, SqlitePool};
use super::{format_date, parse_date_opt, parse_datetime, parse_datetime_opt};
use crate::models::{Flyer, ValidityWindow};
use crate::schema::flyers;

impl From<FlyerRecord> for Flyer {
    fn from(record: FlyerRecord) -> Self {
        Flyer {
            id: record.id,
            shop_name: record.shop_name,
            url: record.url,
            start_date: parse_date_opt(record.start_date),
            end_date: parse_date_opt(record.end_date),
            parsed_at: parse_datetime_opt(record.parsed_at),
            created_at: parse_datetime(&record.created_at),
            updated_at: parse_datetime(&record.updated_at),
        }
    }
}

/// Diesel-based flyer repository with compile-time query checking.
#[derive(Clone)]
pub struct DieselFlyerRepository {
    pool: SqlitePool,
}

impl DieselFlyerRepository {
    /// Create a new flyer repository with an existing pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get a flyer by ID.
    pub async fn get(&self, id: i64) -> Result<Option<Flyer>, DieselError> {
        run_blocking(self.pool.clone(), move |conn| {
            flyers::table.find(id).first::<FlyerRecord>(conn).optional()
        })
        .await
        .map(|opt| opt.map(Flyer::from))
    }

    /// Find a crawled flyer by its source URL. Empty URLs never match.
    pub async fn find_by_url(&self, url: &str) -> Result<Option<Flyer>, DieselError> {
        if url.is_empty() {
            return Ok(None);
        }
        let url = url.to_string();

        run_blocking(self.pool.clone(), move |conn| {
            flyers::table
                .filter(flyers::url.eq(&url))
                .order(flyers::id.asc())
                .first::<FlyerRecord>(conn)
                .optional()
        })
        .await
        .map(|opt| opt.map(Flyer::from))
    }

    /// Insert a new flyer. `parsed` marks it as produced by an extraction.
    pub async fn create(
        &self,
        shop_name: &str,
        url: &str,
        window: ValidityWindow,
        parsed: bool,
    ) -> Result<Flyer, DieselError> {
        let now = Utc::now().to_rfc3339();
        let shop_name = shop_name.to_string();
        let url = url.to_string();
        let start = window.start.map(format_date);
        let end = window.end.map(format_date);

        let record = run_blocking(self.pool.clone(), move |conn| {
            conn.transaction::<_, DieselError, _>(|conn| {
                diesel::insert_into(flyers::table)
                    .values(NewFlyer {
                        shop_name: &shop_name,
                        url: &url,
                        start_date: start.as_deref(),
                        end_date: end.as_deref(),
                        parsed_at: parsed.then_some(now.as_str()),
                        created_at: &now,
                        updated_at: &now,
                    })
                    .execute(conn)?;
                let id = diesel::sql_query("SELECT last_insert_rowid()")
                    .get_result::<LastInsertRowId>(conn)?
                    .id;
                flyers::table.find(id).first::<FlyerRecord>(conn)
            })
        })
        .await?;

        Ok(Flyer::from(record))
    }

    /// Return the flyer with this URL, creating an undated one if absent.
    pub async fn find_or_create_by_url(
        &self,
        shop_name: &str,
        url: &str,
    ) -> Result<Flyer, DieselError> {
        if let Some(flyer) = self.find_by_url(url).await? {
            return Ok(flyer);
        }
        self.create(shop_name, url, ValidityWindow::default(), false)
            .await
    }

    /// Fill validity dates that are still unset and stamp `parsed_at`.
    ///
    /// Dates that already have a value are never overwritten.
    pub async fn fill_missing_dates(
        &self,
        id: i64,
        window: ValidityWindow,
    ) -> Result<Flyer, DieselError> {
        let now = Utc::now().to_rfc3339();
        let start = window.start.map(format_date);
        let end = window.end.map(format_date);

        let record = run_blocking(self.pool.clone(), move |conn| {
            conn.transaction::<_, DieselError, _>(|conn| {
                if let Some(start) = &start {
                    diesel::update(
                        flyers::table
                            .find(id)
                            .filter(flyers::start_date.is_null()),
                    )
                    .set(flyers::start_date.eq(start))
                    .execute(conn)?;
                }
                if let Some(end) = &end {
                    diesel::update(flyers::table.find(id).filter(flyers::end_date.is_null()))
                        .set(flyers::end_date.eq(end))
                        .execute(conn)?;
                }
                diesel::update(flyers::table.find(id))
                    .set((
                        flyers::parsed_at.eq(Some(&now)),
                        flyers::updated_at.eq(&now),
                    ))
                    .execute(conn)?;
                flyers::table.find(id).first::<FlyerRecord>(conn)
            })
        })
        .await?;

        Ok(Flyer::from(record))
    }

    /// Count all flyers.
    pub async fn count(&self) -> Result<u64, DieselError> {
        run_blocking(self.pool.clone(), move |conn| {
            use diesel::dsl::count_star;
            let count: i64 = flyers::table.select(count_star()).first(conn)?;
            Ok(count as u64)
        })
        .await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::repository::diesel_pool::create_diesel_pool_from_url;
    use crate::repository::init_schema;
    use chrono::NaiveDate;
    use tempfile::tempdir;

    pub(crate) async fn setup_test_db() -> (SqlitePool, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let db_url = format!("{}", db_path.display());

        let pool = create_diesel_pool_from_url(&db_url).unwrap();
        init_schema(&pool).await.unwrap();

        (pool, dir)
    }

    #[tokio::test]
    async fn test_find_or_create_is_idempotent() {
        let (pool, _dir) = setup_test_db().await;
        let repo = DieselFlyerRepository::new(pool);

        let url = "https://www.akcniceny.cz/letak/lidl-42/";
        let first = repo.find_or_create_by_url("lidl", url).await.unwrap();
        let second = repo.find_or_create_by_url("lidl", url).await.unwrap();

        assert_eq!(first.id, second.id);
        assert!(first.parsed_at.is_none());
        assert_eq!(repo.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_empty_url_never_matches() {
        let (pool, _dir) = setup_test_db().await;
        let repo = DieselFlyerRepository::new(pool);

        repo.create("billa", "", ValidityWindow::default(), true)
            .await
            .unwrap();
        assert!(repo.find_by_url("").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fill_missing_dates_keeps_existing() {
        let (pool, _dir) = setup_test_db().await;
        let repo = DieselFlyerRepository::new(pool);

        let flyer = repo
            .create(
                "tesco",
                "https://example.com/letak/tesco-7/",
                ValidityWindow::parse("2025-03-01", ""),
                true,
            )
            .await
            .unwrap();

        let updated = repo
            .fill_missing_dates(flyer.id, ValidityWindow::parse("2025-04-01", "2025-04-07"))
            .await
            .unwrap();

        assert_eq!(updated.start_date, NaiveDate::from_ymd_opt(2025, 3, 1));
        assert_eq!(updated.end_date, NaiveDate::from_ymd_opt(2025, 4, 7));
        assert!(updated.parsed_at.is_some());
    }
}
