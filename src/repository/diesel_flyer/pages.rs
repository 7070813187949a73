//! Flyer page storage and processing state.

use chrono::Utc;
use diesel::prelude::*;

use super::DieselFlyerRepository;
use crate::models::{FlyerPage, PageStatus, MAX_PAGE_RETRIES};
use crate::repository::diesel_models::{FlyerPageRecord, LastInsertRowId, NewFlyerPage};
use crate::repository::diesel_pool::{run_blocking, DieselError};
use crate::repository::parse_datetime;
use crate::schema::flyer_pages;

impl From<FlyerPageRecord> for FlyerPage {
    fn from(r: FlyerPageRecord) -> Self {
        FlyerPage {
            id: r.id,
            flyer_id: r.flyer_id,
            page_number: r.page_number.max(0) as u32,
            source_url: r.source_url,
            local_path: r.local_path,
            status: PageStatus::from_str(&r.status).unwrap_or(PageStatus::Pending),
            retries: r.retries,
            last_error: r.last_error,
            created_at: parse_datetime(&r.created_at),
            updated_at: parse_datetime(&r.updated_at),
        }
    }
}

/// Page totals by processing state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageCounts {
    pub total: u64,
    pub parsed: u64,
    /// Pages with a recorded error, parsed or not.
    pub errored: u64,
    /// Pending pages that reached the retry ceiling.
    pub exhausted: u64,
}

impl DieselFlyerRepository {
    /// Count pages stored for a flyer.
    pub async fn count_pages(&self, flyer_id: i64) -> Result<u64, DieselError> {
        run_blocking(self.pool.clone(), move |conn| {
            use diesel::dsl::count_star;
            let count: i64 = flyer_pages::table
                .filter(flyer_pages::flyer_id.eq(flyer_id))
                .select(count_star())
                .first(conn)?;
            Ok(count as u64)
        })
        .await
    }

    /// Save a freshly downloaded page as pending. Returns the page ID.
    pub async fn add_page(
        &self,
        flyer_id: i64,
        page_number: u32,
        source_url: Option<&str>,
        local_path: &str,
    ) -> Result<i64, DieselError> {
        let now = Utc::now().to_rfc3339();
        let source_url = source_url.map(str::to_string);
        let local_path = local_path.to_string();

        run_blocking(self.pool.clone(), move |conn| {
            diesel::insert_into(flyer_pages::table)
                .values(NewFlyerPage {
                    flyer_id,
                    page_number: page_number as i32,
                    source_url: source_url.as_deref(),
                    local_path: &local_path,
                    status: PageStatus::Pending.as_str(),
                    retries: 0,
                    last_error: None,
                    created_at: &now,
                    updated_at: &now,
                })
                .execute(conn)?;
            diesel::sql_query("SELECT last_insert_rowid()")
                .get_result::<LastInsertRowId>(conn)
                .map(|r| r.id)
        })
        .await
    }

    /// Get a page by ID.
    pub async fn get_page(&self, id: i64) -> Result<Option<FlyerPage>, DieselError> {
        run_blocking(self.pool.clone(), move |conn| {
            flyer_pages::table
                .find(id)
                .first::<FlyerPageRecord>(conn)
                .optional()
        })
        .await
        .map(|opt| opt.map(FlyerPage::from))
    }

    /// Get all pages of a flyer in page order.
    pub async fn get_pages(&self, flyer_id: i64) -> Result<Vec<FlyerPage>, DieselError> {
        run_blocking(self.pool.clone(), move |conn| {
            flyer_pages::table
                .filter(flyer_pages::flyer_id.eq(flyer_id))
                .order(flyer_pages::page_number.asc())
                .load::<FlyerPageRecord>(conn)
        })
        .await
        .map(|records| records.into_iter().map(FlyerPage::from).collect())
    }

    /// Pages still awaiting extraction that have attempts left.
    pub async fn get_eligible_pages(&self) -> Result<Vec<FlyerPage>, DieselError> {
        run_blocking(self.pool.clone(), move |conn| {
            flyer_pages::table
                .filter(flyer_pages::status.eq(PageStatus::Pending.as_str()))
                .filter(flyer_pages::retries.lt(MAX_PAGE_RETRIES))
                .order(flyer_pages::id.asc())
                .load::<FlyerPageRecord>(conn)
        })
        .await
        .map(|records| records.into_iter().map(FlyerPage::from).collect())
    }

    /// Mark a page as parsed. Terminal.
    pub async fn mark_page_parsed(&self, id: i64) -> Result<(), DieselError> {
        let now = Utc::now().to_rfc3339();

        run_blocking(self.pool.clone(), move |conn| {
            diesel::update(flyer_pages::table.find(id))
                .set((
                    flyer_pages::status.eq(PageStatus::Parsed.as_str()),
                    flyer_pages::updated_at.eq(&now),
                ))
                .execute(conn)?;
            Ok(())
        })
        .await
    }

    /// Record a failed extraction attempt: bumps the retry counter.
    pub async fn record_extraction_failure(&self, id: i64, error: &str) -> Result<(), DieselError> {
        let now = Utc::now().to_rfc3339();
        let error = error.to_string();

        run_blocking(self.pool.clone(), move |conn| {
            diesel::update(flyer_pages::table.find(id))
                .set((
                    flyer_pages::retries.eq(flyer_pages::retries + 1),
                    flyer_pages::last_error.eq(Some(&error)),
                    flyer_pages::updated_at.eq(&now),
                ))
                .execute(conn)?;
            Ok(())
        })
        .await
    }

    /// Record an error that does not count against the retry budget.
    pub async fn record_page_error(&self, id: i64, error: &str) -> Result<(), DieselError> {
        let now = Utc::now().to_rfc3339();
        let error = error.to_string();

        run_blocking(self.pool.clone(), move |conn| {
            diesel::update(flyer_pages::table.find(id))
                .set((
                    flyer_pages::last_error.eq(Some(&error)),
                    flyer_pages::updated_at.eq(&now),
                ))
                .execute(conn)?;
            Ok(())
        })
        .await
    }

    /// Page totals across all flyers.
    pub async fn page_counts(&self) -> Result<PageCounts, DieselError> {
        run_blocking(self.pool.clone(), move |conn| {
            use diesel::dsl::count_star;

            let total: i64 = flyer_pages::table.select(count_star()).first(conn)?;
            let parsed: i64 = flyer_pages::table
                .filter(flyer_pages::status.eq(PageStatus::Parsed.as_str()))
                .select(count_star())
                .first(conn)?;
            let errored: i64 = flyer_pages::table
                .filter(flyer_pages::last_error.is_not_null())
                .filter(flyer_pages::last_error.ne(""))
                .select(count_star())
                .first(conn)?;
            let exhausted: i64 = flyer_pages::table
                .filter(flyer_pages::status.eq(PageStatus::Pending.as_str()))
                .filter(flyer_pages::retries.ge(MAX_PAGE_RETRIES))
                .select(count_star())
                .first(conn)?;

            Ok(PageCounts {
                total: total as u64,
                parsed: parsed as u64,
                errored: errored as u64,
                exhausted: exhausted as u64,
            })
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use crate::models::{PageStatus, ValidityWindow, MAX_PAGE_RETRIES};
    use crate::repository::diesel_flyer::tests::setup_test_db;
    use crate::repository::DieselFlyerRepository;

    #[tokio::test]
    async fn test_page_retry_ceiling() {
        let (pool, _dir) = setup_test_db().await;
        let repo = DieselFlyerRepository::new(pool);

        let flyer = repo
            .create("lidl", "https://example.com/a-1/", ValidityWindow::default(), false)
            .await
            .unwrap();
        let page_id = repo
            .add_page(flyer.id, 1, Some("https://cdn/1.jpg"), "/tmp/1_page_1.jpg")
            .await
            .unwrap();

        for attempt in 0..MAX_PAGE_RETRIES {
            let eligible = repo.get_eligible_pages().await.unwrap();
            assert_eq!(eligible.len(), 1, "attempt {attempt} should still select the page");
            repo.record_extraction_failure(page_id, "no candidates")
                .await
                .unwrap();
        }

        assert!(repo.get_eligible_pages().await.unwrap().is_empty());

        let page = repo.get_page(page_id).await.unwrap().unwrap();
        assert_eq!(page.retries, 3);
        assert_eq!(page.status, PageStatus::Pending);
        assert_eq!(page.last_error.as_deref(), Some("no candidates"));

        let counts = repo.page_counts().await.unwrap();
        assert_eq!(counts.total, 1);
        assert_eq!(counts.exhausted, 1);
        assert_eq!(counts.errored, 1);
    }

    #[tokio::test]
    async fn test_page_error_does_not_consume_retry() {
        let (pool, _dir) = setup_test_db().await;
        let repo = DieselFlyerRepository::new(pool);

        let flyer = repo
            .create("billa", "https://example.com/b-2/", ValidityWindow::default(), false)
            .await
            .unwrap();
        let page_id = repo.add_page(flyer.id, 1, None, "/tmp/p.jpg").await.unwrap();

        repo.record_page_error(page_id, "save failed").await.unwrap();
        let page = repo.get_page(page_id).await.unwrap().unwrap();
        assert_eq!(page.retries, 0);
        assert!(page.is_eligible());

        repo.mark_page_parsed(page_id).await.unwrap();
        assert!(repo.get_eligible_pages().await.unwrap().is_empty());
        assert_eq!(repo.count_pages(flyer.id).await.unwrap(), 1);
    }
}
