//! Idempotent schema bootstrap.

use diesel::prelude::*;

use super::diesel_pool::{run_blocking, DieselError, SqlitePool};

const SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS flyers (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        shop_name TEXT NOT NULL,
        url TEXT NOT NULL DEFAULT '',
        start_date TEXT,
        end_date TEXT,
        parsed_at TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_flyers_url ON flyers(url)",
    r#"CREATE TABLE IF NOT EXISTS flyer_pages (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        flyer_id INTEGER NOT NULL REFERENCES flyers(id),
        page_number INTEGER NOT NULL,
        source_url TEXT,
        local_path TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'pending',
        retries INTEGER NOT NULL DEFAULT 0,
        last_error TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_flyer_pages_flyer ON flyer_pages(flyer_id)",
    "CREATE INDEX IF NOT EXISTS idx_flyer_pages_status ON flyer_pages(status, retries)",
    r#"CREATE TABLE IF NOT EXISTS flyer_items (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        flyer_id INTEGER NOT NULL REFERENCES flyers(id),
        flyer_page_id INTEGER REFERENCES flyer_pages(id),
        name TEXT NOT NULL,
        price REAL NOT NULL DEFAULT 0,
        original_price REAL,
        quantity TEXT NOT NULL DEFAULT '',
        start_date TEXT,
        end_date TEXT,
        shop_name TEXT NOT NULL,
        categories TEXT NOT NULL DEFAULT '',
        keywords TEXT NOT NULL DEFAULT '',
        photo_url TEXT,
        local_photo_path TEXT,
        created_at TEXT NOT NULL
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_flyer_items_flyer ON flyer_items(flyer_id)",
    r#"CREATE TABLE IF NOT EXISTS job_status (
        name TEXT PRIMARY KEY,
        last_run TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )"#,
];

/// Create all tables and indexes that do not exist yet.
pub async fn init_schema(pool: &SqlitePool) -> Result<(), DieselError> {
    run_blocking(pool.clone(), |conn| {
        for statement in SCHEMA {
            diesel::sql_query(*statement).execute(conn)?;
        }
        Ok(())
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::diesel_pool::create_diesel_pool_from_url;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_init_schema_is_idempotent() {
        let dir = tempdir().unwrap();
        let db_url = format!("{}", dir.path().join("test.db").display());
        let pool = create_diesel_pool_from_url(&db_url).unwrap();

        init_schema(&pool).await.unwrap();
        init_schema(&pool).await.unwrap();
    }
}
