//! Job trigger bookkeeping.
//!
//! The scheduler only needs "when did this job last fire" and "it fires now",
//! so storage sits behind [`JobStatusStore`] with a Diesel and an in-memory
//! implementation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use tokio::sync::RwLock;

use super::diesel_models::JobStatusRecord;
use super::diesel_pool::{run_blocking, DieselError, SqlitePool};
use super::parse_datetime;
use crate::schema::job_status;

/// Storage for per-job last-trigger timestamps.
#[async_trait]
pub trait JobStatusStore: Send + Sync {
    /// When the job last fired, if ever.
    async fn last_run(&self, job: &str) -> Result<Option<DateTime<Utc>>, DieselError>;

    /// Record that the job fired at `at`.
    async fn record_run(&self, job: &str, at: DateTime<Utc>) -> Result<(), DieselError>;
}

/// Diesel-backed job status repository.
#[derive(Clone)]
pub struct DieselJobStatusRepository {
    pool: SqlitePool,
}

impl DieselJobStatusRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStatusStore for DieselJobStatusRepository {
    async fn last_run(&self, job: &str) -> Result<Option<DateTime<Utc>>, DieselError> {
        let job = job.to_string();

        run_blocking(self.pool.clone(), move |conn| {
            job_status::table
                .find(&job)
                .first::<JobStatusRecord>(conn)
                .optional()
        })
        .await
        .map(|opt| opt.map(|r| parse_datetime(&r.last_run)))
    }

    async fn record_run(&self, job: &str, at: DateTime<Utc>) -> Result<(), DieselError> {
        let job = job.to_string();
        let last_run = at.to_rfc3339();
        let now = Utc::now().to_rfc3339();

        run_blocking(self.pool.clone(), move |conn| {
            diesel::replace_into(job_status::table)
                .values((
                    job_status::name.eq(&job),
                    job_status::last_run.eq(&last_run),
                    job_status::updated_at.eq(&now),
                ))
                .execute(conn)?;
            Ok(())
        })
        .await
    }
}

/// In-memory job status store for single-shot runs and tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryJobStatusStore {
    runs: Arc<RwLock<HashMap<String, DateTime<Utc>>>>,
}

impl MemoryJobStatusStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStatusStore for MemoryJobStatusStore {
    async fn last_run(&self, job: &str) -> Result<Option<DateTime<Utc>>, DieselError> {
        Ok(self.runs.read().await.get(job).copied())
    }

    async fn record_run(&self, job: &str, at: DateTime<Utc>) -> Result<(), DieselError> {
        self.runs.write().await.insert(job.to_string(), at);
        Ok(())
    }
}
