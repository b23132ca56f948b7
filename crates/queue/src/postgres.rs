//! Postgres-backed job store.
//!
//! One `jobs` table; the claim primitive locks the selected row with
//! `FOR UPDATE SKIP LOCKED` inside a single statement, so concurrent workers
//! never block on each other and never receive the same job. Idempotency is
//! a partial unique index; a violated insert surfaces as
//! [`StoreError::IdempotencyConflict`] for admission to resolve.
//!
//! ## Error mapping
//!
//! | SQLx error | PG code | StoreError |
//! |---|---|---|
//! | unique violation on the idempotency index | `23505` | `IdempotencyConflict` |
//! | unique violation on the primary key | `23505` | `AlreadyExists` |
//! | anything else | — | `Storage` |

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use conveyor_core::JobId;

use crate::job::{Job, JobStatus};
use crate::store::{page_bounds, JobPage, JobStats, JobStore, JobSummary, StoreError};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS jobs (
    id UUID PRIMARY KEY,
    idempotency_key TEXT,
    user_id TEXT NOT NULL,
    payload JSONB NOT NULL,
    status TEXT NOT NULL,
    retry_count INTEGER NOT NULL,
    max_retries INTEGER NOT NULL,
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL,
    log_output TEXT NOT NULL DEFAULT ''
);

CREATE UNIQUE INDEX IF NOT EXISTS jobs_idempotency_key_uniq
    ON jobs (idempotency_key) WHERE idempotency_key IS NOT NULL;
CREATE INDEX IF NOT EXISTS jobs_pending_fifo
    ON jobs (created_at, id) WHERE status = 'PENDING';
CREATE INDEX IF NOT EXISTS jobs_user_created
    ON jobs (user_id, created_at);
CREATE INDEX IF NOT EXISTS jobs_user_status
    ON jobs (user_id, status);
"#;

const JOB_COLUMNS: &str = "id, idempotency_key, user_id, payload, status, \
     retry_count, max_retries, created_at, updated_at, log_output";

/// Postgres job store.
///
/// Cloneable; the `PgPool` handles thread-safe connection management.
#[derive(Debug, Clone)]
pub struct PostgresJobStore {
    pool: PgPool,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(url)
            .await
            .map_err(|e| StoreError::Storage(format!("connect: {e}")))?;
        Ok(Self::new(pool))
    }

    /// Create the `jobs` table and its indexes if they do not exist.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }
}

fn status_from_db(s: &str) -> Result<JobStatus, StoreError> {
    match s {
        "PENDING" => Ok(JobStatus::Pending),
        "RUNNING" => Ok(JobStatus::Running),
        "COMPLETED" => Ok(JobStatus::Completed),
        "FAILED" => Ok(JobStatus::Failed),
        other => Err(StoreError::Storage(format!("unknown status in row: {other}"))),
    }
}

fn job_from_row(row: &PgRow) -> Result<Job, StoreError> {
    let status: String = row.get("status");
    let retry_count: i32 = row.get("retry_count");
    let max_retries: i32 = row.get("max_retries");
    Ok(Job {
        id: JobId::from_uuid(row.get::<Uuid, _>("id")),
        idempotency_key: row.get("idempotency_key"),
        user_id: row.get("user_id"),
        payload: row.get("payload"),
        status: status_from_db(&status)?,
        retry_count: retry_count.max(0) as u32,
        max_retries: max_retries.max(0) as u32,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        log_output: row.get("log_output"),
    })
}

fn map_sqlx_error(op: &str, e: sqlx::Error) -> StoreError {
    StoreError::Storage(format!("{op}: {e}"))
}

#[async_trait]
impl JobStore for PostgresJobStore {
    async fn insert(&self, job: Job) -> Result<JobId, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO jobs (id, idempotency_key, user_id, payload, status,
                              retry_count, max_retries, created_at, updated_at, log_output)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(job.id.as_uuid())
        .bind(&job.idempotency_key)
        .bind(&job.user_id)
        .bind(&job.payload)
        .bind(job.status.as_str())
        .bind(job.retry_count as i32)
        .bind(job.max_retries as i32)
        .bind(job.created_at)
        .bind(job.updated_at)
        .bind(&job.log_output)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(job.id),
            Err(sqlx::Error::Database(db)) if db.code().as_deref() == Some("23505") => {
                if db.constraint() == Some("jobs_idempotency_key_uniq") {
                    let key = job.idempotency_key.unwrap_or_default();
                    Err(StoreError::IdempotencyConflict(key))
                } else {
                    Err(StoreError::AlreadyExists(job.id))
                }
            }
            Err(e) => Err(map_sqlx_error("insert", e)),
        }
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("get", e))?;
        row.as_ref().map(job_from_row).transpose()
    }

    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Job>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE idempotency_key = $1"
        ))
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_by_idempotency_key", e))?;
        row.as_ref().map(job_from_row).transpose()
    }

    async fn update(&self, job: &Job) -> Result<(), StoreError> {
        // created_at is immutable; everything else is a full-record write.
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET idempotency_key = $2,
                user_id = $3,
                payload = $4,
                status = $5,
                retry_count = $6,
                max_retries = $7,
                updated_at = $8,
                log_output = $9
            WHERE id = $1
            "#,
        )
        .bind(job.id.as_uuid())
        .bind(&job.idempotency_key)
        .bind(&job.user_id)
        .bind(&job.payload)
        .bind(job.status.as_str())
        .bind(job.retry_count as i32)
        .bind(job.max_retries as i32)
        .bind(job.updated_at)
        .bind(&job.log_output)
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("update", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(job.id));
        }
        Ok(())
    }

    async fn claim_next_pending(&self) -> Result<Option<Job>, StoreError> {
        // SKIP LOCKED: contending claimants step over the locked row instead
        // of queueing behind it, and each row goes to exactly one claimant.
        let row = sqlx::query(&format!(
            r#"
            WITH next_job AS (
                SELECT id FROM jobs
                WHERE status = 'PENDING'
                ORDER BY created_at ASC, id ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE jobs
            SET status = 'RUNNING', updated_at = NOW()
            WHERE id IN (SELECT id FROM next_job)
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("claim_next_pending", e))?;
        row.as_ref().map(job_from_row).transpose()
    }

    async fn count_created_since(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM jobs WHERE user_id = $1 AND created_at >= $2",
        )
        .bind(user_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("count_created_since", e))?;
        Ok(count.max(0) as usize)
    }

    async fn count_in_flight(&self, user_id: &str) -> Result<usize, StoreError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM jobs WHERE user_id = $1 AND status IN ('PENDING', 'RUNNING')",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("count_in_flight", e))?;
        Ok(count.max(0) as usize)
    }

    async fn stats(&self) -> Result<JobStats, StoreError> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS count FROM jobs GROUP BY status")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("stats", e))?;

        let mut stats = JobStats::default();
        for row in rows {
            let status: String = row.get("status");
            let count: i64 = row.get("count");
            let count = count.max(0) as usize;
            match status_from_db(&status)? {
                JobStatus::Pending => stats.pending = count,
                JobStatus::Running => stats.running = count,
                JobStatus::Completed => stats.completed = count,
                JobStatus::Failed => stats.failed = count,
            }
        }
        Ok(stats)
    }

    async fn list_page(&self, page: usize, page_size: usize) -> Result<JobPage, StoreError> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM jobs")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_page", e))?;
        let total = total.max(0) as usize;

        let (current_page, total_pages) = page_bounds(total, page, page_size);
        let offset = (current_page - 1) * page_size;

        let rows = sqlx::query(&format!(
            r#"
            SELECT {JOB_COLUMNS} FROM jobs
            ORDER BY created_at DESC, id DESC
            LIMIT $1 OFFSET $2
            "#
        ))
        .bind(page_size as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_page", e))?;

        let mut summaries = Vec::with_capacity(rows.len());
        for row in &rows {
            summaries.push(JobSummary::from(&job_from_row(row)?));
        }

        Ok(JobPage {
            jobs: summaries,
            current_page,
            total_pages,
            has_next: current_page < total_pages,
            has_previous: current_page > 1,
        })
    }
}
