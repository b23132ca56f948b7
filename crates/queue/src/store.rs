//! Job storage: the persistence seam and the in-memory implementation.
//!
//! All worker coordination goes through [`JobStore::claim_next_pending`]; it
//! must hand each PENDING job to at most one caller, no matter how many
//! claimants race. The in-memory store serializes claims behind a single
//! write lock; the Postgres store (see `postgres` module) uses
//! `FOR UPDATE SKIP LOCKED` row locking.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use conveyor_core::JobId;

use crate::job::{Job, JobStatus};

/// Job store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("job already exists: {0}")]
    AlreadyExists(JobId),
    #[error("idempotency key already in use: {0}")]
    IdempotencyConflict(String),
    #[error("storage error: {0}")]
    Storage(String),
}

/// Per-status job counts.
///
/// Serializes keyed by the wire status strings, so the dashboard JSON reads
/// `{"PENDING": n, ...}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct JobStats {
    #[serde(rename = "PENDING")]
    pub pending: usize,
    #[serde(rename = "RUNNING")]
    pub running: usize,
    #[serde(rename = "COMPLETED")]
    pub completed: usize,
    #[serde(rename = "FAILED")]
    pub failed: usize,
}

impl JobStats {
    pub fn record(&mut self, status: JobStatus) {
        match status {
            JobStatus::Pending => self.pending += 1,
            JobStatus::Running => self.running += 1,
            JobStatus::Completed => self.completed += 1,
            JobStatus::Failed => self.failed += 1,
        }
    }
}

/// Dashboard-facing projection of a job.
#[derive(Debug, Clone, serde::Serialize)]
pub struct JobSummary {
    pub id: JobId,
    pub status: JobStatus,
    pub retry_count: u32,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub log_output: String,
}

impl From<&Job> for JobSummary {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id,
            status: job.status,
            retry_count: job.retry_count,
            user_id: job.user_id.clone(),
            created_at: job.created_at,
            log_output: job.log_output.clone(),
        }
    }
}

/// One page of recency-ordered job summaries.
#[derive(Debug, Clone, serde::Serialize)]
pub struct JobPage {
    pub jobs: Vec<JobSummary>,
    pub current_page: usize,
    pub total_pages: usize,
    pub has_next: bool,
    pub has_previous: bool,
}

/// Clamp a 1-based page number against the total record count.
///
/// Out-of-range requests land on the nearest valid page (an empty store still
/// has one, empty, page) rather than erroring.
pub(crate) fn page_bounds(total: usize, page: usize, page_size: usize) -> (usize, usize) {
    let total_pages = total.div_ceil(page_size).max(1);
    let current_page = page.clamp(1, total_pages);
    (current_page, total_pages)
}

/// Job store abstraction.
///
/// Mutations are atomic per row; concurrent claims serialize on the claim
/// operation only.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Durably create a job. Fails with [`StoreError::IdempotencyConflict`]
    /// when the job carries a key another record already holds.
    async fn insert(&self, job: Job) -> Result<JobId, StoreError>;

    /// Point read by id.
    async fn get(&self, id: JobId) -> Result<Option<Job>, StoreError>;

    /// Point read by idempotency key.
    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Job>, StoreError>;

    /// Full-record update of an existing job.
    async fn update(&self, job: &Job) -> Result<(), StoreError>;

    /// Atomically select the oldest PENDING job (ties by id), mark it
    /// RUNNING, persist, and return it. `None` when the queue is idle.
    async fn claim_next_pending(&self) -> Result<Option<Job>, StoreError>;

    /// Jobs created by `user_id` at or after `since` (rate-limit window).
    async fn count_created_since(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> Result<usize, StoreError>;

    /// Jobs by `user_id` currently PENDING or RUNNING (quota accounting).
    async fn count_in_flight(&self, user_id: &str) -> Result<usize, StoreError>;

    /// Per-status counts over the whole store.
    async fn stats(&self) -> Result<JobStats, StoreError>;

    /// Page of summaries ordered by `created_at` descending (1-based page).
    async fn list_page(&self, page: usize, page_size: usize) -> Result<JobPage, StoreError>;
}

#[async_trait]
impl<T: JobStore + ?Sized> JobStore for Arc<T> {
    async fn insert(&self, job: Job) -> Result<JobId, StoreError> {
        (**self).insert(job).await
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        (**self).get(id).await
    }

    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Job>, StoreError> {
        (**self).find_by_idempotency_key(key).await
    }

    async fn update(&self, job: &Job) -> Result<(), StoreError> {
        (**self).update(job).await
    }

    async fn claim_next_pending(&self) -> Result<Option<Job>, StoreError> {
        (**self).claim_next_pending().await
    }

    async fn count_created_since(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        (**self).count_created_since(user_id, since).await
    }

    async fn count_in_flight(&self, user_id: &str) -> Result<usize, StoreError> {
        (**self).count_in_flight(user_id).await
    }

    async fn stats(&self) -> Result<JobStats, StoreError> {
        (**self).stats().await
    }

    async fn list_page(&self, page: usize, page_size: usize) -> Result<JobPage, StoreError> {
        (**self).list_page(page, page_size).await
    }
}

/// In-memory job store for tests/dev.
///
/// A single `RwLock` guards the table: claims take the write lock for the
/// whole read-modify-write, which is what gives them mutual exclusion.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<JobId, Job>> {
        self.jobs.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<JobId, Job>> {
        self.jobs.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert(&self, job: Job) -> Result<JobId, StoreError> {
        let mut jobs = self.write();
        if jobs.contains_key(&job.id) {
            return Err(StoreError::AlreadyExists(job.id));
        }
        if let Some(key) = &job.idempotency_key {
            if jobs.values().any(|j| j.idempotency_key.as_deref() == Some(key)) {
                return Err(StoreError::IdempotencyConflict(key.clone()));
            }
        }
        let id = job.id;
        jobs.insert(id, job);
        Ok(id)
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>, StoreError> {
        Ok(self.read().get(&id).cloned())
    }

    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Job>, StoreError> {
        Ok(self
            .read()
            .values()
            .find(|j| j.idempotency_key.as_deref() == Some(key))
            .cloned())
    }

    async fn update(&self, job: &Job) -> Result<(), StoreError> {
        let mut jobs = self.write();
        if !jobs.contains_key(&job.id) {
            return Err(StoreError::NotFound(job.id));
        }
        jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn claim_next_pending(&self) -> Result<Option<Job>, StoreError> {
        // Write lock held for the full read-modify-write: no two claimants
        // can observe the same job as PENDING.
        let mut jobs = self.write();

        let next = jobs
            .values()
            .filter(|j| j.status == JobStatus::Pending)
            .map(|j| (j.created_at, j.id))
            .min();

        if let Some((_, id)) = next {
            if let Some(job) = jobs.get_mut(&id) {
                job.mark_running();
                return Ok(Some(job.clone()));
            }
        }

        Ok(None)
    }

    async fn count_created_since(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        Ok(self
            .read()
            .values()
            .filter(|j| j.user_id == user_id && j.created_at >= since)
            .count())
    }

    async fn count_in_flight(&self, user_id: &str) -> Result<usize, StoreError> {
        Ok(self
            .read()
            .values()
            .filter(|j| j.user_id == user_id && j.status.is_in_flight())
            .count())
    }

    async fn stats(&self) -> Result<JobStats, StoreError> {
        let jobs = self.read();
        let mut stats = JobStats::default();
        for job in jobs.values() {
            stats.record(job.status);
        }
        Ok(stats)
    }

    async fn list_page(&self, page: usize, page_size: usize) -> Result<JobPage, StoreError> {
        let jobs = self.read();
        let mut all: Vec<&Job> = jobs.values().collect();
        // Recency first; id tiebreak keeps pagination stable.
        all.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));

        let (current_page, total_pages) = page_bounds(all.len(), page, page_size);
        let start = (current_page - 1) * page_size;
        let summaries = all
            .iter()
            .skip(start)
            .take(page_size)
            .map(|j| JobSummary::from(*j))
            .collect();

        Ok(JobPage {
            jobs: summaries,
            current_page,
            total_pages,
            has_next: current_page < total_pages,
            has_previous: current_page > 1,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn job_for(user: &str) -> Job {
        Job::new(user, serde_json::json!({}), None)
    }

    #[tokio::test]
    async fn insert_and_get() {
        let store = InMemoryJobStore::new();
        let job = job_for("alice");
        let id = store.insert(job).await.unwrap();

        let fetched = store.get(id).await.unwrap().unwrap();
        assert_eq!(fetched.id, id);
        assert_eq!(fetched.status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn duplicate_idempotency_key_is_rejected() {
        let store = InMemoryJobStore::new();
        let first = Job::new("alice", serde_json::json!({}), Some("key-1".into()));
        store.insert(first).await.unwrap();

        let second = Job::new("bob", serde_json::json!({}), Some("key-1".into()));
        assert!(matches!(
            store.insert(second).await,
            Err(StoreError::IdempotencyConflict(k)) if k == "key-1"
        ));

        let found = store.find_by_idempotency_key("key-1").await.unwrap().unwrap();
        assert_eq!(found.user_id, "alice");
    }

    #[tokio::test]
    async fn claim_is_fifo_by_created_at() {
        let store = InMemoryJobStore::new();
        let base = Utc::now();

        let mut ids = Vec::new();
        for i in 0..3 {
            let mut job = job_for("alice");
            job.created_at = base + Duration::seconds(i);
            ids.push(store.insert(job).await.unwrap());
        }

        for expected in &ids {
            let claimed = store.claim_next_pending().await.unwrap().unwrap();
            assert_eq!(claimed.id, *expected);
            assert_eq!(claimed.status, JobStatus::Running);
        }
        assert!(store.claim_next_pending().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn claim_breaks_created_at_ties_by_id() {
        let store = InMemoryJobStore::new();
        let instant = Utc::now();

        let mut a = job_for("alice");
        let mut b = job_for("alice");
        a.created_at = instant;
        b.created_at = instant;
        let (first, second) = if a.id < b.id { (a.id, b.id) } else { (b.id, a.id) };
        store.insert(a).await.unwrap();
        store.insert(b).await.unwrap();

        assert_eq!(store.claim_next_pending().await.unwrap().unwrap().id, first);
        assert_eq!(store.claim_next_pending().await.unwrap().unwrap().id, second);
    }

    #[tokio::test]
    async fn update_requires_existing_row() {
        let store = InMemoryJobStore::new();
        let job = job_for("alice");
        assert!(matches!(
            store.update(&job).await,
            Err(StoreError::NotFound(id)) if id == job.id
        ));
    }

    #[tokio::test]
    async fn stats_count_by_status() {
        let store = InMemoryJobStore::new();
        for _ in 0..3 {
            store.insert(job_for("alice")).await.unwrap();
        }
        store.claim_next_pending().await.unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.pending, 2);
        assert_eq!(stats.running, 1);
        assert_eq!(stats.completed, 0);
        assert_eq!(stats.failed, 0);
    }

    #[tokio::test]
    async fn stats_serialize_keyed_by_status_string() {
        let store = InMemoryJobStore::new();
        store.insert(job_for("alice")).await.unwrap();
        store.insert(job_for("alice")).await.unwrap();
        store.claim_next_pending().await.unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(
            serde_json::to_value(&stats).unwrap(),
            serde_json::json!({"PENDING": 1, "RUNNING": 1, "COMPLETED": 0, "FAILED": 0})
        );
    }

    #[tokio::test]
    async fn list_page_is_recency_ordered_and_clamped() {
        let store = InMemoryJobStore::new();
        let base = Utc::now();
        for i in 0..25 {
            let mut job = job_for("alice");
            job.created_at = base + Duration::seconds(i);
            store.insert(job).await.unwrap();
        }

        let page = store.list_page(1, 10).await.unwrap();
        assert_eq!(page.jobs.len(), 10);
        assert_eq!(page.total_pages, 3);
        assert!(page.has_next);
        assert!(!page.has_previous);
        // Newest first.
        assert_eq!(page.jobs[0].created_at, base + Duration::seconds(24));

        let last = store.list_page(99, 10).await.unwrap();
        assert_eq!(last.current_page, 3);
        assert_eq!(last.jobs.len(), 5);
        assert!(!last.has_next);
        assert!(last.has_previous);
    }

    #[tokio::test]
    async fn empty_store_has_one_empty_page() {
        let store = InMemoryJobStore::new();
        let page = store.list_page(1, 10).await.unwrap();
        assert!(page.jobs.is_empty());
        assert_eq!(page.current_page, 1);
        assert_eq!(page.total_pages, 1);
        assert!(!page.has_next);
        assert!(!page.has_previous);
    }
}
