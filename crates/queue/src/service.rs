//! Narrow facade over the queue for an external request layer.

use serde::Serialize;

use conveyor_core::JobId;

use crate::admission::{AdmissionController, SubmitError, SubmitOutcome};
use crate::job::JobStatus;
use crate::operator::{self, OverrideAction, OverrideError};
use crate::store::{JobPage, JobStats, JobStore, StoreError};

/// Dashboard page size, matching the reference frontend.
pub const PAGE_SIZE: usize = 10;

/// Status-query projection of a job.
#[derive(Debug, Clone, Serialize)]
pub struct JobStatusView {
    pub job_id: JobId,
    pub status: JobStatus,
    pub retries: u32,
    pub result: String,
}

/// The queue's public surface: submit, status, override, stats, list.
///
/// An HTTP layer (out of scope here) maps these 1:1 onto endpoints; workers
/// bypass this facade and drive [`crate::LeaseManager`] +
/// [`crate::ExecutionEngine`] directly.
#[derive(Debug, Clone)]
pub struct JobQueue<S> {
    store: S,
    admission: AdmissionController<S>,
}

impl<S: JobStore + Clone> JobQueue<S> {
    pub fn new(store: S) -> Self {
        Self {
            admission: AdmissionController::new(store.clone()),
            store,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Submit a job through admission control.
    pub async fn submit(
        &self,
        user_id: &str,
        payload: serde_json::Value,
        idempotency_key: Option<String>,
    ) -> Result<SubmitOutcome, SubmitError> {
        self.admission.submit(user_id, payload, idempotency_key).await
    }

    /// Current status of a job, or `None` if it does not exist.
    pub async fn status(&self, job_id: JobId) -> Result<Option<JobStatusView>, StoreError> {
        Ok(self.store.get(job_id).await?.map(|job| JobStatusView {
            job_id: job.id,
            status: job.status,
            retries: job.retry_count,
            result: job.log_output,
        }))
    }

    /// Manually override a terminal job.
    pub async fn apply_override(
        &self,
        job_id: JobId,
        action: OverrideAction,
    ) -> Result<JobStatus, OverrideError> {
        operator::apply_override(&self.store, job_id, action).await
    }

    /// Per-status counts.
    pub async fn stats(&self) -> Result<JobStats, StoreError> {
        self.store.stats().await
    }

    /// Recency-ordered page of job summaries (1-based page number).
    pub async fn list(&self, page: usize) -> Result<JobPage, StoreError> {
        self.store.list_page(page, PAGE_SIZE).await
    }
}
