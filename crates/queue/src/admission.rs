//! Admission control: idempotency replay, rate limit, concurrency quota.

use chrono::{Duration, Utc};
use tracing::{debug, info};

use conveyor_core::JobId;

use crate::job::Job;
use crate::store::{JobStore, StoreError};

/// Max jobs a submitter may create inside the trailing window.
pub const RATE_LIMIT_MAX_PER_WINDOW: usize = 10;
/// Sliding rate-limit window, in seconds.
pub const RATE_LIMIT_WINDOW_SECS: i64 = 60;
/// Max simultaneously in-flight (PENDING + RUNNING) jobs per submitter.
pub const QUOTA_MAX_IN_FLIGHT: usize = 5;

/// Rejection or infrastructure failure during submission.
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("rate limit exceeded (10/min)")]
    RateLimited,
    #[error("quota exceeded (max 5 concurrent)")]
    QuotaExceeded,
    #[error("invalid submission: {0}")]
    InvalidInput(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Accepted submission: either a fresh insert or an idempotent replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// A new job was created
    Submitted(JobId),
    /// An earlier job already holds this idempotency key
    Existing(JobId),
}

impl SubmitOutcome {
    pub fn job_id(&self) -> JobId {
        match self {
            SubmitOutcome::Submitted(id) | SubmitOutcome::Existing(id) => *id,
        }
    }
}

/// Gates submissions before a job enters the store.
///
/// The rate/quota checks are advisory snapshots (read-then-act, no store-wide
/// lock), so heavy concurrent submission from one user can admit slightly
/// more than the nominal limits. The idempotency check, by contrast, is
/// backed by the store's uniqueness guarantee: a lost insert race is resolved
/// by re-reading the winner.
#[derive(Debug, Clone)]
pub struct AdmissionController<S> {
    store: S,
}

impl<S: JobStore> AdmissionController<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Validate and admit a submission.
    pub async fn submit(
        &self,
        user_id: &str,
        payload: serde_json::Value,
        idempotency_key: Option<String>,
    ) -> Result<SubmitOutcome, SubmitError> {
        if user_id.trim().is_empty() {
            return Err(SubmitError::InvalidInput("user_id must not be empty".into()));
        }

        if let Some(key) = &idempotency_key {
            if let Some(existing) = self.store.find_by_idempotency_key(key).await? {
                debug!(job_id = %existing.id, key, "idempotent replay");
                return Ok(SubmitOutcome::Existing(existing.id));
            }
        }

        let window_start = Utc::now() - Duration::seconds(RATE_LIMIT_WINDOW_SECS);
        if self.store.count_created_since(user_id, window_start).await?
            >= RATE_LIMIT_MAX_PER_WINDOW
        {
            return Err(SubmitError::RateLimited);
        }

        if self.store.count_in_flight(user_id).await? >= QUOTA_MAX_IN_FLIGHT {
            return Err(SubmitError::QuotaExceeded);
        }

        let job = Job::new(user_id, payload, idempotency_key);
        match self.store.insert(job).await {
            Ok(id) => {
                info!(job_id = %id, user_id, "job submitted");
                Ok(SubmitOutcome::Submitted(id))
            }
            // Two submitters raced on the same key; the store's uniqueness
            // constraint picked a winner. Replay it.
            Err(StoreError::IdempotencyConflict(key)) => {
                let existing = self
                    .store
                    .find_by_idempotency_key(&key)
                    .await?
                    .ok_or_else(|| {
                        StoreError::Storage(format!(
                            "idempotency key {key} conflicted but no job holds it"
                        ))
                    })?;
                debug!(job_id = %existing.id, key, "idempotent replay after insert race");
                Ok(SubmitOutcome::Existing(existing.id))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use chrono::Utc;

    use super::*;
    use crate::job::JobStatus;
    use crate::store::InMemoryJobStore;

    fn controller() -> AdmissionController<std::sync::Arc<InMemoryJobStore>> {
        AdmissionController::new(InMemoryJobStore::arc())
    }

    #[tokio::test]
    async fn submit_inserts_pending_job() {
        let admission = controller();
        let outcome = admission
            .submit("alice", serde_json::json!({"duration": 1}), None)
            .await
            .unwrap();

        let SubmitOutcome::Submitted(id) = outcome else {
            panic!("expected a fresh submission, got {outcome:?}");
        };
        let job = admission.store.get(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.retry_count, 0);
    }

    #[tokio::test]
    async fn same_key_replays_same_job_even_with_different_payload() {
        let admission = controller();

        let first = admission
            .submit("alice", serde_json::json!({"duration": 1}), Some("k".into()))
            .await
            .unwrap();
        let second = admission
            .submit("alice", serde_json::json!({"duration": 99}), Some("k".into()))
            .await
            .unwrap();

        assert!(matches!(first, SubmitOutcome::Submitted(_)));
        assert!(matches!(second, SubmitOutcome::Existing(_)));
        assert_eq!(first.job_id(), second.job_id());

        // Only one record exists, with the original payload.
        let job = admission.store.get(first.job_id()).await.unwrap().unwrap();
        assert_eq!(job.payload, serde_json::json!({"duration": 1}));
        assert_eq!(admission.store.stats().await.unwrap().pending, 1);
    }

    #[tokio::test]
    async fn eleventh_submission_in_window_is_rate_limited() {
        let admission = controller();

        // 10 in-window submissions fit under the quota only if most of them
        // are already resolved; park them as COMPLETED.
        for i in 0..10 {
            let id = admission
                .submit("alice", serde_json::json!({}), None)
                .await
                .unwrap()
                .job_id();
            if i < 9 {
                let mut job = admission.store.get(id).await.unwrap().unwrap();
                job.mark_running();
                job.mark_completed();
                admission.store.update(&job).await.unwrap();
            }
        }

        assert!(matches!(
            admission.submit("alice", serde_json::json!({}), None).await,
            Err(SubmitError::RateLimited)
        ));

        // Other users are unaffected.
        assert!(admission.submit("bob", serde_json::json!({}), None).await.is_ok());
    }

    #[tokio::test]
    async fn rate_limit_window_slides() {
        let admission = controller();

        // 10 jobs whose creation has slid out of the 60s window.
        for _ in 0..10 {
            let mut job = Job::new("alice", serde_json::json!({}), None);
            job.created_at = Utc::now() - Duration::seconds(RATE_LIMIT_WINDOW_SECS + 5);
            job.mark_running();
            job.mark_completed();
            admission.store.insert(job).await.unwrap();
        }

        assert!(matches!(
            admission.submit("alice", serde_json::json!({}), None).await,
            Ok(SubmitOutcome::Submitted(_))
        ));
    }

    #[tokio::test]
    async fn quota_counts_pending_and_running() {
        let admission = controller();

        for _ in 0..QUOTA_MAX_IN_FLIGHT {
            admission.submit("alice", serde_json::json!({}), None).await.unwrap();
        }
        // One of the five is RUNNING now; still in flight.
        admission.store.claim_next_pending().await.unwrap().unwrap();

        assert!(matches!(
            admission.submit("alice", serde_json::json!({}), None).await,
            Err(SubmitError::QuotaExceeded)
        ));

        // Resolving one frees a slot.
        let mut job = admission.store.claim_next_pending().await.unwrap().unwrap();
        job.mark_completed();
        admission.store.update(&job).await.unwrap();

        assert!(admission.submit("alice", serde_json::json!({}), None).await.is_ok());
    }

    #[tokio::test]
    async fn empty_user_id_is_invalid() {
        let admission = controller();
        assert!(matches!(
            admission.submit("  ", serde_json::json!({}), None).await,
            Err(SubmitError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn rejection_leaves_no_record() {
        let admission = controller();
        for _ in 0..QUOTA_MAX_IN_FLIGHT {
            admission.submit("alice", serde_json::json!({}), None).await.unwrap();
        }
        let before = admission.store.stats().await.unwrap();
        let _ = admission.submit("alice", serde_json::json!({}), None).await;
        assert_eq!(admission.store.stats().await.unwrap(), before);
    }
}
