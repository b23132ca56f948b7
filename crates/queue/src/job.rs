//! The job entity and its status state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use conveyor_core::JobId;

/// Job execution status.
///
/// `PENDING → RUNNING → {COMPLETED, FAILED}`, with `RUNNING → PENDING` as the
/// retry loop-back. COMPLETED and FAILED are terminal: only an operator
/// override moves a job out of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Queued, waiting to be leased
    Pending,
    /// Claimed by a worker, currently executing
    Running,
    /// Finished successfully
    Completed,
    /// Exhausted retries (or forced by an operator)
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// PENDING or RUNNING — the states counted against a submitter's quota.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Running => "RUNNING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of work in the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique id, assigned at creation, immutable
    pub id: JobId,
    /// Optional client-supplied dedup token, unique store-wide when present
    pub idempotency_key: Option<String>,
    /// Submitter identity, used for rate/quota accounting
    pub user_id: String,
    /// Opaque JSON payload, interpreted only by the task runner
    pub payload: serde_json::Value,
    /// Current status
    pub status: JobStatus,
    /// Failed attempts so far; never exceeds `max_retries`
    pub retry_count: u32,
    /// Retry budget, fixed at creation
    pub max_retries: u32,
    /// Insertion time, immutable; defines FIFO lease order
    pub created_at: DateTime<Utc>,
    /// Bumped on every mutation
    pub updated_at: DateTime<Utc>,
    /// Human-readable trail of the most recent outcome/action
    pub log_output: String,
}

impl Job {
    pub const DEFAULT_MAX_RETRIES: u32 = 3;

    /// Create a new PENDING job.
    pub fn new(
        user_id: impl Into<String>,
        payload: serde_json::Value,
        idempotency_key: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            idempotency_key,
            user_id: user_id.into(),
            payload,
            status: JobStatus::Pending,
            retry_count: 0,
            max_retries: Self::DEFAULT_MAX_RETRIES,
            created_at: now,
            updated_at: now,
            log_output: String::new(),
        }
    }

    /// Override the retry budget.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Transition to RUNNING (lease claim).
    pub fn mark_running(&mut self) {
        self.status = JobStatus::Running;
        self.touch();
    }

    /// Successful execution: terminal COMPLETED.
    pub fn mark_completed(&mut self) {
        self.status = JobStatus::Completed;
        self.log_output = "Task completed successfully.".to_string();
        self.touch();
    }

    /// Failed execution: back to PENDING while the retry budget lasts,
    /// terminal FAILED once it is spent. A job at the cap never re-enters
    /// the lease pool.
    pub fn record_failure(&mut self, cause: &str) {
        if self.retry_count < self.max_retries {
            self.retry_count += 1;
            self.status = JobStatus::Pending;
            self.log_output = format!("Retry #{} failed due to: {cause}", self.retry_count);
        } else {
            self.status = JobStatus::Failed;
            self.log_output = format!("Max retries reached. Error: {cause}");
        }
        self.touch();
    }

    /// Operator requeue: terminal job back to PENDING with a fresh retry budget.
    pub fn requeue(&mut self) {
        self.status = JobStatus::Pending;
        self.retry_count = 0;
        self.log_output = format!(
            "Manually re-queued by operator at {}",
            Utc::now().format("%H:%M:%S")
        );
        self.touch();
    }

    /// Operator override to COMPLETED.
    pub fn force_success(&mut self) {
        self.status = JobStatus::Completed;
        self.log_output = format!(
            "Manually set to COMPLETED by operator at {}",
            Utc::now().format("%H:%M:%S")
        );
        self.touch();
    }

    /// Operator override to FAILED.
    pub fn force_fail(&mut self) {
        self.status = JobStatus::Failed;
        self.log_output = format!(
            "Manually marked as FAILED by operator at {}",
            Utc::now().format("%H:%M:%S")
        );
        self.touch();
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn new_job_is_pending_with_zero_retries() {
        let job = Job::new("alice", serde_json::json!({"duration": 1}), None);
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.retry_count, 0);
        assert_eq!(job.max_retries, Job::DEFAULT_MAX_RETRIES);
        assert_eq!(job.created_at, job.updated_at);
    }

    #[test]
    fn success_path() {
        let mut job = Job::new("alice", serde_json::json!({}), None);
        job.mark_running();
        assert_eq!(job.status, JobStatus::Running);
        job.mark_completed();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.log_output, "Task completed successfully.");
    }

    #[test]
    fn failure_consumes_retry_budget_then_dead_ends() {
        let mut job = Job::new("alice", serde_json::json!({}), None).with_max_retries(3);

        for attempt in 1..=3u32 {
            job.mark_running();
            job.record_failure("boom");
            assert_eq!(job.status, JobStatus::Pending);
            assert_eq!(job.retry_count, attempt);
            assert_eq!(
                job.log_output,
                format!("Retry #{attempt} failed due to: boom")
            );
        }

        job.mark_running();
        job.record_failure("boom");
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.retry_count, 3);
        assert_eq!(job.log_output, "Max retries reached. Error: boom");
    }

    #[test]
    fn requeue_resets_retry_count() {
        let mut job = Job::new("alice", serde_json::json!({}), None).with_max_retries(0);
        job.mark_running();
        job.record_failure("boom");
        assert_eq!(job.status, JobStatus::Failed);

        job.requeue();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.retry_count, 0);
        assert!(job.log_output.starts_with("Manually re-queued by operator at "));
    }

    #[test]
    fn status_serializes_screaming() {
        assert_eq!(
            serde_json::to_string(&JobStatus::Pending).unwrap(),
            "\"PENDING\""
        );
        assert_eq!(JobStatus::Failed.to_string(), "FAILED");
    }

    proptest! {
        /// Any interleaving of outcomes keeps `retry_count <= max_retries`
        /// and never leaves the job RUNNING after an outcome is recorded.
        #[test]
        fn outcome_sequences_respect_retry_bound(
            max_retries in 0u32..5,
            outcomes in proptest::collection::vec(any::<bool>(), 0..20),
        ) {
            let mut job = Job::new("prop", serde_json::json!({}), None)
                .with_max_retries(max_retries);

            for succeed in outcomes {
                if job.status != JobStatus::Pending {
                    break;
                }
                job.mark_running();
                if succeed {
                    job.mark_completed();
                } else {
                    job.record_failure("simulated");
                }
                prop_assert_ne!(job.status, JobStatus::Running);
                prop_assert!(job.retry_count <= job.max_retries);
            }
        }
    }
}
