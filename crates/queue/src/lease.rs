//! Lease protocol: claim exactly one PENDING job per call under contention.

use tracing::debug;

use crate::job::Job;
use crate::store::{JobStore, StoreError};

/// Claims jobs for execution.
///
/// The atomicity lives in [`JobStore::claim_next_pending`]; this type is the
/// call site workers drive, and where claims get traced. The claim lock is
/// held only for the read-modify-write, never for the job's execution.
#[derive(Debug, Clone)]
pub struct LeaseManager<S> {
    store: S,
}

impl<S: JobStore> LeaseManager<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Lease the oldest PENDING job, transitioning it to RUNNING.
    ///
    /// Under N concurrent callers each PENDING job is returned to at most one
    /// of them. `Ok(None)` means the queue is idle; callers poll/backoff.
    pub async fn lease_next(&self) -> Result<Option<Job>, StoreError> {
        let claimed = self.store.claim_next_pending().await?;
        if let Some(job) = &claimed {
            debug!(job_id = %job.id, user_id = %job.user_id, "claimed job");
        }
        Ok(claimed)
    }
}
