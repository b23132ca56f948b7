//! Operator override: manual transitions out of terminal states.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::info;

use conveyor_core::JobId;

use crate::job::JobStatus;
use crate::store::{JobStore, StoreError};

/// Manual action on a terminal (COMPLETED/FAILED) job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OverrideAction {
    /// Back to PENDING with a fresh retry budget
    Requeue,
    /// Force terminal COMPLETED
    ForceSuccess,
    /// Force terminal FAILED
    ForceFail,
}

impl FromStr for OverrideAction {
    type Err = OverrideError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "REQUEUE" => Ok(OverrideAction::Requeue),
            "FORCE_SUCCESS" => Ok(OverrideAction::ForceSuccess),
            "FORCE_FAIL" => Ok(OverrideAction::ForceFail),
            other => Err(OverrideError::InvalidAction(other.to_string())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OverrideError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("job must be COMPLETED or FAILED to override (currently {0})")]
    InvalidTransition(JobStatus),
    #[error("invalid action: {0}")]
    InvalidAction(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Apply a manual override and persist it, returning the job's new status.
///
/// PENDING and RUNNING jobs are not overridable; the attempt is rejected
/// without mutation.
pub async fn apply_override<S: JobStore>(
    store: &S,
    job_id: JobId,
    action: OverrideAction,
) -> Result<JobStatus, OverrideError> {
    let mut job = store
        .get(job_id)
        .await?
        .ok_or(OverrideError::NotFound(job_id))?;

    if !job.status.is_terminal() {
        return Err(OverrideError::InvalidTransition(job.status));
    }

    match action {
        OverrideAction::Requeue => job.requeue(),
        OverrideAction::ForceSuccess => job.force_success(),
        OverrideAction::ForceFail => job.force_fail(),
    }

    store.update(&job).await?;
    info!(job_id = %job.id, action = ?action, status = %job.status, "operator override applied");
    Ok(job.status)
}
