//! Execution engine: run the claimed job's task and apply retry policy.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{error, info, warn};

use crate::job::{Job, JobStatus};
use crate::store::{JobStore, StoreError};

/// Fault raised by a task.
///
/// Task faults are the one locally-recovered error class: the engine converts
/// them into a PENDING (retry) or FAILED (terminal) transition and they never
/// propagate to a caller.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TaskError {
    #[error("Simulated Task Failure")]
    Simulated,
    #[error("malformed payload: {0}")]
    Payload(String),
}

/// A task body, polymorphic over the payload.
///
/// Real task types substitute here without touching the state machine.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    async fn run(&self, payload: &serde_json::Value) -> Result<(), TaskError>;
}

fn default_duration() -> f64 {
    2.0
}

#[derive(Debug, Deserialize)]
struct SimulatedSpec {
    #[serde(default = "default_duration")]
    duration: f64,
    #[serde(default)]
    fail_simulation: bool,
}

/// Stub task standing in for real work: wait `payload.duration` seconds
/// (default 2), faulting first when `payload.fail_simulation` is set.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimulatedTaskRunner;

#[async_trait]
impl TaskRunner for SimulatedTaskRunner {
    async fn run(&self, payload: &serde_json::Value) -> Result<(), TaskError> {
        let spec: SimulatedSpec = serde_json::from_value(payload.clone())
            .map_err(|e| TaskError::Payload(e.to_string()))?;

        if spec.fail_simulation {
            return Err(TaskError::Simulated);
        }

        // try_from: an absurd duration is a payload fault, not a panic that
        // would strand the job in RUNNING.
        let wait = Duration::try_from_secs_f64(spec.duration.max(0.0))
            .map_err(|e| TaskError::Payload(format!("duration out of range: {e}")))?;
        tokio::time::sleep(wait).await;
        Ok(())
    }
}

/// Runs a claimed job and persists the outcome.
#[derive(Debug, Clone)]
pub struct ExecutionEngine<S, R> {
    store: S,
    runner: R,
}

impl<S: JobStore, R: TaskRunner> ExecutionEngine<S, R> {
    pub fn new(store: S, runner: R) -> Self {
        Self { store, runner }
    }

    /// Execute a RUNNING job to its next state and persist it.
    ///
    /// The job is never left RUNNING after this returns: success lands on
    /// COMPLETED, a fault lands on PENDING (retry) or FAILED (budget spent).
    /// Only store failures propagate; they are fatal to this call and the job
    /// outcome is then unrecorded (at-least-once semantics).
    pub async fn execute(&self, mut job: Job) -> Result<Job, StoreError> {
        info!(job_id = %job.id, "executing task");

        match self.runner.run(&job.payload).await {
            Ok(()) => {
                job.mark_completed();
                info!(job_id = %job.id, "job completed");
            }
            Err(fault) => {
                job.record_failure(&fault.to_string());
                match job.status {
                    JobStatus::Pending => warn!(
                        job_id = %job.id,
                        retry = job.retry_count,
                        error = %fault,
                        "task failed, requeued for retry"
                    ),
                    _ => error!(
                        job_id = %job.id,
                        retries = job.retry_count,
                        error = %fault,
                        "task failed, max retries reached"
                    ),
                }
            }
        }

        self.store.update(&job).await?;
        Ok(job)
    }
}
