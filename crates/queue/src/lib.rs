//! Durable single-table job queue: lifecycle engine, lease protocol, and
//! admission control.
//!
//! ## Design
//!
//! - Jobs live in one store; all coordination between workers goes through
//!   the store's atomic claim primitive (no in-process shared state)
//! - At-least-once execution with idempotency-key dedup at submission
//! - Retry-on-failure up to `max_retries`, then the job is terminally FAILED
//! - Terminal jobs can be manually requeued or forced by an operator
//!
//! ## Components
//!
//! - [`Job`]: the sole entity, with its status state machine
//! - [`JobStore`]: persistence seam (in-memory, or Postgres behind the
//!   `postgres` feature)
//! - [`AdmissionController`]: idempotency / rate-limit / quota gate
//! - [`LeaseManager`]: claims exactly one PENDING job under contention
//! - [`ExecutionEngine`]: runs the task and applies retry policy
//! - [`Worker`]: lease + execute loop, the process entry point
//! - [`JobQueue`]: narrow facade consumed by an external request layer

pub mod admission;
pub mod execute;
pub mod job;
pub mod lease;
pub mod operator;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod service;
pub mod store;
pub mod worker;

pub use admission::{AdmissionController, SubmitError, SubmitOutcome};
pub use execute::{ExecutionEngine, SimulatedTaskRunner, TaskError, TaskRunner};
pub use job::{Job, JobStatus};
pub use lease::LeaseManager;
pub use operator::{OverrideAction, OverrideError};
#[cfg(feature = "postgres")]
pub use postgres::PostgresJobStore;
pub use service::{JobQueue, JobStatusView};
pub use store::{InMemoryJobStore, JobPage, JobStats, JobStore, JobSummary, StoreError};
pub use worker::{Worker, WorkerConfig, WorkerHandle};
