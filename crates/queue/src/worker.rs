//! Worker loop: lease + execute, repeated until shutdown.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::execute::{ExecutionEngine, TaskRunner};
use crate::lease::LeaseManager;
use crate::store::JobStore;

/// Worker loop tuning.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// How long to suspend when the queue is idle
    pub poll_interval: Duration,
    /// Name for logging
    pub name: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            name: "worker".to_string(),
        }
    }
}

impl WorkerConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// Handle to control and join a spawned worker.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    /// Request graceful shutdown and wait for the worker to stop.
    ///
    /// A job mid-execution finishes first; the loop only checks the signal
    /// between jobs.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.join.await;
    }
}

/// Spawns worker loops.
///
/// Workers are structurally identical and share nothing in-process; all
/// coordination goes through the store's claim primitive. Horizontal scaling
/// is more workers, not a concurrent worker.
#[derive(Debug)]
pub struct Worker;

impl Worker {
    pub fn spawn<S, R>(store: S, runner: R, config: WorkerConfig) -> WorkerHandle
    where
        S: JobStore + Clone + 'static,
        R: TaskRunner + 'static,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(worker_loop(store, runner, config, shutdown_rx));
        WorkerHandle {
            shutdown: shutdown_tx,
            join,
        }
    }
}

async fn worker_loop<S, R>(
    store: S,
    runner: R,
    config: WorkerConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) where
    S: JobStore + Clone,
    R: TaskRunner,
{
    info!(worker = %config.name, "worker started, waiting for tasks");

    let lease = LeaseManager::new(store.clone());
    let engine = ExecutionEngine::new(store, runner);

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        match lease.lease_next().await {
            Ok(Some(job)) => {
                // One job drains this worker's timeline; the outcome is
                // persisted by the engine, store failures are fatal only to
                // this attempt.
                if let Err(e) = engine.execute(job).await {
                    error!(worker = %config.name, error = %e, "failed to persist job outcome");
                }
            }
            Ok(None) => idle(&mut shutdown_rx, config.poll_interval).await,
            Err(e) => {
                error!(worker = %config.name, error = %e, "failed to claim job");
                idle(&mut shutdown_rx, config.poll_interval).await;
            }
        }
    }

    info!(worker = %config.name, "worker stopped");
}

/// Sleep for the poll interval, waking early on shutdown.
async fn idle(shutdown_rx: &mut watch::Receiver<bool>, interval: Duration) {
    tokio::select! {
        _ = shutdown_rx.changed() => {}
        _ = tokio::time::sleep(interval) => {}
    }
}
