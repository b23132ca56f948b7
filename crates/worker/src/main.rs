//! Worker process entry point: spawn N worker loops against the job store.
//!
//! Configuration is environment-driven:
//!
//! - `CONVEYOR_WORKERS` — number of worker loops (default 1)
//! - `CONVEYOR_POLL_INTERVAL_MS` — idle poll interval (default 2000)
//! - `DATABASE_URL` — Postgres store (requires the `postgres` feature);
//!   without it the process runs against an in-memory store, which is only
//!   useful for local experiments since submissions must come from the same
//!   process.

use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use tracing::info;

use conveyor_queue::{JobStore, SimulatedTaskRunner, Worker, WorkerConfig, WorkerHandle};

#[derive(Debug, Clone)]
struct AppConfig {
    workers: usize,
    poll_interval: Duration,
}

impl AppConfig {
    fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            workers: env_or("CONVEYOR_WORKERS", 1)?,
            poll_interval: Duration::from_millis(env_or("CONVEYOR_POLL_INTERVAL_MS", 2000)?),
        })
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw.parse().with_context(|| format!("invalid {key}: {raw}")),
        Err(_) => Ok(default),
    }
}

async fn run_workers<S>(store: S, config: &AppConfig) -> anyhow::Result<()>
where
    S: JobStore + Clone + 'static,
{
    let handles: Vec<WorkerHandle> = (0..config.workers)
        .map(|i| {
            Worker::spawn(
                store.clone(),
                SimulatedTaskRunner,
                WorkerConfig::default()
                    .with_name(format!("worker-{i}"))
                    .with_poll_interval(config.poll_interval),
            )
        })
        .collect();

    info!(workers = config.workers, "worker pool running");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown requested");

    for handle in handles {
        handle.shutdown().await;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    conveyor_observability::init();
    let config = AppConfig::from_env()?;

    #[cfg(feature = "postgres")]
    if let Ok(url) = std::env::var("DATABASE_URL") {
        let store = conveyor_queue::PostgresJobStore::connect(&url)
            .await
            .context("failed to connect to Postgres")?;
        store
            .ensure_schema()
            .await
            .context("failed to ensure jobs schema")?;
        info!("using Postgres job store");
        return run_workers(store, &config).await;
    }

    info!("using in-memory job store");
    run_workers(conveyor_queue::InMemoryJobStore::arc(), &config).await
}
