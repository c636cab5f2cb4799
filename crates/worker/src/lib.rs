//! Background ingestion worker.
//!
//! Wires a [`PipelineState`] against Postgres and runs its long-lived loops:
//! the import processor, the process queue consumer, the edge queue worker
//! and the import audit log. Every loop stops on the shared cancellation token.

use std::sync::Arc;
use std::time::Duration;

use strata_db::DbPool;
use strata_events::{EventBus, ImportAuditLog};
use strata_pipeline::blob::PgBlobStore;
use strata_pipeline::config::ConfigError as IngestConfigError;
use strata_pipeline::ontology::PgOntology;
use strata_pipeline::process_queue::{ChannelQueue, ProcessJob};
use strata_pipeline::{IngestConfig, PipelineState};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{var} must be {expected}, got `{value}`")]
    Invalid {
        var: &'static str,
        value: String,
        expected: &'static str,
    },

    #[error(transparent)]
    Ingest(#[from] IngestConfigError),
}

/// Process-level settings of the worker binary.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub database_url: String,
    /// Capacity of the in-process queue between ingress and the processor.
    pub process_queue_capacity: usize,
    /// How long shutdown waits for each loop to finish.
    pub shutdown_timeout: Duration,
    pub ingest: IngestConfig,
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                   | Default  |
    /// |---------------------------|----------|
    /// | `DATABASE_URL`            | required |
    /// | `PROCESS_QUEUE_CAPACITY`  | `1024`   |
    /// | `SHUTDOWN_TIMEOUT_SECS`   | `10`     |
    ///
    /// Ingestion knobs are read by [`IngestConfig::from_env`].
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let database_url = lookup("DATABASE_URL")
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let positive = |var: &'static str, default: u64| -> Result<u64, ConfigError> {
            match lookup(var) {
                None => Ok(default),
                Some(raw) => match raw.trim().parse::<u64>() {
                    Ok(v) if v > 0 => Ok(v),
                    _ => Err(ConfigError::Invalid {
                        var,
                        value: raw,
                        expected: "a positive integer",
                    }),
                },
            }
        };

        let capacity = positive("PROCESS_QUEUE_CAPACITY", 1024)?;
        Ok(Self {
            database_url,
            process_queue_capacity: usize::try_from(capacity).unwrap_or(usize::MAX),
            shutdown_timeout: Duration::from_secs(positive("SHUTDOWN_TIMEOUT_SECS", 10)?),
            ingest: IngestConfig::from_lookup(&lookup)?,
        })
    }
}

/// The running loops of one worker process.
pub struct Worker {
    pub state: PipelineState,
    cancel: CancellationToken,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl Worker {
    /// Build the pipeline on `pool` and spawn every loop.
    pub fn start(pool: DbPool, config: &WorkerConfig) -> Self {
        let (queue, jobs) = ChannelQueue::new(config.process_queue_capacity);
        let events = Arc::new(EventBus::default());
        let state = PipelineState::new(
            pool.clone(),
            config.ingest.clone(),
            Arc::new(PgOntology::new(pool)),
            Arc::new(PgBlobStore),
            Arc::new(queue),
            events,
        );
        Self::spawn(state, jobs)
    }

    /// Spawn the loops of an already wired pipeline.
    pub fn spawn(state: PipelineState, jobs: mpsc::Receiver<ProcessJob>) -> Self {
        let cancel = CancellationToken::new();
        let mut tasks = Vec::with_capacity(4);

        let audit = tokio::spawn(ImportAuditLog::run(
            state.pool.clone(),
            state.events.subscribe(),
            cancel.clone(),
        ));
        tasks.push(("import audit log", audit));

        let processor = Arc::clone(&state.processor);
        let token = cancel.clone();
        tasks.push(("import processor", tokio::spawn(async move { processor.run(token).await })));

        let processor = Arc::clone(&state.processor);
        let token = cancel.clone();
        tasks.push((
            "process queue consumer",
            tokio::spawn(async move { processor.consume(jobs, token).await }),
        ));

        let edge_queue = Arc::clone(&state.edge_queue);
        let token = cancel.clone();
        tasks.push(("edge queue worker", tokio::spawn(async move { edge_queue.run(token).await })));

        tracing::info!(loops = tasks.len(), "Worker loops started");
        Self { state, cancel, tasks }
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancel every loop and wait up to `timeout` for each to return.
    /// Returns how many loops did not stop in time.
    pub async fn shutdown(self, timeout: Duration) -> usize {
        self.cancel.cancel();
        let mut stuck = 0;
        for (name, handle) in self.tasks {
            match tokio::time::timeout(timeout, handle).await {
                Ok(Ok(())) => tracing::debug!(task = name, "Loop stopped"),
                Ok(Err(e)) => tracing::error!(task = name, error = %e, "Loop panicked"),
                Err(_) => {
                    tracing::warn!(task = name, "Loop did not stop in time");
                    stuck += 1;
                }
            }
        }
        stuck
    }
}
