//! Pipeline configuration loaded from environment variables.

use std::time::Duration;

use strata_core::edge_queue::EdgeQueuePolicy;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} must be {expected}, got `{value}`")]
    Invalid {
        var: &'static str,
        value: String,
        expected: &'static str,
    },
}

/// Tuning knobs of ingestion, import processing and the edge queue.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestConfig {
    /// Records buffered before a bulk staging insert.
    pub buffer_size: usize,
    /// Imports picked up per processing pass.
    pub import_batch_limit: i64,
    /// Staging rows read per page inside one import.
    pub staging_page_size: i64,
    pub mapping_cache_ttl: Duration,
    pub edge_queue: EdgeQueuePolicy,
    /// Candidate nodes fetched per side when expanding parameter edges.
    pub edge_insertion_chunk_size: i64,
    /// Queue items handled per edge-queue pass.
    pub edge_queue_batch_size: usize,
    pub import_poll_interval: Duration,
    pub edge_queue_poll_interval: Duration,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            buffer_size: 1000,
            import_batch_limit: 10,
            staging_page_size: 500,
            mapping_cache_ttl: Duration::from_secs(300),
            edge_queue: EdgeQueuePolicy::default(),
            edge_insertion_chunk_size: 1000,
            edge_queue_batch_size: 100,
            import_poll_interval: Duration::from_millis(1000),
            edge_queue_poll_interval: Duration::from_millis(1000),
        }
    }
}

impl IngestConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                             | Default |
    /// |-------------------------------------|---------|
    /// | `DATA_SOURCE_BUFFER_SIZE`           | `1000`  |
    /// | `IMPORT_BATCH_LIMIT`                | `10`    |
    /// | `STAGING_PAGE_SIZE`                 | `500`   |
    /// | `TYPE_MAPPING_CACHE_TTL_SECS`       | `300`   |
    /// | `EDGE_INSERTION_BACKOFF_MULTIPLIER` | `5`     |
    /// | `EDGE_INSERTION_CHUNK_SIZE`         | `1000`  |
    /// | `EDGE_QUEUE_BATCH_SIZE`             | `100`   |
    /// | `EDGE_PARAMETER_MAX_PASSES`         | `10`    |
    /// | `EDGE_MAX_BACKOFF_SECS`             | `86400` |
    /// | `IMPORT_POLL_INTERVAL_MS`           | `1000`  |
    /// | `EDGE_QUEUE_POLL_INTERVAL_MS`       | `1000`  |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let d = Self::default();
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
        let narrow = |var: &'static str, v: u64| -> Result<i64, ConfigError> {
            i64::try_from(v).map_err(|_| ConfigError::Invalid {
                var,
                value: v.to_string(),
                expected: "a positive integer within i64",
            })
        };

        let buffer_size = positive("DATA_SOURCE_BUFFER_SIZE", d.buffer_size as u64)?;
        let import_batch_limit = positive("IMPORT_BATCH_LIMIT", d.import_batch_limit as u64)?;
        let staging_page_size = positive("STAGING_PAGE_SIZE", d.staging_page_size as u64)?;
        let cache_ttl = positive("TYPE_MAPPING_CACHE_TTL_SECS", d.mapping_cache_ttl.as_secs())?;
        let multiplier = positive(
            "EDGE_INSERTION_BACKOFF_MULTIPLIER",
            u64::from(d.edge_queue.backoff_multiplier),
        )?;
        let chunk_size = positive("EDGE_INSERTION_CHUNK_SIZE", d.edge_insertion_chunk_size as u64)?;
        let queue_batch = positive("EDGE_QUEUE_BATCH_SIZE", d.edge_queue_batch_size as u64)?;
        let max_passes = positive(
            "EDGE_PARAMETER_MAX_PASSES",
            d.edge_queue.parameter_max_passes as u64,
        )?;
        let max_backoff = positive("EDGE_MAX_BACKOFF_SECS", d.edge_queue.max_backoff.as_secs())?;
        let import_poll = positive("IMPORT_POLL_INTERVAL_MS", d.import_poll_interval.as_millis() as u64)?;
        let queue_poll = positive(
            "EDGE_QUEUE_POLL_INTERVAL_MS",
            d.edge_queue_poll_interval.as_millis() as u64,
        )?;

        Ok(Self {
            buffer_size: usize::try_from(buffer_size).unwrap_or(usize::MAX),
            import_batch_limit: narrow("IMPORT_BATCH_LIMIT", import_batch_limit)?,
            staging_page_size: narrow("STAGING_PAGE_SIZE", staging_page_size)?,
            mapping_cache_ttl: Duration::from_secs(cache_ttl),
            edge_queue: EdgeQueuePolicy {
                backoff_multiplier: u32::try_from(multiplier).map_err(|_| ConfigError::Invalid {
                    var: "EDGE_INSERTION_BACKOFF_MULTIPLIER",
                    value: multiplier.to_string(),
                    expected: "a positive integer within u32",
                })?,
                max_backoff: Duration::from_secs(max_backoff),
                parameter_max_passes: i32::try_from(max_passes).map_err(|_| ConfigError::Invalid {
                    var: "EDGE_PARAMETER_MAX_PASSES",
                    value: max_passes.to_string(),
                    expected: "a positive integer within i32",
                })?,
            },
            edge_insertion_chunk_size: narrow("EDGE_INSERTION_CHUNK_SIZE", chunk_size)?,
            edge_queue_batch_size: usize::try_from(queue_batch).unwrap_or(usize::MAX),
            import_poll_interval: Duration::from_millis(import_poll),
            edge_queue_poll_interval: Duration::from_millis(queue_poll),
        })
    }
}
