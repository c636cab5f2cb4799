//! Edge resolution queue worker.
//!
//! Edges whose endpoints did not exist when their record was processed, and
//! every parameter-matched edge, wait in `edge_queue_items`. The worker
//! claims due items one at a time with `FOR UPDATE SKIP LOCKED`, so several
//! workers can drain the same queue.

use std::sync::Arc;
use std::time::Duration;

use sqlx::{Acquire, PgConnection};
use strata_core::edge_queue::{AfterSuccess, EdgeQueuePolicy};
use strata_core::types::DbId;
use strata_db::models::edge_queue::EdgeQueueItem;
use strata_db::repositories::EdgeQueueRepo;
use strata_db::DbPool;
use strata_events::{EventBus, PipelineEvent};
use tokio_util::sync::CancellationToken;

use crate::blob::BlobStore;
use crate::error::{PipelineError, PipelineResult};
use crate::graph_writer::GraphWriter;

/// What happened to one claimed item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemOutcome {
    /// Edges written and the item deleted.
    Resolved,
    /// Parameter edges written; the item waits for the next match pass.
    Requeued,
    /// Parameter item reached its pass ceiling and was deleted.
    Retired,
    /// Writing failed; the item was pushed back.
    Failed,
}

/// Counters of one [`EdgeQueueWorker::drain_once`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainStats {
    pub resolved: usize,
    pub requeued: usize,
    pub retired: usize,
    pub failed: usize,
}

impl DrainStats {
    fn record(&mut self, outcome: ItemOutcome) {
        match outcome {
            ItemOutcome::Resolved => self.resolved += 1,
            ItemOutcome::Requeued => self.requeued += 1,
            ItemOutcome::Retired => self.retired += 1,
            ItemOutcome::Failed => self.failed += 1,
        }
    }

    pub fn claimed(&self) -> usize {
        self.resolved + self.requeued + self.retired + self.failed
    }
}

pub struct EdgeQueueWorker {
    pool: DbPool,
    writer: Arc<GraphWriter>,
    blobs: Arc<dyn BlobStore>,
    events: Arc<EventBus>,
    policy: EdgeQueuePolicy,
    batch_size: usize,
    poll_interval: Duration,
}

impl EdgeQueueWorker {
    pub fn new(
        pool: DbPool,
        writer: Arc<GraphWriter>,
        blobs: Arc<dyn BlobStore>,
        events: Arc<EventBus>,
        policy: EdgeQueuePolicy,
        batch_size: usize,
        poll_interval: Duration,
    ) -> Self {
        Self {
            pool,
            writer,
            blobs,
            events,
            policy,
            batch_size: batch_size.max(1),
            poll_interval,
        }
    }

    /// Run the queue loop until the cancellation token is triggered.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        tracing::info!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            batch_size = self.batch_size,
            "Edge queue worker started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Edge queue worker shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    match self.drain_once().await {
                        Ok(stats) if stats.claimed() > 0 => {
                            tracing::debug!(
                                resolved = stats.resolved,
                                requeued = stats.requeued,
                                retired = stats.retired,
                                failed = stats.failed,
                                "Edge queue drained",
                            );
                        }
                        Ok(_) => {}
                        Err(e) => tracing::error!(error = %e, "Edge queue cycle failed"),
                    }
                }
            }
        }
    }

    /// Process up to `batch_size` due items. Stops early when the queue has
    /// nothing due.
    pub async fn drain_once(&self) -> PipelineResult<DrainStats> {
        let mut stats = DrainStats::default();
        for _ in 0..self.batch_size {
            match self.process_next().await? {
                Some(outcome) => stats.record(outcome),
                None => break,
            }
        }
        Ok(stats)
    }

    async fn process_next(&self) -> PipelineResult<Option<ItemOutcome>> {
        let mut tx = self.pool.begin().await.map_err(PipelineError::transaction)?;
        let Some(item) = EdgeQueueRepo::claim_due(&mut tx).await? else {
            return Ok(None);
        };

        let mut savepoint = tx.begin().await.map_err(PipelineError::transaction)?;
        let outcome = match self.write_item(&mut savepoint, &item).await {
            Ok(written) => {
                savepoint.commit().await.map_err(PipelineError::transaction)?;
                let has_parameters = item.edge.has_parameters();
                match self.policy.after_success(has_parameters, item.match_passes) {
                    AfterSuccess::Delete => {
                        EdgeQueueRepo::delete(&mut tx, item.id).await?;
                        tracing::debug!(item_id = item.id, edges = written, "Queued edge resolved");
                        if has_parameters {
                            ItemOutcome::Retired
                        } else {
                            ItemOutcome::Resolved
                        }
                    }
                    AfterSuccess::Requeue { match_passes, delay } => {
                        EdgeQueueRepo::requeue(&mut tx, item.id, match_passes, delay).await?;
                        ItemOutcome::Requeued
                    }
                }
            }
            Err(e) if e.is_connection_loss() => return Err(e),
            Err(e) => {
                savepoint.rollback().await.map_err(PipelineError::transaction)?;
                let backoff = self.policy.after_failure(item.attempts);
                EdgeQueueRepo::record_failure(&mut tx, item.id, backoff.attempts, backoff.delay, &e.to_string())
                    .await?;
                tracing::debug!(
                    item_id = item.id,
                    attempts = backoff.attempts,
                    retry_in_secs = backoff.delay.as_secs(),
                    error = %e,
                    "Queued edge not resolved yet",
                );
                ItemOutcome::Failed
            }
        };
        tx.commit().await.map_err(PipelineError::transaction)?;

        if outcome == ItemOutcome::Retired {
            self.events.publish(PipelineEvent::edge_queue_retired(
                item.id,
                item.import_id,
                item.match_passes.saturating_add(1),
            ));
        }
        Ok(Some(outcome))
    }

    /// Write the item's edges. Returns how many were written.
    async fn write_item(&self, conn: &mut PgConnection, item: &EdgeQueueItem) -> PipelineResult<usize> {
        let draft = &item.edge.0;
        let edge_ids: Vec<DbId> = if draft.has_parameters() {
            let outcome = self.writer.save_parameter_edge(conn, draft).await?;
            outcome.edges.iter().map(|e| e.id).collect()
        } else {
            vec![self.writer.save_edge(conn, draft).await?.id]
        };

        if let (true, Some(staging_id)) = (item.file_attached, item.data_staging_id) {
            let files: Vec<DbId> = self
                .blobs
                .staged_files(conn, staging_id)
                .await?
                .iter()
                .map(|f| f.id)
                .collect();
            for edge_id in &edge_ids {
                self.blobs.attach_to_edge(conn, *edge_id, &files).await?;
            }
        }
        Ok(edge_ids.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_count_claimed_items() {
        let mut stats = DrainStats::default();
        for outcome in [
            ItemOutcome::Resolved,
            ItemOutcome::Failed,
            ItemOutcome::Failed,
            ItemOutcome::Requeued,
        ] {
            stats.record(outcome);
        }
        assert_eq!(stats.claimed(), 4);
        assert_eq!(stats.failed, 2);
        assert_eq!(stats.retired, 0);
    }
}
