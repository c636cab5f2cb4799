//! Out-of-band processing queue.
//!
//! Ingress pushes a [`ProcessJob`] after committing so a worker can start on
//! an import before the next poll, and pushes every record of a
//! zero-retention source since those are never staged.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strata_core::types::DbId;
use tokio::sync::mpsc;

use crate::error::{PipelineError, PipelineResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "job", rename_all = "snake_case")]
pub enum ProcessJob {
    /// Run a processing pass over one import.
    Import { import_id: DbId },
    /// Transform and write one record that has no staging row.
    Record {
        data_source_id: DbId,
        import_id: DbId,
        data: serde_json::Value,
    },
}

#[async_trait]
pub trait ProcessQueue: Send + Sync {
    async fn put(&self, job: ProcessJob) -> PipelineResult<()>;
}

/// In-process queue over a bounded tokio channel.
#[derive(Clone)]
pub struct ChannelQueue {
    sender: mpsc::Sender<ProcessJob>,
}

impl ChannelQueue {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<ProcessJob>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl ProcessQueue for ChannelQueue {
    async fn put(&self, job: ProcessJob) -> PipelineResult<()> {
        self.sender
            .send(job)
            .await
            .map_err(|e| PipelineError::Queue(format!("process queue closed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[tokio::test]
    async fn jobs_arrive_in_order() {
        let (queue, mut rx) = ChannelQueue::new(4);
        queue.put(ProcessJob::Import { import_id: 1 }).await.unwrap();
        queue
            .put(ProcessJob::Record {
                data_source_id: 2,
                import_id: 1,
                data: serde_json::json!({"a": 1}),
            })
            .await
            .unwrap();

        assert_eq!(rx.recv().await, Some(ProcessJob::Import { import_id: 1 }));
        assert_matches!(rx.recv().await, Some(ProcessJob::Record { data_source_id: 2, .. }));
    }

    #[tokio::test]
    async fn closed_queue_is_an_error() {
        let (queue, rx) = ChannelQueue::new(1);
        drop(rx);
        assert_matches!(
            queue.put(ProcessJob::Import { import_id: 1 }).await,
            Err(PipelineError::Queue(_))
        );
    }
}
