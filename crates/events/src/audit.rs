//! Import audit trail.
//!
//! [`ImportAuditLog`] drains a bus subscription into `import_events`, so an
//! import's history (received, completed, stopped, failed) and the shapes
//! a data source introduced can be read back after the fact. It stops when
//! the bus is dropped or the cancellation token fires.

use strata_core::types::DbId;
use strata_db::models::import_event::CreateImportEvent;
use strata_db::repositories::ImportEventRepo;
use strata_db::DbPool;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::bus::PipelineEvent;

pub struct ImportAuditLog;

impl ImportAuditLog {
    pub async fn run(
        pool: DbPool,
        mut receiver: broadcast::Receiver<PipelineEvent>,
        cancel: CancellationToken,
    ) {
        loop {
            let received = tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Import audit log cancelled");
                    break;
                }
                received = receiver.recv() => received,
            };

            match received {
                Ok(event) => {
                    if let Err(e) = Self::record(&pool, &event).await {
                        tracing::error!(
                            error = %e,
                            event = event.name(),
                            import_id = ?event.import_id(),
                            "Failed to record import event"
                        );
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "Import audit log lagged, events missing from the trail");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::info!("Event bus closed, import audit log shutting down");
                    break;
                }
            }
        }
    }

    /// Write one event to the trail.
    pub async fn record(pool: &DbPool, event: &PipelineEvent) -> Result<DbId, sqlx::Error> {
        let detail = serde_json::to_value(&event.kind).map_err(|e| sqlx::Error::Encode(Box::new(e)))?;
        ImportEventRepo::insert(
            pool,
            &CreateImportEvent {
                event: event.name().to_string(),
                data_source_id: event.data_source_id(),
                import_id: event.import_id(),
                detail,
                occurred_at: event.occurred_at,
            },
        )
        .await
    }
}
