//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] is shared via `Arc<EventBus>` by every pipeline component
//! that raises events. Publishing never blocks and never fails.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strata_core::types::DbId;
use tokio::sync::broadcast;

use crate::{
    DATA_INGESTED, EDGE_QUEUE_RETIRED, IMPORT_COMPLETED, IMPORT_FAILED, IMPORT_STOPPED,
    TYPE_MAPPING_CREATED,
};

// ---------------------------------------------------------------------------
// PipelineEvent
// ---------------------------------------------------------------------------

/// What happened. Serialized with its name under `"event"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum EventKind {
    #[serde(rename = "data_source.data_ingested")]
    DataIngested {
        data_source_id: DbId,
        import_id: DbId,
        records: u64,
    },
    #[serde(rename = "import.completed")]
    ImportCompleted { import_id: DbId, records_inserted: i64 },
    #[serde(rename = "import.stopped")]
    ImportStopped { import_id: DbId, message: Option<String> },
    #[serde(rename = "import.failed")]
    ImportFailed { import_id: DbId, message: Option<String> },
    #[serde(rename = "type_mapping.created")]
    TypeMappingCreated {
        mapping_id: DbId,
        data_source_id: DbId,
        shape_hash: String,
    },
    #[serde(rename = "edge_queue.retired")]
    EdgeQueueRetired {
        item_id: DbId,
        import_id: Option<DbId>,
        match_passes: i32,
    },
}

/// Something the ingestion pipeline did, stamped with when it happened.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineEvent {
    #[serde(flatten)]
    pub kind: EventKind,
    pub occurred_at: DateTime<Utc>,
}

impl PipelineEvent {
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            occurred_at: Utc::now(),
        }
    }

    pub fn data_ingested(data_source_id: DbId, import_id: DbId, records: u64) -> Self {
        Self::new(EventKind::DataIngested {
            data_source_id,
            import_id,
            records,
        })
    }

    pub fn import_completed(import_id: DbId, records_inserted: i64) -> Self {
        Self::new(EventKind::ImportCompleted {
            import_id,
            records_inserted,
        })
    }

    pub fn import_stopped(import_id: DbId, message: Option<&str>) -> Self {
        Self::new(EventKind::ImportStopped {
            import_id,
            message: message.map(str::to_string),
        })
    }

    pub fn import_failed(import_id: DbId, message: Option<&str>) -> Self {
        Self::new(EventKind::ImportFailed {
            import_id,
            message: message.map(str::to_string),
        })
    }

    pub fn type_mapping_created(mapping_id: DbId, data_source_id: DbId, shape_hash: &str) -> Self {
        Self::new(EventKind::TypeMappingCreated {
            mapping_id,
            data_source_id,
            shape_hash: shape_hash.to_string(),
        })
    }

    pub fn edge_queue_retired(item_id: DbId, import_id: Option<DbId>, match_passes: i32) -> Self {
        Self::new(EventKind::EdgeQueueRetired {
            item_id,
            import_id,
            match_passes,
        })
    }

    /// Dot-separated event name, one of the crate-level constants.
    pub fn name(&self) -> &'static str {
        match self.kind {
            EventKind::DataIngested { .. } => DATA_INGESTED,
            EventKind::ImportCompleted { .. } => IMPORT_COMPLETED,
            EventKind::ImportStopped { .. } => IMPORT_STOPPED,
            EventKind::ImportFailed { .. } => IMPORT_FAILED,
            EventKind::TypeMappingCreated { .. } => TYPE_MAPPING_CREATED,
            EventKind::EdgeQueueRetired { .. } => EDGE_QUEUE_RETIRED,
        }
    }

    pub fn import_id(&self) -> Option<DbId> {
        match &self.kind {
            EventKind::DataIngested { import_id, .. }
            | EventKind::ImportCompleted { import_id, .. }
            | EventKind::ImportStopped { import_id, .. }
            | EventKind::ImportFailed { import_id, .. } => Some(*import_id),
            EventKind::EdgeQueueRetired { import_id, .. } => *import_id,
            EventKind::TypeMappingCreated { .. } => None,
        }
    }

    pub fn data_source_id(&self) -> Option<DbId> {
        match &self.kind {
            EventKind::DataIngested { data_source_id, .. }
            | EventKind::TypeMappingCreated { data_source_id, .. } => Some(*data_source_id),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus.
///
/// ```rust
/// use strata_events::bus::{EventBus, PipelineEvent};
///
/// let bus = EventBus::default();
/// let mut rx = bus.subscribe();
///
/// bus.publish(PipelineEvent::import_completed(1, 10));
/// ```
pub struct EventBus {
    sender: broadcast::Sender<PipelineEvent>,
}

impl EventBus {
    /// When the buffer is full the oldest events are dropped and slow
    /// receivers observe `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish to all current subscribers. Dropped silently when nobody
    /// listens.
    pub fn publish(&self, event: PipelineEvent) {
        tracing::debug!(event = event.name(), import_id = ?event.import_id(), "Publishing event");
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn subscribers_receive_completion() {
        let bus = EventBus::default();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(PipelineEvent::import_completed(42, 7));

        for rx in [&mut rx1, &mut rx2] {
            let received = rx.recv().await.expect("should receive the event");
            assert_eq!(received.name(), IMPORT_COMPLETED);
            assert_eq!(received.import_id(), Some(42));
            assert_eq!(
                received.kind,
                EventKind::ImportCompleted {
                    import_id: 42,
                    records_inserted: 7
                }
            );
        }
    }

    #[test]
    fn publish_with_no_subscribers_does_not_panic() {
        EventBus::default().publish(PipelineEvent::import_failed(1, None));
    }

    #[test]
    fn events_name_their_import_and_source() {
        let e = PipelineEvent::type_mapping_created(3, 9, "abc");
        assert_eq!(e.name(), TYPE_MAPPING_CREATED);
        assert_eq!(e.data_source_id(), Some(9));
        assert_eq!(e.import_id(), None);

        let e = PipelineEvent::data_ingested(2, 5, 100);
        assert_eq!(e.data_source_id(), Some(2));
        assert_eq!(e.import_id(), Some(5));

        assert_eq!(PipelineEvent::edge_queue_retired(4, None, 3).import_id(), None);
    }

    #[test]
    fn serialized_event_carries_its_name() {
        let value = serde_json::to_value(PipelineEvent::import_stopped(5, Some("halt"))).unwrap();
        assert_eq!(value["event"], json!(IMPORT_STOPPED));
        assert_eq!(value["import_id"], json!(5));
        assert_eq!(value["message"], json!("halt"));
        assert!(value["occurred_at"].is_string());
    }
}
