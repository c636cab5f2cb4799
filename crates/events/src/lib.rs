//! Event sink of the ingestion pipeline.
//!
//! - [`EventBus`]: in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`.
//! - [`PipelineEvent`]: a typed [`EventKind`] with the time it happened.
//! - [`ImportAuditLog`]: background task keeping the per-import audit
//!   trail in `import_events`.

pub mod audit;
pub mod bus;

pub use audit::ImportAuditLog;
pub use bus::{EventBus, EventKind, PipelineEvent};

/// Records were received from a data source.
pub const DATA_INGESTED: &str = "data_source.data_ingested";
/// Every staging row of an import was inserted.
pub const IMPORT_COMPLETED: &str = "import.completed";
/// An operator stopped an import.
pub const IMPORT_STOPPED: &str = "import.stopped";
/// An import moved to the error state.
pub const IMPORT_FAILED: &str = "import.failed";
/// A new shape was seen and an inactive mapping created for it.
pub const TYPE_MAPPING_CREATED: &str = "type_mapping.created";
/// A parameter-matched edge reached its re-queue ceiling.
pub const EDGE_QUEUE_RETIRED: &str = "edge_queue.retired";
