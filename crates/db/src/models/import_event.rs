//! Import audit trail model.

use serde::Serialize;
use sqlx::FromRow;
use strata_core::types::{DbId, Timestamp};

/// A row from the `import_events` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ImportEvent {
    pub id: DbId,
    /// Dot-separated event name such as `"import.completed"`.
    pub event: String,
    pub data_source_id: Option<DbId>,
    pub import_id: Option<DbId>,
    pub detail: serde_json::Value,
    pub occurred_at: Timestamp,
    pub created_at: Timestamp,
}

#[derive(Debug, Clone)]
pub struct CreateImportEvent {
    pub event: String,
    pub data_source_id: Option<DbId>,
    pub import_id: Option<DbId>,
    pub detail: serde_json::Value,
    pub occurred_at: Timestamp,
}
