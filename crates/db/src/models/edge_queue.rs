//! Pending edge queue model.

use serde::Serialize;
use sqlx::types::Json;
use sqlx::FromRow;
use strata_core::graph::EdgeDraft;
use strata_core::types::{DbId, Timestamp};

/// A row from the `edge_queue_items` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct EdgeQueueItem {
    pub id: DbId,
    pub import_id: Option<DbId>,
    pub data_staging_id: Option<DbId>,
    pub edge: Json<EdgeDraft>,
    pub attempts: i32,
    pub match_passes: i32,
    pub next_attempt_at: Timestamp,
    pub error: Option<String>,
    pub file_attached: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// DTO for enqueueing an edge.
#[derive(Debug, Clone)]
pub struct CreateEdgeQueueItem {
    pub import_id: Option<DbId>,
    pub data_staging_id: Option<DbId>,
    pub edge: EdgeDraft,
    pub file_attached: bool,
}
