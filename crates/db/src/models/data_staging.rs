//! Staged record model.

use serde::Serialize;
use sqlx::FromRow;
use strata_core::types::{DbId, Timestamp};

/// A row from the `data_staging` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct DataStaging {
    pub id: DbId,
    pub data_source_id: DbId,
    pub import_id: DbId,
    pub shape_hash: String,
    pub data: serde_json::Value,
    pub errors: Vec<String>,
    pub inserted_at: Option<Timestamp>,
    pub file_attached: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// One record of a bulk insert.
#[derive(Debug, Clone)]
pub struct CreateDataStaging {
    pub data_source_id: DbId,
    pub import_id: DbId,
    pub shape_hash: String,
    pub data: serde_json::Value,
    pub file_attached: bool,
}
