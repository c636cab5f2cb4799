//! File reference model.

use serde::Serialize;
use sqlx::FromRow;
use strata_core::types::{DbId, Timestamp};

/// A row from the `files` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct File {
    pub id: DbId,
    pub container_id: DbId,
    pub data_source_id: Option<DbId>,
    pub file_name: String,
    pub file_size: i64,
    pub md5hash: Option<String>,
    pub adapter: String,
    pub adapter_file_path: String,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// DTO for registering a stored blob.
#[derive(Debug, Clone)]
pub struct CreateFile {
    pub container_id: DbId,
    pub data_source_id: Option<DbId>,
    pub file_name: String,
    pub file_size: i64,
    pub md5hash: Option<String>,
    pub adapter: String,
    pub adapter_file_path: String,
}
