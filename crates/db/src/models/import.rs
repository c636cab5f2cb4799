//! Import model.

use serde::Serialize;
use sqlx::FromRow;
use strata_core::import_status::ImportState;
use strata_core::types::{DbId, Timestamp};

use crate::models::status::{ImportStatus, StatusId};

/// A row from the `imports` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Import {
    pub id: DbId,
    pub data_source_id: DbId,
    pub status_id: StatusId,
    pub status_message: Option<String>,
    pub reference: Option<String>,
    pub total_records: i64,
    pub records_inserted: i64,
    pub created_by: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Import {
    pub fn state(&self) -> Option<ImportState> {
        ImportStatus::from_id(self.status_id).map(ImportState::from)
    }
}

/// DTO for creating an import.
#[derive(Debug, Clone, Default)]
pub struct CreateImport {
    pub data_source_id: DbId,
    pub reference: Option<String>,
    pub created_by: Option<String>,
}
