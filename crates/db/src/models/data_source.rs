//! Data source model.

use serde::Serialize;
use sqlx::FromRow;
use strata_core::shape_hash::ShapeHashOptions;
use strata_core::types::{DbId, Timestamp};

/// A row from the `data_sources` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct DataSource {
    pub id: DbId,
    pub container_id: DbId,
    pub name: String,
    pub active: bool,
    pub stop_nodes: Vec<String>,
    pub value_nodes: Vec<String>,
    pub data_retention_days: i32,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl DataSource {
    pub fn shape_hash_options(&self) -> ShapeHashOptions {
        ShapeHashOptions {
            stop_nodes: self.stop_nodes.clone(),
            value_nodes: self.value_nodes.clone(),
        }
    }

    /// Zero-retention sources never stage records.
    pub fn persists_staging(&self) -> bool {
        self.data_retention_days != 0
    }
}

/// DTO for creating a data source.
#[derive(Debug, Clone, Default)]
pub struct CreateDataSource {
    pub container_id: DbId,
    pub name: String,
    pub stop_nodes: Vec<String>,
    pub value_nodes: Vec<String>,
    pub data_retention_days: Option<i32>,
}
