//! Node model.

use serde::Serialize;
use sqlx::types::Json;
use sqlx::FromRow;
use strata_core::graph::ConversionMetadata;
use strata_core::types::{DbId, Timestamp};

/// A row from the `nodes` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Node {
    pub id: DbId,
    pub container_id: DbId,
    pub metatype_id: DbId,
    pub data_source_id: Option<DbId>,
    pub original_data_id: Option<String>,
    pub properties: serde_json::Value,
    pub metadata: Json<ConversionMetadata>,
    pub graph_id: Option<DbId>,
    pub import_data_id: Option<DbId>,
    pub data_staging_id: Option<DbId>,
    pub type_mapping_transformation_id: Option<DbId>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// Equality filter used to select candidate edge endpoints.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeFilter {
    pub container_id: DbId,
    pub data_source_id: Option<DbId>,
    pub metatype_id: Option<DbId>,
    pub metatype_name: Option<String>,
    pub original_data_id: Option<String>,
    pub id: Option<DbId>,
    /// `(property name, value)` pairs matched with JSONB containment.
    pub properties: Vec<(String, serde_json::Value)>,
}
