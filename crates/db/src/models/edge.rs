//! Edge model.

use serde::Serialize;
use sqlx::types::Json;
use sqlx::FromRow;
use strata_core::graph::ConversionMetadata;
use strata_core::types::{DbId, Timestamp};

/// A row from the `edges` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Edge {
    pub id: DbId,
    pub container_id: DbId,
    pub relationship_pair_id: DbId,
    pub data_source_id: Option<DbId>,
    pub origin_id: DbId,
    pub destination_id: DbId,
    pub origin_original_id: Option<String>,
    pub origin_metatype_id: Option<DbId>,
    pub origin_data_source_id: Option<DbId>,
    pub destination_original_id: Option<String>,
    pub destination_metatype_id: Option<DbId>,
    pub destination_data_source_id: Option<DbId>,
    pub composite_original_id: Option<String>,
    pub properties: serde_json::Value,
    pub metadata: Json<ConversionMetadata>,
    pub import_data_id: Option<DbId>,
    pub data_staging_id: Option<DbId>,
    pub type_mapping_transformation_id: Option<DbId>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// A validated edge with both endpoints resolved to node ids.
#[derive(Debug, Clone)]
pub struct ResolvedEdge {
    pub container_id: DbId,
    pub relationship_pair_id: DbId,
    pub data_source_id: Option<DbId>,
    pub origin_id: DbId,
    pub destination_id: DbId,
    pub origin_original_id: Option<String>,
    pub origin_metatype_id: Option<DbId>,
    pub origin_data_source_id: Option<DbId>,
    pub destination_original_id: Option<String>,
    pub destination_metatype_id: Option<DbId>,
    pub destination_data_source_id: Option<DbId>,
    pub composite_original_id: Option<String>,
    pub properties: serde_json::Value,
    pub metadata: ConversionMetadata,
    pub import_data_id: Option<DbId>,
    pub data_staging_id: Option<DbId>,
    pub type_mapping_transformation_id: Option<DbId>,
}
