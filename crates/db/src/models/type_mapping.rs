//! Type mapping and transformation models.
//!
//! Transformations store their target as `kind` plus the matching id column,
//! and their rule lists as JSONB. [`TypeTransformationRow::into_domain`]
//! rebuilds the engine's [`Transformation`].

use serde::Serialize;
use sqlx::types::Json;
use sqlx::FromRow;
use strata_core::error::CoreError;
use strata_core::mapping::{TransformationInput, TypeMapping};
use strata_core::transformation::{
    Condition, EdgeConnectionParameter, EdgeTarget, KeyMapping, Transformation,
    TransformationConfig, TransformationTarget,
};
use strata_core::types::{DbId, Timestamp};

pub const KIND_NODE: &str = "node";
pub const KIND_EDGE: &str = "edge";

/// A row from the `type_mappings` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct TypeMappingRow {
    pub id: DbId,
    pub container_id: DbId,
    pub data_source_id: DbId,
    pub shape_hash: String,
    pub sample_payload: Option<serde_json::Value>,
    pub active: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl TypeMappingRow {
    pub fn into_domain(self, transformations: Vec<Transformation>) -> TypeMapping {
        TypeMapping {
            id: self.id,
            container_id: self.container_id,
            data_source_id: self.data_source_id,
            shape_hash: self.shape_hash,
            sample_payload: self.sample_payload,
            active: self.active,
            transformations,
        }
    }
}

/// DTO for upserting a mapping by `(data_source_id, shape_hash)`.
#[derive(Debug, Clone)]
pub struct UpsertTypeMapping {
    pub container_id: DbId,
    pub data_source_id: DbId,
    pub shape_hash: String,
    pub sample_payload: Option<serde_json::Value>,
    pub active: bool,
}

/// A row from the `type_transformations` table.
#[derive(Debug, Clone, FromRow)]
pub struct TypeTransformationRow {
    pub id: DbId,
    pub type_mapping_id: DbId,
    pub container_id: DbId,
    pub name: Option<String>,
    pub sort_order: i32,
    pub kind: String,
    pub metatype_id: Option<DbId>,
    pub metatype_relationship_pair_id: Option<DbId>,
    pub keys: Json<Vec<KeyMapping>>,
    pub conditions: Json<Vec<Condition>>,
    pub config: Json<TransformationConfig>,
    pub root_array: Option<String>,
    pub unique_identifier_key: Option<String>,
    pub origin_id_key: Option<String>,
    pub origin_metatype_id: Option<DbId>,
    pub origin_data_source_id: Option<DbId>,
    pub destination_id_key: Option<String>,
    pub destination_metatype_id: Option<DbId>,
    pub destination_data_source_id: Option<DbId>,
    pub origin_parameters: Json<Vec<EdgeConnectionParameter>>,
    pub destination_parameters: Json<Vec<EdgeConnectionParameter>>,
    pub archived: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl TypeTransformationRow {
    pub fn into_domain(self) -> Result<Transformation, CoreError> {
        let target = match (self.kind.as_str(), self.metatype_id, self.metatype_relationship_pair_id) {
            (KIND_NODE, Some(metatype_id), _) => TransformationTarget::Node { metatype_id },
            (KIND_EDGE, _, Some(relationship_pair_id)) => TransformationTarget::Edge(EdgeTarget {
                relationship_pair_id,
                origin_id_key: self.origin_id_key,
                origin_metatype_id: self.origin_metatype_id,
                origin_data_source_id: self.origin_data_source_id,
                destination_id_key: self.destination_id_key,
                destination_metatype_id: self.destination_metatype_id,
                destination_data_source_id: self.destination_data_source_id,
                origin_parameters: self.origin_parameters.0,
                destination_parameters: self.destination_parameters.0,
            }),
            (kind, _, _) => {
                return Err(CoreError::Configuration(format!(
                    "transformation {} has kind `{kind}` without a matching target",
                    self.id
                )))
            }
        };

        Ok(Transformation {
            id: self.id,
            type_mapping_id: self.type_mapping_id,
            container_id: self.container_id,
            name: self.name,
            target,
            keys: self.keys.0,
            conditions: self.conditions.0,
            config: self.config.0,
            root_array: self.root_array,
            unique_identifier_key: self.unique_identifier_key,
            archived: self.archived,
        })
    }
}

/// Column values of a transformation write, flattened from a
/// [`TransformationInput`].
#[derive(Debug, Clone)]
pub struct TransformationColumns {
    pub name: Option<String>,
    pub kind: &'static str,
    pub metatype_id: Option<DbId>,
    pub metatype_relationship_pair_id: Option<DbId>,
    pub keys: Json<Vec<KeyMapping>>,
    pub conditions: Json<Vec<Condition>>,
    pub config: Json<TransformationConfig>,
    pub root_array: Option<String>,
    pub unique_identifier_key: Option<String>,
    pub edge: EdgeTarget,
    pub archived: bool,
}

impl From<&TransformationInput> for TransformationColumns {
    fn from(input: &TransformationInput) -> Self {
        let (kind, metatype_id, pair_id, edge) = match &input.target {
            TransformationTarget::Node { metatype_id } => {
                (KIND_NODE, Some(*metatype_id), None, EdgeTarget::default())
            }
            TransformationTarget::Edge(edge) => {
                (KIND_EDGE, None, Some(edge.relationship_pair_id), edge.clone())
            }
        };
        Self {
            name: input.name.clone(),
            kind,
            metatype_id,
            metatype_relationship_pair_id: pair_id,
            keys: Json(input.keys.clone()),
            conditions: Json(input.conditions.clone()),
            config: Json(input.config),
            root_array: input.root_array.clone(),
            unique_identifier_key: input.unique_identifier_key.clone(),
            edge,
            archived: input.archived,
        }
    }
}
