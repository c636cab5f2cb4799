//! Ontology rows, read-only from the ingestion side.

use serde::Serialize;
use sqlx::types::Json;
use sqlx::FromRow;
use strata_core::error::CoreError;
use strata_core::ontology::{
    KeyValidation, Metatype, PropertyKey, PropertySchema, Relationship, RelationshipPair,
};
use strata_core::types::{DbId, Timestamp};

/// A row from the `metatypes` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct MetatypeRow {
    pub id: DbId,
    pub container_id: DbId,
    pub name: String,
    pub description: Option<String>,
    pub archived: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// A row from `metatype_keys` or `metatype_relationship_keys`; the owner
/// column is aliased to `owner_id` by the repository.
#[derive(Debug, Clone, FromRow)]
pub struct PropertyKeyRow {
    pub id: DbId,
    pub owner_id: DbId,
    pub name: String,
    pub property_name: String,
    pub data_type: String,
    pub required: bool,
    pub options: Vec<String>,
    pub default_value: Option<serde_json::Value>,
    pub validation: Json<KeyValidation>,
}

impl TryFrom<PropertyKeyRow> for PropertyKey {
    type Error = CoreError;

    fn try_from(row: PropertyKeyRow) -> Result<Self, Self::Error> {
        Ok(PropertyKey {
            id: row.id,
            name: row.name,
            property_name: row.property_name,
            data_type: row.data_type.parse()?,
            required: row.required,
            options: row.options,
            default_value: row.default_value,
            validation: row.validation.0,
        })
    }
}

fn schema(keys: Vec<PropertyKeyRow>) -> Result<PropertySchema, CoreError> {
    keys.into_iter()
        .map(PropertyKey::try_from)
        .collect::<Result<Vec<_>, _>>()
        .map(PropertySchema::new)
}

impl MetatypeRow {
    pub fn into_domain(self, keys: Vec<PropertyKeyRow>) -> Result<Metatype, CoreError> {
        Ok(Metatype {
            id: self.id,
            container_id: self.container_id,
            name: self.name,
            schema: schema(keys)?,
        })
    }
}

/// A relationship pair joined with its relationship's name.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct RelationshipPairRow {
    pub id: DbId,
    pub container_id: DbId,
    pub name: String,
    pub origin_metatype_id: DbId,
    pub destination_metatype_id: DbId,
    pub metatype_relationship_id: DbId,
    pub relationship_name: String,
    pub relationship_type: String,
    pub archived: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl RelationshipPairRow {
    pub fn into_domain(self, keys: Vec<PropertyKeyRow>) -> Result<RelationshipPair, CoreError> {
        Ok(RelationshipPair {
            id: self.id,
            container_id: self.container_id,
            name: self.name,
            origin_metatype_id: self.origin_metatype_id,
            destination_metatype_id: self.destination_metatype_id,
            relationship_type: self.relationship_type.parse()?,
            relationship: Relationship {
                id: self.metatype_relationship_id,
                container_id: self.container_id,
                name: self.relationship_name,
                schema: schema(keys)?,
            },
        })
    }
}

/// DTO for creating a property key on a metatype or relationship.
#[derive(Debug, Clone)]
pub struct CreatePropertyKey {
    pub name: String,
    pub property_name: String,
    pub data_type: String,
    pub required: bool,
    pub options: Vec<String>,
    pub default_value: Option<serde_json::Value>,
    pub validation: KeyValidation,
}
