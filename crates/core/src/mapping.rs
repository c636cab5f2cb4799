//! Type mappings and the change-set applied when saving one.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use validator::{Validate, ValidationError};

use crate::transformation::{
    Condition, KeyMapping, Transformation, TransformationConfig, TransformationTarget,
};
use crate::types::DbId;

/// Error recorded on staging rows whose shape has no usable mapping yet.
pub const NO_TRANSFORMATIONS_ERROR: &str = "no transformations for type mapping";

/// Cache key of a mapping lookup.
pub fn cache_key(data_source_id: DbId, shape_hash: &str) -> String {
    format!("{data_source_id}:{shape_hash}")
}

/// A shape hash of one data source bound to its transformations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeMapping {
    pub id: DbId,
    pub container_id: DbId,
    pub data_source_id: DbId,
    pub shape_hash: String,
    pub sample_payload: Option<Value>,
    pub active: bool,
    #[serde(default)]
    pub transformations: Vec<Transformation>,
}

impl TypeMapping {
    /// Transformations that run, in order.
    pub fn live_transformations(&self) -> impl Iterator<Item = &Transformation> {
        self.transformations.iter().filter(|t| !t.archived)
    }

    /// Whether rows of this shape can be processed.
    pub fn is_usable(&self) -> bool {
        self.active && self.live_transformations().next().is_some()
    }
}

/// A transformation as submitted for saving. `id` is absent for new ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_transformation_input"))]
pub struct TransformationInput {
    #[serde(default)]
    pub id: Option<DbId>,
    #[validate(length(min = 1, max = 255))]
    #[serde(default)]
    pub name: Option<String>,
    pub target: TransformationTarget,
    #[serde(default)]
    pub keys: Vec<KeyMapping>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub config: TransformationConfig,
    #[serde(default)]
    pub root_array: Option<String>,
    #[serde(default)]
    pub unique_identifier_key: Option<String>,
    #[serde(default)]
    pub archived: bool,
}

fn invalid(code: &'static str, message: &'static str) -> ValidationError {
    let mut err = ValidationError::new(code);
    err.message = Some(message.into());
    err
}

fn validate_transformation_input(input: &TransformationInput) -> Result<(), ValidationError> {
    match &input.target {
        TransformationTarget::Node { metatype_id } if *metatype_id <= 0 => {
            return Err(invalid("metatype", "node transformations need a metatype"));
        }
        TransformationTarget::Edge(edge) if edge.relationship_pair_id <= 0 => {
            return Err(invalid("relationship_pair", "edge transformations need a relationship pair"));
        }
        TransformationTarget::Node { .. } => {
            if input.keys.iter().any(|k| k.metatype_key_id.is_none()) {
                return Err(invalid("keys", "node transformation keys must target a metatype key"));
            }
        }
        TransformationTarget::Edge(_) => {
            if input.keys.iter().any(|k| k.metatype_relationship_key_id.is_none()) {
                return Err(invalid("keys", "edge transformation keys must target a relationship key"));
            }
        }
    }

    if input.keys.iter().any(|k| k.key.is_none() && k.value.is_none()) {
        return Err(invalid("keys", "a key mapping needs a payload key or a constant value"));
    }
    if input.root_array.as_deref().is_some_and(str::is_empty) {
        return Err(invalid("root_array", "root array must not be empty"));
    }
    Ok(())
}

impl TransformationInput {
    /// Whether saving this input would change `existing`.
    fn differs_from(&self, existing: &Transformation) -> bool {
        self.name != existing.name
            || self.target != existing.target
            || self.keys != existing.keys
            || self.conditions != existing.conditions
            || self.config != existing.config
            || self.root_array != existing.root_array
            || self.unique_identifier_key != existing.unique_identifier_key
            || self.archived != existing.archived
    }
}

impl From<&Transformation> for TransformationInput {
    fn from(t: &Transformation) -> Self {
        Self {
            id: Some(t.id),
            name: t.name.clone(),
            target: t.target.clone(),
            keys: t.keys.clone(),
            conditions: t.conditions.clone(),
            config: t.config,
            root_array: t.root_array.clone(),
            unique_identifier_key: t.unique_identifier_key.clone(),
            archived: t.archived,
        }
    }
}

/// Explicit set of transformation writes for one mapping save.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransformationChangeSet {
    pub to_create: Vec<TransformationInput>,
    pub to_update: Vec<TransformationInput>,
    pub to_delete: Vec<DbId>,
}

impl TransformationChangeSet {
    /// Compare the stored transformations with the desired list.
    ///
    /// Inputs without an id (or with an id the mapping does not own) are
    /// created; changed inputs are updated; stored transformations missing
    /// from `desired` are deleted.
    pub fn diff(existing: &[Transformation], desired: Vec<TransformationInput>) -> Self {
        let mut change_set = Self::default();
        let mut kept = HashSet::new();

        for input in desired {
            match input.id.and_then(|id| existing.iter().find(|t| t.id == id)) {
                Some(current) => {
                    kept.insert(current.id);
                    if input.differs_from(current) {
                        change_set.to_update.push(input);
                    }
                }
                None => change_set.to_create.push(TransformationInput { id: None, ..input }),
            }
        }

        change_set.to_delete = existing
            .iter()
            .map(|t| t.id)
            .filter(|id| !kept.contains(id))
            .collect();
        change_set
    }

    pub fn is_empty(&self) -> bool {
        self.to_create.is_empty() && self.to_update.is_empty() && self.to_delete.is_empty()
    }
}
