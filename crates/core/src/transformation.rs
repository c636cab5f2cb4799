//! Transformation engine: turns one staged record into typed graph objects.
//!
//! A [`Transformation`] belongs to a type mapping and targets either a
//! metatype (producing nodes) or a relationship pair (producing edges). It
//! projects payload paths onto ontology keys, converts values to the key's
//! data type and validates the result against the target schema.
//!
//! [`apply_transformation`] is pure: it never touches storage. Callers supply
//! the target schema (see [`TargetSchema`]) resolved beforehand.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::conversion::{convert_value, Conversion};
use crate::graph::{ConversionMetadata, EdgeDraft, EndpointRef, NodeDraft, SkippedElement};
use crate::ontology::{Metatype, PropertyKey, RelationshipPair};
use crate::types::{DbId, PropertyMap};

/// Marker for "every element of this array" in paths and root arrays.
pub const ARRAY_MARKER: &str = "[]";

// ---------------------------------------------------------------------------
// Transformation definition
// ---------------------------------------------------------------------------

/// What to do when a key cannot be extracted or converted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorAction {
    /// Leave the property out and carry on.
    Ignore,
    /// Fail the record only if the ontology key is required.
    #[default]
    FailOnRequired,
    /// Fail the record on any extraction or conversion problem.
    Fail,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformationConfig {
    #[serde(default)]
    pub on_conversion_error: ErrorAction,
    #[serde(default)]
    pub on_key_extraction_error: ErrorAction,
}

/// Projection of one payload path (or a constant) onto one ontology key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyMapping {
    /// Dotted payload path. When absent, `value` is used as a constant.
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub metatype_key_id: Option<DbId>,
    #[serde(default)]
    pub metatype_relationship_key_id: Option<DbId>,
    #[serde(default)]
    pub value: Option<Value>,
    /// chrono format string applied to `date` keys.
    #[serde(default)]
    pub date_conversion_format: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Conjunction {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = "in")]
    In,
    #[serde(rename = "contains")]
    Contains,
    #[serde(rename = "exists")]
    Exists,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
}

/// A predicate over the payload gating whether a transformation applies.
///
/// Sub-expressions are folded left to right: an `OR` is only evaluated while
/// the running result is false, an `AND` only while it is true.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(default)]
    pub expression: Option<Conjunction>,
    pub key: String,
    pub operator: Operator,
    #[serde(default)]
    pub value: Value,
    #[serde(default)]
    pub subexpressions: Vec<Condition>,
}

/// Which node attribute an edge connection parameter filters on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterKind {
    DataSource,
    MetatypeId,
    MetatypeName,
    OriginalId,
    Property,
    Id,
}

/// Equality filter selecting candidate endpoint nodes for an edge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeConnectionParameter {
    #[serde(rename = "type")]
    pub kind: ParameterKind,
    /// Payload path the value is read from at transformation time.
    #[serde(default)]
    pub key: Option<String>,
    /// Node property name, for [`ParameterKind::Property`].
    #[serde(default)]
    pub property: Option<String>,
    #[serde(default)]
    pub value: Option<Value>,
}

/// Endpoint configuration of an edge-producing transformation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EdgeTarget {
    pub relationship_pair_id: DbId,
    #[serde(default)]
    pub origin_id_key: Option<String>,
    #[serde(default)]
    pub origin_metatype_id: Option<DbId>,
    #[serde(default)]
    pub origin_data_source_id: Option<DbId>,
    #[serde(default)]
    pub destination_id_key: Option<String>,
    #[serde(default)]
    pub destination_metatype_id: Option<DbId>,
    #[serde(default)]
    pub destination_data_source_id: Option<DbId>,
    #[serde(default)]
    pub origin_parameters: Vec<EdgeConnectionParameter>,
    #[serde(default)]
    pub destination_parameters: Vec<EdgeConnectionParameter>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransformationTarget {
    Node { metatype_id: DbId },
    Edge(EdgeTarget),
}

/// One rule of a type mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transformation {
    pub id: DbId,
    pub type_mapping_id: DbId,
    pub container_id: DbId,
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

// ---------------------------------------------------------------------------
// Engine inputs / outputs
// ---------------------------------------------------------------------------

/// The staged record being transformed.
#[derive(Debug, Clone, Copy)]
pub struct StagingContext<'a> {
    pub data_source_id: DbId,
    pub import_id: Option<DbId>,
    pub data_staging_id: Option<DbId>,
    pub data: &'a Value,
}

/// Ontology schema the transformation writes into.
#[derive(Debug, Clone, Copy)]
pub enum TargetSchema<'a> {
    Metatype(&'a Metatype),
    RelationshipPair(&'a RelationshipPair),
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransformOutput {
    Nodes(Vec<NodeDraft>),
    Edges(Vec<EdgeDraft>),
}

impl TransformOutput {
    pub fn len(&self) -> usize {
        match self {
            Self::Nodes(n) => n.len(),
            Self::Edges(e) => e.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransformError {
    #[error("transformation {0} is archived")]
    Archived(DbId),

    #[error("root array `{0}` does not extract an array from the payload")]
    NotAnArray(String),

    #[error("unable to fetch data from payload for key `{0}`")]
    MissingKey(String),

    #[error("unable to convert value for key `{key}`: {message}")]
    ConversionFailed { key: String, message: String },

    #[error("ontology key {0} is not part of the target schema")]
    UnknownKey(DbId),

    #[error("target schema does not match the transformation target")]
    TargetMismatch,

    #[error("{0}")]
    Validation(String),
}

// ---------------------------------------------------------------------------
// apply_transformation
// ---------------------------------------------------------------------------

/// Apply `transformation` to one staged record.
///
/// Returns zero or more nodes or edges. A record that does not satisfy the
/// transformation's conditions yields an empty output, not an error. With a
/// root array, elements that fail are skipped; the record only fails when
/// every element does.
pub fn apply_transformation(
    transformation: &Transformation,
    record: &StagingContext<'_>,
    schema: TargetSchema<'_>,
) -> Result<TransformOutput, TransformError> {
    if transformation.archived {
        return Err(TransformError::Archived(transformation.id));
    }

    match (&transformation.target, schema) {
        (TransformationTarget::Node { metatype_id }, TargetSchema::Metatype(mt)) if mt.id == *metatype_id => {}
        (TransformationTarget::Edge(edge), TargetSchema::RelationshipPair(pair))
            if pair.id == edge.relationship_pair_id => {}
        _ => return Err(TransformError::TargetMismatch),
    }

    let indices = match &transformation.root_array {
        None => vec![Vec::new()],
        Some(root) => expand_root_array(root, record.data)?,
    };

    let mut nodes = Vec::new();
    let mut edges = Vec::new();
    let mut first_error = None;
    let mut skipped = Vec::new();
    let expanded = transformation.root_array.is_some();

    for index in &indices {
        if !conditions_hold(&transformation.conditions, record.data, index) {
            continue;
        }

        match generate(transformation, record, schema, index) {
            Ok(Generated::Node(node)) => nodes.push(node),
            Ok(Generated::Edge(edge)) => edges.push(edge),
            Err(e) if expanded => {
                skipped.push(SkippedElement {
                    index: index.clone(),
                    error: e.to_string(),
                });
                first_error.get_or_insert(e);
            }
            Err(e) => return Err(e),
        }
    }

    if let Some(e) = first_error {
        if nodes.is_empty() && edges.is_empty() {
            return Err(e);
        }
        for metadata in nodes
            .iter_mut()
            .map(|n| &mut n.metadata)
            .chain(edges.iter_mut().map(|e| &mut e.metadata))
        {
            metadata.skipped_elements.extend(skipped.iter().cloned());
        }
    }

    Ok(match transformation.target {
        TransformationTarget::Node { .. } => TransformOutput::Nodes(nodes),
        TransformationTarget::Edge(_) => TransformOutput::Edges(edges),
    })
}

/// Enumerate the index vectors addressing every innermost element of a root
/// array such as `items[].parts[]`.
fn expand_root_array(root: &str, payload: &Value) -> Result<Vec<Vec<usize>>, TransformError> {
    let root = if root.ends_with(ARRAY_MARKER) {
        root.to_string()
    } else {
        format!("{root}{ARRAY_MARKER}")
    };
    let segments: Vec<&str> = root.split(ARRAY_MARKER).collect();
    // "a[]" splits into ["a", ""], so the depth is one less than the count.
    let depth = segments.len() - 1;

    let mut frontier: Vec<Vec<usize>> = vec![Vec::new()];
    for level in 0..depth {
        let path = segments[..=level].join(ARRAY_MARKER);
        let path = path.trim_end_matches('.');
        let mut next = Vec::new();
        for index in &frontier {
            match get_nested_value(path, payload, index) {
                Some(Value::Array(items)) => {
                    for i in 0..items.len() {
                        let mut extended = index.clone();
                        extended.push(i);
                        next.push(extended);
                    }
                }
                _ => return Err(TransformError::NotAnArray(root.clone())),
            }
        }
        frontier = next;
    }
    Ok(frontier)
}

/// Resolve a dotted path against a payload.
///
/// When the current value is an array, a numeric segment indexes it directly;
/// any other segment (typically `[]`) consumes the next entry of `index`.
pub fn get_nested_value<'a>(path: &str, payload: &'a Value, index: &[usize]) -> Option<&'a Value> {
    let mut current = payload;
    let mut remaining = index.iter();

    for raw in path.split('.') {
        // `items[]` and `items.[]` both address elements of `items`.
        let (segment, marker) = match raw.strip_suffix(ARRAY_MARKER) {
            Some(name) => (name, true),
            None => (raw, false),
        };

        if !segment.is_empty() {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => match segment.parse::<usize>() {
                    Ok(i) => items.get(i)?,
                    Err(_) => {
                        let element = items.get(*remaining.next()?)?;
                        element.as_object()?.get(segment)?
                    }
                },
                _ => return None,
            };
        }

        if marker {
            let items = current.as_array()?;
            current = items.get(*remaining.next()?)?;
        }
    }
    Some(current)
}

// ---------------------------------------------------------------------------
// Conditions
// ---------------------------------------------------------------------------

/// Whether a transformation's conditions admit the record. No conditions
/// admit everything; otherwise any top-level condition suffices.
pub fn conditions_hold(conditions: &[Condition], payload: &Value, index: &[usize]) -> bool {
    conditions.is_empty() || conditions.iter().any(|c| condition_holds(c, payload, index))
}

fn condition_holds(condition: &Condition, payload: &Value, index: &[usize]) -> bool {
    let value = get_nested_value(&condition.key, payload, index);
    let mut result = compare(condition.operator, value, &condition.value);
    for sub in &condition.subexpressions {
        let sub_value = get_nested_value(&sub.key, payload, index);
        match sub.expression {
            Some(Conjunction::Or) if !result => result = compare(sub.operator, sub_value, &sub.value),
            Some(Conjunction::And) if result => result = compare(sub.operator, sub_value, &sub.value),
            _ => {}
        }
    }
    result
}

fn compare(operator: Operator, value: Option<&Value>, expected: &Value) -> bool {
    let Some(value) = value else {
        return false;
    };

    match operator {
        Operator::Exists => !value.is_null(),
        Operator::Eq => loose_eq(value, expected),
        Operator::Ne => !loose_eq(value, expected),
        Operator::In => match expected {
            Value::String(list) => list.split(',').any(|item| item.trim() == render(value)),
            Value::Array(items) => items.iter().any(|item| loose_eq(value, item)),
            _ => false,
        },
        Operator::Contains => render(value).contains(&render(expected)),
        Operator::Gt | Operator::Ge | Operator::Lt | Operator::Le => {
            let ordering = match (as_number(value), as_number(expected)) {
                (Some(a), Some(b)) => a.partial_cmp(&b),
                _ => Some(render(value).cmp(&render(expected))),
            };
            let Some(ordering) = ordering else {
                return false;
            };
            match operator {
                Operator::Gt => ordering.is_gt(),
                Operator::Ge => ordering.is_ge(),
                Operator::Lt => ordering.is_lt(),
                _ => ordering.is_le(),
            }
        }
    }
}

/// Equality that treats `1`, `1.0` and `"1"` as the same value.
fn loose_eq(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    match (as_number(a), as_number(b)) {
        (Some(x), Some(y)) => x == y,
        _ => !a.is_object() && !a.is_array() && render(a) == render(b),
    }
}

fn as_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn render(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Projection
// ---------------------------------------------------------------------------

enum Generated {
    Node(NodeDraft),
    Edge(EdgeDraft),
}

fn generate(
    transformation: &Transformation,
    record: &StagingContext<'_>,
    schema: TargetSchema<'_>,
    index: &[usize],
) -> Result<Generated, TransformError> {
    let (properties, metadata) = project_keys(transformation, record.data, schema, index)?;

    match (&transformation.target, schema) {
        (TransformationTarget::Node { metatype_id }, TargetSchema::Metatype(metatype)) => {
            let properties = metatype
                .validate_and_transform_properties(&properties)
                .map_err(|e| TransformError::Validation(e.to_string()))?;

            let original_data_id = transformation
                .unique_identifier_key
                .as_deref()
                .and_then(|key| get_nested_value(key, record.data, index))
                .and_then(identifier);

            Ok(Generated::Node(NodeDraft {
                id: None,
                container_id: transformation.container_id,
                metatype_id: *metatype_id,
                data_source_id: Some(record.data_source_id),
                import_id: record.import_id,
                data_staging_id: record.data_staging_id,
                transformation_id: Some(transformation.id),
                original_data_id,
                graph_id: None,
                properties,
                metadata,
            }))
        }
        (TransformationTarget::Edge(target), TargetSchema::RelationshipPair(pair)) => {
            let properties = pair
                .relationship
                .validate_and_transform_properties(&properties)
                .map_err(|e| TransformError::Validation(e.to_string()))?;

            let read_id = |key: &Option<String>| {
                key.as_deref()
                    .and_then(|k| get_nested_value(k, record.data, index))
                    .and_then(identifier)
            };

            Ok(Generated::Edge(EdgeDraft {
                id: None,
                container_id: transformation.container_id,
                relationship_pair_id: pair.id,
                data_source_id: Some(record.data_source_id),
                import_id: record.import_id,
                data_staging_id: record.data_staging_id,
                transformation_id: Some(transformation.id),
                origin: EndpointRef {
                    node_id: None,
                    original_id: read_id(&target.origin_id_key),
                    metatype_id: target.origin_metatype_id.or(Some(pair.origin_metatype_id)),
                    data_source_id: target.origin_data_source_id.or(Some(record.data_source_id)),
                },
                destination: EndpointRef {
                    node_id: None,
                    original_id: read_id(&target.destination_id_key),
                    metatype_id: target.destination_metatype_id.or(Some(pair.destination_metatype_id)),
                    data_source_id: target.destination_data_source_id.or(Some(record.data_source_id)),
                },
                origin_parameters: fill_parameters(&target.origin_parameters, record.data, index),
                destination_parameters: fill_parameters(&target.destination_parameters, record.data, index),
                properties,
                metadata,
            }))
        }
        _ => Err(TransformError::TargetMismatch),
    }
}

/// Render an identifier value as a string. Null and empty values are absent.
fn identifier(v: &Value) -> Option<String> {
    match v {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn fill_parameters(
    parameters: &[EdgeConnectionParameter],
    payload: &Value,
    index: &[usize],
) -> Vec<EdgeConnectionParameter> {
    parameters
        .iter()
        .map(|p| {
            let mut filled = p.clone();
            if let Some(key) = &p.key {
                filled.value = get_nested_value(key, payload, index).cloned();
            }
            filled
        })
        .collect()
}

fn project_keys(
    transformation: &Transformation,
    payload: &Value,
    schema: TargetSchema<'_>,
    index: &[usize],
) -> Result<(PropertyMap, ConversionMetadata), TransformError> {
    let mut properties = PropertyMap::new();
    let mut metadata = ConversionMetadata::default();
    let config = transformation.config;

    for mapping in &transformation.keys {
        let Some(key) = target_key(mapping, schema)? else {
            continue;
        };

        if let Some(constant) = &mapping.value {
            properties.insert(key.property_name.clone(), constant.clone());
        }
        let Some(path) = &mapping.key else {
            continue;
        };

        let Some(value) = get_nested_value(path, payload, index).filter(|v| !v.is_null()) else {
            if must_fail(config.on_key_extraction_error, key) {
                return Err(TransformError::MissingKey(path.clone()));
            }
            continue;
        };

        match convert_value(key.data_type, value, mapping.date_conversion_format.as_deref()) {
            None => {
                properties.insert(key.property_name.clone(), value.clone());
            }
            Some(conversion) => match conversion.converted_value.clone() {
                Some(converted) if !conversion.is_error() => {
                    properties.insert(key.property_name.clone(), converted);
                    metadata.conversions.push(conversion);
                }
                _ => {
                    let message = conversion.errors.clone().unwrap_or_default();
                    metadata.failed_conversions.push(tag_conversion(conversion, path));
                    if must_fail(config.on_conversion_error, key) {
                        return Err(TransformError::ConversionFailed {
                            key: path.clone(),
                            message,
                        });
                    }
                }
            },
        }
    }

    Ok((properties, metadata))
}

fn tag_conversion(mut conversion: Conversion, path: &str) -> Conversion {
    if let Some(errors) = conversion.errors.as_mut() {
        *errors = format!("{path}: {errors}");
    }
    conversion
}

fn must_fail(action: ErrorAction, key: &PropertyKey) -> bool {
    match action {
        ErrorAction::Ignore => false,
        ErrorAction::FailOnRequired => key.required,
        ErrorAction::Fail => true,
    }
}

/// Look up the ontology key a mapping writes to. Mappings aimed at the other
/// kind of schema (a relationship key on a node transformation, say) are
/// skipped.
fn target_key<'s>(
    mapping: &KeyMapping,
    schema: TargetSchema<'s>,
) -> Result<Option<&'s PropertyKey>, TransformError> {
    let (id, keys) = match schema {
        TargetSchema::Metatype(mt) => (mapping.metatype_key_id, &mt.schema),
        TargetSchema::RelationshipPair(pair) => (mapping.metatype_relationship_key_id, &pair.relationship.schema),
    };
    match id {
        None => Ok(None),
        Some(id) => keys.key_by_id(id).map(Some).ok_or(TransformError::UnknownKey(id)),
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;
    use crate::cardinality::RelationshipType;
    use crate::ontology::{DataType, KeyValidation, PropertySchema, Relationship};

    fn key(id: DbId, name: &str, data_type: DataType, required: bool) -> PropertyKey {
        PropertyKey {
            id,
            name: name.into(),
            property_name: name.into(),
            data_type,
            required,
            options: vec![],
            default_value: None,
            validation: KeyValidation::default(),
        }
    }

    fn metatype(keys: Vec<PropertyKey>) -> Metatype {
        Metatype {
            id: 10,
            container_id: 1,
            name: "Asset".into(),
            schema: PropertySchema::new(keys),
        }
    }

    fn node_transformation(keys: Vec<KeyMapping>) -> Transformation {
        Transformation {
            id: 100,
            type_mapping_id: 50,
            container_id: 1,
            name: None,
            target: TransformationTarget::Node { metatype_id: 10 },
            keys,
            conditions: vec![],
            config: TransformationConfig::default(),
            root_array: None,
            unique_identifier_key: None,
            archived: false,
        }
    }

    fn map(path: &str, key_id: DbId) -> KeyMapping {
        KeyMapping {
            key: Some(path.into()),
            metatype_key_id: Some(key_id),
            ..KeyMapping::default()
        }
    }

    fn record(data: &Value) -> StagingContext<'_> {
        StagingContext {
            data_source_id: 2,
            import_id: Some(3),
            data_staging_id: Some(4),
            data,
        }
    }

    fn nodes(out: TransformOutput) -> Vec<NodeDraft> {
        match out {
            TransformOutput::Nodes(n) => n,
            other => panic!("expected nodes, got {other:?}"),
        }
    }

    #[test]
    fn single_integer_key_produces_one_node() {
        let mt = metatype(vec![key(1, "a", DataType::Number, true)]);
        let t = node_transformation(vec![map("a", 1)]);
        let data = json!({"a": 1});

        let out = nodes(apply_transformation(&t, &record(&data), TargetSchema::Metatype(&mt)).unwrap());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].metatype_id, 10);
        assert_eq!(out[0].properties["a"], json!(1));
        assert_eq!(out[0].data_staging_id, Some(4));
        assert_eq!(out[0].transformation_id, Some(100));
    }

    #[test]
    fn conversions_are_recorded_in_metadata() {
        let mt = metatype(vec![key(1, "a", DataType::Number, true)]);
        let t = node_transformation(vec![map("a", 1)]);
        let data = json!({"a": "7"});

        let out = nodes(apply_transformation(&t, &record(&data), TargetSchema::Metatype(&mt)).unwrap());
        assert_eq!(out[0].properties["a"], json!(7));
        assert_eq!(out[0].metadata.conversions.len(), 1);
    }

    #[test]
    fn failed_conversion_of_optional_key_is_kept_in_metadata() {
        let mt = metatype(vec![key(1, "a", DataType::Number, true), key(2, "b", DataType::Number, false)]);
        let t = node_transformation(vec![map("a", 1), map("b", 2)]);
        let data = json!({"a": 1, "b": "not a number"});

        let out = nodes(apply_transformation(&t, &record(&data), TargetSchema::Metatype(&mt)).unwrap());
        assert!(out[0].properties.get("b").is_none());
        assert_eq!(out[0].metadata.failed_conversions.len(), 1);
    }

    #[test]
    fn failed_conversion_of_required_key_fails_the_record() {
        let mt = metatype(vec![key(1, "a", DataType::Number, true)]);
        let t = node_transformation(vec![map("a", 1)]);
        let data = json!({"a": "abc"});

        let err = apply_transformation(&t, &record(&data), TargetSchema::Metatype(&mt)).unwrap_err();
        assert_matches!(err, TransformError::ConversionFailed { .. });
    }

    #[test]
    fn missing_key_respects_error_action() {
        let mt = metatype(vec![key(1, "a", DataType::Number, false)]);
        let mut t = node_transformation(vec![map("a", 1)]);
        let data = json!({"z": 1});

        assert!(apply_transformation(&t, &record(&data), TargetSchema::Metatype(&mt)).is_ok());

        t.config.on_key_extraction_error = ErrorAction::Fail;
        let err = apply_transformation(&t, &record(&data), TargetSchema::Metatype(&mt)).unwrap_err();
        assert_matches!(err, TransformError::MissingKey(k) if k == "a");
    }

    #[test]
    fn constant_values_fill_keys() {
        let mt = metatype(vec![key(1, "kind", DataType::String, true)]);
        let t = node_transformation(vec![KeyMapping {
            metatype_key_id: Some(1),
            value: Some(json!("pump")),
            ..KeyMapping::default()
        }]);
        let data = json!({});

        let out = nodes(apply_transformation(&t, &record(&data), TargetSchema::Metatype(&mt)).unwrap());
        assert_eq!(out[0].properties["kind"], json!("pump"));
    }

    #[test]
    fn unknown_key_id_is_an_error() {
        let mt = metatype(vec![]);
        let t = node_transformation(vec![map("a", 99)]);
        let data = json!({"a": 1});
        assert_matches!(
            apply_transformation(&t, &record(&data), TargetSchema::Metatype(&mt)),
            Err(TransformError::UnknownKey(99))
        );
    }

    #[test]
    fn archived_and_mismatched_targets_are_rejected() {
        let mt = metatype(vec![]);
        let mut t = node_transformation(vec![]);
        t.archived = true;
        let data = json!({});
        assert_matches!(
            apply_transformation(&t, &record(&data), TargetSchema::Metatype(&mt)),
            Err(TransformError::Archived(100))
        );

        let mut other = metatype(vec![]);
        other.id = 11;
        let t = node_transformation(vec![]);
        assert_matches!(
            apply_transformation(&t, &record(&data), TargetSchema::Metatype(&other)),
            Err(TransformError::TargetMismatch)
        );
    }

    #[test]
    fn unique_identifier_becomes_original_id() {
        let mt = metatype(vec![]);
        let mut t = node_transformation(vec![]);
        t.unique_identifier_key = Some("meta.id".into());
        let data = json!({"meta": {"id": 42}});

        let out = nodes(apply_transformation(&t, &record(&data), TargetSchema::Metatype(&mt)).unwrap());
        assert_eq!(out[0].original_data_id.as_deref(), Some("42"));
        assert!(out[0].composite_identity().is_some());
    }

    #[test]
    fn nested_values_and_indices() {
        let data = json!({"a": {"b": [{"c": 1}, {"c": 2}]}});
        assert_eq!(get_nested_value("a.b.1.c", &data, &[]), Some(&json!(2)));
        assert_eq!(get_nested_value("a.b.[].c", &data, &[0]), Some(&json!(1)));
        assert_eq!(get_nested_value("a.b[].c", &data, &[1]), Some(&json!(2)));
        assert_eq!(get_nested_value("a.missing", &data, &[]), None);
        assert_eq!(get_nested_value("a.b.[].c", &data, &[]), None);
    }

    #[test]
    fn root_array_yields_one_node_per_element() {
        let mt = metatype(vec![key(1, "name", DataType::String, true)]);
        let mut t = node_transformation(vec![map("items.[].name", 1)]);
        t.root_array = Some("items".into());
        let data = json!({"items": [{"name": "x"}, {"name": "y"}, {"other": 1}]});

        let out = nodes(apply_transformation(&t, &record(&data), TargetSchema::Metatype(&mt)).unwrap());
        let names: Vec<_> = out.iter().map(|n| n.properties["name"].clone()).collect();
        assert_eq!(names, vec![json!("x"), json!("y")]);

        // The dropped third element is recorded on every surviving node.
        for node in &out {
            let skipped = &node.metadata.skipped_elements;
            assert_eq!(skipped.len(), 1);
            assert_eq!(skipped[0].index, vec![2]);
            assert!(!skipped[0].error.is_empty());
        }
    }

    #[test]
    fn nested_root_arrays() {
        let mt = metatype(vec![key(1, "part", DataType::String, true)]);
        let mut t = node_transformation(vec![map("items.[].parts.[].p", 1)]);
        t.root_array = Some("items[].parts[]".into());
        let data = json!({"items": [{"parts": [{"p": "a"}, {"p": "b"}]}, {"parts": [{"p": "c"}]}]});

        let out = nodes(apply_transformation(&t, &record(&data), TargetSchema::Metatype(&mt)).unwrap());
        assert_eq!(out.len(), 3);
        assert_eq!(out[2].properties["part"], json!("c"));
    }

    #[test]
    fn root_array_that_is_not_an_array_fails() {
        let mt = metatype(vec![]);
        let mut t = node_transformation(vec![]);
        t.root_array = Some("items".into());
        let data = json!({"items": 1});
        assert_matches!(
            apply_transformation(&t, &record(&data), TargetSchema::Metatype(&mt)),
            Err(TransformError::NotAnArray(_))
        );
    }

    #[test]
    fn conditions_gate_output() {
        let mt = metatype(vec![]);
        let mut t = node_transformation(vec![]);
        t.conditions = vec![Condition {
            expression: None,
            key: "type".into(),
            operator: Operator::Eq,
            value: json!("pump"),
            subexpressions: vec![Condition {
                expression: Some(Conjunction::And),
                key: "size".into(),
                operator: Operator::Ge,
                value: json!(10),
                subexpressions: vec![],
            }],
        }];

        let pass = json!({"type": "pump", "size": "12"});
        let small = json!({"type": "pump", "size": 3});
        let other = json!({"type": "valve", "size": 12});
        let run = |d: &Value| apply_transformation(&t, &record(d), TargetSchema::Metatype(&mt)).unwrap().len();
        assert_eq!(run(&pass), 1);
        assert_eq!(run(&small), 0);
        assert_eq!(run(&other), 0);
    }

    #[test]
    fn condition_operators() {
        let data = json!({"n": 5, "s": "hello", "none": null});
        let cond = |key: &str, operator, value| Condition {
            expression: None,
            key: key.into(),
            operator,
            value,
            subexpressions: vec![],
        };
        assert!(conditions_hold(&[cond("n", Operator::Eq, json!("5"))], &data, &[]));
        assert!(conditions_hold(&[cond("n", Operator::In, json!("1, 5"))], &data, &[]));
        assert!(conditions_hold(&[cond("s", Operator::Contains, json!("ell"))], &data, &[]));
        assert!(conditions_hold(&[cond("s", Operator::Exists, Value::Null)], &data, &[]));
        assert!(!conditions_hold(&[cond("none", Operator::Exists, Value::Null)], &data, &[]));
        assert!(!conditions_hold(&[cond("missing", Operator::Ne, json!(1))], &data, &[]));
        assert!(conditions_hold(&[cond("n", Operator::Lt, json!(6))], &data, &[]));
        assert!(conditions_hold(
            &[cond("n", Operator::Gt, json!(9)), cond("s", Operator::Eq, json!("hello"))],
            &data,
            &[]
        ));
    }

    #[test]
    fn edge_transformation_reads_endpoints_and_parameters() {
        let pair = RelationshipPair {
            id: 20,
            container_id: 1,
            name: "Asset contains Part".into(),
            origin_metatype_id: 10,
            destination_metatype_id: 11,
            relationship_type: RelationshipType::OneToMany,
            relationship: Relationship {
                id: 30,
                container_id: 1,
                name: "contains".into(),
                schema: PropertySchema::new(vec![key(5, "weight", DataType::Float, false)]),
            },
        };
        let t = Transformation {
            target: TransformationTarget::Edge(EdgeTarget {
                relationship_pair_id: 20,
                origin_id_key: Some("asset".into()),
                destination_id_key: Some("part".into()),
                destination_parameters: vec![EdgeConnectionParameter {
                    kind: ParameterKind::Property,
                    key: Some("serial".into()),
                    property: Some("serial".into()),
                    value: None,
                }],
                ..EdgeTarget::default()
            }),
            keys: vec![KeyMapping {
                key: Some("w".into()),
                metatype_relationship_key_id: Some(5),
                ..KeyMapping::default()
            }],
            ..node_transformation(vec![])
        };
        let data = json!({"asset": "A1", "part": 7, "w": "0.5", "serial": "S-9"});

        let out = apply_transformation(&t, &record(&data), TargetSchema::RelationshipPair(&pair)).unwrap();
        let TransformOutput::Edges(edges) = out else {
            panic!("expected edges");
        };
        let edge = &edges[0];
        assert_eq!(edge.origin.original_id.as_deref(), Some("A1"));
        assert_eq!(edge.destination.original_id.as_deref(), Some("7"));
        assert_eq!(edge.origin.metatype_id, Some(10));
        assert_eq!(edge.destination.data_source_id, Some(2));
        assert_eq!(edge.properties["weight"], json!(0.5));
        assert_eq!(edge.destination_parameters[0].value, Some(json!("S-9")));
        assert_eq!(edge.composite_original_id().as_deref(), Some("A1+20+7"));
    }
}
