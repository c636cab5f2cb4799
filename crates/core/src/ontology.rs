//! Ontology schema objects consumed by the transformation engine and the
//! graph write validator.
//!
//! The ontology itself is authored elsewhere; this module only models what
//! ingestion needs from it: the typed property keys of a metatype or a
//! relationship, and the validation that turns an arbitrary property bag into
//! one that conforms to those keys.

use std::fmt;
use std::str::FromStr;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cardinality::RelationshipType;
use crate::error::CoreError;
use crate::types::{DbId, PropertyMap};

// ---------------------------------------------------------------------------
// DataType
// ---------------------------------------------------------------------------

/// Data type of an ontology property key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Number,
    Number64,
    Float,
    Float64,
    Date,
    String,
    Boolean,
    Enumeration,
    File,
    List,
    Unknown,
}

impl DataType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Number => "number",
            Self::Number64 => "number64",
            Self::Float => "float",
            Self::Float64 => "float64",
            Self::Date => "date",
            Self::String => "string",
            Self::Boolean => "boolean",
            Self::Enumeration => "enumeration",
            Self::File => "file",
            Self::List => "list",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "number" => Self::Number,
            "number64" => Self::Number64,
            "float" => Self::Float,
            "float64" => Self::Float64,
            "date" => Self::Date,
            "string" => Self::String,
            "boolean" => Self::Boolean,
            "enumeration" => Self::Enumeration,
            "file" => Self::File,
            "list" => Self::List,
            "unknown" => Self::Unknown,
            other => {
                return Err(CoreError::Validation(format!("unknown data type `{other}`")))
            }
        })
    }
}

// ---------------------------------------------------------------------------
// PropertyKey / PropertySchema
// ---------------------------------------------------------------------------

/// Optional value constraints on a property key.
///
/// `min`/`max` bound numeric values, or the length of strings and lists.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyValidation {
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    #[serde(default)]
    pub regex: Option<String>,
}

/// One typed property of a metatype or relationship.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyKey {
    pub id: DbId,
    pub name: String,
    pub property_name: String,
    pub data_type: DataType,
    pub required: bool,
    /// Allowed values for `enumeration` keys.
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub default_value: Option<Value>,
    #[serde(default)]
    pub validation: KeyValidation,
}

/// A single failed property check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldViolation {
    pub field: String,
    pub message: String,
}

impl fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Render a list of violations as one error message.
pub fn describe_violations(violations: &[FieldViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Explicit validation schema composed from an ontology key list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PropertySchema {
    keys: Vec<PropertyKey>,
}

impl PropertySchema {
    pub fn new(keys: Vec<PropertyKey>) -> Self {
        Self { keys }
    }

    pub fn keys(&self) -> &[PropertyKey] {
        &self.keys
    }

    pub fn key_by_id(&self, id: DbId) -> Option<&PropertyKey> {
        self.keys.iter().find(|k| k.id == id)
    }

    /// Validate a property bag and return the coerced version.
    ///
    /// - Missing (or `null`) keys take their default value when one exists,
    ///   otherwise they violate `required`.
    /// - Present values must match the key's data type and validation rules.
    /// - Properties that are not ontology keys are dropped.
    pub fn validate(&self, properties: &PropertyMap) -> Result<PropertyMap, Vec<FieldViolation>> {
        let mut output = PropertyMap::new();
        let mut violations = Vec::new();

        for key in &self.keys {
            let value = properties
                .get(&key.property_name)
                .filter(|v| !v.is_null())
                .or(key.default_value.as_ref());

            match value {
                None => {
                    if key.required {
                        violations.push(FieldViolation {
                            field: key.property_name.clone(),
                            message: "required property is missing".into(),
                        });
                    }
                }
                Some(value) => match check_value(key, value) {
                    Ok(()) => {
                        output.insert(key.property_name.clone(), value.clone());
                    }
                    Err(message) => violations.push(FieldViolation {
                        field: key.property_name.clone(),
                        message,
                    }),
                },
            }
        }

        if violations.is_empty() {
            Ok(output)
        } else {
            Err(violations)
        }
    }
}

fn check_value(key: &PropertyKey, value: &Value) -> Result<(), String> {
    check_type(key, value)?;
    check_bounds(&key.validation, value)?;

    if let (Some(pattern), Some(s)) = (&key.validation.regex, value.as_str()) {
        let re = Regex::new(pattern).map_err(|e| format!("invalid validation pattern: {e}"))?;
        if !re.is_match(s) {
            return Err(format!("value does not match pattern `{pattern}`"));
        }
    }
    Ok(())
}

fn check_type(key: &PropertyKey, value: &Value) -> Result<(), String> {
    let ok = match key.data_type {
        DataType::Number => value.is_i64() || value.is_u64(),
        DataType::Float => value.is_number(),
        DataType::Number64 => value.as_str().is_some_and(|s| s.trim().parse::<i64>().is_ok()),
        DataType::Float64 => value.as_str().is_some_and(|s| s.trim().parse::<f64>().is_ok()),
        DataType::Date => value.as_str().is_some_and(|s| crate::conversion::parse_date(s, None).is_some()),
        DataType::String | DataType::File => value.is_string(),
        DataType::Boolean => value.is_boolean(),
        DataType::Enumeration => match value.as_str() {
            Some(s) => {
                if !key.options.is_empty() && !key.options.iter().any(|o| o == s) {
                    return Err(format!(
                        "`{s}` is not one of the allowed values [{}]",
                        key.options.join(", ")
                    ));
                }
                true
            }
            None => false,
        },
        DataType::List => value.is_array(),
        DataType::Unknown => true,
    };

    if ok {
        Ok(())
    } else {
        Err(format!("expected a value of type {}", key.data_type))
    }
}

fn check_bounds(validation: &KeyValidation, value: &Value) -> Result<(), String> {
    let measured = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => Some(s.chars().count() as f64),
        Value::Array(items) => Some(items.len() as f64),
        _ => None,
    };
    let Some(measured) = measured else {
        return Ok(());
    };

    if let Some(min) = validation.min {
        if measured < min {
            return Err(format!("value is below the minimum of {min}"));
        }
    }
    if let Some(max) = validation.max {
        if measured > max {
            return Err(format!("value is above the maximum of {max}"));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Metatype / Relationship / RelationshipPair
// ---------------------------------------------------------------------------

/// Ontology-defined node type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metatype {
    pub id: DbId,
    pub container_id: DbId,
    pub name: String,
    pub schema: PropertySchema,
}

impl Metatype {
    pub fn validate_and_transform_properties(
        &self,
        properties: &PropertyMap,
    ) -> Result<PropertyMap, CoreError> {
        self.schema.validate(properties).map_err(|v| {
            CoreError::Validation(format!(
                "properties do not satisfy metatype {} ({}): {}",
                self.name,
                self.id,
                describe_violations(&v)
            ))
        })
    }
}

/// Ontology-defined relationship (the edge label and its properties).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub id: DbId,
    pub container_id: DbId,
    pub name: String,
    pub schema: PropertySchema,
}

impl Relationship {
    pub fn validate_and_transform_properties(
        &self,
        properties: &PropertyMap,
    ) -> Result<PropertyMap, CoreError> {
        self.schema.validate(properties).map_err(|v| {
            CoreError::Validation(format!(
                "properties do not satisfy relationship {} ({}): {}",
                self.name,
                self.id,
                describe_violations(&v)
            ))
        })
    }
}

/// Edge type binding an origin metatype, a destination metatype and a
/// cardinality rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipPair {
    pub id: DbId,
    pub container_id: DbId,
    pub name: String,
    pub origin_metatype_id: DbId,
    pub destination_metatype_id: DbId,
    pub relationship_type: RelationshipType,
    pub relationship: Relationship,
}

impl RelationshipPair {
    /// Whether the given node metatypes are the pair's declared endpoints.
    pub fn accepts(&self, origin_metatype_id: DbId, destination_metatype_id: DbId) -> bool {
        self.origin_metatype_id == origin_metatype_id
            && self.destination_metatype_id == destination_metatype_id
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn key(id: DbId, name: &str, data_type: DataType, required: bool) -> PropertyKey {
        PropertyKey {
            id,
            name: name.to_string(),
            property_name: name.to_string(),
            data_type,
            required,
            options: vec![],
            default_value: None,
            validation: KeyValidation::default(),
        }
    }

    fn props(v: Value) -> PropertyMap {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn accepts_matching_properties_and_drops_unknown() {
        let schema = PropertySchema::new(vec![
            key(1, "a", DataType::Number, true),
            key(2, "b", DataType::String, false),
        ]);
        let out = schema.validate(&props(json!({"a": 1, "b": "x", "zzz": 3}))).unwrap();
        assert_eq!(Value::Object(out), json!({"a": 1, "b": "x"}));
    }

    #[test]
    fn missing_required_key_is_a_violation() {
        let schema = PropertySchema::new(vec![key(1, "a", DataType::Number, true)]);
        let err = schema.validate(&props(json!({"a": null}))).unwrap_err();
        assert_eq!(err.len(), 1);
        assert_eq!(err[0].field, "a");
    }

    #[test]
    fn default_value_fills_missing_key() {
        let mut k = key(1, "a", DataType::String, true);
        k.default_value = Some(json!("fallback"));
        let schema = PropertySchema::new(vec![k]);
        let out = schema.validate(&PropertyMap::new()).unwrap();
        assert_eq!(out["a"], json!("fallback"));
    }

    #[test]
    fn type_mismatches_are_reported_per_field() {
        let schema = PropertySchema::new(vec![
            key(1, "n", DataType::Number, false),
            key(2, "f", DataType::Float, false),
            key(3, "b", DataType::Boolean, false),
            key(4, "l", DataType::List, false),
        ]);
        let err = schema
            .validate(&props(json!({"n": 1.5, "f": "x", "b": "true", "l": 1})))
            .unwrap_err();
        let fields: Vec<_> = err.iter().map(|v| v.field.as_str()).collect();
        assert_eq!(fields, vec!["n", "f", "b", "l"]);
    }

    #[test]
    fn enumeration_respects_options() {
        let mut k = key(1, "color", DataType::Enumeration, true);
        k.options = vec!["red".into(), "blue".into()];
        let schema = PropertySchema::new(vec![k]);
        assert!(schema.validate(&props(json!({"color": "red"}))).is_ok());
        assert!(schema.validate(&props(json!({"color": "green"}))).is_err());
    }

    #[test]
    fn bounds_and_pattern() {
        let mut n = key(1, "n", DataType::Number, false);
        n.validation = KeyValidation { min: Some(0.0), max: Some(10.0), regex: None };
        let mut s = key(2, "s", DataType::String, false);
        s.validation = KeyValidation { min: None, max: None, regex: Some("^[A-Z]+$".into()) };
        let schema = PropertySchema::new(vec![n, s]);

        assert!(schema.validate(&props(json!({"n": 5, "s": "ABC"}))).is_ok());
        assert!(schema.validate(&props(json!({"n": 11}))).is_err());
        assert!(schema.validate(&props(json!({"s": "abc"}))).is_err());
    }

    #[test]
    fn dates_and_64_bit_strings() {
        let schema = PropertySchema::new(vec![
            key(1, "d", DataType::Date, false),
            key(2, "big", DataType::Number64, false),
        ]);
        assert!(schema
            .validate(&props(json!({"d": "2024-01-02T03:04:05Z", "big": "9007199254740993"})))
            .is_ok());
        assert!(schema.validate(&props(json!({"d": "not a date"}))).is_err());
        assert!(schema.validate(&props(json!({"big": 12}))).is_err());
    }

    #[test]
    fn metatype_wraps_violations_in_core_error() {
        let mt = Metatype {
            id: 7,
            container_id: 1,
            name: "Pump".into(),
            schema: PropertySchema::new(vec![key(1, "a", DataType::Number, true)]),
        };
        let err = mt.validate_and_transform_properties(&PropertyMap::new()).unwrap_err();
        assert!(err.to_string().contains("Pump"));
    }
}
