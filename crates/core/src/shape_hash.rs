//! Structural hashing of JSON payloads.
//!
//! A shape hash buckets payloads by schema without comparing values: two
//! documents with the same key paths and value types hash identically,
//! regardless of key order, array length or the values themselves.
//!
//! Two options tune the hash per data source:
//!
//! - **stop nodes**: key names removed wherever they appear (and everything
//!   below them). Useful for volatile sub-documents.
//! - **value nodes**: dotted key paths whose *value* (not just its type) is
//!   part of the shape. Useful for discriminator fields such as `"type"`.
//!   Array positions are not part of a path, so `items.kind` matches the
//!   `kind` key of every element of `items`.

use std::collections::BTreeSet;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

const EMPTY_OBJECT: &str = "EMPTY_OBJECT";
const EMPTY_ARRAY: &str = "EMPTY_ARRAY";

/// Per-data-source shape hashing configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShapeHashOptions {
    #[serde(default)]
    pub stop_nodes: Vec<String>,
    #[serde(default)]
    pub value_nodes: Vec<String>,
}

impl ShapeHashOptions {
    fn is_stop_node(&self, key: &str) -> bool {
        self.stop_nodes.iter().any(|s| s == key)
    }

    fn is_value_node(&self, path: &[&str]) -> bool {
        self.value_nodes
            .iter()
            .any(|vn| vn.split('.').eq(path.iter().copied()))
    }
}

/// Compute the base64-encoded SHA-256 shape hash of a JSON value.
pub fn shape_hash(value: &Value, options: &ShapeHashOptions) -> String {
    let descriptor = shape_descriptor(value, options);
    STANDARD.encode(Sha256::digest(descriptor.as_bytes()))
}

/// Build the canonical structural descriptor that [`shape_hash`] digests.
///
/// Exposed for debugging mappings: two payloads share a hash exactly when
/// they share a descriptor.
pub fn shape_descriptor(value: &Value, options: &ShapeHashOptions) -> String {
    let mut path = Vec::new();
    describe(value, options, &mut path)
}

fn describe<'a>(value: &'a Value, options: &ShapeHashOptions, path: &mut Vec<&'a str>) -> String {
    match value {
        Value::Object(map) => describe_object(map, options, path),
        Value::Array(items) => describe_array(items, options, path),
        other => scalar_type(other).to_string(),
    }
}

fn describe_object<'a>(
    map: &'a Map<String, Value>,
    options: &ShapeHashOptions,
    path: &mut Vec<&'a str>,
) -> String {
    let entries: BTreeSet<String> = map
        .iter()
        .filter(|(key, _)| !options.is_stop_node(key))
        .map(|(key, val)| {
            path.push(key.as_str());
            let entry = format!("{}:{}", quoted(key), describe_member(val, options, path));
            path.pop();
            entry
        })
        .collect();

    if entries.is_empty() {
        return EMPTY_OBJECT.to_string();
    }
    format!("object({})", join(entries))
}

fn describe_array<'a>(
    items: &'a [Value],
    options: &ShapeHashOptions,
    path: &mut Vec<&'a str>,
) -> String {
    if items.is_empty() {
        return EMPTY_ARRAY.to_string();
    }

    // Element descriptors are deduplicated, so array length never matters.
    let elements: BTreeSet<String> = items
        .iter()
        .map(|item| describe_member(item, options, path))
        .collect();

    format!("array({})", join(elements))
}

/// Describe a value that sits under `path`, honouring value nodes.
fn describe_member<'a>(
    value: &'a Value,
    options: &ShapeHashOptions,
    path: &mut Vec<&'a str>,
) -> String {
    match value {
        Value::Object(_) | Value::Array(_) => describe(value, options, path),
        scalar if options.is_value_node(path) => scalar_value(scalar),
        scalar => scalar_type(scalar).to_string(),
    }
}

fn scalar_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Values are written as JSON so a string can never pass for structure.
fn scalar_value(value: &Value) -> String {
    format!("={value}")
}

/// A key as a JSON string literal, with separators inside it escaped.
fn quoted(key: &str) -> String {
    Value::String(key.to_owned()).to_string()
}

fn join(parts: BTreeSet<String>) -> String {
    parts.into_iter().collect::<Vec<_>>().join(",")
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn hash(v: &Value) -> String {
        shape_hash(v, &ShapeHashOptions::default())
    }

    #[test]
    fn key_order_does_not_matter() {
        let a = json!({"a": 1, "b": "x", "c": {"d": true, "e": null}});
        let b = json!({"c": {"e": null, "d": false}, "b": "y", "a": 99});
        assert_eq!(hash(&a), hash(&b));
    }

    #[test]
    fn values_do_not_matter() {
        assert_eq!(hash(&json!({"a": 1})), hash(&json!({"a": 2})));
    }

    #[test]
    fn types_matter() {
        assert_ne!(hash(&json!({"a": 1})), hash(&json!({"a": "1"})));
    }

    #[test]
    fn different_keys_hash_differently() {
        assert_ne!(hash(&json!({"a": 1})), hash(&json!({"b": 1})));
        assert_ne!(hash(&json!({"a": 1})), hash(&json!({"a": 1, "b": 1})));
    }

    #[test]
    fn nesting_matters() {
        assert_ne!(
            hash(&json!({"a": {"b": 1}})),
            hash(&json!({"a": 1, "b": 1}))
        );
    }

    #[test]
    fn array_length_does_not_matter() {
        let a = json!({"items": [{"id": 1}]});
        let b = json!({"items": [{"id": 1}, {"id": 2}, {"id": 3}]});
        assert_eq!(hash(&a), hash(&b));
    }

    #[test]
    fn empty_containers_are_distinct() {
        assert_ne!(hash(&json!({"a": {}})), hash(&json!({"a": []})));
        assert_ne!(hash(&json!({"a": []})), hash(&json!({"a": [1]})));
    }

    #[test]
    fn stop_nodes_are_ignored_at_any_depth() {
        let options = ShapeHashOptions {
            stop_nodes: vec!["meta".into()],
            value_nodes: vec![],
        };
        let a = json!({"a": 1, "meta": {"x": 1}, "nested": {"meta": 5, "b": 2}});
        let b = json!({"a": 1, "nested": {"b": 2}});
        assert_eq!(shape_hash(&a, &options), shape_hash(&b, &options));
    }

    #[test]
    fn value_nodes_include_values() {
        let options = ShapeHashOptions {
            stop_nodes: vec![],
            value_nodes: vec!["type".into(), "items.kind".into()],
        };
        let pump = json!({"type": "pump", "id": 1});
        let valve = json!({"type": "valve", "id": 2});
        assert_ne!(shape_hash(&pump, &options), shape_hash(&valve, &options));
        assert_eq!(
            shape_hash(&pump, &options),
            shape_hash(&json!({"id": 9, "type": "pump"}), &options)
        );

        let a = json!({"items": [{"kind": "x"}]});
        let b = json!({"items": [{"kind": "y"}]});
        assert_ne!(shape_hash(&a, &options), shape_hash(&b, &options));
    }

    #[test]
    fn hash_is_base64_sha256() {
        let h = hash(&json!({"a": 1}));
        // 32 bytes -> 44 base64 characters with padding.
        assert_eq!(h.len(), 44);
        assert!(h.ends_with('='));
    }

    #[test]
    fn descriptor_is_readable() {
        let d = shape_descriptor(&json!({"b": [1], "a": "x"}), &ShapeHashOptions::default());
        assert_eq!(d, r#"object("a":string,"b":array(number))"#);
    }

    #[test]
    fn separators_inside_keys_cannot_forge_structure() {
        assert_ne!(hash(&json!({"a": 1, "b": 2})), hash(&json!({"a:number,b": 2})));
        assert_ne!(hash(&json!({"a": {"b": 1}})), hash(&json!({"a:object(b": 1})));

        let options = ShapeHashOptions {
            stop_nodes: vec![],
            value_nodes: vec!["t".into()],
        };
        assert_ne!(
            shape_hash(&json!({"t": "x", "u": 1}), &options),
            shape_hash(&json!({"t": "x\",\"u\":number"}), &options)
        );
    }
}
