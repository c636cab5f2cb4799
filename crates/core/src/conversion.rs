//! Per-data-type coercion of raw payload values.
//!
//! [`convert_value`] returns `None` when the value already has the right
//! shape, or a [`Conversion`] describing either the converted value or why
//! conversion failed. Failed conversions are recorded in node/edge metadata
//! by the transformation engine rather than aborting a record outright.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ontology::DataType;

/// Outcome of one attempted value conversion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversion {
    pub original_value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub converted_value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<String>,
}

impl Conversion {
    fn converted(original: &Value, converted: Value) -> Self {
        Self {
            original_value: original.clone(),
            converted_value: Some(converted),
            errors: None,
        }
    }

    fn failed(original: &Value, errors: impl Into<String>) -> Self {
        Self {
            original_value: original.clone(),
            converted_value: None,
            errors: Some(errors.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.errors.is_some()
    }
}

/// Coerce `value` towards `data_type`.
///
/// `date_format` is a chrono `strftime` pattern applied to date strings (and
/// to the decimal rendering of numeric dates) when present.
pub fn convert_value(
    data_type: DataType,
    value: &Value,
    date_format: Option<&str>,
) -> Option<Conversion> {
    if value.is_null() || value.as_str() == Some("null") {
        return Some(Conversion::failed(
            value,
            "unable to convert value, value is null or undefined",
        ));
    }

    match data_type {
        DataType::Number => match value {
            Value::Number(n) if n.is_i64() || n.is_u64() => None,
            Value::Number(n) => match n.as_f64() {
                Some(f) => Some(Conversion::converted(value, Value::from(f.trunc() as i64))),
                None => Some(Conversion::failed(value, "unable to convert value to number")),
            },
            Value::String(s) => Some(match parse_integer(s) {
                Some(i) => Conversion::converted(value, Value::from(i)),
                None => Conversion::failed(value, "unable to convert value to number"),
            }),
            _ => Some(Conversion::failed(value, "unable to convert value to number")),
        },

        DataType::Float => match value {
            Value::Number(_) => None,
            Value::String(s) => Some(
                match s
                    .trim()
                    .parse::<f64>()
                    .ok()
                    .and_then(serde_json::Number::from_f64)
                {
                    Some(n) => Conversion::converted(value, Value::Number(n)),
                    None => Conversion::failed(value, "unable to convert value to float"),
                },
            ),
            _ => Some(Conversion::failed(value, "unable to convert value to float")),
        },

        // 64-bit values travel as strings so they survive JSON consumers with
        // 53-bit integers.
        DataType::Number64 | DataType::Float64 => match value {
            Value::String(_) => None,
            Value::Number(n) => Some(Conversion::converted(value, Value::String(n.to_string()))),
            _ => Some(Conversion::failed(
                value,
                format!("unable to convert value to {data_type}"),
            )),
        },

        DataType::Date => Some(convert_date(value, date_format)),

        DataType::String | DataType::Enumeration | DataType::File => match value {
            Value::String(_) => None,
            Value::Number(n) => Some(Conversion::converted(value, Value::String(n.to_string()))),
            Value::Bool(b) => Some(Conversion::converted(value, Value::String(b.to_string()))),
            other if data_type == DataType::String => {
                Some(Conversion::converted(value, Value::String(other.to_string())))
            }
            _ => Some(Conversion::failed(
                value,
                format!("unable to convert value to {data_type}"),
            )),
        },

        DataType::Boolean => match value {
            Value::Bool(_) => None,
            Value::String(s) => {
                let truthy = s.contains("true") || s.contains("TRUE") || s.contains("True") || s.contains('1');
                Some(Conversion::converted(value, Value::Bool(truthy)))
            }
            // Only 1 is true for numbers.
            Value::Number(n) => Some(Conversion::converted(
                value,
                Value::Bool(n.as_f64() == Some(1.0)),
            )),
            _ => Some(Conversion::failed(
                value,
                "unable to convert boolean, must be a boolean, string, or number to attempt conversion",
            )),
        },

        DataType::List => match value {
            Value::Array(_) => None,
            other => Some(Conversion::converted(value, Value::Array(vec![other.clone()]))),
        },

        DataType::Unknown => None,
    }
}

fn parse_integer(s: &str) -> Option<i64> {
    let trimmed = s.trim();
    trimmed
        .parse::<i64>()
        .ok()
        .or_else(|| trimmed.parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| f.trunc() as i64))
}

fn convert_date(value: &Value, date_format: Option<&str>) -> Conversion {
    let parsed = match value {
        Value::String(s) => parse_date(s, date_format),
        // Bare numbers are epoch milliseconds unless a format says otherwise.
        Value::Number(n) => match date_format {
            Some(fmt) => parse_date(&n.to_string(), Some(fmt)),
            None => n.as_i64().and_then(DateTime::<Utc>::from_timestamp_millis),
        },
        _ => {
            return Conversion::failed(
                value,
                "unable to convert value to date, value is not string or number",
            )
        }
    };

    match parsed {
        Some(dt) => Conversion::converted(
            value,
            Value::String(dt.to_rfc3339_opts(SecondsFormat::Millis, true)),
        ),
        None => Conversion::failed(
            value,
            match date_format {
                Some(fmt) => format!("unable to convert value to date using format string `{fmt}`"),
                None => "unable to convert value to date".to_string(),
            },
        ),
    }
}

/// Parse a date string, with an explicit format or a set of common ones.
///
/// Naive dates and times are interpreted as UTC.
pub fn parse_date(s: &str, format: Option<&str>) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Some(fmt) = format {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt.and_utc());
        }
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return d.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
        }
        return DateTime::parse_from_str(s, fmt)
            .ok()
            .map(|dt| dt.with_timezone(&Utc));
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn converted(dt: DataType, v: Value) -> Value {
        convert_value(dt, &v, None)
            .and_then(|c| c.converted_value)
            .unwrap_or(v)
    }

    #[test]
    fn null_always_fails() {
        let c = convert_value(DataType::String, &Value::Null, None).unwrap();
        assert!(c.is_error());
        let c = convert_value(DataType::Number, &json!("null"), None).unwrap();
        assert!(c.is_error());
    }

    #[test]
    fn numbers() {
        assert!(convert_value(DataType::Number, &json!(4), None).is_none());
        assert_eq!(converted(DataType::Number, json!("42")), json!(42));
        assert_eq!(converted(DataType::Number, json!("42.9")), json!(42));
        assert_eq!(converted(DataType::Number, json!(3.7)), json!(3));
        assert!(convert_value(DataType::Number, &json!("abc"), None).unwrap().is_error());
        assert!(convert_value(DataType::Number, &json!(true), None).unwrap().is_error());
    }

    #[test]
    fn floats() {
        assert!(convert_value(DataType::Float, &json!(1.5), None).is_none());
        assert_eq!(converted(DataType::Float, json!("1.25")), json!(1.25));
        assert!(convert_value(DataType::Float, &json!("x"), None).unwrap().is_error());
    }

    #[test]
    fn sixty_four_bit_values_become_strings() {
        assert_eq!(converted(DataType::Number64, json!(12)), json!("12"));
        assert!(convert_value(DataType::Float64, &json!("1.5"), None).is_none());
    }

    #[test]
    fn strings() {
        assert!(convert_value(DataType::String, &json!("x"), None).is_none());
        assert_eq!(converted(DataType::String, json!(12)), json!("12"));
        assert_eq!(converted(DataType::String, json!(false)), json!("false"));
        assert_eq!(converted(DataType::String, json!({"a": 1})), json!("{\"a\":1}"));
        assert!(convert_value(DataType::File, &json!([1]), None).unwrap().is_error());
    }

    #[test]
    fn booleans() {
        assert_eq!(converted(DataType::Boolean, json!("TRUE")), json!(true));
        assert_eq!(converted(DataType::Boolean, json!("no")), json!(false));
        assert_eq!(converted(DataType::Boolean, json!(1)), json!(true));
        assert_eq!(converted(DataType::Boolean, json!(2)), json!(false));
        assert!(convert_value(DataType::Boolean, &json!([]), None).unwrap().is_error());
    }

    #[test]
    fn lists_wrap_scalars() {
        assert_eq!(converted(DataType::List, json!(5)), json!([5]));
        assert!(convert_value(DataType::List, &json!([5]), None).is_none());
    }

    #[test]
    fn dates() {
        assert_eq!(
            converted(DataType::Date, json!("2024-03-01")),
            json!("2024-03-01T00:00:00.000Z")
        );
        assert_eq!(
            converted(DataType::Date, json!(0)),
            json!("1970-01-01T00:00:00.000Z")
        );
        let c = convert_value(DataType::Date, &json!("01/02/2024"), Some("%m/%d/%Y")).unwrap();
        assert_eq!(c.converted_value, Some(json!("2024-01-02T00:00:00.000Z")));
        assert!(convert_value(DataType::Date, &json!("garbage"), None).unwrap().is_error());
    }

    #[test]
    fn unknown_passes_through() {
        assert!(convert_value(DataType::Unknown, &json!({"x": 1}), None).is_none());
    }
}
