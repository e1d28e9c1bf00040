//! Rich attribute values
//!
//! [`Value`] is what model accessors hand out after casting. It is a superset
//! of JSON: casts can produce date-times and non-finite floats, neither of
//! which can be written back to an attribute store until they are mutated
//! into their JSON form.
//!
//! ## Type Rules
//!
//! - `Int(1) != Float(1.0)`: different variants are never equal
//! - Float uses IEEE-754 equality: `NaN != NaN`, `-0.0 == 0.0`
//! - `DateTime` compares by instant, not by offset

use chrono::{DateTime, FixedOffset, SecondsFormat, Utc};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

use crate::json::{validate_limits, LimitError};

/// Attribute value after casting
#[derive(Debug, Clone)]
pub enum Value {
    /// Null value
    Null,
    /// Boolean value
    Bool(bool),
    /// 64-bit signed integer
    Int(i64),
    /// 64-bit floating point (IEEE-754)
    Float(f64),
    /// UTF-8 string
    String(String),
    /// Parsed date or date-time
    DateTime(DateTime<FixedOffset>),
    /// Array of values
    Array(Vec<Value>),
    /// Object with string keys
    Object(BTreeMap<String, Value>),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::DateTime(a), Value::DateTime(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            _ => false,
        }
    }
}

/// Reason a value cannot be stored as JSON
#[derive(Debug, Error, Clone, PartialEq)]
pub enum UnsafeValue {
    /// A date-time was not mutated to its ISO string
    #[error("date-time value at '{path}' must be converted to a string before storage")]
    DateTime {
        /// Location inside the value
        path: String,
    },

    /// NaN or infinite float
    #[error("non-finite number at '{path}'")]
    NonFinite {
        /// Location inside the value
        path: String,
    },

    /// Structural limit exceeded
    #[error(transparent)]
    Limit(#[from] LimitError),
}

impl Value {
    /// Get the type name as a string
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Int(_) => "integer",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::DateTime(_) => "datetime",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }

    /// Check if this is a null value
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Get as bool if this is a Bool value
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get as i64 if this is an Int value
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Get as f64 for either numeric variant
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Get as &str if this is a String value
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get the date-time if this is a DateTime value
    pub fn as_datetime(&self) -> Option<&DateTime<FixedOffset>> {
        match self {
            Value::DateTime(d) => Some(d),
            _ => None,
        }
    }

    /// Get as &[Value] if this is an Array value
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Get as object map if this is an Object value
    pub fn as_object(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    /// ISO 8601 representation of a DateTime value
    pub fn to_iso_string(&self) -> Option<String> {
        self.as_datetime().map(iso_string)
    }

    /// Convert to JSON, rejecting values that are not JSON-safe
    ///
    /// Only null, booleans, finite numbers, strings, and arrays/objects of
    /// the same are accepted.
    pub fn to_json(&self) -> Result<JsonValue, UnsafeValue> {
        let json = to_json_at(self, &mut String::new())?;
        validate_limits(&json)?;
        Ok(json)
    }

    /// Whether [`Value::to_json`] would succeed
    pub fn is_json_safe(&self) -> bool {
        self.to_json().is_ok()
    }
}

fn to_json_at(value: &Value, path: &mut String) -> Result<JsonValue, UnsafeValue> {
    Ok(match value {
        Value::Null => JsonValue::Null,
        Value::Bool(b) => JsonValue::Bool(*b),
        Value::Int(i) => JsonValue::Number((*i).into()),
        Value::Float(f) => serde_json::Number::from_f64(*f)
            .map(JsonValue::Number)
            .ok_or_else(|| UnsafeValue::NonFinite {
                path: display_path(path),
            })?,
        Value::String(s) => JsonValue::String(s.clone()),
        Value::DateTime(_) => {
            return Err(UnsafeValue::DateTime {
                path: display_path(path),
            })
        }
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                let len = path.len();
                path.push_str(&format!("[{}]", i));
                out.push(to_json_at(item, path)?);
                path.truncate(len);
            }
            JsonValue::Array(out)
        }
        Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (key, item) in map {
                let len = path.len();
                if !path.is_empty() {
                    path.push('.');
                }
                path.push_str(key);
                out.insert(key.clone(), to_json_at(item, path)?);
                path.truncate(len);
            }
            JsonValue::Object(out)
        }
    })
}

fn display_path(path: &str) -> String {
    if path.is_empty() {
        ".".to_string()
    } else {
        path.to_string()
    }
}

/// RFC 3339 in UTC with milliseconds, e.g. `2024-05-01T10:00:00.000Z`
pub fn iso_string(dt: &DateTime<FixedOffset>) -> String {
    dt.with_timezone(&Utc)
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::DateTime(d) => write!(f, "{}", iso_string(d)),
            Value::Float(v) if !v.is_finite() => write!(f, "{}", v),
            other => match other.to_json() {
                Ok(json) => write!(f, "{}", json),
                Err(_) => write!(f, "<{}>", other.type_name()),
            },
        }
    }
}

// ============================================================================
// From implementations for ergonomic API usage
// ============================================================================

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<u32> for Value {
    fn from(i: u32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<DateTime<FixedOffset>> for Value {
    fn from(d: DateTime<FixedOffset>) -> Self {
        Value::DateTime(d)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(d: DateTime<Utc>) -> Self {
        Value::DateTime(d.fixed_offset())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

impl From<Vec<Value>> for Value {
    fn from(a: Vec<Value>) -> Self {
        Value::Array(a)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(o: BTreeMap<String, Value>) -> Self {
        Value::Object(o)
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Null
    }
}

// ============================================================================
// serde_json interop
// ============================================================================

impl From<JsonValue> for Value {
    fn from(v: JsonValue) -> Self {
        match v {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(b) => Value::Bool(b),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    // u64 beyond i64 and fractional numbers
                    Value::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            JsonValue::String(s) => Value::String(s),
            JsonValue::Array(arr) => Value::Array(arr.into_iter().map(Value::from).collect()),
            JsonValue::Object(obj) => {
                Value::Object(obj.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<&JsonValue> for Value {
    fn from(v: &JsonValue) -> Self {
        Value::from(v.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_int_not_equal_float() {
        assert_ne!(Value::Int(1), Value::Float(1.0));
    }

    #[test]
    fn test_nan_not_equal_nan() {
        assert_ne!(Value::Float(f64::NAN), Value::Float(f64::NAN));
    }

    #[test]
    fn test_negative_zero_equals_zero() {
        assert_eq!(Value::Float(-0.0), Value::Float(0.0));
    }

    #[test]
    fn test_from_json_preserves_structure() {
        let value = Value::from(json!({"a": [1, 2.5, "x", null, true]}));
        let obj = value.as_object().unwrap();
        let arr = obj["a"].as_array().unwrap();
        assert_eq!(arr[0], Value::Int(1));
        assert_eq!(arr[1], Value::Float(2.5));
        assert_eq!(arr[2], Value::String("x".into()));
        assert!(arr[3].is_null());
        assert_eq!(arr[4], Value::Bool(true));
    }

    #[test]
    fn test_to_json_round_trip_for_safe_values() {
        let source = json!({"name": "A", "tags": ["x", "y"], "score": 1.5, "n": 3});
        assert_eq!(Value::from(source.clone()).to_json().unwrap(), source);
    }

    #[test]
    fn test_datetime_is_not_json_safe() {
        let dt = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let mut map = BTreeMap::new();
        map.insert("published_at".to_string(), Value::from(dt));
        let err = Value::Object(map).to_json().unwrap_err();
        assert_eq!(
            err,
            UnsafeValue::DateTime {
                path: "published_at".to_string()
            }
        );
    }

    #[test]
    fn test_non_finite_float_is_not_json_safe() {
        let value = Value::Array(vec![Value::Int(1), Value::Float(f64::INFINITY)]);
        assert_eq!(
            value.to_json().unwrap_err(),
            UnsafeValue::NonFinite {
                path: "[1]".to_string()
            }
        );
        assert!(!Value::Float(f64::NAN).is_json_safe());
    }

    #[test]
    fn test_iso_string_uses_utc_millis() {
        let dt = DateTime::parse_from_rfc3339("2024-05-01T12:00:00+02:00").unwrap();
        assert_eq!(iso_string(&dt), "2024-05-01T10:00:00.000Z");
        assert_eq!(
            Value::DateTime(dt).to_iso_string().as_deref(),
            Some("2024-05-01T10:00:00.000Z")
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::from("a").to_string(), "\"a\"");
        assert_eq!(Value::Int(3).to_string(), "3");
        assert_eq!(Value::Float(f64::NAN).to_string(), "NaN");
    }
}
