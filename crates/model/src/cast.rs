//! Attribute casts
//!
//! A cast turns the stored JSON of an attribute into a rich [`Value`] on the
//! way out ([`cast`]), and [`mutate`] turns a rich value back into something
//! storable on the way in. The pair is lossless for the ISO date format:
//! `mutate(cast(s)) == s` for `2024-05-01T10:00:00.000Z`-style strings.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};
use quarry_core::{iso_string, JsonValue, Value};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Declared cast of one attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum CastKind {
    /// `bool`
    Boolean,
    /// `int`
    Integer,
    /// `float`
    Float,
    /// Float rounded to a number of decimal places
    Decimal(Option<u32>),
    /// Plain text
    String,
    /// Calendar date
    Date,
    /// Date and time
    DateTime,
    /// Date, read-only once set
    ImmutableDate,
    /// Date and time, read-only once set
    ImmutableDateTime,
    /// Unix seconds
    Timestamp,
    /// Arrays and objects, also accepts JSON-encoded strings
    Json,
}

impl CastKind {
    /// Whether the cast produces a date-time value
    pub fn is_temporal(&self) -> bool {
        matches!(
            self,
            CastKind::Date
                | CastKind::DateTime
                | CastKind::ImmutableDate
                | CastKind::ImmutableDateTime
                | CastKind::Timestamp
        )
    }
}

impl FromStr for CastKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        if let Some(places) = lower.strip_prefix("decimal:") {
            let places = places
                .parse::<u32>()
                .map_err(|_| format!("invalid decimal precision in cast '{}'", s))?;
            return Ok(CastKind::Decimal(Some(places)));
        }
        // Date casts may carry a display format, e.g. "datetime:Y-m-d".
        let base = lower.split(':').next().unwrap_or_default();
        Ok(match base {
            "bool" | "boolean" => CastKind::Boolean,
            "int" | "integer" => CastKind::Integer,
            "real" | "float" | "double" => CastKind::Float,
            "decimal" => CastKind::Decimal(None),
            "string" => CastKind::String,
            "date" => CastKind::Date,
            "datetime" => CastKind::DateTime,
            "immutable_date" => CastKind::ImmutableDate,
            "immutable_datetime" => CastKind::ImmutableDateTime,
            "timestamp" => CastKind::Timestamp,
            "array" | "json" | "object" | "collection" => CastKind::Json,
            _ => return Err(format!("unknown cast '{}'", s)),
        })
    }
}

impl TryFrom<String> for CastKind {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CastKind> for String {
    fn from(kind: CastKind) -> Self {
        kind.to_string()
    }
}

impl fmt::Display for CastKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CastKind::Boolean => f.write_str("boolean"),
            CastKind::Integer => f.write_str("integer"),
            CastKind::Float => f.write_str("float"),
            CastKind::Decimal(None) => f.write_str("decimal"),
            CastKind::Decimal(Some(p)) => write!(f, "decimal:{}", p),
            CastKind::String => f.write_str("string"),
            CastKind::Date => f.write_str("date"),
            CastKind::DateTime => f.write_str("datetime"),
            CastKind::ImmutableDate => f.write_str("immutable_date"),
            CastKind::ImmutableDateTime => f.write_str("immutable_datetime"),
            CastKind::Timestamp => f.write_str("timestamp"),
            CastKind::Json => f.write_str("json"),
        }
    }
}

// ============================================================================
// Read side
// ============================================================================

/// Cast stored JSON into a rich value.
///
/// `null` always stays `Null`. Input a cast cannot interpret is returned
/// uncast rather than dropped, except numeric casts which yield NaN like a
/// failed numeric conversion would.
pub fn cast(kind: CastKind, raw: &JsonValue) -> Value {
    if raw.is_null() {
        return Value::Null;
    }
    match kind {
        CastKind::Boolean => cast_bool(raw),
        CastKind::Integer => match to_f64(raw) {
            Some(n) if n.is_finite() => Value::Int(n.trunc() as i64),
            Some(n) => Value::Float(n),
            None => Value::Float(f64::NAN),
        },
        CastKind::Float => Value::Float(to_f64(raw).unwrap_or(f64::NAN)),
        CastKind::Decimal(places) => {
            let n = to_f64(raw).unwrap_or(f64::NAN);
            Value::Float(match places {
                Some(p) if n.is_finite() => {
                    let factor = 10f64.powi(p as i32);
                    (n * factor).round() / factor
                }
                _ => n,
            })
        }
        CastKind::String => match raw {
            JsonValue::String(s) => Value::String(s.clone()),
            other => Value::String(other.to_string()),
        },
        CastKind::Date | CastKind::ImmutableDate => match parse_datetime(raw) {
            Some(dt) => Value::DateTime(start_of_day(dt)),
            None => Value::from(raw),
        },
        CastKind::DateTime | CastKind::ImmutableDateTime | CastKind::Timestamp => {
            match parse_datetime(raw) {
                Some(dt) => Value::DateTime(dt),
                None => Value::from(raw),
            }
        }
        CastKind::Json => match raw {
            JsonValue::String(s) => serde_json::from_str::<JsonValue>(s)
                .map(|parsed| Value::from(&parsed))
                .unwrap_or_else(|_| Value::String(s.clone())),
            other => Value::from(other),
        },
    }
}

fn cast_bool(raw: &JsonValue) -> Value {
    match raw {
        JsonValue::Bool(b) => Value::Bool(*b),
        JsonValue::Number(n) => Value::Bool(n.as_f64().is_some_and(|f| f != 0.0)),
        JsonValue::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Value::Bool(true),
            "false" | "0" | "" | "no" | "off" => Value::Bool(false),
            _ => Value::String(s.clone()),
        },
        other => Value::from(other),
    }
}

fn to_f64(raw: &JsonValue) -> Option<f64> {
    match raw {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        JsonValue::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Parse a date or date-time from JSON.
///
/// Accepts RFC 3339 strings, `YYYY-MM-DD HH:MM:SS` and `YYYY-MM-DD` (both
/// read as UTC), and numbers as Unix seconds.
pub fn parse_datetime(raw: &JsonValue) -> Option<DateTime<FixedOffset>> {
    match raw {
        JsonValue::String(s) => parse_datetime_str(s),
        JsonValue::Number(n) => {
            let secs = n.as_f64()?;
            let millis = (secs * 1000.0).round() as i64;
            Utc.timestamp_millis_opt(millis)
                .single()
                .map(|dt| dt.fixed_offset())
        }
        _ => None,
    }
}

fn parse_datetime_str(s: &str) -> Option<DateTime<FixedOffset>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt);
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc().fixed_offset());
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc().fixed_offset());
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc().fixed_offset())
}

fn start_of_day(dt: DateTime<FixedOffset>) -> DateTime<FixedOffset> {
    let offset = *dt.offset();
    dt.date_naive()
        .and_hms_opt(0, 0, 0)
        .and_then(|naive| offset.from_local_datetime(&naive).single())
        .unwrap_or(dt)
}

// ============================================================================
// Write side
// ============================================================================

/// Convert a rich value into its storable form.
///
/// Date-times become ISO strings at any depth; everything else passes
/// through, so a value that was never JSON-safe stays unsafe and is caught
/// by validation.
pub fn mutate(kind: Option<CastKind>, value: Value) -> Value {
    match (kind, value) {
        (_, Value::DateTime(dt)) => Value::String(iso_string(&dt)),
        (Some(CastKind::Decimal(Some(p))), Value::Float(n)) if n.is_finite() => {
            let factor = 10f64.powi(p as i32);
            Value::Float((n * factor).round() / factor)
        }
        (_, Value::Array(items)) => Value::Array(items.into_iter().map(|v| mutate(None, v)).collect()),
        (_, Value::Object(map)) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, mutate(None, v)))
                .collect(),
        ),
        (_, other) => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_cast_strings() {
        assert_eq!("bool".parse::<CastKind>().unwrap(), CastKind::Boolean);
        assert_eq!("Integer".parse::<CastKind>().unwrap(), CastKind::Integer);
        assert_eq!("double".parse::<CastKind>().unwrap(), CastKind::Float);
        assert_eq!("decimal:2".parse::<CastKind>().unwrap(), CastKind::Decimal(Some(2)));
        assert_eq!("datetime:Y-m-d".parse::<CastKind>().unwrap(), CastKind::DateTime);
        assert_eq!("immutable_date".parse::<CastKind>().unwrap(), CastKind::ImmutableDate);
        assert_eq!("collection".parse::<CastKind>().unwrap(), CastKind::Json);
        assert!("decimal:x".parse::<CastKind>().is_err());
        assert!("uuid".parse::<CastKind>().is_err());
    }

    #[test]
    fn test_cast_kind_serde() {
        let casts: Vec<CastKind> = serde_json::from_value(json!(["boolean", "decimal:3"])).unwrap();
        assert_eq!(casts, vec![CastKind::Boolean, CastKind::Decimal(Some(3))]);
        assert_eq!(serde_json::to_value(CastKind::Decimal(Some(3))).unwrap(), json!("decimal:3"));
        assert!(serde_json::from_value::<CastKind>(json!("nope")).is_err());
    }

    #[test]
    fn test_boolean_coercion() {
        assert_eq!(cast(CastKind::Boolean, &json!(1)), Value::Bool(true));
        assert_eq!(cast(CastKind::Boolean, &json!(0)), Value::Bool(false));
        assert_eq!(cast(CastKind::Boolean, &json!("yes")), Value::Bool(true));
        assert_eq!(cast(CastKind::Boolean, &json!("off")), Value::Bool(false));
        assert_eq!(cast(CastKind::Boolean, &json!("")), Value::Bool(false));
        assert_eq!(cast(CastKind::Boolean, &json!("maybe")), Value::from("maybe"));
        assert_eq!(cast(CastKind::Boolean, &JsonValue::Null), Value::Null);
    }

    #[test]
    fn test_numeric_coercion() {
        assert_eq!(cast(CastKind::Integer, &json!("42")), Value::Int(42));
        assert_eq!(cast(CastKind::Integer, &json!(3.9)), Value::Int(3));
        assert_eq!(cast(CastKind::Float, &json!("2.5")), Value::Float(2.5));
        assert_eq!(cast(CastKind::Decimal(Some(2)), &json!(1.23456)), Value::Float(1.23));
        match cast(CastKind::Float, &json!("abc")) {
            Value::Float(f) => assert!(f.is_nan()),
            other => panic!("expected NaN, got {:?}", other),
        }
    }

    #[test]
    fn test_datetime_round_trip() {
        let input = "2024-05-01T10:00:00.000Z";
        let cast_value = cast(CastKind::DateTime, &json!(input));
        assert_eq!(cast_value.to_iso_string().as_deref(), Some(input));

        let stored = mutate(Some(CastKind::DateTime), cast_value.clone());
        assert_eq!(stored, Value::from(input));

        let again = cast(CastKind::DateTime, &stored.to_json().unwrap());
        assert_eq!(again, cast_value);
    }

    #[test]
    fn test_datetime_formats() {
        let sql = cast(CastKind::DateTime, &json!("2024-05-01 10:00:00"));
        assert_eq!(sql.to_iso_string().as_deref(), Some("2024-05-01T10:00:00.000Z"));

        let offset = cast(CastKind::DateTime, &json!("2024-05-01T12:00:00+02:00"));
        assert_eq!(offset, sql);

        let unix = cast(CastKind::Timestamp, &json!(1714557600));
        assert_eq!(unix, sql);

        let date = cast(CastKind::Date, &json!("2024-05-01T10:30:00Z"));
        assert_eq!(date.to_iso_string().as_deref(), Some("2024-05-01T00:00:00.000Z"));

        assert_eq!(cast(CastKind::DateTime, &json!("not a date")), Value::from("not a date"));
    }

    #[test]
    fn test_json_cast_decodes_strings() {
        assert_eq!(
            cast(CastKind::Json, &json!("[1,2]")),
            Value::Array(vec![Value::Int(1), Value::Int(2)])
        );
        assert_eq!(cast(CastKind::Json, &json!({"a": true})).as_object().map(|m| m.len()), Some(1));
        assert_eq!(cast(CastKind::Json, &json!("{broken")), Value::from("{broken"));
    }

    #[test]
    fn test_mutate_nested_datetimes() {
        let dt = DateTime::parse_from_rfc3339("2024-01-02T03:04:05Z").unwrap();
        let value = Value::Array(vec![Value::DateTime(dt), Value::Int(1)]);
        let out = mutate(None, value);
        assert!(out.is_json_safe());
        assert_eq!(out.to_json().unwrap(), json!(["2024-01-02T03:04:05.000Z", 1]));
    }

    #[test]
    fn test_mutate_keeps_non_finite() {
        assert!(!mutate(Some(CastKind::Float), Value::Float(f64::INFINITY)).is_json_safe());
    }
}
