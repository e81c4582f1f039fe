//! Value types for storekit
//!
//! This module defines:
//! - Value: Unified enum for every attribute value
//!
//! ## Value Model
//!
//! One variant per attribute type plus `Null`:
//! - Null, Bool, Int, Float, String, Bytes, Uuid, DateTime, Json
//!
//! ### Type Rules
//!
//! - `PartialEq` is strict: `Int(1) != Float(1.0)`
//! - `compare` is the ordering used by filters and sorting. It is numeric
//!   across `Int`/`Float` and returns `None` for every other type mismatch
//! - Float equality follows IEEE-754: `NaN != NaN`, `-0.0 == 0.0`

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use uuid::Uuid;

/// Unified attribute value
///
/// Every backend converts its native representation to and from this enum,
/// so filter evaluation, key encoding and sorting only ever see `Value`.
#[derive(Debug, Clone, Serialize, Deserialize)]
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
    /// Raw bytes
    Bytes(Vec<u8>),
    /// UUID
    Uuid(Uuid),
    /// UTC timestamp
    DateTime(DateTime<Utc>),
    /// Arbitrary JSON document
    Json(serde_json::Value),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Uuid(a), Value::Uuid(b)) => a == b,
            (Value::DateTime(a), Value::DateTime(b)) => a == b,
            (Value::Json(a), Value::Json(b)) => a == b,
            _ => false,
        }
    }
}

impl Value {
    /// Get the type name as a string
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "Null",
            Value::Bool(_) => "Bool",
            Value::Int(_) => "Int",
            Value::Float(_) => "Float",
            Value::String(_) => "String",
            Value::Bytes(_) => "Bytes",
            Value::Uuid(_) => "Uuid",
            Value::DateTime(_) => "DateTime",
            Value::Json(_) => "Json",
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

    /// Get as f64 for numeric values (Int widens)
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

    /// Get as Uuid if this is a Uuid value
    pub fn as_uuid(&self) -> Option<Uuid> {
        match self {
            Value::Uuid(u) => Some(*u),
            _ => None,
        }
    }

    /// Compare two values of compatible types
    ///
    /// Returns `None` when the values cannot be ordered against each other
    /// (different types, NaN, or JSON documents that differ).
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, Value::Null) => Some(Ordering::Equal),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
            (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Bytes(a), Value::Bytes(b)) => Some(a.cmp(b)),
            (Value::Uuid(a), Value::Uuid(b)) => Some(a.cmp(b)),
            (Value::DateTime(a), Value::DateTime(b)) => Some(a.cmp(b)),
            (Value::Json(a), Value::Json(b)) if a == b => Some(Ordering::Equal),
            _ => None,
        }
    }

    /// Equality as seen by filters (numeric across Int/Float)
    pub fn loosely_equals(&self, other: &Value) -> bool {
        self.compare(other) == Some(Ordering::Equal)
    }

    /// Total ordering used for sorting result sets
    ///
    /// Absent and null values sort first; incomparable values fall back to a
    /// fixed rank per type so sorting never panics and stays deterministic.
    pub fn sort_cmp(a: Option<&Value>, b: Option<&Value>) -> Ordering {
        let a = a.filter(|v| !v.is_null());
        let b = b.filter(|v| !v.is_null());
        match (a, b) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(a), Some(b)) => a
                .compare(b)
                .unwrap_or_else(|| a.type_rank().cmp(&b.type_rank()).then_with(|| {
                    a.to_json().to_string().cmp(&b.to_json().to_string())
                })),
        }
    }

    fn type_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Int(_) | Value::Float(_) => 2,
            Value::String(_) => 3,
            Value::Bytes(_) => 4,
            Value::Uuid(_) => 5,
            Value::DateTime(_) => 6,
            Value::Json(_) => 7,
        }
    }

    /// Convert to a JSON value
    ///
    /// Bytes become standard base64, UUIDs hyphenated strings and
    /// timestamps RFC 3339 strings with microsecond precision.
    pub fn to_json(&self) -> serde_json::Value {
        use base64::{engine::general_purpose::STANDARD, Engine};
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Bytes(b) => serde_json::Value::String(STANDARD.encode(b)),
            Value::Uuid(u) => serde_json::Value::String(u.to_string()),
            Value::DateTime(dt) => serde_json::Value::String(format_datetime(dt)),
            Value::Json(j) => j.clone(),
        }
    }
}

/// Canonical text form of a timestamp (RFC 3339, microseconds, `Z` suffix)
///
/// Fixed width, so lexicographic order matches chronological order.
pub fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Truncate a timestamp to the microsecond precision of its text form
pub fn normalize_datetime(dt: DateTime<Utc>) -> DateTime<Utc> {
    dt.trunc_subsecs(6)
}

/// Parse an RFC 3339 timestamp into UTC, truncated to microseconds
pub fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| normalize_datetime(dt.with_timezone(&Utc)))
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

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

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

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl From<Uuid> for Value {
    fn from(u: Uuid) -> Self {
        Value::Uuid(u)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(dt: DateTime<Utc>) -> Self {
        Value::DateTime(dt)
    }
}

impl From<serde_json::Value> for Value {
    fn from(j: serde_json::Value) -> Self {
        Value::Json(j)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map(Into::into).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_strict_equality_across_types() {
        assert_ne!(Value::Int(1), Value::Float(1.0));
        assert_ne!(Value::String("a".into()), Value::Bytes(b"a".to_vec()));
    }

    #[test]
    fn test_float_ieee_equality() {
        assert_ne!(Value::Float(f64::NAN), Value::Float(f64::NAN));
        assert_eq!(Value::Float(-0.0), Value::Float(0.0));
    }

    #[test]
    fn test_compare_numeric_across_int_float() {
        assert_eq!(Value::Int(2).compare(&Value::Float(1.5)), Some(Ordering::Greater));
        assert!(Value::Int(1).loosely_equals(&Value::Float(1.0)));
    }

    #[test]
    fn test_compare_mismatch_is_none() {
        assert_eq!(Value::Int(1).compare(&Value::String("1".into())), None);
        assert_eq!(Value::Bool(true).compare(&Value::Int(1)), None);
    }

    #[test]
    fn test_sort_cmp_nulls_first() {
        let v = Value::Int(0);
        assert_eq!(Value::sort_cmp(None, Some(&v)), Ordering::Less);
        assert_eq!(Value::sort_cmp(Some(&Value::Null), Some(&v)), Ordering::Less);
        assert_eq!(Value::sort_cmp(Some(&Value::Null), None), Ordering::Equal);
    }

    #[test]
    fn test_sort_cmp_incomparable_is_deterministic() {
        let a = Value::Bool(true);
        let b = Value::String("x".into());
        assert_eq!(Value::sort_cmp(Some(&a), Some(&b)), Ordering::Less);
        assert_eq!(Value::sort_cmp(Some(&b), Some(&a)), Ordering::Greater);
    }

    #[test]
    fn test_datetime_format_is_fixed_width() {
        let a = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(format_datetime(&a), "2024-01-02T03:04:05.000000Z");
        assert_eq!(parse_datetime(&format_datetime(&a)), Some(a));
    }

    #[test]
    fn test_to_json_bytes_base64() {
        assert_eq!(
            Value::Bytes(vec![1, 2, 3]).to_json(),
            serde_json::Value::String("AQID".into())
        );
    }

    #[test]
    fn test_from_option() {
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from(Some("x")), Value::String("x".into()));
    }
}
