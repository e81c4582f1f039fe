//! Attribute metadata
//!
//! An [`Attr`] describes one declared field of a stored entity: its type,
//! which operations may touch it, which filter operators it accepts and how
//! missing values are generated.

use crate::error::{StoreError, StoreResult};
use crate::value::{format_datetime, normalize_datetime, parse_datetime, Value};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

// ============================================================================
// AttrType
// ============================================================================

/// Declared type of an attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AttrType {
    /// Raw bytes
    Binary,
    /// Boolean
    Bool,
    /// UTC timestamp
    Datetime,
    /// 64-bit float
    Float,
    /// 64-bit signed integer
    Int,
    /// JSON document
    Json,
    /// UTF-8 string
    Str,
    /// UUID
    Uuid,
}

impl AttrType {
    /// Upper-case name, as used in error messages
    pub fn name(&self) -> &'static str {
        match self {
            AttrType::Binary => "BINARY",
            AttrType::Bool => "BOOL",
            AttrType::Datetime => "DATETIME",
            AttrType::Float => "FLOAT",
            AttrType::Int => "INT",
            AttrType::Json => "JSON",
            AttrType::Str => "STR",
            AttrType::Uuid => "UUID",
        }
    }

    /// True if values of this type have a meaningful order
    pub fn is_ordered(&self) -> bool {
        !matches!(self, AttrType::Bool | AttrType::Json)
    }

    /// The operators valid for this type
    ///
    /// `eq, ne, exists, not_exists, oneof` for every type; comparisons for
    /// ordered types; string matching for `STR`.
    pub fn default_filter_ops(&self) -> BTreeSet<FilterOp> {
        let mut ops: BTreeSet<FilterOp> = [
            FilterOp::Eq,
            FilterOp::Ne,
            FilterOp::Exists,
            FilterOp::NotExists,
            FilterOp::OneOf,
        ]
        .into_iter()
        .collect();
        if self.is_ordered() {
            ops.extend([FilterOp::Gt, FilterOp::Gte, FilterOp::Lt, FilterOp::Lte]);
        }
        if *self == AttrType::Str {
            ops.extend([FilterOp::StartsWith, FilterOp::Contains, FilterOp::EndsWith]);
        }
        ops
    }

    /// True if `value` (non-null) is already of this type
    pub fn accepts(&self, value: &Value) -> bool {
        matches!(
            (self, value),
            (AttrType::Binary, Value::Bytes(_))
                | (AttrType::Bool, Value::Bool(_))
                | (AttrType::Datetime, Value::DateTime(_))
                | (AttrType::Float, Value::Float(_))
                | (AttrType::Int, Value::Int(_))
                | (AttrType::Json, Value::Json(_))
                | (AttrType::Str, Value::String(_))
                | (AttrType::Uuid, Value::Uuid(_))
        )
    }

    /// Convert `value` into this type where the conversion is lossless
    ///
    /// `Null` passes through unchanged. Returns `None` when no lossless
    /// conversion exists. Timestamps are truncated to microseconds, the
    /// precision of their key and JSON text.
    pub fn coerce(&self, value: Value) -> Option<Value> {
        if let (AttrType::Datetime, Value::DateTime(dt)) = (self, &value) {
            return Some(Value::DateTime(normalize_datetime(*dt)));
        }
        if value.is_null() || self.accepts(&value) {
            return Some(value);
        }
        match (self, value) {
            (AttrType::Float, Value::Int(i)) => Some(Value::Float(i as f64)),
            // i64::MAX as f64 rounds up to 2^63, which is out of range
            (AttrType::Int, Value::Float(f))
                if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 =>
            {
                Some(Value::Int(f as i64))
            }
            (AttrType::Uuid, Value::String(s)) => Uuid::parse_str(&s).ok().map(Value::Uuid),
            (AttrType::Datetime, Value::String(s)) => parse_datetime(&s).map(Value::DateTime),
            (AttrType::Json, other) => Some(Value::Json(other.to_json())),
            _ => None,
        }
    }

    /// Decode a JSON scalar produced by [`Value::to_json`] back into this type
    pub fn value_from_json(&self, json: &serde_json::Value) -> StoreResult<Value> {
        use base64::{engine::general_purpose::STANDARD, Engine};
        let mismatch = || {
            StoreError::validation(format!("expected {} value, got {}", self.name(), json))
        };
        if json.is_null() {
            return Ok(Value::Null);
        }
        match self {
            AttrType::Json => Ok(Value::Json(json.clone())),
            AttrType::Bool => json.as_bool().map(Value::Bool).ok_or_else(mismatch),
            AttrType::Int => json.as_i64().map(Value::Int).ok_or_else(mismatch),
            AttrType::Float => json.as_f64().map(Value::Float).ok_or_else(mismatch),
            AttrType::Str => json
                .as_str()
                .map(|s| Value::String(s.to_string()))
                .ok_or_else(mismatch),
            AttrType::Binary => json
                .as_str()
                .and_then(|s| STANDARD.decode(s).ok())
                .map(Value::Bytes)
                .ok_or_else(mismatch),
            AttrType::Uuid => json
                .as_str()
                .and_then(|s| Uuid::parse_str(s).ok())
                .map(Value::Uuid)
                .ok_or_else(mismatch),
            AttrType::Datetime => json
                .as_str()
                .and_then(parse_datetime)
                .map(Value::DateTime)
                .ok_or_else(mismatch),
        }
    }

    /// Render a scalar as a single-attribute key string
    pub fn to_key_string(&self, value: &Value) -> StoreResult<String> {
        use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
        let value = self
            .coerce(value.clone())
            .filter(|v| !v.is_null())
            .ok_or_else(|| {
                StoreError::validation(format!(
                    "{} cannot be used as a {} key",
                    value.type_name(),
                    self.name()
                ))
            })?;
        Ok(match value {
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::String(s) => s,
            Value::Bytes(b) => URL_SAFE_NO_PAD.encode(b),
            Value::Uuid(u) => u.to_string(),
            Value::DateTime(dt) => format_datetime(&dt),
            Value::Json(j) => j.to_string(),
            Value::Null => unreachable!("filtered above"),
        })
    }

    /// Parse a single-attribute key string back into a value
    pub fn parse_key_string(&self, key: &str) -> StoreResult<Value> {
        use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
        let invalid = || StoreError::validation(format!("invalid {} key: '{}'", self.name(), key));
        match self {
            AttrType::Str => Ok(Value::String(key.to_string())),
            AttrType::Int => key.parse().map(Value::Int).map_err(|_| invalid()),
            AttrType::Float => key.parse().map(Value::Float).map_err(|_| invalid()),
            AttrType::Bool => key.parse().map(Value::Bool).map_err(|_| invalid()),
            AttrType::Uuid => Uuid::parse_str(key).map(Value::Uuid).map_err(|_| invalid()),
            AttrType::Datetime => parse_datetime(key).map(Value::DateTime).ok_or_else(invalid),
            AttrType::Binary => URL_SAFE_NO_PAD
                .decode(key)
                .map(Value::Bytes)
                .map_err(|_| invalid()),
            AttrType::Json => serde_json::from_str(key)
                .map(Value::Json)
                .map_err(|_| invalid()),
        }
    }
}

impl fmt::Display for AttrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// FilterOp
// ============================================================================

/// Filter operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    /// Equal
    Eq,
    /// Not equal (absent fields count as not equal)
    Ne,
    /// Field is present and not null
    Exists,
    /// Field is absent or null
    NotExists,
    /// Greater than
    Gt,
    /// Greater than or equal
    Gte,
    /// Less than
    Lt,
    /// Less than or equal
    Lte,
    /// String prefix
    StartsWith,
    /// String contains
    Contains,
    /// String suffix
    EndsWith,
    /// Membership in a list of values
    OneOf,
}

impl FilterOp {
    /// Operator name
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOp::Eq => "eq",
            FilterOp::Ne => "ne",
            FilterOp::Exists => "exists",
            FilterOp::NotExists => "not_exists",
            FilterOp::Gt => "gt",
            FilterOp::Gte => "gte",
            FilterOp::Lt => "lt",
            FilterOp::Lte => "lte",
            FilterOp::StartsWith => "startswith",
            FilterOp::Contains => "contains",
            FilterOp::EndsWith => "endswith",
            FilterOp::OneOf => "oneof",
        }
    }
}

impl fmt::Display for FilterOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// ValueGenerator
// ============================================================================

/// Produces a value for an attribute the payload did not (or may not) set
#[derive(Debug, Clone, PartialEq)]
pub enum ValueGenerator {
    /// A fixed default
    Default(Value),
    /// A random v4 UUID
    Uuid,
    /// The current UTC time, truncated to microseconds
    Timestamp,
}

impl ValueGenerator {
    /// Produce a fresh value
    pub fn generate(&self) -> Value {
        match self {
            ValueGenerator::Default(v) => v.clone(),
            ValueGenerator::Uuid => Value::Uuid(Uuid::new_v4()),
            ValueGenerator::Timestamp => Value::DateTime(normalize_datetime(Utc::now())),
        }
    }
}

// ============================================================================
// Attr
// ============================================================================

/// A declared field of a stored entity
///
/// # Example
///
/// ```
/// use storekit_core::{Attr, AttrType, FilterOp, ValueGenerator};
///
/// let id = Attr::new("id", AttrType::Uuid)
///     .with_creatable(false)
///     .with_updatable(false)
///     .with_create_generator(ValueGenerator::Uuid);
/// assert!(id.permits(FilterOp::Eq));
/// assert!(!id.creatable);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Attr {
    /// Field name, unique within a `StoreMeta`
    pub name: String,
    /// Declared type
    pub attr_type: AttrType,
    /// May be supplied on create
    pub creatable: bool,
    /// Returned from reads and usable in filters
    pub readable: bool,
    /// May be supplied on update
    pub updatable: bool,
    /// May appear in search filters
    pub searchable: bool,
    /// May appear in a search order
    pub sortable: bool,
    /// May hold `Null`
    pub nullable: bool,
    /// Operators accepted in filters on this field
    pub permitted_filter_ops: BTreeSet<FilterOp>,
    /// Applied on create
    pub create_generator: Option<ValueGenerator>,
    /// Applied on update
    pub update_generator: Option<ValueGenerator>,
}

impl Attr {
    /// Create an attribute with every capability enabled
    pub fn new(name: impl Into<String>, attr_type: AttrType) -> Self {
        Attr {
            name: name.into(),
            attr_type,
            creatable: true,
            readable: true,
            updatable: true,
            searchable: true,
            sortable: attr_type.is_ordered(),
            nullable: true,
            permitted_filter_ops: attr_type.default_filter_ops(),
            create_generator: None,
            update_generator: None,
        }
    }

    /// Builder: set `creatable`
    pub fn with_creatable(mut self, creatable: bool) -> Self {
        self.creatable = creatable;
        self
    }

    /// Builder: set `readable`
    pub fn with_readable(mut self, readable: bool) -> Self {
        self.readable = readable;
        self
    }

    /// Builder: set `updatable`
    pub fn with_updatable(mut self, updatable: bool) -> Self {
        self.updatable = updatable;
        self
    }

    /// Builder: set `searchable`
    pub fn with_searchable(mut self, searchable: bool) -> Self {
        self.searchable = searchable;
        self
    }

    /// Builder: set `sortable`
    pub fn with_sortable(mut self, sortable: bool) -> Self {
        self.sortable = sortable;
        self
    }

    /// Builder: set `nullable`
    pub fn with_nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    /// Builder: restrict the permitted operators
    ///
    /// Operators not valid for the type are dropped.
    pub fn with_filter_ops<I: IntoIterator<Item = FilterOp>>(mut self, ops: I) -> Self {
        let valid = self.attr_type.default_filter_ops();
        self.permitted_filter_ops = ops.into_iter().filter(|op| valid.contains(op)).collect();
        self
    }

    /// Builder: set the create generator
    pub fn with_create_generator(mut self, generator: ValueGenerator) -> Self {
        self.create_generator = Some(generator);
        self
    }

    /// Builder: set the update generator
    pub fn with_update_generator(mut self, generator: ValueGenerator) -> Self {
        self.update_generator = Some(generator);
        self
    }

    /// True if filters may use `op` on this attribute
    pub fn permits(&self, op: FilterOp) -> bool {
        self.searchable && self.readable && self.permitted_filter_ops.contains(&op)
    }
}
