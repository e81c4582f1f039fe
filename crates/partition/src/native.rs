//! Native attribute values
//!
//! The partition store holds four scalar kinds: strings (`S`), decimal-text
//! numbers (`N`), binary (`B`) and booleans (`BOOL`). Every declared
//! attribute type maps onto exactly one of them:
//!
//! | AttrType | Native |
//! |----------|--------|
//! | STR, UUID, DATETIME, JSON | `S` |
//! | INT, FLOAT | `N` |
//! | BINARY | `B` |
//! | BOOL | `BOOL` |
//!
//! Null is never stored; a null field is simply absent.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use storekit_core::value::{format_datetime, parse_datetime};
use storekit_core::{AttrType, Item, StoreError, StoreMeta, StoreResult, Value};

use crate::decimal;

/// A stored scalar
///
/// Serialized in the externally tagged form (`{"S": "..."}`, `{"N": "1"}`,
/// `{"B": "<base64>"}`, `{"BOOL": true}`), which is also how resume tokens
/// carry key values inside page keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum NativeValue {
    /// String
    S(String),
    /// Number as decimal text
    N(String),
    /// Binary
    B(#[serde(with = "base64_bytes")] Vec<u8>),
    /// Boolean
    #[serde(rename = "BOOL")]
    Bool(bool),
}

/// A stored item: attribute name → native value
pub type NativeItem = BTreeMap<String, NativeValue>;

impl NativeValue {
    fn rank(&self) -> u8 {
        match self {
            NativeValue::S(_) => 0,
            NativeValue::N(_) => 1,
            NativeValue::B(_) => 2,
            NativeValue::Bool(_) => 3,
        }
    }

    /// Ordering between values of the same kind; `None` across kinds
    pub fn compare(&self, other: &NativeValue) -> Option<Ordering> {
        match (self, other) {
            (NativeValue::S(a), NativeValue::S(b)) => Some(a.cmp(b)),
            (NativeValue::N(a), NativeValue::N(b)) => decimal::compare(a, b),
            (NativeValue::B(a), NativeValue::B(b)) => Some(a.cmp(b)),
            (NativeValue::Bool(a), NativeValue::Bool(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// The string payload of an `S` value
    pub fn as_s(&self) -> Option<&str> {
        match self {
            NativeValue::S(s) => Some(s),
            _ => None,
        }
    }
}

// Numbers compare by value, so "2.500000000" and "2.5" are the same key.
impl Ord for NativeValue {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare(other)
            .unwrap_or_else(|| self.rank().cmp(&other.rank()))
    }
}

impl PartialOrd for NativeValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for NativeValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for NativeValue {}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD.decode(text).map_err(serde::de::Error::custom)
    }
}

/// Convert a non-null value of `attr_type` to its native form
///
/// # Errors
///
/// Returns `Validation` for `Null`, for values that do not convert to
/// `attr_type`, and for non-finite floats.
pub fn to_native(attr_type: AttrType, value: &Value) -> StoreResult<NativeValue> {
    let coerced = attr_type
        .coerce(value.clone())
        .filter(|v| !v.is_null())
        .ok_or_else(|| {
            StoreError::validation(format!(
                "{} cannot be stored as {}",
                value.type_name(),
                attr_type
            ))
        })?;
    Ok(match coerced {
        Value::String(s) => NativeValue::S(s),
        Value::Uuid(u) => NativeValue::S(u.to_string()),
        Value::DateTime(dt) => NativeValue::S(format_datetime(&dt)),
        Value::Json(j) => NativeValue::S(j.to_string()),
        Value::Int(_) | Value::Float(_) => NativeValue::N(decimal::encode(&coerced)?),
        Value::Bytes(b) => NativeValue::B(b),
        Value::Bool(b) => NativeValue::Bool(b),
        Value::Null => return Err(StoreError::validation("null cannot be stored")),
    })
}

/// Convert `value` to its native form only if the stored number reads back
/// unchanged
///
/// Returns `None` when the conversion fails or rounds a float to the native
/// precision.
pub fn to_native_exact(attr_type: AttrType, value: &Value) -> Option<NativeValue> {
    let native = to_native(attr_type, value).ok()?;
    if let NativeValue::N(text) = &native {
        if decimal::decode(text, attr_type).ok()? != attr_type.coerce(value.clone())? {
            return None;
        }
    }
    Some(native)
}

/// Convert a native value back to `attr_type`
///
/// # Errors
///
/// Returns `Backend` when the stored value does not fit the declared type.
pub fn from_native(attr_type: AttrType, native: &NativeValue) -> StoreResult<Value> {
    let mismatch = || {
        StoreError::backend(format!(
            "stored value {:?} does not fit attribute type {}",
            native, attr_type
        ))
    };
    match (attr_type, native) {
        (AttrType::Str, NativeValue::S(s)) => Ok(Value::String(s.clone())),
        (AttrType::Uuid, NativeValue::S(s)) => uuid_from(s).ok_or_else(mismatch),
        (AttrType::Datetime, NativeValue::S(s)) => {
            parse_datetime(s).map(Value::DateTime).ok_or_else(mismatch)
        }
        (AttrType::Json, NativeValue::S(s)) => serde_json::from_str(s)
            .map(Value::Json)
            .map_err(|_| mismatch()),
        (AttrType::Int | AttrType::Float, NativeValue::N(n)) => decimal::decode(n, attr_type),
        (AttrType::Binary, NativeValue::B(b)) => Ok(Value::Bytes(b.clone())),
        (AttrType::Bool, NativeValue::Bool(b)) => Ok(Value::Bool(*b)),
        _ => Err(mismatch()),
    }
}

fn uuid_from(s: &str) -> Option<Value> {
    AttrType::Uuid.coerce(Value::String(s.to_string()))
}

/// Convert the declared fields of `item` to a native item
///
/// Null fields and undeclared fields are left out.
pub fn item_to_native(meta: &StoreMeta, item: &Item) -> StoreResult<NativeItem> {
    let mut native = NativeItem::new();
    for (name, value) in item.iter() {
        if value.is_null() {
            continue;
        }
        if let Some(attr) = meta.attr(name) {
            native.insert(name.clone(), to_native(attr.attr_type, value)?);
        }
    }
    Ok(native)
}

/// Convert a native item back to an item, dropping undeclared attributes
pub fn item_from_native(meta: &StoreMeta, native: &NativeItem) -> StoreResult<Item> {
    let mut item = Item::new();
    for (name, value) in native {
        if let Some(attr) = meta.attr(name) {
            item.set(name.clone(), from_native(attr.attr_type, value)?);
        }
    }
    Ok(item)
}

/// The native key attributes of `item`, restricted to `names`
///
/// # Errors
///
/// Returns `Validation` if one of `names` is missing.
pub fn project(item: &NativeItem, names: &[&str]) -> StoreResult<NativeItem> {
    names
        .iter()
        .map(|name| {
            item.get(*name)
                .map(|v| (name.to_string(), v.clone()))
                .ok_or_else(|| StoreError::validation(format!("missing key attribute '{}'", name)))
        })
        .collect()
}
