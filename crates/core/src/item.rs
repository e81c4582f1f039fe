//! Item: the uniform field container
//!
//! An `Item` is a name → [`Value`] map. Stores accept and return items; key
//! configs, filters, the query planner and every backend read fields through
//! the same accessor, so nothing depends on a per-entity Rust type.

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A stored entity, addressed by attribute name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Item {
    fields: BTreeMap<String, Value>,
}

impl Item {
    /// Create an empty item
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: set a field
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Get a field value
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Set a field, returning the previous value
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.fields.insert(name.into(), value.into())
    }

    /// Remove a field
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.fields.remove(name)
    }

    /// True if the field is present (even when `Null`)
    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// True if the field is present and not `Null`
    pub fn has_value(&self, name: &str) -> bool {
        self.fields.get(name).map_or(false, |v| !v.is_null())
    }

    /// Number of fields
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// True if no fields are set
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Iterate fields in name order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }

    /// Field names in name order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Overlay every field of `updates` onto this item
    pub fn merge(&mut self, updates: &Item) {
        for (name, value) in &updates.fields {
            self.fields.insert(name.clone(), value.clone());
        }
    }

    /// Keep only the named fields
    pub fn retain<F: FnMut(&str) -> bool>(&mut self, mut keep: F) {
        self.fields.retain(|name, _| keep(name));
    }

    /// Drop fields holding `Null`
    pub fn remove_nulls(&mut self) {
        self.fields.retain(|_, v| !v.is_null());
    }

    /// JSON object rendering (see [`Value::to_json`])
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.fields
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }
}

impl FromIterator<(String, Value)> for Item {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Item {
            fields: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for Item {
    type Item = (String, Value);
    type IntoIter = std::collections::btree_map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.into_iter()
    }
}
