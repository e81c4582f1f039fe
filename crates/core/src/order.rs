//! Search ordering

use crate::attr::Attr;
use crate::error::{StoreError, StoreResult};
use crate::item::Item;
use crate::value::Value;
use std::cmp::Ordering;

/// One sort criterion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortField {
    /// Attribute name
    pub attr: String,
    /// Descending
    pub desc: bool,
}

/// Ordered list of sort criteria; empty means backend order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchOrder {
    /// Criteria, most significant first
    pub fields: Vec<SortField>,
}

impl SearchOrder {
    /// Empty order
    pub fn new() -> Self {
        Self::default()
    }

    /// Order ascending by `attr`
    pub fn asc(attr: impl Into<String>) -> Self {
        Self::new().then(attr, false)
    }

    /// Order descending by `attr`
    pub fn desc(attr: impl Into<String>) -> Self {
        Self::new().then(attr, true)
    }

    /// Append a criterion
    pub fn then(mut self, attr: impl Into<String>, desc: bool) -> Self {
        self.fields.push(SortField {
            attr: attr.into(),
            desc,
        });
        self
    }

    /// True when no criteria are set
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// The criterion when exactly one is set
    pub fn single(&self) -> Option<&SortField> {
        match self.fields.as_slice() {
            [field] => Some(field),
            _ => None,
        }
    }

    /// Check every criterion names an existing, readable, sortable attribute
    pub fn lock_attrs(&self, attrs: &[Attr]) -> StoreResult<()> {
        for field in &self.fields {
            let attr = attrs.iter().find(|a| a.name == field.attr).ok_or_else(|| {
                StoreError::validation(format!("unknown sort attribute '{}'", field.attr))
            })?;
            if !attr.sortable || !attr.readable {
                return Err(StoreError::validation(format!(
                    "attribute '{}' is not sortable",
                    field.attr
                )));
            }
        }
        Ok(())
    }

    /// Compare two items under this order
    pub fn compare(&self, a: &Item, b: &Item) -> Ordering {
        for field in &self.fields {
            let ord = Value::sort_cmp(a.get(&field.attr), b.get(&field.attr));
            let ord = if field.desc { ord.reverse() } else { ord };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }

    /// Stable sort of `items`
    pub fn sort(&self, items: &mut [Item]) {
        if !self.is_empty() {
            items.sort_by(|a, b| self.compare(a, b));
        }
    }
}
