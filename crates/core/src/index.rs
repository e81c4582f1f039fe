//! Index and link declarations
//!
//! Indexes describe access paths a backend may use (`Attr`, `PartitionSort`)
//! and tuples the write path must keep unique (`Unique`). Links describe
//! belongs-to relationships that referential integrity enforces on delete.

use serde::{Deserialize, Serialize};

/// A declared index
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Index {
    /// Secondary index on a single field
    Attr {
        /// Index name
        name: String,
        /// Indexed field
        field: String,
    },
    /// Partition key with optional sort key
    PartitionSort {
        /// Index name
        name: String,
        /// Partition key field
        pk: String,
        /// Sort key field
        sk: Option<String>,
    },
    /// Tuple of fields that must be unique across stored items
    Unique {
        /// Index name
        name: String,
        /// Fields forming the tuple
        fields: Vec<String>,
    },
}

impl Index {
    /// Declare a single-field secondary index
    pub fn attr(name: impl Into<String>, field: impl Into<String>) -> Self {
        Index::Attr {
            name: name.into(),
            field: field.into(),
        }
    }

    /// Declare a partition/sort index
    pub fn partition_sort(
        name: impl Into<String>,
        pk: impl Into<String>,
        sk: Option<impl Into<String>>,
    ) -> Self {
        Index::PartitionSort {
            name: name.into(),
            pk: pk.into(),
            sk: sk.map(Into::into),
        }
    }

    /// Declare a unique tuple
    pub fn unique<I, S>(name: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Index::Unique {
            name: name.into(),
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    /// Index name
    pub fn name(&self) -> &str {
        match self {
            Index::Attr { name, .. }
            | Index::PartitionSort { name, .. }
            | Index::Unique { name, .. } => name,
        }
    }

    /// Fields the index references
    pub fn fields(&self) -> Vec<&str> {
        match self {
            Index::Attr { field, .. } => vec![field.as_str()],
            Index::PartitionSort { pk, sk, .. } => {
                std::iter::once(pk.as_str()).chain(sk.as_deref()).collect()
            }
            Index::Unique { fields, .. } => fields.iter().map(String::as_str).collect(),
        }
    }

    /// `(pk, sk)` view of an access-path index; `None` for unique tuples
    pub fn key_pair(&self) -> Option<(&str, Option<&str>)> {
        match self {
            Index::Attr { field, .. } => Some((field.as_str(), None)),
            Index::PartitionSort { pk, sk, .. } => Some((pk.as_str(), sk.as_deref())),
            Index::Unique { .. } => None,
        }
    }
}

/// What happens to children when a linked parent is deleted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnDelete {
    /// Refuse to delete the parent while children exist
    Block,
    /// Set the child's foreign key to null after the parent is deleted
    Nullify,
    /// Delete the children after the parent is deleted
    Cascade,
}

/// A belongs-to relationship declared on the child store
///
/// `local_field` on the child holds the parent's link value (see
/// `StoreMeta::link_value`): the key value for a single-attribute parent
/// key, the canonical key text otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    /// Relationship name
    pub name: String,
    /// Name of the parent store
    pub linked_store: String,
    /// Child field holding the parent key
    pub local_field: String,
    /// Delete behaviour
    pub on_delete: OnDelete,
}

impl Link {
    /// Declare a belongs-to link
    pub fn belongs_to(
        name: impl Into<String>,
        linked_store: impl Into<String>,
        local_field: impl Into<String>,
        on_delete: OnDelete,
    ) -> Self {
        Link {
            name: name.into(),
            linked_store: linked_store.into(),
            local_field: local_field.into(),
            on_delete,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_pair_views() {
        assert_eq!(Index::attr("by_email", "email").key_pair(), Some(("email", None)));
        assert_eq!(
            Index::partition_sort("by_sk", "sk", Some("pk")).key_pair(),
            Some(("sk", Some("pk")))
        );
        assert_eq!(Index::unique("u", ["a", "b"]).key_pair(), None);
    }

    #[test]
    fn test_fields() {
        assert_eq!(
            Index::partition_sort("p", "a", None::<String>).fields(),
            vec!["a"]
        );
        assert_eq!(Index::unique("u", ["a", "b"]).fields(), vec!["a", "b"]);
    }
}
