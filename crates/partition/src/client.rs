//! The native client seam
//!
//! [`PartitionClient`] is the narrow set of calls the partition store makes
//! against a partition/sort-key service. It mirrors the shape of such
//! services: single-item calls take condition expressions, batch calls have
//! fixed size limits and may leave work unprocessed, and query/scan pages are
//! bounded by a `limit` that counts *evaluated* items (before the filter)
//! and resume from an exclusive start key.
//!
//! [`crate::LocalClient`] implements it in-process.

use storekit_core::{Index, KeyConfig, StoreError, StoreMeta, StoreResult};

use crate::condition::Condition;
use crate::error::PartitionResult;
use crate::native::{NativeItem, NativeValue};

/// Maximum keys in one `batch_get_item` call
pub const MAX_BATCH_GET: usize = 100;

/// Maximum writes in one `batch_write_item` call
pub const MAX_BATCH_WRITE: usize = 25;

/// Partition key plus optional sort key attribute names
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySchema {
    /// Partition key attribute
    pub pk: String,
    /// Sort key attribute
    pub sk: Option<String>,
}

impl KeySchema {
    /// Key schema from attribute names
    pub fn new(pk: impl Into<String>, sk: Option<impl Into<String>>) -> Self {
        KeySchema {
            pk: pk.into(),
            sk: sk.map(Into::into),
        }
    }

    /// Attribute names, partition key first
    pub fn names(&self) -> Vec<&str> {
        std::iter::once(self.pk.as_str())
            .chain(self.sk.as_deref())
            .collect()
    }
}

/// A global secondary index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    /// Index name
    pub name: String,
    /// Index key
    pub key: KeySchema,
}

/// Table layout: primary key and secondary indexes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSpec {
    /// Table name
    pub name: String,
    /// Primary key
    pub key: KeySchema,
    /// Secondary indexes, in declaration order
    pub indexes: Vec<IndexSpec>,
}

impl TableSpec {
    /// Layout for the entity described by `meta`
    ///
    /// The primary key comes from the key config: a single attribute or a
    /// one-field composite is a partition key; two-field composites and
    /// partition/sort keys map to partition + sort key. `Attr` and
    /// `PartitionSort` indexes become secondary indexes.
    ///
    /// # Errors
    ///
    /// Returns `Validation` for composite keys of three or more fields.
    pub fn for_meta(meta: &StoreMeta) -> StoreResult<TableSpec> {
        let key = match &meta.key_config {
            KeyConfig::Attr(field) => KeySchema::new(field.name.clone(), None::<String>),
            KeyConfig::Composite(fields) => match fields.as_slice() {
                [pk] => KeySchema::new(pk.name.clone(), None::<String>),
                [pk, sk] => KeySchema::new(pk.name.clone(), Some(sk.name.clone())),
                _ => {
                    return Err(StoreError::validation(format!(
                        "store '{}': a partition table key has one or two fields, not {}",
                        meta.name,
                        fields.len()
                    )))
                }
            },
            KeyConfig::PartitionSort {
                partition, sort, ..
            } => KeySchema::new(partition.name.clone(), Some(sort.name.clone())),
        };
        let indexes = meta
            .indexes
            .iter()
            .filter_map(|index| match index {
                Index::Attr { name, field } => Some(IndexSpec {
                    name: name.clone(),
                    key: KeySchema::new(field.clone(), None::<String>),
                }),
                Index::PartitionSort { name, pk, sk } => Some(IndexSpec {
                    name: name.clone(),
                    key: KeySchema::new(pk.clone(), sk.clone()),
                }),
                Index::Unique { .. } => None,
            })
            .collect();
        Ok(TableSpec {
            name: meta.name.clone(),
            key,
            indexes,
        })
    }

    /// Attributes a resume key carries for queries on `index`: the table
    /// key, then the index key attributes not already part of it
    pub fn resume_names<'a>(&'a self, index: &'a KeySchema) -> Vec<&'a str> {
        let mut names = self.key.names();
        for name in index.names() {
            if !names.contains(&name) {
                names.push(name);
            }
        }
        names
    }

    /// Key schema of `index`, or of the table when `None`
    pub fn key_schema(&self, index: Option<&str>) -> Option<&KeySchema> {
        match index {
            None => Some(&self.key),
            Some(name) => self.indexes.iter().find(|i| i.name == name).map(|i| &i.key),
        }
    }
}

/// Key condition of a query: partition key equality, optional sort key equality
#[derive(Debug, Clone, PartialEq)]
pub struct KeyCondition {
    /// Partition key value
    pub pk: NativeValue,
    /// Sort key value
    pub sk: Option<NativeValue>,
}

/// A query against the table or one of its indexes
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    /// Table name
    pub table: String,
    /// Secondary index; `None` queries the table
    pub index: Option<String>,
    /// Key condition
    pub key: KeyCondition,
    /// Filter applied after `limit` is counted
    pub filter: Option<Condition>,
    /// Ascending sort key order when true
    pub scan_forward: bool,
    /// Maximum items to evaluate
    pub limit: Option<usize>,
    /// Resume after this key
    pub exclusive_start_key: Option<NativeItem>,
}

/// A full table scan
#[derive(Debug, Clone, PartialEq)]
pub struct ScanRequest {
    /// Table name
    pub table: String,
    /// Filter applied after `limit` is counted
    pub filter: Option<Condition>,
    /// Maximum items to evaluate
    pub limit: Option<usize>,
    /// Resume after this key
    pub exclusive_start_key: Option<NativeItem>,
}

/// One page of a query or scan
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    /// Items that passed the filter
    pub items: Vec<NativeItem>,
    /// Key of the last evaluated item when more remain
    pub last_evaluated_key: Option<NativeItem>,
}

/// A partial update of one item
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateRequest {
    /// Table name
    pub table: String,
    /// Primary key of the item
    pub key: NativeItem,
    /// Attributes to set
    pub set: NativeItem,
    /// Attributes to remove
    pub remove: Vec<String>,
    /// Condition on the current item
    pub condition: Option<Condition>,
}

/// One write in a batch
#[derive(Debug, Clone, PartialEq)]
pub enum WriteRequest {
    /// Put (replace) an item
    Put(NativeItem),
    /// Delete by primary key
    Delete(NativeItem),
}

/// Result of a batch get
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchGetOutput {
    /// Items found, in no particular order
    pub items: Vec<NativeItem>,
    /// Keys the service did not get to
    pub unprocessed_keys: Vec<NativeItem>,
}

/// Blocking client for a partition/sort-key service
pub trait PartitionClient: Send + Sync {
    /// Layout of `table`
    fn describe_table(&self, table: &str) -> PartitionResult<TableSpec>;

    /// Fetch one item by primary key
    fn get_item(&self, table: &str, key: &NativeItem) -> PartitionResult<Option<NativeItem>>;

    /// Put (replace) an item if `condition` holds on the current one
    fn put_item(
        &self,
        table: &str,
        item: NativeItem,
        condition: Option<&Condition>,
    ) -> PartitionResult<()>;

    /// Apply a partial update, returning the item as stored afterwards
    ///
    /// An absent item is created from the key and `set` when the condition
    /// allows it.
    fn update_item(&self, request: UpdateRequest) -> PartitionResult<NativeItem>;

    /// Delete an item if `condition` holds, returning the old item
    fn delete_item(
        &self,
        table: &str,
        key: &NativeItem,
        condition: Option<&Condition>,
    ) -> PartitionResult<Option<NativeItem>>;

    /// Fetch up to [`MAX_BATCH_GET`] items
    fn batch_get_item(&self, table: &str, keys: &[NativeItem]) -> PartitionResult<BatchGetOutput>;

    /// Apply up to [`MAX_BATCH_WRITE`] writes, returning the unprocessed ones
    fn batch_write_item(
        &self,
        table: &str,
        writes: Vec<WriteRequest>,
    ) -> PartitionResult<Vec<WriteRequest>>;

    /// One page of a key-conditioned query
    fn query(&self, request: &QueryRequest) -> PartitionResult<Page>;

    /// One page of a full scan
    fn scan(&self, request: &ScanRequest) -> PartitionResult<Page>;
}
