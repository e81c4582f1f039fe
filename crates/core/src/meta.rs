//! Store metadata
//!
//! A [`StoreMeta`] is everything the storage layer knows about one entity:
//! attributes, key configuration, access policy, batch size, indexes and
//! links. It is built once at registration time (the builder validates it)
//! and shared immutably afterwards.

use crate::attr::{Attr, AttrType, FilterOp};
use crate::error::{StoreError, StoreResult};
use crate::filter::SearchFilter;
use crate::index::{Index, Link, OnDelete};
use crate::item::Item;
use crate::key::{KeyConfig, KeyField, KeySecret};
use std::collections::HashSet;
use std::fmt;
use std::ops::BitAnd;

/// Default maximum number of edits per batch call
pub const DEFAULT_BATCH_SIZE: usize = 100;

// ============================================================================
// Operations & access
// ============================================================================

/// A store operation subject to access control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    /// `create`
    Create,
    /// `read` / `read_batch`
    Read,
    /// `update`
    Update,
    /// `delete`
    Delete,
    /// `search` / `count`
    Search,
}

impl StoreOp {
    /// Operation name
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreOp::Create => "create",
            StoreOp::Read => "read",
            StoreOp::Update => "update",
            StoreOp::Delete => "delete",
            StoreOp::Search => "search",
        }
    }
}

impl fmt::Display for StoreOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Set of permitted operations
///
/// Used three ways: the policy declared on a `StoreMeta`, the capabilities a
/// backend reports, and the grants of a caller. The effective permission is
/// their intersection (`&`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreAccess {
    /// `create` allowed
    pub create: bool,
    /// `read` allowed
    pub read: bool,
    /// `update` allowed
    pub update: bool,
    /// `delete` allowed
    pub delete: bool,
    /// `search` allowed
    pub search: bool,
}

impl StoreAccess {
    /// Every operation
    pub const fn all() -> Self {
        StoreAccess {
            create: true,
            read: true,
            update: true,
            delete: true,
            search: true,
        }
    }

    /// Nothing
    pub const fn none() -> Self {
        StoreAccess {
            create: false,
            read: false,
            update: false,
            delete: false,
            search: false,
        }
    }

    /// Read and search only
    pub const fn read_only() -> Self {
        StoreAccess {
            read: true,
            search: true,
            ..Self::none()
        }
    }

    /// True if `op` is permitted
    pub fn allows(&self, op: StoreOp) -> bool {
        match op {
            StoreOp::Create => self.create,
            StoreOp::Read => self.read,
            StoreOp::Update => self.update,
            StoreOp::Delete => self.delete,
            StoreOp::Search => self.search,
        }
    }

    /// True if any edit operation is permitted
    pub fn is_editable(&self) -> bool {
        self.create || self.update || self.delete
    }
}

impl Default for StoreAccess {
    fn default() -> Self {
        Self::all()
    }
}

impl BitAnd for StoreAccess {
    type Output = StoreAccess;

    fn bitand(self, rhs: StoreAccess) -> StoreAccess {
        StoreAccess {
            create: self.create && rhs.create,
            read: self.read && rhs.read,
            update: self.update && rhs.update,
            delete: self.delete && rhs.delete,
            search: self.search && rhs.search,
        }
    }
}

// ============================================================================
// StoreMeta
// ============================================================================

/// Immutable metadata for one stored entity
#[derive(Debug, Clone, PartialEq)]
pub struct StoreMeta {
    /// Entity / table name
    pub name: String,
    /// Declared attributes, in declaration order
    pub attrs: Vec<Attr>,
    /// Key configuration
    pub key_config: KeyConfig,
    /// Operations the entity supports
    pub store_access: StoreAccess,
    /// Maximum edits per batch call
    pub batch_size: usize,
    /// Declared indexes
    pub indexes: Vec<Index>,
    /// Belongs-to links to parent stores
    pub links: Vec<Link>,
}

impl StoreMeta {
    /// Start building metadata for `name`
    pub fn builder(name: impl Into<String>) -> StoreMetaBuilder {
        StoreMetaBuilder::new(name)
    }

    /// Look up an attribute by name
    pub fn attr(&self, name: &str) -> Option<&Attr> {
        self.attrs.iter().find(|a| a.name == name)
    }

    /// Encode the key of `item`
    pub fn key_str(&self, item: &Item) -> StoreResult<String> {
        self.key_config.to_key_str(item)
    }

    /// Decode `key` into an item holding only the key fields
    pub fn key_item(&self, key: &str) -> StoreResult<Item> {
        self.key_config.from_key_str(key)
    }

    /// Equality filter selecting the item with `key`
    pub fn key_filter(&self, key: &str) -> StoreResult<SearchFilter> {
        let key_item = self.key_item(key)?;
        Ok(SearchFilter::all(
            key_item
                .into_iter()
                .map(|(name, value)| SearchFilter::eq(name, value)),
        ))
    }

    /// Value a child's link field holds for the item with `key`
    ///
    /// A single-attribute key links by its typed value; other keys link by
    /// their canonical (unsealed) text, which is stable across encodings.
    pub fn link_value(&self, key: &str) -> StoreResult<crate::value::Value> {
        let key_item = self.key_item(key)?;
        match &self.key_config {
            KeyConfig::Attr(field) => key_item
                .get(&field.name)
                .cloned()
                .ok_or_else(|| StoreError::validation(format!("key has no '{}'", field.name))),
            _ => Ok(crate::value::Value::String(
                self.key_config.canonical_key(&key_item)?,
            )),
        }
    }

    /// Unique tuples declared on this store
    pub fn unique_indexes(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.indexes.iter().filter_map(|index| match index {
            Index::Unique { name, fields } => Some((name.as_str(), fields.as_slice())),
            _ => None,
        })
    }

    /// Apply create generators and coerce values to declared types
    ///
    /// Unknown fields are dropped; schema enforcement is the job of the
    /// validating layer.
    pub fn prepare_create(&self, item: &Item) -> StoreResult<Item> {
        let mut prepared = Item::new();
        for attr in &self.attrs {
            let supplied = item.get(&attr.name).cloned();
            let value = match (&attr.create_generator, supplied) {
                (Some(generator), None) => Some(generator.generate()),
                (Some(generator), Some(_)) if !attr.creatable => Some(generator.generate()),
                (_, supplied) => supplied,
            };
            if let Some(value) = value {
                prepared.set(attr.name.clone(), coerce_to(attr, value)?);
            }
        }
        self.key_config.normalize(&mut prepared)?;
        Ok(prepared)
    }

    /// Apply update generators and coerce values to declared types
    pub fn prepare_update(&self, updates: &Item) -> StoreResult<Item> {
        let mut prepared = Item::new();
        for attr in &self.attrs {
            let supplied = updates.get(&attr.name).cloned();
            let value = match (&attr.update_generator, supplied) {
                (Some(generator), None) => Some(generator.generate()),
                (Some(generator), Some(_))
                    if !attr.updatable && !self.key_config.is_required_attr(&attr.name) =>
                {
                    Some(generator.generate())
                }
                (_, supplied) => supplied,
            };
            if let Some(value) = value {
                prepared.set(attr.name.clone(), coerce_to(attr, value)?);
            }
        }
        self.key_config.normalize(&mut prepared)?;
        Ok(prepared)
    }

    /// Strip fields callers may not read
    pub fn readable_view(&self, mut item: Item) -> Item {
        item.retain(|name| self.attr(name).map_or(false, |a| a.readable));
        item
    }
}

fn coerce_to(attr: &Attr, value: crate::value::Value) -> StoreResult<crate::value::Value> {
    let type_name = value.type_name();
    attr.attr_type.coerce(value).ok_or_else(|| {
        StoreError::validation(format!(
            "attribute '{}' must be {}, got {}",
            attr.name, attr.attr_type, type_name
        ))
    })
}

// ============================================================================
// Builder
// ============================================================================

enum KeySpec {
    Attr(String),
    Composite(Vec<String>),
    PartitionSort(String, String, KeySecret),
    Explicit(KeyConfig),
}

/// Builder for [`StoreMeta`]
///
/// # Example
///
/// ```
/// use storekit_core::{Attr, AttrType, Index, StoreMeta};
///
/// let meta = StoreMeta::builder("users")
///     .attr(Attr::new("id", AttrType::Int))
///     .attr(Attr::new("email", AttrType::Str))
///     .key_attr("id")
///     .index(Index::unique("unique_email", ["email"]))
///     .build()
///     .unwrap();
/// assert_eq!(meta.key_config.field_names(), vec!["id"]);
/// ```
pub struct StoreMetaBuilder {
    name: String,
    attrs: Vec<Attr>,
    key: Option<KeySpec>,
    store_access: StoreAccess,
    batch_size: usize,
    indexes: Vec<Index>,
    links: Vec<Link>,
}

impl StoreMetaBuilder {
    fn new(name: impl Into<String>) -> Self {
        StoreMetaBuilder {
            name: name.into(),
            attrs: Vec::new(),
            key: None,
            store_access: StoreAccess::all(),
            batch_size: DEFAULT_BATCH_SIZE,
            indexes: Vec::new(),
            links: Vec::new(),
        }
    }

    /// Add an attribute
    pub fn attr(mut self, attr: Attr) -> Self {
        self.attrs.push(attr);
        self
    }

    /// Key on a single attribute
    pub fn key_attr(mut self, field: impl Into<String>) -> Self {
        self.key = Some(KeySpec::Attr(field.into()));
        self
    }

    /// Key on an ordered tuple of attributes
    pub fn key_composite<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.key = Some(KeySpec::Composite(
            fields.into_iter().map(Into::into).collect(),
        ));
        self
    }

    /// Key on a partition + sort attribute pair, sealed with `secret`
    pub fn key_partition_sort(
        mut self,
        partition: impl Into<String>,
        sort: impl Into<String>,
        secret: KeySecret,
    ) -> Self {
        self.key = Some(KeySpec::PartitionSort(partition.into(), sort.into(), secret));
        self
    }

    /// Use a fully specified key configuration
    pub fn key(mut self, key_config: KeyConfig) -> Self {
        self.key = Some(KeySpec::Explicit(key_config));
        self
    }

    /// Set the access policy
    pub fn access(mut self, store_access: StoreAccess) -> Self {
        self.store_access = store_access;
        self
    }

    /// Set the maximum batch size
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Declare an index
    pub fn index(mut self, index: Index) -> Self {
        self.indexes.push(index);
        self
    }

    /// Declare a belongs-to link
    pub fn link(mut self, link: Link) -> Self {
        self.links.push(link);
        self
    }

    /// Validate and build
    ///
    /// # Errors
    ///
    /// Returns `Validation` if attribute names repeat, the key is missing or
    /// references unknown attributes, an index or link references an unknown
    /// attribute, or `batch_size` is zero.
    pub fn build(self) -> StoreResult<StoreMeta> {
        let mut seen = HashSet::new();
        for attr in &self.attrs {
            if !seen.insert(attr.name.as_str()) {
                return Err(StoreError::validation(format!(
                    "duplicate attribute '{}' in store '{}'",
                    attr.name, self.name
                )));
            }
        }
        if self.batch_size == 0 {
            return Err(StoreError::validation("batch_size must be positive"));
        }

        let field = |name: &str| -> StoreResult<KeyField> {
            self.attrs
                .iter()
                .find(|a| a.name == name)
                .map(|a| KeyField::new(name, a.attr_type))
                .ok_or_else(|| unknown(&self.name, name))
        };
        let key_config = match &self.key {
            None => {
                return Err(StoreError::validation(format!(
                    "store '{}' has no key configuration",
                    self.name
                )))
            }
            Some(KeySpec::Attr(name)) => KeyConfig::Attr(field(name)?),
            Some(KeySpec::Composite(names)) => {
                if names.is_empty() {
                    return Err(StoreError::validation("composite key needs at least one field"));
                }
                KeyConfig::Composite(names.iter().map(|n| field(n)).collect::<StoreResult<_>>()?)
            }
            Some(KeySpec::PartitionSort(pk, sk, secret)) => KeyConfig::PartitionSort {
                partition: field(pk)?,
                sort: field(sk)?,
                secret: secret.clone(),
            },
            Some(KeySpec::Explicit(config)) => {
                for key_field in config.fields() {
                    let declared = field(&key_field.name)?;
                    if declared.attr_type != key_field.attr_type {
                        return Err(StoreError::validation(format!(
                            "key field '{}' declared as {} but attribute is {}",
                            key_field.name, key_field.attr_type, declared.attr_type
                        )));
                    }
                }
                config.clone()
            }
        };
        for key_field in key_config.fields() {
            if key_field.attr_type == AttrType::Json {
                return Err(StoreError::validation(format!(
                    "key field '{}' cannot be JSON",
                    key_field.name
                )));
            }
        }
        let searchable_eq = |name: &str, what: &str| -> StoreResult<()> {
            let attr = self.attrs.iter().find(|a| a.name == name).ok_or_else(|| unknown(&self.name, name))?;
            if !attr.permits(FilterOp::Eq) {
                return Err(StoreError::validation(format!(
                    "{} field '{}' must be searchable by equality",
                    what, name
                )));
            }
            Ok(())
        };
        for index in &self.indexes {
            for name in index.fields() {
                field(name)?;
                if matches!(index, Index::Unique { .. }) {
                    searchable_eq(name, "unique index")?;
                }
            }
        }
        for link in &self.links {
            searchable_eq(&link.local_field, "link")?;
            if link.on_delete == OnDelete::Nullify {
                let attr = self.attrs.iter().find(|a| a.name == link.local_field);
                if !attr.map_or(false, |a| a.updatable && a.nullable) {
                    return Err(StoreError::validation(format!(
                        "link '{}' nullifies '{}', which must be updatable and nullable",
                        link.name, link.local_field
                    )));
                }
            }
        }

        // Key fields never hold null
        let mut attrs = self.attrs;
        for attr in attrs.iter_mut() {
            if key_config.is_required_attr(&attr.name) {
                attr.nullable = false;
            }
        }

        Ok(StoreMeta {
            name: self.name,
            attrs,
            key_config,
            store_access: self.store_access,
            batch_size: self.batch_size,
            indexes: self.indexes,
            links: self.links,
        })
    }
}

fn unknown(store: &str, name: &str) -> StoreError {
    StoreError::validation(format!("store '{}' has no attribute '{}'", store, name))
}
