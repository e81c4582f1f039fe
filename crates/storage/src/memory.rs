//! MemoryStore: in-process backend
//!
//! Items live in a `BTreeMap` keyed by the canonical (unsealed) rendering of
//! their key fields, behind a `parking_lot::RwLock`. Searches evaluate the
//! locked filter with `matches`, sort with `SearchOrder::sort` and paginate
//! with offset page keys.
//!
//! Null fields are not persisted: writing `Null` removes the field, and
//! items read back without it.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use storekit_core::{
    apply_edits_individually, slice_page, BatchEdit, BatchEditResult, Item, PageKey, ResultSet,
    SearchFilter, SearchRequest, Store, StoreConfig, StoreError, StoreMeta, StoreResult,
};

/// In-memory store for one entity
#[derive(Debug)]
pub struct MemoryStore {
    meta: Arc<StoreMeta>,
    config: StoreConfig,
    /// canonical key → stored item
    items: RwLock<BTreeMap<String, Item>>,
}

impl MemoryStore {
    /// Create an empty store with default limits
    pub fn new(meta: Arc<StoreMeta>) -> Self {
        Self {
            meta,
            config: StoreConfig::default(),
            items: RwLock::new(BTreeMap::new()),
        }
    }

    /// Use `config` for search limits
    pub fn with_config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Number of stored items
    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    /// True if nothing is stored
    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }

    fn canonical_for_key(&self, key: &str) -> StoreResult<String> {
        let key_item = self.meta.key_item(key)?;
        self.meta.key_config.canonical_key(&key_item)
    }

    fn matching(&self, filter: &SearchFilter) -> Vec<Item> {
        self.items
            .read()
            .values()
            .filter(|item| filter.matches(item))
            .cloned()
            .collect()
    }
}

impl Store for MemoryStore {
    fn meta(&self) -> &StoreMeta {
        &self.meta
    }

    fn create(&self, item: Item) -> StoreResult<Item> {
        let mut prepared = self.meta.prepare_create(&item)?;
        prepared.remove_nulls();
        let canonical = self.meta.key_config.canonical_key(&prepared)?;
        let mut items = self.items.write();
        if items.contains_key(&canonical) {
            return Err(StoreError::conflict(format!(
                "{} with key {} already exists",
                self.meta.name, canonical
            )));
        }
        items.insert(canonical, prepared.clone());
        Ok(prepared)
    }

    fn read(&self, key: &str) -> StoreResult<Option<Item>> {
        let canonical = self.canonical_for_key(key)?;
        Ok(self.items.read().get(&canonical).cloned())
    }

    fn update(
        &self,
        updates: Item,
        precondition: Option<&SearchFilter>,
    ) -> StoreResult<Option<Item>> {
        let prepared = self.meta.prepare_update(&updates)?;
        let canonical = self.meta.key_config.canonical_key(&prepared)?;
        let precondition = precondition
            .map(|f| f.lock_attrs(&self.meta.attrs))
            .transpose()?;

        let mut items = self.items.write();
        let Some(existing) = items.get_mut(&canonical) else {
            return Ok(None);
        };
        if let Some(precondition) = &precondition {
            if !precondition.matches(existing) {
                return Err(StoreError::conflict(format!(
                    "precondition failed for {} {}",
                    self.meta.name, canonical
                )));
            }
        }
        existing.merge(&prepared);
        existing.remove_nulls();
        Ok(Some(existing.clone()))
    }

    fn delete(&self, key: &str) -> StoreResult<bool> {
        let canonical = self.canonical_for_key(key)?;
        Ok(self.items.write().remove(&canonical).is_some())
    }

    fn search(&self, request: &SearchRequest) -> StoreResult<ResultSet> {
        let filter = request.filter.lock_attrs(&self.meta.attrs)?;
        request.order.lock_attrs(&self.meta.attrs)?;
        let offset = PageKey::offset_from(request.page_key.as_deref())?;
        let limit = request.effective_limit(
            self.config.default_search_limit,
            self.config.max_search_limit,
        );

        let mut matches = self.matching(&filter);
        request.order.sort(&mut matches);
        debug!(
            target: "storekit::memory",
            store = %self.meta.name,
            matched = matches.len(),
            offset,
            limit,
            "search"
        );
        Ok(slice_page(matches, offset, limit))
    }

    fn count(&self, filter: &SearchFilter) -> StoreResult<u64> {
        let filter = filter.lock_attrs(&self.meta.attrs)?;
        let items = self.items.read();
        Ok(items.values().filter(|item| filter.matches(item)).count() as u64)
    }

    fn edit_batch(&self, edits: Vec<BatchEdit>) -> StoreResult<Vec<BatchEditResult>> {
        apply_edits_individually(self, edits)
    }
}
