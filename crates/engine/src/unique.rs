//! Unique index enforcement
//!
//! Before a create or update reaches the wrapped store, every `Unique` index
//! of the store is checked: if another item already carries the same values
//! for all of the index's fields the write fails with `Conflict`. A tuple
//! with a null or absent field is never checked.
//!
//! Lookups go through a separate store handle below the caller's access
//! restrictions, so a caller without search rights still gets uniqueness
//! enforced. The check and the write are not atomic; two concurrent writers
//! can both pass the check.

use std::collections::HashSet;

use storekit_core::{
    check_batch_size, prefail_and_delegate, BatchEdit, BatchEditResult, DynStore, EditOp, Item,
    ResultSet, SearchFilter, SearchRequest, Store, StoreAccess, StoreError, StoreMeta, StoreOp,
    StoreResult, Value,
};
use tracing::debug;

/// Rejects writes that would duplicate a unique tuple
pub struct UniqueIndexStore {
    inner: DynStore,
    lookup: DynStore,
}

/// An item about to be stored, and the canonical key of the item it replaces
type Pending = (Item, Option<String>);

/// One unique index and the values an item holds for it
struct Tuple<'a> {
    index: &'a str,
    fields: &'a [String],
    values: Vec<Value>,
}

impl Tuple<'_> {
    fn filter(&self) -> SearchFilter {
        SearchFilter::all(
            self.fields
                .iter()
                .zip(&self.values)
                .map(|(name, value)| SearchFilter::eq(name.clone(), value.clone())),
        )
    }

    /// Identity of the tuple within one batch
    fn claim(&self) -> String {
        let values: Vec<serde_json::Value> = self.values.iter().map(Value::to_json).collect();
        format!("{}:{}", self.index, serde_json::Value::Array(values))
    }
}

impl UniqueIndexStore {
    /// Wrap `inner`, searching `lookup` for existing tuples
    ///
    /// `lookup` must hold the same data as `inner`; typically it is the
    /// store beneath the access restriction layer.
    pub fn new(inner: DynStore, lookup: DynStore) -> Self {
        UniqueIndexStore { inner, lookup }
    }

    /// Complete tuples `item` holds, one per unique index
    fn tuples<'a>(&'a self, item: &Item) -> Vec<Tuple<'a>> {
        self.meta()
            .unique_indexes()
            .filter_map(|(index, fields)| {
                let values: Option<Vec<Value>> = fields
                    .iter()
                    .map(|f| item.get(f).filter(|v| !v.is_null()).cloned())
                    .collect();
                values.map(|values| Tuple {
                    index,
                    fields,
                    values,
                })
            })
            .collect()
    }

    /// Fail if an item other than `own_key` holds `tuple`
    fn check_tuple(&self, tuple: &Tuple<'_>, own_key: Option<&str>) -> StoreResult<()> {
        let page = self
            .lookup
            .search(&SearchRequest::new().with_filter(tuple.filter()).with_limit(2))?;
        let key_config = &self.meta().key_config;
        for found in &page.results {
            if own_key.is_some() && key_config.canonical_key(found).ok().as_deref() == own_key {
                continue;
            }
            debug!(
                target: "storekit::unique",
                store = %self.meta().name,
                index = %tuple.index,
                "unique tuple taken"
            );
            return Err(StoreError::conflict(format!(
                "{}: unique index '{}' already holds ({})",
                self.meta().name,
                tuple.index,
                tuple.fields.join(", ")
            )));
        }
        Ok(())
    }

    /// The item a create would store
    fn pending_create(&self, item: &Item) -> StoreResult<Option<Pending>> {
        Ok(Some((self.meta().prepare_create(item)?, None)))
    }

    /// The item an update would leave behind and the canonical key of the
    /// item it replaces; `None` when no unique field changes or the key is
    /// absent
    fn pending_update(&self, updates: &Item) -> StoreResult<Option<Pending>> {
        let meta = self.meta();
        let touched = meta
            .unique_indexes()
            .any(|(_, fields)| fields.iter().any(|f| updates.contains(f)));
        if !touched {
            return Ok(None);
        }
        let key = meta.key_str(updates)?;
        let Some(mut merged) = self.lookup.read(&key)? else {
            return Ok(None);
        };
        let own = meta.key_config.canonical_key(&merged)?;
        merged.merge(&meta.prepare_update(updates)?);
        Ok(Some((merged, Some(own))))
    }

    fn pending(&self, op: &EditOp) -> StoreResult<Option<Pending>> {
        match op {
            EditOp::Create(item) => self.pending_create(item),
            EditOp::Update(updates) => self.pending_update(updates),
            EditOp::Delete(_) => Ok(None),
        }
    }

    fn check_pending(&self, pending: Option<Pending>) -> StoreResult<()> {
        if let Some((item, own)) = pending {
            for tuple in self.tuples(&item) {
                self.check_tuple(&tuple, own.as_deref())?;
            }
        }
        Ok(())
    }

    fn allowed(&self, op: StoreOp) -> bool {
        self.inner.capabilities().allows(op)
    }
}

impl Store for UniqueIndexStore {
    fn meta(&self) -> &StoreMeta {
        self.inner.meta()
    }

    fn capabilities(&self) -> StoreAccess {
        self.inner.capabilities()
    }

    fn create(&self, item: Item) -> StoreResult<Item> {
        if self.allowed(StoreOp::Create) {
            self.check_pending(self.pending_create(&item)?)?;
        }
        self.inner.create(item)
    }

    fn read(&self, key: &str) -> StoreResult<Option<Item>> {
        self.inner.read(key)
    }

    fn read_batch(&self, keys: &[String]) -> StoreResult<Vec<Option<Item>>> {
        self.inner.read_batch(keys)
    }

    fn update(
        &self,
        updates: Item,
        precondition: Option<&SearchFilter>,
    ) -> StoreResult<Option<Item>> {
        if self.allowed(StoreOp::Update) {
            self.check_pending(self.pending_update(&updates)?)?;
        }
        self.inner.update(updates, precondition)
    }

    fn delete(&self, key: &str) -> StoreResult<bool> {
        self.inner.delete(key)
    }

    fn search(&self, request: &SearchRequest) -> StoreResult<ResultSet> {
        self.inner.search(request)
    }

    fn count(&self, filter: &SearchFilter) -> StoreResult<u64> {
        self.inner.count(filter)
    }

    fn edit_batch(&self, edits: Vec<BatchEdit>) -> StoreResult<Vec<BatchEditResult>> {
        check_batch_size(self.meta(), edits.len())?;
        // Tuples claimed by earlier edits of this batch
        let mut claimed = HashSet::new();
        prefail_and_delegate(
            edits,
            |edit| {
                let Some((item, own)) = self.pending(&edit.op)? else {
                    return Ok(());
                };
                let tuples = self.tuples(&item);
                for tuple in &tuples {
                    if claimed.contains(&tuple.claim()) {
                        return Err(StoreError::conflict(format!(
                            "{}: unique index '{}' is claimed twice in the batch",
                            self.meta().name,
                            tuple.index
                        )));
                    }
                    self.check_tuple(tuple, own.as_deref())?;
                }
                claimed.extend(tuples.iter().map(Tuple::claim));
                Ok(())
            },
            |survivors| self.inner.edit_batch(survivors),
        )
    }
}
