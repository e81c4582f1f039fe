//! The uniform store contract
//!
//! Backends (memory, relational, partition/sort) and every wrapper layer
//! implement [`Store`]. Wrappers hold the next store as a [`DynStore`] and
//! delegate whatever they do not change, so layers compose in any order the
//! registry chooses.
//!
//! Thread safety: all methods may be called concurrently from multiple
//! threads (`Send + Sync`).

use crate::batch::{check_batch_size, BatchEdit, BatchEditResult, EditOp};
use crate::error::{StoreError, StoreResult};
use crate::filter::SearchFilter;
use crate::item::Item;
use crate::meta::{StoreAccess, StoreMeta};
use crate::order::SearchOrder;
use crate::search::{ResultSet, SearchRequest};
use std::sync::Arc;

/// Shared, type-erased store
pub type DynStore = Arc<dyn Store>;

/// CRUD, batch and search over one entity
pub trait Store: Send + Sync {
    /// Metadata of the stored entity
    fn meta(&self) -> &StoreMeta;

    /// Operations this store can perform at all
    fn capabilities(&self) -> StoreAccess {
        StoreAccess::all()
    }

    /// Create an item, returning it as stored
    ///
    /// # Errors
    ///
    /// Returns `Conflict` if an item with the same key exists.
    fn create(&self, item: Item) -> StoreResult<Item>;

    /// Read an item by key
    fn read(&self, key: &str) -> StoreResult<Option<Item>>;

    /// Read several items by key; the result is aligned with `keys`
    fn read_batch(&self, keys: &[String]) -> StoreResult<Vec<Option<Item>>> {
        keys.iter().map(|key| self.read(key)).collect()
    }

    /// Update the item identified by the key fields of `updates`
    ///
    /// Only the fields present in `updates` change. Returns `Ok(None)` if no
    /// item has the key.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` if `precondition` does not match the stored item.
    fn update(
        &self,
        updates: Item,
        precondition: Option<&SearchFilter>,
    ) -> StoreResult<Option<Item>>;

    /// Delete by key; `Ok(false)` if no item had the key
    fn delete(&self, key: &str) -> StoreResult<bool>;

    /// One page of matching items
    fn search(&self, request: &SearchRequest) -> StoreResult<ResultSet>;

    /// Number of matching items
    fn count(&self, filter: &SearchFilter) -> StoreResult<u64>;

    /// Apply edits in order, reporting each outcome
    ///
    /// # Errors
    ///
    /// Returns `BatchTooLarge` if `edits` exceeds the store's `batch_size`;
    /// other failures are reported per item.
    fn edit_batch(&self, edits: Vec<BatchEdit>) -> StoreResult<Vec<BatchEditResult>>;

    /// Every matching item, following page keys until exhausted
    fn search_all(&self, filter: &SearchFilter, order: &SearchOrder) -> StoreResult<Vec<Item>> {
        let mut items = Vec::new();
        let mut request = SearchRequest::new()
            .with_filter(filter.clone())
            .with_order(order.clone());
        loop {
            let page = self.search(&request)?;
            items.extend(page.results);
            match page.next_page_key {
                Some(key) => request.page_key = Some(key),
                None => return Ok(items),
            }
        }
    }
}

/// Apply a batch one edit at a time through `store`
///
/// Backends without a native batch call use this for `edit_batch`. An absent
/// key on update or delete becomes a `not_found` result.
pub fn apply_edits_individually<S: Store + ?Sized>(
    store: &S,
    edits: Vec<BatchEdit>,
) -> StoreResult<Vec<BatchEditResult>> {
    check_batch_size(store.meta(), edits.len())?;
    let mut results = Vec::with_capacity(edits.len());
    for edit in edits {
        let outcome = match &edit.op {
            EditOp::Create(item) => store.create(item.clone()).map(Some),
            EditOp::Update(updates) => match store.update(updates.clone(), None) {
                Ok(Some(item)) => Ok(Some(item)),
                Ok(None) => Err(StoreError::not_found(
                    store
                        .meta()
                        .key_str(updates)
                        .unwrap_or_else(|_| "<invalid key>".to_string()),
                )),
                Err(e) => Err(e),
            },
            EditOp::Delete(key) => match store.delete(key) {
                Ok(true) => Ok(None),
                Ok(false) => Err(StoreError::not_found(key.clone())),
                Err(e) => Err(e),
            },
        };
        results.push(match outcome {
            Ok(item) => BatchEditResult::ok(edit, item),
            Err(e) => BatchEditResult::failed(edit, &e),
        });
    }
    Ok(results)
}
