//! Referential integrity for belongs-to links
//!
//! Child stores declare `BelongsTo` links naming a parent store and the child
//! field that holds the parent's link value (`StoreMeta::link_value`). When
//! a parent item is deleted through this layer:
//!
//! - a `Block` link with at least one matching child fails the delete with
//!   `Conflict` before anything is deleted;
//! - after the delete succeeds, `Nullify` links clear the child field and
//!   `Cascade` links delete the children. These follow-ups are batch edits
//!   chunked by the child's `batch_size`; their failures are logged and never
//!   reach the caller.
//!
//! The check and the delete are separate calls, so a child created in
//! between is not seen.

use std::sync::Arc;

use storekit_core::{
    check_batch_size, prefail_and_delegate, BatchEdit, BatchEditResult, DynStore, EditOp, Item,
    Link, OnDelete, ResultSet, SearchFilter, SearchOrder, SearchRequest, Store, StoreAccess,
    StoreError, StoreMeta, StoreOp, StoreResult, Value,
};
use tracing::{debug, warn};

/// Access to every registered store, for following links
pub trait LinkResolver: Send + Sync {
    /// Metadata of every registered store
    fn metas(&self) -> Vec<Arc<StoreMeta>>;

    /// A store for link maintenance, not subject to any caller's grants
    fn linked_store(&self, name: &str) -> StoreResult<DynStore>;
}

/// Enforces `BelongsTo` links that target the wrapped store
pub struct ReferentialIntegrityStore {
    inner: DynStore,
    resolver: Arc<dyn LinkResolver>,
}

/// A link from a child store to the wrapped store
struct ChildLink {
    child: Arc<StoreMeta>,
    link: Link,
}

impl ReferentialIntegrityStore {
    /// Wrap `inner`, finding child stores through `resolver`
    pub fn new(inner: DynStore, resolver: Arc<dyn LinkResolver>) -> Self {
        ReferentialIntegrityStore { inner, resolver }
    }

    fn children(&self) -> Vec<ChildLink> {
        let name = &self.meta().name;
        self.resolver
            .metas()
            .into_iter()
            .flat_map(|child| {
                child
                    .links
                    .iter()
                    .filter(|link| &link.linked_store == name)
                    .cloned()
                    .map(|link| ChildLink {
                        child: Arc::clone(&child),
                        link,
                    })
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    /// True if the wrapped store holds `key`, read below the caller's grants
    fn parent_exists(&self, key: &str) -> StoreResult<bool> {
        let store = self.resolver.linked_store(&self.meta().name)?;
        Ok(store.read(key)?.is_some())
    }

    /// Fail with `Conflict` if a `Block` child references `key`
    fn check_blocking(&self, children: &[ChildLink], value: &Value, key: &str) -> StoreResult<()> {
        for child in children.iter().filter(|c| c.link.on_delete == OnDelete::Block) {
            let store = self.resolver.linked_store(&child.child.name)?;
            let filter = SearchFilter::eq(child.link.local_field.clone(), value.clone());
            let page = store.search(&SearchRequest::new().with_filter(filter).with_limit(1))?;
            if !page.results.is_empty() {
                debug!(
                    target: "storekit::referential",
                    store = %self.meta().name,
                    child = %child.child.name,
                    link = %child.link.name,
                    "delete blocked by child"
                );
                return Err(StoreError::conflict(format!(
                    "cannot delete {} {}: referenced by {}.{}",
                    self.meta().name,
                    key,
                    child.child.name,
                    child.link.local_field
                )));
            }
        }
        Ok(())
    }

    /// Nullify or cascade every non-blocking child of a deleted item
    fn follow_up(&self, children: &[ChildLink], value: &Value) {
        for child in children.iter().filter(|c| c.link.on_delete != OnDelete::Block) {
            if let Err(e) = self.follow_link(child, value) {
                warn!(
                    target: "storekit::referential",
                    store = %self.meta().name,
                    child = %child.child.name,
                    link = %child.link.name,
                    error = %e,
                    "link follow-up failed"
                );
            }
        }
    }

    fn follow_link(&self, child: &ChildLink, value: &Value) -> StoreResult<()> {
        let store = self.resolver.linked_store(&child.child.name)?;
        let meta = store.meta();
        let filter = SearchFilter::eq(child.link.local_field.clone(), value.clone());
        let edits = store
            .search_all(&filter, &SearchOrder::new())?
            .iter()
            .map(|item| -> StoreResult<BatchEdit> {
                let key = meta.key_str(item)?;
                Ok(match child.link.on_delete {
                    OnDelete::Cascade => BatchEdit::delete(key),
                    _ => {
                        let mut updates = meta.key_item(&key)?;
                        updates.set(child.link.local_field.clone(), Value::Null);
                        BatchEdit::update(updates)
                    }
                })
            })
            .collect::<StoreResult<Vec<_>>>()?;

        let mut failed = 0usize;
        for chunk in edits.chunks(meta.batch_size) {
            failed += store
                .edit_batch(chunk.to_vec())?
                .iter()
                .filter(|r| !r.success)
                .count();
        }
        debug!(
            target: "storekit::referential",
            store = %self.meta().name,
            child = %child.child.name,
            on_delete = ?child.link.on_delete,
            edits = edits.len(),
            failed,
            "link follow-up applied"
        );
        if failed > 0 {
            warn!(
                target: "storekit::referential",
                child = %child.child.name,
                link = %child.link.name,
                failed,
                "some link follow-up edits failed"
            );
        }
        Ok(())
    }
}

impl Store for ReferentialIntegrityStore {
    fn meta(&self) -> &StoreMeta {
        self.inner.meta()
    }

    fn capabilities(&self) -> StoreAccess {
        self.inner.capabilities()
    }

    fn create(&self, item: Item) -> StoreResult<Item> {
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
        self.inner.update(updates, precondition)
    }

    fn delete(&self, key: &str) -> StoreResult<bool> {
        let children = self.children();
        if children.is_empty() || !self.capabilities().allows(StoreOp::Delete) {
            return self.inner.delete(key);
        }
        let value = self.meta().link_value(key)?;
        if !self.parent_exists(key)? {
            return self.inner.delete(key);
        }
        self.check_blocking(&children, &value, key)?;
        let deleted = self.inner.delete(key)?;
        if deleted {
            self.follow_up(&children, &value);
        }
        Ok(deleted)
    }

    fn search(&self, request: &SearchRequest) -> StoreResult<ResultSet> {
        self.inner.search(request)
    }

    fn count(&self, filter: &SearchFilter) -> StoreResult<u64> {
        self.inner.count(filter)
    }

    fn edit_batch(&self, edits: Vec<BatchEdit>) -> StoreResult<Vec<BatchEditResult>> {
        check_batch_size(self.meta(), edits.len())?;
        let children = self.children();
        if children.is_empty() || !self.capabilities().allows(StoreOp::Delete) {
            return self.inner.edit_batch(edits);
        }
        let results = prefail_and_delegate(
            edits,
            |edit| match &edit.op {
                // Missing keys are reported by the wrapped store
                EditOp::Delete(key) if self.parent_exists(key)? => {
                    let value = self.meta().link_value(key)?;
                    self.check_blocking(&children, &value, key)
                }
                _ => Ok(()),
            },
            |survivors| self.inner.edit_batch(survivors),
        )?;
        for result in results.iter().filter(|r| r.success) {
            if let EditOp::Delete(key) = &result.edit.op {
                match self.meta().link_value(key) {
                    Ok(value) => self.follow_up(&children, &value),
                    Err(e) => warn!(
                        target: "storekit::referential",
                        store = %self.meta().name,
                        error = %e,
                        "cannot follow links of deleted key"
                    ),
                }
            }
        }
        Ok(results)
    }
}
