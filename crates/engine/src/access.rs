//! Access restriction layer
//!
//! The operations a caller may perform on a store are the intersection of
//! three sets: what the caller was granted ([`AccessGrant`]), the policy
//! declared on the store's metadata, and what the wrapped store can do at
//! all. Anything outside it fails with `Authorization` before the wrapped
//! store is called; in a batch, per edit.
//!
//! Results leaving this layer are reduced to their readable fields.

use std::collections::HashMap;

use storekit_core::{
    check_batch_size, prefail_and_delegate, BatchEdit, BatchEditResult, DynStore, EditOp, Item,
    ResultSet, SearchFilter, SearchRequest, Store, StoreAccess, StoreError, StoreMeta, StoreOp,
    StoreResult,
};
use tracing::debug;

/// Operations granted to one caller
#[derive(Debug, Clone, PartialEq)]
pub struct AccessGrant {
    /// Caller identity, for logs
    pub caller: String,
    /// Access to stores without a specific entry
    pub default: StoreAccess,
    /// Per-store overrides
    pub stores: HashMap<String, StoreAccess>,
}

impl AccessGrant {
    /// A caller granted `default` on every store
    pub fn new(caller: impl Into<String>, default: StoreAccess) -> Self {
        AccessGrant {
            caller: caller.into(),
            default,
            stores: HashMap::new(),
        }
    }

    /// Every operation on every store
    pub fn full(caller: impl Into<String>) -> Self {
        Self::new(caller, StoreAccess::all())
    }

    /// Read and search on every store
    pub fn read_only(caller: impl Into<String>) -> Self {
        Self::new(caller, StoreAccess::read_only())
    }

    /// Override the grant for `store`
    pub fn with_store(mut self, store: impl Into<String>, access: StoreAccess) -> Self {
        self.stores.insert(store.into(), access);
        self
    }

    /// Granted access to `store`
    pub fn access_for(&self, store: &str) -> StoreAccess {
        self.stores.get(store).copied().unwrap_or(self.default)
    }
}

/// Enforces the effective access of one caller on one store
pub struct AccessRestrictionStore {
    inner: DynStore,
    caller: String,
    effective: StoreAccess,
}

impl AccessRestrictionStore {
    /// Wrap `inner` for the caller holding `grant`
    pub fn new(inner: DynStore, grant: &AccessGrant) -> Self {
        let meta = inner.meta();
        let effective = grant.access_for(&meta.name) & meta.store_access & inner.capabilities();
        AccessRestrictionStore {
            caller: grant.caller.clone(),
            effective,
            inner,
        }
    }

    fn require(&self, op: StoreOp) -> StoreResult<()> {
        if self.effective.allows(op) {
            return Ok(());
        }
        debug!(
            target: "storekit::access",
            caller = %self.caller,
            store = %self.meta().name,
            op = %op,
            "operation denied"
        );
        Err(StoreError::authorization(op.as_str(), self.meta().name.clone()))
    }

    fn view(&self, item: Item) -> Item {
        self.inner.meta().readable_view(item)
    }
}

fn edit_op(edit: &BatchEdit) -> StoreOp {
    match edit.op {
        EditOp::Create(_) => StoreOp::Create,
        EditOp::Update(_) => StoreOp::Update,
        EditOp::Delete(_) => StoreOp::Delete,
    }
}

impl Store for AccessRestrictionStore {
    fn meta(&self) -> &StoreMeta {
        self.inner.meta()
    }

    fn capabilities(&self) -> StoreAccess {
        self.effective
    }

    fn create(&self, item: Item) -> StoreResult<Item> {
        self.require(StoreOp::Create)?;
        self.inner.create(item).map(|item| self.view(item))
    }

    fn read(&self, key: &str) -> StoreResult<Option<Item>> {
        self.require(StoreOp::Read)?;
        Ok(self.inner.read(key)?.map(|item| self.view(item)))
    }

    fn read_batch(&self, keys: &[String]) -> StoreResult<Vec<Option<Item>>> {
        self.require(StoreOp::Read)?;
        Ok(self
            .inner
            .read_batch(keys)?
            .into_iter()
            .map(|item| item.map(|item| self.view(item)))
            .collect())
    }

    fn update(
        &self,
        updates: Item,
        precondition: Option<&SearchFilter>,
    ) -> StoreResult<Option<Item>> {
        self.require(StoreOp::Update)?;
        Ok(self
            .inner
            .update(updates, precondition)?
            .map(|item| self.view(item)))
    }

    fn delete(&self, key: &str) -> StoreResult<bool> {
        self.require(StoreOp::Delete)?;
        self.inner.delete(key)
    }

    fn search(&self, request: &SearchRequest) -> StoreResult<ResultSet> {
        self.require(StoreOp::Search)?;
        let mut page = self.inner.search(request)?;
        page.results = page.results.into_iter().map(|item| self.view(item)).collect();
        Ok(page)
    }

    fn count(&self, filter: &SearchFilter) -> StoreResult<u64> {
        self.require(StoreOp::Search)?;
        self.inner.count(filter)
    }

    fn edit_batch(&self, edits: Vec<BatchEdit>) -> StoreResult<Vec<BatchEditResult>> {
        check_batch_size(self.meta(), edits.len())?;
        let mut results = prefail_and_delegate(
            edits,
            |edit| self.require(edit_op(edit)),
            |survivors| self.inner.edit_batch(survivors),
        )?;
        for result in &mut results {
            if let Some(item) = result.item.take() {
                result.item = Some(self.view(item));
            }
        }
        Ok(results)
    }
}
