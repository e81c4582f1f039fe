//! Payload validation layer
//!
//! Checks create and update payloads against the [`ItemSchema`] derived from
//! the store's metadata before they reach the backend. Reads, searches and
//! deletes pass through untouched.

use storekit_core::{
    check_batch_size, prefail_and_delegate, BatchEdit, BatchEditResult, DynStore, EditOp, Item,
    ItemSchema, ResultSet, SearchFilter, SearchRequest, Store, StoreAccess, StoreMeta,
    StoreResult,
};

/// Rejects malformed create/update payloads
pub struct SchemaValidatingStore {
    inner: DynStore,
    create_schema: ItemSchema,
    update_schema: ItemSchema,
}

impl SchemaValidatingStore {
    /// Wrap `inner`, deriving schemas from its metadata
    pub fn new(inner: DynStore) -> Self {
        let create_schema = ItemSchema::for_create(inner.meta());
        let update_schema = ItemSchema::for_update(inner.meta());
        SchemaValidatingStore {
            inner,
            create_schema,
            update_schema,
        }
    }

    fn check(&self, edit: &BatchEdit) -> StoreResult<()> {
        match &edit.op {
            EditOp::Create(item) => self.create_schema.validate(item),
            EditOp::Update(updates) => self.update_schema.validate(updates),
            EditOp::Delete(key) => self.inner.meta().key_item(key).map(|_| ()),
        }
    }
}

impl Store for SchemaValidatingStore {
    fn meta(&self) -> &StoreMeta {
        self.inner.meta()
    }

    fn capabilities(&self) -> StoreAccess {
        self.inner.capabilities()
    }

    fn create(&self, item: Item) -> StoreResult<Item> {
        self.create_schema.validate(&item)?;
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
        self.update_schema.validate(&updates)?;
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
        prefail_and_delegate(edits, |edit| self.check(edit), |survivors| {
            self.inner.edit_batch(survivors)
        })
    }
}
