//! PartitionStore: the partition/sort-key backend
//!
//! Maps the [`Store`] contract onto a [`PartitionClient`]:
//!
//! - create is a conditional put (`attribute_not_exists` on the partition
//!   key), so an existing key is a conflict.
//! - update is a partial update conditioned on the item existing and on the
//!   pushed-down precondition. Preconditions the native language cannot
//!   express are checked against a fresh read first.
//! - delete is conditioned on the item existing; a failed condition means
//!   the key was absent.
//! - search and count run a [`QueryPlan`] page by page.
//! - batch reads and writes go through the native batch calls in chunks of
//!   their native limits, retrying unprocessed entries a bounded number of
//!   times.
//!
//! Null fields are never written; setting a field to null removes it.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use storekit_core::{
    build_native_expression, check_batch_size, slice_page, BatchEdit, BatchEditResult, EditOp,
    Item, PageKey, ResultSet, SearchFilter, SearchOrder, SearchRequest, Store, StoreConfig,
    StoreError, StoreMeta, StoreResult,
};

use crate::client::{
    PartitionClient, TableSpec, UpdateRequest, WriteRequest, MAX_BATCH_GET, MAX_BATCH_WRITE,
};
use crate::condition::{Condition, PartitionFilterBuilder};
use crate::error::PartitionError;
use crate::native::{item_from_native, item_to_native, project, to_native, NativeItem};
use crate::planner::{OrderMode, Planner, QueryPlan};

/// Attempts at a batch call before giving up on unprocessed entries
pub const MAX_BATCH_ATTEMPTS: usize = 5;

/// Store backed by one partition/sort-key table
pub struct PartitionStore {
    meta: Arc<StoreMeta>,
    config: StoreConfig,
    client: Arc<dyn PartitionClient>,
    spec: TableSpec,
}

impl std::fmt::Debug for PartitionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartitionStore")
            .field("table", &self.spec.name)
            .field("config", &self.config)
            .finish()
    }
}

impl PartitionStore {
    /// Store for `meta` on `client`; the table must already exist
    ///
    /// # Errors
    ///
    /// Returns `Validation` if `meta`'s key cannot be a table key.
    pub fn new(client: Arc<dyn PartitionClient>, meta: Arc<StoreMeta>) -> StoreResult<Self> {
        let spec = TableSpec::for_meta(&meta)?;
        Ok(PartitionStore {
            meta,
            config: StoreConfig::default(),
            client,
            spec,
        })
    }

    /// Use `config` for search limits and the local-sort bound
    pub fn with_config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Table layout
    pub fn table_spec(&self) -> &TableSpec {
        &self.spec
    }

    fn table(&self) -> &str {
        &self.spec.name
    }

    fn key_names(&self) -> Vec<&str> {
        self.spec.key.names()
    }

    fn exists_condition(&self) -> Condition {
        Condition::Exists(self.spec.key.pk.clone())
    }

    /// Native primary key of a decoded key item
    fn native_key(&self, key_item: &Item) -> StoreResult<NativeItem> {
        let native = item_to_native(&self.meta, key_item)?;
        project(&native, &self.key_names())
    }

    fn native_key_for(&self, key: &str) -> StoreResult<NativeItem> {
        self.native_key(&self.meta.key_item(key)?)
    }

    fn to_item(&self, native: &NativeItem) -> StoreResult<Item> {
        item_from_native(&self.meta, native)
    }

    fn canonical(&self, native: &NativeItem) -> StoreResult<String> {
        self.meta.key_config.canonical_key(&self.to_item(native)?)
    }

    fn plan(&self, filter: &SearchFilter, order: &SearchOrder) -> StoreResult<QueryPlan> {
        Planner::new(&self.meta, &self.spec).plan(filter, order)
    }

    /// Fetch up to `MAX_BATCH_GET` keys, retrying unprocessed ones
    fn batch_get_chunk(&self, keys: Vec<NativeItem>) -> StoreResult<Vec<NativeItem>> {
        let mut found = Vec::new();
        let mut pending = keys;
        for attempt in 1..=MAX_BATCH_ATTEMPTS {
            let output = self.client.batch_get_item(self.table(), &pending)?;
            found.extend(output.items);
            if output.unprocessed_keys.is_empty() {
                return Ok(found);
            }
            debug!(
                target: "storekit::partition",
                table = %self.table(),
                attempt,
                unprocessed = output.unprocessed_keys.len(),
                "retrying unprocessed batch get keys"
            );
            pending = output.unprocessed_keys;
        }
        Err(StoreError::backend(format!(
            "batch get left {} keys unprocessed after {} attempts",
            pending.len(),
            MAX_BATCH_ATTEMPTS
        )))
    }

    /// Existing items by canonical key
    fn batch_get(&self, keys: Vec<NativeItem>) -> StoreResult<HashMap<String, NativeItem>> {
        let mut by_key = HashMap::new();
        let mut keys = keys;
        while !keys.is_empty() {
            let rest = keys.split_off(keys.len().min(MAX_BATCH_GET));
            for item in self.batch_get_chunk(keys)? {
                by_key.insert(self.canonical(&item)?, item);
            }
            keys = rest;
        }
        Ok(by_key)
    }

    /// Write up to `MAX_BATCH_WRITE` requests, returning what stayed unprocessed
    fn batch_write_chunk(&self, writes: Vec<WriteRequest>) -> StoreResult<Vec<WriteRequest>> {
        let mut pending = writes;
        for attempt in 1..=MAX_BATCH_ATTEMPTS {
            pending = self.client.batch_write_item(self.table(), pending)?;
            if pending.is_empty() {
                break;
            }
            debug!(
                target: "storekit::partition",
                table = %self.table(),
                attempt,
                unprocessed = pending.len(),
                "retrying unprocessed batch writes"
            );
        }
        Ok(pending)
    }

    fn search_native(
        &self,
        plan: &QueryPlan,
        request: &SearchRequest,
        limit: usize,
    ) -> StoreResult<ResultSet> {
        let mut start = match PageKey::native_from(request.page_key.as_deref())? {
            Some(token) => Some(
                serde_json::from_value::<NativeItem>(token)
                    .map_err(|_| StoreError::validation("invalid page key token"))?,
            ),
            None => None,
        };

        let mut results = Vec::new();
        let mut pages = 0usize;
        loop {
            let page = plan.fetch(self.client.as_ref(), start.take(), Some(limit))?;
            pages += 1;
            let page_len = page.items.len();
            for (position, native) in page.items.into_iter().enumerate() {
                let item = self.to_item(&native)?;
                if !plan.residual.matches(&item) {
                    continue;
                }
                results.push(item);
                if results.len() == limit {
                    let more_in_page = position + 1 < page_len;
                    let next_page_key = (more_in_page || page.last_evaluated_key.is_some())
                        .then(|| PageKey::Native(token(&plan.resume_key(&native))).encode());
                    debug!(
                        target: "storekit::partition",
                        table = %self.table(),
                        pages,
                        returned = results.len(),
                        "native search page"
                    );
                    return Ok(ResultSet {
                        results,
                        next_page_key,
                    });
                }
            }
            match page.last_evaluated_key {
                Some(key) => start = Some(key),
                None => {
                    debug!(
                        target: "storekit::partition",
                        table = %self.table(),
                        pages,
                        returned = results.len(),
                        "native search exhausted"
                    );
                    return Ok(ResultSet::last(results));
                }
            }
        }
    }

    fn search_local_sort(
        &self,
        plan: &QueryPlan,
        request: &SearchRequest,
        limit: usize,
    ) -> StoreResult<ResultSet> {
        let offset = PageKey::offset_from(request.page_key.as_deref())?;
        let bound = self.config.max_local_search_size;
        let mut buffered = Vec::new();
        self.for_each_match(plan, |item| {
            buffered.push(item);
            if buffered.len() > bound {
                return Err(StoreError::SortOverflow { limit: bound });
            }
            Ok(())
        })?;
        request.order.sort(&mut buffered);
        debug!(
            target: "storekit::partition",
            table = %self.table(),
            buffered = buffered.len(),
            offset,
            limit,
            "local sort"
        );
        Ok(slice_page(buffered, offset, limit))
    }

    /// Run `plan` to exhaustion, calling `f` on each item the residual accepts
    fn for_each_match<F>(&self, plan: &QueryPlan, mut f: F) -> StoreResult<()>
    where
        F: FnMut(Item) -> StoreResult<()>,
    {
        let mut start = None;
        loop {
            let page = plan.fetch(self.client.as_ref(), start, None)?;
            for native in &page.items {
                let item = self.to_item(native)?;
                if plan.residual.matches(&item) {
                    f(item)?;
                }
            }
            match page.last_evaluated_key {
                Some(key) => start = Some(key),
                None => return Ok(()),
            }
        }
    }

    fn conditional_update(
        &self,
        key: NativeItem,
        prepared: &Item,
        condition: Condition,
    ) -> StoreResult<Option<Item>> {
        let key_names = self.key_names();
        let mut set = NativeItem::new();
        let mut remove = Vec::new();
        for (name, value) in prepared.iter() {
            if key_names.contains(&name.as_str()) {
                continue;
            }
            if value.is_null() {
                remove.push(name.clone());
            } else if let Some(attr) = self.meta.attr(name) {
                set.insert(name.clone(), to_native(attr.attr_type, value)?);
            }
        }
        let request = UpdateRequest {
            table: self.table().to_string(),
            key: key.clone(),
            set,
            remove,
            condition: Some(condition),
        };
        match self.client.update_item(request) {
            Ok(updated) => Ok(Some(self.to_item(&updated)?)),
            Err(PartitionError::ConditionalCheckFailed) => {
                match self.client.get_item(self.table(), &key)? {
                    None => Ok(None),
                    Some(_) => Err(StoreError::conflict(format!(
                        "precondition failed for {}",
                        self.meta.name
                    ))),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Prepare one batch edit: the target key and, for writes, the prepared item
    fn prepare_edit(&self, edit: &BatchEdit) -> StoreResult<(String, NativeItem, Option<Item>)> {
        let (key_item, prepared) = match &edit.op {
            EditOp::Create(item) => {
                let mut prepared = self.meta.prepare_create(item)?;
                prepared.remove_nulls();
                (prepared.clone(), Some(prepared))
            }
            EditOp::Update(updates) => {
                let prepared = self.meta.prepare_update(updates)?;
                (prepared.clone(), Some(prepared))
            }
            EditOp::Delete(key) => (self.meta.key_item(key)?, None),
        };
        let canonical = self.meta.key_config.canonical_key(&key_item)?;
        Ok((canonical, self.native_key(&key_item)?, prepared))
    }
}

fn token(key: &NativeItem) -> serde_json::Value {
    serde_json::to_value(key).unwrap_or(serde_json::Value::Null)
}

impl Store for PartitionStore {
    fn meta(&self) -> &StoreMeta {
        &self.meta
    }

    fn create(&self, item: Item) -> StoreResult<Item> {
        let mut prepared = self.meta.prepare_create(&item)?;
        prepared.remove_nulls();
        let native = item_to_native(&self.meta, &prepared)?;
        project(&native, &self.key_names())?;
        let created = self.to_item(&native)?;
        let condition = Condition::NotExists(self.spec.key.pk.clone());
        match self.client.put_item(self.table(), native, Some(&condition)) {
            Ok(()) => Ok(created),
            Err(PartitionError::ConditionalCheckFailed) => Err(StoreError::conflict(format!(
                "{} with key {} already exists",
                self.meta.name,
                self.meta.key_config.canonical_key(&prepared)?
            ))),
            Err(e) => Err(e.into()),
        }
    }

    fn read(&self, key: &str) -> StoreResult<Option<Item>> {
        let native_key = self.native_key_for(key)?;
        self.client
            .get_item(self.table(), &native_key)?
            .map(|native| self.to_item(&native))
            .transpose()
    }

    fn read_batch(&self, keys: &[String]) -> StoreResult<Vec<Option<Item>>> {
        let mut canonical = Vec::with_capacity(keys.len());
        let mut native_keys = Vec::with_capacity(keys.len());
        for key in keys {
            let key_item = self.meta.key_item(key)?;
            canonical.push(self.meta.key_config.canonical_key(&key_item)?);
            native_keys.push(self.native_key(&key_item)?);
        }
        // The native batch call rejects duplicate keys
        native_keys.sort();
        native_keys.dedup();
        let found = self.batch_get(native_keys)?;
        canonical
            .iter()
            .map(|c| found.get(c).map(|native| self.to_item(native)).transpose())
            .collect()
    }

    fn update(
        &self,
        updates: Item,
        precondition: Option<&SearchFilter>,
    ) -> StoreResult<Option<Item>> {
        let prepared = self.meta.prepare_update(&updates)?;
        let key = self.native_key(&prepared)?;
        let precondition = precondition
            .map(|f| f.lock_attrs(&self.meta.attrs))
            .transpose()?;

        let mut conditions = vec![self.exists_condition()];
        if let Some(precondition) = &precondition {
            let builder = PartitionFilterBuilder::new(&self.meta, &self.spec.key.pk);
            let native = build_native_expression(precondition, &builder);
            if !native.fully_handled {
                // Race window: the item may change between this read and the write
                let Some(current) = self.client.get_item(self.table(), &key)? else {
                    return Ok(None);
                };
                if !native.residual.matches(&self.to_item(&current)?) {
                    return Err(StoreError::conflict(format!(
                        "precondition failed for {}",
                        self.meta.name
                    )));
                }
            }
            conditions.extend(native.expr);
        }
        let condition = Condition::and_all(conditions).unwrap_or_else(|| self.exists_condition());
        self.conditional_update(key, &prepared, condition)
    }

    fn delete(&self, key: &str) -> StoreResult<bool> {
        let native_key = self.native_key_for(key)?;
        match self
            .client
            .delete_item(self.table(), &native_key, Some(&self.exists_condition()))
        {
            Ok(_) => Ok(true),
            Err(PartitionError::ConditionalCheckFailed) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn search(&self, request: &SearchRequest) -> StoreResult<ResultSet> {
        let filter = request.filter.lock_attrs(&self.meta.attrs)?;
        request.order.lock_attrs(&self.meta.attrs)?;
        let limit = request.effective_limit(
            self.config.default_search_limit,
            self.config.max_search_limit,
        );
        let plan = self.plan(&filter, &request.order)?;
        match plan.mode {
            OrderMode::Native { .. } => self.search_native(&plan, request, limit),
            OrderMode::LocalSort => self.search_local_sort(&plan, request, limit),
        }
    }

    fn count(&self, filter: &SearchFilter) -> StoreResult<u64> {
        let filter = filter.lock_attrs(&self.meta.attrs)?;
        let plan = self.plan(&filter, &SearchOrder::new())?;
        let mut count = 0u64;
        self.for_each_match(&plan, |_| {
            count += 1;
            Ok(())
        })?;
        Ok(count)
    }

    fn edit_batch(&self, edits: Vec<BatchEdit>) -> StoreResult<Vec<BatchEditResult>> {
        check_batch_size(&self.meta, edits.len())?;

        // Prepare every edit; failures are reported per item
        let mut prepared = Vec::with_capacity(edits.len());
        let mut seen = Vec::new();
        for edit in &edits {
            let outcome = self.prepare_edit(edit).and_then(|p| {
                if seen.contains(&p.0) {
                    return Err(StoreError::validation(format!(
                        "key {} appears more than once in the batch",
                        p.0
                    )));
                }
                seen.push(p.0.clone());
                Ok(p)
            });
            prepared.push(outcome);
        }

        let existing = self.batch_get(
            prepared
                .iter()
                .filter_map(|p| p.as_ref().ok().map(|(_, key, _)| key.clone()))
                .collect(),
        )?;

        // Decide each edit against the current state
        let mut outcomes: Vec<StoreResult<Option<Item>>> = Vec::with_capacity(edits.len());
        let mut writes: Vec<(usize, WriteRequest)> = Vec::new();
        for (index, (edit, prep)) in edits.iter().zip(prepared).enumerate() {
            let decided = prep.and_then(|(canonical, native_key, item)| {
                let current = existing.get(&canonical);
                match (&edit.op, item) {
                    (EditOp::Create(_), Some(item)) => {
                        if current.is_some() {
                            return Err(StoreError::conflict(format!(
                                "{} with key {} already exists",
                                self.meta.name, canonical
                            )));
                        }
                        let native = item_to_native(&self.meta, &item)?;
                        let created = self.to_item(&native)?;
                        writes.push((index, WriteRequest::Put(native)));
                        Ok(Some(created))
                    }
                    (EditOp::Update(_), Some(updates)) => {
                        let current = current.ok_or_else(|| StoreError::not_found(canonical.clone()))?;
                        let mut merged = self.to_item(current)?;
                        merged.merge(&updates);
                        merged.remove_nulls();
                        let native = item_to_native(&self.meta, &merged)?;
                        let updated = self.to_item(&native)?;
                        writes.push((index, WriteRequest::Put(native)));
                        Ok(Some(updated))
                    }
                    (EditOp::Delete(key), _) => {
                        if current.is_none() {
                            return Err(StoreError::not_found(key.clone()));
                        }
                        writes.push((index, WriteRequest::Delete(native_key)));
                        Ok(None)
                    }
                    _ => Err(StoreError::validation("malformed batch edit")),
                }
            });
            outcomes.push(decided);
        }

        // Apply the survivors in native-sized chunks
        let mut unprocessed_at = Vec::new();
        for chunk in writes.chunks(MAX_BATCH_WRITE) {
            let requests: Vec<WriteRequest> = chunk.iter().map(|(_, w)| w.clone()).collect();
            let unprocessed = self.batch_write_chunk(requests)?;
            for (index, write) in chunk {
                if unprocessed.contains(write) {
                    unprocessed_at.push(*index);
                }
            }
        }
        if !unprocessed_at.is_empty() {
            warn!(
                target: "storekit::partition",
                table = %self.table(),
                unprocessed = unprocessed_at.len(),
                "batch writes left unprocessed after retries"
            );
        }
        for index in unprocessed_at {
            outcomes[index] = Err(StoreError::backend(format!(
                "write left unprocessed after {} attempts",
                MAX_BATCH_ATTEMPTS
            )));
        }

        Ok(edits
            .into_iter()
            .zip(outcomes)
            .map(|(edit, outcome)| match outcome {
                Ok(item) => BatchEditResult::ok(edit, item),
                Err(e) => BatchEditResult::failed(edit, &e),
            })
            .collect())
    }
}

/// Create the table for `meta` on a [`crate::LocalClient`] and return a store over it
pub fn local_store(
    client: &Arc<crate::LocalClient>,
    meta: Arc<StoreMeta>,
) -> StoreResult<PartitionStore> {
    let spec = TableSpec::for_meta(&meta)?;
    client.create_table(spec)?;
    let client: Arc<dyn PartitionClient> = client.clone();
    PartitionStore::new(client, meta)
}
