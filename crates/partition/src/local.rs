//! LocalClient: in-process partition/sort-key tables
//!
//! Implements [`PartitionClient`] over `BTreeMap`s behind a
//! `parking_lot::RwLock`, with the paging behaviour of a remote service:
//!
//! - `limit` counts evaluated items; the filter runs afterwards, so a page
//!   may hold fewer items than `limit` (or none) and still have more behind
//!   it.
//! - `last_evaluated_key` is set only when items remain after the page. It
//!   carries the table key and, for index queries, the index key.
//! - Items at or before the exclusive start key (in scan direction) are
//!   skipped.
//! - Secondary indexes are sparse: items without every index key attribute
//!   are not in the index.
//!
//! Used by tests and embedded deployments.

use std::collections::{BTreeMap, HashMap};

use parking_lot::{Mutex, RwLock};
use tracing::info;

use crate::client::{
    BatchGetOutput, Page, PartitionClient, QueryRequest, ScanRequest, TableSpec,
    UpdateRequest, WriteRequest, MAX_BATCH_GET, MAX_BATCH_WRITE,
};
use crate::condition::Condition;
use crate::error::{PartitionError, PartitionResult};
use crate::native::{NativeItem, NativeValue};

/// Primary key values in key schema order
type TableKey = Vec<NativeValue>;

#[derive(Debug)]
struct LocalTable {
    spec: TableSpec,
    items: BTreeMap<TableKey, NativeItem>,
}

impl LocalTable {
    fn key_of(&self, item: &NativeItem) -> PartitionResult<TableKey> {
        position(&self.spec.key.names(), item).ok_or_else(|| {
            PartitionError::Validation(format!(
                "item is missing key attributes {:?} of table '{}'",
                self.spec.key.names(),
                self.spec.name
            ))
        })
    }

    fn current(&self, key: &NativeItem) -> PartitionResult<(TableKey, Option<&NativeItem>)> {
        let key = self.key_of(key)?;
        let current = self.items.get(&key);
        Ok((key, current))
    }
}

fn position(names: &[&str], item: &NativeItem) -> Option<Vec<NativeValue>> {
    names.iter().map(|name| item.get(*name).cloned()).collect()
}

fn check_condition(condition: Option<&Condition>, current: Option<&NativeItem>) -> PartitionResult<()> {
    let empty = NativeItem::new();
    match condition {
        Some(condition) if !condition.eval(current.unwrap_or(&empty)) => {
            Err(PartitionError::ConditionalCheckFailed)
        }
        _ => Ok(()),
    }
}

/// In-process implementation of [`PartitionClient`]
#[derive(Debug, Default)]
pub struct LocalClient {
    tables: RwLock<HashMap<String, LocalTable>>,
    /// Batch get calls left that only process part of their input
    throttled_gets: Mutex<usize>,
    /// Batch write calls left that only process part of their input
    throttled_writes: Mutex<usize>,
}

impl LocalClient {
    /// A client with no tables
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a table
    ///
    /// # Errors
    ///
    /// Returns `Validation` if the table already exists.
    pub fn create_table(&self, spec: TableSpec) -> PartitionResult<()> {
        let mut tables = self.tables.write();
        if tables.contains_key(&spec.name) {
            return Err(PartitionError::Validation(format!(
                "table '{}' already exists",
                spec.name
            )));
        }
        info!(
            target: "storekit::partition",
            table = %spec.name,
            indexes = spec.indexes.len(),
            "created local table"
        );
        tables.insert(
            spec.name.clone(),
            LocalTable {
                spec,
                items: BTreeMap::new(),
            },
        );
        Ok(())
    }

    /// Number of items in `table`
    pub fn item_count(&self, table: &str) -> usize {
        self.tables.read().get(table).map_or(0, |t| t.items.len())
    }

    /// Make the next `calls` batch get calls process only half of their
    /// keys, rounded down
    pub fn throttle_batch_gets(&self, calls: usize) {
        *self.throttled_gets.lock() = calls;
    }

    /// Make the next `calls` batch write calls process only half of their
    /// writes, rounded down
    pub fn throttle_batch_writes(&self, calls: usize) {
        *self.throttled_writes.lock() = calls;
    }

    /// How many of `len` batch entries the next call processes
    fn batch_allowance(counter: &Mutex<usize>, len: usize) -> usize {
        let mut throttled = counter.lock();
        if *throttled > 0 {
            *throttled -= 1;
            len / 2
        } else {
            len
        }
    }

    fn with_table<T>(
        &self,
        table: &str,
        f: impl FnOnce(&LocalTable) -> PartitionResult<T>,
    ) -> PartitionResult<T> {
        let tables = self.tables.read();
        let table = tables
            .get(table)
            .ok_or_else(|| PartitionError::ResourceNotFound(table.to_string()))?;
        f(table)
    }

    fn with_table_mut<T>(
        &self,
        table: &str,
        f: impl FnOnce(&mut LocalTable) -> PartitionResult<T>,
    ) -> PartitionResult<T> {
        let mut tables = self.tables.write();
        let table = tables
            .get_mut(table)
            .ok_or_else(|| PartitionError::ResourceNotFound(table.to_string()))?;
        f(table)
    }
}

/// Cut one page out of positioned candidates already in scan order
fn paginate(
    candidates: Vec<(Vec<NativeValue>, &NativeItem)>,
    start: Option<Vec<NativeValue>>,
    forward: bool,
    limit: Option<usize>,
    filter: Option<&Condition>,
    resume_names: &[&str],
) -> Page {
    let remaining = candidates.into_iter().filter(|(pos, _)| match &start {
        Some(start) if forward => pos > start,
        Some(start) => pos < start,
        None => true,
    });

    let mut items = Vec::new();
    let mut last_evaluated: Option<&NativeItem> = None;
    let mut has_more = false;
    for (evaluated, (_, item)) in remaining.enumerate() {
        if limit.map_or(false, |limit| evaluated >= limit) {
            has_more = true;
            break;
        }
        last_evaluated = Some(item);
        if filter.map_or(true, |f| f.eval(item)) {
            items.push(item.clone());
        }
    }

    let last_evaluated_key = if has_more {
        last_evaluated.map(|item| {
            resume_names
                .iter()
                .filter_map(|name| item.get(*name).map(|v| (name.to_string(), v.clone())))
                .collect()
        })
    } else {
        None
    };
    Page {
        items,
        last_evaluated_key,
    }
}

impl PartitionClient for LocalClient {
    fn describe_table(&self, table: &str) -> PartitionResult<TableSpec> {
        self.with_table(table, |t| Ok(t.spec.clone()))
    }

    fn get_item(&self, table: &str, key: &NativeItem) -> PartitionResult<Option<NativeItem>> {
        self.with_table(table, |t| Ok(t.current(key)?.1.cloned()))
    }

    fn put_item(
        &self,
        table: &str,
        item: NativeItem,
        condition: Option<&Condition>,
    ) -> PartitionResult<()> {
        self.with_table_mut(table, |t| {
            let (key, current) = t.current(&item)?;
            check_condition(condition, current)?;
            t.items.insert(key, item);
            Ok(())
        })
    }

    fn update_item(&self, request: UpdateRequest) -> PartitionResult<NativeItem> {
        self.with_table_mut(&request.table, |t| {
            let key_names = t.spec.key.names();
            if let Some(name) = request
                .set
                .keys()
                .chain(request.remove.iter())
                .find(|name| key_names.contains(&name.as_str()))
            {
                return Err(PartitionError::Validation(format!(
                    "cannot update key attribute '{}'",
                    name
                )));
            }
            let (key, current) = t.current(&request.key)?;
            check_condition(request.condition.as_ref(), current)?;
            let mut updated = match current {
                Some(item) => item.clone(),
                None => position(&key_names, &request.key)
                    .map(|values| {
                        key_names
                            .iter()
                            .map(|n| n.to_string())
                            .zip(values)
                            .collect::<NativeItem>()
                    })
                    .unwrap_or_default(),
            };
            updated.extend(request.set);
            for name in &request.remove {
                updated.remove(name);
            }
            t.items.insert(key, updated.clone());
            Ok(updated)
        })
    }

    fn delete_item(
        &self,
        table: &str,
        key: &NativeItem,
        condition: Option<&Condition>,
    ) -> PartitionResult<Option<NativeItem>> {
        self.with_table_mut(table, |t| {
            let (key, current) = t.current(key)?;
            check_condition(condition, current)?;
            Ok(t.items.remove(&key))
        })
    }

    fn batch_get_item(&self, table: &str, keys: &[NativeItem]) -> PartitionResult<BatchGetOutput> {
        if keys.len() > MAX_BATCH_GET {
            return Err(PartitionError::BatchLimitExceeded {
                size: keys.len(),
                max: MAX_BATCH_GET,
            });
        }
        let allowance = Self::batch_allowance(&self.throttled_gets, keys.len());
        self.with_table(table, |t| {
            let mut output = BatchGetOutput::default();
            for key in &keys[..allowance] {
                if let (_, Some(item)) = t.current(key)? {
                    output.items.push(item.clone());
                }
            }
            output.unprocessed_keys = keys[allowance..].to_vec();
            Ok(output)
        })
    }

    fn batch_write_item(
        &self,
        table: &str,
        writes: Vec<WriteRequest>,
    ) -> PartitionResult<Vec<WriteRequest>> {
        if writes.len() > MAX_BATCH_WRITE {
            return Err(PartitionError::BatchLimitExceeded {
                size: writes.len(),
                max: MAX_BATCH_WRITE,
            });
        }
        let allowance = Self::batch_allowance(&self.throttled_writes, writes.len());
        self.with_table_mut(table, |t| {
            let mut keys = Vec::with_capacity(writes.len());
            for write in &writes {
                let key = match write {
                    WriteRequest::Put(item) | WriteRequest::Delete(item) => t.key_of(item)?,
                };
                if keys.contains(&key) {
                    return Err(PartitionError::Validation(
                        "provided list of item keys contains duplicates".to_string(),
                    ));
                }
                keys.push(key);
            }
            let mut writes = writes;
            let unprocessed = writes.split_off(allowance);
            for (write, key) in writes.into_iter().zip(keys) {
                match write {
                    WriteRequest::Put(item) => {
                        t.items.insert(key, item);
                    }
                    WriteRequest::Delete(_) => {
                        t.items.remove(&key);
                    }
                }
            }
            Ok(unprocessed)
        })
    }

    fn query(&self, request: &QueryRequest) -> PartitionResult<Page> {
        self.with_table(&request.table, |t| {
            let index = t.spec.key_schema(request.index.as_deref()).ok_or_else(|| {
                PartitionError::ResourceNotFound(format!(
                    "{}/{}",
                    request.table,
                    request.index.as_deref().unwrap_or_default()
                ))
            })?;
            if index.sk.is_none() && request.key.sk.is_some() {
                return Err(PartitionError::Validation(
                    "sort key condition on an index without a sort key".to_string(),
                ));
            }
            // Position within the partition: index sort key, then table key
            let mut order_names: Vec<&str> = index.sk.as_deref().into_iter().collect();
            order_names.extend(t.spec.key.names());
            let index_names = index.names();

            let mut candidates: Vec<(Vec<NativeValue>, &NativeItem)> = t
                .items
                .values()
                .filter(|item| index_names.iter().all(|n| item.contains_key(*n)))
                .filter(|item| item.get(&index.pk) == Some(&request.key.pk))
                .filter(|item| match (&index.sk, &request.key.sk) {
                    (Some(sk), Some(value)) => item.get(sk) == Some(value),
                    _ => true,
                })
                .filter_map(|item| position(&order_names, item).map(|pos| (pos, item)))
                .collect();
            candidates.sort_by(|a, b| a.0.cmp(&b.0));
            if !request.scan_forward {
                candidates.reverse();
            }
            let start = match &request.exclusive_start_key {
                Some(key) => Some(position(&order_names, key).ok_or_else(|| {
                    PartitionError::Validation("exclusive start key is incomplete".to_string())
                })?),
                None => None,
            };
            Ok(paginate(
                candidates,
                start,
                request.scan_forward,
                request.limit,
                request.filter.as_ref(),
                &t.spec.resume_names(index),
            ))
        })
    }

    fn scan(&self, request: &ScanRequest) -> PartitionResult<Page> {
        self.with_table(&request.table, |t| {
            let candidates = t
                .items
                .iter()
                .map(|(key, item)| (key.clone(), item))
                .collect();
            let start = match &request.exclusive_start_key {
                Some(key) => Some(t.key_of(key)?),
                None => None,
            };
            Ok(paginate(
                candidates,
                start,
                true,
                request.limit,
                request.filter.as_ref(),
                &t.spec.key.names(),
            ))
        })
    }
}
