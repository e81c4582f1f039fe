//! After-write triggers
//!
//! [`TriggerStore`] is the outermost layer. After a create, update or delete
//! succeeds it looks up the callbacks registered for the store and queues
//! one task per callback on the [`TriggerDispatcher`]. The write never waits
//! for them: a full queue drops the event, and a failing or panicking
//! callback is only logged.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use storekit_core::{
    BatchEdit, BatchEditResult, DynStore, EditOp, Item, ResultSet, SearchFilter, SearchRequest,
    Store, StoreAccess, StoreMeta, StoreResult,
};
use tracing::warn;

use crate::dispatcher::TriggerDispatcher;

/// Which write a trigger follows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerKind {
    /// After `create`
    AfterCreate,
    /// After `update`
    AfterUpdate,
    /// After `delete`
    AfterDelete,
}

/// A completed write
#[derive(Debug, Clone, PartialEq)]
pub enum TriggerEvent {
    /// An item was created
    Created {
        /// Store name
        store: String,
        /// The item as stored
        item: Item,
    },
    /// An item was updated
    Updated {
        /// Store name
        store: String,
        /// The item after the update
        item: Item,
    },
    /// An item was deleted
    Deleted {
        /// Store name
        store: String,
        /// Key of the deleted item
        key: String,
    },
}

impl TriggerEvent {
    /// Kind of trigger this event fires
    pub fn kind(&self) -> TriggerKind {
        match self {
            TriggerEvent::Created { .. } => TriggerKind::AfterCreate,
            TriggerEvent::Updated { .. } => TriggerKind::AfterUpdate,
            TriggerEvent::Deleted { .. } => TriggerKind::AfterDelete,
        }
    }

    /// Name of the store written to
    pub fn store(&self) -> &str {
        match self {
            TriggerEvent::Created { store, .. }
            | TriggerEvent::Updated { store, .. }
            | TriggerEvent::Deleted { store, .. } => store,
        }
    }
}

/// A registered callback
pub type TriggerFn = Arc<dyn Fn(&TriggerEvent) -> StoreResult<()> + Send + Sync>;

#[derive(Clone)]
struct Trigger {
    name: String,
    kind: TriggerKind,
    callback: TriggerFn,
}

/// Callbacks per store
#[derive(Default)]
pub struct TriggerRegistry {
    triggers: RwLock<HashMap<String, Vec<Trigger>>>,
}

impl std::fmt::Debug for TriggerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let triggers = self.triggers.read();
        let mut map = f.debug_map();
        for (store, list) in triggers.iter() {
            let names: Vec<&str> = list.iter().map(|t| t.name.as_str()).collect();
            map.entry(store, &names);
        }
        map.finish()
    }
}

impl TriggerRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` to run after `kind` writes to `store`
    pub fn register<F>(
        &self,
        store: impl Into<String>,
        name: impl Into<String>,
        kind: TriggerKind,
        callback: F,
    ) where
        F: Fn(&TriggerEvent) -> StoreResult<()> + Send + Sync + 'static,
    {
        self.triggers
            .write()
            .entry(store.into())
            .or_default()
            .push(Trigger {
                name: name.into(),
                kind,
                callback: Arc::new(callback),
            });
    }

    /// Remove every trigger named `name` on `store`; returns how many were removed
    pub fn unregister(&self, store: &str, name: &str) -> usize {
        let mut triggers = self.triggers.write();
        let Some(list) = triggers.get_mut(store) else {
            return 0;
        };
        let before = list.len();
        list.retain(|t| t.name != name);
        before - list.len()
    }

    /// Callbacks for `kind` writes to `store`, in registration order
    fn matching(&self, store: &str, kind: TriggerKind) -> Vec<(String, TriggerFn)> {
        self.triggers
            .read()
            .get(store)
            .map(|list| {
                list.iter()
                    .filter(|t| t.kind == kind)
                    .map(|t| (t.name.clone(), Arc::clone(&t.callback)))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Queues after-write callbacks for the wrapped store
pub struct TriggerStore {
    inner: DynStore,
    triggers: Arc<TriggerRegistry>,
    dispatcher: Arc<TriggerDispatcher>,
}

impl TriggerStore {
    /// Wrap `inner`
    pub fn new(
        inner: DynStore,
        triggers: Arc<TriggerRegistry>,
        dispatcher: Arc<TriggerDispatcher>,
    ) -> Self {
        TriggerStore {
            inner,
            triggers,
            dispatcher,
        }
    }

    fn fire(&self, event: TriggerEvent) {
        let callbacks = self.triggers.matching(event.store(), event.kind());
        if callbacks.is_empty() {
            return;
        }
        let event = Arc::new(event);
        for (name, callback) in callbacks {
            let task_event = Arc::clone(&event);
            let task_name = name.clone();
            let submitted = self.dispatcher.submit(move || {
                if let Err(e) = callback(&task_event) {
                    warn!(
                        target: "storekit::trigger",
                        trigger = %task_name,
                        store = %task_event.store(),
                        error = %e,
                        "trigger callback failed"
                    );
                }
            });
            if submitted.is_err() {
                warn!(
                    target: "storekit::trigger",
                    trigger = %name,
                    store = %event.store(),
                    kind = ?event.kind(),
                    "trigger queue full, event dropped"
                );
            }
        }
    }

    fn store_name(&self) -> String {
        self.inner.meta().name.clone()
    }
}

impl Store for TriggerStore {
    fn meta(&self) -> &StoreMeta {
        self.inner.meta()
    }

    fn capabilities(&self) -> StoreAccess {
        self.inner.capabilities()
    }

    fn create(&self, item: Item) -> StoreResult<Item> {
        let created = self.inner.create(item)?;
        self.fire(TriggerEvent::Created {
            store: self.store_name(),
            item: created.clone(),
        });
        Ok(created)
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
        let updated = self.inner.update(updates, precondition)?;
        if let Some(item) = &updated {
            self.fire(TriggerEvent::Updated {
                store: self.store_name(),
                item: item.clone(),
            });
        }
        Ok(updated)
    }

    fn delete(&self, key: &str) -> StoreResult<bool> {
        let deleted = self.inner.delete(key)?;
        if deleted {
            self.fire(TriggerEvent::Deleted {
                store: self.store_name(),
                key: key.to_string(),
            });
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
        let results = self.inner.edit_batch(edits)?;
        for result in results.iter().filter(|r| r.success) {
            let store = self.store_name();
            let event = match (&result.edit.op, &result.item) {
                (EditOp::Create(_), Some(item)) => TriggerEvent::Created {
                    store,
                    item: item.clone(),
                },
                (EditOp::Update(_), Some(item)) => TriggerEvent::Updated {
                    store,
                    item: item.clone(),
                },
                (EditOp::Delete(key), _) => TriggerEvent::Deleted {
                    store,
                    key: key.clone(),
                },
                _ => continue,
            };
            self.fire(event);
        }
        Ok(results)
    }
}
