//! Store registry and pipeline composition
//!
//! The registry is built once per process and shared by `Arc`. Backends are
//! registered with their metadata; every call to [`StoreRegistry::store`]
//! wraps the registered backend in a fresh pipeline for one caller:
//!
//! ```text
//! base → SchemaValidatingStore → AccessRestrictionStore → UniqueIndexStore
//!      → ReferentialIntegrityStore → TriggerStore
//! ```
//!
//! Link maintenance (nullify / cascade on a parent delete) goes through
//! [`StoreRegistry::system_store`], the same pipeline without the access
//! layer.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use storekit_core::{DynStore, StoreConfig, StoreError, StoreMeta, StoreResult};
use tracing::info;

use crate::access::{AccessGrant, AccessRestrictionStore};
use crate::dispatcher::TriggerDispatcher;
use crate::referential::{LinkResolver, ReferentialIntegrityStore};
use crate::schema::SchemaValidatingStore;
use crate::trigger::{TriggerRegistry, TriggerStore};
use crate::unique::UniqueIndexStore;

struct Entry {
    meta: Arc<StoreMeta>,
    base: DynStore,
}

/// Registered stores, trigger callbacks and the trigger dispatcher
pub struct StoreRegistry {
    me: Weak<StoreRegistry>,
    config: StoreConfig,
    entries: RwLock<BTreeMap<String, Entry>>,
    triggers: Arc<TriggerRegistry>,
    dispatcher: Arc<TriggerDispatcher>,
}

impl std::fmt::Debug for StoreRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreRegistry")
            .field("stores", &self.entries.read().keys().collect::<Vec<_>>())
            .field("config", &self.config)
            .finish()
    }
}

impl StoreRegistry {
    /// An empty registry; starts the trigger workers `config` asks for
    ///
    /// # Errors
    ///
    /// Returns `Config` if `config` is invalid or a worker cannot start.
    pub fn new(config: StoreConfig) -> StoreResult<Arc<Self>> {
        config.validate()?;
        let dispatcher = Arc::new(TriggerDispatcher::new(
            config.trigger_workers,
            config.trigger_queue_depth,
        )?);
        Ok(Arc::new_cyclic(|me| StoreRegistry {
            me: me.clone(),
            config,
            entries: RwLock::new(BTreeMap::new()),
            triggers: Arc::new(TriggerRegistry::new()),
            dispatcher,
        }))
    }

    /// Settings the registry was built with
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Trigger callbacks
    pub fn triggers(&self) -> &TriggerRegistry {
        &self.triggers
    }

    /// Trigger dispatcher, e.g. to drain it before shutdown
    pub fn dispatcher(&self) -> &TriggerDispatcher {
        &self.dispatcher
    }

    /// Register `base` under its metadata name
    ///
    /// # Errors
    ///
    /// Returns `Validation` if the name is already registered.
    pub fn register(&self, base: DynStore) -> StoreResult<()> {
        let meta = Arc::new(base.meta().clone());
        let mut entries = self.entries.write();
        if entries.contains_key(&meta.name) {
            return Err(StoreError::validation(format!(
                "store '{}' is already registered",
                meta.name
            )));
        }
        info!(
            target: "storekit::registry",
            store = %meta.name,
            links = meta.links.len(),
            indexes = meta.indexes.len(),
            "registered store"
        );
        entries.insert(meta.name.clone(), Entry { meta, base });
        Ok(())
    }

    /// Metadata of `name`
    pub fn meta(&self, name: &str) -> Option<Arc<StoreMeta>> {
        self.entries.read().get(name).map(|e| Arc::clone(&e.meta))
    }

    /// Names of every registered store, sorted
    pub fn names(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    /// Check that every link names a registered parent
    ///
    /// # Errors
    ///
    /// Returns `Validation` naming the first dangling link.
    pub fn validate_links(&self) -> StoreResult<()> {
        let entries = self.entries.read();
        for entry in entries.values() {
            for link in &entry.meta.links {
                if !entries.contains_key(&link.linked_store) {
                    return Err(StoreError::validation(format!(
                        "store '{}': link '{}' targets unknown store '{}'",
                        entry.meta.name, link.name, link.linked_store
                    )));
                }
            }
        }
        Ok(())
    }

    /// `name` wrapped for the caller holding `grant`
    ///
    /// # Errors
    ///
    /// Returns `Validation` if `name` is not registered.
    pub fn store(&self, name: &str, grant: &AccessGrant) -> StoreResult<DynStore> {
        self.compose(name, Some(grant))
    }

    /// `name` wrapped without access restriction
    ///
    /// # Errors
    ///
    /// Returns `Validation` if `name` is not registered.
    pub fn system_store(&self, name: &str) -> StoreResult<DynStore> {
        self.compose(name, None)
    }

    /// Stop the trigger workers after the queued callbacks have run
    pub fn shutdown(&self) {
        self.dispatcher.shutdown();
    }

    fn base(&self, name: &str) -> StoreResult<DynStore> {
        self.entries
            .read()
            .get(name)
            .map(|e| Arc::clone(&e.base))
            .ok_or_else(|| StoreError::validation(format!("unknown store '{}'", name)))
    }

    fn resolver(&self) -> StoreResult<Arc<dyn LinkResolver>> {
        let me: Arc<dyn LinkResolver> = self
            .me
            .upgrade()
            .ok_or_else(|| StoreError::backend("store registry was dropped"))?;
        Ok(me)
    }

    fn compose(&self, name: &str, grant: Option<&AccessGrant>) -> StoreResult<DynStore> {
        let validated: DynStore = Arc::new(SchemaValidatingStore::new(self.base(name)?));
        let restricted: DynStore = match grant {
            Some(grant) => Arc::new(AccessRestrictionStore::new(Arc::clone(&validated), grant)),
            None => Arc::clone(&validated),
        };
        let unique: DynStore = Arc::new(UniqueIndexStore::new(restricted, validated));
        let referential: DynStore =
            Arc::new(ReferentialIntegrityStore::new(unique, self.resolver()?));
        Ok(Arc::new(TriggerStore::new(
            referential,
            Arc::clone(&self.triggers),
            Arc::clone(&self.dispatcher),
        )))
    }
}

impl LinkResolver for StoreRegistry {
    fn metas(&self) -> Vec<Arc<StoreMeta>> {
        self.entries
            .read()
            .values()
            .map(|e| Arc::clone(&e.meta))
            .collect()
    }

    fn linked_store(&self, name: &str) -> StoreResult<DynStore> {
        self.system_store(name)
    }
}
