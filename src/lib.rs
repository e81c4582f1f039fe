//! storekit - uniform CRUD, batch edits and search over interchangeable
//! storage backends
//!
//! Application code talks to every backend through the [`Store`] trait. The
//! backends are:
//!
//! - [`MemoryStore`]: in-process, for tests and small datasets
//! - [`SqlStore`]: one SQLite table per entity
//! - [`PartitionStore`]: a partition/sort-key table with secondary indexes,
//!   behind the [`PartitionClient`] seam ([`LocalClient`] in process)
//!
//! Validation, access control, uniqueness, referential integrity and
//! after-write triggers are layered on by the [`StoreRegistry`].
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use storekit::{AccessGrant, Attr, AttrType, Item, MemoryStore, StoreConfig, StoreMeta,
//!                StoreRegistry};
//!
//! let meta = StoreMeta::builder("notes")
//!     .attr(Attr::new("id", AttrType::Int))
//!     .attr(Attr::new("title", AttrType::Str))
//!     .key_attr("id")
//!     .build()?;
//! let registry = StoreRegistry::new(StoreConfig::default())?;
//! registry.register(Arc::new(MemoryStore::new(Arc::new(meta))))?;
//!
//! let notes = registry.store("notes", &AccessGrant::full("me"))?;
//! notes.create(Item::new().with("id", 1).with("title", "hello"))?;
//! ```

pub use storekit_core::*;
pub use storekit_engine::{
    AccessGrant, AccessRestrictionStore, LinkResolver, ReferentialIntegrityStore,
    SchemaValidatingStore, StoreRegistry, TriggerDispatcher, TriggerEvent, TriggerKind,
    TriggerRegistry, TriggerStore, UniqueIndexStore,
};
pub use storekit_partition::{
    local_store, LocalClient, PartitionClient, PartitionError, PartitionStore, TableSpec,
};
pub use storekit_storage::{MemoryStore, SqlStore};

/// Partition/sort-key backend internals: planner, conditions, native values
pub mod partition {
    pub use storekit_partition::*;
}
