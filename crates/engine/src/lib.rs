//! Wrapper layers and composition for storekit
//!
//! This crate layers cross-cutting behaviour around a backend `Store`:
//! - SchemaValidatingStore: payload validation
//! - AccessRestrictionStore: caller grants ∩ store policy ∩ backend capabilities
//! - UniqueIndexStore: unique tuples checked before writes
//! - ReferentialIntegrityStore: Block / Nullify / Cascade on parent deletes
//! - TriggerStore: after-write callbacks on a bounded background queue
//!
//! The StoreRegistry is the composition root: it holds the registered
//! backends and builds the layered pipeline per caller.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod access;
pub mod dispatcher;
pub mod referential;
pub mod registry;
pub mod schema;
pub mod trigger;
pub mod unique;

pub use access::{AccessGrant, AccessRestrictionStore};
pub use dispatcher::{DispatcherStats, QueueFull, TriggerDispatcher};
pub use referential::{LinkResolver, ReferentialIntegrityStore};
pub use registry::StoreRegistry;
pub use schema::SchemaValidatingStore;
pub use trigger::{TriggerEvent, TriggerFn, TriggerKind, TriggerRegistry, TriggerStore};
pub use unique::UniqueIndexStore;
