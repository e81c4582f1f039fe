//! Storage backends for storekit
//!
//! This crate implements the `Store` contract twice:
//! - MemoryStore: `BTreeMap` behind a `parking_lot::RwLock`, offset paging
//! - SqlStore: one SQLite table per entity, filters pushed down as `WHERE`
//!   clauses with an in-process residual
//!
//! Both paginate with offset page keys and treat `Null` as absent.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod memory;
pub mod sql;

pub use memory::MemoryStore;
pub use sql::{SqlExpr, SqlFilterBuilder, SqlStore};
