//! Core types and traits for storekit
//!
//! This crate defines everything the backends and wrapper layers share:
//! - Value / Item: the uniform field container
//! - Attr / AttrType / FilterOp: attribute metadata
//! - KeyConfig: item ↔ key string mapping
//! - Index / Link: access paths, unique tuples, belongs-to relations
//! - StoreMeta: per-entity metadata and its builder
//! - SearchFilter / SearchOrder: the search algebra and its native push-down
//! - SearchRequest / ResultSet / PageKey: paging
//! - BatchEdit / BatchEditResult: the batch edit protocol
//! - Store: the uniform store contract
//! - StoreError: error taxonomy
//! - StoreConfig: `storekit.toml`

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod attr;
pub mod batch;
pub mod config;
pub mod error;
pub mod filter;
pub mod index;
pub mod item;
pub mod key;
pub mod meta;
pub mod native;
pub mod order;
pub mod schema;
pub mod search;
pub mod store;
pub mod value;

pub use attr::{Attr, AttrType, FilterOp, ValueGenerator};
pub use batch::{
    check_batch_size, prefail_and_delegate, BatchEdit, BatchEditResult, EditOp,
};
pub use config::{StoreConfig, CONFIG_FILE_NAME};
pub use error::{StoreError, StoreResult};
pub use filter::{AttrFilter, Operand, SearchFilter};
pub use index::{Index, Link, OnDelete};
pub use item::Item;
pub use key::{KeyConfig, KeyField, KeySecret};
pub use meta::{StoreAccess, StoreMeta, StoreMetaBuilder, StoreOp, DEFAULT_BATCH_SIZE};
pub use native::{build_native_expression, NativeExpression, NativeFilterBuilder};
pub use order::{SearchOrder, SortField};
pub use schema::{ItemSchema, SchemaField};
pub use search::{slice_page, PageKey, ResultSet, SearchRequest};
pub use store::{apply_edits_individually, DynStore, Store};
pub use value::Value;
