//! Partition/sort-key backend for storekit
//!
//! This crate maps the `Store` contract onto a key-value service whose
//! tables are addressed by a partition key and an optional sort key, with
//! sparse secondary indexes:
//! - PartitionClient: the native call surface (conditional single-item
//!   writes, bounded batch calls, paged query and scan)
//! - LocalClient: an in-process implementation of it
//! - Planner: chooses the table or a secondary index for each search and
//!   splits the filter into key condition, native filter and residual
//! - PartitionStore: the `Store` implementation on top
//!
//! Numbers are stored as decimal text; see [`decimal`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod condition;
pub mod decimal;
pub mod error;
pub mod local;
pub mod native;
pub mod planner;
pub mod store;

pub use client::{
    BatchGetOutput, IndexSpec, KeyCondition, KeySchema, Page, PartitionClient, QueryRequest,
    ScanRequest, TableSpec, UpdateRequest, WriteRequest, MAX_BATCH_GET, MAX_BATCH_WRITE,
};
pub use condition::{CmpOp, Condition, PartitionFilterBuilder, RenderedCondition};
pub use error::{PartitionError, PartitionResult};
pub use local::LocalClient;
pub use native::{NativeItem, NativeValue};
pub use planner::{Access, OrderMode, Planner, QueryPlan};
pub use store::{local_store, PartitionStore, MAX_BATCH_ATTEMPTS};
