//! Backend conformance
//!
//! Every backend (memory, SQLite, partition/sort) runs the same scenarios and
//! must produce the same answers.

#[path = "../common/mod.rs"]
mod common;

mod batch;
mod crud;
mod pagination;
