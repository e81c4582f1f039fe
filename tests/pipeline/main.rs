//! Pipeline Tests
//!
//! Stores obtained from a `StoreRegistry` carry every wrapper layer. Each
//! scenario runs once per backend kind.

#[path = "../common/mod.rs"]
mod common;

mod access;
mod links;
mod triggers;
mod uniqueness;

use common::*;
use std::sync::Arc;
use storekit::{local_store, Attr, AttrType, Index, Link, OnDelete};

/// Backend kind a registry is built over
#[derive(Debug, Clone, Copy)]
pub enum Kind {
    Memory,
    Sql,
    Partition,
}

pub const KINDS: [Kind; 3] = [Kind::Memory, Kind::Sql, Kind::Partition];

/// teams ← members (cascade), tasks (nullify), projects (block)
pub fn metas() -> Vec<StoreMeta> {
    vec![
        StoreMeta::builder("teams")
            .attr(Attr::new("id", AttrType::Int))
            .attr(Attr::new("slug", AttrType::Str))
            .attr(Attr::new("budget", AttrType::Int).with_readable(false))
            .key_attr("id")
            .index(Index::unique("unique_slug", ["slug"]))
            .build()
            .unwrap(),
        StoreMeta::builder("members")
            .attr(Attr::new("id", AttrType::Int))
            .attr(Attr::new("team_id", AttrType::Int))
            .attr(Attr::new("email", AttrType::Str))
            .key_attr("id")
            .index(Index::unique("unique_team_email", ["team_id", "email"]))
            .link(Link::belongs_to("team", "teams", "team_id", OnDelete::Cascade))
            .batch_size(3)
            .build()
            .unwrap(),
        StoreMeta::builder("tasks")
            .attr(Attr::new("id", AttrType::Int))
            .attr(Attr::new("team_id", AttrType::Int))
            .attr(Attr::new("title", AttrType::Str))
            .key_attr("id")
            .link(Link::belongs_to("team", "teams", "team_id", OnDelete::Nullify))
            .build()
            .unwrap(),
        StoreMeta::builder("projects")
            .attr(Attr::new("id", AttrType::Int))
            .attr(Attr::new("team_id", AttrType::Int))
            .key_attr("id")
            .access(StoreAccess {
                delete: false,
                ..StoreAccess::all()
            })
            .link(Link::belongs_to("team", "teams", "team_id", OnDelete::Block))
            .build()
            .unwrap(),
    ]
}

/// A registry over `kind` holding every store from [`metas`]
pub fn registry(kind: Kind) -> Arc<StoreRegistry> {
    init_tracing();
    let registry = StoreRegistry::new(StoreConfig::default()).unwrap();
    let client = Arc::new(LocalClient::new());
    for meta in metas() {
        let meta = Arc::new(meta);
        let base: DynStore = match kind {
            Kind::Memory => Arc::new(MemoryStore::new(meta)),
            Kind::Sql => Arc::new(SqlStore::open_in_memory(meta).unwrap()),
            Kind::Partition => Arc::new(local_store(&client, meta).unwrap()),
        };
        registry.register(base).unwrap();
    }
    registry.validate_links().unwrap();
    registry
}

/// A store with full access
pub fn admin(registry: &StoreRegistry, name: &str) -> DynStore {
    registry.store(name, &AccessGrant::full("admin")).unwrap()
}
