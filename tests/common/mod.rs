//! Shared test utilities for all integration test suites.
//!
//! Import via `#[path = "../common/mod.rs"] mod common;` from a suite's main.rs.

#![allow(dead_code)]
#![allow(unused_imports)]

use std::sync::{Arc, Once};

pub use storekit::{
    AccessGrant, Attr, AttrType, BatchEdit, DynStore, Index, Item, Link, LocalClient,
    MemoryStore, OnDelete, PageKey, ResultSet, SearchFilter, SearchOrder, SearchRequest,
    SqlStore, Store, StoreAccess, StoreConfig, StoreError, StoreMeta, StoreRegistry, Value,
};

// ============================================================================
// Initialization
// ============================================================================

static INIT_TRACING: Once = Once::new();

/// Route `tracing` output through the test harness
pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing_subscriber::filter::LevelFilter::DEBUG)
            .try_init();
    });
}

// ============================================================================
// Metadata fixtures
// ============================================================================

/// `cells`: composite key (pk, sk), secondary index on (sk, pk)
pub fn cells_meta() -> StoreMeta {
    StoreMeta::builder("cells")
        .attr(Attr::new("pk", AttrType::Int))
        .attr(Attr::new("sk", AttrType::Int))
        .attr(Attr::new("label", AttrType::Str))
        .attr(Attr::new("score", AttrType::Float))
        .attr(Attr::new("flag", AttrType::Bool))
        .key_composite(["pk", "sk"])
        .index(Index::partition_sort("by_sk", "sk", Some("pk")))
        .batch_size(250)
        .build()
        .expect("cells meta")
}

/// One `cells` row; every seventh row has no label
pub fn cell(pk: i64, sk: i64) -> Item {
    let item = Item::new()
        .with("pk", pk)
        .with("sk", sk)
        .with("score", ((pk * 31 + sk * 17) % 101) as f64 / 2.0)
        .with("flag", (pk + sk) % 2 == 0);
    if (pk * 100 + sk) % 7 == 0 {
        item
    } else {
        item.with("label", format!("cell-{}-{}", pk, sk))
    }
}

/// `notes`: single integer key
pub fn notes_meta() -> StoreMeta {
    StoreMeta::builder("notes")
        .attr(Attr::new("id", AttrType::Int))
        .attr(Attr::new("title", AttrType::Str))
        .attr(Attr::new("body", AttrType::Str))
        .key_attr("id")
        .batch_size(10)
        .build()
        .expect("notes meta")
}

// ============================================================================
// Backends
// ============================================================================

/// A backend under test
pub struct Backend {
    pub name: &'static str,
    pub store: DynStore,
}

/// The same metadata on every backend
pub fn backends(meta: StoreMeta) -> Vec<Backend> {
    backends_with_config(meta, StoreConfig::default())
}

/// The same metadata and config on every backend
pub fn backends_with_config(meta: StoreMeta, config: StoreConfig) -> Vec<Backend> {
    init_tracing();
    let meta = Arc::new(meta);
    let client = Arc::new(LocalClient::new());
    vec![
        Backend {
            name: "memory",
            store: Arc::new(MemoryStore::new(Arc::clone(&meta)).with_config(config.clone())),
        },
        Backend {
            name: "sql",
            store: Arc::new(
                SqlStore::open_in_memory(Arc::clone(&meta))
                    .expect("sqlite")
                    .with_config(config.clone()),
            ),
        },
        Backend {
            name: "partition",
            store: Arc::new(
                storekit::local_store(&client, meta)
                    .expect("partition table")
                    .with_config(config),
            ),
        },
    ]
}

/// Create `items` through batches of at most `batch_size`
pub fn seed(store: &dyn Store, items: impl IntoIterator<Item = Item>) {
    let edits: Vec<BatchEdit> = items.into_iter().map(BatchEdit::create).collect();
    for chunk in edits.chunks(store.meta().batch_size) {
        let results = store.edit_batch(chunk.to_vec()).expect("seed batch");
        for result in results {
            assert!(result.success, "seed failed: {:?}", result.details);
        }
    }
}

/// Follow page keys to the end with pages of `limit`, returning every row
/// and the number of pages fetched
pub fn collect_pages(
    store: &dyn Store,
    filter: &SearchFilter,
    order: &SearchOrder,
    limit: usize,
) -> (Vec<Item>, usize) {
    let mut request = SearchRequest::new()
        .with_filter(filter.clone())
        .with_order(order.clone())
        .with_limit(limit);
    let mut rows = Vec::new();
    let mut pages = 0;
    loop {
        let page = store.search(&request).expect("search page");
        pages += 1;
        assert!(page.results.len() <= limit);
        rows.extend(page.results);
        match page.next_page_key {
            Some(key) => request.page_key = Some(key),
            None => return (rows, pages),
        }
        assert!(pages <= 10_000, "pagination did not terminate");
    }
}

/// Canonical key of every row, in order
pub fn keys_of(store: &dyn Store, rows: &[Item]) -> Vec<String> {
    rows.iter()
        .map(|row| store.meta().key_config.canonical_key(row).expect("row key"))
        .collect()
}

/// Canonical keys of the rows `filter` matches, by brute force
pub fn expected_keys(store: &dyn Store, all: &[Item], filter: &SearchFilter) -> Vec<String> {
    let locked = filter.lock_attrs(&store.meta().attrs).expect("lock filter");
    let matching: Vec<Item> = all.iter().filter(|i| locked.matches(i)).cloned().collect();
    let mut keys = keys_of(store, &matching);
    keys.sort();
    keys
}
