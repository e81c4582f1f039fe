//! Pagination Tests
//!
//! Following page keys to the end returns every match exactly once, in the
//! requested order, whatever the page size and whichever access path the
//! backend picks.

use crate::common::*;
use std::cmp::Ordering;
use std::collections::HashSet;

const PAGE_SIZES: [usize; 4] = [1, 7, 50, 1000];

fn grid() -> Vec<Item> {
    (0..6)
        .flat_map(|pk| (0..40).map(move |sk| cell(pk, sk)))
        .collect()
}

fn cases() -> Vec<(&'static str, SearchFilter, SearchOrder)> {
    vec![
        ("all", SearchFilter::IncludeAll, SearchOrder::new()),
        (
            "partition_desc",
            SearchFilter::eq("pk", 3),
            SearchOrder::desc("sk"),
        ),
        ("index_eq", SearchFilter::eq("sk", 10), SearchOrder::new()),
        (
            "range_by_score",
            SearchFilter::gt("score", 20.0) & SearchFilter::exists("label"),
            SearchOrder::asc("score"),
        ),
        (
            "or",
            SearchFilter::eq("flag", true) | SearchFilter::starts_with("label", "cell-2"),
            SearchOrder::new(),
        ),
        (
            "not_and",
            !SearchFilter::eq("flag", true) & SearchFilter::lt("score", 20.0),
            SearchOrder::desc("label"),
        ),
        ("query", SearchFilter::query("CELL-1-1"), SearchOrder::new()),
        (
            "ne_absent_included",
            SearchFilter::ne("label", "cell-0-1"),
            SearchOrder::asc("pk").then("sk", true),
        ),
        (
            "one_of",
            SearchFilter::one_of("sk", [1, 5, 39]),
            SearchOrder::asc("sk"),
        ),
        ("none", SearchFilter::ExcludeAll, SearchOrder::new()),
    ]
}

fn assert_ordered(rows: &[Item], order: &SearchOrder, context: &str) {
    for pair in rows.windows(2) {
        assert_ne!(
            order.compare(&pair[0], &pair[1]),
            Ordering::Greater,
            "{}: rows out of order",
            context
        );
    }
}

// ============================================================================
// Completeness
// ============================================================================

#[test]
fn pages_cover_every_match_exactly_once() {
    let all = grid();
    for b in backends(cells_meta()) {
        seed(&*b.store, all.clone());
        for (name, filter, order) in cases() {
            let expected = expected_keys(&*b.store, &all, &filter);
            for limit in PAGE_SIZES {
                let context = format!("{}/{}/limit {}", b.name, name, limit);
                let (rows, pages) = collect_pages(&*b.store, &filter, &order, limit);
                let keys = keys_of(&*b.store, &rows);

                let unique: HashSet<&String> = keys.iter().collect();
                assert_eq!(unique.len(), keys.len(), "{}: duplicate rows", context);

                let mut sorted = keys.clone();
                sorted.sort();
                assert_eq!(sorted, expected, "{}", context);

                assert_ordered(&rows, &order, &context);
                assert!(
                    pages >= (expected.len() + limit - 1) / limit,
                    "{}: {} pages",
                    context,
                    pages
                );
            }
        }
    }
}

#[test]
fn counts_agree_with_searches() {
    let all = grid();
    for b in backends(cells_meta()) {
        seed(&*b.store, all.clone());
        for (name, filter, _) in cases() {
            let expected = expected_keys(&*b.store, &all, &filter).len() as u64;
            assert_eq!(
                b.store.count(&filter).unwrap(),
                expected,
                "{}/{}",
                b.name,
                name
            );
        }
    }
}

#[test]
fn empty_query_matches_everything() {
    for b in backends(cells_meta()) {
        seed(&*b.store, (0..5).map(|sk| cell(0, sk)));
        assert_eq!(
            b.store.count(&SearchFilter::query("   ")).unwrap(),
            5,
            "{}",
            b.name
        );
    }
}

// ============================================================================
// Ordering
// ============================================================================

#[test]
fn ordered_results_agree_across_backends() {
    let all = grid();
    let filter = SearchFilter::eq("pk", 2) & SearchFilter::gte("sk", 30);
    let order = SearchOrder::desc("sk");
    let mut answers = Vec::new();
    for b in backends(cells_meta()) {
        seed(&*b.store, all.clone());
        let (rows, _) = collect_pages(&*b.store, &filter, &order, 4);
        let sks: Vec<Option<Value>> = rows.iter().map(|r| r.get("sk").cloned()).collect();
        answers.push((b.name, sks));
    }
    let expected: Vec<Option<Value>> = (30..40).rev().map(|sk| Some(Value::Int(sk))).collect();
    for (name, sks) in answers {
        assert_eq!(sks, expected, "{}", name);
    }
}

#[test]
fn index_ordered_search_ignores_local_sort_bound() {
    let config = StoreConfig {
        max_local_search_size: 10,
        ..StoreConfig::default()
    };
    for b in backends_with_config(cells_meta(), config) {
        seed(&*b.store, grid());
        let (rows, _) = collect_pages(
            &*b.store,
            &SearchFilter::eq("pk", 1),
            &SearchOrder::asc("sk"),
            15,
        );
        assert_eq!(rows.len(), 40, "{}", b.name);
    }
}

#[test]
fn unknown_attribute_in_filter_or_order_is_rejected() {
    for b in backends(cells_meta()) {
        let bad_filter = SearchRequest::new().with_filter(SearchFilter::eq("nope", 1));
        assert!(
            matches!(b.store.search(&bad_filter), Err(StoreError::Validation { .. })),
            "{}",
            b.name
        );
        let bad_order = SearchRequest::new().with_order(SearchOrder::asc("nope"));
        assert!(
            matches!(b.store.search(&bad_order), Err(StoreError::Validation { .. })),
            "{}",
            b.name
        );
    }
}

#[test]
fn garbage_page_key_is_rejected() {
    for b in backends(cells_meta()) {
        seed(&*b.store, (0..3).map(|sk| cell(0, sk)));
        let request = SearchRequest::new().with_page_key(Some("%%%".to_string()));
        assert!(
            matches!(b.store.search(&request), Err(StoreError::Validation { .. })),
            "{}",
            b.name
        );
    }
}

#[test]
fn default_limit_applies_without_explicit_limit() {
    let config = StoreConfig {
        default_search_limit: 5,
        ..StoreConfig::default()
    };
    for b in backends_with_config(cells_meta(), config) {
        seed(&*b.store, (0..12).map(|sk| cell(0, sk)));
        let page = b.store.search(&SearchRequest::new()).unwrap();
        assert!(page.results.len() <= 5, "{}", b.name);
        assert!(page.next_page_key.is_some(), "{}", b.name);
        let everything = b
            .store
            .search_all(&SearchFilter::IncludeAll, &SearchOrder::new())
            .unwrap();
        assert_eq!(everything.len(), 12, "{}", b.name);
    }
}
