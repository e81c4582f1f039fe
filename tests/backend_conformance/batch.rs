//! Batch Edit Tests
//!
//! Every backend reports one result per edit, in order, and applies the
//! edits that succeed.

use crate::common::*;

fn key(store: &dyn Store, pk: i64, sk: i64) -> String {
    store
        .meta()
        .key_str(&Item::new().with("pk", pk).with("sk", sk))
        .unwrap()
}

fn codes(results: &[storekit::BatchEditResult]) -> Vec<Option<&str>> {
    results.iter().map(|r| r.code.as_deref()).collect()
}

#[test]
fn mixed_batch_reports_each_outcome_in_order() {
    for b in backends(cells_meta()) {
        seed(&*b.store, (0..3).map(|sk| cell(0, sk)));
        let store = &*b.store;
        let edits = vec![
            BatchEdit::create(cell(1, 0)),
            BatchEdit::create(cell(0, 0)),
            BatchEdit::update(Item::new().with("pk", 0).with("sk", 1).with("score", 7.5)),
            BatchEdit::update(Item::new().with("pk", 9).with("sk", 9).with("score", 7.5)),
            BatchEdit::delete(key(store, 0, 2)),
            BatchEdit::delete(key(store, 9, 9)),
        ];
        let results = store.edit_batch(edits.clone()).unwrap();
        assert_eq!(results.len(), edits.len(), "{}", b.name);
        for (result, edit) in results.iter().zip(&edits) {
            assert_eq!(&result.edit, edit, "{}", b.name);
        }
        assert_eq!(
            codes(&results),
            vec![None, Some("conflict"), None, Some("not_found"), None, Some("not_found")],
            "{}",
            b.name
        );
        assert_eq!(results[0].item.as_ref(), Some(&cell(1, 0)), "{}", b.name);
        assert_eq!(
            results[2].item.as_ref().and_then(|i| i.get("score")),
            Some(&Value::Float(7.5)),
            "{}",
            b.name
        );

        assert!(store.read(&key(store, 1, 0)).unwrap().is_some(), "{}", b.name);
        assert!(store.read(&key(store, 0, 2)).unwrap().is_none(), "{}", b.name);
        assert_eq!(store.count(&SearchFilter::IncludeAll).unwrap(), 3, "{}", b.name);
    }
}

#[test]
fn malformed_delete_key_fails_only_that_edit() {
    for b in backends(cells_meta()) {
        let results = b
            .store
            .edit_batch(vec![
                BatchEdit::delete("garbage"),
                BatchEdit::create(cell(2, 2)),
            ])
            .unwrap();
        assert_eq!(codes(&results), vec![Some("validation"), None], "{}", b.name);
    }
}

#[test]
fn oversized_batch_is_rejected_whole() {
    for b in backends(cells_meta()) {
        let edits: Vec<BatchEdit> = (0..251).map(|sk| BatchEdit::create(cell(0, sk))).collect();
        let err = b.store.edit_batch(edits).unwrap_err();
        assert!(
            matches!(err, StoreError::BatchTooLarge { size: 251, max: 250 }),
            "{}: {:?}",
            b.name,
            err
        );
        assert_eq!(b.store.count(&SearchFilter::IncludeAll).unwrap(), 0, "{}", b.name);
    }
}

#[test]
fn empty_batch_is_a_no_op() {
    for b in backends(cells_meta()) {
        assert!(b.store.edit_batch(Vec::new()).unwrap().is_empty(), "{}", b.name);
    }
}

#[test]
fn full_size_batch_is_applied() {
    for b in backends(cells_meta()) {
        let edits: Vec<BatchEdit> = (0..250).map(|sk| BatchEdit::create(cell(3, sk))).collect();
        let results = b.store.edit_batch(edits).unwrap();
        assert!(results.iter().all(|r| r.success), "{}", b.name);
        assert_eq!(
            b.store.count(&SearchFilter::eq("pk", 3)).unwrap(),
            250,
            "{}",
            b.name
        );
    }
}
