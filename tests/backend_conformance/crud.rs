//! CRUD Tests
//!
//! Create, read, update and delete behave identically on every backend.

use crate::common::*;

fn key(store: &dyn Store, pk: i64, sk: i64) -> String {
    store
        .meta()
        .key_str(&Item::new().with("pk", pk).with("sk", sk))
        .unwrap()
}

// ============================================================================
// Create / Read
// ============================================================================

#[test]
fn create_then_read_returns_stored_item() {
    for b in backends(cells_meta()) {
        let created = b.store.create(cell(1, 2)).unwrap();
        assert_eq!(created, cell(1, 2), "{}", b.name);
        let read = b.store.read(&key(&*b.store, 1, 2)).unwrap();
        assert_eq!(read, Some(cell(1, 2)), "{}", b.name);
    }
}

#[test]
fn create_duplicate_key_conflicts() {
    for b in backends(cells_meta()) {
        b.store.create(cell(1, 1)).unwrap();
        let err = b.store.create(cell(1, 1).with("label", "other")).unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }), "{}: {:?}", b.name, err);
        let stored = b.store.read(&key(&*b.store, 1, 1)).unwrap().unwrap();
        assert_eq!(stored.get("label"), cell(1, 1).get("label"), "{}", b.name);
    }
}

#[test]
fn null_fields_are_not_stored() {
    for b in backends(cells_meta()) {
        let created = b.store.create(cell(2, 3).with("label", Value::Null)).unwrap();
        assert!(!created.contains("label"), "{}", b.name);
        let read = b.store.read(&key(&*b.store, 2, 3)).unwrap().unwrap();
        assert!(!read.contains("label"), "{}", b.name);
    }
}

#[test]
fn read_missing_key_is_none() {
    for b in backends(cells_meta()) {
        assert_eq!(b.store.read(&key(&*b.store, 9, 9)).unwrap(), None, "{}", b.name);
    }
}

#[test]
fn read_malformed_key_is_validation_error() {
    for b in backends(cells_meta()) {
        let err = b.store.read("not a key").unwrap_err();
        assert!(matches!(err, StoreError::Validation { .. }), "{}: {:?}", b.name, err);
    }
}

#[test]
fn read_batch_is_aligned_with_keys() {
    for b in backends(cells_meta()) {
        seed(&*b.store, (0..5).map(|sk| cell(1, sk)));
        let keys = vec![
            key(&*b.store, 1, 4),
            key(&*b.store, 7, 7),
            key(&*b.store, 1, 0),
            key(&*b.store, 1, 4),
        ];
        let items = b.store.read_batch(&keys).unwrap();
        assert_eq!(
            items,
            vec![Some(cell(1, 4)), None, Some(cell(1, 0)), Some(cell(1, 4))],
            "{}",
            b.name
        );
    }
}

// ============================================================================
// Update
// ============================================================================

#[test]
fn update_changes_only_given_fields() {
    for b in backends(cells_meta()) {
        b.store.create(cell(3, 3)).unwrap();
        let updated = b
            .store
            .update(
                Item::new().with("pk", 3).with("sk", 3).with("score", 99.5),
                None,
            )
            .unwrap()
            .unwrap();
        assert_eq!(updated.get("score"), Some(&Value::Float(99.5)), "{}", b.name);
        assert_eq!(updated.get("flag"), cell(3, 3).get("flag"), "{}", b.name);
        let read = b.store.read(&key(&*b.store, 3, 3)).unwrap().unwrap();
        assert_eq!(read, updated, "{}", b.name);
    }
}

#[test]
fn update_with_null_removes_field() {
    for b in backends(cells_meta()) {
        b.store.create(cell(3, 4)).unwrap();
        let updated = b
            .store
            .update(
                Item::new().with("pk", 3).with("sk", 4).with("label", Value::Null),
                None,
            )
            .unwrap()
            .unwrap();
        assert!(!updated.contains("label"), "{}", b.name);
    }
}

#[test]
fn update_missing_item_is_none() {
    for b in backends(cells_meta()) {
        let result = b
            .store
            .update(Item::new().with("pk", 8).with("sk", 8).with("score", 1.0), None)
            .unwrap();
        assert!(result.is_none(), "{}", b.name);
        assert_eq!(b.store.count(&SearchFilter::IncludeAll).unwrap(), 0, "{}", b.name);
    }
}

#[test]
fn update_precondition_guards_the_write() {
    for b in backends(cells_meta()) {
        b.store.create(cell(4, 1).with("score", 10.0)).unwrap();
        let bump = Item::new().with("pk", 4).with("sk", 1).with("score", 11.0);

        let err = b
            .store
            .update(bump.clone(), Some(&SearchFilter::gt("score", 50.0)))
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }), "{}: {:?}", b.name, err);

        // A residual predicate (case-insensitive) is checked too
        let guard = SearchFilter::all([
            SearchFilter::eq("score", 10.0),
            SearchFilter::starts_with("label", "CELL-4").ignore_case(),
        ]);
        let updated = b.store.update(bump, Some(&guard)).unwrap().unwrap();
        assert_eq!(updated.get("score"), Some(&Value::Float(11.0)), "{}", b.name);
    }
}

// ============================================================================
// Delete
// ============================================================================

#[test]
fn delete_reports_whether_item_existed() {
    for b in backends(cells_meta()) {
        b.store.create(cell(5, 5)).unwrap();
        let k = key(&*b.store, 5, 5);
        assert!(b.store.delete(&k).unwrap(), "{}", b.name);
        assert!(!b.store.delete(&k).unwrap(), "{}", b.name);
        assert!(b.store.read(&k).unwrap().is_none(), "{}", b.name);
    }
}

// ============================================================================
// Single-attribute keys
// ============================================================================

#[test]
fn single_attr_key_is_the_plain_value() {
    for b in backends(notes_meta()) {
        b.store
            .create(Item::new().with("id", 42).with("title", "hello"))
            .unwrap();
        let read = b.store.read("42").unwrap().unwrap();
        assert_eq!(read.get("title"), Some(&Value::from("hello")), "{}", b.name);
        assert!(b.store.delete("42").unwrap(), "{}", b.name);
    }
}
