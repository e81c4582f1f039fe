//! Access Restriction Tests
//!
//! The effective permission is the caller's grant intersected with the
//! store's declared access and the backend's capabilities.

use crate::common::*;
use crate::{admin, registry, KINDS};

#[test]
fn read_only_grant_refuses_writes() {
    for kind in KINDS {
        let registry = registry(kind);
        admin(&registry, "teams")
            .create(Item::new().with("id", 1).with("slug", "a"))
            .unwrap();
        let viewer = registry
            .store("teams", &AccessGrant::read_only("viewer"))
            .unwrap();

        assert!(viewer.read("1").unwrap().is_some(), "{:?}", kind);
        assert_eq!(viewer.count(&SearchFilter::IncludeAll).unwrap(), 1, "{:?}", kind);
        for err in [
            viewer
                .create(Item::new().with("id", 2).with("slug", "b"))
                .unwrap_err(),
            viewer
                .update(Item::new().with("id", 1).with("slug", "c"), None)
                .unwrap_err(),
            viewer.delete("1").unwrap_err(),
        ] {
            assert!(
                matches!(err, StoreError::Authorization { .. }),
                "{:?}: {:?}",
                kind,
                err
            );
        }
        assert_eq!(viewer.capabilities(), StoreAccess::read_only(), "{:?}", kind);
    }
}

#[test]
fn per_store_grant_overrides_default() {
    for kind in KINDS {
        let registry = registry(kind);
        let grant = AccessGrant::read_only("editor").with_store("tasks", StoreAccess::all());
        let tasks = registry.store("tasks", &grant).unwrap();
        tasks
            .create(Item::new().with("id", 1).with("title", "write docs"))
            .unwrap();
        let teams = registry.store("teams", &grant).unwrap();
        assert!(teams.create(Item::new().with("id", 1)).is_err(), "{:?}", kind);
    }
}

#[test]
fn declared_store_access_limits_every_caller() {
    for kind in KINDS {
        let registry = registry(kind);
        let projects = admin(&registry, "projects");
        projects.create(Item::new().with("id", 1)).unwrap();
        let err = projects.delete("1").unwrap_err();
        assert!(
            matches!(err, StoreError::Authorization { .. }),
            "{:?}: {:?}",
            kind,
            err
        );
        assert!(!projects.capabilities().delete, "{:?}", kind);
    }
}

#[test]
fn batch_refuses_only_forbidden_edits() {
    for kind in KINDS {
        let registry = registry(kind);
        admin(&registry, "projects")
            .create(Item::new().with("id", 1))
            .unwrap();
        let results = admin(&registry, "projects")
            .edit_batch(vec![
                BatchEdit::create(Item::new().with("id", 2)),
                BatchEdit::delete("1"),
            ])
            .unwrap();
        let codes: Vec<Option<&str>> = results.iter().map(|r| r.code.as_deref()).collect();
        assert_eq!(codes, vec![None, Some("authorization")], "{:?}", kind);
    }
}

#[test]
fn unreadable_attributes_are_stripped_from_results() {
    for kind in KINDS {
        let registry = registry(kind);
        let teams = admin(&registry, "teams");
        let created = teams
            .create(
                Item::new()
                    .with("id", 1)
                    .with("slug", "a")
                    .with("budget", 1000),
            )
            .unwrap();
        assert!(!created.contains("budget"), "{:?}", kind);
        let read = teams.read("1").unwrap().unwrap();
        assert!(!read.contains("budget"), "{:?}", kind);
        let found = teams
            .search_all(&SearchFilter::IncludeAll, &SearchOrder::new())
            .unwrap();
        assert!(found.iter().all(|t| !t.contains("budget")), "{:?}", kind);

        let err = teams
            .search(&SearchRequest::new().with_filter(SearchFilter::gt("budget", 10)))
            .unwrap_err();
        assert!(matches!(err, StoreError::Validation { .. }), "{:?}", kind);
    }
}

#[test]
fn schema_errors_surface_before_any_write() {
    for kind in KINDS {
        let registry = registry(kind);
        let teams = admin(&registry, "teams");
        for bad in [
            Item::new().with("id", 1).with("unknown", 1),
            Item::new().with("id", "not a number"),
            Item::new().with("slug", "keyless"),
        ] {
            let err = teams.create(bad).unwrap_err();
            assert!(matches!(err, StoreError::Validation { .. }), "{:?}: {:?}", kind, err);
        }
        assert_eq!(teams.count(&SearchFilter::IncludeAll).unwrap(), 0, "{:?}", kind);
    }
}
