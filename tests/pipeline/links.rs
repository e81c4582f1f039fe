//! Referential Integrity Tests
//!
//! Deleting a team blocks on projects, nullifies tasks and cascades to
//! members.

use crate::common::*;
use crate::{admin, registry, Kind, KINDS};

fn populated(kind: Kind) -> std::sync::Arc<StoreRegistry> {
    let registry = registry(kind);
    let teams = admin(&registry, "teams");
    let members = admin(&registry, "members");
    let tasks = admin(&registry, "tasks");
    for id in 1..=3 {
        teams
            .create(Item::new().with("id", id).with("slug", format!("team-{}", id)))
            .unwrap();
    }
    // Seven members of team 1 span three cascade batches of three
    for id in 0..7 {
        members
            .create(Item::new().with("id", id).with("team_id", 1))
            .unwrap();
    }
    members
        .create(Item::new().with("id", 100).with("team_id", 2))
        .unwrap();
    for id in 0..4 {
        tasks
            .create(Item::new().with("id", id).with("team_id", 1).with("title", "t"))
            .unwrap();
    }
    tasks
        .create(Item::new().with("id", 50).with("team_id", 2).with("title", "t"))
        .unwrap();
    admin(&registry, "projects")
        .create(Item::new().with("id", 1).with("team_id", 3))
        .unwrap();
    registry
}

#[test]
fn blocking_child_refuses_the_delete() {
    for kind in KINDS {
        let registry = populated(kind);
        let teams = admin(&registry, "teams");
        let err = teams.delete("3").unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }), "{:?}: {:?}", kind, err);
        assert!(teams.read("3").unwrap().is_some(), "{:?}", kind);
    }
}

#[test]
fn delete_cascades_and_nullifies() {
    for kind in KINDS {
        let registry = populated(kind);
        assert!(admin(&registry, "teams").delete("1").unwrap(), "{:?}", kind);

        let members = admin(&registry, "members");
        let left = members
            .search_all(&SearchFilter::IncludeAll, &SearchOrder::asc("id"))
            .unwrap();
        assert_eq!(left.len(), 1, "{:?}", kind);
        assert_eq!(left[0].get("id"), Some(&Value::Int(100)), "{:?}", kind);

        let tasks = admin(&registry, "tasks");
        assert_eq!(tasks.count(&SearchFilter::IncludeAll).unwrap(), 5, "{:?}", kind);
        assert_eq!(
            tasks.count(&SearchFilter::not_exists("team_id")).unwrap(),
            4,
            "{:?}",
            kind
        );
        let kept = tasks.read("50").unwrap().unwrap();
        assert_eq!(kept.get("team_id"), Some(&Value::Int(2)), "{:?}", kind);
    }
}

#[test]
fn deleting_a_missing_parent_touches_nothing() {
    for kind in KINDS {
        let registry = populated(kind);
        assert!(!admin(&registry, "teams").delete("99").unwrap(), "{:?}", kind);
        assert_eq!(
            admin(&registry, "members")
                .count(&SearchFilter::IncludeAll)
                .unwrap(),
            8,
            "{:?}",
            kind
        );
    }
}

#[test]
fn batch_delete_applies_links_per_edit() {
    for kind in KINDS {
        let registry = populated(kind);
        let results = admin(&registry, "teams")
            .edit_batch(vec![
                BatchEdit::delete("3"),
                BatchEdit::delete("2"),
                BatchEdit::delete("42"),
            ])
            .unwrap();
        let codes: Vec<Option<&str>> = results.iter().map(|r| r.code.as_deref()).collect();
        assert_eq!(codes, vec![Some("conflict"), None, Some("not_found")], "{:?}", kind);

        let members = admin(&registry, "members");
        assert!(members.read("100").unwrap().is_none(), "{:?}", kind);
        assert_eq!(members.count(&SearchFilter::IncludeAll).unwrap(), 7, "{:?}", kind);
        let task = admin(&registry, "tasks").read("50").unwrap().unwrap();
        assert!(!task.contains("team_id"), "{:?}", kind);
    }
}
