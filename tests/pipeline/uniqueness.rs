//! Unique Index Tests

use crate::common::*;
use crate::{admin, registry, KINDS};

#[test]
fn duplicate_slug_is_rejected_on_create() {
    for kind in KINDS {
        let registry = registry(kind);
        let teams = admin(&registry, "teams");
        teams.create(Item::new().with("id", 1).with("slug", "core")).unwrap();
        let err = teams
            .create(Item::new().with("id", 2).with("slug", "core"))
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }), "{:?}: {:?}", kind, err);
        assert!(teams.read("2").unwrap().is_none(), "{:?}", kind);
    }
}

#[test]
fn update_may_keep_its_own_value_but_not_take_another() {
    for kind in KINDS {
        let registry = registry(kind);
        let teams = admin(&registry, "teams");
        teams.create(Item::new().with("id", 1).with("slug", "core")).unwrap();
        teams.create(Item::new().with("id", 2).with("slug", "web")).unwrap();

        teams
            .update(Item::new().with("id", 1).with("slug", "core"), None)
            .unwrap()
            .unwrap();
        let err = teams
            .update(Item::new().with("id", 2).with("slug", "core"), None)
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }), "{:?}: {:?}", kind, err);
    }
}

#[test]
fn compound_tuple_is_checked_only_when_complete() {
    for kind in KINDS {
        let registry = registry(kind);
        let members = admin(&registry, "members");
        members
            .create(Item::new().with("id", 1).with("team_id", 1).with("email", "a@x"))
            .unwrap();
        // Same email on another team
        members
            .create(Item::new().with("id", 2).with("team_id", 2).with("email", "a@x"))
            .unwrap();
        // No email: the tuple is incomplete and never conflicts
        members.create(Item::new().with("id", 3).with("team_id", 1)).unwrap();
        members.create(Item::new().with("id", 4).with("team_id", 1)).unwrap();

        let err = members
            .create(Item::new().with("id", 5).with("team_id", 1).with("email", "a@x"))
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }), "{:?}", kind);

        // Moving member 2 onto team 1 completes a clashing tuple
        let err = members
            .update(Item::new().with("id", 2).with("team_id", 1), None)
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }), "{:?}", kind);
    }
}

#[test]
fn batch_claims_are_checked_against_each_other() {
    for kind in KINDS {
        let registry = registry(kind);
        let teams = admin(&registry, "teams");
        teams.create(Item::new().with("id", 1).with("slug", "core")).unwrap();
        let results = teams
            .edit_batch(vec![
                BatchEdit::create(Item::new().with("id", 2).with("slug", "core")),
                BatchEdit::create(Item::new().with("id", 3).with("slug", "web")),
                BatchEdit::create(Item::new().with("id", 4).with("slug", "web")),
            ])
            .unwrap();
        let codes: Vec<Option<&str>> = results.iter().map(|r| r.code.as_deref()).collect();
        assert_eq!(codes, vec![Some("conflict"), None, Some("conflict")], "{:?}", kind);
        assert_eq!(teams.count(&SearchFilter::IncludeAll).unwrap(), 2, "{:?}", kind);
    }
}
