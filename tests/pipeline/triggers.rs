//! Trigger Tests

use crate::common::*;
use crate::{admin, registry, KINDS};
use parking_lot::Mutex;
use std::sync::Arc;
use storekit::{TriggerEvent, TriggerKind};

fn recorder(
    registry: &StoreRegistry,
    store: &str,
    kind: TriggerKind,
) -> Arc<Mutex<Vec<TriggerEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    registry
        .triggers()
        .register(store, "record", kind, move |event: &TriggerEvent| {
            sink.lock().push(event.clone());
            Ok(())
        });
    events
}

#[test]
fn writes_fire_matching_triggers() {
    for kind in KINDS {
        let registry = registry(kind);
        let created = recorder(&registry, "teams", TriggerKind::AfterCreate);
        let updated = recorder(&registry, "teams", TriggerKind::AfterUpdate);
        let deleted = recorder(&registry, "teams", TriggerKind::AfterDelete);
        let teams = admin(&registry, "teams");

        teams.create(Item::new().with("id", 1).with("slug", "a")).unwrap();
        teams
            .update(Item::new().with("id", 1).with("slug", "b"), None)
            .unwrap();
        teams.delete("1").unwrap();
        registry.dispatcher().drain();

        assert_eq!(
            *created.lock(),
            vec![TriggerEvent::Created {
                store: "teams".into(),
                item: Item::new().with("id", 1).with("slug", "a"),
            }],
            "{:?}",
            kind
        );
        assert_eq!(updated.lock().len(), 1, "{:?}", kind);
        assert_eq!(
            *deleted.lock(),
            vec![TriggerEvent::Deleted {
                store: "teams".into(),
                key: "1".into(),
            }],
            "{:?}",
            kind
        );
    }
}

#[test]
fn failed_writes_fire_nothing() {
    for kind in KINDS {
        let registry = registry(kind);
        let created = recorder(&registry, "teams", TriggerKind::AfterCreate);
        let deleted = recorder(&registry, "teams", TriggerKind::AfterDelete);
        let teams = admin(&registry, "teams");

        teams.create(Item::new().with("id", 1).with("slug", "a")).unwrap();
        assert!(teams.create(Item::new().with("id", 1).with("slug", "z")).is_err());
        assert!(!teams.delete("7").unwrap());
        registry.dispatcher().drain();

        assert_eq!(created.lock().len(), 1, "{:?}", kind);
        assert!(deleted.lock().is_empty(), "{:?}", kind);
    }
}

#[test]
fn batch_fires_once_per_successful_edit() {
    for kind in KINDS {
        let registry = registry(kind);
        let created = recorder(&registry, "teams", TriggerKind::AfterCreate);
        let teams = admin(&registry, "teams");
        teams
            .edit_batch(vec![
                BatchEdit::create(Item::new().with("id", 1).with("slug", "a")),
                BatchEdit::create(Item::new().with("id", 2).with("slug", "a")),
                BatchEdit::create(Item::new().with("id", 3).with("slug", "c")),
            ])
            .unwrap();
        registry.dispatcher().drain();
        assert_eq!(created.lock().len(), 2, "{:?}", kind);
    }
}

#[test]
fn cascade_deletes_fire_child_triggers() {
    for kind in KINDS {
        let registry = registry(kind);
        let removed = recorder(&registry, "members", TriggerKind::AfterDelete);
        admin(&registry, "teams")
            .create(Item::new().with("id", 1).with("slug", "a"))
            .unwrap();
        let members = admin(&registry, "members");
        for id in 0..4 {
            members
                .create(Item::new().with("id", id).with("team_id", 1))
                .unwrap();
        }
        admin(&registry, "teams").delete("1").unwrap();
        registry.dispatcher().drain();
        assert_eq!(removed.lock().len(), 4, "{:?}", kind);
    }
}

#[test]
fn failing_callback_does_not_affect_the_write() {
    for kind in KINDS {
        let registry = registry(kind);
        registry.triggers().register(
            "teams",
            "broken",
            TriggerKind::AfterCreate,
            |_: &TriggerEvent| Err(StoreError::backend("mail server down")),
        );
        let after = recorder(&registry, "teams", TriggerKind::AfterCreate);
        let teams = admin(&registry, "teams");
        teams.create(Item::new().with("id", 1).with("slug", "a")).unwrap();
        registry.dispatcher().drain();
        assert!(teams.read("1").unwrap().is_some(), "{:?}", kind);
        assert_eq!(after.lock().len(), 1, "{:?}", kind);
    }
}

#[test]
fn unregistered_trigger_stops_firing() {
    let registry = registry(crate::Kind::Memory);
    let created = recorder(&registry, "teams", TriggerKind::AfterCreate);
    assert_eq!(registry.triggers().unregister("teams", "record"), 1);
    admin(&registry, "teams")
        .create(Item::new().with("id", 1).with("slug", "a"))
        .unwrap();
    registry.dispatcher().drain();
    assert!(created.lock().is_empty());
}
