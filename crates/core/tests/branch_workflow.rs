//! End-to-end tests for the branch workflows.
//!
//! These tests drive the public `BranchCoordinator` API the way a client
//! session would: checkout, local edits, update from the primary branch,
//! and commit back to it. A few tests work on an `OperationLog` directly to
//! check tree properties the coordinator relies on.

use std::sync::Arc;
use std::thread;

use modelsync_core::conflict::ConflictType;
use modelsync_core::model::{ApplyMode, Model};
use modelsync_core::wire::OperationMessage;
use modelsync_core::{BranchCoordinator, CommitOutcome, Operation, OperationLog, PropertyValue};

// ===========================================================================
// Helpers
// ===========================================================================

fn status_of(model: &Model, element: &str) -> Option<String> {
    model
        .element(element)?
        .property("status")?
        .scalar()?
        .as_str()
        .map(str::to_string)
}

fn set_status(element: &str, value: &str) -> Operation {
    Operation::set_property(element, "status", PropertyValue::string(value))
}

fn ids(ops: &[Operation]) -> Vec<uuid::Uuid> {
    ops.iter().map(|op| op.id).collect()
}

/// A coordinator whose primary branch holds entity `E` with `status = "A"`.
fn baseline() -> BranchCoordinator {
    let coordinator = BranchCoordinator::default();
    coordinator
        .apply_local("public", Operation::create_element("E", Some("Task")))
        .unwrap();
    coordinator.apply_local("public", set_status("E", "A")).unwrap();
    coordinator
}

// ===========================================================================
// Replay
// ===========================================================================

#[test]
fn test_replay_is_deterministic() {
    let coordinator = baseline();
    coordinator.checkout("alice").unwrap();
    coordinator
        .apply_local(
            "alice",
            Operation::add_to_list("E", "steps", PropertyValue::string("one"), None),
        )
        .unwrap();
    coordinator
        .apply_local(
            "alice",
            Operation::update_map_entry("E", "labels", "Owner", PropertyValue::string("ops")),
        )
        .unwrap();
    coordinator
        .apply_local(
            "alice",
            Operation::add_to_set("E", "tags", PropertyValue::string("urgent")),
        )
        .unwrap();

    let history = coordinator.history("alice").unwrap();
    let mut first = Model::new("replay-1");
    let mut second = Model::new("replay-2");
    first.apply_all(&history, ApplyMode::Replaying).unwrap();
    second.apply_all(&history, ApplyMode::Replaying).unwrap();

    assert_eq!(first.state(), second.state());
    assert_eq!(first.state(), coordinator.model("alice").unwrap().state());
}

#[test]
fn test_list_insertion_edge_cases() {
    let coordinator = BranchCoordinator::default();
    let first = coordinator
        .apply_local(
            "alice",
            Operation::add_to_list("E", "steps", PropertyValue::string("first"), None),
        )
        .unwrap();
    coordinator
        .apply_local(
            "alice",
            Operation::add_to_list("E", "steps", PropertyValue::string("head"), None),
        )
        .unwrap();
    coordinator
        .apply_local(
            "alice",
            Operation::add_to_list(
                "E",
                "steps",
                PropertyValue::string("tail"),
                Some("no-such-position"),
            ),
        )
        .unwrap();
    coordinator
        .apply_local(
            "alice",
            Operation::add_to_list(
                "E",
                "steps",
                PropertyValue::string("second"),
                Some(first.simple().to_string().as_str()),
            ),
        )
        .unwrap();

    let model = coordinator.model("alice").unwrap();
    let values: Vec<&str> = model
        .element("E")
        .unwrap()
        .property("steps")
        .unwrap()
        .list()
        .iter()
        .filter_map(|entry| entry.value.as_str())
        .collect();
    assert_eq!(values, vec!["head", "first", "second", "tail"]);
}

#[test]
fn test_set_and_map_idempotence() {
    let coordinator = BranchCoordinator::default();
    let tag = PropertyValue::string("urgent");
    for op in [
        Operation::add_to_set("E", "tags", tag.clone()),
        Operation::add_to_set("E", "tags", tag.clone()),
        Operation::remove_from_set("E", "tags", PropertyValue::string("absent")),
        Operation::remove_map_entry("E", "labels", "missing"),
    ] {
        coordinator.apply_local("alice", op).unwrap();
    }

    let model = coordinator.model("alice").unwrap();
    let element = model.element("E").unwrap();
    let tags = element.property("tags").unwrap();
    assert_eq!(tags.set_values().collect::<Vec<_>>(), vec![&tag]);
    assert!(tags.set_contains(&tag));
    assert!(!tags.set_contains(&PropertyValue::string("absent")));
    assert_eq!(element.property("labels").unwrap().map_entries().count(), 0);
}

// ===========================================================================
// Log structure
// ===========================================================================

#[test]
fn test_lca_and_path_consistency() {
    let mut log = OperationLog::new("public");
    let base = log
        .append("public", Operation::create_element("E", None))
        .unwrap();
    log.set_token("alice", base).unwrap();
    log.set_token("bob", base).unwrap();

    log.append("alice", set_status("E", "a1")).unwrap();
    let alice_tip = log.append("alice", set_status("E", "a2")).unwrap();
    log.append("bob", set_status("E", "b1")).unwrap();

    let ancestor = log.lowest_common_ancestor("alice", "bob").unwrap();
    assert_eq!(ancestor, base);

    // The nearest common ancestor: nothing past it is shared.
    let alice_path = log.path_exclusive(ancestor, alice_tip).unwrap();
    let bob_path = log.path_exclusive(ancestor, log.tip_id("bob")).unwrap();
    assert!(alice_path.iter().all(|id| !bob_path.contains(id)));

    log.set_token("base", ancestor).unwrap();
    let mut rebuilt = ids(&log.full_history("base").unwrap());
    rebuilt.extend(alice_path);
    assert_eq!(rebuilt, ids(&log.full_history("alice").unwrap()));
}

// ===========================================================================
// Update and commit
// ===========================================================================

#[test]
fn test_conflict_scenario_longer_delta_wins() {
    let coordinator = baseline();
    coordinator.checkout("L").unwrap();
    coordinator.apply_local("L", set_status("E", "L1")).unwrap();
    let p1 = coordinator.apply_local("public", set_status("E", "P1")).unwrap();
    let p2 = coordinator.apply_local("public", set_status("E", "P2")).unwrap();

    let report = coordinator.update_with_report("L").unwrap();
    assert_eq!(report.conflicts.len(), 1);
    let conflict = &report.conflicts[0];
    assert_eq!(conflict.conflict_type, ConflictType::PropertyWrite);
    assert_eq!(conflict.element_id(), "E");
    assert_eq!(conflict.property_name(), Some("status"));
    assert_eq!(conflict.right.id, p2);

    assert_eq!(report.resolutions.len(), 1);
    let resolution = &report.resolutions[0];
    assert_ne!(resolution.id, p1);
    assert_ne!(resolution.id, p2);
    assert_eq!(resolution.kind, set_status("E", "P2").kind);

    let model = coordinator.model("L").unwrap();
    assert_eq!(status_of(&model, "E").as_deref(), Some("P2"));
    assert_eq!(
        status_of(&coordinator.model("public").unwrap(), "E").as_deref(),
        Some("P2")
    );
}

#[test]
fn test_update_without_public_changes_is_noop() {
    let coordinator = baseline();
    coordinator.checkout("alice").unwrap();
    coordinator.apply_local("alice", set_status("E", "mine")).unwrap();
    let before = coordinator.model("alice").unwrap();
    let history_before = coordinator.history("alice").unwrap();

    assert!(coordinator.update("alice").unwrap().is_empty());
    let report = coordinator.update_with_report("alice").unwrap();
    assert!(report.conflicts.is_empty());
    assert!(report.resolutions.is_empty());

    assert_eq!(coordinator.model("alice").unwrap().state(), before.state());
    assert_eq!(coordinator.history("alice").unwrap(), history_before);
}

#[test]
fn test_update_absorbs_non_conflicting_changes() {
    let coordinator = baseline();
    coordinator.checkout("alice").unwrap();
    coordinator
        .apply_local("alice", Operation::create_element("mine", None))
        .unwrap();
    coordinator
        .apply_local("public", Operation::create_element("theirs", None))
        .unwrap();

    let report = coordinator.update_with_report("alice").unwrap();
    assert_eq!(report.absorbed.len(), 1);
    assert!(report.conflicts.is_empty());

    let model = coordinator.model("alice").unwrap();
    assert!(model.element("mine").is_some());
    assert!(model.element("theirs").is_some());
    // Absorbed operations are not re-recorded on the branch.
    assert_eq!(coordinator.history("alice").unwrap().len(), 3);
}

#[test]
fn test_fast_forward_commit() {
    let coordinator = baseline();
    coordinator.checkout("alice").unwrap();
    coordinator.apply_local("alice", set_status("E", "done")).unwrap();
    coordinator
        .apply_local("alice", Operation::delete_element("E"))
        .unwrap();

    let published = coordinator.commit("alice").unwrap();
    assert_eq!(published.len(), 2);
    assert_eq!(
        ids(&coordinator.history("public").unwrap()),
        ids(&coordinator.history("alice").unwrap())
    );
    assert_eq!(coordinator.model("public").unwrap().elements().count(), 0);

    // A second branch created now starts from the committed state.
    coordinator.checkout("bob").unwrap();
    assert!(coordinator.model("bob").unwrap().element("E").is_none());
}

#[test]
fn test_checkout_after_update_rebuilds_from_branch_history() {
    let coordinator = baseline();
    coordinator.checkout("alice").unwrap();
    coordinator
        .apply_local("alice", Operation::create_element("mine", None))
        .unwrap();
    coordinator
        .apply_local("public", Operation::create_element("theirs", None))
        .unwrap();

    coordinator.update("alice").unwrap();
    assert!(coordinator.model("alice").unwrap().element("theirs").is_some());

    // Absorbed primary operations are not on the branch's chain, so a fresh
    // replay of the branch history no longer contains them.
    coordinator.checkout("alice").unwrap();
    let model = coordinator.model("alice").unwrap();
    assert!(model.element("theirs").is_none());
    assert!(model.element("mine").is_some());
    assert_eq!(status_of(&model, "E").as_deref(), Some("A"));
}

#[test]
fn test_commit_rejected_after_public_moved() {
    let coordinator = baseline();
    coordinator.checkout("alice").unwrap();
    coordinator.apply_local("alice", set_status("E", "mine")).unwrap();
    coordinator.apply_local("public", set_status("E", "theirs")).unwrap();

    let outcome = coordinator.commit_with_outcome("alice").unwrap();
    assert_eq!(outcome, CommitOutcome::Rejected { pending: 1 });
    assert_eq!(
        status_of(&coordinator.model("public").unwrap(), "E").as_deref(),
        Some("theirs")
    );
}

// ===========================================================================
// Listeners and transport
// ===========================================================================

#[tokio::test]
async fn test_subscribe_sees_history_then_live_operations() {
    let coordinator = baseline();
    let (history, mut subscription) = coordinator.subscribe("public").unwrap();
    assert_eq!(history.len(), 2);

    let live = coordinator.apply_local("public", set_status("E", "B")).unwrap();
    let received = subscription.recv().await.unwrap();
    assert_eq!(received.id, live);
    assert!(history.iter().all(|op| op.id != live));
}

#[test]
fn test_update_publishes_resolutions_to_branch_listeners() {
    let coordinator = baseline();
    coordinator.checkout("L").unwrap();
    coordinator.apply_local("L", set_status("E", "L1")).unwrap();
    coordinator.apply_local("L", set_status("E", "L2")).unwrap();
    coordinator.apply_local("L", set_status("E", "L3")).unwrap();
    coordinator
        .apply_local(
            "L",
            Operation::add_to_set("E", "tags", PropertyValue::string("mine")),
        )
        .unwrap();
    for value in ["P1", "P2", "P3", "P4", "P5"] {
        coordinator.apply_local("public", set_status("E", value)).unwrap();
    }
    coordinator
        .apply_local(
            "public",
            Operation::add_to_set("E", "tags", PropertyValue::string("theirs")),
        )
        .unwrap();

    let (history, mut subscription) = coordinator.subscribe("L").unwrap();
    assert_eq!(history.len(), 6);

    let resolutions = coordinator.update("L").unwrap();
    assert_eq!(resolutions.len(), 2);

    let mut received = Vec::new();
    while let Some(op) = subscription.try_recv() {
        received.push(op.id);
    }
    assert_eq!(received, ids(&resolutions));
}

#[test]
fn test_wire_message_drives_a_branch() {
    let coordinator = BranchCoordinator::default();
    let json = r#"{
        "type": "SetProperty",
        "element_id": "E",
        "property_name": "status",
        "value": "from-wire"
    }"#;
    let message: OperationMessage = serde_json::from_str(json).unwrap();
    let op = message.into_operation("alice").unwrap();
    coordinator.apply_local("alice", op).unwrap();

    let model = coordinator.model("alice").unwrap();
    assert_eq!(status_of(&model, "E").as_deref(), Some("from-wire"));
}

#[test]
fn test_concurrent_branches_share_one_log() {
    let coordinator = Arc::new(BranchCoordinator::default());
    let handles: Vec<_> = (0..4)
        .map(|i| {
            let coordinator = Arc::clone(&coordinator);
            thread::spawn(move || {
                let branch = format!("worker-{i}");
                for n in 0..25 {
                    coordinator
                        .apply_local(&branch, set_status("E", &n.to_string()))
                        .unwrap();
                }
                branch
            })
        })
        .collect();

    for handle in handles {
        let branch = handle.join().unwrap();
        assert_eq!(coordinator.history(&branch).unwrap().len(), 25);
        let model = coordinator.model(&branch).unwrap();
        assert_eq!(status_of(&model, "E").as_deref(), Some("24"));
    }
    // 100 operations plus the root sentinel.
    assert_eq!(coordinator.snapshot().nodes.len(), 101);
}
