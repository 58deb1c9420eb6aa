use fieldwork_core::FieldValue;
use fieldwork_datastore::{FallbackPolicy, Query, Resolution};
use fieldwork_harness::{init_logging, Replicator, TestPeer};

/// Seeds a document on alice, syncs it to bob and lets both sides edit it
/// concurrently, then syncs again so both see the conflict.
fn diverge(
    alice: &mut TestPeer,
    bob: &mut TestPeer,
    replicator: &mut Replicator,
    edit_a: impl FnOnce(&mut fieldwork_core::Document),
    edit_b: impl FnOnce(&mut fieldwork_core::Document),
) -> fieldwork_core::ResourceId {
    let base = alice.create("f1", "Feature").unwrap();
    replicator.sync(alice, bob).unwrap();

    let mut left = alice.get(base.id()).unwrap();
    edit_a(&mut left);
    alice.update(&left).unwrap();

    let mut right = bob.get(base.id()).unwrap();
    edit_b(&mut right);
    bob.update(&right).unwrap();

    replicator.sync(alice, bob).unwrap();
    base.id()
}

#[test]
fn both_peers_elect_the_same_winner() {
    init_logging();
    let mut alice = TestPeer::new("alice").unwrap();
    let mut bob = TestPeer::new("bob").unwrap();
    let mut replicator = Replicator::new();

    let id = diverge(
        &mut alice,
        &mut bob,
        &mut replicator,
        |d| {
            d.resource
                .fields
                .insert("color".into(), FieldValue::Text("red".into()));
        },
        |d| {
            d.resource
                .fields
                .insert("color".into(), FieldValue::Text("blue".into()));
        },
    );

    let on_alice = alice.get(id).unwrap();
    let on_bob = bob.get(id).unwrap();
    assert_eq!(on_alice.revision_id, on_bob.revision_id);
    assert_eq!(on_alice.resource, on_bob.resource);
    assert_eq!(on_alice.conflicts.len(), 1);
    assert_eq!(on_alice.conflicts, on_bob.conflicts);
}

#[test]
fn disjoint_edits_merge_without_losses() {
    init_logging();
    let mut alice = TestPeer::new("alice").unwrap();
    let mut bob = TestPeer::new("bob").unwrap();
    let mut replicator = Replicator::new();

    let id = diverge(
        &mut alice,
        &mut bob,
        &mut replicator,
        |d| {
            d.resource
                .fields
                .insert("color".into(), FieldValue::Text("red".into()));
        },
        |d| {
            d.resource
                .fields
                .insert("depth".into(), FieldValue::Float(1.2));
        },
    );

    let resolution = alice.resolver().resolve(id, FallbackPolicy::Manual).unwrap();
    let merged = match resolution {
        Resolution::Merged(document) => document,
        other => panic!("expected a full merge, got {other:?}"),
    };
    assert_eq!(
        merged.resource.fields.get("color").and_then(|v| v.as_text()),
        Some("red")
    );
    assert_eq!(
        merged.resource.fields.get("depth"),
        Some(&FieldValue::Float(1.2))
    );
    assert!(alice.get(id).unwrap().conflicts.is_empty());
}

#[test]
fn scalar_divergence_resolves_deterministically() {
    init_logging();
    let mut alice = TestPeer::new("alice").unwrap();
    let mut bob = TestPeer::new("bob").unwrap();
    let mut replicator = Replicator::new();

    let id = diverge(
        &mut alice,
        &mut bob,
        &mut replicator,
        |d| {
            d.resource
                .fields
                .insert("color".into(), FieldValue::Text("red".into()));
        },
        |d| {
            d.resource
                .fields
                .insert("color".into(), FieldValue::Text("blue".into()));
        },
    );

    let first = alice.resolver().resolve(id, FallbackPolicy::Manual).unwrap();
    let merged = match first {
        Resolution::Merged(document) => document,
        other => panic!("expected a full merge, got {other:?}"),
    };
    assert!(alice.get(id).unwrap().conflicts.is_empty());

    // Resolving again is a no-op returning the same content.
    let second = alice.resolver().resolve(id, FallbackPolicy::Manual).unwrap();
    match second {
        Resolution::NoConflict(document) => {
            assert_eq!(document.resource, merged.resource);
        }
        other => panic!("expected no conflict, got {other:?}"),
    }
}

#[test]
fn resolution_replicates_to_the_other_peer() {
    init_logging();
    let mut alice = TestPeer::new("alice").unwrap();
    let mut bob = TestPeer::new("bob").unwrap();
    let mut replicator = Replicator::new();

    let id = diverge(
        &mut alice,
        &mut bob,
        &mut replicator,
        |d| {
            d.resource
                .fields
                .insert("color".into(), FieldValue::Text("red".into()));
        },
        |d| {
            d.resource
                .fields
                .insert("color".into(), FieldValue::Text("blue".into()));
        },
    );

    alice.resolver().resolve(id, FallbackPolicy::Manual).unwrap();
    replicator.sync(&mut alice, &mut bob).unwrap();

    let on_bob = bob.get(id).unwrap();
    assert!(on_bob.conflicts.is_empty());
    assert_eq!(on_bob.resource, alice.get(id).unwrap().resource);
}

#[test]
fn structural_divergence_reports_or_picks_an_alternative() {
    init_logging();
    let mut alice = TestPeer::new("alice").unwrap();
    let mut bob = TestPeer::new("bob").unwrap();
    let mut replicator = Replicator::new();

    let id = diverge(
        &mut alice,
        &mut bob,
        &mut replicator,
        |d| d.resource.identifier = "f1-alpha".to_string(),
        |d| d.resource.identifier = "f1-beta".to_string(),
    );

    // Manual policy: nothing is written, the disputed field is reported.
    let before = alice.get(id).unwrap();
    let manual = alice.resolver().resolve(id, FallbackPolicy::Manual).unwrap();
    match manual {
        Resolution::Unresolved { conflicted_fields, .. } => {
            assert_eq!(conflicted_fields, vec!["identifier".to_string()]);
        }
        other => panic!("expected an unresolved report, got {other:?}"),
    }
    assert_eq!(alice.get(id).unwrap().revision_id, before.revision_id);

    // Alternative policy: a deterministic winner is persisted as a fresh
    // revision, keeping the losing branch in history.
    let alternative = alice
        .resolver()
        .resolve(id, FallbackPolicy::Alternative)
        .unwrap();
    let written = match alternative {
        Resolution::Alternative(document) => document,
        other => panic!("expected an alternative resolution, got {other:?}"),
    };
    assert!(written.resource.identifier == "f1-alpha" || written.resource.identifier == "f1-beta");

    let after = alice.get(id).unwrap();
    assert_eq!(after.resource.identifier, written.resource.identifier);
    assert!(!after.conflicts.is_empty());
}

#[test]
fn removing_a_conflicted_winner_promotes_the_surviving_branch() {
    init_logging();
    let mut alice = TestPeer::new("alice").unwrap();
    let mut bob = TestPeer::new("bob").unwrap();
    let mut replicator = Replicator::new();

    let id = diverge(
        &mut alice,
        &mut bob,
        &mut replicator,
        |d| {
            d.resource
                .fields
                .insert("color".into(), FieldValue::Text("red".into()));
        },
        |d| {
            d.resource
                .fields
                .insert("color".into(), FieldValue::Text("blue".into()));
        },
    );

    // Tombstoning the winning revision leaves the losing branch alive;
    // the document must stay visible in cache and index.
    alice.datastore.remove(id).unwrap();

    let survivor = alice.get(id).unwrap();
    assert!(survivor.conflicts.is_empty());
    let visible = alice.find(&Query::all()).unwrap();
    assert_eq!(visible.len(), 1);
    assert_eq!(visible[0].id(), id);
    assert_eq!(visible[0].revision_id, survivor.revision_id);
}

#[test]
fn unconflicted_documents_resolve_to_a_noop() {
    init_logging();
    let mut alice = TestPeer::new("alice").unwrap();
    let created = alice.create("f1", "Feature").unwrap();

    let resolution = alice
        .resolver()
        .resolve(created.id(), FallbackPolicy::Manual)
        .unwrap();
    match resolution {
        Resolution::NoConflict(document) => {
            assert_eq!(document.revision_id, created.revision_id);
        }
        other => panic!("expected no conflict, got {other:?}"),
    }
}
