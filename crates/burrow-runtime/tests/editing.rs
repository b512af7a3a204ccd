mod common;

use burrow_core::{Capability, PermLevel};
use burrow_runtime::{RevisionSubmit, WorldError};

fn shared_item(world: &burrow_runtime::World, author: &str, name: &str) -> String {
    let item = world.create_item(author, name, None).unwrap();
    world
        .store()
        .set_perm(item.id, Capability::Write, PermLevel::World)
        .unwrap();
    item.shortname
}

#[test]
fn test_request_edit_returns_lockable_snapshot() {
    let world = common::world();
    common::connect(&world, "alice");
    world.create_item("alice", "ball", None).unwrap();
    let state = world.request_edit("alice", "alice/ball").unwrap();
    assert!(state.edit);
    assert_eq!(state.shortname, "alice/ball");
    assert!(state.code.contains("(charm"));
    assert!(state.current_rev > 0);
}

#[test]
fn test_edit_lock_is_exclusive() {
    let world = common::world();
    common::connect(&world, "alice");
    common::connect(&world, "bob");
    let ball = shared_item(&world, "alice", "ball");

    world.request_edit("alice", &ball).unwrap();
    let err = world.request_edit("bob", &ball).unwrap_err();
    assert!(matches!(err, WorldError::AlreadyLocked));
    assert_eq!(err.to_string(), "That object is already being edited.");

    // even the holder has to release (or submit) before re-locking
    let err = world.request_edit("alice", &ball).unwrap_err();
    assert!(matches!(err, WorldError::AlreadyLocked));
    world.release_edit("alice").unwrap();
    world.request_edit("alice", &ball).unwrap();
}

#[test]
fn test_starting_a_new_edit_releases_the_old_lock() {
    let world = common::world();
    common::connect(&world, "alice");
    common::connect(&world, "bob");
    let x = shared_item(&world, "alice", "x");
    let y = shared_item(&world, "alice", "y");

    world.request_edit("alice", &x).unwrap();
    // alice wanders off to edit y; her lock on x must not linger
    world.request_edit("alice", &y).unwrap();
    world.request_edit("bob", &x).unwrap();
    // but y is now hers
    let err = world.request_edit("bob", &y).unwrap_err();
    assert!(matches!(err, WorldError::AlreadyLocked));
}

#[test]
fn test_request_edit_needs_write() {
    let world = common::world();
    common::connect(&world, "alice");
    common::connect(&world, "bob");
    world.create_item("alice", "ball", None).unwrap();
    let err = world.request_edit("bob", "alice/ball").unwrap_err();
    assert!(matches!(err, WorldError::PermissionDenied(_)));
}

#[test]
fn test_disconnect_releases_edit_lock() {
    let world = common::world();
    common::connect(&world, "alice");
    common::connect(&world, "bob");
    let ball = shared_item(&world, "alice", "ball");

    world.request_edit("alice", &ball).unwrap();
    world.disconnect("alice").unwrap();
    world.request_edit("bob", &ball).unwrap();
}

#[test]
fn test_submit_releases_lock() {
    let world = common::world();
    common::connect(&world, "alice");
    common::connect(&world, "bob");
    let ball = shared_item(&world, "alice", "ball");

    let state = world.request_edit("alice", &ball).unwrap();
    world
        .submit_revision(
            "alice",
            &RevisionSubmit {
                shortname: ball.clone(),
                code: "(charm \"ball\" (on \"poke\" (say \"ow\")))".to_owned(),
                current_rev: state.current_rev,
            },
        )
        .unwrap();
    world.request_edit("bob", &ball).unwrap();
}

#[test]
fn test_unchanged_code_mints_no_revision() {
    let world = common::world();
    common::connect(&world, "alice");
    world.create_item("alice", "ball", None).unwrap();
    let state = world.request_edit("alice", "alice/ball").unwrap();
    let outcome = world
        .submit_revision(
            "alice",
            &RevisionSubmit {
                shortname: "alice/ball".to_owned(),
                code: state.code.clone(),
                current_rev: state.current_rev,
            },
        )
        .unwrap();
    assert!(outcome.errors.is_empty());
    assert_eq!(outcome.state.current_rev, state.current_rev);
}

#[test]
fn test_revisions_advance_strictly_and_stay_immutable() {
    let world = common::world();
    common::connect(&world, "alice");
    world.create_item("alice", "ball", None).unwrap();

    let v1 = world.object_state("alice/ball").unwrap();
    let v2 = common::set_charm(
        &world,
        "alice",
        "alice/ball",
        "(charm \"ball\" (on \"poke\" (say \"one\")))",
    );
    assert!(v2.state.current_rev > v1.current_rev);
    let v3 = common::set_charm(
        &world,
        "alice",
        "alice/ball",
        "(charm \"ball\" (on \"poke\" (say \"two\")))",
    );
    assert!(v3.state.current_rev > v2.state.current_rev);

    // earlier revisions are still there, byte for byte
    let old = world
        .store()
        .revision(v2.state.current_rev)
        .unwrap()
        .unwrap();
    assert!(old.code.contains("one"));
}

#[test]
fn test_concurrent_submits_on_one_revision_admit_exactly_one() {
    let world = common::world();
    common::connect(&world, "alice");
    common::connect(&world, "bob");
    let ball = shared_item(&world, "alice", "ball");
    let base = world.object_state(&ball).unwrap();

    let results: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = ["alice", "bob"]
            .into_iter()
            .map(|who| {
                let world = &world;
                let ball = &ball;
                let base_rev = base.current_rev;
                scope.spawn(move || {
                    world.submit_revision(
                        who,
                        &RevisionSubmit {
                            shortname: ball.clone(),
                            code: format!("(charm \"ball\" (on \"poke\" (say \"{who}\")))"),
                            current_rev: base_rev,
                        },
                    )
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let accepted = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(accepted, 1, "one writer wins, the other conflicts");
    let conflict = results.into_iter().find_map(Result::err).unwrap();
    match conflict {
        WorldError::RevisionConflict(live) => {
            assert!(live.current_rev > base.current_rev);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_stale_revision_is_a_conflict_with_live_state() {
    let world = common::world();
    common::connect(&world, "alice");
    common::connect(&world, "bob");
    let ball = shared_item(&world, "alice", "ball");

    let stale = world.object_state(&ball).unwrap();
    let fresh = common::set_charm(
        &world,
        "alice",
        &ball,
        "(charm \"ball\" (on \"poke\" (say \"alice was here\")))",
    );

    let err = world
        .submit_revision(
            "bob",
            &RevisionSubmit {
                shortname: ball.clone(),
                code: "(charm \"ball\" (on \"poke\" (say \"bob was here\")))".to_owned(),
                current_rev: stale.current_rev,
            },
        )
        .unwrap_err();
    match err {
        WorldError::RevisionConflict(live) => {
            assert_eq!(live.current_rev, fresh.state.current_rev);
            assert!(live.code.contains("alice was here"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_conflict_leaves_live_revision_untouched() {
    let world = common::world();
    common::connect(&world, "alice");
    common::connect(&world, "bob");
    let ball = shared_item(&world, "alice", "ball");
    let stale = world.object_state(&ball).unwrap();
    let fresh = common::set_charm(
        &world,
        "alice",
        &ball,
        "(charm \"ball\" (on \"poke\" (say \"kept\")))",
    );

    let _ = world.submit_revision(
        "bob",
        &RevisionSubmit {
            shortname: ball.clone(),
            code: "(charm \"ball\")".to_owned(),
            current_rev: stale.current_rev,
        },
    );
    let live = world.object_state(&ball).unwrap();
    assert_eq!(live.current_rev, fresh.state.current_rev);
    assert!(live.code.contains("kept"));
}
