#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use burrow_core::WorldStore;
use burrow_runtime::{ClientSink, ClientState, RevisionOutcome, RevisionSubmit, World};

/// Captures everything the runtime sends to one client.
#[derive(Default)]
pub struct RecordingSink {
    lines: Mutex<Vec<String>>,
    states: Mutex<Vec<ClientState>>,
}

impl RecordingSink {
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }

    pub fn last_state(&self) -> Option<ClientState> {
        self.states.lock().unwrap().last().cloned()
    }

    pub fn state_count(&self) -> usize {
        self.states.lock().unwrap().len()
    }

    pub fn clear(&self) {
        self.lines.lock().unwrap().clear();
        self.states.lock().unwrap().clear();
    }
}

impl ClientSink for RecordingSink {
    fn deliver_text(&self, line: &str) {
        self.lines.lock().unwrap().push(line.to_owned());
    }

    fn push_state(&self, state: ClientState) {
        self.states.lock().unwrap().push(state);
    }
}

/// A fresh in-memory world with the foyer seeded.
pub fn world() -> World {
    let world = World::new(WorldStore::in_memory().unwrap());
    world.seed().unwrap();
    world
}

/// Register `identity` and connect it through a recording sink.
pub fn connect(world: &World, identity: &str) -> Arc<RecordingSink> {
    world.register_identity(identity).unwrap();
    let sink = Arc::new(RecordingSink::default());
    world.connect(identity, sink.clone()).unwrap();
    sink
}

/// Replace `shortname`'s charm with `code`, based on its live revision.
pub fn set_charm(world: &World, identity: &str, shortname: &str, code: &str) -> RevisionOutcome {
    let state = world.object_state(shortname).unwrap();
    world
        .submit_revision(
            identity,
            &RevisionSubmit {
                shortname: shortname.to_owned(),
                code: code.to_owned(),
                current_rev: state.current_rev,
            },
        )
        .unwrap()
}
