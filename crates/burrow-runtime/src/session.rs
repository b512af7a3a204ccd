//! Connected-client sessions.
//!
//! The runtime never touches a transport directly; a connected identity
//! hands over a [`ClientSink`] and everything outbound goes through it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

/// Outbound half of one connected client.
pub trait ClientSink: Send + Sync {
    /// A line of game text for this client.
    fn deliver_text(&self, line: &str);

    /// A fresh snapshot of everything the client renders.
    fn push_state(&self, state: ClientState);
}

/// What a client sees: itself, its room, and its inventory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientState {
    pub user: UserView,
    pub room: RoomView,
    pub inventory: Vec<ItemView>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserView {
    pub shortname: String,
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomView {
    pub shortname: String,
    pub name: String,
    pub description: String,
    pub contains: Vec<ItemView>,
    pub exits: Vec<ExitView>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitView {
    pub shortname: String,
    pub name: String,
    /// Shortname of the room the exit leads to.
    pub target: String,
}

/// One node of the inventory/room-contents tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemView {
    pub shortname: String,
    pub name: String,
    pub contains: Vec<ItemView>,
}

/// Identity name -> sink, for every currently connected client.
#[derive(Default)]
pub struct SessionRegistry {
    sinks: Mutex<HashMap<String, Arc<dyn ClientSink>>>,
}

impl SessionRegistry {
    /// Attach a sink for `identity`. Returns false (and leaves the
    /// existing sink in place) if the identity is already connected.
    pub fn insert(&self, identity: &str, sink: Arc<dyn ClientSink>) -> bool {
        let mut sinks = self.sinks.lock().unwrap();
        if sinks.contains_key(identity) {
            return false;
        }
        sinks.insert(identity.to_owned(), sink);
        true
    }

    pub fn remove(&self, identity: &str) -> bool {
        self.sinks.lock().unwrap().remove(identity).is_some()
    }

    pub fn is_connected(&self, identity: &str) -> bool {
        self.sinks.lock().unwrap().contains_key(identity)
    }

    pub fn sink(&self, identity: &str) -> Option<Arc<dyn ClientSink>> {
        self.sinks.lock().unwrap().get(identity).cloned()
    }

    /// Deliver a line to `identity`, silently dropping it if the
    /// identity is not connected.
    pub fn deliver_text(&self, identity: &str, line: &str) {
        if let Some(sink) = self.sink(identity) {
            sink.deliver_text(line);
        }
    }

    pub fn connected(&self) -> Vec<String> {
        self.sinks.lock().unwrap().keys().cloned().collect()
    }
}
