//! Integrated runtime for Burrow: the scripted-object engine cache,
//! the action router, and the world operations built on both.
//!
//! A [`World`] owns the store, the per-entity compiled engines, and the
//! registry of connected client sessions. Command handling for many
//! connections may call into one `World` concurrently; every mutating
//! path serializes per entity (see `router`), so at most one mutation
//! is in flight per entity at a time.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;

use burrow_core::{EntityId, StoreError, WorldStore};
use burrow_script::ScriptError;

mod engine;
pub mod editing;
pub mod ops;
pub mod router;
pub mod session;
pub mod templates;

pub use editing::{ObjectState, RevisionOutcome, RevisionSubmit};
pub use session::{ClientSink, ClientState, SessionRegistry};
pub use templates::Archetype;

/// Anything a world operation can fail with. Denial-style variants
/// render as the exact text shown to the user; none of them tears down
/// a connection or another entity's state.
#[derive(Debug, Error)]
pub enum WorldError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(";_; there is a problem with your charm: {0}")]
    Script(#[from] ScriptError),

    #[error("You look in vain for {0}.")]
    NotFound(String),

    #[error("{0}")]
    PermissionDenied(String),

    #[error("Bad contain event: {0}")]
    InvalidContainEvent(String),

    #[error("That object is already being edited.")]
    AlreadyLocked,

    /// The caller's `current_rev` is stale; the live state rides along
    /// so the client can resynchronize.
    #[error("Revision mismatch for {}; reload before editing again.", .0.shortname)]
    RevisionConflict(Box<ObjectState>),

    #[error("{0} is already connected.")]
    AlreadyConnected(String),

    #[error("Malformed request: {0}")]
    MalformedPayload(String),
}

/// The shared world: storage, compiled engines, connected sessions.
pub struct World {
    store: Mutex<WorldStore>,
    engines: Mutex<engine::EngineCache>,
    sessions: SessionRegistry,
    entity_locks: Mutex<HashMap<EntityId, Arc<Mutex<()>>>>,
}

impl World {
    pub fn new(store: WorldStore) -> Self {
        Self {
            store: Mutex::new(store),
            engines: Mutex::new(engine::EngineCache::default()),
            sessions: SessionRegistry::default(),
            entity_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Direct access to the store, serialized behind the world's lock.
    pub fn store(&self) -> MutexGuard<'_, WorldStore> {
        self.store.lock().unwrap()
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// The mutex serializing handler invocations on one entity.
    fn entity_lock(&self, id: EntityId) -> Arc<Mutex<()>> {
        let mut locks = self.entity_locks.lock().unwrap();
        locks.entry(id).or_default().clone()
    }
}
