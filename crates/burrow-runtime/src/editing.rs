//! Charm editing: edit locks, object snapshots, and revision submit.
//!
//! Editing is optimistic all the way down. A client asks to edit, gets
//! an exclusive lock plus a snapshot carrying `current_rev`, and hands
//! that revision back on submit; a stale revision is a conflict that
//! ships the live snapshot so the client can resynchronize instead of
//! silently clobbering someone else's work.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::info;

use burrow_core::{Capability, Entity, PermissionSet, RevisionId};
use burrow_script::compile;

use crate::{World, WorldError};

/// Everything a client needs to render and edit one object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectState {
    pub shortname: String,
    pub name: String,
    pub data: Map<String, Value>,
    pub permissions: PermissionSet,
    pub code: String,
    pub current_rev: RevisionId,
    /// True when this snapshot was handed out with an edit lock.
    #[serde(default)]
    pub edit: bool,
}

/// The submit payload: the code plus the revision it was based on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevisionSubmit {
    pub shortname: String,
    pub code: String,
    pub current_rev: RevisionId,
}

/// Snapshot plus any compile diagnostics from the submitted code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevisionOutcome {
    #[serde(flatten)]
    pub state: ObjectState,
    pub errors: Vec<String>,
}

impl World {
    /// Lock `target` for editing by `identity` and return its state.
    /// Taking a new lock releases any lock the identity already held
    /// elsewhere.
    pub fn request_edit(&self, identity: &str, target: &str) -> Result<ObjectState, WorldError> {
        let store = self.store();
        let entity = store
            .entity_by_shortname(target)?
            .ok_or_else(|| WorldError::NotFound(target.to_owned()))?;
        if !entity
            .perms
            .allows(Capability::Write, identity, &entity.author)
        {
            return Err(WorldError::PermissionDenied(format!(
                "You lack the authority to edit {}",
                entity.name
            )));
        }
        // any existing lock denies, the requester's own included; an
        // abandoned edit has to be released (or submitted) first
        if store.lock_for_entity(entity.id)?.is_some() {
            return Err(WorldError::AlreadyLocked);
        }
        store.acquire_lock(identity, entity.id)?;
        info!(identity, shortname = %entity.shortname, "edit lock taken");
        object_state(&store, &entity, true)
    }

    /// Drop whatever edit lock `identity` holds.
    pub fn release_edit(&self, identity: &str) -> Result<(), WorldError> {
        self.store().release_lock(identity)?;
        Ok(())
    }

    /// Accept an edited charm. The identity's lock is released no
    /// matter what. Unchanged code returns the live state without
    /// minting a revision; a stale `current_rev` is a conflict carrying
    /// the live state. Code that fails to compile is still saved (work
    /// in progress shouldn't be held hostage), with the diagnostics in
    /// `errors` and the previous working engine left live.
    pub fn submit_revision(
        &self,
        identity: &str,
        submit: &RevisionSubmit,
    ) -> Result<RevisionOutcome, WorldError> {
        let code = submit.code.trim();
        let (entity, script_id) = {
            let store = self.store();
            let entity = store
                .entity_by_shortname(&submit.shortname)?
                .ok_or_else(|| WorldError::NotFound(submit.shortname.clone()))?;
            store.release_lock(identity)?;

            let (Some(script_id), Some(live_rev)) = (entity.script_id, entity.current_rev) else {
                return Err(WorldError::MalformedPayload(format!(
                    "{} has no script attached",
                    submit.shortname
                )));
            };
            let live_code = store
                .revision(live_rev)?
                .map(|rev| rev.code)
                .unwrap_or_default();

            if live_code.trim() == code {
                let state = object_state(&store, &entity, false)?;
                return Ok(RevisionOutcome {
                    state,
                    errors: Vec::new(),
                });
            }
            if !entity
                .perms
                .allows(Capability::Write, identity, &entity.author)
            {
                return Err(WorldError::PermissionDenied(format!(
                    "You lack the authority to edit {}",
                    entity.name
                )));
            }
            if live_rev != submit.current_rev {
                let state = object_state(&store, &entity, false)?;
                return Err(WorldError::RevisionConflict(Box::new(state)));
            }
            (entity, script_id)
        };

        let mut errors = Vec::new();
        let compiled = match compile(code) {
            Ok(unit) => Some(std::sync::Arc::new(unit)),
            Err(err) => {
                errors.push(err.to_string());
                None
            }
        };

        let (state, rev) = {
            let store = self.store();
            // the store guard was dropped for compilation; a concurrent
            // submit may have advanced the revision in the meantime
            let entity = store
                .get_entity(entity.id)?
                .ok_or_else(|| WorldError::NotFound(submit.shortname.clone()))?;
            if entity.current_rev != Some(submit.current_rev) {
                let state = object_state(&store, &entity, false)?;
                return Err(WorldError::RevisionConflict(Box::new(state)));
            }
            let rev = store.create_revision(script_id, code)?;
            store.set_current_revision(entity.id, rev)?;
            if let Some(unit) = &compiled {
                store.merge_defaults(entity.id, &unit.defaults)?;
            }
            let entity = store
                .get_entity(entity.id)?
                .ok_or_else(|| WorldError::NotFound(submit.shortname.clone()))?;
            (object_state(&store, &entity, false)?, rev)
        };
        match compiled {
            Some(unit) => self.install_engine(entity.id, rev, unit),
            None => self.mark_failed(entity.id, rev),
        }
        info!(identity, shortname = %state.shortname, rev, "revision saved");
        Ok(RevisionOutcome { state, errors })
    }

    /// The live state of one entity, without touching locks.
    pub fn object_state(&self, shortname: &str) -> Result<ObjectState, WorldError> {
        let store = self.store();
        let entity = store
            .entity_by_shortname(shortname)?
            .ok_or_else(|| WorldError::NotFound(shortname.to_owned()))?;
        object_state(&store, &entity, false)
    }
}

fn object_state(
    store: &burrow_core::WorldStore,
    entity: &Entity,
    edit: bool,
) -> Result<ObjectState, WorldError> {
    let code = match entity.current_rev {
        Some(rev) => store.revision(rev)?.map(|r| r.code).unwrap_or_default(),
        None => String::new(),
    };
    Ok(ObjectState {
        shortname: entity.shortname.clone(),
        name: entity.name.clone(),
        data: entity.data.clone(),
        permissions: entity.perms.clone(),
        code,
        current_rev: entity.current_rev.unwrap_or(0),
        edit,
    })
}
