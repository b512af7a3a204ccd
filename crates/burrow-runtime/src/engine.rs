//! Per-entity compiled engines and the hot-reload policy.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use burrow_core::{Entity, EntityId, RevisionId};
use burrow_script::{compile, CompiledCharm};

use crate::{World, WorldError};

/// Explicit engine lifecycle for one entity. Entities with no script
/// sit in `Compiled` with the shared built-ins-only unit at revision 0.
pub(crate) enum EngineState {
    Uncompiled,
    Compiled(Arc<CompiledCharm>, RevisionId),
}

#[derive(Default)]
pub(crate) struct EngineCache {
    by_entity: HashMap<EntityId, EngineState>,
    /// Entities on the same revision share one compiled unit.
    by_revision: HashMap<RevisionId, Arc<CompiledCharm>>,
    /// Revisions that already failed to compile, so a broken latest
    /// revision is not re-attempted (and re-logged) on every dispatch.
    failed: HashMap<EntityId, RevisionId>,
}

/// Revision id used for the built-ins-only engine of scriptless entities.
const NO_REVISION: RevisionId = 0;

impl World {
    /// Resolve the compiled engine for `entity`, reconciling a stale
    /// engine against the script's latest revision first.
    ///
    /// Reload is atomic: on a successful recompile the entity's
    /// `current_rev` and its engine advance together; on failure
    /// neither moves, the old engine stays authoritative, and the
    /// diagnostic is logged rather than propagated.
    pub(crate) fn engine_for(&self, entity: &Entity) -> Result<Arc<CompiledCharm>, WorldError> {
        let mut engines = self.engines.lock().unwrap();

        let (script_id, current_rev) = match (entity.script_id, entity.current_rev) {
            (Some(script_id), Some(rev)) => (script_id, rev),
            _ => {
                let unit = engines
                    .by_revision
                    .entry(NO_REVISION)
                    .or_insert_with(|| Arc::new(CompiledCharm::default()))
                    .clone();
                engines
                    .by_entity
                    .insert(entity.id, EngineState::Compiled(unit.clone(), NO_REVISION));
                return Ok(unit);
            }
        };

        match engines.by_entity.get(&entity.id) {
            Some(EngineState::Compiled(unit, compiled_rev)) => {
                let unit = unit.clone();
                let compiled_rev = *compiled_rev;
                let latest = {
                    let store = self.store();
                    store.latest_revision(script_id)?
                };
                let Some(latest) = latest else {
                    return Ok(unit);
                };
                if latest.id == compiled_rev || engines.failed.get(&entity.id) == Some(&latest.id)
                {
                    return Ok(unit);
                }
                // a newer revision appeared behind our back; hot reload
                match compile(&latest.code) {
                    Ok(new_unit) => {
                        let new_unit = Arc::new(new_unit);
                        engines.by_revision.insert(latest.id, new_unit.clone());
                        engines
                            .by_entity
                            .insert(entity.id, EngineState::Compiled(new_unit.clone(), latest.id));
                        engines.failed.remove(&entity.id);
                        let store = self.store();
                        store.set_current_revision(entity.id, latest.id)?;
                        store.merge_defaults(entity.id, &new_unit.defaults)?;
                        Ok(new_unit)
                    }
                    Err(err) => {
                        warn!(
                            shortname = %entity.shortname,
                            revision = latest.id,
                            error = %err,
                            "hot reload failed; keeping previous engine"
                        );
                        engines.failed.insert(entity.id, latest.id);
                        Ok(unit)
                    }
                }
            }
            None | Some(EngineState::Uncompiled) => {
                if let Some(unit) = engines.by_revision.get(&current_rev) {
                    let unit = unit.clone();
                    engines
                        .by_entity
                        .insert(entity.id, EngineState::Compiled(unit.clone(), current_rev));
                    let store = self.store();
                    store.merge_defaults(entity.id, &unit.defaults)?;
                    return Ok(unit);
                }
                let code = {
                    let store = self.store();
                    store
                        .revision(current_rev)?
                        .map(|rev| rev.code)
                        .unwrap_or_default()
                };
                match compile(&code) {
                    Ok(unit) => {
                        let unit = Arc::new(unit);
                        engines.by_revision.insert(current_rev, unit.clone());
                        engines
                            .by_entity
                            .insert(entity.id, EngineState::Compiled(unit.clone(), current_rev));
                        let store = self.store();
                        store.merge_defaults(entity.id, &unit.defaults)?;
                        Ok(unit)
                    }
                    Err(err) => {
                        // first build failed: stay Uncompiled so a later
                        // attempt can succeed, and surface the diagnostic
                        engines.by_entity.insert(entity.id, EngineState::Uncompiled);
                        Err(WorldError::Script(err))
                    }
                }
            }
        }
    }

    /// Install a freshly compiled unit for `entity` at `rev`. Used by
    /// the revision-submit path, which compiles before advancing.
    pub(crate) fn install_engine(
        &self,
        entity_id: EntityId,
        rev: RevisionId,
        unit: Arc<CompiledCharm>,
    ) {
        let mut engines = self.engines.lock().unwrap();
        engines.by_revision.insert(rev, unit.clone());
        engines
            .by_entity
            .insert(entity_id, EngineState::Compiled(unit, rev));
        engines.failed.remove(&entity_id);
    }

    /// Remember that `rev` does not compile, so dispatch keeps the
    /// previous engine without retrying it.
    pub(crate) fn mark_failed(&self, entity_id: EntityId, rev: RevisionId) {
        self.engines.lock().unwrap().failed.insert(entity_id, rev);
    }
}
