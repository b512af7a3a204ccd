//! In-world entities: rooms, items, players, exits.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::perms::PermissionSet;

/// Row id of an entity in the world store.
pub type EntityId = i64;

/// Id of an immutable script revision. Monotonic; "latest" = highest id.
pub type RevisionId = i64;

/// A single object in the containment graph.
///
/// Entities generalize rooms, items, players, and exits; what an entity
/// *is* comes from its data map and its attached script, not its type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    /// Globally unique, stable slug (e.g. "vera/teapot").
    pub shortname: String,
    /// Display name.
    pub name: String,
    /// Identity that authored (owns) this entity.
    pub author: String,
    /// Parent in the containment forest; `None` for roots.
    pub location: Option<EntityId>,
    /// Free-form string-keyed data, open schema.
    pub data: Map<String, Value>,
    pub perms: PermissionSet,
    /// Script container this entity's behavior lives in, if any.
    pub script_id: Option<i64>,
    /// Revision the entity is currently running, if any.
    pub current_rev: Option<RevisionId>,
    /// Connected-identity binding for player entities.
    pub bound_identity: Option<String>,
}

impl Entity {
    /// True for entities that stand in for a user identity.
    pub fn is_player(&self) -> bool {
        self.bound_identity.is_some()
    }

    pub fn description(&self) -> &str {
        self.data
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or("")
    }

    /// True if this entity is an exit. Exits carry an `exit` marker in
    /// their data; a `target` key alone is not enough, portkeys have
    /// one too.
    pub fn is_exit(&self) -> bool {
        self.data
            .get("exit")
            .map(|v| v.as_bool().unwrap_or(true))
            .unwrap_or(false)
    }

    /// Case-insensitive match of a search string against the display
    /// name or shortname, including substrings.
    pub fn fuzzy_match(&self, search: &str) -> bool {
        let search = search.to_lowercase();
        self.name.to_lowercase().contains(&search)
            || self.shortname.to_lowercase().contains(&search)
    }
}

/// Reduce a display name to a url-ish slug: lowercase alphanumerics
/// joined by single hyphens.
pub fn slugify(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_sep = false;
    for c in name.chars() {
        if c.is_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('-');
            }
            pending_sep = false;
            out.extend(c.to_lowercase());
        } else {
            pending_sep = true;
        }
    }
    if out.is_empty() {
        out.push_str("object");
    }
    out
}
