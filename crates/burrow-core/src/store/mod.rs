//! Sqlite-backed world storage.
//!
//! Everything durable lives here: the entity rows themselves, the
//! containment graph (as each entity's `location`; `contains` is the
//! derived inverse, so the containment invariant holds by construction),
//! append-only script revisions, edit locks, and last-seen rooms.

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

use crate::entity::{Entity, EntityId, RevisionId};
use crate::perms::{Capability, PermLevel, PermissionSet};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("corrupt row: {0}")]
    Json(#[from] serde_json::Error),
}

/// An immutable snapshot of a script's source, ordered by id.
#[derive(Debug, Clone, PartialEq)]
pub struct Revision {
    pub id: RevisionId,
    pub script_id: i64,
    pub code: String,
}

/// A single-writer claim on an entity's script.
#[derive(Debug, Clone, PartialEq)]
pub struct EditLock {
    pub identity: String,
    pub entity_id: EntityId,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS entities (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    shortname      TEXT NOT NULL UNIQUE,
    name           TEXT NOT NULL DEFAULT '',
    author         TEXT NOT NULL,
    location       INTEGER REFERENCES entities(id),
    data           TEXT NOT NULL DEFAULT '{}',
    perm_read      TEXT NOT NULL DEFAULT 'world',
    perm_write     TEXT NOT NULL DEFAULT 'owner',
    perm_carry     TEXT NOT NULL DEFAULT 'world',
    perm_execute   TEXT NOT NULL DEFAULT 'world',
    script_id      INTEGER REFERENCES scripts(id),
    current_rev    INTEGER REFERENCES revisions(id),
    bound_identity TEXT UNIQUE
);

CREATE TABLE IF NOT EXISTS scripts (
    id   INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS revisions (
    id        INTEGER PRIMARY KEY AUTOINCREMENT,
    script_id INTEGER NOT NULL REFERENCES scripts(id),
    code      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS edit_locks (
    identity  TEXT NOT NULL UNIQUE,
    entity_id INTEGER NOT NULL UNIQUE REFERENCES entities(id)
);

CREATE TABLE IF NOT EXISTS last_seen (
    identity TEXT PRIMARY KEY,
    room_id  INTEGER NOT NULL REFERENCES entities(id)
);

CREATE INDEX IF NOT EXISTS idx_entities_location ON entities(location);
CREATE INDEX IF NOT EXISTS idx_revisions_script ON revisions(script_id);
";

/// Handle on the world database.
pub struct WorldStore {
    conn: Connection,
}

impl WorldStore {
    /// Open (creating if necessary) a store at `path`.
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        debug!(path, "opened world store");
        Ok(Self { conn })
    }

    /// Fresh in-memory store, used by tests and throwaway worlds.
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    // ---- entities ----

    pub fn create_entity(
        &self,
        author: &str,
        shortname: &str,
        name: &str,
    ) -> Result<EntityId, StoreError> {
        self.conn.execute(
            "INSERT INTO entities (shortname, name, author) VALUES (?1, ?2, ?3)",
            params![shortname, name, author],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_entity(&self, id: EntityId) -> Result<Option<Entity>, StoreError> {
        self.conn
            .query_row(
                "SELECT * FROM entities WHERE id = ?1",
                params![id],
                row_to_entity,
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn entity_by_shortname(&self, shortname: &str) -> Result<Option<Entity>, StoreError> {
        self.conn
            .query_row(
                "SELECT * FROM entities WHERE shortname = ?1",
                params![shortname],
                row_to_entity,
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn entity_for_identity(&self, identity: &str) -> Result<Option<Entity>, StoreError> {
        self.conn
            .query_row(
                "SELECT * FROM entities WHERE bound_identity = ?1",
                params![identity],
                row_to_entity,
            )
            .optional()
            .map_err(Into::into)
    }

    /// Mark an entity as the in-world body of a user identity.
    pub fn bind_identity(&self, id: EntityId, identity: &str) -> Result<(), StoreError> {
        self.conn.execute(
            "UPDATE entities SET bound_identity = ?2 WHERE id = ?1",
            params![id, identity],
        )?;
        Ok(())
    }

    pub fn shortname_taken(&self, shortname: &str) -> Result<bool, StoreError> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM entities WHERE shortname = ?1",
            params![shortname],
            |row| row.get(0),
        )?;
        Ok(n > 0)
    }

    /// Number of entities currently authored by `author`. Used as the
    /// collision disambiguator when deriving shortnames.
    pub fn count_authored(&self, author: &str) -> Result<i64, StoreError> {
        self.conn
            .query_row(
                "SELECT COUNT(*) FROM entities WHERE author = ?1",
                params![author],
                |row| row.get(0),
            )
            .map_err(Into::into)
    }

    // ---- containment ----

    pub fn set_location(&self, id: EntityId, location: Option<EntityId>) -> Result<(), StoreError> {
        self.conn.execute(
            "UPDATE entities SET location = ?2 WHERE id = ?1",
            params![id, location],
        )?;
        Ok(())
    }

    /// Children of `id`: every entity whose `location` is `id`.
    pub fn contents(&self, id: EntityId) -> Result<Vec<Entity>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT * FROM entities WHERE location = ?1 ORDER BY id")?;
        let rows = stmt.query_map(params![id], row_to_entity)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Every entity placed somewhere in the world (i.e. with a parent).
    pub fn active_entities(&self) -> Result<Vec<Entity>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT * FROM entities WHERE location IS NOT NULL ORDER BY id")?;
        let rows = stmt.query_map([], row_to_entity)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    // ---- data ----

    pub fn data(&self, id: EntityId) -> Result<Map<String, Value>, StoreError> {
        let raw: String = self.conn.query_row(
            "SELECT data FROM entities WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )?;
        parse_data(&raw)
    }

    pub fn set_data_key(&self, id: EntityId, key: &str, value: Value) -> Result<(), StoreError> {
        let mut data = self.data(id)?;
        data.insert(key.to_string(), value);
        self.write_data(id, &data)
    }

    /// Merge `defaults` into the entity's data without overwriting any
    /// existing key. Idempotent; a second application with the same map
    /// changes nothing. No-op on an empty map.
    pub fn merge_defaults(
        &self,
        id: EntityId,
        defaults: &Map<String, Value>,
    ) -> Result<(), StoreError> {
        if defaults.is_empty() {
            return Ok(());
        }
        let mut data = self.data(id)?;
        let mut changed = false;
        for (key, value) in defaults {
            if !data.contains_key(key) {
                data.insert(key.clone(), value.clone());
                changed = true;
            }
        }
        if changed {
            self.write_data(id, &data)?;
        }
        Ok(())
    }

    fn write_data(&self, id: EntityId, data: &Map<String, Value>) -> Result<(), StoreError> {
        let raw = serde_json::to_string(data)?;
        self.conn.execute(
            "UPDATE entities SET data = ?2 WHERE id = ?1",
            params![id, raw],
        )?;
        Ok(())
    }

    // ---- permissions ----

    pub fn set_perm(
        &self,
        id: EntityId,
        cap: Capability,
        level: PermLevel,
    ) -> Result<(), StoreError> {
        let column = match cap {
            Capability::Read => "perm_read",
            Capability::Write => "perm_write",
            Capability::Carry => "perm_carry",
            Capability::Execute => "perm_execute",
        };
        let sql = format!("UPDATE entities SET {column} = ?2 WHERE id = ?1");
        self.conn.execute(&sql, params![id, level.as_str()])?;
        Ok(())
    }

    // ---- scripts & revisions ----

    pub fn create_script(&self, name: &str) -> Result<i64, StoreError> {
        self.conn
            .execute("INSERT INTO scripts (name) VALUES (?1)", params![name])?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Append a new immutable revision; its id strictly exceeds every
    /// earlier revision's.
    pub fn create_revision(&self, script_id: i64, code: &str) -> Result<RevisionId, StoreError> {
        self.conn.execute(
            "INSERT INTO revisions (script_id, code) VALUES (?1, ?2)",
            params![script_id, code],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn revision(&self, id: RevisionId) -> Result<Option<Revision>, StoreError> {
        self.conn
            .query_row(
                "SELECT id, script_id, code FROM revisions WHERE id = ?1",
                params![id],
                row_to_revision,
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn latest_revision(&self, script_id: i64) -> Result<Option<Revision>, StoreError> {
        self.conn
            .query_row(
                "SELECT id, script_id, code FROM revisions
                 WHERE script_id = ?1 ORDER BY id DESC LIMIT 1",
                params![script_id],
                row_to_revision,
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn attach_script(
        &self,
        id: EntityId,
        script_id: i64,
        rev: RevisionId,
    ) -> Result<(), StoreError> {
        self.conn.execute(
            "UPDATE entities SET script_id = ?2, current_rev = ?3 WHERE id = ?1",
            params![id, script_id, rev],
        )?;
        Ok(())
    }

    pub fn set_current_revision(&self, id: EntityId, rev: RevisionId) -> Result<(), StoreError> {
        self.conn.execute(
            "UPDATE entities SET current_rev = ?2 WHERE id = ?1",
            params![id, rev],
        )?;
        Ok(())
    }

    // ---- edit locks ----

    pub fn lock_for_entity(&self, id: EntityId) -> Result<Option<EditLock>, StoreError> {
        self.conn
            .query_row(
                "SELECT identity, entity_id FROM edit_locks WHERE entity_id = ?1",
                params![id],
                row_to_lock,
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn lock_for_identity(&self, identity: &str) -> Result<Option<EditLock>, StoreError> {
        self.conn
            .query_row(
                "SELECT identity, entity_id FROM edit_locks WHERE identity = ?1",
                params![identity],
                row_to_lock,
            )
            .optional()
            .map_err(Into::into)
    }

    /// Grant `identity` the lock on `id`, implicitly dropping any lock
    /// that identity held elsewhere. Both steps commit together.
    pub fn acquire_lock(&self, identity: &str, id: EntityId) -> Result<(), StoreError> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "DELETE FROM edit_locks WHERE identity = ?1",
            params![identity],
        )?;
        tx.execute(
            "INSERT INTO edit_locks (identity, entity_id) VALUES (?1, ?2)",
            params![identity, id],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn release_lock(&self, identity: &str) -> Result<(), StoreError> {
        self.conn.execute(
            "DELETE FROM edit_locks WHERE identity = ?1",
            params![identity],
        )?;
        Ok(())
    }

    /// Clear every lock; run at server start, since locks are session
    /// state and no session can survive a restart.
    pub fn release_all_locks(&self) -> Result<(), StoreError> {
        self.conn.execute("DELETE FROM edit_locks", [])?;
        Ok(())
    }

    // ---- last seen ----

    pub fn last_seen(&self, identity: &str) -> Result<Option<EntityId>, StoreError> {
        self.conn
            .query_row(
                "SELECT room_id FROM last_seen WHERE identity = ?1",
                params![identity],
                |row| row.get(0),
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn set_last_seen(&self, identity: &str, room: EntityId) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO last_seen (identity, room_id) VALUES (?1, ?2)
             ON CONFLICT(identity) DO UPDATE SET room_id = excluded.room_id",
            params![identity, room],
        )?;
        Ok(())
    }

    pub fn clear_last_seen(&self, identity: &str) -> Result<(), StoreError> {
        self.conn.execute(
            "DELETE FROM last_seen WHERE identity = ?1",
            params![identity],
        )?;
        Ok(())
    }
}

fn parse_data(raw: &str) -> Result<Map<String, Value>, StoreError> {
    Ok(serde_json::from_str::<Map<String, Value>>(raw)?)
}

fn parse_perm(raw: String) -> rusqlite::Result<PermLevel> {
    PermLevel::parse(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            format!("bad permission value: {raw}").into(),
        )
    })
}

fn row_to_entity(row: &Row<'_>) -> rusqlite::Result<Entity> {
    let raw_data: String = row.get("data")?;
    let data = match serde_json::from_str::<Value>(&raw_data) {
        Ok(Value::Object(map)) => map,
        _ => {
            return Err(rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                format!("entity data is not an object: {raw_data}").into(),
            ))
        }
    };
    Ok(Entity {
        id: row.get("id")?,
        shortname: row.get("shortname")?,
        name: row.get("name")?,
        author: row.get("author")?,
        location: row.get("location")?,
        data,
        perms: PermissionSet {
            read: parse_perm(row.get("perm_read")?)?,
            write: parse_perm(row.get("perm_write")?)?,
            carry: parse_perm(row.get("perm_carry")?)?,
            execute: parse_perm(row.get("perm_execute")?)?,
        },
        script_id: row.get("script_id")?,
        current_rev: row.get("current_rev")?,
        bound_identity: row.get("bound_identity")?,
    })
}

fn row_to_revision(row: &Row<'_>) -> rusqlite::Result<Revision> {
    Ok(Revision {
        id: row.get(0)?,
        script_id: row.get(1)?,
        code: row.get(2)?,
    })
}

fn row_to_lock(row: &Row<'_>) -> rusqlite::Result<EditLock> {
    Ok(EditLock {
        identity: row.get(0)?,
        entity_id: row.get(1)?,
    })
}
