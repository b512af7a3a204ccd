//! World operations: identity bootstrap, connect/disconnect, object
//! creation, and the verb-level commands that gate on capabilities
//! before anything is routed.

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::info;

use burrow_core::{slugify, Capability, Entity, PermLevel, WorldStore};
use burrow_script::compile;

use crate::router::Effects;
use crate::session::ClientSink;
use crate::templates::Archetype;
use crate::{World, WorldError};

/// Shortname of the shared room every new connection falls back to.
pub const FOYER: &str = "world/foyer";

/// The compass an exit can point along.
pub const DIRECTIONS: [&str; 6] = ["north", "south", "east", "west", "above", "below"];

/// Reduce a direction alias ("n", "up", ...) to its canonical name.
pub fn normalize_direction(input: &str) -> Option<&'static str> {
    match input {
        "north" | "n" => Some("north"),
        "south" | "s" => Some("south"),
        "east" | "e" => Some("east"),
        "west" | "w" => Some("west"),
        "above" | "a" | "up" | "u" => Some("above"),
        "below" | "b" | "down" | "d" => Some("below"),
        _ => None,
    }
}

fn reverse_direction(direction: &str) -> &'static str {
    match direction {
        "north" => "south",
        "south" => "north",
        "east" => "west",
        "west" => "east",
        "above" => "below",
        _ => "above",
    }
}

const OBJECT_DENIED: &str =
    "You grab a hold of {} but no matter how hard you pull it stays rooted in place.";

fn not_found(what: &str) -> WorldError {
    WorldError::NotFound(what.to_owned())
}

fn denied(template: &str, name: &str) -> WorldError {
    WorldError::PermissionDenied(template.replacen("{}", name, 1))
}

impl World {
    // ---- bootstrap ----

    /// Create the shared foyer if this is a fresh world.
    pub fn seed(&self) -> Result<Entity, WorldError> {
        if let Some(foyer) = self.store().entity_by_shortname(FOYER)? {
            return Ok(foyer);
        }
        let source = Archetype::Room.charm_source("The Foyer");
        let unit = Arc::new(compile(&source)?);
        let (id, rev) = {
            let store = self.store();
            let id = store.create_entity("world", FOYER, "The Foyer")?;
            let script_id = store.create_script(FOYER)?;
            let rev = store.create_revision(script_id, &source)?;
            store.attach_script(id, script_id, rev)?;
            store.merge_defaults(id, &unit.defaults)?;
            store.set_data_key(
                id,
                "description",
                json!("A warm antechamber dug into soft earth. Tunnels branch off in every direction."),
            )?;
            store.set_perm(id, Capability::Carry, PermLevel::Owner)?;
            (id, rev)
        };
        self.install_engine(id, rev, unit);
        info!(shortname = FOYER, "seeded world");
        self.store()
            .get_entity(id)?
            .ok_or_else(|| not_found(FOYER))
    }

    /// Create the player entity and private home room for a brand-new
    /// identity. The player's shortname is the identity itself.
    pub fn register_identity(&self, identity: &str) -> Result<Entity, WorldError> {
        {
            let store = self.store();
            if store.entity_for_identity(identity)?.is_some() {
                return Err(WorldError::MalformedPayload(format!(
                    "{identity} is already registered"
                )));
            }
            if store.shortname_taken(identity)? {
                return Err(WorldError::MalformedPayload(format!(
                    "the name {identity} is taken"
                )));
            }
        }
        let source = Archetype::Player.charm_source(identity);
        let unit = Arc::new(compile(&source)?);
        let (id, rev) = {
            let store = self.store();
            let id = store.create_entity(identity, identity, identity)?;
            let script_id = store.create_script(identity)?;
            let rev = store.create_revision(script_id, &source)?;
            store.attach_script(id, script_id, rev)?;
            store.merge_defaults(id, &unit.defaults)?;
            store.bind_identity(id, identity)?;
            (id, rev)
        };
        self.install_engine(id, rev, unit);
        self.spawn(
            identity,
            Archetype::Room,
            "home",
            Some("A cozy burrow shaped exactly to its owner."),
        )?;
        info!(identity, "registered");
        self.store()
            .get_entity(id)?
            .ok_or_else(|| not_found(identity))
    }

    // ---- sessions ----

    /// Attach a connected client: the player materializes in its
    /// last-seen room (or the foyer) and neighbors see it fade in.
    pub fn connect(&self, identity: &str, sink: Arc<dyn ClientSink>) -> Result<(), WorldError> {
        let player = self
            .store()
            .entity_for_identity(identity)?
            .ok_or_else(|| not_found(identity))?;
        if !self.sessions().insert(identity, sink) {
            return Err(WorldError::AlreadyConnected(identity.to_owned()));
        }
        let room = {
            let store = self.store();
            match store.last_seen(identity)? {
                Some(room) => room,
                None => store
                    .entity_by_shortname(FOYER)?
                    .ok_or_else(|| not_found(FOYER))?
                    .id,
            }
        };
        self.put(room, player.id)?;
        self.store().clear_last_seen(identity)?;
        for other in self.neighbor_identities(room, identity)? {
            self.sessions()
                .deliver_text(&other, &format!("{} fades in.", player.name));
        }
        self.push_state(identity)?;
        info!(identity, "connected");
        Ok(())
    }

    /// Detach a client: edit locks clear, the player fades out of its
    /// room, and the room is remembered for next time.
    pub fn disconnect(&self, identity: &str) -> Result<(), WorldError> {
        self.sessions().remove(identity);
        self.store().release_lock(identity)?;
        let player = self
            .store()
            .entity_for_identity(identity)?
            .ok_or_else(|| not_found(identity))?;
        if let Some(room) = player.location {
            self.remove(room, player.id)?;
            for other in self.neighbor_identities(room, identity)? {
                self.sessions()
                    .deliver_text(&other, &format!("{} fades out.", player.name));
            }
            self.store().set_last_seen(identity, room)?;
        }
        info!(identity, "disconnected");
        Ok(())
    }

    fn neighbor_identities(
        &self,
        room: burrow_core::EntityId,
        except: &str,
    ) -> Result<Vec<String>, WorldError> {
        let store = self.store();
        let mut out = Vec::new();
        for inner in store.contents(room)? {
            if let Some(identity) = inner.bound_identity {
                if identity != except {
                    out.push(identity);
                }
            }
        }
        Ok(out)
    }

    // ---- creation ----

    /// Create an entity with its archetype's starter charm attached.
    /// Handles shortname allocation, the script's first revision, the
    /// compiled engine, and archetype permission tweaks. Placement is
    /// the caller's business.
    fn spawn(
        &self,
        author: &str,
        archetype: Archetype,
        name: &str,
        description: Option<&str>,
    ) -> Result<Entity, WorldError> {
        let source = archetype.charm_source(name);
        let unit = Arc::new(compile(&source)?);
        let (id, rev) = {
            let store = self.store();
            let shortname = allocate_shortname(&store, author, name)?;
            let id = store.create_entity(author, &shortname, name)?;
            let script_id = store.create_script(&shortname)?;
            let rev = store.create_revision(script_id, &source)?;
            store.attach_script(id, script_id, rev)?;
            store.merge_defaults(id, &unit.defaults)?;
            if let Some(description) = description {
                let description = description.trim();
                if !description.is_empty() {
                    store.set_data_key(id, "description", json!(description))?;
                }
            }
            // rooms, exits and portkeys are rooted in place
            if matches!(
                archetype,
                Archetype::Room | Archetype::Exit | Archetype::Portkey
            ) {
                store.set_perm(id, Capability::Carry, PermLevel::Owner)?;
            }
            if archetype == Archetype::Exit {
                store.set_data_key(id, "exit", json!(true))?;
            }
            (id, rev)
        };
        self.install_engine(id, rev, unit);
        self.store().get_entity(id)?.ok_or_else(|| not_found(name))
    }

    /// Create an item and put it in its author's hands.
    pub fn create_item(
        &self,
        identity: &str,
        name: &str,
        description: Option<&str>,
    ) -> Result<Entity, WorldError> {
        let player = self
            .store()
            .entity_for_identity(identity)?
            .ok_or_else(|| not_found(identity))?;
        let item = self.spawn(identity, Archetype::Item, name, description)?;
        self.put(player.id, item.id)?;
        self.breathed_light(identity, Archetype::Item, &item);
        Ok(item)
    }

    /// Create a room, plus a portkey to it dropped in the author's
    /// home room so the new place is reachable.
    pub fn create_room(
        &self,
        identity: &str,
        name: &str,
        description: Option<&str>,
    ) -> Result<Entity, WorldError> {
        let room = self.spawn(identity, Archetype::Room, name, description)?;
        let portkey = self.spawn(
            identity,
            Archetype::Portkey,
            &format!("Teleport Stone to {}", room.name),
            Some(&format!(
                "Touching this stone will transport you to {}",
                room.name
            )),
        )?;
        self.store()
            .set_data_key(portkey.id, "target", json!(room.shortname))?;
        let home = self
            .store()
            .entity_by_shortname(&format!("{identity}/home"))?;
        if let Some(home) = home {
            self.put(home.id, portkey.id)?;
        }
        self.breathed_light(identity, Archetype::Room, &room);
        Ok(room)
    }

    /// Create an exit in the author's current room leading to
    /// `target_shortname`, optionally pointing along a compass
    /// direction. If the author can also write the target room, a
    /// linked exit pointing back (along the reverse direction) is
    /// created there too.
    pub fn create_exit(
        &self,
        identity: &str,
        name: &str,
        target_shortname: &str,
        direction: Option<&str>,
        description: Option<&str>,
    ) -> Result<Entity, WorldError> {
        let direction = match direction {
            Some(raw) => Some(normalize_direction(raw).ok_or_else(|| {
                WorldError::MalformedPayload(format!(
                    "Try one of these directions: {}",
                    DIRECTIONS.join(", ")
                ))
            })?),
            None => None,
        };
        let (current_room, target) = {
            let store = self.store();
            let player = store
                .entity_for_identity(identity)?
                .ok_or_else(|| not_found(identity))?;
            let room_id = player
                .location
                .ok_or_else(|| not_found("anywhere to anchor an exit"))?;
            let current_room = store
                .get_entity(room_id)?
                .ok_or_else(|| not_found("this room"))?;
            let target = store
                .entity_by_shortname(target_shortname)?
                .ok_or_else(|| not_found(target_shortname))?;
            (current_room, target)
        };
        if !current_room
            .perms
            .allows(Capability::Write, identity, &current_room.author)
        {
            return Err(WorldError::PermissionDenied(
                "You lack the power to create an exit here.".to_owned(),
            ));
        }
        if let Some(direction) = direction {
            if self.exit_towards(current_room.id, direction)?.is_some() {
                return Err(WorldError::PermissionDenied(
                    "An exit already exists in this room for that direction.".to_owned(),
                ));
            }
        }
        let exit = self.spawn(identity, Archetype::Exit, name, description)?;
        {
            let store = self.store();
            store.set_data_key(exit.id, "target", json!(target.shortname))?;
            if let Some(direction) = direction {
                store.set_data_key(exit.id, "direction", json!(direction))?;
            }
        }
        self.put(current_room.id, exit.id)?;
        if target
            .perms
            .allows(Capability::Write, identity, &target.author)
        {
            let back = self.spawn(identity, Archetype::Exit, name, description)?;
            {
                let store = self.store();
                store.set_data_key(back.id, "target", json!(current_room.shortname))?;
                if let Some(direction) = direction {
                    store.set_data_key(back.id, "direction", json!(reverse_direction(direction)))?;
                }
            }
            self.put(target.id, back.id)?;
        }
        self.breathed_light(identity, Archetype::Exit, &exit);
        Ok(exit)
    }

    fn breathed_light(&self, identity: &str, archetype: Archetype, entity: &Entity) {
        self.sessions().deliver_text(
            identity,
            &format!(
                "You breathed light into a whole new {}. Its true name is {}",
                archetype, entity.shortname
            ),
        );
    }

    // ---- verb commands ----

    /// Pick up an object from the current room. Needs `carry` on the
    /// object; exits stay where they are.
    pub fn get_item(&self, identity: &str, query: &str) -> Result<(), WorldError> {
        let player = self.player(identity)?;
        let found = self
            .resolve_in_room(&player, query)?
            .ok_or_else(|| not_found(query))?;
        if !found
            .perms
            .allows(Capability::Carry, identity, &found.author)
        {
            return Err(denied(OBJECT_DENIED, &found.name));
        }
        if found.is_exit() {
            return Err(WorldError::PermissionDenied(
                "You can't pick up an exit, only destroy it.".to_owned(),
            ));
        }
        self.put(player.id, found.id)?;
        self.sessions()
            .deliver_text(identity, &format!("You grab {}.", found.name));
        Ok(())
    }

    /// Drop a carried object into the current room. Needs `carry` on
    /// the object, same as picking it up.
    pub fn drop_item(&self, identity: &str, query: &str) -> Result<(), WorldError> {
        let player = self.player(identity)?;
        let found = self
            .resolve_in_inventory(&player, query)?
            .ok_or_else(|| not_found(query))?;
        if !found
            .perms
            .allows(Capability::Carry, identity, &found.author)
        {
            return Err(denied(OBJECT_DENIED, &found.name));
        }
        let room = player
            .location
            .ok_or_else(|| not_found("anywhere to drop it"))?;
        self.put(room, found.id)?;
        self.sessions()
            .deliver_text(identity, &format!("You drop {}.", found.name));
        Ok(())
    }

    /// Put a carried or nearby object inside a container. Needs
    /// `carry` on the object and `execute` on the container.
    pub fn put_item(
        &self,
        identity: &str,
        item_query: &str,
        container_query: &str,
    ) -> Result<(), WorldError> {
        let player = self.player(identity)?;
        let item = self
            .resolve_near(&player, item_query)?
            .ok_or_else(|| not_found(item_query))?;
        if !item.perms.allows(Capability::Carry, identity, &item.author) {
            return Err(denied(OBJECT_DENIED, &item.name));
        }
        let container = self
            .resolve_near(&player, container_query)?
            .ok_or_else(|| not_found(container_query))?;
        if !container
            .perms
            .allows(Capability::Execute, identity, &container.author)
        {
            return Err(WorldError::PermissionDenied(format!(
                "You try as hard as you can, but you are unable to pry open {}",
                container.name
            )));
        }
        self.put(container.id, item.id)?;
        self.sessions().deliver_text(
            identity,
            &format!("You put {} in {}", item.name, container.name),
        );
        Ok(())
    }

    /// Take an object out of a container and carry it. Needs `execute`
    /// on the container and `carry` on the object.
    pub fn remove_item(
        &self,
        identity: &str,
        item_query: &str,
        container_query: &str,
    ) -> Result<(), WorldError> {
        let player = self.player(identity)?;
        let container = self
            .resolve_near(&player, container_query)?
            .ok_or_else(|| not_found(container_query))?;
        if !container
            .perms
            .allows(Capability::Execute, identity, &container.author)
        {
            return Err(WorldError::PermissionDenied(format!(
                "You try as hard as you can, but you are unable to pry open {}",
                container.name
            )));
        }
        let item = {
            let store = self.store();
            store
                .contents(container.id)?
                .into_iter()
                .find(|o| o.fuzzy_match(item_query))
        }
        .ok_or_else(|| not_found(item_query))?;
        if !item.perms.allows(Capability::Carry, identity, &item.author) {
            return Err(denied(OBJECT_DENIED, &item.name));
        }
        self.put(player.id, item.id)?;
        self.sessions().deliver_text(
            identity,
            &format!(
                "You remove {} from {} and carry it with you.",
                item.name, container.name
            ),
        );
        Ok(())
    }

    /// Touch something nearby, running its `touch` handler. Needs
    /// `execute` on the target; this is how exits and portkeys move
    /// players around.
    pub fn touch(&self, identity: &str, query: &str) -> Result<(), WorldError> {
        let player = self.player(identity)?;
        let found = self
            .resolve_near(&player, query)?
            .ok_or_else(|| not_found(query))?;
        if !found
            .perms
            .allows(Capability::Execute, identity, &found.author)
        {
            return Err(WorldError::PermissionDenied(format!(
                "You reach for {} but an unseen force stays your hand.",
                found.name
            )));
        }
        self.dispatch(found.id, player.id, "touch", &Value::Null)
    }

    /// Describe the current room and everything in it, then let the
    /// neighborhood react to being looked at.
    pub fn look(&self, identity: &str) -> Result<(), WorldError> {
        let player = self.player(identity)?;
        let lines = {
            let store = self.store();
            let mut lines = Vec::new();
            if let Some(room_id) = player.location {
                let room = store
                    .get_entity(room_id)?
                    .ok_or_else(|| not_found("this room"))?;
                let mut line = format!("You are in the {}", room.name);
                if !room.description().is_empty() {
                    line.push_str(&format!(", {}", room.description()));
                }
                lines.push(line);
                for o in store.contents(room_id)? {
                    if o.id == player.id {
                        continue;
                    }
                    let mut line = if o.is_player() {
                        format!("You see {}", o.name)
                    } else {
                        format!("You see a {}", o.name)
                    };
                    if !o.description().is_empty() {
                        line.push_str(&format!(", {}", o.description()));
                    }
                    lines.push(line);
                }
            }
            lines
        };
        for line in lines {
            self.sessions().deliver_text(identity, &line);
        }
        self.dispatch_action(player.id, "look", &Value::Null)
    }

    /// Say something out loud; everything nearby hears it.
    pub fn say(&self, identity: &str, message: &str) -> Result<(), WorldError> {
        let player = self.player(identity)?;
        self.dispatch_action(player.id, "say", &json!(message))
    }

    /// Whisper to one specific neighbor.
    pub fn whisper(
        &self,
        identity: &str,
        target_query: &str,
        message: &str,
    ) -> Result<(), WorldError> {
        let player = self.player(identity)?;
        let found = self
            .resolve_neighbor(&player, target_query)?
            .ok_or_else(|| not_found(target_query))?;
        self.dispatch(found.id, player.id, "whisper", &json!(message))
    }

    /// Boom a message out to every connected player.
    pub fn announce(&self, identity: &str, message: &str) -> Result<(), WorldError> {
        let player = self.player(identity)?;
        for other in self.sessions().connected() {
            let target = self.store().entity_for_identity(&other)?;
            if let Some(target) = target {
                self.dispatch(target.id, player.id, "announce", &json!(message))?;
            }
        }
        Ok(())
    }

    /// Change one permission on an entity. Only its author may.
    pub fn set_entity_perm(
        &self,
        identity: &str,
        query: &str,
        cap: Capability,
        level: PermLevel,
    ) -> Result<(), WorldError> {
        let player = self.player(identity)?;
        let found = self
            .resolve_near(&player, query)?
            .ok_or_else(|| not_found(query))?;
        if found.author != identity {
            return Err(WorldError::PermissionDenied(format!(
                "Only the author of {} may change its permissions.",
                found.name
            )));
        }
        self.store().set_perm(found.id, cap, level)?;
        Ok(())
    }

    /// Walk through the exit pointing along `direction` from the
    /// player's current room.
    pub fn go(&self, identity: &str, direction: &str) -> Result<(), WorldError> {
        let player = self.player(identity)?;
        let direction = normalize_direction(direction).unwrap_or(direction);
        let room = player
            .location
            .ok_or_else(|| WorldError::PermissionDenied("You cannot go that way.".to_owned()))?;
        let exit = self
            .exit_towards(room, direction)?
            .ok_or_else(|| WorldError::PermissionDenied("You cannot go that way.".to_owned()))?;
        self.dispatch(exit.id, player.id, "go", &json!(direction))
    }

    fn exit_towards(
        &self,
        room: burrow_core::EntityId,
        direction: &str,
    ) -> Result<Option<Entity>, WorldError> {
        let store = self.store();
        Ok(store.contents(room)?.into_iter().find(|o| {
            o.is_exit()
                && o.data.get("direction").and_then(Value::as_str) == Some(direction)
        }))
    }

    /// Move the player straight home.
    pub fn go_home(&self, identity: &str) -> Result<(), WorldError> {
        let player = self.player(identity)?;
        let mut effects = Effects::new();
        effects.push_back(crate::router::Effect::Move {
            mover: player.id,
            room: format!("{identity}/home"),
        });
        self.run_effects(effects)
    }

    fn player(&self, identity: &str) -> Result<Entity, WorldError> {
        self.store()
            .entity_for_identity(identity)?
            .ok_or_else(|| not_found(identity))
    }

    /// Things in the player's room, excluding players and itself.
    fn resolve_in_room(&self, player: &Entity, query: &str) -> Result<Option<Entity>, WorldError> {
        let Some(room) = player.location else {
            return Ok(None);
        };
        let store = self.store();
        Ok(store
            .contents(room)?
            .into_iter()
            .find(|o| o.id != player.id && !o.is_player() && o.fuzzy_match(query)))
    }

    /// Things the player carries.
    fn resolve_in_inventory(
        &self,
        player: &Entity,
        query: &str,
    ) -> Result<Option<Entity>, WorldError> {
        let store = self.store();
        Ok(store
            .contents(player.id)?
            .into_iter()
            .find(|o| o.fuzzy_match(query)))
    }

    /// Anything else sharing the room, players included.
    fn resolve_neighbor(&self, player: &Entity, query: &str) -> Result<Option<Entity>, WorldError> {
        let Some(room) = player.location else {
            return Ok(None);
        };
        let store = self.store();
        Ok(store
            .contents(room)?
            .into_iter()
            .find(|o| o.id != player.id && o.fuzzy_match(query)))
    }

    /// Inventory first, then the room.
    fn resolve_near(&self, player: &Entity, query: &str) -> Result<Option<Entity>, WorldError> {
        if let Some(found) = self.resolve_in_inventory(player, query)? {
            return Ok(Some(found));
        }
        self.resolve_in_room(player, query)
    }
}

/// `{identity}/{slug}`; a collision appends the author's current
/// entity count.
fn allocate_shortname(
    store: &WorldStore,
    author: &str,
    name: &str,
) -> Result<String, burrow_core::StoreError> {
    let mut shortname = format!("{}/{}", author, slugify(name));
    if store.shortname_taken(&shortname)? {
        let n = store.count_authored(author)?;
        shortname = format!("{shortname}-{n}");
    }
    Ok(shortname)
}
