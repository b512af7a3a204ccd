//! Action routing: charm handlers, built-in handlers, and the effect
//! queue that keeps nested dispatch from deadlocking.
//!
//! A handler runs with its entity's mutex held, so every data
//! read-modify-write inside one invocation is atomic with respect to
//! other invocations on the same entity. Anything a handler *emits*
//! (speech, replies, moves) is queued as an [`Effect`] and processed
//! only after the mutex is released; a charm that triggers its own
//! handlers again therefore re-enters through the queue instead of
//! through the lock.

use std::collections::VecDeque;

use serde_json::{json, Value};
use tracing::{debug, warn};

use burrow_core::{Entity, EntityId, WorldStore};
use burrow_script::{run_handler, CompiledCharm, Host, ScriptError};

use crate::session::{ClientState, ExitView, ItemView, RoomView, UserView};
use crate::{World, WorldError};

/// The contain events an entity can be told about.
const CONTAIN_EVENTS: [&str; 4] = ["acquired", "entered", "lost", "freed"];

/// Deferred work emitted while an entity lock was held.
pub(crate) enum Effect {
    /// Dispatch `action` from `from` to its whole area of effect.
    /// Individual handler failures are logged, never fatal.
    Broadcast {
        from: EntityId,
        action: String,
        args: Value,
    },
    /// Dispatch `action` to one entity; failure propagates to the
    /// caller that started the dispatch.
    Tell {
        to: EntityId,
        from: EntityId,
        action: String,
        args: Value,
    },
    /// Like `Tell` but fire-and-forget; used for contain events, whose
    /// receivers must not be able to wedge a move.
    Notify {
        to: EntityId,
        from: EntityId,
        action: String,
        args: Value,
    },
    /// Move an entity into the room named by `room`.
    Move { mover: EntityId, room: String },
    DeliverText { identity: String, line: String },
    PushState { identity: String },
}

pub(crate) type Effects = VecDeque<Effect>;

impl World {
    /// Route `action` from `sender` to everything in its area of
    /// effect: the sender, its contents, its container, and its
    /// neighbors.
    pub fn dispatch_action(
        &self,
        sender: EntityId,
        action: &str,
        args: &Value,
    ) -> Result<(), WorldError> {
        let mut effects = Effects::new();
        effects.push_back(Effect::Broadcast {
            from: sender,
            action: action.to_owned(),
            args: args.clone(),
        });
        self.run_effects(effects)
    }

    /// Route `action` from `sender` to exactly `receiver`.
    pub fn dispatch(
        &self,
        receiver: EntityId,
        sender: EntityId,
        action: &str,
        args: &Value,
    ) -> Result<(), WorldError> {
        let mut effects = Effects::new();
        self.dispatch_inner(receiver, sender, action, args, &mut effects)?;
        self.run_effects(effects)
    }

    /// Put `child` into `parent`, firing contain events on both sides
    /// of the detach and the attach.
    pub fn put(&self, parent: EntityId, child: EntityId) -> Result<(), WorldError> {
        let mut effects = Effects::new();
        self.put_inner(parent, child, &mut effects)?;
        self.run_effects(effects)
    }

    /// Take `child` out of `parent`, leaving it nowhere.
    pub fn remove(&self, parent: EntityId, child: EntityId) -> Result<(), WorldError> {
        let mut effects = Effects::new();
        self.remove_inner(parent, child, &mut effects)?;
        self.run_effects(effects)
    }

    pub(crate) fn run_effects(&self, mut queue: Effects) -> Result<(), WorldError> {
        while let Some(effect) = queue.pop_front() {
            match effect {
                Effect::Broadcast { from, action, args } => {
                    for target in self.area_of_effect(from)? {
                        if let Err(err) =
                            self.dispatch_inner(target, from, &action, &args, &mut queue)
                        {
                            warn!(
                                receiver = target,
                                action = %action,
                                error = %err,
                                "handler failed during broadcast"
                            );
                        }
                    }
                }
                Effect::Tell {
                    to,
                    from,
                    action,
                    args,
                } => {
                    self.dispatch_inner(to, from, &action, &args, &mut queue)?;
                }
                Effect::Notify {
                    to,
                    from,
                    action,
                    args,
                } => {
                    if let Err(err) = self.dispatch_inner(to, from, &action, &args, &mut queue) {
                        warn!(receiver = to, action = %action, error = %err, "notify failed");
                    }
                }
                Effect::Move { mover, room } => {
                    let target = self
                        .store()
                        .entity_by_shortname(&room)?
                        .ok_or_else(|| WorldError::NotFound(room.clone()))?;
                    self.put_inner(target.id, mover, &mut queue)?;
                }
                Effect::DeliverText { identity, line } => {
                    self.sessions().deliver_text(&identity, &line);
                }
                Effect::PushState { identity } => {
                    if let Err(err) = self.push_state(&identity) {
                        warn!(identity = %identity, error = %err, "state push failed");
                    }
                }
            }
        }
        Ok(())
    }

    /// The one place a handler actually runs. Charm handlers shadow
    /// built-ins of the same name; an action neither knows is a no-op.
    fn dispatch_inner(
        &self,
        receiver: EntityId,
        sender: EntityId,
        action: &str,
        args: &Value,
        effects: &mut Effects,
    ) -> Result<(), WorldError> {
        let (receiver_ent, sender_ent) = {
            let store = self.store();
            let receiver_ent = store
                .get_entity(receiver)?
                .ok_or_else(|| WorldError::NotFound(receiver.to_string()))?;
            let sender_ent = store
                .get_entity(sender)?
                .ok_or_else(|| WorldError::NotFound(sender.to_string()))?;
            (receiver_ent, sender_ent)
        };
        let engine = match self.engine_for(&receiver_ent) {
            Ok(engine) => engine,
            Err(WorldError::Script(err)) => {
                // broken stored charm; the entity still answers to the
                // built-ins
                warn!(receiver = %receiver_ent.shortname, error = %err, "charm does not compile");
                std::sync::Arc::new(CompiledCharm::default())
            }
            Err(other) => return Err(other),
        };

        if let Some(body) = engine.handler(action) {
            let lock = self.entity_lock(receiver);
            let _guard = lock.lock().unwrap();
            let mut host = WorldHost {
                world: self,
                entity: receiver,
                sender,
                effects,
            };
            run_handler(body, &mut host, &sender_ent.name, args)?;
            Ok(())
        } else {
            self.builtin(&receiver_ent, &sender_ent, action, args, effects)
        }
    }

    fn builtin(
        &self,
        receiver: &Entity,
        sender: &Entity,
        action: &str,
        args: &Value,
        effects: &mut Effects,
    ) -> Result<(), WorldError> {
        match action {
            "debug" => {
                if let Some(identity) = self.connected_identity(receiver) {
                    effects.push_back(Effect::DeliverText {
                        identity,
                        line: format!(
                            "{} <- {} with {}",
                            receiver.shortname,
                            sender.shortname,
                            fmt_args(args)
                        ),
                    });
                }
                Ok(())
            }
            "contain" => {
                let event = args
                    .as_str()
                    .filter(|e| CONTAIN_EVENTS.contains(e))
                    .ok_or_else(|| WorldError::InvalidContainEvent(fmt_args(args)))?;
                debug!(receiver = %receiver.shortname, event, "contain event");
                if let Some(identity) = self.connected_identity(receiver) {
                    effects.push_back(Effect::PushState { identity });
                }
                Ok(())
            }
            "say" => {
                self.hear(receiver, effects, format!("{} says, \"{}\"", sender.name, fmt_args(args)));
                Ok(())
            }
            "announce" => {
                self.hear(
                    receiver,
                    effects,
                    format!(
                        "The very air around you seems to shake as {}'s booming voice says {}",
                        sender.name,
                        fmt_args(args)
                    ),
                );
                Ok(())
            }
            "whisper" => {
                self.hear(
                    receiver,
                    effects,
                    format!(
                        "{} whispers so only you can hear: {}",
                        sender.name,
                        fmt_args(args)
                    ),
                );
                Ok(())
            }
            "move" => {
                let room = args.as_str().ok_or_else(|| {
                    WorldError::MalformedPayload("move wants a room shortname".into())
                })?;
                effects.push_back(Effect::Move {
                    mover: receiver.id,
                    room: room.to_owned(),
                });
                Ok(())
            }
            _ => {
                debug!(receiver = %receiver.shortname, action, "no handler; ignoring");
                Ok(())
            }
        }
    }

    fn hear(&self, receiver: &Entity, effects: &mut Effects, line: String) {
        if let Some(identity) = self.connected_identity(receiver) {
            effects.push_back(Effect::DeliverText { identity, line });
        }
    }

    fn connected_identity(&self, entity: &Entity) -> Option<String> {
        entity
            .bound_identity
            .as_deref()
            .filter(|identity| self.sessions().is_connected(identity))
            .map(str::to_owned)
    }

    /// Everything that hears a broadcast from `sender`: itself, its
    /// contents, its container, and its container's contents.
    pub fn area_of_effect(&self, sender: EntityId) -> Result<Vec<EntityId>, WorldError> {
        let store = self.store();
        let sender_ent = store
            .get_entity(sender)?
            .ok_or_else(|| WorldError::NotFound(sender.to_string()))?;
        let mut targets = vec![sender];
        for inner in store.contents(sender)? {
            targets.push(inner.id);
        }
        if let Some(room) = sender_ent.location {
            targets.push(room);
            for inner in store.contents(room)? {
                targets.push(inner.id);
            }
        }
        let mut seen = std::collections::HashSet::new();
        targets.retain(|id| seen.insert(*id));
        Ok(targets)
    }

    pub(crate) fn put_inner(
        &self,
        parent: EntityId,
        child: EntityId,
        effects: &mut Effects,
    ) -> Result<(), WorldError> {
        if parent == child {
            return Err(WorldError::InvalidContainEvent(
                "an object cannot contain itself".into(),
            ));
        }
        let (old_parent, refresh) = {
            let store = self.store();
            let child_ent = store
                .get_entity(child)?
                .ok_or_else(|| WorldError::NotFound(child.to_string()))?;
            // walk up from the new parent; finding the child on the way
            // would close a containment cycle
            let mut cursor = store
                .get_entity(parent)?
                .ok_or_else(|| WorldError::NotFound(parent.to_string()))?;
            loop {
                if cursor.id == child {
                    return Err(WorldError::InvalidContainEvent(format!(
                        "{} already contains {}",
                        child_ent.shortname, cursor.shortname
                    )));
                }
                match cursor.location {
                    Some(up) => {
                        cursor = store
                            .get_entity(up)?
                            .ok_or_else(|| WorldError::NotFound(up.to_string()))?;
                    }
                    None => break,
                }
            }
            let old_parent = child_ent.location;
            store.set_location(child, Some(parent))?;
            let mut refresh = Vec::new();
            if let Some(old) = old_parent {
                collect_watchers(&store, old, &mut refresh)?;
            }
            collect_watchers(&store, parent, &mut refresh)?;
            (old_parent, refresh)
        };
        if let Some(old) = old_parent {
            self.queue_contain(effects, old, child, "lost");
            self.queue_contain(effects, child, old, "freed");
        }
        self.queue_contain(effects, parent, child, "acquired");
        self.queue_contain(effects, child, parent, "entered");
        for identity in refresh {
            if self.sessions().is_connected(&identity) {
                effects.push_back(Effect::PushState { identity });
            }
        }
        Ok(())
    }

    pub(crate) fn remove_inner(
        &self,
        parent: EntityId,
        child: EntityId,
        effects: &mut Effects,
    ) -> Result<(), WorldError> {
        let refresh = {
            let store = self.store();
            let child_ent = store
                .get_entity(child)?
                .ok_or_else(|| WorldError::NotFound(child.to_string()))?;
            if child_ent.location != Some(parent) {
                return Err(WorldError::NotFound(child_ent.shortname));
            }
            store.set_location(child, None)?;
            let mut refresh = Vec::new();
            collect_watchers(&store, parent, &mut refresh)?;
            refresh
        };
        self.queue_contain(effects, parent, child, "lost");
        self.queue_contain(effects, child, parent, "freed");
        for identity in refresh {
            if self.sessions().is_connected(&identity) {
                effects.push_back(Effect::PushState { identity });
            }
        }
        Ok(())
    }

    fn queue_contain(&self, effects: &mut Effects, to: EntityId, from: EntityId, event: &str) {
        effects.push_back(Effect::Notify {
            to,
            from,
            action: "contain".to_owned(),
            args: json!(event),
        });
    }

    /// Push a full client-state snapshot to `identity`, if connected.
    pub fn push_state(&self, identity: &str) -> Result<(), WorldError> {
        let Some(sink) = self.sessions().sink(identity) else {
            return Ok(());
        };
        let state = self.client_state(identity)?;
        sink.push_state(state);
        Ok(())
    }

    /// Snapshot what `identity`'s client renders: the player, the room
    /// (with its contents and exits), and the inventory tree.
    pub fn client_state(&self, identity: &str) -> Result<ClientState, WorldError> {
        let store = self.store();
        let player = store
            .entity_for_identity(identity)?
            .ok_or_else(|| WorldError::NotFound(identity.to_owned()))?;
        let room = match player.location {
            Some(room_id) => {
                let room = store
                    .get_entity(room_id)?
                    .ok_or_else(|| WorldError::NotFound(room_id.to_string()))?;
                let mut contains = Vec::new();
                let mut exits = Vec::new();
                for inner in store.contents(room_id)? {
                    if inner.is_exit() {
                        let target = inner
                            .data
                            .get("target")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_owned();
                        exits.push(ExitView {
                            shortname: inner.shortname,
                            name: inner.name,
                            target,
                        });
                    } else {
                        contains.push(contains_tree(&store, &inner)?);
                    }
                }
                let description = room.description().to_owned();
                RoomView {
                    shortname: room.shortname,
                    name: room.name,
                    description,
                    contains,
                    exits,
                }
            }
            None => RoomView {
                shortname: String::new(),
                name: "the void".to_owned(),
                description: "An endless, soundless nothing.".to_owned(),
                contains: Vec::new(),
                exits: Vec::new(),
            },
        };
        let mut inventory = Vec::new();
        for inner in store.contents(player.id)? {
            inventory.push(contains_tree(&store, &inner)?);
        }
        let description = player.description().to_owned();
        Ok(ClientState {
            user: UserView {
                shortname: player.shortname,
                name: player.name,
                description,
            },
            room,
            inventory,
        })
    }
}

fn collect_watchers(
    store: &WorldStore,
    container: EntityId,
    out: &mut Vec<String>,
) -> Result<(), WorldError> {
    if let Some(ent) = store.get_entity(container)? {
        if let Some(identity) = ent.bound_identity {
            out.push(identity);
        }
    }
    for inner in store.contents(container)? {
        if let Some(identity) = inner.bound_identity {
            out.push(identity);
        }
    }
    Ok(())
}

fn contains_tree(store: &WorldStore, entity: &Entity) -> Result<ItemView, WorldError> {
    let mut contains = Vec::new();
    for inner in store.contents(entity.id)? {
        contains.push(contains_tree(store, &inner)?);
    }
    Ok(ItemView {
        shortname: entity.shortname.clone(),
        name: entity.name.clone(),
        contains,
    })
}

/// Render handler args the way a player reads them: strings bare,
/// everything else as JSON.
fn fmt_args(args: &Value) -> String {
    match args {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// The primitive API a charm handler runs against, bound to one
/// receiving entity for one invocation.
struct WorldHost<'a> {
    world: &'a World,
    entity: EntityId,
    sender: EntityId,
    effects: &'a mut Effects,
}

impl Host for WorldHost<'_> {
    fn say(&mut self, message: &str) -> Result<(), ScriptError> {
        self.effects.push_back(Effect::Broadcast {
            from: self.entity,
            action: "say".to_owned(),
            args: json!(message),
        });
        Ok(())
    }

    fn set_data(&mut self, key: &str, value: Value) -> Result<(), ScriptError> {
        self.world
            .store()
            .set_data_key(self.entity, key, value)
            .map_err(|err| ScriptError::Host(err.to_string()))
    }

    fn get_data(&mut self, key: &str, default: Value) -> Result<Value, ScriptError> {
        let data = self
            .world
            .store()
            .data(self.entity)
            .map_err(|err| ScriptError::Host(err.to_string()))?;
        Ok(data.get(key).cloned().unwrap_or(default))
    }

    fn tell_sender(&mut self, action: &str, args: Value) -> Result<(), ScriptError> {
        self.effects.push_back(Effect::Tell {
            to: self.sender,
            from: self.entity,
            action: action.to_owned(),
            args,
        });
        Ok(())
    }
}
