//! Burrow CLI entry point.

use std::sync::{Arc, Mutex};

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

use burrow_core::{Capability, PermLevel, WorldStore};
use burrow_runtime::{ops, ClientSink, ClientState, RevisionSubmit, World, WorldError};

#[derive(Parser)]
#[command(name = "burrow")]
#[command(about = "A small persistent world full of scriptable objects")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create (or re-open) a world database and seed the foyer
    Init {
        /// Database file path
        #[arg(short, long, default_value = "world.sqlite")]
        db: String,
    },

    /// Connect to a world as an identity and play
    Play {
        /// Identity to play as (registered on first use)
        identity: String,

        /// Database file path
        #[arg(short, long, default_value = "world.sqlite")]
        db: String,
    },

    /// Print an object's state (data, permissions, charm code)
    Show {
        /// Shortname of the object
        shortname: String,

        /// Database file path
        #[arg(short, long, default_value = "world.sqlite")]
        db: String,
    },
}

/// Prints game text straight to the terminal; room changes get a
/// one-line banner instead of the full state dump.
struct TerminalSink {
    room: Mutex<String>,
}

impl ClientSink for TerminalSink {
    fn deliver_text(&self, line: &str) {
        println!("{line}");
    }

    fn push_state(&self, state: ClientState) {
        let mut room = self.room.lock().unwrap();
        if *room != state.room.shortname {
            *room = state.room.shortname.clone();
            println!("-- {} --", state.room.name);
            if !state.room.description.is_empty() {
                println!("{}", state.room.description);
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("burrow=info".parse()?))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { db } => {
            let world = World::new(WorldStore::open(&db)?);
            let foyer = world.seed()?;
            info!(db, foyer = %foyer.shortname, "world ready");
        }

        Commands::Play { identity, db } => {
            let world = World::new(WorldStore::open(&db)?);
            world.seed()?;
            // edit locks are session state; no session survived whatever
            // shut the last process down
            world.store().release_all_locks()?;
            if world.store().entity_for_identity(&identity)?.is_none() {
                world.register_identity(&identity)?;
                println!("Welcome to the burrow, {identity}.");
            }
            let sink = Arc::new(TerminalSink {
                room: Mutex::new(String::new()),
            });
            world.connect(&identity, sink)?;
            world.look(&identity)?;

            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            while let Some(line) = lines.next_line().await? {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if line == "/quit" {
                    break;
                }
                if let Err(err) = handle_line(&world, &identity, line) {
                    println!("{err}");
                }
            }
            world.disconnect(&identity)?;
        }

        Commands::Show { shortname, db } => {
            let world = World::new(WorldStore::open(&db)?);
            let state = world.object_state(&shortname)?;
            println!("{}", serde_json::to_string_pretty(&state)?);
        }
    }

    Ok(())
}

/// Toy line parser: `/verb args` runs a command, anything else is
/// speech. Just enough surface to poke at a world from a terminal.
fn handle_line(world: &World, identity: &str, line: &str) -> Result<(), WorldError> {
    let Some(rest) = line.strip_prefix('/') else {
        return world.say(identity, line);
    };
    let (verb, args) = match rest.split_once(' ') {
        Some((verb, args)) => (verb, args.trim()),
        None => (rest, ""),
    };
    match verb {
        "look" => world.look(identity),
        "home" => world.go_home(identity),
        "go" => world.go(identity, args),
        "touch" => world.touch(identity, args),
        "get" => world.get_item(identity, args),
        "drop" => world.drop_item(identity, args),
        "put" => match args.split_once(" in ") {
            Some((item, container)) => world.put_item(identity, item.trim(), container.trim()),
            None => Err(usage("/put some object in container object")),
        },
        "remove" => match args.split_once(" from ") {
            Some((item, container)) => world.remove_item(identity, item.trim(), container.trim()),
            None => Err(usage("/remove some object from container object")),
        },
        "whisper" => match args.split_once(' ') {
            Some((target, message)) => world.whisper(identity, target, message.trim()),
            None => Err(usage("/whisper someone a message")),
        },
        "announce" => world.announce(identity, args),
        "create" => handle_create(world, identity, args),
        "perm" => handle_perm(world, identity, args),
        "edit" => {
            let state = world.request_edit(identity, args)?;
            println!("-- editing {} (revision {}) --", state.shortname, state.current_rev);
            println!("{}", state.code);
            println!("-- save with: /save {} <file> --", state.shortname);
            Ok(())
        }
        "save" => match args.split_once(' ') {
            Some((shortname, path)) => handle_save(world, identity, shortname, path.trim()),
            None => Err(usage("/save shortname path/to/charm")),
        },
        _ => Err(usage(
            "/look /go /home /touch /get /drop /put /remove /whisper /announce /create /perm /edit /save /quit",
        )),
    }
}

fn handle_create(world: &World, identity: &str, args: &str) -> Result<(), WorldError> {
    let (kind, rest) = args
        .split_once(' ')
        .ok_or_else(|| usage("/create item|room|exit \"pretty name\" ..."))?;
    let (name, extra) = parse_quoted(rest)
        .ok_or_else(|| usage("pretty names go in double quotes"))?;
    let description = if extra.is_empty() { None } else { Some(extra) };
    match kind {
        "item" => world.create_item(identity, name, description).map(drop),
        "room" => world.create_room(identity, name, description).map(drop),
        "exit" => {
            // an optional compass direction may precede the target room
            let exit_usage = "/create exit \"A Door\" north some/room A rusted, metal door";
            let mut words = extra.split_whitespace();
            let first = words.next().ok_or_else(|| usage(exit_usage))?;
            let (direction, target) = match ops::normalize_direction(first) {
                Some(_) => (Some(first), words.next().ok_or_else(|| usage(exit_usage))?),
                None => (None, first),
            };
            let description = words.collect::<Vec<_>>().join(" ");
            let description = (!description.is_empty()).then_some(description.as_str());
            world
                .create_exit(identity, name, target, direction, description)
                .map(drop)
        }
        _ => Err(usage("/create item|room|exit \"pretty name\" ...")),
    }
}

fn handle_perm(world: &World, identity: &str, args: &str) -> Result<(), WorldError> {
    let mut parts = args.splitn(3, ' ');
    let (Some(target), Some(cap), Some(level)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(usage("/perm object read|write|carry|execute owner|world"));
    };
    let cap = Capability::parse(cap)
        .ok_or_else(|| usage("capability is one of read, write, carry, execute"))?;
    let level =
        PermLevel::parse(level).ok_or_else(|| usage("level is one of owner, world"))?;
    world.set_entity_perm(identity, target, cap, level)
}

fn handle_save(
    world: &World,
    identity: &str,
    shortname: &str,
    path: &str,
) -> Result<(), WorldError> {
    let code = std::fs::read_to_string(path)
        .map_err(|err| WorldError::MalformedPayload(format!("could not read {path}: {err}")))?;
    let state = world.object_state(shortname)?;
    let outcome = world.submit_revision(
        identity,
        &RevisionSubmit {
            shortname: shortname.to_owned(),
            code,
            current_rev: state.current_rev,
        },
    )?;
    if outcome.errors.is_empty() {
        println!("Saved {} at revision {}.", shortname, outcome.state.current_rev);
    } else {
        for error in &outcome.errors {
            println!(";_; there is a problem with your charm: {error}");
        }
        println!("Saved anyway; the last working charm stays live.");
    }
    Ok(())
}

/// Pull a leading `"quoted name"` off `input`, returning the name and
/// whatever follows it.
fn parse_quoted(input: &str) -> Option<(&str, &str)> {
    let rest = input.strip_prefix('"')?;
    let end = rest.find('"')?;
    let name = &rest[..end];
    let extra = rest[end + 1..].trim();
    Some((name, extra))
}

fn usage(text: &str) -> WorldError {
    WorldError::MalformedPayload(text.to_owned())
}
