//! Starter charms for newly created entities.
//!
//! Every entity is born with a script; creation picks the template for
//! its archetype and the author edits from there.

use std::fmt;

/// What kind of thing is being created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Archetype {
    Item,
    Player,
    Room,
    Exit,
    Portkey,
}

impl Archetype {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "item" => Some(Self::Item),
            "player" => Some(Self::Player),
            "room" => Some(Self::Room),
            "exit" => Some(Self::Exit),
            "portkey" => Some(Self::Portkey),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Item => "item",
            Self::Player => "player",
            Self::Room => "room",
            Self::Exit => "exit",
            Self::Portkey => "portkey",
        }
    }

    /// The charm source a fresh entity of this archetype starts with.
    /// Exits and portkeys come pre-wired with a `touch` handler that
    /// moves whoever touched them to the room named by their `target`
    /// data key (set by the creation op, not by the charm); exits
    /// answer `go` the same way for directional movement.
    pub fn charm_source(self, name: &str) -> String {
        let name = name.replace('\\', "\\\\").replace('"', "\\\"");
        match self {
            Self::Item => format!(
                "(charm \"{name}\"\n  (defaults {{\"description\" \"A {name}\"}}))\n"
            ),
            Self::Player => format!(
                "(charm \"{name}\"\n  (defaults {{\"description\" \"A gentle soul named {name}\"}}))\n"
            ),
            Self::Room => format!(
                "(charm \"{name}\"\n  (defaults {{\"description\" \"A swirling mist with no discernible features\"}}))\n"
            ),
            Self::Exit => format!(
                "(charm \"{name}\"\n  (defaults {{\"description\" \"A {name}\"}})\n  (on \"touch\"\n    (tell-sender \"move\" (get-data \"target\" \"\")))\n  (on \"go\"\n    (tell-sender \"move\" (get-data \"target\" \"\"))))\n"
            ),
            Self::Portkey => format!(
                "(charm \"{name}\"\n  (defaults {{\"description\" \"A {name}\"}})\n  (on \"touch\"\n    (tell-sender \"move\" (get-data \"target\" \"\"))))\n"
            ),
        }
    }
}

impl fmt::Display for Archetype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
