//! Capability-based permission checks.

use serde::{Deserialize, Serialize};

/// One of the four gated interaction classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Read,
    Write,
    Carry,
    Execute,
}

impl Capability {
    pub const ALL: [Capability; 4] = [
        Capability::Read,
        Capability::Write,
        Capability::Carry,
        Capability::Execute,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Read => "read",
            Capability::Write => "write",
            Capability::Carry => "carry",
            Capability::Execute => "execute",
        }
    }

    pub fn parse(s: &str) -> Option<Capability> {
        match s {
            "read" => Some(Capability::Read),
            "write" => Some(Capability::Write),
            "carry" => Some(Capability::Carry),
            "execute" => Some(Capability::Execute),
            _ => None,
        }
    }
}

/// Who satisfies a capability: only the author, or anyone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermLevel {
    Owner,
    World,
}

impl PermLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            PermLevel::Owner => "owner",
            PermLevel::World => "world",
        }
    }

    pub fn parse(s: &str) -> Option<PermLevel> {
        match s {
            "owner" => Some(PermLevel::Owner),
            "world" => Some(PermLevel::World),
            _ => None,
        }
    }
}

/// Per-entity permission values, one per capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionSet {
    pub read: PermLevel,
    pub write: PermLevel,
    pub carry: PermLevel,
    pub execute: PermLevel,
}

impl Default for PermissionSet {
    /// Creation defaults: world-readable and usable, author-writable.
    fn default() -> Self {
        PermissionSet {
            read: PermLevel::World,
            write: PermLevel::Owner,
            carry: PermLevel::World,
            execute: PermLevel::World,
        }
    }
}

impl PermissionSet {
    pub fn get(&self, cap: Capability) -> PermLevel {
        match cap {
            Capability::Read => self.read,
            Capability::Write => self.write,
            Capability::Carry => self.carry,
            Capability::Execute => self.execute,
        }
    }

    pub fn set(&mut self, cap: Capability, level: PermLevel) {
        match cap {
            Capability::Read => self.read = level,
            Capability::Write => self.write = level,
            Capability::Carry => self.carry = level,
            Capability::Execute => self.execute = level,
        }
    }

    /// Whether `actor` satisfies `cap` on an entity authored by `author`.
    ///
    /// Depends only on this permission set and the two identities, never
    /// on any other entity's state.
    pub fn allows(&self, cap: Capability, actor: &str, author: &str) -> bool {
        match self.get(cap) {
            PermLevel::World => true,
            PermLevel::Owner => actor == author,
        }
    }
}
