//! Entity graph, permissions, and world storage for Burrow.

pub mod entity;
pub mod perms;
pub mod store;

pub use entity::{slugify, Entity, EntityId, RevisionId};
pub use perms::{Capability, PermLevel, PermissionSet};
pub use store::{EditLock, Revision, StoreError, WorldStore};
