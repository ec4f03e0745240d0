//! Identifier types for replicas, operations and observed-remove tags.
//!
//! # Identifier Hierarchy
//!
//! - `ReplicaId`: names the replica that produced an operation
//! - `OperationId`: identifies one operation; breaks ties between
//!   concurrent inserts that land on the same position
//! - `Tag`: a unique marker attached to every add in observed-remove
//!   structures (OR-Set, OR-Map, graphs, trees)
//!
//! # Design Decisions
//!
//! Fresh ids are random v4 uuids. Ids for state that already exists when a
//! replica seeds its metadata are derived with blake3 from the field path and
//! the element, so every replica seeding from the same snapshot agrees on
//! them without talking to the others.

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

/// Identity of one replica.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReplicaId(pub String);

impl ReplicaId {
    /// Create a replica id.
    pub fn new(id: impl Into<String>) -> ReplicaId {
        return ReplicaId(id.into());
    }

    pub fn as_str(&self) -> &str {
        return &self.0;
    }
}

impl From<&str> for ReplicaId {
    fn from(id: &str) -> Self {
        return ReplicaId(id.to_string());
    }
}

impl From<String> for ReplicaId {
    fn from(id: String) -> Self {
        return ReplicaId(id);
    }
}

impl fmt::Display for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        return f.write_str(&self.0);
    }
}

/// Derive 16 bytes from a list of parts with domain separation.
fn derive_bytes(domain: &[u8], parts: &[&[u8]]) -> [u8; 16] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(domain);
    for part in parts {
        hasher.update(&(part.len() as u64).to_le_bytes());
        hasher.update(part);
    }
    let hash = hasher.finalize();
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&hash.as_bytes()[..16]);
    return bytes;
}

/// A unique operation identifier.
///
/// Totally ordered so it can break ties deterministically.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(pub Uuid);

impl OperationId {
    /// Generate a fresh random id.
    pub fn generate() -> OperationId {
        return OperationId(Uuid::new_v4());
    }

    /// Derive a stable id from its parts.
    pub fn derive(parts: &[&[u8]]) -> OperationId {
        return OperationId(Uuid::from_bytes(derive_bytes(b"converge/op", parts)));
    }

    /// The all-zero id. Sorts before every generated id.
    pub fn nil() -> OperationId {
        return OperationId(Uuid::nil());
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        return write!(f, "{}", self.0);
    }
}

/// A unique tag attached to one observed add.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tag(pub Uuid);

impl Tag {
    /// Generate a fresh random tag.
    pub fn generate() -> Tag {
        return Tag(Uuid::new_v4());
    }

    /// Derive a stable tag from its parts.
    pub fn derive(parts: &[&[u8]]) -> Tag {
        return Tag(Uuid::from_bytes(derive_bytes(b"converge/tag", parts)));
    }
}
