//! Operations and patches: the only data that crosses a replica boundary.
//!
//! A patch is produced by one diff call and describes what changed in terms
//! every replica can replay. Each operation names its target by path, says
//! what kind of change it is, and carries an opaque payload whose shape is
//! owned by the strategy resolving that path:
//!
//! - a plain scalar (registers, counter deltas)
//! - a small tagged record (add-with-tag, remove-with-tags, key/value pair,
//!   lock payload, vote payload, tree add/remove/move)
//!
//! Metadata never travels; each replica maintains its own.

use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::primitives::OperationId;
use super::primitives::ReplicaId;
use super::primitives::Timestamp;
use crate::path::FieldPath;

/// What an operation does to its target.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    /// Insert or overwrite.
    Upsert,
    /// Remove an element, entry or value.
    Remove,
    /// Add a signed delta.
    Increment,
    /// Re-parent a tree node.
    Move,
}

/// One replicated change. Immutable once created.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CrdtOperation {
    pub id: OperationId,
    pub replica_id: ReplicaId,
    pub path: FieldPath,
    pub kind: OperationKind,
    pub value: Value,
    pub timestamp: Timestamp,
}

impl CrdtOperation {
    /// Create an operation with a fresh id.
    pub fn new(replica_id: ReplicaId, path: FieldPath, kind: OperationKind, value: Value, timestamp: Timestamp) -> CrdtOperation {
        return CrdtOperation {
            id: OperationId::generate(),
            replica_id,
            path,
            kind,
            value,
            timestamp,
        };
    }

    /// Decode the payload as a strategy-specific record.
    ///
    /// Returns `None` for malformed payloads; callers drop those silently.
    pub fn payload<T: DeserializeOwned>(&self) -> Option<T> {
        return match T::deserialize(&self.value) {
            Ok(payload) => Some(payload),
            Err(error) => {
                tracing::debug!(op = %self.id, path = %self.path, %error, "discarding malformed payload");
                None
            }
        };
    }
}

/// An ordered list of operations from one diff call.
///
/// Order is kept for traceability; strategies converge regardless of it.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CrdtPatch {
    pub operations: Vec<CrdtOperation>,
}

impl CrdtPatch {
    /// Create an empty patch.
    pub fn new() -> CrdtPatch {
        return CrdtPatch { operations: Vec::new() };
    }

    pub fn from_operations(operations: Vec<CrdtOperation>) -> CrdtPatch {
        return CrdtPatch { operations };
    }

    pub fn len(&self) -> usize {
        return self.operations.len();
    }

    pub fn is_empty(&self) -> bool {
        return self.operations.is_empty();
    }

    pub fn iter(&self) -> impl Iterator<Item = &CrdtOperation> {
        return self.operations.iter();
    }

    /// Concatenate another patch after this one.
    pub fn extend(&mut self, other: CrdtPatch) {
        self.operations.extend(other.operations);
    }
}

impl IntoIterator for CrdtPatch {
    type Item = CrdtOperation;
    type IntoIter = std::vec::IntoIter<CrdtOperation>;

    fn into_iter(self) -> Self::IntoIter {
        return self.operations.into_iter();
    }
}
