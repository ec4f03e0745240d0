//! Conflict-resolution strategies and the context they run in.
//!
//! A strategy is stateless logic for one CRDT family. It sees one field at a
//! time: during diff it appends operations describing how the field changed,
//! during apply it folds one incoming operation into the live document and
//! its metadata, and during initialization it seeds metadata for a value
//! that already exists. Everything a strategy needs is passed in its context,
//! including the replica identity, so one instance serves every replica.

pub mod op;
pub mod primitives;
pub mod strategies;

use serde_json::Value;

use crate::error::Result;
use crate::metadata::CrdtMetadata;
use crate::path::FieldPath;
use crate::path::Segment;
use crate::schema::FieldDescriptor;
use op::CrdtOperation;
use op::OperationKind;
use primitives::ElementComparer;
use primitives::ElementComparerProvider;
use primitives::ReplicaId;
use primitives::Timestamp;
use strategies::ValidatorRegistry;

/// Shared, read-only services handed to every strategy call.
#[derive(Clone, Copy)]
pub struct Services<'a> {
    pub comparers: &'a dyn ElementComparerProvider,
    pub validators: &'a ValidatorRegistry,
}

impl<'a> Services<'a> {
    /// The comparer a field declares, or the default one.
    pub fn comparer_for(&self, field: &FieldDescriptor) -> Result<&'a dyn ElementComparer> {
        let comparers = self.comparers;
        return comparers.comparer(field.config.comparer.as_deref());
    }
}

/// Everything a strategy sees while diffing one field.
pub struct GenerateContext<'a> {
    pub replica_id: &'a ReplicaId,
    pub path: &'a FieldPath,
    pub field: &'a FieldDescriptor,
    pub original: Option<&'a Value>,
    pub modified: Option<&'a Value>,
    pub original_root: &'a Value,
    pub modified_root: &'a Value,
    /// Metadata as of the original document.
    pub metadata: &'a CrdtMetadata,
    /// Shared by every operation of one diff call.
    pub timestamp: Timestamp,
    pub services: Services<'a>,
    pub operations: &'a mut Vec<CrdtOperation>,
}

impl<'a> GenerateContext<'a> {
    /// Append an operation targeting `path`.
    pub fn emit(&mut self, path: FieldPath, kind: OperationKind, value: Value) {
        let operation = CrdtOperation::new(self.replica_id.clone(), path, kind, value, self.timestamp);
        tracing::trace!(op = %operation.id, path = %operation.path, ?kind, "emit");
        self.operations.push(operation);
    }

    /// Append an operation targeting the field itself.
    pub fn emit_here(&mut self, kind: OperationKind, value: Value) {
        let path = self.path.clone();
        self.emit(path, kind, value);
    }

    pub fn comparer(&self) -> Result<&'a dyn ElementComparer> {
        return self.services.comparer_for(self.field);
    }
}

/// Everything a strategy sees while applying one operation.
pub struct ApplyContext<'a> {
    /// Root of the live document.
    pub document: &'a mut Value,
    pub metadata: &'a mut CrdtMetadata,
    pub operation: &'a CrdtOperation,
    /// Path of the field owning the operation's target. Equal to
    /// `operation.path` except for map entries, whose paths end in a key.
    pub path: &'a FieldPath,
    pub field: &'a FieldDescriptor,
    pub services: Services<'a>,
}

impl<'a> ApplyContext<'a> {
    pub fn comparer(&self) -> Result<&'a dyn ElementComparer> {
        return self.services.comparer_for(self.field);
    }

    /// The map key an entry operation targets.
    pub fn entry_key(&self) -> Option<&'a str> {
        let operation: &'a CrdtOperation = self.operation;
        return match operation.path.last() {
            Some(Segment::Key(key)) if operation.path.parent().as_ref() == Some(self.path) => Some(key.as_str()),
            _ => None,
        };
    }

    /// Log a dropped operation.
    pub fn suppress(&self, reason: &'static str) {
        tracing::debug!(
            op = %self.operation.id,
            path = %self.operation.path,
            timestamp = %self.operation.timestamp,
            reason,
            "suppressed"
        );
    }

    /// Log an applied operation.
    pub fn applied(&self) {
        tracing::trace!(op = %self.operation.id, path = %self.operation.path, kind = ?self.operation.kind, "applied");
    }
}

/// Everything a strategy sees while seeding metadata for an existing value.
pub struct InitContext<'a> {
    pub path: &'a FieldPath,
    pub field: &'a FieldDescriptor,
    pub value: Option<&'a Value>,
    pub metadata: &'a mut CrdtMetadata,
    pub timestamp: Timestamp,
    pub services: Services<'a>,
}

/// Conflict-resolution behaviour for one CRDT family.
///
/// Implementations must converge: applying any set of operations in any
/// order, any number of times, yields the same document content.
pub trait Strategy: Send + Sync {
    /// Short name used in errors and logs.
    fn name(&self) -> &'static str;

    /// Append the operations turning `original` into `modified`.
    fn generate_patch(&self, cx: &mut GenerateContext<'_>) -> Result<()>;

    /// Fold one operation into the document and metadata.
    fn apply_operation(&self, cx: &mut ApplyContext<'_>) -> Result<()>;

    /// Seed metadata for a value present before replication starts.
    fn initialize(&self, cx: &mut InitContext<'_>) -> Result<()> {
        if cx.value.is_some() {
            cx.metadata.advance_lww(cx.path, cx.timestamp);
        }
        return Ok(());
    }
}
