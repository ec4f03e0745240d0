//! Exclusive lock register.
//!
//! The field has a companion holder field (a sibling named by the
//! `lock_holder_field` config). A replica only writes while the lock is free
//! or held by itself. Applying is guarded LWW over the lock record: a write
//! lands, and transfers the lock to the holder it names, only if it is newer
//! than the last accepted lock write. A lagging writer that last saw the lock
//! free therefore cannot clobber a later holder.

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::crdt::ApplyContext;
use crate::crdt::GenerateContext;
use crate::crdt::Strategy;
use crate::crdt::op::OperationKind;
use crate::error::Error;
use crate::error::Result;
use crate::metadata::LockRecord;
use crate::path::FieldPath;
use crate::schema::FieldDescriptor;

/// Payload of a lock write.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LockWrite {
    pub value: Value,
    pub holder: Option<String>,
}

fn holder_path(field: &FieldDescriptor, path: &FieldPath) -> Result<FieldPath> {
    let Some(name) = field.config.lock_holder_field.as_deref() else {
        return Err(Error::missing_config(path, "lock_holder_field"));
    };
    return path.sibling(name).ok_or_else(|| Error::missing_config(path, "lock_holder_field"));
}

fn holder_of(root: &Value, holder_path: &FieldPath) -> Option<String> {
    return holder_path.resolve(root).and_then(Value::as_str).map(str::to_string);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ExclusiveLock;

impl Strategy for ExclusiveLock {
    fn name(&self) -> &'static str {
        return "exclusive_lock";
    }

    fn generate_patch(&self, cx: &mut GenerateContext<'_>) -> Result<()> {
        let holder_path = holder_path(cx.field, cx.path)?;
        if cx.original == cx.modified {
            return Ok(());
        }
        if let Some(current) = holder_of(cx.original_root, &holder_path) {
            if current != cx.replica_id.as_str() {
                tracing::debug!(path = %cx.path, holder = %current, "lock held elsewhere, not writing");
                return Ok(());
            }
        }
        let stored = cx.metadata.locks.get(cx.path).map(|r| r.timestamp);
        if !cx.timestamp.wins_over(stored) {
            return Ok(());
        }
        let write = LockWrite {
            value: cx.modified.cloned().unwrap_or(Value::Null),
            holder: holder_of(cx.modified_root, &holder_path),
        };
        cx.emit_here(OperationKind::Upsert, serde_json::to_value(write)?);
        return Ok(());
    }

    fn apply_operation(&self, cx: &mut ApplyContext<'_>) -> Result<()> {
        let operation = cx.operation;
        if operation.kind != OperationKind::Upsert {
            return Err(Error::unsupported(self.name(), operation.kind, &operation.path));
        }
        let holder_path = holder_path(cx.field, cx.path)?;
        let Some(write) = operation.payload::<LockWrite>() else {
            return Ok(());
        };
        let stored = cx.metadata.locks.get(cx.path).map(|r| r.timestamp);
        if !operation.timestamp.wins_over(stored) {
            cx.suppress("stale lock write");
            return Ok(());
        }
        let Some(slot) = cx.path.slot_mut(cx.document) else {
            cx.suppress("unresolvable");
            return Ok(());
        };
        *slot = write.value;
        if let Some(holder_slot) = holder_path.slot_mut(cx.document) {
            *holder_slot = write.holder.clone().map(Value::String).unwrap_or(Value::Null);
        }
        cx.metadata.locks.insert(
            cx.path.clone(),
            LockRecord {
                holder: write.holder,
                timestamp: operation.timestamp,
            },
        );
        cx.metadata.advance_lww(cx.path, operation.timestamp);
        cx.applied();
        return Ok(());
    }
}
