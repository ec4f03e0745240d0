//! Patch application.
//!
//! Each operation is routed to the field that owns its path, then to that
//! field's strategy, which decides from metadata whether to apply, drop or
//! partially apply it. Operations are replayed in list order. An error from
//! one operation stops the patch; operations already applied stay applied.

use serde_json::Value;

use crate::crdt::ApplyContext;
use crate::crdt::op::CrdtOperation;
use crate::crdt::op::CrdtPatch;
use crate::engine::CrdtEngine;
use crate::error::Result;
use crate::metadata::CrdtMetadata;

/// Applies patches for one engine.
#[derive(Clone, Copy, Debug)]
pub struct Applicator<'e> {
    engine: &'e CrdtEngine,
}

impl<'e> Applicator<'e> {
    pub fn new(engine: &'e CrdtEngine) -> Applicator<'e> {
        return Applicator { engine };
    }

    /// Replay every operation of `patch` on `document` and `metadata`.
    pub fn apply_patch(&self, document: &mut Value, metadata: &mut CrdtMetadata, patch: &CrdtPatch) -> Result<()> {
        let span = tracing::debug_span!("apply_patch", operations = patch.len());
        let _enter = span.enter();

        for operation in patch.iter() {
            self.apply_operation(document, metadata, operation)?;
        }
        return Ok(());
    }

    /// Replay one operation.
    pub fn apply_operation(&self, document: &mut Value, metadata: &mut CrdtMetadata, operation: &CrdtOperation) -> Result<()> {
        let Some((owner, field)) = self.engine.index().owner(&operation.path) else {
            tracing::debug!(op = %operation.id, path = %operation.path, "no field owns this path; dropping");
            return Ok(());
        };
        let strategy = self.engine.resolve(field)?;
        let mut cx = ApplyContext {
            document,
            metadata,
            operation,
            path: &owner,
            field,
            services: self.engine.services(),
        };
        return strategy.apply_operation(&mut cx);
    }
}
