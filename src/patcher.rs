//! Patch generation.
//!
//! The patcher walks the schema from the root, pairing each field's value
//! in the original and modified documents. Unchanged fields are skipped.
//! A nested object without an explicit strategy is walked field by field
//! while it is an object on both sides. When it appears, disappears or
//! changes type it is written as one LWW value if all its fields are
//! registers; an object holding any other strategy is always walked, so a
//! counter or set inside it is only ever changed through its own
//! operations. Every other field is handed to its strategy, which appends
//! operations to the shared list.
//!
//! All operations of one call share one timestamp: a diff is one write
//! event.

use serde_json::Value;

use crate::crdt::GenerateContext;
use crate::crdt::op::CrdtOperation;
use crate::crdt::op::CrdtPatch;
use crate::crdt::primitives::ReplicaId;
use crate::crdt::primitives::Timestamp;
use crate::engine::CrdtEngine;
use crate::error::Result;
use crate::metadata::CrdtMetadata;
use crate::path::FieldPath;
use crate::schema::FieldDescriptor;
use crate::schema::Schema;

/// Inputs shared by every field of one diff.
struct Walk<'a> {
    replica_id: &'a ReplicaId,
    original_root: &'a Value,
    modified_root: &'a Value,
    metadata: &'a CrdtMetadata,
    timestamp: Timestamp,
}

/// Generates patches for one engine.
#[derive(Clone, Copy, Debug)]
pub struct Patcher<'e> {
    engine: &'e CrdtEngine,
}

impl<'e> Patcher<'e> {
    pub fn new(engine: &'e CrdtEngine) -> Patcher<'e> {
        return Patcher { engine };
    }

    /// Diff `original` against `modified`.
    ///
    /// `metadata` must describe `original`; strategies read it to gate
    /// their writes and to find the tags and identifiers they remove.
    pub fn generate_patch(
        &self,
        replica_id: &ReplicaId,
        original: &Value,
        metadata: &CrdtMetadata,
        modified: &Value,
        timestamp: Timestamp,
    ) -> Result<CrdtPatch> {
        let span = tracing::debug_span!("generate_patch", replica = %replica_id, %timestamp);
        let _enter = span.enter();

        let walk = Walk {
            replica_id,
            original_root: original,
            modified_root: modified,
            metadata,
            timestamp,
        };
        let mut operations = Vec::new();
        self.walk_object(&walk, self.engine.schema(), &FieldPath::root(), Some(original), Some(modified), &mut operations)?;

        tracing::debug!(operations = operations.len(), "patch generated");
        return Ok(CrdtPatch::from_operations(operations));
    }

    fn walk_object(
        &self,
        walk: &Walk<'_>,
        schema: &Schema,
        prefix: &FieldPath,
        original: Option<&Value>,
        modified: Option<&Value>,
        operations: &mut Vec<CrdtOperation>,
    ) -> Result<()> {
        for field in &schema.fields {
            let path = prefix.field(&field.name);
            let before = original.and_then(|o| o.get(&field.name));
            let after = modified.and_then(|m| m.get(&field.name));
            if before == after {
                continue;
            }
            if let Some(child) = field.child_schema().filter(|_| field.is_walked()) {
                let both_objects = before.is_some_and(Value::is_object) && after.is_some_and(Value::is_object);
                // Counters, sets and the like inside cannot be replaced whole.
                if both_objects || !child.is_register_tree() {
                    self.walk_object(walk, child, &path, before, after, operations)?;
                    continue;
                }
            }
            self.diff_field(walk, field, &path, before, after, operations)?;
        }
        return Ok(());
    }

    fn diff_field(
        &self,
        walk: &Walk<'_>,
        field: &FieldDescriptor,
        path: &FieldPath,
        original: Option<&Value>,
        modified: Option<&Value>,
        operations: &mut Vec<CrdtOperation>,
    ) -> Result<()> {
        let strategy = self.engine.resolve(field)?;
        let before = operations.len();
        let mut cx = GenerateContext {
            replica_id: walk.replica_id,
            path,
            field,
            original,
            modified,
            original_root: walk.original_root,
            modified_root: walk.modified_root,
            metadata: walk.metadata,
            timestamp: walk.timestamp,
            services: self.engine.services(),
            operations: &mut *operations,
        };
        strategy.generate_patch(&mut cx)?;
        tracing::trace!(%path, strategy = strategy.name(), emitted = operations.len() - before, "field diffed");
        return Ok(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crdt::op::OperationKind;
    use crate::engine::EngineBuilder;
    use crate::schema::StrategyKind;
    use serde_json::json;

    fn engine() -> CrdtEngine {
        let schema = Schema::new(vec![
            FieldDescriptor::scalar("title"),
            FieldDescriptor::scalar("views").strategy(StrategyKind::Counter),
            FieldDescriptor::object(
                "owner",
                Schema::new(vec![FieldDescriptor::scalar("name"), FieldDescriptor::scalar("email")]),
            ),
        ]);
        return EngineBuilder::new(schema).build().unwrap();
    }

    fn diff(engine: &CrdtEngine, original: Value, modified: Value) -> CrdtPatch {
        let metadata = engine.initialize(&original, Timestamp::ZERO).unwrap();
        return engine
            .generate_patch(&ReplicaId::from("a"), &original, &metadata, &modified, Timestamp(10))
            .unwrap();
    }

    #[test]
    fn unchanged_document_is_empty() {
        let engine = engine();
        let doc = json!({"title": "t", "views": 3, "owner": {"name": "ann"}});
        assert!(diff(&engine, doc.clone(), doc).is_empty());
    }

    #[test]
    fn nested_objects_are_walked() {
        let engine = engine();
        let patch = diff(
            &engine,
            json!({"title": "t", "views": 3, "owner": {"name": "ann", "email": "a@x"}}),
            json!({"title": "t", "views": 5, "owner": {"name": "bea", "email": "a@x"}}),
        );
        let targets: Vec<String> = patch.iter().map(|op| op.path.to_string()).collect();
        assert_eq!(targets, vec!["$.views", "$.owner.name"]);
        assert_eq!(patch.operations[0].kind, OperationKind::Increment);
        assert!(patch.iter().all(|op| op.timestamp == Timestamp(10)));
    }

    #[test]
    fn appearing_object_is_one_write() {
        let engine = engine();
        let patch = diff(&engine, json!({"title": "t"}), json!({"title": "t", "owner": {"name": "ann"}}));
        assert_eq!(patch.len(), 1);
        assert_eq!(patch.operations[0].path.to_string(), "$.owner");
        assert_eq!(patch.operations[0].value, json!({"name": "ann"}));
    }

    #[test]
    fn object_holding_a_counter_is_always_walked() {
        let schema = Schema::new(vec![FieldDescriptor::object(
            "stats",
            Schema::new(vec![
                FieldDescriptor::scalar("visits").strategy(StrategyKind::Counter),
                FieldDescriptor::scalar("label"),
            ]),
        )]);
        let engine = EngineBuilder::new(schema).build().unwrap();

        let patch = diff(&engine, json!({}), json!({"stats": {"visits": 2, "label": "x"}}));
        let targets: Vec<String> = patch.iter().map(|op| op.path.to_string()).collect();
        assert_eq!(targets, vec!["$.stats.visits", "$.stats.label"]);

        let patch = diff(&engine, json!({"stats": {"visits": 2, "label": "x"}}), json!({"stats": null}));
        let kinds: Vec<OperationKind> = patch.iter().map(|op| op.kind).collect();
        assert_eq!(kinds, vec![OperationKind::Increment, OperationKind::Remove]);
        assert_eq!(patch.operations[0].value, json!(-2));
    }

    #[test]
    fn undeclared_fields_are_ignored() {
        let engine = engine();
        let patch = diff(&engine, json!({"title": "t", "extra": 1}), json!({"title": "t", "extra": 2}));
        assert!(patch.is_empty());
    }
}
