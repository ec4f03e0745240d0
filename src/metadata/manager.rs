//! Metadata lifecycle: seeding and maintenance.
//!
//! `initialize` builds metadata for a document that already exists, by
//! walking the schema and letting each field's strategy seed its state.
//! Seeded tags and identifiers are derived from the path and the value, so
//! replicas seeded from the same snapshot agree on them without talking to
//! each other.
//!
//! The maintenance operations bound metadata growth:
//!
//! - `advance_version_vector` records that everything a replica produced up
//!   to a timestamp has been applied, then compacts seen-exceptions.
//! - `compact_seen_exceptions` drops exceptions the version vector covers.
//! - `prune` forgets removal records older than a cutoff. An operation older
//!   than the cutoff that arrives afterwards may resurrect what it removed,
//!   so the cutoff must be older than anything still in flight. Two-phase
//!   tombstones are never pruned.

use serde_json::Value;

use super::CrdtMetadata;
use super::LwwElementState;
use super::OrSetState;
use crate::crdt::InitContext;
use crate::crdt::primitives::ReplicaId;
use crate::crdt::primitives::Timestamp;
use crate::engine::CrdtEngine;
use crate::error::Result;
use crate::path::FieldPath;
use crate::schema::Schema;

/// What `prune` may forget.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PruneOptions {
    /// Removal records and tombstones strictly older than this are dropped.
    pub tombstones_before: Timestamp,
}

impl PruneOptions {
    pub fn before(timestamp: Timestamp) -> PruneOptions {
        return PruneOptions {
            tombstones_before: timestamp,
        };
    }
}

/// Seeds and maintains metadata for one engine's documents.
#[derive(Clone, Copy, Debug)]
pub struct MetadataManager<'e> {
    engine: &'e CrdtEngine,
}

impl<'e> MetadataManager<'e> {
    pub fn new(engine: &'e CrdtEngine) -> MetadataManager<'e> {
        return MetadataManager { engine };
    }

    /// Fresh metadata describing `document`, with every existing value
    /// stamped at `timestamp`.
    pub fn initialize(&self, document: &Value, timestamp: Timestamp) -> Result<CrdtMetadata> {
        let mut metadata = CrdtMetadata::new();
        self.seed(self.engine.schema(), &FieldPath::root(), Some(document), document, &mut metadata, timestamp)?;
        tracing::debug!(%timestamp, "metadata initialized");
        return Ok(metadata);
    }

    fn seed(
        &self,
        schema: &Schema,
        prefix: &FieldPath,
        object: Option<&Value>,
        root: &Value,
        metadata: &mut CrdtMetadata,
        timestamp: Timestamp,
    ) -> Result<()> {
        for field in &schema.fields {
            let path = prefix.field(&field.name);
            let value = object.and_then(|o| o.get(&field.name));
            if let Some(child) = field.child_schema().filter(|_| field.is_walked()) {
                if value.is_none_or(Value::is_object) || !child.is_register_tree() {
                    // The object as a whole is also an LWW value.
                    if value.is_some() {
                        metadata.advance_lww(&path, timestamp);
                    }
                    self.seed(child, &path, value, root, metadata, timestamp)?;
                    continue;
                }
            }
            let strategy = self.engine.resolve(field)?;
            let mut cx = InitContext {
                path: &path,
                field,
                value: path.resolve(root),
                metadata: &mut *metadata,
                timestamp,
                services: self.engine.services(),
            };
            strategy.initialize(&mut cx)?;
        }
        return Ok(());
    }

    /// Record that every operation `replica` produced up to `timestamp` has
    /// been applied.
    pub fn advance_version_vector(metadata: &mut CrdtMetadata, replica: &ReplicaId, timestamp: Timestamp) {
        metadata.version_vector.advance(replica, timestamp);
        MetadataManager::compact_seen_exceptions(metadata);
    }

    /// Drop seen-exceptions the version vector now covers. Returns how many
    /// were dropped.
    pub fn compact_seen_exceptions(metadata: &mut CrdtMetadata) -> usize {
        let before = metadata.seen_exceptions.len();
        let vector = &metadata.version_vector;
        metadata.seen_exceptions.retain(|seen| !vector.covers(&seen.replica_id, seen.timestamp));
        return before - metadata.seen_exceptions.len();
    }

    /// Forget removal state older than the cutoff. Returns the number of
    /// records dropped.
    pub fn prune(metadata: &mut CrdtMetadata, options: &PruneOptions) -> usize {
        let cutoff = options.tombstones_before;
        let mut dropped = 0;

        for state in metadata.lww_sets.values_mut().chain(metadata.lww_maps.values_mut()) {
            dropped += prune_lww_elements(state, cutoff);
        }
        for tracker in metadata.positions.values_mut() {
            let before = tracker.tombstones.len();
            tracker.tombstones.retain(|_, removed| *removed >= cutoff);
            dropped += before - tracker.tombstones.len();
        }
        for tracker in metadata.lseq.values_mut() {
            let before = tracker.tombstones.len();
            tracker.tombstones.retain(|(_, removed)| *removed >= cutoff);
            dropped += before - tracker.tombstones.len();
        }
        for state in metadata.or_sets.values_mut().chain(metadata.or_maps.values_mut()) {
            dropped += prune_tags(state, cutoff);
        }
        for graph in metadata.graphs.values_mut() {
            dropped += prune_tags(&mut graph.vertices, cutoff);
            dropped += prune_tags(&mut graph.edges, cutoff);
        }
        for tree in metadata.trees.values_mut() {
            dropped += prune_tags(&mut tree.nodes, cutoff);
            let nodes = &tree.nodes;
            tree.parents.retain(|node, _| nodes.adds.contains_key(node.as_str()));
        }
        dropped += MetadataManager::compact_seen_exceptions(metadata);

        tracing::debug!(%cutoff, dropped, "metadata pruned");
        return dropped;
    }
}

/// Drop elements removed before the cutoff and not updated since.
fn prune_lww_elements(state: &mut LwwElementState, cutoff: Timestamp) -> usize {
    let expired: Vec<String> = state
        .removals
        .iter()
        .filter(|(key, removed)| **removed < cutoff && !state.is_present(key))
        .map(|(key, _)| key.clone())
        .collect();
    for key in &expired {
        state.removals.remove(key);
        state.updates.remove(key);
    }
    return expired.len();
}

/// Drop tags that were both added before the cutoff and removed.
fn prune_tags(state: &mut OrSetState, cutoff: Timestamp) -> usize {
    let mut dropped = 0;
    for (key, adds) in state.adds.iter_mut() {
        let Some(removed) = state.removes.get_mut(key) else {
            continue;
        };
        adds.retain(|tag, tagged| {
            let expired = tagged.timestamp < cutoff && removed.contains(tag);
            if expired {
                removed.remove(tag);
                dropped += 1;
            }
            return !expired;
        });
    }
    state.adds.retain(|_, adds| !adds.is_empty());
    state.removes.retain(|_, tags| !tags.is_empty());
    return dropped;
}
