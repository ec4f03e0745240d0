//! Per-replica conflict-resolution metadata.
//!
//! One `CrdtMetadata` travels with each replica's document and is mutated
//! only by the applicator, in lockstep with the document. It is a single
//! record with one typed sub-map per strategy family, each keyed by the
//! field path it describes. Per-entry state (map keys, set elements, tree
//! nodes) lives in nested maps rather than synthetic sub-paths.
//!
//! All state is monotonic: LWW timestamps only move forward, tag sets only
//! grow, version vectors only advance. Pruning (see `manager`) is the only
//! thing that ever shrinks it.

pub mod manager;

use std::collections::BTreeMap;

use rustc_hash::FxHashMap;
use rustc_hash::FxHashSet;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::crdt::op::CrdtOperation;
use crate::crdt::primitives::ElementKey;
use crate::crdt::primitives::LseqIdentifier;
use crate::crdt::primitives::Numeric;
use crate::crdt::primitives::OperationId;
use crate::crdt::primitives::PositionalIdentifier;
use crate::crdt::primitives::ReplicaId;
use crate::crdt::primitives::Tag;
use crate::crdt::primitives::Timestamp;
use crate::crdt::primitives::VersionVector;
use crate::path::FieldPath;

pub use manager::MetadataManager;
pub use manager::PruneOptions;

/// An operation recorded ahead of the version vector.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SeenOperation {
    pub id: OperationId,
    pub replica_id: ReplicaId,
    pub timestamp: Timestamp,
}

impl SeenOperation {
    pub fn of(operation: &CrdtOperation) -> SeenOperation {
        return SeenOperation {
            id: operation.id,
            replica_id: operation.replica_id.clone(),
            timestamp: operation.timestamp,
        };
    }
}

/// Positional identifiers parallel to an LCS-diffed sequence.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PositionalTracker {
    /// Sorted; `ids[i]` identifies element `i` of the sequence.
    pub ids: Vec<PositionalIdentifier>,
    /// Creator ids of removed elements, with the removal timestamp.
    pub tombstones: FxHashMap<OperationId, Timestamp>,
}

/// Dense identifiers parallel to an LSEQ sequence.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LseqTracker {
    /// Sorted; `ids[i]` identifies element `i` of the sequence.
    pub ids: Vec<LseqIdentifier>,
    /// Removed identifiers with the removal timestamp, sorted by identifier.
    pub tombstones: Vec<(LseqIdentifier, Timestamp)>,
}

impl LseqTracker {
    pub fn is_tombstoned(&self, id: &LseqIdentifier) -> bool {
        return self.tombstones.binary_search_by(|(t, _)| t.cmp(id)).is_ok();
    }

    pub fn add_tombstone(&mut self, id: LseqIdentifier, timestamp: Timestamp) {
        match self.tombstones.binary_search_by(|(t, _)| t.cmp(&id)) {
            Ok(i) => self.tombstones[i].1 = self.tombstones[i].1.max(timestamp),
            Err(i) => self.tombstones.insert(i, (id, timestamp)),
        }
    }
}

/// One replica's latest contribution to an average register.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Contribution {
    pub value: Numeric,
    pub timestamp: Timestamp,
}

/// The value carried by one observed add.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaggedValue {
    pub value: Value,
    pub timestamp: Timestamp,
}

/// Observed-remove tags for the elements of one collection.
///
/// An element is live iff at least one of its add tags has not been
/// removed. Its visible value is the one carried by the newest live add,
/// ties broken by tag, so it does not depend on delivery order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OrSetState {
    pub adds: FxHashMap<ElementKey, BTreeMap<Tag, TaggedValue>>,
    pub removes: FxHashMap<ElementKey, FxHashSet<Tag>>,
}

impl OrSetState {
    /// Record an add. Returns false if the tag was already known.
    pub fn add(&mut self, key: &str, tag: Tag, value: Value, timestamp: Timestamp) -> bool {
        let tags = self.adds.entry(key.to_string()).or_default();
        if tags.contains_key(&tag) {
            return false;
        }
        tags.insert(tag, TaggedValue { value, timestamp });
        return true;
    }

    pub fn remove<'a>(&mut self, key: &str, tags: impl IntoIterator<Item = &'a Tag>) {
        let removed = self.removes.entry(key.to_string()).or_default();
        for tag in tags {
            removed.insert(*tag);
        }
    }

    fn is_removed(&self, key: &str, tag: &Tag) -> bool {
        return self.removes.get(key).is_some_and(|r| r.contains(tag));
    }

    /// Add tags not yet removed, in tag order.
    pub fn live_tags(&self, key: &str) -> Vec<Tag> {
        let Some(adds) = self.adds.get(key) else {
            return Vec::new();
        };
        return adds.keys().filter(|t| !self.is_removed(key, t)).copied().collect();
    }

    pub fn is_live(&self, key: &str) -> bool {
        let Some(adds) = self.adds.get(key) else {
            return false;
        };
        return adds.keys().any(|t| !self.is_removed(key, t));
    }

    /// Visible value of a live element.
    pub fn value(&self, key: &str) -> Option<&Value> {
        let adds = self.adds.get(key)?;
        return adds
            .iter()
            .filter(|(t, _)| !self.is_removed(key, t))
            .max_by(|(ta, a), (tb, b)| a.timestamp.cmp(&b.timestamp).then(ta.cmp(tb)))
            .map(|(_, tagged)| &tagged.value);
    }

    /// Keys with at least one live tag, sorted.
    pub fn live_keys(&self) -> Vec<&ElementKey> {
        let mut keys: Vec<&ElementKey> = self.adds.keys().filter(|k| self.is_live(k)).collect();
        keys.sort();
        return keys;
    }
}

/// Add/tombstone sets for two-phase structures. Tombstones are permanent.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TwoPhaseState {
    pub adds: FxHashSet<ElementKey>,
    pub tombstones: FxHashSet<ElementKey>,
}

impl TwoPhaseState {
    pub fn is_live(&self, key: &str) -> bool {
        return self.adds.contains(key) && !self.tombstones.contains(key);
    }
}

/// Per-element update and removal timestamps (LWW element set / LWW map).
///
/// An element is present iff its latest update is strictly newer than its
/// latest removal.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LwwElementState {
    pub updates: FxHashMap<ElementKey, Timestamp>,
    pub removals: FxHashMap<ElementKey, Timestamp>,
}

impl LwwElementState {
    pub fn is_present(&self, key: &str) -> bool {
        return match self.updates.get(key) {
            Some(updated) => updated.wins_over(self.removals.get(key).copied()),
            None => false,
        };
    }
}

/// Positive and negative accumulators of one PN-counter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PnCounter {
    pub positive: Numeric,
    pub negative: Numeric,
}

impl PnCounter {
    pub fn value(&self) -> Numeric {
        return self.positive - self.negative;
    }

    pub fn apply(&mut self, delta: Numeric) {
        if delta.is_negative() {
            self.negative = self.negative + (-delta);
        } else {
            self.positive = self.positive + delta;
        }
    }
}

/// Exclusive lock holder and the timestamp of the write that set it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LockRecord {
    pub holder: Option<String>,
    pub timestamp: Timestamp,
}

/// OR tags for the vertices and edges of a graph.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphState {
    pub vertices: OrSetState,
    pub edges: OrSetState,
}

/// Add/tombstone sets for the vertices and edges of a two-phase graph.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TwoPhaseGraphState {
    pub vertices: TwoPhaseState,
    pub edges: TwoPhaseState,
    /// Values of added edges. An edge is shown while it and both of its
    /// endpoints are live.
    pub edge_values: BTreeMap<ElementKey, Value>,
}

/// A node's parent pointer and the timestamp of the write that set it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParentRecord {
    pub parent: Option<String>,
    pub timestamp: Timestamp,
}

/// Replicated tree state: node liveness and value by tags, parent pointer
/// by LWW per node.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TreeState {
    pub nodes: OrSetState,
    pub parents: FxHashMap<String, ParentRecord>,
}

/// All conflict-resolution metadata for one document replica.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CrdtMetadata {
    /// LWW registers, nested objects and state machines.
    pub lww: FxHashMap<FieldPath, Timestamp>,
    /// Highest covered timestamp per replica.
    pub version_vector: VersionVector,
    /// Operations applied ahead of the version vector.
    pub seen_exceptions: FxHashSet<SeenOperation>,
    pub positions: FxHashMap<FieldPath, PositionalTracker>,
    pub lseq: FxHashMap<FieldPath, LseqTracker>,
    pub averages: FxHashMap<FieldPath, BTreeMap<ReplicaId, Contribution>>,
    pub or_sets: FxHashMap<FieldPath, OrSetState>,
    pub or_maps: FxHashMap<FieldPath, OrSetState>,
    pub two_phase_sets: FxHashMap<FieldPath, TwoPhaseState>,
    /// LWW element sets and priority queues.
    pub lww_sets: FxHashMap<FieldPath, LwwElementState>,
    pub lww_maps: FxHashMap<FieldPath, LwwElementState>,
    /// Unbounded running totals behind bounded counters.
    pub counters: FxHashMap<FieldPath, Numeric>,
    pub counter_maps: FxHashMap<FieldPath, FxHashMap<String, PnCounter>>,
    pub locks: FxHashMap<FieldPath, LockRecord>,
    /// Per-voter LWW timestamps.
    pub votes: FxHashMap<FieldPath, FxHashMap<String, Timestamp>>,
    pub graphs: FxHashMap<FieldPath, GraphState>,
    pub two_phase_graphs: FxHashMap<FieldPath, TwoPhaseGraphState>,
    pub trees: FxHashMap<FieldPath, TreeState>,
}

impl CrdtMetadata {
    /// Create empty metadata.
    pub fn new() -> CrdtMetadata {
        return CrdtMetadata::default();
    }

    /// True if this exact operation was already applied.
    pub fn has_seen(&self, operation: &CrdtOperation) -> bool {
        if self.version_vector.covers(&operation.replica_id, operation.timestamp) {
            return true;
        }
        return self.seen_exceptions.contains(&SeenOperation::of(operation));
    }

    /// Record an operation as applied.
    pub fn mark_seen(&mut self, operation: &CrdtOperation) {
        if !self.version_vector.covers(&operation.replica_id, operation.timestamp) {
            self.seen_exceptions.insert(SeenOperation::of(operation));
        }
    }

    /// Stored LWW timestamp for a path.
    pub fn lww_timestamp(&self, path: &FieldPath) -> Option<Timestamp> {
        return self.lww.get(path).copied();
    }

    /// Advance the LWW timestamp for a path. Never moves backwards.
    pub fn advance_lww(&mut self, path: &FieldPath, timestamp: Timestamp) {
        let entry = self.lww.entry(path.clone()).or_insert(timestamp);
        *entry = (*entry).max(timestamp);
    }
}
