//! A typed replica: one document, its metadata, an identity and a clock.
//!
//! `Replica` is the convenience layer over the engine. Local edits go
//! through `update`, which diffs the edited document against the current
//! one, applies the patch locally and returns it for broadcast. Patches
//! from other replicas go through `merge`.
//!
//! ```
//! use std::sync::Arc;
//!
//! use converge::Replica;
//! use converge::crdt::primitives::SequentialTimestampProvider;
//! use converge::engine::EngineBuilder;
//! use converge::schema::Document;
//! use converge::schema::FieldDescriptor;
//! use converge::schema::Schema;
//! use converge::schema::StrategyKind;
//! use serde::Deserialize;
//! use serde::Serialize;
//!
//! #[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
//! struct Post {
//!     title: String,
//!     likes: i64,
//! }
//!
//! impl Document for Post {
//!     fn schema() -> Schema {
//!         return Schema::new(vec![
//!             FieldDescriptor::scalar("title"),
//!             FieldDescriptor::scalar("likes").strategy(StrategyKind::Counter),
//!         ]);
//!     }
//! }
//!
//! let engine = Arc::new(EngineBuilder::new(Post::schema()).build().unwrap());
//! let clock = Arc::new(SequentialTimestampProvider::new());
//! let mut alice = Replica::new(engine.clone(), "alice", clock.clone(), &Post::default()).unwrap();
//! let mut bob = Replica::new(engine, "bob", clock, &Post::default()).unwrap();
//!
//! let from_alice = alice.update(|post| post.likes += 1).unwrap();
//! let from_bob = bob.update(|post| post.likes += 2).unwrap();
//! alice.merge(&from_bob).unwrap();
//! bob.merge(&from_alice).unwrap();
//!
//! assert_eq!(alice.document().unwrap().likes, 3);
//! assert_eq!(alice.document().unwrap(), bob.document().unwrap());
//! ```

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use serde_json::Value;

use crate::crdt::op::CrdtPatch;
use crate::crdt::primitives::ReplicaId;
use crate::crdt::primitives::Timestamp;
use crate::crdt::primitives::TimestampProvider;
use crate::engine::CrdtEngine;
use crate::error::Result;
use crate::metadata::CrdtMetadata;
use crate::metadata::MetadataManager;
use crate::metadata::PruneOptions;
use crate::schema::Document;

pub struct Replica<T: Document> {
    engine: Arc<CrdtEngine>,
    id: ReplicaId,
    clock: Arc<dyn TimestampProvider>,
    document: Value,
    metadata: CrdtMetadata,
    _document: PhantomData<T>,
}

impl<T: Document> Replica<T> {
    /// A replica starting from `initial`, whose values are stamped at
    /// `Timestamp::ZERO` so that any later write beats them.
    pub fn new(
        engine: Arc<CrdtEngine>,
        id: impl Into<ReplicaId>,
        clock: Arc<dyn TimestampProvider>,
        initial: &T,
    ) -> Result<Replica<T>> {
        let document = serde_json::to_value(initial)?;
        let metadata = engine.initialize(&document, Timestamp::ZERO)?;
        return Ok(Replica {
            engine,
            id: id.into(),
            clock,
            document,
            metadata,
            _document: PhantomData,
        });
    }

    /// Resume from a stored document and its metadata.
    pub fn from_parts(
        engine: Arc<CrdtEngine>,
        id: impl Into<ReplicaId>,
        clock: Arc<dyn TimestampProvider>,
        document: Value,
        metadata: CrdtMetadata,
    ) -> Replica<T> {
        return Replica {
            engine,
            id: id.into(),
            clock,
            document,
            metadata,
            _document: PhantomData,
        };
    }

    pub fn id(&self) -> &ReplicaId {
        return &self.id;
    }

    /// The current document.
    pub fn document(&self) -> Result<T> {
        return Ok(T::deserialize(&self.document)?);
    }

    /// The current document as a value tree.
    pub fn value(&self) -> &Value {
        return &self.document;
    }

    pub fn metadata(&self) -> &CrdtMetadata {
        return &self.metadata;
    }

    /// Edit the document locally. Returns the patch to send to other
    /// replicas.
    pub fn update(&mut self, edit: impl FnOnce(&mut T)) -> Result<CrdtPatch> {
        let mut typed = self.document()?;
        edit(&mut typed);
        let modified = serde_json::to_value(&typed)?;
        return self.update_value(&modified);
    }

    /// Replace the document with `modified`. Returns the patch to send.
    pub fn update_value(&mut self, modified: &Value) -> Result<CrdtPatch> {
        let timestamp = self.clock.now();
        let patch = self
            .engine
            .generate_patch(&self.id, &self.document, &self.metadata, modified, timestamp)?;
        self.engine.apply_patch(&mut self.document, &mut self.metadata, &patch)?;
        MetadataManager::advance_version_vector(&mut self.metadata, &self.id, timestamp);
        tracing::debug!(replica = %self.id, %timestamp, operations = patch.len(), "local update");
        return Ok(patch);
    }

    /// Apply a patch from another replica. Safe to call more than once
    /// with the same patch, and in any order.
    pub fn merge(&mut self, patch: &CrdtPatch) -> Result<()> {
        return self.engine.apply_patch(&mut self.document, &mut self.metadata, patch);
    }

    /// Forget removal state older than `options.tombstones_before`.
    pub fn prune(&mut self, options: &PruneOptions) -> usize {
        return MetadataManager::prune(&mut self.metadata, options);
    }

    /// Take the document and metadata apart for storage.
    pub fn into_parts(self) -> (Value, CrdtMetadata) {
        return (self.document, self.metadata);
    }
}

impl<T: Document> fmt::Debug for Replica<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        return f
            .debug_struct("Replica")
            .field("id", &self.id)
            .field("document", &self.document)
            .finish_non_exhaustive();
    }
}
