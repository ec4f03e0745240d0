//! Converge - strategy-driven diff and merge for replicated documents.
//!
//! A document type declares a `Schema`: its fields, their shapes and,
//! where the default is not wanted, the conflict-resolution strategy of
//! each field. The engine then
//!
//! 1. diffs two versions of a document into a `CrdtPatch` (`Patcher`), and
//! 2. replays patches on any replica (`Applicator`),
//!
//! so that replicas converge whatever the delivery order, however often a
//! patch is delivered. Each replica keeps its own `CrdtMetadata` next to its
//! document; metadata never travels.
//!
//! # Quick Start
//!
//! ```
//! use converge::crdt::primitives::ReplicaId;
//! use converge::crdt::primitives::Timestamp;
//! use converge::engine::EngineBuilder;
//! use converge::schema::FieldDescriptor;
//! use converge::schema::Schema;
//! use converge::schema::StrategyKind;
//! use serde_json::json;
//!
//! let schema = Schema::new(vec![
//!     FieldDescriptor::scalar("title"),
//!     FieldDescriptor::sequence("tags").strategy(StrategyKind::OrSet),
//! ]);
//! let engine = EngineBuilder::new(schema).build().unwrap();
//!
//! let original = json!({"title": "draft", "tags": ["a"]});
//! let metadata = engine.initialize(&original, Timestamp::ZERO).unwrap();
//! let modified = json!({"title": "final", "tags": ["a", "b"]});
//! let patch = engine
//!     .generate_patch(&ReplicaId::from("alice"), &original, &metadata, &modified, Timestamp(1))
//!     .unwrap();
//!
//! let mut remote = original.clone();
//! let mut remote_metadata = engine.initialize(&remote, Timestamp::ZERO).unwrap();
//! engine.apply_patch(&mut remote, &mut remote_metadata, &patch).unwrap();
//! engine.apply_patch(&mut remote, &mut remote_metadata, &patch).unwrap();
//! assert_eq!(remote, modified);
//! ```

pub mod applicator;
pub mod crdt;
pub mod engine;
pub mod error;
pub mod metadata;
pub mod patcher;
pub mod path;
pub mod replica;
pub mod resolver;
pub mod schema;

pub use applicator::Applicator;
pub use crdt::op::CrdtOperation;
pub use crdt::op::CrdtPatch;
pub use crdt::op::OperationKind;
pub use engine::CrdtEngine;
pub use engine::EngineBuilder;
pub use error::Error;
pub use error::Result;
pub use metadata::CrdtMetadata;
pub use metadata::MetadataManager;
pub use metadata::PruneOptions;
pub use patcher::Patcher;
pub use path::FieldPath;
pub use replica::Replica;
pub use resolver::DefaultStrategyResolver;
pub use resolver::StrategyResolver;
pub use schema::Document;
pub use schema::FieldDescriptor;
pub use schema::Schema;
pub use schema::StrategyKind;
