//! Shared primitives for the strategy family.
//!
//! This module provides the building blocks strategies compose:
//!
//! ## Clocks
//! - `Timestamp`: opaque logical time
//! - `TimestampProvider`: epoch-based and sequential sources of "now"
//! - `VersionVector`: per-replica covered timestamp
//!
//! ## IDs
//! - `ReplicaId`: replica identity
//! - `OperationId`: operation identity, used for tie-breaking
//! - `Tag`: observed-remove add marker
//!
//! ## Sequence identifiers
//! - `Position` / `PositionalIdentifier`: exact fractional positions
//! - `LseqIdentifier`: dense path identifiers
//!
//! ## Element identity
//! - `ElementComparer`, `ComparerRegistry`
//!
//! ## Numbers
//! - `Numeric`: exact integer / float arithmetic on JSON numbers

pub mod clock;
pub mod comparer;
pub mod id;
pub mod lseq;
pub mod numeric;
pub mod position;

pub use clock::EpochTimestampProvider;
pub use clock::SequentialTimestampProvider;
pub use clock::Timestamp;
pub use clock::TimestampProvider;
pub use clock::VersionVector;
pub use comparer::ComparerRegistry;
pub use comparer::ElementComparer;
pub use comparer::ElementComparerProvider;
pub use comparer::ElementKey;
pub use comparer::KeyFieldComparer;
pub use comparer::StructuralComparer;
pub use id::OperationId;
pub use id::ReplicaId;
pub use id::Tag;
pub use lseq::LseqComponent;
pub use lseq::LseqIdentifier;
pub use numeric::Numeric;
pub use position::Position;
pub use position::PositionalIdentifier;
