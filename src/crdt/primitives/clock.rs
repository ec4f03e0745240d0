//! Clock primitives for ordering concurrent writes.
//!
//! # Timestamp
//!
//! An opaque, totally ordered logical time. Strategies only ever compare
//! timestamps; they never interpret them. Two providers ship with the crate:
//!
//! - `EpochTimestampProvider`: milliseconds since the Unix epoch, forced to
//!   be strictly monotonic per provider instance.
//! - `SequentialTimestampProvider`: a plain counter.
//!
//! Swapping one for the other changes how finely concurrent writes are told
//! apart, never whether replicas converge.
//!
//! # Version Vector
//!
//! Tracks, per replica, the highest timestamp known to be covered. Used by
//! strategies whose naive application is not idempotent (counters) to
//! short-circuit re-delivery.
//!
//! Complexity:
//! - get / covers: O(1)
//! - advance: O(1)
//! - merge: O(n) where n is number of replicas

use std::fmt;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering as AtomicOrdering;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use rustc_hash::FxHashMap;
use serde::Deserialize;
use serde::Serialize;

use super::id::ReplicaId;

/// A logical clock value.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// The smallest timestamp. Used when seeding metadata from a snapshot.
    pub const ZERO: Timestamp = Timestamp(0);

    /// Create a timestamp from a raw value.
    pub fn new(value: u64) -> Timestamp {
        return Timestamp(value);
    }

    /// Get the raw value.
    #[inline]
    pub fn value(&self) -> u64 {
        return self.0;
    }

    /// True if `self` strictly wins over an optional stored timestamp.
    ///
    /// A missing stored timestamp always loses.
    #[inline]
    pub fn wins_over(&self, stored: Option<Timestamp>) -> bool {
        return match stored {
            Some(stored) => *self > stored,
            None => true,
        };
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        return write!(f, "{}", self.0);
    }
}

impl From<u64> for Timestamp {
    fn from(value: u64) -> Self {
        return Timestamp(value);
    }
}

/// Source of "now" for patch generation.
///
/// Implementations are shared across replicas and may be called from many
/// threads at once.
pub trait TimestampProvider: Send + Sync {
    /// Return a timestamp no smaller than any previously returned one.
    fn now(&self) -> Timestamp;
}

/// Wall-clock timestamps in milliseconds since the Unix epoch.
///
/// Two calls within the same millisecond still return distinct, increasing
/// values.
#[derive(Debug, Default)]
pub struct EpochTimestampProvider {
    last: AtomicU64,
}

impl EpochTimestampProvider {
    pub fn new() -> EpochTimestampProvider {
        return EpochTimestampProvider {
            last: AtomicU64::new(0),
        };
    }
}

impl TimestampProvider for EpochTimestampProvider {
    fn now(&self) -> Timestamp {
        let wall = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        let mut prev = self.last.load(AtomicOrdering::Relaxed);
        loop {
            let next = wall.max(prev + 1);
            match self.last.compare_exchange_weak(prev, next, AtomicOrdering::AcqRel, AtomicOrdering::Relaxed) {
                Ok(_) => return Timestamp(next),
                Err(actual) => prev = actual,
            }
        }
    }
}

/// A monotonically increasing counter.
#[derive(Debug, Default)]
pub struct SequentialTimestampProvider {
    counter: AtomicU64,
}

impl SequentialTimestampProvider {
    /// Create a provider whose first timestamp is 1.
    pub fn new() -> SequentialTimestampProvider {
        return SequentialTimestampProvider::starting_at(0);
    }

    /// Create a provider whose first timestamp is `start + 1`.
    pub fn starting_at(start: u64) -> SequentialTimestampProvider {
        return SequentialTimestampProvider {
            counter: AtomicU64::new(start),
        };
    }
}

impl TimestampProvider for SequentialTimestampProvider {
    fn now(&self) -> Timestamp {
        return Timestamp(self.counter.fetch_add(1, AtomicOrdering::AcqRel) + 1);
    }
}

/// A version vector: replica id to highest covered timestamp.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionVector {
    entries: FxHashMap<ReplicaId, Timestamp>,
}

impl VersionVector {
    /// Create an empty version vector.
    pub fn new() -> VersionVector {
        return VersionVector {
            entries: FxHashMap::default(),
        };
    }

    /// Get the covered timestamp for a replica.
    pub fn get(&self, replica: &ReplicaId) -> Option<Timestamp> {
        return self.entries.get(replica).copied();
    }

    /// True if an operation from `replica` at `timestamp` is already covered.
    pub fn covers(&self, replica: &ReplicaId, timestamp: Timestamp) -> bool {
        return match self.entries.get(replica) {
            Some(covered) => timestamp <= *covered,
            None => false,
        };
    }

    /// Advance the entry for `replica`. Never moves backwards.
    pub fn advance(&mut self, replica: &ReplicaId, timestamp: Timestamp) {
        match self.entries.get_mut(replica) {
            Some(entry) => *entry = (*entry).max(timestamp),
            None => {
                self.entries.insert(replica.clone(), timestamp);
            }
        }
    }

    /// Take the pointwise maximum with another vector.
    pub fn merge(&mut self, other: &VersionVector) {
        for (replica, timestamp) in &other.entries {
            self.advance(replica, *timestamp);
        }
    }

    /// Number of replicas with an entry.
    pub fn len(&self) -> usize {
        return self.entries.len();
    }

    /// True if no replica has an entry.
    pub fn is_empty(&self) -> bool {
        return self.entries.is_empty();
    }

    /// Iterate over all (replica, timestamp) entries.
    pub fn iter(&self) -> impl Iterator<Item = (&ReplicaId, Timestamp)> {
        return self.entries.iter().map(|(r, t)| (r, *t));
    }
}
