//! The built-in strategy family.
//!
//! ## Registers
//! - `Lww`, `MaxWins`, `MinWins`: single-value registers
//! - `AverageRegister`: mean of per-replica contributions
//! - `StateMachine`: LWW gated by a transition validator
//! - `ExclusiveLock`: LWW gated by a lock holder
//!
//! ## Counters
//! - `Counter`, `GCounter`, `BoundedCounter`
//!
//! ## Sets
//! - `GSet`, `TwoPhaseSet`, `LwwSet`, `OrSet`, `PriorityQueue`
//!
//! ## Sequences
//! - `ArrayLcs`: LCS diff over fractional positions
//! - `Lseq`: dense path identifiers
//!
//! ## Maps
//! - `LwwMap`, `OrMap`, `CounterMap`, `VoteCounter`
//!
//! ## Graphs and trees
//! - `Graph`, `TwoPhaseGraph`, `ReplicatedTree`
//!
//! Collection strategies keep their document values in a canonical order
//! (by element identity, or by priority) so that replicas holding the same
//! elements hold the same document.

pub mod average;
pub mod counter;
pub mod graph;
pub mod lcs;
pub mod lock;
pub mod lseq;
pub mod map;
pub mod priority_queue;
pub mod register;
pub mod set;
pub mod state_machine;
pub mod tree;
pub mod vote;

#[cfg(test)]
pub(crate) mod testing;

use serde_json::Map;
use serde_json::Value;

use super::ApplyContext;
use super::primitives::ElementComparer;
use crate::path::FieldPath;

pub use average::AverageRegister;
pub use counter::BoundedCounter;
pub use counter::Counter;
pub use counter::GCounter;
pub use graph::Graph;
pub use graph::TwoPhaseGraph;
pub use lcs::ArrayLcs;
pub use lock::ExclusiveLock;
pub use lseq::Lseq;
pub use map::CounterMap;
pub use map::LwwMap;
pub use map::OrMap;
pub use priority_queue::PriorityQueue;
pub use register::Lww;
pub use register::MaxWins;
pub use register::MinWins;
pub use set::GSet;
pub use set::LwwSet;
pub use set::OrSet;
pub use set::TwoPhaseSet;
pub use state_machine::StateMachine;
pub use state_machine::TransitionTable;
pub use state_machine::TransitionValidator;
pub use state_machine::ValidatorRegistry;
pub use tree::ReplicatedTree;
pub use vote::VoteCounter;

/// Elements of an array value. Anything else reads as empty.
pub(crate) fn items(value: Option<&Value>) -> &[Value] {
    return match value {
        Some(Value::Array(items)) => items.as_slice(),
        _ => &[],
    };
}

/// Entries of an object value.
pub(crate) fn entries(value: Option<&Value>) -> Option<&Map<String, Value>> {
    return match value {
        Some(Value::Object(map)) => Some(map),
        _ => None,
    };
}

/// The array at `path`, replacing a `Null` slot with an empty array.
pub(crate) fn array_slot<'v>(document: &'v mut Value, path: &FieldPath) -> Option<&'v mut Vec<Value>> {
    let slot = path.slot_mut(document)?;
    if slot.is_null() {
        *slot = Value::Array(Vec::new());
    }
    return slot.as_array_mut();
}

/// The object at `path`, replacing a `Null` slot with an empty object.
pub(crate) fn object_slot<'v>(document: &'v mut Value, path: &FieldPath) -> Option<&'v mut Map<String, Value>> {
    let slot = path.slot_mut(document)?;
    if slot.is_null() {
        *slot = Value::Object(Map::new());
    }
    return slot.as_object_mut();
}

/// Insert or replace the element with identity `key`, keeping new elements
/// in identity order.
pub(crate) fn put_keyed(list: &mut Vec<Value>, comparer: &dyn ElementComparer, key: &str, value: Value) {
    if let Some(i) = list.iter().position(|item| comparer.identity(item) == key) {
        list[i] = value;
        return;
    }
    let at = list.partition_point(|item| comparer.identity(item).as_str() < key);
    list.insert(at, value);
}

/// Remove the element with identity `key`. Returns true if one was removed.
pub(crate) fn remove_keyed(list: &mut Vec<Value>, comparer: &dyn ElementComparer, key: &str) -> bool {
    let before = list.len();
    list.retain(|item| comparer.identity(item) != key);
    return list.len() != before;
}

/// Shared LWW gate: true if the operation beats the stored timestamp for
/// `path`. Logs the suppression otherwise.
pub(crate) fn lww_wins(cx: &ApplyContext<'_>, path: &FieldPath) -> bool {
    if cx.operation.timestamp.wins_over(cx.metadata.lww_timestamp(path)) {
        return true;
    }
    cx.suppress("stale");
    return false;
}
