//! String-keyed maps.
//!
//! Map strategies address individual entries: every operation targets
//! `field.['key']`, and the applicator hands it to the strategy owning
//! `field`. Entries are independent of each other.
//!
//! - `LwwMap`: per-key LWW with remove timestamps.
//! - `OrMap`: per-key observed-remove tags; the structural default for map
//!   fields.
//! - `CounterMap`: a PN-counter per key.

use std::sync::LazyLock;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

use super::entries;
use super::object_slot;
use super::set::TaggedAdd;
use super::set::observed_tags;
use super::set::seed_tag;
use crate::crdt::ApplyContext;
use crate::crdt::GenerateContext;
use crate::crdt::InitContext;
use crate::crdt::Strategy;
use crate::crdt::op::OperationKind;
use crate::crdt::primitives::Numeric;
use crate::crdt::primitives::Tag;
use crate::crdt::primitives::Timestamp;
use crate::error::Error;
use crate::error::Result;
use crate::metadata::OrSetState;
use crate::metadata::PnCounter;
use crate::path::FieldPath;

/// OR-Map remove payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RemovedTags {
    pub tags: Vec<Tag>,
}

static EMPTY: LazyLock<Map<String, Value>> = LazyLock::new(Map::new);

fn entries_or_empty(value: Option<&Value>) -> &Map<String, Value> {
    return entries(value).unwrap_or(&EMPTY);
}

/// Keys of both sides, sorted and deduplicated.
fn all_keys<'m>(original: &'m Map<String, Value>, modified: &'m Map<String, Value>) -> Vec<&'m String> {
    let mut keys: Vec<&String> = original.keys().chain(modified.keys()).collect();
    keys.sort();
    keys.dedup();
    return keys;
}

/// Last-writer-wins map.
#[derive(Clone, Copy, Debug, Default)]
pub struct LwwMap;

impl Strategy for LwwMap {
    fn name(&self) -> &'static str {
        return "lww_map";
    }

    fn generate_patch(&self, cx: &mut GenerateContext<'_>) -> Result<()> {
        let original = entries_or_empty(cx.original);
        let modified = entries_or_empty(cx.modified);
        let state = cx.metadata.lww_maps.get(cx.path);
        let timestamp = cx.timestamp;

        for key in all_keys(original, modified) {
            let before = original.get(key);
            let after = modified.get(key);
            if before == after {
                continue;
            }
            let path = cx.path.key(key.as_str());
            match after {
                Some(value) => {
                    if timestamp.wins_over(state.and_then(|s| s.updates.get(key).copied())) {
                        cx.emit(path, OperationKind::Upsert, value.clone());
                    }
                }
                None => {
                    if timestamp.wins_over(state.and_then(|s| s.removals.get(key).copied())) {
                        cx.emit(path, OperationKind::Remove, Value::Null);
                    }
                }
            }
        }
        return Ok(());
    }

    fn apply_operation(&self, cx: &mut ApplyContext<'_>) -> Result<()> {
        let operation = cx.operation;
        let Some(key) = cx.entry_key() else {
            cx.suppress("not a map entry");
            return Ok(());
        };
        let state = cx.metadata.lww_maps.entry(cx.path.clone()).or_default();
        match operation.kind {
            OperationKind::Upsert => {
                if !operation.timestamp.wins_over(state.updates.get(key).copied()) {
                    cx.suppress("stale");
                    return Ok(());
                }
                state.updates.insert(key.to_string(), operation.timestamp);
                let present = state.is_present(key);
                let Some(map) = object_slot(cx.document, cx.path) else {
                    cx.suppress("unresolvable");
                    return Ok(());
                };
                if present {
                    map.insert(key.to_string(), operation.value.clone());
                }
            }
            OperationKind::Remove => {
                let removed = state.removals.entry(key.to_string()).or_insert(operation.timestamp);
                *removed = (*removed).max(operation.timestamp);
                let present = state.is_present(key);
                if !present {
                    if let Some(map) = object_slot(cx.document, cx.path) {
                        map.remove(key);
                    }
                }
            }
            kind => return Err(Error::unsupported(self.name(), kind, &operation.path)),
        }
        cx.applied();
        return Ok(());
    }

    fn initialize(&self, cx: &mut InitContext<'_>) -> Result<()> {
        let state = cx.metadata.lww_maps.entry(cx.path.clone()).or_default();
        for key in entries_or_empty(cx.value).keys() {
            state.updates.insert(key.clone(), cx.timestamp);
        }
        return Ok(());
    }
}

fn seed_or_map(state: &mut OrSetState, path: &FieldPath, map: &Map<String, Value>) {
    for (key, value) in map {
        state.add(key, seed_tag(path, key), value.clone(), Timestamp::ZERO);
    }
}

/// Observed-remove map.
#[derive(Clone, Copy, Debug, Default)]
pub struct OrMap;

impl Strategy for OrMap {
    fn name(&self) -> &'static str {
        return "or_map";
    }

    fn generate_patch(&self, cx: &mut GenerateContext<'_>) -> Result<()> {
        let original = entries_or_empty(cx.original);
        let modified = entries_or_empty(cx.modified);
        let state = cx.metadata.or_maps.get(cx.path);

        for (key, value) in modified {
            if original.get(key) == Some(value) {
                continue;
            }
            let add = TaggedAdd {
                value: value.clone(),
                tag: Tag::generate(),
            };
            cx.emit(cx.path.key(key.as_str()), OperationKind::Upsert, serde_json::to_value(add)?);
        }

        let mut gone: Vec<&String> = original.keys().filter(|k| !modified.contains_key(*k)).collect();
        if let Some(state) = state {
            gone.extend(state.live_keys().into_iter().filter(|k| !modified.contains_key(*k) && !original.contains_key(*k)));
        }
        gone.sort();
        for key in gone {
            let tags = observed_tags(state, cx.path, key);
            if tags.is_empty() {
                continue;
            }
            cx.emit(cx.path.key(key.as_str()), OperationKind::Remove, serde_json::to_value(RemovedTags { tags })?);
        }
        return Ok(());
    }

    fn apply_operation(&self, cx: &mut ApplyContext<'_>) -> Result<()> {
        let operation = cx.operation;
        let Some(key) = cx.entry_key() else {
            cx.suppress("not a map entry");
            return Ok(());
        };
        let Some(map) = object_slot(cx.document, cx.path) else {
            cx.suppress("unresolvable");
            return Ok(());
        };
        let path = cx.path;
        let state = cx.metadata.or_maps.entry(path.clone()).or_insert_with(|| {
            let mut state = OrSetState::default();
            seed_or_map(&mut state, path, map);
            state
        });
        match operation.kind {
            OperationKind::Upsert => {
                let Some(add) = operation.payload::<TaggedAdd>() else {
                    return Ok(());
                };
                state.add(key, add.tag, add.value, operation.timestamp);
            }
            OperationKind::Remove => {
                let Some(remove) = operation.payload::<RemovedTags>() else {
                    return Ok(());
                };
                state.remove(key, &remove.tags);
            }
            kind => return Err(Error::unsupported(self.name(), kind, &operation.path)),
        }
        match state.value(key) {
            Some(value) => {
                map.insert(key.to_string(), value.clone());
            }
            None => {
                map.remove(key);
            }
        }
        cx.applied();
        return Ok(());
    }

    fn initialize(&self, cx: &mut InitContext<'_>) -> Result<()> {
        let state = cx.metadata.or_maps.entry(cx.path.clone()).or_default();
        seed_or_map(state, cx.path, entries_or_empty(cx.value));
        return Ok(());
    }
}

fn seeded_counter(value: Option<&Value>) -> PnCounter {
    let mut counter = PnCounter::default();
    if let Some(current) = Numeric::from_value_or_zero(value) {
        counter.apply(current);
    }
    return counter;
}

/// A PN-counter per key.
///
/// Removing a key is a decrement to zero; the entry stays.
#[derive(Clone, Copy, Debug, Default)]
pub struct CounterMap;

impl Strategy for CounterMap {
    fn name(&self) -> &'static str {
        return "counter_map";
    }

    fn generate_patch(&self, cx: &mut GenerateContext<'_>) -> Result<()> {
        let original = entries_or_empty(cx.original);
        let modified = entries_or_empty(cx.modified);
        for key in all_keys(original, modified) {
            let before = Numeric::from_value_or_zero(original.get(key));
            let after = Numeric::from_value_or_zero(modified.get(key));
            let (Some(before), Some(after)) = (before, after) else {
                tracing::debug!(path = %cx.path, %key, "counter entry is not a number");
                continue;
            };
            let delta = after - before;
            if !delta.is_zero() {
                cx.emit(cx.path.key(key.as_str()), OperationKind::Increment, delta.to_value());
            }
        }
        return Ok(());
    }

    fn apply_operation(&self, cx: &mut ApplyContext<'_>) -> Result<()> {
        let operation = cx.operation;
        if operation.kind != OperationKind::Increment {
            return Err(Error::unsupported(self.name(), operation.kind, &operation.path));
        }
        if cx.metadata.has_seen(operation) {
            cx.suppress("already applied");
            return Ok(());
        }
        let Some(key) = cx.entry_key() else {
            cx.suppress("not a map entry");
            return Ok(());
        };
        let Some(delta) = Numeric::from_value(&operation.value) else {
            cx.suppress("malformed");
            return Ok(());
        };
        let Some(map) = object_slot(cx.document, cx.path) else {
            cx.suppress("unresolvable");
            return Ok(());
        };
        cx.metadata.mark_seen(operation);
        let counter = cx
            .metadata
            .counter_maps
            .entry(cx.path.clone())
            .or_default()
            .entry(key.to_string())
            .or_insert_with(|| seeded_counter(map.get(key)));
        counter.apply(delta);
        map.insert(key.to_string(), counter.value().to_value());
        cx.applied();
        return Ok(());
    }

    fn initialize(&self, cx: &mut InitContext<'_>) -> Result<()> {
        let counters = cx.metadata.counter_maps.entry(cx.path.clone()).or_default();
        for (key, value) in entries_or_empty(cx.value) {
            counters.insert(key.clone(), seeded_counter(Some(value)));
        }
        return Ok(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crdt::strategies::testing::Bench;
    use crate::schema::FieldDescriptor;
    use serde_json::json;

    #[test]
    fn operations_target_entries() {
        let bench = Bench::new(LwwMap, FieldDescriptor::map("settings"));
        let a = bench.site("a", json!({"theme": "dark"}));
        let ops = bench.try_diff(&a, json!({"theme": "light", "font": 12}), 1).unwrap();
        let paths: Vec<String> = ops.iter().map(|op| op.path.to_string()).collect();
        assert_eq!(paths, vec!["$.settings.['font']", "$.settings.['theme']"]);
    }

    #[test]
    fn lww_map_entries_resolve_independently() {
        let bench = Bench::new(LwwMap, FieldDescriptor::map("settings"));
        let start = json!({"theme": "dark", "lang": "en"});
        let mut a = bench.site("a", start.clone());
        let mut b = bench.site("b", start);

        let from_a = bench.edit(&mut a, json!({"theme": "light", "lang": "en"}), 5);
        let from_b = bench.edit(&mut b, json!({"theme": "blue", "lang": "fr"}), 3);
        bench.apply(&mut a, &from_b);
        bench.apply(&mut b, &from_a);
        assert_eq!(a.value(), &json!({"theme": "light", "lang": "fr"}));
        assert_eq!(b.value(), a.value());
    }

    #[test]
    fn lww_map_remove_against_update() {
        let bench = Bench::new(LwwMap, FieldDescriptor::map("settings"));
        let start = json!({"theme": "dark"});
        let mut a = bench.site("a", start.clone());
        let mut b = bench.site("b", start);

        let remove = bench.edit(&mut a, json!({}), 4);
        let update = bench.edit(&mut b, json!({"theme": "light"}), 2);
        bench.apply(&mut a, &update);
        bench.apply(&mut b, &remove);
        assert_eq!(a.value(), &json!({}));
        assert_eq!(b.value(), &json!({}));
    }

    #[test]
    fn or_map_concurrent_update_survives_remove() {
        let bench = Bench::new(OrMap, FieldDescriptor::map("cart"));
        let start = json!({"apple": 1});
        let mut a = bench.site("a", start.clone());
        let mut b = bench.site("b", start);

        let remove = bench.edit(&mut a, json!({}), 1);
        let update = bench.edit(&mut b, json!({"apple": 3}), 2);
        bench.apply(&mut a, &update);
        bench.apply(&mut b, &remove);
        assert_eq!(a.value(), &json!({"apple": 3}));
        assert_eq!(b.value(), a.value());
    }

    #[test]
    fn or_map_redelivery_is_harmless() {
        let bench = Bench::new(OrMap, FieldDescriptor::map("cart"));
        let mut a = bench.site("a", json!({}));
        let mut b = bench.site("b", json!({}));
        let ops = bench.edit(&mut a, json!({"pear": 2}), 1);
        bench.apply(&mut b, &ops);
        let once = b.doc.clone();
        bench.apply(&mut b, &ops);
        assert_eq!(b.doc, once);
    }

    #[test]
    fn counter_map_sums_per_key() {
        let bench = Bench::new(CounterMap, FieldDescriptor::map("scores"));
        let start = json!({"red": 1});
        let mut a = bench.site("a", start.clone());
        let mut b = bench.site("b", start);

        let from_a = bench.edit(&mut a, json!({"red": 4, "blue": 2}), 1);
        let from_b = bench.edit(&mut b, json!({"red": 0}), 1);
        bench.apply(&mut a, &from_b);
        bench.apply(&mut b, &from_a);
        bench.apply(&mut b, &from_a);
        assert_eq!(a.value(), &json!({"red": 3, "blue": 2}));
        assert_eq!(b.value(), a.value());
    }

    #[test]
    fn entry_strategies_ignore_whole_field_operations() {
        let bench = Bench::new(LwwMap, FieldDescriptor::map("settings"));
        let mut a = bench.site("a", json!({"k": 1}));
        let mut ops = bench.try_diff(&a, json!({"k": 2}), 1).unwrap();
        ops[0].path = bench.path.clone();
        bench.apply(&mut a, &ops);
        assert_eq!(a.value(), &json!({"k": 1}));
    }
}
