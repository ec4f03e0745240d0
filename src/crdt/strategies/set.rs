//! Unordered sets over array fields.
//!
//! Element identity comes from the field's element comparer. Elements are
//! kept in identity order in the document, so replicas holding the same
//! elements hold the same array.
//!
//! - `GSet`: grow-only. Removals are not replicated.
//! - `TwoPhaseSet`: removal is a permanent tombstone; a removed element can
//!   never come back.
//! - `LwwSet`: per-element add and remove timestamps; present iff the latest
//!   add is strictly newer than the latest remove.
//! - `OrSet`: observed-remove. Adds carry fresh tags, removes name the tags
//!   they observed, so a concurrent re-add survives a remove.

use rustc_hash::FxHashMap;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use super::array_slot;
use super::items;
use super::put_keyed;
use super::remove_keyed;
use crate::crdt::ApplyContext;
use crate::crdt::GenerateContext;
use crate::crdt::InitContext;
use crate::crdt::Strategy;
use crate::crdt::op::OperationKind;
use crate::crdt::primitives::ElementComparer;
use crate::crdt::primitives::ElementKey;
use crate::crdt::primitives::Tag;
use crate::crdt::primitives::Timestamp;
use crate::error::Error;
use crate::error::Result;
use crate::metadata::LwwElementState;
use crate::metadata::OrSetState;
use crate::path::FieldPath;

/// Remove payload naming an element by identity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KeyedRemove {
    pub key: ElementKey,
}

/// OR add payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaggedAdd {
    pub value: Value,
    pub tag: Tag,
}

/// OR remove payload: the tags observed for the element.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaggedRemove {
    pub key: ElementKey,
    pub tags: Vec<Tag>,
}

/// Identity-keyed view of an array.
pub(crate) fn keyed<'v>(list: &'v [Value], comparer: &dyn ElementComparer) -> FxHashMap<ElementKey, &'v Value> {
    return list.iter().map(|item| (comparer.identity(item), item)).collect();
}

/// The tag assigned to an element that existed before replication started.
///
/// Derived, so every replica seeding the same snapshot agrees on it.
pub(crate) fn seed_tag(path: &FieldPath, key: &str) -> Tag {
    return Tag::derive(&[path.to_string().as_bytes(), key.as_bytes()]);
}

/// Seed OR state from existing elements.
pub(crate) fn seed_or_state(state: &mut OrSetState, path: &FieldPath, list: &[Value], comparer: &dyn ElementComparer) {
    for item in list {
        let key = comparer.identity(item);
        state.add(&key, seed_tag(path, &key), item.clone(), Timestamp::ZERO);
    }
}

/// Tags a remove of `key` observes: the live tags, or the seed tag for an
/// element metadata has never seen.
pub(crate) fn observed_tags(state: Option<&OrSetState>, path: &FieldPath, key: &str) -> Vec<Tag> {
    return match state {
        Some(state) if state.adds.contains_key(key) => state.live_tags(key),
        _ => vec![seed_tag(path, key)],
    };
}

/// Keep one value per identity when concurrent adds disagree: the larger
/// canonical rendering wins.
pub(crate) fn put_first_wins(list: &mut Vec<Value>, comparer: &dyn ElementComparer, key: &str, value: Value) {
    if let Some(existing) = list.iter().find(|item| comparer.identity(item) == key) {
        if existing.to_string() >= value.to_string() {
            return;
        }
    }
    put_keyed(list, comparer, key, value);
}

/// Grow-only set.
#[derive(Clone, Copy, Debug, Default)]
pub struct GSet;

impl Strategy for GSet {
    fn name(&self) -> &'static str {
        return "g_set";
    }

    fn generate_patch(&self, cx: &mut GenerateContext<'_>) -> Result<()> {
        let comparer = cx.comparer()?;
        let original = keyed(items(cx.original), comparer);
        for item in items(cx.modified) {
            if !original.contains_key(&comparer.identity(item)) {
                cx.emit_here(OperationKind::Upsert, item.clone());
            }
        }
        return Ok(());
    }

    fn apply_operation(&self, cx: &mut ApplyContext<'_>) -> Result<()> {
        let operation = cx.operation;
        if operation.kind != OperationKind::Upsert {
            return Err(Error::unsupported(self.name(), operation.kind, &operation.path));
        }
        let comparer = cx.comparer()?;
        let Some(list) = array_slot(cx.document, cx.path) else {
            cx.suppress("unresolvable");
            return Ok(());
        };
        let key = comparer.identity(&operation.value);
        put_first_wins(list, comparer, &key, operation.value.clone());
        cx.applied();
        return Ok(());
    }

    fn initialize(&self, _cx: &mut InitContext<'_>) -> Result<()> {
        return Ok(());
    }
}

/// Two-phase set.
#[derive(Clone, Copy, Debug, Default)]
pub struct TwoPhaseSet;

impl Strategy for TwoPhaseSet {
    fn name(&self) -> &'static str {
        return "two_phase_set";
    }

    fn generate_patch(&self, cx: &mut GenerateContext<'_>) -> Result<()> {
        let comparer = cx.comparer()?;
        let state = cx.metadata.two_phase_sets.get(cx.path);
        let original = keyed(items(cx.original), comparer);
        let modified = keyed(items(cx.modified), comparer);

        for item in items(cx.modified) {
            let key = comparer.identity(item);
            if original.contains_key(&key) {
                continue;
            }
            if state.is_some_and(|s| s.tombstones.contains(&key)) {
                tracing::debug!(path = %cx.path, %key, "element was removed for good");
                continue;
            }
            cx.emit_here(OperationKind::Upsert, item.clone());
        }
        for item in items(cx.original) {
            let key = comparer.identity(item);
            if !modified.contains_key(&key) {
                cx.emit_here(OperationKind::Remove, serde_json::to_value(KeyedRemove { key })?);
            }
        }
        return Ok(());
    }

    fn apply_operation(&self, cx: &mut ApplyContext<'_>) -> Result<()> {
        let operation = cx.operation;
        let comparer = cx.comparer()?;
        let state = cx.metadata.two_phase_sets.entry(cx.path.clone()).or_default();
        match operation.kind {
            OperationKind::Upsert => {
                let key = comparer.identity(&operation.value);
                if state.tombstones.contains(&key) {
                    cx.suppress("tombstoned");
                    return Ok(());
                }
                state.adds.insert(key.clone());
                let Some(list) = array_slot(cx.document, cx.path) else {
                    cx.suppress("unresolvable");
                    return Ok(());
                };
                put_first_wins(list, comparer, &key, operation.value.clone());
            }
            OperationKind::Remove => {
                let Some(remove) = operation.payload::<KeyedRemove>() else {
                    return Ok(());
                };
                state.tombstones.insert(remove.key.clone());
                if let Some(list) = array_slot(cx.document, cx.path) {
                    remove_keyed(list, comparer, &remove.key);
                }
            }
            kind => return Err(Error::unsupported(self.name(), kind, &operation.path)),
        }
        cx.applied();
        return Ok(());
    }

    fn initialize(&self, cx: &mut InitContext<'_>) -> Result<()> {
        let comparer = cx.services.comparer_for(cx.field)?;
        let state = cx.metadata.two_phase_sets.entry(cx.path.clone()).or_default();
        for item in items(cx.value) {
            state.adds.insert(comparer.identity(item));
        }
        return Ok(());
    }
}

/// Diff an identity-keyed collection under per-element LWW. Used by
/// `LwwSet` and `PriorityQueue`.
pub(crate) fn generate_lww_elements(cx: &mut GenerateContext<'_>) -> Result<()> {
    let comparer = cx.comparer()?;
    let state = cx.metadata.lww_sets.get(cx.path);
    let original = keyed(items(cx.original), comparer);
    let modified = keyed(items(cx.modified), comparer);
    let timestamp = cx.timestamp;

    for item in items(cx.modified) {
        let key = comparer.identity(item);
        if original.get(&key) == Some(&item) {
            continue;
        }
        if timestamp.wins_over(state.and_then(|s| s.updates.get(&key).copied())) {
            cx.emit_here(OperationKind::Upsert, item.clone());
        }
    }
    for item in items(cx.original) {
        let key = comparer.identity(item);
        if modified.contains_key(&key) {
            continue;
        }
        if timestamp.wins_over(state.and_then(|s| s.removals.get(&key).copied())) {
            cx.emit_here(OperationKind::Remove, serde_json::to_value(KeyedRemove { key })?);
        }
    }
    return Ok(());
}

/// Apply one per-element LWW operation. The caller reorders the array
/// afterwards if it needs something other than identity order.
pub(crate) fn apply_lww_element(cx: &mut ApplyContext<'_>, name: &'static str) -> Result<()> {
    let operation = cx.operation;
    let comparer = cx.comparer()?;
    let state: &mut LwwElementState = cx.metadata.lww_sets.entry(cx.path.clone()).or_default();
    match operation.kind {
        OperationKind::Upsert => {
            let key = comparer.identity(&operation.value);
            let stored = state.updates.get(&key).copied();
            if !operation.timestamp.wins_over(stored) {
                cx.suppress("stale");
                return Ok(());
            }
            state.updates.insert(key.clone(), operation.timestamp);
            let present = state.is_present(&key);
            let Some(list) = array_slot(cx.document, cx.path) else {
                cx.suppress("unresolvable");
                return Ok(());
            };
            if present {
                put_keyed(list, comparer, &key, operation.value.clone());
            }
        }
        OperationKind::Remove => {
            let Some(remove) = operation.payload::<KeyedRemove>() else {
                return Ok(());
            };
            let removed = state.removals.entry(remove.key.clone()).or_insert(operation.timestamp);
            *removed = (*removed).max(operation.timestamp);
            let present = state.is_present(&remove.key);
            if !present {
                if let Some(list) = array_slot(cx.document, cx.path) {
                    remove_keyed(list, comparer, &remove.key);
                }
            }
        }
        kind => return Err(Error::unsupported(name, kind, &operation.path)),
    }
    cx.applied();
    return Ok(());
}

/// Seed per-element LWW state from existing elements.
pub(crate) fn initialize_lww_elements(cx: &mut InitContext<'_>) -> Result<()> {
    let comparer = cx.services.comparer_for(cx.field)?;
    let state = cx.metadata.lww_sets.entry(cx.path.clone()).or_default();
    for item in items(cx.value) {
        state.updates.insert(comparer.identity(item), cx.timestamp);
    }
    return Ok(());
}

/// Last-writer-wins element set.
#[derive(Clone, Copy, Debug, Default)]
pub struct LwwSet;

impl Strategy for LwwSet {
    fn name(&self) -> &'static str {
        return "lww_set";
    }

    fn generate_patch(&self, cx: &mut GenerateContext<'_>) -> Result<()> {
        return generate_lww_elements(cx);
    }

    fn apply_operation(&self, cx: &mut ApplyContext<'_>) -> Result<()> {
        return apply_lww_element(cx, self.name());
    }

    fn initialize(&self, cx: &mut InitContext<'_>) -> Result<()> {
        return initialize_lww_elements(cx);
    }
}

/// Observed-remove set.
#[derive(Clone, Copy, Debug, Default)]
pub struct OrSet;

/// Bring the document element for `key` in line with OR state.
fn materialize(list: &mut Vec<Value>, state: &OrSetState, comparer: &dyn ElementComparer, key: &str) {
    match state.value(key) {
        Some(value) => put_keyed(list, comparer, key, value.clone()),
        None => {
            remove_keyed(list, comparer, key);
        }
    }
}

impl Strategy for OrSet {
    fn name(&self) -> &'static str {
        return "or_set";
    }

    fn generate_patch(&self, cx: &mut GenerateContext<'_>) -> Result<()> {
        let comparer = cx.comparer()?;
        let state = cx.metadata.or_sets.get(cx.path);
        let original = keyed(items(cx.original), comparer);
        let modified = keyed(items(cx.modified), comparer);

        for item in items(cx.modified) {
            let key = comparer.identity(item);
            if original.get(&key) == Some(&item) {
                continue;
            }
            let add = TaggedAdd {
                value: item.clone(),
                tag: Tag::generate(),
            };
            cx.emit_here(OperationKind::Upsert, serde_json::to_value(add)?);
        }

        // Remove relative to what metadata knows is live, not just to what
        // the original array shows.
        let mut gone: Vec<ElementKey> = original.keys().filter(|k| !modified.contains_key(*k)).cloned().collect();
        if let Some(state) = state {
            for key in state.live_keys() {
                if !modified.contains_key(key) && !original.contains_key(key) {
                    gone.push(key.clone());
                }
            }
        }
        gone.sort();
        for key in gone {
            let tags = observed_tags(state, cx.path, &key);
            if tags.is_empty() {
                continue;
            }
            cx.emit_here(OperationKind::Remove, serde_json::to_value(TaggedRemove { key, tags })?);
        }
        return Ok(());
    }

    fn apply_operation(&self, cx: &mut ApplyContext<'_>) -> Result<()> {
        let operation = cx.operation;
        let comparer = cx.comparer()?;
        let Some(list) = array_slot(cx.document, cx.path) else {
            cx.suppress("unresolvable");
            return Ok(());
        };
        let path = cx.path;
        let state = cx.metadata.or_sets.entry(path.clone()).or_insert_with(|| {
            let mut state = OrSetState::default();
            seed_or_state(&mut state, path, list, comparer);
            state
        });
        let key = match operation.kind {
            OperationKind::Upsert => {
                let Some(add) = operation.payload::<TaggedAdd>() else {
                    return Ok(());
                };
                let key = comparer.identity(&add.value);
                state.add(&key, add.tag, add.value, operation.timestamp);
                key
            }
            OperationKind::Remove => {
                let Some(remove) = operation.payload::<TaggedRemove>() else {
                    return Ok(());
                };
                state.remove(&remove.key, &remove.tags);
                remove.key
            }
            kind => return Err(Error::unsupported(self.name(), kind, &operation.path)),
        };
        materialize(list, state, comparer, &key);
        cx.applied();
        return Ok(());
    }

    fn initialize(&self, cx: &mut InitContext<'_>) -> Result<()> {
        let comparer = cx.services.comparer_for(cx.field)?;
        let state = cx.metadata.or_sets.entry(cx.path.clone()).or_default();
        seed_or_state(state, cx.path, items(cx.value), comparer);
        return Ok(());
    }
}
