//! Replicated tree.
//!
//! The document is `{"nodes": {id: {"value": .., "parent": id | null}}}`.
//! Node presence and value use OR semantics keyed by node id: a value edit
//! is a fresh add, and the newest live add supplies the value. The parent
//! pointer of each node is an independent LWW register, so concurrent moves
//! of one node settle on the later move while operations on different nodes
//! commute.
//!
//! The visible tree is rebuilt from metadata after every operation.
//! Concurrent moves can form a cycle; a cycle is broken by detaching the
//! node whose parent pointer was written last (ties by node id), which is
//! then shown as a root. A node whose parent was removed keeps pointing at
//! it.

use std::collections::BTreeMap;

use rustc_hash::FxHashMap;
use rustc_hash::FxHashSet;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;
use serde_json::json;

use super::entries;
use super::object_slot;
use super::set::observed_tags;
use super::set::seed_tag;
use crate::crdt::ApplyContext;
use crate::crdt::GenerateContext;
use crate::crdt::InitContext;
use crate::crdt::Strategy;
use crate::crdt::op::OperationKind;
use crate::crdt::primitives::Tag;
use crate::crdt::primitives::Timestamp;
use crate::error::Error;
use crate::error::Result;
use crate::metadata::ParentRecord;
use crate::metadata::TreeState;
use crate::path::FieldPath;

const NODES: &str = "nodes";

/// Add a node, or give an existing node a new value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeAdd {
    pub node: String,
    pub value: Value,
    pub parent: Option<String>,
    pub tag: Tag,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeRemove {
    pub node: String,
    pub tags: Vec<Tag>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeMove {
    pub node: String,
    pub parent: Option<String>,
}

/// One node as the document shows it.
struct NodeView<'v> {
    value: &'v Value,
    parent: Option<&'v str>,
}

static NULL: Value = Value::Null;

fn nodes(tree: Option<&Value>) -> BTreeMap<&str, NodeView<'_>> {
    let mut out = BTreeMap::new();
    let Some(nodes) = entries(tree.and_then(|t| t.get(NODES))) else {
        return out;
    };
    for (id, node) in nodes {
        let view = NodeView {
            value: node.get("value").unwrap_or(&NULL),
            parent: node.get("parent").and_then(Value::as_str),
        };
        out.insert(id.as_str(), view);
    }
    return out;
}

fn seed_tree(state: &mut TreeState, path: &FieldPath, tree: Option<&Value>) {
    for (id, node) in nodes(tree) {
        state.nodes.add(id, seed_tag(path, id), node.value.clone(), Timestamp::ZERO);
        state.parents.entry(id.to_string()).or_insert(ParentRecord {
            parent: node.parent.map(str::to_string),
            timestamp: Timestamp::ZERO,
        });
    }
}

fn set_parent(state: &mut TreeState, node: &str, parent: Option<String>, timestamp: Timestamp) -> bool {
    let stored = state.parents.get(node).map(|r| r.timestamp);
    if !timestamp.wins_over(stored) {
        return false;
    }
    state.parents.insert(node.to_string(), ParentRecord { parent, timestamp });
    return true;
}

/// Parent pointers of live nodes with cycles broken.
fn effective_parents(state: &TreeState) -> BTreeMap<&str, Option<&str>> {
    let live = state.nodes.live_keys();
    let mut parents: BTreeMap<&str, Option<&str>> = live
        .iter()
        .map(|id| (id.as_str(), state.parents.get(id.as_str()).and_then(|r| r.parent.as_deref())))
        .collect();
    let written = |id: &str| state.parents.get(id).map(|r| r.timestamp).unwrap_or(Timestamp::ZERO);

    let ids: Vec<&str> = parents.keys().copied().collect();
    for start in ids {
        let mut seen: FxHashMap<&str, usize> = FxHashMap::default();
        let mut chain: Vec<&str> = Vec::new();
        let mut current = Some(start);
        while let Some(id) = current {
            if let Some(&at) = seen.get(id) {
                let cycle = &chain[at..];
                let detach = cycle.iter().copied().max_by(|a, b| written(*a).cmp(&written(*b)).then(a.cmp(b)));
                if let Some(detach) = detach {
                    tracing::debug!(node = detach, "breaking parent cycle");
                    parents.insert(detach, None);
                }
                break;
            }
            seen.insert(id, chain.len());
            chain.push(id);
            current = parents.get(id).copied().flatten();
        }
    }
    return parents;
}

/// Rebuild the document from metadata.
fn render(state: &TreeState, tree: &mut Map<String, Value>) {
    let mut out = Map::new();
    for (id, parent) in effective_parents(state) {
        let value = state.nodes.value(id).cloned().unwrap_or(Value::Null);
        out.insert(id.to_string(), json!({ "value": value, "parent": parent }));
    }
    tree.insert(NODES.to_string(), Value::Object(out));
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ReplicatedTree;

impl Strategy for ReplicatedTree {
    fn name(&self) -> &'static str {
        return "replicated_tree";
    }

    fn generate_patch(&self, cx: &mut GenerateContext<'_>) -> Result<()> {
        let original = nodes(cx.original);
        let modified = nodes(cx.modified);
        let state = cx.metadata.trees.get(cx.path);

        for (id, node) in &modified {
            let before = original.get(id);
            let value_changed = before.is_none_or(|b| b.value != node.value);
            if value_changed {
                let add = NodeAdd {
                    node: id.to_string(),
                    value: node.value.clone(),
                    parent: node.parent.map(str::to_string),
                    tag: Tag::generate(),
                };
                cx.emit_here(OperationKind::Upsert, serde_json::to_value(add)?);
                continue;
            }
            if before.is_some_and(|b| b.parent != node.parent) {
                let stored = state.and_then(|s| s.parents.get(*id)).map(|r| r.timestamp);
                if !cx.timestamp.wins_over(stored) {
                    continue;
                }
                let moved = NodeMove {
                    node: id.to_string(),
                    parent: node.parent.map(str::to_string),
                };
                cx.emit_here(OperationKind::Move, serde_json::to_value(moved)?);
            }
        }

        let mut gone: FxHashSet<&str> = original.keys().filter(|id| !modified.contains_key(*id)).copied().collect();
        if let Some(state) = state {
            gone.extend(state.nodes.live_keys().into_iter().map(String::as_str).filter(|id| !modified.contains_key(id)));
        }
        let mut gone: Vec<&str> = gone.into_iter().collect();
        gone.sort_unstable();
        for id in gone {
            let tags = observed_tags(state.map(|s| &s.nodes), cx.path, id);
            if tags.is_empty() {
                continue;
            }
            let remove = NodeRemove {
                node: id.to_string(),
                tags,
            };
            cx.emit_here(OperationKind::Remove, serde_json::to_value(remove)?);
        }
        return Ok(());
    }

    fn apply_operation(&self, cx: &mut ApplyContext<'_>) -> Result<()> {
        let operation = cx.operation;
        let Some(tree) = object_slot(cx.document, cx.path) else {
            cx.suppress("unresolvable");
            return Ok(());
        };
        let path = cx.path;
        let state = cx.metadata.trees.entry(path.clone()).or_insert_with(|| {
            let mut state = TreeState::default();
            let existing = Value::Object(tree.clone());
            seed_tree(&mut state, path, Some(&existing));
            state
        });
        match operation.kind {
            OperationKind::Upsert => {
                let Some(add) = operation.payload::<NodeAdd>() else {
                    return Ok(());
                };
                state.nodes.add(&add.node, add.tag, add.value, operation.timestamp);
                set_parent(state, &add.node, add.parent, operation.timestamp);
            }
            OperationKind::Remove => {
                let Some(remove) = operation.payload::<NodeRemove>() else {
                    return Ok(());
                };
                state.nodes.remove(&remove.node, &remove.tags);
            }
            OperationKind::Move => {
                let Some(moved) = operation.payload::<NodeMove>() else {
                    return Ok(());
                };
                if !set_parent(state, &moved.node, moved.parent, operation.timestamp) {
                    tracing::debug!(op = %operation.id, node = %moved.node, "stale move");
                }
            }
            kind => return Err(Error::unsupported(self.name(), kind, &operation.path)),
        }
        render(state, tree);
        cx.applied();
        return Ok(());
    }

    fn initialize(&self, cx: &mut InitContext<'_>) -> Result<()> {
        let state = cx.metadata.trees.entry(cx.path.clone()).or_default();
        seed_tree(state, cx.path, cx.value);
        return Ok(());
    }
}
