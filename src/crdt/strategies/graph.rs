//! Directed graphs.
//!
//! The document is `{"vertices": [...], "edges": [{"source", "target", ..}]}`.
//! Vertices are identified by the field's element comparer, edges by their
//! `(source, target)` pair. An edge endpoint refers to a vertex by the
//! rendering of its identity value, so with `KeyFieldComparer::new("id")`
//! an edge `{"source": 1, "target": 2}` joins the vertices with ids 1 and 2.
//!
//! An edge is visible only while it and both of its endpoints are live.
//! Removing a vertex in a diff also removes the edges touching it.
//!
//! - `Graph`: vertices and edges are OR-sets, so a concurrent re-add
//!   survives a remove.
//! - `TwoPhaseGraph`: vertices and edges are two-phase sets; removals are
//!   permanent.

use rustc_hash::FxHashSet;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

use super::items;
use super::object_slot;
use super::remove_keyed;
use super::set::keyed;
use super::set::observed_tags;
use super::set::put_first_wins;
use super::set::seed_or_state;
use crate::crdt::ApplyContext;
use crate::crdt::GenerateContext;
use crate::crdt::InitContext;
use crate::crdt::Strategy;
use crate::crdt::op::OperationKind;
use crate::crdt::primitives::ElementComparer;
use crate::crdt::primitives::ElementKey;
use crate::crdt::primitives::Tag;
use crate::error::Error;
use crate::error::Result;
use crate::metadata::GraphState;
use crate::metadata::OrSetState;
use crate::metadata::TwoPhaseGraphState;
use crate::path::FieldPath;

const VERTICES: &str = "vertices";
const EDGES: &str = "edges";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphElement {
    Vertex,
    Edge,
}

/// OR add of a vertex or edge.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GraphAdd {
    pub element: GraphElement,
    pub value: Value,
    pub tag: Tag,
}

/// OR remove of a vertex or edge, naming the observed tags.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GraphRemove {
    pub element: GraphElement,
    pub key: ElementKey,
    pub tags: Vec<Tag>,
}

/// Two-phase add of a vertex or edge.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ElementAdd {
    pub element: GraphElement,
    pub value: Value,
}

/// Two-phase remove of a vertex or edge.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ElementRemove {
    pub element: GraphElement,
    pub key: ElementKey,
}

static NULL: Value = Value::Null;

fn endpoint(edge: &Value, side: &str) -> String {
    return edge.get(side).unwrap_or(&NULL).to_string();
}

/// Edge identity: its endpoints.
#[derive(Clone, Copy, Debug, Default)]
pub struct EdgeIdentity;

impl ElementComparer for EdgeIdentity {
    fn identity(&self, edge: &Value) -> ElementKey {
        return format!("{}->{}", endpoint(edge, "source"), endpoint(edge, "target"));
    }
}

fn vertices(graph: Option<&Value>) -> &[Value] {
    return items(graph.and_then(|g| g.get(VERTICES)));
}

fn edges(graph: Option<&Value>) -> &[Value] {
    return items(graph.and_then(|g| g.get(EDGES)));
}

/// Paths under which vertex and edge seed tags are derived.
fn seed_paths(path: &FieldPath) -> (FieldPath, FieldPath) {
    return (path.field(VERTICES), path.field(EDGES));
}

/// The array under `name`, created if missing or not an array.
fn list_mut<'m>(graph: &'m mut Map<String, Value>, name: &str) -> Option<&'m mut Vec<Value>> {
    let slot = graph.entry(name).or_insert_with(|| Value::Array(Vec::new()));
    if !slot.is_array() {
        *slot = Value::Array(Vec::new());
    }
    return slot.as_array_mut();
}

/// What changed between two graph values.
struct GraphDiff<'v> {
    new_vertices: Vec<&'v Value>,
    changed_vertices: Vec<&'v Value>,
    removed_vertices: Vec<ElementKey>,
    new_edges: Vec<&'v Value>,
    changed_edges: Vec<&'v Value>,
    removed_edges: Vec<ElementKey>,
}

fn diff_graph<'v>(original: Option<&'v Value>, modified: Option<&'v Value>, comparer: &dyn ElementComparer) -> GraphDiff<'v> {
    let mut diff = GraphDiff {
        new_vertices: Vec::new(),
        changed_vertices: Vec::new(),
        removed_vertices: Vec::new(),
        new_edges: Vec::new(),
        changed_edges: Vec::new(),
        removed_edges: Vec::new(),
    };

    let before = keyed(vertices(original), comparer);
    let after = keyed(vertices(modified), comparer);
    for vertex in vertices(modified) {
        match before.get(&comparer.identity(vertex)) {
            None => diff.new_vertices.push(vertex),
            Some(old) if *old != vertex => diff.changed_vertices.push(vertex),
            Some(_) => {}
        }
    }
    for vertex in vertices(original) {
        let key = comparer.identity(vertex);
        if !after.contains_key(&key) {
            diff.removed_vertices.push(key);
        }
    }

    let removed: FxHashSet<&str> = diff.removed_vertices.iter().map(String::as_str).collect();
    let before = keyed(edges(original), &EdgeIdentity);
    let after = keyed(edges(modified), &EdgeIdentity);
    for edge in edges(modified) {
        match before.get(&EdgeIdentity.identity(edge)) {
            None => diff.new_edges.push(edge),
            Some(old) if *old != edge => diff.changed_edges.push(edge),
            Some(_) => {}
        }
    }
    for edge in edges(original) {
        let key = EdgeIdentity.identity(edge);
        let dangling = removed.contains(endpoint(edge, "source").as_str()) || removed.contains(endpoint(edge, "target").as_str());
        if !after.contains_key(&key) || dangling {
            diff.removed_edges.push(key);
        }
    }
    return diff;
}

fn seed_graph(state: &mut GraphState, path: &FieldPath, graph: Option<&Value>, comparer: &dyn ElementComparer) {
    let (vertex_path, edge_path) = seed_paths(path);
    seed_or_state(&mut state.vertices, &vertex_path, vertices(graph), comparer);
    seed_or_state(&mut state.edges, &edge_path, edges(graph), &EdgeIdentity);
}

/// The OR state and identity for one kind of element.
fn side<'s>(
    state: &'s mut GraphState,
    element: GraphElement,
    vertex_identity: &'s dyn ElementComparer,
) -> (&'s mut OrSetState, &'s dyn ElementComparer) {
    return match element {
        GraphElement::Vertex => (&mut state.vertices, vertex_identity),
        GraphElement::Edge => (&mut state.edges, &EdgeIdentity),
    };
}

/// Rebuild the document from OR state.
fn render(state: &GraphState, graph: &mut Map<String, Value>) {
    let live_vertices: Vec<Value> = state
        .vertices
        .live_keys()
        .into_iter()
        .filter_map(|key| state.vertices.value(key).cloned())
        .collect();
    let live_edges: Vec<Value> = state
        .edges
        .live_keys()
        .into_iter()
        .filter_map(|key| state.edges.value(key))
        .filter(|edge| state.vertices.is_live(&endpoint(edge, "source")) && state.vertices.is_live(&endpoint(edge, "target")))
        .cloned()
        .collect();
    graph.insert(VERTICES.to_string(), Value::Array(live_vertices));
    graph.insert(EDGES.to_string(), Value::Array(live_edges));
}

/// Observed-remove graph.
#[derive(Clone, Copy, Debug, Default)]
pub struct Graph;

impl Strategy for Graph {
    fn name(&self) -> &'static str {
        return "graph";
    }

    fn generate_patch(&self, cx: &mut GenerateContext<'_>) -> Result<()> {
        let comparer = cx.comparer()?;
        let diff = diff_graph(cx.original, cx.modified, comparer);
        let state = cx.metadata.graphs.get(cx.path);
        let (vertex_path, edge_path) = seed_paths(cx.path);

        let added = [
            (GraphElement::Vertex, &diff.new_vertices),
            (GraphElement::Vertex, &diff.changed_vertices),
            (GraphElement::Edge, &diff.new_edges),
            (GraphElement::Edge, &diff.changed_edges),
        ];
        for (element, values) in added {
            for value in values {
                let add = GraphAdd {
                    element,
                    value: (*value).clone(),
                    tag: Tag::generate(),
                };
                cx.emit_here(OperationKind::Upsert, serde_json::to_value(add)?);
            }
        }

        let removed = [
            (GraphElement::Edge, &diff.removed_edges, state.map(|s| &s.edges), &edge_path),
            (GraphElement::Vertex, &diff.removed_vertices, state.map(|s| &s.vertices), &vertex_path),
        ];
        for (element, keys, tags, seed_path) in removed {
            for key in keys {
                let tags = observed_tags(tags, seed_path, key);
                if tags.is_empty() {
                    continue;
                }
                let remove = GraphRemove {
                    element,
                    key: key.clone(),
                    tags,
                };
                cx.emit_here(OperationKind::Remove, serde_json::to_value(remove)?);
            }
        }
        return Ok(());
    }

    fn apply_operation(&self, cx: &mut ApplyContext<'_>) -> Result<()> {
        let operation = cx.operation;
        let comparer = cx.comparer()?;
        let Some(graph) = object_slot(cx.document, cx.path) else {
            cx.suppress("unresolvable");
            return Ok(());
        };
        let path = cx.path;
        let state = cx.metadata.graphs.entry(path.clone()).or_insert_with(|| {
            let mut state = GraphState::default();
            let existing = Value::Object(graph.clone());
            seed_graph(&mut state, path, Some(&existing), comparer);
            state
        });
        match operation.kind {
            OperationKind::Upsert => {
                let Some(add) = operation.payload::<GraphAdd>() else {
                    return Ok(());
                };
                let (tags, identity) = side(state, add.element, comparer);
                let key = identity.identity(&add.value);
                tags.add(&key, add.tag, add.value, operation.timestamp);
            }
            OperationKind::Remove => {
                let Some(remove) = operation.payload::<GraphRemove>() else {
                    return Ok(());
                };
                let (tags, _) = side(state, remove.element, comparer);
                tags.remove(&remove.key, &remove.tags);
            }
            kind => return Err(Error::unsupported(self.name(), kind, &operation.path)),
        }
        render(state, graph);
        cx.applied();
        return Ok(());
    }

    fn initialize(&self, cx: &mut InitContext<'_>) -> Result<()> {
        let comparer = cx.services.comparer_for(cx.field)?;
        let state = cx.metadata.graphs.entry(cx.path.clone()).or_default();
        seed_graph(state, cx.path, cx.value, comparer);
        return Ok(());
    }
}

fn seed_two_phase(state: &mut TwoPhaseGraphState, graph: Option<&Value>, comparer: &dyn ElementComparer) {
    for vertex in vertices(graph) {
        state.vertices.adds.insert(comparer.identity(vertex));
    }
    for edge in edges(graph) {
        let key = EdgeIdentity.identity(edge);
        state.edges.adds.insert(key.clone());
        state.edge_values.insert(key, edge.clone());
    }
}

/// Show the edges that are live and whose endpoints are live.
fn render_edges(state: &TwoPhaseGraphState, graph: &mut Map<String, Value>) {
    let live: Vec<Value> = state
        .edge_values
        .iter()
        .filter(|(key, edge)| {
            state.edges.is_live(key)
                && state.vertices.is_live(&endpoint(edge, "source"))
                && state.vertices.is_live(&endpoint(edge, "target"))
        })
        .map(|(_, edge)| edge.clone())
        .collect();
    graph.insert(EDGES.to_string(), Value::Array(live));
}

/// Two-phase graph.
#[derive(Clone, Copy, Debug, Default)]
pub struct TwoPhaseGraph;

impl Strategy for TwoPhaseGraph {
    fn name(&self) -> &'static str {
        return "two_phase_graph";
    }

    fn generate_patch(&self, cx: &mut GenerateContext<'_>) -> Result<()> {
        let comparer = cx.comparer()?;
        let diff = diff_graph(cx.original, cx.modified, comparer);
        let state = cx.metadata.two_phase_graphs.get(cx.path);

        // Existing elements cannot change.
        let added = [(GraphElement::Vertex, &diff.new_vertices), (GraphElement::Edge, &diff.new_edges)];
        for (element, values) in added {
            for value in values {
                let key = match element {
                    GraphElement::Vertex => comparer.identity(value),
                    GraphElement::Edge => EdgeIdentity.identity(value),
                };
                let tombstoned = state.is_some_and(|s| match element {
                    GraphElement::Vertex => s.vertices.tombstones.contains(&key),
                    GraphElement::Edge => s.edges.tombstones.contains(&key),
                });
                if tombstoned {
                    tracing::debug!(path = %cx.path, %key, "element was removed for good");
                    continue;
                }
                let add = ElementAdd {
                    element,
                    value: (*value).clone(),
                };
                cx.emit_here(OperationKind::Upsert, serde_json::to_value(add)?);
            }
        }

        let removed = [(GraphElement::Edge, &diff.removed_edges), (GraphElement::Vertex, &diff.removed_vertices)];
        for (element, keys) in removed {
            for key in keys {
                let remove = ElementRemove { element, key: key.clone() };
                cx.emit_here(OperationKind::Remove, serde_json::to_value(remove)?);
            }
        }
        return Ok(());
    }

    fn apply_operation(&self, cx: &mut ApplyContext<'_>) -> Result<()> {
        let operation = cx.operation;
        let comparer = cx.comparer()?;
        let Some(graph) = object_slot(cx.document, cx.path) else {
            cx.suppress("unresolvable");
            return Ok(());
        };
        let state = cx.metadata.two_phase_graphs.entry(cx.path.clone()).or_insert_with(|| {
            let mut state = TwoPhaseGraphState::default();
            let existing = Value::Object(graph.clone());
            seed_two_phase(&mut state, Some(&existing), comparer);
            state
        });
        match operation.kind {
            OperationKind::Upsert => {
                let Some(add) = operation.payload::<ElementAdd>() else {
                    return Ok(());
                };
                match add.element {
                    GraphElement::Vertex => {
                        let key = comparer.identity(&add.value);
                        if state.vertices.tombstones.contains(&key) {
                            cx.suppress("tombstoned");
                            return Ok(());
                        }
                        state.vertices.adds.insert(key.clone());
                        if let Some(list) = list_mut(graph, VERTICES) {
                            put_first_wins(list, comparer, &key, add.value);
                        }
                    }
                    GraphElement::Edge => {
                        let key = EdgeIdentity.identity(&add.value);
                        if state.edges.tombstones.contains(&key) {
                            cx.suppress("tombstoned");
                            return Ok(());
                        }
                        state.edges.adds.insert(key.clone());
                        let keep = state.edge_values.get(&key).is_some_and(|old| old.to_string() >= add.value.to_string());
                        if !keep {
                            state.edge_values.insert(key, add.value);
                        }
                    }
                }
            }
            OperationKind::Remove => {
                let Some(remove) = operation.payload::<ElementRemove>() else {
                    return Ok(());
                };
                match remove.element {
                    GraphElement::Vertex => {
                        state.vertices.tombstones.insert(remove.key.clone());
                        if let Some(list) = list_mut(graph, VERTICES) {
                            remove_keyed(list, comparer, &remove.key);
                        }
                    }
                    GraphElement::Edge => {
                        state.edges.tombstones.insert(remove.key);
                    }
                }
            }
            kind => return Err(Error::unsupported(self.name(), kind, &operation.path)),
        }
        render_edges(state, graph);
        cx.applied();
        return Ok(());
    }

    fn initialize(&self, cx: &mut InitContext<'_>) -> Result<()> {
        let comparer = cx.services.comparer_for(cx.field)?;
        let state = cx.metadata.two_phase_graphs.entry(cx.path.clone()).or_default();
        seed_two_phase(state, cx.value, comparer);
        return Ok(());
    }
}
