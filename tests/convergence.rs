//! Property-based convergence tests.
//!
//! Three replicas edit a common ancestor concurrently. Every delivery order
//! of the three patches must give the same document, and delivering
//! everything twice must change nothing. Nested objects are also edited in
//! causal chains, one chain per replica.

use std::sync::Arc;

use proptest::prelude::*;
use serde_json::Map;
use serde_json::Value;
use serde_json::json;

use converge::CrdtEngine;
use converge::CrdtMetadata;
use converge::CrdtPatch;
use converge::EngineBuilder;
use converge::FieldDescriptor;
use converge::Schema;
use converge::StrategyKind;
use converge::crdt::primitives::KeyFieldComparer;
use converge::crdt::primitives::ReplicaId;
use converge::crdt::primitives::Timestamp;
use converge::crdt::strategies::TransitionTable;

// =============================================================================
// Test helpers
// =============================================================================

#[derive(Clone, Debug)]
enum SeqEdit {
    Insert(usize, char),
    Delete(usize),
}

fn seq_edit() -> impl Strategy<Value = SeqEdit> {
    prop_oneof![
        (0..8usize, prop::char::range('a', 'e')).prop_map(|(i, c)| SeqEdit::Insert(i, c)),
        (0..8usize).prop_map(SeqEdit::Delete),
    ]
}

fn edit_sequence(list: &mut Vec<Value>, edits: &[SeqEdit]) {
    for edit in edits {
        match edit {
            SeqEdit::Insert(i, c) => {
                let at = i % (list.len() + 1);
                list.insert(at, json!(c.to_string()));
            }
            SeqEdit::Delete(i) => {
                if !list.is_empty() {
                    let at = i % list.len();
                    list.remove(at);
                }
            }
        }
    }
}

/// Add (`true`) or remove (`false`) single-letter elements.
fn toggle(list: &mut Vec<Value>, edits: &[(bool, char)]) {
    for (add, element) in edits {
        let element = json!(element.to_string());
        if *add && !list.contains(&element) {
            list.push(element);
        } else if !*add {
            list.retain(|e| *e != element);
        }
    }
}

fn toggles() -> impl Strategy<Value = Vec<(bool, char)>> {
    return prop::collection::vec((any::<bool>(), prop::char::range('a', 'e')), 0..3);
}

fn ensure_object(value: &mut Value) -> &mut Map<String, Value> {
    if !value.is_object() {
        *value = json!({});
    }
    return value.as_object_mut().unwrap();
}

fn edit_map(map: &mut Map<String, Value>, edits: &[(char, Option<i64>)]) {
    for (key, value) in edits {
        match value {
            Some(value) => {
                map.insert(key.to_string(), json!(value));
            }
            None => {
                map.remove(&key.to_string());
            }
        }
    }
}

/// One patch per edited document, each diffed from `start` by its own
/// replica at its own timestamp.
fn concurrent_patches(engine: &CrdtEngine, start: &Value, edited: &[Value]) -> Vec<CrdtPatch> {
    let metadata = engine.initialize(start, Timestamp::ZERO).unwrap();
    return edited
        .iter()
        .enumerate()
        .map(|(i, modified)| {
            let replica = ReplicaId::new(format!("r{i}"));
            engine
                .generate_patch(&replica, start, &metadata, modified, Timestamp(i as u64 + 1))
                .unwrap()
        })
        .collect();
}

fn deliver(engine: &CrdtEngine, start: &Value, patches: &[&CrdtPatch]) -> (Value, CrdtMetadata) {
    let mut doc = start.clone();
    let mut metadata = engine.initialize(start, Timestamp::ZERO).unwrap();
    for patch in patches {
        engine.apply_patch(&mut doc, &mut metadata, patch).unwrap();
    }
    return (doc, metadata);
}

const ORDERS: [[usize; 3]; 6] = [[0, 1, 2], [0, 2, 1], [1, 0, 2], [1, 2, 0], [2, 0, 1], [2, 1, 0]];

fn assert_converges(engine: &CrdtEngine, start: &Value, patches: &[CrdtPatch]) -> Result<(), TestCaseError> {
    let (expected, _) = deliver(engine, start, &[&patches[0], &patches[1], &patches[2]]);
    for order in ORDERS {
        let ordered: Vec<&CrdtPatch> = order.iter().map(|i| &patches[*i]).collect();
        let (doc, _) = deliver(engine, start, &ordered);
        prop_assert_eq!(&doc, &expected, "order {:?}", order);
    }

    let twice: Vec<&CrdtPatch> = patches.iter().chain(patches.iter()).collect();
    let (doc, _) = deliver(engine, start, &twice);
    prop_assert_eq!(&doc, &expected);
    return Ok(());
}

/// Each replica makes its edits one after another, diffing every step
/// against its own current document. Timestamps interleave across replicas.
fn chained_patches<E>(
    engine: &CrdtEngine,
    start: &Value,
    chains: &[Vec<E>],
    edit: impl Fn(&Value, &E) -> Value,
) -> Vec<Vec<CrdtPatch>> {
    let mut all = Vec::new();
    for (i, chain) in chains.iter().enumerate() {
        let replica = ReplicaId::new(format!("r{i}"));
        let mut doc = start.clone();
        let mut metadata = engine.initialize(start, Timestamp::ZERO).unwrap();
        let mut patches = Vec::new();
        for (step, e) in chain.iter().enumerate() {
            let modified = edit(&doc, e);
            let ts = Timestamp((step * chains.len() + i + 1) as u64);
            let patch = engine.generate_patch(&replica, &doc, &metadata, &modified, ts).unwrap();
            engine.apply_patch(&mut doc, &mut metadata, &patch).unwrap();
            patches.push(patch);
        }
        all.push(patches);
    }
    return all;
}

fn in_order(chains: &[Vec<CrdtPatch>], order: [usize; 3]) -> Vec<&CrdtPatch> {
    return order.into_iter().flat_map(|i| chains[i].iter()).collect();
}

/// Like `assert_converges`, for three causal chains: every order of the
/// chains, a round-robin interleaving and double delivery all agree.
fn assert_chains_converge(engine: &CrdtEngine, start: &Value, chains: &[Vec<CrdtPatch>]) -> Result<(), TestCaseError> {
    let (expected, _) = deliver(engine, start, &in_order(chains, [0, 1, 2]));
    for order in ORDERS {
        let (doc, _) = deliver(engine, start, &in_order(chains, order));
        prop_assert_eq!(&doc, &expected, "order {:?}", order);
    }

    let longest = chains.iter().map(Vec::len).max().unwrap_or(0);
    let round_robin: Vec<&CrdtPatch> = (0..longest).flat_map(|step| chains.iter().filter_map(move |c| c.get(step))).collect();
    let (doc, _) = deliver(engine, start, &round_robin);
    prop_assert_eq!(&doc, &expected, "round robin");

    let mut twice = in_order(chains, [2, 1, 0]);
    twice.extend(in_order(chains, [0, 1, 2]));
    let (doc, _) = deliver(engine, start, &twice);
    prop_assert_eq!(&doc, &expected, "twice");
    return Ok(());
}

// =============================================================================
// Mixed document
// =============================================================================

#[derive(Clone, Debug)]
struct Edit {
    title: Option<String>,
    views: i64,
    high: i64,
    stock: i64,
    tags: Vec<(bool, char)>,
    lines: Vec<SeqEdit>,
    text: Vec<SeqEdit>,
    prefs: Vec<(char, Option<i64>)>,
    scores: Vec<(char, Option<i64>)>,
    votes: Vec<(char, Option<char>)>,
}

fn arbitrary_edit() -> impl Strategy<Value = Edit> {
    let entry = || prop::collection::vec((prop::char::range('a', 'c'), prop::option::of(0..9i64)), 0..3);
    return (
        prop::option::of("[a-z]{1,4}"),
        -5..5i64,
        0..100i64,
        -20..80i64,
        toggles(),
        prop::collection::vec(seq_edit(), 0..4),
        prop::collection::vec(seq_edit(), 0..4),
        entry(),
        entry(),
        prop::collection::vec((prop::char::range('p', 'r'), prop::option::of(prop::char::range('x', 'z'))), 0..3),
    )
        .prop_map(|(title, views, high, stock, tags, lines, text, prefs, scores, votes)| Edit {
            title,
            views,
            high,
            stock,
            tags,
            lines,
            text,
            prefs,
            scores,
            votes,
        });
}

fn mixed_engine() -> CrdtEngine {
    let schema = Schema::new(vec![
        FieldDescriptor::scalar("title"),
        FieldDescriptor::scalar("views").strategy(StrategyKind::Counter),
        FieldDescriptor::scalar("high").strategy(StrategyKind::MaxWins),
        FieldDescriptor::scalar("stock").strategy(StrategyKind::BoundedCounter).bounds(0, 50),
        FieldDescriptor::sequence("tags").strategy(StrategyKind::OrSet),
        FieldDescriptor::sequence("lines"),
        FieldDescriptor::sequence("text").strategy(StrategyKind::Lseq),
        FieldDescriptor::map("prefs"),
        FieldDescriptor::map("scores").strategy(StrategyKind::LwwMap),
        FieldDescriptor::map("poll").strategy(StrategyKind::VoteCounter),
    ]);
    return EngineBuilder::new(schema).build().unwrap();
}

fn mixed_start() -> Value {
    return json!({
        "title": "t",
        "views": 0,
        "high": 50,
        "stock": 25,
        "tags": ["a", "c"],
        "lines": ["a", "b", "c"],
        "text": ["x", "y"],
        "prefs": {"a": 1},
        "scores": {"b": 2},
        "poll": {"x": ["p"]},
    });
}

fn apply_edit(start: &Value, edit: &Edit) -> Value {
    let mut doc = start.clone();
    if let Some(title) = &edit.title {
        doc["title"] = json!(title);
    }
    doc["views"] = json!(doc["views"].as_i64().unwrap_or(0) + edit.views);
    doc["high"] = json!(edit.high);
    doc["stock"] = json!(edit.stock);

    if let Some(tags) = doc["tags"].as_array_mut() {
        toggle(tags, &edit.tags);
    }
    if let Some(lines) = doc["lines"].as_array_mut() {
        edit_sequence(lines, &edit.lines);
    }
    if let Some(text) = doc["text"].as_array_mut() {
        edit_sequence(text, &edit.text);
    }
    if let Some(prefs) = doc["prefs"].as_object_mut() {
        edit_map(prefs, &edit.prefs);
    }
    if let Some(scores) = doc["scores"].as_object_mut() {
        edit_map(scores, &edit.scores);
    }
    if let Some(poll) = doc["poll"].as_object_mut() {
        for (voter, option) in &edit.votes {
            let voter = json!(voter.to_string());
            for voters in poll.values_mut() {
                if let Some(voters) = voters.as_array_mut() {
                    voters.retain(|v| *v != voter);
                }
            }
            poll.retain(|_, voters| voters.as_array().is_some_and(|v| !v.is_empty()));
            if let Some(option) = option {
                let slot = poll.entry(option.to_string()).or_insert_with(|| json!([]));
                if let Some(voters) = slot.as_array_mut() {
                    voters.push(voter);
                    voters.sort_by(|a, b| a.as_str().cmp(&b.as_str()));
                }
            }
        }
    }
    return doc;
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn mixed_document_converges(edits in prop::collection::vec(arbitrary_edit(), 3)) {
        let engine = mixed_engine();
        let start = mixed_start();
        let edited: Vec<Value> = edits.iter().map(|e| apply_edit(&start, e)).collect();
        let patches = concurrent_patches(&engine, &start, &edited);
        assert_converges(&engine, &start, &patches)?;
    }

    /// A lone patch reproduces the editor's own result.
    #[test]
    fn single_patch_reproduces_the_edit(edit in arbitrary_edit()) {
        let engine = mixed_engine();
        let start = mixed_start();
        let modified = apply_edit(&start, &edit);
        let patches = concurrent_patches(&engine, &start, std::slice::from_ref(&modified));
        let (doc, _) = deliver(&engine, &start, &[&patches[0]]);

        for field in ["title", "views", "lines", "text", "prefs", "scores", "poll"] {
            prop_assert_eq!(&doc[field], &modified[field], "field {}", field);
        }
        prop_assert_eq!(&doc["high"], &json!(edit.high.max(50)));
        prop_assert_eq!(&doc["stock"], &json!(edit.stock.clamp(0, 50)));
    }
}

// =============================================================================
// Prepending
// =============================================================================

fn text_engine() -> CrdtEngine {
    let schema = Schema::new(vec![FieldDescriptor::sequence("text").strategy(StrategyKind::Lseq)]);
    return EngineBuilder::new(schema).build().unwrap();
}

fn prepend(doc: &Value, element: &String) -> Value {
    let mut doc = doc.clone();
    if let Some(text) = doc["text"].as_array_mut() {
        text.insert(0, json!(element));
    }
    return doc;
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Replicas repeatedly prepending to the same sequence converge, and
    /// each replica's own prepends stay in reverse insertion order ahead of
    /// the original head.
    #[test]
    fn concurrent_prepends_converge(counts in prop::collection::vec(0..6usize, 3)) {
        let engine = text_engine();
        let start = json!({"text": ["A"]});
        let chains: Vec<Vec<String>> = counts
            .iter()
            .enumerate()
            .map(|(r, n)| (0..*n).map(|k| format!("{r}{k}")).collect())
            .collect();
        let patches = chained_patches(&engine, &start, &chains, prepend);
        assert_chains_converge(&engine, &start, &patches)?;

        let (doc, _) = deliver(&engine, &start, &in_order(&patches, [0, 1, 2]));
        let merged: Vec<&str> = doc["text"].as_array().unwrap().iter().filter_map(Value::as_str).collect();
        prop_assert_eq!(merged.len(), counts.iter().sum::<usize>() + 1);
        prop_assert_eq!(merged.last().copied(), Some("A"));
        for chain in &chains {
            let positions: Vec<usize> = chain.iter().filter_map(|e| merged.iter().position(|m| *m == e.as_str())).collect();
            prop_assert_eq!(positions.len(), chain.len());
            prop_assert!(positions.windows(2).all(|w| w[0] > w[1]), "{:?} in {:?}", chain, merged);
        }
    }
}

// =============================================================================
// Graphs and trees
// =============================================================================

const VERTICES: [&str; 4] = ["a", "b", "c", "d"];

#[derive(Clone, Debug)]
enum GraphEdit {
    AddVertex(usize),
    RemoveVertex(usize),
    AddEdge(usize, usize),
    RemoveEdge(usize, usize),
}

fn graph_edit() -> impl Strategy<Value = GraphEdit> {
    prop_oneof![
        (0..4usize).prop_map(GraphEdit::AddVertex),
        (0..4usize).prop_map(GraphEdit::RemoveVertex),
        (0..4usize, 0..4usize).prop_map(|(s, t)| GraphEdit::AddEdge(s, t)),
        (0..4usize, 0..4usize).prop_map(|(s, t)| GraphEdit::RemoveEdge(s, t)),
    ]
}

fn apply_graph_edits(start: &Value, edits: &[GraphEdit]) -> Value {
    let mut vertices: Vec<Value> = start["vertices"].as_array().cloned().unwrap_or_default();
    let mut edges: Vec<Value> = start["edges"].as_array().cloned().unwrap_or_default();
    for edit in edits {
        match edit {
            GraphEdit::AddVertex(v) => {
                let v = json!(VERTICES[*v]);
                if !vertices.contains(&v) {
                    vertices.push(v);
                }
            }
            GraphEdit::RemoveVertex(v) => {
                let v = json!(VERTICES[*v]);
                vertices.retain(|x| *x != v);
                edges.retain(|e| e["source"] != v && e["target"] != v);
            }
            GraphEdit::AddEdge(s, t) => {
                let edge = json!({"source": VERTICES[*s], "target": VERTICES[*t]});
                let present = |name: &str| vertices.contains(&json!(name));
                if present(VERTICES[*s]) && present(VERTICES[*t]) && !edges.contains(&edge) {
                    edges.push(edge);
                }
            }
            GraphEdit::RemoveEdge(s, t) => {
                let edge = json!({"source": VERTICES[*s], "target": VERTICES[*t]});
                edges.retain(|e| *e != edge);
            }
        }
    }
    return json!({"vertices": vertices, "edges": edges});
}

#[derive(Clone, Debug)]
enum TreeEdit {
    Move(usize, Option<usize>),
    SetValue(usize, i64),
    Remove(usize),
    Add(usize, usize),
}

const NODES: [&str; 4] = ["root", "a", "b", "c"];

fn tree_edit() -> impl Strategy<Value = TreeEdit> {
    prop_oneof![
        (1..4usize, prop::option::of(0..4usize)).prop_map(|(n, p)| TreeEdit::Move(n, p)),
        (0..4usize, 0..5i64).prop_map(|(n, v)| TreeEdit::SetValue(n, v)),
        (1..4usize).prop_map(TreeEdit::Remove),
        (0..3usize, 0..4usize).prop_map(|(n, p)| TreeEdit::Add(n, p)),
    ]
}

fn apply_tree_edits(start: &Value, edits: &[TreeEdit]) -> Value {
    let mut nodes = start["nodes"].as_object().cloned().unwrap_or_default();
    for edit in edits {
        match edit {
            TreeEdit::Move(node, parent) => {
                if let Some(node) = nodes.get_mut(NODES[*node]) {
                    node["parent"] = json!(parent.map(|p| NODES[p]));
                }
            }
            TreeEdit::SetValue(node, value) => {
                if let Some(node) = nodes.get_mut(NODES[*node]) {
                    node["value"] = json!(value);
                }
            }
            TreeEdit::Remove(node) => {
                nodes.remove(NODES[*node]);
            }
            TreeEdit::Add(node, parent) => {
                let id = format!("new{node}");
                nodes.insert(id, json!({"value": 0, "parent": NODES[*parent]}));
            }
        }
    }
    return json!({"nodes": nodes});
}

fn structure_engine() -> CrdtEngine {
    let schema = Schema::new(vec![
        FieldDescriptor::scalar("graph").strategy(StrategyKind::Graph),
        FieldDescriptor::scalar("permanent").strategy(StrategyKind::TwoPhaseGraph),
        FieldDescriptor::scalar("outline").strategy(StrategyKind::ReplicatedTree),
    ]);
    return EngineBuilder::new(schema).build().unwrap();
}

fn structure_start() -> Value {
    let graph = json!({"vertices": ["a", "b"], "edges": [{"source": "a", "target": "b"}]});
    return json!({
        "graph": graph.clone(),
        "permanent": graph,
        "outline": {"nodes": {
            "root": {"value": 0, "parent": null},
            "a": {"value": 1, "parent": "root"},
            "b": {"value": 2, "parent": "root"},
            "c": {"value": 3, "parent": "a"},
        }},
    });
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn graphs_and_trees_converge(
        graph_edits in prop::collection::vec(prop::collection::vec(graph_edit(), 0..5), 3),
        tree_edits in prop::collection::vec(prop::collection::vec(tree_edit(), 0..4), 3),
    ) {
        let engine = structure_engine();
        let start = structure_start();
        let edited: Vec<Value> = (0..3)
            .map(|i| {
                let graph = apply_graph_edits(&start["graph"], &graph_edits[i]);
                json!({
                    "graph": graph.clone(),
                    "permanent": graph,
                    "outline": apply_tree_edits(&start["outline"], &tree_edits[i]),
                })
            })
            .collect();
        let patches = concurrent_patches(&engine, &start, &edited);
        assert_converges(&engine, &start, &patches)?;
    }
}

// =============================================================================
// Nested objects
// =============================================================================

#[derive(Clone, Debug)]
enum NestedEdit {
    Replace(Option<String>, Option<String>),
    Clear,
    Name(String),
    City(Option<String>),
    Visits(i64),
    Label(String),
    ClearStats,
}

fn nested_edit() -> impl Strategy<Value = NestedEdit> {
    prop_oneof![
        (prop::option::of("[a-c]{1,2}"), prop::option::of("[x-z]")).prop_map(|(n, e)| NestedEdit::Replace(n, e)),
        Just(NestedEdit::Clear),
        "[a-c]{1,2}".prop_map(NestedEdit::Name),
        prop::option::of("[p-r]").prop_map(NestedEdit::City),
        (-3..4i64).prop_map(NestedEdit::Visits),
        "[a-c]".prop_map(NestedEdit::Label),
        Just(NestedEdit::ClearStats),
    ]
}

fn nested_engine() -> CrdtEngine {
    let schema = Schema::new(vec![
        FieldDescriptor::object(
            "owner",
            Schema::new(vec![
                FieldDescriptor::scalar("name"),
                FieldDescriptor::scalar("email"),
                FieldDescriptor::object("address", Schema::new(vec![FieldDescriptor::scalar("city")])),
            ]),
        ),
        FieldDescriptor::object(
            "stats",
            Schema::new(vec![
                FieldDescriptor::scalar("visits").strategy(StrategyKind::Counter),
                FieldDescriptor::scalar("label"),
            ]),
        ),
    ]);
    return EngineBuilder::new(schema).build().unwrap();
}

fn nested_start() -> Value {
    return json!({
        "owner": {"name": "ann", "email": "x", "address": {"city": "p"}},
        "stats": {"visits": 0, "label": "a"},
    });
}

fn apply_nested_edit(doc: &Value, edit: &NestedEdit) -> Value {
    let mut doc = doc.clone();
    match edit {
        NestedEdit::Replace(name, email) => {
            let mut owner = Map::new();
            if let Some(name) = name {
                owner.insert("name".into(), json!(name));
            }
            if let Some(email) = email {
                owner.insert("email".into(), json!(email));
            }
            doc["owner"] = Value::Object(owner);
        }
        NestedEdit::Clear => doc["owner"] = Value::Null,
        NestedEdit::Name(name) => {
            ensure_object(&mut doc["owner"]).insert("name".into(), json!(name));
        }
        NestedEdit::City(Some(city)) => {
            let owner = ensure_object(&mut doc["owner"]);
            let address = ensure_object(owner.entry("address").or_insert(Value::Null));
            address.insert("city".into(), json!(city));
        }
        NestedEdit::City(None) => {
            ensure_object(&mut doc["owner"]).remove("address");
        }
        NestedEdit::Visits(delta) => {
            let stats = ensure_object(&mut doc["stats"]);
            let visits = stats.get("visits").and_then(Value::as_i64).unwrap_or(0);
            stats.insert("visits".into(), json!(visits + delta));
        }
        NestedEdit::Label(label) => {
            ensure_object(&mut doc["stats"]).insert("label".into(), json!(label));
        }
        NestedEdit::ClearStats => doc["stats"] = Value::Null,
    }
    return doc;
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Whole-object writes and writes to the object's own fields commute,
    /// including a replica's later field edit racing another replica's
    /// object replacement.
    #[test]
    fn nested_objects_converge(chains in prop::collection::vec(prop::collection::vec(nested_edit(), 0..4), 3)) {
        let engine = nested_engine();
        let start = nested_start();
        let patches = chained_patches(&engine, &start, &chains, apply_nested_edit);
        assert_chains_converge(&engine, &start, &patches)?;
    }
}

// =============================================================================
// Sets, counters and guarded registers
// =============================================================================

const STATES: [&str; 4] = ["open", "closed", "archived", "lost"];

#[derive(Clone, Debug)]
struct GuardedEdit {
    seen: Vec<(bool, char)>,
    banned: Vec<(bool, char)>,
    flags: Vec<(bool, char)>,
    queue: Vec<(char, Option<i64>)>,
    stars: Vec<(char, i64)>,
    likes: i64,
    low: i64,
    rating: Option<i64>,
    body: Option<(String, bool)>,
    status: usize,
}

fn guarded_edit() -> impl Strategy<Value = GuardedEdit> {
    return (
        toggles(),
        toggles(),
        toggles(),
        prop::collection::vec((prop::char::range('a', 'c'), prop::option::of(0..4i64)), 0..3),
        prop::collection::vec((prop::char::range('a', 'c'), -3..4i64), 0..3),
        -3..5i64,
        0..100i64,
        prop::option::of(0..6i64),
        prop::option::of(("[a-z]{1,3}", any::<bool>())),
        0..STATES.len(),
    )
        .prop_map(|(seen, banned, flags, queue, stars, likes, low, rating, body, status)| GuardedEdit {
            seen,
            banned,
            flags,
            queue,
            stars,
            likes,
            low,
            rating,
            body,
            status,
        });
}

fn guarded_engine() -> CrdtEngine {
    let schema = Schema::new(vec![
        FieldDescriptor::sequence("seen").strategy(StrategyKind::GSet),
        FieldDescriptor::sequence("banned").strategy(StrategyKind::TwoPhaseSet),
        FieldDescriptor::sequence("flags").strategy(StrategyKind::LwwSet),
        FieldDescriptor::sequence("queue")
            .strategy(StrategyKind::PriorityQueue)
            .priority_field("p")
            .comparer("by_id"),
        FieldDescriptor::map("stars").strategy(StrategyKind::CounterMap),
        FieldDescriptor::scalar("likes").strategy(StrategyKind::GCounter),
        FieldDescriptor::scalar("low").strategy(StrategyKind::MinWins),
        FieldDescriptor::scalar("rating").strategy(StrategyKind::AverageRegister),
        FieldDescriptor::scalar("body")
            .strategy(StrategyKind::ExclusiveLock)
            .lock_holder_field("holder"),
        FieldDescriptor::scalar("status").strategy(StrategyKind::StateMachine).validator("any"),
    ]);
    // Every listed state may follow any other; "lost" is never valid.
    let mut table = TransitionTable::new();
    for from in &STATES[..3] {
        for to in &STATES[..3] {
            table = table.allow(*from, *to);
        }
    }
    return EngineBuilder::new(schema)
        .comparer("by_id", Arc::new(KeyFieldComparer::new("id")))
        .validator("any", Arc::new(table))
        .build()
        .unwrap();
}

fn guarded_start() -> Value {
    return json!({
        "seen": ["a"],
        "banned": ["a", "b"],
        "flags": ["c"],
        "queue": [{"id": "a", "p": 2}],
        "stars": {"a": 1},
        "likes": 0,
        "low": 50,
        "rating": 3,
        "body": "draft",
        "holder": null,
        "status": "open",
    });
}

fn apply_guarded_edit(start: &Value, replica: usize, edit: &GuardedEdit) -> Value {
    let mut doc = start.clone();
    for (field, edits) in [("seen", &edit.seen), ("banned", &edit.banned), ("flags", &edit.flags)] {
        if let Some(list) = doc[field].as_array_mut() {
            toggle(list, edits);
        }
    }
    if let Some(queue) = doc["queue"].as_array_mut() {
        for (id, priority) in &edit.queue {
            let id = json!(id.to_string());
            queue.retain(|item| item["id"] != id);
            if let Some(priority) = priority {
                queue.push(json!({"id": id, "p": priority}));
            }
        }
    }
    if let Some(stars) = doc["stars"].as_object_mut() {
        for (key, delta) in &edit.stars {
            let slot = stars.entry(key.to_string()).or_insert(json!(0));
            *slot = json!(slot.as_i64().unwrap_or(0) + delta);
        }
    }
    doc["likes"] = json!(edit.likes);
    doc["low"] = json!(edit.low);
    if let Some(rating) = edit.rating {
        doc["rating"] = json!(rating);
    }
    if let Some((body, take)) = &edit.body {
        doc["body"] = json!(body);
        doc["holder"] = if *take { json!(format!("r{replica}")) } else { Value::Null };
    }
    doc["status"] = json!(STATES[edit.status]);
    return doc;
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn sets_counters_and_guarded_registers_converge(edits in prop::collection::vec(guarded_edit(), 3)) {
        let engine = guarded_engine();
        let start = guarded_start();
        let edited: Vec<Value> = edits.iter().enumerate().map(|(i, e)| apply_guarded_edit(&start, i, e)).collect();
        let patches = concurrent_patches(&engine, &start, &edited);
        assert_converges(&engine, &start, &patches)?;

        // Monotonic fields never go backwards.
        let (doc, _) = deliver(&engine, &start, &[&patches[0], &patches[1], &patches[2]]);
        prop_assert!(doc["likes"].as_i64().unwrap_or(0) >= 0);
        prop_assert!(doc["low"].as_i64().unwrap_or(0) <= 50);
        prop_assert!(doc["seen"].as_array().is_some_and(|s| s.contains(&json!("a"))));
        prop_assert!(STATES[..3].contains(&doc["status"].as_str().unwrap_or("")));
    }
}
