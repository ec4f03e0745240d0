//! Typed field descriptors for document types.
//!
//! A `Schema` is declared once per document type. It replaces runtime
//! reflection: the patcher walks the descriptor tree instead of inspecting
//! values, and the applicator looks targets up in a compiled path table.
//!
//! Each field declares its shape and, optionally, an explicit strategy and
//! the configuration that strategy needs. Schemas are plain serde data, so
//! they can be loaded from JSON configuration as well as built in code.

use rustc_hash::FxHashMap;
use rustc_hash::FxHashSet;
use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::crdt::primitives::Numeric;
use crate::error::Error;
use crate::error::Result;
use crate::path::FieldPath;
use crate::path::Segment;

/// Conflict-resolution strategy families.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Lww,
    MaxWins,
    MinWins,
    AverageRegister,
    StateMachine,
    ExclusiveLock,
    Counter,
    GCounter,
    BoundedCounter,
    GSet,
    TwoPhaseSet,
    LwwSet,
    OrSet,
    ArrayLcs,
    Lseq,
    PriorityQueue,
    LwwMap,
    OrMap,
    CounterMap,
    VoteCounter,
    Graph,
    TwoPhaseGraph,
    ReplicatedTree,
    /// A user-registered strategy.
    Custom(String),
}

impl StrategyKind {
    /// Every built-in kind.
    pub const BUILTIN: [StrategyKind; 23] = [
        StrategyKind::Lww,
        StrategyKind::MaxWins,
        StrategyKind::MinWins,
        StrategyKind::AverageRegister,
        StrategyKind::StateMachine,
        StrategyKind::ExclusiveLock,
        StrategyKind::Counter,
        StrategyKind::GCounter,
        StrategyKind::BoundedCounter,
        StrategyKind::GSet,
        StrategyKind::TwoPhaseSet,
        StrategyKind::LwwSet,
        StrategyKind::OrSet,
        StrategyKind::ArrayLcs,
        StrategyKind::Lseq,
        StrategyKind::PriorityQueue,
        StrategyKind::LwwMap,
        StrategyKind::OrMap,
        StrategyKind::CounterMap,
        StrategyKind::VoteCounter,
        StrategyKind::Graph,
        StrategyKind::TwoPhaseGraph,
        StrategyKind::ReplicatedTree,
    ];

    pub fn name(&self) -> &str {
        return match self {
            StrategyKind::Lww => "lww",
            StrategyKind::MaxWins => "max_wins",
            StrategyKind::MinWins => "min_wins",
            StrategyKind::AverageRegister => "average_register",
            StrategyKind::StateMachine => "state_machine",
            StrategyKind::ExclusiveLock => "exclusive_lock",
            StrategyKind::Counter => "counter",
            StrategyKind::GCounter => "g_counter",
            StrategyKind::BoundedCounter => "bounded_counter",
            StrategyKind::GSet => "g_set",
            StrategyKind::TwoPhaseSet => "two_phase_set",
            StrategyKind::LwwSet => "lww_set",
            StrategyKind::OrSet => "or_set",
            StrategyKind::ArrayLcs => "array_lcs",
            StrategyKind::Lseq => "lseq",
            StrategyKind::PriorityQueue => "priority_queue",
            StrategyKind::LwwMap => "lww_map",
            StrategyKind::OrMap => "or_map",
            StrategyKind::CounterMap => "counter_map",
            StrategyKind::VoteCounter => "vote_counter",
            StrategyKind::Graph => "graph",
            StrategyKind::TwoPhaseGraph => "two_phase_graph",
            StrategyKind::ReplicatedTree => "replicated_tree",
            StrategyKind::Custom(name) => name,
        };
    }
}

/// Structural shape of a field's value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Shape {
    /// A single value: number, string, bool, or an opaque object.
    Scalar,
    /// A nested object with its own fields.
    Object(Schema),
    /// A string-keyed dictionary.
    Map,
    /// An ordered or unordered collection.
    Sequence,
}

/// Inclusive bounds for a bounded counter.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min: Numeric,
    pub max: Numeric,
}

/// Per-field strategy configuration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldConfig {
    /// Bounded counter limits.
    pub bounds: Option<Bounds>,
    /// Priority queue sort field on each item.
    pub priority_field: Option<String>,
    /// Exclusive lock: sibling field holding the lock holder id.
    pub lock_holder_field: Option<String>,
    /// State machine: name of a registered transition validator.
    pub validator: Option<String>,
    /// Collections: name of a registered element comparer.
    pub comparer: Option<String>,
}

/// Declaration of one field.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    pub shape: Shape,
    #[serde(default)]
    pub strategy: Option<StrategyKind>,
    #[serde(default)]
    pub config: FieldConfig,
}

impl FieldDescriptor {
    pub fn new(name: impl Into<String>, shape: Shape) -> FieldDescriptor {
        return FieldDescriptor {
            name: name.into(),
            shape,
            strategy: None,
            config: FieldConfig::default(),
        };
    }

    pub fn scalar(name: impl Into<String>) -> FieldDescriptor {
        return FieldDescriptor::new(name, Shape::Scalar);
    }

    pub fn map(name: impl Into<String>) -> FieldDescriptor {
        return FieldDescriptor::new(name, Shape::Map);
    }

    pub fn sequence(name: impl Into<String>) -> FieldDescriptor {
        return FieldDescriptor::new(name, Shape::Sequence);
    }

    pub fn object(name: impl Into<String>, schema: Schema) -> FieldDescriptor {
        return FieldDescriptor::new(name, Shape::Object(schema));
    }

    /// Declare the strategy explicitly.
    pub fn strategy(mut self, kind: StrategyKind) -> FieldDescriptor {
        self.strategy = Some(kind);
        return self;
    }

    pub fn bounds(mut self, min: impl Into<Numeric>, max: impl Into<Numeric>) -> FieldDescriptor {
        self.config.bounds = Some(Bounds {
            min: min.into(),
            max: max.into(),
        });
        return self;
    }

    pub fn priority_field(mut self, field: impl Into<String>) -> FieldDescriptor {
        self.config.priority_field = Some(field.into());
        return self;
    }

    pub fn lock_holder_field(mut self, field: impl Into<String>) -> FieldDescriptor {
        self.config.lock_holder_field = Some(field.into());
        return self;
    }

    pub fn validator(mut self, name: impl Into<String>) -> FieldDescriptor {
        self.config.validator = Some(name.into());
        return self;
    }

    pub fn comparer(mut self, name: impl Into<String>) -> FieldDescriptor {
        self.config.comparer = Some(name.into());
        return self;
    }

    /// Child schema, if this is a nested object.
    pub fn child_schema(&self) -> Option<&Schema> {
        return match &self.shape {
            Shape::Object(schema) => Some(schema),
            _ => None,
        };
    }

    /// A nested object without a declared strategy. Its fields are diffed
    /// and merged one by one.
    pub fn is_walked(&self) -> bool {
        return self.strategy.is_none() && matches!(self.shape, Shape::Object(_));
    }

    /// True if every value under this field is a last-writer-wins register.
    pub fn is_register(&self) -> bool {
        return match (&self.strategy, &self.shape) {
            (Some(StrategyKind::Lww), _) => true,
            (None, Shape::Scalar) => true,
            (None, Shape::Object(child)) => child.is_register_tree(),
            _ => false,
        };
    }
}

/// Characters with a meaning in the path syntax.
const RESERVED: &[char] = &['.', '[', ']', '\'', '\\', '$'];

fn check_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::Schema("empty field name".into()));
    }
    if let Some(c) = name.chars().find(|c| RESERVED.contains(c)) {
        return Err(Error::Schema(format!("field {:?} contains reserved character {:?}", name, c)));
    }
    return Ok(());
}

/// The fields of one object type.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub fields: Vec<FieldDescriptor>,
}

impl Schema {
    pub fn new(fields: Vec<FieldDescriptor>) -> Schema {
        return Schema { fields };
    }

    /// Load a schema from JSON configuration.
    pub fn from_json(text: &str) -> Result<Schema> {
        let schema: Schema = serde_json::from_str(text)?;
        schema.validate()?;
        return Ok(schema);
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        return self.fields.iter().find(|f| f.name == name);
    }

    /// Check for declaration mistakes that would otherwise surface only
    /// when a patch touches the field.
    pub fn validate(&self) -> Result<()> {
        let mut seen = FxHashSet::default();
        for field in &self.fields {
            check_name(&field.name)?;
            if !seen.insert(field.name.as_str()) {
                return Err(Error::Schema(format!("duplicate field {:?}", field.name)));
            }
            if let Some(bounds) = &field.config.bounds {
                if bounds.min > bounds.max {
                    return Err(Error::Schema(format!("field {:?} has min > max", field.name)));
                }
            }
            if let Some(child) = field.child_schema() {
                child.validate()?;
            }
        }
        return Ok(());
    }

    /// True if every field, at any depth, is a last-writer-wins register.
    /// Such an object can be replaced as one value.
    pub fn is_register_tree(&self) -> bool {
        return self.fields.iter().all(FieldDescriptor::is_register);
    }

    /// Flatten into a path-keyed lookup table.
    pub fn compile(&self) -> SchemaIndex {
        let mut fields = FxHashMap::default();
        self.collect(&FieldPath::root(), &mut fields);
        return SchemaIndex { fields };
    }

    fn collect(&self, prefix: &FieldPath, out: &mut FxHashMap<FieldPath, FieldDescriptor>) {
        for field in &self.fields {
            let path = prefix.field(&field.name);
            if let Some(child) = field.child_schema() {
                child.collect(&path, out);
            }
            out.insert(path, field.clone());
        }
    }
}

/// Path-keyed field table built once per document type.
#[derive(Clone, Debug, Default)]
pub struct SchemaIndex {
    fields: FxHashMap<FieldPath, FieldDescriptor>,
}

impl SchemaIndex {
    /// Find the field an operation path targets.
    ///
    /// Only object-field paths name fields; element and entry paths are
    /// owned by the collection strategy of their container.
    pub fn resolve(&self, path: &FieldPath) -> Option<&FieldDescriptor> {
        if !path.segments().iter().all(|s| matches!(s, Segment::Field(_))) {
            return None;
        }
        return self.fields.get(path);
    }

    /// Find the field owning an operation target, along with its path.
    ///
    /// A map entry path `$.field.['key']` is owned by `$.field`.
    pub fn owner(&self, path: &FieldPath) -> Option<(FieldPath, &FieldDescriptor)> {
        if let Some(field) = self.resolve(path) {
            return Some((path.clone(), field));
        }
        let Some(Segment::Key(_)) = path.last() else {
            return None;
        };
        let parent = path.parent()?;
        let field = self.resolve(&parent)?;
        return Some((parent, field));
    }

    /// Iterate over every indexed field.
    pub fn iter(&self) -> impl Iterator<Item = (&FieldPath, &FieldDescriptor)> {
        return self.fields.iter();
    }

    pub fn len(&self) -> usize {
        return self.fields.len();
    }

    pub fn is_empty(&self) -> bool {
        return self.fields.is_empty();
    }
}

/// A document type with a declared schema.
///
/// Implemented by application structs that round-trip through serde.
pub trait Document: Serialize + DeserializeOwned + Clone {
    fn schema() -> Schema;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Schema {
        return Schema::new(vec![
            FieldDescriptor::scalar("title"),
            FieldDescriptor::scalar("stock").strategy(StrategyKind::BoundedCounter).bounds(0, 100),
            FieldDescriptor::object(
                "meta",
                Schema::new(vec![FieldDescriptor::sequence("tags").strategy(StrategyKind::OrSet)]),
            ),
        ]);
    }

    #[test]
    fn compile_indexes_nested_fields() {
        let index = schema().compile();
        let root = FieldPath::root();
        assert_eq!(index.len(), 4);
        assert_eq!(index.resolve(&root.field("title")).map(|f| f.name.as_str()), Some("title"));
        assert_eq!(
            index.resolve(&root.field("meta").field("tags")).and_then(|f| f.strategy.clone()),
            Some(StrategyKind::OrSet)
        );
        assert!(index.resolve(&root.field("meta").field("tags").index(0)).is_none());
        assert!(index.resolve(&root.field("nope")).is_none());
    }

    #[test]
    fn map_entries_resolve_to_their_field() {
        let index = Schema::new(vec![FieldDescriptor::map("scores")]).compile();
        let root = FieldPath::root();
        let (owner, field) = index.owner(&root.field("scores").key("bob")).unwrap();
        assert_eq!(owner, root.field("scores"));
        assert_eq!(field.name, "scores");

        assert!(index.owner(&root.field("scores").index(0)).is_none());
        assert!(index.owner(&root.field("gone").key("bob")).is_none());
    }

    #[test]
    fn load_from_json() {
        let text = r#"{
            "fields": [
                {"name": "title", "shape": "scalar"},
                {"name": "stock", "shape": "scalar", "strategy": "bounded_counter",
                 "config": {"bounds": {"min": 0, "max": 100}}},
                {"name": "meta", "shape": {"object": {"fields": [
                    {"name": "tags", "shape": "sequence", "strategy": "or_set"}
                ]}}},
                {"name": "custom", "shape": "scalar", "strategy": {"custom": "mine"}}
            ]
        }"#;
        let mut expected = schema();
        expected.fields.push(FieldDescriptor::scalar("custom").strategy(StrategyKind::Custom("mine".into())));
        assert_eq!(Schema::from_json(text).unwrap(), expected);
    }

    #[test]
    fn validate_rejects_duplicates_and_bad_bounds() {
        let dup = Schema::new(vec![FieldDescriptor::scalar("a"), FieldDescriptor::scalar("a")]);
        assert!(matches!(dup.validate(), Err(Error::Schema(_))));

        let bad = Schema::new(vec![FieldDescriptor::scalar("a").bounds(10, 0)]);
        assert!(matches!(bad.validate(), Err(Error::Schema(_))));
    }

    #[test]
    fn validate_rejects_names_that_break_paths() {
        for name in ["", "a.b", "list[0]", "it's", "back\\slash", "$root"] {
            let schema = Schema::new(vec![FieldDescriptor::scalar(name)]);
            assert!(matches!(schema.validate(), Err(Error::Schema(_))), "{:?} accepted", name);
        }

        let nested = Schema::new(vec![FieldDescriptor::object("meta", Schema::new(vec![FieldDescriptor::scalar("x.y")]))]);
        assert!(matches!(nested.validate(), Err(Error::Schema(_))));

        let fine = Schema::new(vec![FieldDescriptor::scalar("first_name"), FieldDescriptor::scalar("e-mail 2")]);
        assert!(fine.validate().is_ok());
        for field in &fine.fields {
            let path = FieldPath::root().field(&field.name);
            assert_eq!(path.to_string().parse::<FieldPath>().unwrap(), path);
        }
    }

    #[test]
    fn register_trees() {
        let flat = Schema::new(vec![
            FieldDescriptor::scalar("name"),
            FieldDescriptor::object("address", Schema::new(vec![FieldDescriptor::scalar("city")])),
        ]);
        assert!(flat.is_register_tree());
        assert!(!schema().is_register_tree());
        assert!(schema().field("meta").unwrap().is_walked());
        assert!(!schema().field("title").unwrap().is_walked());
    }

    #[test]
    fn builtin_names_are_unique() {
        let names: FxHashSet<&str> = StrategyKind::BUILTIN.iter().map(|k| k.name()).collect();
        assert_eq!(names.len(), StrategyKind::BUILTIN.len());
    }
}
