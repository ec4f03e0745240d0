//! Single-value registers.
//!
//! - `Lww`: last writer wins by timestamp; ties keep the stored value. A
//!   whole write of a walked object is merged child by child, so it
//!   commutes with writes to its fields.
//! - `MaxWins` / `MinWins`: the larger (smaller) value wins regardless of
//!   timestamps. Values are compared with `compare_values`, so numbers,
//!   strings and booleans all work; unordered pairs never replace.

use std::cmp::Ordering;

use serde_json::Map;
use serde_json::Value;

use super::lww_wins;
use crate::crdt::ApplyContext;
use crate::crdt::GenerateContext;
use crate::crdt::Strategy;
use crate::crdt::op::OperationKind;
use crate::crdt::primitives::Timestamp;
use crate::crdt::primitives::numeric::compare_values;
use crate::error::Error;
use crate::error::Result;
use crate::metadata::CrdtMetadata;
use crate::path::FieldPath;
use crate::schema::Schema;

/// Last-writer-wins register.
#[derive(Clone, Copy, Debug, Default)]
pub struct Lww;

impl Strategy for Lww {
    fn name(&self) -> &'static str {
        return "lww";
    }

    fn generate_patch(&self, cx: &mut GenerateContext<'_>) -> Result<()> {
        if cx.original == cx.modified {
            return Ok(());
        }
        if !cx.timestamp.wins_over(cx.metadata.lww_timestamp(cx.path)) {
            tracing::debug!(path = %cx.path, timestamp = %cx.timestamp, "write does not beat stored timestamp");
            return Ok(());
        }
        match cx.modified {
            None | Some(Value::Null) => cx.emit_here(OperationKind::Remove, Value::Null),
            Some(value) => cx.emit_here(OperationKind::Upsert, value.clone()),
        }
        return Ok(());
    }

    fn apply_operation(&self, cx: &mut ApplyContext<'_>) -> Result<()> {
        let operation = cx.operation;
        let value = match operation.kind {
            OperationKind::Upsert => operation.value.clone(),
            OperationKind::Remove => Value::Null,
            kind => return Err(Error::unsupported(self.name(), kind, &operation.path)),
        };
        if !lww_wins(cx, cx.path) {
            return Ok(());
        }
        let field = cx.field;
        let path = cx.path;
        let value = match field.child_schema() {
            Some(schema) if field.is_walked() => {
                let current = path.resolve(cx.document).cloned();
                let (merged, _) = overlay(schema, path, Some(&value), current.as_ref(), operation.timestamp, cx.metadata);
                merged.unwrap_or(Value::Null)
            }
            _ => value,
        };
        let Some(slot) = path.slot_mut(cx.document) else {
            cx.suppress("unresolvable");
            return Ok(());
        };
        *slot = value;
        cx.metadata.advance_lww(path, operation.timestamp);
        cx.applied();
        return Ok(());
    }
}

/// Merge a whole write of a walked object at `timestamp` into its current
/// value.
///
/// Register children take the incoming value unless they were written later
/// than `timestamp`; later children and non-register children keep their
/// current value. Every register child it overwrites has its timestamp
/// advanced, so a stale child write arriving afterwards is dropped.
///
/// Returns the merged value and whether any current child was kept. An
/// incoming non-object stays a non-object unless a child was kept.
fn overlay(
    schema: &Schema,
    path: &FieldPath,
    incoming: Option<&Value>,
    current: Option<&Value>,
    timestamp: Timestamp,
    metadata: &mut CrdtMetadata,
) -> (Option<Value>, bool) {
    let mut merged = match incoming {
        Some(Value::Object(map)) => map.clone(),
        _ => Map::new(),
    };
    let mut kept = false;
    for field in &schema.fields {
        let child_path = path.field(&field.name);
        let theirs = incoming.and_then(|v| v.get(&field.name));
        let ours = current.and_then(|v| v.get(&field.name));
        let value = if !timestamp.wins_over(metadata.lww_timestamp(&child_path)) {
            kept = true;
            ours.cloned()
        } else if let Some(child) = field.child_schema().filter(|_| field.is_walked()) {
            let (value, child_kept) = overlay(child, &child_path, theirs, ours, timestamp, metadata);
            kept |= child_kept;
            value
        } else if field.is_register() {
            metadata.advance_lww(&child_path, timestamp);
            theirs.cloned()
        } else {
            kept |= ours.is_some();
            ours.cloned()
        };
        match value {
            Some(value) => merged.insert(field.name.clone(), value),
            None => merged.remove(&field.name),
        };
    }
    metadata.advance_lww(path, timestamp);

    if kept || incoming.is_some_and(Value::is_object) {
        return (Some(Value::Object(merged)), kept);
    }
    return (incoming.cloned(), false);
}

/// Apply `candidate` if it beats `current` in the wanted direction. A
/// missing or null current value always loses.
fn beats(candidate: &Value, current: Option<&Value>, wanted: Ordering) -> bool {
    return match current {
        None | Some(Value::Null) => !candidate.is_null(),
        Some(current) => compare_values(candidate, current) == Some(wanted),
    };
}

fn generate_extremum(cx: &mut GenerateContext<'_>, wanted: Ordering) -> Result<()> {
    let Some(modified) = cx.modified else {
        return Ok(());
    };
    if beats(modified, cx.original, wanted) {
        cx.emit_here(OperationKind::Upsert, modified.clone());
    }
    return Ok(());
}

fn apply_extremum(cx: &mut ApplyContext<'_>, name: &'static str, wanted: Ordering) -> Result<()> {
    let operation = cx.operation;
    if operation.kind != OperationKind::Upsert {
        return Err(Error::unsupported(name, operation.kind, &operation.path));
    }
    let Some(slot) = cx.path.slot_mut(cx.document) else {
        cx.suppress("unresolvable");
        return Ok(());
    };
    if !beats(&operation.value, Some(&*slot), wanted) {
        cx.suppress("does not win");
        return Ok(());
    }
    *slot = operation.value.clone();
    cx.metadata.advance_lww(cx.path, operation.timestamp);
    cx.applied();
    return Ok(());
}

/// Register where the largest value wins.
#[derive(Clone, Copy, Debug, Default)]
pub struct MaxWins;

impl Strategy for MaxWins {
    fn name(&self) -> &'static str {
        return "max_wins";
    }

    fn generate_patch(&self, cx: &mut GenerateContext<'_>) -> Result<()> {
        return generate_extremum(cx, Ordering::Greater);
    }

    fn apply_operation(&self, cx: &mut ApplyContext<'_>) -> Result<()> {
        return apply_extremum(cx, self.name(), Ordering::Greater);
    }
}

/// Register where the smallest value wins.
#[derive(Clone, Copy, Debug, Default)]
pub struct MinWins;

impl Strategy for MinWins {
    fn name(&self) -> &'static str {
        return "min_wins";
    }

    fn generate_patch(&self, cx: &mut GenerateContext<'_>) -> Result<()> {
        return generate_extremum(cx, Ordering::Less);
    }

    fn apply_operation(&self, cx: &mut ApplyContext<'_>) -> Result<()> {
        return apply_extremum(cx, self.name(), Ordering::Less);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crdt::strategies::testing::Bench;
    use crate::schema::FieldDescriptor;
    use serde_json::json;

    #[test]
    fn lww_later_write_wins_in_any_order() {
        let bench = Bench::new(Lww, FieldDescriptor::scalar("value"));
        let mut a = bench.site("a", json!(10));
        let mut b = bench.site("b", json!(10));
        a.metadata.advance_lww(&bench.path, Timestamp(100));
        b.metadata.advance_lww(&bench.path, Timestamp(100));

        let late = bench.edit(&mut a, json!(20), 200);
        let early = bench.edit(&mut b, json!(15), 150);

        bench.apply(&mut a, &early);
        bench.apply(&mut b, &late);
        assert_eq!(a.value(), &json!(20));
        assert_eq!(b.value(), &json!(20));
        assert_eq!(a.metadata.lww_timestamp(&bench.path), Some(Timestamp(200)));
    }

    #[test]
    fn lww_ties_keep_existing() {
        let bench = Bench::new(Lww, FieldDescriptor::scalar("value"));
        let mut a = bench.site("a", json!(1));
        let mut b = bench.site("b", json!(1));
        let from_a = bench.edit(&mut a, json!(2), 5);
        let from_b = bench.edit(&mut b, json!(3), 5);
        bench.apply(&mut a, &from_b);
        bench.apply(&mut b, &from_a);
        assert_eq!(a.value(), &json!(2));
        assert_eq!(b.value(), &json!(3));
    }

    #[test]
    fn lww_null_becomes_remove() {
        let bench = Bench::new(Lww, FieldDescriptor::scalar("value"));
        let mut a = bench.site("a", json!("x"));
        let ops = bench.edit(&mut a, Value::Null, 1);
        assert_eq!(ops[0].kind, OperationKind::Remove);
        assert_eq!(a.value(), &Value::Null);
    }

    #[test]
    fn lww_is_idempotent() {
        let bench = Bench::new(Lww, FieldDescriptor::scalar("value"));
        let mut a = bench.site("a", json!(1));
        let mut b = bench.site("b", json!(1));
        let ops = bench.edit(&mut a, json!(7), 3);
        bench.apply(&mut b, &ops);
        let once = (b.doc.clone(), b.metadata.clone());
        bench.apply(&mut b, &ops);
        assert_eq!((b.doc.clone(), b.metadata.clone()), once);
    }

    #[test]
    fn lww_rejects_increment() {
        let bench = Bench::new(Lww, FieldDescriptor::scalar("value"));
        let mut a = bench.site("a", json!(1));
        let mut op = bench.try_diff(&a, json!(2), 1).unwrap();
        op[0].kind = OperationKind::Increment;
        assert!(matches!(bench.try_apply(&mut a, &op), Err(Error::UnsupportedOperation { .. })));
    }

    #[test]
    fn lww_unresolvable_target_is_noop() {
        let bench = Bench::new(Lww, FieldDescriptor::scalar("value"));
        let mut a = bench.site("a", json!(1));
        let mut ops = bench.try_diff(&a, json!(2), 1).unwrap();
        ops[0].path = FieldPath::root().field("items").index(3);
        a.doc = json!({"value": 1, "items": []});
        let before = a.doc.clone();
        let owner = ops[0].path.clone();
        let mut cx = ApplyContext {
            document: &mut a.doc,
            metadata: &mut a.metadata,
            operation: &ops[0],
            path: &owner,
            field: &bench.field,
            services: crate::crdt::Services {
                comparers: &bench.comparers,
                validators: &bench.validators,
            },
        };
        Lww.apply_operation(&mut cx).unwrap();
        assert_eq!(a.doc, before);
    }

    fn owner() -> FieldDescriptor {
        return FieldDescriptor::object(
            "owner",
            Schema::new(vec![
                FieldDescriptor::scalar("name"),
                FieldDescriptor::scalar("email"),
                FieldDescriptor::object("address", Schema::new(vec![FieldDescriptor::scalar("city")])),
            ]),
        );
    }

    #[test]
    fn object_write_keeps_later_children() {
        let bench = Bench::new(Lww, owner());
        let mut a = bench.site("a", json!({"name": "ann", "email": "a@x"}));
        let name = bench.path.field("name");
        let city = bench.path.field("address").field("city");
        a.metadata.advance_lww(&name, Timestamp(50));
        a.metadata.advance_lww(&city, Timestamp(50));

        let mut b = bench.site("b", json!({"name": "ann", "email": "a@x"}));
        let ops = bench.edit(&mut b, json!({"name": "bob", "email": "b@x", "address": {"city": "Oslo"}}), 20);
        bench.apply(&mut a, &ops);

        assert_eq!(a.value(), &json!({"name": "ann", "email": "b@x", "address": {}}));
        assert_eq!(a.metadata.lww_timestamp(&bench.path.field("email")), Some(Timestamp(20)));
        assert_eq!(a.metadata.lww_timestamp(&name), Some(Timestamp(50)));
        assert_eq!(a.metadata.lww_timestamp(&bench.path), Some(Timestamp(20)));
    }

    #[test]
    fn object_write_stamps_the_children_it_replaces() {
        let bench = Bench::new(Lww, owner());
        let mut a = bench.site("a", Value::Null);
        bench.edit(&mut a, json!({"name": "bob", "address": {"city": "Oslo"}}), 30);
        assert_eq!(a.metadata.lww_timestamp(&bench.path.field("name")), Some(Timestamp(30)));
        assert_eq!(a.metadata.lww_timestamp(&bench.path.field("email")), Some(Timestamp(30)));
        assert_eq!(a.metadata.lww_timestamp(&bench.path.field("address").field("city")), Some(Timestamp(30)));
    }

    #[test]
    fn removing_an_object_with_a_later_child_leaves_the_child() {
        let bench = Bench::new(Lww, owner());
        let mut a = bench.site("a", json!({"name": "ann", "email": "a@x"}));
        a.metadata.advance_lww(&bench.path.field("name"), Timestamp(50));
        bench.edit(&mut a, Value::Null, 20);
        assert_eq!(a.value(), &json!({"name": "ann"}));

        bench.edit(&mut a, Value::Null, 60);
        assert_eq!(a.value(), &Value::Null);
    }

    #[test]
    fn max_wins_converges() {
        let bench = Bench::new(MaxWins, FieldDescriptor::scalar("high"));
        let mut a = bench.site("a", json!(5));
        let mut b = bench.site("b", json!(5));
        let from_a = bench.edit(&mut a, json!(9), 1);
        let from_b = bench.edit(&mut b, json!(7), 2);
        bench.apply(&mut a, &from_b);
        bench.apply(&mut b, &from_a);
        assert_eq!(a.value(), &json!(9));
        assert_eq!(b.value(), &json!(9));
    }

    #[test]
    fn max_wins_ignores_smaller_edits() {
        let bench = Bench::new(MaxWins, FieldDescriptor::scalar("high"));
        let a = bench.site("a", json!(5));
        assert!(bench.try_diff(&a, json!(3), 1).unwrap().is_empty());
    }

    #[test]
    fn min_wins_converges() {
        let bench = Bench::new(MinWins, FieldDescriptor::scalar("low"));
        let mut a = bench.site("a", json!("m"));
        let mut b = bench.site("b", json!("m"));
        let from_a = bench.edit(&mut a, json!("c"), 1);
        let from_b = bench.edit(&mut b, json!("a"), 2);
        bench.apply(&mut a, &from_b);
        bench.apply(&mut b, &from_a);
        assert_eq!(a.value(), &json!("a"));
        assert_eq!(b.value(), &json!("a"));
    }
}
