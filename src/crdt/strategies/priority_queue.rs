//! Priority queue: an LWW element set kept sorted by a priority field.
//!
//! Membership and element values follow `LwwSet` exactly. After every apply
//! the array is re-sorted by `priority_field` (ascending, via
//! `compare_values`, with a fixed kind order between mixed priorities), then
//! by element identity, so the visible order is a function of content only.

use std::cmp::Ordering;

use serde_json::Value;

use super::array_slot;
use super::set::apply_lww_element;
use super::set::generate_lww_elements;
use super::set::initialize_lww_elements;
use crate::crdt::ApplyContext;
use crate::crdt::GenerateContext;
use crate::crdt::InitContext;
use crate::crdt::Strategy;
use crate::crdt::primitives::ElementComparer;
use crate::crdt::primitives::numeric::compare_values;
use crate::error::Error;
use crate::error::Result;
use crate::path::FieldPath;
use crate::schema::FieldDescriptor;

fn priority_field<'f>(field: &'f FieldDescriptor, path: &FieldPath) -> Result<&'f str> {
    return field.config.priority_field.as_deref().ok_or_else(|| Error::missing_config(path, "priority_field"));
}

/// Sort by priority, then identity. Elements without a comparable priority
/// sort first.
pub(crate) fn sort_by_priority(list: &mut [Value], priority: &str, comparer: &dyn ElementComparer) {
    list.sort_by(|a, b| {
        let by_priority = match (a.get(priority), b.get(priority)) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(pa), Some(pb)) => compare_priorities(pa, pb),
        };
        return by_priority.then_with(|| comparer.identity(a).cmp(&comparer.identity(b)));
    });
}

/// Priorities of one kind use `compare_values`. Mixed kinds order as
/// null, bool, number, string, array, object; unordered values of one kind
/// fall back to their JSON text.
fn compare_priorities(a: &Value, b: &Value) -> Ordering {
    if let Some(ordering) = compare_values(a, b) {
        return ordering;
    }
    return kind_rank(a).cmp(&kind_rank(b)).then_with(|| a.to_string().cmp(&b.to_string()));
}

fn kind_rank(value: &Value) -> u8 {
    return match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    };
}

#[derive(Clone, Copy, Debug, Default)]
pub struct PriorityQueue;

impl Strategy for PriorityQueue {
    fn name(&self) -> &'static str {
        return "priority_queue";
    }

    fn generate_patch(&self, cx: &mut GenerateContext<'_>) -> Result<()> {
        priority_field(cx.field, cx.path)?;
        return generate_lww_elements(cx);
    }

    fn apply_operation(&self, cx: &mut ApplyContext<'_>) -> Result<()> {
        let priority = priority_field(cx.field, cx.path)?;
        apply_lww_element(cx, self.name())?;
        let comparer = cx.comparer()?;
        if let Some(list) = array_slot(cx.document, cx.path) {
            sort_by_priority(list, priority, comparer);
        }
        return Ok(());
    }

    fn initialize(&self, cx: &mut InitContext<'_>) -> Result<()> {
        return initialize_lww_elements(cx);
    }
}
