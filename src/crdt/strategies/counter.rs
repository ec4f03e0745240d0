//! Counters.
//!
//! Diffs become a single signed `Increment` delta. Adding deltas is not
//! idempotent, so every counter consults the seen-operation gate in metadata
//! before applying and records the operation afterwards.
//!
//! - `Counter`: any delta (PN-counter).
//! - `GCounter`: positive deltas only.
//! - `BoundedCounter`: keeps an unbounded running total in metadata and only
//!   clamps the visible value to `[min, max]`. Clamping the total itself
//!   would make the result depend on delivery order: from 90 in `[0, 100]`,
//!   `+10` then `-5` and `-5` then `+10` must both end at 95.

use crate::crdt::ApplyContext;
use crate::crdt::GenerateContext;
use crate::crdt::InitContext;
use crate::crdt::Strategy;
use crate::crdt::op::OperationKind;
use crate::crdt::primitives::Numeric;
use crate::error::Error;
use crate::error::Result;
use crate::metadata::CrdtMetadata;
use crate::path::FieldPath;
use crate::schema::Bounds;
use crate::schema::FieldDescriptor;

fn bounds(field: &FieldDescriptor, path: &FieldPath) -> Result<Bounds> {
    return field.config.bounds.ok_or_else(|| Error::missing_config(path, "bounds"));
}

/// Numeric values on both sides of a diff, missing or null read as zero.
fn sides(cx: &GenerateContext<'_>) -> Option<(Numeric, Numeric)> {
    let original = Numeric::from_value_or_zero(cx.original)?;
    let modified = Numeric::from_value_or_zero(cx.modified)?;
    return Some((original, modified));
}

/// Run the gate and the numeric plumbing common to all counters. `fold`
/// gets the metadata, the current visible value and the delta, and returns
/// the new visible value, or `None` to drop the delta.
fn apply_delta(
    cx: &mut ApplyContext<'_>,
    name: &'static str,
    fold: impl FnOnce(&mut CrdtMetadata, &FieldPath, Numeric, Numeric) -> Option<Numeric>,
) -> Result<()> {
    let operation = cx.operation;
    if operation.kind != OperationKind::Increment {
        return Err(Error::unsupported(name, operation.kind, &operation.path));
    }
    if cx.metadata.has_seen(operation) {
        cx.suppress("already applied");
        return Ok(());
    }
    let Some(delta) = Numeric::from_value(&operation.value) else {
        cx.suppress("malformed");
        return Ok(());
    };
    let Some(slot) = cx.path.slot_mut(cx.document) else {
        cx.suppress("unresolvable");
        return Ok(());
    };
    let Some(current) = Numeric::from_value_or_zero(Some(&*slot)) else {
        tracing::debug!(op = %operation.id, path = %operation.path, "counter target is not a number");
        return Ok(());
    };
    cx.metadata.mark_seen(operation);
    let Some(next) = fold(cx.metadata, cx.path, current, delta) else {
        return Ok(());
    };
    *slot = next.to_value();
    cx.applied();
    return Ok(());
}

/// PN-counter.
#[derive(Clone, Copy, Debug, Default)]
pub struct Counter;

impl Strategy for Counter {
    fn name(&self) -> &'static str {
        return "counter";
    }

    fn generate_patch(&self, cx: &mut GenerateContext<'_>) -> Result<()> {
        let Some((original, modified)) = sides(cx) else {
            return Ok(());
        };
        let delta = modified - original;
        if !delta.is_zero() {
            cx.emit_here(OperationKind::Increment, delta.to_value());
        }
        return Ok(());
    }

    fn apply_operation(&self, cx: &mut ApplyContext<'_>) -> Result<()> {
        return apply_delta(cx, self.name(), |_, _, current, delta| Some(current + delta));
    }

    fn initialize(&self, _cx: &mut InitContext<'_>) -> Result<()> {
        return Ok(());
    }
}

/// Grow-only counter.
#[derive(Clone, Copy, Debug, Default)]
pub struct GCounter;

impl Strategy for GCounter {
    fn name(&self) -> &'static str {
        return "g_counter";
    }

    fn generate_patch(&self, cx: &mut GenerateContext<'_>) -> Result<()> {
        let Some((original, modified)) = sides(cx) else {
            return Ok(());
        };
        let delta = modified - original;
        if delta.is_negative() {
            tracing::debug!(path = %cx.path, "grow-only counter cannot decrease");
            return Ok(());
        }
        if !delta.is_zero() {
            cx.emit_here(OperationKind::Increment, delta.to_value());
        }
        return Ok(());
    }

    fn apply_operation(&self, cx: &mut ApplyContext<'_>) -> Result<()> {
        return apply_delta(cx, self.name(), |_, path, current, delta| {
            if delta.is_negative() {
                tracing::debug!(%path, "dropping negative delta");
                return None;
            }
            return Some(current + delta);
        });
    }

    fn initialize(&self, _cx: &mut InitContext<'_>) -> Result<()> {
        return Ok(());
    }
}

/// Counter clamped to configured bounds.
#[derive(Clone, Copy, Debug, Default)]
pub struct BoundedCounter;

impl Strategy for BoundedCounter {
    fn name(&self) -> &'static str {
        return "bounded_counter";
    }

    fn generate_patch(&self, cx: &mut GenerateContext<'_>) -> Result<()> {
        let bounds = bounds(cx.field, cx.path)?;
        let Some((original, modified)) = sides(cx) else {
            return Ok(());
        };
        // Deltas are taken against the running total so that an edit lands
        // exactly where the user put it.
        let total = cx.metadata.counters.get(cx.path).copied().unwrap_or(original);
        let delta = modified.clamp(bounds.min, bounds.max) - total;
        if !delta.is_zero() {
            cx.emit_here(OperationKind::Increment, delta.to_value());
        }
        return Ok(());
    }

    fn apply_operation(&self, cx: &mut ApplyContext<'_>) -> Result<()> {
        let bounds = bounds(cx.field, cx.path)?;
        return apply_delta(cx, self.name(), |metadata, path, current, delta| {
            let total = metadata.counters.entry(path.clone()).or_insert(current);
            *total = *total + delta;
            return Some(total.clamp(bounds.min, bounds.max));
        });
    }

    fn initialize(&self, cx: &mut InitContext<'_>) -> Result<()> {
        if let Some(value) = Numeric::from_value_or_zero(cx.value) {
            cx.metadata.counters.insert(cx.path.clone(), value);
        }
        return Ok(());
    }
}
