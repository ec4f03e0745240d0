//! Ordered sequence diffed by longest common subsequence.
//!
//! Every element has a `PositionalIdentifier` kept in metadata, parallel to
//! the array. A diff matches the two arrays with an LCS over element
//! identity; unmatched originals become removals (by identifier, never by
//! index) and unmatched modifieds become inserts at fresh positions strictly
//! between the surrounding anchors. Apply places an insert by binary search
//! over the identifiers, so the resulting order does not depend on delivery
//! order. Concurrent inserts that pick the same position are ordered by the
//! id of the operation that created them.
//!
//! Removed identifiers are tombstoned so a removal that overtakes its insert
//! still wins.

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use super::array_slot;
use super::items;
use crate::crdt::ApplyContext;
use crate::crdt::GenerateContext;
use crate::crdt::InitContext;
use crate::crdt::Strategy;
use crate::crdt::op::OperationKind;
use crate::crdt::primitives::ElementComparer;
use crate::crdt::primitives::OperationId;
use crate::crdt::primitives::Position;
use crate::crdt::primitives::PositionalIdentifier;
use crate::error::Error;
use crate::error::Result;
use crate::metadata::PositionalTracker;
use crate::path::FieldPath;

/// Insert payload. The element's identifier is `(position, operation id)`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PositionedValue {
    pub position: Position,
    pub value: Value,
}

/// Identifiers for a sequence nobody has tracked yet.
///
/// Derived from the path, index and content, so replicas holding the same
/// snapshot derive the same identifiers.
pub(crate) fn seed_positions(path: &FieldPath, list: &[Value]) -> Vec<PositionalIdentifier> {
    let path = path.to_string();
    return list
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let creator = OperationId::derive(&[path.as_bytes(), &(i as u64).to_le_bytes(), item.to_string().as_bytes()]);
            return PositionalIdentifier::new(Position::from_index(i), creator);
        })
        .collect();
}

/// Identifiers for `list`: the tracked ones if they still line up with the
/// array, freshly seeded ones otherwise.
fn identifiers(tracker: Option<&PositionalTracker>, path: &FieldPath, list: &[Value]) -> Vec<PositionalIdentifier> {
    return match tracker {
        Some(tracker) if tracker.ids.len() == list.len() => tracker.ids.clone(),
        _ => seed_positions(path, list),
    };
}

/// Index pairs `(original, modified)` of a longest common subsequence by
/// element identity, in ascending order.
pub(crate) fn lcs_pairs(original: &[Value], modified: &[Value], comparer: &dyn ElementComparer) -> Vec<(usize, usize)> {
    let a: Vec<String> = original.iter().map(|v| comparer.identity(v)).collect();
    let b: Vec<String> = modified.iter().map(|v| comparer.identity(v)).collect();

    // Common prefix and suffix need no table.
    let mut prefix = 0;
    while prefix < a.len() && prefix < b.len() && a[prefix] == b[prefix] {
        prefix += 1;
    }
    let mut suffix = 0;
    while suffix < a.len() - prefix && suffix < b.len() - prefix && a[a.len() - 1 - suffix] == b[b.len() - 1 - suffix] {
        suffix += 1;
    }

    let a_mid = &a[prefix..a.len() - suffix];
    let b_mid = &b[prefix..b.len() - suffix];
    let (n, m) = (a_mid.len(), b_mid.len());

    // lengths[i][j] = LCS length of a_mid[i..] and b_mid[j..]
    let mut lengths = vec![vec![0u32; m + 1]; n + 1];
    for i in (0..n).rev() {
        for j in (0..m).rev() {
            lengths[i][j] = if a_mid[i] == b_mid[j] {
                lengths[i + 1][j + 1] + 1
            } else {
                lengths[i + 1][j].max(lengths[i][j + 1])
            };
        }
    }

    let mut pairs: Vec<(usize, usize)> = (0..prefix).map(|i| (i, i)).collect();
    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if a_mid[i] == b_mid[j] {
            pairs.push((prefix + i, prefix + j));
            i += 1;
            j += 1;
        } else if lengths[i + 1][j] >= lengths[i][j + 1] {
            i += 1;
        } else {
            j += 1;
        }
    }
    for k in 0..suffix {
        pairs.push((a.len() - suffix + k, b.len() - suffix + k));
    }
    return pairs;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ArrayLcs;

impl Strategy for ArrayLcs {
    fn name(&self) -> &'static str {
        return "array_lcs";
    }

    fn generate_patch(&self, cx: &mut GenerateContext<'_>) -> Result<()> {
        let comparer = cx.comparer()?;
        let original = items(cx.original);
        let modified = items(cx.modified);
        let ids = identifiers(cx.metadata.positions.get(cx.path), cx.path, original);

        // Matched items whose content changed are replaced, not kept.
        let mut anchors: Vec<(usize, usize)> = lcs_pairs(original, modified, comparer)
            .into_iter()
            .filter(|&(i, j)| original[i] == modified[j])
            .collect();
        anchors.push((original.len(), modified.len()));

        let mut next_original = 0;
        let mut next_modified = 0;
        let mut left: Option<Position> = None;
        for (anchor_i, anchor_j) in anchors {
            for id in &ids[next_original..anchor_i] {
                cx.emit_here(OperationKind::Remove, serde_json::to_value(id)?);
            }
            let right = ids.get(anchor_i).map(|id| &id.position);
            for value in &modified[next_modified..anchor_j] {
                let position = Position::between(left.as_ref(), right);
                let insert = PositionedValue {
                    position: position.clone(),
                    value: value.clone(),
                };
                cx.emit_here(OperationKind::Upsert, serde_json::to_value(insert)?);
                left = Some(position);
            }
            left = ids.get(anchor_i).map(|id| id.position.clone());
            next_original = anchor_i + 1;
            next_modified = anchor_j + 1;
        }
        return Ok(());
    }

    fn apply_operation(&self, cx: &mut ApplyContext<'_>) -> Result<()> {
        let operation = cx.operation;
        let Some(list) = array_slot(cx.document, cx.path) else {
            cx.suppress("unresolvable");
            return Ok(());
        };
        let tracker = cx.metadata.positions.entry(cx.path.clone()).or_default();
        if tracker.ids.len() != list.len() {
            tracing::debug!(path = %cx.path, "reseeding positions");
            tracker.ids = seed_positions(cx.path, list);
        }

        match operation.kind {
            OperationKind::Upsert => {
                let Some(insert) = operation.payload::<PositionedValue>() else {
                    return Ok(());
                };
                if tracker.tombstones.contains_key(&operation.id) {
                    cx.suppress("tombstoned");
                    return Ok(());
                }
                let id = PositionalIdentifier::new(insert.position, operation.id);
                match tracker.ids.binary_search(&id) {
                    Ok(_) => {
                        cx.suppress("already applied");
                        return Ok(());
                    }
                    Err(at) => {
                        tracker.ids.insert(at, id);
                        list.insert(at, insert.value);
                    }
                }
            }
            OperationKind::Remove => {
                let Some(id) = operation.payload::<PositionalIdentifier>() else {
                    return Ok(());
                };
                let removed = tracker.tombstones.entry(id.operation_id).or_insert(operation.timestamp);
                *removed = (*removed).max(operation.timestamp);
                if let Ok(at) = tracker.ids.binary_search(&id) {
                    tracker.ids.remove(at);
                    list.remove(at);
                }
            }
            kind => return Err(Error::unsupported(self.name(), kind, &operation.path)),
        }
        cx.applied();
        return Ok(());
    }

    fn initialize(&self, cx: &mut InitContext<'_>) -> Result<()> {
        let tracker = cx.metadata.positions.entry(cx.path.clone()).or_default();
        tracker.ids = seed_positions(cx.path, items(cx.value));
        return Ok(());
    }
}
