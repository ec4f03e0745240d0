//! Ordered sequence over dense LSEQ identifiers.
//!
//! Same diff as `ArrayLcs`, but new elements get `LseqIdentifier`s allocated
//! between their neighbours instead of fractional positions. The last
//! component of every allocated identifier names the allocating replica, so
//! two replicas drawing the same digit for the same gap still produce
//! distinct, consistently ordered identifiers.

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use super::array_slot;
use super::items;
use super::lcs::lcs_pairs;
use crate::crdt::ApplyContext;
use crate::crdt::GenerateContext;
use crate::crdt::InitContext;
use crate::crdt::Strategy;
use crate::crdt::op::OperationKind;
use crate::crdt::primitives::LseqIdentifier;
use crate::error::Error;
use crate::error::Result;
use crate::metadata::LseqTracker;

/// Insert payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LseqInsert {
    pub id: LseqIdentifier,
    pub value: Value,
}

fn seed_identifiers(len: usize) -> Vec<LseqIdentifier> {
    return (0..len).map(LseqIdentifier::seed).collect();
}

fn identifiers(tracker: Option<&LseqTracker>, list: &[Value]) -> Vec<LseqIdentifier> {
    return match tracker {
        Some(tracker) if tracker.ids.len() == list.len() => tracker.ids.clone(),
        _ => seed_identifiers(list.len()),
    };
}

#[derive(Clone, Copy, Debug, Default)]
pub struct Lseq;

impl Strategy for Lseq {
    fn name(&self) -> &'static str {
        return "lseq";
    }

    fn generate_patch(&self, cx: &mut GenerateContext<'_>) -> Result<()> {
        let comparer = cx.comparer()?;
        let original = items(cx.original);
        let modified = items(cx.modified);
        let tracker = cx.metadata.lseq.get(cx.path);
        let ids = identifiers(tracker, original);
        let mut rng = rand::thread_rng();

        let mut anchors: Vec<(usize, usize)> = lcs_pairs(original, modified, comparer)
            .into_iter()
            .filter(|&(i, j)| original[i] == modified[j])
            .collect();
        anchors.push((original.len(), modified.len()));

        let mut next_original = 0;
        let mut next_modified = 0;
        let mut left: Option<LseqIdentifier> = None;
        for (anchor_i, anchor_j) in anchors {
            for id in &ids[next_original..anchor_i] {
                cx.emit_here(OperationKind::Remove, serde_json::to_value(id)?);
            }
            let right = ids.get(anchor_i);
            for value in &modified[next_modified..anchor_j] {
                // Never reuse an identifier this replica already retired.
                let id = loop {
                    let id = LseqIdentifier::between(left.as_ref(), right, cx.replica_id, &mut rng);
                    if !tracker.is_some_and(|t| t.is_tombstoned(&id)) {
                        break id;
                    }
                };
                let insert = LseqInsert {
                    id: id.clone(),
                    value: value.clone(),
                };
                cx.emit_here(OperationKind::Upsert, serde_json::to_value(insert)?);
                left = Some(id);
            }
            left = ids.get(anchor_i).cloned();
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
        let tracker = cx.metadata.lseq.entry(cx.path.clone()).or_default();
        if tracker.ids.len() != list.len() {
            tracing::debug!(path = %cx.path, "reseeding identifiers");
            tracker.ids = seed_identifiers(list.len());
        }

        match operation.kind {
            OperationKind::Upsert => {
                let Some(insert) = operation.payload::<LseqInsert>() else {
                    return Ok(());
                };
                if tracker.is_tombstoned(&insert.id) {
                    cx.suppress("tombstoned");
                    return Ok(());
                }
                match tracker.ids.binary_search(&insert.id) {
                    Ok(_) => {
                        cx.suppress("already applied");
                        return Ok(());
                    }
                    Err(at) => {
                        tracker.ids.insert(at, insert.id);
                        list.insert(at, insert.value);
                    }
                }
            }
            OperationKind::Remove => {
                let Some(id) = operation.payload::<LseqIdentifier>() else {
                    return Ok(());
                };
                if let Ok(at) = tracker.ids.binary_search(&id) {
                    tracker.ids.remove(at);
                    list.remove(at);
                }
                tracker.add_tombstone(id, operation.timestamp);
            }
            kind => return Err(Error::unsupported(self.name(), kind, &operation.path)),
        }
        cx.applied();
        return Ok(());
    }

    fn initialize(&self, cx: &mut InitContext<'_>) -> Result<()> {
        let tracker = cx.metadata.lseq.entry(cx.path.clone()).or_default();
        tracker.ids = seed_identifiers(items(cx.value).len());
        return Ok(());
    }
}
