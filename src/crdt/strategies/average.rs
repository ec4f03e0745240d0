//! Average register: the visible value is the mean of every replica's
//! latest contribution.
//!
//! Each replica owns its own contribution and replaces it under its own
//! timestamp order (self-LWW). Contributions from different replicas never
//! compete, so the mean is a pure function of the set of latest
//! contributions.

use crate::crdt::ApplyContext;
use crate::crdt::GenerateContext;
use crate::crdt::InitContext;
use crate::crdt::Strategy;
use crate::crdt::op::OperationKind;
use crate::crdt::primitives::Numeric;
use crate::error::Error;
use crate::error::Result;
use crate::metadata::Contribution;

#[derive(Clone, Copy, Debug, Default)]
pub struct AverageRegister;

impl Strategy for AverageRegister {
    fn name(&self) -> &'static str {
        return "average_register";
    }

    fn generate_patch(&self, cx: &mut GenerateContext<'_>) -> Result<()> {
        if cx.original == cx.modified {
            return Ok(());
        }
        let Some(value) = cx.modified.and_then(Numeric::from_value) else {
            return Ok(());
        };
        let own = cx.metadata.averages.get(cx.path).and_then(|c| c.get(cx.replica_id));
        if !cx.timestamp.wins_over(own.map(|c| c.timestamp)) {
            return Ok(());
        }
        cx.emit_here(OperationKind::Upsert, value.to_value());
        return Ok(());
    }

    fn apply_operation(&self, cx: &mut ApplyContext<'_>) -> Result<()> {
        let operation = cx.operation;
        if operation.kind != OperationKind::Upsert {
            return Err(Error::unsupported(self.name(), operation.kind, &operation.path));
        }
        let Some(value) = Numeric::from_value(&operation.value) else {
            cx.suppress("malformed");
            return Ok(());
        };
        let Some(slot) = cx.path.slot_mut(cx.document) else {
            cx.suppress("unresolvable");
            return Ok(());
        };

        let contributions = cx.metadata.averages.entry(cx.path.clone()).or_default();
        let own = contributions.get(&operation.replica_id).map(|c| c.timestamp);
        if !operation.timestamp.wins_over(own) {
            tracing::debug!(op = %operation.id, replica = %operation.replica_id, "stale contribution");
            return Ok(());
        }
        contributions.insert(
            operation.replica_id.clone(),
            Contribution {
                value,
                timestamp: operation.timestamp,
            },
        );

        let sum: f64 = contributions.values().map(|c| c.value.as_f64()).sum();
        *slot = Numeric::Float(sum / contributions.len() as f64).to_value();
        cx.applied();
        return Ok(());
    }

    fn initialize(&self, _cx: &mut InitContext<'_>) -> Result<()> {
        // A pre-existing value has no contributor; the first contribution
        // replaces it.
        return Ok(());
    }
}
