//! Vote counter: an option -> voters map where each voter backs at most one
//! option.
//!
//! The document holds `{ option: [voter, ...] }` with voters sorted and
//! options without voters dropped. Diff flattens both sides to voter ->
//! option and emits one payload per voter whose choice changed. Each voter's
//! choice is an LWW register of its own.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use super::entries;
use super::object_slot;
use crate::crdt::ApplyContext;
use crate::crdt::GenerateContext;
use crate::crdt::InitContext;
use crate::crdt::Strategy;
use crate::crdt::op::OperationKind;
use crate::error::Error;
use crate::error::Result;

/// One voter's choice. `None` withdraws the vote.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Ballot {
    pub voter: String,
    pub option: Option<String>,
}

/// voter -> option
fn ballots(value: Option<&Value>) -> BTreeMap<&str, &str> {
    let mut out = BTreeMap::new();
    let Some(options) = entries(value) else {
        return out;
    };
    for (option, voters) in options {
        for voter in voters.as_array().map(Vec::as_slice).unwrap_or_default() {
            match voter.as_str() {
                Some(voter) => {
                    out.insert(voter, option.as_str());
                }
                None => tracing::debug!(%option, %voter, "ignoring non-string voter"),
            }
        }
    }
    return out;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct VoteCounter;

impl Strategy for VoteCounter {
    fn name(&self) -> &'static str {
        return "vote_counter";
    }

    fn generate_patch(&self, cx: &mut GenerateContext<'_>) -> Result<()> {
        let original = ballots(cx.original);
        let modified = ballots(cx.modified);
        let stored = cx.metadata.votes.get(cx.path);

        let mut voters: Vec<&str> = original.keys().chain(modified.keys()).copied().collect();
        voters.sort_unstable();
        voters.dedup();
        for voter in voters {
            let before = original.get(voter);
            let after = modified.get(voter);
            if before == after {
                continue;
            }
            if !cx.timestamp.wins_over(stored.and_then(|s| s.get(voter).copied())) {
                continue;
            }
            let ballot = Ballot {
                voter: voter.to_string(),
                option: after.map(|o| o.to_string()),
            };
            cx.emit_here(OperationKind::Upsert, serde_json::to_value(ballot)?);
        }
        return Ok(());
    }

    fn apply_operation(&self, cx: &mut ApplyContext<'_>) -> Result<()> {
        let operation = cx.operation;
        if operation.kind != OperationKind::Upsert {
            return Err(Error::unsupported(self.name(), operation.kind, &operation.path));
        }
        let Some(ballot) = operation.payload::<Ballot>() else {
            return Ok(());
        };
        let Some(options) = object_slot(cx.document, cx.path) else {
            cx.suppress("unresolvable");
            return Ok(());
        };
        let stamps = cx.metadata.votes.entry(cx.path.clone()).or_default();
        if !operation.timestamp.wins_over(stamps.get(&ballot.voter).copied()) {
            cx.suppress("stale");
            return Ok(());
        }
        stamps.insert(ballot.voter.clone(), operation.timestamp);

        let voter = Value::String(ballot.voter);
        for voters in options.values_mut() {
            if let Some(voters) = voters.as_array_mut() {
                voters.retain(|v| *v != voter);
            }
        }
        options.retain(|_, voters| voters.as_array().is_none_or(|v| !v.is_empty()));

        if let Some(option) = ballot.option {
            let slot = options.entry(option).or_insert_with(|| Value::Array(Vec::new()));
            if !slot.is_array() {
                *slot = Value::Array(Vec::new());
            }
            if let Some(voters) = slot.as_array_mut() {
                let name = voter.as_str().unwrap_or_default();
                let at = voters.partition_point(|v| v.as_str().unwrap_or_default() < name);
                voters.insert(at, voter);
            }
        }
        cx.applied();
        return Ok(());
    }

    fn initialize(&self, cx: &mut InitContext<'_>) -> Result<()> {
        let stamps = cx.metadata.votes.entry(cx.path.clone()).or_default();
        for voter in ballots(cx.value).keys() {
            stamps.insert(voter.to_string(), cx.timestamp);
        }
        return Ok(());
    }
}
