//! State machine register.
//!
//! Behaves exactly like `Lww`, except that every write must also be a valid
//! transition from the current state. Invalid transitions are dropped
//! during diff and during apply, even when their timestamp would win.
//!
//! Validators are registered by name on the engine and referenced from the
//! field's `validator` config.

use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use rustc_hash::FxHashSet;
use serde_json::Value;

use super::lww_wins;
use crate::crdt::ApplyContext;
use crate::crdt::GenerateContext;
use crate::crdt::Services;
use crate::crdt::Strategy;
use crate::crdt::op::OperationKind;
use crate::error::Error;
use crate::error::Result;
use crate::path::FieldPath;
use crate::schema::FieldDescriptor;

/// Decides whether a state change is allowed.
pub trait TransitionValidator: Send + Sync {
    fn is_valid_transition(&self, from: &Value, to: &Value) -> bool;
}

impl<F> TransitionValidator for F
where
    F: Fn(&Value, &Value) -> bool + Send + Sync,
{
    fn is_valid_transition(&self, from: &Value, to: &Value) -> bool {
        return self(from, to);
    }
}

/// A transition table over string state labels.
///
/// `Null` acts as the initial state: `initial` lists the states it may move
/// to. Staying in the same state is always allowed.
#[derive(Clone, Debug, Default)]
pub struct TransitionTable {
    initial: FxHashSet<String>,
    edges: FxHashMap<String, FxHashSet<String>>,
}

impl TransitionTable {
    pub fn new() -> TransitionTable {
        return TransitionTable::default();
    }

    /// Allow the initial (null) state to move to `to`.
    pub fn initial(mut self, to: impl Into<String>) -> TransitionTable {
        self.initial.insert(to.into());
        return self;
    }

    /// Allow `from -> to`.
    pub fn allow(mut self, from: impl Into<String>, to: impl Into<String>) -> TransitionTable {
        self.edges.entry(from.into()).or_default().insert(to.into());
        return self;
    }
}

impl TransitionValidator for TransitionTable {
    fn is_valid_transition(&self, from: &Value, to: &Value) -> bool {
        if from == to {
            return true;
        }
        let Some(to) = to.as_str() else {
            return false;
        };
        return match from {
            Value::Null => self.initial.contains(to),
            Value::String(from) => self.edges.get(from).is_some_and(|next| next.contains(to)),
            _ => false,
        };
    }
}

/// Name-keyed transition validators.
#[derive(Clone, Default)]
pub struct ValidatorRegistry {
    named: FxHashMap<String, Arc<dyn TransitionValidator>>,
}

impl ValidatorRegistry {
    pub fn new() -> ValidatorRegistry {
        return ValidatorRegistry::default();
    }

    pub fn register(&mut self, name: impl Into<String>, validator: Arc<dyn TransitionValidator>) {
        self.named.insert(name.into(), validator);
    }

    pub fn get(&self, name: &str) -> Result<&dyn TransitionValidator> {
        return self
            .named
            .get(name)
            .map(|v| v.as_ref())
            .ok_or_else(|| Error::UnknownValidator(name.to_string()));
    }
}

impl fmt::Debug for ValidatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.named.keys().collect();
        names.sort();
        return f.debug_struct("ValidatorRegistry").field("named", &names).finish();
    }
}

fn validator<'a>(services: Services<'a>, field: &FieldDescriptor, path: &FieldPath) -> Result<&'a dyn TransitionValidator> {
    let Some(name) = field.config.validator.as_deref() else {
        return Err(Error::missing_config(path, "validator"));
    };
    let validators: &'a ValidatorRegistry = services.validators;
    return validators.get(name);
}

static NULL: Value = Value::Null;

#[derive(Clone, Copy, Debug, Default)]
pub struct StateMachine;

impl Strategy for StateMachine {
    fn name(&self) -> &'static str {
        return "state_machine";
    }

    fn generate_patch(&self, cx: &mut GenerateContext<'_>) -> Result<()> {
        let validator = validator(cx.services, cx.field, cx.path)?;
        if cx.original == cx.modified {
            return Ok(());
        }
        let from = cx.original.unwrap_or(&NULL);
        let to = cx.modified.unwrap_or(&NULL);
        if !validator.is_valid_transition(from, to) {
            tracing::debug!(path = %cx.path, %from, %to, "invalid transition");
            return Ok(());
        }
        if !cx.timestamp.wins_over(cx.metadata.lww_timestamp(cx.path)) {
            return Ok(());
        }
        cx.emit_here(OperationKind::Upsert, to.clone());
        return Ok(());
    }

    fn apply_operation(&self, cx: &mut ApplyContext<'_>) -> Result<()> {
        let operation = cx.operation;
        if operation.kind != OperationKind::Upsert {
            return Err(Error::unsupported(self.name(), operation.kind, &operation.path));
        }
        let validator = validator(cx.services, cx.field, cx.path)?;
        if !lww_wins(cx, cx.path) {
            return Ok(());
        }
        let Some(slot) = cx.path.slot_mut(cx.document) else {
            cx.suppress("unresolvable");
            return Ok(());
        };
        if !validator.is_valid_transition(slot, &operation.value) {
            cx.suppress("invalid transition");
            return Ok(());
        }
        *slot = operation.value.clone();
        cx.metadata.advance_lww(cx.path, operation.timestamp);
        cx.applied();
        return Ok(());
    }
}
