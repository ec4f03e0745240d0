//! Field to strategy resolution.
//!
//! A field's strategy is its explicit declaration if it has one, otherwise
//! a structural default:
//!
//! - `Shape::Map` -> `OrMap`
//! - `Shape::Sequence` -> `ArrayLcs`
//! - everything else -> `Lww`
//!
//! Nested objects without a declaration are never resolved as a whole while
//! both sides are objects; the patcher recurses into their fields instead.

use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::crdt::Strategy;
use crate::crdt::strategies;
use crate::error::Error;
use crate::error::Result;
use crate::schema::FieldDescriptor;
use crate::schema::Shape;
use crate::schema::StrategyKind;

/// Maps a field to the strategy that resolves its conflicts.
pub trait StrategyResolver: Send + Sync {
    fn resolve(&self, field: &FieldDescriptor) -> Result<&dyn Strategy>;
}

/// The strategy kind a field uses.
pub fn strategy_kind(field: &FieldDescriptor) -> StrategyKind {
    if let Some(kind) = &field.strategy {
        return kind.clone();
    }
    return match field.shape {
        Shape::Map => StrategyKind::OrMap,
        Shape::Sequence => StrategyKind::ArrayLcs,
        Shape::Scalar | Shape::Object(_) => StrategyKind::Lww,
    };
}

fn builtin(kind: &StrategyKind) -> Option<Arc<dyn Strategy>> {
    let strategy: Arc<dyn Strategy> = match kind {
        StrategyKind::Lww => Arc::new(strategies::Lww),
        StrategyKind::MaxWins => Arc::new(strategies::MaxWins),
        StrategyKind::MinWins => Arc::new(strategies::MinWins),
        StrategyKind::AverageRegister => Arc::new(strategies::AverageRegister),
        StrategyKind::StateMachine => Arc::new(strategies::StateMachine),
        StrategyKind::ExclusiveLock => Arc::new(strategies::ExclusiveLock),
        StrategyKind::Counter => Arc::new(strategies::Counter),
        StrategyKind::GCounter => Arc::new(strategies::GCounter),
        StrategyKind::BoundedCounter => Arc::new(strategies::BoundedCounter),
        StrategyKind::GSet => Arc::new(strategies::GSet),
        StrategyKind::TwoPhaseSet => Arc::new(strategies::TwoPhaseSet),
        StrategyKind::LwwSet => Arc::new(strategies::LwwSet),
        StrategyKind::OrSet => Arc::new(strategies::OrSet),
        StrategyKind::ArrayLcs => Arc::new(strategies::ArrayLcs),
        StrategyKind::Lseq => Arc::new(strategies::Lseq),
        StrategyKind::PriorityQueue => Arc::new(strategies::PriorityQueue),
        StrategyKind::LwwMap => Arc::new(strategies::LwwMap),
        StrategyKind::OrMap => Arc::new(strategies::OrMap),
        StrategyKind::CounterMap => Arc::new(strategies::CounterMap),
        StrategyKind::VoteCounter => Arc::new(strategies::VoteCounter),
        StrategyKind::Graph => Arc::new(strategies::Graph),
        StrategyKind::TwoPhaseGraph => Arc::new(strategies::TwoPhaseGraph),
        StrategyKind::ReplicatedTree => Arc::new(strategies::ReplicatedTree),
        StrategyKind::Custom(_) => return None,
    };
    return Some(strategy);
}

/// Kind-keyed strategy table preloaded with every built-in strategy.
///
/// Strategies are stateless, so one table is shared by every replica of an
/// engine. `register` replaces a built-in or adds a `Custom` kind.
#[derive(Clone)]
pub struct DefaultStrategyResolver {
    strategies: FxHashMap<StrategyKind, Arc<dyn Strategy>>,
}

impl Default for DefaultStrategyResolver {
    fn default() -> Self {
        return Self::new();
    }
}

impl DefaultStrategyResolver {
    pub fn new() -> DefaultStrategyResolver {
        let mut strategies = FxHashMap::default();
        for kind in StrategyKind::BUILTIN {
            if let Some(strategy) = builtin(&kind) {
                strategies.insert(kind, strategy);
            }
        }
        return DefaultStrategyResolver { strategies };
    }

    pub fn register(&mut self, kind: StrategyKind, strategy: Arc<dyn Strategy>) {
        tracing::debug!(kind = kind.name(), strategy = strategy.name(), "registering strategy");
        self.strategies.insert(kind, strategy);
    }

    pub fn get(&self, kind: &StrategyKind) -> Option<&dyn Strategy> {
        return self.strategies.get(kind).map(|s| s.as_ref());
    }
}

impl StrategyResolver for DefaultStrategyResolver {
    fn resolve(&self, field: &FieldDescriptor) -> Result<&dyn Strategy> {
        let kind = strategy_kind(field);
        return self.get(&kind).ok_or_else(|| Error::UnknownStrategy(kind.name().to_string()));
    }
}

impl fmt::Debug for DefaultStrategyResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut kinds: Vec<&str> = self.strategies.keys().map(|k| k.name()).collect();
        kinds.sort_unstable();
        return f.debug_struct("DefaultStrategyResolver").field("kinds", &kinds).finish();
    }
}
