//! The engine: one compiled schema plus the services every strategy call
//! needs.
//!
//! An engine is built once per document type and shared (it is `Send +
//! Sync`) by every replica of that type. It holds no per-replica state;
//! documents and metadata are always passed in by the caller.
//!
//! ```
//! use converge::engine::EngineBuilder;
//! use converge::schema::FieldDescriptor;
//! use converge::schema::Schema;
//! use converge::schema::StrategyKind;
//!
//! let schema = Schema::new(vec![
//!     FieldDescriptor::scalar("title"),
//!     FieldDescriptor::scalar("views").strategy(StrategyKind::Counter),
//! ]);
//! let engine = EngineBuilder::new(schema).build().unwrap();
//! assert_eq!(engine.index().len(), 2);
//! ```

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::applicator::Applicator;
use crate::crdt::Services;
use crate::crdt::Strategy;
use crate::crdt::op::CrdtPatch;
use crate::crdt::primitives::ComparerRegistry;
use crate::crdt::primitives::ElementComparer;
use crate::crdt::primitives::ElementComparerProvider;
use crate::crdt::primitives::ReplicaId;
use crate::crdt::primitives::Timestamp;
use crate::crdt::strategies::TransitionValidator;
use crate::crdt::strategies::ValidatorRegistry;
use crate::error::Result;
use crate::metadata::CrdtMetadata;
use crate::metadata::MetadataManager;
use crate::patcher::Patcher;
use crate::resolver::DefaultStrategyResolver;
use crate::resolver::StrategyResolver;
use crate::schema::FieldDescriptor;
use crate::schema::Schema;
use crate::schema::SchemaIndex;
use crate::schema::StrategyKind;

/// Everything needed to diff and merge documents of one type.
pub struct CrdtEngine {
    schema: Schema,
    index: SchemaIndex,
    resolver: Box<dyn StrategyResolver>,
    comparers: Arc<dyn ElementComparerProvider>,
    validators: ValidatorRegistry,
}

impl CrdtEngine {
    pub fn builder(schema: Schema) -> EngineBuilder {
        return EngineBuilder::new(schema);
    }

    pub fn schema(&self) -> &Schema {
        return &self.schema;
    }

    pub fn index(&self) -> &SchemaIndex {
        return &self.index;
    }

    pub fn resolve(&self, field: &FieldDescriptor) -> Result<&dyn Strategy> {
        return self.resolver.resolve(field);
    }

    pub fn services(&self) -> Services<'_> {
        return Services {
            comparers: self.comparers.as_ref(),
            validators: &self.validators,
        };
    }

    pub fn patcher(&self) -> Patcher<'_> {
        return Patcher::new(self);
    }

    pub fn applicator(&self) -> Applicator<'_> {
        return Applicator::new(self);
    }

    pub fn metadata_manager(&self) -> MetadataManager<'_> {
        return MetadataManager::new(self);
    }

    /// Diff `original` (described by `metadata`) against `modified`.
    pub fn generate_patch(
        &self,
        replica_id: &ReplicaId,
        original: &Value,
        metadata: &CrdtMetadata,
        modified: &Value,
        timestamp: Timestamp,
    ) -> Result<CrdtPatch> {
        return self.patcher().generate_patch(replica_id, original, metadata, modified, timestamp);
    }

    /// Replay a patch on a replica's document and metadata.
    pub fn apply_patch(&self, document: &mut Value, metadata: &mut CrdtMetadata, patch: &CrdtPatch) -> Result<()> {
        return self.applicator().apply_patch(document, metadata, patch);
    }

    /// Fresh metadata describing an existing document.
    pub fn initialize(&self, document: &Value, timestamp: Timestamp) -> Result<CrdtMetadata> {
        return self.metadata_manager().initialize(document, timestamp);
    }
}

impl fmt::Debug for CrdtEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        return f
            .debug_struct("CrdtEngine")
            .field("fields", &self.index.len())
            .field("validators", &self.validators)
            .finish_non_exhaustive();
    }
}

enum ResolverChoice {
    Default(DefaultStrategyResolver),
    Custom(Box<dyn StrategyResolver>),
}

enum ComparerChoice {
    Registry(ComparerRegistry),
    Custom(Arc<dyn ElementComparerProvider>),
}

/// Assembles a `CrdtEngine`.
///
/// `build` validates the schema and checks that every strategy, comparer
/// and validator a field names is registered, so configuration mistakes
/// surface here rather than on the first patch that touches the field.
pub struct EngineBuilder {
    schema: Schema,
    resolver: ResolverChoice,
    comparers: ComparerChoice,
    validators: ValidatorRegistry,
}

impl EngineBuilder {
    pub fn new(schema: Schema) -> EngineBuilder {
        return EngineBuilder {
            schema,
            resolver: ResolverChoice::Default(DefaultStrategyResolver::new()),
            comparers: ComparerChoice::Registry(ComparerRegistry::new()),
            validators: ValidatorRegistry::new(),
        };
    }

    /// Register or override the strategy for a kind.
    ///
    /// Ignored once a custom resolver replaced the default one.
    pub fn strategy(mut self, kind: StrategyKind, strategy: Arc<dyn Strategy>) -> EngineBuilder {
        match &mut self.resolver {
            ResolverChoice::Default(resolver) => resolver.register(kind, strategy),
            ResolverChoice::Custom(_) => {
                tracing::warn!(kind = kind.name(), "custom resolver in use; ignoring strategy registration");
            }
        }
        return self;
    }

    /// Replace the resolver entirely.
    pub fn resolver(mut self, resolver: impl StrategyResolver + 'static) -> EngineBuilder {
        self.resolver = ResolverChoice::Custom(Box::new(resolver));
        return self;
    }

    /// Register a named element comparer.
    pub fn comparer(mut self, name: impl Into<String>, comparer: Arc<dyn ElementComparer>) -> EngineBuilder {
        match &mut self.comparers {
            ComparerChoice::Registry(registry) => registry.register(name, comparer),
            ComparerChoice::Custom(_) => tracing::warn!("custom comparer provider in use; ignoring comparer registration"),
        }
        return self;
    }

    /// Replace the comparer used when a field names none.
    pub fn default_comparer(mut self, comparer: Arc<dyn ElementComparer>) -> EngineBuilder {
        match &mut self.comparers {
            ComparerChoice::Registry(registry) => registry.set_default(comparer),
            ComparerChoice::Custom(_) => tracing::warn!("custom comparer provider in use; ignoring default comparer"),
        }
        return self;
    }

    /// Replace the comparer provider entirely.
    pub fn comparer_provider(mut self, provider: Arc<dyn ElementComparerProvider>) -> EngineBuilder {
        self.comparers = ComparerChoice::Custom(provider);
        return self;
    }

    /// Register a named transition validator for state machine fields.
    pub fn validator(mut self, name: impl Into<String>, validator: Arc<dyn TransitionValidator>) -> EngineBuilder {
        self.validators.register(name, validator);
        return self;
    }

    pub fn build(self) -> Result<CrdtEngine> {
        self.schema.validate()?;
        let resolver: Box<dyn StrategyResolver> = match self.resolver {
            ResolverChoice::Default(resolver) => Box::new(resolver),
            ResolverChoice::Custom(resolver) => resolver,
        };
        let comparers: Arc<dyn ElementComparerProvider> = match self.comparers {
            ComparerChoice::Registry(registry) => Arc::new(registry),
            ComparerChoice::Custom(provider) => provider,
        };

        let index = self.schema.compile();
        for (path, field) in index.iter() {
            resolver.resolve(field)?;
            if let Some(name) = field.config.comparer.as_deref() {
                comparers.comparer(Some(name))?;
            }
            if let Some(name) = field.config.validator.as_deref() {
                self.validators.get(name)?;
            }
            tracing::trace!(%path, strategy = crate::resolver::strategy_kind(field).name(), "field");
        }
        tracing::debug!(fields = index.len(), "engine built");

        return Ok(CrdtEngine {
            schema: self.schema,
            index,
            resolver,
            comparers,
            validators: self.validators,
        });
    }
}
