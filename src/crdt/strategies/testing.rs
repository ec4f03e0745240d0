//! Single-field test bench for strategies.
//!
//! Documents are `{ <field>: value }`. A `Site` is one replica's document
//! and metadata; `edit` diffs a new field value against it and applies the
//! resulting operations locally, the way `Replica::update` does.

use serde_json::Map;
use serde_json::Value;

use crate::crdt::ApplyContext;
use crate::crdt::GenerateContext;
use crate::crdt::InitContext;
use crate::crdt::Services;
use crate::crdt::Strategy;
use crate::crdt::op::CrdtOperation;
use crate::crdt::primitives::ComparerRegistry;
use crate::crdt::primitives::ReplicaId;
use crate::crdt::primitives::Timestamp;
use crate::error::Result;
use crate::metadata::CrdtMetadata;
use crate::path::FieldPath;
use crate::path::Segment;
use crate::schema::FieldDescriptor;

use super::ValidatorRegistry;

static NULL: Value = Value::Null;

pub struct Site {
    pub field: String,
    pub replica: ReplicaId,
    pub doc: Value,
    pub metadata: CrdtMetadata,
}

impl Site {
    pub fn value(&self) -> &Value {
        return self.doc.get(&self.field).unwrap_or(&NULL);
    }
}

pub struct Bench {
    pub strategy: Box<dyn Strategy>,
    pub field: FieldDescriptor,
    pub path: FieldPath,
    pub comparers: ComparerRegistry,
    pub validators: ValidatorRegistry,
}

impl Bench {
    pub fn new(strategy: impl Strategy + 'static, field: FieldDescriptor) -> Bench {
        let path = FieldPath::root().field(&field.name);
        return Bench {
            strategy: Box::new(strategy),
            field,
            path,
            comparers: ComparerRegistry::new(),
            validators: ValidatorRegistry::new(),
        };
    }

    fn services(&self) -> Services<'_> {
        return Services {
            comparers: &self.comparers,
            validators: &self.validators,
        };
    }

    fn root(&self, value: Value) -> Value {
        let mut root = Map::new();
        root.insert(self.field.name.clone(), value);
        return Value::Object(root);
    }

    /// A replica seeded from `value` at timestamp zero.
    pub fn site(&self, replica: &str, value: Value) -> Site {
        return self.site_with_root(replica, self.root(value));
    }

    /// A replica seeded from a whole document, for strategies that read
    /// sibling fields.
    pub fn site_with_root(&self, replica: &str, doc: Value) -> Site {
        let mut metadata = CrdtMetadata::new();
        self.try_initialize(&doc, &mut metadata).unwrap();
        return Site {
            field: self.field.name.clone(),
            replica: ReplicaId::from(replica),
            doc,
            metadata,
        };
    }

    /// A replica with empty metadata.
    pub fn bare_site(&self, replica: &str, value: Value) -> Site {
        return Site {
            field: self.field.name.clone(),
            replica: ReplicaId::from(replica),
            doc: self.root(value),
            metadata: CrdtMetadata::new(),
        };
    }

    pub fn try_initialize(&self, doc: &Value, metadata: &mut CrdtMetadata) -> Result<()> {
        let mut cx = InitContext {
            path: &self.path,
            field: &self.field,
            value: self.path.resolve(doc),
            metadata,
            timestamp: Timestamp::ZERO,
            services: self.services(),
        };
        return self.strategy.initialize(&mut cx);
    }

    pub fn try_diff(&self, site: &Site, value: Value, ts: u64) -> Result<Vec<CrdtOperation>> {
        return self.try_diff_root(site, self.root(value), ts);
    }

    pub fn try_diff_root(&self, site: &Site, modified_root: Value, ts: u64) -> Result<Vec<CrdtOperation>> {
        let mut operations = Vec::new();
        let mut cx = GenerateContext {
            replica_id: &site.replica,
            path: &self.path,
            field: &self.field,
            original: self.path.resolve(&site.doc),
            modified: self.path.resolve(&modified_root),
            original_root: &site.doc,
            modified_root: &modified_root,
            metadata: &site.metadata,
            timestamp: Timestamp(ts),
            services: self.services(),
            operations: &mut operations,
        };
        self.strategy.generate_patch(&mut cx)?;
        return Ok(operations);
    }

    pub fn try_apply(&self, site: &mut Site, ops: &[CrdtOperation]) -> Result<()> {
        for operation in ops {
            // Map entry operations target `$.field.['key']`.
            let owner = match operation.path.last() {
                Some(Segment::Key(_)) => operation.path.parent().unwrap(),
                _ => operation.path.clone(),
            };
            let mut cx = ApplyContext {
                document: &mut site.doc,
                metadata: &mut site.metadata,
                operation,
                path: &owner,
                field: &self.field,
                services: self.services(),
            };
            self.strategy.apply_operation(&mut cx)?;
        }
        return Ok(());
    }

    /// Diff, then apply locally.
    pub fn edit(&self, site: &mut Site, value: Value, ts: u64) -> Vec<CrdtOperation> {
        let ops = self.try_diff(site, value, ts).unwrap();
        self.try_apply(site, &ops).unwrap();
        return ops;
    }

    pub fn edit_root(&self, site: &mut Site, root: Value, ts: u64) -> Vec<CrdtOperation> {
        let ops = self.try_diff_root(site, root, ts).unwrap();
        self.try_apply(site, &ops).unwrap();
        return ops;
    }

    pub fn apply(&self, site: &mut Site, ops: &[CrdtOperation]) {
        self.try_apply(site, ops).unwrap();
    }
}
