//! Element identity for collection strategies.
//!
//! Set, map-of-items and sequence strategies need to recognise "the same
//! logical item" on two replicas even when its content differs. A comparer
//! reduces an element to an identity key; two elements are the same item iff
//! their keys are equal. Keys double as map keys inside metadata.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde_json::Value;

use crate::error::Error;
use crate::error::Result;

/// Canonical identity of a collection element.
pub type ElementKey = String;

/// Equality for collection elements.
pub trait ElementComparer: Send + Sync {
    /// Reduce an element to its identity key.
    fn identity(&self, value: &Value) -> ElementKey;

    /// True if both values denote the same logical item.
    fn same_item(&self, a: &Value, b: &Value) -> bool {
        return self.identity(a) == self.identity(b);
    }
}

/// Full structural equality: the identity is the compact JSON rendering.
///
/// Object keys are sorted in `serde_json`'s default map, so the rendering is
/// canonical.
#[derive(Clone, Copy, Debug, Default)]
pub struct StructuralComparer;

impl ElementComparer for StructuralComparer {
    fn identity(&self, value: &Value) -> ElementKey {
        return value.to_string();
    }
}

/// Identity by one field of an object element, e.g. `id`.
///
/// Elements that are not objects, or lack the field, fall back to their
/// structural identity.
#[derive(Clone, Debug)]
pub struct KeyFieldComparer {
    field: String,
}

impl KeyFieldComparer {
    pub fn new(field: impl Into<String>) -> KeyFieldComparer {
        return KeyFieldComparer { field: field.into() };
    }
}

impl ElementComparer for KeyFieldComparer {
    fn identity(&self, value: &Value) -> ElementKey {
        return match value.get(&self.field) {
            Some(key) => key.to_string(),
            None => value.to_string(),
        };
    }
}

/// Supplies the comparer for an element type.
///
/// `element_type` is the comparer name declared on the field, or `None`
/// for the default.
pub trait ElementComparerProvider: Send + Sync {
    fn comparer(&self, element_type: Option<&str>) -> Result<&dyn ElementComparer>;
}

/// Name-keyed comparer table with a structural default.
#[derive(Clone)]
pub struct ComparerRegistry {
    named: FxHashMap<String, Arc<dyn ElementComparer>>,
    default: Arc<dyn ElementComparer>,
}

impl Default for ComparerRegistry {
    fn default() -> Self {
        return Self::new();
    }
}

impl ComparerRegistry {
    pub fn new() -> ComparerRegistry {
        return ComparerRegistry {
            named: FxHashMap::default(),
            default: Arc::new(StructuralComparer),
        };
    }

    /// Register a comparer under an element type name.
    pub fn register(&mut self, name: impl Into<String>, comparer: Arc<dyn ElementComparer>) {
        self.named.insert(name.into(), comparer);
    }

    /// Replace the comparer used when a field names none.
    pub fn set_default(&mut self, comparer: Arc<dyn ElementComparer>) {
        self.default = comparer;
    }
}

impl ElementComparerProvider for ComparerRegistry {
    fn comparer(&self, element_type: Option<&str>) -> Result<&dyn ElementComparer> {
        return match element_type {
            None => Ok(self.default.as_ref()),
            Some(name) => self
                .named
                .get(name)
                .map(|c| c.as_ref())
                .ok_or_else(|| Error::UnknownComparer(name.to_string())),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn structural_identity_ignores_key_order() {
        let a = json!({"id": 1, "name": "x"});
        let b: Value = serde_json::from_str(r#"{"name":"x","id":1}"#).unwrap();
        assert!(StructuralComparer.same_item(&a, &b));
        assert!(!StructuralComparer.same_item(&a, &json!({"id": 1, "name": "y"})));
    }

    #[test]
    fn key_field_identity() {
        let by_id = KeyFieldComparer::new("id");
        assert!(by_id.same_item(&json!({"id": 1, "name": "x"}), &json!({"id": 1, "name": "y"})));
        assert!(!by_id.same_item(&json!({"id": 1}), &json!({"id": 2})));
        assert_eq!(by_id.identity(&json!("plain")), "\"plain\"");
    }

    #[test]
    fn registry_lookup() {
        let mut registry = ComparerRegistry::new();
        registry.register("by-id", Arc::new(KeyFieldComparer::new("id")));

        let by_id = registry.comparer(Some("by-id")).unwrap();
        assert_eq!(by_id.identity(&json!({"id": 7})), "7");

        let default = registry.comparer(None).unwrap();
        assert_eq!(default.identity(&json!({"id": 7})), r#"{"id":7}"#);

        assert!(matches!(registry.comparer(Some("missing")), Err(Error::UnknownComparer(_))));
    }
}
