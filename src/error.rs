//! Error types for patch generation and application.
//!
//! Only programmer and configuration mistakes are errors. Stale writes,
//! unresolvable targets and malformed payloads are normal outcomes of
//! replication and are dropped inside the strategies instead.

use thiserror::Error;

use crate::crdt::op::OperationKind;
use crate::path::FieldPath;

/// Errors raised synchronously to the caller of `generate_patch` or
/// `apply_patch`.
#[derive(Debug, Error)]
pub enum Error {
    /// An operation reached a strategy that cannot interpret its kind.
    /// Indicates mismatched schemas between replicas.
    #[error("{strategy} strategy does not support {kind:?} operations (at {path})")]
    UnsupportedOperation {
        strategy: &'static str,
        kind: OperationKind,
        path: FieldPath,
    },

    /// A field is missing configuration its strategy requires.
    #[error("field {path} is missing required configuration: {what}")]
    MissingConfig { path: FieldPath, what: &'static str },

    /// The resolver has no strategy registered for a kind.
    #[error("no strategy registered for {0}")]
    UnknownStrategy(String),

    /// A field names an element comparer that was never registered.
    #[error("no element comparer registered under {0:?}")]
    UnknownComparer(String),

    /// A field names a transition validator that was never registered.
    #[error("no transition validator registered under {0:?}")]
    UnknownValidator(String),

    /// A path string could not be parsed.
    #[error("invalid field path {path:?}: {reason}")]
    InvalidPath { path: String, reason: &'static str },

    /// A schema declaration is inconsistent.
    #[error("invalid schema: {0}")]
    Schema(String),

    /// A typed document failed to convert to or from its value tree.
    #[error("document conversion failed: {0}")]
    Conversion(#[from] serde_json::Error),
}

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a missing configuration error.
    pub fn missing_config(path: &FieldPath, what: &'static str) -> Self {
        return Error::MissingConfig {
            path: path.clone(),
            what,
        };
    }

    /// Create an unsupported operation error.
    pub fn unsupported(strategy: &'static str, kind: OperationKind, path: &FieldPath) -> Self {
        return Error::UnsupportedOperation {
            strategy,
            kind,
            path: path.clone(),
        };
    }
}
