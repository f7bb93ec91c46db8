//! Error types for facetdb
//!
//! Errors are split by layer:
//! - [`ModelError`]: unknown class/attribute references. Always a programming error, never retried.
//! - [`BackendError`]: failures reported by the document backend.
//! - [`Error`]: the top-level error returned by adapter operations.
//!
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.
//!
//! Index creation failures are deliberately absent from this taxonomy: they are
//! logged and reported through `IndexReport`, never returned as an error.

use crate::types::{ClassId, Ref};
use thiserror::Error;

/// Result type alias for facetdb operations
pub type Result<T> = std::result::Result<T, Error>;

/// Result type alias for backend primitives
pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Unknown or malformed model references
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    /// Class identifier not present in the model
    #[error("unknown class: {0}")]
    UnknownClass(ClassId),

    /// Class (and all of its ancestors) declare no domain
    #[error("class {0} has no domain")]
    NoDomain(ClassId),

    /// Attribute not declared on the class, its ancestors or its mixins
    #[error("unknown attribute {attribute} on class {class}")]
    UnknownAttribute {
        /// Class the attribute was looked up on
        class: ClassId,
        /// Attribute name
        attribute: String,
    },

    /// A class extends a class that is not part of the model
    #[error("class {class} extends unknown class {base}")]
    UnknownBase {
        /// Declaring class
        class: ClassId,
        /// Missing base class
        base: ClassId,
    },

    /// The extends chain loops back on itself
    #[error("class hierarchy cycle through {0}")]
    Cycle(ClassId),

    /// Class declared twice
    #[error("duplicate class definition: {0}")]
    Duplicate(ClassId),
}

/// Errors raised by a document backend
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// Connectivity, timeout or outage. Read paths may retry at a higher level.
    #[error("transient backend failure: {0}")]
    Transient(String),

    /// A single write was rejected (type mismatch, path conflict, ...)
    #[error("write rejected: {0}")]
    Write(String),

    /// An ordered bulk write stopped at `index`; operations before it were committed
    #[error("bulk write failed at operation {index}: {message}")]
    BulkWrite {
        /// Position of the failing operation inside the submitted batch
        index: usize,
        /// Backend failure message
        message: String,
    },

    /// Insert of an identifier that already exists
    #[error("duplicate key: {0}")]
    DuplicateKey(Ref),

    /// Filter, stage or operator the backend cannot evaluate
    #[error("unsupported by backend: {0}")]
    Unsupported(String),
}

impl BackendError {
    /// Whether the failure is systemic rather than caused by a specific record
    pub fn is_transient(&self) -> bool {
        matches!(self, BackendError::Transient(_))
    }
}

/// Top-level adapter error
#[derive(Debug, Error)]
pub enum Error {
    /// Unknown class or attribute reference
    #[error("model error: {0}")]
    Model(#[from] ModelError),

    /// Failure surfaced unchanged from the backend
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    /// Some records of a bulk write could not be applied even after the
    /// single-operation retry. Everything else was committed.
    #[error("{} record(s) failed to apply: {first_error}", failed.len())]
    PartialBatchFailure {
        /// Identifiers of documents whose writes were not applied
        failed: Vec<Ref>,
        /// Backend message of the first failure
        first_error: String,
    },

    /// Request is malformed (lookup too deep, unlowered operator, ...)
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Configuration could not be parsed or is out of range
    #[error("configuration error: {0}")]
    Config(String),

    /// The adapter has been closed
    #[error("adapter is closed")]
    Closed,
}

impl Error {
    /// Build an `InvalidInput` error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }

    /// Failed identifiers carried by a partial batch failure
    pub fn failed_ids(&self) -> &[Ref] {
        match self {
            Error::PartialBatchFailure { failed, .. } => failed,
            _ => &[],
        }
    }
}
