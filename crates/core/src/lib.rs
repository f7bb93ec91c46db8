//! Core types and traits for facetdb
//!
//! This crate defines the foundational types shared by every layer:
//! - Ref, ClassId, Domain: string identifiers
//! - Document: schema-flexible JSON document with nested mixin facets
//! - Filter / Condition: structured predicate tree
//! - DocumentUpdate / Update: transaction deltas and backend updates
//! - Tx / TxKind: transaction records
//! - FindOptions / Lookup / SortOrder / Projection: read options
//! - Hierarchy: class model resolver (domains, descendants, mixins)
//! - Backend: the document collection store the adapter drives
//! - Clock / Timestamp: millisecond time source
//! - Error: error type hierarchy

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod clock;
pub mod document;
pub mod error;
pub mod hierarchy;
pub mod options;
pub mod path;
pub mod query;
pub mod tx;
pub mod types;
pub mod update;

pub use backend::{
    Backend, Expr, FindParams, IndexDirection, IndexSpec, JoinStep, Stage, WriteOp, WriteSummary,
};
pub use clock::{Clock, FixedClock, SystemClock, Timestamp};
pub use document::{Document, HashMeta};
pub use error::{BackendError, BackendResult, Error, ModelError, Result};
pub use hierarchy::{AttrType, AttributeDef, ClassDef, ClassKind, Hierarchy, ModelBuilder};
pub use options::{
    Direction, FindOptions, ForwardLookup, Lookup, Projection, ReverseLookup, SortCase, SortOrder,
    SortSpec, SortingRules,
};
pub use query::{Clause, Condition, Filter};
pub use tx::{Tx, TxKind};
pub use types::{fields, ClassId, Domain, Ref, DOC_CLASS, DOMAIN_MODEL};
pub use update::{ArrayFilter, DocumentUpdate, PullMatcher, PullSpec, PushSpec, Update, UpdateOp};
