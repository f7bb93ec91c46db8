//! Backend abstraction
//!
//! This module defines the [`Backend`] trait the adapter drives: a generic
//! document collection store partitioned by [`Domain`], offering
//! insert/find/update/delete/bulk-write/aggregate primitives over opaque
//! documents keyed by `_id`.
//!
//! Thread safety: all methods must be safe to call concurrently from
//! multiple threads (requires Send + Sync). Atomicity is only guaranteed per
//! single write operation.
//!
//! Bulk semantics are ordered: the first failing operation stops the batch
//! with [`BackendError::BulkWrite`](crate::error::BackendError::BulkWrite),
//! and every operation before it stays committed.

use crate::document::Document;
use crate::error::BackendResult;
use crate::options::{Direction, Projection};
use crate::query::{Condition, Filter};
use crate::types::Domain;
use crate::update::Update;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Parameters of a plain find
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindParams {
    /// Sort keys, earlier keys first
    pub sort: Vec<(String, Direction)>,
    /// Field selection
    pub projection: Option<Projection>,
    /// Maximum number of results
    pub limit: Option<usize>,
}

impl FindParams {
    /// Only project the given paths
    pub fn only(paths: &[&str]) -> Self {
        let projection = paths
            .iter()
            .fold(Projection::default(), |p, path| p.include(*path));
        FindParams {
            projection: Some(projection),
            ..Default::default()
        }
    }
}

/// One operation of an ordered bulk write
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Insert a document; fails on duplicate `_id`
    InsertOne(Document),
    /// Update the first matching document
    UpdateOne {
        /// Selector
        filter: Filter,
        /// Modification
        update: Update,
        /// Insert from the filter's equality fields when nothing matches
        upsert: bool,
    },
    /// Update every matching document
    UpdateMany {
        /// Selector
        filter: Filter,
        /// Modification
        update: Update,
    },
    /// Replace the first matching document
    ReplaceOne {
        /// Selector
        filter: Filter,
        /// New content
        replacement: Document,
        /// Insert when nothing matches
        upsert: bool,
    },
    /// Delete the first matching document
    DeleteOne {
        /// Selector
        filter: Filter,
    },
    /// Delete every matching document
    DeleteMany {
        /// Selector
        filter: Filter,
    },
}

/// Counters of a successful write
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteSummary {
    /// Documents inserted (including upserts)
    pub inserted: usize,
    /// Documents matched by update selectors
    pub matched: usize,
    /// Documents actually changed
    pub modified: usize,
    /// Documents deleted
    pub deleted: usize,
}

impl WriteSummary {
    /// Accumulate another summary
    pub fn merge(&mut self, other: WriteSummary) {
        self.inserted += other.inserted;
        self.matched += other.matched;
        self.modified += other.modified;
        self.deleted += other.deleted;
    }
}

/// Derived-field expression of an `AddFields` stage
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// First matching case's rank, or `default`
    Rank {
        /// Field the cases test
        field: String,
        /// Ordered `(conditions, rank)` cases
        cases: Vec<(Vec<Condition>, i64)>,
        /// Rank when no case matches
        default: i64,
    },
    /// Position of the field value in `values`, or `missing`
    IndexOf {
        /// Field looked up
        field: String,
        /// Declared value order
        values: Vec<Value>,
        /// Rank for unlisted or absent values
        missing: i64,
    },
    /// `true` when the field is null or absent
    IsNullOrMissing {
        /// Field tested
        field: String,
    },
}

/// Backend-side join
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinStep {
    /// Domain joined against
    pub from: Domain,
    /// Path on the current document (may traverse arrays)
    pub local_field: String,
    /// Path on the joined documents
    pub foreign_field: String,
    /// Field receiving the array of joined documents
    pub result_key: String,
}

/// Aggregate pipeline stage
#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    /// Keep matching documents
    Match(Filter),
    /// Join another domain
    Lookup(JoinStep),
    /// Compute derived fields
    AddFields(Vec<(String, Expr)>),
    /// Order documents
    Sort(Vec<(String, Direction)>),
    /// Select fields
    Project(Projection),
    /// Truncate
    Limit(usize),
    /// Replace the stream with a single `{ <field>: count }` document
    Count(String),
}

/// Secondary index definition
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexSpec {
    /// Index name, unique per domain
    pub name: String,
    /// Indexed keys in order
    pub keys: Vec<(String, IndexDirection)>,
    /// Skip documents missing the keys
    #[serde(default)]
    pub sparse: bool,
}

/// Key direction of an index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndexDirection {
    /// Ascending
    Asc,
    /// Descending
    Desc,
}

impl IndexSpec {
    /// Single-key ascending index named after the key
    pub fn on(key: &str) -> Self {
        IndexSpec {
            name: format!("{}_1", key),
            keys: vec![(key.to_string(), IndexDirection::Asc)],
            sparse: false,
        }
    }
}

/// Document collection backend, partitioned by domain
pub trait Backend: Send + Sync {
    /// Find matching documents
    fn find(&self, domain: &Domain, filter: &Filter, params: &FindParams)
        -> BackendResult<Vec<Document>>;

    /// Count matching documents
    fn count(&self, domain: &Domain, filter: &Filter) -> BackendResult<usize>;

    /// Insert documents in order
    ///
    /// # Errors
    ///
    /// [`BackendError::BulkWrite`](crate::error::BackendError::BulkWrite) with
    /// the index of the first rejected document.
    fn insert_many(&self, domain: &Domain, docs: Vec<Document>) -> BackendResult<usize>;

    /// Update the first matching document
    fn update_one(
        &self,
        domain: &Domain,
        filter: &Filter,
        update: &Update,
        upsert: bool,
    ) -> BackendResult<WriteSummary>;

    /// Update every matching document
    fn update_many(&self, domain: &Domain, filter: &Filter, update: &Update)
        -> BackendResult<WriteSummary>;

    /// Atomically update the first matching document and return its new state
    fn find_one_and_update(
        &self,
        domain: &Domain,
        filter: &Filter,
        update: &Update,
    ) -> BackendResult<Option<Document>>;

    /// Delete every matching document
    fn delete_many(&self, domain: &Domain, filter: &Filter) -> BackendResult<usize>;

    /// Ordered bulk write
    ///
    /// # Errors
    ///
    /// [`BackendError::BulkWrite`](crate::error::BackendError::BulkWrite) with
    /// the index of the first failing operation; earlier operations are
    /// committed.
    fn bulk_write(&self, domain: &Domain, ops: Vec<WriteOp>) -> BackendResult<WriteSummary>;

    /// Run an aggregate pipeline
    fn aggregate(&self, domain: &Domain, pipeline: &[Stage]) -> BackendResult<Vec<Document>>;

    /// Distinct values at `field` across the domain
    fn distinct(&self, domain: &Domain, field: &str) -> BackendResult<Vec<Value>>;

    /// Create a secondary index
    fn create_index(&self, domain: &Domain, spec: &IndexSpec) -> BackendResult<()>;

    /// Drop a secondary index by name
    fn drop_index(&self, domain: &Domain, name: &str) -> BackendResult<()>;

    /// Secondary indexes of a domain
    fn list_indexes(&self, domain: &Domain) -> BackendResult<Vec<IndexSpec>>;

    /// Domains holding at least one document or index
    fn domains(&self) -> BackendResult<Vec<Domain>>;
}
