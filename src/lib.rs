//! facetdb - Transactional document-store adapter for mixin-capable class hierarchies
//!
//! facetdb persists documents of a class model in a collection-oriented
//! backend. Each class maps to a domain (one collection); mixins live as
//! nested facets inside the documents of their base class.
//!
//! # Quick Start
//!
//! ```ignore
//! use facetdb::{ClassDef, ClassId, DocumentAdapter, Filter, FindOptions, ModelBuilder, DOC_CLASS};
//!
//! let model = ModelBuilder::new()
//!     .class(ClassDef::class("task:class:Issue", DOC_CLASS).domain("task"))
//!     .build()?;
//! let adapter = DocumentAdapter::in_memory(model)?;
//!
//! adapter.apply_transactions(&txs)?;
//! let issue = ClassId::new("task:class:Issue");
//! let issues = adapter.find_all(&issue, &Filter::new(), &FindOptions::default())?;
//! ```
//!
//! # Architecture
//!
//! All reads and writes go through [`DocumentAdapter`], which translates
//! class-level requests into backend calls. The backend is any
//! [`Backend`] implementation; [`MemoryBackend`] ships for tests and
//! embedded use.

pub use facetdb_concurrency::{Governor, GovernorConfig, GovernorStats};
pub use facetdb_core::*;
pub use facetdb_engine::{
    compute_hash, AdapterConfig, DocInfo, DocumentAdapter, FindResult, HashIterator,
    HashIteratorStats, IndexReport, TxResult, CONFIG_FILE_NAME,
};
pub use facetdb_storage::{FaultInjector, MemoryBackend};
