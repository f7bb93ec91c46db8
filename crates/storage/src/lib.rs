//! Storage layer for facetdb
//!
//! This crate implements the in-memory document backend:
//! - MemoryBackend: DashMap of domains, each a `RwLock<BTreeMap>` keyed by `_id`
//! - Filter evaluation with array fan-out and cross-type value ordering
//! - Update application (set with array filters, unset, inc, pull, push)
//! - Aggregate pipelines (match, join, derived fields, sort, project, limit, count)
//! - Secondary index bookkeeping
//! - Fault injection for consumers' failure-path tests

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod apply;
pub mod matcher;
pub mod memory;
pub mod pipeline;
pub mod testing;

pub use memory::{CallCounts, MemoryBackend, ID_INDEX};
pub use testing::FaultInjector;
