//! Document adapter engine for facetdb
//!
//! This crate orchestrates the lower layers:
//! - DocumentAdapter: the facade with open/close, reads, writes and admin
//! - Query translation: class filters, mixin qualification, like patterns
//! - Lookups: forward and reverse relation expansion, joined or post-fetch
//! - Sorting: enum order and custom ranking rules as derived fields
//! - Transaction compilation and batched, failure-isolating execution
//! - Hash iteration and best-effort index management
//!
//! The engine is the only component that knows about:
//! - The class hierarchy's mapping of classes to domains
//! - Write ordering across one transaction batch
//! - Admission control

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod adapter;
pub mod compile;
pub mod config;
pub mod execute;
pub mod hash;
pub mod index;
pub mod lookup;
pub mod query;
pub mod sort;

pub use adapter::{DocumentAdapter, FindResult};
pub use compile::{CompiledBatch, DomainGroup, TxCompiler};
pub use config::{AdapterConfig, CONFIG_FILE_NAME};
pub use execute::{BatchExecutor, TxResult};
pub use hash::{compute_hash, DocInfo, HashIterator, HashIteratorStats};
pub use index::{default_indexes, IndexReport};
pub use lookup::LookupPlanner;
pub use query::QueryTranslator;
