//! Testing utilities for backend consumers
//!
//! - **Faults**: transient outages, bulk rejections and index failures
//!   injected into a [`MemoryBackend`](crate::MemoryBackend)
//!
//! # Example
//!
//! ```
//! use facetdb_storage::MemoryBackend;
//!
//! let backend = MemoryBackend::new();
//! backend.faults().fail_next(1);
//! ```

mod faults;

pub use faults::FaultInjector;
