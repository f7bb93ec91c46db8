//! Concurrency control for facetdb
//!
//! This crate bounds how much work the adapter puts on its backend:
//! - AdmissionGate: counting gate with blocking acquire and RAII permits
//! - Governor: independent read and transaction gates, closed once on shutdown

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod gate;
pub mod governor;

pub use gate::{AdmissionGate, GateStats, Permit};
pub use governor::{
    Governor, GovernorConfig, GovernorStats, DEFAULT_FIND_CONCURRENCY, DEFAULT_TX_CONCURRENCY,
};
