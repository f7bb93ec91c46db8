//! Behavioral properties of the document adapter
//!
//! Each module pins one observable guarantee end to end through the public
//! facade over a memory backend.

#[path = "../common/mod.rs"]
mod common;

mod batches;
mod hashes;
mod hierarchy;
mod lookups;
mod ordering;
