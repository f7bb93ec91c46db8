//! Fault injection for backend consumers
//!
//! Lets tests drive the failure paths of code built on [`MemoryBackend`]
//! without a real outage:
//!
//! - **Outage**: every call fails with a transient error until cleared
//! - **Transient budget**: the next N calls fail transiently
//! - **Bulk rejection**: the next N bulk writes fail transiently as a whole
//! - **Index failures**: creating an index with a given name is rejected
//!
//! [`MemoryBackend`]: crate::MemoryBackend

use facetdb_core::BackendError;
use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Shared fault switches consulted by the memory backend
#[derive(Debug, Default)]
pub struct FaultInjector {
    outage: AtomicBool,
    transient_budget: AtomicUsize,
    bulk_budget: AtomicUsize,
    failing_indexes: Mutex<FxHashSet<String>>,
}

impl FaultInjector {
    /// No faults armed
    pub fn new() -> Self {
        Self::default()
    }

    /// Start or stop a full outage
    pub fn set_outage(&self, down: bool) {
        self.outage.store(down, Ordering::SeqCst);
    }

    /// Fail the next `n` calls transiently
    pub fn fail_next(&self, n: usize) {
        self.transient_budget.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` bulk writes transiently, before any operation runs
    pub fn fail_next_bulk(&self, n: usize) {
        self.bulk_budget.store(n, Ordering::SeqCst);
    }

    /// Reject creation of the named index
    pub fn fail_index(&self, name: impl Into<String>) {
        self.failing_indexes.lock().insert(name.into());
    }

    /// Disarm everything
    pub fn clear(&self) {
        self.set_outage(false);
        self.fail_next(0);
        self.fail_next_bulk(0);
        self.failing_indexes.lock().clear();
    }

    /// Consulted at the start of every backend call
    pub(crate) fn check(&self, op: &str) -> Result<(), BackendError> {
        if self.outage.load(Ordering::SeqCst) {
            return Err(BackendError::Transient(format!("{}: backend unavailable", op)));
        }
        if take_one(&self.transient_budget) {
            return Err(BackendError::Transient(format!("{}: injected timeout", op)));
        }
        Ok(())
    }

    pub(crate) fn check_bulk(&self) -> Result<(), BackendError> {
        if take_one(&self.bulk_budget) {
            return Err(BackendError::Transient("bulk_write: injected timeout".into()));
        }
        Ok(())
    }

    pub(crate) fn check_index(&self, name: &str) -> Result<(), BackendError> {
        if self.failing_indexes.lock().contains(name) {
            return Err(BackendError::Write(format!("index '{}' rejected", name)));
        }
        Ok(())
    }
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}
