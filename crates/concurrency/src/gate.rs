//! Bounded admission gate
//!
//! A counting gate that admits at most `capacity` holders at once. Callers
//! beyond the limit block until a [`Permit`] is dropped; nothing is ever
//! rejected for being over capacity.
//!
//! Closing a gate wakes every waiter with [`Error::Closed`] and refuses new
//! callers. Permits already handed out stay valid until dropped, and
//! [`AdmissionGate::wait_idle`] blocks until they are.

use facetdb_core::{Error, Result};
use parking_lot::{Condvar, Mutex};
use tracing::trace;

#[derive(Debug, Default)]
struct GateState {
    in_flight: usize,
    peak: usize,
    admitted: u64,
    waited: u64,
    closed: bool,
}

/// Gate statistics snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateStats {
    /// Maximum concurrent holders
    pub capacity: usize,
    /// Current holders
    pub in_flight: usize,
    /// Highest number of concurrent holders observed
    pub peak: usize,
    /// Total permits granted
    pub admitted: u64,
    /// Acquisitions that had to wait
    pub waited: u64,
}

/// Counting gate with blocking acquisition
#[derive(Debug)]
pub struct AdmissionGate {
    name: &'static str,
    capacity: usize,
    state: Mutex<GateState>,
    changed: Condvar,
}

impl AdmissionGate {
    /// Create a gate. A zero capacity is raised to one.
    pub fn new(name: &'static str, capacity: usize) -> Self {
        AdmissionGate {
            name,
            capacity: capacity.max(1),
            state: Mutex::new(GateState::default()),
            changed: Condvar::new(),
        }
    }

    /// Gate name, used in logs
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Block until a slot is free
    ///
    /// # Errors
    ///
    /// [`Error::Closed`] if the gate is closed before or while waiting.
    pub fn acquire(&self) -> Result<Permit<'_>> {
        let mut state = self.state.lock();
        let mut counted = false;
        loop {
            if state.closed {
                return Err(Error::Closed);
            }
            if state.in_flight < self.capacity {
                state.in_flight += 1;
                state.admitted += 1;
                state.peak = state.peak.max(state.in_flight);
                return Ok(Permit { gate: self });
            }
            if !counted {
                state.waited += 1;
                counted = true;
                trace!(
                    target: "facetdb::adapter",
                    gate = self.name,
                    capacity = self.capacity,
                    "waiting for admission"
                );
            }
            self.changed.wait(&mut state);
        }
    }

    /// Take a slot only if one is free right now
    pub fn try_acquire(&self) -> Result<Option<Permit<'_>>> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(Error::Closed);
        }
        if state.in_flight >= self.capacity {
            return Ok(None);
        }
        state.in_flight += 1;
        state.admitted += 1;
        state.peak = state.peak.max(state.in_flight);
        Ok(Some(Permit { gate: self }))
    }

    /// Refuse new callers and wake waiters. Returns `true` on the first call.
    pub fn close(&self) -> bool {
        let mut state = self.state.lock();
        let first = !state.closed;
        state.closed = true;
        self.changed.notify_all();
        first
    }

    /// Whether the gate is closed
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Block until no permit is outstanding
    pub fn wait_idle(&self) {
        let mut state = self.state.lock();
        while state.in_flight > 0 {
            self.changed.wait(&mut state);
        }
    }

    /// Statistics snapshot
    pub fn stats(&self) -> GateStats {
        let state = self.state.lock();
        GateStats {
            capacity: self.capacity,
            in_flight: state.in_flight,
            peak: state.peak,
            admitted: state.admitted,
            waited: state.waited,
        }
    }

    fn release(&self) {
        let mut state = self.state.lock();
        state.in_flight = state.in_flight.saturating_sub(1);
        // Waiters for a slot and idle waiters share the condvar
        self.changed.notify_all();
    }
}

/// RAII slot in an [`AdmissionGate`]; released on drop
#[derive(Debug)]
#[must_use = "the slot is released as soon as the permit is dropped"]
pub struct Permit<'a> {
    gate: &'a AdmissionGate,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        self.gate.release();
    }
}
