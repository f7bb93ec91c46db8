//! Concurrency governor
//!
//! Two independent admission gates bound the adapter's load on the backend:
//! one for read requests, one for transaction batches. Reads never wait on
//! writes and vice versa.
//!
//! ```
//! use facetdb_concurrency::{Governor, GovernorConfig};
//!
//! let governor = Governor::new(GovernorConfig::default());
//! let permit = governor.find().unwrap();
//! assert_eq!(governor.stats().find.in_flight, 1);
//! drop(permit);
//! ```

use crate::gate::{AdmissionGate, GateStats, Permit};
use facetdb_core::Result;
use tracing::debug;

/// Default read concurrency
pub const DEFAULT_FIND_CONCURRENCY: usize = 100;

/// Default transaction-batch concurrency
pub const DEFAULT_TX_CONCURRENCY: usize = 10;

/// Gate capacities
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GovernorConfig {
    /// Concurrent read requests
    pub find_concurrency: usize,
    /// Concurrent transaction batches
    pub tx_concurrency: usize,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        GovernorConfig {
            find_concurrency: DEFAULT_FIND_CONCURRENCY,
            tx_concurrency: DEFAULT_TX_CONCURRENCY,
        }
    }
}

/// Statistics of both gates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GovernorStats {
    /// Read gate
    pub find: GateStats,
    /// Transaction gate
    pub tx: GateStats,
}

/// Read and write admission gates
#[derive(Debug)]
pub struct Governor {
    find: AdmissionGate,
    tx: AdmissionGate,
}

impl Governor {
    /// Create both gates
    pub fn new(config: GovernorConfig) -> Self {
        Governor {
            find: AdmissionGate::new("find", config.find_concurrency),
            tx: AdmissionGate::new("tx", config.tx_concurrency),
        }
    }

    /// Admit a read request
    pub fn find(&self) -> Result<Permit<'_>> {
        self.find.acquire()
    }

    /// Admit a transaction batch
    pub fn tx(&self) -> Result<Permit<'_>> {
        self.tx.acquire()
    }

    /// Close both gates, then wait for outstanding permits to drain
    ///
    /// Returns `true` on the first call. Must not be called while the calling
    /// thread holds a permit.
    pub fn close(&self) -> bool {
        let first = self.find.close() | self.tx.close();
        self.find.wait_idle();
        self.tx.wait_idle();
        if first {
            debug!(target: "facetdb::adapter", "governor closed");
        }
        first
    }

    /// Whether the governor has been closed
    pub fn is_closed(&self) -> bool {
        self.find.is_closed()
    }

    /// Snapshot of both gates
    pub fn stats(&self) -> GovernorStats {
        GovernorStats {
            find: self.find.stats(),
            tx: self.tx.stats(),
        }
    }
}

impl Default for Governor {
    fn default() -> Self {
        Self::new(GovernorConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use facetdb_core::Error;

    #[test]
    fn test_gates_are_independent() {
        let g = Governor::new(GovernorConfig {
            find_concurrency: 1,
            tx_concurrency: 1,
        });
        let _read = g.find().unwrap();
        let _write = g.tx().unwrap();
        assert_eq!(g.stats().find.in_flight, 1);
        assert_eq!(g.stats().tx.in_flight, 1);
    }

    #[test]
    fn test_close_once() {
        let g = Governor::default();
        assert!(g.close());
        assert!(!g.close());
        assert!(g.is_closed());
        assert!(matches!(g.find(), Err(Error::Closed)));
        assert!(matches!(g.tx(), Err(Error::Closed)));
    }

    #[test]
    fn test_defaults() {
        let s = Governor::default().stats();
        assert_eq!(s.find.capacity, 100);
        assert_eq!(s.tx.capacity, 10);
    }
}
