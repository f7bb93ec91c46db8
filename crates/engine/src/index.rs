//! Best-effort index management
//!
//! Indexes are an optimization. Failing to list, create or drop one is
//! logged at `warn` and recorded in the [`IndexReport`]; it never becomes an
//! `Err` and never aborts startup or a write.

use facetdb_core::backend::{Backend, IndexSpec};
use facetdb_core::{fields, Domain};
use facetdb_storage::ID_INDEX;
use tracing::{info, warn};

/// What an index pass did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexReport {
    /// Names of created indexes
    pub created: Vec<String>,
    /// Names of dropped indexes
    pub dropped: Vec<String>,
    /// `(name, error)` of swallowed failures
    pub failed: Vec<(String, String)>,
}

impl IndexReport {
    /// Whether every step succeeded
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    /// Accumulate another report
    pub fn merge(&mut self, other: IndexReport) {
        self.created.extend(other.created);
        self.dropped.extend(other.dropped);
        self.failed.extend(other.failed);
    }
}

/// Indexes every document domain gets
pub fn default_indexes() -> Vec<IndexSpec> {
    let mut attached = IndexSpec::on(fields::ATTACHED_TO);
    attached.sparse = true;
    vec![
        IndexSpec::on(fields::CLASS),
        IndexSpec::on(fields::SPACE),
        IndexSpec::on(fields::MODIFIED_ON),
        attached,
    ]
}

fn list(
    backend: &dyn Backend,
    domain: &Domain,
    report: &mut IndexReport,
) -> Option<Vec<IndexSpec>> {
    match backend.list_indexes(domain) {
        Ok(existing) => Some(existing),
        Err(e) => {
            warn!(target: "facetdb::index", domain = %domain, error = %e, "listing indexes failed");
            report.failed.push(("*".to_string(), e.to_string()));
            None
        }
    }
}

/// Create the missing indexes among `specs`
pub fn ensure_indexes(backend: &dyn Backend, domain: &Domain, specs: &[IndexSpec]) -> IndexReport {
    let mut report = IndexReport::default();
    let Some(existing) = list(backend, domain, &mut report) else {
        return report;
    };
    for spec in specs {
        if existing.iter().any(|e| e.name == spec.name) {
            continue;
        }
        match backend.create_index(domain, spec) {
            Ok(()) => {
                info!(
                    target: "facetdb::index",
                    domain = %domain,
                    index = %spec.name,
                    "index created"
                );
                report.created.push(spec.name.clone());
            }
            Err(e) => {
                warn!(
                    target: "facetdb::index",
                    domain = %domain,
                    index = %spec.name,
                    error = %e,
                    "index creation failed"
                );
                report.failed.push((spec.name.clone(), e.to_string()));
            }
        }
    }
    report
}

/// Drop every index not named in `keep`; the primary index always stays
pub fn drop_stale_indexes(backend: &dyn Backend, domain: &Domain, keep: &[&str]) -> IndexReport {
    let mut report = IndexReport::default();
    let Some(existing) = list(backend, domain, &mut report) else {
        return report;
    };
    for spec in existing {
        if spec.name == ID_INDEX || keep.contains(&spec.name.as_str()) {
            continue;
        }
        match backend.drop_index(domain, &spec.name) {
            Ok(()) => {
                info!(
                    target: "facetdb::index",
                    domain = %domain,
                    index = %spec.name,
                    "stale index dropped"
                );
                report.dropped.push(spec.name);
            }
            Err(e) => {
                warn!(
                    target: "facetdb::index",
                    domain = %domain,
                    index = %spec.name,
                    error = %e,
                    "index drop failed"
                );
                report.failed.push((spec.name, e.to_string()));
            }
        }
    }
    report
}
