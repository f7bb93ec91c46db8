//! Application of compiled batches
//!
//! Every phase of a [`DomainGroup`] is sent in chunks of at most
//! `bulk_batch_size` operations. When a chunk fails, the operations from
//! the failing position on (or the whole chunk, if the backend gave no
//! position) are retried one at a time:
//!
//! - a retry failing with a transient error aborts the batch immediately;
//!   the failure is systemic, not caused by the record
//! - any other retry failure records the identifier and the batch goes on
//!
//! Recorded identifiers are reported together as
//! [`Error::PartialBatchFailure`] once every group has been applied.
//! Committed writes are never rolled back.

use crate::compile::{CompiledBatch, DomainGroup};
use facetdb_core::backend::{Backend, FindParams, WriteOp};
use facetdb_core::query::Condition;
use facetdb_core::{
    fields, BackendError, BackendResult, Document, Domain, Error, Filter, Projection, Ref, Result,
    Update,
};
use serde_json::Value;
use tracing::{debug, warn};

/// Outcome of one transaction
#[derive(Debug, Clone, PartialEq)]
pub enum TxResult {
    /// Written; nothing to return
    Applied,
    /// Post-write state, for updates that asked for it
    ///
    /// An operator update that is the last write to its identifier in the
    /// batch returns exactly its own result. Any other retrieved update is
    /// read back once the batch's bulk writes for the domain are done, so it
    /// also reflects later writes to the same identifier in that batch.
    Document(Document),
    /// Targets the model partition, which this adapter does not persist
    Ignored,
}

#[derive(Debug, Default)]
struct Failures {
    failed: Vec<Ref>,
    first_error: Option<String>,
}

impl Failures {
    fn record(&mut self, domain: &Domain, phase: &str, id: &Ref, error: BackendError) {
        warn!(
            target: "facetdb::tx",
            domain = %domain,
            phase,
            id = %id,
            error = %error,
            "operation failed after single-operation retry"
        );
        if !self.failed.contains(id) {
            self.failed.push(id.clone());
        }
        self.first_error.get_or_insert_with(|| error.to_string());
    }

    fn into_result<T>(self, value: T) -> Result<T> {
        if self.failed.is_empty() {
            return Ok(value);
        }
        Err(Error::PartialBatchFailure {
            failed: self.failed,
            first_error: self.first_error.unwrap_or_default(),
        })
    }
}

/// Applies compiled batches to a backend
pub struct BatchExecutor<'a> {
    backend: &'a dyn Backend,
    batch_size: usize,
}

impl<'a> BatchExecutor<'a> {
    /// Executor sending at most `batch_size` operations per bulk write
    pub fn new(backend: &'a dyn Backend, batch_size: usize) -> Self {
        BatchExecutor {
            backend,
            batch_size: batch_size.max(1),
        }
    }

    /// Apply `batch`, compiled from `tx_count` transactions
    ///
    /// # Errors
    ///
    /// - [`Error::PartialBatchFailure`] when records failed their retry
    /// - [`Error::Backend`] on a transient failure during a retry, or a
    ///   failed read-after-write fetch
    pub fn execute(&self, batch: CompiledBatch, tx_count: usize) -> Result<Vec<TxResult>> {
        let mut results = vec![TxResult::Applied; tx_count];
        for index in batch.ignored {
            results[index] = TxResult::Ignored;
        }
        let mut failures = Failures::default();
        for group in batch.groups {
            self.apply_group(group, &mut results, &mut failures)?;
        }
        failures.into_result(results)
    }

    fn apply_group(
        &self,
        group: DomainGroup,
        results: &mut [TxResult],
        failures: &mut Failures,
    ) -> Result<()> {
        let domain = group.domain;
        let backend = self.backend;
        let bulk = |ops: Vec<WriteOp>| backend.bulk_write(&domain, ops).map(|_| ());

        self.run_phase(
            &domain,
            "insert",
            group.inserts,
            |docs| backend.insert_many(&domain, docs).map(|_| ()),
            failures,
        )?;

        let field_sets = group
            .field_sets
            .into_iter()
            .map(|(id, set)| {
                let op = WriteOp::UpdateOne {
                    filter: Filter::by_id(&id),
                    update: Update::from_set(set),
                    upsert: false,
                };
                (id, op)
            })
            .collect();
        self.run_phase(&domain, "field_set", field_sets, bulk, failures)?;
        self.run_phase(&domain, "bulk", group.bulk, bulk, failures)?;

        if !group.reads.is_empty() {
            let mut ids: Vec<Value> = Vec::new();
            for (_, id) in &group.reads {
                let id = Value::from(id.as_str());
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
            let params = FindParams {
                projection: Some(Projection::default().exclude(fields::HASH)),
                ..Default::default()
            };
            let filter = Filter::new().with(fields::ID, Condition::In(ids));
            let docs = backend.find(&domain, &filter, &params)?;
            for (tx_index, id) in &group.reads {
                if let Some(doc) = docs.iter().find(|d| d.id() == Some(id.as_str())) {
                    results[*tx_index] = TxResult::Document(doc.clone());
                }
            }
        }

        for raw in group.raw {
            match backend.find_one_and_update(&domain, &Filter::by_id(&raw.id), &raw.update) {
                Ok(Some(mut doc)) => {
                    doc.remove(fields::HASH);
                    results[raw.tx_index] = TxResult::Document(doc);
                }
                Ok(None) => {}
                Err(e) if e.is_transient() => return Err(e.into()),
                Err(e) => failures.record(&domain, "raw", &raw.id, e),
            }
        }

        let deletes = group
            .deletes
            .into_iter()
            .map(|id| {
                let op = WriteOp::DeleteOne {
                    filter: Filter::by_id(&id),
                };
                (id, op)
            })
            .collect();
        self.run_phase(&domain, "delete", deletes, bulk, failures)
    }

    fn run_phase<T: Clone>(
        &self,
        domain: &Domain,
        phase: &'static str,
        ops: Vec<(Ref, T)>,
        send: impl Fn(Vec<T>) -> BackendResult<()>,
        failures: &mut Failures,
    ) -> Result<()> {
        for chunk in ops.chunks(self.batch_size) {
            let Err(err) = send(chunk.iter().map(|(_, op)| op.clone()).collect()) else {
                continue;
            };
            let start = match &err {
                BackendError::BulkWrite { index, .. } => (*index).min(chunk.len()),
                _ => 0,
            };
            warn!(
                target: "facetdb::tx",
                domain = %domain,
                phase,
                size = chunk.len(),
                start,
                error = %err,
                "bulk write failed, retrying one operation at a time"
            );
            for (id, op) in &chunk[start..] {
                match send(vec![op.clone()]) {
                    Ok(()) => {}
                    Err(e) if e.is_transient() => return Err(e.into()),
                    Err(e) => failures.record(domain, phase, id, e),
                }
            }
        }
        debug!(target: "facetdb::tx", domain = %domain, phase, ops = ops.len(), "phase applied");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::TxCompiler;
    use facetdb_core::hierarchy::{ClassDef, ModelBuilder};
    use facetdb_core::update::UpdateOp;
    use facetdb_core::{ClassId, DocumentUpdate, Hierarchy, Timestamp, Tx, TxKind, DOC_CLASS};
    use facetdb_storage::MemoryBackend;
    use serde_json::json;

    fn model() -> Hierarchy {
        ModelBuilder::new()
            .class(ClassDef::class("t:class:Issue", DOC_CLASS).domain("task"))
            .build()
            .unwrap()
    }

    fn task() -> Domain {
        Domain::new("task")
    }

    fn seeded(n: usize) -> MemoryBackend {
        let b = MemoryBackend::new();
        let docs = (0..n)
            .map(|i| {
                Document::from_value(json!({
                    "_id": format!("i{}", i),
                    "_class": "t:class:Issue",
                    "title": "t",
                    "labels": []
                }))
                .unwrap()
            })
            .collect();
        b.insert_many(&task(), docs).unwrap();
        b.reset_call_counts();
        b
    }

    fn push(id: &str, field: &str) -> Tx {
        Tx::new(
            Ref::new("u1"),
            Timestamp::from_millis(7),
            Ref::new("sp"),
            TxKind::Update {
                object_id: Ref::new(id),
                object_class: ClassId::new("t:class:Issue"),
                operations: DocumentUpdate::Ops(vec![UpdateOp::Push {
                    field: field.into(),
                    values: vec![json!("x")],
                    position: None,
                }]),
                retrieve: false,
            },
        )
    }

    fn run(backend: &MemoryBackend, txs: &[Tx], batch_size: usize) -> Result<Vec<TxResult>> {
        let h = model();
        let batch = TxCompiler::new(&h).compile(txs)?;
        BatchExecutor::new(backend, batch_size).execute(batch, txs.len())
    }

    #[test]
    fn test_malformed_record_isolated() {
        let b = seeded(10);
        let txs: Vec<Tx> = (0..10)
            .map(|i| push(&format!("i{}", i), if i == 4 { "title" } else { "labels" }))
            .collect();
        let err = run(&b, &txs, 500).unwrap_err();
        assert_eq!(err.failed_ids(), &[Ref::new("i4")]);
        let applied = b
            .count(&task(), &Filter::new().with("labels", Condition::Size(1)))
            .unwrap();
        assert_eq!(applied, 9);
    }

    #[test]
    fn test_chunks_respect_batch_size() {
        let b = seeded(7);
        let txs: Vec<Tx> = (0..7).map(|i| push(&format!("i{}", i), "labels")).collect();
        run(&b, &txs, 3).unwrap();
        assert_eq!(b.call_counts().bulk_write, 3);
    }

    #[test]
    fn test_whole_batch_rejection_recovered_by_retry() {
        let b = seeded(3);
        b.faults().fail_next_bulk(1);
        let txs: Vec<Tx> = (0..3).map(|i| push(&format!("i{}", i), "labels")).collect();
        let results = run(&b, &txs, 500).unwrap();
        assert!(results.iter().all(|r| *r == TxResult::Applied));
        assert_eq!(b.count(&task(), &Filter::new().with("labels", Condition::Size(1))).unwrap(), 3);
    }

    #[test]
    fn test_transient_retry_failure_surfaces() {
        let b = seeded(2);
        b.faults().fail_next(2);
        let txs = vec![push("i0", "labels"), push("i1", "labels")];
        let err = run(&b, &txs, 500).unwrap_err();
        assert!(matches!(err, Error::Backend(BackendError::Transient(_))));
    }

    #[test]
    fn test_retrieve_returns_post_write_document() {
        let b = seeded(1);
        let mut tx = push("i0", "labels");
        if let TxKind::Update { retrieve, .. } = &mut tx.kind {
            *retrieve = true;
        }
        let results = run(&b, &[tx], 500).unwrap();
        let TxResult::Document(doc) = &results[0] else {
            panic!("expected document");
        };
        assert_eq!(doc["labels"], json!(["x"]));
        assert!(!doc.contains_key("%hash%"));
    }

    #[test]
    fn test_flat_retrieve_hydrated_after_write() {
        let b = seeded(1);
        let tx = Tx::new(
            Ref::new("u1"),
            Timestamp::from_millis(7),
            Ref::new("sp"),
            TxKind::Update {
                object_id: Ref::new("i0"),
                object_class: ClassId::new("t:class:Issue"),
                operations: DocumentUpdate::fields([("title", json!("new"))]),
                retrieve: true,
            },
        );
        let results = run(&b, &[tx], 500).unwrap();
        let TxResult::Document(doc) = &results[0] else {
            panic!("expected document");
        };
        assert_eq!(doc["title"], json!("new"));
        assert_eq!(doc["modifiedOn"], json!(7));
    }
}
