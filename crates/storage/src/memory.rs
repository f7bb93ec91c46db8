//! In-memory document backend
//!
//! A complete [`Backend`] over process memory, used for tests and embedded
//! deployments.
//!
//! # Design
//!
//! - DashMap of domains: domains never contend with each other
//! - Per-domain `RwLock<BTreeMap>`: documents iterate in `_id` order, which
//!   makes unsorted reads and `_id`-paged scans deterministic
//! - Collections are handed out as `Arc`s so no DashMap guard is held while a
//!   domain lock is taken (pipelines join across domains)
//!
//! # Atomicity
//!
//! Each single write is atomic: updates run against a copy of the document
//! and are committed only when every operator applied cleanly. Ordered bulk
//! writes hold the domain lock for the whole batch and stop at the first
//! failing operation; operations before it stay committed.

use crate::apply::apply_update;
use crate::matcher::{matches, values_equal};
use crate::pipeline::{project, run_pipeline, sort_documents};
use crate::testing::FaultInjector;
use dashmap::DashMap;
use facetdb_core::backend::{
    Backend, FindParams, IndexDirection, IndexSpec, Stage, WriteOp, WriteSummary,
};
use facetdb_core::path::{collect_path, set_path};
use facetdb_core::query::{Clause, Condition};
use facetdb_core::{fields, BackendError, BackendResult, Document, Domain, Filter, Ref, Update};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Name of the implicit primary-key index
pub const ID_INDEX: &str = "_id_";

type DocMap = BTreeMap<String, Document>;

#[derive(Debug, Default)]
struct Collection {
    docs: RwLock<DocMap>,
    indexes: RwLock<Vec<IndexSpec>>,
}

/// Number of backend calls made, by operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    /// `find` calls
    pub find: usize,
    /// `count` calls
    pub count: usize,
    /// `insert_many` calls
    pub insert: usize,
    /// `update_one`, `update_many` and `find_one_and_update` calls
    pub update: usize,
    /// `delete_many` calls
    pub delete: usize,
    /// `bulk_write` calls
    pub bulk_write: usize,
    /// `aggregate` calls
    pub aggregate: usize,
}

#[derive(Debug, Default)]
struct CallCounters {
    find: AtomicUsize,
    count: AtomicUsize,
    insert: AtomicUsize,
    update: AtomicUsize,
    delete: AtomicUsize,
    bulk_write: AtomicUsize,
    aggregate: AtomicUsize,
}

impl CallCounters {
    fn snapshot(&self) -> CallCounts {
        CallCounts {
            find: self.find.load(Ordering::Relaxed),
            count: self.count.load(Ordering::Relaxed),
            insert: self.insert.load(Ordering::Relaxed),
            update: self.update.load(Ordering::Relaxed),
            delete: self.delete.load(Ordering::Relaxed),
            bulk_write: self.bulk_write.load(Ordering::Relaxed),
            aggregate: self.aggregate.load(Ordering::Relaxed),
        }
    }

    fn reset(&self) {
        for c in [
            &self.find,
            &self.count,
            &self.insert,
            &self.update,
            &self.delete,
            &self.bulk_write,
            &self.aggregate,
        ] {
            c.store(0, Ordering::Relaxed);
        }
    }
}

/// Document backend held entirely in memory
#[derive(Debug, Default)]
pub struct MemoryBackend {
    collections: DashMap<Domain, Arc<Collection>>,
    faults: FaultInjector,
    calls: CallCounters,
}

impl MemoryBackend {
    /// Empty backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Fault switches for tests
    pub fn faults(&self) -> &FaultInjector {
        &self.faults
    }

    /// Calls made since creation or the last reset
    pub fn call_counts(&self) -> CallCounts {
        self.calls.snapshot()
    }

    /// Zero the call counters
    pub fn reset_call_counts(&self) {
        self.calls.reset();
    }

    fn existing(&self, domain: &Domain) -> Option<Arc<Collection>> {
        self.collections.get(domain).map(|c| Arc::clone(c.value()))
    }

    fn collection(&self, domain: &Domain) -> Arc<Collection> {
        Arc::clone(self.collections.entry(domain.clone()).or_default().value())
    }

    fn snapshot(&self, domain: &Domain) -> Vec<Document> {
        self.existing(domain)
            .map(|c| c.docs.read().values().cloned().collect())
            .unwrap_or_default()
    }
}

/// Identifiers of documents matching `filter`, in `_id` order
fn matching_keys(docs: &DocMap, filter: &Filter, first_only: bool) -> BackendResult<Vec<String>> {
    if let Some(id) = filter.single_id() {
        return Ok(docs.contains_key(id.as_str()).then(|| id.into_string()).into_iter().collect());
    }
    let mut out = Vec::new();
    for (key, doc) in docs {
        if matches(doc, filter)? {
            out.push(key.clone());
            if first_only {
                break;
            }
        }
    }
    Ok(out)
}

fn insert_doc(docs: &mut DocMap, doc: Document) -> BackendResult<()> {
    let id = doc
        .id()
        .ok_or_else(|| BackendError::Write("document without _id".into()))?
        .to_string();
    if docs.contains_key(&id) {
        return Err(BackendError::DuplicateKey(Ref::new(id)));
    }
    docs.insert(id, doc);
    Ok(())
}

/// Seed document for an upsert: the filter's top-level equality fields
fn upsert_seed(filter: &Filter) -> BackendResult<Document> {
    let mut doc = Document::default();
    for clause in filter.clauses() {
        if let Clause::Field { path, conditions } = clause {
            if let [Condition::Eq(v)] = conditions.as_slice() {
                set_path(&mut doc, path, v.clone())
                    .map_err(|e| BackendError::Write(e.to_string()))?;
            }
        }
    }
    if doc.id().is_none() {
        doc.insert(fields::ID.to_string(), Value::from(Ref::generate().into_string()));
    }
    Ok(doc)
}

fn update_keys(docs: &mut DocMap, keys: &[String], update: &Update) -> BackendResult<WriteSummary> {
    let mut staged = Vec::with_capacity(keys.len());
    for key in keys {
        if let Some(current) = docs.get(key) {
            let mut next = current.clone();
            apply_update(&mut next, update)?;
            staged.push((key.clone(), next));
        }
    }
    let mut summary = WriteSummary {
        matched: staged.len(),
        ..Default::default()
    };
    for (key, next) in staged {
        if docs.get(&key) != Some(&next) {
            summary.modified += 1;
        }
        docs.insert(key, next);
    }
    Ok(summary)
}

fn exec_update_one(
    docs: &mut DocMap,
    filter: &Filter,
    update: &Update,
    upsert: bool,
) -> BackendResult<WriteSummary> {
    let keys = matching_keys(docs, filter, true)?;
    if keys.is_empty() && upsert {
        let mut doc = upsert_seed(filter)?;
        apply_update(&mut doc, update)?;
        insert_doc(docs, doc)?;
        return Ok(WriteSummary {
            inserted: 1,
            ..Default::default()
        });
    }
    update_keys(docs, &keys, update)
}

fn exec_op(docs: &mut DocMap, op: WriteOp) -> BackendResult<WriteSummary> {
    match op {
        WriteOp::InsertOne(doc) => {
            insert_doc(docs, doc)?;
            Ok(WriteSummary {
                inserted: 1,
                ..Default::default()
            })
        }
        WriteOp::UpdateOne {
            filter,
            update,
            upsert,
        } => exec_update_one(docs, &filter, &update, upsert),
        WriteOp::UpdateMany { filter, update } => {
            let keys = matching_keys(docs, &filter, false)?;
            update_keys(docs, &keys, &update)
        }
        WriteOp::ReplaceOne {
            filter,
            replacement,
            upsert,
        } => {
            let keys = matching_keys(docs, &filter, true)?;
            match keys.into_iter().next() {
                Some(key) => {
                    let mut replacement = replacement;
                    replacement.insert(fields::ID.to_string(), Value::from(key.as_str()));
                    let modified = usize::from(docs.get(&key) != Some(&replacement));
                    docs.insert(key, replacement);
                    Ok(WriteSummary {
                        matched: 1,
                        modified,
                        ..Default::default()
                    })
                }
                None if upsert => {
                    insert_doc(docs, replacement)?;
                    Ok(WriteSummary {
                        inserted: 1,
                        ..Default::default()
                    })
                }
                None => Ok(WriteSummary::default()),
            }
        }
        WriteOp::DeleteOne { filter } => {
            let keys = matching_keys(docs, &filter, true)?;
            let deleted = keys.iter().filter(|k| docs.remove(*k).is_some()).count();
            Ok(WriteSummary {
                deleted,
                ..Default::default()
            })
        }
        WriteOp::DeleteMany { filter } => {
            let keys = matching_keys(docs, &filter, false)?;
            let deleted = keys.iter().filter(|k| docs.remove(*k).is_some()).count();
            Ok(WriteSummary {
                deleted,
                ..Default::default()
            })
        }
    }
}

impl Backend for MemoryBackend {
    fn find(
        &self,
        domain: &Domain,
        filter: &Filter,
        params: &FindParams,
    ) -> BackendResult<Vec<Document>> {
        self.calls.find.fetch_add(1, Ordering::Relaxed);
        self.faults.check("find")?;
        let Some(coll) = self.existing(domain) else {
            return Ok(Vec::new());
        };
        let mut out = {
            let docs = coll.docs.read();
            let keys = matching_keys(&docs, filter, false)?;
            keys.iter().filter_map(|k| docs.get(k).cloned()).collect::<Vec<_>>()
        };
        sort_documents(&mut out, &params.sort);
        if let Some(limit) = params.limit {
            out.truncate(limit);
        }
        if let Some(projection) = &params.projection {
            out = out.into_iter().map(|d| project(d, projection)).collect();
        }
        Ok(out)
    }

    fn count(&self, domain: &Domain, filter: &Filter) -> BackendResult<usize> {
        self.calls.count.fetch_add(1, Ordering::Relaxed);
        self.faults.check("count")?;
        match self.existing(domain) {
            None => Ok(0),
            Some(coll) => Ok(matching_keys(&coll.docs.read(), filter, false)?.len()),
        }
    }

    fn insert_many(&self, domain: &Domain, docs: Vec<Document>) -> BackendResult<usize> {
        self.calls.insert.fetch_add(1, Ordering::Relaxed);
        self.faults.check("insert_many")?;
        let coll = self.collection(domain);
        let mut map = coll.docs.write();
        let total = docs.len();
        for (index, doc) in docs.into_iter().enumerate() {
            insert_doc(&mut map, doc).map_err(|e| BackendError::BulkWrite {
                index,
                message: e.to_string(),
            })?;
        }
        Ok(total)
    }

    fn update_one(
        &self,
        domain: &Domain,
        filter: &Filter,
        update: &Update,
        upsert: bool,
    ) -> BackendResult<WriteSummary> {
        self.calls.update.fetch_add(1, Ordering::Relaxed);
        self.faults.check("update_one")?;
        let coll = self.collection(domain);
        let mut map = coll.docs.write();
        exec_update_one(&mut map, filter, update, upsert)
    }

    fn update_many(
        &self,
        domain: &Domain,
        filter: &Filter,
        update: &Update,
    ) -> BackendResult<WriteSummary> {
        self.calls.update.fetch_add(1, Ordering::Relaxed);
        self.faults.check("update_many")?;
        let Some(coll) = self.existing(domain) else {
            return Ok(WriteSummary::default());
        };
        let mut map = coll.docs.write();
        let keys = matching_keys(&map, filter, false)?;
        update_keys(&mut map, &keys, update)
    }

    fn find_one_and_update(
        &self,
        domain: &Domain,
        filter: &Filter,
        update: &Update,
    ) -> BackendResult<Option<Document>> {
        self.calls.update.fetch_add(1, Ordering::Relaxed);
        self.faults.check("find_one_and_update")?;
        let Some(coll) = self.existing(domain) else {
            return Ok(None);
        };
        let mut map = coll.docs.write();
        let Some(key) = matching_keys(&map, filter, true)?.into_iter().next() else {
            return Ok(None);
        };
        update_keys(&mut map, std::slice::from_ref(&key), update)?;
        Ok(map.get(&key).cloned())
    }

    fn delete_many(&self, domain: &Domain, filter: &Filter) -> BackendResult<usize> {
        self.calls.delete.fetch_add(1, Ordering::Relaxed);
        self.faults.check("delete_many")?;
        let Some(coll) = self.existing(domain) else {
            return Ok(0);
        };
        let mut map = coll.docs.write();
        exec_op(&mut map, WriteOp::DeleteMany { filter: filter.clone() }).map(|s| s.deleted)
    }

    fn bulk_write(&self, domain: &Domain, ops: Vec<WriteOp>) -> BackendResult<WriteSummary> {
        self.calls.bulk_write.fetch_add(1, Ordering::Relaxed);
        self.faults.check("bulk_write")?;
        self.faults.check_bulk()?;
        let coll = self.collection(domain);
        let mut map = coll.docs.write();
        let mut summary = WriteSummary::default();
        for (index, op) in ops.into_iter().enumerate() {
            match exec_op(&mut map, op) {
                Ok(s) => summary.merge(s),
                Err(e) => {
                    debug!(
                        target: "facetdb::storage",
                        domain = %domain,
                        index,
                        error = %e,
                        "bulk write stopped"
                    );
                    return Err(BackendError::BulkWrite {
                        index,
                        message: e.to_string(),
                    });
                }
            }
        }
        Ok(summary)
    }

    fn aggregate(&self, domain: &Domain, pipeline: &[Stage]) -> BackendResult<Vec<Document>> {
        self.calls.aggregate.fetch_add(1, Ordering::Relaxed);
        self.faults.check("aggregate")?;
        let docs = self.snapshot(domain);
        run_pipeline(docs, pipeline, |step| Ok(self.snapshot(&step.from)))
    }

    fn distinct(&self, domain: &Domain, field: &str) -> BackendResult<Vec<Value>> {
        self.faults.check("distinct")?;
        let mut out: Vec<Value> = Vec::new();
        for doc in self.snapshot(domain) {
            for v in collect_path(&doc, field) {
                let items: Vec<&Value> = match v {
                    Value::Array(items) => items.iter().collect(),
                    other => vec![other],
                };
                for item in items {
                    if !out.iter().any(|seen| values_equal(seen, item)) {
                        out.push(item.clone());
                    }
                }
            }
        }
        out.sort_by(crate::matcher::compare_values);
        Ok(out)
    }

    fn create_index(&self, domain: &Domain, spec: &IndexSpec) -> BackendResult<()> {
        self.faults.check("create_index")?;
        self.faults.check_index(&spec.name)?;
        let coll = self.collection(domain);
        let mut indexes = coll.indexes.write();
        match indexes.iter().find(|i| i.name == spec.name) {
            Some(existing) if existing == spec => Ok(()),
            Some(_) => Err(BackendError::Write(format!(
                "index '{}' already exists with different keys",
                spec.name
            ))),
            None => {
                indexes.push(spec.clone());
                Ok(())
            }
        }
    }

    fn drop_index(&self, domain: &Domain, name: &str) -> BackendResult<()> {
        self.faults.check("drop_index")?;
        if name == ID_INDEX {
            return Err(BackendError::Write("cannot drop the _id index".into()));
        }
        let coll = self
            .existing(domain)
            .ok_or_else(|| BackendError::Write(format!("index '{}' not found", name)))?;
        let mut indexes = coll.indexes.write();
        let before = indexes.len();
        indexes.retain(|i| i.name != name);
        if indexes.len() == before {
            return Err(BackendError::Write(format!("index '{}' not found", name)));
        }
        Ok(())
    }

    fn list_indexes(&self, domain: &Domain) -> BackendResult<Vec<IndexSpec>> {
        self.faults.check("list_indexes")?;
        let Some(coll) = self.existing(domain) else {
            return Ok(Vec::new());
        };
        let mut out = vec![IndexSpec {
            name: ID_INDEX.to_string(),
            keys: vec![(fields::ID.to_string(), IndexDirection::Asc)],
            sparse: false,
        }];
        out.extend(coll.indexes.read().iter().cloned());
        Ok(out)
    }

    fn domains(&self) -> BackendResult<Vec<Domain>> {
        self.faults.check("domains")?;
        let mut out: Vec<Domain> = self
            .collections
            .iter()
            .filter(|e| !e.value().docs.read().is_empty() || !e.value().indexes.read().is_empty())
            .map(|e| e.key().clone())
            .collect();
        out.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use facetdb_core::update::PushSpec;
    use serde_json::json;

    fn d(v: Value) -> Document {
        Document::from_value(v).unwrap()
    }

    fn task() -> Domain {
        Domain::new("task")
    }

    fn seeded() -> MemoryBackend {
        let b = MemoryBackend::new();
        b.insert_many(
            &task(),
            vec![
                d(json!({"_id": "a", "n": 1, "tags": []})),
                d(json!({"_id": "b", "n": 2, "tags": "scalar"})),
                d(json!({"_id": "c", "n": 3, "tags": []})),
            ],
        )
        .unwrap();
        b
    }

    fn push_tag(id: &str) -> WriteOp {
        let mut update = Update::new();
        update.push.push(PushSpec {
            path: "tags".into(),
            values: vec![json!("x")],
            position: None,
        });
        WriteOp::UpdateOne {
            filter: Filter::by_id(&Ref::new(id)),
            update,
            upsert: false,
        }
    }

    #[test]
    fn test_insert_duplicate_reports_index() {
        let b = seeded();
        let err = b
            .insert_many(&task(), vec![d(json!({"_id": "z"})), d(json!({"_id": "a"}))])
            .unwrap_err();
        assert!(matches!(err, BackendError::BulkWrite { index: 1, .. }));
        // The document before the failure is committed
        assert_eq!(b.count(&task(), &Filter::by_id(&Ref::new("z"))).unwrap(), 1);
    }

    #[test]
    fn test_bulk_stops_at_first_failure() {
        let b = seeded();
        let err = b
            .bulk_write(&task(), vec![push_tag("a"), push_tag("b"), push_tag("c")])
            .unwrap_err();
        assert!(matches!(err, BackendError::BulkWrite { index: 1, .. }));
        let docs = b.find(&task(), &Filter::new(), &FindParams::default()).unwrap();
        assert_eq!(docs[0]["tags"], json!(["x"]));
        assert_eq!(docs[1]["tags"], json!("scalar"));
        assert_eq!(docs[2]["tags"], json!([]));
    }

    #[test]
    fn test_find_sort_limit_projection() {
        let b = seeded();
        let params = FindParams {
            sort: vec![("n".into(), facetdb_core::Direction::Desc)],
            limit: Some(2),
            projection: Some(facetdb_core::Projection::default().include("n")),
        };
        let docs = b.find(&task(), &Filter::new(), &params).unwrap();
        assert_eq!(Value::from(docs[0].clone()), json!({"_id": "c", "n": 3}));
        assert_eq!(docs.len(), 2);
    }

    #[test]
    fn test_upsert_seeds_from_filter() {
        let b = MemoryBackend::new();
        let s = b
            .update_one(
                &task(),
                &Filter::by_id(&Ref::new("new")).eq("space", json!("s1")),
                &Update::new().set("n", json!(7)),
                true,
            )
            .unwrap();
        assert_eq!(s.inserted, 1);
        let doc = &b.find(&task(), &Filter::new(), &FindParams::default()).unwrap()[0];
        assert_eq!(Value::from(doc.clone()), json!({"_id": "new", "space": "s1", "n": 7}));
    }

    #[test]
    fn test_failed_update_leaves_document_untouched() {
        let b = seeded();
        let mut update = Update::new().set("n", json!(100));
        update.inc.insert("tags".into(), json!(1));
        assert!(b.update_one(&task(), &Filter::by_id(&Ref::new("b")), &update, false).is_err());
        let found = b
            .find(&task(), &Filter::by_id(&Ref::new("b")), &FindParams::default())
            .unwrap();
        let doc = &found[0];
        assert_eq!(doc["n"], json!(2));
    }

    #[test]
    fn test_find_one_and_update_returns_new_state() {
        let b = seeded();
        let doc = b
            .find_one_and_update(
                &task(),
                &Filter::by_id(&Ref::new("a")),
                &Update::new().set("n", json!(10)),
            )
            .unwrap()
            .unwrap();
        assert_eq!(doc["n"], json!(10));
    }

    #[test]
    fn test_indexes_and_domains() {
        let b = MemoryBackend::new();
        assert!(b.domains().unwrap().is_empty());
        b.create_index(&task(), &IndexSpec::on("space")).unwrap();
        b.create_index(&task(), &IndexSpec::on("space")).unwrap();
        let names: Vec<_> = b.list_indexes(&task()).unwrap().into_iter().map(|i| i.name).collect();
        assert_eq!(names, vec!["_id_", "space_1"]);
        assert!(b.drop_index(&task(), ID_INDEX).is_err());
        b.drop_index(&task(), "space_1").unwrap();
        assert!(b.drop_index(&task(), "space_1").is_err());
        assert!(b.domains().unwrap().is_empty());
    }

    #[test]
    fn test_outage_is_transient() {
        let b = seeded();
        b.faults().set_outage(true);
        let err = b.find(&task(), &Filter::new(), &FindParams::default()).unwrap_err();
        assert!(err.is_transient());
        b.faults().clear();
        assert_eq!(b.count(&task(), &Filter::new()).unwrap(), 3);
    }

    #[test]
    fn test_distinct_flattens_arrays() {
        let b = MemoryBackend::new();
        b.insert_many(
            &task(),
            vec![d(json!({"_id": "a", "l": ["x", "y"]})), d(json!({"_id": "b", "l": "y"}))],
        )
        .unwrap();
        assert_eq!(b.distinct(&task(), "l").unwrap(), vec![json!("x"), json!("y")]);
    }

    #[test]
    fn test_call_counts() {
        let b = seeded();
        b.reset_call_counts();
        b.find(&task(), &Filter::new(), &FindParams::default()).unwrap();
        b.aggregate(&task(), &[Stage::Limit(1)]).unwrap();
        let c = b.call_counts();
        assert_eq!((c.find, c.aggregate, c.bulk_write), (1, 1, 0));
    }
}
