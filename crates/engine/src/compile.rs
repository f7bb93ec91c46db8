//! Transaction bulk compiler
//!
//! Turns an ordered transaction batch into per-domain write groups. Each
//! group is applied by the executor in this order:
//!
//! 1. `inserts`: created documents, hash nulled
//! 2. `field_sets`: flat updates compacted per identifier
//! 3. `bulk`: operator updates, in transaction order
//! 4. `reads`: read-after-write fetches for `retrieve` results
//! 5. `raw`: read-modify-return updates
//! 6. `deletes`: always last, so a removed document is never resurrected
//!
//! Per-identifier order survives the bucketing: a flat update for an
//! identifier with pending bulk operations joins the bulk list, and an
//! operator update first moves a pending field-set for its identifier into
//! the bulk list.
//!
//! `$move` becomes a pull followed by a positional push. The two writes are
//! not atomic; a concurrent reader may observe the array without the moved
//! element.

use facetdb_core::backend::WriteOp;
use facetdb_core::path::set_path;
use facetdb_core::update::{ArrayFilter, PullMatcher, PullSpec, PushSpec, UpdateOp};
use facetdb_core::{
    fields, ClassId, Document, DocumentUpdate, Domain, Filter, Hierarchy, Ref, Result, Tx, TxKind,
    Update, DOMAIN_MODEL,
};
use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::{Map, Value};
use tracing::debug;

/// Identifier of the element filter used by range updates
const ELEMENT: &str = "element";

/// Update with read-back of the post-write document
#[derive(Debug, Clone, PartialEq)]
pub struct RawUpdate {
    /// Position of the requesting transaction in the batch
    pub tx_index: usize,
    /// Target document
    pub id: Ref,
    /// Modification
    pub update: Update,
}

/// Writes of one domain, in application order
#[derive(Debug, Clone, PartialEq)]
pub struct DomainGroup {
    /// Target domain
    pub domain: Domain,
    /// Documents to insert
    pub inserts: Vec<(Ref, Document)>,
    /// Compacted flat updates
    pub field_sets: Vec<(Ref, Map<String, Value>)>,
    /// Ordered bulk operations
    pub bulk: Vec<(Ref, WriteOp)>,
    /// `(tx_index, id)` pairs hydrated after the bulk phase
    pub reads: Vec<(usize, Ref)>,
    /// Read-modify-return updates
    pub raw: Vec<RawUpdate>,
    /// Documents to delete
    pub deletes: Vec<Ref>,
}

impl DomainGroup {
    /// Empty group for `domain`
    pub fn new(domain: Domain) -> Self {
        DomainGroup {
            domain,
            inserts: Vec::new(),
            field_sets: Vec::new(),
            bulk: Vec::new(),
            reads: Vec::new(),
            raw: Vec::new(),
            deletes: Vec::new(),
        }
    }

    /// Number of backend writes in the group
    pub fn write_count(&self) -> usize {
        self.inserts.len()
            + self.field_sets.len()
            + self.bulk.len()
            + self.raw.len()
            + self.deletes.len()
    }
}

/// Result of compiling one batch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompiledBatch {
    /// Groups in order of first appearance of their domain
    pub groups: Vec<DomainGroup>,
    /// Transactions targeting the model partition
    pub ignored: Vec<usize>,
}

struct Staged {
    id: Ref,
    op: WriteOp,
    retrieve: Option<usize>,
}

struct GroupBuilder {
    group: DomainGroup,
    field_index: FxHashMap<Ref, usize>,
    bulk: Vec<Staged>,
    bulk_ids: FxHashSet<Ref>,
}

impl GroupBuilder {
    fn new(domain: Domain) -> Self {
        GroupBuilder {
            group: DomainGroup::new(domain),
            field_index: FxHashMap::default(),
            bulk: Vec::new(),
            bulk_ids: FxHashSet::default(),
        }
    }

    fn merge_fields(&mut self, id: &Ref, set: Map<String, Value>) {
        if self.bulk_ids.contains(id) {
            self.push_bulk(id, update_by_id(id, Update::from_set(set)), None);
            return;
        }
        let slot = match self.field_index.get(id) {
            Some(&slot) => slot,
            None => {
                self.group.field_sets.push((id.clone(), Map::new()));
                self.field_index.insert(id.clone(), self.group.field_sets.len() - 1);
                self.group.field_sets.len() - 1
            }
        };
        let target = &mut self.group.field_sets[slot].1;
        for (key, value) in set {
            merge_field(target, key, value);
        }
    }

    fn push_bulk(&mut self, id: &Ref, op: WriteOp, retrieve: Option<usize>) {
        if let Some(slot) = self.field_index.remove(id) {
            let pending = std::mem::take(&mut self.group.field_sets[slot].1);
            self.bulk.push(Staged {
                id: id.clone(),
                op: update_by_id(id, Update::from_set(pending)),
                retrieve: None,
            });
        }
        self.bulk_ids.insert(id.clone());
        self.bulk.push(Staged {
            id: id.clone(),
            op,
            retrieve,
        });
    }

    fn finish(mut self) -> DomainGroup {
        self.group.field_sets.retain(|(_, set)| !set.is_empty());
        let staged = std::mem::take(&mut self.bulk);
        for (n, entry) in staged.iter().enumerate() {
            let last_for_id = !staged[n + 1..].iter().any(|later| later.id == entry.id);
            match (entry.retrieve, &entry.op) {
                (Some(tx_index), WriteOp::UpdateOne { update, .. }) if last_for_id => {
                    self.group.raw.push(RawUpdate {
                        tx_index,
                        id: entry.id.clone(),
                        update: update.clone(),
                    });
                    continue;
                }
                (Some(tx_index), _) => self.group.reads.push((tx_index, entry.id.clone())),
                (None, _) => {}
            }
            self.group.bulk.push((entry.id.clone(), entry.op.clone()));
        }
        self.group
    }
}

fn update_by_id(id: &Ref, update: Update) -> WriteOp {
    WriteOp::UpdateOne {
        filter: Filter::by_id(id),
        update,
        upsert: false,
    }
}

/// Fold `key = value` into a compacted field-set
///
/// A later parent path replaces earlier child paths; a later child path is
/// written into an earlier parent value.
fn merge_field(target: &mut Map<String, Value>, key: String, value: Value) {
    let parent = target
        .keys()
        .find(|existing| key.len() > existing.len() && paths_overlap(&key, existing))
        .cloned();
    if let Some(parent) = parent {
        let rest = &key[parent.len() + 1..];
        let slot = target.entry(parent).or_insert(Value::Null);
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        if let Value::Object(obj) = slot {
            if let Err(e) = set_path(obj, rest, value) {
                debug!(target: "facetdb::tx", key = %key, error = %e, "field-set merge skipped");
            }
        }
        return;
    }
    let child_prefix = format!("{}.", key);
    target.retain(|existing, _| !existing.starts_with(&child_prefix));
    target.insert(key, value);
}

/// Metadata every modification writes
fn touch(tx: &Tx) -> Map<String, Value> {
    let mut set = Map::new();
    set.insert(fields::MODIFIED_BY.to_string(), Value::from(tx.modified_by.as_str()));
    set.insert(fields::MODIFIED_ON.to_string(), Value::from(tx.modified_on));
    set.insert(fields::HASH.to_string(), Value::Null);
    set
}

/// Paths a plain operator writes
fn op_paths(op: &UpdateOp) -> Vec<&str> {
    match op {
        UpdateOp::Set(map) | UpdateOp::Inc(map) => map.keys().map(String::as_str).collect(),
        UpdateOp::Unset(paths) => paths.iter().map(String::as_str).collect(),
        UpdateOp::Push { field, .. }
        | UpdateOp::Pull { field, .. }
        | UpdateOp::Move { field, .. }
        | UpdateOp::RangeUpdate { field, .. } => vec![field.as_str()],
    }
}

/// Whether `a` and `b` name the same field or one contains the other
fn paths_overlap(a: &str, b: &str) -> bool {
    let (short, long) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    long.starts_with(short) && (long.len() == short.len() || long.as_bytes()[short.len()] == b'.')
}

/// Expand operator deltas into ordered backend updates
///
/// Plain operators accumulate into one update until an operator touches a
/// path already written by the pending update; that closes the update so
/// the backend applies the two in list order. `Move` and `RangeUpdate`
/// close the current update and emit their own two-step expansion. The last
/// emitted update always carries the metadata touch.
pub fn expand_ops(ops: &[UpdateOp], meta: &Map<String, Value>) -> Vec<Update> {
    let mut out = Vec::new();
    let mut current = Update::new();
    let mut touched: Vec<&str> = Vec::new();
    for op in ops {
        let paths = op_paths(op);
        let conflicts = paths.iter().any(|p| touched.iter().any(|t| paths_overlap(p, t)));
        if conflicts && !current.is_empty() {
            out.push(std::mem::take(&mut current));
            touched.clear();
        }
        touched.extend(paths);
        match op {
            UpdateOp::Set(set) => current.set.extend(set.clone()),
            UpdateOp::Unset(paths) => current.unset.extend(paths.iter().cloned()),
            UpdateOp::Inc(inc) => current.inc.extend(inc.clone()),
            UpdateOp::Push {
                field,
                values,
                position,
            } => current.push.push(PushSpec {
                path: field.clone(),
                values: values.clone(),
                position: *position,
            }),
            UpdateOp::Pull { field, matcher } => current.pull.push(PullSpec {
                path: field.clone(),
                matcher: matcher.clone(),
            }),
            UpdateOp::Move {
                field,
                value,
                position,
            } => {
                if !current.is_empty() {
                    out.push(std::mem::take(&mut current));
                }
                touched.clear();
                out.push(Update {
                    pull: vec![PullSpec {
                        path: field.clone(),
                        matcher: PullMatcher::Value(value.clone()),
                    }],
                    ..Default::default()
                });
                let mut push = Update::from_set(meta.clone());
                push.push.push(PushSpec {
                    path: field.clone(),
                    values: vec![value.clone()],
                    position: Some(*position),
                });
                out.push(push);
            }
            UpdateOp::RangeUpdate { field, query, update } => {
                if !current.is_empty() {
                    out.push(std::mem::take(&mut current));
                }
                touched.clear();
                let mut scoped = Update::new();
                for (k, v) in update {
                    scoped.set.insert(format!("{}.$[{}].{}", field, ELEMENT, k), v.clone());
                }
                scoped.array_filters.push(ArrayFilter {
                    ident: ELEMENT.to_string(),
                    filter: query
                        .iter()
                        .fold(Filter::new(), |f, (k, v)| f.eq(k.clone(), v.clone())),
                });
                out.push(scoped);
                out.push(Update::from_set(meta.clone()));
            }
        }
    }
    if !current.is_empty() || out.is_empty() {
        current.set.extend(meta.clone());
        out.push(current);
    }
    out
}

/// Compiles transaction batches against one hierarchy
#[derive(Debug, Clone, Copy)]
pub struct TxCompiler<'h> {
    hierarchy: &'h Hierarchy,
}

impl<'h> TxCompiler<'h> {
    /// Compiler over `hierarchy`
    pub fn new(hierarchy: &'h Hierarchy) -> Self {
        TxCompiler { hierarchy }
    }

    fn domain_for(&self, class: &ClassId) -> Result<Option<Domain>> {
        let domain = self.hierarchy.domain_of(class)?;
        Ok((domain.as_str() != DOMAIN_MODEL).then_some(domain))
    }

    /// Compile an ordered batch
    ///
    /// # Errors
    ///
    /// [`ModelError`](facetdb_core::ModelError) when a transaction names an
    /// unknown class. Nothing is compiled in that case.
    pub fn compile(&self, txs: &[Tx]) -> Result<CompiledBatch> {
        let mut builders: Vec<GroupBuilder> = Vec::new();
        let mut ignored = Vec::new();

        for (tx_index, tx) in txs.iter().enumerate() {
            let tx = tx.clone().unwrap_collection();
            let Some(domain) = self.domain_for(tx.object_class())? else {
                ignored.push(tx_index);
                continue;
            };
            let slot = match builders.iter().position(|b| b.group.domain == domain) {
                Some(slot) => slot,
                None => {
                    builders.push(GroupBuilder::new(domain));
                    builders.len() - 1
                }
            };
            let builder = &mut builders[slot];
            let meta = touch(&tx);

            match &tx.kind {
                TxKind::Create {
                    object_id,
                    object_class,
                    attributes,
                } => {
                    let mut doc = Document::new(object_id, object_class, &tx.object_space);
                    for (k, v) in attributes {
                        doc.entry(k.clone()).or_insert_with(|| v.clone());
                    }
                    doc.insert(fields::MODIFIED_ON.to_string(), Value::from(tx.modified_on));
                    doc.insert(
                        fields::MODIFIED_BY.to_string(),
                        Value::from(tx.modified_by.as_str()),
                    );
                    doc.entry(fields::CREATED_ON.to_string())
                        .or_insert_with(|| Value::from(tx.modified_on));
                    doc.entry(fields::CREATED_BY.to_string())
                        .or_insert_with(|| Value::from(tx.modified_by.as_str()));
                    doc.insert(fields::HASH.to_string(), Value::Null);
                    builder.group.inserts.push((object_id.clone(), doc));
                }
                TxKind::Update {
                    object_id,
                    operations,
                    retrieve,
                    ..
                } => {
                    let retrieve = retrieve.then_some(tx_index);
                    match operations {
                        DocumentUpdate::Fields(set) => {
                            let mut set = set.clone();
                            set.extend(meta);
                            builder.merge_fields(object_id, set);
                            if let Some(tx_index) = retrieve {
                                builder.group.reads.push((tx_index, object_id.clone()));
                            }
                        }
                        DocumentUpdate::Ops(ops) => {
                            let updates = expand_ops(ops, &meta);
                            let last = updates.len() - 1;
                            for (n, update) in updates.into_iter().enumerate() {
                                let marker = if n == last { retrieve } else { None };
                                let op = update_by_id(object_id, update);
                                builder.push_bulk(object_id, op, marker);
                            }
                        }
                    }
                }
                TxKind::Mixin {
                    object_id,
                    mixin,
                    attributes,
                    ..
                } => match attributes.prefixed(mixin.as_str()) {
                    DocumentUpdate::Fields(mut set) => {
                        if set.is_empty() {
                            set.insert(
                                format!("{}.{}", mixin, fields::MIXIN_SENTINEL),
                                Value::from("true"),
                            );
                        }
                        set.extend(meta);
                        builder.merge_fields(object_id, set);
                    }
                    DocumentUpdate::Ops(ops) => {
                        for update in expand_ops(&ops, &meta) {
                            builder.push_bulk(object_id, update_by_id(object_id, update), None);
                        }
                    }
                },
                TxKind::Remove { object_id, .. } => builder.group.deletes.push(object_id.clone()),
                TxKind::Collection { .. } => {}
            }
        }

        let groups: Vec<DomainGroup> = builders.into_iter().map(GroupBuilder::finish).collect();
        for g in &groups {
            debug!(
                target: "facetdb::tx",
                domain = %g.domain,
                inserts = g.inserts.len(),
                field_sets = g.field_sets.len(),
                bulk = g.bulk.len(),
                reads = g.reads.len(),
                raw = g.raw.len(),
                deletes = g.deletes.len(),
                "compiled domain group"
            );
        }
        Ok(CompiledBatch { groups, ignored })
    }
}
