//! Lookup resolution
//!
//! Expands a declarative [`Lookup`] into relations and attaches the related
//! documents under each result's `$lookup` object.
//!
//! # Planning
//!
//! [`LookupPlanner::plan`] walks the lookup tree recursively. Every
//! relation records where its targets live: a backend domain, or the
//! in-memory model partition (resolved against the hierarchy's model
//! documents, never the backend). Nesting deeper than the configured bound is
//! rejected, which also terminates self-referential lookups.
//!
//! # Strategies
//!
//! - **Post-fetch** ([`LookupPlanner::fill`]): after the primary read, one
//!   `find` per relation and level fetches every target at once. Used unless
//!   the predicate or sort references a `$lookup.` path.
//! - **Pipeline** ([`LookupPlanner::join_stages`] + [`LookupPlanner::reshape`]):
//!   the backend joins before filtering and sorting. Joined arrays land in
//!   flat result keys (`space_lookup_0`, `space_owner_lookup_1`,
//!   `comments_rlookup_2`) and are folded back into `$lookup` afterwards.
//!   The trailing ordinal is unique per plan, so keys stay distinct even
//!   when relation names contain `_`.
//!
//! # Attachment
//!
//! | Relation | 0 matches | 1 match | n matches |
//! |----------|-----------|---------|-----------|
//! | forward  | key absent | object | list |
//! | reverse  | `[]` | `[doc]` | list |
//!
//! Reverse results are restricted to the document classes descending from
//! the declared target. Nested results attach inside the parent's own
//! `$lookup`, not at the document root.

use facetdb_core::backend::{Backend, FindParams, JoinStep, Stage};
use facetdb_core::path::collect_path;
use facetdb_core::query::{Clause, Condition};
use facetdb_core::{
    fields, ClassId, Document, Domain, Error, Filter, Hierarchy, Lookup, Projection, Result,
    DOMAIN_MODEL,
};
use facetdb_storage::matcher::{matches, values_equal};
use serde_json::{Map, Value};

const LOOKUP_PREFIX: &str = "$lookup.";

/// Direction of a relation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    /// The document references the targets
    Forward,
    /// The targets reference the document
    Reverse,
}

/// Where a relation's targets are stored
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// A backend domain
    Backend(Domain),
    /// The in-memory model partition
    Model,
}

/// One planned relation
#[derive(Debug, Clone, PartialEq)]
pub struct Relation {
    /// Key under `$lookup`
    pub key: String,
    /// Forward or reverse
    pub kind: RelationKind,
    /// Declared target class
    pub class: ClassId,
    /// Field on the parent holding the join value
    pub local_field: String,
    /// Field on the targets holding the join value
    pub foreign_field: String,
    /// Target storage
    pub target: Target,
    /// Flat key receiving joined documents in pipeline mode
    pub result_key: String,
    /// `local_field` as seen from the pipeline root
    pub pipeline_local: String,
    /// Classes reverse results are restricted to
    pub accepted: Vec<Value>,
    /// Lookups on the targets
    pub nested: Vec<Relation>,
}

/// Whether `filter` or any sort path references a looked-up field
pub fn references_lookup<'a>(
    filter: &Filter,
    sort_paths: impl IntoIterator<Item = &'a str>,
) -> bool {
    filter.paths().iter().any(|p| p.starts_with(LOOKUP_PREFIX))
        || sort_paths.into_iter().any(|p| p.starts_with(LOOKUP_PREFIX))
}

fn clause_references_lookup(clause: &Clause) -> bool {
    match clause {
        Clause::Field { path, .. } => path.starts_with(LOOKUP_PREFIX),
        Clause::Or(fs) | Clause::And(fs) => {
            fs.iter().any(|f| f.clauses().iter().any(clause_references_lookup))
        }
    }
}

/// Split a filter into clauses evaluable before the joins and clauses that
/// need joined fields
pub fn split_filter(filter: Filter) -> (Filter, Filter) {
    let (post, pre): (Vec<Clause>, Vec<Clause>) = filter
        .into_clauses()
        .into_iter()
        .partition(clause_references_lookup);
    (pre.into_iter().collect(), post.into_iter().collect())
}

/// Join values reachable at `path`, array elements expanded
fn key_values(doc: &Map<String, Value>, path: &str) -> Vec<Value> {
    let mut out = Vec::new();
    for v in collect_path(doc, path) {
        match v {
            Value::Array(items) => out.extend(items.iter().filter(|i| !i.is_null()).cloned()),
            Value::Null => {}
            other => out.push(other.clone()),
        }
    }
    out
}

fn push_unique(out: &mut Vec<Value>, values: Vec<Value>) {
    for v in values {
        if !out.iter().any(|seen| values_equal(seen, &v)) {
            out.push(v);
        }
    }
}

/// Write `value` under `$lookup.<key>`; `None` writes nothing
fn attach(doc: &mut Map<String, Value>, key: &str, value: Option<Value>) {
    let slot = doc
        .entry(fields::LOOKUP.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if !slot.is_object() {
        *slot = Value::Object(Map::new());
    }
    if let (Value::Object(lookup), Some(value)) = (slot, value) {
        lookup.insert(key.to_string(), value);
    }
}

/// Flat pipeline key for a relation at `segments`, numbered by `ordinal`
fn flat_key(segments: &[&str], suffix: &str, ordinal: &mut usize) -> String {
    let key = format!("{}_{}_{}", segments.join("_"), suffix, ordinal);
    *ordinal += 1;
    key
}

fn collapse(mut found: Vec<Value>) -> Option<Value> {
    match found.len() {
        0 => None,
        1 => found.pop(),
        _ => Some(Value::Array(found)),
    }
}

/// Plans and resolves lookups over one hierarchy
#[derive(Debug, Clone, Copy)]
pub struct LookupPlanner<'h> {
    hierarchy: &'h Hierarchy,
    max_depth: usize,
}

impl<'h> LookupPlanner<'h> {
    /// Planner accepting at most `max_depth` nesting levels
    pub fn new(hierarchy: &'h Hierarchy, max_depth: usize) -> Self {
        LookupPlanner { hierarchy, max_depth }
    }

    /// Resolve the lookup for documents of `class`
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidInput`] when nesting exceeds the depth bound
    /// - [`Error::Model`] for unknown target classes
    pub fn plan(&self, class: &ClassId, lookup: &Lookup) -> Result<Vec<Relation>> {
        let mut ordinal = 0;
        self.plan_level(class, lookup, &[], None, 1, &mut ordinal)
    }

    fn target_of(&self, class: &ClassId) -> Result<Target> {
        let domain = self.hierarchy.domain_of(class)?;
        Ok(if domain.as_str() == DOMAIN_MODEL {
            Target::Model
        } else {
            Target::Backend(domain)
        })
    }

    fn plan_level(
        &self,
        class: &ClassId,
        lookup: &Lookup,
        prefix: &[&str],
        parent_result: Option<&str>,
        depth: usize,
        ordinal: &mut usize,
    ) -> Result<Vec<Relation>> {
        if depth > self.max_depth {
            return Err(Error::invalid_input(format!(
                "lookup nesting exceeds {} levels at '{}'",
                self.max_depth,
                prefix.join(".")
            )));
        }
        let pipeline_path = |field: &str| match parent_result {
            Some(parent) => format!("{}.{}", parent, field),
            None => field.to_string(),
        };
        let mut out = Vec::with_capacity(lookup.forward.len() + lookup.reverse.len());
        for (key, forward) in &lookup.forward {
            let local_field = crate::query::qualify_path(self.hierarchy, class, key);
            let mut segments = prefix.to_vec();
            segments.push(key);
            let result_key = flat_key(&segments, "lookup", ordinal);
            let nested = match &forward.nested {
                Some(nested) => self.plan_level(
                    &forward.class,
                    nested,
                    &segments,
                    Some(result_key.as_str()),
                    depth + 1,
                    ordinal,
                )?,
                None => Vec::new(),
            };
            out.push(Relation {
                key: key.clone(),
                kind: RelationKind::Forward,
                class: forward.class.clone(),
                pipeline_local: pipeline_path(&local_field),
                local_field,
                foreign_field: fields::ID.to_string(),
                target: self.target_of(&forward.class)?,
                result_key,
                accepted: Vec::new(),
                nested,
            });
        }
        for (key, reverse) in &lookup.reverse {
            let mut segments = prefix.to_vec();
            segments.push(key);
            let accepted = self
                .hierarchy
                .document_descendants_of(&reverse.class)?
                .into_iter()
                .map(|c| Value::from(c.into_string()))
                .collect();
            out.push(Relation {
                key: key.clone(),
                kind: RelationKind::Reverse,
                class: reverse.class.clone(),
                local_field: fields::ID.to_string(),
                pipeline_local: pipeline_path(fields::ID),
                foreign_field: reverse.attribute.clone(),
                target: self.target_of(&reverse.class)?,
                result_key: flat_key(&segments, "rlookup", ordinal),
                accepted,
                nested: Vec::new(),
            });
        }
        Ok(out)
    }

    // ========================================================================
    // Post-fetch strategy
    // ========================================================================

    /// Fetch and attach every relation onto `docs`
    pub fn fill(
        &self,
        backend: &dyn Backend,
        relations: &[Relation],
        docs: &mut [Document],
    ) -> Result<()> {
        if relations.is_empty() {
            return Ok(());
        }
        for rel in relations {
            let mut wanted = Vec::new();
            for doc in docs.iter() {
                push_unique(&mut wanted, key_values(doc, &rel.local_field));
            }
            let mut candidates = if wanted.is_empty() {
                Vec::new()
            } else {
                self.fetch(backend, rel, wanted)?
            };
            self.fill(backend, &rel.nested, &mut candidates)?;
            for doc in docs.iter_mut() {
                let value = self.select(rel, doc, &candidates);
                attach(doc, &rel.key, value);
            }
        }
        Ok(())
    }

    fn fetch(
        &self,
        backend: &dyn Backend,
        rel: &Relation,
        wanted: Vec<Value>,
    ) -> Result<Vec<Document>> {
        let mut filter = Filter::new().with(rel.foreign_field.clone(), Condition::In(wanted));
        if rel.kind == RelationKind::Reverse {
            filter = filter.with(fields::CLASS, Condition::In(rel.accepted.clone()));
        }
        match &rel.target {
            Target::Backend(domain) => {
                let params = FindParams {
                    projection: Some(Projection::default().exclude(fields::HASH)),
                    ..Default::default()
                };
                Ok(backend.find(domain, &filter, &params)?)
            }
            Target::Model => {
                let mut out = Vec::new();
                for doc in self.hierarchy.model_documents() {
                    if matches(doc, &filter)? {
                        out.push(doc.clone());
                    }
                }
                Ok(out)
            }
        }
    }

    /// Lookup value for one parent, from the candidate pool
    fn select(
        &self,
        rel: &Relation,
        parent: &Map<String, Value>,
        candidates: &[Document],
    ) -> Option<Value> {
        match rel.kind {
            RelationKind::Forward => {
                let mut found = Vec::new();
                for id in key_values(parent, &rel.local_field) {
                    if let Some(c) = candidates
                        .iter()
                        .find(|c| c.get(fields::ID).map_or(false, |cid| values_equal(cid, &id)))
                    {
                        found.push(Value::from(c.clone()));
                    }
                }
                collapse(found)
            }
            RelationKind::Reverse => {
                let Some(id) = parent.get(fields::ID) else {
                    return Some(Value::Array(Vec::new()));
                };
                let found = candidates
                    .iter()
                    .filter(|c| {
                        c.get(fields::CLASS)
                            .map_or(false, |cls| rel.accepted.iter().any(|a| a == cls))
                            && key_values(c, &rel.foreign_field).iter().any(|v| values_equal(v, id))
                    })
                    .map(|c| Value::from(c.clone()))
                    .collect();
                Some(Value::Array(found))
            }
        }
    }

    // ========================================================================
    // Pipeline strategy
    // ========================================================================

    /// Join stages for every backend-stored relation, parents first
    pub fn join_stages(&self, relations: &[Relation]) -> Vec<Stage> {
        let mut out = Vec::new();
        for rel in relations {
            let Target::Backend(domain) = &rel.target else {
                continue;
            };
            out.push(Stage::Lookup(JoinStep {
                from: domain.clone(),
                local_field: rel.pipeline_local.clone(),
                foreign_field: rel.foreign_field.clone(),
                result_key: rel.result_key.clone(),
            }));
            out.extend(self.join_stages(&rel.nested));
        }
        out
    }

    /// Flat result keys the join stages write
    pub fn result_keys(&self, relations: &[Relation]) -> Vec<String> {
        let mut out = Vec::new();
        for rel in relations {
            if let Target::Backend(_) = rel.target {
                out.push(rel.result_key.clone());
                out.extend(self.result_keys(&rel.nested));
            }
        }
        out
    }

    /// Rewrite a `$lookup.` path to the flat pipeline path
    ///
    /// `$lookup.space.name` becomes `space_lookup_0.name`; nested relations are
    /// addressed through their parent's `$lookup`
    /// (`$lookup.space.$lookup.owner.name`). Other paths are returned as is.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidInput`] for an unknown relation or one resolved
    /// against the model partition.
    pub fn rewrite_path(&self, relations: &[Relation], path: &str) -> Result<String> {
        let Some(rest) = path.strip_prefix(LOOKUP_PREFIX) else {
            return Ok(path.to_string());
        };
        let mut level = relations;
        let mut remainder = rest;
        loop {
            let (key, tail) = match remainder.split_once('.') {
                Some((k, t)) => (k, Some(t)),
                None => (remainder, None),
            };
            let rel = level
                .iter()
                .find(|r| r.key == key)
                .ok_or_else(|| {
                    Error::invalid_input(format!(
                        "'{}' references an unknown lookup '{}'",
                        path, key
                    ))
                })?;
            if rel.target == Target::Model {
                return Err(Error::invalid_input(format!(
                    "'{}' references model lookup '{}', which cannot be filtered or sorted on",
                    path, key
                )));
            }
            match tail.and_then(|t| t.strip_prefix(LOOKUP_PREFIX)) {
                Some(deeper) => {
                    level = &rel.nested;
                    remainder = deeper;
                }
                None => {
                    return Ok(match tail {
                        Some(t) => format!("{}.{}", rel.result_key, t),
                        None => rel.result_key.clone(),
                    })
                }
            }
        }
    }

    /// Rewrite every `$lookup.` path of a filter
    pub fn rewrite_filter(&self, relations: &[Relation], filter: Filter) -> Result<Filter> {
        let mut out = Filter::new();
        for clause in filter.into_clauses() {
            out.push(match clause {
                Clause::Field { path, conditions } => Clause::Field {
                    path: self.rewrite_path(relations, &path)?,
                    conditions,
                },
                Clause::Or(fs) => Clause::Or(
                    fs.into_iter()
                        .map(|f| self.rewrite_filter(relations, f))
                        .collect::<Result<_>>()?,
                ),
                Clause::And(fs) => Clause::And(
                    fs.into_iter()
                        .map(|f| self.rewrite_filter(relations, f))
                        .collect::<Result<_>>()?,
                ),
            });
        }
        Ok(out)
    }

    /// Fold joined arrays into `$lookup` and resolve model relations
    pub fn reshape(
        &self,
        backend: &dyn Backend,
        relations: &[Relation],
        docs: &mut [Document],
    ) -> Result<()> {
        let keys = self.result_keys(relations);
        for doc in docs.iter_mut() {
            let mut pools: Map<String, Value> = Map::new();
            for key in &keys {
                if let Some(v) = doc.remove(key) {
                    pools.insert(key.clone(), v);
                }
            }
            self.attach_from_pools(backend, relations, doc, &pools)?;
        }
        Ok(())
    }

    fn attach_from_pools(
        &self,
        backend: &dyn Backend,
        relations: &[Relation],
        parent: &mut Document,
        pools: &Map<String, Value>,
    ) -> Result<()> {
        for rel in relations {
            if rel.target == Target::Model {
                self.fill(backend, std::slice::from_ref(rel), std::slice::from_mut(parent))?;
                continue;
            }
            let mut candidates: Vec<Document> = match pools.get(&rel.result_key) {
                Some(Value::Array(items)) => {
                    items.iter().cloned().filter_map(Document::from_value).collect()
                }
                _ => Vec::new(),
            };
            for candidate in candidates.iter_mut() {
                self.attach_from_pools(backend, &rel.nested, candidate, pools)?;
                candidate.remove(fields::HASH);
            }
            let value = self.select(rel, parent, &candidates);
            attach(parent, &rel.key, value);
        }
        Ok(())
    }
}
