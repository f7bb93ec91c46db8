//! DocumentAdapter struct and open/close logic
//!
//! This module provides the adapter facade that orchestrates:
//! - Query translation and lookup resolution for reads
//! - Bulk compilation and batched execution of transactions
//! - Hash iteration, raw administrative access and index management
//! - Admission control through the governor
//!
//! ## Admission
//!
//! Reads (`find_all`, `count`, `load`, `group_by`, `raw_find_all`) hold a
//! find permit for their duration; writes (`apply_transactions`, `upload`,
//! `clean`, `raw_update`, `raw_delete_many`) hold a tx permit. Permits are
//! released on every exit path, errors included.

use crate::compile::{CompiledBatch, DomainGroup, TxCompiler};
use crate::config::AdapterConfig;
use crate::execute::{BatchExecutor, TxResult};
use crate::hash::HashIterator;
use crate::index::{self, IndexReport};
use crate::lookup::{references_lookup, split_filter, LookupPlanner, Relation, RelationKind};
use crate::query::QueryTranslator;
use crate::sort::{is_id_fast_path, plan_projection, plan_sort, SortPlan};
use facetdb_concurrency::{Governor, GovernorStats};
use facetdb_core::backend::{Backend, Expr, FindParams, IndexSpec, Stage, WriteOp};
use facetdb_core::hierarchy::ClassKind;
use facetdb_core::{
    fields, ClassId, Clock, Document, Domain, Error, Filter, FindOptions, Hierarchy, Projection,
    Ref, Result, SystemClock, Tx, Update, WriteSummary, DOMAIN_MODEL,
};
use facetdb_storage::matcher::matches;
use facetdb_storage::pipeline::run_pipeline;
use facetdb_storage::MemoryBackend;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

const COUNT_FIELD: &str = "count";

/// Documents returned by [`DocumentAdapter::find_all`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindResult {
    /// Matching documents, sorted and limited
    pub docs: Vec<Document>,
    /// Number of matches ignoring the limit, when requested
    pub total: Option<usize>,
}

/// Transactional document-store adapter
///
/// Create one with [`DocumentAdapter::open`]. All methods take `&self`; the
/// adapter is meant to be shared across threads behind an `Arc`.
///
/// # Example
///
/// ```
/// use facetdb_core::hierarchy::{ClassDef, ModelBuilder};
/// use facetdb_core::{ClassId, Filter, FindOptions, DOC_CLASS};
/// use facetdb_engine::DocumentAdapter;
///
/// let model = ModelBuilder::new()
///     .class(ClassDef::class("task:class:Issue", DOC_CLASS).domain("task"))
///     .build()
///     .unwrap();
/// let adapter = DocumentAdapter::in_memory(model).unwrap();
/// let found = adapter
///     .find_all(&ClassId::new("task:class:Issue"), &Filter::new(), &FindOptions::default())
///     .unwrap();
/// assert!(found.docs.is_empty());
/// ```
pub struct DocumentAdapter {
    backend: Arc<dyn Backend>,
    hierarchy: Arc<Hierarchy>,
    config: AdapterConfig,
    clock: Arc<dyn Clock>,
    governor: Governor,
}

impl std::fmt::Debug for DocumentAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentAdapter")
            .field("config", &self.config)
            .field("governor", &self.governor.stats())
            .finish_non_exhaustive()
    }
}

impl DocumentAdapter {
    /// Open an adapter over `backend`
    ///
    /// # Flow
    ///
    /// 1. Validate the configuration
    /// 2. Build the admission gates from its capacities
    /// 3. Return the ready adapter
    ///
    /// No backend call is made; indexes are set up separately with
    /// [`init_indexes`](Self::init_indexes).
    ///
    /// # Errors
    ///
    /// [`Error::Config`] for an invalid configuration.
    pub fn open(
        backend: Arc<dyn Backend>,
        hierarchy: Arc<Hierarchy>,
        config: AdapterConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        let governor = Governor::new(config.governor());
        info!(
            target: "facetdb::adapter",
            find_concurrency = config.find_concurrency,
            tx_concurrency = config.tx_concurrency,
            classes = hierarchy.classes().count(),
            "adapter opened"
        );
        Ok(DocumentAdapter {
            backend,
            hierarchy,
            config,
            clock,
            governor,
        })
    }

    /// Adapter over a fresh [`MemoryBackend`] with default configuration
    pub fn in_memory(hierarchy: Hierarchy) -> Result<Self> {
        Self::open(
            Arc::new(MemoryBackend::new()),
            Arc::new(hierarchy),
            AdapterConfig::default(),
            Arc::new(SystemClock),
        )
    }

    /// The model this adapter resolves classes against
    pub fn hierarchy(&self) -> &Hierarchy {
        &self.hierarchy
    }

    /// Active configuration
    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    /// Admission gate counters
    pub fn stats(&self) -> GovernorStats {
        self.governor.stats()
    }

    /// Close the admission gates, waiting for in-flight calls
    ///
    /// Returns `true` on the first call. Later calls of any method fail with
    /// [`Error::Closed`]. Must not be called from inside an adapter call.
    pub fn close(&self) -> bool {
        let first = self.governor.close();
        if first {
            info!(target: "facetdb::adapter", "adapter closed");
        }
        first
    }

    /// Whether [`close`](Self::close) has been called
    pub fn is_closed(&self) -> bool {
        self.governor.is_closed()
    }

    fn class_domain(&self, class: &ClassId, requested: Option<&Domain>) -> Result<Domain> {
        match requested {
            Some(domain) => Ok(domain.clone()),
            None => Ok(self.hierarchy.domain_of(class)?),
        }
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Find documents of `class` (and its descendants) matching `filter`
    ///
    /// Lookups are resolved after the primary read unless the filter or
    /// sort references a `$lookup.` path, in which case the backend joins
    /// first. A single-identifier filter with `limit(1)` bypasses sorting
    /// and projection. Classes stored in the model partition are answered
    /// from the hierarchy's model documents.
    ///
    /// # Errors
    ///
    /// - [`Error::Model`] for unknown classes
    /// - [`Error::InvalidInput`] for malformed lookups or lookup paths
    /// - [`Error::Backend`] on backend failure
    pub fn find_all(
        &self,
        class: &ClassId,
        filter: &Filter,
        options: &FindOptions,
    ) -> Result<FindResult> {
        let _permit = self.governor.find()?;
        let domain = self.class_domain(class, options.domain.as_ref())?;
        let planner = LookupPlanner::new(&self.hierarchy, self.config.max_lookup_depth);
        let relations = match &options.lookup {
            Some(lookup) => planner.plan(class, lookup)?,
            None => Vec::new(),
        };

        if is_id_fast_path(filter, options.limit) {
            return self.find_by_id(class, &domain, filter, &relations, options.total);
        }

        let query = QueryTranslator::new(&self.hierarchy).translate(class, filter)?;
        let sort_spec = options.sort.clone().unwrap_or_default();
        let sort = plan_sort(&self.hierarchy, class, &sort_spec);
        let joins = references_lookup(&query, sort_spec.iter().map(|(path, _)| path.as_str()));

        let mut required: Vec<String> = relations
            .iter()
            .filter(|r| r.kind == RelationKind::Forward)
            .map(|r| r.local_field.clone())
            .collect();
        if joins {
            required.extend(planner.result_keys(&relations));
        }
        let projection =
            plan_projection(&self.hierarchy, class, options.projection.as_ref(), &required);
        let pipeline = joins || sort.needs_pipeline();

        let result = if domain.as_str() == DOMAIN_MODEL {
            if joins {
                return Err(Error::invalid_input(
                    "model classes cannot be filtered or sorted on looked-up fields",
                ));
            }
            self.find_in_model(&planner, &relations, query, &sort, projection, options)?
        } else if pipeline {
            self.find_pipeline(
                &planner, &domain, &relations, query, sort, projection, joins, options,
            )?
        } else {
            let params = FindParams {
                sort: sort.keys,
                projection: Some(projection),
                limit: options.limit,
            };
            let mut docs = self.backend.find(&domain, &query, &params)?;
            planner.fill(self.backend.as_ref(), &relations, &mut docs)?;
            let total = match options.total {
                true => Some(self.backend.count(&domain, &query)?),
                false => None,
            };
            FindResult { docs, total }
        };
        debug!(
            target: "facetdb::find",
            class = %class,
            domain = %domain,
            joins,
            pipeline,
            results = result.docs.len(),
            "find completed"
        );
        Ok(result)
    }

    fn find_by_id(
        &self,
        class: &ClassId,
        domain: &Domain,
        filter: &Filter,
        relations: &[Relation],
        total: bool,
    ) -> Result<FindResult> {
        let class_filter = QueryTranslator::new(&self.hierarchy).translate(class, &Filter::new())?;
        let mut docs = if domain.as_str() == DOMAIN_MODEL {
            let id = filter.single_id();
            self.hierarchy
                .model_documents()
                .iter()
                .filter(|d| id.as_ref().map(Ref::as_str) == d.id())
                .take(1)
                .cloned()
                .collect()
        } else {
            let params = FindParams {
                projection: Some(Projection::default().exclude(fields::HASH)),
                limit: Some(1),
                ..Default::default()
            };
            self.backend.find(domain, filter, &params)?
        };
        let mut kept = Vec::with_capacity(docs.len());
        for doc in docs.drain(..) {
            if matches(&doc, &class_filter)? {
                kept.push(doc);
            }
        }
        let planner = LookupPlanner::new(&self.hierarchy, self.config.max_lookup_depth);
        planner.fill(self.backend.as_ref(), relations, &mut kept)?;
        debug!(
            target: "facetdb::find",
            class = %class,
            domain = %domain,
            found = kept.len(),
            "identifier fast path"
        );
        let total = total.then_some(kept.len());
        Ok(FindResult { docs: kept, total })
    }

    #[allow(clippy::too_many_arguments)]
    fn find_pipeline(
        &self,
        planner: &LookupPlanner<'_>,
        domain: &Domain,
        relations: &[Relation],
        query: Filter,
        sort: SortPlan,
        projection: Projection,
        joins: bool,
        options: &FindOptions,
    ) -> Result<FindResult> {
        let mut stages = Vec::new();
        let (pre, post) = if joins {
            split_filter(query)
        } else {
            (query, Filter::new())
        };
        if !pre.is_empty() {
            stages.push(Stage::Match(pre));
        }
        if joins {
            stages.extend(planner.join_stages(relations));
            let post = planner.rewrite_filter(relations, post)?;
            if !post.is_empty() {
                stages.push(Stage::Match(post));
            }
        }
        let counting = stages.clone();
        let ordering =
            self.ordering_stages(planner, relations, sort, projection, joins, options.limit)?;
        stages.extend(ordering);

        let mut docs = self.backend.aggregate(domain, &stages)?;
        if joins {
            planner.reshape(self.backend.as_ref(), relations, &mut docs)?;
        } else {
            planner.fill(self.backend.as_ref(), relations, &mut docs)?;
        }

        let total = if options.total {
            let mut counting = counting;
            counting.push(Stage::Count(COUNT_FIELD.to_string()));
            let counted = self.backend.aggregate(domain, &counting)?;
            Some(
                counted
                    .first()
                    .and_then(|d| d.get(COUNT_FIELD))
                    .and_then(Value::as_u64)
                    .unwrap_or(0) as usize,
            )
        } else {
            None
        };
        Ok(FindResult { docs, total })
    }

    /// Derived fields, sort, limit and projection stages
    fn ordering_stages(
        &self,
        planner: &LookupPlanner<'_>,
        relations: &[Relation],
        sort: SortPlan,
        projection: Projection,
        joins: bool,
        limit: Option<usize>,
    ) -> Result<Vec<Stage>> {
        let rewrite = |path: String| -> Result<String> {
            if joins {
                planner.rewrite_path(relations, &path)
            } else {
                Ok(path)
            }
        };
        let mut stages = Vec::new();
        let mut projection = projection;
        if !sort.derived.is_empty() {
            if !projection.is_inclusion() {
                for name in sort.derived_fields() {
                    projection = projection.exclude(name);
                }
            }
            let mut derived = Vec::with_capacity(sort.derived.len());
            for (name, expr) in sort.derived {
                let expr = match expr {
                    Expr::Rank { field, cases, default } => Expr::Rank {
                        field: rewrite(field)?,
                        cases,
                        default,
                    },
                    Expr::IndexOf { field, values, missing } => Expr::IndexOf {
                        field: rewrite(field)?,
                        values,
                        missing,
                    },
                    Expr::IsNullOrMissing { field } => Expr::IsNullOrMissing {
                        field: rewrite(field)?,
                    },
                };
                derived.push((name, expr));
            }
            stages.push(Stage::AddFields(derived));
        }
        if !sort.keys.is_empty() {
            let keys = sort
                .keys
                .into_iter()
                .map(|(path, dir)| Ok((rewrite(path)?, dir)))
                .collect::<Result<Vec<_>>>()?;
            stages.push(Stage::Sort(keys));
        }
        if let Some(limit) = limit {
            stages.push(Stage::Limit(limit));
        }
        if !projection.fields.is_empty() {
            stages.push(Stage::Project(projection));
        }
        Ok(stages)
    }

    fn find_in_model(
        &self,
        planner: &LookupPlanner<'_>,
        relations: &[Relation],
        query: Filter,
        sort: &SortPlan,
        projection: Projection,
        options: &FindOptions,
    ) -> Result<FindResult> {
        let mut stages = vec![Stage::Match(query)];
        let counting = stages.clone();
        let ordering = self.ordering_stages(
            planner,
            relations,
            sort.clone(),
            projection,
            false,
            options.limit,
        )?;
        stages.extend(ordering);
        let source = self.hierarchy.model_documents().to_vec();
        let no_joins = |_: &facetdb_core::JoinStep| Ok(Vec::new());
        let mut docs = run_pipeline(source.clone(), &stages, no_joins)?;
        planner.fill(self.backend.as_ref(), relations, &mut docs)?;
        let total = match options.total {
            true => Some(run_pipeline(source, &counting, no_joins)?.len()),
            false => None,
        };
        Ok(FindResult { docs, total })
    }

    /// Count documents of `class` matching `filter`
    pub fn count(&self, class: &ClassId, filter: &Filter) -> Result<usize> {
        let _permit = self.governor.find()?;
        let domain = self.hierarchy.domain_of(class)?;
        let query = QueryTranslator::new(&self.hierarchy).translate(class, filter)?;
        if domain.as_str() == DOMAIN_MODEL {
            let mut n = 0;
            for doc in self.hierarchy.model_documents() {
                if matches(doc, &query)? {
                    n += 1;
                }
            }
            return Ok(n);
        }
        Ok(self.backend.count(&domain, &query)?)
    }

    /// Fetch documents of `domain` by identifier, in storage order
    ///
    /// Unknown identifiers are skipped.
    pub fn load(&self, domain: &Domain, ids: &[Ref]) -> Result<Vec<Document>> {
        let _permit = self.governor.find()?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let params = FindParams {
            projection: Some(Projection::default().exclude(fields::HASH)),
            ..Default::default()
        };
        Ok(self.backend.find(domain, &Filter::by_ids(ids), &params)?)
    }

    /// Distinct values at `field` across `domain`
    pub fn group_by(&self, domain: &Domain, field: &str) -> Result<Vec<Value>> {
        let _permit = self.governor.find()?;
        Ok(self.backend.distinct(domain, field)?)
    }

    /// Scan hashes of `domain`; see [`HashIterator`]
    ///
    /// Each page read and write-back of the scan is admitted separately,
    /// so a long scan never holds a permit between items.
    ///
    /// # Errors
    ///
    /// [`Error::Closed`] after close; [`Error::Backend`] if the recheck
    /// invalidation fails.
    pub fn iterate_hashes(&self, domain: &Domain, recheck: bool) -> Result<HashIterator<'_>> {
        if self.governor.is_closed() {
            return Err(Error::Closed);
        }
        HashIterator::new(
            self.backend.as_ref(),
            Some(&self.governor),
            domain.clone(),
            recheck,
            self.config.hash_page_size,
            self.config.hash_flush_threshold,
        )
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Apply an ordered transaction batch
    ///
    /// Returns one result per transaction, in batch order.
    ///
    /// # Errors
    ///
    /// - [`Error::Model`] if a transaction names an unknown class; nothing
    ///   is written
    /// - [`Error::PartialBatchFailure`] naming the identifiers whose writes
    ///   failed their single-operation retry; everything else is committed
    /// - [`Error::Backend`] for a transient failure during that retry
    pub fn apply_transactions(&self, txs: &[Tx]) -> Result<Vec<TxResult>> {
        let _permit = self.governor.tx()?;
        if txs.is_empty() {
            return Ok(Vec::new());
        }
        let batch = TxCompiler::new(&self.hierarchy).compile(txs)?;
        self.executor().execute(batch, txs.len())
    }

    /// Replace or insert whole documents, invalidating their hashes
    ///
    /// Documents without `modifiedOn` are stamped with the clock.
    pub fn upload(&self, domain: &Domain, docs: Vec<Document>) -> Result<()> {
        let _permit = self.governor.tx()?;
        let now = self.clock.now();
        let mut group = DomainGroup::new(domain.clone());
        for mut doc in docs {
            let id = doc
                .id()
                .map(Ref::new)
                .ok_or_else(|| Error::invalid_input("uploaded document without _id"))?;
            doc.insert(fields::HASH.to_string(), Value::Null);
            doc.entry(fields::MODIFIED_ON.to_string())
                .or_insert_with(|| Value::from(now));
            let op = WriteOp::ReplaceOne {
                filter: Filter::by_id(&id),
                replacement: doc,
                upsert: true,
            };
            group.bulk.push((id, op));
        }
        self.run_group(group)
    }

    /// Hard-delete documents of `domain` by identifier
    pub fn clean(&self, domain: &Domain, ids: &[Ref]) -> Result<()> {
        let _permit = self.governor.tx()?;
        let mut group = DomainGroup::new(domain.clone());
        group.deletes = ids.to_vec();
        self.run_group(group)
    }

    fn executor(&self) -> BatchExecutor<'_> {
        BatchExecutor::new(self.backend.as_ref(), self.config.bulk_batch_size)
    }

    fn run_group(&self, group: DomainGroup) -> Result<()> {
        if group.write_count() == 0 {
            return Ok(());
        }
        let batch = CompiledBatch {
            groups: vec![group],
            ignored: Vec::new(),
        };
        self.executor().execute(batch, 0).map(|_| ())
    }

    // ========================================================================
    // Raw access
    // ========================================================================

    /// Find in `domain` without class translation or lookups
    pub fn raw_find_all(
        &self,
        domain: &Domain,
        filter: &Filter,
        params: &FindParams,
    ) -> Result<Vec<Document>> {
        let _permit = self.governor.find()?;
        Ok(self.backend.find(domain, filter, params)?)
    }

    /// Update every matching document of `domain`; hashes are invalidated
    pub fn raw_update(
        &self,
        domain: &Domain,
        filter: &Filter,
        update: Update,
    ) -> Result<WriteSummary> {
        let _permit = self.governor.tx()?;
        let update = update.set(fields::HASH, Value::Null);
        Ok(self.backend.update_many(domain, filter, &update)?)
    }

    /// Delete every matching document of `domain`
    pub fn raw_delete_many(&self, domain: &Domain, filter: &Filter) -> Result<usize> {
        let _permit = self.governor.tx()?;
        Ok(self.backend.delete_many(domain, filter)?)
    }

    // ========================================================================
    // Administration
    // ========================================================================

    /// Domains the backend holds data for
    pub fn domains(&self) -> Result<Vec<Domain>> {
        if self.governor.is_closed() {
            return Err(Error::Closed);
        }
        Ok(self.backend.domains()?)
    }

    /// Domains of the model's document classes, model partition excluded
    pub fn document_domains(&self) -> Vec<Domain> {
        let mut out: Vec<Domain> = Vec::new();
        for class in self.hierarchy.classes().filter(|c| c.kind == ClassKind::Class) {
            if let Ok(domain) = self.hierarchy.domain_of(&class.id) {
                if domain.as_str() != DOMAIN_MODEL && !out.contains(&domain) {
                    out.push(domain);
                }
            }
        }
        out
    }

    /// Create missing indexes; failures are reported, never raised
    pub fn ensure_indexes(&self, domain: &Domain, specs: &[IndexSpec]) -> IndexReport {
        index::ensure_indexes(self.backend.as_ref(), domain, specs)
    }

    /// Drop indexes not named in `keep`; failures are reported, never raised
    pub fn drop_stale_indexes(&self, domain: &Domain, keep: &[&str]) -> IndexReport {
        index::drop_stale_indexes(self.backend.as_ref(), domain, keep)
    }

    /// Ensure the default indexes on every document domain of the model
    pub fn init_indexes(&self) -> IndexReport {
        let mut report = IndexReport::default();
        let specs = index::default_indexes();
        for domain in self.document_domains() {
            report.merge(self.ensure_indexes(&domain, &specs));
        }
        report
    }
}
