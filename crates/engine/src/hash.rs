//! Incremental hash iteration
//!
//! [`HashIterator`] walks one domain in two phases, each paged by `_id`:
//!
//! 1. documents whose `%hash%` holds a value: only `_id` and `%hash%` are
//!    read, nothing is computed
//! 2. documents whose `%hash%` is null, empty or missing: the full document
//!    is read, its hash computed and buffered
//!
//! Buffered hashes are written back with one bulk write once
//! `hash_flush_threshold` of them accumulate, and on [`HashIterator::close`].
//! Dropping an unclosed iterator flushes too, logging instead of failing.
//! Hashes computed after the last successful flush are lost if that final
//! flush fails; the next pass simply computes them again.
//!
//! A malformed stored value is treated as missing and recomputed in phase 1.
//!
//! When built with a [`Governor`], every page read takes a find permit and
//! every write-back takes a transaction permit, each held only for that one
//! backend call.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use facetdb_core::backend::{Backend, FindParams, WriteOp};
use facetdb_core::query::Condition;
use facetdb_concurrency::{Governor, Permit};
use facetdb_core::{fields, Direction, Document, Domain, Filter, HashMeta, Ref, Result, Update};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use tracing::{debug, warn};

/// One yielded document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocInfo {
    /// Document identifier
    pub id: Ref,
    /// Content hash
    pub hash: String,
    /// Approximate serialized size in bytes
    pub size: u64,
}

/// Counters of one iteration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HashIteratorStats {
    /// Documents yielded
    pub yielded: usize,
    /// Hashes computed
    pub computed: usize,
    /// Hashes written back
    pub flushed: usize,
}

/// Hash and size of a document's content
///
/// Computed over the canonical JSON text of the document without `%hash%`
/// and `$lookup`: SHA-256, base64 encoded. The size is the length of that
/// text.
pub fn compute_hash(doc: &Document) -> HashMeta {
    let mut content = doc.as_map().clone();
    content.remove(fields::HASH);
    content.remove(fields::LOOKUP);
    let text = Value::Object(content).to_string();
    HashMeta {
        hash: STANDARD.encode(Sha256::digest(text.as_bytes())),
        size: text.len() as u64,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Cached,
    Compute,
    Done,
}

/// Restartable two-phase scan over one domain
pub struct HashIterator<'a> {
    backend: &'a dyn Backend,
    governor: Option<&'a Governor>,
    domain: Domain,
    page_size: usize,
    flush_threshold: usize,
    phase: Phase,
    after: Option<String>,
    page: VecDeque<(Phase, Document)>,
    pending: Vec<(Ref, String)>,
    stats: HashIteratorStats,
    closed: bool,
}

impl<'a> HashIterator<'a> {
    /// Start a scan of `domain`
    ///
    /// With `recheck`, every stored hash is invalidated first, so the whole
    /// domain is recomputed.
    ///
    /// # Errors
    ///
    /// [`Error::Closed`](facetdb_core::Error::Closed) when `governor` is
    /// closed; [`Error::Backend`](facetdb_core::Error::Backend) if the
    /// invalidation fails.
    pub fn new(
        backend: &'a dyn Backend,
        governor: Option<&'a Governor>,
        domain: Domain,
        recheck: bool,
        page_size: usize,
        flush_threshold: usize,
    ) -> Result<Self> {
        if recheck {
            let _permit = governor.map(Governor::tx).transpose()?;
            let invalidate = Update::new().set(fields::HASH, Value::Null);
            let summary = backend.update_many(&domain, &Filter::new(), &invalidate)?;
            debug!(
                target: "facetdb::hash",
                domain = %domain,
                invalidated = summary.modified,
                "stored hashes invalidated"
            );
        }
        Ok(HashIterator {
            backend,
            governor,
            domain,
            page_size: page_size.max(1),
            flush_threshold: flush_threshold.max(1),
            phase: Phase::Cached,
            after: None,
            page: VecDeque::new(),
            pending: Vec::new(),
            stats: HashIteratorStats::default(),
            closed: false,
        })
    }

    fn find_permit(&self) -> Result<Option<Permit<'a>>> {
        self.governor.map(Governor::find).transpose()
    }

    fn tx_permit(&self) -> Result<Option<Permit<'a>>> {
        self.governor.map(Governor::tx).transpose()
    }

    /// Counters so far
    pub fn stats(&self) -> HashIteratorStats {
        self.stats
    }

    /// Flush buffered hashes and stop
    ///
    /// Calling it again is a no-op.
    pub fn close(&mut self) -> Result<HashIteratorStats> {
        if !self.closed {
            self.closed = true;
            self.phase = Phase::Done;
            self.page.clear();
            self.flush()?;
        }
        Ok(self.stats)
    }

    fn page_filter(&self) -> Filter {
        let mut filter = match self.phase {
            Phase::Cached => Filter::new()
                .with(fields::HASH, Condition::Ne(Value::Null))
                .with(fields::HASH, Condition::Ne(Value::from(""))),
            _ => Filter::new().or(vec![
                Filter::new().eq(fields::HASH, Value::Null),
                Filter::new().eq(fields::HASH, Value::from("")),
            ]),
        };
        if let Some(after) = &self.after {
            filter = filter.with(fields::ID, Condition::Gt(Value::from(after.as_str())));
        }
        filter
    }

    fn fetch_page(&mut self) -> Result<()> {
        let mut params = match self.phase {
            Phase::Cached => FindParams::only(&[fields::ID, fields::HASH]),
            _ => FindParams::default(),
        };
        params.sort = vec![(fields::ID.to_string(), Direction::Asc)];
        params.limit = Some(self.page_size);

        let docs = {
            let _permit = self.find_permit()?;
            self.backend.find(&self.domain, &self.page_filter(), &params)?
        };
        if let Some(last) = docs.last().and_then(Document::id) {
            self.after = Some(last.to_string());
        }
        let exhausted = docs.len() < self.page_size;
        let phase = self.phase;
        self.page.extend(docs.into_iter().map(|d| (phase, d)));
        if exhausted {
            self.after = None;
            self.phase = match self.phase {
                Phase::Cached => Phase::Compute,
                _ => Phase::Done,
            };
        }
        Ok(())
    }

    fn visit(&mut self, phase: Phase, doc: Document) -> Result<Option<DocInfo>> {
        let Some(id) = doc.id().map(Ref::new) else {
            return Ok(None);
        };
        if let Some(meta) = doc.hash_meta() {
            self.stats.yielded += 1;
            return Ok(Some(DocInfo {
                id,
                hash: meta.hash,
                size: meta.size,
            }));
        }
        let full = match phase {
            Phase::Cached => {
                let _permit = self.find_permit()?;
                let found = self
                    .backend
                    .find(&self.domain, &Filter::by_id(&id), &FindParams::default())?;
                match found.into_iter().next() {
                    Some(full) => full,
                    None => return Ok(None),
                }
            }
            _ => doc,
        };
        let meta = compute_hash(&full);
        self.stats.computed += 1;
        self.stats.yielded += 1;
        self.pending.push((id.clone(), meta.encode()));
        if self.pending.len() >= self.flush_threshold {
            self.flush()?;
        }
        Ok(Some(DocInfo {
            id,
            hash: meta.hash,
            size: meta.size,
        }))
    }

    fn flush(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let ops = self
            .pending
            .iter()
            .map(|(id, encoded)| WriteOp::UpdateOne {
                filter: Filter::by_id(id),
                update: Update::new().set(fields::HASH, Value::from(encoded.as_str())),
                upsert: false,
            })
            .collect();
        {
            let _permit = self.tx_permit()?;
            self.backend.bulk_write(&self.domain, ops)?;
        }
        let flushed = self.pending.len();
        self.pending.clear();
        self.stats.flushed += flushed;
        debug!(
            target: "facetdb::hash",
            domain = %self.domain,
            flushed,
            "computed hashes written back"
        );
        Ok(())
    }
}

impl Iterator for HashIterator<'_> {
    type Item = Result<DocInfo>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some((phase, doc)) = self.page.pop_front() {
                match self.visit(phase, doc) {
                    Ok(Some(info)) => return Some(Ok(info)),
                    Ok(None) => continue,
                    Err(e) => {
                        self.phase = Phase::Done;
                        self.page.clear();
                        return Some(Err(e));
                    }
                }
            }
            if self.phase == Phase::Done {
                return None;
            }
            if let Err(e) = self.fetch_page() {
                self.phase = Phase::Done;
                return Some(Err(e));
            }
        }
    }
}

impl Drop for HashIterator<'_> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        let unflushed = self.pending.len();
        if let Err(e) = self.flush() {
            warn!(
                target: "facetdb::hash",
                domain = %self.domain,
                unflushed,
                error = %e,
                "hash flush on drop failed"
            );
        }
    }
}
