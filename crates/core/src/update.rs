//! Update grammar
//!
//! Two layers live here:
//! - [`DocumentUpdate`] / [`UpdateOp`]: what a transaction asks for. Either a
//!   flat field-set, or a list of closed operator variants.
//! - [`Update`]: what a backend write carries. Dotted paths, no `$move` and no
//!   range updates; those are expanded by the bulk compiler.

use crate::query::Filter;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Delta carried by an update or mixin-apply transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DocumentUpdate {
    /// Plain attribute assignment; compactable across transactions
    Fields(Map<String, Value>),
    /// Operator-tagged delta; each becomes its own ordered backend write
    Ops(Vec<UpdateOp>),
}

impl DocumentUpdate {
    /// Flat field-set from `(name, value)` pairs
    pub fn fields<K: Into<String>>(pairs: impl IntoIterator<Item = (K, Value)>) -> Self {
        DocumentUpdate::Fields(pairs.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Whether the delta is operator-tagged
    pub fn is_operator(&self) -> bool {
        matches!(self, DocumentUpdate::Ops(_))
    }

    /// Prefix every attribute path with `prefix.`, recursing into operator values
    pub fn prefixed(&self, prefix: &str) -> DocumentUpdate {
        match self {
            DocumentUpdate::Fields(map) => DocumentUpdate::Fields(prefix_keys(map, prefix)),
            DocumentUpdate::Ops(ops) => {
                DocumentUpdate::Ops(ops.iter().map(|op| op.prefixed(prefix)).collect())
            }
        }
    }
}

/// Element matcher for `Pull`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PullMatcher {
    /// Remove elements equal to the value
    Value(Value),
    /// Remove elements equal to any of the values
    In(Vec<Value>),
    /// Remove object elements matching the filter (paths relative to the element)
    Match(Filter),
}

/// Operator-tagged delta
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum UpdateOp {
    /// Assign fields
    Set(Map<String, Value>),
    /// Remove fields
    Unset(Vec<String>),
    /// Increment numeric fields
    Inc(Map<String, Value>),
    /// Append (or insert at `position`) into an array
    Push {
        /// Array field
        field: String,
        /// Values to insert, in order
        values: Vec<Value>,
        /// Insert position; `None` appends
        position: Option<usize>,
    },
    /// Remove matching elements from an array
    Pull {
        /// Array field
        field: String,
        /// Element matcher
        matcher: PullMatcher,
    },
    /// Move an existing element to `position`
    Move {
        /// Array field
        field: String,
        /// Element to move
        value: Value,
        /// Target position
        position: usize,
    },
    /// Update fields of every array element matching `query`
    RangeUpdate {
        /// Array field
        field: String,
        /// Element selector: attribute → literal
        query: Map<String, Value>,
        /// Element attribute assignments
        update: Map<String, Value>,
    },
}

impl UpdateOp {
    fn prefixed(&self, prefix: &str) -> UpdateOp {
        let p = |f: &String| format!("{}.{}", prefix, f);
        match self {
            UpdateOp::Set(m) => UpdateOp::Set(prefix_keys(m, prefix)),
            UpdateOp::Unset(fs) => UpdateOp::Unset(fs.iter().map(p).collect()),
            UpdateOp::Inc(m) => UpdateOp::Inc(prefix_keys(m, prefix)),
            UpdateOp::Push {
                field,
                values,
                position,
            } => UpdateOp::Push {
                field: p(field),
                values: values.clone(),
                position: *position,
            },
            UpdateOp::Pull { field, matcher } => UpdateOp::Pull {
                field: p(field),
                matcher: matcher.clone(),
            },
            UpdateOp::Move {
                field,
                value,
                position,
            } => UpdateOp::Move {
                field: p(field),
                value: value.clone(),
                position: *position,
            },
            UpdateOp::RangeUpdate {
                field,
                query,
                update,
            } => UpdateOp::RangeUpdate {
                field: p(field),
                query: query.clone(),
                update: update.clone(),
            },
        }
    }
}

fn prefix_keys(map: &Map<String, Value>, prefix: &str) -> Map<String, Value> {
    map.iter()
        .map(|(k, v)| (format!("{}.{}", prefix, k), v.clone()))
        .collect()
}

/// Push payload of a backend update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushSpec {
    /// Array path
    pub path: String,
    /// Values inserted in order
    pub values: Vec<Value>,
    /// Insert position; `None` appends
    pub position: Option<usize>,
}

/// Pull payload of a backend update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullSpec {
    /// Array path
    pub path: String,
    /// Element matcher
    pub matcher: PullMatcher,
}

/// Named element filter referenced by `$[ident]` path segments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayFilter {
    /// Identifier used in `path.$[ident].field`
    pub ident: String,
    /// Element predicate, paths relative to the element
    pub filter: Filter,
}

/// Backend-native update of one or more documents
///
/// Operators apply in a fixed order: set, unset, inc, pull, push.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Update {
    /// Dotted path assignments
    pub set: Map<String, Value>,
    /// Dotted paths to remove
    pub unset: Vec<String>,
    /// Numeric increments
    pub inc: Map<String, Value>,
    /// Array removals
    pub pull: Vec<PullSpec>,
    /// Array insertions
    pub push: Vec<PushSpec>,
    /// Element filters for `$[ident]` segments in `set`
    pub array_filters: Vec<ArrayFilter>,
}

impl Update {
    /// Empty update
    pub fn new() -> Self {
        Self::default()
    }

    /// Update assigning every entry of `set`
    pub fn from_set(set: Map<String, Value>) -> Self {
        Update {
            set,
            ..Default::default()
        }
    }

    /// Add an assignment
    pub fn set(mut self, path: impl Into<String>, value: Value) -> Self {
        self.set.insert(path.into(), value);
        self
    }

    /// Whether the update changes nothing
    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
            && self.unset.is_empty()
            && self.inc.is_empty()
            && self.pull.is_empty()
            && self.push.is_empty()
    }
}
