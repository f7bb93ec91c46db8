//! Structured predicate tree
//!
//! Callers hand the adapter a pre-parsed [`Filter`]: an ordered list of
//! clauses, each either a field path with one or more [`Condition`]s or a
//! boolean combination of nested filters.
//!
//! The same type travels to the backend after translation. The only
//! caller-side condition is [`Condition::Like`]; the translator lowers it to
//! [`Condition::Regex`] and backends reject it.
//!
//! ```
//! use facetdb_core::query::{Condition, Filter};
//! use serde_json::json;
//!
//! let filter = Filter::new()
//!     .eq("status", json!("open"))
//!     .with("priority", Condition::In(vec![json!(1), json!(2)]));
//! assert_eq!(filter.clauses().len(), 2);
//! ```

use crate::types::{fields, Ref};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single condition on a field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Condition {
    /// Equal (or, for array fields, contains)
    Eq(Value),
    /// Not equal
    Ne(Value),
    /// One of
    In(Vec<Value>),
    /// None of
    Nin(Vec<Value>),
    /// Greater than
    Gt(Value),
    /// Greater than or equal
    Gte(Value),
    /// Less than
    Lt(Value),
    /// Less than or equal
    Lte(Value),
    /// Field present (`true`) or absent (`false`)
    Exists(bool),
    /// SQL-like pattern where `%` is a wildcard. Caller-side only.
    Like(String),
    /// Regular expression match
    Regex {
        /// Pattern in `regex` crate syntax
        pattern: String,
        /// Case-insensitive matching
        case_insensitive: bool,
    },
    /// Array length equals
    Size(usize),
    /// Array contains all of
    All(Vec<Value>),
}

/// One clause of a filter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Clause {
    /// Conditions on one field path; all must hold
    Field {
        /// Dotted field path
        path: String,
        /// Conditions, conjunctive
        conditions: Vec<Condition>,
    },
    /// At least one nested filter holds
    Or(Vec<Filter>),
    /// All nested filters hold
    And(Vec<Filter>),
}

/// Ordered conjunction of clauses. The empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    clauses: Vec<Clause>,
}

impl Filter {
    /// Empty filter
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter matching one document identifier
    pub fn by_id(id: &Ref) -> Self {
        Self::new().eq(fields::ID, Value::from(id.as_str()))
    }

    /// Filter matching any of the identifiers
    pub fn by_ids<'a>(ids: impl IntoIterator<Item = &'a Ref>) -> Self {
        let ids = ids.into_iter().map(|r| Value::from(r.as_str())).collect();
        Self::new().with(fields::ID, Condition::In(ids))
    }

    /// Add an equality clause
    pub fn eq(self, path: impl Into<String>, value: Value) -> Self {
        self.with(path, Condition::Eq(value))
    }

    /// Add a condition on `path`, merging with an existing clause on the same path
    pub fn with(mut self, path: impl Into<String>, condition: Condition) -> Self {
        self.push_condition(path.into(), condition);
        self
    }

    /// Add a disjunction
    pub fn or(mut self, alternatives: Vec<Filter>) -> Self {
        self.clauses.push(Clause::Or(alternatives));
        self
    }

    /// Add a nested conjunction
    pub fn and(mut self, parts: Vec<Filter>) -> Self {
        self.clauses.push(Clause::And(parts));
        self
    }

    /// Append a condition in place
    pub fn push_condition(&mut self, path: String, condition: Condition) {
        for clause in &mut self.clauses {
            if let Clause::Field { path: p, conditions } = clause {
                if *p == path {
                    conditions.push(condition);
                    return;
                }
            }
        }
        self.clauses.push(Clause::Field {
            path,
            conditions: vec![condition],
        });
    }

    /// Append a raw clause
    pub fn push(&mut self, clause: Clause) {
        self.clauses.push(clause);
    }

    /// Clauses in declaration order
    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    /// Consume into clauses
    pub fn into_clauses(self) -> Vec<Clause> {
        self.clauses
    }

    /// Whether the filter has no clauses
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Top-level conditions on `path`
    pub fn conditions(&self, path: &str) -> Option<&[Condition]> {
        self.clauses.iter().find_map(|c| match c {
            Clause::Field { path: p, conditions } if p == path => Some(conditions.as_slice()),
            _ => None,
        })
    }

    /// Remove and return the top-level conditions on `path`
    pub fn take_conditions(&mut self, path: &str) -> Option<Vec<Condition>> {
        let pos = self
            .clauses
            .iter()
            .position(|c| matches!(c, Clause::Field { path: p, .. } if p == path))?;
        match self.clauses.remove(pos) {
            Clause::Field { conditions, .. } => Some(conditions),
            _ => None,
        }
    }

    /// Every field path referenced, including inside `Or`/`And`
    pub fn paths(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_paths(&mut out);
        out
    }

    fn collect_paths<'a>(&'a self, out: &mut Vec<&'a str>) {
        for clause in &self.clauses {
            match clause {
                Clause::Field { path, .. } => out.push(path),
                Clause::Or(fs) | Clause::And(fs) => {
                    for f in fs {
                        f.collect_paths(out);
                    }
                }
            }
        }
    }

    /// When the filter is exactly `{_id: <literal>}`, the identifier
    pub fn single_id(&self) -> Option<Ref> {
        match self.clauses.as_slice() {
            [Clause::Field { path, conditions }] if path == fields::ID => {
                match conditions.as_slice() {
                    [Condition::Eq(Value::String(id))] => Some(Ref::new(id.clone())),
                    _ => None,
                }
            }
            _ => None,
        }
    }
}

impl FromIterator<Clause> for Filter {
    fn from_iter<I: IntoIterator<Item = Clause>>(iter: I) -> Self {
        Filter {
            clauses: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_conditions_merge_on_same_path() {
        let f = Filter::new()
            .with("n", Condition::Gt(json!(1)))
            .with("n", Condition::Lt(json!(5)));
        assert_eq!(f.clauses().len(), 1);
        assert_eq!(f.conditions("n").unwrap().len(), 2);
    }

    #[test]
    fn test_paths_include_nested() {
        let f = Filter::new().eq("a", json!(1)).or(vec![
            Filter::new().eq("$lookup.space.name", json!("x")),
            Filter::new().eq("b", json!(2)),
        ]);
        assert_eq!(f.paths(), vec!["a", "$lookup.space.name", "b"]);
    }

    #[test]
    fn test_single_id() {
        assert_eq!(Filter::by_id(&Ref::new("x")).single_id(), Some(Ref::new("x")));
        assert_eq!(Filter::new().eq("_id", json!("x")).eq("a", json!(1)).single_id(), None);
        assert_eq!(Filter::by_ids([&Ref::new("x")]).single_id(), None);
    }

    #[test]
    fn test_take_conditions() {
        let mut f = Filter::new().eq("_class", json!("c")).eq("a", json!(1));
        let taken = f.take_conditions("_class").unwrap();
        assert_eq!(taken, vec![Condition::Eq(json!("c"))]);
        assert!(f.conditions("_class").is_none());
        assert_eq!(f.clauses().len(), 1);
    }
}
