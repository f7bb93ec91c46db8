//! Query translation
//!
//! Rewrites a caller predicate over a class into a backend-native [`Filter`]:
//!
//! 1. **Path qualification**: a path whose first segment is an attribute
//!    owned by a mixin is prefixed with the mixin identifier
//!    (`estimate` → `tracker:mixin:Estimated.estimate`). Reserved fields,
//!    lookup paths and already-qualified paths are left alone.
//! 2. **Pattern lowering**: `Like` becomes an anchored, case-insensitive
//!    `Regex`; `%` is the wildcard and every other character is literal.
//! 3. **Class constraint**: `_class` is restricted to the document classes
//!    descending from the requested class. Explicit constraints are
//!    intersected (`Eq`/`In`) or subtracted (`Ne`/`Nin`) rather than
//!    overwritten; a single survivor collapses to `Eq`. The universal root
//!    adds no constraint.
//! 4. **Mixin queries**: querying a mixin class targets its base class's
//!    documents that carry the facet (`{<mixin>: {$exists: true}}`).

use facetdb_core::query::{Clause, Condition, Filter};
use facetdb_core::types::is_reserved_field;
use facetdb_core::{fields, ClassId, Hierarchy, Result, DOC_CLASS};
use serde_json::Value;

/// Lower a `%`-wildcard pattern to an anchored regular expression
///
/// ```
/// use facetdb_engine::query::like_to_regex;
///
/// assert_eq!(like_to_regex("%a.b%"), "^.*a\\.b.*$");
/// ```
pub fn like_to_regex(pattern: &str) -> String {
    let body: Vec<String> = pattern.split('%').map(regex::escape).collect();
    format!("^{}$", body.join(".*"))
}

/// Qualify `path` with the mixin that owns its first segment, if any
pub fn qualify_path(hierarchy: &Hierarchy, class: &ClassId, path: &str) -> String {
    let head = path.split('.').next().unwrap_or(path);
    if is_reserved_field(head) || head.starts_with('$') {
        return path.to_string();
    }
    if hierarchy.is_mixin(&ClassId::new(head)) {
        return path.to_string();
    }
    match hierarchy.owning_mixin_of(class, head) {
        Some(mixin) => format!("{}.{}", mixin, path),
        None => path.to_string(),
    }
}

/// Translates caller predicates for one hierarchy
#[derive(Debug, Clone, Copy)]
pub struct QueryTranslator<'h> {
    hierarchy: &'h Hierarchy,
}

impl<'h> QueryTranslator<'h> {
    /// Translator over `hierarchy`
    pub fn new(hierarchy: &'h Hierarchy) -> Self {
        QueryTranslator { hierarchy }
    }

    /// Translate `filter` over `class` into a backend-native filter
    ///
    /// # Errors
    ///
    /// [`ModelError`](facetdb_core::ModelError) for an unknown class.
    pub fn translate(&self, class: &ClassId, filter: &Filter) -> Result<Filter> {
        let mixin = self.hierarchy.is_mixin(class);
        let base = self.hierarchy.base_class_of(class)?;

        let mut rest = filter.clone();
        let explicit = rest.take_conditions(fields::CLASS);
        let body = self.rewrite(class, rest);

        let mut out = Filter::new();
        if let Some(conditions) = self.class_constraint(&base, explicit)? {
            out.push(Clause::Field {
                path: fields::CLASS.to_string(),
                conditions,
            });
        }
        if mixin {
            out.push(Clause::Field {
                path: class.to_string(),
                conditions: vec![Condition::Exists(true)],
            });
        }
        for clause in body.into_clauses() {
            out.push(clause);
        }
        Ok(out)
    }

    /// Qualify paths and lower patterns, recursing into `Or`/`And`
    pub fn rewrite(&self, class: &ClassId, filter: Filter) -> Filter {
        filter
            .into_clauses()
            .into_iter()
            .map(|clause| match clause {
                Clause::Field { path, conditions } => Clause::Field {
                    path: qualify_path(self.hierarchy, class, &path),
                    conditions: conditions.into_iter().map(lower_condition).collect(),
                },
                Clause::Or(fs) => {
                    Clause::Or(fs.into_iter().map(|f| self.rewrite(class, f)).collect())
                }
                Clause::And(fs) => {
                    Clause::And(fs.into_iter().map(|f| self.rewrite(class, f)).collect())
                }
            })
            .collect()
    }

    fn class_constraint(
        &self,
        base: &ClassId,
        explicit: Option<Vec<Condition>>,
    ) -> Result<Option<Vec<Condition>>> {
        if base.as_str() == DOC_CLASS {
            return Ok(explicit);
        }
        let mut legal: Vec<Value> = self
            .hierarchy
            .document_descendants_of(base)?
            .into_iter()
            .map(|c| Value::from(c.into_string()))
            .collect();
        let mut extra = Vec::new();
        for cond in explicit.into_iter().flatten() {
            match cond {
                Condition::Eq(v) => legal.retain(|c| *c == v),
                Condition::In(vs) => legal.retain(|c| vs.contains(c)),
                Condition::Ne(v) => legal.retain(|c| *c != v),
                Condition::Nin(vs) => legal.retain(|c| !vs.contains(c)),
                other => extra.push(lower_condition(other)),
            }
        }
        let narrowed = if legal.len() == 1 {
            Condition::Eq(legal.remove(0))
        } else {
            Condition::In(legal)
        };
        let mut conditions = vec![narrowed];
        conditions.extend(extra);
        Ok(Some(conditions))
    }
}

fn lower_condition(cond: Condition) -> Condition {
    match cond {
        Condition::Like(pattern) => Condition::Regex {
            pattern: like_to_regex(&pattern),
            case_insensitive: true,
        },
        other => other,
    }
}
