//! Filter evaluation and value ordering
//!
//! Evaluates a backend-native [`Filter`] against a JSON object with the usual
//! document-store semantics:
//!
//! - paths fan out across arrays (`labels.name` matches any element)
//! - equality against an array field means "contains"
//! - `Eq(null)` / `In([null])` match absent fields
//! - range conditions only compare values of the same type bracket
//!
//! # Value Ordering
//!
//! Cross-type ordering follows the bracket order
//! null < number < string < object < array < bool, so sorts over
//! heterogeneous fields are total and deterministic. Numbers compare as
//! `f64`, so `1` and `1.0` are equal.

use facetdb_core::query::{Clause, Condition, Filter};
use facetdb_core::path::collect_path;
use facetdb_core::{BackendError, BackendResult};
use regex::RegexBuilder;
use serde_json::{Map, Value};
use std::cmp::Ordering;

fn bracket(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Number(_) => 1,
        Value::String(_) => 2,
        Value::Object(_) => 3,
        Value::Array(_) => 4,
        Value::Bool(_) => 5,
    }
}

/// Total order over JSON values
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (l, r) in x.iter().zip(y.iter()) {
                let ord = compare_values(l, r);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Object(x), Value::Object(y)) => {
            for ((lk, lv), (rk, rv)) in x.iter().zip(y.iter()) {
                let ord = lk.cmp(rk).then_with(|| compare_values(lv, rv));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        _ => bracket(a).cmp(&bracket(b)),
    }
}

/// Equality under [`compare_values`]
pub fn values_equal(a: &Value, b: &Value) -> bool {
    compare_values(a, b) == Ordering::Equal
}

/// Whether `doc` satisfies `filter`
///
/// # Errors
///
/// [`BackendError::Unsupported`] for conditions a backend does not evaluate
/// (unlowered `Like`, invalid regex).
pub fn matches(doc: &Map<String, Value>, filter: &Filter) -> BackendResult<bool> {
    for clause in filter.clauses() {
        let ok = match clause {
            Clause::Field { path, conditions } => {
                let values = collect_path(doc, path);
                let mut all = true;
                for cond in conditions {
                    if !matches_condition(&values, cond)? {
                        all = false;
                        break;
                    }
                }
                all
            }
            Clause::Or(alternatives) => {
                let mut any = false;
                for f in alternatives {
                    if matches(doc, f)? {
                        any = true;
                        break;
                    }
                }
                any
            }
            Clause::And(parts) => {
                let mut all = true;
                for f in parts {
                    if !matches(doc, f)? {
                        all = false;
                        break;
                    }
                }
                all
            }
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Whether the value at `path` satisfies every condition
pub fn matches_conditions(
    doc: &Map<String, Value>,
    path: &str,
    conditions: &[Condition],
) -> BackendResult<bool> {
    let values = collect_path(doc, path);
    for cond in conditions {
        if !matches_condition(&values, cond)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Candidate values: each reached value, plus the elements of reached arrays
fn candidates<'a>(values: &[&'a Value]) -> Vec<&'a Value> {
    let mut out = Vec::with_capacity(values.len());
    for v in values {
        out.push(*v);
        if let Value::Array(items) = *v {
            out.extend(items.iter());
        }
    }
    out
}

fn eq_match(values: &[&Value], target: &Value) -> bool {
    if target.is_null() && values.is_empty() {
        return true;
    }
    candidates(values).into_iter().any(|c| values_equal(c, target))
}

fn range_match(values: &[&Value], target: &Value, accept: fn(Ordering) -> bool) -> bool {
    candidates(values)
        .into_iter()
        .any(|c| bracket(c) == bracket(target) && accept(compare_values(c, target)))
}

fn matches_condition(values: &[&Value], cond: &Condition) -> BackendResult<bool> {
    Ok(match cond {
        Condition::Eq(v) => eq_match(values, v),
        Condition::Ne(v) => !eq_match(values, v),
        Condition::In(list) => list.iter().any(|v| eq_match(values, v)),
        Condition::Nin(list) => !list.iter().any(|v| eq_match(values, v)),
        Condition::Gt(v) => range_match(values, v, |o| o == Ordering::Greater),
        Condition::Gte(v) => range_match(values, v, |o| o != Ordering::Less),
        Condition::Lt(v) => range_match(values, v, |o| o == Ordering::Less),
        Condition::Lte(v) => range_match(values, v, |o| o != Ordering::Greater),
        Condition::Exists(expected) => values.is_empty() != *expected,
        Condition::Size(n) => values
            .iter()
            .any(|v| matches!(v, Value::Array(items) if items.len() == *n)),
        Condition::All(list) => list.iter().all(|v| eq_match(values, v)),
        Condition::Regex {
            pattern,
            case_insensitive,
        } => {
            let re = RegexBuilder::new(pattern)
                .case_insensitive(*case_insensitive)
                .build()
                .map_err(|e| {
                    BackendError::Unsupported(format!("invalid regex '{}': {}", pattern, e))
                })?;
            candidates(values)
                .into_iter()
                .any(|c| matches!(c, Value::String(s) if re.is_match(s)))
        }
        Condition::Like(pattern) => {
            return Err(BackendError::Unsupported(format!(
                "like pattern '{}' must be lowered before reaching the backend",
                pattern
            )))
        }
    })
}
