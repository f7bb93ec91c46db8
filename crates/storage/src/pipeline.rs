//! Aggregate pipeline evaluation
//!
//! Stages run in order over an owned document stream. Joins are delegated
//! to a resolver closure so the stage runner does not need to know how the
//! foreign domain is stored.

use crate::matcher::{compare_values, matches, matches_conditions, values_equal};
use facetdb_core::backend::{Expr, JoinStep, Stage};
use facetdb_core::path::{collect_path, get_path, remove_path, set_path};
use facetdb_core::{BackendError, BackendResult, Direction, Document, Projection};
use serde_json::{Map, Value};
use std::cmp::Ordering;

static NULL: Value = Value::Null;

/// Run `pipeline` over `docs`
///
/// `join` returns every document of the joined domain.
pub fn run_pipeline<F>(
    mut docs: Vec<Document>,
    pipeline: &[Stage],
    join: F,
) -> BackendResult<Vec<Document>>
where
    F: Fn(&JoinStep) -> BackendResult<Vec<Document>>,
{
    for stage in pipeline {
        docs = match stage {
            Stage::Match(filter) => {
                let mut kept = Vec::with_capacity(docs.len());
                for doc in docs {
                    if matches(&doc, filter)? {
                        kept.push(doc);
                    }
                }
                kept
            }
            Stage::Lookup(step) => {
                let foreign = join(step)?;
                let mut out = Vec::with_capacity(docs.len());
                for mut doc in docs {
                    let joined = join_one(&doc, &foreign, step);
                    set_path(&mut doc, &step.result_key, Value::Array(joined))
                        .map_err(|e| BackendError::Write(e.to_string()))?;
                    out.push(doc);
                }
                out
            }
            Stage::AddFields(exprs) => {
                let mut out = Vec::with_capacity(docs.len());
                for mut doc in docs {
                    for (field, expr) in exprs {
                        let value = eval_expr(&doc, expr)?;
                        set_path(&mut doc, field, value)
                            .map_err(|e| BackendError::Write(e.to_string()))?;
                    }
                    out.push(doc);
                }
                out
            }
            Stage::Sort(keys) => {
                sort_documents(&mut docs, keys);
                docs
            }
            Stage::Project(projection) => {
                docs.into_iter().map(|d| project(d, projection)).collect()
            }
            Stage::Limit(n) => {
                docs.truncate(*n);
                docs
            }
            Stage::Count(field) => {
                let mut map = Map::new();
                map.insert(field.clone(), Value::from(docs.len()));
                vec![Document::from_map(map)]
            }
        };
    }
    Ok(docs)
}

/// Flattened values reachable at `path` (array elements expanded)
fn key_values(doc: &Map<String, Value>, path: &str) -> Vec<Value> {
    let mut out = Vec::new();
    for v in collect_path(doc, path) {
        match v {
            Value::Array(items) => out.extend(items.iter().cloned()),
            Value::Null => {}
            other => out.push(other.clone()),
        }
    }
    out
}

/// Foreign documents whose `foreign_field` shares a value with the local key.
/// A missing local key joins nothing.
fn join_one(doc: &Document, foreign: &[Document], step: &JoinStep) -> Vec<Value> {
    let local = key_values(doc, &step.local_field);
    if local.is_empty() {
        return Vec::new();
    }
    foreign
        .iter()
        .filter(|f| {
            key_values(f, &step.foreign_field)
                .iter()
                .any(|fv| local.iter().any(|lv| values_equal(lv, fv)))
        })
        .map(|f| Value::Object(f.as_map().clone()))
        .collect()
}

fn eval_expr(doc: &Document, expr: &Expr) -> BackendResult<Value> {
    Ok(match expr {
        Expr::Rank { field, cases, default } => {
            let mut rank = *default;
            for (conditions, r) in cases {
                if matches_conditions(doc, field, conditions)? {
                    rank = *r;
                    break;
                }
            }
            Value::from(rank)
        }
        Expr::IndexOf { field, values, missing } => {
            let pos = get_path(doc, field)
                .and_then(|v| values.iter().position(|candidate| values_equal(candidate, v)));
            Value::from(pos.map_or(*missing, |p| p as i64))
        }
        Expr::IsNullOrMissing { field } => {
            Value::Bool(get_path(doc, field).map_or(true, Value::is_null))
        }
    })
}

/// Stable multi-key sort; absent fields sort as null
pub fn sort_documents(docs: &mut [Document], keys: &[(String, Direction)]) {
    if keys.is_empty() {
        return;
    }
    docs.sort_by(|a, b| {
        for (path, dir) in keys {
            let l = get_path(a, path).unwrap_or(&NULL);
            let r = get_path(b, path).unwrap_or(&NULL);
            let ord = match dir {
                Direction::Asc => compare_values(l, r),
                Direction::Desc => compare_values(r, l),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
}

/// Apply a projection
///
/// Inclusion mode keeps the listed paths plus `_id` (unless `_id` is
/// explicitly excluded). Exclusion mode removes the listed paths.
pub fn project(doc: Document, projection: &Projection) -> Document {
    if projection.fields.is_empty() {
        return doc;
    }
    if projection.is_inclusion() {
        let source = doc.into_map();
        let mut out = Map::new();
        let id_excluded = projection
            .fields
            .iter()
            .any(|(p, inc)| !inc && p == facetdb_core::fields::ID);
        if !id_excluded {
            if let Some(id) = source.get(facetdb_core::fields::ID) {
                out.insert(facetdb_core::fields::ID.to_string(), id.clone());
            }
        }
        for (path, include) in &projection.fields {
            if !include {
                continue;
            }
            if let Some(v) = get_path(&source, path) {
                if let Err(e) = set_path(&mut out, path, v.clone()) {
                    tracing::debug!(
                        target: "facetdb::storage",
                        path = %path,
                        error = %e,
                        "projection path skipped"
                    );
                }
            }
        }
        Document::from_map(out)
    } else {
        let mut map = doc.into_map();
        for (path, _) in &projection.fields {
            remove_path(&mut map, path);
        }
        Document::from_map(map)
    }
}
