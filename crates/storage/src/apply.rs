//! Update application
//!
//! Applies a backend-native [`Update`] to one document in the fixed order
//! set, unset, inc, pull, push. The document is modified in place; callers
//! work on a copy and commit only when this returns `Ok`, so a rejected
//! update leaves the stored document untouched.
//!
//! `$[ident]` segments in set paths address every element of the array at
//! that position that matches the named [`ArrayFilter`].

use crate::matcher::{matches, values_equal};
use facetdb_core::path::{get_path, get_path_mut, remove_path, set_path};
use facetdb_core::update::{ArrayFilter, PullMatcher};
use facetdb_core::{BackendError, BackendResult, Update};
use serde_json::{Map, Number, Value};

/// Apply `update` to `doc`
///
/// # Errors
///
/// [`BackendError::Write`] on type conflicts (push to a non-array,
/// increment of a non-number, path through a scalar).
pub fn apply_update(doc: &mut Map<String, Value>, update: &Update) -> BackendResult<()> {
    for (path, value) in &update.set {
        if path.contains("$[") {
            set_filtered(doc, path, value, &update.array_filters)?;
        } else {
            set_path(doc, path, value.clone()).map_err(|e| BackendError::Write(e.to_string()))?;
        }
    }
    for path in &update.unset {
        remove_path(doc, path);
    }
    for (path, delta) in &update.inc {
        increment(doc, path, delta)?;
    }
    for pull in &update.pull {
        match get_path_mut(doc, &pull.path) {
            None => {}
            Some(Value::Array(items)) => {
                let mut kept = Vec::with_capacity(items.len());
                for item in items.drain(..) {
                    if !pull_matches(&item, &pull.matcher)? {
                        kept.push(item);
                    }
                }
                *items = kept;
            }
            Some(_) => {
                return Err(BackendError::Write(format!(
                    "cannot pull from non-array field '{}'",
                    pull.path
                )))
            }
        }
    }
    for push in &update.push {
        match get_path_mut(doc, &push.path) {
            None => {
                set_path(doc, &push.path, Value::Array(push.values.clone()))
                    .map_err(|e| BackendError::Write(e.to_string()))?;
            }
            Some(Value::Array(items)) => match push.position {
                None => items.extend(push.values.iter().cloned()),
                Some(pos) => {
                    let at = pos.min(items.len());
                    for (offset, v) in push.values.iter().enumerate() {
                        items.insert(at + offset, v.clone());
                    }
                }
            },
            Some(_) => {
                return Err(BackendError::Write(format!(
                    "cannot push to non-array field '{}'",
                    push.path
                )))
            }
        }
    }
    Ok(())
}

fn pull_matches(item: &Value, matcher: &PullMatcher) -> BackendResult<bool> {
    Ok(match matcher {
        PullMatcher::Value(v) => values_equal(item, v),
        PullMatcher::In(vs) => vs.iter().any(|v| values_equal(item, v)),
        PullMatcher::Match(filter) => match item {
            Value::Object(obj) => matches(obj, filter)?,
            _ => false,
        },
    })
}

fn increment(doc: &mut Map<String, Value>, path: &str, delta: &Value) -> BackendResult<()> {
    let Value::Number(d) = delta else {
        return Err(BackendError::Write(format!("increment of '{}' by non-number", path)));
    };
    let next = match get_path(doc, path) {
        None | Some(Value::Null) => Value::Number(d.clone()),
        Some(Value::Number(cur)) => match (cur.as_i64(), d.as_i64()) {
            (Some(a), Some(b)) => Value::from(a.saturating_add(b)),
            _ => {
                let sum = cur.as_f64().unwrap_or(0.0) + d.as_f64().unwrap_or(0.0);
                Number::from_f64(sum).map(Value::Number).ok_or_else(|| {
                    BackendError::Write(format!("increment of '{}' overflowed", path))
                })?
            }
        },
        Some(_) => {
            return Err(BackendError::Write(format!(
                "cannot increment non-numeric field '{}'",
                path
            )))
        }
    };
    set_path(doc, path, next).map_err(|e| BackendError::Write(e.to_string()))
}

fn set_filtered(
    doc: &mut Map<String, Value>,
    path: &str,
    value: &Value,
    filters: &[ArrayFilter],
) -> BackendResult<()> {
    let segs: Vec<&str> = path.split('.').collect();
    set_filtered_segs(doc, &segs, path, value, filters)
}

fn set_filtered_segs(
    obj: &mut Map<String, Value>,
    segs: &[&str],
    path: &str,
    value: &Value,
    filters: &[ArrayFilter],
) -> BackendResult<()> {
    let Some(pos) = segs.iter().position(|s| s.starts_with("$[")) else {
        return set_path(obj, &segs.join("."), value.clone())
            .map_err(|e| BackendError::Write(e.to_string()));
    };
    if pos == 0 {
        return Err(BackendError::Write(format!("array filter without array in '{}'", path)));
    }
    let ident = segs[pos].trim_start_matches("$[").trim_end_matches(']');
    let filter = filters
        .iter()
        .find(|f| f.ident == ident)
        .ok_or_else(|| BackendError::Write(format!("no array filter for identifier '{}'", ident)))?;
    let prefix = segs[..pos].join(".");
    let rest = &segs[pos + 1..];
    let items = match get_path_mut(obj, &prefix) {
        None => return Ok(()),
        Some(Value::Array(items)) => items,
        Some(_) => {
            return Err(BackendError::Write(format!(
                "array update on non-array field '{}'",
                prefix
            )))
        }
    };
    for item in items.iter_mut() {
        let Value::Object(element) = item else {
            continue;
        };
        if !matches(element, &filter.filter)? {
            continue;
        }
        if rest.is_empty() {
            *item = value.clone();
        } else {
            set_filtered_segs(element, rest, path, value, filters)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use facetdb_core::update::{PullSpec, PushSpec};
    use facetdb_core::Filter;
    use serde_json::json;

    fn doc(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(m) => m,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_set_unset_inc() {
        let mut d = doc(json!({"a": 1, "n": 2, "gone": true}));
        let mut u = Update::new().set("b.c", json!("x"));
        u.unset.push("gone".into());
        u.inc.insert("n".into(), json!(3));
        u.inc.insert("fresh".into(), json!(1));
        apply_update(&mut d, &u).unwrap();
        assert_eq!(Value::Object(d), json!({"a": 1, "n": 5, "b": {"c": "x"}, "fresh": 1}));
    }

    #[test]
    fn test_push_at_position_and_pull() {
        let mut d = doc(json!({"order": ["a", "b", "c"]}));
        let mut u = Update::new();
        u.pull.push(PullSpec {
            path: "order".into(),
            matcher: PullMatcher::Value(json!("c")),
        });
        u.push.push(PushSpec {
            path: "order".into(),
            values: vec![json!("c")],
            position: Some(0),
        });
        apply_update(&mut d, &u).unwrap();
        assert_eq!(d["order"], json!(["c", "a", "b"]));
    }

    #[test]
    fn test_push_to_missing_creates_array() {
        let mut d = doc(json!({}));
        let mut u = Update::new();
        u.push.push(PushSpec {
            path: "tags".into(),
            values: vec![json!(1), json!(2)],
            position: None,
        });
        apply_update(&mut d, &u).unwrap();
        assert_eq!(d["tags"], json!([1, 2]));
    }

    #[test]
    fn test_push_to_scalar_rejected() {
        let mut d = doc(json!({"tags": "oops"}));
        let mut u = Update::new();
        u.push.push(PushSpec {
            path: "tags".into(),
            values: vec![json!(1)],
            position: None,
        });
        assert!(matches!(apply_update(&mut d, &u), Err(BackendError::Write(_))));
    }

    #[test]
    fn test_array_filter_set() {
        let mut d = doc(json!({
            "items": [{"k": 1, "v": "a"}, {"k": 2, "v": "b"}, {"k": 1, "v": "c"}]
        }));
        let mut u = Update::new().set("items.$[el].v", json!("z"));
        u.array_filters.push(ArrayFilter {
            ident: "el".into(),
            filter: Filter::new().eq("k", json!(1)),
        });
        apply_update(&mut d, &u).unwrap();
        assert_eq!(
            d["items"],
            json!([{"k": 1, "v": "z"}, {"k": 2, "v": "b"}, {"k": 1, "v": "z"}])
        );
    }

    #[test]
    fn test_pull_by_match() {
        let mut d = doc(json!({"items": [{"k": 1}, {"k": 2}]}));
        let mut u = Update::new();
        u.pull.push(PullSpec {
            path: "items".into(),
            matcher: PullMatcher::Match(Filter::new().eq("k", json!(2))),
        });
        apply_update(&mut d, &u).unwrap();
        assert_eq!(d["items"], json!([{"k": 1}]));
    }
}
