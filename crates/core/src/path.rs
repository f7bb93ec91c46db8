//! Dotted storage paths over JSON documents
//!
//! Paths use the backend's dotted notation: `title`, `mixin:Ext.estimate`,
//! `items.0.name`. A numeric segment addresses an array element when the
//! current value is an array and an object key otherwise.
//!
//! Two read flavors exist:
//! - [`get_path`]: strict traversal, returns the single value at the path
//! - [`collect_path`]: query traversal, fans out across arrays the way
//!   document filters match (`tags.name` matches any element's `name`)

use serde_json::{Map, Value};
use thiserror::Error;

/// Error type for path mutation
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PathError {
    /// Path was empty or had an empty segment
    #[error("empty segment in path '{0}'")]
    EmptySegment(String),

    /// An intermediate value is a scalar and cannot hold children
    #[error("cannot create field '{segment}' in non-container value at '{path}'")]
    NotAContainer {
        /// Full path being written
        path: String,
        /// Segment that could not be created
        segment: String,
    },

    /// Array index segment beyond the end of the array
    #[error("index {index} out of bounds at '{path}'")]
    IndexOutOfBounds {
        /// Full path being written
        path: String,
        /// Offending index
        index: usize,
    },
}

/// Split a dotted path into segments, rejecting empty ones
pub fn segments(path: &str) -> Result<Vec<&str>, PathError> {
    let segs: Vec<&str> = path.split('.').collect();
    if segs.iter().any(|s| s.is_empty()) {
        return Err(PathError::EmptySegment(path.to_string()));
    }
    Ok(segs)
}

/// Get the value at `path`, without fanning out across arrays
pub fn get_path<'a>(root: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = root.get(parts.next()?)?;
    for seg in parts {
        current = match current {
            Value::Object(obj) => obj.get(seg)?,
            Value::Array(arr) => arr.get(seg.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Collect every value reachable at `path`, fanning out across arrays
///
/// A terminal array is yielded as a single value; membership semantics are
/// left to the filter evaluator.
pub fn collect_path<'a>(root: &'a Map<String, Value>, path: &str) -> Vec<&'a Value> {
    let segs: Vec<&str> = path.split('.').collect();
    let mut out = Vec::new();
    if let Some(first) = root.get(segs[0]) {
        collect_rec(first, &segs[1..], &mut out);
    }
    out
}

fn collect_rec<'a>(value: &'a Value, rest: &[&str], out: &mut Vec<&'a Value>) {
    if rest.is_empty() {
        out.push(value);
        return;
    }
    match value {
        Value::Object(obj) => {
            if let Some(next) = obj.get(rest[0]) {
                collect_rec(next, &rest[1..], out);
            }
        }
        Value::Array(arr) => {
            if let Ok(idx) = rest[0].parse::<usize>() {
                if let Some(next) = arr.get(idx) {
                    collect_rec(next, &rest[1..], out);
                }
                return;
            }
            for item in arr {
                collect_rec(item, rest, out);
            }
        }
        _ => {}
    }
}

/// Set `value` at `path`, creating intermediate objects as needed
pub fn set_path(root: &mut Map<String, Value>, path: &str, value: Value) -> Result<(), PathError> {
    let segs = segments(path)?;
    set_in_object(root, &segs, path, value)
}

fn set_in_object(
    obj: &mut Map<String, Value>,
    segs: &[&str],
    path: &str,
    value: Value,
) -> Result<(), PathError> {
    let (head, tail) = (segs[0], &segs[1..]);
    if tail.is_empty() {
        obj.insert(head.to_string(), value);
        return Ok(());
    }
    let entry = obj
        .entry(head.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if entry.is_null() {
        *entry = Value::Object(Map::new());
    }
    set_in_value(entry, tail, path, value)
}

fn set_in_value(
    target: &mut Value,
    segs: &[&str],
    path: &str,
    value: Value,
) -> Result<(), PathError> {
    match target {
        Value::Object(obj) => set_in_object(obj, segs, path, value),
        Value::Array(arr) => {
            let index = segs[0]
                .parse::<usize>()
                .map_err(|_| PathError::NotAContainer {
                    path: path.to_string(),
                    segment: segs[0].to_string(),
                })?;
            let slot = arr.get_mut(index).ok_or(PathError::IndexOutOfBounds {
                path: path.to_string(),
                index,
            })?;
            if segs.len() == 1 {
                *slot = value;
                return Ok(());
            }
            if slot.is_null() {
                *slot = Value::Object(Map::new());
            }
            set_in_value(slot, &segs[1..], path, value)
        }
        _ => Err(PathError::NotAContainer {
            path: path.to_string(),
            segment: segs[0].to_string(),
        }),
    }
}

/// Remove the value at `path`. Returns the removed value, if any.
pub fn remove_path(root: &mut Map<String, Value>, path: &str) -> Option<Value> {
    match path.rsplit_once('.') {
        None => root.remove(path),
        Some((parent, last)) => match get_path_mut(root, parent)? {
            Value::Object(obj) => obj.remove(last),
            _ => None,
        },
    }
}

/// Mutable access to the value at `path`
pub fn get_path_mut<'a>(root: &'a mut Map<String, Value>, path: &str) -> Option<&'a mut Value> {
    let mut parts = path.split('.');
    let mut current = root.get_mut(parts.next()?)?;
    for seg in parts {
        current = match current {
            Value::Object(obj) => obj.get_mut(seg)?,
            Value::Array(arr) => arr.get_mut(seg.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(m) => m,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_get_nested_and_index() {
        let doc = obj(json!({"a": {"b": [10, {"c": 3}]}}));
        assert_eq!(get_path(&doc, "a.b.0"), Some(&json!(10)));
        assert_eq!(get_path(&doc, "a.b.1.c"), Some(&json!(3)));
        assert_eq!(get_path(&doc, "a.x"), None);
    }

    #[test]
    fn test_collect_fans_out_over_arrays() {
        let doc = obj(json!({"tags": [{"name": "x"}, {"name": "y"}, {"other": 1}]}));
        let found = collect_path(&doc, "tags.name");
        assert_eq!(found, vec![&json!("x"), &json!("y")]);
    }

    #[test]
    fn test_set_creates_intermediates() {
        let mut doc = Map::new();
        set_path(&mut doc, "mixin:Ext.estimate", json!(5)).unwrap();
        assert_eq!(Value::Object(doc), json!({"mixin:Ext": {"estimate": 5}}));
    }

    #[test]
    fn test_set_into_array_element() {
        let mut doc = obj(json!({"items": [{"n": 1}, {"n": 2}]}));
        set_path(&mut doc, "items.1.n", json!(20)).unwrap();
        assert_eq!(get_path(&doc, "items.1.n"), Some(&json!(20)));
    }

    #[test]
    fn test_set_through_scalar_fails() {
        let mut doc = obj(json!({"title": "x"}));
        let err = set_path(&mut doc, "title.sub", json!(1)).unwrap_err();
        assert!(matches!(err, PathError::NotAContainer { .. }));
    }

    #[test]
    fn test_remove_nested() {
        let mut doc = obj(json!({"a": {"b": 1, "c": 2}}));
        assert_eq!(remove_path(&mut doc, "a.b"), Some(json!(1)));
        assert_eq!(Value::Object(doc), json!({"a": {"c": 2}}));
    }

    #[test]
    fn test_empty_segment_rejected() {
        let mut doc = Map::new();
        assert!(set_path(&mut doc, "a..b", json!(1)).is_err());
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn path_strategy() -> impl Strategy<Value = Vec<String>> {
            prop::collection::vec("[a-z]{1,4}", 1..5)
        }

        proptest! {
            #[test]
            fn set_then_get_returns_value(segs in path_strategy(), n in any::<i64>()) {
                let path = segs.join(".");
                let mut doc = Map::new();
                set_path(&mut doc, &path, json!(n)).unwrap();
                prop_assert_eq!(get_path(&doc, &path), Some(&json!(n)));
            }

            #[test]
            fn remove_after_set_restores_absence(segs in path_strategy()) {
                let path = segs.join(".");
                let mut doc = Map::new();
                set_path(&mut doc, &path, json!(true)).unwrap();
                prop_assert_eq!(remove_path(&mut doc, &path), Some(json!(true)));
                prop_assert_eq!(get_path(&doc, &path), None);
            }
        }
    }
}
