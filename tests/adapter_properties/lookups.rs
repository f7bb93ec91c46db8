//! Relation expansion: collapse rules and strategy equivalence

use crate::common::*;
use facetdb::{ClassId, Filter, FindOptions, Lookup, SortOrder};
use serde_json::{json, Value};

fn seed(t: &TestAdapter) {
    t.apply_transactions(&[
        create("p1", PROJECT, json!({"name": "Core"})),
        create("p2", PROJECT, json!({"name": "Web"})),
        create("i1", ISSUE, json!({"title": "one", "project": "p1", "status": "status-open"})),
        create("i2", ISSUE, json!({"title": "two", "project": ["p1", "p2"]})),
        create("i3", ISSUE, json!({"title": "three", "project": "missing"})),
        create("c1", COMMENT, json!({"attachedTo": "i1"})),
    ])
    .unwrap();
}

fn lookup() -> Lookup {
    Lookup::new()
        .forward("project", ClassId::new(PROJECT))
        .forward("status", ClassId::new(STATUS))
        .reverse("comments", ClassId::new(COMMENT))
}

#[test]
fn forward_collapses_by_match_count() {
    let t = TestAdapter::new();
    seed(&t);
    let docs = t
        .find_all(
            &ClassId::new(ISSUE),
            &Filter::new(),
            &FindOptions::default().sort_by("title", SortOrder::Asc).lookup(lookup()),
        )
        .unwrap()
        .docs;
    assert_eq!(ids(&docs), vec!["i1", "i3", "i2"]);

    // one match: object
    assert_eq!(docs[0].lookup("project").unwrap()["name"], json!("Core"));
    // model-partition target
    assert_eq!(docs[0].lookup("status").unwrap()["name"], json!("Open"));
    // zero matches: absent
    assert!(docs[1].lookup("project").is_none());
    // several matches: list
    assert_eq!(docs[2].lookup("project").unwrap().as_array().map(Vec::len), Some(2));

    // reverse is always a list
    assert_eq!(docs[0].lookup("comments").unwrap().as_array().map(Vec::len), Some(1));
    assert_eq!(docs[1].lookup("comments"), Some(&Value::Array(vec![])));
}

#[test]
fn joined_and_post_fetch_strategies_agree() {
    let t = TestAdapter::new();
    seed(&t);
    let options = FindOptions::default()
        .sort_by("title", SortOrder::Asc)
        .lookup(Lookup::new().forward("project", ClassId::new(PROJECT)));

    let post_fetch = t
        .find_all(&ClassId::new(ISSUE), &Filter::new().eq("project", json!("p1")), &options)
        .unwrap()
        .docs;
    let joined = t
        .find_all(
            &ClassId::new(ISSUE),
            &Filter::new().eq("$lookup.project._id", json!("p1")),
            &options,
        )
        .unwrap()
        .docs;

    assert_eq!(ids(&post_fetch), vec!["i1", "i2"]);
    assert_eq!(ids(&joined), ids(&post_fetch));
    for (a, b) in joined.iter().zip(&post_fetch) {
        assert_eq!(a.lookup("project"), b.lookup("project"));
        assert!(!a.keys().any(|k| k.contains("_lookup_")));
    }
}

#[test]
fn total_counts_joined_matches() {
    let t = TestAdapter::new();
    seed(&t);
    let result = t
        .find_all(
            &ClassId::new(ISSUE),
            &Filter::new().eq("$lookup.project.name", json!("Web")),
            &FindOptions::default()
                .lookup(Lookup::new().forward("project", ClassId::new(PROJECT)))
                .limit(5)
                .with_total(),
        )
        .unwrap();
    assert_eq!(ids(&result.docs), vec!["i2"]);
    assert_eq!(result.total, Some(1));
}
