//! Sort orders and the identifier fast path

use crate::common::*;
use facetdb::{ClassId, Filter, FindOptions, Projection, Ref, SortOrder};
use proptest::prelude::*;
use serde_json::json;

fn rank(doc: &facetdb::Document) -> usize {
    doc.get("priority")
        .and_then(|p| p.as_str())
        .and_then(|p| PRIORITIES.iter().position(|x| *x == p))
        .unwrap_or(PRIORITIES.len())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Enum attributes sort by declared position; unset ranks after all values
    #[test]
    fn enum_sort_follows_declaration(choices in prop::collection::vec(0usize..5, 1..15)) {
        let t = TestAdapter::new();
        let txs: Vec<_> = choices
            .iter()
            .enumerate()
            .map(|(i, c)| match PRIORITIES.get(*c) {
                Some(p) => create(&format!("i{:02}", i), ISSUE, json!({"priority": p})),
                None => create(&format!("i{:02}", i), ISSUE, json!({})),
            })
            .collect();
        t.apply_transactions(&txs).unwrap();

        for order in [SortOrder::Asc, SortOrder::Desc] {
            let descending = order == SortOrder::Desc;
            let options = FindOptions::default().sort_by("priority", order);
            let docs = t
                .find_all(&ClassId::new(ISSUE), &Filter::new(), &options)
                .unwrap()
                .docs;
            let ranks: Vec<usize> = docs.iter().map(rank).collect();
            let mut expected = ranks.clone();
            expected.sort_unstable();
            if descending {
                expected.reverse();
            }
            prop_assert_eq!(ranks, expected);
            prop_assert!(docs.iter().all(|d| !d.keys().any(|k| k.starts_with("__sort_"))));
        }
    }
}

#[test]
fn id_fast_path_ignores_sort_and_projection() {
    let t = TestAdapter::new();
    t.apply_transactions(&[create("i1", ISSUE, json!({"title": "x", "priority": "low"}))])
        .unwrap();
    t.backend.reset_call_counts();

    let found = t
        .find_all(
            &ClassId::new(ISSUE),
            &Filter::by_id(&Ref::new("i1")),
            &FindOptions::default()
                .sort_by("priority", SortOrder::Asc)
                .projection(Projection::default().include("title"))
                .limit(1),
        )
        .unwrap();
    assert_eq!(found.docs.len(), 1);
    assert_eq!(found.docs[0]["priority"], json!("low"));
    assert_eq!(t.backend.call_counts().aggregate, 0);
}

#[test]
fn mixin_attribute_sorts_by_qualified_path() {
    let t = TestAdapter::new();
    t.apply_transactions(&[
        create("i1", ISSUE, json!({})),
        create("i2", ISSUE, json!({})),
        apply_mixin("i1", facetdb::DocumentUpdate::fields([("estimate", json!(3))])),
        apply_mixin("i2", facetdb::DocumentUpdate::fields([("estimate", json!(1))])),
    ])
    .unwrap();
    let docs = t
        .find_all(
            &ClassId::new(ISSUE),
            &Filter::new(),
            &FindOptions::default().sort_by("estimate", SortOrder::Asc),
        )
        .unwrap()
        .docs;
    assert_eq!(ids(&docs), vec!["i2", "i1"]);
}
