//! Class resolution: descendants, mixins and the model partition

use crate::common::*;
use facetdb::{ClassId, DocumentUpdate, Filter, FindOptions, SortOrder, TxResult};
use proptest::prelude::*;
use serde_json::{json, Map};

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// A base class query returns exactly the union of its subclasses' results
    #[test]
    fn base_query_is_union_of_descendants(kinds in prop::collection::vec(any::<bool>(), 0..20)) {
        let t = TestAdapter::new();
        let txs: Vec<_> = kinds
            .iter()
            .enumerate()
            .map(|(i, sub)| {
                let class = if *sub { SUB_ISSUE } else { ISSUE };
                create(&format!("i{:02}", i), class, json!({}))
            })
            .collect();
        t.apply_transactions(&txs).unwrap();

        let options = FindOptions::default();
        let all = t.find_all(&ClassId::new(ISSUE), &Filter::new(), &options).unwrap().docs;
        let subs = t.find_all(&ClassId::new(SUB_ISSUE), &Filter::new(), &options).unwrap().docs;
        let plain = all.iter().filter(|d| d.class() == Some(ISSUE)).count();

        prop_assert_eq!(all.len(), kinds.len());
        prop_assert_eq!(subs.len(), kinds.iter().filter(|s| **s).count());
        prop_assert_eq!(plain + subs.len(), all.len());
    }
}

#[test]
fn empty_mixin_still_marks_document() {
    let t = TestAdapter::new();
    t.apply_transactions(&[
        create("i1", ISSUE, json!({})),
        create("i2", ISSUE, json!({})),
        apply_mixin("i1", DocumentUpdate::Fields(Map::new())),
    ])
    .unwrap();

    let found = t
        .find_all(&ClassId::new(ESTIMATED), &Filter::new(), &FindOptions::default())
        .unwrap();
    assert_eq!(ids(&found.docs), vec!["i1"]);
    assert!(found.docs[0][ESTIMATED].is_object());
}

#[test]
fn mixin_updates_stay_in_their_namespace() {
    let t = TestAdapter::new();
    t.apply_transactions(&[
        create("i1", ISSUE, json!({"estimate": "top-level"})),
        apply_mixin("i1", DocumentUpdate::fields([("estimate", json!(8))])),
    ])
    .unwrap();
    let doc = &t.load(&t.tracker(), &[facetdb::Ref::new("i1")]).unwrap()[0];
    assert_eq!(doc["estimate"], json!("top-level"));
    assert_eq!(doc[ESTIMATED]["estimate"], json!(8));
}

#[test]
fn model_partition_is_served_without_backend() {
    let t = TestAdapter::new();
    let found = t
        .find_all(
            &ClassId::new(STATUS),
            &Filter::new(),
            &FindOptions::default().sort_by("name", SortOrder::Desc),
        )
        .unwrap();
    assert_eq!(ids(&found.docs), vec!["status-open", "status-done"]);
    assert_eq!(t.backend.call_counts().find, 0);

    let results = t.apply_transactions(&[create("status-new", STATUS, json!({}))]).unwrap();
    assert_eq!(results, vec![TxResult::Ignored]);
    assert!(t.domains().unwrap().is_empty());
}
