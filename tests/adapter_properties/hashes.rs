//! Content hashes: invalidation on write, stability across scans

use crate::common::*;
use facetdb::{compute_hash, DocInfo, Filter, FindParams, Ref, Update, UpdateOp};
use serde_json::{json, Value};

fn scan(t: &TestAdapter, recheck: bool) -> Vec<DocInfo> {
    let mut it = t.iterate_hashes(&t.tracker(), recheck).unwrap();
    let mut out: Vec<DocInfo> = it.by_ref().collect::<facetdb::Result<_>>().unwrap();
    it.close().unwrap();
    out.sort_by(|a, b| a.id.cmp(&b.id));
    out
}

fn stored_hash(t: &TestAdapter, id: &str) -> Value {
    t.raw_find_all(&t.tracker(), &Filter::by_id(&Ref::new(id)), &FindParams::default())
        .unwrap()[0]["%hash%"]
        .clone()
}

#[test]
fn every_write_path_nulls_the_hash() {
    let t = TestAdapter::new();
    t.apply_transactions(&[create("i1", ISSUE, json!({"labels": []}))]).unwrap();

    let writes: Vec<Box<dyn Fn(&TestAdapter)>> = vec![
        Box::new(|t: &TestAdapter| {
            t.apply_transactions(&[update_fields("i1", json!({"title": "x"}))]).unwrap();
        }),
        Box::new(|t: &TestAdapter| {
            t.apply_transactions(&[update_ops(
                "i1",
                vec![UpdateOp::Push {
                    field: "labels".into(),
                    values: vec![json!(1)],
                    position: None,
                }],
            )])
            .unwrap();
        }),
        Box::new(|t: &TestAdapter| {
            let estimate = facetdb::DocumentUpdate::fields([("estimate", json!(2))]);
            t.apply_transactions(&[apply_mixin("i1", estimate)]).unwrap();
        }),
        Box::new(|t: &TestAdapter| {
            t.raw_update(&t.tracker(), &Filter::new(), Update::new().set("flag", json!(true)))
                .unwrap();
        }),
    ];

    for write in writes {
        scan(&t, false);
        assert!(stored_hash(&t, "i1").is_string());
        write(&t);
        assert_eq!(stored_hash(&t, "i1"), Value::Null);
    }
}

#[test]
fn repeated_scans_agree() {
    let t = TestAdapter::new();
    let creates: Vec<_> = (0..25)
        .map(|i| create(&format!("i{:02}", i), ISSUE, json!({"n": i, "tags": ["a", i]})))
        .collect();
    t.apply_transactions(&creates).unwrap();

    let first = scan(&t, false);
    let second = scan(&t, false);
    let rechecked = scan(&t, true);
    assert_eq!(first.len(), 25);
    assert_eq!(first, second);
    assert_eq!(first, rechecked);
}

#[test]
fn scan_hash_matches_document_content() {
    let t = TestAdapter::new();
    t.apply_transactions(&[create("i1", ISSUE, json!({"title": "t"}))]).unwrap();
    let info = scan(&t, false).remove(0);
    let doc = t.load(&t.tracker(), &[Ref::new("i1")]).unwrap().remove(0);
    let expected = compute_hash(&doc);
    assert_eq!(info.hash, expected.hash);
    assert_eq!(info.size, expected.size);
}

#[test]
fn upload_invalidates_and_clean_removes() {
    let t = TestAdapter::new();
    t.apply_transactions(&[create("i1", ISSUE, json!({"title": "t"}))]).unwrap();
    scan(&t, false);
    let mut doc = t.load(&t.tracker(), &[Ref::new("i1")]).unwrap().remove(0);
    doc.insert("title".to_string(), json!("uploaded"));
    t.upload(&t.tracker(), vec![doc]).unwrap();
    assert_eq!(stored_hash(&t, "i1"), Value::Null);

    t.clean(&t.tracker(), &[Ref::new("i1")]).unwrap();
    assert!(scan(&t, false).is_empty());
}
