//! Transaction batches: operators, ordering and failure isolation

use crate::common::*;
use facetdb::{AdapterConfig, Condition, Error, Filter, Ref, UpdateOp};
use proptest::prelude::*;
use serde_json::{json, Value};

fn labels(t: &TestAdapter, id: &str) -> Value {
    t.load(&t.tracker(), &[Ref::new(id)]).unwrap()[0]["labels"].clone()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// `$move` leaves the element at the requested index, others in order
    #[test]
    fn move_places_element_at_index(len in 1usize..8, from in 0usize..8, to in 0usize..8) {
        let from = from % len;
        let to = to % len;
        let original: Vec<Value> = (0..len).map(|n| json!(format!("l{}", n))).collect();

        let t = TestAdapter::new();
        t.apply_transactions(&[create("i1", ISSUE, json!({"labels": original.clone()}))]).unwrap();
        t.apply_transactions(&[update_ops(
            "i1",
            vec![UpdateOp::Move {
                field: "labels".into(),
                value: original[from].clone(),
                position: to,
            }],
        )])
        .unwrap();

        let mut expected = original.clone();
        let moved = expected.remove(from);
        expected.insert(to, moved);
        prop_assert_eq!(labels(&t, "i1"), Value::Array(expected));
    }
}

#[test]
fn ten_updates_with_one_malformed() {
    let t = TestAdapter::new();
    let creates: Vec<_> = (0..10)
        .map(|i| create(&format!("i{}", i), ISSUE, json!({"labels": [], "title": "x"})))
        .collect();
    t.apply_transactions(&creates).unwrap();

    let pushes: Vec<_> = (0..10)
        .map(|i| {
            let field = if i == 3 { "title" } else { "labels" };
            update_ops(
                &format!("i{}", i),
                vec![UpdateOp::Push {
                    field: field.into(),
                    values: vec![json!("tag")],
                    position: None,
                }],
            )
        })
        .collect();
    let err = t.apply_transactions(&pushes).unwrap_err();
    let Error::PartialBatchFailure { failed, .. } = &err else {
        panic!("expected partial failure, got {:?}", err);
    };
    assert_eq!(failed, &vec![Ref::new("i3")]);

    let tagged = t
        .count(&facetdb::ClassId::new(ISSUE), &Filter::new().with("labels", Condition::Size(1)))
        .unwrap();
    assert_eq!(tagged, 9);
}

#[test]
fn later_updates_win_within_one_batch() {
    let t = TestAdapter::new();
    t.apply_transactions(&[
        create("i1", ISSUE, json!({"labels": []})),
        update_fields("i1", json!({"title": "first", "owner": {"name": "a"}})),
        update_ops(
            "i1",
            vec![UpdateOp::Push {
                field: "labels".into(),
                values: vec![json!("x")],
                position: None,
            }],
        ),
        update_fields("i1", json!({"title": "second", "owner.name": "b"})),
    ])
    .unwrap();
    let doc = &t.load(&t.tracker(), &[Ref::new("i1")]).unwrap()[0];
    assert_eq!(doc["title"], json!("second"));
    assert_eq!(doc["owner"]["name"], json!("b"));
    assert_eq!(doc["labels"], json!(["x"]));
}

#[test]
fn remove_in_same_batch_is_final() {
    let t = TestAdapter::new();
    t.apply_transactions(&[
        create("i1", ISSUE, json!({})),
        update_fields("i1", json!({"title": "gone"})),
        tx(facetdb::TxKind::Remove {
            object_id: Ref::new("i1"),
            object_class: facetdb::ClassId::new(ISSUE),
        }),
    ])
    .unwrap();
    assert!(t.load(&t.tracker(), &[Ref::new("i1")]).unwrap().is_empty());
}

#[test]
fn large_batches_are_chunked() {
    let config = AdapterConfig {
        bulk_batch_size: 4,
        ..AdapterConfig::default()
    };
    let t = TestAdapter::with_config(config);
    let creates: Vec<_> = (0..10)
        .map(|i| create(&format!("i{}", i), ISSUE, json!({"n": 0})))
        .collect();
    t.apply_transactions(&creates).unwrap();
    t.backend.reset_call_counts();

    let incs: Vec<_> = (0..10)
        .map(|i| update_ops(&format!("i{}", i), vec![UpdateOp::Inc(object(json!({"n": 1})))]))
        .collect();
    t.apply_transactions(&incs).unwrap();
    assert_eq!(t.backend.call_counts().bulk_write, 3);
}

#[test]
fn transient_outage_surfaces_as_error() {
    let t = TestAdapter::new();
    t.apply_transactions(&[create("i1", ISSUE, json!({}))]).unwrap();
    t.backend.faults().set_outage(true);
    let err = t.apply_transactions(&[update_fields("i1", json!({"a": 1}))]).unwrap_err();
    assert!(matches!(err, Error::Backend(ref e) if e.is_transient()));
    t.backend.faults().clear();
    t.apply_transactions(&[update_fields("i1", json!({"a": 1}))]).unwrap();
}
